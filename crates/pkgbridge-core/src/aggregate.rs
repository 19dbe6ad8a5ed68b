//! Merging of the text fragments an operation produces into a single
//! `(text, error)` pair.
//!
//! Fragments are ordered by label (primary, dependency log, registry debug log,
//! cluster debug log), empty ones are dropped and the rest are joined with
//! [`SEPARATOR`]. Side-channel text follows the error when there is one and the
//! primary output otherwise; a failed operation emits no text.

pub const SEPARATOR: &str = "---\n";

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum FragmentLabel {
    Primary,
    DependencyLog,
    RegistryDebugLog,
    ClusterDebugLog,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputFragment {
    pub label: FragmentLabel,
    pub text: String,
}

impl OutputFragment {
    pub fn new(label: FragmentLabel, text: impl Into<String>) -> Self {
        Self {
            label,
            text: text.into(),
        }
    }

    pub fn primary(text: impl Into<String>) -> Self {
        Self::new(FragmentLabel::Primary, text)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Aggregation {
    pub text: String,
    pub error: Option<String>,
}

impl Aggregation {
    pub fn success(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            error: None,
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            text: String::new(),
            error: Some(error.into()),
        }
    }

    /// Error text keeps the full context chain (`outer: inner`).
    pub fn from_result(result: anyhow::Result<String>) -> Self {
        match result {
            Ok(text) => Self::success(text),
            Err(err) => Self::failure(format!("{err:#}")),
        }
    }

    pub fn is_failure(&self) -> bool {
        self.error.is_some()
    }
}

pub fn aggregate(fragments: &[OutputFragment], primary_error: Option<String>) -> Aggregation {
    let mut ordered: Vec<&OutputFragment> = fragments.iter().collect();
    ordered.sort_by_key(|f| f.label);

    let primary = join_sections(
        ordered
            .iter()
            .filter(|f| f.label == FragmentLabel::Primary)
            .map(|f| f.text.as_str()),
    );
    let side = join_sections(
        ordered
            .iter()
            .filter(|f| f.label != FragmentLabel::Primary)
            .map(|f| f.text.as_str()),
    );
    route(primary, &side, primary_error)
}

/// Attaches already-joined side-channel text to the error when there is a
/// non-empty one, otherwise to the output. A failed operation emits no text.
pub fn route(text: String, side: &str, error: Option<String>) -> Aggregation {
    match error.filter(|err| !err.is_empty()) {
        Some(err) => Aggregation {
            text: String::new(),
            error: Some(append_section(err, side)),
        },
        None => Aggregation {
            text: append_section(text, side),
            error: None,
        },
    }
}

pub fn join_sections<'a>(parts: impl IntoIterator<Item = &'a str>) -> String {
    parts
        .into_iter()
        .filter(|p| !p.is_empty())
        .fold(String::new(), append_section)
}

/// The separator always starts on its own line.
fn append_section(mut acc: String, next: &str) -> String {
    if next.is_empty() {
        return acc;
    }
    if acc.is_empty() {
        acc.push_str(next);
        return acc;
    }
    if !acc.ends_with('\n') {
        acc.push('\n');
    }
    acc.push_str(SEPARATOR);
    acc.push_str(next);
    acc
}

#[cfg(test)]
mod tests {
    use super::*;

    fn abc() -> Vec<OutputFragment> {
        vec![
            OutputFragment::primary("A"),
            OutputFragment::new(FragmentLabel::DependencyLog, "B"),
            OutputFragment::new(FragmentLabel::RegistryDebugLog, "C"),
        ]
    }

    #[test]
    fn joins_in_label_order_on_success() {
        let agg = aggregate(&abc(), None);
        assert_eq!(agg.text, "A\n---\nB\n---\nC");
        assert_eq!(agg.error, None);
    }

    #[test]
    fn input_order_does_not_matter() {
        let mut fragments = abc();
        fragments.reverse();
        assert_eq!(aggregate(&fragments, None).text, "A\n---\nB\n---\nC");
    }

    #[test]
    fn newline_terminated_fragments_are_not_doubled() {
        let fragments = vec![
            OutputFragment::primary("A\n"),
            OutputFragment::new(FragmentLabel::DependencyLog, "B\n"),
            OutputFragment::new(FragmentLabel::ClusterDebugLog, "C\n"),
        ];
        assert_eq!(aggregate(&fragments, None).text, "A\n---\nB\n---\nC\n");
    }

    #[test]
    fn side_text_follows_the_error() {
        let agg = aggregate(&abc(), Some("E".to_string()));
        assert_eq!(agg.error.as_deref(), Some("E\n---\nB\n---\nC"));
        assert_eq!(agg.text, "");

        let without_primary = &abc()[1..];
        let agg = aggregate(without_primary, Some("E".to_string()));
        assert_eq!(agg.text, "");
        assert_eq!(agg.error.as_deref(), Some("E\n---\nB\n---\nC"));
    }

    #[test]
    fn empty_fragments_are_dropped() {
        let fragments = vec![
            OutputFragment::primary(""),
            OutputFragment::new(FragmentLabel::DependencyLog, ""),
            OutputFragment::new(FragmentLabel::RegistryDebugLog, "C"),
        ];
        assert_eq!(aggregate(&fragments, None).text, "C");
    }

    #[test]
    fn nothing_to_merge_keeps_the_error() {
        let agg = aggregate(&[OutputFragment::primary("")], Some("boom".to_string()));
        assert_eq!(agg.text, "");
        assert_eq!(agg.error.as_deref(), Some("boom"));

        assert_eq!(aggregate(&[], None), Aggregation::default());
    }

    #[test]
    fn empty_error_message_counts_as_success() {
        let agg = aggregate(&abc(), Some(String::new()));
        assert_eq!(agg.error, None);
        assert_eq!(agg.text, "A\n---\nB\n---\nC");
    }

    #[test]
    fn from_result_renders_context_chain() {
        let err = anyhow::anyhow!("inner").context("outer");
        let agg = Aggregation::from_result(Err(err));
        assert_eq!(agg.error.as_deref(), Some("outer: inner"));
        assert!(agg.text.is_empty());
    }
}
