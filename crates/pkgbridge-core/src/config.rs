use std::time::Duration;

pub const ENV_CAPTURE: &str = "PKGBRIDGE_CAPTURE";
pub const ENV_LOG: &str = "PKGBRIDGE_LOG";
pub const ENV_TEST_TIMEOUT_SECS: &str = "PKGBRIDGE_TEST_TIMEOUT_SECS";

pub const DEFAULT_TEST_TIMEOUT: Duration = Duration::from_secs(300);

/// Host-tunable knobs, read from the environment on every call so a host can
/// flip them between invocations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BridgeConfig {
    /// Redirect stdout/stderr while an operation runs.
    pub capture_streams: bool,
    /// `EnvFilter` directive; logging stays off when unset.
    pub log_filter: Option<String>,
    /// Used when a release test is requested with a non-positive timeout.
    pub default_test_timeout: Duration,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            capture_streams: true,
            log_filter: None,
            default_test_timeout: DEFAULT_TEST_TIMEOUT,
        }
    }
}

impl BridgeConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let capture_streams = lookup(ENV_CAPTURE)
            .and_then(|v| parse_bool(&v))
            .unwrap_or(defaults.capture_streams);
        let log_filter = lookup(ENV_LOG)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty());
        let default_test_timeout = lookup(ENV_TEST_TIMEOUT_SECS)
            .and_then(|v| v.trim().parse::<u64>().ok())
            .filter(|&v| v != 0)
            .map(Duration::from_secs)
            .unwrap_or(defaults.default_test_timeout);
        Self {
            capture_streams,
            log_filter,
            default_test_timeout,
        }
    }
}

pub fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim() {
        "1" | "true" | "TRUE" | "yes" | "YES" => Some(true),
        "0" | "false" | "FALSE" | "no" | "NO" => Some(false),
        _ => None,
    }
}
