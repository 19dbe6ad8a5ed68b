use std::io::Write as _;

use pkgbridge_core::{invoke_with, Aggregation, BridgeConfig};

fn captured() -> BridgeConfig {
    BridgeConfig::default()
}

fn uncaptured() -> BridgeConfig {
    BridgeConfig {
        capture_streams: false,
        ..BridgeConfig::default()
    }
}

#[test]
fn success_fills_only_the_result() {
    let outcome = invoke_with(&uncaptured(), || Aggregation::success("deployed"));
    assert!(outcome.is_success());
    assert_eq!(outcome.result.as_deref(), Some("deployed"));
    assert_eq!(outcome.error, None);
    assert_eq!(outcome.stdout, None);
    assert_eq!(outcome.stderr, None);
}

#[test]
fn expected_error_fills_only_the_error() {
    let outcome = invoke_with(&uncaptured(), || {
        Aggregation::from_result(Err(anyhow::anyhow!("release not found")))
    });
    assert!(!outcome.is_success());
    assert_eq!(outcome.result, None);
    assert_eq!(outcome.error.as_deref(), Some("release not found"));
}

#[test]
fn panics_become_error_text() {
    let outcome = invoke_with(&uncaptured(), || panic!("chart loader exploded"));
    assert_eq!(outcome.result, None);
    assert_eq!(outcome.error.as_deref(), Some("chart loader exploded"));

    let outcome = invoke_with(&uncaptured(), || {
        let name = "demo";
        panic!("release {name} is corrupt")
    });
    assert_eq!(outcome.error.as_deref(), Some("release demo is corrupt"));
}

#[test]
fn whitespace_only_text_is_absent() {
    let outcome = invoke_with(&uncaptured(), || Aggregation {
        text: " \n\t ".to_string(),
        error: Some("\n".to_string()),
    });
    assert_eq!(outcome.result, None);
    assert_eq!(outcome.error, None);
}

#[cfg(unix)]
#[test]
fn stream_output_is_reported_apart_from_the_result() {
    let outcome = invoke_with(&captured(), || {
        let mut err = std::io::stderr();
        err.write_all(b"warning: deprecated api\n").expect("write");
        Aggregation::success("ok")
    });
    assert_eq!(outcome.result.as_deref(), Some("ok"));
    let stderr = outcome.stderr.expect("captured stderr");
    assert!(stderr.contains("warning: deprecated api"), "stderr: {stderr:?}");
}

#[cfg(unix)]
#[test]
fn streams_are_captured_even_when_the_operation_panics() {
    let outcome = invoke_with(&captured(), || {
        let mut err = std::io::stderr();
        err.write_all(b"about-to-fail-marker\n").expect("write");
        panic!("boom")
    });
    assert_eq!(outcome.error.as_deref(), Some("boom"));
    let stderr = outcome.stderr.expect("captured stderr");
    assert!(stderr.contains("about-to-fail-marker"));
}
