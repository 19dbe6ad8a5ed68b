use std::any::Any;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};

use tracing::{debug, warn};

use crate::aggregate::Aggregation;
use crate::capture::{self, CaptureSession};
use crate::config::BridgeConfig;

/// Everything one bridge call hands back. `None` stands for "nothing worth
/// returning": empty and whitespace-only text are never represented.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Outcome {
    pub result: Option<String>,
    pub error: Option<String>,
    pub stdout: Option<String>,
    pub stderr: Option<String>,
}

impl Outcome {
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

pub fn non_blank(text: String) -> Option<String> {
    if text.trim().is_empty() {
        None
    } else {
        Some(text)
    }
}

/// An operation that panicked instead of returning.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fault {
    message: String,
}

impl Fault {
    pub fn from_panic(payload: Box<dyn Any + Send>) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "operation panicked".to_string()
        };
        Self { message }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl fmt::Display for Fault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for Fault {}

pub fn invoke<F>(operation: F) -> Outcome
where
    F: FnOnce() -> Aggregation,
{
    invoke_with(&BridgeConfig::from_env(), operation)
}

/// Runs `operation` with the process streams captured. Calls are serialized
/// process-wide, a panic inside `operation` comes back as the error text, and
/// captured stdout/stderr are reported separately from the result.
pub fn invoke_with<F>(config: &BridgeConfig, operation: F) -> Outcome
where
    F: FnOnce() -> Aggregation,
{
    let _console = capture::console_lock();
    let mut session = CaptureSession::start(config.capture_streams);

    let aggregation = match panic::catch_unwind(AssertUnwindSafe(operation)) {
        Ok(aggregation) => aggregation,
        Err(payload) => {
            let fault = Fault::from_panic(payload);
            warn!(fault = %fault, "operation panicked");
            Aggregation::failure(fault.to_string())
        }
    };

    let captured = session.finish();
    debug!(
        failed = aggregation.is_failure(),
        stdout_bytes = captured.stdout.len(),
        stderr_bytes = captured.stderr.len(),
        "operation finished"
    );

    Outcome {
        result: non_blank(aggregation.text),
        error: aggregation.error.and_then(non_blank),
        stdout: non_blank(captured.stdout),
        stderr: non_blank(captured.stderr),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn non_blank_drops_whitespace() {
        assert_eq!(non_blank(" \n\t".to_string()), None);
        assert_eq!(non_blank(String::new()), None);
        assert_eq!(non_blank(" x ".to_string()), Some(" x ".to_string()));
    }

    #[test]
    fn fault_reads_str_and_string_payloads() {
        let fault = Fault::from_panic(Box::new("static message"));
        assert_eq!(fault.message(), "static message");
        let fault = Fault::from_panic(Box::new(String::from("owned message")));
        assert_eq!(fault.to_string(), "owned message");
        let fault = Fault::from_panic(Box::new(17u32));
        assert_eq!(fault.message(), "operation panicked");
    }
}
