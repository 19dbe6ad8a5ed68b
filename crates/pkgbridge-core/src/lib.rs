//! Plumbing shared by every exported bridge operation: process stream capture,
//! side-channel aggregation, the panic-safe invocation wrapper and the seam to
//! the package-management backend.

pub mod aggregate;
pub mod backend;
pub mod capture;
pub mod config;
pub mod invoke;
pub mod logging;
pub mod ops;
pub mod options;

pub use aggregate::{aggregate, Aggregation, FragmentLabel, OutputFragment, SEPARATOR};
pub use backend::{ActionLogs, LintReport, PackageManager, Unavailable};
pub use capture::{CaptureSession, CapturedOutput};
pub use config::BridgeConfig;
pub use invoke::{invoke, invoke_with, non_blank, Fault, Outcome};
