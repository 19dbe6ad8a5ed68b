//! The seam to the package-management library. The bridge never implements
//! package semantics itself; a host registers a [`PackageManager`] and every
//! exported operation is routed to it.

use std::sync::Arc;

use anyhow::Result;
use once_cell::sync::Lazy;
use parking_lot::RwLock;
use tracing::debug;

use crate::aggregate::{aggregate, Aggregation, FragmentLabel, OutputFragment};
use crate::capture::CaptureSession;
use crate::options::*;

/// Side-channel buffers an action may write into while it runs.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ActionLogs {
    /// Dependency resolution and update output.
    pub dependency: String,
    /// Registry client debug output.
    pub registry: String,
    /// Cluster client debug output.
    pub cluster: String,
}

impl ActionLogs {
    pub fn fragments(&self, primary: impl Into<String>) -> Vec<OutputFragment> {
        vec![
            OutputFragment::primary(primary),
            OutputFragment::new(FragmentLabel::DependencyLog, self.dependency.clone()),
            OutputFragment::new(FragmentLabel::RegistryDebugLog, self.registry.clone()),
            OutputFragment::new(FragmentLabel::ClusterDebugLog, self.cluster.clone()),
        ]
    }

    pub fn aggregate(&self, result: Result<String>) -> Aggregation {
        match result {
            Ok(text) => aggregate(&self.fragments(text), None),
            Err(err) => aggregate(&self.fragments(String::new()), Some(format!("{err:#}"))),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LintReport {
    pub messages: Vec<String>,
    pub failed: bool,
}

impl LintReport {
    /// One message per line, closed by a `Failed: <bool>` line.
    pub fn render(&self) -> String {
        let mut lines = self.messages.clone();
        lines.push(format!("Failed: {}", self.failed));
        lines.join("\n")
    }
}

fn unavailable<T>(operation: &str) -> Result<T> {
    anyhow::bail!("{operation} is not available: no package manager backend is registered")
}

/// Package-management actions. Every method has a default that reports the
/// action as unavailable, so backends implement only what they support.
#[allow(unused_variables)]
pub trait PackageManager: Send + Sync {
    /// Returns the path of the created chart.
    fn create(&self, options: &CreateOptions) -> Result<String> {
        unavailable("create")
    }

    fn dependency_build(&self, options: &DependencyOptions, logs: &mut ActionLogs) -> Result<String> {
        unavailable("dependency build")
    }

    fn dependency_list(&self, options: &DependencyOptions, logs: &mut ActionLogs) -> Result<String> {
        unavailable("dependency list")
    }

    fn dependency_update(&self, options: &DependencyOptions, logs: &mut ActionLogs) -> Result<String> {
        unavailable("dependency update")
    }

    fn get_values(&self, options: &GetValuesOptions, logs: &mut ActionLogs) -> Result<String> {
        unavailable("get values")
    }

    fn history(&self, options: &HistoryOptions, logs: &mut ActionLogs) -> Result<String> {
        unavailable("history")
    }

    fn install(&self, options: &InstallOptions, logs: &mut ActionLogs) -> Result<String> {
        unavailable("install")
    }

    fn lint(&self, options: &LintOptions) -> Result<LintReport> {
        unavailable("lint")
    }

    fn list(&self, options: &ListOptions, logs: &mut ActionLogs) -> Result<String> {
        unavailable("list")
    }

    /// Returns the path of the packaged archive.
    fn package(&self, options: &PackageOptions) -> Result<String> {
        unavailable("package")
    }

    fn push(&self, options: &PushOptions, logs: &mut ActionLogs) -> Result<String> {
        unavailable("push")
    }

    fn registry_login(&self, options: &RegistryOptions, logs: &mut ActionLogs) -> Result<String> {
        unavailable("registry login")
    }

    fn registry_logout(&self, options: &RegistryOptions, logs: &mut ActionLogs) -> Result<String> {
        unavailable("registry logout")
    }

    fn repo_add(&self, options: &RepoOptions) -> Result<()> {
        unavailable("repo add")
    }

    fn repo_list(&self, options: &RepoOptions) -> Result<String> {
        unavailable("repo list")
    }

    fn repo_remove(&self, options: &RepoOptions) -> Result<()> {
        unavailable("repo remove")
    }

    fn repo_update(&self, options: &RepoOptions) -> Result<()> {
        unavailable("repo update")
    }

    fn search_repo(&self, options: &SearchOptions) -> Result<String> {
        unavailable("search repo")
    }

    fn show(&self, options: &ShowOptions, logs: &mut ActionLogs) -> Result<String> {
        unavailable("show")
    }

    fn status(&self, options: &StatusOptions, logs: &mut ActionLogs) -> Result<String> {
        unavailable("status")
    }

    fn template(&self, options: &TemplateOptions, logs: &mut ActionLogs) -> Result<String> {
        unavailable("template")
    }

    fn test(&self, options: &TestOptions, logs: &mut ActionLogs) -> Result<String> {
        unavailable("test")
    }

    fn uninstall(&self, options: &UninstallOptions, logs: &mut ActionLogs) -> Result<String> {
        unavailable("uninstall")
    }

    fn upgrade(&self, options: &UpgradeOptions, logs: &mut ActionLogs) -> Result<String> {
        unavailable("upgrade")
    }

    fn version(&self) -> Result<String> {
        unavailable("version")
    }
}

/// The backend in place until a host registers one.
#[derive(Debug, Default, Clone, Copy)]
pub struct Unavailable;

impl PackageManager for Unavailable {}

static BACKEND: Lazy<RwLock<Arc<dyn PackageManager>>> =
    Lazy::new(|| RwLock::new(Arc::new(Unavailable)));

/// Replaces the process-wide backend. Calls already in flight keep the one
/// they started with.
pub fn register(backend: Arc<dyn PackageManager>) {
    *BACKEND.write() = backend;
    debug!("package manager backend registered");
}

pub fn current() -> Arc<dyn PackageManager> {
    BACKEND.read().clone()
}

/// Puts [`Unavailable`] back.
pub fn reset() {
    *BACKEND.write() = Arc::new(Unavailable);
}

/// Runs one backend action with fresh side-channel buffers and aggregates
/// them with its result. With `debug` set, anything the action prints to the
/// process streams is captured into the registry log.
pub fn run_action<F>(debug: bool, action: F) -> Aggregation
where
    F: FnOnce(&dyn PackageManager, &mut ActionLogs) -> Result<String>,
{
    let backend = current();
    let mut logs = ActionLogs::default();
    let mut capture = CaptureSession::start(debug);
    let result = action(backend.as_ref(), &mut logs);
    capture.stop_and_append_to(&mut logs.registry);
    logs.aggregate(result)
}
