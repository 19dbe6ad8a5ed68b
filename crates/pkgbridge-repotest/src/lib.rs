//! Short-lived chart repository servers for tests: a plain HTTP index server
//! and an in-memory OCI registry, tracked in a concurrent registry.

pub mod auth;
pub mod http;
pub mod index_server;
pub mod oci;
pub mod registry;
pub mod tempdir;

pub use registry::{ServerRecord, ServerRegistry};

use anyhow::Result;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RepoServerOptions {
    /// Files to serve; only used by the index server.
    pub glob: String,
    pub username: Option<String>,
    pub password: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerKind {
    Index,
    Oci,
}

/// Folds teardown results into one, keeping every failure message.
pub(crate) fn collect_errors(results: impl IntoIterator<Item = Result<()>>) -> Result<()> {
    let failures: Vec<String> = results
        .into_iter()
        .filter_map(Result::err)
        .map(|err| format!("{err:#}"))
        .collect();
    if failures.is_empty() {
        Ok(())
    } else {
        Err(anyhow::anyhow!(failures.join("; ")))
    }
}
