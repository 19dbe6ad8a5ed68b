use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

use anyhow::{Context, Result};
use once_cell::sync::OnceCell;
use tracing::{debug, info, warn};

use crate::index_server::IndexServer;
use crate::oci::OciServer;
use crate::{RepoServerOptions, ServerKind};

enum Running {
    Index(IndexServer),
    Oci(OciServer),
}

/// One started server, keyed in the registry by `id`.
pub struct ServerRecord {
    id: String,
    running: Running,
}

impl ServerRecord {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn kind(&self) -> ServerKind {
        match self.running {
            Running::Index(_) => ServerKind::Index,
            Running::Oci(_) => ServerKind::Oci,
        }
    }

    pub fn working_dir(&self) -> &Path {
        match &self.running {
            Running::Index(s) => s.root(),
            Running::Oci(s) => s.dir(),
        }
    }

    /// Closes the listener, then removes the working directory.
    fn shutdown(self) -> Result<()> {
        let id = self.id;
        let stopped = match self.running {
            Running::Index(s) => s.shutdown(),
            Running::Oci(s) => s.shutdown(),
        };
        stopped.with_context(|| format!("stop {id}"))?;
        debug!(%id, "server stopped");
        Ok(())
    }
}

/// Running ephemeral servers by id. Records leave the map under the lock and
/// are shut down outside it, so each is cleaned up exactly once.
#[derive(Default)]
pub struct ServerRegistry {
    servers: Mutex<BTreeMap<String, ServerRecord>>,
}

static GLOBAL: OnceCell<ServerRegistry> = OnceCell::new();

impl ServerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The process-wide registry used by the exported entry points.
    pub fn global() -> &'static ServerRegistry {
        GLOBAL.get_or_init(ServerRegistry::new)
    }

    fn servers(&self) -> MutexGuard<'_, BTreeMap<String, ServerRecord>> {
        self.servers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Starts a chart index server and returns its `http://127.0.0.1:<port>` id.
    pub fn start_http(&self, options: &RepoServerOptions) -> Result<String> {
        let server = IndexServer::start(options)?;
        let id = server.url().to_string();
        self.insert(ServerRecord {
            id: id.clone(),
            running: Running::Index(server),
        });
        Ok(id)
    }

    /// Starts an OCI registry and returns its `localhost:<port>` id.
    pub fn start_oci(&self, options: &RepoServerOptions) -> Result<String> {
        let server = OciServer::start(options)?;
        let id = server.id().to_string();
        self.insert(ServerRecord {
            id: id.clone(),
            running: Running::Oci(server),
        });
        Ok(id)
    }

    fn insert(&self, record: ServerRecord) {
        info!(id = %record.id, kind = ?record.kind(), "server registered");
        let replaced = self.servers().insert(record.id.clone(), record);
        if let Some(old) = replaced {
            if let Err(err) = old.shutdown() {
                warn!(error = %format!("{err:#}"), "replaced server did not stop cleanly");
            }
        }
    }

    /// Returns `Ok(false)` when nothing is registered under `id`. A server
    /// whose teardown fails is still removed from the registry.
    pub fn stop(&self, id: &str) -> Result<bool> {
        let removed = self.servers().remove(id);
        match removed {
            Some(record) => record.shutdown().map(|()| true),
            None => Ok(false),
        }
    }

    /// Stops everything registered at the time of the call and returns how
    /// many servers that was. Every record is torn down even when some fail;
    /// the error then lists each failure.
    pub fn stop_all(&self) -> Result<usize> {
        let all = std::mem::take(&mut *self.servers());
        let n = all.len();
        crate::collect_errors(all.into_values().map(ServerRecord::shutdown))?;
        Ok(n)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.servers().contains_key(id)
    }

    pub fn kind(&self, id: &str) -> Option<ServerKind> {
        self.servers().get(id).map(ServerRecord::kind)
    }

    pub fn working_dir(&self, id: &str) -> Option<PathBuf> {
        self.servers().get(id).map(|r| r.working_dir().to_path_buf())
    }

    pub fn len(&self) -> usize {
        self.servers().len()
    }

    pub fn is_empty(&self) -> bool {
        self.servers().is_empty()
    }
}
