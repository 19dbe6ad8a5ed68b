use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use anyhow::{Context, Result};

/// A directory under the system temp dir. [`TempDir::close`] removes it and
/// reports failures; dropping it removes it best-effort.
#[derive(Debug)]
pub struct TempDir {
    path: PathBuf,
}

impl TempDir {
    pub fn new(prefix: &str) -> Result<Self> {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        let base = std::env::temp_dir();
        let pid = std::process::id();

        for _ in 0..10_000 {
            let n = COUNTER.fetch_add(1, Ordering::Relaxed);
            let path = base.join(format!("{prefix}_{pid}_{n}"));
            match std::fs::create_dir(&path) {
                Ok(()) => return Ok(Self { path }),
                Err(err) if err.kind() == std::io::ErrorKind::AlreadyExists => continue,
                Err(err) => {
                    return Err(err).with_context(|| format!("create temp dir: {}", path.display()))
                }
            }
        }
        anyhow::bail!("failed to create unique temp dir under {}", base.display())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Removes the directory recursively. A directory that is already gone
    /// counts as removed.
    pub fn close(mut self) -> Result<()> {
        let path = std::mem::take(&mut self.path);
        remove_tree(&path).with_context(|| format!("remove temp dir: {}", path.display()))
    }
}

fn remove_tree(path: &Path) -> std::io::Result<()> {
    match std::fs::remove_dir_all(path) {
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
        other => other,
    }
}

impl Drop for TempDir {
    fn drop(&mut self) {
        if self.path.as_os_str().is_empty() {
            return;
        }
        if let Err(err) = remove_tree(&self.path) {
            tracing::warn!(path = %self.path.display(), error = %err, "failed to remove temp dir");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn removed_on_drop() {
        let dir = TempDir::new("repotest-unit").expect("temp dir");
        let path = dir.path().to_path_buf();
        std::fs::write(path.join("file.txt"), b"x").expect("write");
        assert!(path.is_dir());
        drop(dir);
        assert!(!path.exists());
    }

    #[test]
    fn close_removes_and_reports() {
        let dir = TempDir::new("repotest-unit").expect("temp dir");
        let path = dir.path().to_path_buf();
        std::fs::create_dir(path.join("nested")).expect("mkdir");
        std::fs::write(path.join("nested/file.txt"), b"x").expect("write");
        dir.close().expect("close");
        assert!(!path.exists());
    }

    #[test]
    fn close_tolerates_a_directory_already_gone() {
        let dir = TempDir::new("repotest-unit").expect("temp dir");
        std::fs::remove_dir_all(dir.path()).expect("remove");
        dir.close().expect("close");
    }

    #[cfg(unix)]
    #[test]
    fn close_surfaces_removal_errors() {
        // A regular file where the directory should be makes remove_dir_all
        // fail with "not a directory", even as root.
        let dir = TempDir::new("repotest-unit").expect("temp dir");
        let path = dir.path().to_path_buf();
        std::fs::remove_dir(&path).expect("remove");
        std::fs::write(&path, b"not a dir").expect("write");
        let err = dir.close().expect_err("close should fail");
        assert!(format!("{err:#}").contains("remove temp dir"), "{err:#}");
        std::fs::remove_file(&path).expect("cleanup");
    }

    #[test]
    fn names_are_unique() {
        let a = TempDir::new("repotest-unit").expect("temp dir");
        let b = TempDir::new("repotest-unit").expect("temp dir");
        assert_ne!(a.path(), b.path());
    }
}
