//! Scoped scan workspaces.
//!
//! A workspace is acquired before Clone and released exactly once by the
//! Cleanup stage. `Drop` backstops release so a panicking or cancelled
//! pipeline cannot leak directories, but the normal path is the explicit
//! `release()` call.

use crate::errors::{Result, ScanError};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

/// Exclusive, uuid-named directory owned by one scan for its lifetime.
#[derive(Debug)]
pub struct Workspace {
    root: PathBuf,
    released: AtomicBool,
}

impl Workspace {
    /// Create a fresh workspace under `base` for the given scan.
    pub fn create(base: &Path, scan_id: &str) -> Result<Self> {
        let dir_name = format!("{scan_id}-{}", uuid::Uuid::new_v4());
        let root = base.join(dir_name);
        std::fs::create_dir_all(&root)
            .map_err(|e| ScanError::Workspace(format!("creating {}: {e}", root.display())))?;
        log::debug!("workspace created: {}", root.display());
        Ok(Self {
            root,
            released: AtomicBool::new(false),
        })
    }

    pub fn path(&self) -> &Path {
        &self.root
    }

    /// Directory the repository is cloned into.
    pub fn repo_dir(&self) -> PathBuf {
        self.root.join("repo")
    }

    /// Delete the workspace. Idempotent; the second and later calls are
    /// no-ops so Cleanup stays exactly-once even when Drop also fires.
    pub fn release(&self) -> Result<()> {
        if self.released.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        if self.root.exists() {
            std::fs::remove_dir_all(&self.root)
                .map_err(|e| ScanError::Workspace(format!("removing {}: {e}", self.root.display())))?;
        }
        log::debug!("workspace released: {}", self.root.display());
        Ok(())
    }

    #[cfg(test)]
    pub fn is_released(&self) -> bool {
        self.released.load(Ordering::SeqCst)
    }
}

impl Drop for Workspace {
    fn drop(&mut self) {
        if !self.released.load(Ordering::SeqCst) {
            log::warn!(
                "workspace {} dropped without explicit release",
                self.root.display()
            );
            let _ = self.release();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_and_release() {
        let base = tempfile::tempdir().unwrap();
        let ws = Workspace::create(base.path(), "scan-1").unwrap();
        let path = ws.path().to_path_buf();
        assert!(path.exists());

        ws.release().unwrap();
        assert!(!path.exists());
        // Second release is a no-op
        ws.release().unwrap();
    }

    #[test]
    fn test_drop_backstop_removes_dir() {
        let base = tempfile::tempdir().unwrap();
        let path = {
            let ws = Workspace::create(base.path(), "scan-2").unwrap();
            ws.path().to_path_buf()
        };
        assert!(!path.exists());
    }

    #[test]
    fn test_workspaces_are_exclusive() {
        let base = tempfile::tempdir().unwrap();
        let a = Workspace::create(base.path(), "scan-3").unwrap();
        let b = Workspace::create(base.path(), "scan-3").unwrap();
        assert_ne!(a.path(), b.path());
        a.release().unwrap();
        b.release().unwrap();
    }
}
