//! Startup replication.
//!
//! Before the persistent mount accepts calls, the worker copies whatever the
//! backend already holds into the mirror. The walk is breadth-first per
//! persistent directory. A broken entry is logged and skipped; it never
//! aborts the walk.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::constants::DEFAULT_DIR_MODE;
use crate::store::StoreOps;
use crate::vfs::{MirrorDriver, VfsResult};

/// What the startup walk copied.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StartupReport {
    pub directories: usize,
    pub files: usize,
    pub bytes: u64,
    /// Entries that could not be read or installed.
    pub skipped: usize,
}

/// Copies the backend tree into a mirror driver.
pub struct StartupReplicator<'a> {
    store: &'a dyn StoreOps,
    mirror: &'a MirrorDriver,
}

impl<'a> StartupReplicator<'a> {
    pub fn new(store: &'a dyn StoreOps, mirror: &'a MirrorDriver) -> Self {
        Self { store, mirror }
    }

    /// Populate the mirror from every persistent directory in `dirs`.
    ///
    /// Fails only when a root directory cannot be created in the mirror.
    pub async fn populate(&self, dirs: &[String]) -> VfsResult<StartupReport> {
        let mut report = StartupReport::default();
        for dir in dirs {
            let root = PathBuf::from(dir);
            if let Err(e) = self.store.mkdir_all(&root).await {
                tracing::warn!(path = %root.display(), error = %e, "failed to create backend directory");
            }
            self.mirror.seed_dir(&root, DEFAULT_DIR_MODE)?;
            self.walk(&root, &mut report).await;
        }
        tracing::info!(
            directories = report.directories,
            files = report.files,
            bytes = report.bytes,
            skipped = report.skipped,
            "startup replication complete"
        );
        Ok(report)
    }

    async fn walk(&self, root: &Path, report: &mut StartupReport) {
        let mut pending = VecDeque::from([root.to_path_buf()]);
        while let Some(dir) = pending.pop_front() {
            let entries = match self.store.readdir(&dir).await {
                Ok(entries) => entries,
                Err(e) => {
                    tracing::warn!(path = %dir.display(), error = %e, "skipping unreadable backend directory");
                    report.skipped += 1;
                    continue;
                }
            };

            for entry in entries {
                let path = dir.join(&entry.name);
                match self.copy_entry(&path).await {
                    Ok(Some(size)) => {
                        report.files += 1;
                        report.bytes += size;
                    }
                    Ok(None) => {
                        report.directories += 1;
                        pending.push_back(path);
                    }
                    Err(e) => {
                        tracing::warn!(path = %path.display(), error = %e, "skipping backend entry");
                        report.skipped += 1;
                    }
                }
            }
        }
    }

    /// Copy one entry. Returns the byte count for files, `None` for
    /// directories.
    async fn copy_entry(&self, path: &Path) -> VfsResult<Option<u64>> {
        let attr = self.store.getattr(path).await?;
        if attr.is_dir() {
            self.mirror.seed_dir(path, attr.perm)?;
            return Ok(None);
        }
        let data = self.store.read_all(path).await?;
        self.mirror.seed_file(path, &data, &attr)?;
        Ok(Some(data.len() as u64))
    }
}
