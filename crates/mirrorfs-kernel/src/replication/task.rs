//! Replication tasks.
//!
//! One variant per mirrored mutation. Paths are relative to the backend
//! store root, which is the persistent mount point on the mirror side.

use std::path::{Path, PathBuf};
use std::time::SystemTime;

use tokio::sync::oneshot;

/// Names a backend-side open file across tasks.
///
/// Issued by the mirror when a writable handle is opened. Only the worker
/// resolves it to a real backend file, once the matching `Create`/`Open`
/// task has run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BackendKey(pub u64);

/// A queued mutation awaiting application to the backend.
#[derive(Debug, strum::IntoStaticStr)]
#[strum(serialize_all = "snake_case")]
pub enum ReplicationTask {
    /// Create the file (if missing). With a key, keep it open for later writes.
    Create {
        path: PathBuf,
        mode: u32,
        key: Option<BackendKey>,
    },
    /// Open an existing file for writing.
    Open { path: PathBuf, key: BackendKey },
    Write {
        key: BackendKey,
        path: PathBuf,
        offset: u64,
        data: Vec<u8>,
    },
    Truncate { path: PathBuf, size: u64 },
    TruncateHandle {
        key: BackendKey,
        path: PathBuf,
        size: u64,
    },
    Sync { key: BackendKey, path: PathBuf },
    Close { key: BackendKey, path: PathBuf },
    Mkdir { path: PathBuf, mode: u32 },
    Rmdir { path: PathBuf },
    Rename { from: PathBuf, to: PathBuf },
    Unlink { path: PathBuf },
    SetTimes {
        path: PathBuf,
        atime: Option<SystemTime>,
        mtime: Option<SystemTime>,
    },
    Chmod { path: PathBuf, mode: u32 },
    /// Resolves once every earlier task has been attempted.
    Barrier { done: oneshot::Sender<()> },
}

impl ReplicationTask {
    /// Short snake_case name, for logs.
    pub fn name(&self) -> &'static str {
        self.into()
    }

    /// The backend path this task touches (the source path for renames).
    pub fn path(&self) -> Option<&Path> {
        match self {
            ReplicationTask::Create { path, .. }
            | ReplicationTask::Open { path, .. }
            | ReplicationTask::Write { path, .. }
            | ReplicationTask::Truncate { path, .. }
            | ReplicationTask::TruncateHandle { path, .. }
            | ReplicationTask::Sync { path, .. }
            | ReplicationTask::Close { path, .. }
            | ReplicationTask::Mkdir { path, .. }
            | ReplicationTask::Rmdir { path }
            | ReplicationTask::Unlink { path }
            | ReplicationTask::SetTimes { path, .. }
            | ReplicationTask::Chmod { path, .. } => Some(path),
            ReplicationTask::Rename { from, .. } => Some(from),
            ReplicationTask::Barrier { .. } => None,
        }
    }
}
