//! Backend stores.
//!
//! A store is the slow, durable tier behind a replicated mirror. It is only
//! ever driven by the backend worker, one operation at a time, so
//! implementations are free to be slow. They must not be called from a
//! caller thread.
//!
//! Paths are relative to the store root.

mod local;
mod memory;

use std::path::{Component, Path, PathBuf};
use std::time::SystemTime;

use async_trait::async_trait;

use crate::vfs::{DirEntry, FileAttr, VfsError, VfsResult};

pub use local::LocalStore;
pub use memory::{JournalEntry, MemoryStore, StoreOp};

/// A file opened on a store, valid until [`StoreOps::close`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StoreFile(pub u64);

/// Asynchronous operations on the durable tier.
#[async_trait]
pub trait StoreOps: Send + Sync {
    /// Open a file for writing. With `create`, a missing file is created
    /// with that mode; an existing file is opened as is.
    async fn open(&self, path: &Path, create: Option<u32>) -> VfsResult<StoreFile>;

    async fn write_at(&self, file: StoreFile, offset: u64, data: &[u8]) -> VfsResult<()>;

    async fn set_len(&self, file: StoreFile, size: u64) -> VfsResult<()>;

    async fn sync(&self, file: StoreFile) -> VfsResult<()>;

    async fn close(&self, file: StoreFile) -> VfsResult<()>;

    async fn truncate(&self, path: &Path, size: u64) -> VfsResult<()>;

    async fn mkdir(&self, path: &Path, mode: u32) -> VfsResult<()>;

    /// Create `path` and any missing ancestors.
    async fn mkdir_all(&self, path: &Path) -> VfsResult<()> {
        let mut current = PathBuf::new();
        for component in path.components() {
            if let Component::Normal(name) = component {
                current.push(name);
                match self.mkdir(&current, 0o755).await {
                    Ok(()) | Err(VfsError::AlreadyExists(_)) => {}
                    Err(e) => return Err(e),
                }
            }
        }
        Ok(())
    }

    async fn rmdir(&self, path: &Path) -> VfsResult<()>;

    async fn unlink(&self, path: &Path) -> VfsResult<()>;

    async fn rename(&self, from: &Path, to: &Path) -> VfsResult<()>;

    async fn set_times(
        &self,
        path: &Path,
        atime: Option<SystemTime>,
        mtime: Option<SystemTime>,
    ) -> VfsResult<()>;

    async fn chmod(&self, path: &Path, mode: u32) -> VfsResult<()>;

    async fn getattr(&self, path: &Path) -> VfsResult<FileAttr>;

    /// Entries of a directory, sorted by name.
    async fn readdir(&self, path: &Path) -> VfsResult<Vec<DirEntry>>;

    async fn read_all(&self, path: &Path) -> VfsResult<Vec<u8>>;
}
