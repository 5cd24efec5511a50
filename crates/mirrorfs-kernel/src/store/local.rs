//! Local filesystem store.
//!
//! The durable tier as a directory on the host filesystem, driven through
//! `tokio::fs`.

use std::collections::HashMap;
use std::io::SeekFrom;
use std::os::unix::fs::{MetadataExt, PermissionsExt};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::SystemTime;

use async_trait::async_trait;
use tokio::fs;
use tokio::io::{AsyncSeekExt, AsyncWriteExt};
use tokio::sync::Mutex;

use super::{StoreFile, StoreOps};
use crate::vfs::{DirEntry, FileAttr, FileType, MemoryTree, VfsError, VfsResult};

/// Store rooted at a host directory.
///
/// All operations are relative to `root`. If `root` is `/var/lib/app`,
/// then `mkdir("cache")` creates `/var/lib/app/cache`. Paths are
/// normalized first, so `..` cannot climb above the root.
#[derive(Debug)]
pub struct LocalStore {
    root: PathBuf,
    files: Mutex<HashMap<u64, fs::File>>,
    next_file: AtomicU64,
}

impl LocalStore {
    /// Create a store rooted at the given directory.
    ///
    /// The root is canonicalized at construction time to handle symlinks
    /// (e.g. macOS `/tmp` → `/private/tmp`).
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root: PathBuf = root.into();
        let root = root.canonicalize().unwrap_or(root);
        Self {
            root,
            files: Mutex::new(HashMap::new()),
            next_file: AtomicU64::new(1),
        }
    }

    /// Get the root path.
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, path: &Path) -> PathBuf {
        self.root.join(MemoryTree::normalize(path))
    }

    /// Convert std::fs::Metadata to FileAttr.
    fn metadata_to_attr(meta: &std::fs::Metadata) -> FileAttr {
        let kind = if meta.is_dir() {
            FileType::Directory
        } else {
            FileType::File
        };

        FileAttr {
            ino: meta.ino(),
            size: meta.len(),
            kind,
            perm: meta.permissions().mode() & 0o7777,
            mtime: meta.modified().unwrap_or(SystemTime::UNIX_EPOCH),
            atime: meta.accessed().unwrap_or(SystemTime::UNIX_EPOCH),
            ctime: SystemTime::UNIX_EPOCH
                + std::time::Duration::from_secs(meta.ctime().max(0) as u64),
            nlink: meta.nlink() as u32,
        }
    }
}

#[async_trait]
impl StoreOps for LocalStore {
    async fn open(&self, path: &Path, create: Option<u32>) -> VfsResult<StoreFile> {
        let full_path = self.resolve(path);
        let mut options = fs::OpenOptions::new();
        options.write(true);
        if let Some(mode) = create {
            options.create(true).mode(mode);
        }
        let handle = options
            .open(&full_path)
            .await
            .map_err(|e| VfsError::from_io(path, e))?;

        let id = self.next_file.fetch_add(1, Ordering::Relaxed);
        self.files.lock().await.insert(id, handle);
        Ok(StoreFile(id))
    }

    async fn write_at(&self, file: StoreFile, offset: u64, data: &[u8]) -> VfsResult<()> {
        let mut files = self.files.lock().await;
        let handle = files.get_mut(&file.0).ok_or(VfsError::BadHandle(file.0))?;
        handle.seek(SeekFrom::Start(offset)).await?;
        handle.write_all(data).await?;
        Ok(())
    }

    async fn set_len(&self, file: StoreFile, size: u64) -> VfsResult<()> {
        let files = self.files.lock().await;
        let handle = files.get(&file.0).ok_or(VfsError::BadHandle(file.0))?;
        handle.set_len(size).await?;
        Ok(())
    }

    async fn sync(&self, file: StoreFile) -> VfsResult<()> {
        let mut files = self.files.lock().await;
        let handle = files.get_mut(&file.0).ok_or(VfsError::BadHandle(file.0))?;
        handle.flush().await?;
        handle.sync_all().await?;
        Ok(())
    }

    async fn close(&self, file: StoreFile) -> VfsResult<()> {
        let mut handle = self
            .files
            .lock()
            .await
            .remove(&file.0)
            .ok_or(VfsError::BadHandle(file.0))?;
        handle.flush().await.map_err(VfsError::from)
    }

    async fn truncate(&self, path: &Path, size: u64) -> VfsResult<()> {
        let file = fs::OpenOptions::new()
            .write(true)
            .open(self.resolve(path))
            .await
            .map_err(|e| VfsError::from_io(path, e))?;
        file.set_len(size).await.map_err(VfsError::from)
    }

    async fn mkdir(&self, path: &Path, mode: u32) -> VfsResult<()> {
        let full_path = self.resolve(path);
        fs::DirBuilder::new()
            .mode(mode)
            .create(&full_path)
            .await
            .map_err(|e| VfsError::from_io(path, e))
    }

    async fn mkdir_all(&self, path: &Path) -> VfsResult<()> {
        fs::create_dir_all(self.resolve(path))
            .await
            .map_err(|e| VfsError::from_io(path, e))
    }

    async fn rmdir(&self, path: &Path) -> VfsResult<()> {
        fs::remove_dir(self.resolve(path))
            .await
            .map_err(|e| VfsError::from_io(path, e))
    }

    async fn unlink(&self, path: &Path) -> VfsResult<()> {
        fs::remove_file(self.resolve(path))
            .await
            .map_err(|e| VfsError::from_io(path, e))
    }

    async fn rename(&self, from: &Path, to: &Path) -> VfsResult<()> {
        fs::rename(self.resolve(from), self.resolve(to))
            .await
            .map_err(|e| VfsError::from_io(from, e))
    }

    async fn set_times(
        &self,
        path: &Path,
        atime: Option<SystemTime>,
        mtime: Option<SystemTime>,
    ) -> VfsResult<()> {
        let full_path = self.resolve(path);
        let result = tokio::task::spawn_blocking(move || {
            // Write-only files can't be opened for reading; directories
            // can't be opened for writing.
            let file = std::fs::OpenOptions::new()
                .write(true)
                .open(&full_path)
                .or_else(|_| std::fs::File::open(&full_path))?;
            let mut times = std::fs::FileTimes::new();
            if let Some(atime) = atime {
                times = times.set_accessed(atime);
            }
            if let Some(mtime) = mtime {
                times = times.set_modified(mtime);
            }
            file.set_times(times)
        })
        .await
        .map_err(|e| VfsError::other(format!("set_times task failed: {e}")))?;
        result.map_err(|e| VfsError::from_io(path, e))
    }

    async fn chmod(&self, path: &Path, mode: u32) -> VfsResult<()> {
        let permissions = std::fs::Permissions::from_mode(mode & 0o7777);
        fs::set_permissions(self.resolve(path), permissions)
            .await
            .map_err(|e| VfsError::from_io(path, e))
    }

    async fn getattr(&self, path: &Path) -> VfsResult<FileAttr> {
        let meta = fs::metadata(self.resolve(path))
            .await
            .map_err(|e| VfsError::from_io(path, e))?;
        Ok(Self::metadata_to_attr(&meta))
    }

    async fn readdir(&self, path: &Path) -> VfsResult<Vec<DirEntry>> {
        let mut entries = Vec::new();
        let mut dir = fs::read_dir(self.resolve(path))
            .await
            .map_err(|e| VfsError::from_io(path, e))?;

        while let Some(entry) = dir.next_entry().await.map_err(VfsError::from)? {
            let file_type = entry.file_type().await.map_err(VfsError::from)?;
            let kind = if file_type.is_dir() {
                FileType::Directory
            } else {
                FileType::File
            };

            entries.push(DirEntry {
                name: entry.file_name().to_string_lossy().into_owned(),
                kind,
            });
        }

        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(entries)
    }

    async fn read_all(&self, path: &Path) -> VfsResult<Vec<u8>> {
        fs::read(self.resolve(path))
            .await
            .map_err(|e| VfsError::from_io(path, e))
    }
}
