//! In-process store.
//!
//! Keeps its data in a [`MemoryTree`] and records every successful
//! operation in a journal, so tests can assert exactly what reached the
//! durable tier and in which order. Latency and per-path failures can be
//! injected to stand in for a slow or broken backend.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use parking_lot::Mutex;

use super::{StoreFile, StoreOps};
use crate::vfs::{DirEntry, FileAttr, MemoryTree, VfsError, VfsResult};

/// One recorded store operation.
#[derive(Debug, Clone, PartialEq, Eq, strum::IntoStaticStr)]
#[strum(serialize_all = "snake_case")]
pub enum StoreOp {
    Create,
    Open,
    Write { offset: u64, len: usize },
    SetLen { size: u64 },
    Sync,
    Close,
    Truncate { size: u64 },
    Mkdir,
    Rmdir,
    Unlink,
    Rename { to: PathBuf },
    SetTimes,
    Chmod { mode: u32 },
}

/// Journal record: which operation touched which path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JournalEntry {
    pub path: PathBuf,
    pub op: StoreOp,
}

impl JournalEntry {
    pub fn name(&self) -> &'static str {
        (&self.op).into()
    }
}

#[derive(Debug)]
struct OpenFile {
    ino: u64,
    path: PathBuf,
}

#[derive(Debug, Default)]
struct Inner {
    tree: MemoryTree,
    files: HashMap<u64, OpenFile>,
    next_file: u64,
    journal: Vec<JournalEntry>,
    failing: Vec<PathBuf>,
}

impl Inner {
    fn check(&self, path: &Path) -> VfsResult<()> {
        if self.failing.iter().any(|prefix| path.starts_with(prefix)) {
            return Err(VfsError::Io(io::Error::other(format!(
                "injected failure: {}",
                path.display()
            ))));
        }
        Ok(())
    }

    fn record(&mut self, path: &Path, op: StoreOp) {
        self.journal.push(JournalEntry {
            path: path.to_path_buf(),
            op,
        });
    }

    fn file(&self, file: StoreFile) -> VfsResult<(u64, PathBuf)> {
        let open = self.files.get(&file.0).ok_or(VfsError::BadHandle(file.0))?;
        self.check(&open.path)?;
        Ok((open.ino, open.path.clone()))
    }
}

/// Journaling in-memory store.
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
    latency: Option<Duration>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every operation sleeps for `latency` before running.
    pub fn with_latency(latency: Duration) -> Self {
        Self {
            latency: Some(latency),
            ..Self::default()
        }
    }

    /// Make every operation on `prefix` (or below it) fail.
    pub fn fail_path(&self, prefix: impl AsRef<Path>) {
        self.inner
            .lock()
            .failing
            .push(MemoryTree::normalize(prefix.as_ref()));
    }

    /// Stop injecting failures.
    pub fn clear_failures(&self) {
        self.inner.lock().failing.clear();
    }

    /// Every successful operation so far, oldest first.
    pub fn journal(&self) -> Vec<JournalEntry> {
        self.inner.lock().journal.clone()
    }

    /// Operation names recorded for one path.
    pub fn journal_for(&self, path: impl AsRef<Path>) -> Vec<&'static str> {
        let path = MemoryTree::normalize(path.as_ref());
        self.inner
            .lock()
            .journal
            .iter()
            .filter(|entry| entry.path == path)
            .map(JournalEntry::name)
            .collect()
    }

    /// Create a directory and its ancestors without journaling.
    pub fn seed_dir(&self, path: impl AsRef<Path>) -> VfsResult<()> {
        let path = MemoryTree::normalize(path.as_ref());
        self.inner.lock().tree.mkdir_all(&path, 0o755)
    }

    /// Create or replace a file, and any missing parents, without
    /// journaling.
    pub fn seed_file(&self, path: impl AsRef<Path>, data: &[u8], perm: u32) -> VfsResult<()> {
        let path = MemoryTree::normalize(path.as_ref());
        let mut inner = self.inner.lock();
        if let Some(parent) = path.parent() {
            inner.tree.mkdir_all(parent, 0o755)?;
        }
        let ino = match inner.tree.lookup(&path) {
            Ok(ino) => {
                inner.tree.set_len(ino, 0)?;
                ino
            }
            Err(_) => inner.tree.create_file(&path, perm)?,
        };
        inner.tree.write(ino, 0, data)?;
        inner.tree.chmod(ino, perm)
    }

    /// Full contents of every entry, `None` for directories. Root excluded.
    pub fn snapshot(&self) -> BTreeMap<PathBuf, Option<Vec<u8>>> {
        let inner = self.inner.lock();
        let mut result = BTreeMap::new();
        let mut pending = VecDeque::from([PathBuf::new()]);
        while let Some(dir) = pending.pop_front() {
            let Ok(children) = inner.tree.children(&dir) else {
                continue;
            };
            for entry in children {
                let path = dir.join(&entry.name);
                if entry.kind.is_dir() {
                    result.insert(path.clone(), None);
                    pending.push_back(path);
                } else {
                    let data = inner
                        .tree
                        .getattr(&path)
                        .and_then(|attr| {
                            let ino = inner.tree.lookup(&path)?;
                            inner.tree.read(ino, 0, attr.size as usize)
                        })
                        .unwrap_or_default();
                    result.insert(path, Some(data));
                }
            }
        }
        result
    }

    async fn delay(&self) {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
    }
}

#[async_trait]
impl StoreOps for MemoryStore {
    async fn open(&self, path: &Path, create: Option<u32>) -> VfsResult<StoreFile> {
        self.delay().await;
        let path = MemoryTree::normalize(path);
        let mut inner = self.inner.lock();
        inner.check(&path)?;

        let (ino, op) = match (inner.tree.lookup(&path), create) {
            (Ok(ino), _) if inner.tree.is_dir(ino) => {
                return Err(VfsError::is_a_directory(path.display().to_string()));
            }
            (Ok(ino), _) => (ino, StoreOp::Open),
            (Err(VfsError::NotFound(_)), Some(mode)) => {
                (inner.tree.create_file(&path, mode & 0o7777)?, StoreOp::Create)
            }
            (Err(e), _) => return Err(e),
        };

        inner.tree.retain(ino);
        inner.next_file += 1;
        let id = inner.next_file;
        inner.files.insert(
            id,
            OpenFile {
                ino,
                path: path.clone(),
            },
        );
        inner.record(&path, op);
        Ok(StoreFile(id))
    }

    async fn write_at(&self, file: StoreFile, offset: u64, data: &[u8]) -> VfsResult<()> {
        self.delay().await;
        let mut inner = self.inner.lock();
        let (ino, path) = inner.file(file)?;
        inner.tree.write(ino, offset, data)?;
        inner.record(
            &path,
            StoreOp::Write {
                offset,
                len: data.len(),
            },
        );
        Ok(())
    }

    async fn set_len(&self, file: StoreFile, size: u64) -> VfsResult<()> {
        self.delay().await;
        let mut inner = self.inner.lock();
        let (ino, path) = inner.file(file)?;
        inner.tree.set_len(ino, size)?;
        inner.record(&path, StoreOp::SetLen { size });
        Ok(())
    }

    async fn sync(&self, file: StoreFile) -> VfsResult<()> {
        self.delay().await;
        let mut inner = self.inner.lock();
        let (_, path) = inner.file(file)?;
        inner.record(&path, StoreOp::Sync);
        Ok(())
    }

    async fn close(&self, file: StoreFile) -> VfsResult<()> {
        self.delay().await;
        let mut inner = self.inner.lock();
        let open = inner.files.remove(&file.0).ok_or(VfsError::BadHandle(file.0))?;
        inner.tree.release(open.ino);
        inner.record(&open.path, StoreOp::Close);
        Ok(())
    }

    async fn truncate(&self, path: &Path, size: u64) -> VfsResult<()> {
        self.delay().await;
        let path = MemoryTree::normalize(path);
        let mut inner = self.inner.lock();
        inner.check(&path)?;
        let ino = inner.tree.lookup(&path)?;
        if inner.tree.is_dir(ino) {
            return Err(VfsError::is_a_directory(path.display().to_string()));
        }
        inner.tree.set_len(ino, size)?;
        inner.record(&path, StoreOp::Truncate { size });
        Ok(())
    }

    async fn mkdir(&self, path: &Path, mode: u32) -> VfsResult<()> {
        self.delay().await;
        let path = MemoryTree::normalize(path);
        let mut inner = self.inner.lock();
        inner.check(&path)?;
        inner.tree.mkdir(&path, mode & 0o7777)?;
        inner.record(&path, StoreOp::Mkdir);
        Ok(())
    }

    async fn rmdir(&self, path: &Path) -> VfsResult<()> {
        self.delay().await;
        let path = MemoryTree::normalize(path);
        let mut inner = self.inner.lock();
        inner.check(&path)?;
        inner.tree.rmdir(&path)?;
        inner.record(&path, StoreOp::Rmdir);
        Ok(())
    }

    async fn unlink(&self, path: &Path) -> VfsResult<()> {
        self.delay().await;
        let path = MemoryTree::normalize(path);
        let mut inner = self.inner.lock();
        inner.check(&path)?;
        inner.tree.unlink(&path)?;
        inner.record(&path, StoreOp::Unlink);
        Ok(())
    }

    async fn rename(&self, from: &Path, to: &Path) -> VfsResult<()> {
        self.delay().await;
        let from = MemoryTree::normalize(from);
        let to = MemoryTree::normalize(to);
        let mut inner = self.inner.lock();
        inner.check(&from)?;
        inner.check(&to)?;
        inner.tree.rename(&from, &to)?;
        // Open files follow the rename so later ops journal under the new name.
        for open in inner.files.values_mut() {
            if let Ok(rest) = open.path.strip_prefix(&from) {
                open.path = if rest.as_os_str().is_empty() {
                    to.clone()
                } else {
                    to.join(rest)
                };
            }
        }
        inner.record(&from, StoreOp::Rename { to });
        Ok(())
    }

    async fn set_times(
        &self,
        path: &Path,
        atime: Option<SystemTime>,
        mtime: Option<SystemTime>,
    ) -> VfsResult<()> {
        self.delay().await;
        let path = MemoryTree::normalize(path);
        let mut inner = self.inner.lock();
        inner.check(&path)?;
        let ino = inner.tree.lookup(&path)?;
        inner.tree.set_times(ino, atime, mtime)?;
        inner.record(&path, StoreOp::SetTimes);
        Ok(())
    }

    async fn chmod(&self, path: &Path, mode: u32) -> VfsResult<()> {
        self.delay().await;
        let path = MemoryTree::normalize(path);
        let mut inner = self.inner.lock();
        inner.check(&path)?;
        let ino = inner.tree.lookup(&path)?;
        inner.tree.chmod(ino, mode)?;
        inner.record(&path, StoreOp::Chmod { mode });
        Ok(())
    }

    async fn getattr(&self, path: &Path) -> VfsResult<FileAttr> {
        self.delay().await;
        let path = MemoryTree::normalize(path);
        let inner = self.inner.lock();
        inner.check(&path)?;
        inner.tree.getattr(&path)
    }

    async fn readdir(&self, path: &Path) -> VfsResult<Vec<DirEntry>> {
        self.delay().await;
        let path = MemoryTree::normalize(path);
        let inner = self.inner.lock();
        inner.check(&path)?;
        inner.tree.children(&path)
    }

    async fn read_all(&self, path: &Path) -> VfsResult<Vec<u8>> {
        self.delay().await;
        let path = MemoryTree::normalize(path);
        let inner = self.inner.lock();
        inner.check(&path)?;
        let ino = inner.tree.lookup(&path)?;
        let size = inner.tree.attr(ino)?.size;
        inner.tree.read(ino, 0, size as usize)
    }
}
