//! Write-through mirror driver.
//!
//! Serves every operation from a [`MemoryTree`] and, when it fronts a
//! backend, pushes one [`ReplicationTask`] per successful mutation onto the
//! [`ReplicationQueue`]. The push happens while the tree's write lock is
//! still held, so the queue sees mutations in exactly the order the mirror
//! applied them, whichever threads issued them.
//!
//! A driver built with [`MirrorDriver::persistent`] answers `NotReady` until
//! the startup walk has loaded the backend contents and called
//! [`mark_ready`](MirrorDriver::mark_ready).

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::SystemTime;

use parking_lot::RwLock;

use crate::constants::{DEFAULT_DIR_MODE, DEFAULT_FILE_MODE};
use crate::replication::{ReplicationQueue, ReplicationTask};
use crate::vfs::backends::memory::MemoryTree;
use crate::vfs::driver::Driver;
use crate::vfs::handles::{HandleTable, OpenHandle};
use crate::vfs::types::{AccessMode, DirEntry, DirHandle, FileAttr, FileHandle, OpenFlags};
use crate::vfs::{VfsError, VfsResult};

#[derive(Debug, Default)]
struct MirrorState {
    tree: MemoryTree,
    handles: HandleTable,
}

/// In-memory driver with optional ordered replication to a backend.
#[derive(Debug)]
pub struct MirrorDriver {
    state: RwLock<MirrorState>,
    replication: Option<ReplicationQueue>,
    ready: AtomicBool,
}

impl MirrorDriver {
    /// Memory-only driver. Nothing is replicated.
    pub fn scratch(capacity: Option<u64>) -> Self {
        Self {
            state: RwLock::new(MirrorState {
                tree: MemoryTree::new(capacity),
                handles: HandleTable::default(),
            }),
            replication: None,
            ready: AtomicBool::new(true),
        }
    }

    /// Driver whose mutations are replicated through `queue`.
    ///
    /// Starts not ready.
    pub fn persistent(queue: ReplicationQueue, capacity: Option<u64>) -> Self {
        Self {
            state: RwLock::new(MirrorState {
                tree: MemoryTree::new(capacity),
                handles: HandleTable::default(),
            }),
            replication: Some(queue),
            ready: AtomicBool::new(false),
        }
    }

    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }

    /// Open the driver to callers.
    pub fn mark_ready(&self) {
        self.ready.store(true, Ordering::Release);
    }

    /// Whether mutations are replicated.
    pub fn is_replicated(&self) -> bool {
        self.replication.is_some()
    }

    /// Bytes held in mirrored files.
    pub fn used_bytes(&self) -> u64 {
        self.state.read().tree.used_bytes()
    }

    /// Open file handles.
    pub fn open_files(&self) -> usize {
        self.state.read().handles.open_files()
    }

    fn check_ready(&self) -> VfsResult<()> {
        if self.is_ready() {
            Ok(())
        } else {
            Err(VfsError::NotReady)
        }
    }

    /// Must be called with the state write lock held.
    fn replicate(&self, task: impl FnOnce() -> ReplicationTask) {
        if let Some(queue) = &self.replication {
            queue.push(task());
        }
    }

    // ========================================================================
    // Startup seeding (no readiness check, no replication)
    // ========================================================================

    /// Ensure a directory exists, creating ancestors as needed.
    pub fn seed_dir(&self, path: &Path, perm: u32) -> VfsResult<()> {
        let path = MemoryTree::normalize(path);
        let mut state = self.state.write();
        state.tree.mkdir_all(&path, DEFAULT_DIR_MODE)?;
        if perm & 0o7777 != DEFAULT_DIR_MODE {
            let ino = state.tree.lookup(&path)?;
            state.tree.chmod(ino, perm)?;
        }
        Ok(())
    }

    /// Install a file's contents, keeping non-default permissions and the
    /// modification time from `attr`.
    pub fn seed_file(&self, path: &Path, data: &[u8], attr: &FileAttr) -> VfsResult<()> {
        let path = MemoryTree::normalize(path);
        let mut state = self.state.write();
        let tree = &mut state.tree;
        let ino = match tree.lookup(&path) {
            Ok(ino) if tree.is_dir(ino) => {
                return Err(VfsError::is_a_directory(path.display().to_string()));
            }
            Ok(ino) => {
                tree.set_len(ino, 0)?;
                ino
            }
            Err(VfsError::NotFound(_)) => tree.create_file(&path, DEFAULT_FILE_MODE)?,
            Err(e) => return Err(e),
        };
        tree.write(ino, 0, data)?;
        if attr.perm & 0o7777 != DEFAULT_FILE_MODE {
            tree.chmod(ino, attr.perm)?;
        }
        tree.set_times(ino, Some(attr.atime), Some(attr.mtime))
    }

    fn open_existing(
        &self,
        state: &mut MirrorState,
        path: &Path,
        ino: u64,
        flags: OpenFlags,
    ) -> VfsResult<FileHandle> {
        let attr = state.tree.attr(ino)?;
        if flags.writable() {
            if attr.is_dir() {
                return Err(VfsError::is_a_directory(path.display().to_string()));
            }
            if !AccessMode::WRITE.permitted_by(attr.perm) {
                return Err(VfsError::permission_denied(path.display().to_string()));
            }
        }

        let handle = if flags.writable() {
            let backend = self.replication.as_ref().map(|q| q.next_key());
            if let Some(key) = backend {
                self.replicate(|| ReplicationTask::Open {
                    path: path.to_path_buf(),
                    key,
                });
            }
            if flags.truncate {
                state.tree.set_len(ino, 0)?;
                self.replicate(|| ReplicationTask::Truncate {
                    path: path.to_path_buf(),
                    size: 0,
                });
            }
            OpenHandle::Writable {
                ino,
                readable: flags.read,
                backend,
            }
        } else {
            OpenHandle::ReadOnly { ino }
        };

        state.tree.retain(ino);
        Ok(state.handles.insert_file(handle))
    }
}

impl Driver for MirrorDriver {
    fn access(&self, path: &Path, mode: AccessMode) -> VfsResult<()> {
        self.check_ready()?;
        let attr = self.state.read().tree.getattr(&MemoryTree::normalize(path))?;
        if mode.permitted_by(attr.perm) {
            Ok(())
        } else {
            Err(VfsError::permission_denied(path.display().to_string()))
        }
    }

    fn getattr(&self, path: &Path) -> VfsResult<FileAttr> {
        self.check_ready()?;
        self.state.read().tree.getattr(&MemoryTree::normalize(path))
    }

    fn fgetattr(&self, _path: &Path, fh: FileHandle) -> VfsResult<FileAttr> {
        self.check_ready()?;
        let state = self.state.read();
        let handle = state.handles.file(fh)?;
        state.tree.attr(handle.ino())
    }

    fn chmod(&self, path: &Path, mode: u32) -> VfsResult<()> {
        self.check_ready()?;
        let path = MemoryTree::normalize(path);
        let mut state = self.state.write();
        let ino = state.tree.lookup(&path)?;
        state.tree.chmod(ino, mode)?;
        self.replicate(|| ReplicationTask::Chmod { path, mode });
        Ok(())
    }

    fn set_times(
        &self,
        path: &Path,
        atime: Option<SystemTime>,
        mtime: Option<SystemTime>,
    ) -> VfsResult<()> {
        self.check_ready()?;
        let path = MemoryTree::normalize(path);
        let mut state = self.state.write();
        let ino = state.tree.lookup(&path)?;
        state.tree.set_times(ino, atime, mtime)?;
        self.replicate(|| ReplicationTask::SetTimes { path, atime, mtime });
        Ok(())
    }

    fn create(&self, path: &Path, mode: u32, flags: OpenFlags) -> VfsResult<FileHandle> {
        self.check_ready()?;
        let path = MemoryTree::normalize(path);
        let mut state = self.state.write();

        match state.tree.lookup(&path) {
            Ok(ino) => {
                if flags.exclusive || state.tree.is_dir(ino) {
                    return Err(VfsError::already_exists(path.display().to_string()));
                }
                self.open_existing(&mut state, &path, ino, flags)
            }
            Err(VfsError::NotFound(_)) => {
                let ino = state.tree.create_file(&path, mode & 0o7777)?;
                let backend = match &self.replication {
                    Some(queue) if flags.writable() => Some(queue.next_key()),
                    _ => None,
                };
                self.replicate(|| ReplicationTask::Create {
                    path: path.clone(),
                    mode: mode & 0o7777,
                    key: backend,
                });
                let handle = if flags.writable() {
                    OpenHandle::Writable {
                        ino,
                        readable: flags.read,
                        backend,
                    }
                } else {
                    OpenHandle::ReadOnly { ino }
                };
                state.tree.retain(ino);
                Ok(state.handles.insert_file(handle))
            }
            Err(e) => Err(e),
        }
    }

    fn open(&self, path: &Path, flags: OpenFlags) -> VfsResult<FileHandle> {
        self.check_ready()?;
        let path = MemoryTree::normalize(path);
        let mut state = self.state.write();
        let ino = state.tree.lookup(&path)?;
        self.open_existing(&mut state, &path, ino, flags)
    }

    fn read(&self, _path: &Path, fh: FileHandle, offset: u64, size: usize) -> VfsResult<Vec<u8>> {
        self.check_ready()?;
        let state = self.state.read();
        let handle = state.handles.file(fh)?;
        if !handle.readable() {
            return Err(VfsError::BadHandle(fh.0));
        }
        state.tree.read(handle.ino(), offset, size)
    }

    fn write(&self, path: &Path, fh: FileHandle, offset: u64, data: &[u8]) -> VfsResult<usize> {
        self.check_ready()?;
        let path = MemoryTree::normalize(path);
        let mut state = self.state.write();
        let OpenHandle::Writable { ino, backend, .. } = state.handles.file(fh)? else {
            return Err(VfsError::BadHandle(fh.0));
        };
        let written = state.tree.write(ino, offset, data)?;
        if let Some(key) = backend {
            if written > 0 {
                self.replicate(|| ReplicationTask::Write {
                    key,
                    path,
                    offset,
                    data: data.to_vec(),
                });
            }
        }
        Ok(written)
    }

    fn truncate(&self, path: &Path, size: u64) -> VfsResult<()> {
        self.check_ready()?;
        let path = MemoryTree::normalize(path);
        let mut state = self.state.write();
        let ino = state.tree.lookup(&path)?;
        let attr = state.tree.attr(ino)?;
        if attr.is_dir() {
            return Err(VfsError::is_a_directory(path.display().to_string()));
        }
        if !AccessMode::WRITE.permitted_by(attr.perm) {
            return Err(VfsError::permission_denied(path.display().to_string()));
        }
        state.tree.set_len(ino, size)?;
        self.replicate(|| ReplicationTask::Truncate { path, size });
        Ok(())
    }

    fn ftruncate(&self, path: &Path, fh: FileHandle, size: u64) -> VfsResult<()> {
        self.check_ready()?;
        let path = MemoryTree::normalize(path);
        let mut state = self.state.write();
        let OpenHandle::Writable { ino, backend, .. } = state.handles.file(fh)? else {
            return Err(VfsError::BadHandle(fh.0));
        };
        state.tree.set_len(ino, size)?;
        if let Some(key) = backend {
            self.replicate(|| ReplicationTask::TruncateHandle { key, path, size });
        }
        Ok(())
    }

    fn fsync(&self, path: &Path, fh: FileHandle) -> VfsResult<()> {
        self.check_ready()?;
        let state = self.state.write();
        if let Some(key) = state.handles.file(fh)?.backend() {
            self.replicate(|| ReplicationTask::Sync {
                key,
                path: MemoryTree::normalize(path),
            });
        }
        Ok(())
    }

    fn release(&self, path: &Path, fh: FileHandle) -> VfsResult<()> {
        let mut state = self.state.write();
        let handle = state.handles.remove_file(fh)?;
        state.tree.release(handle.ino());
        if let Some(key) = handle.backend() {
            self.replicate(|| ReplicationTask::Close {
                key,
                path: MemoryTree::normalize(path),
            });
        }
        Ok(())
    }

    fn mkdir(&self, path: &Path, mode: u32) -> VfsResult<()> {
        self.check_ready()?;
        let path = MemoryTree::normalize(path);
        let mut state = self.state.write();
        state.tree.mkdir(&path, mode & 0o7777)?;
        self.replicate(|| ReplicationTask::Mkdir { path, mode });
        Ok(())
    }

    fn rmdir(&self, path: &Path) -> VfsResult<()> {
        self.check_ready()?;
        let path = MemoryTree::normalize(path);
        let mut state = self.state.write();
        state.tree.rmdir(&path)?;
        self.replicate(|| ReplicationTask::Rmdir { path });
        Ok(())
    }

    fn unlink(&self, path: &Path) -> VfsResult<()> {
        self.check_ready()?;
        let path = MemoryTree::normalize(path);
        let mut state = self.state.write();
        state.tree.unlink(&path)?;
        self.replicate(|| ReplicationTask::Unlink { path });
        Ok(())
    }

    fn rename(&self, from: &Path, to: &Path) -> VfsResult<()> {
        self.check_ready()?;
        let from = MemoryTree::normalize(from);
        let to = MemoryTree::normalize(to);
        let mut state = self.state.write();
        state.tree.rename(&from, &to)?;
        if from != to {
            self.replicate(|| ReplicationTask::Rename { from, to });
        }
        Ok(())
    }

    fn opendir(&self, path: &Path) -> VfsResult<DirHandle> {
        self.check_ready()?;
        let mut state = self.state.write();
        let entries = state.tree.children(&MemoryTree::normalize(path))?;
        Ok(state.handles.insert_dir(entries))
    }

    fn readdir(&self, _path: &Path, dh: DirHandle) -> VfsResult<Vec<DirEntry>> {
        self.check_ready()?;
        Ok(self.state.read().handles.dir(dh)?.to_vec())
    }

    fn releasedir(&self, _path: &Path, dh: DirHandle) -> VfsResult<()> {
        self.state.write().handles.remove_dir(dh)
    }

    fn read_only(&self) -> bool {
        false
    }
}
