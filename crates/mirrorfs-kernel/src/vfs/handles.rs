//! Per-driver handle table.

use std::collections::HashMap;

use crate::replication::BackendKey;

use super::types::{DirEntry, DirHandle, FileHandle};
use super::{VfsError, VfsResult};

/// What a mirror file handle refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenHandle {
    ReadOnly { ino: u64 },
    /// `backend` is `None` when the driver has no backend tier.
    Writable {
        ino: u64,
        readable: bool,
        backend: Option<BackendKey>,
    },
}

impl OpenHandle {
    pub fn ino(&self) -> u64 {
        match *self {
            OpenHandle::ReadOnly { ino } | OpenHandle::Writable { ino, .. } => ino,
        }
    }

    pub fn readable(&self) -> bool {
        match *self {
            OpenHandle::ReadOnly { .. } => true,
            OpenHandle::Writable { readable, .. } => readable,
        }
    }

    pub fn backend(&self) -> Option<BackendKey> {
        match *self {
            OpenHandle::ReadOnly { .. } => None,
            OpenHandle::Writable { backend, .. } => backend,
        }
    }
}

/// File handles and directory snapshots, numbered from 1.
#[derive(Debug)]
pub struct HandleTable {
    next: u64,
    files: HashMap<u64, OpenHandle>,
    dirs: HashMap<u64, Vec<DirEntry>>,
}

impl Default for HandleTable {
    fn default() -> Self {
        Self {
            next: 1,
            files: HashMap::new(),
            dirs: HashMap::new(),
        }
    }
}

impl HandleTable {
    fn allocate(&mut self) -> u64 {
        let id = self.next;
        self.next += 1;
        id
    }

    pub fn insert_file(&mut self, handle: OpenHandle) -> FileHandle {
        let id = self.allocate();
        self.files.insert(id, handle);
        FileHandle(id)
    }

    pub fn file(&self, fh: FileHandle) -> VfsResult<OpenHandle> {
        self.files.get(&fh.0).copied().ok_or(VfsError::BadHandle(fh.0))
    }

    pub fn remove_file(&mut self, fh: FileHandle) -> VfsResult<OpenHandle> {
        self.files.remove(&fh.0).ok_or(VfsError::BadHandle(fh.0))
    }

    pub fn insert_dir(&mut self, entries: Vec<DirEntry>) -> DirHandle {
        let id = self.allocate();
        self.dirs.insert(id, entries);
        DirHandle(id)
    }

    pub fn dir(&self, dh: DirHandle) -> VfsResult<&[DirEntry]> {
        self.dirs
            .get(&dh.0)
            .map(Vec::as_slice)
            .ok_or(VfsError::BadHandle(dh.0))
    }

    pub fn remove_dir(&mut self, dh: DirHandle) -> VfsResult<()> {
        self.dirs
            .remove(&dh.0)
            .map(|_| ())
            .ok_or(VfsError::BadHandle(dh.0))
    }

    /// Open file handles.
    pub fn open_files(&self) -> usize {
        self.files.len()
    }
}
