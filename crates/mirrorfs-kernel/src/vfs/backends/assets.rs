//! Read-only driver over assets compiled into the binary.
//!
//! The tree is a static table of [`AssetEntry`] values, usually built from
//! `include_bytes!`. Directories report mode 0o555 and files 0o444. Every
//! mutating call fails with [`VfsError::ReadOnly`], whether or not the
//! target exists.

use std::collections::HashMap;
use std::path::{Component, Path};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::SystemTime;

use parking_lot::Mutex;

use crate::constants::{ASSET_DIR_MODE, ASSET_FILE_MODE};
use crate::vfs::driver::Driver;
use crate::vfs::types::{
    AccessMode, DirEntry, DirHandle, FileAttr, FileHandle, FileType, OpenFlags,
};
use crate::vfs::{VfsError, VfsResult};

/// Contents of one asset node.
#[derive(Debug, Clone, Copy)]
pub enum AssetNode {
    File(&'static [u8]),
    Dir(&'static [AssetEntry]),
}

/// A named node in the asset table.
#[derive(Debug, Clone, Copy)]
pub struct AssetEntry {
    pub name: &'static str,
    pub node: AssetNode,
}

impl AssetEntry {
    pub const fn file(name: &'static str, bytes: &'static [u8]) -> Self {
        Self {
            name,
            node: AssetNode::File(bytes),
        }
    }

    pub const fn dir(name: &'static str, children: &'static [AssetEntry]) -> Self {
        Self {
            name,
            node: AssetNode::Dir(children),
        }
    }
}

impl AssetNode {
    fn kind(&self) -> FileType {
        match self {
            AssetNode::File(_) => FileType::File,
            AssetNode::Dir(_) => FileType::Directory,
        }
    }
}

/// Driver serving a static asset table.
#[derive(Debug)]
pub struct AssetDriver {
    root: &'static [AssetEntry],
    files: Mutex<HashMap<u64, AssetNode>>,
    dirs: Mutex<HashMap<u64, Vec<DirEntry>>>,
    next_handle: AtomicU64,
}

impl AssetDriver {
    pub fn new(root: &'static [AssetEntry]) -> Self {
        Self {
            root,
            files: Mutex::new(HashMap::new()),
            dirs: Mutex::new(HashMap::new()),
            next_handle: AtomicU64::new(1),
        }
    }

    fn lookup(&self, path: &Path) -> VfsResult<AssetNode> {
        let mut node = AssetNode::Dir(self.root);
        for component in path.components() {
            let name = match component {
                Component::Normal(name) => name,
                Component::RootDir | Component::CurDir => continue,
                _ => return Err(VfsError::invalid_path(path.display().to_string())),
            };
            let AssetNode::Dir(children) = node else {
                return Err(VfsError::not_a_directory(path.display().to_string()));
            };
            node = children
                .iter()
                .find(|entry| name == entry.name)
                .map(|entry| entry.node)
                .ok_or_else(|| VfsError::not_found(path.display().to_string()))?;
        }
        Ok(node)
    }

    fn attr(node: AssetNode) -> FileAttr {
        let mut attr = match node {
            AssetNode::File(bytes) => FileAttr::file(bytes.len() as u64, ASSET_FILE_MODE),
            AssetNode::Dir(_) => FileAttr::directory(ASSET_DIR_MODE),
        };
        attr.mtime = SystemTime::UNIX_EPOCH;
        attr.atime = SystemTime::UNIX_EPOCH;
        attr.ctime = SystemTime::UNIX_EPOCH;
        attr
    }

    fn next_id(&self) -> u64 {
        self.next_handle.fetch_add(1, Ordering::Relaxed)
    }
}

impl Driver for AssetDriver {
    fn access(&self, path: &Path, mode: AccessMode) -> VfsResult<()> {
        let attr = Self::attr(self.lookup(path)?);
        if mode.write {
            return Err(VfsError::ReadOnly);
        }
        if mode.permitted_by(attr.perm) {
            Ok(())
        } else {
            Err(VfsError::permission_denied(path.display().to_string()))
        }
    }

    fn getattr(&self, path: &Path) -> VfsResult<FileAttr> {
        self.lookup(path).map(Self::attr)
    }

    fn fgetattr(&self, _path: &Path, fh: FileHandle) -> VfsResult<FileAttr> {
        let node = *self.files.lock().get(&fh.0).ok_or(VfsError::BadHandle(fh.0))?;
        Ok(Self::attr(node))
    }

    fn chmod(&self, _path: &Path, _mode: u32) -> VfsResult<()> {
        Err(VfsError::ReadOnly)
    }

    fn set_times(
        &self,
        _path: &Path,
        _atime: Option<SystemTime>,
        _mtime: Option<SystemTime>,
    ) -> VfsResult<()> {
        Err(VfsError::ReadOnly)
    }

    fn create(&self, _path: &Path, _mode: u32, _flags: OpenFlags) -> VfsResult<FileHandle> {
        Err(VfsError::ReadOnly)
    }

    fn open(&self, path: &Path, flags: OpenFlags) -> VfsResult<FileHandle> {
        if flags.writable() || flags.truncate || flags.create {
            return Err(VfsError::ReadOnly);
        }
        let node = self.lookup(path)?;
        let id = self.next_id();
        self.files.lock().insert(id, node);
        Ok(FileHandle(id))
    }

    fn read(&self, path: &Path, fh: FileHandle, offset: u64, size: usize) -> VfsResult<Vec<u8>> {
        let node = *self.files.lock().get(&fh.0).ok_or(VfsError::BadHandle(fh.0))?;
        match node {
            AssetNode::File(bytes) => {
                let start = usize::try_from(offset).unwrap_or(usize::MAX).min(bytes.len());
                let end = start.saturating_add(size).min(bytes.len());
                Ok(bytes[start..end].to_vec())
            }
            AssetNode::Dir(_) => Err(VfsError::is_a_directory(path.display().to_string())),
        }
    }

    fn write(&self, _path: &Path, _fh: FileHandle, _offset: u64, _data: &[u8]) -> VfsResult<usize> {
        Err(VfsError::ReadOnly)
    }

    fn truncate(&self, _path: &Path, _size: u64) -> VfsResult<()> {
        Err(VfsError::ReadOnly)
    }

    fn ftruncate(&self, _path: &Path, _fh: FileHandle, _size: u64) -> VfsResult<()> {
        Err(VfsError::ReadOnly)
    }

    fn fsync(&self, _path: &Path, fh: FileHandle) -> VfsResult<()> {
        if self.files.lock().contains_key(&fh.0) {
            Ok(())
        } else {
            Err(VfsError::BadHandle(fh.0))
        }
    }

    fn release(&self, _path: &Path, fh: FileHandle) -> VfsResult<()> {
        self.files
            .lock()
            .remove(&fh.0)
            .map(|_| ())
            .ok_or(VfsError::BadHandle(fh.0))
    }

    fn mknod(&self, _path: &Path, _mode: u32) -> VfsResult<()> {
        Err(VfsError::ReadOnly)
    }

    fn mkdir(&self, _path: &Path, _mode: u32) -> VfsResult<()> {
        Err(VfsError::ReadOnly)
    }

    fn rmdir(&self, _path: &Path) -> VfsResult<()> {
        Err(VfsError::ReadOnly)
    }

    fn unlink(&self, _path: &Path) -> VfsResult<()> {
        Err(VfsError::ReadOnly)
    }

    fn rename(&self, _from: &Path, _to: &Path) -> VfsResult<()> {
        Err(VfsError::ReadOnly)
    }

    fn opendir(&self, path: &Path) -> VfsResult<DirHandle> {
        let AssetNode::Dir(children) = self.lookup(path)? else {
            return Err(VfsError::not_a_directory(path.display().to_string()));
        };
        let mut entries: Vec<DirEntry> = children
            .iter()
            .map(|entry| DirEntry::new(entry.name, entry.node.kind()))
            .collect();
        entries.sort_by(|a, b| a.name.cmp(&b.name));

        let id = self.next_id();
        self.dirs.lock().insert(id, entries);
        Ok(DirHandle(id))
    }

    fn readdir(&self, _path: &Path, dh: DirHandle) -> VfsResult<Vec<DirEntry>> {
        self.dirs
            .lock()
            .get(&dh.0)
            .cloned()
            .ok_or(VfsError::BadHandle(dh.0))
    }

    fn releasedir(&self, _path: &Path, dh: DirHandle) -> VfsResult<()> {
        self.dirs
            .lock()
            .remove(&dh.0)
            .map(|_| ())
            .ok_or(VfsError::BadHandle(dh.0))
    }

    fn read_only(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    static FONTS: &[AssetEntry] = &[AssetEntry::file("mono.txt", b"monospace")];
    static ASSETS: &[AssetEntry] = &[
        AssetEntry::file("hello.txt", b"hello assets"),
        AssetEntry::dir("fonts", FONTS),
    ];

    fn driver() -> AssetDriver {
        AssetDriver::new(ASSETS)
    }

    #[test]
    fn test_modes() {
        let fs = driver();
        assert_eq!(fs.getattr(Path::new("")).unwrap().perm, 0o555);
        assert_eq!(fs.getattr(Path::new("fonts")).unwrap().perm, 0o555);
        let file = fs.getattr(Path::new("fonts/mono.txt")).unwrap();
        assert_eq!(file.perm, 0o444);
        assert_eq!(file.size, 9);
        assert!(fs.read_only());
    }

    #[test]
    fn test_read_and_list() {
        let fs = driver();
        assert_eq!(fs.read_all(Path::new("hello.txt")).unwrap(), b"hello assets");

        let fh = fs.open(Path::new("hello.txt"), OpenFlags::read()).unwrap();
        assert_eq!(fs.read(Path::new("hello.txt"), fh, 6, 100).unwrap(), b"assets");
        assert!(fs.read(Path::new("hello.txt"), fh, 100, 4).unwrap().is_empty());
        fs.release(Path::new("hello.txt"), fh).unwrap();

        let names: Vec<_> = fs
            .list(Path::new("/"))
            .unwrap()
            .into_iter()
            .map(|e| e.name)
            .collect();
        assert_eq!(names, vec!["fonts", "hello.txt"]);
        assert!(matches!(
            fs.getattr(Path::new("nope")),
            Err(VfsError::NotFound(_))
        ));
    }

    #[test]
    fn test_every_mutation_is_read_only() {
        let fs = driver();
        let existing = Path::new("hello.txt");
        let missing = Path::new("missing.txt");

        for path in [existing, missing] {
            assert!(matches!(
                fs.create(path, 0o644, OpenFlags::create()),
                Err(VfsError::ReadOnly)
            ));
            assert!(matches!(
                fs.open(path, OpenFlags::read_write()),
                Err(VfsError::ReadOnly)
            ));
            assert!(matches!(fs.truncate(path, 0), Err(VfsError::ReadOnly)));
            assert!(matches!(fs.unlink(path), Err(VfsError::ReadOnly)));
            assert!(matches!(fs.chmod(path, 0o777), Err(VfsError::ReadOnly)));
            assert!(matches!(fs.mkdir(path, 0o755), Err(VfsError::ReadOnly)));
            assert!(matches!(fs.rmdir(path), Err(VfsError::ReadOnly)));
            assert!(matches!(fs.mknod(path, 0o644), Err(VfsError::ReadOnly)));
            assert!(matches!(
                fs.set_times(path, None, Some(SystemTime::now())),
                Err(VfsError::ReadOnly)
            ));
            assert!(matches!(
                fs.rename(path, Path::new("other")),
                Err(VfsError::ReadOnly)
            ));
        }
        assert!(matches!(
            fs.access(existing, AccessMode::WRITE),
            Err(VfsError::ReadOnly)
        ));
        assert!(fs.access(existing, AccessMode::READ).is_ok());
    }
}
