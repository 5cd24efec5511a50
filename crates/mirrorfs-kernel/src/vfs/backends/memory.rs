//! In-memory filesystem tree.
//!
//! The node store behind every [`MirrorDriver`](crate::vfs::MirrorDriver).
//! Entries are indexed by normalized relative path and point at inode
//! numbers, so open handles keep addressing the same node across renames
//! and an unlinked file survives until its last handle is released.
//!
//! The tree has no interior locking; the owning driver wraps it in a lock
//! and decides what happens around each mutation.

use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};
use std::time::SystemTime;

use crate::vfs::error::{VfsError, VfsResult};
use crate::vfs::types::{DirEntry, FileAttr, FileType};

/// Inode number of the tree root.
pub const ROOT_INO: u64 = 1;

#[derive(Debug, Clone)]
enum NodeData {
    File(Vec<u8>),
    Directory,
}

#[derive(Debug, Clone)]
struct Node {
    data: NodeData,
    attr: FileAttr,
    /// Still reachable through `paths`.
    linked: bool,
}

impl Node {
    fn kind(&self) -> FileType {
        match self.data {
            NodeData::File(_) => FileType::File,
            NodeData::Directory => FileType::Directory,
        }
    }
}

/// Path-indexed tree of inodes.
#[derive(Debug)]
pub struct MemoryTree {
    paths: HashMap<PathBuf, u64>,
    nodes: HashMap<u64, Node>,
    open_counts: HashMap<u64, u32>,
    next_ino: u64,
    capacity: Option<u64>,
    used: u64,
}

impl Default for MemoryTree {
    fn default() -> Self {
        Self::new(None)
    }
}

impl MemoryTree {
    /// Create a tree holding only the root directory.
    ///
    /// `capacity` caps the total bytes stored across all files.
    pub fn new(capacity: Option<u64>) -> Self {
        let mut attr = FileAttr::directory(0o755);
        attr.ino = ROOT_INO;
        let mut nodes = HashMap::new();
        nodes.insert(
            ROOT_INO,
            Node {
                data: NodeData::Directory,
                attr,
                linked: true,
            },
        );
        let mut paths = HashMap::new();
        paths.insert(PathBuf::new(), ROOT_INO);
        Self {
            paths,
            nodes,
            open_counts: HashMap::new(),
            next_ino: ROOT_INO + 1,
            capacity,
            used: 0,
        }
    }

    /// Normalize a path: remove leading `/`, resolve `.` and `..`.
    pub fn normalize(path: &Path) -> PathBuf {
        let mut result = PathBuf::new();
        for component in path.components() {
            match component {
                Component::RootDir | Component::CurDir | Component::Prefix(_) => {}
                Component::ParentDir => {
                    result.pop();
                }
                Component::Normal(s) => result.push(s),
            }
        }
        result
    }

    fn path_str(path: &Path) -> String {
        path.display().to_string()
    }

    /// Bytes currently stored in files (including unlinked-but-open ones).
    pub fn used_bytes(&self) -> u64 {
        self.used
    }

    /// Number of linked entries, root included.
    pub fn len(&self) -> usize {
        self.paths.len()
    }

    /// True when only the root exists.
    pub fn is_empty(&self) -> bool {
        self.paths.len() == 1
    }

    // ========================================================================
    // Lookup
    // ========================================================================

    /// Resolve a normalized path to its inode.
    pub fn lookup(&self, path: &Path) -> VfsResult<u64> {
        self.paths
            .get(path)
            .copied()
            .ok_or_else(|| VfsError::not_found(Self::path_str(path)))
    }

    fn node(&self, ino: u64) -> VfsResult<&Node> {
        self.nodes
            .get(&ino)
            .ok_or_else(|| VfsError::not_found(format!("inode {ino}")))
    }

    fn node_mut(&mut self, ino: u64) -> VfsResult<&mut Node> {
        self.nodes
            .get_mut(&ino)
            .ok_or_else(|| VfsError::not_found(format!("inode {ino}")))
    }

    /// Attributes of an inode.
    pub fn attr(&self, ino: u64) -> VfsResult<FileAttr> {
        self.node(ino).map(|n| n.attr.clone())
    }

    /// Attributes by path.
    pub fn getattr(&self, path: &Path) -> VfsResult<FileAttr> {
        self.attr(self.lookup(path)?)
    }

    /// Whether the inode is a directory.
    pub fn is_dir(&self, ino: u64) -> bool {
        self.nodes
            .get(&ino)
            .is_some_and(|n| n.kind().is_dir())
    }

    /// Fail unless the parent of `path` exists and is a directory.
    fn check_parent(&self, path: &Path) -> VfsResult<()> {
        let parent = path.parent().unwrap_or(Path::new(""));
        let ino = self.lookup(parent)?;
        if self.is_dir(ino) {
            Ok(())
        } else {
            Err(VfsError::not_a_directory(Self::path_str(parent)))
        }
    }

    fn touch_parent(&mut self, path: &Path) {
        let parent = path.parent().unwrap_or(Path::new(""));
        if let Some(ino) = self.paths.get(parent).copied() {
            if let Some(node) = self.nodes.get_mut(&ino) {
                let now = SystemTime::now();
                node.attr.mtime = now;
                node.attr.ctime = now;
            }
        }
    }

    fn insert(&mut self, path: PathBuf, data: NodeData, mut attr: FileAttr) -> u64 {
        let ino = self.next_ino;
        self.next_ino += 1;
        attr.ino = ino;
        self.touch_parent(&path);
        self.nodes.insert(
            ino,
            Node {
                data,
                attr,
                linked: true,
            },
        );
        self.paths.insert(path, ino);
        ino
    }

    // ========================================================================
    // Creation
    // ========================================================================

    /// Create an empty file. Fails if anything exists at `path`.
    pub fn create_file(&mut self, path: &Path, perm: u32) -> VfsResult<u64> {
        if path.as_os_str().is_empty() || self.paths.contains_key(path) {
            return Err(VfsError::already_exists(Self::path_str(path)));
        }
        self.check_parent(path)?;
        Ok(self.insert(
            path.to_path_buf(),
            NodeData::File(Vec::new()),
            FileAttr::file(0, perm),
        ))
    }

    /// Create a directory. Fails if anything exists at `path`.
    pub fn mkdir(&mut self, path: &Path, perm: u32) -> VfsResult<u64> {
        if path.as_os_str().is_empty() || self.paths.contains_key(path) {
            return Err(VfsError::already_exists(Self::path_str(path)));
        }
        self.check_parent(path)?;
        Ok(self.insert(path.to_path_buf(), NodeData::Directory, FileAttr::directory(perm)))
    }

    /// Create `path` and any missing ancestors; existing directories are fine.
    pub fn mkdir_all(&mut self, path: &Path, perm: u32) -> VfsResult<()> {
        let mut current = PathBuf::new();
        for component in path.components() {
            if let Component::Normal(s) = component {
                current.push(s);
                match self.paths.get(&current) {
                    Some(&ino) if self.is_dir(ino) => {}
                    Some(_) => return Err(VfsError::not_a_directory(Self::path_str(&current))),
                    None => {
                        self.insert(current.clone(), NodeData::Directory, FileAttr::directory(perm));
                    }
                }
            }
        }
        Ok(())
    }

    // ========================================================================
    // File data
    // ========================================================================

    /// Read up to `size` bytes at `offset`.
    pub fn read(&self, ino: u64, offset: u64, size: usize) -> VfsResult<Vec<u8>> {
        let node = self.node(ino)?;
        match &node.data {
            NodeData::File(data) => {
                let start = usize::try_from(offset).unwrap_or(usize::MAX).min(data.len());
                let end = start.saturating_add(size).min(data.len());
                Ok(data[start..end].to_vec())
            }
            NodeData::Directory => Err(VfsError::is_a_directory(format!("inode {ino}"))),
        }
    }

    fn reserve(&mut self, old_len: u64, new_len: u64) -> VfsResult<()> {
        if new_len > old_len {
            let grown = self.used + (new_len - old_len);
            if self.capacity.is_some_and(|cap| grown > cap) {
                return Err(VfsError::NoSpace);
            }
            self.used = grown;
        } else {
            self.used -= old_len - new_len;
        }
        Ok(())
    }

    /// Grow the buffer of `ino` to hold `len` bytes without aborting on
    /// an allocation the host cannot satisfy.
    fn grow(&mut self, ino: u64, len: usize) -> VfsResult<()> {
        if let NodeData::File(bytes) = &mut self.node_mut(ino)?.data {
            if len > bytes.len() {
                bytes
                    .try_reserve_exact(len - bytes.len())
                    .map_err(|_| VfsError::NoSpace)?;
            }
        }
        Ok(())
    }

    /// Write all of `data` at `offset`, zero-filling any gap past EOF.
    pub fn write(&mut self, ino: u64, offset: u64, data: &[u8]) -> VfsResult<usize> {
        let old_len = match &self.node(ino)?.data {
            NodeData::File(bytes) => bytes.len() as u64,
            NodeData::Directory => return Err(VfsError::is_a_directory(format!("inode {ino}"))),
        };
        if data.is_empty() {
            return Ok(0);
        }
        let end = offset
            .checked_add(data.len() as u64)
            .ok_or(VfsError::NoSpace)?;
        let new_len = old_len.max(end);
        let new_len_usize = usize::try_from(new_len).map_err(|_| VfsError::NoSpace)?;
        self.reserve(old_len, new_len)?;
        if let Err(e) = self.grow(ino, new_len_usize) {
            self.used -= new_len - old_len;
            return Err(e);
        }

        let node = self.node_mut(ino)?;
        if let NodeData::File(bytes) = &mut node.data {
            if new_len_usize > bytes.len() {
                bytes.resize(new_len_usize, 0);
            }
            let start = offset as usize;
            bytes[start..start + data.len()].copy_from_slice(data);
            let now = SystemTime::now();
            node.attr.size = new_len;
            node.attr.mtime = now;
            node.attr.ctime = now;
        }
        Ok(data.len())
    }

    /// Resize a file, zero-filling when it grows.
    pub fn set_len(&mut self, ino: u64, size: u64) -> VfsResult<()> {
        let old_len = match &self.node(ino)?.data {
            NodeData::File(bytes) => bytes.len() as u64,
            NodeData::Directory => return Err(VfsError::is_a_directory(format!("inode {ino}"))),
        };
        let size_usize = usize::try_from(size).map_err(|_| VfsError::NoSpace)?;
        self.reserve(old_len, size)?;
        if let Err(e) = self.grow(ino, size_usize) {
            self.used -= size - old_len;
            return Err(e);
        }

        let node = self.node_mut(ino)?;
        if let NodeData::File(bytes) = &mut node.data {
            bytes.resize(size_usize, 0);
            let now = SystemTime::now();
            node.attr.size = size;
            node.attr.mtime = now;
            node.attr.ctime = now;
        }
        Ok(())
    }

    // ========================================================================
    // Attributes
    // ========================================================================

    /// Replace the permission bits.
    pub fn chmod(&mut self, ino: u64, perm: u32) -> VfsResult<()> {
        let node = self.node_mut(ino)?;
        node.attr.perm = perm & 0o7777;
        node.attr.ctime = SystemTime::now();
        Ok(())
    }

    /// Set access and/or modification time.
    pub fn set_times(
        &mut self,
        ino: u64,
        atime: Option<SystemTime>,
        mtime: Option<SystemTime>,
    ) -> VfsResult<()> {
        let node = self.node_mut(ino)?;
        if let Some(atime) = atime {
            node.attr.atime = atime;
        }
        if let Some(mtime) = mtime {
            node.attr.mtime = mtime;
        }
        node.attr.ctime = SystemTime::now();
        Ok(())
    }

    // ========================================================================
    // Removal and rename
    // ========================================================================

    fn has_children(&self, path: &Path) -> bool {
        self.paths
            .keys()
            .any(|k| k.parent() == Some(path) && k.as_path() != path)
    }

    /// Drop a node that is no longer linked, unless a handle still holds it.
    fn unlink_node(&mut self, ino: u64) {
        let held = self.open_counts.get(&ino).copied().unwrap_or(0) > 0;
        if held {
            if let Some(node) = self.nodes.get_mut(&ino) {
                node.linked = false;
                node.attr.nlink = 0;
            }
        } else if let Some(node) = self.nodes.remove(&ino) {
            if let NodeData::File(bytes) = node.data {
                self.used -= bytes.len() as u64;
            }
        }
    }

    /// Remove a file.
    pub fn unlink(&mut self, path: &Path) -> VfsResult<()> {
        if path.as_os_str().is_empty() {
            return Err(VfsError::is_a_directory("/"));
        }
        let ino = self.lookup(path)?;
        if self.is_dir(ino) {
            return Err(VfsError::is_a_directory(Self::path_str(path)));
        }
        self.paths.remove(path);
        self.touch_parent(path);
        self.unlink_node(ino);
        Ok(())
    }

    /// Remove an empty directory.
    pub fn rmdir(&mut self, path: &Path) -> VfsResult<()> {
        if path.as_os_str().is_empty() {
            return Err(VfsError::permission_denied("cannot remove root"));
        }
        let ino = self.lookup(path)?;
        if !self.is_dir(ino) {
            return Err(VfsError::not_a_directory(Self::path_str(path)));
        }
        if self.has_children(path) {
            return Err(VfsError::directory_not_empty(Self::path_str(path)));
        }
        self.paths.remove(path);
        self.touch_parent(path);
        self.unlink_node(ino);
        Ok(())
    }

    /// Rename a file or directory, replacing a compatible destination.
    pub fn rename(&mut self, from: &Path, to: &Path) -> VfsResult<()> {
        if from.as_os_str().is_empty() || to.as_os_str().is_empty() {
            return Err(VfsError::invalid_path("cannot rename root"));
        }
        let ino = self.lookup(from)?;
        if from == to {
            return Ok(());
        }
        self.check_parent(to)?;

        let moving_dir = self.is_dir(ino);
        if moving_dir && to.starts_with(from) {
            return Err(VfsError::invalid_path(format!(
                "cannot move {} into itself",
                Self::path_str(from)
            )));
        }

        if let Some(&existing) = self.paths.get(to) {
            match (moving_dir, self.is_dir(existing)) {
                (true, true) if self.has_children(to) => {
                    return Err(VfsError::directory_not_empty(Self::path_str(to)));
                }
                (true, false) => return Err(VfsError::not_a_directory(Self::path_str(to))),
                (false, true) => return Err(VfsError::is_a_directory(Self::path_str(to))),
                _ => {}
            }
            self.paths.remove(to);
            self.unlink_node(existing);
        }

        if moving_dir {
            let children: Vec<PathBuf> = self
                .paths
                .keys()
                .filter(|k| k.starts_with(from) && k.as_path() != from)
                .cloned()
                .collect();
            for child in children {
                if let (Some(child_ino), Ok(relative)) =
                    (self.paths.remove(&child), child.strip_prefix(from))
                {
                    self.paths.insert(to.join(relative), child_ino);
                }
            }
        }

        self.paths.remove(from);
        self.paths.insert(to.to_path_buf(), ino);
        self.touch_parent(from);
        self.touch_parent(to);
        if let Some(node) = self.nodes.get_mut(&ino) {
            node.attr.ctime = SystemTime::now();
        }
        Ok(())
    }

    // ========================================================================
    // Directories and open counts
    // ========================================================================

    /// Direct children of a directory, sorted by name.
    pub fn children(&self, path: &Path) -> VfsResult<Vec<DirEntry>> {
        let ino = self.lookup(path)?;
        if !self.is_dir(ino) {
            return Err(VfsError::not_a_directory(Self::path_str(path)));
        }

        let mut result: Vec<DirEntry> = self
            .paths
            .iter()
            .filter(|(entry_path, _)| {
                entry_path.parent() == Some(path) && entry_path.as_path() != path
            })
            .filter_map(|(entry_path, child)| {
                let name = entry_path.file_name()?.to_string_lossy().into_owned();
                let kind = self.nodes.get(child)?.kind();
                Some(DirEntry { name, kind })
            })
            .collect();

        result.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(result)
    }

    /// Record a new open handle on `ino`.
    pub fn retain(&mut self, ino: u64) {
        *self.open_counts.entry(ino).or_insert(0) += 1;
    }

    /// Drop an open handle; frees the node if it was unlinked meanwhile.
    pub fn release(&mut self, ino: u64) {
        let remaining = match self.open_counts.get_mut(&ino) {
            Some(count) => {
                *count = count.saturating_sub(1);
                *count
            }
            None => return,
        };
        if remaining == 0 {
            self.open_counts.remove(&ino);
            if self.nodes.get(&ino).is_some_and(|n| !n.linked) {
                self.unlink_node(ino);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn p(s: &str) -> PathBuf {
        MemoryTree::normalize(Path::new(s))
    }

    #[test]
    fn test_create_and_read() {
        let mut tree = MemoryTree::default();
        let ino = tree.create_file(&p("test.txt"), 0o644).unwrap();
        tree.write(ino, 0, b"hello world").unwrap();

        assert_eq!(tree.read(ino, 0, 100).unwrap(), b"hello world");
        assert_eq!(tree.read(ino, 6, 5).unwrap(), b"world");
        assert!(tree.read(ino, 100, 5).unwrap().is_empty());
    }

    #[test]
    fn test_write_past_eof_zero_fills() {
        let mut tree = MemoryTree::default();
        let ino = tree.create_file(&p("gap"), 0o644).unwrap();
        tree.write(ino, 4, b"xy").unwrap();

        assert_eq!(tree.read(ino, 0, 16).unwrap(), b"\0\0\0\0xy");
        assert_eq!(tree.attr(ino).unwrap().size, 6);
    }

    #[test]
    fn test_create_requires_parent() {
        let mut tree = MemoryTree::default();
        assert!(matches!(
            tree.create_file(&p("missing/file"), 0o644),
            Err(VfsError::NotFound(_))
        ));

        tree.create_file(&p("plain"), 0o644).unwrap();
        assert!(matches!(
            tree.create_file(&p("plain/child"), 0o644),
            Err(VfsError::NotADirectory(_))
        ));
    }

    #[test]
    fn test_create_existing_fails() {
        let mut tree = MemoryTree::default();
        tree.mkdir(&p("dir"), 0o755).unwrap();
        assert!(matches!(
            tree.create_file(&p("dir"), 0o644),
            Err(VfsError::AlreadyExists(_))
        ));
    }

    #[test]
    fn test_mkdir_all_is_idempotent() {
        let mut tree = MemoryTree::default();
        tree.mkdir_all(&p("a/b/c"), 0o755).unwrap();
        tree.mkdir_all(&p("a/b/c"), 0o755).unwrap();
        assert!(tree.getattr(&p("a/b")).unwrap().is_dir());
        assert_eq!(tree.len(), 4);
    }

    #[test]
    fn test_rmdir_not_empty() {
        let mut tree = MemoryTree::default();
        tree.mkdir(&p("nonempty"), 0o755).unwrap();
        tree.create_file(&p("nonempty/file.txt"), 0o644).unwrap();

        assert!(matches!(
            tree.rmdir(&p("nonempty")),
            Err(VfsError::DirectoryNotEmpty(_))
        ));
        tree.unlink(&p("nonempty/file.txt")).unwrap();
        tree.rmdir(&p("nonempty")).unwrap();
        assert!(tree.is_empty());
    }

    #[test]
    fn test_rename_directory_moves_children() {
        let mut tree = MemoryTree::default();
        tree.mkdir(&p("old"), 0o755).unwrap();
        tree.mkdir(&p("old/sub"), 0o755).unwrap();
        let ino = tree.create_file(&p("old/sub/f"), 0o644).unwrap();
        tree.write(ino, 0, b"content").unwrap();

        tree.rename(&p("old"), &p("new")).unwrap();

        assert!(tree.lookup(&p("old")).is_err());
        assert_eq!(tree.lookup(&p("new/sub/f")).unwrap(), ino);
    }

    #[test]
    fn test_rename_into_self_fails() {
        let mut tree = MemoryTree::default();
        tree.mkdir(&p("a"), 0o755).unwrap();
        assert!(matches!(
            tree.rename(&p("a"), &p("a/b")),
            Err(VfsError::InvalidPath(_))
        ));
    }

    #[test]
    fn test_unlinked_file_lives_while_open() {
        let mut tree = MemoryTree::default();
        let ino = tree.create_file(&p("tmp"), 0o644).unwrap();
        tree.write(ino, 0, b"abc").unwrap();
        tree.retain(ino);

        tree.unlink(&p("tmp")).unwrap();
        assert!(tree.lookup(&p("tmp")).is_err());
        assert_eq!(tree.read(ino, 0, 3).unwrap(), b"abc");
        assert_eq!(tree.used_bytes(), 3);

        tree.release(ino);
        assert!(tree.attr(ino).is_err());
        assert_eq!(tree.used_bytes(), 0);
    }

    #[test]
    fn test_capacity_limit() {
        let mut tree = MemoryTree::new(Some(8));
        let ino = tree.create_file(&p("f"), 0o644).unwrap();
        tree.write(ino, 0, b"12345678").unwrap();
        assert!(matches!(tree.write(ino, 8, b"9"), Err(VfsError::NoSpace)));
        tree.set_len(ino, 4).unwrap();
        tree.write(ino, 4, b"5678").unwrap();
        assert_eq!(tree.used_bytes(), 8);
    }

    #[test]
    fn test_huge_sparse_write_fails_cleanly() {
        let mut tree = MemoryTree::default();
        let ino = tree.create_file(&p("sparse"), 0o644).unwrap();
        tree.write(ino, 0, b"ab").unwrap();

        assert!(matches!(tree.write(ino, 1 << 62, b"x"), Err(VfsError::NoSpace)));
        assert!(matches!(tree.set_len(ino, 1 << 62), Err(VfsError::NoSpace)));
        assert_eq!(tree.read(ino, 0, 10).unwrap(), b"ab");
        assert_eq!(tree.attr(ino).unwrap().size, 2);
        assert_eq!(tree.used_bytes(), 2);
    }

    #[test]
    fn test_path_normalization() {
        let mut tree = MemoryTree::default();
        tree.mkdir_all(&p("/a/b"), 0o755).unwrap();
        tree.create_file(&p("/a/b/c.txt"), 0o644).unwrap();

        assert!(tree.getattr(&p("a/b/c.txt")).is_ok());
        assert!(tree.getattr(&p("a/./b/c.txt")).is_ok());
        assert!(tree.getattr(&p("a/b/../b/c.txt")).is_ok());
    }
}
