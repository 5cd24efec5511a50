//! Driver interface.
//!
//! Every mounted subtree is served by one [`Driver`]. The operation set
//! mirrors a FUSE operations table: path-addressed calls plus handle-based
//! calls that also carry the path, so the [`MountTable`](super::MountTable)
//! can route them without a global handle registry.
//!
//! All operations are synchronous. A driver backed by slow storage must
//! answer from memory and defer the slow work (see
//! [`MirrorDriver`](super::MirrorDriver)).

use std::path::Path;
use std::time::SystemTime;

use super::types::{AccessMode, DirEntry, DirHandle, FileAttr, FileHandle, OpenFlags};
use super::{VfsError, VfsResult};

/// Fixed operation contract implemented by every driver.
///
/// Paths are relative to the driver's mount point.
pub trait Driver: Send + Sync {
    // ========================================================================
    // Metadata
    // ========================================================================

    /// Check that `path` exists and that `mode` is permitted.
    fn access(&self, path: &Path, mode: AccessMode) -> VfsResult<()>;

    /// Get attributes by path.
    fn getattr(&self, path: &Path) -> VfsResult<FileAttr>;

    /// Get attributes of an open file.
    fn fgetattr(&self, path: &Path, fh: FileHandle) -> VfsResult<FileAttr>;

    /// Change permission bits.
    fn chmod(&self, path: &Path, mode: u32) -> VfsResult<()>;

    /// Set access and/or modification time. `None` leaves a time untouched.
    fn set_times(
        &self,
        path: &Path,
        atime: Option<SystemTime>,
        mtime: Option<SystemTime>,
    ) -> VfsResult<()>;

    // ========================================================================
    // Files
    // ========================================================================

    /// Create (or, without `exclusive`, open) a regular file.
    fn create(&self, path: &Path, mode: u32, flags: OpenFlags) -> VfsResult<FileHandle>;

    /// Open an existing regular file.
    fn open(&self, path: &Path, flags: OpenFlags) -> VfsResult<FileHandle>;

    /// Read up to `size` bytes at `offset`. Short reads at EOF are not errors.
    fn read(&self, path: &Path, fh: FileHandle, offset: u64, size: usize) -> VfsResult<Vec<u8>>;

    /// Write all of `data` at `offset`, zero-extending the file if needed.
    fn write(&self, path: &Path, fh: FileHandle, offset: u64, data: &[u8]) -> VfsResult<usize>;

    /// Truncate (or extend) a file by path.
    fn truncate(&self, path: &Path, size: u64) -> VfsResult<()>;

    /// Truncate (or extend) an open file.
    fn ftruncate(&self, path: &Path, fh: FileHandle, size: u64) -> VfsResult<()>;

    /// Flush an open file.
    fn fsync(&self, path: &Path, fh: FileHandle) -> VfsResult<()>;

    /// Close an open file.
    fn release(&self, path: &Path, fh: FileHandle) -> VfsResult<()>;

    /// Create a device node. No driver here supports special files.
    fn mknod(&self, path: &Path, mode: u32) -> VfsResult<()> {
        let _ = (path, mode);
        Err(VfsError::NotSupported("mknod"))
    }

    // ========================================================================
    // Directories
    // ========================================================================

    /// Create a directory. The parent must exist.
    fn mkdir(&self, path: &Path, mode: u32) -> VfsResult<()>;

    /// Remove an empty directory.
    fn rmdir(&self, path: &Path) -> VfsResult<()>;

    /// Remove a file.
    fn unlink(&self, path: &Path) -> VfsResult<()>;

    /// Rename a file or directory within this driver.
    fn rename(&self, from: &Path, to: &Path) -> VfsResult<()>;

    /// Open a directory stream.
    fn opendir(&self, path: &Path) -> VfsResult<DirHandle>;

    /// Read the entries of an open directory (no `.`/`..`), sorted by name.
    fn readdir(&self, path: &Path, dh: DirHandle) -> VfsResult<Vec<DirEntry>>;

    /// Close a directory stream.
    fn releasedir(&self, path: &Path, dh: DirHandle) -> VfsResult<()>;

    /// Returns true if this driver rejects all mutations.
    fn read_only(&self) -> bool;

    // ========================================================================
    // Convenience methods (default implementations)
    // ========================================================================

    /// Check if a path exists.
    fn exists(&self, path: &Path) -> bool {
        self.getattr(path).is_ok()
    }

    /// List a directory in one call (opendir + readdir + releasedir).
    fn list(&self, path: &Path) -> VfsResult<Vec<DirEntry>> {
        let dh = self.opendir(path)?;
        let entries = self.readdir(path, dh);
        self.releasedir(path, dh)?;
        entries
    }

    /// Read entire file contents.
    fn read_all(&self, path: &Path) -> VfsResult<Vec<u8>> {
        let fh = self.open(path, OpenFlags::read())?;
        let result = self
            .fgetattr(path, fh)
            .and_then(|attr| self.read(path, fh, 0, attr.size as usize));
        self.release(path, fh)?;
        result
    }

    /// Replace a file's contents, creating it if needed.
    fn write_all(&self, path: &Path, data: &[u8]) -> VfsResult<()> {
        let fh = self.create(path, 0o644, OpenFlags::create_truncate())?;
        let result = self.write(path, fh, 0, data);
        self.release(path, fh)?;
        result.map(|_| ())
    }
}
