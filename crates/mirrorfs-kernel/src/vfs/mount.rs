//! Mount table with longest-prefix routing.
//!
//! Routes every [`Driver`] call to the driver mounted at the longest prefix
//! of the path, matched component by component, and hands that driver the
//! path relative to its mount point. Ancestors of mount points that no
//! driver serves (for example `/mnt` when only `/mnt/a` is mounted) appear
//! as synthetic directories, and every listing includes the names
//! of mount points directly below it.

use std::collections::BTreeMap;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;

use parking_lot::RwLock;

use super::backends::MemoryTree;
use super::driver::Driver;
use super::error::{VfsError, VfsResult};
use super::types::{AccessMode, DirEntry, DirHandle, FileAttr, FileHandle, OpenFlags};

/// Directory handle for listings no driver serves. Drivers number from 1.
const SYNTHETIC_DIR: DirHandle = DirHandle(0);

/// Information about a mount point.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountInfo {
    /// The mount path (e.g., "/persistent").
    pub path: PathBuf,
    /// Whether this mount is read-only.
    pub read_only: bool,
}

/// Routes filesystem operations to mounted drivers.
///
/// Mount points are matched by longest prefix. If `/mnt` and `/mnt/project`
/// are both mounted, `/mnt/project/src/main.rs` goes to `/mnt/project`.
pub struct MountTable {
    mounts: RwLock<BTreeMap<PathBuf, Arc<dyn Driver>>>,
}

impl std::fmt::Debug for MountTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MountTable")
            .field("mounts", &self.mounts.read().keys().collect::<Vec<_>>())
            .finish()
    }
}

impl Default for MountTable {
    fn default() -> Self {
        Self::new()
    }
}

impl MountTable {
    /// Create a new empty mount table.
    pub fn new() -> Self {
        Self {
            mounts: RwLock::new(BTreeMap::new()),
        }
    }

    /// Mount a driver at `path`, replacing any driver already there.
    pub fn mount(&self, path: impl AsRef<Path>, driver: impl Driver + 'static) {
        self.mount_arc(path, Arc::new(driver));
    }

    /// Mount a driver (already wrapped in Arc) at `path`.
    pub fn mount_arc(&self, path: impl AsRef<Path>, driver: Arc<dyn Driver>) {
        let path = Self::absolute(path.as_ref());
        tracing::debug!(mount = %path.display(), read_only = driver.read_only(), "mounted driver");
        self.mounts.write().insert(path, driver);
    }

    /// Unmount the driver at `path`. Returns false if nothing was mounted.
    pub fn unmount(&self, path: impl AsRef<Path>) -> bool {
        let path = Self::absolute(path.as_ref());
        self.mounts.write().remove(&path).is_some()
    }

    /// List all current mounts, sorted by path.
    pub fn list_mounts(&self) -> Vec<MountInfo> {
        self.mounts
            .read()
            .iter()
            .map(|(path, driver)| MountInfo {
                path: path.clone(),
                read_only: driver.read_only(),
            })
            .collect()
    }

    /// Absolute normalized form: `/` followed by the normalized components.
    fn absolute(path: &Path) -> PathBuf {
        Path::new("/").join(MemoryTree::normalize(path))
    }

    /// Find the driver for `path` and the path relative to its mount point.
    pub fn resolve(&self, path: &Path) -> VfsResult<(Arc<dyn Driver>, PathBuf)> {
        let path = Self::absolute(path);
        let mounts = self.mounts.read();
        mounts
            .iter()
            .filter(|(mount, _)| path.starts_with(mount))
            .max_by_key(|(mount, _)| mount.components().count())
            .and_then(|(mount, driver)| {
                let relative = path.strip_prefix(mount).ok()?.to_path_buf();
                Some((Arc::clone(driver), relative))
            })
            .ok_or_else(|| VfsError::no_mount_point(path.display().to_string()))
    }

    /// Names of mount points directly below `path`, as directory entries.
    fn mount_children(&self, path: &Path) -> Vec<DirEntry> {
        let path = Self::absolute(path);
        let mounts = self.mounts.read();
        let mut names: Vec<String> = mounts
            .keys()
            .filter(|mount| mount.as_path() != path)
            .filter_map(|mount| {
                let rest = mount.strip_prefix(&path).ok()?;
                match rest.components().next()? {
                    Component::Normal(name) => Some(name.to_string_lossy().into_owned()),
                    _ => None,
                }
            })
            .collect();
        names.sort();
        names.dedup();
        names.into_iter().map(DirEntry::directory).collect()
    }

    fn synthetic_attr() -> FileAttr {
        let mut attr = FileAttr::directory(0o755);
        attr.mtime = SystemTime::UNIX_EPOCH;
        attr.atime = SystemTime::UNIX_EPOCH;
        attr.ctime = SystemTime::UNIX_EPOCH;
        attr
    }

    /// Run `op` against the owning driver; fall back to a synthetic
    /// directory when the path only exists as an ancestor of mount points.
    fn with_synthetic<T>(
        &self,
        path: &Path,
        op: impl FnOnce(&dyn Driver, &Path) -> VfsResult<T>,
        synthetic: impl FnOnce() -> T,
    ) -> VfsResult<T> {
        let result = self
            .resolve(path)
            .and_then(|(driver, relative)| op(driver.as_ref(), &relative));
        match result {
            Err(VfsError::NotFound(_) | VfsError::NoMountPoint(_))
                if !self.mount_children(path).is_empty() =>
            {
                Ok(synthetic())
            }
            other => other,
        }
    }
}

impl Driver for MountTable {
    fn access(&self, path: &Path, mode: AccessMode) -> VfsResult<()> {
        self.with_synthetic(path, |d, p| d.access(p, mode), || ())
    }

    fn getattr(&self, path: &Path) -> VfsResult<FileAttr> {
        self.with_synthetic(path, |d, p| d.getattr(p), Self::synthetic_attr)
    }

    fn fgetattr(&self, path: &Path, fh: FileHandle) -> VfsResult<FileAttr> {
        let (driver, relative) = self.resolve(path)?;
        driver.fgetattr(&relative, fh)
    }

    fn chmod(&self, path: &Path, mode: u32) -> VfsResult<()> {
        let (driver, relative) = self.resolve(path)?;
        driver.chmod(&relative, mode)
    }

    fn set_times(
        &self,
        path: &Path,
        atime: Option<SystemTime>,
        mtime: Option<SystemTime>,
    ) -> VfsResult<()> {
        let (driver, relative) = self.resolve(path)?;
        driver.set_times(&relative, atime, mtime)
    }

    fn create(&self, path: &Path, mode: u32, flags: OpenFlags) -> VfsResult<FileHandle> {
        let (driver, relative) = self.resolve(path)?;
        driver.create(&relative, mode, flags)
    }

    fn open(&self, path: &Path, flags: OpenFlags) -> VfsResult<FileHandle> {
        let (driver, relative) = self.resolve(path)?;
        driver.open(&relative, flags)
    }

    fn read(&self, path: &Path, fh: FileHandle, offset: u64, size: usize) -> VfsResult<Vec<u8>> {
        let (driver, relative) = self.resolve(path)?;
        driver.read(&relative, fh, offset, size)
    }

    fn write(&self, path: &Path, fh: FileHandle, offset: u64, data: &[u8]) -> VfsResult<usize> {
        let (driver, relative) = self.resolve(path)?;
        driver.write(&relative, fh, offset, data)
    }

    fn truncate(&self, path: &Path, size: u64) -> VfsResult<()> {
        let (driver, relative) = self.resolve(path)?;
        driver.truncate(&relative, size)
    }

    fn ftruncate(&self, path: &Path, fh: FileHandle, size: u64) -> VfsResult<()> {
        let (driver, relative) = self.resolve(path)?;
        driver.ftruncate(&relative, fh, size)
    }

    fn fsync(&self, path: &Path, fh: FileHandle) -> VfsResult<()> {
        let (driver, relative) = self.resolve(path)?;
        driver.fsync(&relative, fh)
    }

    fn release(&self, path: &Path, fh: FileHandle) -> VfsResult<()> {
        let (driver, relative) = self.resolve(path)?;
        driver.release(&relative, fh)
    }

    fn mknod(&self, path: &Path, mode: u32) -> VfsResult<()> {
        let (driver, relative) = self.resolve(path)?;
        driver.mknod(&relative, mode)
    }

    fn mkdir(&self, path: &Path, mode: u32) -> VfsResult<()> {
        let (driver, relative) = self.resolve(path)?;
        driver.mkdir(&relative, mode)
    }

    fn rmdir(&self, path: &Path) -> VfsResult<()> {
        let (driver, relative) = self.resolve(path)?;
        driver.rmdir(&relative)
    }

    fn unlink(&self, path: &Path) -> VfsResult<()> {
        let (driver, relative) = self.resolve(path)?;
        driver.unlink(&relative)
    }

    fn rename(&self, from: &Path, to: &Path) -> VfsResult<()> {
        let (from_driver, from_relative) = self.resolve(from)?;
        let (to_driver, to_relative) = self.resolve(to)?;

        if !Arc::ptr_eq(&from_driver, &to_driver) {
            return Err(VfsError::CrossDeviceLink);
        }

        from_driver.rename(&from_relative, &to_relative)
    }

    fn opendir(&self, path: &Path) -> VfsResult<DirHandle> {
        self.with_synthetic(path, |d, p| d.opendir(p), || SYNTHETIC_DIR)
    }

    fn readdir(&self, path: &Path, dh: DirHandle) -> VfsResult<Vec<DirEntry>> {
        let mut merged: BTreeMap<String, DirEntry> = BTreeMap::new();
        if dh != SYNTHETIC_DIR {
            let (driver, relative) = self.resolve(path)?;
            for entry in driver.readdir(&relative, dh)? {
                merged.insert(entry.name.clone(), entry);
            }
        }
        // Mount points shadow same-named entries of the parent driver.
        for entry in self.mount_children(path) {
            merged.insert(entry.name.clone(), entry);
        }
        Ok(merged.into_values().collect())
    }

    fn releasedir(&self, path: &Path, dh: DirHandle) -> VfsResult<()> {
        if dh == SYNTHETIC_DIR {
            return Ok(());
        }
        let (driver, relative) = self.resolve(path)?;
        driver.releasedir(&relative, dh)
    }

    fn read_only(&self) -> bool {
        // Individual mounts might be
        false
    }
}
