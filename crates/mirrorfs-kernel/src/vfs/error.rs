//! VFS error types.

use std::io;
use thiserror::Error;

/// POSIX errno values reported through [`VfsError::errno`].
///
/// Values follow Linux numbering.
pub mod errno {
    pub const EACCES: i32 = 13;
    pub const EAGAIN: i32 = 11;
    pub const EBADF: i32 = 9;
    pub const EEXIST: i32 = 17;
    pub const EINVAL: i32 = 22;
    pub const EIO: i32 = 5;
    pub const EISDIR: i32 = 21;
    pub const ENOENT: i32 = 2;
    pub const ENOSPC: i32 = 28;
    pub const ENOSYS: i32 = 38;
    pub const ENOTDIR: i32 = 20;
    pub const ENOTEMPTY: i32 = 39;
    pub const EROFS: i32 = 30;
    pub const EXDEV: i32 = 18;
}

/// VFS error type.
#[derive(Debug, Error)]
pub enum VfsError {
    /// File or directory not found.
    #[error("not found: {0}")]
    NotFound(String),

    /// Path already exists.
    #[error("already exists: {0}")]
    AlreadyExists(String),

    /// Permission denied.
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    /// Filesystem is read-only.
    #[error("filesystem is read-only")]
    ReadOnly,

    /// Expected a directory.
    #[error("not a directory: {0}")]
    NotADirectory(String),

    /// Expected a file.
    #[error("is a directory: {0}")]
    IsADirectory(String),

    /// Directory not empty.
    #[error("directory not empty: {0}")]
    DirectoryNotEmpty(String),

    /// Handle is unknown, already released, or lacks the needed access.
    #[error("bad file handle: {0}")]
    BadHandle(u64),

    /// Mirror capacity exhausted.
    #[error("no space left on device")]
    NoSpace,

    /// Invalid path.
    #[error("invalid path: {0}")]
    InvalidPath(String),

    /// No mount point for path.
    #[error("no mount point for path: {0}")]
    NoMountPoint(String),

    /// Cross-device link.
    #[error("cross-device link")]
    CrossDeviceLink,

    /// Operation not supported by this driver.
    #[error("operation not supported: {0}")]
    NotSupported(&'static str),

    /// Persistent storage has not finished startup replication.
    #[error("filesystem not ready: startup replication still running")]
    NotReady,

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Other error.
    #[error("{0}")]
    Other(String),
}

impl VfsError {
    /// Create a NotFound error.
    pub fn not_found(path: impl Into<String>) -> Self {
        Self::NotFound(path.into())
    }

    /// Create an AlreadyExists error.
    pub fn already_exists(path: impl Into<String>) -> Self {
        Self::AlreadyExists(path.into())
    }

    /// Create a PermissionDenied error.
    pub fn permission_denied(path: impl Into<String>) -> Self {
        Self::PermissionDenied(path.into())
    }

    /// Create a NotADirectory error.
    pub fn not_a_directory(path: impl Into<String>) -> Self {
        Self::NotADirectory(path.into())
    }

    /// Create an IsADirectory error.
    pub fn is_a_directory(path: impl Into<String>) -> Self {
        Self::IsADirectory(path.into())
    }

    /// Create a DirectoryNotEmpty error.
    pub fn directory_not_empty(path: impl Into<String>) -> Self {
        Self::DirectoryNotEmpty(path.into())
    }

    /// Create an InvalidPath error.
    pub fn invalid_path(path: impl Into<String>) -> Self {
        Self::InvalidPath(path.into())
    }

    /// Create a NoMountPoint error.
    pub fn no_mount_point(path: impl Into<String>) -> Self {
        Self::NoMountPoint(path.into())
    }

    /// Create an Other error.
    pub fn other(msg: impl Into<String>) -> Self {
        Self::Other(msg.into())
    }

    /// Classify an I/O error on `path`, keeping the kinds callers match on.
    pub fn from_io(path: &std::path::Path, err: io::Error) -> Self {
        let path = path.display().to_string();
        match err.kind() {
            io::ErrorKind::NotFound => Self::NotFound(path),
            io::ErrorKind::AlreadyExists => Self::AlreadyExists(path),
            io::ErrorKind::PermissionDenied => Self::PermissionDenied(path),
            io::ErrorKind::NotADirectory => Self::NotADirectory(path),
            io::ErrorKind::IsADirectory => Self::IsADirectory(path),
            io::ErrorKind::DirectoryNotEmpty => Self::DirectoryNotEmpty(path),
            _ => Self::Io(err),
        }
    }

    /// POSIX error code for this error, as a FUSE-style driver would return it.
    pub fn errno(&self) -> i32 {
        match self {
            VfsError::NotFound(_) | VfsError::NoMountPoint(_) => errno::ENOENT,
            VfsError::AlreadyExists(_) => errno::EEXIST,
            VfsError::PermissionDenied(_) => errno::EACCES,
            VfsError::ReadOnly => errno::EROFS,
            VfsError::NotADirectory(_) => errno::ENOTDIR,
            VfsError::IsADirectory(_) => errno::EISDIR,
            VfsError::DirectoryNotEmpty(_) => errno::ENOTEMPTY,
            VfsError::BadHandle(_) => errno::EBADF,
            VfsError::NoSpace => errno::ENOSPC,
            VfsError::InvalidPath(_) => errno::EINVAL,
            VfsError::CrossDeviceLink => errno::EXDEV,
            VfsError::NotSupported(_) => errno::ENOSYS,
            VfsError::NotReady => errno::EAGAIN,
            VfsError::Io(e) => e.raw_os_error().unwrap_or(errno::EIO),
            VfsError::Other(_) => errno::EIO,
        }
    }
}

/// Convert VfsError to std::io::Error for compatibility.
impl From<VfsError> for io::Error {
    fn from(e: VfsError) -> Self {
        match e {
            VfsError::NotFound(msg) => io::Error::new(io::ErrorKind::NotFound, msg),
            VfsError::AlreadyExists(msg) => io::Error::new(io::ErrorKind::AlreadyExists, msg),
            VfsError::PermissionDenied(msg) => {
                io::Error::new(io::ErrorKind::PermissionDenied, msg)
            }
            VfsError::ReadOnly => io::Error::new(io::ErrorKind::ReadOnlyFilesystem, "read-only filesystem"),
            VfsError::NotADirectory(msg) => io::Error::new(io::ErrorKind::NotADirectory, msg),
            VfsError::IsADirectory(msg) => io::Error::new(io::ErrorKind::IsADirectory, msg),
            VfsError::DirectoryNotEmpty(msg) => {
                io::Error::new(io::ErrorKind::DirectoryNotEmpty, msg)
            }
            VfsError::BadHandle(fh) => {
                io::Error::new(io::ErrorKind::InvalidInput, format!("bad file handle: {fh}"))
            }
            VfsError::NoSpace => io::Error::new(io::ErrorKind::StorageFull, "no space left on device"),
            VfsError::InvalidPath(msg) => io::Error::new(io::ErrorKind::InvalidInput, msg),
            VfsError::NoMountPoint(msg) => io::Error::new(io::ErrorKind::NotFound, msg),
            VfsError::CrossDeviceLink => io::Error::new(io::ErrorKind::CrossesDevices, "cross-device link"),
            VfsError::NotSupported(op) => io::Error::new(io::ErrorKind::Unsupported, op),
            VfsError::NotReady => io::Error::new(io::ErrorKind::WouldBlock, "filesystem not ready"),
            VfsError::Io(e) => e,
            VfsError::Other(msg) => io::Error::other(msg),
        }
    }
}

/// VFS result type.
pub type VfsResult<T> = Result<T, VfsError>;
