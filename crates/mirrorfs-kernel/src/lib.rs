//! # mirrorfs-kernel
//!
//! Dual-tier virtual filesystem.
//!
//! Callers get a synchronous, POSIX-style [`Driver`] surface. Every call is
//! answered from an in-memory mirror. Mutations under the persistent mount
//! are replayed, in the exact order the mirror applied them, by a single
//! background worker against a slow asynchronous [`StoreOps`] backend. At
//! startup the same worker first copies the backend's existing tree into
//! the mirror, and only then opens the persistent mount.
//!
//! Start with [`FilesystemContext::start`].

pub mod config;
pub mod constants;
pub mod context;
pub mod replication;
pub mod store;
pub mod vfs;

pub use config::{ConfigError, FsConfig};
pub use context::{ContextError, FilesystemContext, StartupSignal};
pub use replication::{StartupReport, StatsSnapshot};
pub use store::{LocalStore, MemoryStore, StoreOps};
pub use vfs::{
    AccessMode, AssetDriver, AssetEntry, AssetNode, DirEntry, DirHandle, Driver, FileAttr,
    FileHandle, FileType, MirrorDriver, MountInfo, MountTable, OpenFlags, VfsError, VfsResult,
};
