//! Virtual filesystem.
//!
//! Key components:
//!
//! - [`Driver`] - Synchronous operation contract every mount implements
//! - [`MountTable`] - Routes operations to drivers based on path
//! - [`MirrorDriver`] - In-memory tree, optionally replicated to a backend
//! - [`AssetDriver`] - Read-only tree compiled into the binary
//!
//! ## Design Decisions
//!
//! - **Synchronous calls**: every operation completes against memory and
//!   returns immediately. Backend latency never reaches a caller.
//! - **Handles carry paths**: handle-based calls also pass the path, so the
//!   mount table routes them the same way as path calls.
//! - **Longest-prefix routing**: MountTable routes to the most specific
//!   mount point that matches, comparing whole path components.

pub mod backends;
mod driver;
mod error;
mod handles;
mod mount;
mod types;

pub use backends::{AssetDriver, AssetEntry, AssetNode, MemoryTree, MirrorDriver};
pub use driver::Driver;
pub use error::{VfsError, VfsResult, errno};
pub use handles::OpenHandle;
pub use mount::{MountInfo, MountTable};
pub use types::{AccessMode, DirEntry, DirHandle, FileAttr, FileHandle, FileType, OpenFlags};
