//! VFS drivers.
//!
//! [`MirrorDriver`] and [`AssetDriver`] implement [`Driver`](crate::vfs::Driver);
//! [`MemoryTree`] is the node store underneath the mirror.

mod assets;
mod memory;
mod mirror;

pub use assets::{AssetDriver, AssetEntry, AssetNode};
pub use memory::{MemoryTree, ROOT_INO};
pub use mirror::MirrorDriver;
