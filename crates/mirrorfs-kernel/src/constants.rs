//! Filesystem constants.
//!
//! Centralizes defaults shared by the drivers, the startup walk and the
//! configuration layer.

/// Mode of files created without an explicit one.
pub const DEFAULT_FILE_MODE: u32 = 0o644;

/// Mode of directories created implicitly (mount roots, seeded ancestors).
pub const DEFAULT_DIR_MODE: u32 = 0o755;

/// Asset directories: read and traverse only.
pub const ASSET_DIR_MODE: u32 = 0o555;

/// Asset files: read only.
pub const ASSET_FILE_MODE: u32 = 0o444;

/// Where persistent directories are mounted.
pub const DEFAULT_PERSISTENT_ROOT: &str = "/persistent";

/// Where the asset tree is mounted.
pub const DEFAULT_ASSETS_MOUNT: &str = "/resources";

/// Name of the backend worker thread.
pub const WORKER_THREAD_NAME: &str = "mirrorfs-backend";
