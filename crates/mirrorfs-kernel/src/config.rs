//! Filesystem configuration.
//!
//! Loaded from TOML. Every field has a default, so an empty file is valid:
//!
//! ```toml
//! persistent_root = "/persistent"
//! persistent_dirs = ["app/root", "app/cache"]
//! scratch_root = true
//! assets_mount = "/resources"
//! mirror_capacity = 67108864
//! backend_root = "/var/lib/mirrorfs"
//! ```

use std::path::{Component, Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::constants::{DEFAULT_ASSETS_MOUNT, DEFAULT_PERSISTENT_ROOT};

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("persistent directory {0:?} must be relative (no leading '/')")]
    AbsoluteMountName(String),

    #[error("persistent directory {0:?} is empty or contains '.' or '..'")]
    InvalidMountName(String),

    #[error("persistent directory {0:?} is listed twice")]
    DuplicateMountName(String),

    #[error("mount point {0:?} must be absolute")]
    RelativeMountPoint(PathBuf),
}

/// Layout of the filesystem a context builds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FsConfig {
    /// Mount point of the replicated mirror.
    pub persistent_root: PathBuf,
    /// Directories under `persistent_root` that are loaded at startup.
    pub persistent_dirs: Vec<String>,
    /// Mount a non-replicated memory driver at `/`.
    pub scratch_root: bool,
    /// Mount point of the asset tree, if any.
    pub assets_mount: Option<PathBuf>,
    /// Byte cap for each mirror driver.
    pub mirror_capacity: Option<u64>,
    /// Host directory backing the persistent mirror (CLI only).
    pub backend_root: Option<PathBuf>,
}

impl Default for FsConfig {
    fn default() -> Self {
        Self {
            persistent_root: PathBuf::from(DEFAULT_PERSISTENT_ROOT),
            persistent_dirs: Vec::new(),
            scratch_root: true,
            assets_mount: Some(PathBuf::from(DEFAULT_ASSETS_MOUNT)),
            mirror_capacity: None,
            backend_root: None,
        }
    }
}

impl FsConfig {
    /// Parse and validate a TOML document.
    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a TOML file.
    pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&contents)
    }

    /// Builder-style helper for the persistent directory list.
    pub fn with_persistent_dirs<I, S>(mut self, dirs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.persistent_dirs = dirs.into_iter().map(Into::into).collect();
        self
    }

    /// Check mount names and mount points.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.persistent_root.is_absolute() {
            return Err(ConfigError::RelativeMountPoint(self.persistent_root.clone()));
        }
        if let Some(assets) = &self.assets_mount {
            if !assets.is_absolute() {
                return Err(ConfigError::RelativeMountPoint(assets.clone()));
            }
        }

        let mut seen = std::collections::HashSet::new();
        for name in &self.persistent_dirs {
            validate_mount_name(name)?;
            let normalized = name.trim_end_matches('/');
            if !seen.insert(normalized) {
                return Err(ConfigError::DuplicateMountName(name.clone()));
            }
        }
        Ok(())
    }
}

fn validate_mount_name(name: &str) -> Result<(), ConfigError> {
    if name.starts_with('/') {
        return Err(ConfigError::AbsoluteMountName(name.to_string()));
    }
    let path = Path::new(name);
    let mut components = 0;
    for component in path.components() {
        match component {
            Component::Normal(_) => components += 1,
            _ => return Err(ConfigError::InvalidMountName(name.to_string())),
        }
    }
    if components == 0 {
        return Err(ConfigError::InvalidMountName(name.to_string()));
    }
    Ok(())
}
