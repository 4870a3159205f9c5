//! VFS configuration
//!
//! ```toml
//! # sbvfs.toml
//! name = "HB_SQL"
//! ```

use crate::error::Result;
use crate::validation::VfsName;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Name used when none is configured
pub const DEFAULT_VFS_NAME: &str = "HB_SQL";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct VfsConfig {
    /// Name SQLite connections pass (e.g. `?vfs=HB_SQL`) to select this VFS
    pub name: String,
}

impl Default for VfsConfig {
    fn default() -> Self {
        VfsConfig {
            name: DEFAULT_VFS_NAME.to_string(),
        }
    }
}

impl VfsConfig {
    pub fn with_name(name: impl Into<String>) -> Self {
        VfsConfig { name: name.into() }
    }

    /// Parse and validate a TOML document
    pub fn from_toml_str(source: &str) -> Result<Self> {
        let config: VfsConfig = toml::from_str(source)?;
        config.validated_name()?;
        Ok(config)
    }

    /// Read, parse and validate a TOML file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let source = std::fs::read_to_string(path)?;
        Self::from_toml_str(&source)
    }

    pub fn validated_name(&self) -> Result<VfsName> {
        VfsName::new(self.name.clone())
    }
}
