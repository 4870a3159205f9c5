//! Validation for VFS names and blob file names
//!
//! This module owns the naming rules SBVFS relies on: the name the VFS is
//! registered under, the `-journal` companion suffix, and the raw volume
//! device syntax.

use crate::error::{Result, SbvfsError};
use regex::Regex;

/// Suffix SQLite appends to a database path to name its rollback journal
pub const JOURNAL_SUFFIX: &str = "-journal";

/// Validated name under which the VFS is registered with SQLite
///
/// # Rules
/// - ASCII letters, digits, underscore and hyphen only
/// - Must start with a letter
/// - Length: 1-64 characters
///
/// # Examples
///
/// ```
/// use sbvfs::validation::VfsName;
///
/// let name = VfsName::new("HB_SQL").unwrap();
/// assert_eq!(name.as_str(), "HB_SQL");
///
/// assert!(VfsName::new("").is_err());
/// assert!(VfsName::new("9lives").is_err()); // leading digit
/// assert!(VfsName::new("has space").is_err());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct VfsName(String);

impl VfsName {
    const PATTERN: &'static str = r"^[A-Za-z][A-Za-z0-9_-]*$";

    const MAX_LENGTH: usize = 64;

    pub fn new(name: impl Into<String>) -> Result<Self> {
        let name = name.into();
        Self::validate_name(&name)?;
        Ok(VfsName(name))
    }

    fn validate_name(name: &str) -> Result<()> {
        if name.is_empty() {
            return Err(SbvfsError::InvalidVfsName(
                "name cannot be empty".to_string(),
            ));
        }

        if name.len() > Self::MAX_LENGTH {
            return Err(SbvfsError::InvalidVfsName(format!(
                "name too long (max {} characters)",
                Self::MAX_LENGTH
            )));
        }

        let re = Regex::new(Self::PATTERN).unwrap();
        if !re.is_match(name) {
            return Err(SbvfsError::InvalidVfsName(format!(
                "name '{}' must start with a letter and contain only letters, digits, '_' or '-'",
                name
            )));
        }

        Ok(())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl AsRef<str> for VfsName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for VfsName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Split a trailing `-journal` off `path`.
///
/// Returns the blob's canonical name and whether the suffix was present.
/// A bare `-journal` is not treated as a journal name.
///
/// ```
/// use sbvfs::validation::split_journal_suffix;
///
/// assert_eq!(split_journal_suffix("/data/nvr.db-journal"), ("/data/nvr.db", true));
/// assert_eq!(split_journal_suffix("/data/nvr.db"), ("/data/nvr.db", false));
/// assert_eq!(split_journal_suffix("/data/nvr.db-wal"), ("/data/nvr.db-wal", false));
/// ```
pub fn split_journal_suffix(path: &str) -> (&str, bool) {
    match path.strip_suffix(JOURNAL_SUFFIX) {
        Some(base) if !base.is_empty() => (base, true),
        _ => (path, false),
    }
}

/// True for Windows raw volume names of the form `\\.\X:`
///
/// ```
/// use sbvfs::validation::is_raw_volume_name;
///
/// assert!(is_raw_volume_name(r"\\.\H:"));
/// assert!(!is_raw_volume_name(r"C:\data\blob.img"));
/// assert!(!is_raw_volume_name("/dev/sdb"));
/// ```
pub fn is_raw_volume_name(name: &str) -> bool {
    let re = Regex::new(r"^\\\\\.\\[A-Za-z]:$").unwrap();
    re.is_match(name)
}
