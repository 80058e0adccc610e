//! Storage configuration and path management for Haven.
//!
//! Centralizes every file path decision so tests can inject temp directories
//! and future clients can relocate the data root without hunting through
//! code.

use std::path::{Path, PathBuf};

/// Central configuration for all Haven storage paths.
///
/// Production code uses `StorageConfig::default()` which points to
/// `~/.haven/`. Tests use `StorageConfig::with_root(temp_dir)` for isolation.
#[derive(Debug, Clone)]
pub struct StorageConfig {
    /// Root directory for all Haven data (default: ~/.haven)
    root: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        let home = dirs::home_dir().expect("Could not find home directory");
        Self {
            root: home.join(".haven"),
        }
    }
}

impl StorageConfig {
    /// Creates a StorageConfig with a custom root directory.
    /// Used for testing with temp directories.
    pub fn with_root(root: PathBuf) -> Self {
        Self { root }
    }

    /// Returns the root directory for Haven data.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Returns the path of the local safety database.
    pub fn db_path(&self) -> PathBuf {
        self.root.join("safety.db")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_with_root_places_db_under_root() {
        let config = StorageConfig::with_root(PathBuf::from("/tmp/haven-test"));
        assert_eq!(config.db_path(), PathBuf::from("/tmp/haven-test/safety.db"));
    }
}
