// Global configuration for the propagation library
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::error::PropagationError;

// Global configuration for interpolation table storage
pub static CONFIG: Lazy<Mutex<Config>> = Lazy::new(|| Mutex::new(Config::new()));

/// Upper end of every interpolation table axis (MeV).
pub const BIG_ENERGY: f64 = 1e14;

/// Default number of nodes on the log-spaced table axis.
pub const DEFAULT_INTERPOLATION_NODES: usize = 200;

/// On-disk encoding of persisted interpolation tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TableEncoding {
    /// Little-endian binary records (`.bin`).
    Binary,
    /// Human readable JSON (`.json`).
    Text,
}

impl TableEncoding {
    /// File extension used for tables stored with this encoding.
    pub fn extension(&self) -> &'static str {
        match self {
            TableEncoding::Binary => "bin",
            TableEncoding::Text => "json",
        }
    }
}

/// Global configuration container for interpolation tables.
///
/// Holds where tables are persisted, how they are encoded and how the energy
/// axis is laid out. A single global instance is exposed via the `CONFIG`
/// static; obtain a guard with [`Config::global`]. Per-propagator settings
/// ([`crate::PropagationSettings`]) take their defaults from here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Directory holding persisted tables. `None` keeps tables in memory only.
    pub table_directory: Option<PathBuf>,
    /// Encoding used when tables are written.
    pub table_encoding: TableEncoding,
    /// Number of nodes on the log-spaced energy axis.
    pub interpolation_nodes: usize,
    /// Upper energy of the table axis.
    pub table_upper_energy: f64,
}

impl Default for Config {
    fn default() -> Self {
        Self::new()
    }
}

impl Config {
    /// Create a new configuration with default values
    pub fn new() -> Self {
        Config {
            table_directory: default_table_directory(),
            table_encoding: TableEncoding::Binary,
            interpolation_nodes: DEFAULT_INTERPOLATION_NODES,
            table_upper_energy: BIG_ENERGY,
        }
    }

    /// Configuration that never touches the filesystem
    pub fn in_memory() -> Self {
        Config {
            table_directory: None,
            ..Config::new()
        }
    }

    /// Set the table directory; `None` disables persistence
    pub fn set_table_directory<P: AsRef<Path>>(&mut self, path: Option<P>) {
        self.table_directory = path.map(|p| p.as_ref().to_path_buf());
    }

    /// Select the encoding by keyword ("binary" or "text")
    pub fn set_table_encoding(&mut self, keyword: &str) -> Result<(), PropagationError> {
        const ACCEPTABLE_KEYWORDS: &[&str] = &["binary", "text"];
        self.table_encoding = match keyword {
            "binary" => TableEncoding::Binary,
            "text" => TableEncoding::Text,
            other => {
                return Err(PropagationError::InvalidConfiguration(format!(
                    "invalid table encoding '{}'. Acceptable keywords are: {}",
                    other,
                    ACCEPTABLE_KEYWORDS.join(", ")
                )))
            }
        };
        Ok(())
    }

    /// Set the number of axis nodes (at least 4 are needed for a cubic fit)
    pub fn set_interpolation_nodes(&mut self, nodes: usize) -> Result<(), PropagationError> {
        if nodes < 4 {
            return Err(PropagationError::InvalidConfiguration(format!(
                "interpolation needs at least 4 nodes, got {}",
                nodes
            )));
        }
        self.interpolation_nodes = nodes;
        Ok(())
    }

    /// Reset everything to the defaults
    pub fn clear(&mut self) {
        *self = Config::new();
    }

    /// Get the global configuration instance
    pub fn global() -> std::sync::MutexGuard<'static, Self> {
        CONFIG
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// `~/.cache/yapc/tables`, or `None` when no home directory is known.
pub fn default_table_directory() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(".cache").join("yapc").join("tables"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::new();
        assert_eq!(config.table_encoding, TableEncoding::Binary);
        assert_eq!(config.interpolation_nodes, DEFAULT_INTERPOLATION_NODES);
        assert_eq!(config.table_upper_energy, BIG_ENERGY);
    }

    #[test]
    fn test_in_memory_has_no_directory() {
        assert!(Config::in_memory().table_directory.is_none());
    }

    #[test]
    fn test_set_table_encoding_keywords() {
        let mut config = Config::new();
        config.set_table_encoding("text").unwrap();
        assert_eq!(config.table_encoding, TableEncoding::Text);
        config.set_table_encoding("binary").unwrap();
        assert_eq!(config.table_encoding, TableEncoding::Binary);
    }

    #[test]
    fn test_set_table_encoding_invalid_keyword() {
        let mut config = Config::new();
        let err = config.set_table_encoding("yaml").unwrap_err();
        assert!(err.to_string().contains("Acceptable keywords are: binary, text"));
    }

    #[test]
    fn test_set_interpolation_nodes_rejects_tiny_axis() {
        let mut config = Config::new();
        assert!(config.set_interpolation_nodes(3).is_err());
        config.set_interpolation_nodes(500).unwrap();
        assert_eq!(config.interpolation_nodes, 500);
    }

    #[test]
    fn test_set_table_directory_and_clear() {
        let mut config = Config::new();
        config.set_table_directory(Some("/tmp/yapc-tables"));
        assert_eq!(config.table_directory, Some(PathBuf::from("/tmp/yapc-tables")));
        config.set_table_directory::<&str>(None);
        assert!(config.table_directory.is_none());
        config.clear();
        assert_eq!(config, Config::new());
    }

    #[test]
    fn test_encoding_extension() {
        assert_eq!(TableEncoding::Binary.extension(), "bin");
        assert_eq!(TableEncoding::Text.extension(), "json");
    }
}
