use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::config::{Config, TableEncoding};
use crate::error::PropagationError;

/// Default bound on consecutive no-progress retries before the loop gives up
/// on stochastic events.
pub const MAX_NO_EVENT_RETRIES: usize = 1000;

/// Per-propagator settings.
///
/// Missing JSON fields fall back to [`Default`], which reads the table
/// layout from the global [`Config`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PropagationSettings {
    pub interpolate: bool,
    pub exact_time: bool,
    pub continuous_randomization: bool,
    pub max_no_event_retries: usize,
    pub table_directory: Option<PathBuf>,
    pub table_encoding: TableEncoding,
    pub interpolation_nodes: usize,
    pub table_upper_energy: f64,
}

impl Default for PropagationSettings {
    fn default() -> Self {
        let config = Config::global();
        PropagationSettings {
            interpolate: false,
            exact_time: false,
            continuous_randomization: false,
            max_no_event_retries: MAX_NO_EVENT_RETRIES,
            table_directory: config.table_directory.clone(),
            table_encoding: config.table_encoding,
            interpolation_nodes: config.interpolation_nodes,
            table_upper_energy: config.table_upper_energy,
        }
    }
}

impl PropagationSettings {
    pub fn from_json_str(text: &str) -> Result<Self, PropagationError> {
        let settings: PropagationSettings = serde_json::from_str(text)?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self, PropagationError> {
        let text = fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    pub fn validate(&self) -> Result<(), PropagationError> {
        if self.interpolation_nodes < 4 {
            return Err(PropagationError::InvalidConfiguration(format!(
                "interpolation_nodes must be at least 4, got {}",
                self.interpolation_nodes
            )));
        }
        if !(self.table_upper_energy > 0.0) || !self.table_upper_energy.is_finite() {
            return Err(PropagationError::InvalidConfiguration(format!(
                "table_upper_energy must be finite and positive, got {}",
                self.table_upper_energy
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_settings_defaults() {
        let settings = PropagationSettings::default();
        assert!(!settings.interpolate);
        assert!(!settings.exact_time);
        assert!(!settings.continuous_randomization);
        assert_eq!(settings.max_no_event_retries, MAX_NO_EVENT_RETRIES);
        assert!(settings.interpolation_nodes >= 4);
    }

    #[test]
    fn test_settings_partial_json() {
        let settings = PropagationSettings::from_json_str(
            r#"{ "interpolate": true, "table_encoding": "text", "interpolation_nodes": 64 }"#,
        )
        .unwrap();
        assert!(settings.interpolate);
        assert_eq!(settings.table_encoding, TableEncoding::Text);
        assert_eq!(settings.interpolation_nodes, 64);
        assert_eq!(settings.max_no_event_retries, MAX_NO_EVENT_RETRIES);
    }

    #[test]
    fn test_settings_rejects_bad_values() {
        assert!(matches!(
            PropagationSettings::from_json_str(r#"{ "interpolation_nodes": 2 }"#),
            Err(PropagationError::InvalidConfiguration(_))
        ));
        assert!(matches!(
            PropagationSettings::from_json_str(r#"{ "table_encoding": "xml" }"#),
            Err(PropagationError::Json(_))
        ));
    }

    #[test]
    fn test_settings_from_file() {
        let dir = std::env::temp_dir().join(format!("yapc-settings-{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        let path = dir.join("settings.json");
        fs::write(&path, r#"{ "exact_time": true, "max_no_event_retries": 5 }"#).unwrap();
        let settings = PropagationSettings::from_json_file(&path).unwrap();
        assert!(settings.exact_time);
        assert_eq!(settings.max_no_event_retries, 5);
        fs::remove_dir_all(&dir).ok();
    }
}
