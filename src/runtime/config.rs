//! Runtime configuration

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Default bound on update rounds per applied update
const DEFAULT_MAX_INVALIDATION_ROUNDS: usize = 8;

/// Runtime configuration
///
/// Every field has a default, so a JSON file only needs to list the settings
/// it changes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Log a warning when a disposed module instance requires another module
    pub warn_on_non_hot_import: bool,
    /// Upper bound on update rounds per update, counting the rounds that
    /// replace modules which called `hot.invalidate()`
    pub max_invalidation_rounds: usize,
    /// Fall back to a full restart when an update cannot be applied
    pub restart_on_apply_failure: bool,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            warn_on_non_hot_import: true,
            max_invalidation_rounds: DEFAULT_MAX_INVALIDATION_ROUNDS,
            restart_on_apply_failure: true,
        }
    }
}

impl RuntimeConfig {
    /// Parse a configuration from JSON
    pub fn from_json(json: &str) -> Result<Self> {
        let config: RuntimeConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Load a configuration file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("failed to read {}: {}", path.display(), e)))?;
        Self::from_json(&json)
    }

    fn validate(&self) -> Result<()> {
        if self.max_invalidation_rounds == 0 {
            return Err(Error::Config(
                "max_invalidation_rounds must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_partial_json_keeps_defaults() {
        let config = RuntimeConfig::from_json(r#"{ "restart_on_apply_failure": false }"#).unwrap();
        assert!(!config.restart_on_apply_failure);
        assert!(config.warn_on_non_hot_import);
        assert_eq!(config.max_invalidation_rounds, DEFAULT_MAX_INVALIDATION_ROUNDS);
    }

    #[test]
    fn test_zero_rounds_rejected() {
        let err = RuntimeConfig::from_json(r#"{ "max_invalidation_rounds": 0 }"#).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_from_file() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, r#"{{ "max_invalidation_rounds": 3 }}"#).unwrap();

        let config = RuntimeConfig::from_file(file.path()).unwrap();
        assert_eq!(config.max_invalidation_rounds, 3);
    }

    #[test]
    fn test_missing_file() {
        let err = RuntimeConfig::from_file("/definitely/not/here.json").unwrap_err();
        assert!(err.to_string().contains("failed to read"));
    }
}
