use serde::{Deserialize, Serialize};

use crate::errors::{Result, UnitasError};

/// Tunables of a Unit-of-Work scope
///
/// Missing keys in a JSON document fall back to the defaults, so an empty
/// object is a valid configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct UnitOfWorkConfig {
    /// Version written on insert for versioned entity types
    pub initial_version: i64,
    /// Rebuild link-collection change logs from storage after a failed flush
    pub resync_collections_on_failure: bool,
    /// Print field values in debug logs instead of redacting them
    pub log_field_values: bool,
}

impl Default for UnitOfWorkConfig {
    fn default() -> Self {
        Self {
            initial_version: 1,
            resync_collections_on_failure: true,
            log_field_values: false,
        }
    }
}

impl UnitOfWorkConfig {
    /// Parse and validate a JSON configuration document
    ///
    /// # Errors
    ///
    /// Returns `Serialization` for malformed JSON and `Configuration` for
    /// values that fail validation.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: UnitOfWorkConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// # Errors
    ///
    /// Returns `Configuration` when `initial_version` is negative.
    pub fn validate(&self) -> Result<()> {
        if self.initial_version < 0 {
            return Err(UnitasError::Configuration {
                reason: format!(
                    "initial_version must be >= 0, got {}",
                    self.initial_version
                ),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = UnitOfWorkConfig::default();
        assert_eq!(config.initial_version, 1);
        assert!(config.resync_collections_on_failure);
        assert!(!config.log_field_values);
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config = UnitOfWorkConfig::from_json(r#"{"initial_version": 0}"#).unwrap();
        assert_eq!(config.initial_version, 0);
        assert!(config.resync_collections_on_failure);
    }

    #[test]
    fn test_negative_version_rejected() {
        let err = UnitOfWorkConfig::from_json(r#"{"initial_version": -1}"#).unwrap_err();
        assert!(matches!(err, UnitasError::Configuration { .. }));
    }

    #[test]
    fn test_unknown_key_rejected() {
        let err = UnitOfWorkConfig::from_json(r#"{"detach_all": true}"#).unwrap_err();
        assert!(matches!(err, UnitasError::Serialization { .. }));
    }
}
