//! Engine configuration, passed explicitly to the components that need it.

use serde::{Deserialize, Serialize};

use crate::error::RecurrenceError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// How many occurrences of a replacement rule are materialized as
    /// lessons when a series is split.
    pub materialize_limit: u16,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            materialize_limit: 52,
        }
    }
}

impl EngineConfig {
    /// Parse a JSON document; missing fields take their defaults.
    ///
    /// # Errors
    ///
    /// Returns [`RecurrenceError::InvalidConfig`] if the JSON is malformed or
    /// `materialize_limit` is zero.
    pub fn from_json(json: &str) -> Result<Self, RecurrenceError> {
        let config: Self =
            serde_json::from_str(json).map_err(|e| RecurrenceError::InvalidConfig(e.to_string()))?;
        if config.materialize_limit == 0 {
            return Err(RecurrenceError::InvalidConfig(
                "materialize_limit must be at least 1".to_string(),
            ));
        }
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_document_uses_defaults() {
        assert_eq!(EngineConfig::from_json("{}").unwrap(), EngineConfig::default());
    }

    #[test]
    fn test_override_limit() {
        let config = EngineConfig::from_json(r#"{"materialize_limit": 10}"#).unwrap();
        assert_eq!(config.materialize_limit, 10);
    }

    #[test]
    fn test_zero_limit_rejected() {
        let err = EngineConfig::from_json(r#"{"materialize_limit": 0}"#).unwrap_err();
        assert!(err.to_string().contains("Invalid configuration"), "got: {err}");
    }

    #[test]
    fn test_malformed_json_rejected() {
        assert!(EngineConfig::from_json("not json").is_err());
    }
}
