//! Error types for host-level configuration.

use serde::{Serialize, Serializer, ser::SerializeMap};
use thiserror::Error;

/// Configuration errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("Missing required configuration: {key}. {hint}")]
    MissingRequired { key: String, hint: String },

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

impl ConfigError {
    /// Stable discriminant used in serialized form.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::MissingRequired { .. } => "missing_required",
            Self::InvalidValue { .. } => "invalid_value",
        }
    }

    /// Environment variable the error refers to.
    pub fn key(&self) -> &str {
        match self {
            Self::MissingRequired { key, .. } | Self::InvalidValue { key, .. } => key,
        }
    }
}

impl Serialize for ConfigError {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(3))?;
        map.serialize_entry("kind", self.kind())?;
        map.serialize_entry("message", &self.to_string())?;
        map.serialize_entry("key", self.key())?;
        map.end()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serializes_kind_and_key() {
        let err = ConfigError::InvalidValue {
            key: "SIDECAR_PORT".to_string(),
            message: "must be a number".to_string(),
        };
        let json = serde_json::to_value(&err).unwrap();

        assert_eq!(json["kind"], "invalid_value");
        assert_eq!(json["key"], "SIDECAR_PORT");
        assert_eq!(
            json["message"],
            "Invalid configuration value for SIDECAR_PORT: must be a number"
        );
    }
}
