//! Settings errors.

use thiserror::Error;

/// Why settings could not be loaded.
#[derive(Debug, Error)]
pub enum SettingsError {
    /// The settings file exists but could not be read.
    #[error("cannot read settings file: {0}")]
    Io(#[from] std::io::Error),

    /// The settings file is not valid JSON, or a field has the wrong type.
    #[error("malformed settings: {0}")]
    Json(#[from] serde_json::Error),

    /// A value parsed but the server cannot run with it.
    #[error("invalid settings value: {0}")]
    InvalidValue(String),
}

/// Result alias for this crate.
pub type Result<T> = std::result::Result<T, SettingsError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_error_converts() {
        let err: SettingsError = serde_json::from_str::<serde_json::Value>("{")
            .unwrap_err()
            .into();
        assert!(err.to_string().starts_with("malformed settings:"));
    }

    #[test]
    fn invalid_value_display() {
        let err = SettingsError::InvalidValue("hub.channelCapacity must be at least 1".into());
        assert_eq!(
            err.to_string(),
            "invalid settings value: hub.channelCapacity must be at least 1"
        );
    }
}
