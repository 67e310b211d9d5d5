//! Error types for earshot.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum EarshotError {
    // Configuration errors
    #[error("Configuration file not found at {path}")]
    ConfigFileNotFound { path: String },

    #[error("Failed to parse configuration: {message}")]
    ConfigParse { message: String },

    #[error("Configuration error: {0}")]
    Config(#[from] toml::de::Error),

    // Model provisioning errors
    #[error("Model asset '{asset_id}' not found at {path}")]
    ModelNotFound { asset_id: String, path: String },

    #[error("Model provisioning failed: {message}")]
    ProvisionFailed { message: String },

    #[error("Model release failed: {message}")]
    ModelRelease { message: String },

    // Recognition engine errors
    #[error("Recognition engine failed to start: {message}")]
    EngineStart { message: String },

    #[error("Recognition engine error: {message}")]
    EngineRuntime { message: String },

    #[error("Recognition engine teardown failed: {message}")]
    EngineTeardown { message: String },

    // Engine script errors
    #[error("Invalid engine script at line {line}: {message}")]
    ScriptParse { line: usize, message: String },

    // General I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // Generic error for cases not covered above
    #[error("{0}")]
    Other(String),
}

// Type alias for convenience
pub type Result<T> = std::result::Result<T, EarshotError>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    #[test]
    fn test_config_file_not_found_display() {
        let error = EarshotError::ConfigFileNotFound {
            path: "/path/to/config.toml".to_string(),
        };
        assert_eq!(
            error.to_string(),
            "Configuration file not found at /path/to/config.toml"
        );
    }

    #[test]
    fn test_model_not_found_display() {
        let error = EarshotError::ModelNotFound {
            asset_id: "vosk-model-small-en-us-0.15".to_string(),
            path: "/data/models/vosk-model-small-en-us-0.15".to_string(),
        };
        assert_eq!(
            error.to_string(),
            "Model asset 'vosk-model-small-en-us-0.15' not found at /data/models/vosk-model-small-en-us-0.15"
        );
    }

    #[test]
    fn test_provision_failed_display() {
        let error = EarshotError::ProvisionFailed {
            message: "archive truncated".to_string(),
        };
        assert_eq!(
            error.to_string(),
            "Model provisioning failed: archive truncated"
        );
    }

    #[test]
    fn test_engine_start_display() {
        let error = EarshotError::EngineStart {
            message: "audio device busy".to_string(),
        };
        assert_eq!(
            error.to_string(),
            "Recognition engine failed to start: audio device busy"
        );
    }

    #[test]
    fn test_engine_runtime_display() {
        let error = EarshotError::EngineRuntime {
            message: "decoder stalled".to_string(),
        };
        assert_eq!(error.to_string(), "Recognition engine error: decoder stalled");
    }

    #[test]
    fn test_script_parse_display() {
        let error = EarshotError::ScriptParse {
            line: 3,
            message: "missing field `steps`".to_string(),
        };
        assert_eq!(
            error.to_string(),
            "Invalid engine script at line 3: missing field `steps`"
        );
    }

    #[test]
    fn test_other_display() {
        let error = EarshotError::Other("unexpected error".to_string());
        assert_eq!(error.to_string(), "unexpected error");
    }

    #[test]
    fn test_from_io_error() {
        let io_error = io::Error::new(io::ErrorKind::NotFound, "file not found");
        let error: EarshotError = io_error.into();
        assert!(error.to_string().contains("file not found"));
    }

    #[test]
    fn test_from_toml_error() {
        let toml_str = "invalid = toml = syntax";
        let toml_error = toml::from_str::<toml::Value>(toml_str).unwrap_err();
        let error: EarshotError = toml_error.into();
        assert!(error.to_string().contains("Configuration error"));
    }

    #[test]
    fn test_error_source_chain_io() {
        let io_error = io::Error::new(io::ErrorKind::PermissionDenied, "access denied");
        let error: EarshotError = io_error.into();

        let error_trait: &dyn std::error::Error = &error;
        assert!(error_trait.source().is_some());
    }

    #[test]
    fn test_error_is_send_and_sync() {
        fn assert_send<T: Send>() {}
        fn assert_sync<T: Sync>() {}

        // Errors cross from engine threads to the delivery thread
        assert_send::<EarshotError>();
        assert_sync::<EarshotError>();
    }
}
