use crate::defaults;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Top-level `earshot` configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct Config {
    pub model: ModelConfig,
    pub log: LogConfig,
    pub commands: CommandConfig,
}

/// Model asset configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ModelConfig {
    /// Asset directory name of the acoustic model
    pub asset: String,
    /// Cache directory name the asset is unpacked into
    pub cache_key: String,
    /// Where model assets live (defaults to the data dir)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub models_dir: Option<PathBuf>,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LogConfig {
    /// `tracing` filter directive, e.g. "info" or "earshot=debug"
    pub level: String,
}

/// Voice command configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct CommandConfig {
    /// Words that arm command routing. Empty routes every final.
    pub wake_words: Vec<String>,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            asset: defaults::MODEL_ASSET.to_string(),
            cache_key: defaults::MODEL_CACHE_KEY.to_string(),
            models_dir: None,
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: defaults::LOG_LEVEL.to_string(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    ///
    /// Returns an error if the file contains invalid TOML.
    /// Missing fields will use default values.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let contents = fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Like [`Config::load`], but a missing file yields the defaults.
    ///
    /// Invalid TOML is still an error.
    pub fn load_or_default(path: &Path) -> anyhow::Result<Self> {
        match Self::load(path) {
            Ok(config) => Ok(config),
            Err(e) => {
                let missing = e
                    .downcast_ref::<std::io::Error>()
                    .is_some_and(|io_err| io_err.kind() == std::io::ErrorKind::NotFound);
                if missing {
                    Ok(Self::default())
                } else {
                    Err(e.context(format!("Failed to load config from {}", path.display())))
                }
            }
        }
    }

    /// Apply environment variable overrides
    ///
    /// Supported environment variables:
    /// - EARSHOT_MODEL → model.asset
    /// - EARSHOT_MODELS_DIR → model.models_dir
    /// - EARSHOT_LOG → log.level
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(asset) = std::env::var("EARSHOT_MODEL")
            && !asset.is_empty()
        {
            self.model.asset = asset;
        }

        if let Ok(dir) = std::env::var("EARSHOT_MODELS_DIR")
            && !dir.is_empty()
        {
            self.model.models_dir = Some(PathBuf::from(dir));
        }

        if let Ok(level) = std::env::var("EARSHOT_LOG")
            && !level.is_empty()
        {
            self.log.level = level;
        }

        self
    }

    /// Render the configuration as TOML
    pub fn to_toml(&self) -> anyhow::Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// `earshot/config.toml` under the platform config dir
    /// (`~/.config` on Linux), or the working directory if there is none.
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("earshot")
            .join("config.toml")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::sync::Mutex;
    use tempfile::NamedTempFile;

    // Mutex to serialize tests that modify environment variables
    static ENV_LOCK: Mutex<()> = Mutex::new(());

    // SAFETY: These helpers are only used in tests with ENV_LOCK held,
    // ensuring no concurrent access to environment variables.
    fn set_env(key: &str, value: &str) {
        unsafe { std::env::set_var(key, value) }
    }

    fn remove_env(key: &str) {
        unsafe { std::env::remove_var(key) }
    }

    fn clear_earshot_env() {
        remove_env("EARSHOT_MODEL");
        remove_env("EARSHOT_MODELS_DIR");
        remove_env("EARSHOT_LOG");
    }

    #[test]
    fn test_default_config_has_correct_values() {
        let config = Config::default();

        assert_eq!(config.model.asset, "vosk-model-small-en-us-0.15");
        assert_eq!(config.model.cache_key, "model");
        assert_eq!(config.model.models_dir, None);
        assert_eq!(config.log.level, "info");
        assert!(config.commands.wake_words.is_empty());
    }

    #[test]
    fn test_load_from_toml_file() {
        let toml_content = r#"
            [model]
            asset = "vosk-model-en-us-0.22"
            cache_key = "model-large"
            models_dir = "/opt/models"

            [log]
            level = "earshot=debug"

            [commands]
            wake_words = ["nova", "hey nova"]
        "#;

        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(toml_content.as_bytes()).unwrap();

        let config = Config::load(temp_file.path()).unwrap();

        assert_eq!(config.model.asset, "vosk-model-en-us-0.22");
        assert_eq!(config.model.cache_key, "model-large");
        assert_eq!(config.model.models_dir, Some(PathBuf::from("/opt/models")));
        assert_eq!(config.log.level, "earshot=debug");
        assert_eq!(config.commands.wake_words, vec!["nova", "hey nova"]);
    }

    #[test]
    fn test_load_partial_config_uses_defaults() {
        let toml_content = r#"
            [commands]
            wake_words = ["computer"]
        "#;

        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(toml_content.as_bytes()).unwrap();

        let config = Config::load(temp_file.path()).unwrap();

        assert_eq!(config.commands.wake_words, vec!["computer"]);
        assert_eq!(config.model, ModelConfig::default());
        assert_eq!(config.log, LogConfig::default());
    }

    #[test]
    fn test_env_override_model() {
        let _lock = ENV_LOCK.lock().unwrap();
        clear_earshot_env();

        set_env("EARSHOT_MODEL", "vosk-model-de-0.21");
        let config = Config::default().with_env_overrides();

        assert_eq!(config.model.asset, "vosk-model-de-0.21");
        assert_eq!(config.model.cache_key, "model"); // Not overridden

        clear_earshot_env();
    }

    #[test]
    fn test_env_override_all() {
        let _lock = ENV_LOCK.lock().unwrap();
        clear_earshot_env();

        set_env("EARSHOT_MODEL", "vosk-model-fr-0.22");
        set_env("EARSHOT_MODELS_DIR", "/srv/models");
        set_env("EARSHOT_LOG", "debug");

        let config = Config::default().with_env_overrides();

        assert_eq!(config.model.asset, "vosk-model-fr-0.22");
        assert_eq!(config.model.models_dir, Some(PathBuf::from("/srv/models")));
        assert_eq!(config.log.level, "debug");

        clear_earshot_env();
    }

    #[test]
    fn test_env_override_empty_string_ignored() {
        let _lock = ENV_LOCK.lock().unwrap();
        clear_earshot_env();

        set_env("EARSHOT_MODEL", "");
        let config = Config::default().with_env_overrides();

        assert_eq!(config.model.asset, defaults::MODEL_ASSET);

        clear_earshot_env();
    }

    #[test]
    fn test_invalid_toml_returns_error() {
        let invalid_toml = r#"
            [model
            asset = "broken
        "#;

        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(invalid_toml.as_bytes()).unwrap();

        assert!(Config::load(temp_file.path()).is_err());
    }

    #[test]
    fn test_load_or_default_returns_default_for_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let missing_path = dir.path().join("nonexistent.toml");

        let config = Config::load_or_default(&missing_path).unwrap();

        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_load_or_default_errors_on_invalid_toml() {
        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(b"[log\nlevel = ").unwrap();

        let err = Config::load_or_default(temp_file.path()).unwrap_err();

        assert!(err.to_string().contains("Failed to load config"));
    }

    #[test]
    fn test_to_toml_roundtrips_through_load() {
        let mut config = Config::default();
        config.commands.wake_words = vec!["nova".to_string()];

        let rendered = config.to_toml().unwrap();
        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(rendered.as_bytes()).unwrap();

        assert_eq!(Config::load(temp_file.path()).unwrap(), config);
    }

    #[test]
    fn test_default_path_ends_with_config_toml() {
        let path = Config::default_path();
        let path_str = path.to_string_lossy();

        assert!(path_str.contains("earshot"));
        assert!(path_str.ends_with("config.toml"));
    }
}
