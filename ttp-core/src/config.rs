//! Mapper configuration.

use std::path::PathBuf;
use thiserror::Error;

/// Errors building a configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("GEMINI_API_KEY environment variable not set")]
    MissingApiKey,

    #[error("invalid value for {name}: {value:?}")]
    InvalidValue { name: &'static str, value: String },
}

/// Configuration for a mapping run.
///
/// Built once at startup and passed down explicitly.
#[derive(Debug, Clone)]
pub struct MapperConfig {
    pub api_key: String,
    pub model: String,
    /// Draft/verify attempts per run.
    pub max_attempts: usize,
    pub drafter_temperature: f32,
    pub verifier_temperature: f32,
    pub max_output_tokens: usize,
    /// Ground generation with Google Search.
    pub search_grounding: bool,
    pub data_dir: PathBuf,
    pub technique_file: String,
    pub role_file: String,
}

impl MapperConfig {
    pub const DEFAULT_MODEL: &'static str = "gemini-2.5-flash";

    /// Create a config with defaults and the given API key.
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            model: Self::DEFAULT_MODEL.to_string(),
            max_attempts: 5,
            drafter_temperature: 0.4,
            verifier_temperature: 0.0,
            max_output_tokens: 8192,
            search_grounding: false,
            data_dir: PathBuf::from("data"),
            technique_file: "mitre_simple.json".to_string(),
            role_file: "nice_simple.json".to_string(),
        }
    }

    /// Read `GEMINI_API_KEY`, `TTP_MODEL`, `TTP_MAX_ATTEMPTS` and `TTP_DATA_DIR`.
    pub fn from_env() -> Result<Self, ConfigError> {
        let api_key = std::env::var("GEMINI_API_KEY")
            .ok()
            .filter(|k| !k.trim().is_empty())
            .ok_or(ConfigError::MissingApiKey)?;

        let mut config = Self::new(api_key);

        if let Ok(model) = std::env::var("TTP_MODEL") {
            config = config.with_model(model);
        }
        if let Ok(value) = std::env::var("TTP_MAX_ATTEMPTS") {
            config = config.with_max_attempts(parse_attempts(&value)?);
        }
        if let Ok(dir) = std::env::var("TTP_DATA_DIR") {
            config = config.with_data_dir(dir);
        }

        Ok(config)
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// Set the attempt budget; values below 1 are raised to 1.
    pub fn with_max_attempts(mut self, attempts: usize) -> Self {
        self.max_attempts = attempts.max(1);
        self
    }

    pub fn with_data_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.data_dir = dir.into();
        self
    }

    pub fn with_search_grounding(mut self, enabled: bool) -> Self {
        self.search_grounding = enabled;
        self
    }

    pub fn with_temperatures(mut self, drafter: f32, verifier: f32) -> Self {
        self.drafter_temperature = drafter;
        self.verifier_temperature = verifier;
        self
    }

    pub fn technique_path(&self) -> PathBuf {
        self.data_dir.join(&self.technique_file)
    }

    pub fn role_path(&self) -> PathBuf {
        self.data_dir.join(&self.role_file)
    }
}

/// Parse an attempt budget, rejecting zero and non-numbers.
pub fn parse_attempts(value: &str) -> Result<usize, ConfigError> {
    match value.trim().parse::<usize>() {
        Ok(n) if n > 0 => Ok(n),
        _ => Err(ConfigError::InvalidValue {
            name: "TTP_MAX_ATTEMPTS",
            value: value.to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = MapperConfig::new("key");
        assert_eq!(config.model, "gemini-2.5-flash");
        assert_eq!(config.max_attempts, 5);
        assert_eq!(config.drafter_temperature, 0.4);
        assert_eq!(config.verifier_temperature, 0.0);
        assert!(!config.search_grounding);
        assert_eq!(config.technique_path(), PathBuf::from("data/mitre_simple.json"));
        assert_eq!(config.role_path(), PathBuf::from("data/nice_simple.json"));
    }

    #[test]
    fn test_builder() {
        let config = MapperConfig::new("key")
            .with_model("gemini-2.5-pro")
            .with_max_attempts(0)
            .with_data_dir("/tmp/kb")
            .with_search_grounding(true);
        assert_eq!(config.model, "gemini-2.5-pro");
        assert_eq!(config.max_attempts, 1);
        assert_eq!(config.role_path(), PathBuf::from("/tmp/kb/nice_simple.json"));
        assert!(config.search_grounding);
    }

    #[test]
    fn test_parse_attempts() {
        assert_eq!(parse_attempts(" 3 ").unwrap(), 3);
        assert!(parse_attempts("0").is_err());
        assert!(parse_attempts("five").is_err());
    }
}
