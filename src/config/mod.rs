use serde::Deserialize;
use url::Url;

/// Error type for configuration loading and validation.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("Config validation error: {0}")]
    Validation(String),
}

/// Chat endpoint configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    pub base_url: String,
    /// Environment variable holding the bearer key.
    pub api_key_env: String,
    pub model: String,
    pub timeout_secs: u64,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com/v1".to_string(),
            api_key_env: "OPENAI_API_KEY".to_string(),
            model: "gpt-4o-mini".to_string(),
            timeout_secs: 180,
        }
    }
}

/// Behavior knobs for the turn loop and tool execution.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FeaturesConfig {
    pub log_level: String,
    /// Upper bound on automatic tool-result follow-up requests per user turn.
    pub max_tool_turns: usize,
    pub shell: String,
    /// Cap applied to tool output before it re-enters the conversation.
    pub max_output_bytes: usize,
}

impl Default for FeaturesConfig {
    fn default() -> Self {
        Self {
            log_level: "INFO".to_string(),
            max_tool_turns: 16,
            shell: "/bin/sh".to_string(),
            max_output_bytes: 30_000,
        }
    }
}

/// Tokio runtime knobs. The default of one worker thread matches the
/// single-threaded cooperative scheduling the rest of the client assumes.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    pub worker_threads: Option<usize>,
}

/// Root application configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub api: ApiConfig,
    pub features: FeaturesConfig,
    pub runtime: RuntimeConfig,
}

/// Load configuration from a YAML file, falling back to defaults when the
/// file does not exist.
///
/// # Errors
///
/// Returns [`ConfigError`] when the file exists but cannot be read or
/// parsed, or when validation fails.
pub fn load_config(path: &str) -> Result<AppConfig, ConfigError> {
    let config = match std::fs::read_to_string(path) {
        Ok(raw) => serde_yaml::from_str(&raw)?,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => AppConfig::default(),
        Err(err) => return Err(ConfigError::Io(err)),
    };
    validate_config(&config)?;
    Ok(config)
}

fn validate_config(config: &AppConfig) -> Result<(), ConfigError> {
    if config.api.model.trim().is_empty() {
        return Err(ConfigError::Validation("api.model must be set".to_string()));
    }
    if Url::parse(&config.api.base_url).is_err() {
        return Err(ConfigError::Validation(format!(
            "api.base_url is not a valid URL: '{}'",
            config.api.base_url
        )));
    }
    if config.features.max_tool_turns == 0 {
        return Err(ConfigError::Validation(
            "features.max_tool_turns must be at least 1".to_string(),
        ));
    }
    if config.features.shell.trim().is_empty() {
        return Err(ConfigError::Validation(
            "features.shell must be set".to_string(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_pass_validation() {
        let config = AppConfig::default();
        assert!(validate_config(&config).is_ok());
        assert_eq!(config.features.max_tool_turns, 16);
        assert_eq!(config.runtime.worker_threads, None);
    }

    #[test]
    fn partial_yaml_fills_defaults() {
        let config: AppConfig = serde_yaml::from_str(
            "api:\n  model: test-model\nfeatures:\n  max_tool_turns: 4\n",
        )
        .expect("parse");
        assert_eq!(config.api.model, "test-model");
        assert_eq!(config.api.api_key_env, "OPENAI_API_KEY");
        assert_eq!(config.features.max_tool_turns, 4);
        assert_eq!(config.features.shell, "/bin/sh");
    }

    #[test]
    fn invalid_base_url_is_rejected() {
        let mut config = AppConfig::default();
        config.api.base_url = "not a url".to_string();
        assert!(matches!(
            validate_config(&config),
            Err(ConfigError::Validation(_))
        ));
    }

    #[test]
    fn zero_tool_turns_is_rejected() {
        let mut config = AppConfig::default();
        config.features.max_tool_turns = 0;
        assert!(validate_config(&config).is_err());
    }
}
