use llama_core::{ChatError, ModelSelector, Result, SamplingConfig};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

pub mod env_substitution;

pub const API_TOKEN_ENV: &str = "REPLICATE_API_TOKEN";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChatConfig {
    #[serde(default)]
    pub app: AppSettings,
    #[serde(default)]
    pub replicate: ReplicateSettings,
    #[serde(default)]
    pub model: ModelSelector,
    #[serde(default)]
    pub sampling: SamplingSettings,
    #[serde(default)]
    pub retry: RetrySettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppSettings {
    #[serde(default = "default_title")]
    pub title: String,
    #[serde(default = "default_greeting")]
    pub greeting: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplicateSettings {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_token: Option<String>,
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SamplingSettings {
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_top_p")]
    pub top_p: f32,
    #[serde(default = "default_max_length")]
    pub max_length: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrySettings {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: usize,
    #[serde(default = "default_backoff_secs")]
    pub backoff_secs: u64,
}

impl ChatConfig {
    pub fn from_yaml(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| ChatError::Config(format!("Failed to read config file: {e}")))?;

        Self::from_yaml_str(&content)
    }

    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let mut document: serde_yaml::Value = serde_yaml::from_str(yaml)
            .map_err(|e| ChatError::Config(format!("Failed to parse YAML: {e}")))?;

        env_substitution::substitute_env_vars(&mut document)?;

        // An empty file deserializes as null
        let config: ChatConfig = if document.is_null() {
            ChatConfig::default()
        } else {
            serde_yaml::from_value(document)
                .map_err(|e| ChatError::Config(format!("Invalid configuration: {e}")))?
        };

        config.validate()?;
        debug!("Configuration loaded for model {}", config.model);

        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.app.greeting.trim().is_empty() {
            return Err(ChatError::Config("Greeting cannot be empty".into()));
        }
        if self.replicate.base_url.trim().is_empty() {
            return Err(ChatError::Config("Replicate base URL cannot be empty".into()));
        }
        if self.retry.max_attempts == 0 {
            return Err(ChatError::Config("max_attempts must be at least 1".into()));
        }
        self.sampling.to_sampling_config()?;
        Ok(())
    }

    /// Token from the config file first, then the `REPLICATE_API_TOKEN` environment variable.
    pub fn resolve_api_token(&self) -> Result<String> {
        if let Some(token) = self.replicate.api_token.as_deref() {
            if !token.trim().is_empty() {
                return Ok(token.trim().to_string());
            }
        }

        match env::var(API_TOKEN_ENV) {
            Ok(token) if !token.trim().is_empty() => Ok(token.trim().to_string()),
            _ => Err(ChatError::MissingApiToken),
        }
    }

    pub fn default_config_path() -> PathBuf {
        let home_dir = env::var("HOME").unwrap_or_else(|_| ".".to_string());
        PathBuf::from(home_dir).join(".llama-chat").join("config.yaml")
    }
}

impl SamplingSettings {
    pub fn to_sampling_config(&self) -> Result<SamplingConfig> {
        SamplingConfig::new(self.temperature, self.top_p, self.max_length)
    }
}

impl ReplicateSettings {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

impl RetrySettings {
    pub fn backoff(&self) -> Duration {
        Duration::from_secs(self.backoff_secs)
    }
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            title: default_title(),
            greeting: default_greeting(),
        }
    }
}

impl Default for ReplicateSettings {
    fn default() -> Self {
        Self {
            api_token: None,
            base_url: default_base_url(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

impl Default for SamplingSettings {
    fn default() -> Self {
        Self {
            temperature: default_temperature(),
            top_p: default_top_p(),
            max_length: default_max_length(),
        }
    }
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            backoff_secs: default_backoff_secs(),
        }
    }
}

fn default_title() -> String { "🦙💬 AI Chatbot".to_string() }
fn default_greeting() -> String { "How may I assist you today?".to_string() }
fn default_base_url() -> String { "https://api.replicate.com".to_string() }
fn default_request_timeout_secs() -> u64 { 60 }
fn default_temperature() -> f32 { 0.1 }
fn default_top_p() -> f32 { 0.9 }
fn default_max_length() -> u32 { 50 }
fn default_max_attempts() -> usize { 3 }
fn default_backoff_secs() -> u64 { 2 }

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_parse_config() {
        let yaml = r#"
app:
  title: Test Bot
replicate:
  api_token: r8_test
  request_timeout_secs: 30
model: llama2-13b
sampling:
  temperature: 0.5
  top_p: 0.8
  max_length: 60
retry:
  max_attempts: 5
"#;

        let config = ChatConfig::from_yaml_str(yaml).unwrap();
        assert_eq!(config.app.title, "Test Bot");
        assert_eq!(config.app.greeting, "How may I assist you today?");
        assert_eq!(config.model, ModelSelector::Llama2_13B);
        assert_eq!(config.sampling.temperature, 0.5);
        assert_eq!(config.sampling.max_length, 60);
        assert_eq!(config.retry.max_attempts, 5);
        assert_eq!(config.retry.backoff_secs, 2);
        assert_eq!(config.replicate.request_timeout(), Duration::from_secs(30));
        assert_eq!(config.resolve_api_token().unwrap(), "r8_test");
    }

    #[test]
    fn test_defaults_match_sidebar() {
        let config = ChatConfig::from_yaml_str("").unwrap();
        assert_eq!(config.model, ModelSelector::Llama2_7B);
        assert_eq!(config.sampling.temperature, 0.1);
        assert_eq!(config.sampling.top_p, 0.9);
        assert_eq!(config.sampling.max_length, 50);
        assert_eq!(config.retry.max_attempts, 3);
        assert_eq!(config.retry.backoff(), Duration::from_secs(2));
        assert_eq!(config.replicate.base_url, "https://api.replicate.com");
    }

    #[test]
    fn test_validation() {
        let out_of_range = r#"
sampling:
  max_length: 200
"#;
        assert!(ChatConfig::from_yaml_str(out_of_range).is_err());

        let no_attempts = r#"
retry:
  max_attempts: 0
"#;
        assert!(ChatConfig::from_yaml_str(no_attempts).is_err());

        let bad_model = "model: gpt-4\n";
        assert!(ChatConfig::from_yaml_str(bad_model).is_err());
    }

    #[test]
    fn test_token_from_environment_substitution() {
        env::set_var("LLAMA_CHAT_CONFIG_TEST_TOKEN", "r8_from_env");
        let yaml = r#"
replicate:
  api_token: "${LLAMA_CHAT_CONFIG_TEST_TOKEN}"
"#;
        let config = ChatConfig::from_yaml_str(yaml).unwrap();
        assert_eq!(config.resolve_api_token().unwrap(), "r8_from_env");
        env::remove_var("LLAMA_CHAT_CONFIG_TEST_TOKEN");
    }

    // The only test touching REPLICATE_API_TOKEN, so the cases run in sequence
    #[test]
    fn test_token_resolution_order() {
        let mut config = ChatConfig::default();

        env::set_var(API_TOKEN_ENV, " r8_env ");
        assert_eq!(config.resolve_api_token().unwrap(), "r8_env");

        config.replicate.api_token = Some("   ".to_string());
        assert_eq!(config.resolve_api_token().unwrap(), "r8_env");

        config.replicate.api_token = Some("r8_file".to_string());
        assert_eq!(config.resolve_api_token().unwrap(), "r8_file");

        config.replicate.api_token = Some(String::new());
        env::remove_var(API_TOKEN_ENV);
        assert!(matches!(config.resolve_api_token(), Err(ChatError::MissingApiToken)));

        config.replicate.api_token = None;
        env::set_var(API_TOKEN_ENV, "");
        assert!(matches!(config.resolve_api_token(), Err(ChatError::MissingApiToken)));
        env::remove_var(API_TOKEN_ENV);
    }

    #[test]
    fn test_model_accepts_cli_names() {
        assert_eq!(ChatConfig::from_yaml_str("model: 7b\n").unwrap().model, ModelSelector::Llama2_7B);
        assert_eq!(
            ChatConfig::from_yaml_str("model: Llama2-13B\n").unwrap().model,
            ModelSelector::Llama2_13B
        );
    }

    #[test]
    fn test_from_yaml_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "app:\n  greeting: Hi there\nmodel: llama2-7b").unwrap();

        let config = ChatConfig::from_yaml(file.path()).unwrap();
        assert_eq!(config.app.greeting, "Hi there");
        assert!(ChatConfig::from_yaml("/nonexistent/llama-chat.yaml").is_err());
    }
}
