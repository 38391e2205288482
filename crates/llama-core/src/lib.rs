use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

pub const MIN_SAMPLING: f32 = 0.01;
pub const MAX_SAMPLING: f32 = 1.0;
pub const MIN_MAX_LENGTH: u32 = 20;
pub const MAX_MAX_LENGTH: u32 = 80;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    /// Speaker label used when a turn is rendered into a prompt.
    pub fn label(&self) -> &'static str {
        match self {
            Role::User => "User",
            Role::Assistant => "Assistant",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// One message of the conversation. Never mutated after creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Turn {
    role: Role,
    content: String,
}

impl Turn {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn content(&self) -> &str {
        &self.content
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SamplingConfig {
    temperature: f32,
    top_p: f32,
    max_length: u32,
    repetition_penalty: f32,
}

impl SamplingConfig {
    pub fn new(temperature: f32, top_p: f32, max_length: u32) -> Result<Self> {
        if !(MIN_SAMPLING..=MAX_SAMPLING).contains(&temperature) {
            return Err(ChatError::Config(format!(
                "Temperature must be between {MIN_SAMPLING} and {MAX_SAMPLING}, got {temperature}"
            )));
        }
        if !(MIN_SAMPLING..=MAX_SAMPLING).contains(&top_p) {
            return Err(ChatError::Config(format!(
                "top_p must be between {MIN_SAMPLING} and {MAX_SAMPLING}, got {top_p}"
            )));
        }
        if !(MIN_MAX_LENGTH..=MAX_MAX_LENGTH).contains(&max_length) {
            return Err(ChatError::Config(format!(
                "max_length must be between {MIN_MAX_LENGTH} and {MAX_MAX_LENGTH}, got {max_length}"
            )));
        }

        Ok(Self {
            temperature,
            top_p,
            max_length,
            repetition_penalty: 1.0,
        })
    }

    pub fn temperature(&self) -> f32 {
        self.temperature
    }

    pub fn top_p(&self) -> f32 {
        self.top_p
    }

    pub fn max_length(&self) -> u32 {
        self.max_length
    }

    pub fn repetition_penalty(&self) -> f32 {
        self.repetition_penalty
    }

    /// Copy with one named parameter replaced, validated like [`SamplingConfig::new`].
    ///
    /// Names: `temperature`, `top_p` (or `top-p`), `max_length` (or `max-length`).
    pub fn with_setting(&self, name: &str, value: &str) -> Result<Self> {
        let invalid = |e: String| ChatError::Config(format!("Invalid value '{value}' for {name}: {e}"));

        match name.to_ascii_lowercase().as_str() {
            "temperature" => {
                let temperature = value.parse::<f32>().map_err(|e| invalid(e.to_string()))?;
                Self::new(temperature, self.top_p, self.max_length)
            }
            "top_p" | "top-p" => {
                let top_p = value.parse::<f32>().map_err(|e| invalid(e.to_string()))?;
                Self::new(self.temperature, top_p, self.max_length)
            }
            "max_length" | "max-length" => {
                let max_length = value.parse::<u32>().map_err(|e| invalid(e.to_string()))?;
                Self::new(self.temperature, self.top_p, max_length)
            }
            other => Err(ChatError::Config(format!(
                "Unknown sampling parameter '{other}', expected temperature, top_p or max_length"
            ))),
        }
    }
}

impl Default for SamplingConfig {
    fn default() -> Self {
        Self {
            temperature: 0.1,
            top_p: 0.9,
            max_length: 50,
            repetition_penalty: 1.0,
        }
    }
}

/// Deserialized through [`FromStr`], so config files accept the same names as the CLI.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String")]
pub enum ModelSelector {
    #[default]
    #[serde(rename = "llama2-7b")]
    Llama2_7B,
    #[serde(rename = "llama2-13b")]
    Llama2_13B,
}

impl ModelSelector {
    pub const ALL: [ModelSelector; 2] = [ModelSelector::Llama2_7B, ModelSelector::Llama2_13B];

    pub fn model_id(&self) -> &'static str {
        match self {
            ModelSelector::Llama2_7B => {
                "a16z-infra/llama7b-v2-chat:4f0a4744c7295c024a1de15e1a63c880d3da035fa1f49bfd344fe076074c8eea"
            }
            ModelSelector::Llama2_13B => {
                "a16z-infra/llama13b-v2-chat:df7690f1994d94e96ad9d568eac121aecf50684a0b0963b25a41cc40061269e5"
            }
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            ModelSelector::Llama2_7B => "Llama2-7B",
            ModelSelector::Llama2_13B => "Llama2-13B",
        }
    }
}

impl fmt::Display for ModelSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.display_name())
    }
}

impl FromStr for ModelSelector {
    type Err = ChatError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "llama2-7b" | "7b" => Ok(ModelSelector::Llama2_7B),
            "llama2-13b" | "13b" => Ok(ModelSelector::Llama2_13B),
            other => Err(ChatError::Config(format!(
                "Unknown model '{other}', expected llama2-7b or llama2-13b"
            ))),
        }
    }
}

impl TryFrom<String> for ModelSelector {
    type Error = ChatError;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

/// Everything the remote model needs for a single prediction.
#[derive(Debug, Clone, PartialEq)]
pub struct PredictionRequest {
    pub model_id: String,
    pub prompt: String,
    pub sampling: SamplingConfig,
}

impl PredictionRequest {
    pub fn new(model_id: impl Into<String>, prompt: impl Into<String>, sampling: SamplingConfig) -> Self {
        Self {
            model_id: model_id.into(),
            prompt: prompt.into(),
            sampling,
        }
    }
}

/// Finite sequence of text fragments in arrival order. Consumed once.
pub type FragmentStream = BoxStream<'static, Result<String>>;

#[derive(Error, Debug)]
pub enum ChatError {
    #[error("Inference request timed out: {0}")]
    TransientTimeout(String),

    #[error("Unexpected inference error: {0}")]
    Inference(String),

    #[error("Failed to get a response after {attempts} attempts (exhausted retries)")]
    ExhaustedRetries { attempts: usize },

    #[error("No Replicate API token configured")]
    MissingApiToken,

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl ChatError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, ChatError::TransientTimeout(_))
    }
}

pub type Result<T> = std::result::Result<T, ChatError>;

/// Remote inference capability. Each call is exactly one attempt.
#[async_trait::async_trait]
pub trait InferenceBackend: Send + Sync {
    async fn start_prediction(&self, request: &PredictionRequest) -> Result<FragmentStream>;
}
