use async_trait::async_trait;
use llama_config::{ChatConfig, ReplicateSettings};
use llama_core::{ChatError, FragmentStream, InferenceBackend, PredictionRequest, Result};
use reqwest_eventsource::{retry, EventSource};
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{debug, info};

pub mod ui;
mod streaming;
pub use ui::{display_error, display_fragment, display_turn, display_warning, role_avatar};
use streaming::fragment_stream;

pub struct ReplicateClient {
    http: reqwest::Client,
    base_url: String,
    api_token: String,
    request_timeout: Duration,
}

/// Parsed form of `owner/name[:version]`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelRef<'a> {
    pub owner: &'a str,
    pub name: &'a str,
    pub version: Option<&'a str>,
}

impl<'a> ModelRef<'a> {
    pub fn parse(model_id: &'a str) -> Result<Self> {
        let (path, version) = match model_id.split_once(':') {
            Some((path, version)) if !version.is_empty() => (path, Some(version)),
            Some((path, _)) => (path, None),
            None => (model_id, None),
        };

        match path.split_once('/') {
            Some((owner, name)) if !owner.is_empty() && !name.is_empty() && !name.contains('/') => {
                Ok(Self { owner, name, version })
            }
            _ => Err(ChatError::Config(format!(
                "Invalid model identifier '{model_id}', expected owner/name[:version]"
            ))),
        }
    }
}

#[derive(Debug, Deserialize)]
struct Prediction {
    id: String,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    urls: PredictionUrls,
}

#[derive(Debug, Default, Deserialize)]
struct PredictionUrls {
    #[serde(default)]
    stream: Option<String>,
}

impl ReplicateClient {
    pub fn new(settings: &ReplicateSettings, api_token: impl Into<String>) -> Result<Self> {
        let request_timeout = settings.request_timeout();
        let http = reqwest::Client::builder()
            .connect_timeout(request_timeout)
            .build()
            .map_err(|e| ChatError::Config(format!("Failed to build HTTP client: {e}")))?;

        Ok(Self {
            http,
            base_url: settings.base_url.trim_end_matches('/').to_string(),
            api_token: api_token.into(),
            request_timeout,
        })
    }

    pub fn from_config(config: &ChatConfig) -> Result<Self> {
        let api_token = config.resolve_api_token()?;
        Self::new(&config.replicate, api_token)
    }

    /// Endpoint and JSON body for creating a streaming prediction
    pub fn build_prediction_request(&self, request: &PredictionRequest) -> Result<(String, Value)> {
        let model = ModelRef::parse(&request.model_id)?;
        let input = json!({
            "prompt": request.prompt,
            "temperature": request.sampling.temperature(),
            "top_p": request.sampling.top_p(),
            "max_length": request.sampling.max_length(),
            "repetition_penalty": request.sampling.repetition_penalty(),
        });

        Ok(match model.version {
            Some(version) => (
                format!("{}/v1/predictions", self.base_url),
                json!({ "version": version, "input": input, "stream": true }),
            ),
            None => (
                format!("{}/v1/models/{}/{}/predictions", self.base_url, model.owner, model.name),
                json!({ "input": input, "stream": true }),
            ),
        })
    }

    async fn create_prediction(&self, request: &PredictionRequest) -> Result<Prediction> {
        let (url, body) = self.build_prediction_request(request)?;
        debug!("Creating prediction at {} ({} prompt chars)", url, request.prompt.len());

        let response = self
            .http
            .post(&url)
            .bearer_auth(&self.api_token)
            .timeout(self.request_timeout)
            .json(&body)
            .send()
            .await
            .map_err(|e| map_transport_error("Failed to create prediction", e))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(ChatError::Inference(format!(
                "Replicate request failed with status {status}: {body}"
            )));
        }

        response
            .json::<Prediction>()
            .await
            .map_err(|e| map_transport_error("Failed to read prediction", e))
    }

    fn open_stream(&self, stream_url: &str) -> Result<EventSource> {
        let request = self
            .http
            .get(stream_url)
            .bearer_auth(&self.api_token)
            .header("Cache-Control", "no-store");

        let mut source = EventSource::new(request)
            .map_err(|e| ChatError::Inference(format!("Failed to open output stream: {e}")))?;
        // A finished prediction must not be replayed by a reconnect
        source.set_retry_policy(Box::new(retry::Never));
        Ok(source)
    }
}

#[async_trait]
impl InferenceBackend for ReplicateClient {
    async fn start_prediction(&self, request: &PredictionRequest) -> Result<FragmentStream> {
        let prediction = self.create_prediction(request).await?;
        info!(
            "Prediction {} created (status: {})",
            prediction.id,
            prediction.status.as_deref().unwrap_or("unknown")
        );

        let stream_url = prediction.urls.stream.ok_or_else(|| {
            ChatError::Inference(format!("Prediction {} has no stream URL", prediction.id))
        })?;

        let source = self.open_stream(&stream_url)?;
        Ok(fragment_stream(source, self.request_timeout))
    }
}

pub(crate) fn map_transport_error(context: &str, error: reqwest::Error) -> ChatError {
    if error.is_timeout() {
        ChatError::TransientTimeout(format!("{context}: {error}"))
    } else {
        ChatError::Inference(format!("{context}: {error}"))
    }
}
