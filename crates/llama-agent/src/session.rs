use futures::StreamExt;
use llama_client::ReplicateClient;
use llama_config::ChatConfig;
use llama_conversation::{render_prompt, Conversation};
use llama_core::{ChatError, InferenceBackend, ModelSelector, Result, Role, SamplingConfig};
use std::sync::Arc;
use tracing::{debug, error, info, instrument};

use crate::retry::{request_completion, RetryPolicy};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnState {
    Idle,
    AwaitingResponse,
    /// The last turn ended in an error; the session still accepts input.
    Failed,
}

/// Progress reported while a turn is running
#[derive(Debug, Clone, Copy)]
pub enum TurnEvent<'a> {
    Fragment(&'a str),
    RetryWarning { attempt: usize, max_attempts: usize },
    Failed(&'a ChatError),
}

#[derive(Debug)]
pub enum TurnOutcome {
    Completed { response: String },
    Failed { error: ChatError },
}

impl TurnOutcome {
    pub fn is_completed(&self) -> bool {
        matches!(self, TurnOutcome::Completed { .. })
    }

    pub fn response(&self) -> Option<&str> {
        match self {
            TurnOutcome::Completed { response } => Some(response),
            TurnOutcome::Failed { .. } => None,
        }
    }

    /// Text the shell shows for this outcome
    pub fn user_message(&self) -> String {
        match self {
            TurnOutcome::Completed { response } => response.clone(),
            TurnOutcome::Failed { error: error @ ChatError::ExhaustedRetries { .. } } => {
                format!("🛑 {error}")
            }
            TurnOutcome::Failed { error } => format!("Turn failed: {error}"),
        }
    }
}

/// One chat session: owns the conversation and runs turns against the backend.
pub struct ChatSession {
    backend: Arc<dyn InferenceBackend>,
    conversation: Conversation,
    sampling: SamplingConfig,
    model: ModelSelector,
    retry: RetryPolicy,
    state: TurnState,
}

impl ChatSession {
    pub fn new(
        backend: Arc<dyn InferenceBackend>,
        greeting: impl Into<String>,
        sampling: SamplingConfig,
        model: ModelSelector,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            backend,
            conversation: Conversation::new(greeting),
            sampling,
            model,
            retry,
            state: TurnState::Idle,
        }
    }

    /// Build a session talking to Replicate with the configured token
    pub fn from_config(config: &ChatConfig) -> Result<Self> {
        let client = ReplicateClient::from_config(config)?;
        Self::with_backend(config, Arc::new(client))
    }

    pub fn with_backend(config: &ChatConfig, backend: Arc<dyn InferenceBackend>) -> Result<Self> {
        let sampling = config.sampling.to_sampling_config()?;
        info!("Starting chat session with {}", config.model);
        Ok(Self::new(
            backend,
            config.app.greeting.clone(),
            sampling,
            config.model,
            RetryPolicy::from(&config.retry),
        ))
    }

    /// Run one turn: record the input, stream the reply and commit it.
    ///
    /// Failures never escape as errors. They are reported through `on_event`,
    /// returned as [`TurnOutcome::Failed`], and leave the user turn in history.
    #[instrument(skip(self, input, on_event), fields(model = %self.model))]
    pub async fn submit(
        &mut self,
        input: &str,
        mut on_event: impl FnMut(TurnEvent<'_>) + Send,
    ) -> TurnOutcome {
        self.state = TurnState::AwaitingResponse;
        self.conversation.append_turn(Role::User, input);
        let prompt = render_prompt(&self.conversation, input);
        debug!("Rendered prompt of {} chars", prompt.len());

        match self.generate(&prompt, &mut on_event).await {
            Ok(response) => {
                self.conversation.append_turn(Role::Assistant, response.clone());
                self.state = TurnState::Idle;
                info!("Turn completed ({} chars)", response.len());
                TurnOutcome::Completed { response }
            }
            Err(error) => {
                error!("Turn failed: {}", error);
                on_event(TurnEvent::Failed(&error));
                self.state = TurnState::Failed;
                TurnOutcome::Failed { error }
            }
        }
    }

    async fn generate(
        &self,
        prompt: &str,
        on_event: &mut (impl FnMut(TurnEvent<'_>) + Send),
    ) -> Result<String> {
        let mut fragments = request_completion(
            self.backend.as_ref(),
            prompt,
            &self.sampling,
            self.model.model_id(),
            &self.retry,
            |attempt, max_attempts| on_event(TurnEvent::RetryWarning { attempt, max_attempts }),
        )
        .await?;

        // The turn is committed only once the stream is fully drained
        let mut response = String::new();
        while let Some(fragment) = fragments.next().await {
            let fragment = fragment?;
            on_event(TurnEvent::Fragment(&fragment));
            response.push_str(&fragment);
        }
        Ok(response)
    }

    /// Drop the whole history and return to the seeded greeting
    pub fn reset(&mut self) {
        self.conversation.reset();
        self.state = TurnState::Idle;
    }

    pub fn conversation(&self) -> &Conversation {
        &self.conversation
    }

    pub fn state(&self) -> TurnState {
        self.state
    }

    pub fn model(&self) -> ModelSelector {
        self.model
    }

    pub fn set_model(&mut self, model: ModelSelector) {
        info!("Switching model to {}", model);
        self.model = model;
    }

    pub fn sampling(&self) -> SamplingConfig {
        self.sampling
    }

    /// Sampling for the following turns; the conversation is kept
    pub fn set_sampling(&mut self, sampling: SamplingConfig) {
        info!(
            "Sampling set to temperature {} top_p {} max_length {}",
            sampling.temperature(),
            sampling.top_p(),
            sampling.max_length()
        );
        self.sampling = sampling;
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        self.retry
    }
}
