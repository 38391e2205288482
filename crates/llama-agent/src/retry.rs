use llama_config::RetrySettings;
use llama_core::{ChatError, FragmentStream, InferenceBackend, PredictionRequest, Result, SamplingConfig};
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first one
    pub max_attempts: usize,
    /// Fixed pause before each further attempt
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: Duration::from_secs(2),
        }
    }
}

impl From<&RetrySettings> for RetryPolicy {
    fn from(settings: &RetrySettings) -> Self {
        Self {
            max_attempts: settings.max_attempts,
            backoff: settings.backoff(),
        }
    }
}

/// Start a streamed completion, retrying only on transient timeouts.
///
/// Every timeout is logged and passed to `on_warning` as `(attempt, max_attempts)`.
/// The backoff pause happens only when another attempt follows. Any other failure
/// is returned immediately; running out of attempts yields
/// [`ChatError::ExhaustedRetries`].
pub async fn request_completion(
    backend: &dyn InferenceBackend,
    prompt: &str,
    sampling: &SamplingConfig,
    model_id: &str,
    policy: &RetryPolicy,
    mut on_warning: impl FnMut(usize, usize) + Send,
) -> Result<FragmentStream> {
    let request = PredictionRequest::new(model_id, prompt, *sampling);
    let max_attempts = policy.max_attempts;

    for attempt in 1..=max_attempts {
        debug!("Inference attempt {}/{}", attempt, max_attempts);

        match backend.start_prediction(&request).await {
            Ok(stream) => {
                if attempt > 1 {
                    info!("Inference succeeded on attempt {}/{}", attempt, max_attempts);
                }
                return Ok(stream);
            }
            Err(e) if e.is_retryable() => {
                warn!("Timeout on attempt {}/{}: {}", attempt, max_attempts, e);
                on_warning(attempt, max_attempts);
                if attempt < max_attempts {
                    sleep(policy.backoff).await;
                }
            }
            Err(e) => {
                error!("Unexpected inference error on attempt {}: {}", attempt, e);
                return Err(e);
            }
        }
    }

    error!("Inference failed after {} attempts", max_attempts);
    Err(ChatError::ExhaustedRetries {
        attempts: max_attempts,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use tokio::time::Instant;

    enum Scripted {
        Timeout,
        Fail,
        Reply(&'static [&'static str]),
    }

    struct ScriptedBackend {
        script: Mutex<VecDeque<Scripted>>,
        calls: AtomicUsize,
    }

    impl ScriptedBackend {
        fn new(script: Vec<Scripted>) -> Self {
            Self {
                script: Mutex::new(script.into()),
                calls: AtomicUsize::new(0),
            }
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait::async_trait]
    impl InferenceBackend for ScriptedBackend {
        async fn start_prediction(&self, _request: &PredictionRequest) -> Result<FragmentStream> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let next = self.script.lock().unwrap().pop_front().unwrap_or(Scripted::Timeout);
            match next {
                Scripted::Timeout => Err(ChatError::TransientTimeout("read timed out".into())),
                Scripted::Fail => Err(ChatError::Inference("invalid version".into())),
                Scripted::Reply(parts) => {
                    let items: Vec<Result<String>> = parts.iter().map(|p| Ok(p.to_string())).collect();
                    Ok(futures::stream::iter(items).boxed())
                }
            }
        }
    }

    async fn run(backend: &ScriptedBackend, warnings: &mut Vec<usize>) -> Result<FragmentStream> {
        request_completion(
            backend,
            "prompt",
            &SamplingConfig::default(),
            "owner/model:v1",
            &RetryPolicy::default(),
            |attempt, _| warnings.push(attempt),
        )
        .await
    }

    #[tokio::test(start_paused = true)]
    async fn succeeds_on_first_attempt_without_pausing() {
        let backend = ScriptedBackend::new(vec![Scripted::Reply(&["Hi", "!"])]);
        let mut warnings = Vec::new();
        let start = Instant::now();

        let stream = run(&backend, &mut warnings).await.unwrap();
        let text: Vec<String> = stream.map(|f| f.unwrap()).collect().await;

        assert_eq!(text.concat(), "Hi!");
        assert_eq!(backend.calls(), 1);
        assert!(warnings.is_empty());
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn stops_after_max_attempts() {
        let backend = ScriptedBackend::new(vec![]);
        let mut warnings = Vec::new();
        let start = Instant::now();

        let err = run(&backend, &mut warnings).await.err().unwrap();

        assert!(matches!(err, ChatError::ExhaustedRetries { attempts: 3 }));
        assert_eq!(backend.calls(), 3);
        assert_eq!(warnings, vec![1, 2, 3]);
        // Pauses only between attempts 1->2 and 2->3
        assert!(start.elapsed() >= Duration::from_secs(4));
        assert!(start.elapsed() < Duration::from_secs(6));
    }

    #[tokio::test(start_paused = true)]
    async fn does_not_retry_other_failures() {
        let backend = ScriptedBackend::new(vec![Scripted::Fail, Scripted::Reply(&["never"])]);
        let mut warnings = Vec::new();
        let start = Instant::now();

        let err = run(&backend, &mut warnings).await.err().unwrap();

        assert!(matches!(err, ChatError::Inference(_)));
        assert_eq!(backend.calls(), 1);
        assert!(warnings.is_empty());
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_then_hard_failure_aborts() {
        let backend = ScriptedBackend::new(vec![Scripted::Timeout, Scripted::Fail]);
        let mut warnings = Vec::new();

        let err = run(&backend, &mut warnings).await.err().unwrap();

        assert!(matches!(err, ChatError::Inference(_)));
        assert_eq!(backend.calls(), 2);
        assert_eq!(warnings, vec![1]);
    }

    #[test]
    fn policy_from_settings() {
        let settings = RetrySettings {
            max_attempts: 5,
            backoff_secs: 1,
        };
        let policy = RetryPolicy::from(&settings);
        assert_eq!(policy.max_attempts, 5);
        assert_eq!(policy.backoff, Duration::from_secs(1));
    }
}
