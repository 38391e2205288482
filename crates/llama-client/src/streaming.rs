use futures::StreamExt;
use llama_core::{ChatError, FragmentStream};
use reqwest_eventsource::{Error as EventSourceError, Event, EventSource};
use serde_json::Value;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, warn};

use crate::map_transport_error;

/// What a single server-sent event means for the fragment sequence
#[derive(Debug, PartialEq)]
pub(crate) enum StreamEvent {
    Fragment(String),
    Failed(String),
    Done,
    Ignored,
}

pub(crate) fn classify_event(event: &str, data: &str) -> StreamEvent {
    match event {
        "output" => StreamEvent::Fragment(data.to_string()),
        "error" => StreamEvent::Failed(error_detail(data)),
        "done" => StreamEvent::Done,
        _ => StreamEvent::Ignored,
    }
}

// Error events carry either a JSON body with `detail` or plain text
fn error_detail(data: &str) -> String {
    match serde_json::from_str::<Value>(data) {
        Ok(Value::Object(map)) => map
            .get("detail")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| data.to_string()),
        _ => data.to_string(),
    }
}

fn map_stream_error(error: EventSourceError) -> ChatError {
    match error {
        EventSourceError::Transport(e) => map_transport_error("Output stream failed", e),
        EventSourceError::InvalidStatusCode(status, _) => {
            ChatError::Inference(format!("Output stream returned status {status}"))
        }
        other => ChatError::Inference(format!("Output stream failed: {other}")),
    }
}

/// Turn the prediction's event source into a finite fragment stream.
///
/// A gap longer than `idle_timeout` between two events ends the stream with
/// [`ChatError::TransientTimeout`].
pub(crate) fn fragment_stream(mut source: EventSource, idle_timeout: Duration) -> FragmentStream {
    let stream = async_stream::stream! {
        let mut fragments = 0usize;
        loop {
            let event = match timeout(idle_timeout, source.next()).await {
                Ok(Some(event)) => event,
                Ok(None) => break,
                Err(_) => {
                    warn!("No output for {:?} after {} fragments", idle_timeout, fragments);
                    yield Err(ChatError::TransientTimeout(format!(
                        "Output stream idle for {}s",
                        idle_timeout.as_secs()
                    )));
                    break;
                }
            };

            match event {
                Ok(Event::Open) => debug!("Output stream opened"),
                Ok(Event::Message(msg)) => match classify_event(&msg.event, &msg.data) {
                    StreamEvent::Fragment(text) => {
                        fragments += 1;
                        yield Ok(text);
                    }
                    StreamEvent::Failed(detail) => {
                        warn!("Prediction reported an error: {}", detail);
                        yield Err(ChatError::Inference(detail));
                        break;
                    }
                    StreamEvent::Done => break,
                    StreamEvent::Ignored => debug!("Ignoring stream event '{}'", msg.event),
                },
                Err(EventSourceError::StreamEnded) => break,
                Err(e) => {
                    warn!("Stream error: {}", e);
                    yield Err(map_stream_error(e));
                    break;
                }
            }
        }
        source.close();
        debug!("Output stream finished after {} fragments", fragments);
    };

    stream.boxed()
}
