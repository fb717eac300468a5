//! Transport abstraction for running reasoning-loop turns

use std::{pin::Pin, sync::Arc, time::Duration};

use async_stream::stream;
use async_trait::async_trait;
use futures::StreamExt;
use nibble_ai::{
    Context, Message, Model, Result, StreamOptions,
    providers::LlmProvider,
    stream::{MessageBuilder, MessageEvent},
};
use tokio::time::Instant;
use tokio_stream::Stream;

use crate::events::AgentEvent;

/// Default bound on a single model turn, connect to final event.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// Retry configuration
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of retry attempts
    pub max_retries: u32,
    /// Initial delay between retries
    pub initial_delay: Duration,
    /// Maximum delay between retries
    pub max_delay: Duration,
    /// Multiplier for exponential backoff
    pub backoff_multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 0,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryConfig {
    /// Backoff config with the given number of retries
    pub fn with_max_retries(max_retries: u32) -> Self {
        Self {
            max_retries,
            ..Self::default()
        }
    }

    /// Calculate delay for a given attempt (0-indexed)
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let delay_secs =
            self.initial_delay.as_secs_f64() * self.backoff_multiplier.powi(attempt as i32);
        Duration::from_secs_f64(delay_secs.min(self.max_delay.as_secs_f64()))
    }
}

/// Check if an error message describes a transient failure
fn is_retryable_error(error: &str) -> bool {
    let lower = error.to_lowercase();
    [
        "429",
        "500",
        "502",
        "503",
        "504",
        "rate limit",
        "timeout",
        "timed out",
        "connection",
        "overloaded",
    ]
    .iter()
    .any(|needle| lower.contains(needle))
}

/// Configuration for a single transport run
#[derive(Debug, Clone)]
pub struct AgentRunConfig {
    /// System prompt
    pub system_prompt: Option<String>,
    /// Available tools (as API definitions)
    pub tools: Vec<nibble_ai::Tool>,
    /// Model to use
    pub model: Model,
    /// Maximum tokens per response
    pub max_tokens: Option<u32>,
    /// Temperature
    pub temperature: Option<f32>,
}

/// A stream of agent events
pub type AgentEventStream = Pin<Box<dyn Stream<Item = AgentEvent> + Send>>;

/// Transport for running one model turn
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send the conversation so far and stream back the model's reply
    async fn run(&self, messages: Vec<Message>, config: &AgentRunConfig)
    -> Result<AgentEventStream>;
}

/// Direct provider transport - calls the model API
pub struct ProviderTransport {
    provider: Arc<dyn LlmProvider>,
    retry_config: RetryConfig,
    request_timeout: Duration,
}

impl ProviderTransport {
    /// Create a new provider transport
    pub fn new(provider: Arc<dyn LlmProvider>) -> Self {
        Self {
            provider,
            retry_config: RetryConfig::default(),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }

    /// Set retry configuration
    pub fn with_retry_config(mut self, config: RetryConfig) -> Self {
        self.retry_config = config;
        self
    }

    /// Set the per-turn timeout
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }
}

#[async_trait]
impl Transport for ProviderTransport {
    async fn run(
        &self,
        messages: Vec<Message>,
        config: &AgentRunConfig,
    ) -> Result<AgentEventStream> {
        let context = Context {
            system_prompt: config.system_prompt.clone(),
            messages,
            tools: config.tools.clone(),
        };
        let options = StreamOptions {
            max_tokens: config.max_tokens,
            temperature: config.temperature,
        };
        let model = config.model.clone();
        let provider = Arc::clone(&self.provider);
        let retry_config = self.retry_config.clone();
        let timeout = self.request_timeout;

        let event_stream: AgentEventStream = Box::pin(stream! {
            yield AgentEvent::TurnStart { turn_number: 1 };

            let deadline = Instant::now() + timeout;
            let mut attempt = 0u32;
            let message_stream;

            loop {
                let opened = tokio::time::timeout_at(
                    deadline,
                    provider.stream(&model, &context, &options),
                )
                .await;

                match opened {
                    Ok(Ok(s)) => {
                        message_stream = s;
                        break;
                    }
                    Ok(Err(e)) => {
                        let error_msg = e.to_string();
                        let retryable = e.is_retryable() || is_retryable_error(&error_msg);

                        if attempt < retry_config.max_retries && retryable {
                            let delay = retry_config.delay_for_attempt(attempt);
                            tracing::warn!(
                                "Request failed (attempt {}/{}): {}. Retrying in {:?}...",
                                attempt + 1,
                                retry_config.max_retries + 1,
                                error_msg,
                                delay
                            );
                            attempt += 1;
                            tokio::time::sleep(delay).await;
                            continue;
                        }

                        yield AgentEvent::Error { message: error_msg };
                        return;
                    }
                    Err(_) => {
                        yield AgentEvent::Error {
                            message: nibble_ai::Error::Timeout(timeout).to_string(),
                        };
                        return;
                    }
                }
            }

            let mut message_stream = message_stream;
            let mut builder = MessageBuilder::new();
            let mut final_message = None;
            let mut final_usage = nibble_ai::Usage::default();

            loop {
                let event = match tokio::time::timeout_at(deadline, message_stream.next()).await {
                    Ok(Some(event)) => event,
                    Ok(None) => break,
                    Err(_) => {
                        yield AgentEvent::Error {
                            message: nibble_ai::Error::Timeout(timeout).to_string(),
                        };
                        return;
                    }
                };

                builder.process_event(&event);

                match &event {
                    MessageEvent::Start { message } => {
                        yield AgentEvent::MessageStart { message: message.clone() };
                    }
                    MessageEvent::TextDelta { .. } | MessageEvent::ToolCallDelta { .. } => {
                        let partial = Message::Assistant {
                            content: builder.current_content(),
                            metadata: nibble_ai::AssistantMetadata::default(),
                        };
                        yield AgentEvent::MessageUpdate { message: partial };
                    }
                    MessageEvent::Done { message, usage, .. } => {
                        final_message = Some(message.clone());
                        final_usage = usage.clone();
                        yield AgentEvent::MessageEnd { message: message.clone() };
                    }
                    MessageEvent::Error { message } => {
                        yield AgentEvent::Error { message: message.clone() };
                        return;
                    }
                    _ => {}
                }
            }

            if let Some(msg) = final_message {
                yield AgentEvent::TurnEnd {
                    turn_number: 1,
                    message: msg,
                    usage: final_usage,
                };
            }
        });

        Ok(event_stream)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nibble_ai::{MessageEventStream, StopReason, Usage};

    /// Provider that replays canned events, optionally stalling forever.
    struct CannedProvider {
        events: Vec<MessageEvent>,
        stall: bool,
    }

    #[async_trait]
    impl LlmProvider for CannedProvider {
        async fn stream(
            &self,
            _model: &Model,
            _context: &Context,
            _options: &StreamOptions,
        ) -> Result<MessageEventStream> {
            let events = self.events.clone();
            let stall = self.stall;
            Ok(Box::pin(stream! {
                for event in events {
                    yield event;
                }
                if stall {
                    futures::future::pending::<()>().await;
                }
            }))
        }
    }

    fn run_config() -> AgentRunConfig {
        AgentRunConfig {
            system_prompt: None,
            tools: vec![],
            model: nibble_ai::models::default_model(),
            max_tokens: None,
            temperature: None,
        }
    }

    #[test]
    fn test_retry_delay_backoff() {
        let config = RetryConfig::with_max_retries(3);
        assert_eq!(config.delay_for_attempt(0), Duration::from_secs(1));
        assert_eq!(config.delay_for_attempt(1), Duration::from_secs(2));
        assert_eq!(config.delay_for_attempt(2), Duration::from_secs(4));
        assert_eq!(config.delay_for_attempt(10), Duration::from_secs(30));
    }

    #[test]
    fn test_no_retries_by_default() {
        assert_eq!(RetryConfig::default().max_retries, 0);
    }

    #[test]
    fn test_retryable_error_strings() {
        assert!(is_retryable_error("HTTP 503: The model is overloaded"));
        assert!(is_retryable_error("connection reset by peer"));
        assert!(!is_retryable_error("HTTP 400: API key not valid"));
    }

    #[tokio::test]
    async fn test_stream_ends_with_turn_end() {
        let provider = CannedProvider {
            events: vec![
                MessageEvent::TextDelta {
                    content_index: 0,
                    delta: "ok".into(),
                },
                MessageEvent::Done {
                    message: Message::assistant_text("ok"),
                    stop_reason: StopReason::Stop,
                    usage: Usage { input: 3, output: 1 },
                },
            ],
            stall: false,
        };
        let transport = ProviderTransport::new(Arc::new(provider));
        let events: Vec<AgentEvent> = transport
            .run(vec![Message::user("hi")], &run_config())
            .await
            .unwrap()
            .collect()
            .await;

        assert!(matches!(events.first(), Some(AgentEvent::TurnStart { .. })));
        assert!(events.iter().any(|e| matches!(e, AgentEvent::MessageUpdate { .. })));
        match events.last() {
            Some(AgentEvent::TurnEnd { message, usage, .. }) => {
                assert_eq!(message.text(), "ok");
                assert_eq!(usage.input, 3);
            }
            other => panic!("expected TurnEnd, got {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_stalled_stream_times_out() {
        let provider = CannedProvider {
            events: vec![],
            stall: true,
        };
        let transport = ProviderTransport::new(Arc::new(provider))
            .with_request_timeout(Duration::from_secs(5));
        let events: Vec<AgentEvent> = transport
            .run(vec![Message::user("hi")], &run_config())
            .await
            .unwrap()
            .collect()
            .await;

        match events.last() {
            Some(AgentEvent::Error { message }) => assert!(message.contains("timed out")),
            other => panic!("expected timeout error, got {:?}", other),
        }
    }
}
