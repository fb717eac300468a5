//! Bounded tool-calling reasoning loop

use std::collections::HashMap;
use std::sync::Arc;

use nibble_ai::{Content, Message, Model, Usage};
use tokio::sync::broadcast;

use crate::{
    conversation::Conversation,
    error::{Error, Result},
    events::AgentEvent,
    tool::{BoxedTool, ToolResult, to_api_tool},
    transport::{AgentEventStream, AgentRunConfig, Transport},
};

/// Default cap on model calls within one run.
pub const DEFAULT_MAX_TURNS: u32 = 5;

/// Agent configuration
#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// Name used in events and logs
    pub name: String,
    /// System prompt
    pub system_prompt: Option<String>,
    /// Model to use
    pub model: Model,
    /// Maximum tokens per response
    pub max_tokens: Option<u32>,
    /// Sampling temperature
    pub temperature: Option<f32>,
    /// Maximum model calls before the run is abandoned
    pub max_turns: u32,
}

impl AgentConfig {
    /// Config with defaults for everything but the name and model
    pub fn new(name: impl Into<String>, model: Model) -> Self {
        Self {
            name: name.into(),
            system_prompt: None,
            model,
            max_tokens: None,
            temperature: None,
            max_turns: DEFAULT_MAX_TURNS,
        }
    }
}

/// Runs a conversation against a transport, executing requested tools
/// until the model answers without calling one or the turn cap is hit.
pub struct Agent {
    config: AgentConfig,
    conversation: Conversation,
    tools: Vec<BoxedTool>,
    transport: Arc<dyn Transport>,
    event_tx: broadcast::Sender<AgentEvent>,
    /// Cached compiled JSON schema validators keyed by tool name
    schema_cache: HashMap<String, Arc<jsonschema::Validator>>,
}

impl Agent {
    /// Create a new agent
    pub fn new(config: AgentConfig, transport: Arc<dyn Transport>) -> Self {
        let (event_tx, _) = broadcast::channel(256);
        Self {
            config,
            conversation: Conversation::default(),
            tools: vec![],
            transport,
            event_tx,
            schema_cache: HashMap::new(),
        }
    }

    /// Publish events on an existing channel instead of a private one
    pub fn with_event_sender(mut self, event_tx: broadcast::Sender<AgentEvent>) -> Self {
        self.event_tx = event_tx;
        self
    }

    /// Subscribe to agent events
    pub fn subscribe(&self) -> broadcast::Receiver<AgentEvent> {
        self.event_tx.subscribe()
    }

    /// Get the current state
    pub fn state(&self) -> &Conversation {
        &self.conversation
    }

    /// Get the agent config
    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    /// Set the system prompt
    pub fn set_system_prompt(&mut self, prompt: impl Into<String>) {
        self.config.system_prompt = Some(prompt.into());
    }

    /// Add a tool
    pub fn add_tool(&mut self, tool: BoxedTool) {
        self.cache_tool_schema(&tool);
        self.tools.push(tool);
    }

    /// Set tools (replaces existing)
    pub fn set_tools(&mut self, tools: Vec<BoxedTool>) {
        self.schema_cache.clear();
        for tool in &tools {
            self.cache_tool_schema(tool);
        }
        self.tools = tools;
    }

    fn cache_tool_schema(&mut self, tool: &BoxedTool) {
        let schema = tool.parameters_schema();
        match jsonschema::validator_for(&schema) {
            Ok(validator) => {
                self.schema_cache
                    .insert(tool.name().to_string(), Arc::new(validator));
            }
            Err(e) => {
                tracing::warn!(
                    "Invalid tool parameter schema for '{}', skipping validation: {}",
                    tool.name(),
                    e
                );
            }
        }
    }

    /// Get tool names
    pub fn tool_names(&self) -> Vec<&str> {
        self.tools.iter().map(|t| t.name()).collect()
    }

    /// Get all messages
    pub fn messages(&self) -> &[Message] {
        &self.conversation.messages
    }

    /// Text of the last assistant message, if it has any
    pub fn final_text(&self) -> Option<String> {
        self.conversation
            .last_assistant()
            .map(|m| m.text())
            .filter(|t| !t.trim().is_empty())
    }

    /// Send a text prompt
    pub async fn prompt(&mut self, input: &str) -> Result<()> {
        self.prompt_with_content(vec![Content::text(input)]).await
    }

    /// Send a prompt with arbitrary content blocks (text and images)
    pub async fn prompt_with_content(&mut self, content: Vec<Content>) -> Result<()> {
        self.run_with_messages(vec![Message::user_with_content(content)])
            .await
    }

    fn build_run_config(&self) -> AgentRunConfig {
        AgentRunConfig {
            system_prompt: self.config.system_prompt.clone(),
            tools: self.tools.iter().map(|t| to_api_tool(t.as_ref())).collect(),
            model: self.config.model.clone(),
            max_tokens: self.config.max_tokens,
            temperature: self.config.temperature,
        }
    }

    /// Forward transport events to subscribers, renumbering turns.
    /// Returns (assistant_message, turn_usage, error_if_any).
    async fn process_stream(
        &mut self,
        turn: u32,
        event_stream: &mut AgentEventStream,
    ) -> (Option<Message>, Usage, Option<String>) {
        use futures::StreamExt;

        let mut assistant_message: Option<Message> = None;
        let mut turn_usage = Usage::default();
        let mut error: Option<String> = None;

        while let Some(event) = event_stream.next().await {
            let event = match event {
                AgentEvent::TurnStart { .. } => AgentEvent::TurnStart { turn_number: turn },
                AgentEvent::TurnEnd { message, usage, .. } => AgentEvent::TurnEnd {
                    turn_number: turn,
                    message,
                    usage,
                },
                other => other,
            };
            let _ = self.event_tx.send(event.clone());

            match event {
                AgentEvent::MessageUpdate { message } => {
                    self.conversation.stream_message = Some(message);
                }
                AgentEvent::MessageEnd { message } => {
                    self.conversation.stream_message = None;
                    assistant_message = Some(message);
                }
                AgentEvent::TurnEnd { usage, .. } => {
                    turn_usage = usage;
                }
                AgentEvent::Error { message } => {
                    error = Some(message);
                }
                _ => {}
            }
        }

        (assistant_message, turn_usage, error)
    }

    /// Execute tool calls in order, returning one result message per call.
    async fn execute_tool_calls(
        &self,
        tool_calls: Vec<(String, String, serde_json::Value)>,
    ) -> Vec<Message> {
        let mut tool_results = Vec::with_capacity(tool_calls.len());

        for (id, name, args) in tool_calls {
            let tool = self.tools.iter().find(|t| t.name() == name.as_str());

            let _ = self.event_tx.send(AgentEvent::ToolExecutionStart {
                tool_call_id: id.clone(),
                tool_name: name.clone(),
                arguments: args.clone(),
            });

            let result = if let Some(tool) = tool {
                let validation_error = self
                    .schema_cache
                    .get(name.as_str())
                    .and_then(|validator| validate_with_validator(&args, validator));

                match validation_error {
                    Some(err) => ToolResult::error(err),
                    None => tool.execute(&id, args).await,
                }
            } else {
                ToolResult::error(format!("Tool not found: {}", name))
            };

            if result.is_error {
                tracing::warn!(agent = %self.config.name, tool = %name, "tool returned an error");
            }

            let _ = self.event_tx.send(AgentEvent::ToolExecutionEnd {
                tool_call_id: id.clone(),
                tool_name: name.clone(),
                result: result.text_content(),
                is_error: result.is_error,
            });

            tool_results.push(Message::tool_result(id, name, result.content, result.is_error));
        }

        tool_results
    }

    fn flush_pending(&mut self, messages_to_add: &mut Vec<Message>) {
        self.conversation.messages.append(messages_to_add);
    }

    fn fail(&mut self, error: Error) -> Error {
        let message = error.to_string();
        self.conversation.error = Some(message.clone());
        let _ = self.event_tx.send(AgentEvent::Error { message });
        error
    }

    async fn run_with_messages(&mut self, initial_messages: Vec<Message>) -> Result<()> {
        let run_config = self.build_run_config();
        let max_turns = self.config.max_turns;
        self.conversation.error = None;
        let _ = self.event_tx.send(AgentEvent::AgentStart {
            agent: self.config.name.clone(),
        });

        let mut turn = 0u32;
        let mut messages_to_add = initial_messages;

        let result = loop {
            self.flush_pending(&mut messages_to_add);

            if turn >= max_turns {
                break Err(self.fail(Error::TurnLimit { max_turns }));
            }
            turn += 1;
            tracing::debug!(agent = %self.config.name, turn, "starting turn");

            let mut event_stream = match self
                .transport
                .run(self.conversation.messages.clone(), &run_config)
                .await
            {
                Ok(s) => s,
                Err(e) => break Err(self.fail(Error::Ai(e))),
            };

            let (assistant_message, turn_usage, stream_error) =
                self.process_stream(turn, &mut event_stream).await;

            if let Some(error_message) = stream_error {
                self.conversation.stream_message = None;
                self.conversation.error = Some(error_message.clone());
                break Err(Error::Transport(error_message));
            }

            self.conversation.total_usage.add(&turn_usage);

            let Some(msg) = assistant_message else {
                break Err(self.fail(Error::Transport(
                    "model stream ended without a message".to_string(),
                )));
            };
            self.conversation.messages.push(msg.clone());

            let tool_calls: Vec<(String, String, serde_json::Value)> = msg
                .tool_calls()
                .into_iter()
                .map(|(id, name, args)| (id.to_string(), name.to_string(), args.clone()))
                .collect();

            if tool_calls.is_empty() {
                break Ok(());
            }

            messages_to_add = self.execute_tool_calls(tool_calls).await;
        };

        let _ = self.event_tx.send(AgentEvent::AgentEnd {
            agent: self.config.name.clone(),
            total_turns: turn,
            total_usage: self.conversation.total_usage.clone(),
        });

        result
    }
}

/// Validate tool arguments using a pre-compiled validator.
/// Returns `Some(error_message)` if validation fails, `None` if valid.
fn validate_with_validator(
    args: &serde_json::Value,
    validator: &jsonschema::Validator,
) -> Option<String> {
    let errors: Vec<String> = validator
        .iter_errors(args)
        .map(|e| {
            let path = e.instance_path.to_string();
            if path.is_empty() {
                e.to_string()
            } else {
                format!("{}: {}", path, e)
            }
        })
        .collect();

    if errors.is_empty() {
        None
    } else {
        Some(format!(
            "Tool argument validation failed:\n{}",
            errors.join("\n")
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tool::Tool;
    use async_trait::async_trait;
    use nibble_ai::AssistantMetadata;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// A mock transport that returns canned assistant responses in order.
    struct MockTransport {
        responses: Mutex<Vec<Message>>,
        seen: Mutex<Vec<Vec<Message>>>,
    }

    impl MockTransport {
        fn new(responses: Vec<Message>) -> Self {
            Self {
                responses: Mutex::new(responses),
                seen: Mutex::new(vec![]),
            }
        }
    }

    #[async_trait]
    impl Transport for MockTransport {
        async fn run(
            &self,
            messages: Vec<Message>,
            _config: &AgentRunConfig,
        ) -> nibble_ai::Result<AgentEventStream> {
            self.seen.lock().push(messages);
            let msg = {
                let mut responses = self.responses.lock();
                if responses.is_empty() {
                    Message::assistant_text("done")
                } else {
                    responses.remove(0)
                }
            };

            let stream: AgentEventStream = Box::pin(async_stream::stream! {
                yield AgentEvent::TurnStart { turn_number: 1 };
                yield AgentEvent::MessageEnd { message: msg.clone() };
                yield AgentEvent::TurnEnd {
                    turn_number: 1,
                    message: msg,
                    usage: Usage { input: 10, output: 2 },
                };
            });

            Ok(stream)
        }
    }

    struct CountingTool {
        calls: Arc<AtomicU32>,
    }

    #[async_trait]
    impl Tool for CountingTool {
        fn name(&self) -> &str {
            "lookup"
        }
        fn description(&self) -> &str {
            "Looks things up"
        }
        fn parameters_schema(&self) -> serde_json::Value {
            serde_json::json!({
                "type": "object",
                "properties": { "query": { "type": "string" } },
                "required": ["query"]
            })
        }
        async fn execute(&self, _id: &str, args: serde_json::Value) -> ToolResult {
            self.calls.fetch_add(1, Ordering::SeqCst);
            ToolResult::text(format!("found {}", args["query"]))
        }
    }

    fn tool_call(name: &str, args: serde_json::Value) -> Message {
        Message::Assistant {
            content: vec![Content::tool_call("call_1", name, args)],
            metadata: AssistantMetadata::default(),
        }
    }

    fn make_agent(transport: Arc<MockTransport>) -> (Agent, Arc<AtomicU32>) {
        let calls = Arc::new(AtomicU32::new(0));
        let mut agent = Agent::new(
            AgentConfig::new("test", nibble_ai::models::default_model()),
            transport,
        );
        agent.add_tool(Arc::new(CountingTool {
            calls: Arc::clone(&calls),
        }));
        (agent, calls)
    }

    fn simple_schema() -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "query": { "type": "string" },
                "limit": { "type": "integer" }
            },
            "required": ["query"]
        })
    }

    fn validate(args: serde_json::Value) -> Option<String> {
        let validator = jsonschema::validator_for(&simple_schema()).unwrap();
        validate_with_validator(&args, &validator)
    }

    #[test]
    fn test_validate_args_valid() {
        assert!(validate(serde_json::json!({"query": "apple"})).is_none());
    }

    #[test]
    fn test_validate_args_missing_required() {
        let err = validate(serde_json::json!({"limit": 3})).unwrap();
        assert!(err.contains("validation failed"));
        assert!(err.contains("query"));
    }

    #[test]
    fn test_validate_args_wrong_type() {
        let err = validate(serde_json::json!({"query": "x", "limit": "three"})).unwrap();
        assert!(err.contains("/limit"));
    }

    #[tokio::test]
    async fn test_plain_answer_ends_after_one_turn() {
        let transport = Arc::new(MockTransport::new(vec![Message::assistant_text("hello")]));
        let (mut agent, calls) = make_agent(Arc::clone(&transport));

        agent.prompt("hi").await.unwrap();

        assert_eq!(agent.final_text().as_deref(), Some("hello"));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(transport.seen.lock().len(), 1);
        assert_eq!(agent.state().total_usage.input, 10);
    }

    #[tokio::test]
    async fn test_tool_call_result_is_sent_back() {
        let transport = Arc::new(MockTransport::new(vec![
            tool_call("lookup", serde_json::json!({"query": "banana"})),
            Message::assistant_text("A banana has 105 kcal."),
        ]));
        let (mut agent, calls) = make_agent(Arc::clone(&transport));
        let mut rx = agent.subscribe();

        agent.prompt("banana?").await.unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(agent.final_text().as_deref(), Some("A banana has 105 kcal."));

        // user, assistant(tool call), tool result, assistant
        assert_eq!(agent.messages().len(), 4);
        let seen = transport.seen.lock();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[0].len(), 1, "first turn carries the prompt once");
        assert!(matches!(seen[1][2], Message::ToolResult { is_error: false, .. }));

        let mut saw_tool_end = false;
        let mut last_turn = 0;
        while let Ok(event) = rx.try_recv() {
            match event {
                AgentEvent::ToolExecutionEnd { tool_name, .. } => {
                    assert_eq!(tool_name, "lookup");
                    saw_tool_end = true;
                }
                AgentEvent::TurnStart { turn_number } => last_turn = turn_number,
                _ => {}
            }
        }
        assert!(saw_tool_end);
        assert_eq!(last_turn, 2);
    }

    #[tokio::test]
    async fn test_invalid_arguments_reported_to_model() {
        let transport = Arc::new(MockTransport::new(vec![
            tool_call("lookup", serde_json::json!({"wrong": 1})),
            Message::assistant_text("sorry"),
        ]));
        let (mut agent, calls) = make_agent(Arc::clone(&transport));

        agent.prompt("x").await.unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 0);
        match &agent.messages()[2] {
            Message::ToolResult { is_error, content, .. } => {
                assert!(is_error);
                assert!(content[0].as_text().unwrap().contains("validation failed"));
            }
            other => panic!("expected tool result, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_unknown_tool_reported_to_model() {
        let transport = Arc::new(MockTransport::new(vec![
            tool_call("missing", serde_json::json!({})),
            Message::assistant_text("ok"),
        ]));
        let (mut agent, _) = make_agent(transport);

        agent.prompt("x").await.unwrap();

        match &agent.messages()[2] {
            Message::ToolResult { is_error, content, .. } => {
                assert!(is_error);
                assert_eq!(content[0].as_text(), Some("Tool not found: missing"));
            }
            other => panic!("expected tool result, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_turn_limit() {
        let looping: Vec<Message> = (0..10)
            .map(|_| tool_call("lookup", serde_json::json!({"query": "again"})))
            .collect();
        let transport = Arc::new(MockTransport::new(looping));
        let (mut agent, calls) = make_agent(Arc::clone(&transport));
        agent.config.max_turns = 3;

        let err = agent.prompt("loop").await.unwrap_err();

        assert!(matches!(err, Error::TurnLimit { max_turns: 3 }));
        assert_eq!(transport.seen.lock().len(), 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert!(agent.state().error.is_some());
    }

    #[tokio::test]
    async fn test_stream_error_is_transport_error() {
        struct FailingTransport;

        #[async_trait]
        impl Transport for FailingTransport {
            async fn run(
                &self,
                _messages: Vec<Message>,
                _config: &AgentRunConfig,
            ) -> nibble_ai::Result<AgentEventStream> {
                Ok(Box::pin(async_stream::stream! {
                    yield AgentEvent::TurnStart { turn_number: 1 };
                    yield AgentEvent::Error { message: "HTTP 503: unavailable".into() };
                }))
            }
        }

        let mut agent = Agent::new(
            AgentConfig::new("test", nibble_ai::models::default_model()),
            Arc::new(FailingTransport),
        );
        let err = agent.prompt("x").await.unwrap_err();
        assert!(matches!(err, Error::Transport(_)));
        assert!(agent.final_text().is_none());
    }
}
