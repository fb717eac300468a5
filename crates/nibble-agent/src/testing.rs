//! Scripted transport for exercising reasoning loops without a model.

use std::collections::VecDeque;

use async_trait::async_trait;
use nibble_ai::{AssistantMetadata, Content, Message, Usage};
use parking_lot::Mutex;

use crate::{
    events::AgentEvent,
    transport::{AgentEventStream, AgentRunConfig, Transport},
};

/// One canned reply for a transport run.
#[derive(Debug, Clone)]
pub enum ScriptedReply {
    /// Stream this assistant message back
    Message(Message),
    /// Fail the turn with this error text
    Fail(String),
}

/// What a single run was asked to do.
#[derive(Debug, Clone)]
pub struct RecordedRun {
    pub system_prompt: Option<String>,
    pub tool_names: Vec<String>,
    pub messages: Vec<Message>,
}

/// Plays back replies in order and records every request.
///
/// Once the script is exhausted every run answers `"done"`.
#[derive(Default)]
pub struct ScriptedTransport {
    replies: Mutex<VecDeque<ScriptedReply>>,
    runs: Mutex<Vec<RecordedRun>>,
}

impl ScriptedTransport {
    pub fn new(replies: impl IntoIterator<Item = ScriptedReply>) -> Self {
        Self {
            replies: Mutex::new(replies.into_iter().collect()),
            runs: Mutex::new(vec![]),
        }
    }

    pub fn push_reply(&self, reply: ScriptedReply) {
        self.replies.lock().push_back(reply);
    }

    pub fn runs(&self) -> Vec<RecordedRun> {
        self.runs.lock().clone()
    }

    pub fn run_count(&self) -> usize {
        self.runs.lock().len()
    }
}

/// Reply with plain assistant text
pub fn text_reply(text: impl Into<String>) -> ScriptedReply {
    ScriptedReply::Message(Message::assistant_text(text))
}

/// Reply with a single tool call
pub fn tool_call_reply(
    id: impl Into<String>,
    name: impl Into<String>,
    arguments: serde_json::Value,
) -> ScriptedReply {
    ScriptedReply::Message(Message::Assistant {
        content: vec![Content::tool_call(id, name, arguments)],
        metadata: AssistantMetadata::default(),
    })
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn run(
        &self,
        messages: Vec<Message>,
        config: &AgentRunConfig,
    ) -> nibble_ai::Result<AgentEventStream> {
        self.runs.lock().push(RecordedRun {
            system_prompt: config.system_prompt.clone(),
            tool_names: config.tools.iter().map(|t| t.name.clone()).collect(),
            messages,
        });

        let reply = self
            .replies
            .lock()
            .pop_front()
            .unwrap_or_else(|| text_reply("done"));

        let stream: AgentEventStream = match reply {
            ScriptedReply::Message(message) => Box::pin(async_stream::stream! {
                yield AgentEvent::TurnStart { turn_number: 1 };
                yield AgentEvent::MessageStart { message: message.clone() };
                yield AgentEvent::MessageEnd { message: message.clone() };
                yield AgentEvent::TurnEnd {
                    turn_number: 1,
                    message,
                    usage: Usage::default(),
                };
            }),
            ScriptedReply::Fail(error) => Box::pin(async_stream::stream! {
                yield AgentEvent::TurnStart { turn_number: 1 };
                yield AgentEvent::Error { message: error };
            }),
        };

        Ok(stream)
    }
}
