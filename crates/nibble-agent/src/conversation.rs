//! Conversation state for a single reasoning loop run.

use nibble_ai::{Message, Usage};

/// Messages exchanged with the model, plus usage and streaming status.
#[derive(Default)]
pub struct Conversation {
    /// Conversation messages
    pub messages: Vec<Message>,
    /// Current streaming message (partial)
    pub stream_message: Option<Message>,
    /// Total usage across all turns
    pub total_usage: Usage,
    /// Last error
    pub error: Option<String>,
}

impl Conversation {
    /// The most recent assistant message, if any
    pub fn last_assistant(&self) -> Option<&Message> {
        self.messages
            .iter()
            .rev()
            .find(|m| matches!(m, Message::Assistant { .. }))
    }
}
