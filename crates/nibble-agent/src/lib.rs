//! nibble-agent: bounded reasoning loop with tool execution
//!
//! An [`Agent`] sends a conversation through a [`Transport`], runs any tools
//! the model asks for, and repeats until the model answers in plain text or
//! the turn cap is reached.

pub mod agent;
pub mod conversation;
pub mod error;
pub mod events;
pub mod tool;
pub mod transport;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use agent::{Agent, AgentConfig, DEFAULT_MAX_TURNS};
pub use conversation::Conversation;
pub use error::{Error, Result};
pub use events::AgentEvent;
pub use tool::{BoxedTool, Tool, ToolResult};
pub use transport::{AgentRunConfig, ProviderTransport, RetryConfig, Transport};
