//! nibble-pipeline: the image-to-nutrition conversation
//!
//! A [`Pipeline`] routes each invocation to at most three stages (identify
//! foods, fetch nutrition, answer a follow-up), merges their output into the
//! thread's [`ConversationState`] and stores it in a shared [`StateStore`].
//! [`Session`] layers chat history and reset handling on top.

pub mod error;
pub mod history;
pub mod pipeline;
pub mod prompts;
pub mod routing;
pub mod session;
mod stages;
pub mod state;
pub mod store;
pub mod tools;

pub use error::{Error, ErrorKind, Result};
pub use history::{ChatEntry, ChatHistory, ChatRole};
pub use pipeline::{Invocation, Pipeline, PipelineConfig, Services};
pub use routing::Stage;
pub use session::Session;
pub use state::{ConversationState, PipelineInput, StateUpdate, ThreadId};
pub use store::StateStore;
