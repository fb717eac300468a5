//! nibble-ai: Gemini provider layer
//!
//! Message, tool and streaming types shared by the reasoning loop, plus the
//! Gemini `streamGenerateContent` client used for both image understanding
//! and tool-calling conversations.

pub mod error;
pub mod models;
pub mod providers;
pub mod stream;
pub mod types;

pub use error::{Error, Result};
pub use stream::MessageEventStream;
pub use types::*;
