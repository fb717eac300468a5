//! Error types for nibble-agent

use thiserror::Error;

/// Result type alias using nibble-agent Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while running a reasoning loop
#[derive(Error, Debug)]
pub enum Error {
    /// An error from the provider layer
    #[error(transparent)]
    Ai(#[from] nibble_ai::Error),

    /// The transport reported a failure mid-stream
    #[error("Transport error: {0}")]
    Transport(String),

    /// The model kept requesting tools past the turn cap
    #[error("Reasoning loop exceeded {max_turns} turns without a final answer")]
    TurnLimit { max_turns: u32 },

    /// A generic agent error
    #[error("{0}")]
    Other(String),
}

