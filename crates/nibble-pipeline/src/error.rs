//! Error types for nibble-pipeline

use thiserror::Error;

/// Result type alias using nibble-pipeline Error
pub type Result<T> = std::result::Result<T, Error>;

/// Coarse classification callers branch on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// A remote service was unreachable, answered non-2xx, timed out, or
    /// the reasoning loop never settled
    TransportFailure,
    /// The invocation input cannot be processed
    UnsupportedInput,
}

/// Errors that fail a pipeline invocation
#[derive(Error, Debug)]
pub enum Error {
    #[error("Unsupported input: {0}")]
    UnsupportedInput(String),

    #[error(transparent)]
    Agent(#[from] nibble_agent::Error),

    #[error(transparent)]
    Ai(#[from] nibble_ai::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

impl Error {
    pub fn unsupported(message: impl Into<String>) -> Self {
        Self::UnsupportedInput(message.into())
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::UnsupportedInput(_) => ErrorKind::UnsupportedInput,
            Error::Agent(_) | Error::Ai(_) | Error::Http(_) => ErrorKind::TransportFailure,
        }
    }
}
