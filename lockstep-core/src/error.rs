use thiserror::Error;

/// Unified error taxonomy for the engine.
///
/// Every fallible operation returns one of these variants so callers
/// (gateway adapters, tests) can map outcomes without inspecting
/// message strings.
#[derive(Error, Debug)]
pub enum Error {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Room is full: {0}")]
    Full(String),

    #[error("Room is closed: {0}")]
    Closed(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Text too long: {0}")]
    TooLong(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Whether the error is a client-side fault (bad request, bad
    /// credentials, wrong state) rather than an engine failure.
    #[must_use]
    pub const fn is_client_error(&self) -> bool {
        !matches!(self, Self::Internal(_))
    }
}

pub type Result<T> = std::result::Result<T, Error>;
