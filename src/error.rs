//! The closed failure taxonomy shared by all pipeline components.
//!
//! Every failure a component can surface is one of these variants; the HTTP
//! layer maps them to status codes in one place. Components that recover
//! locally (query expansion, hybrid degradation) never let these escape.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Rate limited: {0}")]
    RateLimited(String),

    #[error("Request queue is full")]
    QueueFull,

    #[error("Request queue was cleared")]
    QueueCleared,

    #[error("Vector backend unavailable: {0}")]
    BackendUnavailable(String),

    #[error("Vector backend rejected request ({status}): {message}")]
    BackendRejected { status: u16, message: String },

    #[error("Protocol error: {0}")]
    ProtocolError(String),

    #[error("LLM unavailable: {0}")]
    LlmUnavailable(String),

    #[error("LLM stream error: {0}")]
    LlmStream(String),

    #[error("Indexing failed: {0}")]
    IndexFailure(String),

    #[error("Unsupported media type: {0}")]
    UnsupportedMediaType(String),

    #[error("File too large: {0} bytes (limit {1})")]
    FileTooLarge(u64, u64),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl From<rusqlite::Error> for Error {
    fn from(e: rusqlite::Error) -> Self {
        Error::Storage(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
