pub mod types;
pub mod classify;
pub mod router;
pub mod retrieval;
pub mod pool;
pub mod tokenizer;
pub mod context;
pub mod citation;
pub mod prompt;
pub mod orchestrator;
pub mod wikipedia;
pub mod tavily;
pub mod ollama;

use std::time::Duration;

use thiserror::Error;

use types::SourceKind;

#[derive(Error, Debug)]
pub enum RagError {
    #[error("Query must not be empty")]
    InvalidQuery,

    #[error("No evidence source could be reached")]
    NoSourceAvailable,

    #[error("{kind} adapter timed out after {timeout:?}")]
    AdapterTimeout { kind: SourceKind, timeout: Duration },

    #[error("{kind} adapter failed: {reason}")]
    AdapterFailure { kind: SourceKind, reason: String },

    #[error("Query exchange cancelled")]
    Cancelled,

    #[error("Generation failed: {0}")]
    Generation(String),

    #[error("Collaborator error: {0}")]
    Service(#[from] ServiceError),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Failures reported by external collaborators (embedding, index, lookup,
/// search, tokenizer, generation).
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ServiceError {
    #[error("Connection failed: {0}")]
    Connection(String),

    #[error("HTTP {status}: {body}")]
    Http { status: u16, body: String },

    #[error("Request timed out after {0}s")]
    Timeout(u64),

    #[error("Response parsing error: {0}")]
    ResponseParsing(String),

    #[error("Missing credential: {0} is not set")]
    MissingCredential(String),

    #[error("Embedding generation failed: {0}")]
    Embedding(String),

    #[error("Vector search failed: {0}")]
    VectorSearch(String),

    #[error("Tokenizer error: {0}")]
    Tokenizer(String),

    #[error("Service unavailable: {0}")]
    Unavailable(String),
}

impl ServiceError {
    /// Map a reqwest failure the way every HTTP collaborator reports it.
    pub(crate) fn from_reqwest(e: reqwest::Error, base_url: &str, timeout_secs: u64) -> Self {
        if e.is_connect() {
            ServiceError::Connection(base_url.to_string())
        } else if e.is_timeout() {
            ServiceError::Timeout(timeout_secs)
        } else if e.is_decode() {
            ServiceError::ResponseParsing(e.to_string())
        } else {
            ServiceError::Connection(e.to_string())
        }
    }
}
