//! Error types for the knowledge ingestion queue.

use std::time::Duration;

use thiserror::Error;
use uuid::Uuid;

/// Result type alias using the queue's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for queue, store, and backend operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Knowledge base missing from the store
    #[error("Knowledge base not found: {0}")]
    BaseNotFound(Uuid),

    /// Item missing from its knowledge base
    #[error("Knowledge item {item_id} not found in base {base_id}")]
    ItemNotFound { base_id: Uuid, item_id: Uuid },

    /// Note body missing from the note content store
    #[error("Note content not found: {0}")]
    NoteNotFound(Uuid),

    /// Ingestion backend call failed
    #[error("Ingestion error: {0}")]
    Ingestion(String),

    /// Item store read or write failed
    #[error("Store error: {0}")]
    Store(String),

    /// Ingestion attempt exceeded its time budget
    #[error("Ingestion timed out after {0:?}")]
    Timeout(Duration),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),

    /// File I/O operation failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}
