//! Error types for the Lexicon engine.

use crate::EntryKey;
use thiserror::Error;

/// All possible errors from the Lexicon engine.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum Error {
    // Validation errors
    #[error("invalid payload: {0}")]
    InvalidPayload(String),

    #[error("missing required field: {0}")]
    MissingRequiredField(String),

    #[error("type mismatch for field '{field}': expected {expected}, got {got}")]
    TypeMismatch {
        field: String,
        expected: String,
        got: String,
    },

    #[error("invalid record {key}: {reason}")]
    InvalidRecord { key: EntryKey, reason: String },

    // Indexing errors
    #[error("entry {key} cannot be indexed: {reason}")]
    Unindexable { key: EntryKey, reason: String },

    #[error("entry already indexed: {0}")]
    DuplicateEntry(EntryKey),

    #[error("search index error: {0}")]
    Index(String),

    // Sync errors
    #[error("invalid checkpoint token: {0}")]
    InvalidCheckpoint(String),

    #[error("unknown conflict policy: {0}")]
    UnknownPolicy(String),
}

impl From<tantivy::TantivyError> for Error {
    fn from(err: tantivy::TantivyError) -> Self {
        Error::Index(err.to_string())
    }
}

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, Error>;
