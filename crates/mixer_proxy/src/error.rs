//! Error types for proxy synchronization and the codec

use mixer_core::{GraphError, Uuid};
use thiserror::Error;

/// Failure to apply a received message to the local graph
#[derive(Debug, Error)]
pub enum SyncError {
    /// The message targets a datablock this peer does not have
    #[error("Unknown datablock {0}")]
    UnknownDatablock(Uuid),

    #[error("Graph error: {0}")]
    Graph(#[from] GraphError),
}

/// Failure to encode an outgoing message
#[derive(Debug, Error)]
pub enum EncodeError {
    /// The top-level class is not in the registry
    #[error("Class '{0}' is not registered")]
    Unregistered(String),

    /// A required nested object of the class could not be encoded
    #[error("Required field of '{0}' could not be encoded")]
    Incomplete(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Failure to decode an incoming message.
///
/// A message that fails to decode is undelivered as a whole.
#[derive(Debug, Error)]
pub enum DecodeError {
    /// Payload is not valid JSON
    #[error("Malformed payload: {0}")]
    Json(#[from] serde_json::Error),

    /// Top-level value carries no class tag
    #[error("Top-level value is not a tagged object")]
    Untagged,

    /// Untagged scalar of an unknown shape
    #[error("Invalid value: {0}")]
    InvalidValue(String),

    /// Class tag is not in the registry
    #[error("Class '{0}' is not registered")]
    Unregistered(String),

    #[error("Class '{class}' is missing required argument '{argument}'")]
    MissingArgument { class: String, argument: String },

    #[error("Invalid field '{field}' in '{class}': {reason}")]
    InvalidField {
        class: String,
        field: String,
        reason: String,
    },

    /// A registered class in a position that expects another one
    #[error("Expected {expected}, found class '{found}'")]
    UnexpectedClass { expected: &'static str, found: String },
}

pub type SyncResult<T> = Result<T, SyncError>;
pub type EncodeResult<T> = Result<T, EncodeError>;
pub type DecodeResult<T> = Result<T, DecodeError>;
