//! Error types for external graph access

use crate::graph::NodeHandle;
use crate::path::AttrPath;
use thiserror::Error;

/// Errors raised by an `ExternalGraph` implementation.
///
/// All of these are attribute-level failures: callers log them and move on
/// to the next attribute rather than aborting a whole load or save.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum GraphError {
    /// Node handle does not refer to a live node
    #[error("Unknown node: {0:?}")]
    UnknownNode(NodeHandle),

    /// Attribute path does not exist on the node
    #[error("No attribute '{path}' on node {node:?}")]
    NoSuchAttribute { node: NodeHandle, path: AttrPath },

    /// Attribute exists but cannot be written
    #[error("Attribute '{path}' on node {node:?} is read-only")]
    ReadOnly { node: NodeHandle, path: AttrPath },

    /// Value kind does not fit the attribute
    #[error("Type mismatch at '{path}': expected {expected}, got {got}")]
    TypeMismatch {
        path: AttrPath,
        expected: String,
        got: String,
    },

    /// Index past the end of an ordered collection
    #[error("Index {index} out of range at '{path}' (len {len})")]
    IndexOutOfRange {
        path: AttrPath,
        index: usize,
        len: usize,
    },

    /// Type name is not known to the host
    #[error("Unknown type: {0}")]
    UnknownType(String),

    /// Collection name is not known to the host
    #[error("Unknown collection: {0}")]
    UnknownCollection(String),
}

/// Result type for graph operations
pub type GraphResult<T> = Result<T, GraphError>;
