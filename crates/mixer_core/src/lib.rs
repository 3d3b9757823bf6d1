//! # Mixer Core - External Graph Primitives
//!
//! Shared vocabulary of the synchronization engine: scalar values,
//! attribute paths, node handles, and the capability trait through which
//! the host application's object model is read and written.
//!
//! ## Key Concepts
//!
//! - **ExternalGraph**: typed adapter over the host's data model
//! - **NodeHandle**: process-local handle of a host node (datablock)
//! - **AttrPath**: address of an attribute relative to a node root
//! - **MemoryGraph**: in-memory adapter, used by tests and headless peers

pub mod error;
pub mod graph;
pub mod memory;
pub mod path;
pub mod value;

pub use error::{GraphError, GraphResult};
pub use graph::{Attr, AttrKind, ExternalGraph, NodeHandle, NodeInfo, NodeLink};
pub use memory::{MemoryAttr, MemoryGraph, MemoryNode, MemoryType};
pub use path::{AttrPath, PathSegment};
pub use value::{Bytes, Value};

pub use uuid::Uuid;
