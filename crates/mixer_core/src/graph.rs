//! The external graph contract
//!
//! The host application's object model is treated as an opaque graph of
//! typed nodes (datablocks) grouped in named root collections. Everything
//! the synchronization engine needs from the host goes through the
//! `ExternalGraph` capability trait, addressed by `(NodeHandle, AttrPath)`.

use crate::error::GraphResult;
use crate::path::AttrPath;
use crate::value::Value;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Opaque, process-local handle to a host node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeHandle(pub u64);

/// Summary of one node as enumerated from a root collection
#[derive(Debug, Clone, PartialEq)]
pub struct NodeInfo {
    pub handle: NodeHandle,
    /// Current name, mutable and not an identity
    pub name: String,
    /// Concrete host type, e.g. `Camera`
    pub type_name: String,
    /// Root collection holding the node, e.g. `cameras`
    pub collection: String,
    /// Value of the uuid storage attribute, when assigned
    pub uuid: Option<Uuid>,
}

/// One link of a node graph.
///
/// Sockets are addressed by node name and socket position, socket
/// identifiers are not unique within a node.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NodeLink {
    pub from_node: String,
    pub from_socket: usize,
    pub to_node: String,
    pub to_socket: usize,
}

impl NodeLink {
    pub fn new(
        from_node: impl Into<String>,
        from_socket: usize,
        to_node: impl Into<String>,
        to_socket: usize,
    ) -> Self {
        Self {
            from_node: from_node.into(),
            from_socket,
            to_node: to_node.into(),
            to_socket,
        }
    }
}

/// Shape of an attribute as reported by the host
#[derive(Debug, Clone, PartialEq)]
pub enum Attr {
    /// Scalar value
    Value(Value),
    /// Embedded struct, `keys` in declaration order
    Struct { type_name: String, keys: Vec<String> },
    /// Ordered collection of `len` items
    Sequence { item_type: String, len: usize },
    /// Collection keyed by item name, `keys` in collection order
    Mapping { item_type: String, keys: Vec<String> },
    /// Pointer to another node
    Datablock(Option<NodeHandle>),
    /// Link topology of a node graph, read through `read_links`
    Links,
    /// Modifier inputs driven by a node group, read through `read_custom_inputs`
    CustomInputs,
}

/// Structural role of an attribute, used by property filters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AttrKind {
    Value,
    Struct,
    Collection,
    Pointer,
}

impl Attr {
    pub fn kind(&self) -> AttrKind {
        match self {
            Attr::Value(_) => AttrKind::Value,
            Attr::Struct { .. } | Attr::CustomInputs => AttrKind::Struct,
            Attr::Sequence { .. } | Attr::Mapping { .. } | Attr::Links => AttrKind::Collection,
            Attr::Datablock(_) => AttrKind::Pointer,
        }
    }
}

/// Capability interface over the host application's data model.
///
/// Implemented per host through a finite set of typed adapters. All calls
/// happen on the host's main thread, from within the synchronization tick.
pub trait ExternalGraph {
    /// Names of the root collections the host exposes
    fn collection_names(&self) -> Vec<String>;

    /// Nodes of a root collection, in host order
    fn enumerate_collection(&self, collection: &str) -> GraphResult<Vec<NodeInfo>>;

    /// Current summary of a node
    fn node_info(&self, node: NodeHandle) -> Option<NodeInfo>;

    /// Shape and, for scalars, value of an attribute
    fn get_attribute(&self, node: NodeHandle, path: &AttrPath) -> GraphResult<Attr>;

    /// Link topology stored at `path`
    fn read_links(&self, node: NodeHandle, path: &AttrPath) -> GraphResult<Vec<NodeLink>>;

    /// Custom inputs stored at `path`, in node group input order
    fn read_custom_inputs(&self, node: NodeHandle, path: &AttrPath) -> GraphResult<Vec<(String, Value)>>;

    /// Base types of `type_name`, nearest first, excluding the type itself
    fn type_bases(&self, type_name: &str) -> Vec<String>;

    /// Root collection declared for a node type
    fn root_collection(&self, type_name: &str) -> Option<String>;

    /// Nodes changed since the previous call
    fn take_updates(&mut self) -> Vec<NodeHandle>;

    /// Write a scalar attribute
    fn set_value(&mut self, node: NodeHandle, path: &AttrPath, value: Value) -> GraphResult<()>;

    /// Point a reference attribute at another node, or clear it
    fn set_reference(&mut self, node: NodeHandle, path: &AttrPath, target: Option<NodeHandle>) -> GraphResult<()>;

    /// Grow or shrink an ordered collection; new items get type defaults
    fn resize_sequence(&mut self, node: NodeHandle, path: &AttrPath, len: usize) -> GraphResult<()>;

    /// Add an item to a keyed collection; no-op when the key exists
    fn insert_item(&mut self, node: NodeHandle, path: &AttrPath, key: &str) -> GraphResult<()>;

    /// Remove an item from a keyed collection
    fn remove_item(&mut self, node: NodeHandle, path: &AttrPath, key: &str) -> GraphResult<()>;

    /// Clear and rebuild the link topology at `path`
    fn write_links(&mut self, node: NodeHandle, path: &AttrPath, links: &[NodeLink]) -> GraphResult<()>;

    /// Write one custom input through the modifier side channel
    fn write_custom_input(&mut self, node: NodeHandle, path: &AttrPath, identifier: &str, value: Value) -> GraphResult<()>;

    /// Create a node in a root collection. The host may adjust the name.
    fn create_node(&mut self, collection: &str, name: &str, type_name: &str) -> GraphResult<NodeHandle>;

    /// Remove a node from its root collection
    fn remove_node(&mut self, node: NodeHandle) -> GraphResult<()>;

    /// Rename a node. The host may adjust the name; the actual name is returned.
    fn rename_node(&mut self, node: NodeHandle, name: &str) -> GraphResult<String>;

    /// Write the uuid storage attribute
    fn set_uuid(&mut self, node: NodeHandle, uuid: Uuid) -> GraphResult<()>;
}
