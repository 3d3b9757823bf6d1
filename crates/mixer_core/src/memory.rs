//! In-memory external graph
//!
//! `MemoryGraph` is a typed adapter holding its whole data model in plain
//! Rust values. It behaves like a host would: node names are unique per
//! collection, removing a node clears pointers to it, unknown attributes and
//! read-only attributes reject writes, and every write lands in the
//! change-notification batch.

use crate::error::{GraphError, GraphResult};
use crate::graph::{Attr, ExternalGraph, NodeHandle, NodeInfo, NodeLink};
use crate::path::{AttrPath, PathSegment};
use crate::value::Value;
use std::collections::{BTreeMap, HashMap, HashSet};
use uuid::Uuid;

/// Stored attribute of a memory node
#[derive(Debug, Clone, PartialEq)]
pub enum MemoryAttr {
    Value(Value),
    Struct {
        type_name: String,
        fields: Vec<(String, MemoryAttr)>,
    },
    Sequence {
        item_type: String,
        items: Vec<MemoryAttr>,
    },
    Mapping {
        item_type: String,
        items: Vec<(String, MemoryAttr)>,
    },
    Datablock(Option<NodeHandle>),
    Links(Vec<NodeLink>),
    CustomInputs(Vec<(String, Value)>),
}

impl MemoryAttr {
    /// Empty ordered collection of `item_type`
    pub fn sequence(item_type: impl Into<String>) -> Self {
        Self::Sequence {
            item_type: item_type.into(),
            items: Vec::new(),
        }
    }

    /// Empty keyed collection of `item_type`
    pub fn mapping(item_type: impl Into<String>) -> Self {
        Self::Mapping {
            item_type: item_type.into(),
            items: Vec::new(),
        }
    }

    fn child(&self, segment: &PathSegment) -> Option<&MemoryAttr> {
        match (self, segment) {
            (MemoryAttr::Struct { fields, .. }, PathSegment::Key(key)) => {
                fields.iter().find(|(k, _)| k == key).map(|(_, v)| v)
            }
            (MemoryAttr::Sequence { items, .. }, PathSegment::Index(i)) => items.get(*i),
            (MemoryAttr::Mapping { items, .. }, PathSegment::Key(key)) => {
                items.iter().find(|(k, _)| k == key).map(|(_, v)| v)
            }
            (MemoryAttr::Mapping { items, .. }, PathSegment::Index(i)) => items.get(*i).map(|(_, v)| v),
            _ => None,
        }
    }

    fn child_mut(&mut self, segment: &PathSegment) -> Option<&mut MemoryAttr> {
        match (self, segment) {
            (MemoryAttr::Struct { fields, .. }, PathSegment::Key(key)) => {
                fields.iter_mut().find(|(k, _)| k == key).map(|(_, v)| v)
            }
            (MemoryAttr::Sequence { items, .. }, PathSegment::Index(i)) => items.get_mut(*i),
            (MemoryAttr::Mapping { items, .. }, PathSegment::Key(key)) => {
                items.iter_mut().find(|(k, _)| k == key).map(|(_, v)| v)
            }
            (MemoryAttr::Mapping { items, .. }, PathSegment::Index(i)) => {
                items.get_mut(*i).map(|(_, v)| v)
            }
            _ => None,
        }
    }

    fn shape(&self) -> &'static str {
        match self {
            MemoryAttr::Value(_) => "value",
            MemoryAttr::Struct { .. } => "struct",
            MemoryAttr::Sequence { .. } => "sequence",
            MemoryAttr::Mapping { .. } => "mapping",
            MemoryAttr::Datablock(_) => "datablock",
            MemoryAttr::Links(_) => "links",
            MemoryAttr::CustomInputs(_) => "custom inputs",
        }
    }

    fn clear_references_to(&mut self, target: NodeHandle) {
        match self {
            MemoryAttr::Datablock(slot) if *slot == Some(target) => *slot = None,
            MemoryAttr::Struct { fields, .. } => {
                fields.iter_mut().for_each(|(_, v)| v.clear_references_to(target))
            }
            MemoryAttr::Sequence { items, .. } => {
                items.iter_mut().for_each(|v| v.clear_references_to(target))
            }
            MemoryAttr::Mapping { items, .. } => {
                items.iter_mut().for_each(|(_, v)| v.clear_references_to(target))
            }
            _ => {}
        }
    }
}

/// Declaration of a node or struct type
#[derive(Debug, Clone)]
pub struct MemoryType {
    pub name: String,
    /// Direct base type
    pub base: Option<String>,
    /// Root collection, for node types
    pub collection: Option<String>,
    /// Declared fields with their default values
    pub fields: Vec<(String, MemoryAttr)>,
    pub read_only: HashSet<String>,
}

impl MemoryType {
    /// A node type living in `collection`
    pub fn datablock(name: impl Into<String>, collection: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            base: None,
            collection: Some(collection.into()),
            fields: Vec::new(),
            read_only: HashSet::new(),
        }
    }

    /// An embedded struct type
    pub fn structure(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            base: None,
            collection: None,
            fields: Vec::new(),
            read_only: HashSet::new(),
        }
    }

    pub fn with_base(mut self, base: impl Into<String>) -> Self {
        self.base = Some(base.into());
        self
    }

    pub fn with_field(mut self, name: impl Into<String>, default: MemoryAttr) -> Self {
        self.fields.push((name.into(), default));
        self
    }

    /// Scalar field with its default value
    pub fn with_value(self, name: impl Into<String>, default: impl Into<Value>) -> Self {
        self.with_field(name, MemoryAttr::Value(default.into()))
    }

    /// Field whose value the host computes
    pub fn with_read_only(mut self, name: impl Into<String>, default: impl Into<Value>) -> Self {
        let name = name.into();
        self.read_only.insert(name.clone());
        self.with_value(name, default)
    }
}

/// A node stored in a `MemoryGraph`
#[derive(Debug, Clone)]
pub struct MemoryNode {
    pub name: String,
    pub type_name: String,
    pub collection: String,
    pub uuid: Option<Uuid>,
    pub data: MemoryAttr,
}

/// External graph held entirely in memory
#[derive(Debug, Default)]
pub struct MemoryGraph {
    types: HashMap<String, MemoryType>,
    collections: Vec<String>,
    nodes: BTreeMap<NodeHandle, MemoryNode>,
    next_handle: u64,
    updates: Vec<NodeHandle>,
}

impl MemoryGraph {
    /// Create an empty graph
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare a type. Node types also declare their root collection.
    pub fn register_type(&mut self, ty: MemoryType) -> &mut Self {
        if let Some(collection) = &ty.collection {
            self.add_collection(collection.clone());
        }
        self.types.insert(ty.name.clone(), ty);
        self
    }

    /// Declare a root collection
    pub fn add_collection(&mut self, name: impl Into<String>) -> &mut Self {
        let name = name.into();
        if !self.collections.contains(&name) {
            self.collections.push(name);
        }
        self
    }

    /// Build the default value of a struct type, base fields first
    pub fn instantiate(&self, type_name: &str) -> GraphResult<MemoryAttr> {
        let mut chain = vec![type_name.to_string()];
        chain.extend(self.type_bases(type_name));
        let mut fields: Vec<(String, MemoryAttr)> = Vec::new();
        for name in chain.iter().rev() {
            let ty = self
                .types
                .get(name)
                .ok_or_else(|| GraphError::UnknownType(name.clone()))?;
            for (key, default) in &ty.fields {
                match fields.iter_mut().find(|(k, _)| k == key) {
                    Some(slot) => slot.1 = default.clone(),
                    None => fields.push((key.clone(), default.clone())),
                }
            }
        }
        Ok(MemoryAttr::Struct {
            type_name: type_name.to_string(),
            fields,
        })
    }

    fn new_item(&self, item_type: &str) -> MemoryAttr {
        self.instantiate(item_type)
            .unwrap_or(MemoryAttr::Value(Value::Null))
    }

    /// Stored node, for inspection
    pub fn node(&self, handle: NodeHandle) -> Option<&MemoryNode> {
        self.nodes.get(&handle)
    }

    /// Handle of the node called `name` in `collection`
    pub fn find(&self, collection: &str, name: &str) -> Option<NodeHandle> {
        self.nodes
            .iter()
            .find(|(_, n)| n.collection == collection && n.name == name)
            .map(|(h, _)| *h)
    }

    /// Handle of the node carrying `uuid`
    pub fn find_uuid(&self, uuid: Uuid) -> Option<NodeHandle> {
        self.nodes
            .iter()
            .find(|(_, n)| n.uuid == Some(uuid))
            .map(|(h, _)| *h)
    }

    /// Stored attribute at a dotted or built path
    pub fn attr(&self, node: NodeHandle, path: &AttrPath) -> Option<&MemoryAttr> {
        let mut current = &self.nodes.get(&node)?.data;
        for segment in path.segments() {
            current = current.child(segment)?;
        }
        Some(current)
    }

    /// Scalar at `path`, if it is one
    pub fn value(&self, node: NodeHandle, path: impl Into<AttrPath>) -> Option<Value> {
        match self.attr(node, &path.into())? {
            MemoryAttr::Value(v) => Some(v.clone()),
            _ => None,
        }
    }

    /// Number of nodes across all collections
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    fn unique_name(&self, collection: &str, wanted: &str, except: Option<NodeHandle>) -> String {
        let taken = |name: &str| {
            self.nodes
                .iter()
                .any(|(h, n)| Some(*h) != except && n.collection == collection && n.name == name)
        };
        if !taken(wanted) {
            return wanted.to_string();
        }
        (1..)
            .map(|i| format!("{}.{:03}", wanted, i))
            .find(|candidate| !taken(candidate))
            .unwrap_or_else(|| wanted.to_string())
    }

    fn mark_updated(&mut self, node: NodeHandle) {
        if !self.updates.contains(&node) {
            self.updates.push(node);
        }
    }

    fn is_read_only(&self, type_name: &str, key: &str) -> bool {
        std::iter::once(type_name.to_string())
            .chain(self.type_bases(type_name))
            .filter_map(|name| self.types.get(&name))
            .any(|ty| ty.read_only.contains(key))
    }

    fn resolve_mut(&mut self, node: NodeHandle, path: &AttrPath) -> GraphResult<&mut MemoryAttr> {
        let mut current = &mut self
            .nodes
            .get_mut(&node)
            .ok_or(GraphError::UnknownNode(node))?
            .data;
        for segment in path.segments() {
            current = current
                .child_mut(segment)
                .ok_or_else(|| GraphError::NoSuchAttribute {
                    node,
                    path: path.clone(),
                })?;
        }
        Ok(current)
    }

    /// Check the owning struct of `path` allows writing its last segment
    fn check_writable(&self, node: NodeHandle, path: &AttrPath) -> GraphResult<()> {
        let (Some(parent), Some(PathSegment::Key(key))) = (path.parent(), path.last()) else {
            return Ok(());
        };
        if let Some(MemoryAttr::Struct { type_name, .. }) = self.attr(node, &parent) {
            if self.is_read_only(type_name, key) {
                return Err(GraphError::ReadOnly {
                    node,
                    path: path.clone(),
                });
            }
        }
        Ok(())
    }

    fn mismatch(path: &AttrPath, expected: &str, found: &MemoryAttr) -> GraphError {
        GraphError::TypeMismatch {
            path: path.clone(),
            expected: expected.to_string(),
            got: found.shape().to_string(),
        }
    }
}

impl ExternalGraph for MemoryGraph {
    fn collection_names(&self) -> Vec<String> {
        self.collections.clone()
    }

    fn enumerate_collection(&self, collection: &str) -> GraphResult<Vec<NodeInfo>> {
        if !self.collections.iter().any(|c| c == collection) {
            return Err(GraphError::UnknownCollection(collection.to_string()));
        }
        Ok(self
            .nodes
            .keys()
            .filter_map(|h| self.node_info(*h))
            .filter(|info| info.collection == collection)
            .collect())
    }

    fn node_info(&self, node: NodeHandle) -> Option<NodeInfo> {
        self.nodes.get(&node).map(|n| NodeInfo {
            handle: node,
            name: n.name.clone(),
            type_name: n.type_name.clone(),
            collection: n.collection.clone(),
            uuid: n.uuid,
        })
    }

    fn get_attribute(&self, node: NodeHandle, path: &AttrPath) -> GraphResult<Attr> {
        if !self.nodes.contains_key(&node) {
            return Err(GraphError::UnknownNode(node));
        }
        let attr = self.attr(node, path).ok_or_else(|| GraphError::NoSuchAttribute {
            node,
            path: path.clone(),
        })?;
        Ok(match attr {
            MemoryAttr::Value(v) => Attr::Value(v.clone()),
            MemoryAttr::Struct { type_name, fields } => Attr::Struct {
                type_name: type_name.clone(),
                keys: fields.iter().map(|(k, _)| k.clone()).collect(),
            },
            MemoryAttr::Sequence { item_type, items } => Attr::Sequence {
                item_type: item_type.clone(),
                len: items.len(),
            },
            MemoryAttr::Mapping { item_type, items } => Attr::Mapping {
                item_type: item_type.clone(),
                keys: items.iter().map(|(k, _)| k.clone()).collect(),
            },
            MemoryAttr::Datablock(target) => Attr::Datablock(*target),
            MemoryAttr::Links(_) => Attr::Links,
            MemoryAttr::CustomInputs(_) => Attr::CustomInputs,
        })
    }

    fn read_links(&self, node: NodeHandle, path: &AttrPath) -> GraphResult<Vec<NodeLink>> {
        match self.attr(node, path) {
            Some(MemoryAttr::Links(links)) => Ok(links.clone()),
            Some(other) => Err(Self::mismatch(path, "links", other)),
            None => Err(GraphError::NoSuchAttribute {
                node,
                path: path.clone(),
            }),
        }
    }

    fn read_custom_inputs(&self, node: NodeHandle, path: &AttrPath) -> GraphResult<Vec<(String, Value)>> {
        match self.attr(node, path) {
            Some(MemoryAttr::CustomInputs(inputs)) => Ok(inputs.clone()),
            Some(other) => Err(Self::mismatch(path, "custom inputs", other)),
            None => Err(GraphError::NoSuchAttribute {
                node,
                path: path.clone(),
            }),
        }
    }

    fn type_bases(&self, type_name: &str) -> Vec<String> {
        let mut bases = Vec::new();
        let mut current = self.types.get(type_name).and_then(|t| t.base.clone());
        while let Some(base) = current {
            if bases.contains(&base) {
                break;
            }
            current = self.types.get(&base).and_then(|t| t.base.clone());
            bases.push(base);
        }
        bases
    }

    fn root_collection(&self, type_name: &str) -> Option<String> {
        std::iter::once(type_name.to_string())
            .chain(self.type_bases(type_name))
            .find_map(|name| self.types.get(&name).and_then(|t| t.collection.clone()))
    }

    fn take_updates(&mut self) -> Vec<NodeHandle> {
        let nodes = &self.nodes;
        self.updates
            .drain(..)
            .filter(|h| nodes.contains_key(h))
            .collect()
    }

    fn set_value(&mut self, node: NodeHandle, path: &AttrPath, value: Value) -> GraphResult<()> {
        self.check_writable(node, path)?;
        let slot = self.resolve_mut(node, path)?;
        match slot {
            MemoryAttr::Value(current) => *current = value,
            other => return Err(Self::mismatch(path, "value", other)),
        }
        self.mark_updated(node);
        Ok(())
    }

    fn set_reference(&mut self, node: NodeHandle, path: &AttrPath, target: Option<NodeHandle>) -> GraphResult<()> {
        if let Some(target) = target {
            if !self.nodes.contains_key(&target) {
                return Err(GraphError::UnknownNode(target));
            }
        }
        self.check_writable(node, path)?;
        let slot = self.resolve_mut(node, path)?;
        match slot {
            MemoryAttr::Datablock(current) => *current = target,
            other => return Err(Self::mismatch(path, "datablock", other)),
        }
        self.mark_updated(node);
        Ok(())
    }

    fn resize_sequence(&mut self, node: NodeHandle, path: &AttrPath, len: usize) -> GraphResult<()> {
        let item_type = match self.attr(node, path) {
            Some(MemoryAttr::Sequence { item_type, .. }) => item_type.clone(),
            Some(other) => return Err(Self::mismatch(path, "sequence", other)),
            None => {
                return Err(GraphError::NoSuchAttribute {
                    node,
                    path: path.clone(),
                })
            }
        };
        let template = self.new_item(&item_type);
        if let MemoryAttr::Sequence { items, .. } = self.resolve_mut(node, path)? {
            items.resize(len, template);
        }
        self.mark_updated(node);
        Ok(())
    }

    fn insert_item(&mut self, node: NodeHandle, path: &AttrPath, key: &str) -> GraphResult<()> {
        let item_type = match self.attr(node, path) {
            Some(MemoryAttr::Mapping { item_type, items }) => {
                if items.iter().any(|(k, _)| k == key) {
                    return Ok(());
                }
                item_type.clone()
            }
            Some(other) => return Err(Self::mismatch(path, "mapping", other)),
            None => {
                return Err(GraphError::NoSuchAttribute {
                    node,
                    path: path.clone(),
                })
            }
        };
        let item = self.new_item(&item_type);
        if let MemoryAttr::Mapping { items, .. } = self.resolve_mut(node, path)? {
            items.push((key.to_string(), item));
        }
        self.mark_updated(node);
        Ok(())
    }

    fn remove_item(&mut self, node: NodeHandle, path: &AttrPath, key: &str) -> GraphResult<()> {
        match self.resolve_mut(node, path)? {
            MemoryAttr::Mapping { items, .. } => items.retain(|(k, _)| k != key),
            other => return Err(Self::mismatch(path, "mapping", other)),
        }
        self.mark_updated(node);
        Ok(())
    }

    fn write_links(&mut self, node: NodeHandle, path: &AttrPath, links: &[NodeLink]) -> GraphResult<()> {
        match self.resolve_mut(node, path)? {
            MemoryAttr::Links(current) => *current = links.to_vec(),
            other => return Err(Self::mismatch(path, "links", other)),
        }
        self.mark_updated(node);
        Ok(())
    }

    fn write_custom_input(&mut self, node: NodeHandle, path: &AttrPath, identifier: &str, value: Value) -> GraphResult<()> {
        match self.resolve_mut(node, path)? {
            MemoryAttr::CustomInputs(inputs) => {
                let slot = inputs
                    .iter_mut()
                    .find(|(id, _)| id == identifier)
                    .ok_or_else(|| GraphError::NoSuchAttribute {
                        node,
                        path: path.key(identifier),
                    })?;
                slot.1 = value;
            }
            other => return Err(Self::mismatch(path, "custom inputs", other)),
        }
        self.mark_updated(node);
        Ok(())
    }

    fn create_node(&mut self, collection: &str, name: &str, type_name: &str) -> GraphResult<NodeHandle> {
        if !self.collections.iter().any(|c| c == collection) {
            return Err(GraphError::UnknownCollection(collection.to_string()));
        }
        let data = self.instantiate(type_name)?;
        let name = self.unique_name(collection, name, None);
        self.next_handle += 1;
        let handle = NodeHandle(self.next_handle);
        self.nodes.insert(
            handle,
            MemoryNode {
                name,
                type_name: type_name.to_string(),
                collection: collection.to_string(),
                uuid: None,
                data,
            },
        );
        self.mark_updated(handle);
        log::debug!("Created {} node {:?} in '{}'", type_name, handle, collection);
        Ok(handle)
    }

    fn remove_node(&mut self, node: NodeHandle) -> GraphResult<()> {
        self.nodes.remove(&node).ok_or(GraphError::UnknownNode(node))?;
        self.updates.retain(|h| *h != node);
        let mut touched = Vec::new();
        for (handle, other) in self.nodes.iter_mut() {
            let before = other.data.clone();
            other.data.clear_references_to(node);
            if other.data != before {
                touched.push(*handle);
            }
        }
        log::debug!("Removed node {:?}, cleared {} referrer(s)", node, touched.len());
        for handle in touched {
            self.mark_updated(handle);
        }
        Ok(())
    }

    fn rename_node(&mut self, node: NodeHandle, name: &str) -> GraphResult<String> {
        let collection = self
            .nodes
            .get(&node)
            .map(|n| n.collection.clone())
            .ok_or(GraphError::UnknownNode(node))?;
        let name = self.unique_name(&collection, name, Some(node));
        if let Some(n) = self.nodes.get_mut(&node) {
            n.name = name.clone();
        }
        self.mark_updated(node);
        Ok(name)
    }

    fn set_uuid(&mut self, node: NodeHandle, uuid: Uuid) -> GraphResult<()> {
        let n = self.nodes.get_mut(&node).ok_or(GraphError::UnknownNode(node))?;
        n.uuid = Some(uuid);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn graph() -> MemoryGraph {
        let mut graph = MemoryGraph::new();
        graph
            .register_type(MemoryType::structure("ID").with_read_only("users", 0))
            .register_type(
                MemoryType::datablock("Camera", "cameras")
                    .with_base("ID")
                    .with_value("lens", 50.0)
                    .with_field("dof_object", MemoryAttr::Datablock(None)),
            )
            .register_type(MemoryType::datablock("Object", "objects").with_base("ID"));
        graph
    }

    #[test]
    fn test_names_are_unique_per_collection() {
        let mut graph = graph();
        let a = graph.create_node("cameras", "Cam", "Camera").unwrap();
        let b = graph.create_node("cameras", "Cam", "Camera").unwrap();
        assert_eq!(graph.node(a).unwrap().name, "Cam");
        assert_eq!(graph.node(b).unwrap().name, "Cam.001");
        assert_eq!(graph.rename_node(b, "Cam").unwrap(), "Cam.001");
    }

    #[test]
    fn test_base_fields_and_read_only() {
        let mut graph = graph();
        let cam = graph.create_node("cameras", "Cam", "Camera").unwrap();
        assert_eq!(graph.value(cam, "users"), Some(Value::Int(0)));
        let err = graph.set_value(cam, &AttrPath::from("users"), Value::Int(3)).unwrap_err();
        assert!(matches!(err, GraphError::ReadOnly { .. }));
        graph.set_value(cam, &AttrPath::from("lens"), Value::Float(35.0)).unwrap();
        assert_eq!(graph.value(cam, "lens"), Some(Value::Float(35.0)));
    }

    #[test]
    fn test_remove_clears_pointers() {
        let mut graph = graph();
        let cam = graph.create_node("cameras", "Cam", "Camera").unwrap();
        let obj = graph.create_node("objects", "Empty", "Object").unwrap();
        graph.set_reference(cam, &AttrPath::from("dof_object"), Some(obj)).unwrap();
        graph.take_updates();

        graph.remove_node(obj).unwrap();
        assert_eq!(graph.attr(cam, &AttrPath::from("dof_object")), Some(&MemoryAttr::Datablock(None)));
        assert_eq!(graph.take_updates(), vec![cam]);
    }
}
