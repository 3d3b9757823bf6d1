//! Proxies - the local mirror of the external graph
//!
//! A proxy tree copies the filtered attributes of one datablock. Structs and
//! collections are embedded, other datablocks are only ever referenced by
//! uuid. Each proxy kind knows how to load itself from the graph, write
//! itself back, compute a delta against a fresher copy and merge a delta.

use crate::context::SyncContext;
use crate::delta::{Delta, DeltaUpdate, ItemKey};
use mixer_core::{
    Attr, AttrPath, ExternalGraph, GraphError, GraphResult, NodeHandle, NodeLink, PathSegment, Uuid,
    Value,
};
use std::collections::BTreeMap;

/// Mirror of one attribute
#[derive(Debug, Clone, PartialEq)]
pub enum Proxy {
    Value(Value),
    Struct(StructProxy),
    Collection(StructCollectionProxy),
    DatablockRef(DatablockRefProxy),
    /// Reference attribute pointing at nothing
    NoneRef,
    NodeLinks(NodeLinksProxy),
    CustomInputs(CustomInputsProxy),
}

/// Embedded struct, members keyed by attribute name
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StructProxy {
    pub type_name: String,
    pub data: BTreeMap<String, Proxy>,
}

/// Ordered or keyed collection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CollectionKind {
    Sequence,
    Mapping,
}

/// Collection of struct, value or reference items
#[derive(Debug, Clone, PartialEq)]
pub struct StructCollectionProxy {
    pub kind: CollectionKind,
    pub item_type: String,
    /// Items in collection order. The key is the mapping key, or the
    /// position for sequences.
    pub items: Vec<(String, Proxy)>,
}

/// Reference to another datablock
#[derive(Debug, Clone, PartialEq)]
pub struct DatablockRefProxy {
    pub uuid: Uuid,
    /// Root collection of the target
    pub collection: String,
    /// Target name when the reference was read, for logs only
    pub name: String,
}

/// Links of a node graph, addressed by node name and socket position
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NodeLinksProxy {
    pub links: Vec<NodeLink>,
}

/// Modifier inputs driven by a node group, in group input order
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CustomInputsProxy {
    pub inputs: Vec<(String, Value)>,
}

/// Full-state mirror of one datablock
#[derive(Debug, Clone, PartialEq)]
pub struct DatablockProxy {
    pub uuid: Uuid,
    pub collection: String,
    pub name: String,
    pub type_name: String,
    pub data: StructProxy,
}

/// Outcome of `DatablockProxy::create_standalone_datablock`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Creation {
    pub handle: NodeHandle,
    /// Deferred references to the new datablock written after creation
    pub resolved: usize,
}

impl Proxy {
    /// Read the attribute at `path`. Unreadable attributes yield `None`.
    pub fn load(graph: &dyn ExternalGraph, node: NodeHandle, path: &AttrPath, ctx: &SyncContext) -> Option<Proxy> {
        match graph.get_attribute(node, path) {
            Ok(attr) => Self::from_attr(graph, node, path, attr, ctx),
            Err(e) => {
                log::info!("Skipping unreadable attribute {}: {}", path, e);
                None
            }
        }
    }

    fn from_attr(
        graph: &dyn ExternalGraph,
        node: NodeHandle,
        path: &AttrPath,
        attr: Attr,
        ctx: &SyncContext,
    ) -> Option<Proxy> {
        let loaded = match attr {
            Attr::Value(value) => Ok(Proxy::Value(value)),
            Attr::Struct { type_name, keys } => Ok(Proxy::Struct(StructProxy::load_members(
                graph, node, path, type_name, &keys, ctx,
            ))),
            Attr::Sequence { item_type, len } => {
                let items = (0..len)
                    .filter_map(|i| Some((i.to_string(), Proxy::load(graph, node, &path.index(i), ctx)?)))
                    .collect();
                Ok(Proxy::Collection(StructCollectionProxy {
                    kind: CollectionKind::Sequence,
                    item_type,
                    items,
                }))
            }
            Attr::Mapping { item_type, keys } => {
                let items = keys
                    .into_iter()
                    .filter_map(|key| {
                        let item = Proxy::load(graph, node, &path.key(key.clone()), ctx)?;
                        Some((key, item))
                    })
                    .collect();
                Ok(Proxy::Collection(StructCollectionProxy {
                    kind: CollectionKind::Mapping,
                    item_type,
                    items,
                }))
            }
            Attr::Datablock(None) => Ok(Proxy::NoneRef),
            Attr::Datablock(Some(target)) => {
                return DatablockRefProxy::load(graph, target).map(Proxy::DatablockRef);
            }
            Attr::Links => graph
                .read_links(node, path)
                .map(|links| Proxy::NodeLinks(NodeLinksProxy { links })),
            Attr::CustomInputs => graph
                .read_custom_inputs(node, path)
                .map(|inputs| Proxy::CustomInputs(CustomInputsProxy { inputs })),
        };
        match loaded {
            Ok(proxy) => Some(proxy),
            Err(e) => {
                log::info!("Skipping unreadable attribute {}: {}", path, e);
                None
            }
        }
    }

    /// Write this proxy into the graph at `path`
    pub fn save(
        &self,
        graph: &mut dyn ExternalGraph,
        node: NodeHandle,
        path: &AttrPath,
        ctx: &mut SyncContext,
    ) -> GraphResult<()> {
        match self {
            Proxy::Value(value) => graph.set_value(node, path, value.clone()),
            Proxy::Struct(s) => {
                s.save(graph, node, path, ctx);
                Ok(())
            }
            Proxy::Collection(c) => c.save(graph, node, path, ctx),
            Proxy::DatablockRef(r) => r.save(graph, node, path, ctx),
            Proxy::NoneRef => {
                ctx.state.unresolved.abandon_slot(ctx.owner, path);
                graph.set_reference(node, path, None)
            }
            Proxy::NodeLinks(l) => graph.write_links(node, path, &l.links),
            Proxy::CustomInputs(c) => c.save(graph, node, path),
        }
    }

    /// Compare against the current graph state
    pub fn diff(
        &self,
        graph: &dyn ExternalGraph,
        node: NodeHandle,
        path: &AttrPath,
        ctx: &SyncContext,
    ) -> Option<Delta> {
        let current = Proxy::load(graph, node, path, ctx)?;
        self.diff_against(&current)
    }

    /// Delta turning `self` into `current`, `None` when they are equal
    pub fn diff_against(&self, current: &Proxy) -> Option<Delta> {
        match (self, current) {
            (Proxy::Value(old), Proxy::Value(new)) => {
                (old != new).then(|| Delta::Update(DeltaUpdate::Value(new.clone())))
            }
            (Proxy::Struct(old), Proxy::Struct(new)) if old.type_name == new.type_name => {
                old.diff_against(new)
            }
            (Proxy::Collection(old), Proxy::Collection(new)) => old.diff_against(new),
            (Proxy::CustomInputs(old), Proxy::CustomInputs(new)) => old.diff_against(new),
            // references and links only change as a whole
            (old, new) => (old != new).then(|| Delta::Replace(new.clone())),
        }
    }

    /// Merge `delta` into this proxy, and into the graph when `to_external`.
    ///
    /// Applying the same delta twice leaves the proxy as applying it once.
    pub fn apply(
        &mut self,
        graph: &mut dyn ExternalGraph,
        node: NodeHandle,
        path: &AttrPath,
        delta: &Delta,
        ctx: &mut SyncContext,
        to_external: bool,
    ) -> GraphResult<()> {
        match delta {
            Delta::Replace(new) => {
                *self = new.clone();
                if to_external {
                    self.save(graph, node, path, ctx)?;
                }
                Ok(())
            }
            Delta::Update(update) => self.apply_update(graph, node, path, update, ctx, to_external),
        }
    }

    fn apply_update(
        &mut self,
        graph: &mut dyn ExternalGraph,
        node: NodeHandle,
        path: &AttrPath,
        update: &DeltaUpdate,
        ctx: &mut SyncContext,
        to_external: bool,
    ) -> GraphResult<()> {
        match (self, update) {
            (Proxy::Value(current), DeltaUpdate::Value(value)) => {
                *current = value.clone();
                if to_external {
                    graph.set_value(node, path, value.clone())?;
                }
                Ok(())
            }
            (Proxy::Struct(s), DeltaUpdate::Struct(fields)) => {
                s.apply_fields(graph, node, path, fields, ctx, to_external);
                Ok(())
            }
            (Proxy::Collection(c), DeltaUpdate::Items(items)) => {
                c.apply_items(graph, node, path, items, ctx, to_external);
                Ok(())
            }
            (Proxy::CustomInputs(c), DeltaUpdate::CustomInputs(inputs)) => {
                c.apply_inputs(graph, node, path, inputs, to_external)
            }
            (proxy, update) => Err(GraphError::TypeMismatch {
                path: path.clone(),
                expected: proxy.kind_name().to_string(),
                got: update.kind_name().to_string(),
            }),
        }
    }

    pub fn kind_name(&self) -> &'static str {
        match self {
            Proxy::Value(_) => "value",
            Proxy::Struct(_) => "struct",
            Proxy::Collection(_) => "collection",
            Proxy::DatablockRef(_) => "datablock reference",
            Proxy::NoneRef => "empty reference",
            Proxy::NodeLinks(_) => "node links",
            Proxy::CustomInputs(_) => "custom inputs",
        }
    }

    pub fn as_value(&self) -> Option<&Value> {
        match self {
            Proxy::Value(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_struct(&self) -> Option<&StructProxy> {
        match self {
            Proxy::Struct(s) => Some(s),
            _ => None,
        }
    }
}

impl StructProxy {
    pub fn new(type_name: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            data: BTreeMap::new(),
        }
    }

    pub fn with(mut self, key: impl Into<String>, proxy: Proxy) -> Self {
        self.data.insert(key.into(), proxy);
        self
    }

    pub fn get(&self, key: &str) -> Option<&Proxy> {
        self.data.get(key)
    }

    /// Load the members the filter selects, skipping unreadable ones
    fn load_members(
        graph: &dyn ExternalGraph,
        node: NodeHandle,
        path: &AttrPath,
        type_name: String,
        keys: &[String],
        ctx: &SyncContext,
    ) -> Self {
        let bases = graph.type_bases(&type_name);
        let mut data = BTreeMap::new();
        for key in keys {
            let member = path.key(key.clone());
            let attr = match graph.get_attribute(node, &member) {
                Ok(attr) => attr,
                Err(e) => {
                    log::info!("Skipping unreadable attribute {}: {}", member, e);
                    continue;
                }
            };
            if !ctx.filter.accepts(&type_name, &bases, key, attr.kind()) {
                continue;
            }
            if let Some(proxy) = Proxy::from_attr(graph, node, &member, attr, ctx) {
                data.insert(key.clone(), proxy);
            }
        }
        Self { type_name, data }
    }

    /// Write every member; a failed member is logged and the rest still written
    pub fn save(&self, graph: &mut dyn ExternalGraph, node: NodeHandle, path: &AttrPath, ctx: &mut SyncContext) {
        for (key, member) in &self.data {
            let member_path = path.key(key.clone());
            if let Err(e) = member.save(graph, node, &member_path, ctx) {
                log::warn!("Failed to write {}: {}", member_path, e);
            }
        }
    }

    /// Members missing from `current` are unchanged, except references:
    /// a reference retargeted out of the synchronized scope cannot be
    /// loaded, and is sent as an empty reference.
    pub fn diff_against(&self, current: &StructProxy) -> Option<Delta> {
        let mut fields: BTreeMap<String, Delta> = current
            .data
            .iter()
            .filter_map(|(key, new)| {
                let delta = match self.data.get(key) {
                    Some(old) => old.diff_against(new)?,
                    None => Delta::Replace(new.clone()),
                };
                Some((key.clone(), delta))
            })
            .collect();
        for (key, old) in &self.data {
            if matches!(old, Proxy::DatablockRef(_)) && !current.data.contains_key(key) {
                fields.insert(key.clone(), Delta::Replace(Proxy::NoneRef));
            }
        }
        (!fields.is_empty()).then(|| Delta::Update(DeltaUpdate::Struct(fields)))
    }

    pub fn apply_fields(
        &mut self,
        graph: &mut dyn ExternalGraph,
        node: NodeHandle,
        path: &AttrPath,
        fields: &BTreeMap<String, Delta>,
        ctx: &mut SyncContext,
        to_external: bool,
    ) {
        for (key, delta) in fields {
            let member_path = path.key(key.clone());
            let result = match (self.data.get_mut(key), delta) {
                (Some(member), delta) => member.apply(graph, node, &member_path, delta, ctx, to_external),
                (None, Delta::Replace(proxy)) => {
                    self.data.insert(key.clone(), proxy.clone());
                    if to_external {
                        proxy.save(graph, node, &member_path, ctx)
                    } else {
                        Ok(())
                    }
                }
                (None, Delta::Update(_)) => Err(GraphError::NoSuchAttribute {
                    node,
                    path: member_path.clone(),
                }),
            };
            if let Err(e) = result {
                log::warn!("Failed to apply change to {}: {}", member_path, e);
            }
        }
    }
}

impl StructCollectionProxy {
    pub fn sequence(item_type: impl Into<String>, items: Vec<Proxy>) -> Self {
        Self {
            kind: CollectionKind::Sequence,
            item_type: item_type.into(),
            items: items.into_iter().enumerate().map(|(i, p)| (i.to_string(), p)).collect(),
        }
    }

    pub fn mapping(item_type: impl Into<String>, items: Vec<(String, Proxy)>) -> Self {
        Self {
            kind: CollectionKind::Mapping,
            item_type: item_type.into(),
            items,
        }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    fn item_segment(&self, position: usize) -> PathSegment {
        match self.kind {
            CollectionKind::Sequence => PathSegment::Index(position),
            CollectionKind::Mapping => PathSegment::Key(self.items[position].0.clone()),
        }
    }

    fn item_key(&self, position: usize) -> ItemKey {
        match self.kind {
            CollectionKind::Sequence => ItemKey::Index(position),
            CollectionKind::Mapping => ItemKey::Key(self.items[position].0.clone()),
        }
    }

    /// Identity of an item: its `name` member, else its mapping key
    fn item_identity(&self, position: usize) -> Option<&str> {
        let (key, item) = &self.items[position];
        let named = item
            .as_struct()
            .and_then(|s| s.get("name"))
            .and_then(Proxy::as_value)
            .and_then(Value::as_str);
        match (named, self.kind) {
            (Some(name), _) => Some(name),
            (None, CollectionKind::Mapping) => Some(key.as_str()),
            (None, CollectionKind::Sequence) => None,
        }
    }

    /// Whether going from `self` to `current` needs a full replace.
    ///
    /// True when the item count changes, when the ordered item identities
    /// change, or when mapping keys are reordered. Field changes at stable
    /// positions do not need it.
    pub fn must_replace(&self, current: &StructCollectionProxy) -> bool {
        if self.kind != current.kind || self.items.len() != current.items.len() {
            return true;
        }
        if self.kind == CollectionKind::Mapping
            && self.items.iter().map(|(k, _)| k).ne(current.items.iter().map(|(k, _)| k))
        {
            return true;
        }
        (0..self.items.len()).any(|i| self.item_identity(i) != current.item_identity(i))
    }

    pub fn diff_against(&self, current: &StructCollectionProxy) -> Option<Delta> {
        if self.must_replace(current) {
            return Some(Delta::Replace(Proxy::Collection(current.clone())));
        }
        let items: Vec<(ItemKey, Delta)> = self
            .items
            .iter()
            .zip(&current.items)
            .enumerate()
            .filter_map(|(i, ((_, old), (_, new)))| Some((current.item_key(i), old.diff_against(new)?)))
            .collect();
        (!items.is_empty()).then(|| Delta::Update(DeltaUpdate::Items(items)))
    }

    /// Rebuild the collection structure, then write every item
    pub fn save(
        &self,
        graph: &mut dyn ExternalGraph,
        node: NodeHandle,
        path: &AttrPath,
        ctx: &mut SyncContext,
    ) -> GraphResult<()> {
        match self.kind {
            CollectionKind::Sequence => graph.resize_sequence(node, path, self.items.len())?,
            CollectionKind::Mapping => {
                let existing = match graph.get_attribute(node, path)? {
                    Attr::Mapping { keys, .. } => keys,
                    other => {
                        return Err(GraphError::TypeMismatch {
                            path: path.clone(),
                            expected: "mapping".into(),
                            got: format!("{:?}", other.kind()),
                        })
                    }
                };
                let wanted = self.items.iter().map(|(k, _)| k);
                if existing.iter().ne(wanted) {
                    for key in &existing {
                        graph.remove_item(node, path, key)?;
                    }
                    for (key, _) in &self.items {
                        graph.insert_item(node, path, key)?;
                    }
                }
            }
        }
        for (position, (_, item)) in self.items.iter().enumerate() {
            let item_path = path.child(self.item_segment(position));
            if let Err(e) = item.save(graph, node, &item_path, ctx) {
                log::warn!("Failed to write {}: {}", item_path, e);
            }
        }
        Ok(())
    }

    fn position(&self, key: &ItemKey) -> Option<usize> {
        match key {
            ItemKey::Index(i) => (*i < self.items.len()).then_some(*i),
            ItemKey::Key(k) => self.items.iter().position(|(item_key, _)| item_key == k),
        }
    }

    pub fn apply_items(
        &mut self,
        graph: &mut dyn ExternalGraph,
        node: NodeHandle,
        path: &AttrPath,
        items: &[(ItemKey, Delta)],
        ctx: &mut SyncContext,
        to_external: bool,
    ) {
        for (key, delta) in items {
            let item_path = path.child(key.segment());
            let Some(position) = self.position(key) else {
                log::warn!("No item {} to update", item_path);
                continue;
            };
            let item = &mut self.items[position].1;
            if let Err(e) = item.apply(graph, node, &item_path, delta, ctx, to_external) {
                log::warn!("Failed to apply change to {}: {}", item_path, e);
            }
        }
    }
}

impl DatablockRefProxy {
    /// Reference to `target`, or `None` when the target is outside the
    /// synchronized scope (it has no uuid)
    pub fn load(graph: &dyn ExternalGraph, target: NodeHandle) -> Option<Self> {
        let info = graph.node_info(target)?;
        match info.uuid {
            Some(uuid) => Some(Self {
                uuid,
                collection: info.collection,
                name: info.name,
            }),
            None => {
                log::info!("Skipping reference to '{}', it has no uuid", info.name);
                None
            }
        }
    }

    /// Point `path` at the target, or park the write until the target exists
    pub fn save(
        &self,
        graph: &mut dyn ExternalGraph,
        node: NodeHandle,
        path: &AttrPath,
        ctx: &mut SyncContext,
    ) -> GraphResult<()> {
        match ctx.state.locate(self.uuid, &self.collection, &*graph) {
            Some(target) => {
                ctx.state.unresolved.abandon_slot(ctx.owner, path);
                graph.set_reference(node, path, Some(target))
            }
            None => {
                let slot = path.clone();
                ctx.state.unresolved.register(
                    self.uuid,
                    ctx.owner,
                    path.clone(),
                    format!("{} -> {}/{}", path, self.collection, self.name),
                    Box::new(move |graph: &mut dyn ExternalGraph, target: NodeHandle| {
                        graph.set_reference(node, &slot, Some(target))
                    }),
                );
                Ok(())
            }
        }
    }
}

impl CustomInputsProxy {
    pub fn save(&self, graph: &mut dyn ExternalGraph, node: NodeHandle, path: &AttrPath) -> GraphResult<()> {
        for (identifier, value) in &self.inputs {
            graph.write_custom_input(node, path, identifier, value.clone())?;
        }
        Ok(())
    }

    /// Identifier changes are a replace, value changes an update
    pub fn diff_against(&self, current: &CustomInputsProxy) -> Option<Delta> {
        let same_inputs = self
            .inputs
            .iter()
            .map(|(id, _)| id)
            .eq(current.inputs.iter().map(|(id, _)| id));
        if !same_inputs {
            return Some(Delta::Replace(Proxy::CustomInputs(current.clone())));
        }
        let changed: Vec<(String, Value)> = self
            .inputs
            .iter()
            .zip(&current.inputs)
            .filter(|((_, old), (_, new))| old != new)
            .map(|(_, (id, new))| (id.clone(), new.clone()))
            .collect();
        (!changed.is_empty()).then(|| Delta::Update(DeltaUpdate::CustomInputs(changed)))
    }

    fn apply_inputs(
        &mut self,
        graph: &mut dyn ExternalGraph,
        node: NodeHandle,
        path: &AttrPath,
        inputs: &[(String, Value)],
        to_external: bool,
    ) -> GraphResult<()> {
        for (identifier, value) in inputs {
            match self.inputs.iter_mut().find(|(id, _)| id == identifier) {
                Some(slot) => slot.1 = value.clone(),
                None => {
                    log::warn!("No custom input '{}' at {}", identifier, path);
                    continue;
                }
            }
            if to_external {
                graph.write_custom_input(node, path, identifier, value.clone())?;
            }
        }
        Ok(())
    }
}

impl DatablockProxy {
    /// Load the full filtered state of a datablock that carries a uuid
    pub fn load(graph: &dyn ExternalGraph, handle: NodeHandle, ctx: &SyncContext) -> GraphResult<Self> {
        let info = graph.node_info(handle).ok_or(GraphError::UnknownNode(handle))?;
        let uuid = info.uuid.ok_or_else(|| GraphError::NoSuchAttribute {
            node: handle,
            path: AttrPath::from(crate::UUID_ATTRIBUTE),
        })?;
        let root = AttrPath::root();
        let data = match graph.get_attribute(handle, &root)? {
            Attr::Struct { type_name, keys } => {
                StructProxy::load_members(graph, handle, &root, type_name, &keys, ctx)
            }
            other => {
                return Err(GraphError::TypeMismatch {
                    path: root,
                    expected: "struct".into(),
                    got: format!("{:?}", other.kind()),
                })
            }
        };
        Ok(Self {
            uuid,
            collection: info.collection,
            name: info.name,
            type_name: info.type_name,
            data,
        })
    }

    /// Attribute-level changes of the datablock since it was mirrored
    pub fn diff(&self, graph: &dyn ExternalGraph, handle: NodeHandle, ctx: &SyncContext) -> Option<Delta> {
        match Self::load(graph, handle, ctx) {
            Ok(current) => self.data.diff_against(&current.data),
            Err(e) => {
                log::info!("Cannot diff '{}': {}", self.name, e);
                None
            }
        }
    }

    /// Merge a datablock-level delta
    pub fn apply(
        &mut self,
        graph: &mut dyn ExternalGraph,
        handle: NodeHandle,
        delta: &Delta,
        ctx: &mut SyncContext,
        to_external: bool,
    ) -> GraphResult<()> {
        let mut ctx = ctx.for_owner(self.uuid);
        let root = AttrPath::root();
        match delta {
            Delta::Update(DeltaUpdate::Struct(fields)) => {
                self.data.apply_fields(graph, handle, &root, fields, &mut ctx, to_external);
                Ok(())
            }
            Delta::Replace(Proxy::Struct(data)) => {
                self.data = data.clone();
                if to_external {
                    self.data.save(graph, handle, &root, &mut ctx);
                }
                Ok(())
            }
            Delta::Update(update) => Err(GraphError::TypeMismatch {
                path: root,
                expected: "struct update".into(),
                got: update.kind_name().into(),
            }),
            Delta::Replace(proxy) => Err(GraphError::TypeMismatch {
                path: root,
                expected: "struct".into(),
                got: proxy.kind_name().into(),
            }),
        }
    }

    /// Write the full state into an existing datablock
    pub fn save(&self, graph: &mut dyn ExternalGraph, handle: NodeHandle, ctx: &mut SyncContext) {
        let mut ctx = ctx.for_owner(self.uuid);
        self.data.save(graph, handle, &AttrPath::root(), &mut ctx);
    }

    /// Materialize a datablock received from a peer.
    ///
    /// The node is created under the proxy uuid, its state written, then the
    /// references other datablocks hold to it are resolved. The host may
    /// adjust the name; the proxy keeps the actual one.
    pub fn create_standalone_datablock(
        &mut self,
        graph: &mut dyn ExternalGraph,
        ctx: &mut SyncContext,
    ) -> GraphResult<Creation> {
        let handle = graph.create_node(&self.collection, &self.name, &self.type_name)?;
        graph.set_uuid(handle, self.uuid)?;
        ctx.state.register_handle(self.uuid, handle);
        if let Some(info) = graph.node_info(handle) {
            if info.name != self.name {
                log::info!("Created '{}' as '{}'", self.name, info.name);
                self.name = info.name;
            }
        }

        self.save(graph, handle, ctx);
        let resolved = ctx.state.unresolved.resolve(self.uuid, handle, graph);
        Ok(Creation { handle, resolved })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key_block(name: &str, value: f64) -> Proxy {
        Proxy::Struct(
            StructProxy::new("ShapeKey")
                .with("name", Proxy::Value(name.into()))
                .with("value", Proxy::Value(value.into())),
        )
    }

    fn key_blocks(blocks: &[(&str, f64)]) -> StructCollectionProxy {
        StructCollectionProxy::sequence(
            "ShapeKey",
            blocks.iter().map(|(name, value)| key_block(name, *value)).collect(),
        )
    }

    #[test]
    fn test_must_replace_on_structure_change() {
        let old = key_blocks(&[("Basis", 0.0), ("Smile", 0.5)]);

        assert!(!old.must_replace(&key_blocks(&[("Basis", 0.0), ("Smile", 0.9)])));
        assert!(old.must_replace(&key_blocks(&[("Basis", 0.0)])));
        assert!(old.must_replace(&key_blocks(&[("Smile", 0.5), ("Basis", 0.0)])));
        assert!(old.must_replace(&key_blocks(&[("Basis", 0.0), ("Frown", 0.5)])));
    }

    #[test]
    fn test_must_replace_on_mapping_reorder() {
        let mapping = |keys: &[&str]| {
            StructCollectionProxy::mapping(
                "Node",
                keys.iter().map(|k| (k.to_string(), Proxy::Value(Value::Null))).collect(),
            )
        };
        assert!(!mapping(&["A", "B"]).must_replace(&mapping(&["A", "B"])));
        assert!(mapping(&["A", "B"]).must_replace(&mapping(&["B", "A"])));
    }

    #[test]
    fn test_collection_update_holds_changed_items_only() {
        let old = Proxy::Collection(key_blocks(&[("Basis", 0.0), ("Smile", 0.5)]));
        let new = Proxy::Collection(key_blocks(&[("Basis", 0.0), ("Smile", 0.9)]));

        let delta = old.diff_against(&new).unwrap();
        let Delta::Update(DeltaUpdate::Items(items)) = &delta else {
            panic!("expected an items update, got {:?}", delta);
        };
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].0, ItemKey::Index(1));
        assert_eq!(
            items[0].1.field("value"),
            Some(&Delta::Update(DeltaUpdate::Value(Value::Float(0.9))))
        );
    }

    #[test]
    fn test_reference_changes_are_replaces() {
        let target = Proxy::DatablockRef(DatablockRefProxy {
            uuid: Uuid::new_v4(),
            collection: "objects".into(),
            name: "Cube".into(),
        });
        let delta = Proxy::NoneRef.diff_against(&target).unwrap();
        assert_eq!(delta, Delta::Replace(target.clone()));
        assert_eq!(target.diff_against(&target), None);
    }

    #[test]
    fn test_links_are_replaced_whole() {
        let old = Proxy::NodeLinks(NodeLinksProxy {
            links: vec![NodeLink::new("A", 0, "B", 0)],
        });
        let new = Proxy::NodeLinks(NodeLinksProxy {
            links: vec![NodeLink::new("A", 0, "B", 0), NodeLink::new("B", 0, "C", 1)],
        });
        assert!(old.diff_against(&new).unwrap().is_replace());
    }

    #[test]
    fn test_custom_inputs_diff() {
        let inputs = |values: &[(&str, f64)]| CustomInputsProxy {
            inputs: values.iter().map(|(id, v)| (id.to_string(), Value::Float(*v))).collect(),
        };
        let old = inputs(&[("Input_2", 1.0), ("Input_3", 2.0)]);

        assert_eq!(
            old.diff_against(&inputs(&[("Input_2", 1.0), ("Input_3", 4.0)])),
            Some(Delta::Update(DeltaUpdate::CustomInputs(vec![(
                "Input_3".to_string(),
                Value::Float(4.0)
            )])))
        );
        assert!(old.diff_against(&inputs(&[("Input_3", 2.0)])).unwrap().is_replace());
    }

    #[test]
    fn test_struct_diff_new_member_is_replace() {
        let old = StructProxy::new("Camera").with("lens", Proxy::Value(50.0.into()));
        let new = old.clone().with("sensor_width", Proxy::Value(36.0.into()));
        let delta = old.diff_against(&new).unwrap();
        assert_eq!(delta.field("lens"), None);
        assert_eq!(delta.field("sensor_width"), Some(&Delta::Replace(Proxy::Value(36.0.into()))));
    }

    #[test]
    fn test_unloadable_reference_becomes_empty() {
        let key = Proxy::DatablockRef(DatablockRefProxy {
            uuid: Uuid::new_v4(),
            collection: "shape_keys".into(),
            name: "Key".into(),
        });
        let old = StructProxy::new("Object").with("data", key).with("pass_index", Proxy::Value(Value::Int(0)));
        let new = StructProxy::new("Object").with("pass_index", Proxy::Value(Value::Int(0)));
        let delta = old.diff_against(&new).unwrap();
        assert_eq!(delta.field("data"), Some(&Delta::Replace(Proxy::NoneRef)));
        assert_eq!(delta.field("pass_index"), None);

        let emptied = StructProxy::new("Object").with("data", Proxy::NoneRef);
        assert_eq!(emptied.diff_against(&StructProxy::new("Object")), None);
    }
}
