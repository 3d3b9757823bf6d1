//! The proxy model
//!
//! Owns one `DatablockProxy` per synchronized datablock, indexed by uuid and
//! grouped by root collection. The sending side turns graph changes into
//! changesets with `synchronize`; the receiving side merges peer messages
//! with the `apply_*` operations.

use crate::changeset::{Changeset, DatablockDelta, DatablockRemoval, DatablockRename, SyncMessage};
use crate::context::{ProxyState, SyncContext};
use crate::diff::GraphDiff;
use crate::error::{SyncError, SyncResult};
use crate::filter::FilterStack;
use crate::proxy::{Creation, DatablockProxy};
use mixer_core::{ExternalGraph, NodeHandle, Uuid};
use std::collections::{BTreeMap, HashMap, HashSet};

/// Mirror of the synchronized part of the external graph
#[derive(Debug)]
pub struct ProxyModel {
    datablocks: HashMap<Uuid, DatablockProxy>,
    /// Membership of each root collection, in insertion order
    collections: BTreeMap<String, Vec<Uuid>>,
    /// Collections to synchronize, all of them when empty
    tracked: Vec<String>,
    filter: FilterStack,
    state: ProxyState,
    /// Local changes set aside while a received message was applied
    local_updates: Vec<NodeHandle>,
}

impl Default for ProxyModel {
    fn default() -> Self {
        Self::new(FilterStack::safe())
    }
}

impl ProxyModel {
    pub fn new(filter: FilterStack) -> Self {
        Self {
            datablocks: HashMap::new(),
            collections: BTreeMap::new(),
            tracked: Vec::new(),
            filter,
            state: ProxyState::new(),
            local_updates: Vec::new(),
        }
    }

    /// Restrict synchronization to these root collections
    pub fn with_collections<I, S>(mut self, collections: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tracked = collections.into_iter().map(Into::into).collect();
        self
    }

    pub fn filter(&self) -> &FilterStack {
        &self.filter
    }

    pub fn state(&self) -> &ProxyState {
        &self.state
    }

    pub fn state_mut(&mut self) -> &mut ProxyState {
        &mut self.state
    }

    /// Collections a pass walks over
    pub fn tracked_collections(&self, graph: &dyn ExternalGraph) -> Vec<String> {
        if self.tracked.is_empty() {
            graph.collection_names()
        } else {
            self.tracked.clone()
        }
    }

    pub fn get(&self, uuid: Uuid) -> Option<&DatablockProxy> {
        self.datablocks.get(&uuid)
    }

    /// Proxy of the datablock currently called `name`
    pub fn find(&self, collection: &str, name: &str) -> Option<&DatablockProxy> {
        self.uuids_in(collection)
            .iter()
            .filter_map(|uuid| self.datablocks.get(uuid))
            .find(|proxy| proxy.name == name)
    }

    /// Uuids of one collection, in insertion order
    pub fn uuids_in(&self, collection: &str) -> &[Uuid] {
        self.collections.get(collection).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn iter(&self) -> impl Iterator<Item = &DatablockProxy> {
        self.datablocks.values()
    }

    pub fn len(&self) -> usize {
        self.datablocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.datablocks.is_empty()
    }

    fn insert(&mut self, proxy: DatablockProxy) {
        let members = self.collections.entry(proxy.collection.clone()).or_default();
        if !members.contains(&proxy.uuid) {
            members.push(proxy.uuid);
        }
        self.datablocks.insert(proxy.uuid, proxy);
    }

    fn remove(&mut self, uuid: Uuid) -> Option<DatablockProxy> {
        let proxy = self.datablocks.remove(&uuid)?;
        if let Some(members) = self.collections.get_mut(&proxy.collection) {
            members.retain(|member| *member != uuid);
        }
        self.state.forget(uuid);
        self.state.unresolved.abandon_owner(uuid);
        Some(proxy)
    }

    /// One full pass: structural diff, then attribute diff of changed nodes
    pub fn synchronize(&mut self, graph: &mut dyn ExternalGraph) -> Changeset {
        let diff = GraphDiff::compute(self, graph);
        let mut updates = std::mem::take(&mut self.local_updates);
        updates.extend(graph.take_updates());
        let changeset = self.update(&diff, &updates, graph);
        if !changeset.is_empty() {
            log::debug!(
                "Pass: {} created, {} removed, {} renamed, {} updated",
                changeset.creations.len(),
                changeset.removals.len(),
                changeset.renames.len(),
                changeset.updates.len()
            );
        }
        changeset
    }

    /// Fold a structural diff and the changed nodes into the model.
    ///
    /// Nodes created in this pass are sent in full and skip attribute diff.
    pub fn update(&mut self, diff: &GraphDiff, updates: &[NodeHandle], graph: &mut dyn ExternalGraph) -> Changeset {
        let mut changeset = Changeset::new();
        let mut created: HashSet<Uuid> = HashSet::new();

        for (uuid, handle) in diff.added() {
            let ctx = SyncContext::new(&self.filter, &mut self.state);
            match DatablockProxy::load(&*graph, *handle, &ctx) {
                Ok(proxy) => {
                    created.insert(*uuid);
                    changeset.creations.push(proxy.clone());
                    self.insert(proxy);
                }
                Err(e) => log::warn!("Cannot load new datablock {}: {}", uuid, e),
            }
        }

        for uuid in diff.removed() {
            if let Some(proxy) = self.remove(*uuid) {
                changeset.removals.push(DatablockRemoval {
                    uuid: *uuid,
                    collection: proxy.collection,
                    name: proxy.name,
                });
            }
        }

        for (uuid, old_name, new_name) in diff.renamed() {
            if let Some(proxy) = self.datablocks.get_mut(uuid) {
                proxy.name = new_name.clone();
                changeset.renames.push(DatablockRename {
                    uuid: *uuid,
                    collection: proxy.collection.clone(),
                    old_name: old_name.clone(),
                    new_name: new_name.clone(),
                });
            }
        }

        let mut checked: HashSet<Uuid> = HashSet::new();
        for handle in updates {
            let Some(uuid) = graph.node_info(*handle).and_then(|info| info.uuid) else {
                continue;
            };
            if created.contains(&uuid) || !checked.insert(uuid) {
                continue;
            }
            let Some(proxy) = self.datablocks.get_mut(&uuid) else {
                continue;
            };
            let mut ctx = SyncContext::new(&self.filter, &mut self.state);
            let Some(delta) = proxy.diff(&*graph, *handle, &ctx) else {
                continue;
            };
            if let Err(e) = proxy.apply(graph, *handle, &delta, &mut ctx, false) {
                log::warn!("Cannot record change of '{}': {}", proxy.name, e);
            }
            changeset.updates.push(DatablockDelta {
                uuid,
                collection: proxy.collection.clone(),
                delta,
            });
        }

        changeset
    }

    /// Set aside local changes before a received message writes to the graph
    fn begin_receive(&mut self, graph: &mut dyn ExternalGraph) {
        let pending = graph.take_updates();
        self.local_updates.extend(pending);
    }

    /// Drop the change notifications caused by a received message. Local
    /// changes set aside stay pending and are diffed against the proxy,
    /// which already holds the received values.
    fn end_receive(&mut self, graph: &mut dyn ExternalGraph) {
        let echoes = graph.take_updates();
        log::trace!("Dropped {} echoed notifications", echoes.len());
    }

    /// Run a direct graph write on `node` received from a peer outside the
    /// proxy protocol. Only what the write changed is mirrored into the
    /// proxy, so the write is not echoed while pending local edits of the
    /// same datablock are still sent.
    pub fn apply_external<R>(
        &mut self,
        graph: &mut dyn ExternalGraph,
        node: NodeHandle,
        write: impl FnOnce(&mut dyn ExternalGraph) -> R,
    ) -> R {
        self.begin_receive(graph);
        let mirrored = graph
            .node_info(node)
            .and_then(|info| info.uuid)
            .filter(|uuid| self.datablocks.contains_key(uuid));
        let before = mirrored.and_then(|_| {
            let ctx = SyncContext::new(&self.filter, &mut self.state);
            DatablockProxy::load(&*graph, node, &ctx).ok()
        });

        let result = write(&mut *graph);

        if let (Some(uuid), Some(before)) = (mirrored, before) {
            let ctx = SyncContext::new(&self.filter, &mut self.state);
            let change = match DatablockProxy::load(&*graph, node, &ctx) {
                Ok(after) => before.data.diff_against(&after.data),
                Err(e) => {
                    log::info!("Cannot mirror write to '{}': {}", before.name, e);
                    None
                }
            };
            if let (Some(delta), Some(proxy)) = (change, self.datablocks.get_mut(&uuid)) {
                let mut ctx = SyncContext::new(&self.filter, &mut self.state);
                if let Err(e) = proxy.apply(graph, node, &delta, &mut ctx, false) {
                    log::warn!("Cannot mirror write to '{}': {}", proxy.name, e);
                }
            }
        }
        self.end_receive(graph);
        result
    }

    /// Materialize a datablock created by a peer
    pub fn apply_creation(&mut self, proxy: DatablockProxy, graph: &mut dyn ExternalGraph) -> SyncResult<Creation> {
        if self.datablocks.contains_key(&proxy.uuid) {
            if let Some(handle) = self.state.locate(proxy.uuid, &proxy.collection, &*graph) {
                log::info!("Datablock '{}' already exists, creation ignored", proxy.name);
                return Ok(Creation { handle, resolved: 0 });
            }
        }

        self.begin_receive(graph);
        let mut proxy = proxy;
        let mut ctx = SyncContext::new(&self.filter, &mut self.state);
        let result = proxy.create_standalone_datablock(graph, &mut ctx);
        if result.is_ok() {
            self.insert(proxy);
        }
        self.end_receive(graph);
        Ok(result?)
    }

    /// Remove a datablock removed by a peer
    pub fn apply_removal(&mut self, removal: &DatablockRemoval, graph: &mut dyn ExternalGraph) -> SyncResult<()> {
        let handle = self.state.locate(removal.uuid, &removal.collection, &*graph);
        let proxy = self.remove(removal.uuid);
        let Some(handle) = handle else {
            log::info!("Removal of unknown datablock '{}' ignored", removal.name);
            return Ok(());
        };
        if proxy.is_none() {
            log::info!("Removing '{}' which had no proxy", removal.name);
        }

        self.begin_receive(graph);
        let result = graph.remove_node(handle);
        self.end_receive(graph);
        Ok(result?)
    }

    /// Rename a datablock renamed by a peer. Returns the name the host chose.
    pub fn apply_rename(&mut self, rename: &DatablockRename, graph: &mut dyn ExternalGraph) -> SyncResult<String> {
        let handle = self
            .state
            .locate(rename.uuid, &rename.collection, &*graph)
            .ok_or(SyncError::UnknownDatablock(rename.uuid))?;

        self.begin_receive(graph);
        let result = graph.rename_node(handle, &rename.new_name);
        self.end_receive(graph);
        let actual = result?;

        if let Some(proxy) = self.datablocks.get_mut(&rename.uuid) {
            proxy.name = actual.clone();
        }
        Ok(actual)
    }

    /// Merge attribute changes received from a peer, writing them to the graph
    pub fn apply_update(&mut self, update: &DatablockDelta, graph: &mut dyn ExternalGraph) -> SyncResult<()> {
        let handle = self
            .state
            .locate(update.uuid, &update.collection, &*graph)
            .ok_or(SyncError::UnknownDatablock(update.uuid))?;
        self.begin_receive(graph);
        let Some(proxy) = self.datablocks.get_mut(&update.uuid) else {
            return Err(SyncError::UnknownDatablock(update.uuid));
        };
        let mut ctx = SyncContext::new(&self.filter, &mut self.state);
        let result = proxy.apply(graph, handle, &update.delta, &mut ctx, true);
        self.end_receive(graph);
        Ok(result?)
    }

    /// Apply any received message
    pub fn apply_message(&mut self, message: SyncMessage, graph: &mut dyn ExternalGraph) -> SyncResult<()> {
        match message {
            SyncMessage::Create(proxy) => self.apply_creation(proxy, graph).map(|_| ()),
            SyncMessage::Remove(removal) => self.apply_removal(&removal, graph),
            SyncMessage::Rename(rename) => self.apply_rename(&rename, graph).map(|_| ()),
            SyncMessage::Update(update) => self.apply_update(&update, graph),
        }
    }
}
