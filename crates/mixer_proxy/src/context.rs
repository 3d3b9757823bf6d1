//! Synchronization context
//!
//! Everything a proxy operation needs beyond the graph itself: the active
//! filter, the uuid to handle cache and the unresolved reference table.

use crate::filter::FilterStack;
use crate::refs::UnresolvedRefs;
use mixer_core::{ExternalGraph, NodeHandle, Uuid};
use std::collections::HashMap;

/// Mutable state shared by all datablock proxies of a model
#[derive(Debug, Default)]
pub struct ProxyState {
    handles: HashMap<Uuid, NodeHandle>,
    pub unresolved: UnresolvedRefs,
}

impl ProxyState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_handle(&mut self, uuid: Uuid, handle: NodeHandle) {
        self.handles.insert(uuid, handle);
    }

    pub fn forget(&mut self, uuid: Uuid) -> Option<NodeHandle> {
        self.handles.remove(&uuid)
    }

    /// Cached handle, without checking it is still live
    pub fn cached(&self, uuid: Uuid) -> Option<NodeHandle> {
        self.handles.get(&uuid).copied()
    }

    /// Live handle of the datablock `uuid` in `collection`.
    ///
    /// The cache is checked against the graph first; on a miss the collection
    /// is scanned and the cache refreshed.
    pub fn locate(&mut self, uuid: Uuid, collection: &str, graph: &dyn ExternalGraph) -> Option<NodeHandle> {
        if let Some(handle) = self.cached(uuid) {
            if graph.node_info(handle).and_then(|info| info.uuid) == Some(uuid) {
                return Some(handle);
            }
            self.handles.remove(&uuid);
        }
        let found = graph
            .enumerate_collection(collection)
            .ok()?
            .into_iter()
            .find(|info| info.uuid == Some(uuid))?
            .handle;
        self.handles.insert(uuid, found);
        Some(found)
    }
}

/// Per-operation view over the filter and the proxy state
pub struct SyncContext<'a> {
    pub filter: &'a FilterStack,
    pub state: &'a mut ProxyState,
    /// Datablock whose attributes are being written
    pub owner: Uuid,
}

impl<'a> SyncContext<'a> {
    pub fn new(filter: &'a FilterStack, state: &'a mut ProxyState) -> Self {
        Self {
            filter,
            state,
            owner: Uuid::nil(),
        }
    }

    /// Reborrow for writes into the datablock `owner`
    pub fn for_owner(&mut self, owner: Uuid) -> SyncContext<'_> {
        SyncContext {
            filter: self.filter,
            state: &mut *self.state,
            owner,
        }
    }
}
