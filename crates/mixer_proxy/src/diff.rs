//! Structural diff between the proxy model and the live graph
//!
//! Per tracked collection, datablocks are matched by uuid only:
//!
//! - uuid in the graph but not in the model: creation
//! - uuid in the model but not in the graph: removal
//! - uuid in both with a different name: rename
//!
//! The pass also owns uuid assignment. Datablocks without a uuid get a fresh
//! one, and so does a datablock whose uuid was already seen in the pass,
//! which is what a host-side duplicate looks like. Within a collection the
//! node the model has cached for a uuid keeps it, wherever it is enumerated.

use crate::model::ProxyModel;
use mixer_core::{ExternalGraph, NodeHandle, Uuid};
use std::collections::{HashMap, HashSet};

/// Structural changes of one root collection
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CollectionDiff {
    /// New datablocks, in graph order
    pub added: Vec<(Uuid, NodeHandle)>,
    /// Datablocks gone from the graph
    pub removed: Vec<Uuid>,
    /// `(uuid, old name, new name)`
    pub renamed: Vec<(Uuid, String, String)>,
}

impl CollectionDiff {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty() && self.renamed.is_empty()
    }
}

/// Structural changes of every tracked collection
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GraphDiff {
    pub collections: Vec<(String, CollectionDiff)>,
}

impl GraphDiff {
    /// Compare the graph with the model, assigning missing uuids on the way
    pub fn compute(model: &mut ProxyModel, graph: &mut dyn ExternalGraph) -> Self {
        let mut seen: HashSet<Uuid> = HashSet::new();
        let mut collections = Vec::new();

        for collection in model.tracked_collections(&*graph) {
            let infos = match graph.enumerate_collection(&collection) {
                Ok(infos) => infos,
                Err(e) => {
                    log::warn!("Cannot enumerate '{}': {}", collection, e);
                    continue;
                }
            };

            // a duplicated uuid stays with the node the model already knows
            let mut keepers: HashMap<Uuid, NodeHandle> = HashMap::new();
            for info in &infos {
                let Some(uuid) = info.uuid.filter(|uuid| !seen.contains(uuid)) else {
                    continue;
                };
                if model.state().cached(uuid) == Some(info.handle) {
                    keepers.insert(uuid, info.handle);
                } else {
                    keepers.entry(uuid).or_insert(info.handle);
                }
            }

            let mut present = Vec::with_capacity(infos.len());
            for info in infos {
                let uuid = match info.uuid {
                    Some(uuid) if keepers.get(&uuid) == Some(&info.handle) && seen.insert(uuid) => uuid,
                    previous => {
                        let uuid = Uuid::new_v4();
                        if let Some(duplicate) = previous {
                            log::info!("'{}' duplicates uuid {}, reassigning", info.name, duplicate);
                        }
                        if let Err(e) = graph.set_uuid(info.handle, uuid) {
                            log::warn!("Cannot assign uuid to '{}': {}", info.name, e);
                            continue;
                        }
                        seen.insert(uuid);
                        uuid
                    }
                };
                model.state_mut().register_handle(uuid, info.handle);
                present.push((uuid, info.handle, info.name));
            }

            let mut diff = CollectionDiff::default();
            for (uuid, handle, name) in &present {
                match model.get(*uuid) {
                    None => diff.added.push((*uuid, *handle)),
                    Some(proxy) if proxy.name != *name => {
                        diff.renamed.push((*uuid, proxy.name.clone(), name.clone()))
                    }
                    Some(_) => {}
                }
            }
            let present: HashSet<Uuid> = present.iter().map(|(uuid, _, _)| *uuid).collect();
            diff.removed = model
                .uuids_in(&collection)
                .iter()
                .filter(|uuid| !present.contains(*uuid))
                .copied()
                .collect();

            collections.push((collection, diff));
        }

        Self { collections }
    }

    pub fn is_empty(&self) -> bool {
        self.collections.iter().all(|(_, diff)| diff.is_empty())
    }

    /// Changes of one collection
    pub fn collection(&self, name: &str) -> Option<&CollectionDiff> {
        self.collections
            .iter()
            .find(|(collection, _)| collection == name)
            .map(|(_, diff)| diff)
    }

    pub fn added(&self) -> impl Iterator<Item = &(Uuid, NodeHandle)> {
        self.collections.iter().flat_map(|(_, diff)| diff.added.iter())
    }

    pub fn removed(&self) -> impl Iterator<Item = &Uuid> {
        self.collections.iter().flat_map(|(_, diff)| diff.removed.iter())
    }

    pub fn renamed(&self) -> impl Iterator<Item = &(Uuid, String, String)> {
        self.collections.iter().flat_map(|(_, diff)| diff.renamed.iter())
    }
}
