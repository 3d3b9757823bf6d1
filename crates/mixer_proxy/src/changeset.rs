//! Changesets - the output of one synchronization pass

use crate::delta::Delta;
use crate::proxy::DatablockProxy;
use mixer_core::Uuid;

/// A datablock removed from the graph
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatablockRemoval {
    pub uuid: Uuid,
    pub collection: String,
    /// Name at removal time, for logs only
    pub name: String,
}

/// A datablock whose name changed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatablockRename {
    pub uuid: Uuid,
    pub collection: String,
    pub old_name: String,
    pub new_name: String,
}

/// Attribute changes of one datablock
#[derive(Debug, Clone, PartialEq)]
pub struct DatablockDelta {
    pub uuid: Uuid,
    pub collection: String,
    pub delta: Delta,
}

/// Unit of transmission
#[derive(Debug, Clone, PartialEq)]
pub enum SyncMessage {
    Create(DatablockProxy),
    Remove(DatablockRemoval),
    Rename(DatablockRename),
    Update(DatablockDelta),
}

impl SyncMessage {
    pub fn uuid(&self) -> Uuid {
        match self {
            SyncMessage::Create(p) => p.uuid,
            SyncMessage::Remove(r) => r.uuid,
            SyncMessage::Rename(r) => r.uuid,
            SyncMessage::Update(u) => u.uuid,
        }
    }
}

/// Creations, removals, renames and updates found in one pass
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Changeset {
    pub creations: Vec<DatablockProxy>,
    pub removals: Vec<DatablockRemoval>,
    pub renames: Vec<DatablockRename>,
    pub updates: Vec<DatablockDelta>,
}

impl Changeset {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.creations.is_empty()
            && self.removals.is_empty()
            && self.renames.is_empty()
            && self.updates.is_empty()
    }

    pub fn len(&self) -> usize {
        self.creations.len() + self.removals.len() + self.renames.len() + self.updates.len()
    }

    /// Messages in transmission order: creations, removals, renames, updates.
    ///
    /// An update may reference a datablock created in the same pass, so the
    /// creation has to reach the peer first.
    pub fn messages(&self) -> impl Iterator<Item = SyncMessage> + '_ {
        let creations = self.creations.iter().cloned().map(SyncMessage::Create);
        let removals = self.removals.iter().cloned().map(SyncMessage::Remove);
        let renames = self.renames.iter().cloned().map(SyncMessage::Rename);
        let updates = self.updates.iter().cloned().map(SyncMessage::Update);
        creations.chain(removals).chain(renames).chain(updates)
    }

    /// Consuming variant of `messages`
    pub fn into_messages(self) -> Vec<SyncMessage> {
        let mut messages = Vec::with_capacity(self.len());
        messages.extend(self.creations.into_iter().map(SyncMessage::Create));
        messages.extend(self.removals.into_iter().map(SyncMessage::Remove));
        messages.extend(self.renames.into_iter().map(SyncMessage::Rename));
        messages.extend(self.updates.into_iter().map(SyncMessage::Update));
        messages
    }
}
