//! Unresolved references
//!
//! A reference proxy may target a datablock that does not exist locally yet,
//! because creations arrive in any order. The write is then parked here,
//! keyed by the target uuid, and replayed when that datablock is created.

use mixer_core::{AttrPath, ExternalGraph, GraphResult, NodeHandle, Uuid};
use std::fmt;

/// Deferred `owner[path] = target` assignment
pub type DeferredWrite = Box<dyn FnOnce(&mut dyn ExternalGraph, NodeHandle) -> GraphResult<()>>;

/// A write waiting for its target datablock
pub struct PendingRef {
    /// Uuid of the datablock the reference points to
    pub target: Uuid,
    /// Uuid of the datablock holding the reference
    pub owner: Uuid,
    /// Attribute of the owner holding the reference
    pub path: AttrPath,
    /// Debug label
    pub label: String,
    write: DeferredWrite,
}

impl fmt::Debug for PendingRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingRef")
            .field("target", &self.target)
            .field("owner", &self.owner)
            .field("path", &self.path)
            .field("label", &self.label)
            .finish()
    }
}

/// Ordered table of pending reference writes
#[derive(Debug, Default)]
pub struct UnresolvedRefs {
    pending: Vec<PendingRef>,
}

impl UnresolvedRefs {
    pub fn new() -> Self {
        Self::default()
    }

    /// Park a write until `target` exists.
    ///
    /// Earlier entries for the same `(owner, path)` slot are abandoned: the
    /// slot now points somewhere else.
    pub fn register(
        &mut self,
        target: Uuid,
        owner: Uuid,
        path: AttrPath,
        label: impl Into<String>,
        write: DeferredWrite,
    ) {
        self.abandon_slot(owner, &path);
        let label = label.into();
        log::debug!("Reference {} waits for {}", label, target);
        self.pending.push(PendingRef {
            target,
            owner,
            path,
            label,
            write,
        });
    }

    /// Drop entries for one slot. Returns how many were dropped.
    pub fn abandon_slot(&mut self, owner: Uuid, path: &AttrPath) -> usize {
        let before = self.pending.len();
        self.pending.retain(|p| !(p.owner == owner && &p.path == path));
        before - self.pending.len()
    }

    /// Drop entries held by a removed datablock
    pub fn abandon_owner(&mut self, owner: Uuid) -> usize {
        let before = self.pending.len();
        self.pending.retain(|p| p.owner != owner);
        before - self.pending.len()
    }

    /// Run, in registration order, every write waiting for `target`.
    ///
    /// Each write runs once and leaves the table, whether it succeeds or not.
    /// Returns the number of writes that succeeded.
    pub fn resolve(&mut self, target: Uuid, handle: NodeHandle, graph: &mut dyn ExternalGraph) -> usize {
        let (ready, waiting): (Vec<_>, Vec<_>) =
            self.pending.drain(..).partition(|p| p.target == target);
        self.pending = waiting;

        let mut resolved = 0;
        for pending in ready {
            let label = pending.label;
            match (pending.write)(graph, handle) {
                Ok(()) => resolved += 1,
                Err(e) => log::warn!("Deferred reference {} failed: {}", label, e),
            }
        }
        resolved
    }

    /// Whether some write waits for `target`
    pub fn is_pending(&self, target: Uuid) -> bool {
        self.pending.iter().any(|p| p.target == target)
    }

    /// Pending entries, in registration order
    pub fn iter(&self) -> impl Iterator<Item = &PendingRef> {
        self.pending.iter()
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}
