//! # Mixer Proxy - Scene Graph Synchronization
//!
//! Mirrors the synchronized part of an external graph into proxies, finds
//! what changed since the last pass, and applies changes received from
//! peers.
//!
//! ## Architecture
//!
//! ```text
//! Graph edits ──► GraphDiff ──► ProxyModel::update ──► Changeset ──► Codec ──► peer
//! peer ──► Codec ──► SyncMessage ──► ProxyModel::apply_* ──► Graph writes
//!                                          │
//!                                          └──► UnresolvedRefs (targets not created yet)
//! ```
//!
//! ## Key Concepts
//!
//! - **Proxy**: serializable mirror of an attribute, a struct or a datablock
//! - **Delta**: update or replace of one attribute
//! - **Changeset**: creations, removals, renames and updates of one pass
//! - **FilterStack**: which attributes of which types are synchronized

pub mod changeset;
pub mod codec;
pub mod context;
pub mod delta;
pub mod diff;
pub mod error;
pub mod filter;
pub mod model;
pub mod proxy;
pub mod refs;

/// Name of the attribute holding a datablock's uuid on the host
pub const UUID_ATTRIBUTE: &str = "mixer_uuid";

pub use changeset::{Changeset, DatablockDelta, DatablockRemoval, DatablockRename, SyncMessage};
pub use codec::{ClassRegistry, Codec};
pub use context::{ProxyState, SyncContext};
pub use delta::{Delta, DeltaUpdate, ItemKey};
pub use diff::{CollectionDiff, GraphDiff};
pub use error::{DecodeError, DecodeResult, EncodeError, EncodeResult, SyncError, SyncResult};
pub use filter::{FilterRule, FilterSet, FilterStack, RuleAction, TypeMatch};
pub use model::ProxyModel;
pub use proxy::{
    CollectionKind, Creation, CustomInputsProxy, DatablockProxy, DatablockRefProxy, NodeLinksProxy, Proxy,
    StructCollectionProxy, StructProxy,
};
pub use refs::{DeferredWrite, PendingRef, UnresolvedRefs};
