//! Deltas - descriptions of attribute changes
//!
//! A delta is computed on the sending side by `Proxy::diff_against` and
//! merged on the receiving side by `Proxy::apply`.

use crate::proxy::Proxy;
use mixer_core::{PathSegment, Value};
use std::collections::BTreeMap;

/// Change of one attribute
#[derive(Debug, Clone, PartialEq)]
pub enum Delta {
    /// Incremental change, holding only what changed
    Update(DeltaUpdate),
    /// The attribute proxy must be discarded and replaced as a whole
    Replace(Proxy),
}

/// Payload of an incremental change
#[derive(Debug, Clone, PartialEq)]
pub enum DeltaUpdate {
    /// New scalar value
    Value(Value),
    /// Changed members of a struct
    Struct(BTreeMap<String, Delta>),
    /// Changed items of a collection whose structure is unchanged
    Items(Vec<(ItemKey, Delta)>),
    /// Changed custom input values, identifiers unchanged
    CustomInputs(Vec<(String, Value)>),
}

/// Address of an item within a collection
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ItemKey {
    Index(usize),
    Key(String),
}

impl ItemKey {
    pub fn segment(&self) -> PathSegment {
        match self {
            ItemKey::Index(i) => PathSegment::Index(*i),
            ItemKey::Key(k) => PathSegment::Key(k.clone()),
        }
    }
}

impl Delta {
    pub fn is_replace(&self) -> bool {
        matches!(self, Delta::Replace(_))
    }

    /// Delta of a struct member, if this is a struct update
    pub fn field(&self, name: &str) -> Option<&Delta> {
        match self {
            Delta::Update(DeltaUpdate::Struct(fields)) => fields.get(name),
            _ => None,
        }
    }
}

impl DeltaUpdate {
    pub fn kind_name(&self) -> &'static str {
        match self {
            DeltaUpdate::Value(_) => "value update",
            DeltaUpdate::Struct(_) => "struct update",
            DeltaUpdate::Items(_) => "items update",
            DeltaUpdate::CustomInputs(_) => "custom inputs update",
        }
    }
}
