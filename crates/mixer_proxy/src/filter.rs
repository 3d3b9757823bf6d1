//! Property selection
//!
//! Decides which attributes of which types take part in synchronization.
//! Rules are grouped in sets and sets are stacked: a base "safe" set first,
//! then narrower sets appended by call sites or configuration.

use mixer_core::AttrKind;
use std::collections::BTreeSet;

/// What a rule does with the attributes it matches
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleAction {
    Include,
    Exclude,
}

/// Which struct types a rule applies to
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TypeMatch {
    /// Every type
    Any,
    /// Exactly this type
    Exact(String),
    /// This type and every type deriving from it
    Subclass(String),
}

impl TypeMatch {
    fn matches(&self, type_name: &str, bases: &[String]) -> bool {
        match self {
            TypeMatch::Any => true,
            TypeMatch::Exact(t) => t == type_name,
            TypeMatch::Subclass(t) => t == type_name || bases.iter().any(|b| b == t),
        }
    }

    fn rank(&self) -> u8 {
        match self {
            TypeMatch::Any => 0,
            TypeMatch::Subclass(_) => 1,
            TypeMatch::Exact(_) => 2,
        }
    }
}

/// One include or exclude rule
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilterRule {
    pub action: RuleAction,
    pub types: TypeMatch,
    /// Attribute names, `None` for every attribute of the matched types
    pub names: Option<BTreeSet<String>>,
    /// Structural role, `None` for any role
    pub role: Option<AttrKind>,
}

impl FilterRule {
    pub fn include(types: TypeMatch) -> Self {
        Self {
            action: RuleAction::Include,
            types,
            names: None,
            role: None,
        }
    }

    pub fn exclude(types: TypeMatch) -> Self {
        Self {
            action: RuleAction::Exclude,
            types,
            names: None,
            role: None,
        }
    }

    /// Restrict the rule to named attributes
    pub fn with_names<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.names = Some(names.into_iter().map(Into::into).collect());
        self
    }

    /// Restrict the rule to one structural role
    pub fn with_role(mut self, role: AttrKind) -> Self {
        self.role = Some(role);
        self
    }

    pub fn matches(&self, type_name: &str, bases: &[String], attr: &str, kind: AttrKind) -> bool {
        self.types.matches(type_name, bases)
            && self.names.as_ref().map_or(true, |names| names.contains(attr))
            && self.role.map_or(true, |role| role == kind)
    }

    /// Named attributes, then type precision, then role
    fn specificity(&self) -> (bool, u8, bool) {
        (self.names.is_some(), self.types.rank(), self.role.is_some())
    }
}

/// Ordered list of rules
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FilterSet {
    pub rules: Vec<FilterRule>,
}

impl FilterSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_rule(mut self, rule: FilterRule) -> Self {
        self.rules.push(rule);
        self
    }

    /// Exclusions written as `"attr"` (any type) or `"Type.attr"` (type and subtypes)
    pub fn from_exclusions<I, S>(entries: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let rules = entries
            .into_iter()
            .map(|entry| match entry.as_ref().split_once('.') {
                Some((ty, attr)) => {
                    FilterRule::exclude(TypeMatch::Subclass(ty.to_string())).with_names([attr])
                }
                None => FilterRule::exclude(TypeMatch::Any).with_names([entry.as_ref()]),
            })
            .collect();
        Self { rules }
    }
}

/// Attributes never worth sending: host bookkeeping and runtime state
pub const SAFE_EXCLUSIONS: &[&str] = &[
    "rna_type",
    crate::UUID_ATTRIBUTE,
    "users",
    "is_evaluated",
    "original",
    "name_full",
    "session_uid",
    "tag",
    "is_runtime_data",
];

/// Stack of rule sets, later sets taking precedence
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FilterStack {
    sets: Vec<FilterSet>,
}

impl FilterStack {
    /// An empty stack, which selects nothing
    pub fn new() -> Self {
        Self::default()
    }

    /// Include everything except host bookkeeping attributes
    pub fn safe() -> Self {
        let base = FilterSet::new()
            .with_rule(FilterRule::include(TypeMatch::Any))
            .with_rule(FilterRule::exclude(TypeMatch::Any).with_names(SAFE_EXCLUSIONS.iter().copied()));
        Self { sets: vec![base] }
    }

    pub fn push(&mut self, set: FilterSet) -> &mut Self {
        self.sets.push(set);
        self
    }

    pub fn with_set(mut self, set: FilterSet) -> Self {
        self.sets.push(set);
        self
    }

    pub fn sets(&self) -> &[FilterSet] {
        &self.sets
    }

    /// Whether attribute `attr` of a struct of `type_name` is synchronized.
    ///
    /// Some include rule must match, and every matching exclude rule must be
    /// overridden by a matching include rule appended after it that is at
    /// least as specific.
    pub fn accepts(&self, type_name: &str, bases: &[String], attr: &str, kind: AttrKind) -> bool {
        let matching: Vec<(usize, &FilterRule)> = self
            .sets
            .iter()
            .flat_map(|set| set.rules.iter())
            .enumerate()
            .filter(|(_, rule)| rule.matches(type_name, bases, attr, kind))
            .collect();

        let includes: Vec<&(usize, &FilterRule)> = matching
            .iter()
            .filter(|(_, rule)| rule.action == RuleAction::Include)
            .collect();
        if includes.is_empty() {
            return false;
        }

        matching
            .iter()
            .filter(|(_, rule)| rule.action == RuleAction::Exclude)
            .all(|(excluded_at, exclude)| {
                includes.iter().any(|(included_at, include)| {
                    included_at > excluded_at && include.specificity() >= exclude.specificity()
                })
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bases() -> Vec<String> {
        vec!["ID".to_string()]
    }

    #[test]
    fn test_safe_excludes_bookkeeping() {
        let filter = FilterStack::safe();
        assert!(filter.accepts("Camera", &bases(), "lens", AttrKind::Value));
        assert!(!filter.accepts("Camera", &bases(), "users", AttrKind::Value));
        assert!(!filter.accepts("Camera", &bases(), "rna_type", AttrKind::Pointer));
    }

    #[test]
    fn test_empty_stack_selects_nothing() {
        assert!(!FilterStack::new().accepts("Camera", &bases(), "lens", AttrKind::Value));
    }

    #[test]
    fn test_broad_include_does_not_override_exclude() {
        let filter = FilterStack::safe()
            .with_set(FilterSet::new().with_rule(FilterRule::include(TypeMatch::Subclass("ID".into()))));
        assert!(!filter.accepts("Camera", &bases(), "users", AttrKind::Value));
    }

    #[test]
    fn test_later_specific_include_overrides() {
        let filter = FilterStack::safe().with_set(
            FilterSet::new()
                .with_rule(FilterRule::include(TypeMatch::Exact("Mesh".into())).with_names(["users"])),
        );
        assert!(filter.accepts("Mesh", &bases(), "users", AttrKind::Value));
        assert!(!filter.accepts("Camera", &bases(), "users", AttrKind::Value));
    }

    #[test]
    fn test_earlier_include_does_not_override() {
        let filter = FilterStack::new()
            .with_set(
                FilterSet::new()
                    .with_rule(FilterRule::include(TypeMatch::Exact("Camera".into())).with_names(["lens"])),
            )
            .with_set(FilterSet::new().with_rule(FilterRule::exclude(TypeMatch::Any).with_names(["lens"])));
        assert!(!filter.accepts("Camera", &bases(), "lens", AttrKind::Value));
    }

    #[test]
    fn test_role_and_subclass_rules() {
        let filter = FilterStack::safe().with_set(
            FilterSet::new()
                .with_rule(FilterRule::exclude(TypeMatch::Subclass("ID".into())).with_role(AttrKind::Collection)),
        );
        assert!(!filter.accepts("Mesh", &bases(), "vertices", AttrKind::Collection));
        assert!(filter.accepts("Mesh", &bases(), "auto_smooth", AttrKind::Value));
        assert!(filter.accepts("MeshVertex", &[], "co", AttrKind::Collection));
    }

    #[test]
    fn test_exclusions_from_config() {
        let filter = FilterStack::safe().with_set(FilterSet::from_exclusions(["Camera.lens", "color"]));
        assert!(!filter.accepts("Camera", &bases(), "lens", AttrKind::Value));
        assert!(filter.accepts("Light", &bases(), "lens", AttrKind::Value));
        assert!(!filter.accepts("Light", &bases(), "color", AttrKind::Value));
    }
}
