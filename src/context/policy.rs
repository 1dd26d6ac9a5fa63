//! Access policy: which child contexts may use which modules.
//!
//! A policy is an immutable value. Contexts publish a new policy through an
//! [`arc_swap::ArcSwap`] on every change, so an access check always sees
//! either the old or the new rule set in full.

use std::collections::HashMap;

use crate::identity::ModuleIdentity;
use crate::provenance::RuleOrigin;

/// What an allow or deny rule matches.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum AccessRule {
    /// Every module, for requests coming through the named child context.
    Context(String),
    /// The module, for requests from any child context.
    Module(ModuleIdentity),
    /// The module, for requests coming through the named child context.
    Pair(String, ModuleIdentity),
}

impl AccessRule {
    pub fn context(name: impl Into<String>) -> Self {
        Self::Context(name.into())
    }

    pub fn module(identity: ModuleIdentity) -> Self {
        Self::Module(identity)
    }

    pub fn pair(name: impl Into<String>, identity: ModuleIdentity) -> Self {
        Self::Pair(name.into(), identity)
    }

    /// Whether the rule names the child context `name`.
    pub fn mentions_context(&self, name: &str) -> bool {
        match self {
            Self::Context(c) | Self::Pair(c, _) => c == name,
            Self::Module(_) => false,
        }
    }
}

impl std::fmt::Display for AccessRule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Context(c) => write!(f, "context \"{c}\""),
            Self::Module(m) => write!(f, "module {m}"),
            Self::Pair(c, m) => write!(f, "context \"{c}\" on module {m}"),
        }
    }
}

/// A set of rules, each remembering where it was registered.
#[derive(Debug, Clone, Default)]
pub struct RuleSet {
    rules: HashMap<AccessRule, RuleOrigin>,
}

impl RuleSet {
    pub fn insert(&mut self, rule: AccessRule, origin: RuleOrigin) {
        self.rules.insert(rule, origin);
    }

    pub fn remove(&mut self, rule: &AccessRule) -> bool {
        self.rules.remove(rule).is_some()
    }

    pub fn contains(&self, rule: &AccessRule) -> bool {
        self.rules.contains_key(rule)
    }

    /// The most specific rule matching a request for `identity` coming
    /// through `child`: pair, then module, then context.
    pub fn matching(
        &self,
        child: Option<&str>,
        identity: &ModuleIdentity,
    ) -> Option<(AccessRule, RuleOrigin)> {
        let mut candidates = Vec::with_capacity(3);
        if let Some(child) = child {
            candidates.push(AccessRule::pair(child, identity.clone()));
        }
        candidates.push(AccessRule::module(identity.clone()));
        if let Some(child) = child {
            candidates.push(AccessRule::context(child));
        }
        candidates
            .into_iter()
            .find_map(|rule| self.rules.get(&rule).copied().map(|origin| (rule, origin)))
    }

    fn retain_without_context(&mut self, name: &str) {
        self.rules.retain(|rule, _| !rule.mentions_context(name));
    }

    pub fn iter(&self) -> impl Iterator<Item = (&AccessRule, &RuleOrigin)> {
        self.rules.iter()
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

/// Outcome of an access check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    Allowed,
    Denied { rule: String, origin: RuleOrigin },
}

/// One context's allow and deny lists plus its deny-all switch.
#[derive(Debug, Clone, Default)]
pub struct AccessPolicy {
    pub allow: RuleSet,
    pub deny: RuleSet,
    /// Set when deny-all is on; records who switched it on.
    pub deny_all: Option<RuleOrigin>,
}

impl AccessPolicy {
    /// Evaluate a request. A matching deny rule always wins; otherwise a
    /// matching allow rule admits; otherwise deny-all refuses.
    pub fn decide(&self, child: Option<&str>, identity: &ModuleIdentity) -> Decision {
        if let Some((rule, origin)) = self.deny.matching(child, identity) {
            return Decision::Denied {
                rule: format!("deny {rule}"),
                origin,
            };
        }
        if self.allow.matching(child, identity).is_some() {
            return Decision::Allowed;
        }
        match self.deny_all {
            Some(origin) => Decision::Denied {
                rule: "deny-all".into(),
                origin,
            },
            None => Decision::Allowed,
        }
    }

    /// A copy of this policy without any rule naming the child `name`.
    pub fn without_context(&self, name: &str) -> Self {
        let mut next = self.clone();
        next.allow.retain_without_context(name);
        next.deny.retain_without_context(name);
        next
    }
}
