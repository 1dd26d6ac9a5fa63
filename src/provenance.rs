//! Provenance: who asked for a module, and who registered a policy rule.
//!
//! A [`Dependency`] links a module identity to the dependency that requested
//! it, forming a singly-linked chain back to the primary module. A
//! [`RuleOrigin`] records the source location that registered an access rule
//! so a denial can point the operator at the code responsible for it.

use std::hash::{Hash, Hasher};
use std::panic::Location;
use std::sync::Arc;

use crate::identity::ModuleIdentity;

/// A module identity plus the module that requested it.
#[derive(Debug, Clone)]
pub struct Dependency {
    identity: ModuleIdentity,
    requester: Option<Arc<Dependency>>,
}

impl Dependency {
    /// A primary module: nothing requested it (bootstrap or host registration).
    pub fn primary(identity: ModuleIdentity) -> Self {
        Self {
            identity,
            requester: None,
        }
    }

    pub(crate) fn requested_by(identity: ModuleIdentity, requester: Arc<Dependency>) -> Self {
        Self {
            identity,
            requester: Some(requester),
        }
    }

    pub fn identity(&self) -> &ModuleIdentity {
        &self.identity
    }

    /// The dependency that requested this one, if any.
    pub fn requester(&self) -> Option<&Dependency> {
        self.requester.as_deref()
    }

    /// Identities from this dependency back to the primary module, inclusive.
    pub fn chain(&self) -> Vec<ModuleIdentity> {
        let mut chain = vec![self.identity.clone()];
        let mut current = self.requester.as_deref();
        while let Some(dep) = current {
            chain.push(dep.identity.clone());
            current = dep.requester.as_deref();
        }
        chain
    }

    /// Render the chain as `a-v1 <- b-v2 <- root-v1`.
    pub fn describe_chain(&self) -> String {
        self.chain()
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(" <- ")
    }
}

impl PartialEq for Dependency {
    fn eq(&self, other: &Self) -> bool {
        self.identity == other.identity
    }
}

impl Eq for Dependency {}

impl Hash for Dependency {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.identity.hash(state);
    }
}

impl std::fmt::Display for Dependency {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.identity)
    }
}

/// Where an access rule was registered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RuleOrigin {
    location: &'static Location<'static>,
}

impl RuleOrigin {
    /// Capture the caller's source location.
    #[track_caller]
    pub fn caller() -> Self {
        Self {
            location: Location::caller(),
        }
    }

    pub fn location(&self) -> &'static Location<'static> {
        self.location
    }
}

impl std::fmt::Display for RuleOrigin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}:{}:{}",
            self.location.file(),
            self.location.line(),
            self.location.column()
        )
    }
}
