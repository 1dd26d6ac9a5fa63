//! Direct references and the alias table.
//!
//! A direct reference `{module}:{symbol}` names a symbol inside one specific
//! module, bypassing dependency search. The artifact it returns carries the
//! full reference as its alias. Each context caches those aliased artifacts
//! so repeated requests for the same address yield the same artifact.

use dashmap::DashMap;

use crate::artifact::Artifact;
use crate::error::{IdentityError, LoaderResult};
use crate::identity::ModuleIdentity;

/// A parsed `{module}:{symbol}` address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectReference {
    pub module: ModuleIdentity,
    pub symbol: String,
    /// The address as requested.
    pub original: String,
}

impl DirectReference {
    /// Parse `reference` if it is a direct reference. Plain symbol names
    /// (no `:`) yield `None`.
    pub fn parse(reference: &str) -> Result<Option<Self>, IdentityError> {
        let Some((module, symbol)) = reference.split_once(':') else {
            return Ok(None);
        };
        let symbol = symbol.trim();
        if symbol.is_empty() {
            return Err(IdentityError::Malformed {
                input: reference.to_string(),
                reason: "direct reference has no symbol after `:`",
            });
        }
        Ok(Some(Self {
            module: ModuleIdentity::parse(module)?,
            symbol: symbol.to_string(),
            original: reference.to_string(),
        }))
    }
}

impl std::fmt::Display for DirectReference {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.module, self.symbol)
    }
}

/// `(module, requested alias)` → aliased artifact.
#[derive(Debug, Default)]
pub struct AliasTable {
    entries: DashMap<(ModuleIdentity, String), Artifact>,
}

impl AliasTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// The cached artifact for `reference`, or the result of `load` aliased
    /// to the requested address. Misses are not cached.
    pub fn get_or_load<F>(&self, reference: &DirectReference, load: F) -> LoaderResult<Option<Artifact>>
    where
        F: FnOnce() -> LoaderResult<Option<Artifact>>,
    {
        let key = (reference.module.clone(), reference.original.clone());
        if let Some(hit) = self.entries.get(&key) {
            return Ok(Some(hit.clone()));
        }
        let Some(original) = load()? else {
            return Ok(None);
        };
        let aliased = original.aliased(reference.original.as_str());
        Ok(Some(self.entries.entry(key).or_insert(aliased).clone()))
    }

    /// Drop every alias into `module`.
    pub fn forget(&self, module: &ModuleIdentity) {
        self.entries.retain(|(m, _), _| m != module);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn id(s: &str) -> ModuleIdentity {
        ModuleIdentity::parse(s).unwrap()
    }

    #[test]
    fn plain_symbols_are_not_references() {
        assert_eq!(DirectReference::parse("org.app.Main").unwrap(), None);
    }

    #[test]
    fn splits_on_first_colon() {
        let r = DirectReference::parse("core-v1:org.core.Api").unwrap().unwrap();
        assert_eq!(r.module, id("core-v1"));
        assert_eq!(r.symbol, "org.core.Api");
        assert_eq!(r.original, "core-v1:org.core.Api");

        let r = DirectReference::parse("core:a:b").unwrap().unwrap();
        assert_eq!(r.symbol, "a:b");
    }

    #[test]
    fn rejects_empty_parts() {
        assert!(DirectReference::parse("core-v1:").is_err());
        assert!(DirectReference::parse(":org.core.Api").is_err());
    }

    #[test]
    fn caches_hits_only() {
        let table = AliasTable::new();
        let reference = DirectReference::parse("core-v1:org.core.Api").unwrap().unwrap();

        let miss = table.get_or_load(&reference, || Ok(None)).unwrap();
        assert!(miss.is_none());
        assert!(table.is_empty());

        let hit = table
            .get_or_load(&reference, || {
                Ok(Some(Artifact::new("org.core.Api", id("core-v1"), Arc::from(&b"api"[..]))))
            })
            .unwrap()
            .unwrap();
        assert_eq!(hit.qualified_name(), "core-v1:org.core.Api");

        // Second lookup never calls the loader.
        let again = table
            .get_or_load(&reference, || panic!("loader must not run"))
            .unwrap()
            .unwrap();
        assert_eq!(again.bytes(), b"api");

        table.forget(&id("core-v1"));
        assert!(table.is_empty());
    }
}
