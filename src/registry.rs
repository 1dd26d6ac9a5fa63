//! Module registry: identity → located record → per-context resolver.
//!
//! Records are shared process-wide through a [`RecordCache`] keyed by
//! `(root, identity)`, so two contexts searching the same root parse a
//! module's files once. Resolvers are private to a context: each
//! [`ModuleRegistry`] owns exactly one resolver per identity, created under
//! that registry's own lock.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, Weak};

use dashmap::DashMap;

use crate::context::Context;
use crate::error::{LoaderResult, ModuleError, SearchRoots};
use crate::identity::ModuleIdentity;
use crate::provenance::Dependency;
use crate::record::{ModuleLayout, ModuleRecord};
use crate::resolver::ModuleResolver;
use crate::version::VersionKey;

/// Process-wide cache of module records, one per `(root, identity)`.
#[derive(Default)]
pub struct RecordCache {
    records: DashMap<(PathBuf, ModuleIdentity), Arc<ModuleRecord>>,
}

impl RecordCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// The record for `dependency` under `root`, created on first request.
    pub fn record(&self, root: &Path, dependency: &Dependency) -> Arc<ModuleRecord> {
        self.records
            .entry((root.to_path_buf(), dependency.identity().clone()))
            .or_insert_with(|| Arc::new(ModuleRecord::new(dependency.clone(), root)))
            .clone()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

impl std::fmt::Debug for RecordCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecordCache")
            .field("len", &self.records.len())
            .finish()
    }
}

/// Search roots and resolver cache of one context.
pub struct ModuleRegistry {
    /// Effective roots: the context's own roots, then its ancestors'.
    roots: Vec<PathBuf>,
    records: Arc<RecordCache>,
    resolvers: Mutex<HashMap<ModuleIdentity, Arc<ModuleResolver>>>,
}

impl ModuleRegistry {
    pub fn new(roots: Vec<PathBuf>, records: Arc<RecordCache>) -> Self {
        Self {
            roots,
            records,
            resolvers: Mutex::new(HashMap::new()),
        }
    }

    /// A registry searching `roots` first, then every root of `parent`.
    pub fn child_of(parent: &ModuleRegistry, roots: Vec<PathBuf>) -> Self {
        let mut effective = roots;
        for root in &parent.roots {
            if !effective.contains(root) {
                effective.push(root.clone());
            }
        }
        Self::new(effective, parent.records.clone())
    }

    pub fn roots(&self) -> &[PathBuf] {
        &self.roots
    }

    /// Find the first root holding an artifact for `dependency`.
    ///
    /// When the request carries a minor version, a root whose module declares
    /// an older minor is passed over in favour of a later compatible root.
    /// If no root is compatible, the first match is used with a warning.
    pub fn locate(&self, dependency: &Dependency) -> LoaderResult<Arc<ModuleRecord>> {
        let identity = dependency.identity();
        if self.roots.is_empty() {
            return Err(ModuleError::NoSearchRoots {
                identity: identity.clone(),
            }
            .into());
        }

        let floor = identity.minor_key();
        let mut fallback: Option<Arc<ModuleRecord>> = None;

        for root in &self.roots {
            let record = self.records.record(root, dependency);
            if !record.exists() {
                continue;
            }
            let Some(floor) = &floor else {
                return Ok(record);
            };
            match record.declared_minor()?.map(VersionKey::new) {
                Some(found) if !found.satisfies(floor) => {
                    tracing::debug!(
                        module = %identity,
                        root = %root.display(),
                        found = found.raw(),
                        wanted = floor.raw(),
                        "skipping module with older minor version"
                    );
                    fallback.get_or_insert(record);
                }
                _ => return Ok(record),
            }
        }

        if let Some(record) = fallback {
            tracing::warn!(
                module = %identity,
                root = %record.root().display(),
                wanted = identity.minor().unwrap_or_default(),
                requested_by = %dependency.describe_chain(),
                "no root has a compatible minor version, using the first match"
            );
            return Ok(record);
        }

        Err(ModuleError::NotFound {
            identity: identity.clone(),
            missing: ModuleLayout::new(&self.roots[0], identity).artifact,
            roots: SearchRoots(self.roots.clone()),
        }
        .into())
    }

    /// The cached resolver for `identity`, if this registry has one.
    pub fn cached(&self, identity: &ModuleIdentity) -> Option<Arc<ModuleResolver>> {
        self.resolvers
            .lock()
            .expect("resolver cache lock poisoned")
            .get(identity)
            .cloned()
    }

    /// The resolver for `dependency` in `context`, created at most once.
    pub(crate) fn resolver_for(
        &self,
        dependency: &Dependency,
        context: &Weak<Context>,
    ) -> LoaderResult<Arc<ModuleResolver>> {
        let mut resolvers = self.resolvers.lock().expect("resolver cache lock poisoned");
        if let Some(resolver) = resolvers.get(dependency.identity()) {
            return Ok(resolver.clone());
        }

        let record = self.locate(dependency)?;
        tracing::debug!(
            module = %dependency.identity(),
            root = %record.root().display(),
            "created module resolver"
        );
        let resolver = Arc::new(ModuleResolver::new(record, context.clone()));
        resolvers.insert(dependency.identity().clone(), resolver.clone());
        Ok(resolver)
    }

    /// Drop `resolver` from the cache if it is still the cached instance.
    pub(crate) fn evict(&self, resolver: &ModuleResolver) {
        let mut resolvers = self.resolvers.lock().expect("resolver cache lock poisoned");
        let cached = resolvers
            .get(resolver.identity())
            .is_some_and(|r| std::ptr::eq(Arc::as_ptr(r), resolver));
        if cached {
            resolvers.remove(resolver.identity());
        }
    }

    /// Every cached resolver, in no particular order.
    pub fn resolvers(&self) -> Vec<Arc<ModuleResolver>> {
        self.resolvers
            .lock()
            .expect("resolver cache lock poisoned")
            .values()
            .cloned()
            .collect()
    }
}

impl std::fmt::Debug for ModuleRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModuleRegistry")
            .field("roots", &self.roots)
            .field("resolvers", &self.resolvers.lock().map(|r| r.len()).unwrap_or(0))
            .finish()
    }
}
