//! Contexts: the isolation-domain tree.
//!
//! Every runtime has one root [`Context`]; children are added with
//! [`Context::create_child`] and form a strict tree. A context holds the
//! modules registered into it, a resolver cache over its effective search
//! roots, an access policy governing what its descendants may use, and an
//! alias table for direct references made from it.
//!
//! Symbol lookups that a module cannot satisfy from itself or its declared
//! dependencies escalate to its context, which searches from the root down
//! ([`Context::resolve_top_first`]).

pub mod alias;
pub mod policy;

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::{Arc, RwLock, Weak};

use arc_swap::ArcSwap;

use crate::artifact::Artifact;
use crate::config::RuntimeConfig;
use crate::error::{AccessError, ContextError, IdentityList, LoaderResult, ResolveError};
use crate::identity::ModuleIdentity;
use crate::plugin::PluginDeclaration;
use crate::provenance::{Dependency, RuleOrigin};
use crate::registry::{ModuleRegistry, RecordCache};
use crate::resolver::lifecycle::ExtensionTable;
use crate::resolver::{ModuleHandle, ModuleResolver};

use self::alias::{AliasTable, DirectReference};
use self::policy::{AccessPolicy, AccessRule, Decision};

/// One isolation domain.
pub struct Context {
    name: String,
    /// Slash-separated path from the root, e.g. `/root/plugins`.
    path: String,
    me: Weak<Context>,
    parent: Option<Weak<Context>>,
    config: Arc<RuntimeConfig>,
    extensions: Arc<ExtensionTable>,
    registry: ModuleRegistry,
    /// Modules registered into this context, in registration order.
    held: RwLock<Vec<Arc<ModuleResolver>>>,
    children: RwLock<BTreeMap<String, Arc<Context>>>,
    policy: ArcSwap<AccessPolicy>,
    aliases: AliasTable,
}

fn validate_name(name: &str) -> Result<(), ContextError> {
    if name.trim().is_empty() || name.contains('/') {
        return Err(ContextError::InvalidName {
            name: name.to_string(),
        });
    }
    Ok(())
}

impl Context {
    /// Create the root of a new context tree.
    pub fn new_root(
        name: &str,
        roots: Vec<PathBuf>,
        config: Arc<RuntimeConfig>,
        extensions: Arc<ExtensionTable>,
    ) -> Arc<Self> {
        let registry = ModuleRegistry::new(roots, Arc::new(RecordCache::new()));
        Self::build(name.to_string(), format!("/{name}"), None, config, extensions, registry)
    }

    fn build(
        name: String,
        path: String,
        parent: Option<Weak<Context>>,
        config: Arc<RuntimeConfig>,
        extensions: Arc<ExtensionTable>,
        registry: ModuleRegistry,
    ) -> Arc<Self> {
        Arc::new_cyclic(|me| Self {
            name,
            path,
            me: me.clone(),
            parent,
            config,
            extensions,
            registry,
            held: RwLock::new(Vec::new()),
            children: RwLock::new(BTreeMap::new()),
            policy: ArcSwap::from_pointee(AccessPolicy::default()),
            aliases: AliasTable::new(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    pub fn extensions(&self) -> &ExtensionTable {
        &self.extensions
    }

    pub fn registry(&self) -> &ModuleRegistry {
        &self.registry
    }

    /// Effective search roots: this context's own, then its ancestors'.
    pub fn search_roots(&self) -> &[PathBuf] {
        self.registry.roots()
    }

    pub fn parent(&self) -> Option<Arc<Context>> {
        self.parent.as_ref().and_then(Weak::upgrade)
    }

    /// The root of this context's tree.
    pub fn root(&self) -> Arc<Context> {
        let mut current = self.arc();
        while let Some(parent) = current.parent() {
            current = parent;
        }
        current
    }

    fn arc(&self) -> Arc<Context> {
        // `self` is always reached through an `Arc` built by `build`.
        self.me
            .upgrade()
            .expect("context accessed after its last Arc was dropped")
    }

    pub fn child(&self, name: &str) -> Option<Arc<Context>> {
        self.children
            .read()
            .expect("context children lock poisoned")
            .get(name)
            .cloned()
    }

    /// Direct children, ordered by name.
    pub fn children(&self) -> Vec<Arc<Context>> {
        self.children
            .read()
            .expect("context children lock poisoned")
            .values()
            .cloned()
            .collect()
    }

    /// This context and every context below it, breadth-first.
    pub fn descendants(&self) -> Vec<Arc<Context>> {
        let mut all = vec![self.arc()];
        let mut next = 0;
        while next < all.len() {
            let children = all[next].children();
            all.extend(children);
            next += 1;
        }
        all
    }

    /// Find a descendant by slash-separated path relative to this context.
    pub fn find(&self, path: &str) -> Option<Arc<Context>> {
        let mut current = self.arc();
        for segment in path.split('/').filter(|s| !s.is_empty()) {
            current = current.child(segment)?;
        }
        Some(current)
    }

    /// Add a child context searching `roots` before this context's roots.
    pub fn create_child(&self, name: &str, roots: Vec<PathBuf>) -> LoaderResult<Arc<Context>> {
        validate_name(name)?;
        let mut children = self.children.write().expect("context children lock poisoned");
        if children.contains_key(name) {
            return Err(ContextError::DuplicateChild {
                parent: self.path.clone(),
                name: name.to_string(),
            }
            .into());
        }

        let child = Self::build(
            name.to_string(),
            format!("{}/{name}", self.path),
            Some(self.me.clone()),
            self.config.clone(),
            self.extensions.clone(),
            ModuleRegistry::child_of(&self.registry, roots),
        );
        children.insert(name.to_string(), child.clone());
        tracing::info!(context = %child.path, "created child context");
        Ok(child)
    }

    /// Detach the child `name` and drop every rule naming it.
    ///
    /// Unless `detach` is set, the modules held in the child's subtree are
    /// released first.
    pub fn remove_child(&self, name: &str, detach: bool) -> LoaderResult<Arc<Context>> {
        let child = self
            .children
            .write()
            .expect("context children lock poisoned")
            .remove(name)
            .ok_or_else(|| ContextError::UnknownChild {
                parent: self.path.clone(),
                name: name.to_string(),
            })?;

        if !detach {
            child.release_all();
        }
        self.policy.rcu(|policy| policy.without_context(name));
        tracing::info!(context = %child.path, detach, "removed child context");
        Ok(child)
    }

    /// Release every module held in this context's subtree, children first.
    pub fn release_all(&self) {
        for child in self.children() {
            child.release_all();
        }
        let held = std::mem::take(&mut *self.held.write().expect("held modules lock poisoned"));
        for resolver in held.iter().rev() {
            resolver.dec_ref();
        }
    }

    /// Register `identity` into this context and activate it.
    ///
    /// Registering a module the context already holds returns its handle
    /// without counting it again.
    pub fn add_module(&self, identity: &ModuleIdentity) -> LoaderResult<ModuleHandle> {
        let dependency = Dependency::primary(identity.clone());
        self.add(&dependency)
    }

    /// Register a module on behalf of `dependency`, keeping its provenance.
    pub fn add_dependency(&self, dependency: &Dependency) -> LoaderResult<ModuleHandle> {
        self.add(dependency)
    }

    fn add(&self, dependency: &Dependency) -> LoaderResult<ModuleHandle> {
        let resolver = self.registry.resolver_for(dependency, &self.me)?;
        {
            let mut held = self.held.write().expect("held modules lock poisoned");
            if held.iter().any(|r| Arc::ptr_eq(r, &resolver)) {
                return Ok(resolver.handle());
            }
            held.push(resolver.clone());
            resolver.inc_ref();
        }

        if let Err(e) = resolver.activate() {
            tracing::warn!(module = %resolver.identity(), error = %e, "module activation failed");
            self.held
                .write()
                .expect("held modules lock poisoned")
                .retain(|r| !Arc::ptr_eq(r, &resolver));
            resolver.dec_ref();
            return Err(e);
        }

        tracing::info!(
            context = %self.path,
            module = %resolver.identity(),
            requested_by = %dependency.describe_chain(),
            "registered module"
        );
        Ok(resolver.handle())
    }

    /// Modules held by this context, in registration order.
    pub fn held(&self) -> Vec<Arc<ModuleResolver>> {
        self.held.read().expect("held modules lock poisoned").clone()
    }

    pub fn modules(&self) -> Vec<ModuleHandle> {
        self.held().iter().map(ModuleResolver::handle).collect()
    }

    /// The resolver for `dependency`: an existing one from this context or
    /// an ancestor, otherwise a new one owned by this context.
    pub(crate) fn resolver_for(&self, dependency: &Dependency) -> LoaderResult<Arc<ModuleResolver>> {
        if let Some(resolver) = self.registry.cached(dependency.identity()) {
            return Ok(resolver);
        }
        let mut ancestor = self.parent();
        while let Some(context) = ancestor {
            if let Some(resolver) = context.registry.cached(dependency.identity()) {
                return Ok(resolver);
            }
            ancestor = context.parent();
        }
        self.registry.resolver_for(dependency, &self.me)
    }

    /// Remove a released resolver from this context's caches.
    pub(crate) fn forget(&self, resolver: &ModuleResolver) {
        self.registry.evict(resolver);
        self.held
            .write()
            .expect("held modules lock poisoned")
            .retain(|r| !std::ptr::eq(Arc::as_ptr(r), resolver));
        for context in self.root().descendants() {
            context.aliases.forget(resolver.identity());
        }
    }

    // -----------------------------------------------------------------------
    // Access policy
    // -----------------------------------------------------------------------

    /// The current policy snapshot.
    pub fn policy(&self) -> Arc<AccessPolicy> {
        self.policy.load_full()
    }

    #[track_caller]
    pub fn allow(&self, rule: AccessRule) {
        let origin = RuleOrigin::caller();
        tracing::debug!(context = %self.path, %rule, %origin, "allow rule added");
        self.policy.rcu(|policy| {
            let mut next = AccessPolicy::clone(policy);
            next.allow.insert(rule.clone(), origin);
            next
        });
    }

    #[track_caller]
    pub fn deny(&self, rule: AccessRule) {
        let origin = RuleOrigin::caller();
        tracing::debug!(context = %self.path, %rule, %origin, "deny rule added");
        self.policy.rcu(|policy| {
            let mut next = AccessPolicy::clone(policy);
            next.deny.insert(rule.clone(), origin);
            next
        });
    }

    /// Remove an allow rule. Returns whether it was present.
    pub fn revoke_allow(&self, rule: &AccessRule) -> bool {
        let previous = self.policy.rcu(|policy| {
            let mut next = AccessPolicy::clone(policy);
            next.allow.remove(rule);
            next
        });
        previous.allow.contains(rule)
    }

    /// Remove a deny rule. Returns whether it was present.
    pub fn revoke_deny(&self, rule: &AccessRule) -> bool {
        let previous = self.policy.rcu(|policy| {
            let mut next = AccessPolicy::clone(policy);
            next.deny.remove(rule);
            next
        });
        previous.deny.contains(rule)
    }

    /// Refuse every request not matched by an allow rule.
    #[track_caller]
    pub fn set_deny_all(&self, enabled: bool) {
        let origin = if enabled {
            Some(RuleOrigin::caller())
        } else {
            None
        };
        self.policy.rcu(|policy| AccessPolicy {
            deny_all: origin,
            ..AccessPolicy::clone(policy)
        });
    }

    /// Check a request for `identity` that reaches this context through its
    /// child `child` (`None` when the requester is outside this subtree).
    pub fn check_access(&self, child: Option<&str>, identity: &ModuleIdentity) -> Result<(), AccessError> {
        match self.policy.load().decide(child, identity) {
            Decision::Allowed => Ok(()),
            Decision::Denied { rule, origin } => {
                tracing::debug!(context = %self.path, module = %identity, %rule, "access denied");
                Err(AccessError::Denied {
                    module: identity.clone(),
                    context: child.unwrap_or("<outside>").to_string(),
                    rule,
                    origin: origin.to_string(),
                })
            }
        }
    }

    /// Whether this context may use `target`.
    ///
    /// Modules registered into this context are always visible. Any other
    /// module must pass the policy of every ancestor, each keyed by its child
    /// on the path down to this context, regardless of which context caches
    /// the module's resolver. A module owned outside this context's line of
    /// ancestors must also pass its owner's policy as an outside request.
    pub fn check_visibility(&self, target: &ModuleResolver) -> Result<(), AccessError> {
        let owner = target.context().ok();
        let owned_here = owner
            .as_ref()
            .is_some_and(|o| std::ptr::eq(Arc::as_ptr(o), self));
        if owned_here && self.holds(target) {
            return Ok(());
        }

        let mut owner_on_path = owned_here;
        let mut child = self.arc();
        while let Some(ancestor) = child.parent() {
            ancestor.check_access(Some(child.name()), target.identity())?;
            owner_on_path |= owner.as_ref().is_some_and(|o| Arc::ptr_eq(o, &ancestor));
            child = ancestor;
        }

        match owner {
            Some(owner) if !owner_on_path => owner.check_access(None, target.identity()),
            _ => Ok(()),
        }
    }

    fn holds(&self, target: &ModuleResolver) -> bool {
        self.held
            .read()
            .expect("held modules lock poisoned")
            .iter()
            .any(|r| std::ptr::eq(Arc::as_ptr(r), target))
    }

    // -----------------------------------------------------------------------
    // Resolution
    // -----------------------------------------------------------------------

    /// Resolve `symbol` from this context: a direct reference, or a
    /// top-first search of the held modules.
    pub fn resolve(&self, symbol: &str) -> LoaderResult<Artifact> {
        if let Some(reference) = DirectReference::parse(symbol)? {
            return Ok(self.resolve_direct(&reference)?.1);
        }
        self.resolve_top_first(symbol, self)
    }

    /// Resolve a direct reference made from this context.
    pub(crate) fn resolve_direct(
        &self,
        reference: &DirectReference,
    ) -> LoaderResult<(Arc<ModuleResolver>, Artifact)> {
        let target = self.resolver_for(&Dependency::primary(reference.module.clone()))?;
        self.check_visibility(&target)?;
        let artifact = self
            .aliases
            .get_or_load(reference, || target.resolve_local(&reference.symbol))?
            .ok_or_else(|| ResolveError::SymbolNotFound {
                symbol: reference.original.clone(),
                requester: self.path.clone(),
                searched: IdentityList(vec![reference.module.clone()]),
                advice: None,
            })?;
        Ok((target, artifact))
    }

    /// Search from the root down to this context. At each level the held
    /// modules are tried in registration order; the first visible hit wins,
    /// and a denial is only reported if no level supplies the symbol.
    pub fn resolve_top_first(&self, symbol: &str, requester: &Context) -> LoaderResult<Artifact> {
        let mut denial: Option<AccessError> = None;
        let mut searched = Vec::new();
        if let Some(artifact) = self.search_top_first(symbol, requester, &mut denial, &mut searched)? {
            return Ok(artifact);
        }
        if let Some(denial) = denial {
            return Err(denial.into());
        }
        Err(ResolveError::SymbolNotFound {
            symbol: symbol.to_string(),
            requester: requester.path.clone(),
            searched: IdentityList(searched),
            advice: None,
        }
        .into())
    }

    fn search_top_first(
        &self,
        symbol: &str,
        requester: &Context,
        denial: &mut Option<AccessError>,
        searched: &mut Vec<ModuleIdentity>,
    ) -> LoaderResult<Option<Artifact>> {
        if let Some(parent) = self.parent() {
            if let Some(artifact) = parent.search_top_first(symbol, requester, denial, searched)? {
                return Ok(Some(artifact));
            }
        }
        self.resolve_in_this_context(symbol, requester, denial, searched)
    }

    fn resolve_in_this_context(
        &self,
        symbol: &str,
        requester: &Context,
        denial: &mut Option<AccessError>,
        searched: &mut Vec<ModuleIdentity>,
    ) -> LoaderResult<Option<Artifact>> {
        for resolver in self.held() {
            searched.push(resolver.identity().clone());
            let Some(artifact) = resolver.resolve_local(symbol)? else {
                continue;
            };
            match requester.check_visibility(&resolver) {
                Ok(()) => return Ok(Some(artifact)),
                Err(e) => {
                    denial.get_or_insert(e);
                }
            }
        }
        Ok(None)
    }

    // -----------------------------------------------------------------------
    // Plugins and diagnostics
    // -----------------------------------------------------------------------

    /// Plugin bindings for `interface` declared by modules visible from here,
    /// root first, in registration order.
    pub fn plugins(&self, interface: &str) -> LoaderResult<Vec<PluginDeclaration>> {
        let mut chain = vec![self.arc()];
        let mut ancestor = self.parent();
        while let Some(context) = ancestor {
            ancestor = context.parent();
            chain.push(context);
        }

        let mut found: Vec<PluginDeclaration> = Vec::new();
        for context in chain.iter().rev() {
            for resolver in context.held() {
                for declaration in resolver.record().plugins()?.iter() {
                    let duplicate = found
                        .iter()
                        .any(|d| d.reference() == declaration.reference() && d.interface == declaration.interface);
                    if declaration.interface == interface && !duplicate {
                        found.push(declaration.clone());
                    }
                }
            }
        }
        Ok(found)
    }

    /// Multi-line dump of this context's subtree and held modules.
    pub fn describe(&self) -> String {
        let mut out = String::new();
        self.describe_into(&mut out, 0);
        out
    }

    fn describe_into(&self, out: &mut String, depth: usize) {
        let indent = "  ".repeat(depth);
        out.push_str(&format!("{indent}{}\n", self.name));
        for resolver in self.held() {
            out.push_str(&format!(
                "{indent}  - {} (refs {})\n",
                resolver.identity(),
                resolver.ref_count()
            ));
        }
        for child in self.children() {
            child.describe_into(out, depth + 1);
        }
    }
}

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context")
            .field("path", &self.path)
            .field("roots", &self.registry.roots())
            .field("held", &self.held().len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::LoaderError;
    use crate::testutil::ModuleBuilder;
    use tempfile::TempDir;

    fn id(s: &str) -> ModuleIdentity {
        ModuleIdentity::parse(s).unwrap()
    }

    fn root(tmp: &TempDir) -> Arc<Context> {
        Context::new_root(
            "root",
            vec![tmp.path().to_path_buf()],
            Arc::new(RuntimeConfig::default()),
            Arc::new(ExtensionTable::new()),
        )
    }

    #[test]
    fn child_names_are_unique_and_valid() {
        let tmp = TempDir::new().unwrap();
        let ctx = root(&tmp);
        let child = ctx.create_child("plugins", Vec::new()).unwrap();
        assert_eq!(child.path(), "/root/plugins");
        assert!(Arc::ptr_eq(&child.root(), &ctx));

        let err = ctx.create_child("plugins", Vec::new()).unwrap_err();
        assert!(matches!(
            err,
            LoaderError::Context(ContextError::DuplicateChild { .. })
        ));
        assert!(ctx.create_child("a/b", Vec::new()).is_err());
        assert!(ctx.create_child(" ", Vec::new()).is_err());
    }

    #[test]
    fn find_walks_paths() {
        let tmp = TempDir::new().unwrap();
        let ctx = root(&tmp);
        let a = ctx.create_child("a", Vec::new()).unwrap();
        a.create_child("b", Vec::new()).unwrap();

        assert_eq!(ctx.find("a/b").unwrap().path(), "/root/a/b");
        assert_eq!(ctx.find("/a/").unwrap().path(), "/root/a");
        assert!(Arc::ptr_eq(&ctx.find("").unwrap(), &ctx));
        assert!(ctx.find("a/c").is_none());
        assert_eq!(ctx.descendants().len(), 3);
    }

    #[test]
    fn add_module_is_idempotent() {
        let tmp = TempDir::new().unwrap();
        ModuleBuilder::new(tmp.path(), "core-v1").write();
        let ctx = root(&tmp);

        let first = ctx.add_module(&id("core-v1")).unwrap();
        let second = ctx.add_module(&id("core-v1")).unwrap();
        assert!(Arc::ptr_eq(first.resolver(), second.resolver()));
        assert_eq!(first.resolver().ref_count(), 1);
        assert_eq!(ctx.modules().len(), 1);
    }

    #[test]
    fn missing_module_is_not_found() {
        let tmp = TempDir::new().unwrap();
        let ctx = root(&tmp);
        let err = ctx.add_module(&id("ghost-v1")).unwrap_err();
        assert!(err.to_string().contains("ghost-v1"));
        assert!(ctx.modules().is_empty());
    }

    #[test]
    fn top_first_prefers_ancestors() {
        let tmp = TempDir::new().unwrap();
        let child_root = TempDir::new().unwrap();
        ModuleBuilder::new(tmp.path(), "core-v1")
            .symbol("org.shared.Api", "from-root")
            .write();
        ModuleBuilder::new(child_root.path(), "local-v1")
            .symbol("org.shared.Api", "from-child")
            .write();

        let ctx = root(&tmp);
        ctx.add_module(&id("core-v1")).unwrap();
        let child = ctx
            .create_child("c", vec![child_root.path().to_path_buf()])
            .unwrap();
        child.add_module(&id("local-v1")).unwrap();

        let artifact = child.resolve("org.shared.Api").unwrap();
        assert_eq!(artifact.text(), Some("from-root"));
    }

    #[test]
    fn later_success_beats_earlier_denial() {
        let tmp = TempDir::new().unwrap();
        let child_root = TempDir::new().unwrap();
        ModuleBuilder::new(tmp.path(), "core-v1")
            .symbol("org.shared.Api", "from-root")
            .write();
        ModuleBuilder::new(child_root.path(), "local-v1")
            .symbol("org.shared.Api", "from-child")
            .write();

        let ctx = root(&tmp);
        ctx.add_module(&id("core-v1")).unwrap();
        let child = ctx
            .create_child("c", vec![child_root.path().to_path_buf()])
            .unwrap();
        child.add_module(&id("local-v1")).unwrap();
        ctx.deny(AccessRule::pair("c", id("core-v1")));

        let artifact = child.resolve("org.shared.Api").unwrap();
        assert_eq!(artifact.text(), Some("from-child"));

        // Without a local supplier the denial surfaces.
        let err = child.resolve("org.shared.Api2").unwrap_err();
        assert!(err.is_symbol_not_found());
        ModuleBuilder::new(tmp.path(), "extra-v1")
            .symbol("org.only.Root", "x")
            .write();
        ctx.add_module(&id("extra-v1")).unwrap();
        ctx.deny(AccessRule::context("c"));
        let err = child.resolve("org.only.Root").unwrap_err();
        assert!(err.is_access_denied(), "{err:?}");
    }

    #[test]
    fn same_context_access_ignores_policy() {
        let tmp = TempDir::new().unwrap();
        ModuleBuilder::new(tmp.path(), "core-v1")
            .symbol("org.core.Api", "api")
            .write();
        let ctx = root(&tmp);
        ctx.add_module(&id("core-v1")).unwrap();
        ctx.set_deny_all(true);
        assert!(ctx.resolve("org.core.Api").is_ok());
    }

    #[test]
    fn ancestor_policy_covers_modules_it_does_not_hold() {
        let tmp = TempDir::new().unwrap();
        ModuleBuilder::new(tmp.path(), "core-v1")
            .symbol("org.core.Api", "api")
            .write();
        ModuleBuilder::new(tmp.path(), "plugin-v1")
            .symbol("org.plugin.Impl", "impl")
            .declares("plugin 1\ncore 1\n")
            .write();

        let ctx = root(&tmp);
        let sandbox = ctx.create_child("sandbox", Vec::new()).unwrap();
        let plugin = sandbox.add_module(&id("plugin-v1")).unwrap();
        ctx.deny(AccessRule::module(id("core-v1")));

        let err = plugin.resolve("org.core.Api").unwrap_err();
        assert!(err.is_access_denied(), "{err:?}");
        let err = sandbox.resolve("core-v1:org.core.Api").unwrap_err();
        assert!(err.is_access_denied(), "{err:?}");
        assert!(plugin.resolver().used_dependencies().is_empty());
        assert!(ctx.registry().cached(&id("core-v1")).is_none());

        // A blanket rule on the child still leaves its own modules usable.
        assert!(ctx.revoke_deny(&AccessRule::module(id("core-v1"))));
        ctx.deny(AccessRule::context("sandbox"));
        assert!(plugin.resolve("org.core.Api").unwrap_err().is_access_denied());
        assert_eq!(sandbox.resolve("org.plugin.Impl").unwrap().text(), Some("impl"));

        assert!(ctx.revoke_deny(&AccessRule::context("sandbox")));
        assert_eq!(plugin.resolve("org.core.Api").unwrap().text(), Some("api"));
    }

    #[test]
    fn grandparent_policy_applies_below_child() {
        let tmp = TempDir::new().unwrap();
        ModuleBuilder::new(tmp.path(), "core-v1")
            .symbol("org.core.Api", "api")
            .write();
        let ctx = root(&tmp);
        let mid = ctx.create_child("mid", Vec::new()).unwrap();
        let leaf = mid.create_child("leaf", Vec::new()).unwrap();
        mid.add_module(&id("core-v1")).unwrap();

        // Only `mid` may see the module it holds; the root forbids the branch.
        ctx.deny(AccessRule::pair("mid", id("core-v1")));
        let err = leaf.resolve("org.core.Api").unwrap_err();
        match err {
            LoaderError::Access(AccessError::Denied { context, .. }) => assert_eq!(context, "mid"),
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(mid.resolve("org.core.Api").is_ok());
    }

    #[test]
    fn denial_names_registration_site() {
        let tmp = TempDir::new().unwrap();
        ModuleBuilder::new(tmp.path(), "core-v1")
            .symbol("org.core.Api", "api")
            .write();
        let ctx = root(&tmp);
        ctx.add_module(&id("core-v1")).unwrap();
        let child = ctx.create_child("c", Vec::new()).unwrap();
        ctx.set_deny_all(true);

        match child.resolve("org.core.Api").unwrap_err() {
            LoaderError::Access(AccessError::Denied { rule, origin, context, .. }) => {
                assert_eq!(rule, "deny-all");
                assert_eq!(context, "c");
                assert!(origin.contains("context"), "{origin}");
            }
            other => panic!("unexpected error: {other:?}"),
        }

        ctx.allow(AccessRule::context("c"));
        assert!(child.resolve("org.core.Api").is_ok());
    }

    #[test]
    fn revoke_rules() {
        let tmp = TempDir::new().unwrap();
        let ctx = root(&tmp);
        let rule = AccessRule::module(id("x-v1"));
        ctx.deny(rule.clone());
        assert!(ctx.check_access(Some("c"), &id("x-v1")).is_err());
        assert!(ctx.revoke_deny(&rule));
        assert!(!ctx.revoke_deny(&rule));
        assert!(ctx.check_access(Some("c"), &id("x-v1")).is_ok());
    }

    #[test]
    fn remove_child_strips_rules_and_releases() {
        let tmp = TempDir::new().unwrap();
        ModuleBuilder::new(tmp.path(), "core-v1").write();
        let ctx = root(&tmp);
        let child = ctx.create_child("c", Vec::new()).unwrap();
        let handle = child.add_module(&id("core-v1")).unwrap();
        ctx.deny(AccessRule::context("c"));
        ctx.allow(AccessRule::pair("c", id("core-v1")));

        let removed = ctx.remove_child("c", false).unwrap();
        assert!(Arc::ptr_eq(&removed, &child));
        assert!(handle.resolver().is_released());
        assert!(ctx.policy().deny.is_empty());
        assert!(ctx.policy().allow.is_empty());
        assert!(ctx.child("c").is_none());

        assert!(matches!(
            ctx.remove_child("c", false).unwrap_err(),
            LoaderError::Context(ContextError::UnknownChild { .. })
        ));
    }

    #[test]
    fn detached_child_keeps_modules() {
        let tmp = TempDir::new().unwrap();
        ModuleBuilder::new(tmp.path(), "core-v1").write();
        let ctx = root(&tmp);
        let child = ctx.create_child("c", Vec::new()).unwrap();
        let handle = child.add_module(&id("core-v1")).unwrap();

        ctx.remove_child("c", true).unwrap();
        assert!(!handle.resolver().is_released());
        assert_eq!(handle.resolver().ref_count(), 1);
    }

    #[test]
    fn plugins_are_collected_root_first() {
        let tmp = TempDir::new().unwrap();
        ModuleBuilder::new(tmp.path(), "api-v1")
            .plugin("impl-v1", "org.api.Codec\torg.impl.Gzip\n")
            .write();
        ModuleBuilder::new(tmp.path(), "app-v1")
            .plugin("impl-v1", "org.api.Codec\torg.impl.Zstd\norg.api.Other\torg.impl.Gzip\n")
            .write();
        ModuleBuilder::new(tmp.path(), "impl-v1")
            .symbol("org.impl.Gzip", "gzip")
            .symbol("org.impl.Zstd", "zstd")
            .write();

        let ctx = root(&tmp);
        ctx.add_module(&id("api-v1")).unwrap();
        let child = ctx.create_child("c", Vec::new()).unwrap();
        child.add_module(&id("app-v1")).unwrap();

        let codecs = child.plugins("org.api.Codec").unwrap();
        let names: Vec<&str> = codecs.iter().map(|p| p.implementation.as_str()).collect();
        assert_eq!(names, ["org.impl.Gzip", "org.impl.Zstd"]);
        assert_eq!(codecs[0].declared_by, id("api-v1"));
        assert_eq!(codecs[1].declared_by, id("app-v1"));
        assert_eq!(ctx.plugins("org.api.Codec").unwrap().len(), 1);

        let loaded = codecs[1].load(&child).unwrap();
        assert_eq!(loaded.text(), Some("zstd"));
        assert_eq!(loaded.module(), &id("impl-v1"));

        ctx.deny(AccessRule::module(id("impl-v1")));
        assert!(codecs[0].load(&child).unwrap_err().is_access_denied());
    }

    #[test]
    fn debug_shows_path_and_roots() {
        let tmp = TempDir::new().unwrap();
        let ctx = root(&tmp);
        let child = ctx.create_child("c", Vec::new()).unwrap();
        let rendered = format!("{child:?}");
        assert!(rendered.contains("/root/c"), "{rendered}");
        assert!(rendered.contains(&format!("{:?}", tmp.path())), "{rendered}");
    }

    #[test]
    fn describe_lists_tree() {
        let tmp = TempDir::new().unwrap();
        ModuleBuilder::new(tmp.path(), "core-v1").write();
        let ctx = root(&tmp);
        ctx.add_module(&id("core-v1")).unwrap();
        ctx.create_child("c", Vec::new()).unwrap();

        assert_eq!(ctx.describe(), "root\n  - core-v1 (refs 1)\n  c\n");
    }
}
