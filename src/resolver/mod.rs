//! Per-module symbol resolution and reference counting.
//!
//! A [`ModuleResolver`] wraps one [`ModuleRecord`] inside one context. It
//! answers symbol lookups by consulting, in order: direct references, its own
//! artifact, its declared one-level dependencies, and finally its owning
//! context's top-first search. Every dependency it actually uses is recorded
//! and counted once; when the resolver's own count reaches zero it releases
//! those dependencies in turn.

pub mod lifecycle;

use std::collections::{HashSet, VecDeque};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, Weak};

use crate::artifact::Artifact;
use crate::config::FallOpenMode;
use crate::context::Context;
use crate::context::alias::DirectReference;
use crate::error::{
    ContextError, IdentityList, LoaderError, LoaderResult, ModuleError, ResolveError,
};
use crate::identity::ModuleIdentity;
use crate::provenance::Dependency;
use crate::record::ModuleRecord;

use self::lifecycle::ModuleLifecycle;

enum LifecycleSlot {
    /// Not yet activated.
    Pending,
    Activating,
    /// Activated; the module declares no lifecycle extension.
    Absent,
    Active(Arc<dyn ModuleLifecycle>),
    Released,
}

/// Resolution state of one module inside one context.
pub struct ModuleResolver {
    record: Arc<ModuleRecord>,
    context: Weak<Context>,
    refs: AtomicUsize,
    released: AtomicBool,
    /// Dependencies this module has resolved symbols from, each counted once.
    used: Mutex<Vec<Arc<ModuleResolver>>>,
    lifecycle: Mutex<LifecycleSlot>,
}

impl ModuleResolver {
    pub(crate) fn new(record: Arc<ModuleRecord>, context: Weak<Context>) -> Self {
        Self {
            record,
            context,
            refs: AtomicUsize::new(0),
            released: AtomicBool::new(false),
            used: Mutex::new(Vec::new()),
            lifecycle: Mutex::new(LifecycleSlot::Pending),
        }
    }

    pub fn identity(&self) -> &ModuleIdentity {
        self.record.identity()
    }

    pub fn record(&self) -> &Arc<ModuleRecord> {
        &self.record
    }

    /// The owning context, if it is still alive.
    pub fn context(&self) -> LoaderResult<Arc<Context>> {
        self.context.upgrade().ok_or_else(|| {
            ContextError::Released {
                what: format!("context of module {}", self.identity()),
            }
            .into()
        })
    }

    pub fn ref_count(&self) -> usize {
        self.refs.load(Ordering::Acquire)
    }

    pub fn is_released(&self) -> bool {
        self.released.load(Ordering::Acquire)
    }

    /// Identities of the dependencies this module has used so far.
    pub fn used_dependencies(&self) -> Vec<ModuleIdentity> {
        self.used
            .lock()
            .expect("used dependency lock poisoned")
            .iter()
            .map(|r| r.identity().clone())
            .collect()
    }

    /// Capability token for code running on behalf of this module.
    pub fn handle(self: &Arc<Self>) -> ModuleHandle {
        ModuleHandle {
            resolver: self.clone(),
        }
    }

    /// Look `symbol` up in this module's own artifact only.
    pub fn resolve_local(&self, symbol: &str) -> LoaderResult<Option<Artifact>> {
        let index = self.record.artifact()?;
        Ok(index
            .get(symbol)
            .map(|bytes| Artifact::new(symbol, self.identity().clone(), bytes)))
    }

    /// Resolve `symbol` on behalf of this module.
    pub fn resolve(&self, symbol: &str) -> LoaderResult<Artifact> {
        let context = self.context()?;

        if let Some(reference) = DirectReference::parse(symbol)? {
            let (target, artifact) = context.resolve_direct(&reference)?;
            self.record_use(&target)?;
            return Ok(artifact);
        }

        if let Some(artifact) = self.resolve_local(symbol)? {
            return Ok(artifact);
        }

        let dependencies = self.record.dependencies()?;
        let mut denial: Option<LoaderError> = None;

        for dependency in dependencies.iter() {
            let target = context.resolver_for(dependency)?;
            let Some(artifact) = target.resolve_local(symbol)? else {
                continue;
            };
            match context.check_visibility(&target) {
                Ok(()) => {
                    self.record_use(&target)?;
                    return Ok(artifact);
                }
                Err(e) => {
                    tracing::debug!(module = %self.identity(), symbol, error = %e, "dependency denied");
                    denial.get_or_insert(e.into());
                }
            }
        }

        match context.resolve_top_first(symbol, &context) {
            Ok(artifact) => return Ok(artifact),
            Err(e) if e.is_access_denied() => {
                denial.get_or_insert(e);
            }
            Err(e) if e.is_symbol_not_found() => {}
            Err(e) => return Err(e),
        }

        if let Some(denial) = denial {
            return Err(denial);
        }

        let mut searched = vec![self.identity().clone()];
        searched.extend(dependencies.iter().map(|d| d.identity().clone()));

        let mut advice = None;
        let mode = context.config().fall_open;
        if mode != FallOpenMode::Disabled {
            if let Some((target, artifact)) = self.fall_open_search(&context, symbol, &searched)? {
                if mode == FallOpenMode::Enabled {
                    tracing::warn!(
                        module = %self.identity(),
                        symbol,
                        supplier = %target.identity(),
                        "resolved through fall-open search; declare {} as a dependency of {}",
                        target.identity(),
                        self.identity()
                    );
                    self.record_use(&target)?;
                    return Ok(artifact);
                }
                advice = Some(format!(
                    "Module {} supplies this symbol. Declare it in the dependency file of {}.",
                    target.identity(),
                    self.identity()
                ));
            }
        }

        Err(ResolveError::SymbolNotFound {
            symbol: symbol.to_string(),
            requester: self.identity().to_string(),
            searched: IdentityList(searched),
            advice,
        }
        .into())
    }

    /// Breadth-first search over every held module in the tree and its
    /// transitive dependencies, skipping modules already checked.
    fn fall_open_search(
        &self,
        context: &Arc<Context>,
        symbol: &str,
        checked: &[ModuleIdentity],
    ) -> LoaderResult<Option<(Arc<ModuleResolver>, Artifact)>> {
        let mut queue: VecDeque<Arc<ModuleResolver>> = context
            .root()
            .descendants()
            .iter()
            .flat_map(|ctx| ctx.held())
            .collect();
        let mut seen: HashSet<ModuleIdentity> = HashSet::new();
        let mut visited = 0usize;
        let mut found = None;

        while let Some(candidate) = queue.pop_front() {
            if !seen.insert(candidate.identity().clone()) {
                continue;
            }
            visited += 1;

            if !checked.contains(candidate.identity()) {
                if let Some(artifact) = candidate.resolve_local(symbol)? {
                    if context.check_visibility(&candidate).is_ok() {
                        found = Some((candidate, artifact));
                        break;
                    }
                }
            }

            let (Ok(owner), Ok(dependencies)) =
                (candidate.context(), candidate.record.dependencies())
            else {
                continue;
            };
            for dependency in dependencies.iter() {
                if seen.contains(dependency.identity()) {
                    continue;
                }
                match owner.resolver_for(dependency) {
                    Ok(next) => queue.push_back(next),
                    Err(e) => {
                        tracing::debug!(module = %dependency, error = %e, "fall-open skipped module");
                    }
                }
            }
        }

        tracing::info!(
            module = %self.identity(),
            symbol,
            visited,
            found = found.is_some(),
            "fall-open search finished"
        );
        Ok(found)
    }

    /// Record that this module used `target`. Only the first use counts.
    fn record_use(&self, target: &Arc<ModuleResolver>) -> LoaderResult<()> {
        if std::ptr::eq(Arc::as_ptr(target), self) {
            return Ok(());
        }
        {
            let mut used = self.used.lock().expect("used dependency lock poisoned");
            if self.is_released() || used.iter().any(|u| Arc::ptr_eq(u, target)) {
                return Ok(());
            }
            used.push(target.clone());
            target.inc_ref();
        }
        tracing::debug!(module = %self.identity(), dependency = %target.identity(), "recorded dependency use");

        if let Err(e) = target.activate() {
            tracing::warn!(
                module = %self.identity(),
                dependency = %target.identity(),
                error = %e,
                "dependency activation failed"
            );
            let recorded = {
                let mut used = self.used.lock().expect("used dependency lock poisoned");
                let before = used.len();
                used.retain(|u| !Arc::ptr_eq(u, target));
                used.len() != before
            };
            if recorded {
                target.dec_ref();
            }
            return Err(e);
        }
        Ok(())
    }

    /// Increment the reference count. Returns the new count.
    pub fn inc_ref(&self) -> usize {
        if self.is_released() {
            tracing::warn!(module = %self.identity(), "inc_ref on a released module ignored");
            return 0;
        }
        self.refs.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Decrement the reference count, releasing the module when it reaches
    /// zero. Returns the new count.
    pub fn dec_ref(&self) -> usize {
        match self
            .refs
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1))
        {
            Ok(1) => {
                self.release();
                0
            }
            Ok(previous) => previous - 1,
            Err(_) => {
                tracing::warn!(module = %self.identity(), "dec_ref on an unreferenced module ignored");
                0
            }
        }
    }

    fn release(&self) {
        if self.released.swap(true, Ordering::AcqRel) {
            return;
        }

        let slot = std::mem::replace(
            &mut *self.lifecycle.lock().expect("lifecycle lock poisoned"),
            LifecycleSlot::Released,
        );
        if let LifecycleSlot::Active(extension) = slot {
            self.notify_unloaded(extension.as_ref());
        }

        let used = std::mem::take(&mut *self.used.lock().expect("used dependency lock poisoned"));
        for dependency in used {
            dependency.dec_ref();
        }

        if let Some(context) = self.context.upgrade() {
            context.forget(self);
        }
        tracing::info!(module = %self.identity(), "module released");
    }

    /// Deliver `unloaded`, logging and swallowing errors and panics.
    fn notify_unloaded(&self, extension: &dyn ModuleLifecycle) {
        match catch_unwind(AssertUnwindSafe(|| extension.unloaded())) {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                tracing::warn!(module = %self.identity(), error = %e, "lifecycle unload failed");
            }
            Err(_) => {
                tracing::error!(module = %self.identity(), "lifecycle unload panicked");
            }
        }
    }

    /// Instantiate the lifecycle extension on first activation.
    pub(crate) fn activate(self: &Arc<Self>) -> LoaderResult<()> {
        {
            let mut slot = self.lifecycle.lock().expect("lifecycle lock poisoned");
            if !matches!(*slot, LifecycleSlot::Pending) {
                return Ok(());
            }
            *slot = LifecycleSlot::Activating;
        }

        // The slot lock is not held here: `loaded` may resolve symbols.
        let outcome = self.load_lifecycle();

        let mut slot = self.lifecycle.lock().expect("lifecycle lock poisoned");
        match outcome {
            Ok(next) if matches!(*slot, LifecycleSlot::Activating) => {
                *slot = next;
                Ok(())
            }
            Ok(next) => {
                // Released while activating.
                drop(slot);
                if let LifecycleSlot::Active(extension) = next {
                    self.notify_unloaded(extension.as_ref());
                }
                Ok(())
            }
            Err(e) => {
                if matches!(*slot, LifecycleSlot::Activating) {
                    *slot = LifecycleSlot::Pending;
                }
                Err(e)
            }
        }
    }

    fn load_lifecycle(self: &Arc<Self>) -> LoaderResult<LifecycleSlot> {
        let context = self.context()?;
        let Some(symbol) = self.record.property(&context.config().lifecycle_property)? else {
            return Ok(LifecycleSlot::Absent);
        };

        let load_error = |message: String| ModuleError::Load {
            identity: self.identity().clone(),
            message,
        };
        if !self.record.artifact()?.contains(&symbol) {
            return Err(load_error(format!(
                "lifecycle extension {symbol} is not part of the module artifact"
            ))
            .into());
        }
        let extension = context
            .extensions()
            .instantiate(&symbol)
            .ok_or_else(|| load_error(format!("no lifecycle factory registered for {symbol}")))?;
        extension
            .loaded(&self.handle())
            .map_err(|e| load_error(format!("lifecycle extension {symbol} failed: {e}")))?;

        tracing::debug!(module = %self.identity(), extension = %symbol, "lifecycle extension loaded");
        Ok(LifecycleSlot::Active(extension))
    }
}

impl std::fmt::Debug for ModuleResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModuleResolver")
            .field("identity", self.identity())
            .field("refs", &self.ref_count())
            .field("released", &self.is_released())
            .finish()
    }
}

/// Capability token naming one module in one context.
///
/// Module-facing code receives a handle instead of discovering its caller,
/// and passes it back on every call that needs to know who is asking.
#[derive(Clone)]
pub struct ModuleHandle {
    resolver: Arc<ModuleResolver>,
}

impl ModuleHandle {
    pub fn identity(&self) -> &ModuleIdentity {
        self.resolver.identity()
    }

    pub fn resolver(&self) -> &Arc<ModuleResolver> {
        &self.resolver
    }

    pub fn context(&self) -> LoaderResult<Arc<Context>> {
        self.resolver.context()
    }

    /// Resolve `symbol` as this module.
    pub fn resolve(&self, symbol: &str) -> LoaderResult<Artifact> {
        self.resolver.resolve(symbol)
    }

    pub fn dependencies(&self) -> LoaderResult<Arc<[Dependency]>> {
        self.resolver.record.dependencies()
    }

    pub fn property(&self, key: &str) -> LoaderResult<Option<String>> {
        self.resolver.record.property(key)
    }
}

impl std::fmt::Debug for ModuleHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("ModuleHandle").field(self.identity()).finish()
    }
}
