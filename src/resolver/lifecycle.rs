//! Module lifecycle extensions.
//!
//! A module may name, through a property, a symbol in its own artifact that
//! acts as its lifecycle extension. The host registers a factory for that
//! symbol in an [`ExtensionTable`]; the runtime instantiates it once when the
//! module is first activated and notifies it again when the module's last
//! dependent releases it.

use std::collections::HashMap;
use std::sync::Arc;

use super::ModuleHandle;

/// Error returned by lifecycle callbacks.
pub type LifecycleError = Box<dyn std::error::Error + Send + Sync>;

/// Callbacks a module receives over its life in a context.
pub trait ModuleLifecycle: Send + Sync {
    /// Called once, after the module's first activation.
    fn loaded(&self, _handle: &ModuleHandle) -> Result<(), LifecycleError> {
        Ok(())
    }

    /// Called once, when the module is no longer referenced.
    ///
    /// Errors and panics are logged and otherwise ignored.
    fn unloaded(&self) -> Result<(), LifecycleError> {
        Ok(())
    }
}

type Factory = Arc<dyn Fn() -> Arc<dyn ModuleLifecycle> + Send + Sync>;

/// Symbol name → lifecycle factory.
#[derive(Clone, Default)]
pub struct ExtensionTable {
    factories: HashMap<String, Factory>,
}

impl ExtensionTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `factory` for the lifecycle symbol `symbol`.
    pub fn register<F>(&mut self, symbol: impl Into<String>, factory: F) -> &mut Self
    where
        F: Fn() -> Arc<dyn ModuleLifecycle> + Send + Sync + 'static,
    {
        self.factories.insert(symbol.into(), Arc::new(factory));
        self
    }

    /// Register a lifecycle type constructed with [`Default`].
    pub fn register_default<L>(&mut self, symbol: impl Into<String>) -> &mut Self
    where
        L: ModuleLifecycle + Default + 'static,
    {
        self.register(symbol, || Arc::new(L::default()) as Arc<dyn ModuleLifecycle>)
    }

    pub fn contains(&self, symbol: &str) -> bool {
        self.factories.contains_key(symbol)
    }

    /// A fresh extension instance for `symbol`, if a factory is registered.
    pub fn instantiate(&self, symbol: &str) -> Option<Arc<dyn ModuleLifecycle>> {
        self.factories.get(symbol).map(|factory| factory())
    }

    pub fn len(&self) -> usize {
        self.factories.len()
    }

    pub fn is_empty(&self) -> bool {
        self.factories.is_empty()
    }
}

impl std::fmt::Debug for ExtensionTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut symbols: Vec<&str> = self.factories.keys().map(String::as_str).collect();
        symbols.sort_unstable();
        f.debug_struct("ExtensionTable")
            .field("symbols", &symbols)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct Quiet;

    impl ModuleLifecycle for Quiet {}

    #[test]
    fn instantiates_registered_factories() {
        let built = Arc::new(AtomicUsize::new(0));
        let counter = built.clone();

        let mut table = ExtensionTable::new();
        table
            .register("org.demo.Hooks", move || {
                counter.fetch_add(1, Ordering::SeqCst);
                Arc::new(Quiet) as Arc<dyn ModuleLifecycle>
            })
            .register_default::<Quiet>("org.demo.Quiet");

        assert!(table.contains("org.demo.Quiet"));
        assert_eq!(table.len(), 2);
        assert!(table.instantiate("org.demo.Hooks").is_some());
        assert!(table.instantiate("org.demo.Hooks").is_some());
        assert_eq!(built.load(Ordering::SeqCst), 2);
        assert!(table.instantiate("org.demo.Missing").is_none());
    }

    #[test]
    fn default_callbacks_succeed() {
        assert!(Quiet.unloaded().is_ok());
    }
}
