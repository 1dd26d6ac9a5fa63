//! Runtime bootstrap.
//!
//! [`Runtime::boot`] turns a [`RuntimeConfig`] into a root context holding
//! the root module (and, by default, its declared dependencies).
//! [`bootstrap`] does the same for the process-wide runtime, exactly once.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};

use crate::artifact::Artifact;
use crate::config::RuntimeConfig;
use crate::context::Context;
use crate::error::{ContextError, LoaderResult};
use crate::resolver::ModuleHandle;
use crate::resolver::lifecycle::ExtensionTable;

/// Name of the root context.
pub const ROOT_CONTEXT: &str = "root";

/// A booted context tree and its root module.
pub struct Runtime {
    config: Arc<RuntimeConfig>,
    root: Arc<Context>,
    entry: ModuleHandle,
}

impl Runtime {
    /// Create the root context and register the root module.
    pub fn boot(config: RuntimeConfig, extensions: ExtensionTable) -> LoaderResult<Self> {
        let identity = config.root_identity()?;
        let config = Arc::new(config);

        tracing::info!(
            module = %identity,
            roots = config.search_roots.len(),
            fall_open = %config.fall_open,
            "booting runtime"
        );

        let root = Context::new_root(
            ROOT_CONTEXT,
            config.search_roots.clone(),
            config.clone(),
            Arc::new(extensions),
        );
        let entry = root.add_module(&identity)?;

        if config.preload_root_dependencies {
            for dependency in entry.dependencies()?.iter() {
                root.add_dependency(dependency)?;
            }
        }

        Ok(Self {
            config,
            root,
            entry,
        })
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    pub fn root(&self) -> &Arc<Context> {
        &self.root
    }

    /// Handle of the root module.
    pub fn entry_module(&self) -> &ModuleHandle {
        &self.entry
    }

    /// Resolve the configured entry symbol through the root module.
    pub fn entry_point(&self) -> LoaderResult<Artifact> {
        let symbol = self.config.entry()?;
        let artifact = self.entry.resolve(symbol)?;
        tracing::info!(symbol, module = %artifact.module(), "resolved entry point");
        Ok(artifact)
    }

    /// Release every module held in the tree.
    pub fn shutdown(&self) {
        tracing::info!("shutting down runtime");
        self.root.release_all();
    }
}

impl std::fmt::Debug for Runtime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Runtime")
            .field("root", &self.root)
            .field("entry", &self.entry)
            .finish()
    }
}

static BOOTSTRAPPED: AtomicBool = AtomicBool::new(false);
static RUNTIME: OnceLock<Runtime> = OnceLock::new();

/// Boot the process-wide runtime. Only the first call in a process may
/// proceed; later calls fail even if the first one failed.
pub fn bootstrap(config: RuntimeConfig, extensions: ExtensionTable) -> LoaderResult<&'static Runtime> {
    if BOOTSTRAPPED.swap(true, Ordering::AcqRel) {
        return Err(ContextError::AlreadyBootstrapped.into());
    }
    let runtime = Runtime::boot(config, extensions)?;
    Ok(RUNTIME.get_or_init(|| runtime))
}

/// The process-wide runtime, once [`bootstrap`] has succeeded.
pub fn runtime() -> Option<&'static Runtime> {
    RUNTIME.get()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FallOpenMode;
    use crate::identity::ModuleIdentity;
    use crate::testutil::ModuleBuilder;
    use tempfile::TempDir;

    fn config(tmp: &TempDir) -> RuntimeConfig {
        RuntimeConfig {
            root_module: Some("app-v1".into()),
            entry_symbol: Some("org.app.Main".into()),
            search_roots: vec![tmp.path().to_path_buf()],
            ..Default::default()
        }
    }

    fn fixture(tmp: &TempDir) {
        ModuleBuilder::new(tmp.path(), "app-v1")
            .symbol("org.app.Main", "main")
            .declares("app 1\ncore 1\n")
            .write();
        ModuleBuilder::new(tmp.path(), "core-v1")
            .symbol("org.core.Api", "api")
            .write();
    }

    #[test]
    fn boot_registers_root_and_dependencies() {
        let tmp = TempDir::new().unwrap();
        fixture(&tmp);

        let runtime = Runtime::boot(config(&tmp), ExtensionTable::new()).unwrap();
        let held: Vec<ModuleIdentity> = runtime
            .root()
            .modules()
            .iter()
            .map(|h| h.identity().clone())
            .collect();
        assert_eq!(held, vec![ModuleIdentity::parse("app-v1").unwrap(), ModuleIdentity::parse("core-v1").unwrap()]);
        assert_eq!(runtime.entry_point().unwrap().text(), Some("main"));
    }

    #[test]
    fn preload_can_be_disabled() {
        let tmp = TempDir::new().unwrap();
        fixture(&tmp);
        let cfg = RuntimeConfig {
            preload_root_dependencies: false,
            fall_open: FallOpenMode::Disabled,
            ..config(&tmp)
        };
        let runtime = Runtime::boot(cfg, ExtensionTable::new()).unwrap();
        assert_eq!(runtime.root().modules().len(), 1);
        // Declared dependencies still resolve on demand.
        assert!(runtime.entry_module().resolve("org.core.Api").is_ok());
    }

    #[test]
    fn boot_requires_root_module() {
        let tmp = TempDir::new().unwrap();
        let cfg = RuntimeConfig {
            root_module: None,
            ..config(&tmp)
        };
        let err = Runtime::boot(cfg, ExtensionTable::new()).unwrap_err();
        assert!(err.to_string().contains("root_module"));
    }

    #[test]
    fn entry_point_requires_symbol() {
        let tmp = TempDir::new().unwrap();
        fixture(&tmp);
        let cfg = RuntimeConfig {
            entry_symbol: None,
            ..config(&tmp)
        };
        let runtime = Runtime::boot(cfg, ExtensionTable::new()).unwrap();
        assert!(runtime.entry_point().is_err());
    }

    #[test]
    fn shutdown_releases_everything() {
        let tmp = TempDir::new().unwrap();
        fixture(&tmp);
        let runtime = Runtime::boot(config(&tmp), ExtensionTable::new()).unwrap();
        let entry = runtime.entry_module().clone();
        runtime.shutdown();
        assert!(entry.resolver().is_released());
        assert!(runtime.root().modules().is_empty());
    }

    #[test]
    fn global_bootstrap_runs_once() {
        let tmp = TempDir::new().unwrap();
        fixture(&tmp);
        let first = bootstrap(config(&tmp), ExtensionTable::new()).unwrap();
        assert!(std::ptr::eq(first, runtime().unwrap()));

        let err = bootstrap(config(&tmp), ExtensionTable::new()).unwrap_err();
        assert!(matches!(
            err,
            crate::error::LoaderError::Context(ContextError::AlreadyBootstrapped)
        ));
    }
}
