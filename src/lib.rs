// thiserror's #[error("...{field}...")] format strings reference struct fields,
// but the compiler doesn't see through the derive macro and reports false positives.
#![allow(unused_assignments)]

//! # modlink
//!
//! A private, versioned module-loading runtime. Modules are named, versioned
//! artifacts on the local filesystem; contexts form a tree of isolation
//! domains that hold modules and decide which of their descendants may use
//! them.
//!
//! ## Architecture
//!
//! - **Versions** (`version`, `identity`): total ordering over free-form
//!   version strings and the `{name, major}` identity that addresses a module
//! - **Records** (`record`, `artifact`, `plugin`): lazily parsed module
//!   files under prioritized search roots
//! - **Resolution** (`registry`, `resolver`): per-context resolvers that look
//!   a symbol up locally, then in declared dependencies, then top-first
//!   through the context tree
//! - **Isolation** (`context`): the context tree, copy-on-write access
//!   policies and the direct-reference alias table
//! - **Lifecycle** (`resolver::lifecycle`, `bootstrap`): reference-counted
//!   load and unload notifications, and one-shot runtime bootstrap
//!
//! ## Library usage
//!
//! ```no_run
//! use modlink::bootstrap::Runtime;
//! use modlink::config::RuntimeConfig;
//! use modlink::resolver::lifecycle::ExtensionTable;
//!
//! let config = RuntimeConfig {
//!     root_module: Some("app-v1".into()),
//!     entry_symbol: Some("org.app.Main".into()),
//!     search_roots: vec!["/opt/modules".into()],
//!     ..Default::default()
//! };
//! let runtime = Runtime::boot(config, ExtensionTable::new()).unwrap();
//! let main = runtime.entry_point().unwrap();
//! println!("{main}");
//! runtime.shutdown();
//! ```

pub mod artifact;
pub mod bootstrap;
pub mod config;
pub mod context;
pub mod error;
pub mod identity;
pub mod paths;
pub mod plugin;
pub mod provenance;
pub mod record;
pub mod registry;
pub mod resolver;
pub mod version;

#[cfg(test)]
pub(crate) mod testutil;
