//! Rich diagnostic error types for the modlink runtime.
//!
//! Each subsystem defines its own error type with miette `#[diagnostic]` derives,
//! providing error codes, help text, and source chains so operators know exactly
//! which module, root or policy rule was involved.

use std::fmt;
use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

use crate::config::ConfigError;
use crate::identity::ModuleIdentity;

/// Top-level error type for the modlink runtime.
///
/// Each variant wraps a subsystem-specific error, preserving the full diagnostic
/// chain through to the operator.
#[derive(Debug, Error, Diagnostic)]
pub enum LoaderError {
    #[error(transparent)]
    #[diagnostic(transparent)]
    Identity(#[from] IdentityError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Module(#[from] ModuleError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Access(#[from] AccessError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Resolve(#[from] ResolveError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Context(#[from] ContextError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Config(#[from] ConfigError),
}

impl LoaderError {
    /// Whether this error is a policy denial.
    pub fn is_access_denied(&self) -> bool {
        matches!(self, Self::Access(AccessError::Denied { .. }))
    }

    /// Whether this error means "nothing supplied the symbol".
    pub fn is_symbol_not_found(&self) -> bool {
        matches!(self, Self::Resolve(ResolveError::SymbolNotFound { .. }))
    }
}

// ---------------------------------------------------------------------------
// Identity errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum IdentityError {
    #[error("malformed module identity \"{input}\": {reason}")]
    #[diagnostic(
        code(modlink::identity::malformed),
        help(
            "Module identities look like `name`, `name-v1`, `name-v1.2` or \
             `name-snapshot`. The name part must not be empty."
        )
    )]
    Malformed { input: String, reason: &'static str },
}

// ---------------------------------------------------------------------------
// Module errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum ModuleError {
    #[error("module {identity} not found: missing {}", .missing.display())]
    #[diagnostic(
        code(modlink::module::not_found),
        help(
            "No search root contains an artifact for this module. \
             Roots tried, in priority order: {roots}"
        )
    )]
    NotFound {
        identity: ModuleIdentity,
        missing: PathBuf,
        roots: SearchRoots,
    },

    #[error("module {identity} not found: no search roots configured")]
    #[diagnostic(
        code(modlink::module::no_roots),
        help(
            "Configure at least one module root with `--root`, `MODLINK_PATH` \
             or `search_roots` in the config file."
        )
    )]
    NoSearchRoots { identity: ModuleIdentity },

    #[error("failed to load module {identity}: {message}")]
    #[diagnostic(
        code(modlink::module::load),
        help(
            "The module directory exists but one of its files could not be \
             interpreted. Check the declaration, properties and artifact files."
        )
    )]
    Load {
        identity: ModuleIdentity,
        message: String,
    },

    #[error("I/O error while loading module {identity} from {}", .path.display())]
    #[diagnostic(
        code(modlink::module::io),
        help(
            "A filesystem operation failed while reading module files. \
             Check that the path exists and has correct permissions."
        )
    )]
    Io {
        identity: ModuleIdentity,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

// ---------------------------------------------------------------------------
// Access errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum AccessError {
    #[error("access to module {module} denied for context \"{context}\" by rule {rule}")]
    #[diagnostic(
        code(modlink::access::denied),
        help(
            "The rule was registered at {origin}. Remove the deny rule, or \
             add an allow rule if the denial came from deny-all."
        )
    )]
    Denied {
        module: ModuleIdentity,
        context: String,
        rule: String,
        origin: String,
    },
}

// ---------------------------------------------------------------------------
// Resolution errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum ResolveError {
    #[error("symbol \"{symbol}\" not found from {requester}; searched {searched}")]
    #[diagnostic(code(modlink::resolve::symbol_not_found))]
    SymbolNotFound {
        symbol: String,
        requester: String,
        searched: IdentityList,
        #[help]
        advice: Option<String>,
    },
}

// ---------------------------------------------------------------------------
// Context errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum ContextError {
    #[error("context \"{parent}\" already has a child named \"{name}\"")]
    #[diagnostic(
        code(modlink::context::duplicate_child),
        help("Child names are unique per parent. Remove the existing child first.")
    )]
    DuplicateChild { parent: String, name: String },

    #[error("invalid context name \"{name}\"")]
    #[diagnostic(
        code(modlink::context::invalid_name),
        help("Context names must be non-empty and must not contain `/`.")
    )]
    InvalidName { name: String },

    #[error("context \"{parent}\" has no child named \"{name}\"")]
    #[diagnostic(code(modlink::context::unknown_child))]
    UnknownChild { parent: String, name: String },

    #[error("{what} has been released")]
    #[diagnostic(
        code(modlink::context::released),
        help(
            "The owning context was dropped or removed from the tree. \
             Keep a handle to the context for as long as its modules are in use."
        )
    )]
    Released { what: String },

    #[error("the runtime has already been bootstrapped in this process")]
    #[diagnostic(
        code(modlink::context::already_bootstrapped),
        help("Bootstrap runs exactly once. Use the runtime returned by the first call.")
    )]
    AlreadyBootstrapped,
}

// ---------------------------------------------------------------------------
// Display helpers for diagnostic fields
// ---------------------------------------------------------------------------

/// Search roots listed in a diagnostic.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SearchRoots(pub Vec<PathBuf>);

impl fmt::Display for SearchRoots {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, root) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", root.display())?;
        }
        Ok(())
    }
}

/// Module identities listed in a diagnostic, rendered as `{a-v1, b-snapshot}`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IdentityList(pub Vec<ModuleIdentity>);

impl IdentityList {
    pub fn contains(&self, identity: &ModuleIdentity) -> bool {
        self.0.contains(identity)
    }
}

impl fmt::Display for IdentityList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{")?;
        for (i, id) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{id}")?;
        }
        write!(f, "}}")
    }
}

/// Convenience alias for functions returning modlink results.
pub type LoaderResult<T> = std::result::Result<T, LoaderError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_error_converts_to_loader_error() {
        let err = IdentityError::Malformed {
            input: String::new(),
            reason: "empty reference",
        };
        let loader: LoaderError = err.into();
        assert!(matches!(
            loader,
            LoaderError::Identity(IdentityError::Malformed { .. })
        ));
    }

    #[test]
    fn access_denied_is_classified() {
        let err: LoaderError = AccessError::Denied {
            module: ModuleIdentity::new("core", Some("1"), None),
            context: "plugins".into(),
            rule: "deny module core-v1".into(),
            origin: "src/main.rs:1:1".into(),
        }
        .into();
        assert!(err.is_access_denied());
        assert!(!err.is_symbol_not_found());
    }

    #[test]
    fn identity_list_display() {
        let list = IdentityList(vec![
            ModuleIdentity::new("plugin", Some("1"), None),
            ModuleIdentity::new("core", None, None),
        ]);
        assert_eq!(list.to_string(), "{plugin-v1, core-snapshot}");
    }

    #[test]
    fn not_found_message_names_missing_artifact() {
        let err = ModuleError::NotFound {
            identity: ModuleIdentity::new("core", Some("1"), None),
            missing: PathBuf::from("/mods/core-v1/core.tar"),
            roots: SearchRoots(vec![PathBuf::from("/mods"), PathBuf::from("/more")]),
        };
        let msg = err.to_string();
        assert!(msg.contains("core-v1"));
        assert!(msg.contains("/mods/core-v1/core.tar"));
    }
}
