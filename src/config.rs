//! Runtime configuration.
//!
//! [`RuntimeConfig`] is assembled once at startup from, in increasing
//! priority: built-in defaults, a TOML file, `MODLINK_*` environment
//! variables and command-line flags. The runtime itself never reads the
//! environment; it only sees the finished config.

use std::path::{Path, PathBuf};
use std::str::FromStr;

use miette::Diagnostic;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::identity::ModuleIdentity;

/// Environment variable naming the root module.
pub const ENV_MODULE: &str = "MODLINK_MODULE";
/// Environment variable naming the entry symbol.
pub const ENV_ENTRY: &str = "MODLINK_ENTRY";
/// Environment variable listing module roots (platform path-list syntax).
pub const ENV_PATH: &str = "MODLINK_PATH";
/// Environment variable selecting the fall-open mode.
pub const ENV_FALL_OPEN: &str = "MODLINK_FALL_OPEN";
/// Environment variable toggling root dependency preloading.
pub const ENV_PRELOAD: &str = "MODLINK_PRELOAD";

/// Errors from configuration loading.
#[derive(Debug, Error, Diagnostic)]
pub enum ConfigError {
    #[error("failed to read config file: {path}")]
    #[diagnostic(
        code(modlink::config::read),
        help("Ensure the config file exists and is readable.")
    )]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file: {path}: {message}")]
    #[diagnostic(
        code(modlink::config::parse),
        help("Check the TOML syntax and field names in the config file.")
    )]
    Parse { path: String, message: String },

    #[error("required setting `{field}` is not configured")]
    #[diagnostic(
        code(modlink::config::missing),
        help("Set it in the config file, via {env}, or on the command line.")
    )]
    Missing {
        field: &'static str,
        env: &'static str,
    },

    #[error("invalid value \"{value}\" for `{field}`")]
    #[diagnostic(code(modlink::config::invalid_value), help("{expected}"))]
    InvalidValue {
        field: &'static str,
        value: String,
        expected: &'static str,
    },
}

pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

/// What to do when normal resolution finds nothing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FallOpenMode {
    /// Fail with `SymbolNotFound`.
    #[default]
    Disabled,
    /// Search the whole module graph, but only to suggest a declaration fix.
    Diagnose,
    /// Search the whole module graph and use what it finds.
    ///
    /// The search is unbounded: on a large graph it reads every reachable
    /// module's artifact.
    Enabled,
}

impl FromStr for FallOpenMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "disabled" | "off" | "false" | "0" => Ok(Self::Disabled),
            "diagnose" | "warn" => Ok(Self::Diagnose),
            "enabled" | "on" | "true" | "1" => Ok(Self::Enabled),
            _ => Err(ConfigError::InvalidValue {
                field: "fall_open",
                value: s.to_string(),
                expected: "one of: disabled, diagnose, enabled",
            }),
        }
    }
}

impl std::fmt::Display for FallOpenMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Disabled => write!(f, "disabled"),
            Self::Diagnose => write!(f, "diagnose"),
            Self::Enabled => write!(f, "enabled"),
        }
    }
}

fn parse_bool(field: &'static str, value: &str) -> ConfigResult<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidValue {
            field,
            value: value.to_string(),
            expected: "a boolean: true or false",
        }),
    }
}

/// Process-wide runtime configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Identity reference of the root module (e.g. `app-v1`).
    pub root_module: Option<String>,
    /// Symbol resolved by [`crate::bootstrap::Runtime::entry_point`].
    pub entry_symbol: Option<String>,
    /// Module roots in priority order.
    pub search_roots: Vec<PathBuf>,
    pub fall_open: FallOpenMode,
    /// Register the root module's declared dependencies at boot.
    pub preload_root_dependencies: bool,
    /// Property naming a module's lifecycle extension symbol.
    pub lifecycle_property: String,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            root_module: None,
            entry_symbol: None,
            search_roots: Vec::new(),
            fall_open: FallOpenMode::Disabled,
            preload_root_dependencies: true,
            lifecycle_property: "module.lifecycle".into(),
        }
    }
}

impl RuntimeConfig {
    /// Load from a TOML file.
    pub fn load(path: &Path) -> ConfigResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: path.display().to_string(),
            source: e,
        })?;
        Self::parse_toml(&content, &path.display().to_string())
    }

    pub fn from_toml_str(content: &str) -> ConfigResult<Self> {
        Self::parse_toml(content, "<inline>")
    }

    fn parse_toml(content: &str, path: &str) -> ConfigResult<Self> {
        toml::from_str(content).map_err(|e| ConfigError::Parse {
            path: path.to_string(),
            message: e.to_string(),
        })
    }

    /// Overlay `MODLINK_*` variables from the process environment.
    pub fn with_env(self) -> ConfigResult<Self> {
        self.apply_env(|key| std::env::var_os(key))
    }

    /// Overlay `MODLINK_*` variables obtained from `lookup`.
    pub fn apply_env<F>(mut self, lookup: F) -> ConfigResult<Self>
    where
        F: Fn(&str) -> Option<std::ffi::OsString>,
    {
        let text = |key: &str| lookup(key).map(|v| v.to_string_lossy().into_owned());

        if let Some(module) = text(ENV_MODULE) {
            self.root_module = Some(module);
        }
        if let Some(entry) = text(ENV_ENTRY) {
            self.entry_symbol = Some(entry);
        }
        if let Some(paths) = lookup(ENV_PATH) {
            self.search_roots = std::env::split_paths(&paths)
                .filter(|p| !p.as_os_str().is_empty())
                .collect();
        }
        if let Some(mode) = text(ENV_FALL_OPEN) {
            self.fall_open = mode.parse()?;
        }
        if let Some(preload) = text(ENV_PRELOAD) {
            self.preload_root_dependencies = parse_bool("preload_root_dependencies", &preload)?;
        }
        Ok(self)
    }

    /// The configured root module, parsed.
    pub fn root_identity(&self) -> crate::error::LoaderResult<ModuleIdentity> {
        let reference = self
            .root_module
            .as_deref()
            .filter(|r| !r.trim().is_empty())
            .ok_or(ConfigError::Missing {
                field: "root_module",
                env: ENV_MODULE,
            })?;
        Ok(ModuleIdentity::parse(reference)?)
    }

    /// The configured entry symbol.
    pub fn entry(&self) -> ConfigResult<&str> {
        self.entry_symbol
            .as_deref()
            .filter(|s| !s.trim().is_empty())
            .ok_or(ConfigError::Missing {
                field: "entry_symbol",
                env: ENV_ENTRY,
            })
    }
}
