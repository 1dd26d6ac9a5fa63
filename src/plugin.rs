//! Plugin registrations (`plugins.d/*.plugin`).
//!
//! Each plugin file maps interface names to implementation names, one
//! `{interface}\t{implementation}` pair per line. The file stem is the
//! identity reference of the module that holds the implementations, so a
//! binding is loaded through a direct reference `{provider}:{implementation}`.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Serialize;

use crate::artifact::Artifact;
use crate::context::Context;
use crate::error::{LoaderResult, ModuleError};
use crate::identity::ModuleIdentity;

/// File extension of plugin registration files.
pub const PLUGIN_EXTENSION: &str = "plugin";

/// One interface → implementation binding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PluginDeclaration {
    pub interface: String,
    pub implementation: String,
    /// Module holding the implementation (the plugin file's stem).
    pub provider: ModuleIdentity,
    /// Module whose `plugins.d` declared the binding.
    pub declared_by: ModuleIdentity,
    /// The plugin file the binding came from.
    pub source: PathBuf,
}

impl PluginDeclaration {
    /// Direct-reference address of the implementation.
    pub fn reference(&self) -> String {
        format!("{}:{}", self.provider, self.implementation)
    }

    /// Resolve the implementation through `context`, subject to its access policy.
    pub fn load(&self, context: &Arc<Context>) -> LoaderResult<Artifact> {
        context.resolve(&self.reference())
    }
}

/// Parse one plugin file's contents. Malformed lines are skipped with a warning.
pub fn parse(
    text: &str,
    provider: &ModuleIdentity,
    declared_by: &ModuleIdentity,
    source: &Path,
) -> Vec<PluginDeclaration> {
    let mut declarations = Vec::new();
    for (number, line) in text.lines().enumerate() {
        let line = line.trim_end_matches('\r');
        if line.trim().is_empty() || line.trim_start().starts_with('#') {
            continue;
        }
        match line.split_once('\t') {
            Some((interface, implementation))
                if !interface.trim().is_empty() && !implementation.trim().is_empty() =>
            {
                declarations.push(PluginDeclaration {
                    interface: interface.trim().to_string(),
                    implementation: implementation.trim().to_string(),
                    provider: provider.clone(),
                    declared_by: declared_by.clone(),
                    source: source.to_path_buf(),
                });
            }
            _ => {
                tracing::warn!(
                    file = %source.display(),
                    line = number + 1,
                    "plugin line is not `interface<TAB>implementation`, skipping"
                );
            }
        }
    }
    declarations
}

/// Read every `*.plugin` file in `dir`, in file-name order.
///
/// A missing directory yields no declarations.
pub fn read_dir(dir: &Path, declared_by: &ModuleIdentity) -> LoaderResult<Vec<PluginDeclaration>> {
    if !dir.is_dir() {
        return Ok(Vec::new());
    }

    let io_error = |path: &Path, source: std::io::Error| ModuleError::Io {
        identity: declared_by.clone(),
        path: path.to_path_buf(),
        source,
    };

    let mut files: Vec<PathBuf> = std::fs::read_dir(dir)
        .map_err(|e| io_error(dir, e))?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| {
            path.is_file() && path.extension().and_then(|e| e.to_str()) == Some(PLUGIN_EXTENSION)
        })
        .collect();
    files.sort();

    let mut declarations = Vec::new();
    for path in files {
        let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
            continue;
        };
        let provider = ModuleIdentity::parse(stem)?;
        let text = std::fs::read_to_string(&path).map_err(|e| io_error(&path, e))?;
        declarations.extend(parse(&text, &provider, declared_by, &path));
    }
    Ok(declarations)
}
