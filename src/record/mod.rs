//! On-disk module records.
//!
//! A [`ModuleRecord`] describes one module directory under one search root.
//! Its files are parsed lazily and at most once: the first successful read
//! is cached for the life of the record, and a failed read is retried on the
//! next call.

pub mod declaration;
pub mod properties;

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};

use crate::artifact::ArtifactIndex;
use crate::error::{LoaderResult, ModuleError};
use crate::identity::ModuleIdentity;
use crate::plugin::{self, PluginDeclaration};
use crate::provenance::Dependency;

use self::declaration::Declarations;
use self::properties::Properties;

pub const ARTIFACT_EXTENSION: &str = "tar";
pub const DECLARATION_EXTENSION: &str = "deps";
pub const PROPERTIES_EXTENSION: &str = "props";
pub const PLUGINS_DIR: &str = "plugins.d";

/// File paths of a module directory `{root}/{identity}/`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleLayout {
    pub directory: PathBuf,
    pub artifact: PathBuf,
    pub declarations: PathBuf,
    pub properties: PathBuf,
    pub plugins_dir: PathBuf,
}

impl ModuleLayout {
    pub fn new(root: &Path, identity: &ModuleIdentity) -> Self {
        let directory = root.join(identity.to_string());
        let file = |ext: &str| directory.join(format!("{}.{ext}", identity.name()));
        Self {
            artifact: file(ARTIFACT_EXTENSION),
            declarations: file(DECLARATION_EXTENSION),
            properties: file(PROPERTIES_EXTENSION),
            plugins_dir: directory.join(PLUGINS_DIR),
            directory,
        }
    }
}

/// Populate `cell` from `load` unless it already holds a value.
fn cached<T: Clone>(cell: &OnceLock<T>, load: impl FnOnce() -> LoaderResult<T>) -> LoaderResult<T> {
    if let Some(value) = cell.get() {
        return Ok(value.clone());
    }
    let value = load()?;
    Ok(cell.get_or_init(|| value).clone())
}

/// One module located under one search root.
pub struct ModuleRecord {
    origin: Dependency,
    root: PathBuf,
    layout: ModuleLayout,
    declarations: OnceLock<Declarations>,
    properties: OnceLock<Arc<Properties>>,
    artifact: OnceLock<Arc<ArtifactIndex>>,
    plugins: OnceLock<Arc<[PluginDeclaration]>>,
}

impl ModuleRecord {
    pub fn new(origin: Dependency, root: &Path) -> Self {
        let layout = ModuleLayout::new(root, origin.identity());
        Self {
            origin,
            root: root.to_path_buf(),
            layout,
            declarations: OnceLock::new(),
            properties: OnceLock::new(),
            artifact: OnceLock::new(),
            plugins: OnceLock::new(),
        }
    }

    pub fn identity(&self) -> &ModuleIdentity {
        self.origin.identity()
    }

    /// The dependency this record was first located for. Later requesters
    /// share the record, so this chain only describes the first lookup.
    pub fn origin(&self) -> &Dependency {
        &self.origin
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn layout(&self) -> &ModuleLayout {
        &self.layout
    }

    /// Whether the module's artifact exists under this root.
    pub fn exists(&self) -> bool {
        self.layout.artifact.is_file()
    }

    fn io_error(&self, path: &Path, source: std::io::Error) -> ModuleError {
        ModuleError::Io {
            identity: self.identity().clone(),
            path: path.to_path_buf(),
            source,
        }
    }

    /// Parsed declaration file. An absent file declares nothing.
    pub fn declarations(&self) -> LoaderResult<Declarations> {
        cached(&self.declarations, || self.read_declarations())
    }

    /// Declared one-level dependencies, in declaration order.
    pub fn dependencies(&self) -> LoaderResult<Arc<[Dependency]>> {
        Ok(self.declarations()?.dependencies)
    }

    /// Minor version the module declares for itself, if any.
    pub fn declared_minor(&self) -> LoaderResult<Option<String>> {
        let declarations = self.declarations()?;
        Ok(declarations
            .own
            .filter(|own| own == self.identity())
            .and_then(|own| own.minor().map(str::to_string)))
    }

    fn read_declarations(&self) -> LoaderResult<Declarations> {
        let path = &self.layout.declarations;
        let text = match std::fs::read_to_string(path) {
            Ok(text) => text,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                tracing::warn!(
                    module = %self.identity(),
                    path = %path.display(),
                    "module has no declaration file, assuming no dependencies"
                );
                return Ok(Declarations::default());
            }
            Err(e) => return Err(self.io_error(path, e).into()),
        };

        // The record is shared by every requester, so declared dependencies
        // are rooted at this module rather than at whoever located it first.
        let requester = Dependency::primary(self.identity().clone());
        let declarations =
            declaration::parse(&text, &requester).map_err(|e| ModuleError::Load {
                identity: self.identity().clone(),
                message: format!("{}: {e}", path.display()),
            })?;

        if let Some(own) = &declarations.own {
            if own != self.identity() {
                tracing::warn!(
                    module = %self.identity(),
                    declared = %own,
                    "declaration file names a different module; using the directory name"
                );
            }
        }

        tracing::debug!(
            module = %self.identity(),
            dependencies = declarations.dependencies.len(),
            "parsed declarations"
        );
        Ok(declarations)
    }

    /// Module properties. An absent file yields no properties.
    pub fn properties(&self) -> LoaderResult<Arc<Properties>> {
        cached(&self.properties, || {
            let path = &self.layout.properties;
            match std::fs::read_to_string(path) {
                Ok(text) => Ok(Arc::new(Properties::parse(&text))),
                Err(e) if e.kind() == ErrorKind::NotFound => Ok(Arc::default()),
                Err(e) => Err(self.io_error(path, e).into()),
            }
        })
    }

    pub fn property(&self, key: &str) -> LoaderResult<Option<String>> {
        Ok(self.properties()?.get(key).map(str::to_string))
    }

    /// Symbol index of the packaged artifact.
    pub fn artifact(&self) -> LoaderResult<Arc<ArtifactIndex>> {
        cached(&self.artifact, || {
            let path = &self.layout.artifact;
            let index = ArtifactIndex::open(path).map_err(|e| ModuleError::Load {
                identity: self.identity().clone(),
                message: format!("cannot read artifact {}: {e}", path.display()),
            })?;
            tracing::debug!(module = %self.identity(), symbols = index.len(), "indexed artifact");
            Ok(Arc::new(index))
        })
    }

    /// Plugin bindings declared under `plugins.d`.
    pub fn plugins(&self) -> LoaderResult<Arc<[PluginDeclaration]>> {
        cached(&self.plugins, || {
            Ok(plugin::read_dir(&self.layout.plugins_dir, self.identity())?.into())
        })
    }
}

impl std::fmt::Debug for ModuleRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModuleRecord")
            .field("identity", self.identity())
            .field("directory", &self.layout.directory)
            .field("artifact_loaded", &self.artifact.get().is_some())
            .finish()
    }
}
