//! Packaged module artifacts.
//!
//! A module's code ships as a tar archive (`{name}.tar`). Every regular file
//! entry is a symbol: the entry path minus its final extension, with `/`
//! mapped to `.` (`org/demo/Main.class` is `org.demo.Main`). The index is
//! read once and kept in memory; artifacts are never written by the runtime.

use std::collections::HashMap;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;
use std::sync::Arc;

use crate::identity::ModuleIdentity;

/// Map an archive entry path to its symbol name.
pub fn symbol_for_entry(path: &str) -> Option<String> {
    let path = path.trim_start_matches("./").trim_matches('/');
    if path.is_empty() {
        return None;
    }
    let (dir, file) = match path.rsplit_once('/') {
        Some((dir, file)) => (Some(dir), file),
        None => (None, path),
    };
    let stem = match file.rfind('.') {
        Some(at) if at > 0 => &file[..at],
        _ => file,
    };
    let symbol = match dir {
        Some(dir) => format!("{}.{stem}", dir.replace('/', ".")),
        None => stem.to_string(),
    };
    Some(symbol)
}

/// In-memory index of an artifact's symbols.
#[derive(Debug, Default)]
pub struct ArtifactIndex {
    entries: HashMap<String, Arc<[u8]>>,
}

impl ArtifactIndex {
    /// Read every regular file entry of the archive at `path`.
    pub fn open(path: &Path) -> std::io::Result<Self> {
        let file = File::open(path)?;
        let mut archive = tar::Archive::new(BufReader::new(file));
        let mut entries = HashMap::new();

        for entry in archive.entries()? {
            let mut entry = entry?;
            if !entry.header().entry_type().is_file() {
                continue;
            }
            let entry_path = entry.path()?.to_string_lossy().into_owned();
            let Some(symbol) = symbol_for_entry(&entry_path) else {
                continue;
            };
            let mut bytes = Vec::with_capacity(entry.size() as usize);
            entry.read_to_end(&mut bytes)?;
            entries.insert(symbol, Arc::from(bytes));
        }

        Ok(Self { entries })
    }

    pub fn get(&self, symbol: &str) -> Option<Arc<[u8]>> {
        self.entries.get(symbol).cloned()
    }

    pub fn contains(&self, symbol: &str) -> bool {
        self.entries.contains_key(symbol)
    }

    /// Symbol names in sorted order.
    pub fn symbols(&self) -> Vec<&str> {
        let mut symbols: Vec<&str> = self.entries.keys().map(String::as_str).collect();
        symbols.sort_unstable();
        symbols
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// A resolved symbol: its bytes plus the module that supplied them.
///
/// An artifact reached through a direct reference carries the requested
/// address as an alias, so [`Artifact::qualified_name`] matches what the
/// caller asked for while [`Artifact::symbol`] keeps the canonical name.
#[derive(Debug, Clone)]
pub struct Artifact {
    symbol: String,
    module: ModuleIdentity,
    bytes: Arc<[u8]>,
    alias: Option<String>,
}

impl Artifact {
    pub fn new(symbol: impl Into<String>, module: ModuleIdentity, bytes: Arc<[u8]>) -> Self {
        Self {
            symbol: symbol.into(),
            module,
            bytes,
            alias: None,
        }
    }

    /// The same artifact, externally named `alias`.
    pub fn aliased(mut self, alias: impl Into<String>) -> Self {
        self.alias = Some(alias.into());
        self
    }

    /// Canonical symbol name inside the supplying module.
    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    /// Externally visible name: the alias if any, otherwise the symbol.
    pub fn qualified_name(&self) -> &str {
        self.alias.as_deref().unwrap_or(&self.symbol)
    }

    pub fn is_aliased(&self) -> bool {
        self.alias.is_some()
    }

    pub fn module(&self) -> &ModuleIdentity {
        &self.module
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Contents as UTF-8, if they are valid UTF-8.
    pub fn text(&self) -> Option<&str> {
        std::str::from_utf8(&self.bytes).ok()
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

impl std::fmt::Display for Artifact {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} from {} ({} bytes)",
            self.qualified_name(),
            self.module,
            self.bytes.len()
        )
    }
}
