//! Fixture builders for on-disk module layouts used by unit tests.

use std::fs::File;
use std::path::{Path, PathBuf};

use crate::identity::ModuleIdentity;

/// Writes one `{root}/{identity}/` module directory.
pub(crate) struct ModuleBuilder {
    identity: ModuleIdentity,
    dir: PathBuf,
    symbols: Vec<(String, String)>,
    declarations: Option<String>,
    properties: Vec<(String, String)>,
    plugins: Vec<(String, String)>,
}

impl ModuleBuilder {
    pub(crate) fn new(root: &Path, reference: &str) -> Self {
        let identity = ModuleIdentity::parse(reference).unwrap();
        Self {
            dir: root.join(identity.to_string()),
            identity,
            symbols: Vec::new(),
            declarations: None,
            properties: Vec::new(),
            plugins: Vec::new(),
        }
    }

    /// Add a symbol, stored as `org/x/Name.class`.
    pub(crate) fn symbol(mut self, symbol: &str, body: &str) -> Self {
        self.symbols.push((symbol.to_string(), body.to_string()));
        self
    }

    /// Raw declaration file contents.
    pub(crate) fn declares(mut self, text: &str) -> Self {
        self.declarations = Some(text.to_string());
        self
    }

    pub(crate) fn property(mut self, key: &str, value: &str) -> Self {
        self.properties.push((key.to_string(), value.to_string()));
        self
    }

    /// A `plugins.d/{provider}.plugin` file.
    pub(crate) fn plugin(mut self, provider: &str, text: &str) -> Self {
        self.plugins.push((provider.to_string(), text.to_string()));
        self
    }

    pub(crate) fn write(self) -> PathBuf {
        std::fs::create_dir_all(&self.dir).unwrap();
        let name = self.identity.name();

        let file = File::create(self.dir.join(format!("{name}.tar"))).unwrap();
        let mut builder = tar::Builder::new(file);
        for (symbol, body) in &self.symbols {
            let entry = format!("{}.class", symbol.replace('.', "/"));
            let mut header = tar::Header::new_gnu();
            header.set_size(body.len() as u64);
            header.set_mode(0o644);
            header.set_cksum();
            builder
                .append_data(&mut header, entry, body.as_bytes())
                .unwrap();
        }
        builder.finish().unwrap();

        if let Some(text) = &self.declarations {
            std::fs::write(self.dir.join(format!("{name}.deps")), text).unwrap();
        }
        if !self.properties.is_empty() {
            let text: String = self
                .properties
                .iter()
                .map(|(k, v)| format!("{k}={v}\n"))
                .collect();
            std::fs::write(self.dir.join(format!("{name}.props")), text).unwrap();
        }
        if !self.plugins.is_empty() {
            let plugins = self.dir.join("plugins.d");
            std::fs::create_dir_all(&plugins).unwrap();
            for (provider, text) in &self.plugins {
                std::fs::write(plugins.join(format!("{provider}.plugin")), text).unwrap();
            }
        }
        self.dir
    }
}
