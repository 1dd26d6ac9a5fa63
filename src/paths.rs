//! XDG-compliant path resolution for modlink.
//!
//! Provides `LoaderPaths`, the default locations of the config file and the
//! module root, following the XDG Base Directory Specification.

use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

/// Errors from path resolution.
#[derive(Debug, Error, Diagnostic)]
pub enum PathError {
    #[error("cannot determine home directory")]
    #[diagnostic(
        code(modlink::paths::no_home),
        help("Set the HOME environment variable, or pass `--config` and `--root` explicitly.")
    )]
    NoHome,
}

pub type PathResult<T> = std::result::Result<T, PathError>;

/// Global XDG-compliant directories for modlink.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoaderPaths {
    /// `$XDG_CONFIG_HOME/modlink/`
    pub config_dir: PathBuf,
    /// `$XDG_DATA_HOME/modlink/`
    pub data_dir: PathBuf,
}

impl LoaderPaths {
    /// Resolve XDG directories from the process environment.
    pub fn resolve() -> PathResult<Self> {
        Self::resolve_with(|key| std::env::var_os(key))
    }

    /// Resolve XDG directories from variables obtained through `lookup`.
    pub fn resolve_with<F>(lookup: F) -> PathResult<Self>
    where
        F: Fn(&str) -> Option<std::ffi::OsString>,
    {
        let dir = |key: &str| lookup(key).filter(|v| !v.is_empty()).map(PathBuf::from);
        let home = dir("HOME");

        let config_dir = dir("XDG_CONFIG_HOME")
            .or_else(|| home.as_ref().map(|h| h.join(".config")))
            .ok_or(PathError::NoHome)?
            .join("modlink");

        let data_dir = dir("XDG_DATA_HOME")
            .or_else(|| home.as_ref().map(|h| h.join(".local/share")))
            .ok_or(PathError::NoHome)?
            .join("modlink");

        Ok(Self {
            config_dir,
            data_dir,
        })
    }

    /// Path to the global config file.
    pub fn config_file(&self) -> PathBuf {
        self.config_dir.join("config.toml")
    }

    /// Default module root.
    pub fn modules_dir(&self) -> PathBuf {
        self.data_dir.join("modules")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::ffi::OsString;

    fn env(pairs: &'static [(&'static str, &'static str)]) -> impl Fn(&str) -> Option<OsString> {
        move |key: &str| {
            pairs
                .iter()
                .find(|(k, _)| *k == key)
                .map(|(_, v)| OsString::from(*v))
        }
    }

    #[test]
    fn home_fallbacks() {
        let paths = LoaderPaths::resolve_with(env(&[("HOME", "/home/u")])).unwrap();
        assert_eq!(paths.config_file(), PathBuf::from("/home/u/.config/modlink/config.toml"));
        assert_eq!(paths.modules_dir(), PathBuf::from("/home/u/.local/share/modlink/modules"));
    }

    #[test]
    fn xdg_overrides_home() {
        let paths = LoaderPaths::resolve_with(env(&[
            ("HOME", "/home/u"),
            ("XDG_CONFIG_HOME", "/cfg"),
            ("XDG_DATA_HOME", "/data"),
        ]))
        .unwrap();
        assert_eq!(paths.config_dir, PathBuf::from("/cfg/modlink"));
        assert_eq!(paths.data_dir, PathBuf::from("/data/modlink"));
    }

    #[test]
    fn xdg_without_home_is_enough() {
        let paths = LoaderPaths::resolve_with(env(&[
            ("XDG_CONFIG_HOME", "/cfg"),
            ("XDG_DATA_HOME", "/data"),
        ]))
        .unwrap();
        assert_eq!(paths.modules_dir(), PathBuf::from("/data/modlink/modules"));
    }

    #[test]
    fn no_home_is_an_error() {
        assert!(matches!(
            LoaderPaths::resolve_with(env(&[])),
            Err(PathError::NoHome)
        ));
    }
}
