//! Repository configuration.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use crate::error::{Error, Result};

/// How a repository expects file objects to be checked out.
///
/// The mode is recorded at creation and reported back; the object format is
/// the same in every mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RepoMode {
    #[default]
    Bare,
    BareUser,
    Archive,
}

impl RepoMode {
    pub fn as_str(self) -> &'static str {
        match self {
            RepoMode::Bare => "bare",
            RepoMode::BareUser => "bare-user",
            RepoMode::Archive => "archive",
        }
    }
}

impl FromStr for RepoMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "bare" => Ok(RepoMode::Bare),
            "bare-user" => Ok(RepoMode::BareUser),
            "archive" | "archive-z2" => Ok(RepoMode::Archive),
            other => Err(Error::Config(format!("unknown repository mode '{}'", other))),
        }
    }
}

impl fmt::Display for RepoMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Options for opening or creating a repository.
#[derive(Debug, Clone)]
pub struct RepoConfig {
    /// Path to the repository directory.
    pub path: PathBuf,
    /// Create the repository if nothing exists at `path`.
    pub create_if_missing: bool,
    /// Parent repository consulted for refs and objects this one lacks.
    /// Recorded in the repository's config when it is created.
    pub parent: Option<PathBuf>,
    /// Mode for newly created repositories.
    pub mode: RepoMode,
}

impl Default for RepoConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("repo"),
            create_if_missing: false,
            parent: None,
            mode: RepoMode::default(),
        }
    }
}

impl RepoConfig {
    /// Create a new configuration with the given path.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            ..Default::default()
        }
    }

    /// Set create_if_missing flag.
    pub fn create_if_missing(mut self, value: bool) -> Self {
        self.create_if_missing = value;
        self
    }

    pub fn parent(mut self, path: impl Into<PathBuf>) -> Self {
        self.parent = Some(path.into());
        self
    }

    pub fn mode(mut self, mode: RepoMode) -> Self {
        self.mode = mode;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder() {
        let config = RepoConfig::new("/srv/repo")
            .create_if_missing(true)
            .parent("/srv/base")
            .mode(RepoMode::Archive);
        assert!(config.create_if_missing);
        assert_eq!(config.parent, Some(PathBuf::from("/srv/base")));
        assert_eq!(config.mode.to_string(), "archive");
    }

    #[test]
    fn test_mode_parsing() {
        assert_eq!("bare-user".parse::<RepoMode>().unwrap(), RepoMode::BareUser);
        assert_eq!("archive-z2".parse::<RepoMode>().unwrap(), RepoMode::Archive);
        assert!(matches!("zip".parse::<RepoMode>(), Err(Error::Config(_))));
    }
}
