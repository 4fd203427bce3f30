//! core type-safe wrappers around store primitives.

use std::fmt;
use std::str::FromStr;

use git2::Oid;

use crate::error::{Error, Result};

/// Content checksum of a stored object.
///
/// The inner Oid is only accessible within the crate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Checksum(pub(crate) Oid);

impl Checksum {
    /// length of the hex form
    pub const HEX_LEN: usize = 40;
    /// length of the raw form
    pub const RAW_LEN: usize = 20;

    pub(crate) fn new(oid: Oid) -> Self {
        Self(oid)
    }

    /// raw Oid (for internal use only)
    pub(crate) fn raw(&self) -> Oid {
        self.0
    }

    /// parse a full, lowercase hex checksum
    pub fn from_hex(hex: &str) -> Result<Self> {
        if !is_full_checksum(hex) {
            return Err(Error::InvalidChecksum(hex.to_string()));
        }
        Oid::from_str(hex)
            .map(Checksum)
            .map_err(|_| Error::InvalidChecksum(hex.to_string()))
    }

    /// parse the raw byte form used inside stored objects
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != Self::RAW_LEN {
            return Err(Error::InvalidChecksum(format!("{} raw bytes", bytes.len())));
        }
        Oid::from_bytes(bytes)
            .map(Checksum)
            .map_err(|e| Error::InvalidChecksum(e.message().to_string()))
    }

    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_bytes()
    }

    /// short form of the checksum
    pub fn short(&self) -> String {
        self.0.to_string()[..10].to_string()
    }
}

impl fmt::Display for Checksum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for Checksum {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::from_hex(s)
    }
}

pub(crate) fn is_full_checksum(text: &str) -> bool {
    text.len() == Checksum::HEX_LEN && is_lower_hex(text)
}

pub(crate) fn is_lower_hex(text: &str) -> bool {
    !text.is_empty() && text.bytes().all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
}

/// Kind of a stored object; decides how its bytes are read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ObjectType {
    File,
    DirTree,
    DirMeta,
    Commit,
    TombstoneCommit,
}

impl ObjectType {
    pub const ALL: [ObjectType; 5] = [
        ObjectType::File,
        ObjectType::DirTree,
        ObjectType::DirMeta,
        ObjectType::Commit,
        ObjectType::TombstoneCommit,
    ];

    /// tag written in front of the object's payload
    pub fn tag(self) -> &'static str {
        match self {
            ObjectType::File => "file",
            ObjectType::DirTree => "dirtree",
            ObjectType::DirMeta => "dirmeta",
            ObjectType::Commit => "commit",
            ObjectType::TombstoneCommit => "tombstone-commit",
        }
    }

    pub fn from_tag(tag: &[u8]) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.tag().as_bytes() == tag)
    }

    /// Everything except file content counts as metadata.
    pub fn is_meta(self) -> bool {
        !matches!(self, ObjectType::File)
    }

    /// variant type of the stored payload
    pub fn variant_type(self) -> &'static str {
        match self {
            ObjectType::File => "(uuuusa(ayay))",
            ObjectType::DirTree => "(a(say)a(sayay))",
            ObjectType::DirMeta => "(uuua(ayay))",
            ObjectType::Commit => "(a{sv}aya(say)sstayay)",
            ObjectType::TombstoneCommit => "a{sv}",
        }
    }
}

impl fmt::Display for ObjectType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

/// A validated ref name, optionally scoped to a remote.
///
/// Textual form is `name` for local refs and `remote:name` for remote ones.
/// Names are `/`-separated components of ASCII alphanumerics and `-._`; no
/// component may be empty or start with a dot.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RefSpec {
    remote: Option<String>,
    name: String,
}

impl RefSpec {
    pub fn new(remote: Option<&str>, name: &str) -> Result<Self> {
        let remote = match remote {
            Some("") | None => None,
            Some(remote) => {
                if remote.contains('/') {
                    return Err(Error::invalid_name(remote, "remote names cannot contain '/'"));
                }
                Self::validate(remote)?;
                Some(remote.to_string())
            }
        };
        Self::validate(name)?;
        Ok(Self {
            remote,
            name: name.to_string(),
        })
    }

    pub fn local(name: &str) -> Result<Self> {
        Self::new(None, name)
    }

    /// parse `name` or `remote:name`
    pub fn parse(refspec: &str) -> Result<Self> {
        match refspec.split_once(':') {
            Some((remote, name)) => {
                if remote.is_empty() {
                    return Err(Error::invalid_name(refspec, "empty remote"));
                }
                Self::new(Some(remote), name)
            }
            None => Self::new(None, refspec),
        }
    }

    fn validate(name: &str) -> Result<()> {
        if name.is_empty() {
            return Err(Error::invalid_name(name, "empty name"));
        }
        for component in name.split('/') {
            if component.is_empty() {
                return Err(Error::invalid_name(name, "empty path component"));
            }
            if component.starts_with('.') {
                return Err(Error::invalid_name(name, "component starts with '.'"));
            }
            if !component
                .bytes()
                .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'-' | b'_' | b'.'))
            {
                return Err(Error::invalid_name(name, "invalid character"));
            }
        }
        Ok(())
    }

    pub fn remote(&self) -> Option<&str> {
        self.remote.as_deref()
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// full path in the ref database
    pub fn ref_path(&self) -> String {
        match &self.remote {
            Some(remote) => format!("refs/remotes/{}/{}", remote, self.name),
            None => format!("refs/heads/{}", self.name),
        }
    }
}

impl fmt::Display for RefSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.remote {
            Some(remote) => write!(f, "{}:{}", remote, self.name),
            None => f.write_str(&self.name),
        }
    }
}
