//! Content-addressed object store on top of a git object database.
//!
//! Every object is a git blob holding `<type tag> NUL <payload>`, so the
//! checksum of an object is the blob's id and two objects of different types
//! can never share a checksum. The store knows nothing about trees, commits
//! or refs beyond that framing.

use std::fmt;
use std::path::{Path, PathBuf};

use bytes::Bytes;
use git2::{ErrorCode, Oid, Repository};
use tracing::debug;

use crate::error::{Error, Result};
use crate::storage::types::{Checksum, ObjectType};

/// config key holding the repository mode; its presence marks a repository
pub const CONFIG_MODE: &str = "treerepo.mode";
/// config key holding the parent repository path
pub const CONFIG_PARENT: &str = "treerepo.parent";

/// Result of writing one object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriteOutcome {
    pub checksum: Checksum,
    pub kind: ObjectType,
    /// false if an identical object was already stored
    pub written: bool,
    pub size: usize,
}

/// Wrapper around the git repository holding the objects.
pub struct ObjectStore {
    repo: Repository,
    path: PathBuf,
}

impl fmt::Debug for ObjectStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObjectStore").field("path", &self.path).finish()
    }
}

impl ObjectStore {
    /// Create a new bare store at `path`.
    pub fn init(path: &Path, mode: &str) -> Result<Self> {
        let repo = Repository::init_bare(path)?;
        repo.config()?.set_str(CONFIG_MODE, mode)?;
        debug!(path = %path.display(), mode, "initialized object store");
        Ok(Self {
            repo,
            path: path.to_path_buf(),
        })
    }

    /// Open an existing store. Fails with `NotARepository` if `path` is not a
    /// git repository or was not initialized by this layer.
    pub fn open(path: &Path) -> Result<Self> {
        let repo = Repository::open_bare(path).map_err(|_| Error::NotARepository(path.to_path_buf()))?;
        let store = Self {
            repo,
            path: path.to_path_buf(),
        };
        if store.config_string(CONFIG_MODE)?.is_none() {
            return Err(Error::NotARepository(path.to_path_buf()));
        }
        Ok(store)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// directory holding the git database itself
    pub fn git_dir(&self) -> &Path {
        self.repo.path()
    }

    pub(crate) fn repo(&self) -> &Repository {
        &self.repo
    }

    // ==================== Config ====================

    pub fn config_string(&self, key: &str) -> Result<Option<String>> {
        match self.repo.config()?.get_string(key) {
            Ok(value) => Ok(Some(value)),
            Err(e) if e.code() == ErrorCode::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    pub fn set_config_string(&self, key: &str, value: &str) -> Result<()> {
        self.repo.config()?.set_str(key, value)?;
        Ok(())
    }

    // ==================== Objects ====================

    fn frame(kind: ObjectType, payload: &[u8]) -> Vec<u8> {
        let tag = kind.tag().as_bytes();
        let mut framed = Vec::with_capacity(tag.len() + 1 + payload.len());
        framed.extend_from_slice(tag);
        framed.push(0);
        framed.extend_from_slice(payload);
        framed
    }

    /// checksum `payload` would get as an object of type `kind`
    pub fn checksum_of(kind: ObjectType, payload: &[u8]) -> Result<Checksum> {
        let framed = Self::frame(kind, payload);
        Ok(Checksum::new(Oid::hash_object(git2::ObjectType::Blob, &framed)?))
    }

    pub fn exists(&self, checksum: &Checksum) -> Result<bool> {
        Ok(self.repo.odb()?.exists(checksum.raw()))
    }

    /// Store `payload` as an object of type `kind`.
    ///
    /// Identical objects are stored once; the outcome says whether this call
    /// actually added the object.
    pub fn write(&self, kind: ObjectType, payload: &[u8]) -> Result<WriteOutcome> {
        let framed = Self::frame(kind, payload);
        let expected = Oid::hash_object(git2::ObjectType::Blob, &framed)?;
        let odb = self.repo.odb()?;

        let written = if odb.exists(expected) {
            false
        } else {
            let oid = self.repo.blob(&framed)?;
            debug_assert_eq!(oid, expected);
            true
        };

        let checksum = Checksum::new(expected);
        debug!(%checksum, kind = %kind, written, size = payload.len(), "write object");
        Ok(WriteOutcome {
            checksum,
            kind,
            written,
            size: payload.len(),
        })
    }

    /// type of a stored object
    pub fn object_type(&self, checksum: &Checksum) -> Result<ObjectType> {
        self.read_raw(checksum).map(|(kind, _)| kind)
    }

    /// Read the payload of an object, which must be of type `kind`.
    pub fn read(&self, kind: ObjectType, checksum: &Checksum) -> Result<Bytes> {
        let (found, payload) = self.read_raw(checksum)?;
        if found != kind {
            return Err(Error::TypeMismatch {
                checksum: checksum.to_string(),
                expected: kind,
                found,
            });
        }
        Ok(payload)
    }

    fn read_raw(&self, checksum: &Checksum) -> Result<(ObjectType, Bytes)> {
        let blob = self.repo.find_blob(checksum.raw()).map_err(|e| match e.code() {
            ErrorCode::NotFound => Error::NotFound(format!("object {}", checksum)),
            _ => Error::from(e),
        })?;
        let content = blob.content();
        let corrupted = |reason: &str| Error::Corrupted {
            checksum: checksum.to_string(),
            reason: reason.to_string(),
        };

        let nul = content
            .iter()
            .position(|&b| b == 0)
            .ok_or_else(|| corrupted("missing type tag"))?;
        let kind = ObjectType::from_tag(&content[..nul]).ok_or_else(|| corrupted("unknown type tag"))?;
        Ok((kind, Bytes::copy_from_slice(&content[nul + 1..])))
    }

    /// All objects of type `kind` whose checksum starts with `prefix`.
    ///
    /// Objects of other types sharing the prefix are skipped.
    pub fn find_by_prefix(&self, prefix: &str, kind: ObjectType) -> Result<Vec<Checksum>> {
        if prefix.len() > Checksum::HEX_LEN || !prefix.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(Error::InvalidChecksum(prefix.to_string()));
        }
        let prefix = prefix.to_ascii_lowercase();

        let mut candidates = Vec::new();
        self.repo.odb()?.foreach(|oid| {
            if oid.to_string().starts_with(&prefix) {
                candidates.push(Checksum::new(*oid));
            }
            true
        })?;

        let mut matches = Vec::new();
        for checksum in candidates {
            match self.read_raw(&checksum) {
                Ok((found, _)) if found == kind => matches.push(checksum),
                Ok(_) => {}
                // not one of ours, e.g. a git object written by another tool
                Err(Error::Corrupted { .. }) | Err(Error::Native { .. }) => {}
                Err(e) => return Err(e),
            }
        }
        matches.sort();
        matches.dedup();
        Ok(matches)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn setup() -> (TempDir, ObjectStore) {
        let dir = TempDir::new().unwrap();
        let store = ObjectStore::init(dir.path(), "bare").unwrap();
        (dir, store)
    }

    #[test]
    fn test_write_dedups_identical_objects() {
        let (_dir, store) = setup();

        let first = store.write(ObjectType::DirMeta, b"payload").unwrap();
        assert!(first.written);
        let second = store.write(ObjectType::DirMeta, b"payload").unwrap();
        assert!(!second.written);
        assert_eq!(first.checksum, second.checksum);
        assert_eq!(first.checksum, ObjectStore::checksum_of(ObjectType::DirMeta, b"payload").unwrap());

        // same bytes under another type are a different object
        let other = store.write(ObjectType::File, b"payload").unwrap();
        assert!(other.written);
        assert_ne!(other.checksum, first.checksum);
    }

    #[test]
    fn test_read_checks_type() {
        let (_dir, store) = setup();
        let outcome = store.write(ObjectType::DirTree, b"tree bytes").unwrap();

        let payload = store.read(ObjectType::DirTree, &outcome.checksum).unwrap();
        assert_eq!(payload.as_ref(), b"tree bytes");

        let err = store.read(ObjectType::Commit, &outcome.checksum).unwrap_err();
        assert!(matches!(
            err,
            Error::TypeMismatch {
                expected: ObjectType::Commit,
                found: ObjectType::DirTree,
                ..
            }
        ));
    }

    #[test]
    fn test_missing_object_is_not_found() {
        let (_dir, store) = setup();
        let checksum = ObjectStore::checksum_of(ObjectType::File, b"never written").unwrap();
        assert!(!store.exists(&checksum).unwrap());
        assert!(store.read(ObjectType::File, &checksum).unwrap_err().is_not_found());
    }

    /// a payload of type `kind` whose checksum starts with `prefix`
    fn payload_with_prefix(kind: ObjectType, prefix: &str) -> Vec<u8> {
        (0u64..)
            .map(|n| format!("filler {}", n).into_bytes())
            .find(|payload| {
                ObjectStore::checksum_of(kind, payload)
                    .unwrap()
                    .to_string()
                    .starts_with(prefix)
            })
            .unwrap()
    }

    #[test]
    fn test_find_by_prefix_filters_by_type() {
        let (_dir, store) = setup();
        let commit = store.write(ObjectType::Commit, b"commit bytes").unwrap().checksum;
        let hex = commit.to_string();

        let file_payload = payload_with_prefix(ObjectType::File, &hex[..4]);
        let file = store.write(ObjectType::File, &file_payload).unwrap().checksum;

        assert_eq!(store.find_by_prefix(&hex[..4], ObjectType::Commit).unwrap(), vec![commit]);
        assert_eq!(store.find_by_prefix(&hex[..4], ObjectType::File).unwrap(), vec![file]);
        assert_eq!(store.find_by_prefix(&hex, ObjectType::Commit).unwrap(), vec![commit]);

        let absent = if hex.starts_with("0000") { "ffff" } else { "0000" };
        assert!(store.find_by_prefix(absent, ObjectType::Commit).unwrap().is_empty());
        assert!(matches!(
            store.find_by_prefix("xyz", ObjectType::Commit),
            Err(Error::InvalidChecksum(_))
        ));
    }

    #[test]
    fn test_find_by_prefix_reports_every_match() {
        let (_dir, store) = setup();
        let first = store.write(ObjectType::Commit, b"first").unwrap().checksum;
        let prefix = &first.to_string()[..4];
        let second_payload = payload_with_prefix(ObjectType::Commit, prefix);
        let second = store.write(ObjectType::Commit, &second_payload).unwrap().checksum;

        let mut expected = vec![first, second];
        expected.sort();
        assert_eq!(store.find_by_prefix(prefix, ObjectType::Commit).unwrap(), expected);
    }

    #[test]
    fn test_open_requires_marker() {
        let dir = TempDir::new().unwrap();
        Repository::init_bare(dir.path()).unwrap();
        assert!(matches!(ObjectStore::open(dir.path()), Err(Error::NotARepository(_))));

        let empty = TempDir::new().unwrap();
        assert!(matches!(ObjectStore::open(&empty.path().join("nope")), Err(Error::NotARepository(_))));

        let (dir, _store) = setup();
        let reopened = ObjectStore::open(dir.path()).unwrap();
        assert_eq!(reopened.config_string(CONFIG_MODE).unwrap().as_deref(), Some("bare"));
        assert_eq!(reopened.config_string(CONFIG_PARENT).unwrap(), None);
    }
}
