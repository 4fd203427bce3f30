//! Ref management.
//!
//! Refs are named pointers to commit checksums kept in the git ref database:
//! local refs under `refs/heads/`, remote-scoped refs under
//! `refs/remotes/<remote>/`. Reads never mutate anything; writes only happen
//! through [`RefManager::apply`], which publishes a whole batch atomically.

use std::collections::{BTreeMap, BTreeSet};

use git2::{ErrorCode, Repository, Signature};
use tracing::debug;

use crate::error::{Error, Result};
use crate::storage::types::{Checksum, RefSpec};

const HEADS: &str = "refs/heads/";
const REMOTES: &str = "refs/remotes/";

/// A pending change to one ref; `None` deletes it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefUpdate {
    pub spec: RefSpec,
    pub target: Option<Checksum>,
}

/// Manages refs.
pub struct RefManager;

impl RefManager {
    /// Resolve a full ref path; `None` if it does not exist.
    pub fn lookup(repo: &Repository, ref_path: &str) -> Result<Option<Checksum>> {
        match repo.find_reference(ref_path) {
            Ok(reference) => match reference.target() {
                Some(oid) => Ok(Some(Checksum::new(oid))),
                None => Err(Error::Corrupted {
                    checksum: ref_path.to_string(),
                    reason: "symbolic ref".to_string(),
                }),
            },
            Err(e) if e.code() == ErrorCode::NotFound => Ok(None),
            Err(e) if e.code() == ErrorCode::InvalidSpec => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    pub fn resolve(repo: &Repository, spec: &RefSpec) -> Result<Option<Checksum>> {
        Self::lookup(repo, &spec.ref_path())
    }

    /// Names of all remotes that have at least one ref.
    pub fn remotes(repo: &Repository) -> Result<BTreeSet<String>> {
        let mut remotes = BTreeSet::new();
        for name in repo.references()?.names() {
            if let Some(rest) = name?.strip_prefix(REMOTES) {
                if let Some((remote, _)) = rest.split_once('/') {
                    remotes.insert(remote.to_string());
                }
            }
        }
        Ok(remotes)
    }

    /// List refs, local or of one remote, whose name starts with `prefix`.
    pub fn list(repo: &Repository, remote: Option<&str>, prefix: Option<&str>) -> Result<BTreeMap<String, Checksum>> {
        let base = match remote {
            Some(remote) => format!("{}{}/", REMOTES, remote),
            None => HEADS.to_string(),
        };

        let mut result = BTreeMap::new();
        for reference in repo.references()? {
            let reference = reference?;
            let (Some(name), Some(oid)) = (reference.name(), reference.target()) else {
                continue;
            };
            let Some(short) = name.strip_prefix(base.as_str()) else {
                continue;
            };
            let matches = match prefix {
                Some(p) => short.starts_with(p),
                None => true,
            };
            if matches {
                result.insert(short.to_string(), Checksum::new(oid));
            }
        }
        Ok(result)
    }

    /// Apply a batch of ref updates atomically.
    ///
    /// Every ref is locked first; nothing is changed unless all locks are
    /// taken. Deleting a ref that does not exist is a no-op.
    pub fn apply(repo: &Repository, updates: &[RefUpdate], message: &str) -> Result<()> {
        if updates.is_empty() {
            return Ok(());
        }

        let signature = Signature::now("treerepo", "treerepo@localhost")?;
        let mut tx = repo.transaction()?;
        for update in updates {
            let path = update.spec.ref_path();
            match update.target {
                Some(checksum) => {
                    tx.lock_ref(&path)?;
                    tx.set_target(&path, checksum.raw(), Some(&signature), message)?;
                    debug!(ref_name = %update.spec, %checksum, "set ref");
                }
                None => {
                    if Self::lookup(repo, &path)?.is_none() {
                        continue;
                    }
                    tx.lock_ref(&path)?;
                    tx.remove(&path)?;
                    debug!(ref_name = %update.spec, "delete ref");
                }
            }
        }
        tx.commit()?;
        Ok(())
    }
}
