//! Rev resolution.

use tracing::trace;

use crate::error::{Error, Result};
use crate::repo::RepoCore;
use crate::storage::{is_full_checksum, is_lower_hex, Checksum, ObjectType, RefManager, RefSpec};

/// shortest checksum prefix accepted as a rev
const MIN_PREFIX_LEN: usize = 4;

impl RepoCore {
    /// Resolve `rev` to a commit checksum.
    ///
    /// Tried in order: `base^` for the parent of `base`, a full checksum, a
    /// unique checksum prefix naming a commit, the ref itself, then the ref
    /// under every remote, then the parent repository.
    pub(crate) fn resolve_rev(&self, rev: &str, allow_noent: bool) -> Result<Option<Checksum>> {
        if rev.is_empty() {
            return Err(Error::invalid_name(rev, "empty rev"));
        }

        let base = rev.trim_end_matches('^');
        let generations = rev.len() - base.len();
        if generations > 0 {
            if base.is_empty() {
                return Err(Error::invalid_name(rev, "'^' without a base rev"));
            }
            let Some(mut current) = self.resolve_rev(base, allow_noent)? else {
                return Ok(None);
            };
            for _ in 0..generations {
                current = match self.load_commit(&current)?.parent {
                    Some(parent) => parent,
                    None if allow_noent => return Ok(None),
                    None => return Err(Error::NotFound(format!("commit {} has no parent", current))),
                };
            }
            return Ok(Some(current));
        }

        if is_full_checksum(rev) {
            return Ok(Some(Checksum::from_hex(rev)?));
        }

        if let Some(checksum) = self.resolve_prefix(rev)? {
            trace!(rev, %checksum, "resolved checksum prefix");
            return Ok(Some(checksum));
        }

        if let Some(checksum) = self.resolve_ref(&RefSpec::parse(rev)?)? {
            return Ok(Some(checksum));
        }

        if let Some(parent) = &self.parent {
            if let Some(checksum) = parent.with(|p| p.resolve_rev(rev, true))?? {
                trace!(rev, %checksum, "resolved in parent repository");
                return Ok(Some(checksum));
            }
        }

        if allow_noent {
            Ok(None)
        } else {
            Err(Error::NotFound(format!("no such ref '{}'", rev)))
        }
    }

    /// The one commit whose checksum starts with `rev`. Other object types
    /// sharing the prefix do not count; several commits do.
    fn resolve_prefix(&self, rev: &str) -> Result<Option<Checksum>> {
        if rev.len() < MIN_PREFIX_LEN || !is_lower_hex(rev) {
            return Ok(None);
        }
        let mut matches = self.store.find_by_prefix(rev, ObjectType::Commit)?;
        match matches.len() {
            0 => Ok(None),
            1 => Ok(matches.pop()),
            n => Err(Error::Native {
                code: git2::ErrorCode::Ambiguous,
                message: format!("checksum prefix '{}' matches {} commits", rev, n),
            }),
        }
    }

    fn resolve_ref(&self, spec: &RefSpec) -> Result<Option<Checksum>> {
        let repo = self.store.repo();
        if spec.remote().is_some() {
            return RefManager::resolve(repo, spec);
        }

        if let Some(checksum) = RefManager::resolve(repo, spec)? {
            return Ok(Some(checksum));
        }
        // `remote/name` written without the colon
        if let Some(checksum) = RefManager::lookup(repo, &format!("refs/remotes/{}", spec.name()))? {
            return Ok(Some(checksum));
        }
        for remote in RefManager::remotes(repo)? {
            let scoped = RefSpec::new(Some(&remote), spec.name())?;
            if let Some(checksum) = RefManager::resolve(repo, &scoped)? {
                trace!(rev = %spec, remote = %remote, "resolved through remote");
                return Ok(Some(checksum));
            }
        }
        Ok(None)
    }
}
