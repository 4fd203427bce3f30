//! Scoped transactions.

use std::ops::Deref;

use tracing::warn;

use crate::error::Result;
use crate::repo::Repo;
use crate::transaction::stats::TransactionStats;

/// A prepared transaction that aborts on drop unless committed.
///
/// Derefs to the repository so writes read naturally:
///
/// ```no_run
/// # fn demo(repo: &treerepo::Repo) -> treerepo::Result<()> {
/// let tx = repo.transaction()?;
/// let tree = treerepo::MutableTree::new();
/// let root = tx.write_mtree(&tree)?;
/// let commit = tx.write_commit(None, "empty", "", None, &root)?;
/// tx.set_ref(None, "main", Some(commit))?;
/// tx.commit()?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct TransactionGuard<'r> {
    repo: &'r Repo,
    resumed: bool,
    done: bool,
}

impl<'r> TransactionGuard<'r> {
    pub(crate) fn new(repo: &'r Repo, resumed: bool) -> Self {
        Self {
            repo,
            resumed,
            done: false,
        }
    }

    /// whether an unfinished earlier transaction was found at prepare
    pub fn resumed(&self) -> bool {
        self.resumed
    }

    pub fn commit(mut self) -> Result<TransactionStats> {
        self.done = true;
        self.repo.commit_transaction()
    }

    pub fn abort(mut self) -> Result<()> {
        self.done = true;
        self.repo.abort_transaction()
    }
}

impl Deref for TransactionGuard<'_> {
    type Target = Repo;

    fn deref(&self) -> &Repo {
        self.repo
    }
}

impl Drop for TransactionGuard<'_> {
    fn drop(&mut self) {
        if self.done {
            return;
        }
        if let Err(e) = self.repo.abort_transaction() {
            warn!(error = %e, "failed to abort dropped transaction");
        }
    }
}
