//! Transaction manager - sequences the write session of one repository handle.
//!
//! The manager is a small state machine:
//!
//! ```text
//!   Idle --prepare--> Prepared --commit--> Idle
//!                        │
//!                        └------abort----> Idle
//! ```
//!
//! While prepared it holds an exclusive lock on the store's transaction
//! marker file, so writers using other handles (or other processes) are
//! turned away instead of interleaving. The marker is emptied on commit; a
//! marker still holding a session when the next transaction starts means the
//! previous one was aborted or interrupted and its objects may be reused.

use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use fs2::FileExt;
use git2::Repository;
use tracing::{info, warn};
use ulid::Ulid;

use crate::error::{Error, Result};
use crate::storage::{RefManager, RefUpdate, WriteOutcome};
use crate::transaction::stats::TransactionStats;

/// name of the marker file inside the git directory
pub const MARKER_FILE: &str = "treerepo-transaction";

/// Observable transaction state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxState {
    Idle,
    Prepared,
}

impl TxState {
    pub fn as_str(self) -> &'static str {
        match self {
            TxState::Idle => "idle",
            TxState::Prepared => "prepared",
        }
    }
}

/// An active write session.
#[derive(Debug)]
struct Session {
    id: Ulid,
    started_at: DateTime<Utc>,
    /// holds the exclusive lock for the session's lifetime
    lock: File,
    stats: TransactionStats,
    /// pending ref updates, last write per ref wins
    refs: Vec<RefUpdate>,
}

/// Per-handle transaction state.
#[derive(Debug)]
pub struct TransactionManager {
    marker: PathBuf,
    session: Option<Session>,
}

impl TransactionManager {
    pub fn new(git_dir: &Path) -> Self {
        Self {
            marker: git_dir.join(MARKER_FILE),
            session: None,
        }
    }

    pub fn state(&self) -> TxState {
        match self.session {
            Some(_) => TxState::Prepared,
            None => TxState::Idle,
        }
    }

    /// id of the active session
    pub fn session_id(&self) -> Option<String> {
        self.session.as_ref().map(|s| s.id.to_string().to_lowercase())
    }

    /// statistics gathered so far by the active session
    pub fn stats(&self) -> Option<TransactionStats> {
        self.session.as_ref().map(|s| s.stats)
    }

    fn state_error(&self, operation: &'static str) -> Error {
        Error::TransactionState {
            operation,
            state: self.state().as_str(),
        }
    }

    /// Begin a write session.
    ///
    /// Returns whether a previous, unfinished session left objects behind that
    /// this one may reuse. Callers must behave the same either way.
    pub fn prepare(&mut self) -> Result<bool> {
        if self.session.is_some() {
            return Err(self.state_error("prepare"));
        }

        let mut lock = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&self.marker)?;
        lock.try_lock_exclusive().map_err(|e| lock_error(e, &self.marker))?;

        let resumed = lock.metadata()?.len() > 0;
        let id = Ulid::new();
        let started_at = Utc::now();

        lock.set_len(0)?;
        writeln!(lock, "session {}", id.to_string().to_lowercase())?;
        writeln!(lock, "started {}", started_at.to_rfc3339())?;
        lock.sync_data()?;

        if resumed {
            warn!(session = %id, "previous transaction was not completed, resuming");
        }
        info!(session = %id, resumed, "transaction prepared");

        self.session = Some(Session {
            id,
            started_at,
            lock,
            stats: TransactionStats::default(),
            refs: Vec::new(),
        });
        Ok(resumed)
    }

    /// fail unless a session is active
    pub fn require_prepared(&self, operation: &'static str) -> Result<()> {
        match self.session {
            Some(_) => Ok(()),
            None => Err(self.state_error(operation)),
        }
    }

    /// count an object written during the session
    pub fn record(&mut self, outcome: &WriteOutcome) -> Result<()> {
        let session = self.session.as_mut().ok_or(Error::TransactionState {
            operation: "write object",
            state: TxState::Idle.as_str(),
        })?;
        session.stats.record(outcome);
        Ok(())
    }

    /// Queue a ref update, published at commit.
    pub fn stage_ref(&mut self, update: RefUpdate) -> Result<()> {
        let session = self.session.as_mut().ok_or(Error::TransactionState {
            operation: "set ref",
            state: TxState::Idle.as_str(),
        })?;
        session.refs.retain(|pending| pending.spec != update.spec);
        session.refs.push(update);
        Ok(())
    }

    /// Publish the queued ref updates and end the session.
    ///
    /// Either every ref update lands or none does. On failure the session is
    /// still ended; objects it wrote stay behind unreferenced.
    pub fn commit(&mut self, repo: &Repository) -> Result<TransactionStats> {
        let session = self.session.take().ok_or(Error::TransactionState {
            operation: "commit",
            state: TxState::Idle.as_str(),
        })?;
        let message = format!("transaction {}", session.id.to_string().to_lowercase());

        if let Err(e) = RefManager::apply(repo, &session.refs, &message) {
            warn!(session = %session.id, error = %e, "transaction commit failed");
            return Err(e);
        }

        // the refs are out; a stale marker only makes the next prepare report resumed
        if let Err(e) = session.lock.set_len(0) {
            warn!(session = %session.id, error = %e, "failed to clear transaction marker");
        }
        let elapsed = Utc::now() - session.started_at;
        info!(
            session = %session.id,
            refs = session.refs.len(),
            stats = %session.stats,
            elapsed_ms = elapsed.num_milliseconds(),
            "transaction committed"
        );
        Ok(session.stats)
    }

    /// End the session without publishing anything. A no-op when idle.
    pub fn abort(&mut self) -> Result<()> {
        if let Some(session) = self.session.take() {
            // the marker keeps the session so the next prepare sees it
            FileExt::unlock(&session.lock)?;
            info!(session = %session.id, discarded_refs = session.refs.len(), "transaction aborted");
        }
        Ok(())
    }
}

fn lock_error(err: io::Error, marker: &Path) -> Error {
    if err.raw_os_error() == fs2::lock_contended_error().raw_os_error() || err.kind() == io::ErrorKind::WouldBlock {
        Error::Native {
            code: git2::ErrorCode::Locked,
            message: format!("transaction lock {} is held by another writer", marker.display()),
        }
    } else {
        Error::Io(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{ObjectStore, ObjectType, RefSpec};
    use tempfile::TempDir;

    fn setup() -> (TempDir, ObjectStore, TransactionManager) {
        let dir = TempDir::new().unwrap();
        let store = ObjectStore::init(dir.path(), "bare").unwrap();
        let manager = TransactionManager::new(store.git_dir());
        (dir, store, manager)
    }

    #[test]
    fn test_prepare_commit_cycle() {
        let (_dir, store, mut manager) = setup();
        assert_eq!(manager.state(), TxState::Idle);

        assert!(!manager.prepare().unwrap());
        assert_eq!(manager.state(), TxState::Prepared);
        assert!(manager.session_id().is_some());

        let outcome = store.write(ObjectType::File, b"content").unwrap();
        manager.record(&outcome).unwrap();

        let stats = manager.commit(store.repo()).unwrap();
        assert_eq!(stats.content_objects_written, 1);
        assert_eq!(manager.state(), TxState::Idle);

        // a cleanly committed session leaves nothing to resume
        assert!(!manager.prepare().unwrap());
        manager.abort().unwrap();
    }

    #[test]
    fn test_double_prepare_fails() {
        let (_dir, _store, mut manager) = setup();
        manager.prepare().unwrap();
        let err = manager.prepare().unwrap_err();
        assert!(matches!(
            err,
            Error::TransactionState {
                operation: "prepare",
                state: "prepared"
            }
        ));
        // the first session is still usable
        assert_eq!(manager.state(), TxState::Prepared);
    }

    #[test]
    fn test_commit_and_writes_require_prepare() {
        let (_dir, store, mut manager) = setup();
        assert!(matches!(manager.commit(store.repo()), Err(Error::TransactionState { .. })));
        let update = RefUpdate {
            spec: RefSpec::local("main").unwrap(),
            target: None,
        };
        assert!(matches!(manager.stage_ref(update), Err(Error::TransactionState { .. })));
        // aborting with nothing active is allowed
        manager.abort().unwrap();
    }

    #[test]
    fn test_abort_marks_next_session_resumed() {
        let (_dir, _store, mut manager) = setup();
        manager.prepare().unwrap();
        manager.abort().unwrap();
        assert_eq!(manager.state(), TxState::Idle);
        assert!(manager.prepare().unwrap());
    }

    #[test]
    fn test_second_writer_is_locked_out() {
        let (_dir, store, mut manager) = setup();
        let mut other = TransactionManager::new(store.git_dir());

        manager.prepare().unwrap();
        let err = other.prepare().unwrap_err();
        assert!(err.is_retriable());
        assert_eq!(other.state(), TxState::Idle);

        manager.abort().unwrap();
        assert!(other.prepare().unwrap());
    }

    #[test]
    fn test_staged_refs_publish_on_commit() {
        let (_dir, store, mut manager) = setup();
        let commit = store.write(ObjectType::Commit, b"c").unwrap().checksum;
        let spec = RefSpec::local("main").unwrap();

        manager.prepare().unwrap();
        manager
            .stage_ref(RefUpdate {
                spec: spec.clone(),
                target: Some(commit),
            })
            .unwrap();
        assert_eq!(RefManager::resolve(store.repo(), &spec).unwrap(), None);

        manager.commit(store.repo()).unwrap();
        assert_eq!(RefManager::resolve(store.repo(), &spec).unwrap(), Some(commit));
    }

    #[test]
    fn test_failed_commit_moves_no_ref_and_returns_to_idle() {
        let (_dir, store, mut manager) = setup();
        let spec = RefSpec::local("main").unwrap();
        let first = store.write(ObjectType::Commit, b"first").unwrap().checksum;
        let second = store.write(ObjectType::Commit, b"second").unwrap().checksum;

        manager.prepare().unwrap();
        manager
            .stage_ref(RefUpdate {
                spec: spec.clone(),
                target: Some(first),
            })
            .unwrap();
        manager.commit(store.repo()).unwrap();

        // another writer holds the ref lock
        let lock = store.git_dir().join("refs/heads/main.lock");
        std::fs::write(&lock, b"").unwrap();

        manager.prepare().unwrap();
        manager
            .stage_ref(RefUpdate {
                spec: spec.clone(),
                target: Some(second),
            })
            .unwrap();
        assert!(manager.commit(store.repo()).is_err());
        assert_eq!(manager.state(), TxState::Idle);
        assert_eq!(RefManager::resolve(store.repo(), &spec).unwrap(), Some(first));

        // the handle is usable for a retry once the lock is gone
        std::fs::remove_file(&lock).unwrap();
        assert!(manager.prepare().unwrap());
        manager
            .stage_ref(RefUpdate {
                spec: spec.clone(),
                target: Some(second),
            })
            .unwrap();
        manager.commit(store.repo()).unwrap();
        assert_eq!(RefManager::resolve(store.repo(), &spec).unwrap(), Some(second));
    }
}
