//! Write transactions.
//!
//! Every object write happens inside a transaction. Objects land in the store
//! as soon as they are written; ref updates are queued and published together
//! when the transaction commits.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                   TransactionManager                        │
//! │  (state machine, marker lock, queued refs, statistics)      │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!        ┌─────────────────────┼─────────────────────┐
//!        │                     │                     │
//!        ▼                     ▼                     ▼
//!  ┌─────────────┐       ┌─────────────┐       ┌─────────────┐
//!  │   marker    │       │  RefManager │       │    stats    │
//!  │   (fs2)     │       │ (git2 refs) │       │  (counters) │
//!  └─────────────┘       └─────────────┘       └─────────────┘
//! ```
//!
//! # Usage
//!
//! ```no_run
//! # fn demo(repo: &treerepo::Repo) -> treerepo::Result<()> {
//! let resumed = repo.prepare_transaction()?;
//! // ... write objects, queue refs ...
//! let stats = repo.commit_transaction()?; // or repo.abort_transaction()?
//! # let _ = (resumed, stats);
//! # Ok(())
//! # }
//! ```

mod guard;
mod manager;
mod stats;

pub use guard::TransactionGuard;
pub use manager::{TransactionManager, TxState, MARKER_FILE};
pub use stats::TransactionStats;
