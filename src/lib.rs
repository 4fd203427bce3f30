//! treerepo - client access to a content-addressed filesystem-tree store
//!
//! A repository holds immutable objects named by checksum: file contents,
//! directory listings (dirtree), directory metadata (dirmeta) and commits
//! that snapshot a root directory. Named refs point at commits. This crate
//! opens such a repository, resolves revs, decodes objects and writes new
//! trees and commits inside transactions.
//!
//! # Example
//!
//! ```no_run
//! use treerepo::{MutableTree, Repo};
//!
//! let repo = Repo::init("./my_repo").unwrap();
//! let tx = repo.transaction().unwrap();
//! let tree = MutableTree::new();
//! tx.write_directory_to_tree("./rootfs", &tree).unwrap();
//! let root = tx.write_mtree(&tree).unwrap();
//! let commit = tx.write_commit(None, "import rootfs", "", None, &root).unwrap();
//! tx.set_ref(None, "main", Some(commit)).unwrap();
//! let stats = tx.commit().unwrap();
//! println!("{}", stats);
//! ```

pub mod error;
pub mod mtree;
pub mod native;
pub mod repo;
pub mod storage;
pub mod transaction;
pub mod variant;

pub use error::{Error, Result};
pub use mtree::{MutableTree, TreeEntry};
pub use native::Handle;
pub use repo::{FrozenTree, Repo, RepoConfig, RepoMode};
pub use storage::{Checksum, Commit, DirMeta, DirTree, FileHeader, FileObject, ObjectType, RefSpec};
pub use transaction::{TransactionGuard, TransactionStats, TxState};
pub use variant::{Variant, VariantDict};
