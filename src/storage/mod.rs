//! storage layer
//!
//! An opaque content-addressed object store plus a ref database, both kept in
//! a bare git repository. Upper layers (mutable trees, transactions, the repo
//! facade) use this API and never touch git2 directly.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                       ObjectStore                           │
//! │   (typed objects: <tag> NUL <payload> blobs, config keys)   │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!        ┌─────────────────────┼─────────────────────┐
//!        │                     │                     │
//!        ▼                     ▼                     ▼
//!  ┌─────────────┐       ┌─────────────┐       ┌─────────────┐
//!  │   objects   │       │    types    │       │    refs     │
//!  │  (formats)  │       │ (checksums) │       │ (pointers)  │
//!  └─────────────┘       └─────────────┘       └─────────────┘
//! ```

mod objects;
mod refs;
mod store;
mod types;

pub use objects::{
    decode_file, encode_file, tombstone_variant, Commit, DirMeta, DirTree, FileHeader, FileObject, Xattrs, S_IFDIR,
    S_IFLNK, S_IFMT, S_IFREG,
};
pub use refs::RefUpdate;
pub use store::{ObjectStore, WriteOutcome, CONFIG_MODE, CONFIG_PARENT};
pub use types::{Checksum, ObjectType, RefSpec};

pub(crate) use refs::RefManager;
pub(crate) use types::{is_full_checksum, is_lower_hex};
