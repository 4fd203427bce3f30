//! Self-describing structured binary values.
//!
//! Commit objects, directory trees and directory metadata are all stored as
//! variants in the GVariant normal form (little-endian, framing offsets at
//! the end of variable-sized containers). This module reads them without
//! copying the backing buffer and builds the values this layer writes.
//!
//! # Usage
//!
//! ```
//! use treerepo::variant::{Variant, VariantDict};
//!
//! let mut meta = VariantDict::new();
//! meta.insert_str("version", "2024.1");
//! let mapping = meta.end();
//!
//! assert_eq!(mapping.type_string(), "a{sv}");
//! assert_eq!(mapping.lookup_string("version").unwrap(), "2024.1");
//! ```

mod build;
mod signature;
mod value;

use thiserror::Error;

pub use build::VariantDict;
pub use signature::{BasicType, Signature};
pub use value::Variant;

/// Decode-time structural violations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VariantError {
    #[error("invalid type signature '{0}'")]
    InvalidSignature(String),

    #[error("expected a value of type '{expected}', found '{found}'")]
    TypeMismatch { expected: String, found: String },

    #[error("'{0}' is not a container type")]
    NotAContainer(String),

    /// keyed lookup on something other than an `a{s*}` mapping
    #[error("'{0}' is not a string-keyed mapping")]
    NotAMapping(String),

    #[error("no such key: {0}")]
    MissingKey(String),

    #[error("child index {index} out of range for {len} children")]
    OutOfBounds { index: usize, len: usize },

    #[error("bad framing: {0}")]
    Framing(String),

    #[error("string is not valid utf-8")]
    InvalidUtf8,
}
