//! Write statistics of a transaction.

use std::fmt;

use crate::storage::WriteOutcome;

/// Counts of objects considered and actually written.
///
/// An object is "considered" every time it is written and "written" only
/// if the store did not already hold it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransactionStats {
    pub metadata_objects_considered: u32,
    pub metadata_objects_written: u32,
    pub content_objects_considered: u32,
    pub content_objects_written: u32,
    pub content_bytes_written: u64,
}

impl TransactionStats {
    pub(crate) fn record(&mut self, outcome: &WriteOutcome) {
        if outcome.kind.is_meta() {
            self.metadata_objects_considered += 1;
            if outcome.written {
                self.metadata_objects_written += 1;
            }
        } else {
            self.content_objects_considered += 1;
            if outcome.written {
                self.content_objects_written += 1;
                self.content_bytes_written += outcome.size as u64;
            }
        }
    }

    /// total objects newly stored
    pub fn objects_written(&self) -> u32 {
        self.metadata_objects_written + self.content_objects_written
    }
}

impl fmt::Display for TransactionStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "metadata {}/{} written, content {}/{} written ({} bytes)",
            self.metadata_objects_written,
            self.metadata_objects_considered,
            self.content_objects_written,
            self.content_objects_considered,
            self.content_bytes_written
        )
    }
}
