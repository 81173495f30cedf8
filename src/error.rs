//! Error types shared across the store.
//!
//! Every public operation returns [`Result`]. Errors are never swallowed;
//! an operation that returns `Err` has not been applied, with the single
//! exception of batch operations interrupted by an I/O failure (see
//! `Collection::insert_many`), where the already-logged prefix remains
//! applied and durable.

use thiserror::Error;

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// All failure classes surfaced by the store.
#[derive(Debug, Error)]
pub enum Error {
    /// The target id is absent from the collection.
    #[error("document not found: {0}")]
    NotFound(String),

    /// Insert with an id that is already live in the collection.
    #[error("duplicate document id: {0}")]
    DuplicateKey(String),

    /// The one-document-per-id invariant was found violated, or the log
    /// could not be replayed consistently. The affected collection refuses
    /// further writes until restarted with a repaired log.
    #[error("collection invariant violated: {0}")]
    InvariantViolation(String),

    /// The underlying durable write or read failed. The operation is not
    /// considered applied.
    #[error("storage I/O failure: {0}")]
    Io(#[from] std::io::Error),

    /// A log record before the tail of the file could not be parsed during
    /// replay. Corruption at the tail is discarded instead (crash during
    /// append); corruption anywhere else is fatal for the collection.
    #[error("malformed log record at offset {offset}: {reason}")]
    MalformedRecord {
        /// Byte offset of the frame header within the log file.
        offset: u64,
        /// Parse or checksum failure description.
        reason: String,
    },
}
