//! Global configuration constants for docsdb.
//!
//! Compile-time defaults and tuning parameters live here; runtime
//! configuration (paths, strict replay) is carried by
//! [`StoreConfig`](crate::store::StoreConfig).

/// Default directory for collection log files.
pub const DEFAULT_DATA_DIR: &str = "./data";

/// Default log file name for the `ANALYTIC_UNITS` collection.
pub const ANALYTIC_UNITS_FILE: &str = "analytic_units.db";

/// Default log file name for the `SEGMENTS` collection.
pub const SEGMENTS_FILE: &str = "segments.db";

/// Environment variable overriding the data directory.
pub const ENV_DATA_DIR: &str = "DOCSDB_DATA_DIR";

/// Environment variable overriding the `ANALYTIC_UNITS` log path.
pub const ENV_ANALYTIC_UNITS_PATH: &str = "DOCSDB_ANALYTIC_UNITS_PATH";

/// Environment variable overriding the `SEGMENTS` log path.
pub const ENV_SEGMENTS_PATH: &str = "DOCSDB_SEGMENTS_PATH";

/// Maximum serialized size of a single log record payload in bytes (16 MB).
///
/// A frame header claiming more than this is treated as corruption rather
/// than an allocation request.
pub const MAX_RECORD_LEN: usize = 16 * 1024 * 1024;

/// Maximum entries per log group commit batch before forcing a flush.
pub const WAL_GROUP_COMMIT_MAX_BATCH: usize = 128;

/// Maximum wait time (microseconds) to accumulate log entries before flushing.
pub const WAL_GROUP_COMMIT_MAX_WAIT_US: u64 = 1000;
