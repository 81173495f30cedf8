//! # docsdb
//!
//! Embedded, single-process, crash-tolerant document store. Two fixed
//! collections (`ANALYTIC_UNITS`, `SEGMENTS`) each keep their live documents
//! in memory and their history in an append-only on-disk log that is
//! replayed at startup.
//!
//! # Architecture
//!
//! Every mutation is appended to the collection's log and fsynced before it
//! touches memory, so an acknowledged write survives a crash and an
//! unacknowledged one never happened. Appends are group-committed: concurrent
//! writers share a single write + fsync cycle. Queries are a closed predicate
//! set (exact id, id-set membership, or structural field match) evaluated
//! by linear scan in insertion order.
//!
//! # Example
//!
//! ```ignore
//! use docsdb::{CollectionKind, DocStore, Document, Query, StoreConfig};
//! use docsdb::document::fields_from_json;
//! use serde_json::json;
//!
//! let store = DocStore::open(StoreConfig::default()).await?;
//! let segments = store.collection(CollectionKind::Segments);
//!
//! let id = segments
//!     .insert_one(Document::new(fields_from_json(json!({"from": 10, "to": 20}))))
//!     .await?;
//! let segment = segments.find_one(id.as_str()).await?;
//! segments.remove_many(Query::ByFields(fields_from_json(json!({"from": 10})))).await?;
//! ```

/// Collection handle: async CRUD over one table and its log.
pub mod collection;
/// Global configuration constants: paths, limits, group-commit tuning.
pub mod config;
/// Core document types: `Document` struct and `FieldValue` enum.
pub mod document;
/// Error kinds shared across the store.
pub mod error;
/// Query predicates: exact id, id set, structural field match.
pub mod query;
/// Store root: fixed collections, configuration, startup replay.
pub mod store;
/// In-memory document table with stable insertion order.
pub mod table;
/// Append-only log store: framed records, group commit, replay.
pub mod wal;

pub use collection::Collection;
pub use document::{Document, FieldValue};
pub use error::{Error, Result};
pub use query::Query;
pub use store::{CollectionKind, DocStore, StoreConfig};
