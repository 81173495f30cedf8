//! Collection handle: the async CRUD facade over one document table and its
//! append-only log.
//!
//! Operations are serialized per collection by an internal mutex, so each
//! runs to completion against a consistent table with no partial visibility
//! of another caller's in-flight mutation. Mutations are **log-first**: the
//! durable record is appended and fsynced before memory changes, so a crash
//! before the append means the operation never happened, and a crash after
//! is reconstructed by replay.
//!
//! An invariant violation (one-document-per-id broken, or an inconsistent
//! log discovered at startup) halts the collection: reads keep working,
//! writes fail until the process restarts with a repaired log.

use crate::document::{Document, FieldValue};
use crate::error::{Error, Result};
use crate::query::Query;
use crate::table::DocumentTable;
use crate::wal::{self, LogRecord, WriteAheadLog};
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Mutex;

struct CollectionState {
    table: DocumentTable,
    /// Reason the collection stopped accepting writes, if it has.
    halted: Option<String>,
}

struct Inner {
    name: &'static str,
    wal: WriteAheadLog,
    state: Mutex<CollectionState>,
}

/// A handle to one named collection. Cloning shares the underlying state.
#[derive(Clone)]
pub struct Collection {
    inner: Arc<Inner>,
}

impl Collection {
    /// Open the collection by replaying its log into a fresh table.
    ///
    /// Damage at the log tail (a crashed append) is discarded. Corruption
    /// anywhere else, or a log that does not replay into a consistent
    /// history, either fails the open (`strict_replay`) or leaves the
    /// collection readable but halted.
    pub async fn open(name: &'static str, path: &Path, strict_replay: bool) -> Result<Self> {
        let (records, mut stats) = wal::replay(path)?;

        if stats.truncated_tail || stats.dropped_tail {
            tracing::warn!(
                "collection {}: trimming damaged log tail to {} bytes",
                name,
                stats.valid_len
            );
            wal::trim_tail(path, stats.valid_len)?;
        }

        let mut table = DocumentTable::new();
        let mut halted = None;
        for record in records {
            if let Err(reason) = table.apply(record) {
                if strict_replay {
                    return Err(Error::InvariantViolation(reason));
                }
                tracing::error!(
                    "collection {}: {}; refusing further writes",
                    name,
                    reason
                );
                halted = Some(reason);
                break;
            }
        }
        if let Some((offset, reason)) = stats.corruption.take() {
            if strict_replay {
                return Err(Error::MalformedRecord { offset, reason });
            }
            if halted.is_none() {
                let reason = format!("log corrupt at offset {}: {}", offset, reason);
                tracing::error!(
                    "collection {}: {}; refusing further writes",
                    name,
                    reason
                );
                halted = Some(reason);
            }
        }

        let wal = WriteAheadLog::open(path, stats.records as u64)?;
        tracing::info!(
            "collection {}: replayed {} records into {} live documents",
            name,
            stats.records,
            table.len()
        );

        Ok(Self {
            inner: Arc::new(Inner {
                name,
                wal,
                state: Mutex::new(CollectionState { table, halted }),
            }),
        })
    }

    /// The collection's fixed name.
    pub fn name(&self) -> &'static str {
        self.inner.name
    }

    /// First document matching the query, in table order.
    pub async fn find_one(&self, query: impl Into<Query>) -> Result<Document> {
        let query = query.into();
        let state = self.inner.state.lock().await;
        state
            .table
            .find(&query)
            .first()
            .map(|doc| (*doc).clone())
            .ok_or_else(|| not_found(&query))
    }

    /// All documents matching the query, in table order. Zero matches is an
    /// empty vector, not an error.
    pub async fn find_many(&self, query: impl Into<Query>) -> Result<Vec<Document>> {
        let query = query.into();
        let state = self.inner.state.lock().await;
        Ok(state
            .table
            .find(&query)
            .into_iter()
            .cloned()
            .collect())
    }

    /// Insert one document, returning its id.
    pub async fn insert_one(&self, doc: Document) -> Result<String> {
        let mut state = self.inner.state.lock().await;
        self.ensure_writable(&state)?;
        if state.table.get(&doc.id).is_some() {
            return Err(Error::DuplicateKey(doc.id));
        }
        self.inner
            .wal
            .append(&LogRecord::Insert { doc: doc.clone() })
            .await?;
        state.table.insert(doc)
    }

    /// Insert a batch of documents, returning their ids in input order.
    ///
    /// All-or-nothing: the whole batch is validated up front, and a
    /// conflicting id (against the table or within the batch itself) fails
    /// the call naming that id, with nothing logged or applied.
    pub async fn insert_many(&self, docs: Vec<Document>) -> Result<Vec<String>> {
        let mut state = self.inner.state.lock().await;
        self.ensure_writable(&state)?;

        let mut batch_ids = HashSet::new();
        for doc in &docs {
            if state.table.get(&doc.id).is_some() || !batch_ids.insert(doc.id.clone()) {
                return Err(Error::DuplicateKey(doc.id.clone()));
            }
        }

        let mut ids = Vec::with_capacity(docs.len());
        for doc in docs {
            self.inner
                .wal
                .append(&LogRecord::Insert { doc: doc.clone() })
                .await?;
            ids.push(state.table.insert(doc)?);
        }
        Ok(ids)
    }

    /// Merge `patch` into the single document the query resolves to (first
    /// match in table order). Fails with [`Error::NotFound`] if nothing
    /// matches, leaving the table untouched.
    pub async fn update_one(
        &self,
        query: impl Into<Query>,
        patch: HashMap<String, FieldValue>,
    ) -> Result<()> {
        let query = query.into();
        let mut state = self.inner.state.lock().await;
        self.ensure_writable(&state)?;

        let id = state
            .table
            .find(&query)
            .first()
            .map(|doc| doc.id.clone())
            .ok_or_else(|| not_found(&query))?;

        self.inner
            .wal
            .append(&LogRecord::Update {
                id: id.clone(),
                patch: patch.clone(),
            })
            .await?;
        state.table.update(&id, &patch)
    }

    /// Remove the document with the given id; returns whether a removal
    /// happened. Removing an absent id is `Ok(false)`, never an error.
    ///
    /// More than one live document under a single id is corruption: the
    /// call fails with [`Error::InvariantViolation`] and the collection
    /// halts.
    pub async fn remove_one(&self, id: &str) -> Result<bool> {
        let mut state = self.inner.state.lock().await;
        self.ensure_writable(&state)?;

        match state.table.occurrences(id) {
            0 => Ok(false),
            1 => {
                self.inner
                    .wal
                    .append(&LogRecord::Remove { id: id.to_string() })
                    .await?;
                state.table.remove(id);
                Ok(true)
            }
            n => {
                let reason = format!("{} live documents share id {}", n, id);
                self.halt(&mut state, reason.clone());
                Err(Error::InvariantViolation(reason))
            }
        }
    }

    /// Remove every document matching the query; returns the number
    /// removed. One log record is appended per removed document.
    pub async fn remove_many(&self, query: impl Into<Query>) -> Result<usize> {
        let query = query.into();
        let mut state = self.inner.state.lock().await;
        self.ensure_writable(&state)?;

        let ids = state.table.matching_ids(&query);
        let mut removed = 0;
        for id in ids {
            self.inner
                .wal
                .append(&LogRecord::Remove { id: id.clone() })
                .await?;
            state.table.remove(&id);
            removed += 1;
        }
        Ok(removed)
    }

    /// Number of live documents.
    pub async fn count(&self) -> usize {
        self.inner.state.lock().await.table.len()
    }

    /// Rewrite the log to one insert per live document, dropping superseded
    /// history. Read semantics are unchanged.
    pub async fn compact(&self) -> Result<()> {
        let state = self.inner.state.lock().await;
        self.ensure_writable(&state)?;

        let records: Vec<LogRecord> = state
            .table
            .iter()
            .map(|doc| LogRecord::Insert { doc: doc.clone() })
            .collect();
        self.inner.wal.rewrite(&records)?;
        tracing::info!(
            "collection {}: compacted log to {} live documents",
            self.inner.name,
            records.len()
        );
        Ok(())
    }

    fn ensure_writable(&self, state: &CollectionState) -> Result<()> {
        match &state.halted {
            Some(reason) => Err(Error::InvariantViolation(reason.clone())),
            None => Ok(()),
        }
    }

    fn halt(&self, state: &mut CollectionState, reason: String) {
        tracing::error!(
            "collection {}: {}; refusing further writes",
            self.inner.name,
            reason
        );
        state.halted = Some(reason);
    }
}

fn not_found(query: &Query) -> Error {
    match query {
        Query::ById(id) => Error::NotFound(id.clone()),
        other => Error::NotFound(other.to_string()),
    }
}
