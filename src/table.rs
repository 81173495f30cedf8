//! In-memory document table.
//!
//! Maps document ids to their current values and preserves insertion order,
//! which is the scan order for queries. The table is the authoritative
//! in-memory state of one collection; durability is layered on top by the
//! log store, and startup rebuilds the table by folding replayed records
//! through [`DocumentTable::apply`].

use crate::document::{Document, FieldValue};
use crate::error::{Error, Result};
use crate::query::Query;
use crate::wal::LogRecord;
use std::collections::HashMap;

/// Id → document map with stable insertion order.
#[derive(Debug, Default)]
pub struct DocumentTable {
    docs: HashMap<String, Document>,
    /// Ids in insertion order; scan order for queries.
    order: Vec<String>,
}

impl DocumentTable {
    /// Creates an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores a new document. Fails with [`Error::DuplicateKey`] if the id
    /// is already live.
    pub fn insert(&mut self, doc: Document) -> Result<String> {
        if self.docs.contains_key(&doc.id) {
            return Err(Error::DuplicateKey(doc.id));
        }
        let id = doc.id.clone();
        self.order.push(id.clone());
        self.docs.insert(id.clone(), doc);
        Ok(id)
    }

    /// Returns the document with the given id, if live.
    pub fn get(&self, id: &str) -> Option<&Document> {
        self.docs.get(id)
    }

    /// Linear scan returning all documents matching the predicate, in
    /// insertion order.
    pub fn find(&self, query: &Query) -> Vec<&Document> {
        self.order
            .iter()
            .filter_map(|id| self.docs.get(id))
            .filter(|doc| query.matches(doc))
            .collect()
    }

    /// Merges `patch` into the document's fields (shallow overwrite;
    /// unlisted fields untouched). Fails with [`Error::NotFound`] if the id
    /// is absent.
    pub fn update(&mut self, id: &str, patch: &HashMap<String, FieldValue>) -> Result<()> {
        let doc = self
            .docs
            .get_mut(id)
            .ok_or_else(|| Error::NotFound(id.to_string()))?;
        for (name, value) in patch {
            doc.fields.insert(name.clone(), value.clone());
        }
        Ok(())
    }

    /// Deletes the document if present; returns whether a deletion happened.
    pub fn remove(&mut self, id: &str) -> bool {
        if self.docs.remove(id).is_some() {
            self.order.retain(|entry| entry != id);
            true
        } else {
            false
        }
    }

    /// Ids of all documents matching the predicate, in insertion order.
    pub fn matching_ids(&self, query: &Query) -> Vec<String> {
        self.find(query).into_iter().map(|d| d.id.clone()).collect()
    }

    /// Number of live entries in the scan order for the given id.
    ///
    /// Always 0 or 1 when the table is healthy; anything larger is
    /// corruption and the caller must treat it as such.
    pub fn occurrences(&self, id: &str) -> usize {
        self.order.iter().filter(|entry| *entry == id).count()
    }

    /// Number of live documents.
    pub fn len(&self) -> usize {
        self.docs.len()
    }

    /// Whether the table holds no live documents.
    pub fn is_empty(&self) -> bool {
        self.docs.is_empty()
    }

    /// Iterates live documents in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &Document> {
        self.order.iter().filter_map(|id| self.docs.get(id))
    }

    /// Folds one replayed log record into the table.
    ///
    /// Replay is a fold over records that were each validated against the
    /// table state of their time, so a record that no longer applies means
    /// the log does not describe a consistent history.
    pub fn apply(&mut self, record: LogRecord) -> std::result::Result<(), String> {
        match record {
            LogRecord::Insert { doc } => {
                let id = doc.id.clone();
                self.insert(doc)
                    .map_err(|_| format!("replayed insert of already-live id {}", id))?;
            }
            LogRecord::Update { id, patch } => {
                self.update(&id, &patch)
                    .map_err(|_| format!("replayed update of missing id {}", id))?;
            }
            LogRecord::Remove { id } => {
                if !self.remove(&id) {
                    return Err(format!("replayed remove of missing id {}", id));
                }
            }
        }
        Ok(())
    }
}
