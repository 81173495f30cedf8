//! Query predicates used to select documents.
//!
//! The query surface is a closed set of variants rather than an open
//! key/value bag: exact id, id-set membership, or field match. Field
//! matching requires every listed field to be present and structurally
//! equal; extra fields on the document are ignored, and an empty field map
//! matches every document.

use crate::document::{Document, FieldValue};
use std::collections::HashMap;
use std::fmt;

/// A criterion selecting documents from a collection.
#[derive(Debug, Clone, PartialEq)]
pub enum Query {
    /// `document.id == id`.
    ById(String),
    /// `document.id` is one of the given ids.
    ByIdSet(Vec<String>),
    /// Every listed field is present on the document with an equal value.
    ByFields(HashMap<String, FieldValue>),
}

impl Query {
    /// A predicate matching every document.
    pub fn all() -> Self {
        Query::ByFields(HashMap::new())
    }

    /// Evaluate this predicate against one document.
    pub fn matches(&self, doc: &Document) -> bool {
        match self {
            Query::ById(id) => doc.id == *id,
            Query::ByIdSet(ids) => ids.iter().any(|id| *id == doc.id),
            Query::ByFields(fields) => fields
                .iter()
                .all(|(name, expected)| doc.fields.get(name) == Some(expected)),
        }
    }
}

impl fmt::Display for Query {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Query::ById(id) => write!(f, "id {}", id),
            Query::ByIdSet(ids) => write!(f, "any of {} ids", ids.len()),
            Query::ByFields(fields) => write!(f, "match on {} fields", fields.len()),
        }
    }
}

// Bare ids and id sequences wrap into their query variants, so callers can
// pass an id where a query is expected.

impl From<&str> for Query {
    fn from(id: &str) -> Self {
        Query::ById(id.to_string())
    }
}

impl From<String> for Query {
    fn from(id: String) -> Self {
        Query::ById(id)
    }
}

impl From<Vec<String>> for Query {
    fn from(ids: Vec<String>) -> Self {
        Query::ByIdSet(ids)
    }
}

impl From<&[String]> for Query {
    fn from(ids: &[String]) -> Self {
        Query::ByIdSet(ids.to_vec())
    }
}

impl From<HashMap<String, FieldValue>> for Query {
    fn from(fields: HashMap<String, FieldValue>) -> Self {
        Query::ByFields(fields)
    }
}
