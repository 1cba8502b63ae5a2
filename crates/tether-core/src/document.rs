//! Self-describing snapshot documents.
//!
//! A [`Document`] is a list of `(component_key, payload)` entries. Full and
//! partial snapshots share the same shape; only the set of keys present
//! differs. Payloads are arbitrary `serde_json::Value` trees whose layout is
//! owned by the individual component.
//!
//! Documents are order-insensitive: equality and [`Document::digest`] both
//! look at entries sorted by key, so two documents carrying the same entries
//! in a different order are the same document.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// DocumentEntry
// ---------------------------------------------------------------------------

/// One component's payload inside a [`Document`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentEntry {
    /// Registered component name, e.g. `"cultivation:qi"`.
    pub key: String,
    /// Component-owned payload.
    pub data: serde_json::Value,
}

// ---------------------------------------------------------------------------
// Document
// ---------------------------------------------------------------------------

/// An ordered-on-the-wire, order-insensitive list of component payloads.
///
/// Serializes transparently as a JSON array of `{"key": .., "data": ..}`
/// objects.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Document {
    entries: Vec<DocumentEntry>,
}

impl Document {
    /// Create an empty document.
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    /// Append an entry.
    ///
    /// Documents produced by an aggregate never repeat a key. Documents read
    /// from the wire might; readers apply entries in order, so the last one
    /// wins.
    pub fn push(&mut self, key: impl Into<String>, data: serde_json::Value) {
        self.entries.push(DocumentEntry {
            key: key.into(),
            data,
        });
    }

    /// Payload for `key`, if present (last occurrence wins).
    pub fn get(&self, key: &str) -> Option<&serde_json::Value> {
        self.entries
            .iter()
            .rev()
            .find(|e| e.key == key)
            .map(|e| &e.data)
    }

    /// Whether an entry for `key` is present.
    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.iter().any(|e| e.key == key)
    }

    /// Keys in document order.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|e| e.key.as_str())
    }

    /// Entries in document order.
    pub fn iter(&self) -> std::slice::Iter<'_, DocumentEntry> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Key-sorted view used for equality and hashing.
    fn canonical(&self) -> BTreeMap<&str, &serde_json::Value> {
        self.entries
            .iter()
            .map(|e| (e.key.as_str(), &e.data))
            .collect()
    }

    /// BLAKE3 hex digest (64 lowercase hex chars) of the canonical form.
    ///
    /// Documents that compare equal produce the same digest.
    pub fn digest(&self) -> String {
        // serde_json::Value objects are BTreeMap-backed (no preserve_order), so
        // nested payload keys are already sorted.
        let bytes = serde_json::to_vec(&self.canonical())
            .expect("document payloads are JSON values and always serializable");
        blake3::hash(&bytes).to_hex().to_string()
    }
}

impl PartialEq for Document {
    fn eq(&self, other: &Self) -> bool {
        self.canonical() == other.canonical()
    }
}

impl FromIterator<(String, serde_json::Value)> for Document {
    fn from_iter<I: IntoIterator<Item = (String, serde_json::Value)>>(iter: I) -> Self {
        Self {
            entries: iter
                .into_iter()
                .map(|(key, data)| DocumentEntry { key, data })
                .collect(),
        }
    }
}

impl IntoIterator for Document {
    type Item = DocumentEntry;
    type IntoIter = std::vec::IntoIter<DocumentEntry>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.into_iter()
    }
}

impl<'a> IntoIterator for &'a Document {
    type Item = &'a DocumentEntry;
    type IntoIter = std::slice::Iter<'a, DocumentEntry>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
