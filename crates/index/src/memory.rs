//! In-process index used by tests and local runs without a search service.

use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::Value;

use crate::{IndexError, IndexName, SearchIndex, SEARCH_FIELDS};

#[derive(Default)]
pub struct MemoryIndex {
    indices: Mutex<HashMap<IndexName, BTreeMap<String, Value>>>,
    upserts: Mutex<Vec<(IndexName, String)>>,
}

impl MemoryIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every upsert received, in order, including overwrites.
    pub fn upserts(&self) -> Vec<(IndexName, String)> {
        self.upserts
            .lock()
            .map(|log| log.clone())
            .unwrap_or_default()
    }

    /// The stored body for `id`, if any.
    pub fn document(&self, index: IndexName, id: &str) -> Option<Value> {
        self.indices
            .lock()
            .ok()?
            .get(&index)
            .and_then(|documents| documents.get(id).cloned())
    }

    pub fn len(&self, index: IndexName) -> usize {
        self.indices
            .lock()
            .map(|indices| indices.get(&index).map_or(0, BTreeMap::len))
            .unwrap_or(0)
    }

    pub fn is_empty(&self, index: IndexName) -> bool {
        self.len(index) == 0
    }
}

/// Pull the user's text back out of a keyword query.
fn query_text(query: &Value) -> String {
    query["bool"]["should"][0]["multi_match"]["query"]
        .as_str()
        .unwrap_or_default()
        .to_lowercase()
}

fn matches(document: &Value, needle: &str) -> bool {
    SEARCH_FIELDS.iter().any(|field| {
        document[*field]
            .as_str()
            .is_some_and(|value| value.to_lowercase().contains(needle))
    })
}

#[async_trait]
impl SearchIndex for MemoryIndex {
    async fn upsert(&self, index: IndexName, id: &str, document: &Value) -> Result<(), IndexError> {
        if let Ok(mut indices) = self.indices.lock() {
            indices
                .entry(index)
                .or_default()
                .insert(id.to_string(), document.clone());
        }
        if let Ok(mut log) = self.upserts.lock() {
            log.push((index, id.to_string()));
        }
        Ok(())
    }

    async fn search(&self, index: IndexName, query: &Value) -> Result<Vec<Value>, IndexError> {
        let needle = query_text(query);
        let indices = self
            .indices
            .lock()
            .map_err(|_| IndexError::IndexNotFound(index.to_string()))?;
        let documents = indices
            .get(&index)
            .ok_or_else(|| IndexError::IndexNotFound(index.to_string()))?;

        Ok(documents
            .values()
            .filter(|document| matches(document, &needle))
            .cloned()
            .collect())
    }
}
