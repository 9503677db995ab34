//! Search index access.
//!
//! One index per entity type. Documents are keyed by the originating
//! entity's identifier so event-driven indexing and bulk reindexing land on
//! the same document.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use thiserror::Error;

pub mod elastic;
pub mod memory;

pub use elastic::{ElasticIndex, IndexModule};
pub use memory::MemoryIndex;

/// Fields the keyword query searches across both entity types.
pub const SEARCH_FIELDS: &[&str] = &["title", "description", "name"];

/// The indices the catalog maintains.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IndexName {
    #[default]
    Books,
    Authors,
}

impl IndexName {
    pub const ALL: [IndexName; 2] = [IndexName::Books, IndexName::Authors];

    pub const fn as_str(&self) -> &'static str {
        match self {
            IndexName::Books => "books",
            IndexName::Authors => "authors",
        }
    }
}

impl std::fmt::Display for IndexName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
pub enum IndexError {
    #[error("index '{0}' does not exist")]
    IndexNotFound(String),

    #[error("invalid index url: {0}")]
    InvalidUrl(String),

    #[error("index request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("index returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("document has no textual identifier")]
    MissingIdentifier,
}

/// Write and query access to the search index.
#[async_trait]
pub trait SearchIndex: Send + Sync {
    /// Insert or replace the document stored under `id`.
    async fn upsert(&self, index: IndexName, id: &str, document: &Value) -> Result<(), IndexError>;

    /// Run `query` and return the matched document bodies.
    ///
    /// Fails with [`IndexError::IndexNotFound`] when the index has not been created.
    async fn search(&self, index: IndexName, query: &Value) -> Result<Vec<Value>, IndexError>;
}

/// Compound keyword query: a typo-tolerant multi-field match OR a wildcard
/// substring match, at least one of which must hit.
pub fn keyword_query(query: &str) -> Value {
    json!({
        "bool": {
            "should": [
                {
                    "multi_match": {
                        "query": query,
                        "fields": SEARCH_FIELDS,
                        "fuzziness": "AUTO"
                    }
                },
                {
                    "query_string": {
                        "query": format!("*{}*", query),
                        "fields": SEARCH_FIELDS
                    }
                }
            ],
            "minimum_should_match": 1
        }
    })
}

/// Detach the identifier from an entity payload.
///
/// `_id` is preferred, `id` is accepted as a fallback. Returns the identifier
/// and the remaining body, or `MissingIdentifier` when neither field holds a
/// non-empty string.
pub fn split_document_id(payload: Value) -> Result<(String, Value), IndexError> {
    let Value::Object(mut body) = payload else {
        return Err(IndexError::MissingIdentifier);
    };

    for key in ["_id", "id"] {
        if let Some(Value::String(id)) = body.get(key) {
            if id.is_empty() {
                continue;
            }
            let id = id.clone();
            body.remove(key);
            return Ok((id, Value::Object(body)));
        }
    }

    Err(IndexError::MissingIdentifier)
}
