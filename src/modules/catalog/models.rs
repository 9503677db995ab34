use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// Stored author. `_id` is assigned by the store on insert.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Author {
    #[serde(rename = "_id")]
    pub id: String,
    pub name: String,
    /// Books listing this author; a set, linked when a book is created.
    #[serde(default)]
    pub book_ids: Vec<String>,
}

/// Request body for creating an author.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewAuthor {
    pub name: String,
    #[serde(default)]
    pub book_ids: Vec<String>,
}

impl NewAuthor {
    /// Blank names are rejected; duplicate book ids are collapsed keeping the first.
    pub fn validated(mut self) -> Result<Self, Vec<Value>> {
        if self.name.trim().is_empty() {
            return Err(vec![json!({"field": "name", "error": "must not be blank"})]);
        }
        dedup_in_order(&mut self.book_ids);
        Ok(self)
    }
}

/// Stored book.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Book {
    #[serde(rename = "_id")]
    pub id: String,
    pub title: String,
    pub description: String,
    /// Supplied by the client; not checked against existing authors.
    #[serde(default)]
    pub author_ids: Vec<String>,
}

/// Request body for creating a book.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewBook {
    pub title: String,
    pub description: String,
    #[serde(default)]
    pub author_ids: Vec<String>,
}

impl NewBook {
    pub fn validated(self) -> Result<Self, Vec<Value>> {
        if self.title.trim().is_empty() {
            return Err(vec![json!({"field": "title", "error": "must not be blank"})]);
        }
        Ok(self)
    }
}

fn dedup_in_order(ids: &mut Vec<String>) {
    let mut seen = std::collections::HashSet::new();
    ids.retain(|id| seen.insert(id.clone()));
}
