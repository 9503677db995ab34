//! Catalog persistence: the store trait the service depends on and its
//! document-store implementation.

use async_trait::async_trait;
use futures_util::TryStreamExt;
use libris_db::{parse_object_ids, AUTHORS_COLLECTION, BOOKS_COLLECTION};
use mongodb::{
    bson::{doc, oid::ObjectId, Document},
    Collection, Database,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::models::{Author, Book, NewAuthor, NewBook};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("document store error: {0}")]
    Database(#[from] mongodb::error::Error),

    #[error("{collection} document '{id}' not found after insert")]
    Missing {
        collection: &'static str,
        id: String,
    },

    #[error("store assigned a non object-id key to a {0} document")]
    UnexpectedKey(&'static str),
}

/// Persistence operations used by the catalog service.
#[async_trait]
pub trait CatalogStore: Send + Sync {
    /// Insert an author and return its generated identifier.
    async fn insert_author(&self, author: &NewAuthor) -> Result<String, StoreError>;

    async fn find_author(&self, id: &str) -> Result<Option<Author>, StoreError>;

    /// Up to `limit` authors in store order.
    async fn list_authors(&self, limit: i64) -> Result<Vec<Author>, StoreError>;

    /// Insert a book and return its generated identifier.
    async fn insert_book(&self, book: &NewBook) -> Result<String, StoreError>;

    async fn find_book(&self, id: &str) -> Result<Option<Book>, StoreError>;

    /// Up to `limit` books in store order.
    async fn list_books(&self, limit: i64) -> Result<Vec<Book>, StoreError>;

    /// Add `book_id` to the `book_ids` set of every listed author in one bulk
    /// update. Ids that match nothing are ignored. Idempotent.
    ///
    /// Returns the number of authors modified.
    async fn link_book_to_authors(
        &self,
        book_id: &str,
        author_ids: &[String],
    ) -> Result<u64, StoreError>;
}

#[derive(Debug, Serialize, Deserialize)]
struct AuthorRecord {
    #[serde(rename = "_id")]
    id: ObjectId,
    name: String,
    #[serde(default)]
    book_ids: Vec<String>,
}

impl From<AuthorRecord> for Author {
    fn from(record: AuthorRecord) -> Self {
        Self {
            id: record.id.to_hex(),
            name: record.name,
            book_ids: record.book_ids,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct BookRecord {
    #[serde(rename = "_id")]
    id: ObjectId,
    title: String,
    description: String,
    #[serde(default)]
    author_ids: Vec<String>,
}

impl From<BookRecord> for Book {
    fn from(record: BookRecord) -> Self {
        Self {
            id: record.id.to_hex(),
            title: record.title,
            description: record.description,
            author_ids: record.author_ids,
        }
    }
}

/// Filter and update adding `book_id` to the `book_ids` set of every listed
/// author. `None` when no listed id is a valid object id.
pub fn link_update(book_id: &str, author_ids: &[String]) -> Option<(Document, Document)> {
    let author_ids = parse_object_ids(author_ids);
    if author_ids.is_empty() {
        return None;
    }
    Some((
        doc! { "_id": { "$in": author_ids } },
        doc! { "$addToSet": { "book_ids": book_id } },
    ))
}

/// [`CatalogStore`] over the `authors` and `books` collections.
#[derive(Clone)]
pub struct MongoCatalogStore {
    authors: Collection<AuthorRecord>,
    books: Collection<BookRecord>,
}

impl MongoCatalogStore {
    pub fn new(database: &Database) -> Self {
        Self {
            authors: database.collection(AUTHORS_COLLECTION),
            books: database.collection(BOOKS_COLLECTION),
        }
    }
}

#[async_trait]
impl CatalogStore for MongoCatalogStore {
    async fn insert_author(&self, author: &NewAuthor) -> Result<String, StoreError> {
        let result = self
            .authors
            .clone_with_type::<NewAuthor>()
            .insert_one(author)
            .await?;
        result
            .inserted_id
            .as_object_id()
            .map(|id| id.to_hex())
            .ok_or(StoreError::UnexpectedKey(AUTHORS_COLLECTION))
    }

    async fn find_author(&self, id: &str) -> Result<Option<Author>, StoreError> {
        let Ok(id) = ObjectId::parse_str(id) else {
            return Ok(None);
        };
        let record = self.authors.find_one(doc! { "_id": id }).await?;
        Ok(record.map(Author::from))
    }

    async fn list_authors(&self, limit: i64) -> Result<Vec<Author>, StoreError> {
        let records: Vec<AuthorRecord> = self
            .authors
            .find(doc! {})
            .limit(limit)
            .await?
            .try_collect()
            .await?;
        Ok(records.into_iter().map(Author::from).collect())
    }

    async fn insert_book(&self, book: &NewBook) -> Result<String, StoreError> {
        let result = self
            .books
            .clone_with_type::<NewBook>()
            .insert_one(book)
            .await?;
        result
            .inserted_id
            .as_object_id()
            .map(|id| id.to_hex())
            .ok_or(StoreError::UnexpectedKey(BOOKS_COLLECTION))
    }

    async fn find_book(&self, id: &str) -> Result<Option<Book>, StoreError> {
        let Ok(id) = ObjectId::parse_str(id) else {
            return Ok(None);
        };
        let record = self.books.find_one(doc! { "_id": id }).await?;
        Ok(record.map(Book::from))
    }

    async fn list_books(&self, limit: i64) -> Result<Vec<Book>, StoreError> {
        let records: Vec<BookRecord> = self
            .books
            .find(doc! {})
            .limit(limit)
            .await?
            .try_collect()
            .await?;
        Ok(records.into_iter().map(Book::from).collect())
    }

    async fn link_book_to_authors(
        &self,
        book_id: &str,
        author_ids: &[String],
    ) -> Result<u64, StoreError> {
        let Some((filter, update)) = link_update(book_id, author_ids) else {
            return Ok(0);
        };

        let result = self.authors.update_many(filter, update).await?;
        Ok(result.modified_count)
    }
}
