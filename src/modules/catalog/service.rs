use std::sync::Arc;
use std::time::Duration;

use libris_events::{Event, EventError, EventKind, EventPublisher};
use libris_http::error::AppError;
use libris_kernel::settings::{BrokerSettings, CatalogSettings};
use serde::Serialize;
use thiserror::Error;

use super::models::{Author, Book, NewAuthor, NewBook};
use super::store::{CatalogStore, StoreError};

/// Pause between author-link attempts grows by this step each time.
const LINK_RETRY_STEP: Duration = Duration::from_millis(50);

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("{message}")]
    Invalid {
        details: Vec<serde_json::Value>,
        message: String,
    },

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("failed to publish {kind} event: {source}")]
    Publish {
        kind: EventKind,
        #[source]
        source: EventError,
    },

    #[error("failed to encode {0} event payload: {1}")]
    Encode(EventKind, #[source] serde_json::Error),
}

impl From<CatalogError> for AppError {
    fn from(error: CatalogError) -> Self {
        match error {
            CatalogError::Invalid { details, message } => AppError::validation(details, message),
            CatalogError::Publish {
                source: EventError::NotReady,
                kind,
            } => AppError::service_unavailable(
                "publisher_not_ready",
                format!("{kind} was stored but its event could not be published: publisher is not ready"),
            ),
            other => AppError::Internal(anyhow::Error::new(other)),
        }
    }
}

/// Tunables for [`CatalogService`].
#[derive(Debug, Clone)]
pub struct CatalogConfig {
    pub topic: String,
    pub list_limit: i64,
    pub link_attempts: u32,
}

impl CatalogConfig {
    pub fn from_settings(broker: &BrokerSettings, catalog: &CatalogSettings) -> Self {
        Self {
            topic: broker.topic.clone(),
            list_limit: catalog.list_limit,
            link_attempts: catalog.link_attempts.max(1),
        }
    }
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self::from_settings(&BrokerSettings::default(), &CatalogSettings::default())
    }
}

/// Create/list operations for authors and books.
///
/// Every create writes the entity, reads it back, and publishes a creation
/// event carrying the stored document.
pub struct CatalogService {
    store: Arc<dyn CatalogStore>,
    publisher: Arc<dyn EventPublisher>,
    config: CatalogConfig,
}

impl CatalogService {
    pub fn new(
        store: Arc<dyn CatalogStore>,
        publisher: Arc<dyn EventPublisher>,
        config: CatalogConfig,
    ) -> Self {
        Self {
            store,
            publisher,
            config,
        }
    }

    pub async fn create_author(&self, author: NewAuthor) -> Result<Author, CatalogError> {
        let author = author.validated().map_err(|details| CatalogError::Invalid {
            details,
            message: "invalid author".to_string(),
        })?;

        let id = self.store.insert_author(&author).await?;
        let created = self
            .store
            .find_author(&id)
            .await?
            .ok_or_else(|| StoreError::Missing {
                collection: libris_db::AUTHORS_COLLECTION,
                id: id.clone(),
            })?;

        tracing::info!(author_id = %created.id, "author created");
        self.publish(EventKind::AuthorCreated, &created).await?;
        Ok(created)
    }

    pub async fn list_authors(&self) -> Result<Vec<Author>, CatalogError> {
        Ok(self.store.list_authors(self.config.list_limit).await?)
    }

    pub async fn create_book(&self, book: NewBook) -> Result<Book, CatalogError> {
        let book = book.validated().map_err(|details| CatalogError::Invalid {
            details,
            message: "invalid book".to_string(),
        })?;

        let id = self.store.insert_book(&book).await?;
        let created = self
            .store
            .find_book(&id)
            .await?
            .ok_or_else(|| StoreError::Missing {
                collection: libris_db::BOOKS_COLLECTION,
                id: id.clone(),
            })?;

        tracing::info!(book_id = %created.id, "book created");

        if !book.author_ids.is_empty() {
            self.link_authors(&created.id, &book.author_ids).await?;
        }

        self.publish(EventKind::BookCreated, &created).await?;
        Ok(created)
    }

    pub async fn list_books(&self) -> Result<Vec<Book>, CatalogError> {
        Ok(self.store.list_books(self.config.list_limit).await?)
    }

    /// Link the book back to its authors, retrying the idempotent set-union
    /// a bounded number of times. The book stays stored if every attempt fails.
    async fn link_authors(&self, book_id: &str, author_ids: &[String]) -> Result<(), StoreError> {
        let mut attempt = 1;
        loop {
            match self.store.link_book_to_authors(book_id, author_ids).await {
                Ok(linked) => {
                    tracing::info!(book_id, linked, requested = author_ids.len(), "authors linked");
                    return Ok(());
                }
                Err(error) if attempt < self.config.link_attempts => {
                    tracing::warn!(book_id, attempt, %error, "author link failed, retrying");
                    tokio::time::sleep(LINK_RETRY_STEP * attempt).await;
                    attempt += 1;
                }
                Err(error) => {
                    tracing::error!(book_id, attempt, %error, "author link failed, giving up");
                    return Err(error);
                }
            }
        }
    }

    async fn publish<T: Serialize>(&self, kind: EventKind, entity: &T) -> Result<(), CatalogError> {
        let data = serde_json::to_value(entity).map_err(|e| CatalogError::Encode(kind, e))?;
        let event = Event::new(kind, data);

        self.publisher
            .publish(&self.config.topic, &event)
            .await
            .map_err(|source| {
                tracing::warn!(event_type = %kind, error = %source, "event not published");
                CatalogError::Publish { kind, source }
            })
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use async_trait::async_trait;
    use libris_events::MemoryBus;
    use std::sync::Mutex;

    /// In-memory store with generated ids and a log of link calls.
    #[derive(Default)]
    pub(crate) struct FakeStore {
        pub authors: Mutex<Vec<Author>>,
        pub books: Mutex<Vec<Book>>,
        pub link_calls: Mutex<Vec<(String, Vec<String>)>>,
        pub link_failures: Mutex<u32>,
        next_id: Mutex<u64>,
    }

    impl FakeStore {
        fn next_id(&self) -> String {
            let mut next = self.next_id.lock().unwrap();
            *next += 1;
            format!("{:024x}", *next)
        }

        pub(crate) fn failing_links(failures: u32) -> Self {
            let store = Self::default();
            *store.link_failures.lock().unwrap() = failures;
            store
        }
    }

    fn transient_error() -> StoreError {
        StoreError::Missing {
            collection: "authors",
            id: "transient".to_string(),
        }
    }

    #[async_trait]
    impl CatalogStore for FakeStore {
        async fn insert_author(&self, author: &NewAuthor) -> Result<String, StoreError> {
            let id = self.next_id();
            self.authors.lock().unwrap().push(Author {
                id: id.clone(),
                name: author.name.clone(),
                book_ids: author.book_ids.clone(),
            });
            Ok(id)
        }

        async fn find_author(&self, id: &str) -> Result<Option<Author>, StoreError> {
            Ok(self
                .authors
                .lock()
                .unwrap()
                .iter()
                .find(|a| a.id == id)
                .cloned())
        }

        async fn list_authors(&self, limit: i64) -> Result<Vec<Author>, StoreError> {
            let authors = self.authors.lock().unwrap();
            Ok(authors.iter().take(limit as usize).cloned().collect())
        }

        async fn insert_book(&self, book: &NewBook) -> Result<String, StoreError> {
            let id = self.next_id();
            self.books.lock().unwrap().push(Book {
                id: id.clone(),
                title: book.title.clone(),
                description: book.description.clone(),
                author_ids: book.author_ids.clone(),
            });
            Ok(id)
        }

        async fn find_book(&self, id: &str) -> Result<Option<Book>, StoreError> {
            Ok(self
                .books
                .lock()
                .unwrap()
                .iter()
                .find(|b| b.id == id)
                .cloned())
        }

        async fn list_books(&self, limit: i64) -> Result<Vec<Book>, StoreError> {
            let books = self.books.lock().unwrap();
            Ok(books.iter().take(limit as usize).cloned().collect())
        }

        async fn link_book_to_authors(
            &self,
            book_id: &str,
            author_ids: &[String],
        ) -> Result<u64, StoreError> {
            self.link_calls
                .lock()
                .unwrap()
                .push((book_id.to_string(), author_ids.to_vec()));

            {
                let mut failures = self.link_failures.lock().unwrap();
                if *failures > 0 {
                    *failures -= 1;
                    return Err(transient_error());
                }
            }

            let mut modified = 0;
            for author in self.authors.lock().unwrap().iter_mut() {
                if author_ids.contains(&author.id) && !author.book_ids.iter().any(|b| b == book_id)
                {
                    author.book_ids.push(book_id.to_string());
                    modified += 1;
                }
            }
            Ok(modified)
        }
    }

    fn service_with(store: Arc<FakeStore>) -> (CatalogService, libris_events::MemoryPublisher) {
        let (publisher, _source) = MemoryBus::channel();
        let service = CatalogService::new(
            store,
            Arc::new(publisher.clone()),
            CatalogConfig::default(),
        );
        (service, publisher)
    }

    fn new_author(name: &str) -> NewAuthor {
        NewAuthor {
            name: name.to_string(),
            book_ids: vec![],
        }
    }

    fn new_book(title: &str, author_ids: &[&str]) -> NewBook {
        NewBook {
            title: title.to_string(),
            description: "Novel".to_string(),
            author_ids: author_ids.iter().map(|id| id.to_string()).collect(),
        }
    }

    #[tokio::test]
    async fn created_authors_get_distinct_ids_and_empty_book_ids() {
        let (service, _) = service_with(Arc::new(FakeStore::default()));

        let first = service.create_author(new_author("Tolstoy")).await.unwrap();
        let second = service.create_author(new_author("Pushkin")).await.unwrap();

        assert!(!first.id.is_empty());
        assert_ne!(first.id, second.id);
        assert!(first.book_ids.is_empty());
    }

    #[tokio::test]
    async fn creating_an_author_publishes_one_event_with_text_id() {
        let (service, publisher) = service_with(Arc::new(FakeStore::default()));

        let author = service.create_author(new_author("Pushkin")).await.unwrap();

        let published = publisher.published();
        assert_eq!(published.len(), 1);
        let (topic, event) = &published[0];
        assert_eq!(topic, "library.events");
        assert_eq!(event.kind(), Some(EventKind::AuthorCreated));
        assert_eq!(event.data["_id"], author.id.as_str());
        assert_eq!(event.data["name"], "Pushkin");
    }

    #[tokio::test]
    async fn book_with_authors_links_them_in_one_bulk_update() {
        let store = Arc::new(FakeStore::default());
        let (service, publisher) = service_with(store.clone());
        let a = service.create_author(new_author("Ilf")).await.unwrap();
        let b = service.create_author(new_author("Petrov")).await.unwrap();

        let book = service
            .create_book(new_book("The Twelve Chairs", &[&a.id, &b.id]))
            .await
            .unwrap();

        let calls = store.link_calls.lock().unwrap().clone();
        assert_eq!(calls, vec![(book.id.clone(), vec![a.id.clone(), b.id.clone()])]);
        for author in store.authors.lock().unwrap().iter() {
            assert_eq!(author.book_ids, vec![book.id.clone()]);
        }

        let last = publisher.published().pop().unwrap().1;
        assert_eq!(last.kind(), Some(EventKind::BookCreated));
        assert_eq!(last.data["_id"], book.id.as_str());
    }

    #[tokio::test]
    async fn book_without_authors_skips_the_link_update() {
        let store = Arc::new(FakeStore::default());
        let (service, publisher) = service_with(store.clone());

        service
            .create_book(new_book("War and Peace", &[]))
            .await
            .unwrap();

        assert!(store.link_calls.lock().unwrap().is_empty());
        assert_eq!(publisher.published().len(), 1);
    }

    #[tokio::test]
    async fn unknown_author_ids_are_ignored() {
        let store = Arc::new(FakeStore::default());
        let (service, _) = service_with(store.clone());

        let book = service
            .create_book(new_book("Orphan", &["ffffffffffffffffffffffff"]))
            .await
            .unwrap();

        assert_eq!(book.author_ids, vec!["ffffffffffffffffffffffff"]);
        assert_eq!(store.link_calls.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn transient_link_failures_are_retried() {
        let store = Arc::new(FakeStore::failing_links(1));
        let (service, _) = service_with(store.clone());
        let author = service.create_author(new_author("Gogol")).await.unwrap();

        let book = service
            .create_book(new_book("Dead Souls", &[&author.id]))
            .await
            .unwrap();

        assert_eq!(store.link_calls.lock().unwrap().len(), 2);
        assert_eq!(
            store.authors.lock().unwrap()[0].book_ids,
            vec![book.id.clone()]
        );
    }

    #[tokio::test]
    async fn persistent_link_failure_surfaces_but_keeps_the_book() {
        let store = Arc::new(FakeStore::failing_links(10));
        let (service, publisher) = service_with(store.clone());

        let result = service
            .create_book(new_book("Lost Links", &["ffffffffffffffffffffffff"]))
            .await;

        assert!(matches!(result, Err(CatalogError::Store(_))));
        assert_eq!(store.link_calls.lock().unwrap().len(), 3);
        assert_eq!(store.books.lock().unwrap().len(), 1);
        assert!(publisher.published().is_empty());
    }

    #[tokio::test]
    async fn not_ready_publisher_is_reported_after_the_write() {
        let store = Arc::new(FakeStore::default());
        let (service, publisher) = service_with(store.clone());
        publisher.set_ready(false);

        let error = service
            .create_author(new_author("Bulgakov"))
            .await
            .unwrap_err();

        assert!(matches!(
            error,
            CatalogError::Publish {
                source: EventError::NotReady,
                ..
            }
        ));
        assert_eq!(store.authors.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn listing_is_capped() {
        let store = Arc::new(FakeStore::default());
        let (publisher, _source) = MemoryBus::channel();
        let service = CatalogService::new(
            store.clone(),
            Arc::new(publisher),
            CatalogConfig {
                list_limit: 2,
                ..CatalogConfig::default()
            },
        );
        for name in ["A", "B", "C"] {
            service.create_author(new_author(name)).await.unwrap();
        }

        assert_eq!(service.list_authors().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn blank_author_names_never_reach_the_store() {
        let store = Arc::new(FakeStore::default());
        let (service, publisher) = service_with(store.clone());

        let error = service.create_author(new_author(" ")).await.unwrap_err();

        assert!(matches!(error, CatalogError::Invalid { .. }));
        assert!(store.authors.lock().unwrap().is_empty());
        assert!(publisher.published().is_empty());
    }
}
