//! Keyword search and bulk reindexing.

use std::sync::Arc;

use libris_http::error::AppError;
use libris_index::{keyword_query, split_document_id, IndexError, IndexName, SearchIndex};
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

use super::source::CatalogSource;

#[derive(Debug, Error)]
pub enum SearchError {
    #[error("search index failure: {0}")]
    Index(#[from] IndexError),
}

impl From<SearchError> for AppError {
    fn from(error: SearchError) -> Self {
        AppError::Internal(error.into())
    }
}

/// Hits per index for a query run against every index.
#[derive(Debug, Default, Serialize, PartialEq)]
pub struct SearchAllResults {
    pub books: Vec<Value>,
    pub authors: Vec<Value>,
}

/// Documents written per index by a reindex run.
#[derive(Debug, Default, Clone, Copy, Serialize, PartialEq, Eq)]
pub struct ReindexReport {
    pub books: usize,
    pub authors: usize,
}

pub struct SearchService {
    index: Arc<dyn SearchIndex>,
    source: Arc<dyn CatalogSource>,
}

impl SearchService {
    pub fn new(index: Arc<dyn SearchIndex>, source: Arc<dyn CatalogSource>) -> Self {
        Self { index, source }
    }

    /// Keyword search over one index. An index that does not exist yet has no hits.
    pub async fn search(&self, query: &str, index: IndexName) -> Result<Vec<Value>, SearchError> {
        match self.index.search(index, &keyword_query(query)).await {
            Ok(hits) => Ok(hits),
            Err(IndexError::IndexNotFound(_)) => {
                tracing::debug!(%index, "index missing, returning no hits");
                Ok(Vec::new())
            }
            Err(error) => Err(error.into()),
        }
    }

    pub async fn search_all(&self, query: &str) -> Result<SearchAllResults, SearchError> {
        Ok(SearchAllResults {
            books: self.search(query, IndexName::Books).await?,
            authors: self.search(query, IndexName::Authors).await?,
        })
    }

    /// Rebuild both indices from the core API listings.
    ///
    /// A listing that cannot be fetched counts as empty. Entries without a
    /// textual identifier are skipped. A failed index write aborts the run.
    pub async fn reindex(&self) -> Result<ReindexReport, SearchError> {
        let report = ReindexReport {
            books: self.reindex_one(IndexName::Books).await?,
            authors: self.reindex_one(IndexName::Authors).await?,
        };
        tracing::info!(books = report.books, authors = report.authors, "reindex complete");
        Ok(report)
    }

    async fn reindex_one(&self, index: IndexName) -> Result<usize, SearchError> {
        let entities = match self.source.fetch_all(index).await {
            Ok(entities) => entities,
            Err(error) => {
                tracing::warn!(%index, %error, "core api listing unavailable, indexing nothing");
                return Ok(0);
            }
        };

        let mut indexed = 0;
        for entity in entities {
            let (id, document) = match split_document_id(entity) {
                Ok(split) => split,
                Err(error) => {
                    tracing::warn!(%index, %error, "skipping listing entry");
                    continue;
                }
            };
            self.index.upsert(index, &id, &document).await?;
            indexed += 1;
        }
        Ok(indexed)
    }
}
