//! Read access to the core API listings used by reindexing.

use async_trait::async_trait;
use libris_index::IndexName;
use reqwest::Url;
use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("invalid core api url: {0}")]
    InvalidUrl(String),

    #[error("core api request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("core api returned {0}")]
    Status(u16),
}

/// Where reindexing reads the authoritative catalog from.
#[async_trait]
pub trait CatalogSource: Send + Sync {
    /// Every entity of the kind stored in `index`, as the core API renders it.
    async fn fetch_all(&self, index: IndexName) -> Result<Vec<Value>, SourceError>;
}

/// [`CatalogSource`] over the core API's list endpoints.
#[derive(Clone)]
pub struct CoreApiClient {
    client: reqwest::Client,
    base_url: Url,
}

impl CoreApiClient {
    pub fn new(base_url: &str) -> Result<Self, SourceError> {
        let base_url =
            Url::parse(base_url).map_err(|e| SourceError::InvalidUrl(format!("{base_url}: {e}")))?;
        if base_url.cannot_be_a_base() {
            return Err(SourceError::InvalidUrl(base_url.to_string()));
        }
        Ok(Self {
            client: reqwest::Client::new(),
            base_url,
        })
    }

    /// `{base}/books/` or `{base}/authors/`.
    fn listing_url(&self, index: IndexName) -> Result<Url, SourceError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| SourceError::InvalidUrl(self.base_url.to_string()))?
            .pop_if_empty()
            .push(index.as_str())
            .push("");
        Ok(url)
    }
}

#[async_trait]
impl CatalogSource for CoreApiClient {
    async fn fetch_all(&self, index: IndexName) -> Result<Vec<Value>, SourceError> {
        let url = self.listing_url(index)?;
        let response = self.client.get(url).send().await?;

        let status = response.status();
        if !status.is_success() {
            return Err(SourceError::Status(status.as_u16()));
        }

        Ok(response.json().await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{http::StatusCode, routing::get, Json, Router};
    use serde_json::json;

    async fn serve(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{addr}")
    }

    #[test]
    fn listing_urls_keep_the_trailing_slash() {
        let client = CoreApiClient::new("http://core:8000").unwrap();
        assert_eq!(
            client.listing_url(IndexName::Books).unwrap().as_str(),
            "http://core:8000/books/"
        );

        let client = CoreApiClient::new("http://core:8000/api/").unwrap();
        assert_eq!(
            client.listing_url(IndexName::Authors).unwrap().as_str(),
            "http://core:8000/api/authors/"
        );
    }

    #[test]
    fn rejects_unusable_base_urls() {
        assert!(matches!(
            CoreApiClient::new("not a url"),
            Err(SourceError::InvalidUrl(_))
        ));
        assert!(matches!(
            CoreApiClient::new("mailto:core@example.com"),
            Err(SourceError::InvalidUrl(_))
        ));
    }

    #[tokio::test]
    async fn fetches_listings_from_the_core_api() {
        let router = Router::new()
            .route(
                "/books/",
                get(|| async { Json(json!([{"_id": "b1", "title": "War and Peace"}])) }),
            )
            .route("/authors/", get(|| async { Json(json!([])) }));
        let client = CoreApiClient::new(&serve(router).await).unwrap();

        let books = client.fetch_all(IndexName::Books).await.unwrap();
        assert_eq!(books, vec![json!({"_id": "b1", "title": "War and Peace"})]);
        assert!(client.fetch_all(IndexName::Authors).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn non_success_status_is_an_error() {
        let router = Router::new().route(
            "/books/",
            get(|| async { (StatusCode::INTERNAL_SERVER_ERROR, "boom") }),
        );
        let client = CoreApiClient::new(&serve(router).await).unwrap();

        let result = client.fetch_all(IndexName::Books).await;
        assert!(matches!(result, Err(SourceError::Status(500))));
    }
}
