//! HTTP client for an Elasticsearch-compatible index service.

use std::sync::Arc;

use async_trait::async_trait;
use libris_kernel::{InitCtx, Module};
use reqwest::{StatusCode, Url};
use serde_json::{json, Value};

use crate::{IndexError, IndexName, SearchIndex};

#[derive(Clone)]
pub struct ElasticIndex {
    client: reqwest::Client,
    base_url: Url,
}

impl ElasticIndex {
    pub fn new(base_url: &str) -> Result<Self, IndexError> {
        let base_url =
            Url::parse(base_url).map_err(|e| IndexError::InvalidUrl(format!("{base_url}: {e}")))?;
        if base_url.cannot_be_a_base() {
            return Err(IndexError::InvalidUrl(base_url.to_string()));
        }
        Ok(Self {
            client: reqwest::Client::new(),
            base_url,
        })
    }

    fn endpoint(&self, segments: &[&str]) -> Result<Url, IndexError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| IndexError::InvalidUrl(self.base_url.to_string()))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    /// Check that the service answers at all.
    pub async fn ping(&self) -> Result<(), IndexError> {
        let response = self.client.get(self.base_url.clone()).send().await?;
        if response.status().is_success() {
            Ok(())
        } else {
            Err(status_error(response).await)
        }
    }
}

async fn status_error(response: reqwest::Response) -> IndexError {
    let status = response.status().as_u16();
    let body = response.text().await.unwrap_or_default();
    IndexError::Status { status, body }
}

#[async_trait]
impl SearchIndex for ElasticIndex {
    async fn upsert(&self, index: IndexName, id: &str, document: &Value) -> Result<(), IndexError> {
        let url = self.endpoint(&[index.as_str(), "_doc", id])?;
        let response = self.client.put(url).json(document).send().await?;

        if !response.status().is_success() {
            return Err(status_error(response).await);
        }

        tracing::info!(target: "libris-index", %index, doc_id = id, "document indexed");
        Ok(())
    }

    async fn search(&self, index: IndexName, query: &Value) -> Result<Vec<Value>, IndexError> {
        let url = self.endpoint(&[index.as_str(), "_search"])?;
        let response = self
            .client
            .post(url)
            .json(&json!({ "query": query }))
            .send()
            .await?;

        match response.status() {
            StatusCode::NOT_FOUND => return Err(IndexError::IndexNotFound(index.to_string())),
            status if !status.is_success() => return Err(status_error(response).await),
            _ => {}
        }

        let body: Value = response.json().await?;
        let documents = body["hits"]["hits"]
            .as_array()
            .map(|hits| {
                hits.iter()
                    .filter_map(|hit| hit.get("_source").cloned())
                    .collect()
            })
            .unwrap_or_default();

        Ok(documents)
    }
}

/// Core module announcing the index client; reachability problems are logged
/// but do not block startup since the index may come up later.
pub struct IndexModule {
    index: Arc<ElasticIndex>,
}

impl IndexModule {
    pub fn new(index: Arc<ElasticIndex>) -> Self {
        Self { index }
    }
}

#[async_trait]
impl Module for IndexModule {
    fn name(&self) -> &'static str {
        "index"
    }

    async fn start(&self, ctx: &InitCtx<'_>) -> anyhow::Result<()> {
        match self.index.ping().await {
            Ok(()) => tracing::info!(
                target: "libris-index",
                url = %ctx.settings.search.url,
                "search index reachable"
            ),
            Err(error) => tracing::warn!(
                target: "libris-index",
                url = %ctx.settings.search.url,
                %error,
                "search index not reachable yet"
            ),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{
        extract::{Path, State},
        http::StatusCode as HttpStatus,
        routing::{post, put},
        Json, Router,
    };
    use std::sync::Mutex;

    type Recorded = Arc<Mutex<Vec<(String, String, Value)>>>;

    async fn put_doc(
        State(recorded): State<Recorded>,
        Path((index, id)): Path<(String, String)>,
        Json(body): Json<Value>,
    ) -> HttpStatus {
        recorded.lock().unwrap().push((index, id, body));
        HttpStatus::CREATED
    }

    async fn search_doc(Path(index): Path<String>) -> Result<Json<Value>, HttpStatus> {
        if index == "authors" {
            return Err(HttpStatus::NOT_FOUND);
        }
        Ok(Json(json!({
            "hits": {
                "hits": [
                    {"_id": "b1", "_source": {"title": "War and Peace"}},
                    {"_id": "b2", "_source": {"title": "Anna Karenina"}}
                ]
            }
        })))
    }

    async fn spawn_fake_index() -> (String, Recorded) {
        let recorded: Recorded = Arc::new(Mutex::new(Vec::new()));
        let app = Router::new()
            .route("/{index}/_doc/{id}", put(put_doc))
            .route("/{index}/_search", post(search_doc))
            .with_state(recorded.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        (format!("http://{}", addr), recorded)
    }

    #[test]
    fn rejects_unparseable_base_url() {
        assert!(matches!(
            ElasticIndex::new("not a url"),
            Err(IndexError::InvalidUrl(_))
        ));
    }

    #[tokio::test]
    async fn upsert_puts_document_under_its_id() {
        let (url, recorded) = spawn_fake_index().await;
        let index = ElasticIndex::new(&url).unwrap();

        index
            .upsert(IndexName::Books, "b1", &json!({"title": "War and Peace"}))
            .await
            .unwrap();

        let recorded = recorded.lock().unwrap().clone();
        assert_eq!(
            recorded,
            vec![(
                "books".to_string(),
                "b1".to_string(),
                json!({"title": "War and Peace"})
            )]
        );
    }

    #[tokio::test]
    async fn search_returns_document_bodies() {
        let (url, _) = spawn_fake_index().await;
        let index = ElasticIndex::new(&url).unwrap();

        let documents = index
            .search(IndexName::Books, &crate::keyword_query("war"))
            .await
            .unwrap();

        assert_eq!(
            documents,
            vec![json!({"title": "War and Peace"}), json!({"title": "Anna Karenina"})]
        );
    }

    #[tokio::test]
    async fn search_on_missing_index_reports_not_found() {
        let (url, _) = spawn_fake_index().await;
        let index = ElasticIndex::new(&url).unwrap();

        let result = index
            .search(IndexName::Authors, &crate::keyword_query("war"))
            .await;

        assert!(matches!(result, Err(IndexError::IndexNotFound(name)) if name == "authors"));
    }
}
