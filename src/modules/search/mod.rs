//! Search API and the background index consumer.

pub mod consumer;
pub mod handlers;
pub mod service;
pub mod source;

use std::sync::Arc;

use async_trait::async_trait;
use axum::{
    routing::{get, post},
    Router,
};
use libris_events::EventSubscriber;
use libris_kernel::{InitCtx, Module};
use serde_json::json;
use tokio::{sync::Mutex, task::JoinHandle};
use tokio_util::sync::CancellationToken;

pub use consumer::{ConsumerError, IndexConsumer};
pub use service::{ReindexReport, SearchAllResults, SearchError, SearchService};
pub use source::{CatalogSource, CoreApiClient, SourceError};

type ConsumerTask = (CancellationToken, JoinHandle<Result<(), ConsumerError>>);

/// Search module serving `/search/`, `/search/all/` and `/reindex/`, and
/// owning the index consumer task.
pub struct SearchModule {
    service: Arc<SearchService>,
    subscriber: Arc<dyn EventSubscriber>,
    consumer: IndexConsumer,
    task: Mutex<Option<ConsumerTask>>,
}

impl SearchModule {
    pub fn new(
        service: Arc<SearchService>,
        subscriber: Arc<dyn EventSubscriber>,
        consumer: IndexConsumer,
    ) -> Self {
        Self {
            service,
            subscriber,
            consumer,
            task: Mutex::new(None),
        }
    }
}

#[async_trait]
impl Module for SearchModule {
    fn name(&self) -> &'static str {
        "search"
    }

    fn routes(&self) -> Router {
        Router::new()
            .route("/search/", get(handlers::search))
            .route("/search/all/", get(handlers::search_all))
            .route("/reindex/", post(handlers::reindex))
            .with_state(self.service.clone())
    }

    fn openapi(&self) -> Option<serde_json::Value> {
        let query_param = json!({
            "name": "query",
            "in": "query",
            "required": true,
            "schema": { "type": "string" }
        });
        let hits = json!({
            "type": "array",
            "items": { "type": "object" }
        });
        let internal = json!({
            "description": "Internal server error",
            "content": {
                "application/json": {
                    "schema": { "$ref": "#/components/schemas/ErrorResponse" }
                }
            }
        });

        Some(json!({
            "paths": {
                "/search/": {
                    "get": {
                        "summary": "Keyword search over one index",
                        "tags": ["Search"],
                        "parameters": [
                            query_param,
                            {
                                "name": "index",
                                "in": "query",
                                "required": false,
                                "schema": { "type": "string", "enum": ["books", "authors"], "default": "books" }
                            }
                        ],
                        "responses": {
                            "200": {
                                "description": "Matched documents",
                                "content": { "application/json": { "schema": hits } }
                            },
                            "400": {
                                "description": "Missing query or unknown index",
                                "content": {
                                    "application/json": {
                                        "schema": { "$ref": "#/components/schemas/ErrorResponse" }
                                    }
                                }
                            },
                            "500": internal
                        }
                    }
                },
                "/search/all/": {
                    "get": {
                        "summary": "Keyword search over books and authors",
                        "tags": ["Search"],
                        "parameters": [query_param],
                        "responses": {
                            "200": {
                                "description": "Matched documents per index",
                                "content": {
                                    "application/json": {
                                        "schema": { "$ref": "#/components/schemas/SearchAllResults" }
                                    }
                                }
                            },
                            "500": internal
                        }
                    }
                },
                "/reindex/": {
                    "post": {
                        "summary": "Rebuild the indices from the core API",
                        "tags": ["Search"],
                        "responses": {
                            "200": {
                                "description": "Documents indexed per type",
                                "content": {
                                    "application/json": {
                                        "schema": { "$ref": "#/components/schemas/ReindexResponse" }
                                    }
                                }
                            },
                            "500": internal
                        }
                    }
                }
            },
            "components": {
                "schemas": {
                    "SearchAllResults": {
                        "type": "object",
                        "properties": { "books": hits, "authors": hits },
                        "required": ["books", "authors"]
                    },
                    "ReindexResponse": {
                        "type": "object",
                        "properties": {
                            "message": { "type": "string" },
                            "indexed": {
                                "type": "object",
                                "properties": {
                                    "books": { "type": "integer", "minimum": 0 },
                                    "authors": { "type": "integer", "minimum": 0 }
                                },
                                "required": ["books", "authors"]
                            }
                        },
                        "required": ["message", "indexed"]
                    }
                }
            }
        }))
    }

    async fn start(&self, ctx: &InitCtx<'_>) -> anyhow::Result<()> {
        let broker = &ctx.settings.broker;
        let source = self
            .subscriber
            .subscribe(&broker.topic, &broker.consumer_group)
            .await?;

        let cancel = CancellationToken::new();
        let consumer = self.consumer.clone();
        let handle = tokio::spawn({
            let cancel = cancel.clone();
            async move { consumer.run(source, cancel).await }
        });

        *self.task.lock().await = Some((cancel, handle));
        tracing::info!(
            module = self.name(),
            topic = %broker.topic,
            group = %broker.consumer_group,
            "index consumer started"
        );
        Ok(())
    }

    async fn stop(&self) -> anyhow::Result<()> {
        let Some((cancel, handle)) = self.task.lock().await.take() else {
            return Ok(());
        };

        cancel.cancel();
        // Consumer errors are logged by the consumer itself.
        if let Err(error) = handle.await {
            tracing::error!(%error, "index consumer task panicked");
        }
        tracing::info!(module = self.name(), "search module stopped");
        Ok(())
    }
}
