//! Core API: authors and books.

pub mod handlers;
pub mod models;
pub mod service;
pub mod store;

use std::sync::Arc;

use async_trait::async_trait;
use axum::{routing::get, Router};
use libris_kernel::{InitCtx, Module};
use serde_json::json;

pub use service::{CatalogConfig, CatalogError, CatalogService};
pub use store::{CatalogStore, MongoCatalogStore, StoreError};

/// Catalog module serving `/authors/` and `/books/`.
pub struct CatalogModule {
    service: Arc<CatalogService>,
}

impl CatalogModule {
    pub fn new(service: Arc<CatalogService>) -> Self {
        Self { service }
    }
}

#[async_trait]
impl Module for CatalogModule {
    fn name(&self) -> &'static str {
        "catalog"
    }

    async fn init(&self, ctx: &InitCtx<'_>) -> anyhow::Result<()> {
        tracing::info!(
            module = self.name(),
            environment = ?ctx.settings.environment,
            topic = %ctx.settings.broker.topic,
            "catalog module initialized"
        );
        Ok(())
    }

    fn routes(&self) -> Router {
        Router::new()
            .route(
                "/authors/",
                get(handlers::list_authors).post(handlers::create_author),
            )
            .route(
                "/books/",
                get(handlers::list_books).post(handlers::create_book),
            )
            .with_state(self.service.clone())
    }

    fn openapi(&self) -> Option<serde_json::Value> {
        let error_response = |description: &str| {
            json!({
                "description": description,
                "content": {
                    "application/json": {
                        "schema": { "$ref": "#/components/schemas/ErrorResponse" }
                    }
                }
            })
        };
        let json_body = |schema: &str| {
            json!({
                "application/json": {
                    "schema": { "$ref": format!("#/components/schemas/{schema}") }
                }
            })
        };
        let json_list = |schema: &str| {
            json!({
                "application/json": {
                    "schema": {
                        "type": "array",
                        "items": { "$ref": format!("#/components/schemas/{schema}") }
                    }
                }
            })
        };

        Some(json!({
            "paths": {
                "/authors/": {
                    "get": {
                        "summary": "List authors (at most 100)",
                        "tags": ["Library"],
                        "responses": {
                            "200": { "description": "Authors", "content": json_list("Author") },
                            "500": error_response("Internal server error")
                        }
                    },
                    "post": {
                        "summary": "Create an author",
                        "tags": ["Library"],
                        "requestBody": { "required": true, "content": json_body("NewAuthor") },
                        "responses": {
                            "201": { "description": "Stored author", "content": json_body("Author") },
                            "422": error_response("Validation error"),
                            "503": error_response("Stored, but the creation event could not be published")
                        }
                    }
                },
                "/books/": {
                    "get": {
                        "summary": "List books (at most 100)",
                        "tags": ["Library"],
                        "responses": {
                            "200": { "description": "Books", "content": json_list("Book") },
                            "500": error_response("Internal server error")
                        }
                    },
                    "post": {
                        "summary": "Create a book and link it to its authors",
                        "tags": ["Library"],
                        "requestBody": { "required": true, "content": json_body("NewBook") },
                        "responses": {
                            "201": { "description": "Stored book", "content": json_body("Book") },
                            "422": error_response("Validation error"),
                            "503": error_response("Stored, but the creation event could not be published")
                        }
                    }
                }
            },
            "components": {
                "schemas": {
                    "Author": {
                        "type": "object",
                        "properties": {
                            "_id": { "type": "string" },
                            "name": { "type": "string" },
                            "book_ids": { "type": "array", "items": { "type": "string" } }
                        },
                        "required": ["_id", "name", "book_ids"]
                    },
                    "NewAuthor": {
                        "type": "object",
                        "properties": {
                            "name": { "type": "string" },
                            "book_ids": { "type": "array", "items": { "type": "string" } }
                        },
                        "required": ["name"]
                    },
                    "Book": {
                        "type": "object",
                        "properties": {
                            "_id": { "type": "string" },
                            "title": { "type": "string" },
                            "description": { "type": "string" },
                            "author_ids": { "type": "array", "items": { "type": "string" } }
                        },
                        "required": ["_id", "title", "description", "author_ids"]
                    },
                    "NewBook": {
                        "type": "object",
                        "properties": {
                            "title": { "type": "string" },
                            "description": { "type": "string" },
                            "author_ids": { "type": "array", "items": { "type": "string" } }
                        },
                        "required": ["title", "description"]
                    }
                }
            }
        }))
    }

    async fn start(&self, _ctx: &InitCtx<'_>) -> anyhow::Result<()> {
        tracing::info!(module = self.name(), "catalog module started");
        Ok(())
    }

    async fn stop(&self) -> anyhow::Result<()> {
        tracing::info!(module = self.name(), "catalog module stopped");
        Ok(())
    }
}
