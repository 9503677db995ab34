use std::sync::Arc;

use axum::{
    extract::{rejection::QueryRejection, Query, State},
    Json,
};
use libris_http::error::AppError;
use libris_index::IndexName;
use serde::Deserialize;
use serde_json::{json, Value};

use super::service::{SearchAllResults, SearchService};

pub type SearchState = State<Arc<SearchService>>;

#[derive(Debug, Deserialize)]
pub struct SearchParams {
    pub query: String,
    #[serde(default)]
    pub index: IndexName,
}

#[derive(Debug, Deserialize)]
pub struct SearchAllParams {
    pub query: String,
}

pub async fn search(
    State(service): SearchState,
    params: Result<Query<SearchParams>, QueryRejection>,
) -> Result<Json<Vec<Value>>, AppError> {
    let Query(params) = params?;
    Ok(Json(service.search(&params.query, params.index).await?))
}

pub async fn search_all(
    State(service): SearchState,
    params: Result<Query<SearchAllParams>, QueryRejection>,
) -> Result<Json<SearchAllResults>, AppError> {
    let Query(params) = params?;
    Ok(Json(service.search_all(&params.query).await?))
}

pub async fn reindex(State(service): SearchState) -> Result<Json<Value>, AppError> {
    let report = service.reindex().await?;
    Ok(Json(json!({
        "message": "Reindex complete",
        "indexed": report,
    })))
}
