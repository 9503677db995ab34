use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    Json,
};
use libris_http::error::AppError;

use super::models::{Author, Book, NewAuthor, NewBook};
use super::service::CatalogService;

pub type CatalogState = State<Arc<CatalogService>>;

pub async fn create_author(
    State(service): CatalogState,
    payload: Result<Json<NewAuthor>, JsonRejection>,
) -> Result<(StatusCode, Json<Author>), AppError> {
    let Json(author) = payload?;
    let created = service.create_author(author).await?;
    Ok((StatusCode::CREATED, Json(created)))
}

pub async fn list_authors(State(service): CatalogState) -> Result<Json<Vec<Author>>, AppError> {
    Ok(Json(service.list_authors().await?))
}

pub async fn create_book(
    State(service): CatalogState,
    payload: Result<Json<NewBook>, JsonRejection>,
) -> Result<(StatusCode, Json<Book>), AppError> {
    let Json(book) = payload?;
    let created = service.create_book(book).await?;
    Ok((StatusCode::CREATED, Json(created)))
}

pub async fn list_books(State(service): CatalogState) -> Result<Json<Vec<Book>>, AppError> {
    Ok(Json(service.list_books().await?))
}
