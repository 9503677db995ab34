//! Document store integration: client factory, collection names and the
//! `db` core module that owns the connection for a service's lifetime.

use async_trait::async_trait;
use libris_kernel::{settings::DatabaseSettings, InitCtx, Module};
use mongodb::{
    bson::{doc, oid::ObjectId},
    Client, Database,
};
use thiserror::Error;

pub const AUTHORS_COLLECTION: &str = "authors";
pub const BOOKS_COLLECTION: &str = "books";

#[derive(Debug, Error)]
pub enum DbError {
    #[error("invalid database url: {0}")]
    InvalidUrl(#[source] mongodb::error::Error),

    #[error("database unreachable: {0}")]
    Unreachable(#[source] mongodb::error::Error),
}

/// Build a client for the configured store.
///
/// The driver connects lazily, so this only fails on a malformed URL.
pub async fn connect(settings: &DatabaseSettings) -> Result<(Client, Database), DbError> {
    let client = Client::with_uri_str(&settings.url)
        .await
        .map_err(DbError::InvalidUrl)?;
    let database = client.database(&settings.name);
    Ok((client, database))
}

/// Round-trip a `ping` command to verify the store is reachable.
pub async fn ping(database: &Database) -> Result<(), DbError> {
    database
        .run_command(doc! { "ping": 1 })
        .await
        .map_err(DbError::Unreachable)?;
    Ok(())
}

/// Parse textual identifiers, dropping anything that is not a valid object id.
///
/// Order is preserved and duplicates are removed.
pub fn parse_object_ids<S: AsRef<str>>(ids: &[S]) -> Vec<ObjectId> {
    let mut parsed: Vec<ObjectId> = Vec::with_capacity(ids.len());
    for id in ids {
        match ObjectId::parse_str(id.as_ref()) {
            Ok(oid) if !parsed.contains(&oid) => parsed.push(oid),
            Ok(_) => {}
            Err(_) => {
                tracing::debug!(target: "libris-db", id = id.as_ref(), "skipping invalid object id");
            }
        }
    }
    parsed
}

/// Core module owning the store connection.
pub struct DbModule {
    client: Client,
    database: Database,
}

impl DbModule {
    pub async fn connect(settings: &DatabaseSettings) -> Result<Self, DbError> {
        let (client, database) = connect(settings).await?;
        Ok(Self { client, database })
    }

    pub fn database(&self) -> Database {
        self.database.clone()
    }
}

#[async_trait]
impl Module for DbModule {
    fn name(&self) -> &'static str {
        "db"
    }

    async fn start(&self, ctx: &InitCtx<'_>) -> anyhow::Result<()> {
        ping(&self.database).await?;
        tracing::info!(
            target: "libris-db",
            database = %ctx.settings.database.name,
            "document store connected"
        );
        Ok(())
    }

    async fn stop(&self) -> anyhow::Result<()> {
        tracing::info!(target: "libris-db", "closing document store connection");
        self.client.clone().shutdown().await;
        Ok(())
    }
}
