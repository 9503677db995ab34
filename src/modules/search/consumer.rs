//! Background indexing of catalog events.

use std::sync::Arc;

use libris_events::{Event, EventError, EventKind, EventSource};
use libris_index::{split_document_id, IndexError, IndexName, SearchIndex};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Error)]
pub enum ConsumerError {
    #[error("indexing failed: {0}")]
    Index(#[from] IndexError),

    #[error("event source failed: {0}")]
    Source(#[from] EventError),
}

/// Target index for an event kind.
pub fn index_for(kind: EventKind) -> IndexName {
    match kind {
        EventKind::AuthorCreated => IndexName::Authors,
        EventKind::BookCreated => IndexName::Books,
    }
}

/// Writes created entities into the index named by their event kind.
#[derive(Clone)]
pub struct IndexConsumer {
    index: Arc<dyn SearchIndex>,
}

impl IndexConsumer {
    pub fn new(index: Arc<dyn SearchIndex>) -> Self {
        Self { index }
    }

    /// Index one event. Returns whether a document was written.
    pub async fn apply(&self, event: &Event) -> Result<bool, IndexError> {
        let Some(kind) = event.kind() else {
            tracing::debug!(event_type = %event.event_type, "ignoring unknown event");
            return Ok(false);
        };

        let (id, document) = match split_document_id(event.data.clone()) {
            Ok(split) => split,
            Err(error) => {
                tracing::warn!(event_type = %kind, %error, "skipping event payload");
                return Ok(false);
            }
        };

        let index = index_for(kind);
        self.index.upsert(index, &id, &document).await?;
        tracing::info!(event_type = %kind, %index, doc_id = %id, "event indexed");
        Ok(true)
    }

    /// Consume `source` until it ends, `cancel` fires, or indexing fails.
    /// The source is closed on every exit path.
    pub async fn run(
        &self,
        mut source: Box<dyn EventSource>,
        cancel: CancellationToken,
    ) -> Result<(), ConsumerError> {
        let outcome = self.drain(source.as_mut(), &cancel).await;

        if let Err(error) = source.close().await {
            tracing::warn!(%error, "failed to close event subscription");
        }

        match &outcome {
            Ok(()) => tracing::info!("index consumer stopped"),
            Err(error) => tracing::error!(%error, "index consumer terminated"),
        }
        outcome
    }

    async fn drain(
        &self,
        source: &mut dyn EventSource,
        cancel: &CancellationToken,
    ) -> Result<(), ConsumerError> {
        loop {
            let next = tokio::select! {
                _ = cancel.cancelled() => return Ok(()),
                next = source.next_event() => next?,
            };

            match next {
                Some(event) => {
                    self.apply(&event).await?;
                }
                None => return Ok(()),
            }
        }
    }
}
