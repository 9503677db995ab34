//! Event bus primitives.
//!
//! Writers publish an [`Event`] envelope to a named topic through an
//! [`EventPublisher`]; readers pull envelopes from an [`EventSource`]. Two
//! transports are provided: AMQP (durable fanout exchange per topic, one
//! durable queue per consumer group) and an in-process channel.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod amqp;
pub mod memory;

pub use amqp::{AmqpPublisher, AmqpSource, AmqpSubscriber, EventsModule};
pub use memory::{MemoryBus, MemoryPublisher, MemorySource, MemorySubscriber};

/// Kinds of events the catalog emits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    AuthorCreated,
    BookCreated,
}

impl EventKind {
    pub const fn as_str(&self) -> &'static str {
        match self {
            EventKind::AuthorCreated => "author_created",
            EventKind::BookCreated => "book_created",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "author_created" => Some(EventKind::AuthorCreated),
            "book_created" => Some(EventKind::BookCreated),
            _ => None,
        }
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Wire envelope: `{"event": "<type>", "data": {...}}`.
///
/// The type stays a plain string so that readers can skip kinds they do not
/// know instead of failing to decode.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    #[serde(rename = "event")]
    pub event_type: String,
    #[serde(default)]
    pub data: serde_json::Value,
}

impl Event {
    pub fn new(kind: EventKind, data: serde_json::Value) -> Self {
        Self {
            event_type: kind.as_str().to_string(),
            data,
        }
    }

    /// The recognised kind, if any.
    pub fn kind(&self) -> Option<EventKind> {
        EventKind::parse(&self.event_type)
    }
}

#[derive(Debug, Error)]
pub enum EventError {
    /// No publisher connection is attached (startup or shutdown in progress).
    #[error("event publisher is not ready")]
    NotReady,

    #[error("broker connection error: {0}")]
    Connection(#[from] lapin::Error),

    #[error("event serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("broker rejected event for topic '{topic}'")]
    Nacked { topic: String },
}

/// Sends events to the bus.
#[async_trait]
pub trait EventPublisher: Send + Sync {
    /// Publish `event` to `topic`, resolving once the broker has accepted it.
    async fn publish(&self, topic: &str, event: &Event) -> Result<(), EventError>;
}

/// Yields events from a subscription.
#[async_trait]
pub trait EventSource: Send {
    /// Next event, or `None` once the subscription has ended.
    async fn next_event(&mut self) -> Result<Option<Event>, EventError>;

    /// Release the subscription.
    async fn close(&mut self) -> Result<(), EventError> {
        Ok(())
    }
}

/// Opens subscriptions; lets a long-running reader connect when its owner starts.
#[async_trait]
pub trait EventSubscriber: Send + Sync {
    async fn subscribe(&self, topic: &str, group: &str)
        -> Result<Box<dyn EventSource>, EventError>;
}
