//! In-process transport backed by an unbounded channel.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::{Event, EventError, EventPublisher, EventSource, EventSubscriber};

/// Constructor for a connected publisher/source pair.
pub struct MemoryBus;

impl MemoryBus {
    pub fn channel() -> (MemoryPublisher, MemorySource) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (
            MemoryPublisher {
                sender,
                ready: Arc::new(AtomicBool::new(true)),
                published: Arc::new(Mutex::new(Vec::new())),
            },
            MemorySource { receiver },
        )
    }
}

/// Publisher half. Keeps a log of everything it accepted.
#[derive(Clone)]
pub struct MemoryPublisher {
    sender: mpsc::UnboundedSender<(String, Event)>,
    ready: Arc<AtomicBool>,
    published: Arc<Mutex<Vec<(String, Event)>>>,
}

impl MemoryPublisher {
    /// Toggle readiness; a publisher that is not ready rejects every event.
    pub fn set_ready(&self, ready: bool) {
        self.ready.store(ready, Ordering::SeqCst);
    }

    /// `(topic, event)` pairs accepted so far, in publish order.
    pub fn published(&self) -> Vec<(String, Event)> {
        self.published
            .lock()
            .map(|log| log.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl EventPublisher for MemoryPublisher {
    async fn publish(&self, topic: &str, event: &Event) -> Result<(), EventError> {
        if !self.ready.load(Ordering::SeqCst) {
            return Err(EventError::NotReady);
        }
        if let Ok(mut log) = self.published.lock() {
            log.push((topic.to_string(), event.clone()));
        }
        // A dropped source only means nobody is listening.
        let _ = self.sender.send((topic.to_string(), event.clone()));
        Ok(())
    }
}

/// Source half; ends once every publisher clone has been dropped.
pub struct MemorySource {
    receiver: mpsc::UnboundedReceiver<(String, Event)>,
}

#[async_trait]
impl EventSource for MemorySource {
    async fn next_event(&mut self) -> Result<Option<Event>, EventError> {
        Ok(self.receiver.recv().await.map(|(_, event)| event))
    }

    async fn close(&mut self) -> Result<(), EventError> {
        self.receiver.close();
        Ok(())
    }
}

/// Hands out a single pre-built [`MemorySource`]; later subscriptions fail.
pub struct MemorySubscriber {
    source: tokio::sync::Mutex<Option<MemorySource>>,
}

impl MemorySubscriber {
    pub fn new(source: MemorySource) -> Self {
        Self {
            source: tokio::sync::Mutex::new(Some(source)),
        }
    }
}

#[async_trait]
impl EventSubscriber for MemorySubscriber {
    async fn subscribe(
        &self,
        _topic: &str,
        _group: &str,
    ) -> Result<Box<dyn EventSource>, EventError> {
        let source = self.source.lock().await.take().ok_or(EventError::NotReady)?;
        Ok(Box::new(source))
    }
}
