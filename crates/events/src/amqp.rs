//! AMQP transport.
//!
//! A topic maps to a durable fanout exchange of the same name. A consumer
//! group maps to a durable queue bound to that exchange, so every process
//! subscribing under the same group shares one stream of deliveries.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::StreamExt;
use lapin::{
    options::{
        BasicAckOptions, BasicConsumeOptions, BasicPublishOptions, ConfirmSelectOptions,
        ExchangeDeclareOptions, QueueBindOptions, QueueDeclareOptions,
    },
    types::FieldTable,
    BasicProperties, Channel, Connection, ConnectionProperties, Consumer, ExchangeKind,
};
use libris_kernel::{InitCtx, Module};
use tokio::sync::{Mutex, RwLock};

use crate::{Event, EventError, EventPublisher, EventSource, EventSubscriber};

const CLOSE_REPLY_SUCCESS: u16 = 200;

async fn declare_topic(channel: &Channel, topic: &str) -> Result<(), EventError> {
    channel
        .exchange_declare(
            topic,
            ExchangeKind::Fanout,
            ExchangeDeclareOptions {
                durable: true,
                ..Default::default()
            },
            FieldTable::default(),
        )
        .await?;
    Ok(())
}

struct Attached {
    connection: Connection,
    channel: Channel,
    declared: Mutex<HashSet<String>>,
}

/// Publisher whose connection is attached and detached explicitly.
///
/// While detached, [`EventPublisher::publish`] fails with
/// [`EventError::NotReady`].
pub struct AmqpPublisher {
    url: String,
    attached: RwLock<Option<Attached>>,
}

impl AmqpPublisher {
    /// Create a detached publisher for the broker at `url`.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            attached: RwLock::new(None),
        }
    }

    /// Open the broker connection and enable publisher confirms.
    pub async fn attach(&self) -> Result<(), EventError> {
        let connection = Connection::connect(&self.url, ConnectionProperties::default()).await?;
        let channel = connection.create_channel().await?;
        channel
            .confirm_select(ConfirmSelectOptions::default())
            .await?;

        *self.attached.write().await = Some(Attached {
            connection,
            channel,
            declared: Mutex::new(HashSet::new()),
        });
        tracing::info!(target: "libris-events", "event publisher attached");
        Ok(())
    }

    /// Drop the connection; later publishes report `NotReady`.
    pub async fn detach(&self) -> Result<(), EventError> {
        let attached = self.attached.write().await.take();
        if let Some(attached) = attached {
            attached
                .connection
                .close(CLOSE_REPLY_SUCCESS, "publisher shutdown")
                .await?;
            tracing::info!(target: "libris-events", "event publisher detached");
        }
        Ok(())
    }

    pub async fn is_attached(&self) -> bool {
        self.attached.read().await.is_some()
    }
}

#[async_trait]
impl EventPublisher for AmqpPublisher {
    async fn publish(&self, topic: &str, event: &Event) -> Result<(), EventError> {
        let guard = self.attached.read().await;
        let attached = guard.as_ref().ok_or(EventError::NotReady)?;

        {
            let mut declared = attached.declared.lock().await;
            if !declared.contains(topic) {
                declare_topic(&attached.channel, topic).await?;
                declared.insert(topic.to_string());
            }
        }

        let payload = serde_json::to_vec(event)?;
        let confirmation = attached
            .channel
            .basic_publish(
                topic,
                "",
                BasicPublishOptions::default(),
                &payload,
                BasicProperties::default()
                    .with_content_type("application/json".into())
                    .with_delivery_mode(2),
            )
            .await?
            .await?;

        if confirmation.is_nack() {
            return Err(EventError::Nacked {
                topic: topic.to_string(),
            });
        }

        tracing::info!(
            target: "libris-events",
            event_type = %event.event_type,
            topic,
            "event published"
        );
        Ok(())
    }
}

/// Subscription to a topic under a consumer group.
pub struct AmqpSource {
    connection: Connection,
    consumer: Consumer,
}

impl AmqpSource {
    pub async fn subscribe(url: &str, topic: &str, group: &str) -> Result<Self, EventError> {
        let connection = Connection::connect(url, ConnectionProperties::default()).await?;
        let channel = connection.create_channel().await?;

        declare_topic(&channel, topic).await?;
        channel
            .queue_declare(
                group,
                QueueDeclareOptions {
                    durable: true,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await?;
        channel
            .queue_bind(
                group,
                topic,
                "",
                QueueBindOptions::default(),
                FieldTable::default(),
            )
            .await?;

        let consumer_tag = format!("{}-{}", group, std::process::id());
        let consumer = channel
            .basic_consume(
                group,
                &consumer_tag,
                BasicConsumeOptions::default(),
                FieldTable::default(),
            )
            .await?;

        tracing::info!(target: "libris-events", topic, group, "subscribed to topic");
        Ok(Self {
            connection,
            consumer,
        })
    }
}

#[async_trait]
impl EventSource for AmqpSource {
    async fn next_event(&mut self) -> Result<Option<Event>, EventError> {
        while let Some(delivery) = self.consumer.next().await {
            let delivery = delivery?;
            let decoded = serde_json::from_slice::<Event>(&delivery.data);

            // Acknowledge regardless; an undecodable body would otherwise be redelivered forever.
            delivery.ack(BasicAckOptions::default()).await?;

            match decoded {
                Ok(event) => return Ok(Some(event)),
                Err(error) => {
                    tracing::warn!(
                        target: "libris-events",
                        %error,
                        "skipping undecodable message"
                    );
                }
            }
        }
        Ok(None)
    }

    async fn close(&mut self) -> Result<(), EventError> {
        self.connection
            .close(CLOSE_REPLY_SUCCESS, "consumer shutdown")
            .await?;
        tracing::info!(target: "libris-events", "subscription closed");
        Ok(())
    }
}

/// Opens [`AmqpSource`] subscriptions against one broker.
pub struct AmqpSubscriber {
    url: String,
}

impl AmqpSubscriber {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }
}

#[async_trait]
impl EventSubscriber for AmqpSubscriber {
    async fn subscribe(
        &self,
        topic: &str,
        group: &str,
    ) -> Result<Box<dyn EventSource>, EventError> {
        let source = AmqpSource::subscribe(&self.url, topic, group).await?;
        Ok(Box::new(source))
    }
}

/// Core module tying the publisher connection to the service lifecycle.
pub struct EventsModule {
    publisher: Arc<AmqpPublisher>,
}

impl EventsModule {
    pub fn new(publisher: Arc<AmqpPublisher>) -> Self {
        Self { publisher }
    }
}

#[async_trait]
impl Module for EventsModule {
    fn name(&self) -> &'static str {
        "events"
    }

    async fn start(&self, ctx: &InitCtx<'_>) -> anyhow::Result<()> {
        self.publisher.attach().await?;
        tracing::info!(
            target: "libris-events",
            topic = %ctx.settings.broker.topic,
            "events module started"
        );
        Ok(())
    }

    async fn stop(&self) -> anyhow::Result<()> {
        self.publisher.detach().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::EventKind;

    #[tokio::test]
    async fn detached_publisher_reports_not_ready() {
        let publisher = AmqpPublisher::new("amqp://localhost:5672/%2f");
        assert!(!publisher.is_attached().await);

        let event = Event::new(EventKind::AuthorCreated, serde_json::json!({"_id": "a1"}));
        let result = publisher.publish("library.events", &event).await;
        assert!(matches!(result, Err(EventError::NotReady)));
    }

    #[tokio::test]
    async fn detach_without_attach_is_a_no_op() {
        let publisher = AmqpPublisher::new("amqp://localhost:5672/%2f");
        publisher.detach().await.unwrap();
    }
}
