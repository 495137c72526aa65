//! Event publication.
//!
//! The daemon owns one [`BusPublisher`] for its whole lifetime; every
//! pipeline publishes through it concurrently. The [`ProgressPublisher`]
//! trait is the seam the pipelines depend on, so tests can swap in the
//! in-memory collector.

use async_trait::async_trait;
use lapin::options::{BasicPublishOptions, ExchangeDeclareOptions};
use lapin::types::{AMQPValue, FieldTable};
use lapin::{BasicProperties, Connection, ConnectionProperties, ExchangeKind};
use thiserror::Error;

use plugind_core::config::BusConfig;

use crate::events::ProgressEvent;

/// Errors of the bus layer.
#[derive(Debug, Error)]
pub enum BusError {
    #[error("AMQP error: {0}")]
    Amqp(#[from] lapin::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Publishes progress events.
#[async_trait]
pub trait ProgressPublisher: Send + Sync {
    async fn publish(&self, event: ProgressEvent) -> Result<(), BusError>;
}

/// AMQP-backed publisher on a headers exchange.
pub struct BusPublisher {
    connection: Connection,
    channel: lapin::Channel,
    exchange: String,
    origin_uuid: Option<String>,
}

impl BusPublisher {
    /// Connect to the broker and declare the headers exchange.
    pub async fn connect(config: &BusConfig, origin_uuid: Option<String>) -> Result<Self, BusError> {
        let connection =
            Connection::connect(&config.url(), ConnectionProperties::default()).await?;
        let channel = connection.create_channel().await?;

        channel
            .exchange_declare(
                &config.exchange_name,
                ExchangeKind::Headers,
                ExchangeDeclareOptions {
                    durable: true,
                    ..ExchangeDeclareOptions::default()
                },
                FieldTable::default(),
            )
            .await?;

        tracing::info!(
            "connected to the bus, publishing on exchange {}",
            config.exchange_name
        );

        Ok(Self {
            connection,
            channel,
            exchange: config.exchange_name.clone(),
            origin_uuid,
        })
    }

    /// Close the channel and the connection.
    pub async fn close(&self) {
        if let Err(e) = self.channel.close(200, "shutdown").await {
            tracing::debug!("bus channel close failed: {e}");
        }
        if let Err(e) = self.connection.close(200, "shutdown").await {
            tracing::debug!("bus connection close failed: {e}");
        }
    }
}

#[async_trait]
impl ProgressPublisher for BusPublisher {
    async fn publish(&self, event: ProgressEvent) -> Result<(), BusError> {
        let payload = serde_json::to_vec(&event.payload(self.origin_uuid.as_deref()))?;

        let mut headers = FieldTable::default();
        headers.insert(
            "name".to_string().into(),
            AMQPValue::LongString(event.name.to_string().into()),
        );

        let properties = BasicProperties::default()
            .with_headers(headers)
            .with_content_type("application/json".to_string().into());

        self.channel
            .basic_publish(
                &self.exchange,
                "",
                BasicPublishOptions::default(),
                &payload,
                properties,
            )
            .await?
            .await?;
        Ok(())
    }
}

/// Test publisher collecting events in memory.
#[derive(Default)]
pub struct InMemoryPublisher {
    events: parking_lot::Mutex<Vec<ProgressEvent>>,
}

impl InMemoryPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every event published so far, in order.
    pub fn events(&self) -> Vec<ProgressEvent> {
        self.events.lock().clone()
    }

    /// The `(status, name)` sequence published for one request.
    pub fn statuses_for(&self, uuid: uuid::Uuid) -> Vec<String> {
        self.events
            .lock()
            .iter()
            .filter(|event| event.uuid == uuid)
            .map(|event| event.status.clone())
            .collect()
    }
}

#[async_trait]
impl ProgressPublisher for InMemoryPublisher {
    async fn publish(&self, event: ProgressEvent) -> Result<(), BusError> {
        self.events.lock().push(event);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[tokio::test]
    async fn test_in_memory_publisher_keeps_order() {
        let publisher = InMemoryPublisher::new();
        let uuid = Uuid::new_v4();
        let other = Uuid::new_v4();

        publisher
            .publish(ProgressEvent::install(uuid, "starting"))
            .await
            .unwrap();
        publisher
            .publish(ProgressEvent::install(other, "starting"))
            .await
            .unwrap();
        publisher
            .publish(ProgressEvent::install(uuid, "downloading"))
            .await
            .unwrap();

        assert_eq!(publisher.statuses_for(uuid), vec!["starting", "downloading"]);
        assert_eq!(publisher.statuses_for(other), vec!["starting"]);
    }
}
