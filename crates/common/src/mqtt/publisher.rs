use crate::domain::DomainResult;
use async_trait::async_trait;
use rumqttc::{AsyncClient, QoS};
use tracing::debug;

/// Publish side of the bus, kept behind a trait so domain services can be
/// exercised against a mock without a broker.
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait BusPublisher: Send + Sync {
    /// Publish `payload` to `topic`. Retained publishes replace the
    /// broker-held value so late subscribers see the latest state.
    async fn publish(&self, topic: &str, payload: Vec<u8>, retain: bool) -> DomainResult<()>;
}

/// `BusPublisher` over a live rumqttc client.
pub struct MqttPublisher {
    client: AsyncClient,
}

impl MqttPublisher {
    pub fn new(client: AsyncClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl BusPublisher for MqttPublisher {
    async fn publish(&self, topic: &str, payload: Vec<u8>, retain: bool) -> DomainResult<()> {
        debug!(topic = %topic, retain, payload_size = payload.len(), "publishing to bus");
        self.client
            .publish(topic, QoS::AtLeastOnce, retain, payload)
            .await
            .map_err(|e| anyhow::anyhow!("MQTT publish to {topic} failed: {e}"))?;
        Ok(())
    }
}
