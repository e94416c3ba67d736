use std::sync::Arc;

use anyhow::Context as _;
use rumqttc::v5::{AsyncClient, mqttbytes::QoS};

#[derive(Clone)]
pub struct MqttSender {
    client: Arc<AsyncClient>,
}

impl MqttSender {
    pub(super) fn new(client: Arc<AsyncClient>) -> Self {
        Self { client }
    }

    /// Kept by the broker and delivered to late subscribers.
    pub async fn send_retained(&self, topic: impl Into<String>, payload: impl Into<String>) -> anyhow::Result<()> {
        self.publish(topic.into(), payload.into(), true).await
    }

    pub async fn send_transient(&self, topic: impl Into<String>, payload: impl Into<String>) -> anyhow::Result<()> {
        self.publish(topic.into(), payload.into(), false).await
    }

    #[tracing::instrument(skip_all, fields(topic = %topic, retain = retain))]
    async fn publish(&self, topic: String, payload: String, retain: bool) -> anyhow::Result<()> {
        tracing::debug!("Publishing {} bytes", payload.len());

        self.client
            .publish(topic.as_str(), QoS::AtLeastOnce, retain, payload)
            .await
            .with_context(|| format!("Error publishing MQTT message to {}", topic))
    }
}
