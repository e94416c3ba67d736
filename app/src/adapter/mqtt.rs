use infrastructure::{EventListener, MqttInMessage, MqttSender, MqttSubscription};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::{
    relay::RelayEvent,
    router::{Command, CommandError, CommandRouter},
    scheduler::SchedulerEvent,
};

#[derive(Debug, Deserialize, Clone)]
pub struct NotificationConfig {
    #[serde(default = "default_response_topic")]
    pub response_topic: String,
    #[serde(default = "default_relay_changed_topic")]
    pub relay_changed_topic: String,
    #[serde(default = "default_telemetry_topic")]
    pub telemetry_topic: String,
}

fn default_response_topic() -> String {
    "relays_res".to_string()
}

fn default_relay_changed_topic() -> String {
    "notifications/relay_changed".to_string()
}

fn default_telemetry_topic() -> String {
    "notifications/telemetry".to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResponseEnvelope {
    /// Command name, or the topic if the message could not be decoded.
    pub command: String,
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<Value>,
}

impl ResponseEnvelope {
    fn failure(command: impl Into<String>, error: &CommandError) -> Self {
        Self {
            command: command.into(),
            ok: false,
            result: None,
            error: Some(json!({ "error": error.kind(), "message": error.to_string() })),
        }
    }
}

/// Executes commands arriving on the subscribed topics and publishes the outcome on the response topic.
/// Messages are handled one after the other in arrival order.
pub struct MqttCommandListener {
    router: CommandRouter,
    subscription: MqttSubscription,
    sender: MqttSender,
    response_topic: String,
}

impl MqttCommandListener {
    pub fn new(
        router: CommandRouter,
        subscription: MqttSubscription,
        sender: MqttSender,
        config: &NotificationConfig,
    ) -> Self {
        Self {
            router,
            subscription,
            sender,
            response_topic: config.response_topic.clone(),
        }
    }

    pub async fn run(mut self) {
        while let Some(msg) = self.subscription.recv().await {
            let Some(envelope) = handle_message(&self.router, &msg).await else {
                continue;
            };

            let payload = match serde_json::to_string(&envelope) {
                Ok(payload) => payload,
                Err(e) => {
                    tracing::error!("Error serializing response to {}: {:?}", msg.topic, e);
                    continue;
                }
            };

            if let Err(e) = self.sender.send_transient(&self.response_topic, payload).await {
                tracing::error!("Error publishing response to {}: {:?}", msg.topic, e);
            }
        }

        //keep running, the HTTP API still serves commands
        tracing::warn!("MQTT command subscription closed, no further commands are received");
        std::future::pending::<()>().await
    }
}

/// `None` for messages on topics without a command.
async fn handle_message(router: &CommandRouter, msg: &MqttInMessage) -> Option<ResponseEnvelope> {
    let command = match Command::from_topic(&msg.topic, &msg.payload)? {
        Ok(command) => command,
        Err(e) => {
            tracing::warn!("Invalid MQTT command on {} with payload {:?}: {}", msg.topic, msg.payload, e);
            return Some(ResponseEnvelope::failure(&msg.topic, &e));
        }
    };

    let name = command.name();
    tracing::info!("Executing MQTT command {} from {}", name, msg.topic);

    let envelope = match router.execute(command).await {
        Ok(response) => match serde_json::to_value(&response) {
            Ok(result) => ResponseEnvelope {
                command: name.to_string(),
                ok: true,
                result: Some(result),
                error: None,
            },
            Err(e) => {
                tracing::error!("Error serializing result of {}: {:?}", name, e);
                return None;
            }
        },
        Err(e) => {
            tracing::warn!("MQTT command {} failed: {}", name, e);
            ResponseEnvelope::failure(name, &e)
        }
    };

    Some(envelope)
}

/// Publishes relay changes and periodic telemetry, the latest telemetry report is retained.
/// Failures are only logged.
pub struct NotificationForwarder {
    relay_rx: EventListener<RelayEvent>,
    scheduler_rx: EventListener<SchedulerEvent>,
    sender: MqttSender,
    config: NotificationConfig,
}

impl NotificationForwarder {
    pub fn new(
        relay_rx: EventListener<RelayEvent>,
        scheduler_rx: EventListener<SchedulerEvent>,
        sender: MqttSender,
        config: NotificationConfig,
    ) -> Self {
        Self {
            relay_rx,
            scheduler_rx,
            sender,
            config,
        }
    }

    pub async fn run(mut self) {
        loop {
            let (topic, payload, retained) = tokio::select! {
                Some(RelayEvent::StateChanged(result)) = self.relay_rx.recv() => {
                    (&self.config.relay_changed_topic, serde_json::to_string(&result), false)
                },
                Some(SchedulerEvent::Telemetry(report)) = self.scheduler_rx.recv() => {
                    (&self.config.telemetry_topic, serde_json::to_string(&report), true)
                },
                else => break,
            };

            let payload = match payload {
                Ok(payload) => payload,
                Err(e) => {
                    tracing::error!("Error serializing notification for {}: {:?}", topic, e);
                    continue;
                }
            };

            let published = if retained {
                self.sender.send_retained(topic, payload).await
            } else {
                self.sender.send_transient(topic, payload).await
            };

            if let Err(e) = published {
                tracing::error!("Error publishing notification to {}: {:?}", topic, e);
            }
        }

        tracing::error!("Notification channels closed");
    }
}

#[cfg(test)]
mod tests {
    use assert_json_diff::assert_json_include;

    use super::*;
    use crate::{hardware::SimulatedSensor, router::testing::test_router};

    #[tokio::test]
    async fn test_relay_on_is_executed() {
        let (router, _ctx) = test_router(SimulatedSensor::new(20.0, 50.0)).await;

        let envelope = handle_message(&router, &MqttInMessage::new("relay/on", "3"))
            .await
            .unwrap();

        assert_json_include!(
            actual: serde_json::to_value(&envelope).unwrap(),
            expected: json!({
                "command": "set_relay_state",
                "ok": true,
                "result": { "channel_id": 3, "new_state": "engaged" }
            })
        );
    }

    #[tokio::test]
    async fn test_relay_state_per_channel_topic() {
        let (router, _ctx) = test_router(SimulatedSensor::new(20.0, 50.0)).await;

        let envelope = handle_message(&router, &MqttInMessage::new("relays/5", ""))
            .await
            .unwrap();

        assert_json_include!(
            actual: serde_json::to_value(&envelope).unwrap(),
            expected: json!({
                "command": "get_relay_state",
                "ok": true,
                "result": { "channel_id": 5, "state": "disengaged" }
            })
        );
    }

    #[tokio::test]
    async fn test_invalid_payload_is_answered_with_error() {
        let (router, _ctx) = test_router(SimulatedSensor::new(20.0, 50.0)).await;

        let envelope = handle_message(&router, &MqttInMessage::new("settings/time/open", "noon"))
            .await
            .unwrap();

        assert_eq!(envelope.command, "settings/time/open");
        assert!(!envelope.ok);
        assert_eq!(envelope.error.unwrap()["error"], "invalid_payload");
    }

    #[tokio::test]
    async fn test_unknown_channel_is_answered_with_error() {
        let (router, _ctx) = test_router(SimulatedSensor::new(20.0, 50.0)).await;

        let envelope = handle_message(&router, &MqttInMessage::new("relay/toggle", "99"))
            .await
            .unwrap();

        let json = serde_json::to_value(&envelope).unwrap();
        assert_json_include!(
            actual: json.clone(),
            expected: json!({
                "command": "toggle_relay",
                "ok": false,
                "error": { "error": "unknown_channel" }
            })
        );
        assert!(json.get("result").is_none());
    }

    #[tokio::test]
    async fn test_unmapped_topics_are_ignored() {
        let (router, _ctx) = test_router(SimulatedSensor::new(20.0, 50.0)).await;

        assert!(handle_message(&router, &MqttInMessage::new("relays_res", "{}")).await.is_none());
        assert!(handle_message(&router, &MqttInMessage::new("rpi/uptime", "")).await.is_none());
    }

    #[tokio::test]
    async fn test_light_pins_update_schedule() {
        let (router, _ctx) = test_router(SimulatedSensor::new(20.0, 50.0)).await;

        let envelope = handle_message(&router, &MqttInMessage::new("settings/light_pins", "1,2"))
            .await
            .unwrap();

        assert_json_include!(
            actual: serde_json::to_value(&envelope).unwrap(),
            expected: json!({ "ok": true, "result": { "scheduled_channel_ids": [1, 2] } })
        );
    }

    #[test]
    fn test_default_topics() {
        let config: NotificationConfig = serde_json::from_str("{}").unwrap();

        assert_eq!(config.response_topic, "relays_res");
        assert_eq!(config.relay_changed_topic, "notifications/relay_changed");
        assert_eq!(config.telemetry_topic, "notifications/telemetry");
    }
}
