mod command;

use std::sync::Arc;

pub use command::Command;
use derive_more::derive::{Display, Error, From};
use serde::Serialize;

use crate::{
    core::time::DateTime,
    hardware::{SensorAdapter, SensorStatus},
    relay::{AllStates, ChannelState, RelayClient, RelayError, SwitchResult},
    schedule_store::{ScheduleStoreClient, SettingsDocument, SettingsUpdate, StoreError},
    scheduler::{JobInfo, SchedulerClient},
};

#[derive(Debug, Display, Error, From)]
pub enum CommandError {
    #[display("Unknown command {name}")]
    #[from(ignore)]
    UnknownCommand { name: String },

    #[display("Invalid payload: {message}")]
    #[from(ignore)]
    InvalidPayload { message: String },

    #[display("{_0}")]
    Relay(RelayError),

    #[display("{_0}")]
    Store(StoreError),
}

impl CommandError {
    /// Stable error identifier used by the transports.
    pub fn kind(&self) -> &'static str {
        match self {
            CommandError::UnknownCommand { .. } => "unknown_command",
            CommandError::InvalidPayload { .. } => "invalid_payload",
            CommandError::Relay(RelayError::UnknownChannel { .. }) => "unknown_channel",
            CommandError::Relay(RelayError::InvalidState { .. }) => "invalid_state",
            CommandError::Relay(RelayError::EngineBusy { .. }) => "engine_busy",
            CommandError::Relay(RelayError::Hardware { .. }) => "hardware",
            CommandError::Store(StoreError::UnknownChannel { .. }) => "unknown_channel",
            CommandError::Store(StoreError::CorruptSettings { .. }) => "corrupt_settings",
            CommandError::Store(StoreError::Storage { .. }) => "storage",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum CommandResponse {
    RelayState(ChannelState),
    Switched(SwitchResult),
    AllRelayStates(AllStates),
    Message {
        message: String,
    },
    Temperature {
        temperature: Option<f64>,
        timestamp: DateTime,
        status: SensorStatus,
    },
    Humidity {
        humidity: Option<f64>,
        timestamp: DateTime,
        status: SensorStatus,
    },
    Settings(SettingsDocument),
    Jobs(Vec<JobInfo>),
}

/// Single entry point of both transports into the relay engine, the settings store and the scheduler.
#[derive(Clone)]
pub struct CommandRouter {
    relay: RelayClient,
    store: ScheduleStoreClient,
    scheduler: SchedulerClient,
    sensor: Arc<SensorAdapter>,
}

impl CommandRouter {
    pub fn new(
        relay: RelayClient,
        store: ScheduleStoreClient,
        scheduler: SchedulerClient,
        sensor: Arc<SensorAdapter>,
    ) -> Self {
        Self {
            relay,
            store,
            scheduler,
            sensor,
        }
    }

    pub async fn handle(&self, name: &str, payload: &str) -> Result<CommandResponse, CommandError> {
        let command = Command::decode(name, payload)?;
        self.execute(command).await
    }

    #[tracing::instrument(skip_all, fields(command = command.name()))]
    pub async fn execute(&self, command: Command) -> Result<CommandResponse, CommandError> {
        let response = match command {
            Command::GetRelayState { channel_id } => CommandResponse::RelayState(self.relay.get_state(channel_id).await?),
            Command::SetRelayState { channel_id, state } => {
                CommandResponse::Switched(self.relay.set_state(channel_id, state).await?)
            }
            Command::ToggleRelay { channel_id } => CommandResponse::Switched(self.relay.toggle(channel_id).await?),
            Command::GetAllRelayStates => CommandResponse::AllRelayStates(self.relay.get_all_states().await?),
            Command::RunPlaytime => CommandResponse::Message {
                message: self.relay.run_playtime().await?,
            },
            Command::GetTemperature => match self.sensor.read().await {
                Ok(reading) => CommandResponse::Temperature {
                    temperature: Some(reading.temperature),
                    timestamp: reading.captured_at,
                    status: SensorStatus::Ok,
                },
                Err(_) => CommandResponse::Temperature {
                    temperature: None,
                    timestamp: DateTime::now(),
                    status: SensorStatus::Unavailable,
                },
            },
            Command::GetHumidity => match self.sensor.read().await {
                Ok(reading) => CommandResponse::Humidity {
                    humidity: Some(reading.humidity),
                    timestamp: reading.captured_at,
                    status: SensorStatus::Ok,
                },
                Err(_) => CommandResponse::Humidity {
                    humidity: None,
                    timestamp: DateTime::now(),
                    status: SensorStatus::Unavailable,
                },
            },
            Command::SetOpenTime { time } => {
                CommandResponse::Settings(self.store.update(SettingsUpdate::OpenTime(time)).await?)
            }
            Command::SetCloseTime { time } => {
                CommandResponse::Settings(self.store.update(SettingsUpdate::CloseTime(time)).await?)
            }
            Command::SetScheduledChannels { channel_ids } => {
                CommandResponse::Settings(self.store.update(SettingsUpdate::ScheduledChannels(channel_ids)).await?)
            }
            Command::SetSubscribedTopics { topics } => {
                CommandResponse::Settings(self.store.update(SettingsUpdate::SubscribedTopics(topics)).await?)
            }
            Command::ListScheduledJobs => CommandResponse::Jobs(self.scheduler.list_jobs()),
            Command::GetSettings => CommandResponse::Settings(self.store.load().await),
            Command::ReloadSettings => CommandResponse::Settings(self.store.reload().await?),
        };

        Ok(response)
    }
}


#[cfg(test)]
mod tests {
    use assert_json_diff::assert_json_include;
    use serde_json::json;

    use super::{testing::test_router, *};
    use crate::{hardware::SimulatedSensor, relay::RelayState, t};

    #[tokio::test]
    async fn test_toggle_relay_from_disengaged() {
        let (router, _ctx) = test_router(SimulatedSensor::new(20.0, 50.0)).await;

        let response = router.handle("toggle_relay", "1").await.unwrap();

        assert_json_include!(
            actual: serde_json::to_value(&response).unwrap(),
            expected: json!({
                "channel_id": 1,
                "previous_state": "disengaged",
                "new_state": "engaged",
                "confirmed_state": "engaged",
                "status": "confirmed"
            })
        );
    }

    #[tokio::test]
    async fn test_all_relay_states_has_every_channel() {
        let (router, _ctx) = test_router(SimulatedSensor::new(20.0, 50.0)).await;

        let Ok(CommandResponse::AllRelayStates(all)) = router.execute(Command::GetAllRelayStates).await else {
            panic!("Unexpected response");
        };

        assert_eq!(all.channels.len(), 8);
        assert!(all.channels.iter().all(|c| c.state == RelayState::Disengaged));
    }

    #[tokio::test]
    async fn test_invalid_state_leaves_relay_untouched() {
        let (router, ctx) = test_router(SimulatedSensor::new(20.0, 50.0)).await;

        let result = router.handle("set_relay_state", r#"{"channel_id": 1, "state": "1"}"#).await;

        assert_eq!(result.unwrap_err().kind(), "invalid_state");
        assert_eq!(ctx.gpio.write_count(), 8);
    }

    #[tokio::test]
    async fn test_unknown_channel() {
        let (router, _ctx) = test_router(SimulatedSensor::new(20.0, 50.0)).await;

        let error = router.handle("get_relay_state", "12").await.unwrap_err();

        assert_eq!(error.kind(), "unknown_channel");
        assert_eq!(error.to_string(), "Unknown channel 12");
    }

    #[tokio::test]
    async fn test_sensor_unavailable_is_a_normal_result() {
        let (router, _ctx) = test_router(SimulatedSensor::new(20.0, 50.0).failing(5)).await;

        let response = router.execute(Command::GetTemperature).await.unwrap();

        assert_json_include!(
            actual: serde_json::to_value(&response).unwrap(),
            expected: json!({ "temperature": null, "status": "unavailable" })
        );
    }

    #[tokio::test]
    async fn test_humidity_reading() {
        let (router, _ctx) = test_router(SimulatedSensor::new(20.0, 55.5)).await;

        let response = router.execute(Command::GetHumidity).await.unwrap();

        assert_json_include!(
            actual: serde_json::to_value(&response).unwrap(),
            expected: json!({ "humidity": 55.5, "status": "ok" })
        );
    }

    #[tokio::test]
    async fn test_settings_updates_return_document() {
        let (router, _ctx) = test_router(SimulatedSensor::new(20.0, 50.0)).await;

        router.handle("set_open_time", "07:15").await.unwrap();
        router.handle("set_close_time", "\"23:00\"").await.unwrap();
        let response = router.handle("set_scheduled_channels", "[3, 1, 3]").await.unwrap();

        assert_json_include!(
            actual: serde_json::to_value(&response).unwrap(),
            expected: json!({
                "open_time": "07:15",
                "close_time": "23:00",
                "scheduled_channel_ids": [1, 3]
            })
        );
    }

    #[tokio::test]
    async fn test_subscribed_topics_are_persisted() {
        let (router, ctx) = test_router(SimulatedSensor::new(20.0, 50.0)).await;

        let response = router.handle("set_subscribed_topics", r#"["relay/#", "jobs"]"#).await.unwrap();

        assert_json_include!(
            actual: serde_json::to_value(&response).unwrap(),
            expected: json!({ "subscribed_topics": ["relay/#", "jobs"] })
        );
        let stored = std::fs::read_to_string(ctx.dir.path().join("settings.json")).unwrap();
        assert!(stored.contains("relay/#"));
    }

    #[tokio::test]
    async fn test_scheduling_unknown_channel_is_rejected() {
        let (router, _ctx) = test_router(SimulatedSensor::new(20.0, 50.0)).await;

        let error = router.handle("set_scheduled_channels", "[1, 9]").await.unwrap_err();

        assert_eq!(error.kind(), "unknown_channel");
        let Ok(CommandResponse::Settings(doc)) = router.execute(Command::GetSettings).await else {
            panic!("Unexpected response");
        };
        assert!(doc.scheduled_channel_ids.is_empty());
    }

    #[tokio::test]
    async fn test_reload_settings_reads_file() {
        let (router, ctx) = test_router(SimulatedSensor::new(20.0, 50.0)).await;
        let path = ctx.dir.path().join("settings.json");
        let content = std::fs::read_to_string(&path).unwrap().replace("20:00", "21:30");
        std::fs::write(&path, content).unwrap();

        let Ok(CommandResponse::Settings(doc)) = router.execute(Command::ReloadSettings).await else {
            panic!("Unexpected response");
        };

        assert_eq!(doc.close_time, t!(21:30));
    }

    #[tokio::test]
    async fn test_playtime_message() {
        let (router, _ctx) = test_router(SimulatedSensor::new(20.0, 50.0)).await;

        let response = router.execute(Command::RunPlaytime).await.unwrap();

        assert_eq!(
            response,
            CommandResponse::Message {
                message: "Playtime done. Hope you enjoyed it.".to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_unknown_command() {
        let (router, _ctx) = test_router(SimulatedSensor::new(20.0, 50.0)).await;

        let error = router.handle("open_pod_bay_doors", "").await.unwrap_err();

        assert_eq!(error.kind(), "unknown_command");
    }
}
