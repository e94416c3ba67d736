mod domain;
mod service;

use std::{collections::BTreeMap, sync::Arc};

pub use domain::*;
use infrastructure::{EventBus, EventListener};
use serde::Deserialize;

use crate::{
    core::{ChannelId, Pin, time::Duration},
    hardware::OutputDriver,
    relay::service::RelayEngine,
    schedule_store::SettingsEvent,
};

#[derive(Debug, Clone)]
pub enum RelayEvent {
    StateChanged(SwitchResult),
}

#[derive(Debug, Deserialize, Clone)]
pub struct EngineConfig {
    #[serde(default = "default_lock_timeout")]
    pub lock_timeout: Duration,
    #[serde(default = "default_playtime_step")]
    pub playtime_step: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            lock_timeout: default_lock_timeout(),
            playtime_step: default_playtime_step(),
        }
    }
}

fn default_lock_timeout() -> Duration {
    Duration::seconds(30)
}

fn default_playtime_step() -> Duration {
    Duration::seconds(1)
}

pub struct RelayRunner {
    engine: Arc<RelayEngine>,
    event_bus: EventBus<RelayEvent>,
    settings_rx: EventListener<SettingsEvent>,
}

#[derive(Clone)]
pub struct RelayClient {
    engine: Arc<RelayEngine>,
}

impl RelayRunner {
    pub fn new(
        config: &EngineConfig,
        driver: Arc<dyn OutputDriver>,
        active_low: bool,
        settings_rx: EventListener<SettingsEvent>,
    ) -> Self {
        let event_bus = EventBus::new(64);
        let engine = RelayEngine::new(
            driver,
            active_low,
            config.lock_timeout,
            config.playtime_step,
            event_bus.emitter(),
        );

        Self {
            engine: Arc::new(engine),
            event_bus,
            settings_rx,
        }
    }

    pub fn client(&self) -> RelayClient {
        RelayClient {
            engine: self.engine.clone(),
        }
    }

    pub fn subscribe(&self) -> EventListener<RelayEvent> {
        self.event_bus.subscribe()
    }

    /// Configures all outputs of the pin map and drives them to disengaged.
    pub async fn init(&self, pin_map: &BTreeMap<ChannelId, Pin>) -> Result<(), RelayError> {
        self.engine.sync_channels(pin_map).await
    }

    //follows pin map changes of reloaded settings
    pub async fn run(mut self) {
        while let Some(event) = self.settings_rx.recv().await {
            let SettingsEvent::Changed(document) = event;

            if let Err(e) = self.engine.sync_channels(&document.pin_map).await {
                tracing::error!("Error applying pin map of changed settings: {:?}", e);
            }
        }
    }
}

impl RelayClient {
    pub async fn get_state(&self, channel_id: ChannelId) -> Result<ChannelState, RelayError> {
        self.engine.get_state(channel_id).await
    }

    pub async fn set_state(&self, channel_id: ChannelId, desired: RelayState) -> Result<SwitchResult, RelayError> {
        self.engine.set_state(channel_id, desired).await
    }

    pub async fn toggle(&self, channel_id: ChannelId) -> Result<SwitchResult, RelayError> {
        self.engine.toggle(channel_id).await
    }

    pub async fn get_all_states(&self) -> Result<AllStates, RelayError> {
        self.engine.get_all_states().await
    }

    pub async fn run_playtime(&self) -> Result<String, RelayError> {
        self.engine.run_playtime().await
    }
}
