mod domain;
mod service;

use std::sync::Arc;

pub use domain::*;
use infrastructure::{EventBus, EventListener};
use serde::Deserialize;

use crate::schedule_store::service::SettingsStore;

#[derive(Debug, Clone)]
pub enum SettingsEvent {
    Changed(SettingsDocument),
}

#[derive(Debug, Deserialize, Clone)]
pub struct StoreConfig {
    #[serde(default = "default_path")]
    pub path: String,
}

fn default_path() -> String {
    "settings.json".to_string()
}

pub struct ScheduleStoreModule {
    store: Arc<SettingsStore>,
    event_bus: EventBus<SettingsEvent>,
}

#[derive(Clone)]
pub struct ScheduleStoreClient {
    store: Arc<SettingsStore>,
}

impl ScheduleStoreModule {
    pub async fn load(config: &StoreConfig) -> Result<Self, StoreError> {
        let event_bus = EventBus::new(16);
        let store = SettingsStore::load(&config.path, event_bus.emitter()).await?;

        Ok(Self {
            store: Arc::new(store),
            event_bus,
        })
    }

    pub fn client(&self) -> ScheduleStoreClient {
        ScheduleStoreClient {
            store: self.store.clone(),
        }
    }

    pub fn subscribe(&self) -> EventListener<SettingsEvent> {
        self.event_bus.subscribe()
    }
}

impl ScheduleStoreClient {
    pub async fn load(&self) -> SettingsDocument {
        self.store.current().await
    }

    pub async fn update(&self, update: SettingsUpdate) -> Result<SettingsDocument, StoreError> {
        self.store.update(update).await
    }

    pub async fn reload(&self) -> Result<SettingsDocument, StoreError> {
        self.store.reload().await
    }
}
