use config::{Config, ConfigError, Environment, File};
use infrastructure::{HttpServerConfig, MonitoringConfig, MqttConfig};
use serde::Deserialize;

use crate::{
    adapter::mqtt::NotificationConfig,
    hardware::{HardwareConfig, SensorConfig},
    relay::EngineConfig,
    schedule_store::StoreConfig,
    scheduler::SchedulerConfig,
};

#[derive(Debug, Deserialize)]
pub struct Settings {
    pub mqtt: MqttConfig,
    pub http_server: HttpServerConfig,
    pub monitoring: MonitoringConfig,
    pub hardware: HardwareConfig,
    pub sensor: SensorConfig,
    #[serde(default)]
    pub engine: EngineConfig,
    pub scheduler: SchedulerConfig,
    pub store: StoreConfig,
    pub notifications: NotificationConfig,
}

impl Settings {
    pub fn new() -> Result<Self, ConfigError> {
        Self::from_builder(Config::builder().add_source(File::with_name("config.toml")))
    }

    fn from_builder(builder: config::ConfigBuilder<config::builder::DefaultState>) -> Result<Self, ConfigError> {
        builder
            .add_source(Environment::default().separator("_").list_separator(","))
            .build()?
            .try_deserialize()
    }
}
