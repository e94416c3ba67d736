mod gpio;
mod sensor;

use std::sync::Arc;

pub use gpio::{Level, OutputDriver, SimulatedGpio, SysfsGpio};
pub use sensor::{
    IioHumiditySensor, RawReading, SensorAdapter, SensorDriver, SensorReading, SensorStatus, SensorUnavailable,
    SimulatedSensor,
};
use serde::Deserialize;

use crate::core::{resilience::ExponentialBackoff, time::Duration};

#[derive(Debug, Deserialize, Clone)]
pub struct HardwareConfig {
    pub output: OutputDriverConfig,
    #[serde(default = "default_active_low")]
    pub active_low: bool,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(tag = "driver", rename_all = "snake_case")]
pub enum OutputDriverConfig {
    Sysfs {
        #[serde(default = "default_gpio_base_path")]
        base_path: String,
    },
    Simulated,
}

#[derive(Debug, Deserialize, Clone)]
pub struct SensorConfig {
    pub source: SensorDriverConfig,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_retry_delay")]
    pub retry_delay: Duration,
    #[serde(default = "default_max_retry_delay")]
    pub max_retry_delay: Duration,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(tag = "driver", rename_all = "snake_case")]
pub enum SensorDriverConfig {
    Iio { device_path: String },
    Simulated { temperature: f64, humidity: f64 },
}

impl HardwareConfig {
    pub fn new_output_driver(&self) -> Arc<dyn OutputDriver> {
        match &self.output {
            OutputDriverConfig::Sysfs { base_path } => Arc::new(SysfsGpio::new(base_path)),
            OutputDriverConfig::Simulated => {
                tracing::warn!("Using simulated GPIO, relays are not connected to any hardware");
                Arc::new(SimulatedGpio::default())
            }
        }
    }
}

impl SensorConfig {
    pub fn new_adapter(&self) -> SensorAdapter {
        let driver: Arc<dyn SensorDriver> = match &self.source {
            SensorDriverConfig::Iio { device_path } => Arc::new(IioHumiditySensor::new(device_path)),
            SensorDriverConfig::Simulated { temperature, humidity } => {
                tracing::warn!("Using simulated humidity sensor");
                Arc::new(SimulatedSensor::new(*temperature, *humidity))
            }
        };

        let backoff = ExponentialBackoff::new(self.max_attempts, self.retry_delay, self.max_retry_delay);
        tracing::info!(
            "Sensor reads give up after {} attempts, waiting at most {} in between",
            self.max_attempts,
            backoff.max_total_delay()
        );

        SensorAdapter::new(driver, self.max_attempts, self.retry_delay, self.max_retry_delay)
    }
}

fn default_active_low() -> bool {
    true
}

fn default_gpio_base_path() -> String {
    "/sys/class/gpio".to_string()
}

fn default_max_attempts() -> u32 {
    5
}

fn default_retry_delay() -> Duration {
    Duration::seconds(2)
}

fn default_max_retry_delay() -> Duration {
    Duration::seconds(8)
}
