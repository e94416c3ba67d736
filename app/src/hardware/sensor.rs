use std::{
    fs,
    path::{Path, PathBuf},
    sync::{
        Arc,
        atomic::{AtomicU32, Ordering},
    },
};

use anyhow::Context as _;
use derive_more::derive::{Display, Error};
use tokio::sync::Mutex;

use crate::core::{
    resilience::ExponentialBackoff,
    time::{DateTime, Duration},
};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RawReading {
    pub temperature: f64,
    pub humidity: f64,
}

#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct SensorReading {
    pub temperature: f64,
    pub humidity: f64,
    pub captured_at: DateTime,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SensorStatus {
    Ok,
    Unavailable,
}

#[derive(Debug, Clone, Display, Error)]
#[display("Sensor unavailable after {attempts} attempts: {last_error}")]
pub struct SensorUnavailable {
    pub attempts: u32,
    pub last_error: String,
}

/// Single blocking acquisition. Transient failures are reported as errors, retrying is up to the caller.
pub trait SensorDriver: Send + Sync {
    fn read(&self) -> anyhow::Result<RawReading>;
}

/// Temperature/humidity sensor exposed by the Linux IIO subsystem (e.g. the `dht11` driver for DHT11/DHT22).
pub struct IioHumiditySensor {
    device_path: PathBuf,
}

impl IioHumiditySensor {
    pub fn new(device_path: impl Into<PathBuf>) -> Self {
        Self {
            device_path: device_path.into(),
        }
    }
}

impl SensorDriver for IioHumiditySensor {
    fn read(&self) -> anyhow::Result<RawReading> {
        //kernel reports milli-degrees and milli-percent
        let temperature = read_milli_value(&self.device_path.join("in_temp_input"))?;
        let humidity = read_milli_value(&self.device_path.join("in_humidityrelative_input"))?;

        let reading = RawReading { temperature, humidity };
        validate(&reading)?;
        Ok(reading)
    }
}

fn read_milli_value(path: &Path) -> anyhow::Result<f64> {
    let raw = fs::read_to_string(path).with_context(|| format!("Error reading {}", path.display()))?;
    let value: i64 = raw
        .trim()
        .parse()
        .with_context(|| format!("Invalid value {:?} in {}", raw.trim(), path.display()))?;

    Ok(value as f64 / 1000.0)
}

//DHT22 operating range, anything outside is a garbled transfer
fn validate(reading: &RawReading) -> anyhow::Result<()> {
    if !(0.0..=100.0).contains(&reading.humidity) {
        anyhow::bail!("Implausible humidity {}", reading.humidity);
    }
    if !(-40.0..=80.0).contains(&reading.temperature) {
        anyhow::bail!("Implausible temperature {}", reading.temperature);
    }
    Ok(())
}

/// Fixed values, optionally failing a number of times before the first success.
pub struct SimulatedSensor {
    reading: RawReading,
    failures_left: AtomicU32,
}

impl SimulatedSensor {
    pub fn new(temperature: f64, humidity: f64) -> Self {
        Self {
            reading: RawReading { temperature, humidity },
            failures_left: AtomicU32::new(0),
        }
    }

    pub fn failing(self, failures: u32) -> Self {
        self.failures_left.store(failures, Ordering::SeqCst);
        self
    }
}

impl SensorDriver for SimulatedSensor {
    fn read(&self) -> anyhow::Result<RawReading> {
        let failed = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok();

        if failed {
            anyhow::bail!("Simulated sensor timeout");
        }

        Ok(self.reading)
    }
}

/// Serializes access to the sensor and retries transient failures with exponential backoff.
/// Acquisition runs on the blocking thread pool.
pub struct SensorAdapter {
    driver: Arc<dyn SensorDriver>,
    access: Mutex<()>,
    max_attempts: u32,
    retry_delay: Duration,
    max_retry_delay: Duration,
}

impl SensorAdapter {
    pub fn new(driver: Arc<dyn SensorDriver>, max_attempts: u32, retry_delay: Duration, max_retry_delay: Duration) -> Self {
        Self {
            driver,
            access: Mutex::new(()),
            max_attempts,
            retry_delay,
            max_retry_delay,
        }
    }

    #[tracing::instrument(skip(self))]
    pub async fn read(&self) -> Result<SensorReading, SensorUnavailable> {
        let _guard = self.access.lock().await;

        let driver = self.driver.clone();
        let backoff = ExponentialBackoff::new(self.max_attempts, self.retry_delay, self.max_retry_delay);

        let result = match tokio::task::spawn_blocking(move || read_with_retry(driver.as_ref(), backoff)).await {
            Ok(result) => result,
            Err(e) => Err(SensorUnavailable {
                attempts: 0,
                last_error: format!("Sensor task failed: {}", e),
            }),
        };

        match result {
            Ok(raw) => {
                infrastructure::meter::set("sensor_temperature", raw.temperature, &[]);
                infrastructure::meter::set("sensor_humidity", raw.humidity, &[]);

                Ok(SensorReading {
                    temperature: raw.temperature,
                    humidity: raw.humidity,
                    captured_at: DateTime::now(),
                })
            }
            Err(e) => {
                tracing::warn!("{}", e);
                infrastructure::meter::increment("sensor_read_failed", &[]);
                Err(e)
            }
        }
    }
}

fn read_with_retry(driver: &dyn SensorDriver, mut backoff: ExponentialBackoff) -> Result<RawReading, SensorUnavailable> {
    loop {
        match driver.read() {
            Ok(reading) => return Ok(reading),
            Err(e) => match backoff.bump() {
                Some(delay) => {
                    tracing::debug!("Sensor read attempt {} failed, retrying in {}: {:?}", backoff.attempts(), delay, e);
                    std::thread::sleep(delay.into());
                }
                None => {
                    return Err(SensorUnavailable {
                        attempts: backoff.attempts(),
                        last_error: format!("{:#}", e),
                    });
                }
            },
        }
    }
}
