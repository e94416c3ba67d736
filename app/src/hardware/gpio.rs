use std::{
    collections::{HashMap, HashSet},
    fs,
    path::PathBuf,
    sync::Mutex,
};

use anyhow::Context as _;

use crate::core::Pin;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Level {
    Low,
    High,
}

/// Synchronous access to digital output pins. Implementations hold no state beyond the pin
/// configuration, the relay engine decides what the levels mean.
pub trait OutputDriver: Send + Sync {
    fn setup_output(&self, pin: Pin) -> anyhow::Result<()>;
    fn write(&self, pin: Pin, level: Level) -> anyhow::Result<()>;
    fn read(&self, pin: Pin) -> anyhow::Result<Level>;
}

/// Linux sysfs GPIO interface (`/sys/class/gpio`).
pub struct SysfsGpio {
    base_path: PathBuf,
}

impl SysfsGpio {
    pub fn new(base_path: impl Into<PathBuf>) -> Self {
        Self {
            base_path: base_path.into(),
        }
    }

    fn pin_dir(&self, pin: Pin) -> PathBuf {
        self.base_path.join(format!("gpio{}", pin.0))
    }
}

impl OutputDriver for SysfsGpio {
    fn setup_output(&self, pin: Pin) -> anyhow::Result<()> {
        let pin_dir = self.pin_dir(pin);

        if !pin_dir.exists() {
            tracing::info!("Exporting {} via {}", pin, self.base_path.display());
            fs::write(self.base_path.join("export"), pin.0.to_string())
                .with_context(|| format!("Error exporting {}", pin))?;
        }

        fs::write(pin_dir.join("direction"), "out").with_context(|| format!("Error configuring {} as output", pin))
    }

    fn write(&self, pin: Pin, level: Level) -> anyhow::Result<()> {
        let value = match level {
            Level::Low => "0",
            Level::High => "1",
        };

        fs::write(self.pin_dir(pin).join("value"), value).with_context(|| format!("Error writing {}", pin))
    }

    fn read(&self, pin: Pin) -> anyhow::Result<Level> {
        let value = fs::read_to_string(self.pin_dir(pin).join("value")).with_context(|| format!("Error reading {}", pin))?;

        match value.trim() {
            "0" => Ok(Level::Low),
            "1" => Ok(Level::High),
            other => anyhow::bail!("Unexpected value {:?} read from {}", other, pin),
        }
    }
}

/// In-memory pins. Faults can be injected per pin: a stuck pin silently ignores writes,
/// a broken pin fails every access.
#[derive(Default)]
pub struct SimulatedGpio {
    state: Mutex<SimulatedPins>,
}

#[derive(Default)]
struct SimulatedPins {
    levels: HashMap<Pin, Level>,
    stuck: HashSet<Pin>,
    broken: HashSet<Pin>,
    writes: u64,
}

impl SimulatedGpio {
    pub fn set_stuck(&self, pin: Pin, stuck: bool) {
        let mut state = self.lock();
        if stuck {
            state.stuck.insert(pin);
        } else {
            state.stuck.remove(&pin);
        }
    }

    pub fn set_broken(&self, pin: Pin, broken: bool) {
        let mut state = self.lock();
        if broken {
            state.broken.insert(pin);
        } else {
            state.broken.remove(&pin);
        }
    }

    pub fn level(&self, pin: Pin) -> Option<Level> {
        self.lock().levels.get(&pin).copied()
    }

    pub fn write_count(&self) -> u64 {
        self.lock().writes
    }

    //a poisoned lock only means a test panicked mid-write, the pin map itself is still usable
    fn lock(&self) -> std::sync::MutexGuard<'_, SimulatedPins> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl OutputDriver for SimulatedGpio {
    fn setup_output(&self, pin: Pin) -> anyhow::Result<()> {
        let mut state = self.lock();
        if state.broken.contains(&pin) {
            anyhow::bail!("Simulated failure configuring {}", pin);
        }
        state.levels.entry(pin).or_insert(Level::High);
        Ok(())
    }

    fn write(&self, pin: Pin, level: Level) -> anyhow::Result<()> {
        let mut state = self.lock();
        if state.broken.contains(&pin) {
            anyhow::bail!("Simulated failure writing {}", pin);
        }

        state.writes += 1;
        if !state.stuck.contains(&pin) {
            state.levels.insert(pin, level);
        }
        Ok(())
    }

    fn read(&self, pin: Pin) -> anyhow::Result<Level> {
        let state = self.lock();
        if state.broken.contains(&pin) {
            anyhow::bail!("Simulated failure reading {}", pin);
        }

        state
            .levels
            .get(&pin)
            .copied()
            .with_context(|| format!("{} is not configured as output", pin))
    }
}
