mod domain;
mod service;

use std::sync::Arc;

pub use domain::*;
use infrastructure::{EventBus, EventListener};
use serde::Deserialize;

use crate::{
    core::time::Duration,
    hardware::SensorAdapter,
    relay::RelayClient,
    schedule_store::{SettingsDocument, SettingsEvent},
    scheduler::service::Scheduler,
};

#[derive(Debug, Clone)]
pub enum SchedulerEvent {
    Telemetry(TelemetryReport),
}

#[derive(Debug, Deserialize, Clone)]
pub struct SchedulerConfig {
    #[serde(default = "default_telemetry_interval")]
    pub telemetry_interval: Duration,
    #[serde(default = "default_tick_interval")]
    pub tick_interval: Duration,
}

fn default_telemetry_interval() -> Duration {
    Duration::seconds(60)
}

fn default_tick_interval() -> Duration {
    Duration::seconds(1)
}

pub struct SchedulerRunner {
    scheduler: Arc<Scheduler>,
    event_bus: EventBus<SchedulerEvent>,
    settings_rx: EventListener<SettingsEvent>,
    tick_interval: Duration,
}

#[derive(Clone)]
pub struct SchedulerClient {
    scheduler: Arc<Scheduler>,
}

impl SchedulerRunner {
    pub fn new(
        config: &SchedulerConfig,
        relay: RelayClient,
        sensor: Arc<SensorAdapter>,
        settings_rx: EventListener<SettingsEvent>,
    ) -> Self {
        let event_bus = EventBus::new(16);
        let scheduler = Scheduler::new(config.telemetry_interval, relay, sensor, event_bus.emitter());

        Self {
            scheduler: Arc::new(scheduler),
            event_bus,
            settings_rx,
            tick_interval: config.tick_interval,
        }
    }

    pub fn client(&self) -> SchedulerClient {
        SchedulerClient {
            scheduler: self.scheduler.clone(),
        }
    }

    pub fn subscribe(&self) -> EventListener<SchedulerEvent> {
        self.event_bus.subscribe()
    }

    pub async fn run(mut self, initial: SettingsDocument) {
        self.scheduler.rebuild_from(&initial);

        let mut timer = tokio::time::interval(self.tick_interval.into());
        timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = timer.tick() => {
                    self.scheduler.tick().await;
                },

                event = self.settings_rx.recv() => match event {
                    Some(SettingsEvent::Changed(document)) => {
                        self.scheduler.rebuild_from(&document);
                    },
                    None => {
                        tracing::error!("Settings event channel closed, scheduler keeps its current jobs");
                        break;
                    }
                },
            }
        }

        //without settings updates the jobs still have to fire
        loop {
            timer.tick().await;
            self.scheduler.tick().await;
        }
    }
}

impl SchedulerClient {
    pub fn list_jobs(&self) -> Vec<JobInfo> {
        self.scheduler.list_jobs()
    }
}
