use std::{
    collections::BTreeMap,
    sync::{Arc, Mutex, MutexGuard},
};

use infrastructure::EventEmitter;

use crate::{
    core::{
        ChannelId,
        time::{DateTime, Duration},
    },
    hardware::{SensorAdapter, SensorStatus},
    relay::{RelayClient, RelayError, RelayState},
    schedule_store::SettingsDocument,
    scheduler::{Job, JobAction, JobId, JobInfo, SchedulerEvent, TelemetryReport},
};

struct Registered {
    job: Job,
    generation: u64,
}

#[derive(Default)]
struct JobTable {
    jobs: BTreeMap<JobId, Registered>,
    generation: u64,
}

pub struct Scheduler {
    jobs: Mutex<JobTable>,
    telemetry_period: Duration,
    relay: RelayClient,
    telemetry: TelemetrySource,
}

#[derive(Clone)]
struct TelemetrySource {
    relay: RelayClient,
    sensor: Arc<SensorAdapter>,
    event_tx: EventEmitter<SchedulerEvent>,
}

impl Scheduler {
    pub fn new(
        telemetry_period: Duration,
        relay: RelayClient,
        sensor: Arc<SensorAdapter>,
        event_tx: EventEmitter<SchedulerEvent>,
    ) -> Self {
        Self {
            jobs: Mutex::new(JobTable::default()),
            telemetry_period,
            relay: relay.clone(),
            telemetry: TelemetrySource {
                relay,
                sensor,
                event_tx,
            },
        }
    }

    /// Adds the job or replaces the one registered with the same id.
    pub fn register(&self, job: Job) {
        let mut table = self.table();
        table.generation += 1;
        let generation = table.generation;

        tracing::debug!("Job {} fires next {}", job.id, job.next_fire_at.to_human_readable());

        let replaced = table.jobs.insert(job.id, Registered { job, generation });
        if let Some(replaced) = replaced {
            tracing::debug!("Replaced scheduled job {}", replaced.job.id);
        }
    }

    pub fn unregister(&self, id: JobId) {
        if self.table().jobs.remove(&id).is_some() {
            tracing::debug!("Removed scheduled job {}", id);
        }
    }

    /// Derives the complete job set from the settings document.
    /// The telemetry job does not depend on the document and keeps its period across rebuilds.
    pub fn rebuild_from(&self, document: &SettingsDocument) {
        let now = DateTime::now();

        let has_telemetry = self.table().jobs.contains_key(&JobId::TelemetryBroadcast);
        if !has_telemetry {
            self.register(Job::interval(JobId::TelemetryBroadcast, self.telemetry_period, now));
        }

        if document.scheduled_channel_ids.is_empty() {
            self.unregister(JobId::ChannelSchedule);
        } else {
            match Job::time_of_day(
                JobId::ChannelSchedule,
                document.schedule_window(),
                document.scheduled_channel_ids.clone(),
                now,
            ) {
                Ok(job) => self.register(job),
                Err(e) => {
                    tracing::error!("Error creating channel schedule job, removing it: {:?}", e);
                    self.unregister(JobId::ChannelSchedule);
                }
            }
        }

        tracing::info!(
            "Scheduled jobs rebuilt: window {}, channels {:?}",
            document.schedule_window(),
            document.scheduled_channel_ids
        );
    }

    pub fn list_jobs(&self) -> Vec<JobInfo> {
        let now = DateTime::now();

        self.table()
            .jobs
            .values()
            .map(|registered| JobInfo {
                job_id: registered.job.id,
                next_fire_at: registered.job.next_fire_at,
                action_name: registered.job.next_action(now).name().to_string(),
            })
            .collect()
    }

    /// Runs the action of every due job. A failing job is logged and stays registered,
    /// the time-of-day job retries on the next tick. Telemetry is collected in the background
    /// so slow sensor reads never hold back channel switching.
    pub async fn tick(&self) {
        let now = DateTime::now();

        let mut due: Vec<(JobId, u64, JobAction)> = vec![];
        for registered in self.table().jobs.values_mut() {
            if let Err(e) = registered.job.refresh(now) {
                tracing::error!("Error calculating next fire time of job {}: {:?}", registered.job.id, e);
            }

            if let Some(action) = registered.job.due_action(now) {
                due.push((registered.job.id, registered.generation, action));
            }
        }

        for (id, generation, action) in due {
            tracing::info!("Firing job {} with action {}", id, action.name());

            let result = match &action {
                JobAction::BroadcastTelemetry => {
                    self.telemetry.broadcast_in_background(id);
                    Ok(())
                }
                JobAction::DriveChannels { channel_ids, target } => self.drive(channel_ids, *target).await,
            };

            let mut table = self.table();
            //job was replaced while running, the new one starts fresh
            let Some(registered) = table.jobs.get_mut(&id).filter(|r| r.generation == generation) else {
                continue;
            };

            match result {
                Ok(()) => {
                    if let Err(e) = registered.job.fired(&action, now) {
                        tracing::error!("Error rescheduling job {}: {:?}", id, e);
                    }
                }
                Err(e) => {
                    tracing::error!("Job {} failed: {:?}", id, e);
                    infrastructure::meter::increment("scheduled_job_failed", &[("job", &id.to_string())]);
                    registered.job.failed(now);
                }
            }
        }
    }

    async fn drive(&self, channel_ids: &[ChannelId], target: RelayState) -> anyhow::Result<()> {
        let mut failed = vec![];

        //every channel is attempted even if one fails
        for channel_id in channel_ids {
            if let Err(e) = self.relay.set_state(*channel_id, target).await {
                failed.push(e);
            }
        }

        if failed.is_empty() {
            Ok(())
        } else {
            let messages: Vec<String> = failed.iter().map(RelayError::to_string).collect();
            anyhow::bail!("Error driving channels to {}: {}", target, messages.join("; "))
        }
    }

    pub async fn telemetry(&self) -> anyhow::Result<TelemetryReport> {
        self.telemetry.collect().await
    }

    fn table(&self) -> MutexGuard<'_, JobTable> {
        self.jobs.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl TelemetrySource {
    fn broadcast_in_background(&self, id: JobId) {
        let source = self.clone();

        tokio::spawn(async move {
            match source.collect().await {
                Ok(report) => source.event_tx.send(SchedulerEvent::Telemetry(report)),
                Err(e) => {
                    tracing::error!("Job {} failed: {:?}", id, e);
                    infrastructure::meter::increment("scheduled_job_failed", &[("job", &id.to_string())]);
                }
            }
        });
    }

    async fn collect(&self) -> anyhow::Result<TelemetryReport> {
        let relays = self.relay.get_all_states().await?;
        let reading = self.sensor.read().await;

        Ok(match reading {
            Ok(reading) => TelemetryReport {
                relays,
                temperature: Some(reading.temperature),
                humidity: Some(reading.humidity),
                sensor_status: SensorStatus::Ok,
                timestamp: DateTime::now(),
            },
            Err(_) => TelemetryReport {
                relays,
                temperature: None,
                humidity: None,
                sensor_status: SensorStatus::Unavailable,
                timestamp: DateTime::now(),
            },
        })
    }
}
