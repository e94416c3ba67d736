use derive_more::derive::Display;
use serde::Serialize;

use crate::{
    core::{
        ChannelId,
        time::{DailyTimeRange, DateTime, Duration},
    },
    hardware::SensorStatus,
    relay::{AllStates, RelayState},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Display)]
#[serde(rename_all = "snake_case")]
pub enum JobId {
    #[display("telemetry_broadcast")]
    TelemetryBroadcast,
    #[display("channel_schedule")]
    ChannelSchedule,
}

#[derive(Debug, Clone, PartialEq)]
pub enum JobKind {
    Interval {
        period: Duration,
    },
    TimeOfDay {
        window: DailyTimeRange,
        channel_ids: Vec<ChannelId>,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub enum JobAction {
    BroadcastTelemetry,
    DriveChannels {
        channel_ids: Vec<ChannelId>,
        target: RelayState,
    },
}

impl JobAction {
    pub fn name(&self) -> &'static str {
        match self {
            JobAction::BroadcastTelemetry => "broadcast_telemetry",
            JobAction::DriveChannels {
                target: RelayState::Engaged,
                ..
            } => "engage_scheduled_channels",
            JobAction::DriveChannels {
                target: RelayState::Disengaged,
                ..
            } => "disengage_scheduled_channels",
        }
    }
}

#[derive(Debug, Clone)]
pub struct Job {
    pub id: JobId,
    pub kind: JobKind,
    pub next_fire_at: DateTime,
    /// Last state the time-of-day job drove its channels to. `None` until the first successful run.
    pub last_target: Option<RelayState>,
}

impl Job {
    pub fn interval(id: JobId, period: Duration, now: DateTime) -> Self {
        Self {
            id,
            kind: JobKind::Interval { period },
            next_fire_at: now + period,
            last_target: None,
        }
    }

    pub fn time_of_day(
        id: JobId,
        window: DailyTimeRange,
        channel_ids: Vec<ChannelId>,
        now: DateTime,
    ) -> anyhow::Result<Self> {
        Ok(Self {
            id,
            next_fire_at: window.next_boundary_after(now)?,
            kind: JobKind::TimeOfDay { window, channel_ids },
            last_target: None,
        })
    }

    /// Action to perform at `now`, if any.
    pub fn due_action(&self, now: DateTime) -> Option<JobAction> {
        match &self.kind {
            JobKind::Interval { .. } => (now >= self.next_fire_at).then_some(JobAction::BroadcastTelemetry),
            JobKind::TimeOfDay { window, channel_ids } => {
                let target = Self::target_state(window, now);
                (self.last_target != Some(target)).then(|| JobAction::DriveChannels {
                    channel_ids: channel_ids.clone(),
                    target,
                })
            }
        }
    }

    /// Action the job performs next, used for listing.
    pub fn next_action(&self, now: DateTime) -> JobAction {
        match &self.kind {
            JobKind::Interval { .. } => JobAction::BroadcastTelemetry,
            JobKind::TimeOfDay { window, channel_ids } => JobAction::DriveChannels {
                channel_ids: channel_ids.clone(),
                target: match self.last_target {
                    //converging run pending
                    None => Self::target_state(window, now),
                    Some(last) => !last,
                },
            },
        }
    }

    pub fn fired(&mut self, action: &JobAction, now: DateTime) -> anyhow::Result<()> {
        match &self.kind {
            JobKind::Interval { period } => self.next_fire_at = now + *period,
            JobKind::TimeOfDay { window, .. } => {
                if let JobAction::DriveChannels { target, .. } = action {
                    self.last_target = Some(*target);
                }
                self.next_fire_at = window.next_boundary_after(now)?;
            }
        }
        Ok(())
    }

    /// Interval jobs skip the failed period. Time-of-day jobs keep their last target and retry on the next tick.
    pub fn failed(&mut self, now: DateTime) {
        if let JobKind::Interval { period } = self.kind {
            self.next_fire_at = now + period;
        }
    }

    pub fn refresh(&mut self, now: DateTime) -> anyhow::Result<()> {
        if let JobKind::TimeOfDay { window, .. } = &self.kind {
            self.next_fire_at = window.next_boundary_after(now)?;
        }
        Ok(())
    }

    fn target_state(window: &DailyTimeRange, now: DateTime) -> RelayState {
        if window.contains(now.time()) {
            RelayState::Engaged
        } else {
            RelayState::Disengaged
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobInfo {
    pub job_id: JobId,
    pub next_fire_at: DateTime,
    pub action_name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TelemetryReport {
    pub relays: AllStates,
    pub temperature: Option<f64>,
    pub humidity: Option<f64>,
    pub sensor_status: SensorStatus,
    pub timestamp: DateTime,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::t;

    fn id(id: u8) -> ChannelId {
        ChannelId::new(id).unwrap()
    }

    fn today_at(time: crate::core::time::Time) -> DateTime {
        t!(now).at(time).unwrap()
    }

    #[test]
    fn test_interval_job_due_after_period() {
        let start = today_at(t!(10:00));
        let job = Job::interval(JobId::TelemetryBroadcast, t!(60 seconds), start);

        assert_eq!(job.due_action(start + t!(59 seconds)), None);
        assert_eq!(job.due_action(start + t!(60 seconds)), Some(JobAction::BroadcastTelemetry));
    }

    #[test]
    fn test_time_of_day_job_converges_immediately() {
        let now = today_at(t!(9:00));
        let job = Job::time_of_day(JobId::ChannelSchedule, t!(8:00 - 20:00), vec![id(1)], now).unwrap();

        assert_eq!(
            job.due_action(now),
            Some(JobAction::DriveChannels {
                channel_ids: vec![id(1)],
                target: RelayState::Engaged
            })
        );
        assert_eq!(job.next_fire_at, now.at(t!(20:00)).unwrap());
    }

    #[test]
    fn test_time_of_day_job_fires_only_on_transition() {
        let now = today_at(t!(9:00));
        let mut job = Job::time_of_day(JobId::ChannelSchedule, t!(8:00 - 20:00), vec![id(1)], now).unwrap();
        let action = job.due_action(now).unwrap();
        job.fired(&action, now).unwrap();

        assert_eq!(job.due_action(today_at(t!(19:59))), None);
        assert_eq!(
            job.due_action(today_at(t!(20:00))),
            Some(JobAction::DriveChannels {
                channel_ids: vec![id(1)],
                target: RelayState::Disengaged
            })
        );
    }

    #[test]
    fn test_overnight_window_targets() {
        let now = today_at(t!(23:30));
        let job = Job::time_of_day(JobId::ChannelSchedule, t!(22:00 - 6:00), vec![id(2)], now).unwrap();

        assert_eq!(job.next_action(now).name(), "engage_scheduled_channels");
        assert_eq!(job.next_fire_at, now.on_next_day().at(t!(6:00)).unwrap());
    }
}
