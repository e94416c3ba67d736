use std::{
    fmt::Display,
    ops::{Add, Sub},
};

use chrono::LocalResult;
use tokio::task_local;

use super::{Duration, Time};

task_local! {
    pub static FIXED_NOW: DateTime;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
#[serde(transparent)]
pub struct DateTime {
    delegate: chrono::DateTime<chrono::Local>,
}

impl DateTime {
    fn new<T: chrono::TimeZone>(delegate: chrono::DateTime<T>) -> Self {
        Self {
            delegate: delegate.with_timezone(&chrono::Local),
        }
    }

    pub(super) fn delegate(&self) -> &chrono::DateTime<chrono::Local> {
        &self.delegate
    }

    pub fn now() -> Self {
        FIXED_NOW
            .try_with(|t| *t)
            .unwrap_or_else(|_| chrono::Local::now().into())
    }

    pub fn from_iso(iso8601: &str) -> anyhow::Result<Self> {
        Ok(chrono::DateTime::parse_from_rfc3339(iso8601)?.into())
    }

    pub fn to_human_readable(&self) -> String {
        chrono_humanize::HumanTime::from(self.delegate).to_string()
    }

    pub fn time(&self) -> Time {
        Time::new(self.delegate.time())
    }

    //Same calendar day at the given time of day. Times skipped by a DST jump
    //are shifted by the size of the gap (one hour), repeated times to the earlier one.
    pub fn at(&self, time: Time) -> anyhow::Result<Self> {
        match self.delegate.with_time(time.delegate) {
            LocalResult::Single(dt) | LocalResult::Ambiguous(dt, _) => Ok(dt.into()),
            LocalResult::None => {
                let shifted = time.delegate + chrono::Duration::hours(1);
                let dt = self
                    .delegate
                    .with_time(shifted)
                    .earliest()
                    .ok_or_else(|| anyhow::anyhow!("Error resolving time {} for date-time {}", time, self))?;
                Ok(dt.into())
            }
        }
    }

    pub fn on_next_day(&self) -> Self {
        (self.delegate + chrono::Duration::days(1)).into()
    }

    pub fn elapsed_since(&self, since: Self) -> Duration {
        Duration::new(self.delegate - since.delegate)
    }
}

impl Display for DateTime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.delegate.format("%Y-%m-%d %H:%M:%S%:z"))
    }
}

impl Add<Duration> for DateTime {
    type Output = DateTime;

    fn add(self, rhs: Duration) -> Self::Output {
        Self::new(self.delegate + rhs.delegate)
    }
}

impl Sub<Duration> for DateTime {
    type Output = DateTime;

    fn sub(self, rhs: Duration) -> Self::Output {
        Self::new(self.delegate - rhs.delegate)
    }
}

impl<T: chrono::TimeZone> From<chrono::DateTime<T>> for DateTime {
    fn from(val: chrono::DateTime<T>) -> Self {
        DateTime::new(val)
    }
}
