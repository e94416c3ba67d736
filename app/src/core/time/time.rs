use std::{fmt::Display, str::FromStr};

use anyhow::Context;
use chrono::Timelike;

/// Time of day with minute precision, written as `HH:MM`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Time {
    pub(super) delegate: chrono::NaiveTime,
}

impl Time {
    pub(super) fn new(delegate: chrono::NaiveTime) -> Self {
        //seconds are not part of the domain, a time read from the clock is truncated
        let delegate = delegate.with_second(0).and_then(|t| t.with_nanosecond(0)).unwrap_or(delegate);
        Self { delegate }
    }

    pub fn at(hour: u32, minute: u32) -> anyhow::Result<Self> {
        Ok(Self {
            delegate: chrono::NaiveTime::from_hms_opt(hour, minute, 0)
                .context(format!("Error parsing time {}:{}", hour, minute))?,
        })
    }

    pub fn hour(&self) -> u32 {
        self.delegate.hour()
    }

    pub fn minute(&self) -> u32 {
        self.delegate.minute()
    }
}

impl FromStr for Time {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (hour, minute) = s
            .trim()
            .split_once(':')
            .with_context(|| format!("Invalid time {:?}, expected HH:MM", s))?;

        if hour.is_empty() || hour.len() > 2 || minute.len() != 2 {
            anyhow::bail!("Invalid time {:?}, expected HH:MM", s);
        }

        let hour: u32 = hour.parse().with_context(|| format!("Invalid hour in time {:?}", s))?;
        let minute: u32 = minute.parse().with_context(|| format!("Invalid minute in time {:?}", s))?;

        Time::at(hour, minute)
    }
}

impl Display for Time {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:02}:{:02}", self.hour(), self.minute())
    }
}

impl serde::Serialize for Time {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> serde::Deserialize<'de> for Time {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}
