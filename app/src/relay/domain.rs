use std::{ops::Not, str::FromStr};

use derive_more::derive::{Display, Error};
use serde::{Deserialize, Serialize};

use crate::core::{ChannelId, Pin, time::DateTime};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display)]
#[serde(rename_all = "snake_case")]
pub enum RelayState {
    #[display("engaged")]
    Engaged,
    #[display("disengaged")]
    Disengaged,
}

impl Not for RelayState {
    type Output = RelayState;

    fn not(self) -> Self::Output {
        match self {
            RelayState::Engaged => RelayState::Disengaged,
            RelayState::Disengaged => RelayState::Engaged,
        }
    }
}

impl FromStr for RelayState {
    type Err = RelayError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "engaged" => Ok(RelayState::Engaged),
            "disengaged" => Ok(RelayState::Disengaged),
            _ => Err(RelayError::InvalidState { value: s.to_string() }),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SwitchStatus {
    Confirmed,
    HardwareMismatch,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChannelState {
    pub channel_id: ChannelId,
    pub state: RelayState,
    pub timestamp: DateTime,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SwitchResult {
    pub channel_id: ChannelId,
    pub previous_state: RelayState,
    pub new_state: RelayState,
    /// Level read back from the pin right after the write, `None` if it could not be read.
    pub confirmed_state: Option<RelayState>,
    pub timestamp: DateTime,
    pub status: SwitchStatus,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChannelSnapshot {
    pub channel_id: ChannelId,
    pub physical_pin: Pin,
    pub state: RelayState,
    pub last_changed_at: DateTime,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AllStates {
    pub channels: Vec<ChannelSnapshot>,
    pub timestamp: DateTime,
}

#[derive(Debug, Clone, Display, Error)]
pub enum RelayError {
    #[display("Unknown channel {channel_id}")]
    UnknownChannel { channel_id: ChannelId },

    #[display("Invalid state {value:?}, expected engaged or disengaged")]
    InvalidState { value: String },

    #[display("Relay bank is busy, lock not acquired within {timeout}")]
    EngineBusy { timeout: crate::core::time::Duration },

    #[display("Hardware failure on channel {channel_id}: {message}")]
    Hardware { channel_id: ChannelId, message: String },
}
