use std::collections::BTreeMap;

use derive_more::derive::{Display, Error};
use serde::{Deserialize, Serialize};

use crate::{
    core::{
        ChannelId, Pin,
        time::{DailyTimeRange, Time},
    },
    t,
};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SettingsDocument {
    pub pin_map: BTreeMap<ChannelId, Pin>,
    pub open_time: Time,
    pub close_time: Time,
    #[serde(default)]
    pub scheduled_channel_ids: Vec<ChannelId>,
    #[serde(default)]
    pub subscribed_topics: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SettingsUpdate {
    OpenTime(Time),
    CloseTime(Time),
    ScheduledChannels(Vec<ChannelId>),
    SubscribedTopics(Vec<String>),
}

#[derive(Debug, Clone, Display, Error)]
pub enum StoreError {
    #[display("Settings file {path} is corrupt: {message}")]
    CorruptSettings { path: String, message: String },

    #[display("Error writing settings file {path}: {message}")]
    Storage { path: String, message: String },

    #[display("Unknown channel {channel_id}")]
    UnknownChannel { channel_id: ChannelId },
}

impl Default for SettingsDocument {
    fn default() -> Self {
        let pins = [14, 15, 18, 23, 24, 25, 8, 7];
        let pin_map = pins
            .into_iter()
            .zip(1u8..)
            .filter_map(|(pin, id)| ChannelId::new(id).ok().map(|id| (id, Pin(pin))))
            .collect();

        Self {
            pin_map,
            open_time: t!(8:00),
            close_time: t!(20:00),
            scheduled_channel_ids: vec![],
            subscribed_topics: [
                "weather/#",
                "rpi/#",
                "relays/#",
                "relays_res",
                "relay/#",
                "settings/time/#",
                "settings/light_pins",
                "jobs",
            ]
            .into_iter()
            .map(String::from)
            .collect(),
        }
    }
}

impl SettingsDocument {
    pub fn schedule_window(&self) -> DailyTimeRange {
        DailyTimeRange::new(self.open_time, self.close_time)
    }

    /// Returns the updated copy, `self` stays untouched until the copy is persisted.
    pub fn with_update(&self, update: SettingsUpdate) -> Result<Self, StoreError> {
        let mut updated = self.clone();

        match update {
            SettingsUpdate::OpenTime(time) => updated.open_time = time,
            SettingsUpdate::CloseTime(time) => updated.close_time = time,
            SettingsUpdate::ScheduledChannels(channel_ids) => {
                updated.scheduled_channel_ids = channel_ids;
            }
            SettingsUpdate::SubscribedTopics(topics) => updated.subscribed_topics = topics,
        }

        updated.normalize();
        updated.check_scheduled_channels()?;
        Ok(updated)
    }

    pub(super) fn normalize(&mut self) {
        self.scheduled_channel_ids.sort();
        self.scheduled_channel_ids.dedup();
    }

    pub(super) fn check_scheduled_channels(&self) -> Result<(), StoreError> {
        match self
            .scheduled_channel_ids
            .iter()
            .find(|id| !self.pin_map.contains_key(*id))
        {
            Some(channel_id) => Err(StoreError::UnknownChannel {
                channel_id: *channel_id,
            }),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use assert_json_diff::assert_json_eq;
    use serde_json::json;

    use super::*;

    fn id(id: u8) -> ChannelId {
        ChannelId::new(id).unwrap()
    }

    #[test]
    fn test_default_document_layout() {
        let json = serde_json::to_value(SettingsDocument::default()).unwrap();

        assert_json_eq!(
            json,
            json!({
                "pin_map": { "1": 14, "2": 15, "3": 18, "4": 23, "5": 24, "6": 25, "7": 8, "8": 7 },
                "open_time": "08:00",
                "close_time": "20:00",
                "scheduled_channel_ids": [],
                "subscribed_topics": [
                    "weather/#", "rpi/#", "relays/#", "relays_res", "relay/#",
                    "settings/time/#", "settings/light_pins", "jobs"
                ]
            })
        );
    }

    #[test]
    fn test_scheduled_channels_are_deduplicated() {
        let doc = SettingsDocument::default()
            .with_update(SettingsUpdate::ScheduledChannels(vec![id(2), id(1), id(2)]))
            .unwrap();

        assert_eq!(doc.scheduled_channel_ids, vec![id(1), id(2)]);
    }

    #[test]
    fn test_unknown_scheduled_channel_is_rejected() {
        let result = SettingsDocument::default().with_update(SettingsUpdate::ScheduledChannels(vec![id(1), id(9)]));

        assert!(matches!(result, Err(StoreError::UnknownChannel { channel_id }) if channel_id == id(9)));
    }

    #[test]
    fn test_overnight_window_is_kept() {
        let doc = SettingsDocument::default()
            .with_update(SettingsUpdate::OpenTime(t!(22:00)))
            .unwrap()
            .with_update(SettingsUpdate::CloseTime(t!(6:00)))
            .unwrap();

        assert_eq!(doc.schedule_window(), t!(22:00 - 6:00));
    }

    #[test]
    fn test_invalid_time_in_document_fails_to_parse() {
        let result = serde_json::from_value::<SettingsDocument>(json!({
            "pin_map": { "1": 14 },
            "open_time": "8 o'clock",
            "close_time": "20:00"
        }));

        assert!(result.is_err());
    }
}
