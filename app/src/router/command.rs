use serde_json::Value;

use crate::{
    core::{ChannelId, time::Time},
    relay::RelayState,
    router::CommandError,
};

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    GetRelayState { channel_id: ChannelId },
    SetRelayState { channel_id: ChannelId, state: RelayState },
    ToggleRelay { channel_id: ChannelId },
    GetAllRelayStates,
    RunPlaytime,
    GetTemperature,
    GetHumidity,
    SetOpenTime { time: Time },
    SetCloseTime { time: Time },
    SetScheduledChannels { channel_ids: Vec<ChannelId> },
    SetSubscribedTopics { topics: Vec<String> },
    ListScheduledJobs,
    GetSettings,
    ReloadSettings,
}

impl Command {
    pub fn name(&self) -> &'static str {
        match self {
            Command::GetRelayState { .. } => "get_relay_state",
            Command::SetRelayState { .. } => "set_relay_state",
            Command::ToggleRelay { .. } => "toggle_relay",
            Command::GetAllRelayStates => "get_all_relay_states",
            Command::RunPlaytime => "run_playtime",
            Command::GetTemperature => "get_temperature",
            Command::GetHumidity => "get_humidity",
            Command::SetOpenTime { .. } => "set_open_time",
            Command::SetCloseTime { .. } => "set_close_time",
            Command::SetScheduledChannels { .. } => "set_scheduled_channels",
            Command::SetSubscribedTopics { .. } => "set_subscribed_topics",
            Command::ListScheduledJobs => "list_scheduled_jobs",
            Command::GetSettings => "get_settings",
            Command::ReloadSettings => "reload_settings",
        }
    }

    /// Decodes a command by name. The payload is JSON or plain text, see the `parse_*` helpers.
    pub fn decode(name: &str, payload: &str) -> Result<Self, CommandError> {
        let command = match name {
            "get_relay_state" => Command::GetRelayState {
                channel_id: parse_channel_id(payload)?,
            },
            "set_relay_state" => {
                let (channel_id, state) = parse_channel_and_state(payload)?;
                Command::SetRelayState { channel_id, state }
            }
            "toggle_relay" => Command::ToggleRelay {
                channel_id: parse_channel_id(payload)?,
            },
            "get_all_relay_states" => Command::GetAllRelayStates,
            "run_playtime" => Command::RunPlaytime,
            "get_temperature" => Command::GetTemperature,
            "get_humidity" => Command::GetHumidity,
            "set_open_time" => Command::SetOpenTime {
                time: parse_time(payload)?,
            },
            "set_close_time" => Command::SetCloseTime {
                time: parse_time(payload)?,
            },
            "set_scheduled_channels" => Command::SetScheduledChannels {
                channel_ids: parse_channel_ids(payload)?,
            },
            "set_subscribed_topics" => Command::SetSubscribedTopics {
                topics: parse_topics(payload)?,
            },
            "list_scheduled_jobs" => Command::ListScheduledJobs,
            "get_settings" => Command::GetSettings,
            "reload_settings" => Command::ReloadSettings,
            _ => {
                return Err(CommandError::UnknownCommand {
                    name: name.to_string(),
                });
            }
        };

        Ok(command)
    }

    /// Maps an MQTT topic to a command. `None` for topics without a command, those are ignored.
    pub fn from_topic(topic: &str, payload: &str) -> Option<Result<Self, CommandError>> {
        let decoded = match topic {
            "relay/on" => parse_channel_id(payload).map(|channel_id| Command::SetRelayState {
                channel_id,
                state: RelayState::Engaged,
            }),
            "relay/off" => parse_channel_id(payload).map(|channel_id| Command::SetRelayState {
                channel_id,
                state: RelayState::Disengaged,
            }),
            "relay/toggle" | "relay/switch" => Command::decode("toggle_relay", payload),
            "relay/state" => Command::decode("get_relay_state", payload),
            "relay/set" => Command::decode("set_relay_state", payload),
            "relays" => Ok(Command::GetAllRelayStates),
            "rpi/playtime" => Ok(Command::RunPlaytime),
            "rpi/settings" => Ok(Command::GetSettings),
            "rpi/settings/reload" => Ok(Command::ReloadSettings),
            "weather/temperature" => Ok(Command::GetTemperature),
            "weather/humidity" => Ok(Command::GetHumidity),
            "settings/time/open" => Command::decode("set_open_time", payload),
            "settings/time/close" => Command::decode("set_close_time", payload),
            "settings/light_pins" => Command::decode("set_scheduled_channels", payload),
            "jobs" => Ok(Command::ListScheduledJobs),
            _ => match topic.strip_prefix("relays/") {
                Some(channel) => parse_channel_id(channel).map(|channel_id| Command::GetRelayState { channel_id }),
                None => return None,
            },
        };

        Some(decoded)
    }
}

fn invalid(message: impl Into<String>) -> CommandError {
    CommandError::InvalidPayload {
        message: message.into(),
    }
}

fn parse_json(payload: &str) -> Option<Value> {
    serde_json::from_str(payload.trim()).ok()
}

/// `3`, `"3"` or `{"channel_id": 3}`.
pub fn parse_channel_id(payload: &str) -> Result<ChannelId, CommandError> {
    match parse_json(payload) {
        Some(value) => channel_id_from_value(&value),
        None => payload.trim().parse().map_err(|e: anyhow::Error| invalid(e.to_string())),
    }
}

fn channel_id_from_value(value: &Value) -> Result<ChannelId, CommandError> {
    match value {
        Value::Number(n) => n
            .as_u64()
            .and_then(|n| u8::try_from(n).ok())
            .ok_or_else(|| invalid(format!("Invalid channel id {}", n)))
            .and_then(|n| ChannelId::new(n).map_err(|e| invalid(e.to_string()))),
        Value::String(s) => s.parse().map_err(|e: anyhow::Error| invalid(e.to_string())),
        Value::Object(map) => match map.get("channel_id") {
            Some(Value::Object(_)) | None => Err(invalid("Field channel_id missing")),
            Some(value) => channel_id_from_value(value),
        },
        other => Err(invalid(format!("Expected a channel id, got {}", other))),
    }
}

/// `{"channel_id": 3, "state": "engaged"}`. A state outside the two state words is `InvalidState`.
pub fn parse_channel_and_state(payload: &str) -> Result<(ChannelId, RelayState), CommandError> {
    let Some(Value::Object(map)) = parse_json(payload) else {
        return Err(invalid("Expected an object with channel_id and state"));
    };

    let channel_id = match map.get("channel_id") {
        Some(value @ (Value::Number(_) | Value::String(_))) => channel_id_from_value(value)?,
        _ => return Err(invalid("Field channel_id missing")),
    };

    let state = match map.get("state") {
        Some(Value::String(s)) => s.parse::<RelayState>()?,
        Some(other) => other.to_string().parse::<RelayState>()?,
        None => return Err(invalid("Field state missing")),
    };

    Ok((channel_id, state))
}

/// `08:00`, `"08:00"` or `{"time": "08:00"}`.
pub fn parse_time(payload: &str) -> Result<Time, CommandError> {
    let text = match parse_json(payload) {
        Some(Value::String(s)) => s,
        Some(Value::Object(map)) => match map.get("time") {
            Some(Value::String(s)) => s.clone(),
            _ => return Err(invalid("Field time missing")),
        },
        Some(other) => return Err(invalid(format!("Expected a time HH:MM, got {}", other))),
        None => payload.trim().to_string(),
    };

    text.parse().map_err(|e: anyhow::Error| invalid(e.to_string()))
}

/// `[1, 2]`, `"1,2"`, `1,2` or `{"channel_ids": [1, 2]}`. An empty list is valid.
pub fn parse_channel_ids(payload: &str) -> Result<Vec<ChannelId>, CommandError> {
    match parse_json(payload) {
        Some(Value::Array(values)) => values.iter().map(channel_id_from_value).collect(),
        Some(Value::String(s)) => parse_channel_id_list(&s),
        Some(Value::Number(_)) => Ok(vec![parse_channel_id(payload)?]),
        Some(Value::Object(map)) => match map.get("channel_ids") {
            Some(Value::Array(values)) => values.iter().map(channel_id_from_value).collect(),
            _ => Err(invalid("Field channel_ids missing")),
        },
        Some(other) => Err(invalid(format!("Expected a list of channel ids, got {}", other))),
        None => parse_channel_id_list(payload),
    }
}

fn parse_channel_id_list(text: &str) -> Result<Vec<ChannelId>, CommandError> {
    text.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| s.parse().map_err(|e: anyhow::Error| invalid(e.to_string())))
        .collect()
}

/// `["relay/#", "rpi/+"]`, `relay/#,rpi/+` or `{"topics": [...]}`. At least one topic is required.
pub fn parse_topics(payload: &str) -> Result<Vec<String>, CommandError> {
    let topics: Vec<String> = match parse_json(payload) {
        Some(Value::Array(values)) => topics_from_values(&values)?,
        Some(Value::Object(map)) => match map.get("topics") {
            Some(Value::Array(values)) => topics_from_values(values)?,
            _ => return Err(invalid("Field topics missing")),
        },
        Some(Value::String(s)) => s.split(',').map(|t| t.trim().to_string()).collect(),
        Some(other) => return Err(invalid(format!("Expected a list of topics, got {}", other))),
        None => payload.split(',').map(|t| t.trim().to_string()).collect(),
    };

    if topics.iter().any(String::is_empty) {
        return Err(invalid("Topics must not be blank"));
    }
    if topics.is_empty() {
        return Err(invalid("At least one topic is required"));
    }

    Ok(topics)
}

fn topics_from_values(values: &[Value]) -> Result<Vec<String>, CommandError> {
    values
        .iter()
        .map(|value| match value {
            Value::String(s) => Ok(s.trim().to_string()),
            other => Err(invalid(format!("Expected a topic, got {}", other))),
        })
        .collect()
}
