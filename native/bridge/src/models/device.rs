use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::adb::RawState;

/// Manufacturer reported when the device could not tell us its own.
pub const UNKNOWN_MANUFACTURER: &str = "Unknown";

/// Canonical device state exposed to callers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceState {
    Offline,
    Booting,
    Unauthorized,
    Online,
    Unknown,
}

impl From<RawState> for DeviceState {
    fn from(state: RawState) -> Self {
        normalize(state)
    }
}

/// Maps a transport state onto [`DeviceState`].
///
/// Only the online, offline and unauthorized states have a canonical
/// counterpart. Everything else, including [`RawState::Invalid`] for a failed
/// query, is [`DeviceState::Unknown`].
pub fn normalize(state: RawState) -> DeviceState {
    match state {
        RawState::Online => DeviceState::Online,
        RawState::Offline => DeviceState::Offline,
        RawState::Unauthorized => DeviceState::Unauthorized,
        _ => DeviceState::Unknown,
    }
}

/// A device as reported by [`AdbBridge::devices`](crate::AdbBridge::devices)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Device {
    #[serde(rename = "device_id")]
    pub serial: String,
    #[serde(rename = "status")]
    pub state: DeviceState,
    pub model: String,
    pub manufacturer: String,
    #[serde(rename = "authorized")]
    pub is_authorized: bool,
}

impl Device {
    pub(crate) fn new(
        serial: String,
        state: DeviceState,
        model: String,
        manufacturer: String,
    ) -> Self {
        Self { serial, state, model, manufacturer, is_authorized: state == DeviceState::Online }
    }
}

/// A state transition of a watched device
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceStateChange {
    pub serial: String,
    pub old_state: DeviceState,
    pub new_state: DeviceState,
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
}

impl DeviceStateChange {
    /// Normalizes both states and stamps the change with the current time.
    pub(crate) fn observed(serial: String, old_state: RawState, new_state: RawState) -> Self {
        Self {
            serial,
            old_state: normalize(old_state),
            new_state: normalize(new_state),
            timestamp: OffsetDateTime::now_utc(),
        }
    }
}
