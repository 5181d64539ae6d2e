//! Boundary to the ADB transport.
//!
//! Every call here is blocking and has no native cancellation. Callers go
//! through [`run_blocking`](super::cancel::run_blocking) instead of invoking
//! these methods from async code directly.

use std::{path::Path, sync::Arc};

use tokio::sync::mpsc;

use crate::error::TransportError;

/// Device state as reported by the transport, before normalization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RawState {
    /// Placeholder used when the state query itself could not complete
    Invalid,
    /// The device is not (or no longer) attached
    Disconnected,
    Offline,
    /// `device` on the wire
    Online,
    Unauthorized,
    Authorizing,
    Bootloader,
    Recovery,
    Sideload,
    NoPermissions,
    Host,
    Unknown,
}

impl From<&str> for RawState {
    fn from(value: &str) -> Self {
        match value.trim() {
            "device" => Self::Online,
            "offline" => Self::Offline,
            "unauthorized" => Self::Unauthorized,
            "authorizing" => Self::Authorizing,
            "bootloader" => Self::Bootloader,
            "recovery" => Self::Recovery,
            "sideload" => Self::Sideload,
            "host" => Self::Host,
            s if s.starts_with("no permissions") => Self::NoPermissions,
            _ => Self::Unknown,
        }
    }
}

impl From<forensic_adb::DeviceState> for RawState {
    fn from(state: forensic_adb::DeviceState) -> Self {
        use forensic_adb::DeviceState;
        match state {
            DeviceState::Device => Self::Online,
            DeviceState::Offline => Self::Offline,
            DeviceState::Unauthorized => Self::Unauthorized,
            DeviceState::Authorizing => Self::Authorizing,
            DeviceState::Bootloader => Self::Bootloader,
            DeviceState::Recovery => Self::Recovery,
            DeviceState::Sideload => Self::Sideload,
            DeviceState::NoPermissions => Self::NoPermissions,
            DeviceState::Host => Self::Host,
            DeviceState::Unknown => Self::Unknown,
        }
    }
}

/// One entry of the transport's device list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceDescriptor {
    pub serial: String,
    pub model: String,
}

/// A state transition observed by the transport's device watcher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceEvent {
    pub serial: String,
    pub old_state: RawState,
    pub new_state: RawState,
}

/// Host-level side of the transport.
pub trait Transport: Send + Sync + 'static {
    fn server_version(&self) -> Result<u32, TransportError>;

    fn list_devices(&self) -> Result<Vec<DeviceDescriptor>, TransportError>;

    /// Resolves a handle for `serial`, `None` if the transport does not know it.
    fn device(&self, serial: &str) -> Result<Option<Arc<dyn DeviceHandle>>, TransportError>;

    /// Subscribes to device events. The receiver closes when the transport
    /// stops watching.
    fn watch_devices(&self) -> Result<mpsc::Receiver<DeviceEvent>, TransportError>;
}

/// Per-device side of the transport.
pub trait DeviceHandle: Send + Sync {
    fn serial(&self) -> &str;

    fn state(&self) -> Result<RawState, TransportError>;

    /// Runs `command` in the device shell; `args` are quoted by the transport.
    fn run_command(&self, command: &str, args: &[&str]) -> Result<String, TransportError>;

    fn push(&self, local: &Path, remote: &str) -> Result<(), TransportError>;

    fn pull(&self, remote: &str, local: &Path) -> Result<(), TransportError>;
}
