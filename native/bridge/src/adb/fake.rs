//! In-memory transport used by the unit tests.

use std::{
    path::Path,
    sync::{Arc, Mutex, mpsc as std_mpsc},
};

use tokio::sync::mpsc;

use super::{DeviceDescriptor, DeviceEvent, DeviceHandle, RawState, Transport};
use crate::{error::TransportError, utils::command_line};

type CallLog = Arc<Mutex<Vec<String>>>;

fn protocol(message: &str) -> TransportError {
    TransportError::Protocol(message.to_string())
}

#[derive(Default)]
pub(crate) struct FakeTransport {
    version: u32,
    devices: Vec<Arc<FakeDevice>>,
    list_error: Option<String>,
    listing_gate: Mutex<Option<std_mpsc::Receiver<()>>>,
    events: Mutex<Option<mpsc::Receiver<DeviceEvent>>>,
    calls: CallLog,
}

impl FakeTransport {
    pub fn new() -> Self {
        Self { version: 41, ..Default::default() }
    }

    pub fn with_device(mut self, mut device: FakeDevice) -> Self {
        device.calls = self.calls.clone();
        self.devices.push(Arc::new(device));
        self
    }

    pub fn version(mut self, version: u32) -> Self {
        self.version = version;
        self
    }

    pub fn list_error(mut self, message: &str) -> Self {
        self.list_error = Some(message.to_string());
        self
    }

    /// Makes `list_devices` block until the returned sender is dropped.
    pub fn block_listing(&self) -> std_mpsc::Sender<()> {
        let (tx, rx) = std_mpsc::channel();
        *self.listing_gate.lock().unwrap() = Some(rx);
        tx
    }

    /// Events handed out by the first `watch_devices` call.
    pub fn events(self, events: mpsc::Receiver<DeviceEvent>) -> Self {
        *self.events.lock().unwrap() = Some(events);
        self
    }

    /// Shell commands and file transfers, as `"<serial>: <command line>"`.
    pub fn calls(&self) -> CallLog {
        self.calls.clone()
    }

    pub fn into_arc(self) -> Arc<dyn Transport> {
        Arc::new(self)
    }
}

impl Transport for FakeTransport {
    fn server_version(&self) -> Result<u32, TransportError> {
        match &self.list_error {
            Some(message) => Err(protocol(message)),
            None => Ok(self.version),
        }
    }

    fn list_devices(&self) -> Result<Vec<DeviceDescriptor>, TransportError> {
        if let Some(gate) = self.listing_gate.lock().unwrap().as_ref() {
            let _ = gate.recv();
        }
        if let Some(message) = &self.list_error {
            return Err(protocol(message));
        }
        Ok(self
            .devices
            .iter()
            .map(|d| DeviceDescriptor { serial: d.serial.clone(), model: d.model.clone() })
            .collect())
    }

    fn device(&self, serial: &str) -> Result<Option<Arc<dyn DeviceHandle>>, TransportError> {
        Ok(self
            .devices
            .iter()
            .find(|d| d.serial == serial && !d.detached)
            .map(|d| d.clone() as Arc<dyn DeviceHandle>))
    }

    fn watch_devices(&self) -> Result<mpsc::Receiver<DeviceEvent>, TransportError> {
        self.events.lock().unwrap().take().ok_or_else(|| protocol("device tracking unavailable"))
    }
}

pub(crate) struct FakeDevice {
    serial: String,
    model: String,
    state: Result<RawState, String>,
    replies: Vec<(String, Result<String, String>)>,
    detached: bool,
    push_error: Option<String>,
    pull_error: Option<String>,
    calls: CallLog,
}

impl FakeDevice {
    pub fn new(serial: &str, model: &str) -> Self {
        Self {
            serial: serial.to_string(),
            model: model.to_string(),
            state: Ok(RawState::Online),
            replies: Vec::new(),
            detached: false,
            push_error: None,
            pull_error: None,
            calls: CallLog::default(),
        }
    }

    pub fn state(mut self, state: Result<RawState, &str>) -> Self {
        self.state = state.map_err(str::to_string);
        self
    }

    /// Replies to every command line starting with `prefix`; unmatched
    /// commands succeed with empty output.
    pub fn reply(mut self, prefix: &str, reply: Result<&str, &str>) -> Self {
        self.replies.push((prefix.to_string(), reply.map(str::to_string).map_err(str::to_string)));
        self
    }

    /// Listed by the transport but not resolvable to a handle.
    pub fn detached(mut self) -> Self {
        self.detached = true;
        self
    }

    pub fn push_error(mut self, message: &str) -> Self {
        self.push_error = Some(message.to_string());
        self
    }

    pub fn pull_error(mut self, message: &str) -> Self {
        self.pull_error = Some(message.to_string());
        self
    }

    fn record(&self, line: String) {
        self.calls.lock().unwrap().push(format!("{}: {line}", self.serial));
    }
}

impl DeviceHandle for FakeDevice {
    fn serial(&self) -> &str {
        &self.serial
    }

    fn state(&self) -> Result<RawState, TransportError> {
        self.state.clone().map_err(|message| protocol(&message))
    }

    fn run_command(&self, command: &str, args: &[&str]) -> Result<String, TransportError> {
        let line = command_line(command, args);
        self.record(line.clone());
        match self.replies.iter().find(|(prefix, _)| line.starts_with(prefix.as_str())) {
            Some((_, reply)) => reply.clone().map_err(|message| protocol(&message)),
            None => Ok(String::new()),
        }
    }

    fn push(&self, local: &Path, remote: &str) -> Result<(), TransportError> {
        self.record(format!("push {} {remote}", local.display()));
        match &self.push_error {
            Some(message) => Err(protocol(message)),
            None => Ok(()),
        }
    }

    fn pull(&self, remote: &str, local: &Path) -> Result<(), TransportError> {
        self.record(format!("pull {remote} {}", local.display()));
        match &self.pull_error {
            Some(message) => Err(protocol(message)),
            None => Ok(()),
        }
    }
}
