//! [`Transport`] implementation talking to a local ADB server.

use std::{
    collections::BTreeMap,
    error::Error,
    future::Future,
    io,
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

use anyhow::{Context, Result, anyhow, bail};
use derive_more::Debug;
use forensic_adb::{Host, UnixPath};
use tempfile::NamedTempFile;
use tokio::{
    io::{AsyncWriteExt, BufReader},
    process::Command,
    runtime::Handle,
    sync::mpsc,
    time::{self, timeout},
};
use tokio_stream::StreamExt;
use tracing::{Instrument, debug, error, info, info_span, instrument, trace, warn};

use super::{DeviceDescriptor, DeviceEvent, DeviceHandle, RawState, Transport};
use crate::{
    error::TransportError,
    models::Settings,
    utils::{command_line, resolve_binary_path},
};

/// Buffered device events per subscription
const EVENT_BUFFER: usize = 16;
const SERVER_CHECK_TIMEOUT: Duration = Duration::from_millis(1000);
const SERVER_START_TIMEOUT: Duration = Duration::from_millis(10000);
const TRACKER_RESTART_DELAY: Duration = Duration::from_secs(1);

/// ADB server client exposing the blocking [`Transport`] interface.
///
/// Calls are executed on `runtime`, so the blocking methods must not be used
/// from async code; the bridge dispatches them onto the blocking pool.
#[derive(Debug, Clone)]
pub struct AdbHostTransport {
    host: Host,
    #[debug(skip)]
    runtime: Handle,
}

impl AdbHostTransport {
    pub fn new(host: Host, runtime: Handle) -> Self {
        Self { host, runtime }
    }

    /// Connects to the server configured in `settings`, starting it if needed.
    #[instrument(level = "debug", skip(settings), err)]
    pub async fn connect(settings: &Settings) -> Result<Self> {
        let host = Host { host: Some(settings.adb_host.clone()), port: Some(settings.adb_port) };
        let transport = Self::new(host, Handle::current());
        transport.ensure_server_running(settings.adb_path()).await?;
        Ok(transport)
    }

    /// Starts the ADB server with `adb start-server` unless it already answers
    #[instrument(level = "debug", skip(self), err)]
    async fn ensure_server_running(&self, adb_path: Option<&str>) -> Result<()> {
        if self.is_server_running().await {
            return Ok(());
        }

        info!("ADB server not running, attempting to start it");
        let adb_path = resolve_binary_path(adb_path, "adb").context("ADB binary not found")?;
        info!(path = %adb_path.display(), "Found ADB binary, starting server");

        let output = timeout(SERVER_START_TIMEOUT, {
            let mut command = Command::new(&adb_path);
            command.arg("start-server");
            #[cfg(target_os = "windows")]
            // CREATE_NO_WINDOW
            command.creation_flags(0x08000000);
            command.output()
        })
        .await
        .map_err(|_| anyhow!("Timed out while starting ADB server"))?
        .context("Failed to start ADB server")?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            bail!("Failed to start ADB server: {}", stderr.trim());
        }
        info!("ADB server started successfully");
        Ok(())
    }

    /// Checks if the ADB server is running
    #[instrument(level = "debug", skip(self), ret)]
    async fn is_server_running(&self) -> bool {
        match timeout(SERVER_CHECK_TIMEOUT, self.host.check_host_running()).await {
            Ok(Ok(_)) => true,
            Ok(Err(e)) => {
                debug!(error = &e as &dyn Error, "ADB server check failed");
                false
            }
            Err(_) => {
                debug!("Timed out while checking ADB server status (likely not running)");
                false
            }
        }
    }

    fn block_on<F: Future>(&self, future: F) -> F::Output {
        self.runtime.block_on(future)
    }
}

impl Transport for AdbHostTransport {
    #[instrument(level = "debug", skip(self), err)]
    fn server_version(&self) -> Result<u32, TransportError> {
        let reply = self.block_on(self.host.execute_host_command("version", true, true))?;
        u32::from_str_radix(reply.trim(), 16).map_err(|e| {
            TransportError::Protocol(format!("Unexpected version reply '{}': {e}", reply.trim()))
        })
    }

    #[instrument(level = "debug", skip(self), err)]
    fn list_devices(&self) -> Result<Vec<DeviceDescriptor>, TransportError> {
        let devices = self.block_on(self.host.devices::<Vec<_>>())?;
        Ok(devices
            .into_iter()
            .map(|d| DeviceDescriptor {
                model: d.info.get("model").cloned().unwrap_or_default(),
                serial: d.serial,
            })
            .collect())
    }

    #[instrument(level = "debug", skip(self), err)]
    fn device(&self, serial: &str) -> Result<Option<Arc<dyn DeviceHandle>>, TransportError> {
        let Some(info) = self
            .block_on(self.host.devices::<Vec<_>>())?
            .into_iter()
            .find(|d| d.serial == serial)
        else {
            return Ok(None);
        };
        let inner =
            self.block_on(forensic_adb::Device::new(self.host.clone(), info.serial, info.info))?;
        Ok(Some(Arc::new(AdbHostDevice {
            host: self.host.clone(),
            inner,
            runtime: self.runtime.clone(),
        })))
    }

    fn watch_devices(&self) -> Result<mpsc::Receiver<DeviceEvent>, TransportError> {
        let (sender, receiver) = mpsc::channel(EVENT_BUFFER);
        self.runtime.spawn(
            track_device_events(self.host.clone(), sender)
                .instrument(info_span!("task_track_devices")),
        );
        Ok(receiver)
    }
}

/// A device resolved through [`AdbHostTransport::device`]
#[derive(Debug)]
pub struct AdbHostDevice {
    host: Host,
    inner: forensic_adb::Device,
    #[debug(skip)]
    runtime: Handle,
}

impl DeviceHandle for AdbHostDevice {
    fn serial(&self) -> &str {
        &self.inner.serial
    }

    #[instrument(level = "debug", skip(self), fields(serial = %self.inner.serial), err)]
    fn state(&self) -> Result<RawState, TransportError> {
        let command = format!("host-serial:{}:get-state", self.inner.serial);
        let reply = self.runtime.block_on(self.host.execute_command(&command, true, true))?;
        Ok(RawState::from(reply.as_str()))
    }

    #[instrument(level = "debug", skip(self), fields(serial = %self.inner.serial), err)]
    fn run_command(&self, command: &str, args: &[&str]) -> Result<String, TransportError> {
        let line = command_line(command, args);
        let output = self.runtime.block_on(self.inner.execute_host_shell_command(&line))?;
        trace!(%output, "Shell command executed");
        Ok(output)
    }

    #[instrument(level = "debug", skip(self), fields(serial = %self.inner.serial), err)]
    fn push(&self, local: &Path, remote: &str) -> Result<(), TransportError> {
        self.runtime.block_on(async {
            let mut file = BufReader::new(tokio::fs::File::open(local).await?);
            self.inner.push(&mut file, UnixPath::new(remote), 0o644).await?;
            Ok(())
        })
    }

    #[instrument(level = "debug", skip(self), fields(serial = %self.inner.serial), err)]
    fn pull(&self, remote: &str, local: &Path) -> Result<(), TransportError> {
        let download = StagedDownload::new(local)?;
        self.runtime.block_on(async {
            let mut file = download.file()?;
            self.inner.pull(UnixPath::new(remote), &mut file).await?;
            file.flush().await?;
            Ok::<_, TransportError>(())
        })?;
        download.commit()?;
        Ok(())
    }
}

/// Pull target that only replaces `target` once the transfer went through.
///
/// Data lands in a temporary file next to `target`, which is removed if the
/// download is dropped without [`commit`](Self::commit).
#[derive(Debug)]
struct StagedDownload {
    staging: NamedTempFile,
    target: PathBuf,
}

impl StagedDownload {
    fn new(target: &Path) -> io::Result<Self> {
        let dir = match target.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        Ok(Self { staging: NamedTempFile::new_in(dir)?, target: target.to_path_buf() })
    }

    fn file(&self) -> io::Result<tokio::fs::File> {
        Ok(tokio::fs::File::from_std(self.staging.reopen()?))
    }

    fn commit(self) -> io::Result<()> {
        self.staging.persist(&self.target).map_err(|e| e.error)?;
        Ok(())
    }
}

/// Last reported state per serial for one tracker subscription
#[derive(Debug, Default)]
struct KnownStates(BTreeMap<String, RawState>);

impl KnownStates {
    /// Records `state` for `serial` and returns the transition, if any.
    ///
    /// A serial seen for the first time transitions from [`RawState::Disconnected`].
    fn apply(&mut self, serial: &str, state: RawState) -> Option<DeviceEvent> {
        let old_state = self.0.insert(serial.to_string(), state).unwrap_or(RawState::Disconnected);
        (old_state != state).then(|| DeviceEvent {
            serial: serial.to_string(),
            old_state,
            new_state: state,
        })
    }

    /// Reports every known device as disconnected and forgets it.
    fn disconnect_all(&mut self) -> Vec<DeviceEvent> {
        std::mem::take(&mut self.0)
            .into_iter()
            .filter(|(_, state)| *state != RawState::Disconnected)
            .map(|(serial, old_state)| DeviceEvent {
                serial,
                old_state,
                new_state: RawState::Disconnected,
            })
            .collect()
    }
}

/// Feeds `sender` from `track-devices` until the receiver goes away or the
/// tracker fails before producing anything.
async fn track_device_events(host: Host, sender: mpsc::Sender<DeviceEvent>) {
    let mut known = KnownStates::default();
    loop {
        debug!("Starting track_devices loop");
        let stream = host.track_devices();
        tokio::pin!(stream);
        let mut got_update = false;

        loop {
            let update = tokio::select! {
                _ = sender.closed() => {
                    debug!("Event receiver dropped, stopping device tracking");
                    return;
                }
                update = stream.next() => update,
            };
            match update {
                Some(Ok(brief)) => {
                    got_update = true;
                    let Some(event) = known.apply(&brief.serial, brief.state.into()) else {
                        continue;
                    };
                    trace!(?event, "Device event");
                    if sender.send(event).await.is_err() {
                        return;
                    }
                }
                Some(Err(e)) if got_update => {
                    warn!(
                        error = &e as &dyn Error,
                        "track_devices stream returned an unexpected error, restarting"
                    );
                    break;
                }
                Some(Err(e)) => {
                    error!(error = &e as &dyn Error, "Failed to start track_devices stream");
                    return;
                }
                None if got_update => {
                    debug!("track_devices stream ended, restarting");
                    break;
                }
                None => {
                    error!("track_devices stream ended without reporting any device");
                    return;
                }
            }
        }

        // States from before the restart no longer describe the new server
        for event in known.disconnect_all() {
            if sender.send(event).await.is_err() {
                return;
            }
        }
        time::sleep(TRACKER_RESTART_DELAY).await;
    }
}
