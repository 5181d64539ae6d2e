use std::{fmt, path::Path, sync::Arc};

use derive_more::Debug;
use lazy_regex::{Lazy, Regex, lazy_regex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument};

use crate::{
    error::{BridgeError, BridgeResult},
    models::{Device, ListPackageOptions, Package},
};

mod cancel;
mod commands;
#[cfg(test)]
pub(crate) mod fake;
mod host;
mod registry;
mod transport;
mod watcher;

pub use cancel::cancel_after;
pub use host::{AdbHostDevice, AdbHostTransport};
pub use transport::{DeviceDescriptor, DeviceEvent, DeviceHandle, RawState, Transport};
pub use watcher::DeviceStateStream;

pub static PACKAGE_NAME_REGEX: Lazy<Regex> =
    lazy_regex!(r"^(?:[A-Za-z]{1}[\w]*\.)+[A-Za-z][\w]*$");

/// An Android package name that is safe to pass to `pm`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageName(String);

impl PackageName {
    pub fn parse(name: &str) -> BridgeResult<Self> {
        if PACKAGE_NAME_REGEX.is_match(name) {
            Ok(Self(name.to_string()))
        } else {
            Err(BridgeError::InvalidPackageName(name.to_string()))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PackageName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Async, cancellable front end over a blocking [`Transport`].
///
/// Every operation takes a [`CancellationToken`]. Cancelling it makes the
/// pending call return [`BridgeError::Cancelled`] right away, while the
/// transport call it was waiting on runs to completion in the background.
#[derive(Debug, Clone)]
pub struct AdbBridge {
    #[debug(skip)]
    transport: Arc<dyn Transport>,
}

impl AdbBridge {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self { transport }
    }

    /// Returns the ADB server protocol version
    #[instrument(level = "debug", skip(self, token), err, ret)]
    pub async fn version(&self, token: &CancellationToken) -> BridgeResult<u32> {
        let transport = self.transport.clone();
        cancel::run_blocking(token, "server_version", move || Ok(transport.server_version()?))
            .await
    }

    /// Lists attached devices with their normalized state and manufacturer
    #[instrument(level = "debug", skip(self, token), err)]
    pub async fn devices(&self, token: &CancellationToken) -> BridgeResult<Vec<Device>> {
        let devices = registry::list_devices(&self.transport, token).await?;
        debug!(count = devices.len(), "Listed devices");
        Ok(devices)
    }

    /// Streams state changes of `serial` until `token` is cancelled or the
    /// transport stops reporting.
    #[instrument(level = "debug", skip(self, token), err)]
    pub async fn track_device_states(
        &self,
        token: &CancellationToken,
        serial: &str,
    ) -> BridgeResult<DeviceStateStream> {
        watcher::watch(&self.transport, token, serial).await
    }

    pub async fn packages(
        &self,
        token: &CancellationToken,
        device_id: &str,
        options: ListPackageOptions,
    ) -> BridgeResult<Vec<Package>> {
        commands::list_packages(&self.transport, token, device_id, options).await
    }

    /// Installs (or replaces) the APK at `apk_path`
    pub async fn install(
        &self,
        token: &CancellationToken,
        device_id: &str,
        apk_path: &Path,
    ) -> BridgeResult<()> {
        commands::install(&self.transport, token, device_id, apk_path).await
    }

    /// Uninstalls `package`, for `user` only when given
    pub async fn uninstall(
        &self,
        token: &CancellationToken,
        device_id: &str,
        package: &str,
        keep_data: bool,
        user: Option<u32>,
    ) -> BridgeResult<()> {
        commands::uninstall(&self.transport, token, device_id, package, keep_data, user).await
    }

    pub async fn pull(
        &self,
        token: &CancellationToken,
        device_id: &str,
        remote: &str,
        local: &Path,
    ) -> BridgeResult<()> {
        commands::pull(&self.transport, token, device_id, remote, local).await
    }

    pub async fn push(
        &self,
        token: &CancellationToken,
        device_id: &str,
        local: &Path,
        remote: &str,
    ) -> BridgeResult<()> {
        commands::push(&self.transport, token, device_id, local, remote).await
    }
}
