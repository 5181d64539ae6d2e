use std::{error::Error, sync::Arc};

use futures::future::try_join_all;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};

use super::{
    DeviceDescriptor, DeviceHandle, RawState, Transport, cancel::run_blocking,
    commands::resolve_device,
};
use crate::{
    error::{BridgeError, BridgeResult},
    models::{Device, UNKNOWN_MANUFACTURER, normalize},
};

const MANUFACTURER_PROPERTY: &str = "ro.product.manufacturer";

/// Per-field outcome of probing one device.
///
/// Each field keeps its own failure so the defaults applied in
/// [`DeviceProbe::into_device`] stay explicit.
#[derive(Debug)]
pub(crate) struct DeviceProbe {
    state: BridgeResult<RawState>,
    /// Only queried when the state query succeeded
    manufacturer: Option<BridgeResult<String>>,
}

impl DeviceProbe {
    /// Queries state and, if that worked, the manufacturer property.
    fn run(transport: &dyn Transport, serial: &str) -> Self {
        let handle = match resolve_device(transport, serial) {
            Ok(handle) => handle,
            Err(e) => return Self::failed(e),
        };
        let state = handle.state().map_err(BridgeError::from);
        let manufacturer = state.is_ok().then(|| read_manufacturer(handle.as_ref()));
        Self { state, manufacturer }
    }

    fn failed(error: BridgeError) -> Self {
        Self { state: Err(error), manufacturer: None }
    }

    /// Applies the default-on-error policy: a failed state query is
    /// [`RawState::Invalid`], a failed or empty manufacturer is "Unknown".
    fn into_device(self, descriptor: DeviceDescriptor) -> Device {
        let serial = descriptor.serial;
        let raw_state = self.state.unwrap_or_else(|e| {
            warn!(%serial, error = &e as &dyn Error, "Failed to query device state");
            RawState::Invalid
        });
        let manufacturer = match self.manufacturer {
            Some(Ok(manufacturer)) if !manufacturer.is_empty() => manufacturer,
            Some(Err(e)) => {
                debug!(%serial, error = &e as &dyn Error, "Failed to read manufacturer");
                UNKNOWN_MANUFACTURER.to_string()
            }
            _ => UNKNOWN_MANUFACTURER.to_string(),
        };
        Device::new(serial, normalize(raw_state), descriptor.model, manufacturer)
    }
}

fn read_manufacturer(handle: &dyn DeviceHandle) -> BridgeResult<String> {
    let output = handle.run_command("getprop", &[MANUFACTURER_PROPERTY]).map_err(|source| {
        BridgeError::Command {
            serial: handle.serial().to_string(),
            command: format!("getprop {MANUFACTURER_PROPERTY}"),
            source,
        }
    })?;
    Ok(output.trim().to_string())
}

/// Lists devices, probing each one concurrently.
///
/// Only a failure to get the device list fails the call; per-device failures
/// degrade the affected fields. The result keeps the transport's order.
#[instrument(level = "debug", skip(transport, token), err)]
pub(crate) async fn list_devices(
    transport: &Arc<dyn Transport>,
    token: &CancellationToken,
) -> BridgeResult<Vec<Device>> {
    let descriptors = run_blocking(token, "list_devices", {
        let transport = transport.clone();
        move || Ok(transport.list_devices()?)
    })
    .await?;

    let descriptors: Vec<_> = descriptors
        .into_iter()
        .filter(|d| {
            if d.serial.is_empty() {
                warn!(model = %d.model, "Skipping device list entry without serial");
            }
            !d.serial.is_empty()
        })
        .collect();
    debug!(count = descriptors.len(), "Got device list, probing devices");

    let probes = descriptors.iter().map(|descriptor| {
        let transport = transport.clone();
        let serial = descriptor.serial.clone();
        async move {
            let probe = run_blocking(token, "probe_device", move || {
                Ok(DeviceProbe::run(transport.as_ref(), &serial))
            })
            .await;
            match probe {
                Ok(probe) => Ok(probe),
                Err(BridgeError::Cancelled) => Err(BridgeError::Cancelled),
                Err(e) => Ok(DeviceProbe::failed(e)),
            }
        }
    });
    let probes = try_join_all(probes).await?;

    Ok(descriptors.into_iter().zip(probes).map(|(d, probe)| probe.into_device(d)).collect())
}
