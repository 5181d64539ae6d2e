use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, info_span, instrument, trace};

use super::{DeviceEvent, Transport, cancel::run_blocking};
use crate::{error::BridgeResult, models::DeviceStateChange};

/// State changes of one device. Ends when the watch is cancelled or the
/// transport stops reporting events.
pub type DeviceStateStream = ReceiverStream<DeviceStateChange>;

/// Subscribes to the transport's device events and republishes the ones for
/// `serial`.
///
/// The subscription happens before this returns, so a failure to subscribe is
/// reported here rather than as an empty stream.
#[instrument(level = "debug", skip(transport, token), err)]
pub(crate) async fn watch(
    transport: &Arc<dyn Transport>,
    token: &CancellationToken,
    serial: &str,
) -> BridgeResult<DeviceStateStream> {
    let upstream = run_blocking(token, "watch_devices", {
        let transport = transport.clone();
        move || Ok(transport.watch_devices()?)
    })
    .await?;

    let (sender, receiver) = mpsc::channel(1);
    tokio::spawn(
        forward_changes(serial.to_string(), upstream, sender, token.clone())
            .instrument(info_span!("task_watch_device", serial = %serial)),
    );
    Ok(ReceiverStream::new(receiver))
}

async fn forward_changes(
    serial: String,
    mut upstream: mpsc::Receiver<DeviceEvent>,
    sender: mpsc::Sender<DeviceStateChange>,
    token: CancellationToken,
) {
    loop {
        let event = tokio::select! {
            biased;
            _ = token.cancelled() => {
                debug!("Watch cancelled");
                break;
            }
            _ = sender.closed() => {
                debug!("Stream dropped by consumer");
                break;
            }
            event = upstream.recv() => match event {
                Some(event) => event,
                None => {
                    debug!("Transport stopped reporting device events");
                    break;
                }
            },
        };

        if event.serial != serial {
            trace!(other = %event.serial, "Ignoring event for another device");
            continue;
        }

        let change = DeviceStateChange::observed(event.serial, event.old_state, event.new_state);
        debug!(old_state = ?change.old_state, new_state = ?change.new_state, "Device state changed");
        tokio::select! {
            biased;
            _ = token.cancelled() => {
                debug!("Watch cancelled while delivering a change");
                break;
            }
            sent = sender.send(change) => {
                if sent.is_err() {
                    break;
                }
            }
        }
    }
}
