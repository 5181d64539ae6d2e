//! Command-line surface of the `adb-bridge` binary.

use std::{io::Write, path::PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use serde_json::json;
use tokio_stream::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument};

use crate::{adb::AdbBridge, models::ListPackageOptions};

/// Cancellable bridge to Android devices over ADB, printing JSON lines
#[derive(Parser, Debug)]
#[command(name = "adb-bridge", version, long_about = None)]
pub struct Cli {
    /// Settings file, defaults to the one in the user data directory
    #[arg(long, value_name = "PATH", global = true)]
    pub settings: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Print the ADB server protocol version
    Version,
    /// List attached devices
    Devices,
    /// List packages installed on a device
    Packages {
        serial: String,
        /// List system packages instead of third-party ones
        #[arg(long)]
        system: bool,
        /// Include packages uninstalled with their data kept
        #[arg(long)]
        uninstalled: bool,
    },
    /// Install or replace an APK
    Install { serial: String, apk: PathBuf },
    /// Uninstall a package
    Uninstall {
        serial: String,
        package: String,
        #[arg(long)]
        keep_data: bool,
        /// Only uninstall for this user
        #[arg(long, value_name = "ID")]
        user: Option<u32>,
    },
    /// Copy a local file to the device
    Push { serial: String, local: PathBuf, remote: String },
    /// Copy a file from the device
    Pull { serial: String, remote: String, local: PathBuf },
    /// Print state changes of a device until interrupted
    Watch { serial: String },
}

impl Command {
    /// Whether the configured command timeout applies. Watching runs until
    /// interrupted.
    pub fn is_bounded(&self) -> bool {
        !matches!(self, Command::Watch { .. })
    }
}

fn write_line<W: Write, T: Serialize + ?Sized>(out: &mut W, value: &T) -> Result<()> {
    serde_json::to_writer(&mut *out, value).context("Failed to serialize output")?;
    writeln!(out).context("Failed to write output")?;
    out.flush().context("Failed to flush output")
}

/// Runs `command`, writing one JSON document per line to `out`.
#[instrument(level = "debug", skip(bridge, token, out), err)]
pub async fn run<W: Write>(
    bridge: &AdbBridge,
    token: &CancellationToken,
    command: Command,
    out: &mut W,
) -> Result<()> {
    match command {
        Command::Version => {
            let version = bridge.version(token).await?;
            write_line(out, &json!({ "version": version }))?;
        }
        Command::Devices => {
            for device in bridge.devices(token).await? {
                write_line(out, &device)?;
            }
        }
        Command::Packages { serial, system, uninstalled } => {
            let options =
                ListPackageOptions { include_system: system, include_uninstalled: uninstalled };
            for package in bridge.packages(token, &serial, options).await? {
                write_line(out, &package)?;
            }
        }
        Command::Install { serial, apk } => {
            bridge.install(token, &serial, &apk).await?;
            write_line(out, &json!({ "device_id": serial, "installed": apk }))?;
        }
        Command::Uninstall { serial, package, keep_data, user } => {
            bridge.uninstall(token, &serial, &package, keep_data, user).await?;
            write_line(out, &json!({ "device_id": serial, "uninstalled": package }))?;
        }
        Command::Push { serial, local, remote } => {
            bridge.push(token, &serial, &local, &remote).await?;
            write_line(out, &json!({ "device_id": serial, "pushed": local, "to": remote }))?;
        }
        Command::Pull { serial, remote, local } => {
            bridge.pull(token, &serial, &remote, &local).await?;
            write_line(out, &json!({ "device_id": serial, "pulled": remote, "to": local }))?;
        }
        Command::Watch { serial } => {
            let mut changes = bridge.track_device_states(token, &serial).await?;
            while let Some(change) = changes.next().await {
                write_line(out, &change)?;
            }
            debug!("Device watch ended");
        }
    }
    Ok(())
}
