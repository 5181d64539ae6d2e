//! Cancellable bridge to a fleet of Android devices reachable over ADB.
//!
//! [`AdbBridge`] wraps a blocking [`Transport`](adb::Transport) and exposes
//! async operations that all take a cancellation token.

pub mod adb;
pub mod cli;
pub mod error;
pub mod logging;
pub mod models;
pub mod settings;
pub mod utils;

pub use adb::{AdbBridge, AdbHostTransport, DeviceStateStream, PackageName, cancel_after};
pub use error::{BridgeError, BridgeResult, TransportError};
