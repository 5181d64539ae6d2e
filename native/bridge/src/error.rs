use std::path::PathBuf;

use thiserror::Error;

/// A specialized `Result` type for bridge operations.
pub type BridgeResult<T> = Result<T, BridgeError>;

/// Failure reported by the ADB transport itself.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error(transparent)]
    Adb(#[from] forensic_adb::DeviceError),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Protocol(String),
}

/// The error type for all public bridge operations.
#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("ADB transport call failed: {0}")]
    Transport(#[from] TransportError),

    #[error("Device '{serial}' not found")]
    DeviceNotFound { serial: String },

    #[error("Command `{command}` failed on {serial}: {source}")]
    Command {
        serial: String,
        command: String,
        #[source]
        source: TransportError,
    },

    #[error("Command `{command}` was rejected by {serial}: {output}")]
    CommandRejected { serial: String, command: String, output: String },

    #[error("Invalid package name: '{0}'")]
    InvalidPackageName(String),

    #[error("Local file {path:?} is not usable: {source}")]
    LocalFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Operation cancelled before the transport replied")]
    Cancelled,

    #[error("Worker running `{operation}` exited without reporting a result")]
    WorkerLost { operation: &'static str },
}

impl BridgeError {
    /// True when the caller gave up waiting, as opposed to the operation failing.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, BridgeError::Cancelled)
    }
}
