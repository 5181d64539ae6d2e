use std::path::PathBuf;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Settings {
    /// Path to the `adb` binary, looked up in `PATH` when empty
    pub adb_path: String,
    pub adb_host: String,
    pub adb_port: u16,
    /// Deadline applied to every one-shot command, 0 disables it
    pub command_timeout_secs: u64,
    pub log_dir: PathBuf,
    /// Default filter directive when `RUST_LOG` is not set
    pub log_level: String,
}

impl Settings {
    pub fn adb_path(&self) -> Option<&str> {
        if self.adb_path.is_empty() { None } else { Some(&self.adb_path) }
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            adb_path: String::new(),
            adb_host: "127.0.0.1".to_string(),
            adb_port: 5037,
            command_timeout_secs: 30,
            log_dir: dirs::data_dir()
                .unwrap_or_else(std::env::temp_dir)
                .join("adb-bridge")
                .join("logs"),
            log_level: "info".to_string(),
        }
    }
}
