use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use fs_err as fs;
use tracing::{debug, info, instrument};

pub use crate::models::Settings;

impl Settings {
    /// Default settings file location: `<data dir>/adb-bridge/settings.json`
    pub fn default_path() -> Result<PathBuf> {
        let data_dir = dirs::data_dir().context("Failed to get data directory")?;
        Ok(data_dir.join("adb-bridge").join("settings.json"))
    }

    /// Load settings from file or return defaults if file doesn't exist
    #[instrument(level = "debug", err)]
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            info!(path = %path.display(), "Settings file doesn't exist, using defaults");
            return Ok(Self::default());
        }

        info!(path = %path.display(), "Loading settings from file");
        let file_content = fs::read_to_string(path).context("Failed to read settings file")?;
        let settings: Settings =
            serde_json::from_str(&file_content).context("Failed to parse settings file")?;

        debug!(?settings, "Loaded settings");
        Ok(settings)
    }

    /// Save settings to file
    #[instrument(level = "debug", skip(self), err)]
    pub fn save(&self, path: &Path) -> Result<()> {
        info!(path = %path.display(), "Saving settings to file");
        let settings_json =
            serde_json::to_string_pretty(self).context("Failed to serialize settings")?;

        if let Some(parent) = path.parent()
            && !parent.exists()
        {
            info!(path = %parent.display(), "Creating settings directory");
            fs::create_dir_all(parent).context("Failed to create settings directory")?;
        }

        fs::write(path, settings_json).context("Failed to write settings file")?;
        Ok(())
    }
}
