use anyhow::{Context, Result};
use fs_err as fs;
use time::macros::format_description;
use tracing_appender::{
    non_blocking::WorkerGuard,
    rolling::{RollingFileAppender, Rotation},
};
use tracing_subscriber::{
    EnvFilter, fmt, fmt::time::LocalTime, layer::SubscriberExt, util::SubscriberInitExt,
};

use crate::models::Settings;

/// Installs the global subscriber: stderr plus a daily rotated file under
/// `settings.log_dir`.
///
/// `RUST_LOG` takes precedence over `settings.log_level`. The returned guard
/// flushes the file writer and must be held until exit.
pub fn setup_logging(settings: &Settings) -> Result<WorkerGuard> {
    fs::create_dir_all(&settings.log_dir).context("Failed to create logs directory")?;
    let file_appender = RollingFileAppender::builder()
        .rotation(Rotation::DAILY)
        .max_log_files(10)
        .filename_prefix("adb-bridge")
        .filename_suffix("log")
        .build(&settings.log_dir)
        .context("Failed to initialize file appender")?;
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(&settings.log_level)
            .with_context(|| format!("Invalid log level '{}'", settings.log_level))?,
    };
    let timer = LocalTime::new(format_description!(
        "[year]-[month]-[day] [hour]:[minute]:[second].[subsecond digits:3]"
    ));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_timer(timer.clone()).with_writer(std::io::stderr))
        .with(
            fmt::layer()
                .with_ansi(false) // Disable ANSI colors
                .with_timer(timer)
                .with_writer(non_blocking),
        )
        .try_init()
        .context("Failed to set global subscriber")?;
    Ok(guard)
}
