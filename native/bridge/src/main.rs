use std::{error::Error, process::ExitCode, sync::Arc, time::Duration};

use adb_bridge::{
    AdbBridge, AdbHostTransport, cancel_after,
    cli::{self, Cli},
    logging::setup_logging,
    models::Settings,
};
use anyhow::{Context, Result};
use clap::Parser;
use mimalloc::MiMalloc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

#[tokio::main(flavor = "multi_thread")]
async fn main() -> ExitCode {
    let args = Cli::parse();
    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = e.as_ref() as &dyn Error, "Command failed");
            eprintln!("Error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(args: Cli) -> Result<()> {
    let settings_path = match args.settings {
        Some(path) => path,
        None => Settings::default_path()?,
    };
    let settings = Settings::load(&settings_path)?;

    let _guard = setup_logging(&settings);
    if let Err(e) = &_guard {
        eprintln!("Failed to setup logging: {e:#}");
    }
    info!(version = env!("CARGO_PKG_VERSION"), "Starting adb-bridge");

    let transport =
        AdbHostTransport::connect(&settings).await.context("Failed to connect to ADB server")?;
    let bridge = AdbBridge::new(Arc::new(transport));

    let root_token = CancellationToken::new();
    tokio::spawn({
        let root_token = root_token.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Interrupted, cancelling");
                root_token.cancel();
            }
        }
    });

    let token = if args.command.is_bounded() && settings.command_timeout_secs > 0 {
        cancel_after(&root_token, Duration::from_secs(settings.command_timeout_secs))
    } else {
        root_token.child_token()
    };

    let mut stdout = std::io::stdout().lock();
    cli::run(&bridge, &token, args.command, &mut stdout).await
}
