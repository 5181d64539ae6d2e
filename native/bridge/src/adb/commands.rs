use std::{
    error::Error,
    path::{Path, PathBuf},
    sync::Arc,
};

use humansize::{DECIMAL, format_size};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use super::{DeviceHandle, PackageName, Transport, cancel::run_blocking};
use crate::{
    error::{BridgeError, BridgeResult},
    models::{ListPackageOptions, Package, parse_packages},
    utils::command_line,
};

/// Where packages are staged on the device before `pm install`
const STAGING_DIR: &str = "/data/local/tmp";

/// Resolves a device handle, mapping an unknown serial to `DeviceNotFound`.
pub(crate) fn resolve_device(
    transport: &dyn Transport,
    serial: &str,
) -> BridgeResult<Arc<dyn DeviceHandle>> {
    transport
        .device(serial)?
        .ok_or_else(|| BridgeError::DeviceNotFound { serial: serial.to_string() })
}

/// Runs a shell command, attributing failures to the command line.
fn run_command(handle: &dyn DeviceHandle, command: &str, args: &[&str]) -> BridgeResult<String> {
    handle.run_command(command, args).map_err(|source| BridgeError::Command {
        serial: handle.serial().to_string(),
        command: command_line(command, args),
        source,
    })
}

/// `pm` reports failures on its output rather than through the exit status
fn ensure_pm_success(handle: &dyn DeviceHandle, command: String, output: &str) -> BridgeResult<()> {
    if output.lines().any(|line| line.trim() == "Success") {
        Ok(())
    } else {
        Err(BridgeError::CommandRejected {
            serial: handle.serial().to_string(),
            command,
            output: output.trim().to_string(),
        })
    }
}

fn local_file_size(path: &Path) -> BridgeResult<u64> {
    let metadata = fs_err::metadata(path)
        .map_err(|source| BridgeError::LocalFile { path: path.to_path_buf(), source })?;
    if !metadata.is_file() {
        return Err(BridgeError::LocalFile {
            path: path.to_path_buf(),
            source: std::io::Error::new(std::io::ErrorKind::InvalidInput, "not a regular file"),
        });
    }
    Ok(metadata.len())
}

#[instrument(level = "debug", skip(transport, token), err)]
pub(crate) async fn list_packages(
    transport: &Arc<dyn Transport>,
    token: &CancellationToken,
    serial: &str,
    options: ListPackageOptions,
) -> BridgeResult<Vec<Package>> {
    let transport = transport.clone();
    let serial = serial.to_string();
    let packages = run_blocking(token, "list_packages", move || {
        let handle = resolve_device(transport.as_ref(), &serial)?;
        let output = run_command(handle.as_ref(), "pm list packages", &options.flags())?;
        Ok(parse_packages(&output))
    })
    .await?;
    debug!(count = packages.len(), "Listed packages");
    Ok(packages)
}

#[instrument(level = "debug", skip(transport, token), err)]
pub(crate) async fn install(
    transport: &Arc<dyn Transport>,
    token: &CancellationToken,
    serial: &str,
    apk_path: &Path,
) -> BridgeResult<()> {
    let transport = transport.clone();
    let serial = serial.to_string();
    let apk_path = apk_path.to_path_buf();
    run_blocking(token, "install", move || {
        let size = local_file_size(&apk_path)?;
        let handle = resolve_device(transport.as_ref(), &serial)?;
        let staged = format!("{STAGING_DIR}/{}.apk", Uuid::new_v4());

        debug!(size = %format_size(size, DECIMAL), %staged, "Staging package on device");
        let args = ["install", "-r", staged.as_str()];
        let result = handle
            .push(&apk_path, &staged)
            .map_err(|source| BridgeError::Command {
                serial: serial.clone(),
                command: format!("push {staged}"),
                source,
            })
            .and_then(|()| run_command(handle.as_ref(), "pm", &args));

        // A failed push may still leave a partial file behind
        if let Err(e) = run_command(handle.as_ref(), "rm", &["-f", &staged]) {
            warn!(error = &e as &dyn Error, %staged, "Failed to remove staged package");
        }
        ensure_pm_success(handle.as_ref(), command_line("pm", &args), &result?)?;

        info!(%serial, apk = %apk_path.display(), "Package installed");
        Ok(())
    })
    .await
}

#[instrument(level = "debug", skip(transport, token), err)]
pub(crate) async fn uninstall(
    transport: &Arc<dyn Transport>,
    token: &CancellationToken,
    serial: &str,
    package: &str,
    keep_data: bool,
    user: Option<u32>,
) -> BridgeResult<()> {
    let package = PackageName::parse(package)?;
    let transport = transport.clone();
    let serial = serial.to_string();
    run_blocking(token, "uninstall", move || {
        let handle = resolve_device(transport.as_ref(), &serial)?;

        let user = user.map(|id| id.to_string());
        let mut args = vec!["uninstall"];
        if keep_data {
            args.push("-k");
        }
        if let Some(user) = &user {
            args.extend(["--user", user.as_str()]);
        }
        args.push(package.as_str());

        let output = run_command(handle.as_ref(), "pm", &args)?;
        ensure_pm_success(handle.as_ref(), command_line("pm", &args), &output)?;

        info!(%serial, %package, keep_data, "Package uninstalled");
        Ok(())
    })
    .await
}

#[instrument(level = "debug", skip(transport, token), err)]
pub(crate) async fn push(
    transport: &Arc<dyn Transport>,
    token: &CancellationToken,
    serial: &str,
    local: &Path,
    remote: &str,
) -> BridgeResult<()> {
    let transport = transport.clone();
    let serial = serial.to_string();
    let local = local.to_path_buf();
    let remote = remote.to_string();
    run_blocking(token, "push", move || {
        let handle = resolve_device(transport.as_ref(), &serial)?;
        handle.push(&local, &remote)?;
        debug!(%remote, "Pushed file");
        Ok(())
    })
    .await
}

#[instrument(level = "debug", skip(transport, token), err)]
pub(crate) async fn pull(
    transport: &Arc<dyn Transport>,
    token: &CancellationToken,
    serial: &str,
    remote: &str,
    local: &Path,
) -> BridgeResult<()> {
    let transport = transport.clone();
    let serial = serial.to_string();
    let remote = remote.to_string();
    let local: PathBuf = local.to_path_buf();
    run_blocking(token, "pull", move || {
        let handle = resolve_device(transport.as_ref(), &serial)?;
        handle.pull(&remote, &local)?;
        if let Ok(metadata) = fs_err::metadata(&local) {
            debug!(size = %format_size(metadata.len(), DECIMAL), local = %local.display(), "Pulled file");
        }
        Ok(())
    })
    .await
}

#[cfg(test)]
mod tests {
    use tempfile::tempdir;

    use super::*;
    use crate::adb::fake::{FakeDevice, FakeTransport};

    #[tokio::test(flavor = "multi_thread")]
    async fn lists_third_party_packages_by_default() {
        let fake = FakeTransport::new().with_device(FakeDevice::new("A", "Pixel").reply(
            "pm list packages",
            Ok("package:/data/app/com.acme.app-1/base.apk=com.acme.app\n\
                package:/system/app/Settings/Settings.apk=com.android.settings\n"),
        ));
        let calls = fake.calls();

        let packages =
            list_packages(&fake.into_arc(), &CancellationToken::new(), "A", Default::default())
                .await
                .unwrap();

        assert_eq!(packages.len(), 2);
        assert_eq!(packages[0].name(), "com.acme.app");
        assert!(packages[1].is_system());
        assert!(calls.lock().unwrap().contains(&"A: pm list packages -f -3".to_string()));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn package_flags_follow_options() {
        let fake = FakeTransport::new().with_device(FakeDevice::new("A", "Pixel"));
        let calls = fake.calls();
        let options = ListPackageOptions { include_system: true, include_uninstalled: true };

        list_packages(&fake.into_arc(), &CancellationToken::new(), "A", options).await.unwrap();

        assert!(calls.lock().unwrap().contains(&"A: pm list packages -f -u -s".to_string()));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn unknown_serial_is_device_not_found() {
        let transport = FakeTransport::new().with_device(FakeDevice::new("A", "Pixel")).into_arc();

        let err = list_packages(&transport, &CancellationToken::new(), "B", Default::default())
            .await
            .unwrap_err();

        assert!(matches!(err, BridgeError::DeviceNotFound { ref serial } if serial == "B"));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn failed_listing_is_a_command_error() {
        let transport = FakeTransport::new()
            .with_device(FakeDevice::new("A", "Pixel").reply("pm list packages", Err("closed")))
            .into_arc();

        let err = list_packages(&transport, &CancellationToken::new(), "A", Default::default())
            .await
            .unwrap_err();

        match err {
            BridgeError::Command { serial, command, .. } => {
                assert_eq!(serial, "A");
                assert_eq!(command, "pm list packages -f -3");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test_log::test(tokio::test(flavor = "multi_thread"))]
    async fn install_stages_installs_and_cleans_up() {
        let dir = tempdir().unwrap();
        let apk = dir.path().join("app.apk");
        std::fs::write(&apk, b"PK\x03\x04").unwrap();
        let fake = FakeTransport::new()
            .with_device(FakeDevice::new("A", "Pixel").reply("pm install", Ok("Success\n")));
        let calls = fake.calls();

        install(&fake.into_arc(), &CancellationToken::new(), "A", &apk).await.unwrap();

        let calls = calls.lock().unwrap();
        assert_eq!(calls.len(), 3, "{calls:?}");
        let staged = calls[0].strip_prefix(&format!("A: push {} ", apk.display())).unwrap();
        assert!(staged.starts_with("/data/local/tmp/") && staged.ends_with(".apk"));
        assert_eq!(calls[1], format!("A: pm install -r {staged}"));
        assert_eq!(calls[2], format!("A: rm -f {staged}"));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn rejected_install_still_cleans_up() {
        let dir = tempdir().unwrap();
        let apk = dir.path().join("app.apk");
        std::fs::write(&apk, b"PK").unwrap();
        let fake = FakeTransport::new().with_device(
            FakeDevice::new("A", "Pixel")
                .reply("pm install", Ok("Failure [INSTALL_FAILED_OLDER_SDK]\n")),
        );
        let calls = fake.calls();

        let err = install(&fake.into_arc(), &CancellationToken::new(), "A", &apk).await.unwrap_err();

        match err {
            BridgeError::CommandRejected { output, .. } => {
                assert_eq!(output, "Failure [INSTALL_FAILED_OLDER_SDK]");
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(calls.lock().unwrap().iter().any(|c| c.starts_with("A: rm -f /data/local/tmp/")));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn install_requires_local_file() {
        let dir = tempdir().unwrap();
        let fake = FakeTransport::new().with_device(FakeDevice::new("A", "Pixel"));
        let calls = fake.calls();
        let transport = fake.into_arc();
        let token = CancellationToken::new();

        let missing = install(&transport, &token, "A", &dir.path().join("missing.apk")).await;
        let directory = install(&transport, &token, "A", dir.path()).await;

        assert!(matches!(missing, Err(BridgeError::LocalFile { .. })));
        assert!(matches!(directory, Err(BridgeError::LocalFile { .. })));
        assert!(calls.lock().unwrap().is_empty());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn failed_push_is_a_command_error_and_is_cleaned_up() {
        let dir = tempdir().unwrap();
        let apk = dir.path().join("app.apk");
        std::fs::write(&apk, b"PK").unwrap();
        let fake = FakeTransport::new()
            .with_device(FakeDevice::new("A", "Pixel").push_error("no space left on device"));
        let calls = fake.calls();

        let err = install(&fake.into_arc(), &CancellationToken::new(), "A", &apk).await.unwrap_err();

        match err {
            BridgeError::Command { serial, command, source } => {
                assert_eq!(serial, "A");
                assert!(command.starts_with("push /data/local/tmp/"), "{command}");
                assert!(source.to_string().contains("no space left on device"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
        let calls = calls.lock().unwrap();
        assert!(!calls.iter().any(|c| c.starts_with("A: pm install")), "{calls:?}");
        assert!(calls.iter().any(|c| c.starts_with("A: rm -f /data/local/tmp/")), "{calls:?}");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn uninstall_honours_modifiers() {
        let fake = FakeTransport::new()
            .with_device(FakeDevice::new("A", "Pixel").reply("pm uninstall", Ok("Success")));
        let calls = fake.calls();
        let transport = fake.into_arc();
        let token = CancellationToken::new();

        uninstall(&transport, &token, "A", "com.acme.app", false, None).await.unwrap();
        uninstall(&transport, &token, "A", "com.acme.app", true, Some(10)).await.unwrap();

        let calls = calls.lock().unwrap();
        assert_eq!(calls[0], "A: pm uninstall com.acme.app");
        assert_eq!(calls[1], "A: pm uninstall -k --user 10 com.acme.app");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn uninstall_rejects_invalid_package_name() {
        let fake = FakeTransport::new().with_device(FakeDevice::new("A", "Pixel"));
        let calls = fake.calls();

        let err = uninstall(&fake.into_arc(), &CancellationToken::new(), "A", "x; reboot", false, None)
            .await
            .unwrap_err();

        assert!(matches!(err, BridgeError::InvalidPackageName(_)));
        assert!(calls.lock().unwrap().is_empty());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn uninstall_failure_reply_is_rejected() {
        let transport = FakeTransport::new()
            .with_device(
                FakeDevice::new("A", "Pixel")
                    .reply("pm uninstall", Ok("Failure [DELETE_FAILED_INTERNAL_ERROR]")),
            )
            .into_arc();

        let err = uninstall(&transport, &CancellationToken::new(), "A", "com.acme.app", false, None)
            .await
            .unwrap_err();

        assert!(matches!(err, BridgeError::CommandRejected { .. }));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn push_and_pull_are_delegated() {
        let dir = tempdir().unwrap();
        let local = dir.path().join("notes.txt");
        let fake = FakeTransport::new().with_device(FakeDevice::new("A", "Pixel"));
        let calls = fake.calls();
        let transport = fake.into_arc();
        let token = CancellationToken::new();

        push(&transport, &token, "A", &local, "/sdcard/notes.txt").await.unwrap();
        pull(&transport, &token, "A", "/sdcard/notes.txt", &local).await.unwrap();

        let calls = calls.lock().unwrap();
        assert_eq!(calls[0], format!("A: push {} /sdcard/notes.txt", local.display()));
        assert_eq!(calls[1], format!("A: pull /sdcard/notes.txt {}", local.display()));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn pull_failure_and_unknown_device_are_surfaced() {
        let dir = tempdir().unwrap();
        let transport = FakeTransport::new()
            .with_device(FakeDevice::new("A", "Pixel").pull_error("remote object does not exist"))
            .into_arc();
        let token = CancellationToken::new();
        let local = dir.path().join("out.bin");

        let failed = pull(&transport, &token, "A", "/sdcard/missing", &local).await;
        let unknown = pull(&transport, &token, "Z", "/sdcard/missing", &local).await;

        assert!(matches!(failed, Err(BridgeError::Transport(_))));
        assert!(matches!(unknown, Err(BridgeError::DeviceNotFound { .. })));
    }
}
