use std::{borrow::Cow, path::PathBuf};

use anyhow::{Context, Result};
use tracing::{debug, instrument};

/// Resolves a binary either from the configured path or from `PATH`
#[instrument(level = "debug", ret, err)]
pub fn resolve_binary_path(configured: Option<&str>, name: &str) -> Result<PathBuf> {
    if let Some(path) = configured {
        debug!(path, "Using configured binary path");
        return which::which(path).with_context(|| format!("Configured {name} binary not found"));
    }
    which::which(name).with_context(|| format!("{name} binary not found in PATH"))
}

/// Quotes a shell argument for the device's POSIX shell when needed
pub fn shell_quote(arg: &str) -> Cow<'_, str> {
    let is_safe = |c: char| c.is_ascii_alphanumeric() || "-_./=:@%+,".contains(c);
    if !arg.is_empty() && arg.chars().all(is_safe) {
        Cow::Borrowed(arg)
    } else {
        Cow::Owned(format!("'{}'", arg.replace('\'', r"'\''")))
    }
}

/// Joins a command and its quoted arguments into one shell line
pub fn command_line(command: &str, args: &[&str]) -> String {
    let mut line = command.to_string();
    for arg in args {
        line.push(' ');
        line.push_str(&shell_quote(arg));
    }
    line
}
