use serde::Serialize;

const PACKAGE_PREFIX: &str = "package:";
/// Path segment marking packages that live on the system partition
const SYSTEM_PARTITION_MARKER: &str = "/system/";

/// An installed package as listed by `pm list packages -f`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Package {
    #[serde(rename = "pkg_name")]
    name: String,
    #[serde(rename = "pkg_path")]
    apk_path: String,
    is_system: bool,
}

impl Package {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn apk_path(&self) -> &str {
        &self.apk_path
    }

    pub fn is_system(&self) -> bool {
        self.is_system
    }
}

/// Selects the flags passed to the package listing command
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ListPackageOptions {
    pub include_system: bool,
    pub include_uninstalled: bool,
}

impl ListPackageOptions {
    /// Flags for `pm list packages`, starting with `-f` to get APK paths.
    pub(crate) fn flags(&self) -> Vec<&'static str> {
        let mut flags = vec!["-f"];
        if self.include_uninstalled {
            flags.push("-u");
        }
        flags.push(if self.include_system { "-s" } else { "-3" });
        flags
    }
}

/// Parses `package:<path>=<name>` lines.
///
/// APK paths may contain `=` themselves, so the last one separates the path
/// from the name. Lines without the prefix or without any `=` are skipped.
pub fn parse_packages(output: &str) -> Vec<Package> {
    output.lines().filter_map(parse_package_line).collect()
}

fn parse_package_line(line: &str) -> Option<Package> {
    let entry = line.trim().strip_prefix(PACKAGE_PREFIX)?;
    let (apk_path, name) = entry.rsplit_once('=')?;
    Some(Package {
        name: name.trim().to_string(),
        apk_path: apk_path.to_string(),
        is_system: apk_path.contains(SYSTEM_PARTITION_MARKER),
    })
}
