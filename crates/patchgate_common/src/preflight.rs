//! Host prerequisites and source file checks, run before any device work.

use crate::platform::Platform;
use crate::severity::{SafetyCheck, Severity};
use std::env;
use std::ffi::OsStr;
use std::fs;
use std::path::{Path, PathBuf};

/// Source images smaller than this are probably truncated
pub const MIN_SOURCE_MB: f64 = 50.0;
/// Source images larger than this are suspicious
pub const MAX_SOURCE_MB: f64 = 20_000.0;

pub fn required_tools(platform: Platform) -> &'static [&'static str] {
    match platform {
        Platform::Linux => &["parted", "mkfs.fat", "mkfs.ntfs", "mkfs.ext4", "lsblk", "blkid"],
        Platform::Windows => &["diskpart.exe", "format.com"],
        Platform::MacOs => &["diskutil", "hdiutil", "newfs_msdos"],
        Platform::Other => &[],
    }
}

/// First executable named `name` in the given PATH value
pub fn find_in_path(name: &str, path_var: &OsStr) -> Option<PathBuf> {
    env::split_paths(path_var)
        .map(|dir| dir.join(name))
        .find(|candidate| is_executable(candidate))
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    fs::metadata(path)
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file()
}

pub fn command_exists(name: &str) -> bool {
    env::var_os("PATH")
        .and_then(|p| find_in_path(name, &p))
        .is_some()
}

fn tool_check(tool: &str, available: bool) -> SafetyCheck {
    let name = format!("Tool: {}", tool);
    if available {
        SafetyCheck::safe(&name, format!("{} is available", tool))
    } else {
        SafetyCheck::blocked(&name, format!("{} is not available", tool))
            .with_mitigation(format!("Install {} before proceeding", tool))
    }
}

pub fn check_tools(tools: &[&str]) -> Vec<SafetyCheck> {
    tools
        .iter()
        .map(|t| tool_check(t, command_exists(t)))
        .collect()
}

/// Writing to raw devices needs root
pub fn check_privileges() -> SafetyCheck {
    privileges_for(Platform::current(), is_root())
}

#[cfg(unix)]
fn is_root() -> Option<bool> {
    Some(nix::unistd::geteuid().is_root())
}

#[cfg(not(unix))]
fn is_root() -> Option<bool> {
    None
}

fn privileges_for(platform: Platform, root: Option<bool>) -> SafetyCheck {
    const NAME: &str = "Administrative privileges";
    match (platform, root) {
        (Platform::Linux | Platform::MacOs, Some(true)) => {
            SafetyCheck::safe(NAME, "Running with root privileges")
        }
        (Platform::Linux | Platform::MacOs, _) => {
            SafetyCheck::blocked(NAME, "Root privileges required for device operations")
                .with_mitigation("Run with sudo")
        }
        (Platform::Windows, Some(true)) => SafetyCheck::safe(NAME, "Running as Administrator"),
        (Platform::Windows, _) => SafetyCheck::blocked(NAME, "Administrator privileges required")
            .with_mitigation("Run as Administrator"),
        (Platform::Other, _) => SafetyCheck::new(
            NAME,
            Severity::Warning,
            "Cannot verify privileges on this platform",
        ),
    }
}

/// Existence and plausible size of each source image
pub fn validate_source_files(files: &[&Path]) -> Vec<SafetyCheck> {
    files.iter().map(|f| source_file_check(f)).collect()
}

fn source_file_check(path: &Path) -> SafetyCheck {
    let name = format!("Source file: {}", path.display());

    let metadata = match fs::metadata(path) {
        Ok(m) if m.is_file() => m,
        _ => {
            return SafetyCheck::blocked(&name, format!("File not found: {}", path.display()))
                .with_mitigation("Verify the file path and download the file if necessary")
        }
    };

    let size_mb = metadata.len() as f64 / (1024.0 * 1024.0);
    if size_mb < MIN_SOURCE_MB {
        SafetyCheck::new(
            &name,
            Severity::Warning,
            format!("File is very small ({:.1}MB)", size_mb),
        )
        .with_details("File may be incomplete or corrupted")
    } else if size_mb > MAX_SOURCE_MB {
        SafetyCheck::new(
            &name,
            Severity::Warning,
            format!("File is very large ({:.1}MB)", size_mb),
        )
        .with_details("Verify this is the correct file")
    } else {
        SafetyCheck::safe(&name, format!("File looks valid ({:.1}MB)", size_mb))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_required_tools_per_platform() {
        assert!(required_tools(Platform::Linux).contains(&"parted"));
        assert!(required_tools(Platform::MacOs).contains(&"diskutil"));
        assert!(required_tools(Platform::Other).is_empty());
    }

    #[cfg(unix)]
    #[test]
    fn test_find_in_path() {
        use std::os::unix::fs::PermissionsExt;
        let dir = TempDir::new().unwrap();
        let tool = dir.path().join("parted");
        fs::write(&tool, "#!/bin/sh\n").unwrap();
        fs::set_permissions(&tool, fs::Permissions::from_mode(0o755)).unwrap();
        let plain = dir.path().join("notes");
        fs::write(&plain, "x").unwrap();

        let path_var = env::join_paths([dir.path()]).unwrap();
        assert_eq!(find_in_path("parted", &path_var), Some(tool));
        assert_eq!(find_in_path("notes", &path_var), None);
        assert_eq!(find_in_path("lsblk", &path_var), None);
    }

    #[test]
    fn test_missing_tool_is_blocked() {
        let checks = check_tools(&["patchgate-no-such-tool"]);
        assert_eq!(checks[0].result, Severity::Blocked);
        assert_eq!(
            checks[0].mitigation.as_deref(),
            Some("Install patchgate-no-such-tool before proceeding")
        );
    }

    #[test]
    fn test_privilege_matrix() {
        assert!(privileges_for(Platform::Linux, Some(true)).passed());
        assert_eq!(privileges_for(Platform::MacOs, Some(false)).result, Severity::Blocked);
        assert_eq!(privileges_for(Platform::Windows, None).result, Severity::Blocked);
        assert_eq!(privileges_for(Platform::Other, None).result, Severity::Warning);
    }

    #[test]
    fn test_source_file_checks() {
        let dir = TempDir::new().unwrap();
        let small = dir.path().join("small.iso");
        fs::write(&small, vec![0u8; 1024]).unwrap();
        let missing = dir.path().join("missing.iso");

        let checks = validate_source_files(&[small.as_path(), missing.as_path()]);
        assert_eq!(checks[0].result, Severity::Warning);
        assert_eq!(checks[1].result, Severity::Blocked);
    }
}
