//! Destination Gate policy.
//!
//! A target must exist, must not be one of the platform's system-critical
//! paths, and must sit under one of the platform's temporary/removable mount
//! prefixes. The deny-list is compared by exact equality after
//! canonicalization, so a subdirectory of a denied path is not itself denied.
//! Windows paths are compared without their `\\?\` verbatim prefix and
//! without regard to case.

use crate::error::SecurityBlock;
use crate::platform::Platform;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

const UNIX_DENY: &[&str] = &[
    "/",
    "/System",
    "/usr",
    "/bin",
    "/sbin",
    "/Library",
    "/Applications",
];

const WINDOWS_DENY: &[&str] = &[
    "C:\\",
    "C:\\Windows",
    "C:\\Program Files",
    "C:\\Program Files (x86)",
];

const LINUX_ALLOW: &[&str] = &["/mnt/", "/media/", "/tmp/"];
const MACOS_ALLOW: &[&str] = &["/Volumes/", "/private/tmp/"];

/// Per-platform allowed-destination policy
#[derive(Debug, Clone, PartialEq)]
pub struct DestinationPolicy {
    denied: Vec<PathBuf>,
    /// Empty means no prefix constraint is enforced
    allowed_prefixes: Vec<String>,
}

impl DestinationPolicy {
    pub fn new(denied: Vec<PathBuf>, allowed_prefixes: Vec<String>) -> Self {
        Self {
            denied,
            allowed_prefixes,
        }
    }

    pub fn for_platform(platform: Platform) -> Self {
        let to_paths = |list: &[&str]| list.iter().map(PathBuf::from).collect::<Vec<_>>();
        let to_strings = |list: &[&str]| list.iter().map(|s| s.to_string()).collect::<Vec<_>>();

        match platform {
            Platform::Linux => Self::new(to_paths(UNIX_DENY), to_strings(LINUX_ALLOW)),
            Platform::MacOs => Self::new(to_paths(UNIX_DENY), to_strings(MACOS_ALLOW)),
            Platform::Windows => Self::new(to_paths(WINDOWS_DENY), Vec::new()),
            Platform::Other => {
                let mut denied = to_paths(UNIX_DENY);
                denied.extend(to_paths(WINDOWS_DENY));
                Self::new(denied, Vec::new())
            }
        }
    }

    pub fn current() -> Self {
        Self::for_platform(Platform::current())
    }

    pub fn denied(&self) -> &[PathBuf] {
        &self.denied
    }

    pub fn allowed_prefixes(&self) -> &[String] {
        &self.allowed_prefixes
    }

    /// Canonicalize `target` and check it against the policy
    pub fn validate(&self, target: &Path) -> Result<PathBuf, SecurityBlock> {
        let canonical = match target.canonicalize() {
            Ok(p) => strip_verbatim(&p),
            Err(e) => {
                warn!("Cannot resolve target {}: {}", target.display(), e);
                return Err(SecurityBlock::TargetMissing(target.to_path_buf()));
            }
        };
        self.check_resolved(&canonical)?;
        debug!("Destination {} accepted", canonical.display());
        Ok(canonical)
    }

    /// Policy check on an already-canonical path
    pub fn check_resolved(&self, canonical: &Path) -> Result<(), SecurityBlock> {
        let canonical = strip_verbatim(canonical);
        let key = comparable(&canonical);
        if self.denied.iter().any(|d| comparable(d) == key) {
            return Err(SecurityBlock::SystemPath(canonical));
        }

        if !self.allowed_prefixes.is_empty() {
            let text = canonical.to_string_lossy();
            if !self
                .allowed_prefixes
                .iter()
                .any(|p| text.starts_with(p.as_str()))
            {
                return Err(SecurityBlock::OutsideAllowedPrefixes {
                    path: canonical.to_path_buf(),
                    allowed: self.allowed_prefixes.clone(),
                });
            }
        }

        Ok(())
    }
}

/// Drop the `\\?\` prefix `canonicalize` adds on Windows
fn strip_verbatim(path: &Path) -> PathBuf {
    let text = path.to_string_lossy();
    if let Some(rest) = text.strip_prefix(r"\\?\UNC\") {
        PathBuf::from(format!(r"\\{}", rest))
    } else if let Some(rest) = text.strip_prefix(r"\\?\") {
        PathBuf::from(rest)
    } else {
        path.to_path_buf()
    }
}

fn is_windows_style(text: &str) -> bool {
    let bytes = text.as_bytes();
    let drive = bytes.len() >= 2 && bytes[0].is_ascii_alphabetic() && bytes[1] == b':';
    drive || text.starts_with(r"\\")
}

/// Equality key: Windows paths are case-folded with one separator style
/// and no trailing separator past the drive root
fn comparable(path: &Path) -> String {
    let text = path.to_string_lossy();
    if !is_windows_style(&text) {
        return text.into_owned();
    }
    let mut key = text.replace('/', "\\").to_lowercase();
    while key.len() > 3 && key.ends_with('\\') {
        key.pop();
    }
    key
}

impl Default for DestinationPolicy {
    fn default() -> Self {
        Self::current()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_linux_lists() {
        let policy = DestinationPolicy::for_platform(Platform::Linux);
        assert!(policy.denied().contains(&PathBuf::from("/usr")));
        assert_eq!(policy.allowed_prefixes(), &["/mnt/", "/media/", "/tmp/"]);
    }

    #[test]
    fn test_deny_is_exact_equality() {
        let policy = DestinationPolicy::for_platform(Platform::MacOs);
        assert_eq!(
            policy.check_resolved(Path::new("/System")),
            Err(SecurityBlock::SystemPath(PathBuf::from("/System")))
        );
        // Subpath of a denied entry is only caught by the allow-list
        let err = policy.check_resolved(Path::new("/System/Library")).unwrap_err();
        assert!(matches!(err, SecurityBlock::OutsideAllowedPrefixes { .. }));
    }

    #[test]
    fn test_allow_prefixes() {
        let policy = DestinationPolicy::for_platform(Platform::MacOs);
        assert!(policy.check_resolved(Path::new("/Volumes/USBDRIVE")).is_ok());
        assert!(policy.check_resolved(Path::new("/private/tmp/image")).is_ok());
        assert!(policy.check_resolved(Path::new("/Users/me")).is_err());

        let policy = DestinationPolicy::for_platform(Platform::Linux);
        assert!(policy.check_resolved(Path::new("/media/usb0")).is_ok());
        // Prefix is textual and includes the trailing separator
        assert!(policy.check_resolved(Path::new("/mnt")).is_err());
        assert!(policy.check_resolved(Path::new("/mntx/disk")).is_err());
    }

    #[test]
    fn test_windows_has_no_allow_list() {
        let policy = DestinationPolicy::for_platform(Platform::Windows);
        assert!(policy.allowed_prefixes().is_empty());
        assert!(policy.check_resolved(Path::new("D:\\target")).is_ok());
        assert!(policy.check_resolved(Path::new("C:\\Windows")).is_err());
    }

    #[test]
    fn test_windows_verbatim_paths_denied() {
        let policy = DestinationPolicy::for_platform(Platform::Windows);
        for path in [
            r"\\?\C:\Windows",
            r"\\?\C:\",
            r"\\?\c:\program files",
            "C:/Windows/",
        ] {
            let err = policy.check_resolved(Path::new(path)).unwrap_err();
            assert!(matches!(err, SecurityBlock::SystemPath(_)), "{}", path);
        }
        assert_eq!(
            policy.check_resolved(Path::new(r"\\?\C:\Windows")),
            Err(SecurityBlock::SystemPath(PathBuf::from(r"C:\Windows")))
        );
        assert!(policy.check_resolved(Path::new(r"\\?\E:\USB")).is_ok());
        assert!(policy.check_resolved(Path::new(r"\\?\C:\Windows\Temp")).is_ok());
    }

    #[test]
    fn test_strip_verbatim() {
        assert_eq!(
            strip_verbatim(Path::new(r"\\?\D:\usb")),
            PathBuf::from(r"D:\usb")
        );
        assert_eq!(
            strip_verbatim(Path::new(r"\\?\UNC\server\share")),
            PathBuf::from(r"\\server\share")
        );
        assert_eq!(strip_verbatim(Path::new("/mnt/usb")), PathBuf::from("/mnt/usb"));
    }

    #[test]
    fn test_root_always_denied() {
        for platform in [Platform::Linux, Platform::MacOs, Platform::Other] {
            let policy = DestinationPolicy::for_platform(platform);
            let err = policy.validate(Path::new("/")).unwrap_err();
            assert_eq!(err, SecurityBlock::SystemPath(PathBuf::from("/")));
        }
    }

    #[test]
    fn test_missing_target() {
        let policy = DestinationPolicy::for_platform(Platform::Linux);
        let err = policy
            .validate(Path::new("/mnt/patchgate-does-not-exist-42"))
            .unwrap_err();
        assert!(matches!(err, SecurityBlock::TargetMissing(_)));
        assert!(err.to_string().starts_with("SECURITY BLOCK"));
    }
}
