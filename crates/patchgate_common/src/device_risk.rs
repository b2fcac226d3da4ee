//! Device risk assessment.
//!
//! Decides whether a block device is safe to write an installer image to.
//! Everything the assessor knows about a device comes from a [`DeviceProbe`],
//! so `assess` is a pure function of probe state.

use crate::condition::compile_anchored;
use crate::platform::Platform;
use crate::severity::Severity;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

/// Mount points that mark a disk as holding the running system
pub const SYSTEM_MOUNT_POINTS: &[&str] = &["/", "/boot", "/usr", "/var", "/etc"];

/// Larger than this is suspicious for a USB stick
pub const MAX_EXPECTED_GB: f64 = 2000.0;
/// Smaller than this cannot hold an installer
pub const MIN_USABLE_GB: f64 = 0.5;

/// Device paths that are never a valid target, matched at the start of the path
pub fn blocked_device_patterns(platform: Platform) -> &'static [&'static str] {
    match platform {
        Platform::Linux => &[r"/dev/loop\d+", r"/dev/dm-\d+", r"/dev/md\d+"],
        Platform::Windows => &[r"\\\\\.\\C:", r"\\\\\.\\PHYSICALDRIVE0"],
        Platform::MacOs => &[r"/dev/disk0", r"/dev/disk\d+s[1-9]"],
        Platform::Other => &[],
    }
}

/// Source of facts about block devices
pub trait DeviceProbe {
    fn exists(&self, device: &str) -> bool;
    fn is_removable(&self, device: &str) -> bool;
    /// Size in GB, 0.0 when unknown
    fn size_gb(&self, device: &str) -> f64;
    /// Mount points of the device and its partitions
    fn mount_points(&self, device: &str) -> Vec<String>;
    /// A mounted partition holds `Windows/System32` or `System/Library`
    fn has_os_marker(&self, device: &str) -> bool;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceRisk {
    pub device_path: String,
    pub is_system_disk: bool,
    pub is_boot_disk: bool,
    pub is_removable: bool,
    pub size_gb: f64,
    pub mount_points: Vec<String>,
    pub risk_factors: Vec<String>,
    pub overall_risk: Severity,
}

impl DeviceRisk {
    fn missing(device_path: &str) -> Self {
        Self {
            device_path: device_path.to_string(),
            is_system_disk: false,
            is_boot_disk: false,
            is_removable: false,
            size_gb: 0.0,
            mount_points: Vec::new(),
            risk_factors: vec!["Device does not exist".to_string()],
            overall_risk: Severity::Blocked,
        }
    }
}

/// Blocked beats everything, then the factor count decides
pub fn overall_risk(
    risk_factors: &[String],
    is_system_disk: bool,
    is_boot_disk: bool,
    is_removable: bool,
) -> Severity {
    if is_system_disk || is_boot_disk || !is_removable {
        Severity::Blocked
    } else if risk_factors.len() >= 3 {
        Severity::Dangerous
    } else if !risk_factors.is_empty() {
        Severity::Warning
    } else {
        Severity::Safe
    }
}

pub struct DeviceAssessor<P: DeviceProbe> {
    probe: P,
    platform: Platform,
}

impl<P: DeviceProbe> DeviceAssessor<P> {
    pub fn new(probe: P, platform: Platform) -> Self {
        Self { probe, platform }
    }

    pub fn probe(&self) -> &P {
        &self.probe
    }

    pub fn assess(&self, device_path: &str) -> DeviceRisk {
        info!("Validating device safety: {}", device_path);

        if !self.probe.exists(device_path) {
            return DeviceRisk::missing(device_path);
        }

        let mut risk_factors = Vec::new();

        for pattern in blocked_device_patterns(self.platform) {
            match compile_anchored("blocked_device_patterns", pattern) {
                Ok(re) if re.is_match(device_path) => {
                    risk_factors.push(format!("Matches blocked pattern: {}", pattern))
                }
                Ok(_) => {}
                Err(e) => warn!("{}", e),
            }
        }

        let is_removable = self.probe.is_removable(device_path);
        let size_gb = self.probe.size_gb(device_path);
        let mount_points = self.probe.mount_points(device_path);
        let is_system_disk = mount_points
            .iter()
            .any(|m| SYSTEM_MOUNT_POINTS.contains(&m.as_str()))
            || self.probe.has_os_marker(device_path);
        let is_boot_disk = mount_points
            .iter()
            .any(|m| m == "/boot" || m.starts_with("/boot/"));

        if !is_removable {
            risk_factors.push("Device is not removable".to_string());
        }
        if is_system_disk {
            risk_factors.push("Device contains system files".to_string());
        }
        if is_boot_disk {
            risk_factors.push("Device is boot disk".to_string());
        }
        if !mount_points.is_empty() {
            risk_factors.push(format!(
                "Device has mounted partitions: {}",
                mount_points.join(", ")
            ));
        }
        if size_gb > MAX_EXPECTED_GB {
            risk_factors.push(format!(
                "Device is very large ({:.1}GB) - suspicious for USB",
                size_gb
            ));
        }
        if size_gb < MIN_USABLE_GB {
            risk_factors.push(format!("Device is too small ({:.1}GB)", size_gb));
        }

        let overall = overall_risk(&risk_factors, is_system_disk, is_boot_disk, is_removable);

        DeviceRisk {
            device_path: device_path.to_string(),
            is_system_disk,
            is_boot_disk,
            is_removable,
            size_gb,
            mount_points,
            risk_factors,
            overall_risk: overall,
        }
    }

    /// Candidates that assess as `Safe`, in input order
    pub fn safe_devices<'a>(&self, candidates: &[&'a str]) -> Vec<&'a str> {
        candidates
            .iter()
            .copied()
            .filter(|d| self.assess(d).overall_risk == Severity::Safe)
            .collect()
    }

    /// Warnings to show, one per step, before consent is collected
    pub fn confirmation_prompts(&self, device_path: &str, operation: &str) -> Vec<String> {
        let risk = self.assess(device_path);
        let yes_no = |flag: bool| if flag { "Yes" } else { "No" };

        let mut prompts = vec![format!(
            "CRITICAL WARNING\n\
             This operation will PERMANENTLY and IRREVERSIBLY ERASE ALL DATA\n\
             on device: {} ({:.1}GB)\n\
             Operation: {}",
            device_path, risk.size_gb, operation
        )];

        if !risk.mount_points.is_empty() {
            prompts.push(format!(
                "DEVICE IS CURRENTLY MOUNTED\n\
                 Mount points: {}\n\
                 This could indicate an active system disk!",
                risk.mount_points.join(", ")
            ));
        }

        prompts.push(format!(
            "Device Risk Assessment:\n\
             - Removable: {}\n\
             - System Disk: {}\n\
             - Boot Disk: {}\n\
             - Risk Level: {}",
            yes_no(risk.is_removable),
            yes_no(risk.is_system_disk),
            yes_no(risk.is_boot_disk),
            risk.overall_risk.as_str().to_uppercase()
        ));

        if !risk.risk_factors.is_empty() {
            let factors: Vec<String> = risk
                .risk_factors
                .iter()
                .map(|f| format!("- {}", f))
                .collect();
            prompts.push(format!("RISK FACTORS DETECTED:\n{}", factors.join("\n")));
        }

        prompts
    }
}
