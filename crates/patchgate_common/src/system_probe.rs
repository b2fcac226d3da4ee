//! Live device probe backed by sysinfo and /sys/block.

use crate::device_risk::DeviceProbe;
use std::fs;
use std::path::Path;
use sysinfo::Disks;

const BYTES_PER_GB: f64 = 1024.0 * 1024.0 * 1024.0;
const SECTOR_SIZE: u64 = 512;

/// Mounted filesystems captured at construction
pub struct SystemProbe {
    disks: Disks,
}

impl SystemProbe {
    pub fn new() -> Self {
        Self {
            disks: Disks::new_with_refreshed_list(),
        }
    }

    /// Re-read the mounted filesystem list
    pub fn refresh(&mut self) {
        self.disks.refresh_list();
    }

    fn partitions<'a>(&'a self, device: &'a str) -> impl Iterator<Item = &'a sysinfo::Disk> + 'a {
        self.disks
            .iter()
            .filter(move |d| is_partition_of(&d.name().to_string_lossy(), device))
    }
}

impl Default for SystemProbe {
    fn default() -> Self {
        Self::new()
    }
}

/// `/dev/sdb1`, `/dev/nvme0n1p2` and the macOS slice `/dev/disk3s1` belong to
/// their whole-disk device; `/dev/sdbb` does not belong to `/dev/sdb`.
pub fn is_partition_of(name: &str, device: &str) -> bool {
    match name.strip_prefix(device) {
        Some("") => true,
        Some(rest) => {
            // disk3 vs disk31: a device ending in a digit needs a separator
            let ends_in_digit = device.ends_with(|c: char| c.is_ascii_digit());
            let digits = match rest.strip_prefix(['p', 's']) {
                Some(digits) => digits,
                None if ends_in_digit => return false,
                None => rest,
            };
            !digits.is_empty() && digits.chars().all(|c| c.is_ascii_digit())
        }
        None => false,
    }
}

fn block_name(device: &str) -> Option<String> {
    Path::new(device)
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
}

fn read_sys_block(name: &str, attribute: &str) -> Option<String> {
    fs::read_to_string(format!("/sys/block/{}/{}", name, attribute))
        .ok()
        .map(|s| s.trim().to_string())
}

impl DeviceProbe for SystemProbe {
    fn exists(&self, device: &str) -> bool {
        Path::new(device).exists()
    }

    fn is_removable(&self, device: &str) -> bool {
        if let Some(name) = block_name(device) {
            if read_sys_block(&name, "removable").as_deref() == Some("1") {
                return true;
            }
            // USB mass storage often reports removable=0
            let on_usb_bus = fs::canonicalize(format!("/sys/block/{}", name))
                .map(|p| p.to_string_lossy().contains("/usb"))
                .unwrap_or(false);
            if on_usb_bus {
                return true;
            }
        }
        self.partitions(device).any(|d| d.is_removable())
    }

    fn size_gb(&self, device: &str) -> f64 {
        let sectors = block_name(device)
            .and_then(|name| read_sys_block(&name, "size"))
            .and_then(|s| s.parse::<u64>().ok());
        match sectors {
            Some(sectors) => (sectors * SECTOR_SIZE) as f64 / BYTES_PER_GB,
            None => {
                let total: u64 = self.partitions(device).map(|d| d.total_space()).sum();
                total as f64 / BYTES_PER_GB
            }
        }
    }

    fn mount_points(&self, device: &str) -> Vec<String> {
        self.partitions(device)
            .map(|d| d.mount_point().to_string_lossy().into_owned())
            .collect()
    }

    fn has_os_marker(&self, device: &str) -> bool {
        self.partitions(device).any(|d| {
            let mount = d.mount_point();
            mount.join("Windows").join("System32").exists()
                || mount.join("System").join("Library").exists()
        })
    }
}
