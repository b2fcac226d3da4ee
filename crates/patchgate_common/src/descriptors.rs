//! Hardware and OS descriptors supplied by the hardware-detection collaborator.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Detected hardware of the machine a plan targets
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HardwareInfo {
    pub manufacturer: String,
    pub model: String,
    pub cpu_architecture: String,
    /// Installed RAM in GB. `None` or zero means unknown.
    #[serde(default)]
    pub ram_gb: Option<f64>,
    /// BIOS / firmware facts (firmware_type, vendor, version, ...)
    #[serde(default)]
    pub firmware: BTreeMap<String, String>,
}

impl HardwareInfo {
    pub fn new(manufacturer: &str, model: &str, cpu_architecture: &str) -> Self {
        Self {
            manufacturer: manufacturer.to_string(),
            model: model.to_string(),
            cpu_architecture: cpu_architecture.to_string(),
            ram_gb: None,
            firmware: BTreeMap::new(),
        }
    }

    pub fn with_ram_gb(mut self, ram_gb: f64) -> Self {
        self.ram_gb = Some(ram_gb);
        self
    }

    pub fn with_firmware(mut self, key: &str, value: &str) -> Self {
        self.firmware.insert(key.to_string(), value.to_string());
        self
    }

    /// `"{manufacturer} {model}"`, the string hardware patterns search
    pub fn model_text(&self) -> String {
        format!("{} {}", self.manufacturer, self.model)
    }

    /// RAM if it was actually measured
    pub fn known_ram_gb(&self) -> Option<f64> {
        self.ram_gb.filter(|gb| *gb > 0.0)
    }

    pub fn summary(&self) -> String {
        let ram = self
            .known_ram_gb()
            .map(|gb| format!("{:.0}GB RAM", gb))
            .unwrap_or_else(|| "RAM unknown".to_string());
        format!("{} ({}, {})", self.model_text(), self.cpu_architecture, ram)
    }
}

/// Target operating system
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OsInfo {
    /// OS family as used by patch sets: "macos", "windows", "linux"
    pub family: String,
    pub version: String,
    #[serde(default)]
    pub build: String,
}

impl OsInfo {
    pub fn new(family: &str, version: &str) -> Self {
        Self {
            family: family.to_string(),
            version: version.to_string(),
            build: String::new(),
        }
    }

    pub fn with_build(mut self, build: &str) -> Self {
        self.build = build.to_string();
        self
    }
}
