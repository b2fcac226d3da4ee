//! Patch actions and patch sets.

use crate::condition::{
    compile_anchored, compile_search, search_match, starts_with_match, Condition,
};
use crate::descriptors::{HardwareInfo, OsInfo};
use crate::error::MatchError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Kind of modification an action performs
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PatchType {
    DriverInjection,
    KernelPatch,
    BootloaderPatch,
    RegistryPatch,
    FirmwarePatch,
    KextInjection,
    EfiPayload,
    EfiPatch,
    SystemFile,
    ConfigPatch,
    CustomScript,
}

impl PatchType {
    pub const ALL: [PatchType; 11] = [
        PatchType::DriverInjection,
        PatchType::KernelPatch,
        PatchType::BootloaderPatch,
        PatchType::RegistryPatch,
        PatchType::FirmwarePatch,
        PatchType::KextInjection,
        PatchType::EfiPayload,
        PatchType::EfiPatch,
        PatchType::SystemFile,
        PatchType::ConfigPatch,
        PatchType::CustomScript,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            PatchType::DriverInjection => "driver_injection",
            PatchType::KernelPatch => "kernel_patch",
            PatchType::BootloaderPatch => "bootloader_patch",
            PatchType::RegistryPatch => "registry_patch",
            PatchType::FirmwarePatch => "firmware_patch",
            PatchType::KextInjection => "kext_injection",
            PatchType::EfiPayload => "efi_payload",
            PatchType::EfiPatch => "efi_patch",
            PatchType::SystemFile => "system_file",
            PatchType::ConfigPatch => "config_patch",
            PatchType::CustomScript => "custom_script",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        let normalized = s.trim().to_lowercase().replace('-', "_");
        Self::ALL.iter().copied().find(|t| t.as_str() == normalized)
    }
}

impl fmt::Display for PatchType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Stage at which an action is applied. Declaration order is execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PatchPhase {
    PreInstall,
    Install,
    PostInstall,
    FirstBoot,
    Runtime,
    EfiBoot,
    KernelLoad,
    SystemInit,
}

impl PatchPhase {
    pub const ALL: [PatchPhase; 8] = [
        PatchPhase::PreInstall,
        PatchPhase::Install,
        PatchPhase::PostInstall,
        PatchPhase::FirstBoot,
        PatchPhase::Runtime,
        PatchPhase::EfiBoot,
        PatchPhase::KernelLoad,
        PatchPhase::SystemInit,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            PatchPhase::PreInstall => "pre_install",
            PatchPhase::Install => "install",
            PatchPhase::PostInstall => "post_install",
            PatchPhase::FirstBoot => "first_boot",
            PatchPhase::Runtime => "runtime",
            PatchPhase::EfiBoot => "efi_boot",
            PatchPhase::KernelLoad => "kernel_load",
            PatchPhase::SystemInit => "system_init",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        let normalized = s.trim().to_lowercase().replace('-', "_");
        Self::ALL.iter().copied().find(|p| p.as_str() == normalized)
    }
}

impl fmt::Display for PatchPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Ordering priority. Only used to order execution, never to score risk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PatchPriority {
    Critical,
    High,
    Medium,
    Low,
    Optional,
    Experimental,
}

impl PatchPriority {
    pub const ALL: [PatchPriority; 6] = [
        PatchPriority::Critical,
        PatchPriority::High,
        PatchPriority::Medium,
        PatchPriority::Low,
        PatchPriority::Optional,
        PatchPriority::Experimental,
    ];

    /// Explicit numeric rank, 0 = most urgent
    pub fn rank(&self) -> u8 {
        match self {
            PatchPriority::Critical => 0,
            PatchPriority::High => 1,
            PatchPriority::Medium => 2,
            PatchPriority::Low => 3,
            PatchPriority::Optional => 4,
            PatchPriority::Experimental => 5,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PatchPriority::Critical => "critical",
            PatchPriority::High => "high",
            PatchPriority::Medium => "medium",
            PatchPriority::Low => "low",
            PatchPriority::Optional => "optional",
            PatchPriority::Experimental => "experimental",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        let normalized = s.trim().to_lowercase();
        Self::ALL.iter().copied().find(|p| p.as_str() == normalized)
    }
}

impl fmt::Display for PatchPriority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PatchStatus {
    Pending,
    Applying,
    Applied,
    Failed,
    Skipped,
    RolledBack,
}

impl Default for PatchStatus {
    fn default() -> Self {
        Self::Pending
    }
}

fn default_true() -> bool {
    true
}

/// One concrete modification step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatchAction {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub patch_type: PatchType,
    pub phase: PatchPhase,
    pub priority: PatchPriority,
    #[serde(default)]
    pub source_files: Vec<String>,
    /// Destination relative to the target mount point
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub destination: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<Condition>,
    #[serde(default = "default_true")]
    pub reversible: bool,
    #[serde(default)]
    pub requires_reboot: bool,
    #[serde(default)]
    pub status: PatchStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub applied_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl PatchAction {
    pub fn new(
        id: &str,
        name: &str,
        patch_type: PatchType,
        phase: PatchPhase,
        priority: PatchPriority,
    ) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            description: String::new(),
            patch_type,
            phase,
            priority,
            source_files: Vec::new(),
            destination: None,
            condition: None,
            reversible: true,
            requires_reboot: false,
            status: PatchStatus::Pending,
            applied_at: None,
            error_message: None,
        }
    }

    pub fn with_description(mut self, description: &str) -> Self {
        self.description = description.to_string();
        self
    }

    pub fn with_sources(mut self, files: &[&str]) -> Self {
        self.source_files = files.iter().map(|f| f.to_string()).collect();
        self
    }

    pub fn with_destination(mut self, destination: &str) -> Self {
        self.destination = Some(destination.to_string());
        self
    }

    pub fn with_condition(mut self, condition: Condition) -> Self {
        self.condition = Some(condition);
        self
    }

    pub fn irreversible(mut self) -> Self {
        self.reversible = false;
        self
    }

    pub fn needs_reboot(mut self) -> Self {
        self.requires_reboot = true;
        self
    }

    pub fn can_apply(&self, hardware: &HardwareInfo, os: &OsInfo) -> bool {
        self.condition
            .as_ref()
            .map(|c| c.matches(hardware, os))
            .unwrap_or(true)
    }
}

/// A named, versioned bundle of actions for an OS family/version/hardware range
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatchSet {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub version: String,
    pub target_os: String,
    /// Anchored OS version patterns. Empty accepts any version.
    #[serde(default)]
    pub target_versions: Vec<String>,
    /// Case-insensitive patterns searched in `"{manufacturer} {model}"`.
    /// Empty accepts any hardware.
    #[serde(default)]
    pub target_hardware: Vec<String>,
    #[serde(default)]
    pub actions: Vec<PatchAction>,
    #[serde(default)]
    pub dependencies: Vec<String>,
    #[serde(default)]
    pub conflicts: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
}

impl PatchSet {
    pub fn new(id: &str, name: &str, target_os: &str) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            description: String::new(),
            version: "1.0.0".to_string(),
            target_os: target_os.to_string(),
            target_versions: Vec::new(),
            target_hardware: Vec::new(),
            actions: Vec::new(),
            dependencies: Vec::new(),
            conflicts: Vec::new(),
            author: None,
        }
    }

    pub fn with_versions(mut self, patterns: &[&str]) -> Self {
        self.target_versions = patterns.iter().map(|p| p.to_string()).collect();
        self
    }

    pub fn with_hardware(mut self, patterns: &[&str]) -> Self {
        self.target_hardware = patterns.iter().map(|p| p.to_string()).collect();
        self
    }

    pub fn with_action(mut self, action: PatchAction) -> Self {
        self.actions.push(action);
        self
    }

    pub fn with_conflicts(mut self, ids: &[&str]) -> Self {
        self.conflicts = ids.iter().map(|i| i.to_string()).collect();
        self
    }

    pub fn with_dependencies(mut self, ids: &[&str]) -> Self {
        self.dependencies = ids.iter().map(|i| i.to_string()).collect();
        self
    }

    pub fn actions_in_phase(&self, phase: PatchPhase) -> Vec<&PatchAction> {
        self.actions.iter().filter(|a| a.phase == phase).collect()
    }

    pub fn critical_actions(&self) -> Vec<&PatchAction> {
        self.actions
            .iter()
            .filter(|a| a.priority == PatchPriority::Critical)
            .collect()
    }

    /// Most urgent priority among the set's actions
    pub fn min_priority_rank(&self) -> u8 {
        self.actions
            .iter()
            .map(|a| a.priority.rank())
            .min()
            .unwrap_or(u8::MAX)
    }

    /// Every pattern carried by the set and its actions compiles
    pub fn validate_patterns(&self) -> Result<(), MatchError> {
        for p in &self.target_versions {
            compile_anchored("target_versions", p)?;
        }
        for p in &self.target_hardware {
            compile_search("target_hardware", p)?;
        }
        for action in &self.actions {
            if let Some(cond) = &action.condition {
                cond.validate()?;
            }
        }
        Ok(())
    }

    /// Compatibility issues with the given hardware and OS. Empty means compatible.
    pub fn compatibility_issues(&self, hardware: &HardwareInfo, os: &OsInfo) -> Vec<String> {
        let mut issues = Vec::new();

        if self.target_os != os.family {
            issues.push(format!(
                "OS family mismatch: expected {}, got {}",
                self.target_os, os.family
            ));
        }

        if !self.target_versions.is_empty()
            && !self
                .target_versions
                .iter()
                .any(|p| starts_with_match("target_versions", p, &os.version))
        {
            issues.push(format!(
                "OS version {} not in supported versions: {:?}",
                os.version, self.target_versions
            ));
        }

        if !self.target_hardware.is_empty() {
            let model_text = hardware.model_text();
            if !self
                .target_hardware
                .iter()
                .any(|p| search_match("target_hardware", p, &model_text))
            {
                issues.push(format!("Hardware {} not in supported models", model_text));
            }
        }

        issues
    }

    pub fn applicable_actions(&self, hardware: &HardwareInfo, os: &OsInfo) -> Vec<&PatchAction> {
        self.actions
            .iter()
            .filter(|a| a.can_apply(hardware, os))
            .collect()
    }
}
