//! Risk scoring
//!
//! Two scales, both deliberately conservative:
//! - coarse per-action severity keyed by patch type (catalog actions)
//! - additive numeric score for free-form operations not drawn from the catalog

use crate::patch::{PatchAction, PatchType};
use crate::severity::{SafetyCheck, Severity};
use serde::{Deserialize, Serialize};

// =============================================================================
// Coarse per-action severity
// =============================================================================

pub fn coarse_severity(patch_type: PatchType) -> Severity {
    match patch_type {
        PatchType::KernelPatch | PatchType::BootloaderPatch | PatchType::FirmwarePatch => {
            Severity::Dangerous
        }
        PatchType::DriverInjection | PatchType::RegistryPatch => Severity::Warning,
        _ => Severity::Safe,
    }
}

pub fn action_severity(action: &PatchAction) -> Severity {
    coarse_severity(action.patch_type)
}

/// Maximum coarse severity over `actions`. Empty input is `Safe`.
pub fn aggregate_severity<'a>(actions: impl IntoIterator<Item = &'a PatchAction>) -> Severity {
    actions
        .into_iter()
        .map(action_severity)
        .max()
        .unwrap_or(Severity::Safe)
}

// =============================================================================
// Numeric score
// =============================================================================

pub const KERNEL_WEIGHT: u32 = 30;
pub const BOOTLOADER_WEIGHT: u32 = 35;
pub const FIRMWARE_WEIGHT: u32 = 40;
pub const IRREVERSIBLE_WEIGHT: u32 = 20;
pub const UNSIGNED_WEIGHT: u32 = 15;
pub const DISABLES_SECURITY_WEIGHT: u32 = 25;

pub const MAX_SCORE: u32 = 100;

/// Score thresholds, checked from the top
pub const BLOCKED_THRESHOLD: u32 = 80;
pub const DANGEROUS_THRESHOLD: u32 = 60;
pub const WARNING_THRESHOLD: u32 = 30;

pub fn severity_for_score(score: u32) -> Severity {
    if score >= BLOCKED_THRESHOLD {
        Severity::Blocked
    } else if score >= DANGEROUS_THRESHOLD {
        Severity::Dangerous
    } else if score >= WARNING_THRESHOLD {
        Severity::Warning
    } else {
        Severity::Safe
    }
}

/// Free-form operation risk descriptor
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PatchRisk {
    pub patch_id: String,
    pub patch_name: String,
    pub patch_type: String,
    pub target_system: String,
    #[serde(default)]
    pub modifies_kernel: bool,
    #[serde(default)]
    pub modifies_bootloader: bool,
    #[serde(default)]
    pub modifies_firmware: bool,
    #[serde(default)]
    pub unsigned_code: bool,
    #[serde(default)]
    pub disables_security: bool,
    #[serde(default)]
    pub irreversible: bool,
    #[serde(default)]
    pub risk_factors: Vec<String>,
}

impl PatchRisk {
    pub fn new(patch_id: &str, patch_name: &str, patch_type: &str, target_system: &str) -> Self {
        Self {
            patch_id: patch_id.to_string(),
            patch_name: patch_name.to_string(),
            patch_type: patch_type.to_string(),
            target_system: target_system.to_string(),
            ..Default::default()
        }
    }

    /// Weighted sum of the fired flags, clamped to [0, 100]
    pub fn score(&self) -> u32 {
        let mut score = 0;
        if self.modifies_kernel {
            score += KERNEL_WEIGHT;
        }
        if self.modifies_bootloader {
            score += BOOTLOADER_WEIGHT;
        }
        if self.modifies_firmware {
            score += FIRMWARE_WEIGHT;
        }
        if self.irreversible {
            score += IRREVERSIBLE_WEIGHT;
        }
        if self.unsigned_code {
            score += UNSIGNED_WEIGHT;
        }
        if self.disables_security {
            score += DISABLES_SECURITY_WEIGHT;
        }
        score.min(MAX_SCORE)
    }

    pub fn severity(&self) -> Severity {
        severity_for_score(self.score())
    }

    /// Mitigation advice for each fired flag
    pub fn mitigations(&self) -> Vec<String> {
        let mut out = Vec::new();
        if self.modifies_kernel {
            out.push("Create a full system backup before applying kernel patches".to_string());
        }
        if self.modifies_bootloader {
            out.push("Back up the EFI partition before modifying the bootloader".to_string());
        }
        if self.unsigned_code {
            out.push("Verify the provenance of unsigned code before installing it".to_string());
        }
        if self.disables_security {
            out.push(
                "Document disabled security features and plan to restore them".to_string(),
            );
        }
        if self.irreversible {
            out.push(
                "Test on a non-production system first; this change cannot be undone".to_string(),
            );
        }
        out
    }

    /// Names of the flags that contributed to the score
    pub fn fired_flags(&self) -> Vec<&'static str> {
        let flags = [
            (self.modifies_kernel, "modifies kernel"),
            (self.modifies_bootloader, "modifies bootloader"),
            (self.modifies_firmware, "modifies firmware"),
            (self.irreversible, "irreversible"),
            (self.unsigned_code, "unsigned code"),
            (self.disables_security, "disables security"),
        ];
        flags
            .iter()
            .filter(|(fired, _)| *fired)
            .map(|(_, name)| *name)
            .collect()
    }
}

/// Package a free-form risk assessment into a named safety check
pub fn validate_patch_risk(risk: &PatchRisk) -> SafetyCheck {
    let score = risk.score();
    let severity = severity_for_score(score);

    let mut factors: Vec<String> = risk.fired_flags().iter().map(|f| f.to_string()).collect();
    factors.extend(risk.risk_factors.iter().cloned());

    let mut check = SafetyCheck::new(
        &format!("Patch risk: {}", risk.patch_name),
        severity,
        format!("Risk score {}/{} ({})", score, MAX_SCORE, severity),
    );

    if !factors.is_empty() {
        check = check.with_details(factors.join("; "));
    }

    let mitigations = risk.mitigations();
    if !mitigations.is_empty() {
        check = check.with_mitigation(mitigations.join(". "));
    }

    check
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::patch::{PatchPhase, PatchPriority};

    #[test]
    fn test_coarse_severity_table() {
        assert_eq!(coarse_severity(PatchType::KernelPatch), Severity::Dangerous);
        assert_eq!(coarse_severity(PatchType::BootloaderPatch), Severity::Dangerous);
        assert_eq!(coarse_severity(PatchType::FirmwarePatch), Severity::Dangerous);
        assert_eq!(coarse_severity(PatchType::DriverInjection), Severity::Warning);
        assert_eq!(coarse_severity(PatchType::RegistryPatch), Severity::Warning);
        assert_eq!(coarse_severity(PatchType::KextInjection), Severity::Safe);
        assert_eq!(coarse_severity(PatchType::CustomScript), Severity::Safe);
    }

    #[test]
    fn test_aggregate_is_max() {
        let actions = vec![
            PatchAction::new(
                "a",
                "A",
                PatchType::ConfigPatch,
                PatchPhase::Install,
                PatchPriority::Low,
            ),
            PatchAction::new(
                "b",
                "B",
                PatchType::RegistryPatch,
                PatchPhase::Install,
                PatchPriority::Low,
            ),
        ];
        assert_eq!(aggregate_severity(&actions), Severity::Warning);
        assert_eq!(aggregate_severity(&Vec::<PatchAction>::new()), Severity::Safe);
    }

    #[test]
    fn test_all_negative_flags_clamp_to_blocked() {
        let risk = PatchRisk {
            modifies_kernel: true,
            modifies_bootloader: true,
            unsigned_code: true,
            disables_security: true,
            irreversible: true,
            ..PatchRisk::new("p", "Everything", "custom", "image")
        };
        assert_eq!(risk.score(), 100);
        assert_eq!(risk.severity(), Severity::Blocked);
    }

    #[test]
    fn test_thresholds() {
        assert_eq!(severity_for_score(0), Severity::Safe);
        assert_eq!(severity_for_score(29), Severity::Safe);
        assert_eq!(severity_for_score(30), Severity::Warning);
        assert_eq!(severity_for_score(60), Severity::Dangerous);
        assert_eq!(severity_for_score(80), Severity::Blocked);
    }

    #[test]
    fn test_bootloader_plus_security_bypass() {
        // The Windows installer bypass case: bootloader + disables security
        let risk = PatchRisk {
            modifies_bootloader: true,
            disables_security: true,
            ..PatchRisk::new("w", "Windows bypass", "registry_bypass", "Windows image")
        };
        assert_eq!(risk.score(), 60);
        assert_eq!(risk.severity(), Severity::Dangerous);

        let check = validate_patch_risk(&risk);
        assert_eq!(check.result, Severity::Dangerous);
        let mitigation = check.mitigation.unwrap();
        assert!(mitigation.contains("EFI partition"));
        assert!(mitigation.contains("restore"));
    }

    #[test]
    fn test_no_flags_no_mitigations() {
        let risk = PatchRisk::new("n", "Noop", "config", "image");
        assert_eq!(risk.score(), 0);
        assert!(risk.mitigations().is_empty());
        assert!(validate_patch_risk(&risk).passed());
    }
}
