//! Plan Gate.
//!
//! Scans every action of a plan before execution and decides the severity of
//! running it under the configured validation mode.

use crate::config::PatchValidationMode;
use crate::consent::ConsentLevel;
use crate::patch::{PatchAction, PatchType};
use crate::plan::PatchPlan;
use crate::severity::Severity;
use serde::{Deserialize, Serialize};

/// Outcome of the Plan Gate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanGateVerdict {
    pub severity: Severity,
    /// Consent the ledger must hold for the plan id. Meaningless when `Blocked`.
    pub required_consent: ConsentLevel,
    /// Itemized triggers, one line per action
    pub factors: Vec<String>,
    /// Ids of the actions that triggered the verdict
    pub action_ids: Vec<String>,
}

impl PlanGateVerdict {
    fn safe() -> Self {
        Self {
            severity: Severity::Safe,
            required_consent: ConsentLevel::None,
            factors: Vec::new(),
            action_ids: Vec::new(),
        }
    }

    pub fn is_blocked(&self) -> bool {
        self.severity == Severity::Blocked
    }

    pub fn needs_consent(&self) -> bool {
        self.severity > Severity::Safe && !self.is_blocked()
    }
}

/// Custom script, firmware or kernel patch, or anything non-reversible
pub fn is_dangerous(action: &PatchAction) -> bool {
    matches!(
        action.patch_type,
        PatchType::CustomScript | PatchType::FirmwarePatch | PatchType::KernelPatch
    ) || !action.reversible
}

fn needs_review(action: &PatchAction) -> bool {
    matches!(
        action.patch_type,
        PatchType::DriverInjection | PatchType::RegistryPatch
    )
}

fn danger_reason(action: &PatchAction) -> String {
    if action.reversible {
        format!("{} ({}): {}", action.id, action.name, action.patch_type)
    } else {
        format!(
            "{} ({}): {}, irreversible",
            action.id, action.name, action.patch_type
        )
    }
}

pub fn evaluate(plan: &PatchPlan, mode: PatchValidationMode) -> PlanGateVerdict {
    let dangerous: Vec<&PatchAction> = plan.actions().filter(|a| is_dangerous(a)).collect();

    if !dangerous.is_empty() {
        let factors = dangerous.iter().map(|a| danger_reason(a)).collect();
        let action_ids = dangerous.iter().map(|a| a.id.clone()).collect();
        return match mode {
            PatchValidationMode::Compliant => PlanGateVerdict {
                severity: Severity::Blocked,
                required_consent: ConsentLevel::Expert,
                factors,
                action_ids,
            },
            PatchValidationMode::Bypass | PatchValidationMode::AuditOnly => PlanGateVerdict {
                severity: Severity::Dangerous,
                required_consent: ConsentLevel::Expert,
                factors,
                action_ids,
            },
        };
    }

    let review: Vec<&PatchAction> = plan.actions().filter(|a| needs_review(a)).collect();
    if !review.is_empty() {
        return PlanGateVerdict {
            severity: Severity::Warning,
            required_consent: ConsentLevel::Basic,
            factors: review
                .iter()
                .map(|a| format!("{} ({}): {}", a.id, a.name, a.patch_type))
                .collect(),
            action_ids: review.iter().map(|a| a.id.clone()).collect(),
        };
    }

    PlanGateVerdict::safe()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptors::{HardwareInfo, OsInfo};
    use crate::patch::{PatchPhase, PatchPriority, PatchSet};

    fn plan_with(actions: Vec<PatchAction>) -> PatchPlan {
        let hw = HardwareInfo::new("Dell", "XPS 13", "x86_64");
        let os = OsInfo::new("windows", "10.0.19045");
        let mut set = PatchSet::new("s", "S", "windows");
        set.actions = actions;
        let mut plan = PatchPlan::new(&hw, &os);
        plan.add_set(set).unwrap();
        plan
    }

    fn action(id: &str, t: PatchType) -> PatchAction {
        PatchAction::new(id, id, t, PatchPhase::Install, PatchPriority::High)
    }

    #[test]
    fn test_compliant_blocks_kernel_patch() {
        let plan = plan_with(vec![action("k", PatchType::KernelPatch).irreversible()]);
        let verdict = evaluate(&plan, PatchValidationMode::Compliant);
        assert!(verdict.is_blocked());
        assert_eq!(verdict.action_ids, vec!["k".to_string()]);
        assert!(verdict.factors[0].contains("irreversible"));
    }

    #[test]
    fn test_bypass_needs_expert() {
        for mode in [PatchValidationMode::Bypass, PatchValidationMode::AuditOnly] {
            let plan = plan_with(vec![action("fw", PatchType::FirmwarePatch)]);
            let verdict = evaluate(&plan, mode);
            assert_eq!(verdict.severity, Severity::Dangerous);
            assert_eq!(verdict.required_consent, ConsentLevel::Expert);
            assert!(verdict.needs_consent());
        }
    }

    #[test]
    fn test_irreversible_config_is_dangerous() {
        let plan = plan_with(vec![action("c", PatchType::ConfigPatch).irreversible()]);
        assert!(evaluate(&plan, PatchValidationMode::Compliant).is_blocked());
    }

    #[test]
    fn test_driver_is_warning_in_every_mode() {
        for mode in [
            PatchValidationMode::Compliant,
            PatchValidationMode::Bypass,
            PatchValidationMode::AuditOnly,
        ] {
            let plan = plan_with(vec![
                action("d", PatchType::DriverInjection),
                action("e", PatchType::EfiPatch),
            ]);
            let verdict = evaluate(&plan, mode);
            assert_eq!(verdict.severity, Severity::Warning);
            assert_eq!(verdict.required_consent, ConsentLevel::Basic);
            assert_eq!(verdict.action_ids, vec!["d".to_string()]);
        }
    }

    #[test]
    fn test_plain_plan_is_safe() {
        let plan = plan_with(vec![action("x", PatchType::KextInjection)]);
        let verdict = evaluate(&plan, PatchValidationMode::Compliant);
        assert_eq!(verdict.severity, Severity::Safe);
        assert!(!verdict.needs_consent());
        assert!(verdict.factors.is_empty());
    }
}
