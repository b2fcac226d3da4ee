//! Patch catalog and plan builder.

use crate::config::SafetyLevel;
use crate::descriptors::{HardwareInfo, OsInfo};
use crate::error::{MatchError, PlanBuildError};
use crate::patch::{PatchAction, PatchPhase, PatchPriority, PatchSet, PatchType};
use crate::plan::PatchPlan;
use crate::severity::Severity;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

/// Counts over the registered sets
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CatalogStatistics {
    pub total_patch_sets: usize,
    pub total_actions: usize,
    pub by_os: BTreeMap<String, usize>,
    pub by_priority: BTreeMap<String, usize>,
    pub by_type: BTreeMap<String, usize>,
}

/// Registered patch sets, in registration order
#[derive(Debug, Clone, Default)]
pub struct PatchCatalog {
    sets: Vec<PatchSet>,
}

impl PatchCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Catalog holding the two reference sets
    pub fn builtin() -> Self {
        let mut catalog = Self::new();
        for set in builtin_sets() {
            // Built-in patterns are fixed and known to compile
            if let Err(e) = catalog.register(set) {
                warn!("Built-in patch set rejected: {}", e);
            }
        }
        info!("Loaded {} built-in patch sets", catalog.len());
        catalog
    }

    /// Add a set, replacing any set with the same id
    pub fn register(&mut self, set: PatchSet) -> Result<(), MatchError> {
        set.validate_patterns()?;
        match self.sets.iter_mut().find(|s| s.id == set.id) {
            Some(existing) => {
                debug!("Replacing patch set: {}", set.id);
                *existing = set;
            }
            None => {
                debug!("Registered patch set: {}", set.id);
                self.sets.push(set);
            }
        }
        Ok(())
    }

    pub fn get(&self, id: &str) -> Option<&PatchSet> {
        self.sets.iter().find(|s| s.id == id)
    }

    pub fn remove(&mut self, id: &str) -> Option<PatchSet> {
        let index = self.sets.iter().position(|s| s.id == id)?;
        Some(self.sets.remove(index))
    }

    pub fn len(&self) -> usize {
        self.sets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sets.is_empty()
    }

    pub fn sets(&self) -> &[PatchSet] {
        &self.sets
    }

    /// Registered sets, optionally restricted to one OS family
    pub fn available(&self, os_family: Option<&str>) -> Vec<&PatchSet> {
        self.sets
            .iter()
            .filter(|s| os_family.map_or(true, |f| s.target_os == f))
            .collect()
    }

    pub fn statistics(&self) -> CatalogStatistics {
        let mut stats = CatalogStatistics {
            total_patch_sets: self.sets.len(),
            ..Default::default()
        };

        for set in &self.sets {
            *stats.by_os.entry(set.target_os.clone()).or_default() += 1;
            for action in &set.actions {
                stats.total_actions += 1;
                *stats
                    .by_priority
                    .entry(action.priority.to_string())
                    .or_default() += 1;
                *stats
                    .by_type
                    .entry(action.patch_type.to_string())
                    .or_default() += 1;
            }
        }

        stats
    }

    /// Sets that apply to `hardware` and `os`, most urgent first
    pub fn applicable_sets(
        &self,
        hardware: &HardwareInfo,
        os: &OsInfo,
        requested: Option<&[String]>,
    ) -> Vec<&PatchSet> {
        let mut applicable: Vec<&PatchSet> = self
            .sets
            .iter()
            .filter(|s| requested.map_or(true, |ids| ids.contains(&s.id)))
            .filter(|s| {
                let issues = s.compatibility_issues(hardware, os);
                if !issues.is_empty() {
                    debug!("Patch set {} not compatible: {:?}", s.id, issues);
                    return false;
                }
                let actions = s.applicable_actions(hardware, os).len();
                if actions == 0 {
                    debug!("Patch set {} is compatible but no actions applicable", s.id);
                }
                actions > 0
            })
            .collect();

        // Stable sort keeps registration order on ties
        applicable.sort_by_key(|s| s.min_priority_rank());
        applicable
    }

    /// Build a plan from every applicable set.
    ///
    /// `requested` only filters the catalog: unknown ids are logged and
    /// ignored. Sets that `add_set` rejects are logged and left out. Returns
    /// `Ok(None)` when no set applies.
    pub fn build_plan(
        &self,
        hardware: &HardwareInfo,
        os: &OsInfo,
        requested: Option<&[String]>,
    ) -> Result<Option<PatchPlan>, PlanBuildError> {
        if let Some(ids) = requested {
            for missing in ids.iter().filter(|id| self.get(id).is_none()) {
                warn!("Requested patch set {} is not in the catalog", missing);
            }
        }

        info!("Creating patch plan for {}", hardware.summary());
        let mut plan = PatchPlan::new(hardware, os);

        for set in self.applicable_sets(hardware, os, requested) {
            match plan.add_set(set.clone()) {
                Ok(()) => info!("Added patch set to plan: {}", set.id),
                Err(e) => warn!("Failed to add patch set to plan: {}", e),
            }
        }

        if plan.patch_sets.is_empty() {
            info!("No applicable patches found for this hardware/OS combination");
            return Ok(None);
        }

        info!(
            "Created patch plan {} with {} patch sets",
            plan.id,
            plan.patch_sets.len()
        );
        Ok(Some(plan))
    }
}

/// Safety review of a built plan. Returns `(valid, issues)`.
///
/// Unlike `add_set`, conflicts are checked in both directions here.
pub fn validate_plan(plan: &PatchPlan, safety_level: SafetyLevel) -> (bool, Vec<String>) {
    let mut issues = Vec::new();

    if plan.overall_risk >= Severity::Dangerous {
        issues.push("Plan contains dangerous patches that could prevent boot".to_string());
    }

    let ids = plan.set_ids();
    for set in &plan.patch_sets {
        for dep in &set.dependencies {
            if !ids.contains(dep.as_str()) {
                issues.push(format!("Missing dependency: {} requires {}", set.id, dep));
            }
        }
        for conflict in &set.conflicts {
            if ids.contains(conflict.as_str()) {
                issues.push(format!(
                    "Conflict detected: {} conflicts with {}",
                    set.id, conflict
                ));
            }
        }
    }

    if safety_level == SafetyLevel::Paranoid {
        for action in plan.actions() {
            if matches!(
                action.patch_type,
                PatchType::KernelPatch | PatchType::BootloaderPatch
            ) {
                issues.push(format!(
                    "High-risk patch blocked in paranoid mode: {}",
                    action.name
                ));
            }
        }
    }

    (issues.is_empty(), issues)
}

fn builtin_sets() -> Vec<PatchSet> {
    let mut intel = PatchSet::new(
        "intel_hd_graphics_macos",
        "Intel HD Graphics Support",
        "macos",
    )
    .with_versions(&["11.*", "12.*", "13.*", "14.*"])
    .with_hardware(&["MacBook.*", "iMac.*", "Mac mini.*"])
    .with_action(
        PatchAction::new(
            "intel_framebuffer_patch",
            "Intel Framebuffer Patch",
            PatchType::KextInjection,
            PatchPhase::PostInstall,
            PatchPriority::Critical,
        )
        .with_description("Patches Intel framebuffer kexts for compatibility")
        .with_sources(&["IntelFramebuffer.kext"])
        .with_destination("System/Library/Extensions")
        .needs_reboot(),
    );
    intel.description =
        "Enables Intel HD Graphics support on unsupported macOS versions".to_string();

    let mut broadcom = PatchSet::new("broadcom_wifi_windows", "Broadcom WiFi Driver", "windows")
        .with_versions(&["10.*", "11.*"])
        .with_hardware(&[".*"])
        .with_action(
            PatchAction::new(
                "broadcom_driver_inject",
                "Broadcom Driver Injection",
                PatchType::DriverInjection,
                PatchPhase::PreInstall,
                PatchPriority::High,
            )
            .with_description("Injects Broadcom WiFi drivers into Windows image")
            .with_sources(&["bcmwl63a.inf", "bcmwl63a.sys"])
            .with_destination("Windows/System32/drivers"),
        );
    broadcom.description = "Injects Broadcom WiFi drivers for older hardware".to_string();

    vec![intel, broadcom]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::condition::Condition;

    fn macbook() -> HardwareInfo {
        HardwareInfo::new("Apple", "MacBookPro11,1", "x86_64").with_ram_gb(16.0)
    }

    #[test]
    fn test_builtin_catalog() {
        let catalog = PatchCatalog::builtin();
        assert_eq!(catalog.len(), 2);
        assert_eq!(catalog.available(Some("macos")).len(), 1);
        assert_eq!(catalog.available(None).len(), 2);

        let stats = catalog.statistics();
        assert_eq!(stats.total_patch_sets, 2);
        assert_eq!(stats.by_os["windows"], 1);
        assert_eq!(stats.by_type["kext_injection"], 1);
        assert_eq!(stats.by_priority["high"], 1);
    }

    #[test]
    fn test_register_replaces_by_id() {
        let mut catalog = PatchCatalog::builtin();
        let replacement = PatchSet::new("intel_hd_graphics_macos", "Replaced", "macos");
        catalog.register(replacement).unwrap();
        assert_eq!(catalog.len(), 2);
        assert_eq!(catalog.get("intel_hd_graphics_macos").unwrap().name, "Replaced");
    }

    #[test]
    fn test_register_rejects_bad_pattern() {
        let mut catalog = PatchCatalog::new();
        let set = PatchSet::new("bad", "Bad", "macos").with_versions(&["12.("]);
        let err = catalog.register(set).unwrap_err();
        assert_eq!(err.field, "target_versions");
        assert!(catalog.is_empty());
    }

    #[test]
    fn test_build_plan_for_macbook() {
        let catalog = PatchCatalog::builtin();
        let plan = catalog
            .build_plan(&macbook(), &OsInfo::new("macos", "12.7.1"), None)
            .unwrap()
            .unwrap();
        assert_eq!(plan.patch_sets.len(), 1);
        assert_eq!(plan.patch_sets[0].id, "intel_hd_graphics_macos");
        assert_eq!(plan.requires_reboots, 1);
    }

    #[test]
    fn test_unsupported_version_gives_no_plan() {
        let catalog = PatchCatalog::builtin();
        let plan = catalog
            .build_plan(&macbook(), &OsInfo::new("macos", "10.15"), None)
            .unwrap();
        assert!(plan.is_none());
    }

    #[test]
    fn test_unknown_requested_id_is_ignored() {
        let catalog = PatchCatalog::builtin();
        let os = OsInfo::new("macos", "12.7");

        let requested = vec!["intel_hd_graphics_macos".to_string(), "nope".to_string()];
        let plan = catalog
            .build_plan(&macbook(), &os, Some(&requested))
            .unwrap()
            .unwrap();
        assert_eq!(plan.patch_sets.len(), 1);
        assert_eq!(plan.patch_sets[0].id, "intel_hd_graphics_macos");

        let only_unknown = vec!["nope".to_string()];
        let plan = catalog.build_plan(&macbook(), &os, Some(&only_unknown));
        assert!(plan.unwrap().is_none());
    }

    #[test]
    fn test_set_without_applicable_actions_is_skipped() {
        let mut catalog = PatchCatalog::new();
        catalog
            .register(
                PatchSet::new("arm_only", "ARM only", "macos").with_action(
                    PatchAction::new(
                        "a",
                        "A",
                        PatchType::ConfigPatch,
                        PatchPhase::Install,
                        PatchPriority::Low,
                    )
                    .with_condition(Condition {
                        cpu_architecture: Some("arm64".to_string()),
                        ..Default::default()
                    }),
                ),
            )
            .unwrap();
        let plan = catalog
            .build_plan(&macbook(), &OsInfo::new("macos", "12.0"), None)
            .unwrap();
        assert!(plan.is_none());
    }

    #[test]
    fn test_sets_ordered_by_most_urgent_action() {
        let mut catalog = PatchCatalog::new();
        let set = |id: &str, priority: PatchPriority| {
            PatchSet::new(id, id, "macos").with_action(PatchAction::new(
                &format!("{}_action", id),
                "Action",
                PatchType::ConfigPatch,
                PatchPhase::Install,
                priority,
            ))
        };
        let low = set("low", PatchPriority::Low);
        let critical = set("critical", PatchPriority::Critical);
        let medium = set("medium", PatchPriority::Medium);
        catalog.register(low).unwrap();
        catalog.register(medium).unwrap();
        catalog.register(critical).unwrap();

        let plan = catalog
            .build_plan(&macbook(), &OsInfo::new("macos", "12.0"), None)
            .unwrap()
            .unwrap();
        let order: Vec<&str> = plan.patch_sets.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(order, vec!["critical", "medium", "low"]);
    }

    #[test]
    fn test_validate_plan_issues() {
        let mut catalog = PatchCatalog::new();
        catalog
            .register(
                PatchSet::new("boot", "Boot", "macos")
                    .with_dependencies(&["base"])
                    .with_action(PatchAction::new(
                        "b",
                        "Boot args",
                        PatchType::BootloaderPatch,
                        PatchPhase::EfiBoot,
                        PatchPriority::High,
                    )),
            )
            .unwrap();
        let plan = catalog
            .build_plan(&macbook(), &OsInfo::new("macos", "12.0"), None)
            .unwrap()
            .unwrap();

        let (valid, issues) = validate_plan(&plan, SafetyLevel::Standard);
        assert!(!valid);
        assert_eq!(issues.len(), 2);
        assert!(issues[1].contains("requires base"));

        let (_, paranoid) = validate_plan(&plan, SafetyLevel::Paranoid);
        assert_eq!(paranoid.len(), 3);
        assert!(paranoid[2].contains("paranoid"));
    }
}
