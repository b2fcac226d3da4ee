//! Tests for plan building, risk aggregation and device assessment.

use patchgate_common::risk::{aggregate_severity, coarse_severity};
use patchgate_common::{
    validate_plan, ConsentLevel, DeviceAssessor, DeviceProbe, HardwareInfo, OsInfo, PatchAction,
    PatchCatalog, PatchPhase, PatchPlan, PatchPriority, PatchSet, PatchType, Platform,
    PlanBuildError, SafetyLevel, Severity, UserConsent,
};
use chrono::{Duration, Utc};
use std::collections::HashMap;

fn macbook() -> HardwareInfo {
    HardwareInfo::new("Apple", "MacBookPro11,1", "x86_64").with_ram_gb(16.0)
}

fn set_with(id: &str, types: &[PatchType]) -> PatchSet {
    let mut set = PatchSet::new(id, id, "macos");
    for (i, t) in types.iter().enumerate() {
        set = set.with_action(PatchAction::new(
            &format!("{}_{}", id, i),
            &format!("Action {}", i),
            *t,
            PatchPhase::Install,
            PatchPriority::Medium,
        ));
    }
    set
}

#[test]
fn test_linux_host_gets_no_plan_from_builtin_catalog() {
    let catalog = PatchCatalog::builtin();
    let hw = HardwareInfo::new("Lenovo", "ThinkPad T480", "x86_64");
    let os = OsInfo::new("linux", "6.1.0");
    assert!(catalog.build_plan(&hw, &os, None).unwrap().is_none());
}

#[test]
fn test_unsupported_macos_version_gets_no_plan() {
    let catalog = PatchCatalog::builtin();
    let os = OsInfo::new("macos", "10.15.7");
    assert!(catalog.build_plan(&macbook(), &os, None).unwrap().is_none());
}

#[test]
fn test_requested_unknown_set_is_ignored() {
    let catalog = PatchCatalog::builtin();
    let os = OsInfo::new("macos", "12.7");
    let requested = vec!["intel_hd_graphics_macos".to_string(), "nope".to_string()];

    let plan = catalog
        .build_plan(&macbook(), &os, Some(&requested))
        .unwrap()
        .unwrap();
    let ids: Vec<&str> = plan.patch_sets.iter().map(|s| s.id.as_str()).collect();
    assert_eq!(ids, vec!["intel_hd_graphics_macos"]);
}

#[test]
fn test_overall_risk_is_max_of_action_severities() {
    let combos: &[&[PatchType]] = &[
        &[PatchType::ConfigPatch],
        &[PatchType::KextInjection, PatchType::ConfigPatch],
        &[PatchType::DriverInjection, PatchType::EfiPatch],
        &[PatchType::KernelPatch, PatchType::ConfigPatch],
        &[PatchType::BootloaderPatch, PatchType::FirmwarePatch],
    ];

    for types in combos {
        let mut plan = PatchPlan::new(&macbook(), &OsInfo::new("macos", "13.6"));
        plan.add_set(set_with("s", types)).unwrap();
        let expected = types
            .iter()
            .map(|t| coarse_severity(*t))
            .max()
            .unwrap_or(Severity::Safe);
        assert_eq!(plan.overall_risk, expected, "{:?}", types);
        assert_eq!(plan.overall_risk, aggregate_severity(plan.actions()));
    }
}

#[test]
fn test_conflict_rejected_and_validated_both_ways() {
    let os = OsInfo::new("macos", "13.6");

    // An existing set that lists the newcomer rejects it
    let mut plan = PatchPlan::new(&macbook(), &os);
    let base = set_with("base", &[PatchType::ConfigPatch]).with_conflicts(&["rival"]);
    plan.add_set(base).unwrap();
    let err = plan
        .add_set(set_with("rival", &[PatchType::ConfigPatch]))
        .unwrap_err();
    assert!(matches!(
        err,
        PlanBuildError::Conflict { ref set_id, ref existing_id }
            if set_id == "rival" && existing_id == "base"
    ));
    assert_eq!(plan.patch_sets.len(), 1);

    // A newcomer listing an existing set slips past add_set but not validate_plan
    let mut plan = PatchPlan::new(&macbook(), &os);
    plan.add_set(set_with("base", &[PatchType::ConfigPatch])).unwrap();
    let late = set_with("late", &[PatchType::ConfigPatch]).with_conflicts(&["base"]);
    plan.add_set(late).unwrap();
    assert_eq!(plan.patch_sets.len(), 2);
    let (valid, issues) = validate_plan(&plan, SafetyLevel::Standard);
    assert!(!valid);
    assert!(issues[0].contains("late conflicts with base"));
}

#[test]
fn test_paranoid_flags_kernel_patches() {
    let os = OsInfo::new("macos", "13.6");
    let mut plan = PatchPlan::new(&macbook(), &os);
    plan.add_set(set_with("k", &[PatchType::KernelPatch])).unwrap();

    let (_, standard) = validate_plan(&plan, SafetyLevel::Standard);
    let (_, paranoid) = validate_plan(&plan, SafetyLevel::Paranoid);
    assert!(paranoid.len() > standard.len());
    assert!(paranoid.iter().any(|i| i.contains("paranoid mode")));
}

#[test]
fn test_stale_expert_consent_is_rejected() {
    let mut consent = UserConsent::new("op", ConsentLevel::Expert, "I understand");
    consent.timestamp = Utc::now() - Duration::seconds(3601);
    assert!(!consent.satisfies(ConsentLevel::Basic, Utc::now()));
    assert!(consent.check(ConsentLevel::Basic, Utc::now()).is_err());
}

#[derive(Default)]
struct Disk {
    removable: bool,
    size_gb: f64,
    mounts: Vec<String>,
}

#[derive(Default)]
struct TableProbe {
    disks: HashMap<String, Disk>,
}

impl DeviceProbe for TableProbe {
    fn exists(&self, device: &str) -> bool {
        self.disks.contains_key(device)
    }
    fn is_removable(&self, device: &str) -> bool {
        self.disks.get(device).map(|d| d.removable).unwrap_or(false)
    }
    fn size_gb(&self, device: &str) -> f64 {
        self.disks.get(device).map(|d| d.size_gb).unwrap_or(0.0)
    }
    fn mount_points(&self, device: &str) -> Vec<String> {
        self.disks
            .get(device)
            .map(|d| d.mounts.clone())
            .unwrap_or_default()
    }
    fn has_os_marker(&self, _device: &str) -> bool {
        false
    }
}

fn assessor() -> DeviceAssessor<TableProbe> {
    let mut probe = TableProbe::default();
    probe.disks.insert(
        "/dev/sdb".to_string(),
        Disk {
            removable: true,
            size_gb: 32.0,
            mounts: vec![],
        },
    );
    probe.disks.insert(
        "/dev/sdc".to_string(),
        Disk {
            removable: true,
            size_gb: 64.0,
            mounts: vec!["/".to_string()],
        },
    );
    DeviceAssessor::new(probe, Platform::Linux)
}

#[test]
fn test_root_mounted_device_is_blocked() {
    let risk = assessor().assess("/dev/sdc");
    assert!(risk.is_system_disk);
    assert_eq!(risk.overall_risk, Severity::Blocked);
}

#[test]
fn test_unmounted_usb_stick_is_safe() {
    let risk = assessor().assess("/dev/sdb");
    assert_eq!(risk.overall_risk, Severity::Safe);
    assert!(risk.risk_factors.is_empty());
}

#[test]
fn test_assessment_is_repeatable() {
    let a = assessor();
    for device in ["/dev/sdb", "/dev/sdc", "/dev/sdz"] {
        assert_eq!(a.assess(device), a.assess(device));
    }
    assert_eq!(a.safe_devices(&["/dev/sdc", "/dev/sdb", "/dev/sdz"]), vec!["/dev/sdb"]);
}
