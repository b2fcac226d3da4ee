//! Tests for patchgatectl argument parsing and command helpers.

use clap::Parser;
use patchgate_common::{
    ConsentLevel, DeviceAssessor, DeviceProbe, EngineConfig, PatchEngine, PatchValidationMode,
    Platform, SafetyLevel, Severity,
};
use patchgatectl::cli::SystemArgs;
use patchgatectl::commands;
use patchgatectl::{Cli, Commands};
use std::fs;
use tempfile::TempDir;

fn macbook_args() -> SystemArgs {
    SystemArgs {
        manufacturer: "Apple".to_string(),
        model: "MacBookPro11,1".to_string(),
        arch: "x86_64".to_string(),
        ram_gb: None,
        os: "macos".to_string(),
        os_version: "13.6".to_string(),
        sets: vec![],
    }
}

fn engine_in(dir: &TempDir) -> PatchEngine {
    PatchEngine::new(EngineConfig {
        audit_log_path: dir.path().join("audit.jsonl"),
        ..Default::default()
    })
}

#[test]
fn test_parse_apply_with_consent() {
    let cli = Cli::try_parse_from([
        "patchgatectl",
        "--mode",
        "bypass",
        "--json",
        "apply",
        "--manufacturer",
        "Apple",
        "--model",
        "MacBookPro11,1",
        "--os",
        "macos",
        "--os-version",
        "13.6",
        "--target",
        "/media/usb",
        "--dry-run",
        "--consent",
        "expert",
        "--confirm",
        "I understand",
    ])
    .unwrap();

    assert!(cli.json);
    assert_eq!(cli.mode.as_deref(), Some("bypass"));
    match cli.command {
        Commands::Apply {
            system,
            dry_run,
            consent,
            confirm,
            ..
        } => {
            assert!(dry_run);
            assert_eq!(system.arch, "x86_64");
            assert_eq!(consent.as_deref(), Some("expert"));
            assert_eq!(confirm.as_deref(), Some("I understand"));
        }
        other => panic!("unexpected command: {:?}", other),
    }
}

#[test]
fn test_confirm_requires_consent() {
    let result = Cli::try_parse_from([
        "patchgatectl",
        "apply",
        "--manufacturer",
        "Apple",
        "--model",
        "iMac14,2",
        "--os",
        "macos",
        "--os-version",
        "12.7",
        "--target",
        "/media/usb",
        "--confirm",
        "yes",
    ]);
    assert!(result.is_err());
}

#[test]
fn test_assess_requires_a_device() {
    assert!(Cli::try_parse_from(["patchgatectl", "assess"]).is_err());
}

#[test]
fn test_load_config_with_mode_override() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("config.toml");
    fs::write(&path, "safety_level = \"paranoid\"\nload_builtin = false\n").unwrap();

    let config = commands::load_config(Some(path.as_path()), Some("audit_only")).unwrap();
    assert_eq!(config.safety_level, SafetyLevel::Paranoid);
    assert_eq!(config.validation_mode, PatchValidationMode::AuditOnly);
    assert!(!config.load_builtin);

    assert!(commands::load_config(Some(path.as_path()), Some("yolo")).is_err());
    assert!(commands::load_config(Some(dir.path().join("missing.toml").as_path()), None).is_err());
}

#[test]
fn test_build_plan_for_macbook() {
    let dir = TempDir::new().unwrap();
    let engine = engine_in(&dir);
    let plan = commands::build_plan(&engine, &macbook_args()).unwrap();
    assert_eq!(plan.patch_sets[0].id, "intel_hd_graphics_macos");
}

#[test]
fn test_build_plan_without_matches_is_an_error() {
    let dir = TempDir::new().unwrap();
    let engine = engine_in(&dir);
    let mut args = macbook_args();
    args.os = "linux".to_string();
    args.os_version = "6.1".to_string();

    let err = commands::build_plan(&engine, &args).unwrap_err();
    assert!(err.to_string().contains("No applicable patch sets"));
}

#[test]
fn test_consent_from_rejects_unknown_level() {
    let dir = TempDir::new().unwrap();
    let engine = engine_in(&dir);
    let plan = commands::build_plan(&engine, &macbook_args()).unwrap();

    let consent = commands::consent_from(&plan, "informed", None).unwrap();
    assert_eq!(consent.operation_id, plan.id);
    assert_eq!(consent.consent_level, ConsentLevel::Informed);
    assert!(commands::consent_from(&plan, "maybe", None).is_err());
}

#[test]
fn test_score_flags() {
    let cli = Cli::try_parse_from([
        "patchgatectl",
        "score",
        "--kernel",
        "--bootloader",
        "--irreversible",
    ])
    .unwrap();
    let Commands::Score(args) = cli.command else {
        panic!("expected score");
    };
    let risk = commands::risk_from(&args);
    assert_eq!(risk.score(), 85);
    assert_eq!(risk.severity(), Severity::Blocked);
}

struct OneStick;

impl DeviceProbe for OneStick {
    fn exists(&self, device: &str) -> bool {
        device == "/dev/sdb"
    }
    fn is_removable(&self, _device: &str) -> bool {
        true
    }
    fn size_gb(&self, _device: &str) -> f64 {
        16.0
    }
    fn mount_points(&self, _device: &str) -> Vec<String> {
        vec![]
    }
    fn has_os_marker(&self, _device: &str) -> bool {
        false
    }
}

#[test]
fn test_assess_devices_keeps_order() {
    let assessor = DeviceAssessor::new(OneStick, Platform::Linux);
    let risks = commands::assess_devices(
        &assessor,
        &["/dev/sdz".to_string(), "/dev/sdb".to_string()],
    );
    assert_eq!(risks[0].overall_risk, Severity::Blocked);
    assert_eq!(risks[1].overall_risk, Severity::Safe);
}
