//! Subcommand implementations

use crate::cli::{Cli, Commands, ScoreArgs, SystemArgs};
use crate::output;
use anyhow::{anyhow, bail, Context, Result};
use owo_colors::OwoColorize;
use patchgate_common::risk::validate_patch_risk;
use patchgate_common::{loader, preflight};
use patchgate_common::{
    ConsentLevel, DeviceAssessor, DeviceProbe, DeviceRisk, EngineConfig, HardwareInfo, OsInfo,
    PatchEngine, PatchPlan, PatchRisk, PatchValidationMode, Platform, SystemProbe, UserConsent,
};
use serde_json::json;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Config from an explicit file or the default lookup, with mode override
pub fn load_config(path: Option<&Path>, mode: Option<&str>) -> Result<EngineConfig> {
    let mut config = match path {
        Some(p) => EngineConfig::load_from_path(p)
            .with_context(|| format!("Failed to load config from {}", p.display()))?,
        None => EngineConfig::load(),
    };

    if let Some(mode) = mode {
        config.validation_mode = PatchValidationMode::parse(mode)
            .ok_or_else(|| anyhow!("Unknown validation mode: {}", mode))?;
    }

    debug!("Using config: {:?}", config);
    Ok(config)
}

pub fn system_from(args: &SystemArgs) -> (HardwareInfo, OsInfo) {
    let mut hardware = HardwareInfo::new(&args.manufacturer, &args.model, &args.arch);
    if let Some(ram) = args.ram_gb {
        hardware = hardware.with_ram_gb(ram);
    }
    (hardware, OsInfo::new(&args.os, &args.os_version))
}

pub fn risk_from(args: &ScoreArgs) -> PatchRisk {
    let mut risk = PatchRisk::new(&args.id, &args.name, &args.patch_type, &args.target);
    risk.modifies_kernel = args.kernel;
    risk.modifies_bootloader = args.bootloader;
    risk.modifies_firmware = args.firmware;
    risk.unsigned_code = args.unsigned;
    risk.disables_security = args.disables_security;
    risk.irreversible = args.irreversible;
    risk
}

/// Plan for the described machine, or an error when nothing applies
pub fn build_plan(engine: &PatchEngine, args: &SystemArgs) -> Result<PatchPlan> {
    let (hardware, os) = system_from(args);
    let requested = if args.sets.is_empty() {
        None
    } else {
        Some(args.sets.as_slice())
    };

    engine
        .build_plan(&hardware, &os, requested)
        .context("Failed to build patch plan")?
        .ok_or_else(|| {
            anyhow!(
                "No applicable patch sets for {} on {} {}",
                hardware.summary(),
                os.family,
                os.version
            )
        })
}

pub fn consent_from(plan: &PatchPlan, level: &str, confirm: Option<&str>) -> Result<UserConsent> {
    let level =
        ConsentLevel::parse(level).ok_or_else(|| anyhow!("Unknown consent level: {}", level))?;
    let confirmation = confirm.unwrap_or("confirmed on command line");
    Ok(UserConsent::new(&plan.id, level, confirmation)
        .with_operation_type("patch_execution")
        .with_risk_factors(plan.risk_factors.clone()))
}

pub fn assess_devices<P: DeviceProbe>(
    assessor: &DeviceAssessor<P>,
    devices: &[String],
) -> Vec<DeviceRisk> {
    devices.iter().map(|d| assessor.assess(d)).collect()
}

pub fn run(cli: Cli) -> Result<()> {
    let json = cli.json;
    match &cli.command {
        Commands::Assess { devices, operation } => cmd_assess(devices, operation.as_deref(), json),
        Commands::Score(args) => cmd_score(args, json),
        Commands::Catalog { os, validate } => match validate {
            Some(path) => cmd_validate_catalog(path, json),
            None => {
                let config = load_config(cli.config.as_deref(), cli.mode.as_deref())?;
                cmd_catalog(config, os.as_deref(), json)
            }
        },
        Commands::Plan(args) => {
            let config = load_config(cli.config.as_deref(), cli.mode.as_deref())?;
            cmd_plan(config, args, json)
        }
        Commands::Apply {
            system,
            target,
            dry_run,
            consent,
            confirm,
        } => {
            let config = load_config(cli.config.as_deref(), cli.mode.as_deref())?;
            cmd_apply(
                config,
                system,
                target,
                *dry_run,
                consent.as_deref().map(|c| (c, confirm.as_deref())),
                json,
            )
        }
        Commands::Audit { limit } => {
            let config = load_config(cli.config.as_deref(), cli.mode.as_deref())?;
            cmd_audit(config, *limit, json)
        }
        Commands::Preflight { files } => cmd_preflight(files, json),
    }
}

fn cmd_assess(devices: &[String], operation: Option<&str>, json: bool) -> Result<()> {
    let assessor = DeviceAssessor::new(SystemProbe::new(), Platform::current());
    let risks = assess_devices(&assessor, devices);

    if json {
        return output::print_json(&risks);
    }

    for risk in &risks {
        output::print_device(risk);
        if let Some(op) = operation {
            for prompt in assessor.confirmation_prompts(&risk.device_path, op) {
                println!("  ? {}", prompt);
            }
        }
    }
    Ok(())
}

fn cmd_score(args: &ScoreArgs, json: bool) -> Result<()> {
    let risk = risk_from(args);
    let check = validate_patch_risk(&risk);

    if json {
        return output::print_json(&json!({
            "risk": risk,
            "score": risk.score(),
            "severity": risk.severity(),
            "mitigations": risk.mitigations(),
            "check": check,
        }));
    }

    output::print_risk(&risk);
    output::print_check(&check);
    Ok(())
}

fn cmd_catalog(config: EngineConfig, os: Option<&str>, json: bool) -> Result<()> {
    let engine = PatchEngine::new(config);
    let sets = engine.catalog().available(os);

    if json {
        return output::print_json(&json!({
            "patch_sets": sets,
            "statistics": engine.catalog().statistics(),
        }));
    }

    if sets.is_empty() {
        println!("No patch sets available");
    }
    for set in &sets {
        output::print_set(set);
    }
    output::print_statistics(&engine.catalog().statistics());
    Ok(())
}

fn cmd_validate_catalog(path: &Path, json: bool) -> Result<()> {
    let result = loader::validate_file(path);

    if json {
        output::print_json(&json!({
            "file": path.display().to_string(),
            "valid": result.valid,
            "errors": result.errors,
            "warnings": result.warnings,
            "action_count": result.action_count,
        }))?;
    } else {
        for error in &result.errors {
            println!("{} {}", "[ERROR]".bright_red(), error);
        }
        for warning in &result.warnings {
            println!("{} {}", "[WARNING]".yellow(), warning);
        }
        println!("{} actions", result.action_count);
    }

    if !result.valid {
        bail!("Catalog {} is invalid", path.display());
    }
    Ok(())
}

fn cmd_plan(config: EngineConfig, args: &SystemArgs, json: bool) -> Result<()> {
    let engine = PatchEngine::new(config);
    let plan = build_plan(&engine, args)?;
    let verdict = engine.evaluate_plan(&plan);
    let (valid, issues) = engine.validate_plan(&plan);
    info!("Plan {} built: valid={}", plan.id, valid);

    if json {
        return output::print_json(&json!({
            "plan": plan,
            "verdict": verdict,
            "valid": valid,
            "issues": issues,
        }));
    }

    output::print_plan(&plan, &verdict, &issues);
    Ok(())
}

fn cmd_apply(
    config: EngineConfig,
    args: &SystemArgs,
    target: &Path,
    dry_run: bool,
    consent: Option<(&str, Option<&str>)>,
    json: bool,
) -> Result<()> {
    let mut engine = PatchEngine::new(config);
    let mut plan = build_plan(&engine, args)?;

    if let Some((level, confirm)) = consent {
        let consent = consent_from(&plan, level, confirm)?;
        engine
            .record_plan_consent(&plan, consent)
            .context("Consent rejected")?;
    }

    let report = engine.apply_plan(&mut plan, target, dry_run);

    if json {
        output::print_json(&json!({
            "plan_id": plan.id,
            "status": plan.status,
            "report": report,
        }))?;
    } else {
        output::print_report(&report);
    }

    if !report.success {
        bail!("Plan {} was not applied", plan.id);
    }
    Ok(())
}

fn cmd_audit(config: EngineConfig, limit: usize, json: bool) -> Result<()> {
    let engine = PatchEngine::new(config);
    let records = engine.audit_log().recent(limit);

    if json {
        return output::print_json(&records);
    }

    if records.is_empty() {
        println!("No audit records at {}", engine.audit_log().path().display());
    }
    for record in &records {
        output::print_audit(record);
    }
    Ok(())
}

fn cmd_preflight(files: &[PathBuf], json: bool) -> Result<()> {
    let mut checks = vec![preflight::check_privileges()];
    checks.extend(preflight::check_tools(preflight::required_tools(
        Platform::current(),
    )));
    let paths: Vec<&Path> = files.iter().map(|f| f.as_path()).collect();
    checks.extend(preflight::validate_source_files(&paths));

    if json {
        return output::print_json(&checks);
    }

    for check in &checks {
        output::print_check(check);
    }
    Ok(())
}
