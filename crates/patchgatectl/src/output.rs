//! Terminal rendering for patchgatectl.
//!
//! ASCII only. Color carries severity; everything else is plain text.

use owo_colors::OwoColorize;
use patchgate_common::{
    AuditRecord, CatalogStatistics, DeviceRisk, ExecutionReport, PatchPlan, PatchRisk, PatchSet,
    PlanGateVerdict, SafetyCheck, Severity,
};
use serde::Serialize;

/// `[SAFE]`, `[WARNING]`, ... colored by level
pub fn severity_tag(severity: Severity) -> String {
    let tag = format!("[{}]", severity.as_str().to_uppercase());
    match severity {
        Severity::Safe => tag.bright_green().to_string(),
        Severity::Warning => tag.yellow().to_string(),
        Severity::Dangerous => tag.bright_red().to_string(),
        Severity::Blocked => tag.red().bold().to_string(),
    }
}

pub fn print_json<T: Serialize + ?Sized>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

pub fn print_check(check: &SafetyCheck) {
    println!("{} {}: {}", severity_tag(check.result), check.name, check.message);
    if let Some(details) = &check.details {
        println!("    {}", details.dimmed());
    }
    if let Some(mitigation) = &check.mitigation {
        println!("    -> {}", mitigation.cyan());
    }
}

pub fn print_device(risk: &DeviceRisk) {
    println!(
        "{} {} ({:.1}GB, {})",
        severity_tag(risk.overall_risk),
        risk.device_path.bold(),
        risk.size_gb,
        if risk.is_removable { "removable" } else { "fixed" }
    );
    for factor in &risk.risk_factors {
        println!("  * {}", factor);
    }
}

pub fn print_risk(risk: &PatchRisk) {
    println!(
        "{} {} score {}/100",
        severity_tag(risk.severity()),
        risk.patch_name.bold(),
        risk.score()
    );
    let flags = risk.fired_flags();
    if !flags.is_empty() {
        println!("  flags: {}", flags.join(", "));
    }
    for mitigation in risk.mitigations() {
        println!("  -> {}", mitigation.cyan());
    }
}

pub fn print_set(set: &PatchSet) {
    println!(
        "{} {} v{} [{}] {} actions",
        set.id.bold(),
        set.name,
        set.version,
        set.target_os,
        set.actions.len()
    );
    if !set.description.is_empty() {
        println!("    {}", set.description.dimmed());
    }
}

pub fn print_statistics(stats: &CatalogStatistics) {
    println!();
    println!(
        "{} patch sets, {} actions",
        stats.total_patch_sets, stats.total_actions
    );
    for (label, counts) in [
        ("by os", &stats.by_os),
        ("by priority", &stats.by_priority),
        ("by type", &stats.by_type),
    ] {
        let line: Vec<String> = counts.iter().map(|(k, v)| format!("{}={}", k, v)).collect();
        println!("  {}: {}", label, line.join(" "));
    }
}

pub fn print_plan(plan: &PatchPlan, verdict: &PlanGateVerdict, issues: &[String]) {
    println!("{} {}", plan.id.bold(), plan.name);
    println!("  {}", plan.summary());
    for (phase, refs) in &plan.execution_phases {
        let ids: Vec<&str> = refs.iter().map(|r| r.action_id.as_str()).collect();
        println!("  {:<14} {}", phase.as_str(), ids.join(", "));
    }
    for factor in &plan.risk_factors {
        println!("  ! {}", factor.yellow());
    }

    println!();
    println!("Plan gate: {}", severity_tag(verdict.severity));
    if verdict.needs_consent() {
        println!("  requires {} consent", verdict.required_consent);
    }
    for factor in &verdict.factors {
        println!("  * {}", factor);
    }

    if issues.is_empty() {
        println!("Validation: {}", "passed".bright_green());
    } else {
        println!("Validation: {}", "issues found".bright_red());
        for issue in issues {
            println!("  * {}", issue);
        }
    }
}

pub fn print_report(report: &ExecutionReport) {
    for line in &report.log {
        if line.starts_with("SECURITY BLOCK") {
            println!("{}", line.red().bold());
        } else {
            println!("{}", line);
        }
    }
    if report.success {
        println!("{}", "[OK]".bright_green());
    } else {
        println!("{}", "[FAILED]".bright_red());
    }
}

pub fn print_audit(record: &AuditRecord) {
    let status = if record.success {
        "ok".bright_green().to_string()
    } else {
        "failed".bright_red().to_string()
    };
    println!(
        "{} {} {:<18} {} {}",
        record.timestamp.format("%Y-%m-%d %H:%M:%S"),
        severity_tag(record.risk_level),
        record.operation_type,
        status,
        record.target_device.as_deref().unwrap_or("-")
    );
    if let Some(error) = &record.error_message {
        println!("    {}", error.dimmed());
    }
}
