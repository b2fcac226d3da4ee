//! Security gate and execution engine.
//!
//! `PatchEngine` owns every piece of mutable state the pipeline needs: the
//! catalog, the consent ledger, the destination policy, the handler registry
//! and the audit log. It has no internal locking; a concurrent host wraps the
//! whole engine in one mutex.
//!
//! `apply_plan` runs two gates before anything executes:
//! 1. Destination Gate: target must exist, must not be a system path, and
//!    must sit under an allowed mount prefix
//! 2. Plan Gate: dangerous actions hard-block under `Compliant`; other
//!    non-safe verdicts need ledger consent recorded for the plan id
//!
//! Execution then walks sets in insertion order and actions within a set by
//! (phase, priority rank). The first failure halts the run. Nothing already
//! applied is rolled back.

use crate::audit::{AuditLog, AuditRecord};
use crate::catalog::{self, PatchCatalog};
use crate::config::EngineConfig;
use crate::consent::{ConsentLedger, UserConsent};
use crate::descriptors::{HardwareInfo, OsInfo};
use crate::destination::DestinationPolicy;
use crate::error::{ConsentError, PlanBuildError, SecurityBlock};
use crate::gate::{self, PlanGateVerdict};
use crate::handlers::HandlerRegistry;
use crate::loader;
use crate::patch::{PatchStatus, PatchType};
use crate::plan::PatchPlan;
use crate::severity::Severity;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::path::{Path, PathBuf};
use tracing::{error, info, warn};

/// Outcome of `apply_plan`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionReport {
    pub success: bool,
    pub log: Vec<String>,
    /// Ids of actions a real run applied
    #[serde(default)]
    pub applied_actions: Vec<String>,
}

impl ExecutionReport {
    fn blocked(block: &SecurityBlock) -> Self {
        Self {
            success: false,
            log: vec![block.to_string()],
            applied_actions: Vec::new(),
        }
    }
}

pub struct PatchEngine {
    config: EngineConfig,
    catalog: PatchCatalog,
    consents: ConsentLedger,
    destination: DestinationPolicy,
    handlers: HandlerRegistry,
    audit: AuditLog,
}

impl PatchEngine {
    /// Engine for the current platform, catalog populated from the config
    pub fn new(config: EngineConfig) -> Self {
        let mut catalog = if config.load_builtin {
            PatchCatalog::builtin()
        } else {
            PatchCatalog::new()
        };

        if let Some(dir) = &config.catalog_dir {
            let loaded = loader::load_dir(dir);
            for set in loaded.sets {
                let id = set.id.clone();
                if let Err(e) = catalog.register(set) {
                    warn!("Skipping patch set {}: {}", id, e);
                }
            }
        }

        let audit = AuditLog::new(config.audit_log_path.clone());
        info!(
            "Patch engine ready: {} patch sets, mode {}, safety {}",
            catalog.len(),
            config.validation_mode,
            config.safety_level
        );

        Self {
            config,
            catalog,
            consents: ConsentLedger::new(),
            destination: DestinationPolicy::current(),
            handlers: HandlerRegistry::with_defaults(),
            audit,
        }
    }

    pub fn with_catalog(mut self, catalog: PatchCatalog) -> Self {
        self.catalog = catalog;
        self
    }

    pub fn with_destination_policy(mut self, policy: DestinationPolicy) -> Self {
        self.destination = policy;
        self
    }

    pub fn with_handlers(mut self, handlers: HandlerRegistry) -> Self {
        self.handlers = handlers;
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn catalog(&self) -> &PatchCatalog {
        &self.catalog
    }

    pub fn catalog_mut(&mut self) -> &mut PatchCatalog {
        &mut self.catalog
    }

    pub fn consents(&self) -> &ConsentLedger {
        &self.consents
    }

    pub fn consents_mut(&mut self) -> &mut ConsentLedger {
        &mut self.consents
    }

    pub fn handlers_mut(&mut self) -> &mut HandlerRegistry {
        &mut self.handlers
    }

    pub fn audit_log(&self) -> &AuditLog {
        &self.audit
    }

    fn mode(&self) -> String {
        self.config.validation_mode.to_string()
    }

    /// Append a record. Failures are logged and never change the outcome.
    fn audit(&self, record: AuditRecord) {
        let record = record.with_user(&self.config.operator);
        if let Err(e) = self.audit.append(&record) {
            warn!("Failed to write audit record {}: {}", record.id, e);
        }
    }

    pub fn build_plan(
        &self,
        hardware: &HardwareInfo,
        os: &OsInfo,
        requested: Option<&[String]>,
    ) -> Result<Option<PatchPlan>, PlanBuildError> {
        self.catalog.build_plan(hardware, os, requested)
    }

    /// Safety review at the configured safety level
    pub fn validate_plan(&self, plan: &PatchPlan) -> (bool, Vec<String>) {
        catalog::validate_plan(plan, self.config.safety_level)
    }

    pub fn evaluate_plan(&self, plan: &PatchPlan) -> PlanGateVerdict {
        gate::evaluate(plan, self.config.validation_mode)
    }

    /// Validate and store consent collected by the presentation layer
    pub fn record_consent(
        &mut self,
        consent: UserConsent,
        required: Severity,
    ) -> Result<(), ConsentError> {
        let operation_id = consent.operation_id.clone();
        let level = consent.consent_level;
        let result = self.consents.record(consent, required);

        let record = AuditRecord::new("consent_recorded", required, &self.mode())
            .with_details(json!({
                "operation_id": operation_id,
                "consent_level": level,
            }))
            .with_consent(result.is_ok());
        self.audit(match &result {
            Ok(()) => record.succeeded(),
            Err(e) => record.failed(&e.to_string()),
        });

        result
    }

    /// Store consent for `plan` at the level its Plan Gate verdict demands
    pub fn record_plan_consent(
        &mut self,
        plan: &PatchPlan,
        consent: UserConsent,
    ) -> Result<(), ConsentError> {
        let verdict = self.evaluate_plan(plan);
        if consent.operation_id != plan.id {
            warn!(
                "Consent for {} recorded against plan {}",
                consent.operation_id, plan.id
            );
        }
        let result = self
            .consents
            .record_at_level(consent, verdict.required_consent);

        let record = AuditRecord::new("consent_recorded", verdict.severity, &self.mode())
            .with_details(json!({
                "operation_id": plan.id,
                "required_consent": verdict.required_consent,
            }))
            .with_consent(result.is_ok());
        self.audit(match &result {
            Ok(()) => record.succeeded(),
            Err(e) => record.failed(&e.to_string()),
        });

        result
    }

    /// Run both gates, then execute `plan` against `target`
    pub fn apply_plan(
        &self,
        plan: &mut PatchPlan,
        target: &Path,
        dry_run: bool,
    ) -> ExecutionReport {
        info!(
            "Applying plan {} to {} (dry_run: {})",
            plan.id,
            target.display(),
            dry_run
        );

        let target = match self.destination_gate(plan, target) {
            Ok(t) => t,
            Err(block) => return ExecutionReport::blocked(&block),
        };

        let consent_given = match self.plan_gate(plan, &target) {
            Ok(c) => c,
            Err(block) => return ExecutionReport::blocked(&block),
        };

        let report = self.execute(plan, &target, dry_run);

        let rollback_info = json!({
            "reversible": plan.reversible,
            "applied_actions": report.applied_actions,
            "rollback_performed": false,
        });
        let files: Vec<String> = report
            .applied_actions
            .iter()
            .filter_map(|id| plan.actions().find(|a| &a.id == id))
            .flat_map(|a| a.source_files.iter().cloned())
            .collect();

        let record = AuditRecord::new("patch_execution", plan.overall_risk, &self.mode())
            .with_details(json!({
                "plan_id": plan.id,
                "dry_run": dry_run,
                "patch_sets": plan.patch_sets.iter().map(|s| s.id.clone()).collect::<Vec<_>>(),
                "total_actions": plan.total_actions,
            }))
            .with_target(&target.to_string_lossy())
            .with_consent(consent_given)
            .with_files(files)
            .with_commands(report.applied_actions.clone());
        let mut record = if report.success {
            record.succeeded()
        } else {
            let last = report.log.last().cloned().unwrap_or_default();
            record.failed(&last)
        };
        record.rollback_info = Some(rollback_info);
        self.audit(record);

        report
    }

    fn destination_gate(&self, plan: &PatchPlan, target: &Path) -> Result<PathBuf, SecurityBlock> {
        let result = self.destination.validate(target);
        let record = AuditRecord::new(
            "destination_gate",
            if result.is_ok() { Severity::Safe } else { Severity::Blocked },
            &self.mode(),
        )
        .with_details(json!({ "plan_id": plan.id }))
        .with_target(&target.to_string_lossy());

        match result {
            Ok(canonical) => {
                self.audit(record.succeeded());
                Ok(canonical)
            }
            Err(block) => {
                error!("{}", block);
                self.audit(record.failed(&block.to_string()));
                Err(block)
            }
        }
    }

    /// Returns whether consent was needed and found
    fn plan_gate(&self, plan: &PatchPlan, target: &Path) -> Result<bool, SecurityBlock> {
        let verdict = self.evaluate_plan(plan);
        let record = AuditRecord::new("plan_gate", verdict.severity, &self.mode())
            .with_details(json!({
                "plan_id": plan.id,
                "required_consent": verdict.required_consent,
                "factors": verdict.factors,
                "action_ids": verdict.action_ids,
            }))
            .with_target(&target.to_string_lossy());

        if verdict.is_blocked() {
            let block = SecurityBlock::PlanBlocked {
                mode: self.mode(),
                factors: verdict.factors.clone(),
            };
            error!("{}", block);
            self.audit(record.failed(&block.to_string()));
            return Err(block);
        }

        if !verdict.needs_consent() {
            self.audit(record.succeeded());
            return Ok(false);
        }

        if !self
            .consents
            .check(&plan.id, verdict.required_consent, Utc::now())
        {
            let block = SecurityBlock::InsufficientConsent {
                severity: verdict.severity,
                factors: verdict.factors.clone(),
            };
            warn!("{}", block);
            self.audit(record.with_consent(false).failed(&block.to_string()));
            return Err(block);
        }

        info!(
            "Plan {} covered by {} consent",
            plan.id, verdict.required_consent
        );
        self.audit(record.with_consent(true).succeeded());
        Ok(true)
    }

    fn execute(&self, plan: &mut PatchPlan, target: &Path, dry_run: bool) -> ExecutionReport {
        let mut log = Vec::new();
        let mut applied = Vec::new();
        let total = plan.total_actions.max(1);
        let mut done = 0usize;

        if !dry_run {
            plan.status = PatchStatus::Applying;
            plan.started_at = Some(Utc::now());
            plan.progress = 0.0;
        }

        let hardware = plan.target_hardware.clone();
        let os = plan.target_os.clone();

        for si in 0..plan.patch_sets.len() {
            let set = &plan.patch_sets[si];
            log.push(format!("Applying patch set: {}", set.name));

            let mut order: Vec<usize> = (0..set.actions.len()).collect();
            order.sort_by_key(|&i| (set.actions[i].phase, set.actions[i].priority.rank()));

            for ai in order {
                let action = &plan.patch_sets[si].actions[ai];

                if !action.can_apply(&hardware, &os) {
                    log.push(format!("Skipping {}: conditions not met", action.name));
                    if !dry_run {
                        plan.patch_sets[si].actions[ai].status = PatchStatus::Skipped;
                        done += 1;
                        plan.progress = done as f64 * 100.0 / total as f64;
                    }
                    continue;
                }

                if dry_run {
                    let note = if action.patch_type == PatchType::CustomScript {
                        " (custom scripts are always rejected)"
                    } else {
                        ""
                    };
                    log.push(format!(
                        "[DRY RUN] Would apply {} ({}) in phase {}{}",
                        action.name, action.patch_type, action.phase, note
                    ));
                    continue;
                }

                plan.current_phase = Some(action.phase);
                let outcome = if action.patch_type == PatchType::CustomScript {
                    Err(SecurityBlock::CustomScript(action.id.clone()).to_string())
                } else {
                    match self.handlers.get(action.patch_type) {
                        None => Err(format!(
                            "Unsupported patch type: {} ({})",
                            action.patch_type, action.id
                        )),
                        Some(handler) => match handler.apply(action, target) {
                            Ok(outcome) => {
                                log.extend(outcome.log);
                                if outcome.success {
                                    Ok(())
                                } else {
                                    Err(format!("Action {} failed", action.id))
                                }
                            }
                            Err(e) => Err(format!("Action {} error: {}", action.id, e)),
                        },
                    }
                };

                let action = &mut plan.patch_sets[si].actions[ai];
                done += 1;
                match outcome {
                    Ok(()) => {
                        action.status = PatchStatus::Applied;
                        action.applied_at = Some(Utc::now());
                        applied.push(action.id.clone());
                        plan.progress = done as f64 * 100.0 / total as f64;
                    }
                    Err(message) => {
                        error!("{}", message);
                        action.status = PatchStatus::Failed;
                        action.error_message = Some(message.clone());
                        log.push(message);
                        plan.status = PatchStatus::Failed;
                        plan.completed_at = Some(Utc::now());
                        return ExecutionReport {
                            success: false,
                            log,
                            applied_actions: applied,
                        };
                    }
                }
            }
        }

        if dry_run {
            log.push("Dry run completed".to_string());
        } else {
            plan.status = PatchStatus::Applied;
            plan.progress = 100.0;
            plan.completed_at = Some(Utc::now());
            log.push(format!("Patch plan {} applied", plan.id));
        }

        ExecutionReport {
            success: true,
            log,
            applied_actions: applied,
        }
    }
}

impl std::fmt::Debug for PatchEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PatchEngine")
            .field("config", &self.config)
            .field("patch_sets", &self.catalog.len())
            .field("consents", &self.consents.len())
            .field("destination", &self.destination)
            .field("handlers", &self.handlers)
            .finish()
    }
}
