//! Patch plans
//!
//! A plan is the ordered collection of patch sets assembled for one
//! hardware/OS target. Its totals, phase grouping and risk are derived and
//! recomputed every time a set is added.

use crate::descriptors::{HardwareInfo, OsInfo};
use crate::error::PlanBuildError;
use crate::patch::{PatchAction, PatchPhase, PatchPriority, PatchSet, PatchStatus, PatchType};
use crate::risk::action_severity;
use crate::severity::Severity;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use tracing::warn;

/// Rough per-action estimate used for the plan summary
pub const MINUTES_PER_ACTION: f64 = 2.0;

/// Reference to an action inside a plan's sets
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionRef {
    pub set_id: String,
    pub action_id: String,
    pub priority: PatchPriority,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PatchPlan {
    pub id: String,
    pub name: String,
    pub description: String,
    pub target_hardware: HardwareInfo,
    pub target_os: OsInfo,

    /// Sets in insertion order
    pub patch_sets: Vec<PatchSet>,

    pub total_actions: usize,
    pub critical_actions: usize,
    pub requires_reboots: usize,
    pub estimated_time_minutes: f64,
    /// Actions grouped by phase, sorted within a phase by priority rank
    pub execution_phases: BTreeMap<PatchPhase, Vec<ActionRef>>,

    pub overall_risk: Severity,
    pub risk_factors: Vec<String>,
    /// AND over every action's `reversible`
    pub reversible: bool,

    pub status: PatchStatus,
    /// Percentage, 0-100
    pub progress: f64,
    pub current_phase: Option<PatchPhase>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl PatchPlan {
    pub fn new(hardware: &HardwareInfo, os: &OsInfo) -> Self {
        let short_id = uuid::Uuid::new_v4().simple().to_string();
        Self {
            id: format!("plan-{}", &short_id[..8]),
            name: format!("Patch Plan for {}", hardware.model_text()),
            description: format!("Hardware-specific patches for {} {}", os.family, os.version),
            target_hardware: hardware.clone(),
            target_os: os.clone(),
            patch_sets: Vec::new(),
            total_actions: 0,
            critical_actions: 0,
            requires_reboots: 0,
            estimated_time_minutes: 0.0,
            execution_phases: BTreeMap::new(),
            overall_risk: Severity::Safe,
            risk_factors: Vec::new(),
            reversible: true,
            status: PatchStatus::Pending,
            progress: 0.0,
            current_phase: None,
            started_at: None,
            completed_at: None,
        }
    }

    /// Add a set after re-checking compatibility and conflicts.
    ///
    /// Conflicts are checked one way only: the new id against the
    /// `conflicts` lists of sets already in the plan.
    pub fn add_set(&mut self, set: PatchSet) -> Result<(), PlanBuildError> {
        let issues = set.compatibility_issues(&self.target_hardware, &self.target_os);
        if !issues.is_empty() {
            warn!("Patch set {} not compatible: {:?}", set.id, issues);
            return Err(PlanBuildError::Incompatible {
                set_id: set.id,
                issues,
            });
        }

        if self.patch_sets.iter().any(|s| s.id == set.id) {
            return Err(PlanBuildError::Duplicate(set.id));
        }

        if let Some(existing) = self.patch_sets.iter().find(|s| s.conflicts.contains(&set.id)) {
            warn!("Patch set {} conflicts with {}", set.id, existing.id);
            return Err(PlanBuildError::Conflict {
                set_id: set.id,
                existing_id: existing.id.clone(),
            });
        }

        self.patch_sets.push(set);
        self.update_statistics();
        self.update_execution_phases();
        self.assess_risk();
        Ok(())
    }

    pub fn actions(&self) -> impl Iterator<Item = &PatchAction> {
        self.patch_sets.iter().flat_map(|s| s.actions.iter())
    }

    pub fn find_action(&self, set_id: &str, action_id: &str) -> Option<&PatchAction> {
        self.patch_sets
            .iter()
            .find(|s| s.id == set_id)
            .and_then(|s| s.actions.iter().find(|a| a.id == action_id))
    }

    pub fn find_action_mut(&mut self, set_id: &str, action_id: &str) -> Option<&mut PatchAction> {
        self.patch_sets
            .iter_mut()
            .find(|s| s.id == set_id)
            .and_then(|s| s.actions.iter_mut().find(|a| a.id == action_id))
    }

    pub fn set_ids(&self) -> HashSet<&str> {
        self.patch_sets.iter().map(|s| s.id.as_str()).collect()
    }

    pub fn count_actions_of(&self, patch_type: PatchType) -> usize {
        self.actions().filter(|a| a.patch_type == patch_type).count()
    }

    fn update_statistics(&mut self) {
        let (total, critical, reboots, reversible) = self.actions().fold(
            (0, 0, 0, true),
            |(total, critical, reboots, reversible), a| {
                (
                    total + 1,
                    critical + usize::from(a.priority == PatchPriority::Critical),
                    reboots + usize::from(a.requires_reboot),
                    reversible && a.reversible,
                )
            },
        );
        self.total_actions = total;
        self.critical_actions = critical;
        self.requires_reboots = reboots;
        self.reversible = reversible;
        self.estimated_time_minutes = total as f64 * MINUTES_PER_ACTION;
    }

    fn update_execution_phases(&mut self) {
        let mut phases: BTreeMap<PatchPhase, Vec<ActionRef>> = BTreeMap::new();
        for set in &self.patch_sets {
            for action in &set.actions {
                phases.entry(action.phase).or_default().push(ActionRef {
                    set_id: set.id.clone(),
                    action_id: action.id.clone(),
                    priority: action.priority,
                });
            }
        }
        // Stable: ties keep set insertion order
        for refs in phases.values_mut() {
            refs.sort_by_key(|r| r.priority.rank());
        }
        self.execution_phases = phases;
    }

    fn assess_risk(&mut self) {
        let mut overall = Severity::Safe;
        let mut factors = Vec::new();

        for action in self.actions() {
            let risk = action_severity(action);
            match risk {
                Severity::Dangerous | Severity::Blocked => {
                    factors.push(format!("Dangerous patch: {}", action.name))
                }
                Severity::Warning => factors.push(format!("Risky patch: {}", action.name)),
                Severity::Safe => {}
            }
            overall = overall.max(risk);
        }

        self.overall_risk = overall;
        self.risk_factors = factors;
    }

    /// One-line human summary
    pub fn summary(&self) -> String {
        let mut parts = vec![
            format!("Patch Plan: {}", self.name),
            format!("Target: {}", self.target_hardware.summary()),
            format!("OS: {} {}", self.target_os.family, self.target_os.version),
            format!(
                "Actions: {} total ({} critical)",
                self.total_actions, self.critical_actions
            ),
            format!("Risk Level: {}", self.overall_risk),
            format!("Estimated Time: {:.1} minutes", self.estimated_time_minutes),
        ];

        if self.requires_reboots > 0 {
            parts.push(format!("Reboots Required: {}", self.requires_reboots));
        }
        if !self.reversible {
            parts.push("Some changes are irreversible".to_string());
        }

        parts.join(" | ")
    }
}
