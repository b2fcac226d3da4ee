//! Error types for patchgate.

use crate::severity::Severity;
use std::path::PathBuf;
use thiserror::Error;

/// A condition or set pattern that cannot be compiled
#[derive(Error, Debug, Clone, PartialEq)]
#[error("Invalid pattern '{pattern}' in {field}: {reason}")]
pub struct MatchError {
    pub field: String,
    pub pattern: String,
    pub reason: String,
}

/// Reasons a set cannot become part of a plan
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PlanBuildError {
    #[error("Patch set {set_id} not compatible: {}", .issues.join("; "))]
    Incompatible { set_id: String, issues: Vec<String> },

    #[error("Patch set {set_id} conflicts with {existing_id}")]
    Conflict { set_id: String, existing_id: String },

    #[error("Patch set {0} is already part of the plan")]
    Duplicate(String),

    #[error(transparent)]
    Pattern(#[from] MatchError),
}

/// A gate rejection. Always itemized.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SecurityBlock {
    #[error("SECURITY BLOCK: Target does not exist: {}", .0.display())]
    TargetMissing(PathBuf),

    #[error("SECURITY BLOCK: Attempted operation on system path: {}", .0.display())]
    SystemPath(PathBuf),

    #[error(
        "SECURITY BLOCK: Target {} is outside allowed locations ({})",
        .path.display(),
        .allowed.join(", ")
    )]
    OutsideAllowedPrefixes { path: PathBuf, allowed: Vec<String> },

    #[error("SECURITY BLOCK: Plan blocked in {mode} mode: {}", .factors.join("; "))]
    PlanBlocked { mode: String, factors: Vec<String> },

    #[error(
        "SECURITY BLOCK: Insufficient consent for risk level {severity}: {}",
        .factors.join("; ")
    )]
    InsufficientConsent { severity: Severity, factors: Vec<String> },

    #[error(
        "SECURITY BLOCK: Action {action_id} destination escapes target: {}",
        .destination.display()
    )]
    DestinationEscape { action_id: String, destination: PathBuf },

    #[error("SECURITY BLOCK: Custom scripts not allowed: {0}")]
    CustomScript(String),
}

/// Consent validation failures
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConsentError {
    #[error("Consent for {operation_id} is {provided}, {required} required")]
    Insufficient {
        operation_id: String,
        provided: String,
        required: String,
    },

    #[error("Consent for {operation_id} expired {age_secs}s after issuance")]
    Expired { operation_id: String, age_secs: i64 },

    #[error("Consent for {0} has an empty confirmation")]
    MissingConfirmation(String),
}

/// Audit log write failure. Logged by the engine and never allowed to change
/// the outcome of the operation being recorded.
#[derive(Error, Debug)]
pub enum AuditWriteError {
    #[error("Audit IO error at {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Audit serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Catalog file loading failures
#[derive(Error, Debug)]
pub enum CatalogLoadError {
    #[error("Failed to read {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse {}: {source}", .path.display())]
    Yaml {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("Invalid catalog {}: {reason}", .path.display())]
    Structure { path: PathBuf, reason: String },

    #[error(transparent)]
    Pattern(#[from] MatchError),
}

/// Crate-wide error
#[derive(Error, Debug)]
pub enum PatchgateError {
    #[error(transparent)]
    Match(#[from] MatchError),

    #[error(transparent)]
    PlanBuild(#[from] PlanBuildError),

    #[error(transparent)]
    Security(#[from] SecurityBlock),

    #[error(transparent)]
    Consent(#[from] ConsentError),

    #[error(transparent)]
    Audit(#[from] AuditWriteError),

    #[error(transparent)]
    Catalog(#[from] CatalogLoadError),

    #[error("Config error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl PatchgateError {
    /// Severity a caller should attach to this error on the unified scale
    pub fn severity(&self) -> Severity {
        match self {
            PatchgateError::Security(_) => Severity::Blocked,
            PatchgateError::Consent(_) => Severity::Blocked,
            PatchgateError::PlanBuild(_) => Severity::Warning,
            PatchgateError::Match(_) => Severity::Warning,
            PatchgateError::Catalog(_) => Severity::Warning,
            PatchgateError::Audit(_) => Severity::Warning,
            PatchgateError::Config(_) => Severity::Warning,
            PatchgateError::Io(_) | PatchgateError::Json(_) => Severity::Dangerous,
        }
    }
}
