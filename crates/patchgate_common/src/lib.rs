//! Patch safety and execution engine.
//!
//! Builds hardware/OS-specific patch plans, scores their risk, checks
//! consent and destination safety, and applies them with an audit trail.

pub mod audit;
pub mod catalog;
pub mod condition;
pub mod config;
pub mod consent;
pub mod descriptors;
pub mod destination;
pub mod device_risk;
pub mod engine;
pub mod error;
pub mod gate;
pub mod handlers;
pub mod loader;
pub mod patch;
pub mod plan;
pub mod platform;
pub mod preflight;
pub mod risk;
pub mod severity;
pub mod system_probe;

pub use audit::{AuditLog, AuditRecord};
pub use catalog::{validate_plan, CatalogStatistics, PatchCatalog};
pub use condition::Condition;
pub use config::{EngineConfig, PatchValidationMode, SafetyLevel};
pub use consent::{ConsentLedger, ConsentLevel, UserConsent, CONSENT_TTL_SECS};
pub use descriptors::{HardwareInfo, OsInfo};
pub use destination::DestinationPolicy;
pub use device_risk::{DeviceAssessor, DeviceProbe, DeviceRisk};
pub use engine::{ExecutionReport, PatchEngine};
pub use error::{
    AuditWriteError, CatalogLoadError, ConsentError, MatchError, PatchgateError, PlanBuildError,
    SecurityBlock,
};
pub use gate::PlanGateVerdict;
pub use handlers::{ActionHandler, HandlerOutcome, HandlerRegistry};
pub use patch::{PatchAction, PatchPhase, PatchPriority, PatchSet, PatchStatus, PatchType};
pub use plan::PatchPlan;
pub use platform::Platform;
pub use risk::PatchRisk;
pub use severity::{SafetyCheck, Severity};
pub use system_probe::SystemProbe;
