//! Unified severity scale.
//!
//! One ordering is shared by device risk, action and plan risk, consent
//! sufficiency and gate verdicts: `Safe < Warning < Dangerous < Blocked`.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Severity of a device, action, plan or gate decision
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    /// No known risk
    Safe,
    /// Review recommended
    Warning,
    /// May prevent boot or destroy data
    Dangerous,
    /// Never allowed without the strongest override
    Blocked,
}

impl Default for Severity {
    fn default() -> Self {
        Self::Safe
    }
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Safe => "safe",
            Severity::Warning => "warning",
            Severity::Dangerous => "dangerous",
            Severity::Blocked => "blocked",
        }
    }

    /// Human-readable explanation of what this severity means for the operator
    pub fn describe(&self) -> &'static str {
        match self {
            Severity::Safe => "No risk factors detected.",
            Severity::Warning => "Minor risk factors present. Review before proceeding.",
            Severity::Dangerous => {
                "Changes may prevent boot or lose data. Informed consent required."
            }
            Severity::Blocked => "Operation is not allowed for safety reasons.",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A single named safety check with its verdict
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SafetyCheck {
    pub name: String,
    pub result: Severity,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mitigation: Option<String>,
}

impl SafetyCheck {
    pub fn new(name: &str, result: Severity, message: impl Into<String>) -> Self {
        Self {
            name: name.to_string(),
            result,
            message: message.into(),
            details: None,
            mitigation: None,
        }
    }

    pub fn safe(name: &str, message: impl Into<String>) -> Self {
        Self::new(name, Severity::Safe, message)
    }

    pub fn blocked(name: &str, message: impl Into<String>) -> Self {
        Self::new(name, Severity::Blocked, message)
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

    pub fn with_mitigation(mut self, mitigation: impl Into<String>) -> Self {
        self.mitigation = Some(mitigation.into());
        self
    }

    pub fn passed(&self) -> bool {
        self.result == Severity::Safe
    }
}
