//! Condition matching
//!
//! Decides whether one patch action applies to a hardware + OS pair.
//!
//! Rules:
//! - Absent predicates are vacuously true, present ones are ANDed
//! - OS-version and hardware-model patterns match anchored at the start
//! - Exclusion patterns search `"{manufacturer} {model}"`, case-insensitive
//! - A predicate whose hardware/OS datum is missing is skipped, not failed.
//!   This includes `minimum_ram_gb` when RAM is unknown.

use crate::descriptors::{HardwareInfo, OsInfo};
use crate::error::MatchError;
use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Applicability predicates for one action
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Condition {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub os_version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hardware_model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cpu_architecture: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub minimum_ram_gb: Option<f64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub exclusion_patterns: Vec<String>,
}

impl Condition {
    pub fn is_empty(&self) -> bool {
        self.os_version.is_none()
            && self.hardware_model.is_none()
            && self.cpu_architecture.is_none()
            && self.minimum_ram_gb.is_none()
            && self.exclusion_patterns.is_empty()
    }

    /// Check every pattern compiles
    pub fn validate(&self) -> Result<(), MatchError> {
        if let Some(p) = &self.os_version {
            compile_anchored("os_version", p)?;
        }
        if let Some(p) = &self.hardware_model {
            compile_anchored("hardware_model", p)?;
        }
        for p in &self.exclusion_patterns {
            compile_search("exclusion_patterns", p)?;
        }
        Ok(())
    }

    pub fn matches(&self, hardware: &HardwareInfo, os: &OsInfo) -> bool {
        matches(self, hardware, os)
    }
}

/// Decide whether `condition` holds for `hardware` and `os`
pub fn matches(condition: &Condition, hardware: &HardwareInfo, os: &OsInfo) -> bool {
    if let Some(pattern) = &condition.os_version {
        if !os.version.is_empty() && !starts_with_match("os_version", pattern, &os.version) {
            return false;
        }
    }

    if let Some(pattern) = &condition.hardware_model {
        if !hardware.model.is_empty()
            && !starts_with_match("hardware_model", pattern, &hardware.model)
        {
            return false;
        }
    }

    if let Some(arch) = &condition.cpu_architecture {
        if !hardware.cpu_architecture.is_empty() && hardware.cpu_architecture != *arch {
            return false;
        }
    }

    // Unknown RAM skips the predicate
    if let (Some(minimum), Some(ram)) = (condition.minimum_ram_gb, hardware.known_ram_gb()) {
        if ram < minimum {
            return false;
        }
    }

    let model_text = hardware.model_text();
    for exclusion in &condition.exclusion_patterns {
        match compile_search("exclusion_patterns", exclusion) {
            Ok(re) if re.is_match(&model_text) => return false,
            Ok(_) => {}
            Err(e) => {
                // An exclusion that cannot be evaluated must not let the action through
                warn!("{}", e);
                return false;
            }
        }
    }

    true
}

/// Anchored-at-start match. A malformed pattern never matches.
pub fn starts_with_match(field: &str, pattern: &str, text: &str) -> bool {
    match compile_anchored(field, pattern) {
        Ok(re) => re.is_match(text),
        Err(e) => {
            warn!("{}", e);
            false
        }
    }
}

/// Unanchored, case-insensitive search. A malformed pattern never matches.
pub fn search_match(field: &str, pattern: &str, text: &str) -> bool {
    match compile_search(field, pattern) {
        Ok(re) => re.is_match(text),
        Err(e) => {
            warn!("{}", e);
            false
        }
    }
}

pub(crate) fn compile_anchored(field: &str, pattern: &str) -> Result<Regex, MatchError> {
    Regex::new(&format!("^(?:{})", pattern)).map_err(|e| MatchError {
        field: field.to_string(),
        pattern: pattern.to_string(),
        reason: e.to_string(),
    })
}

pub(crate) fn compile_search(field: &str, pattern: &str) -> Result<Regex, MatchError> {
    RegexBuilder::new(pattern)
        .case_insensitive(true)
        .build()
        .map_err(|e| MatchError {
            field: field.to_string(),
            pattern: pattern.to_string(),
            reason: e.to_string(),
        })
}
