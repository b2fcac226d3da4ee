//! Engine configuration.
//!
//! Loads settings from /etc/patchgate/config.toml, then
//! ~/.config/patchgate/config.toml, or uses defaults.

use crate::error::PatchgateError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// System-wide config file
pub const CONFIG_PATH: &str = "/etc/patchgate/config.toml";

/// Fallback audit log location when no data directory is known
pub const FALLBACK_AUDIT_LOG: &str = "/var/lib/patchgate/audit.jsonl";

/// How strict plan validation is
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SafetyLevel {
    Minimal,
    Standard,
    /// Additionally rejects kernel and bootloader actions
    Paranoid,
}

impl Default for SafetyLevel {
    fn default() -> Self {
        Self::Standard
    }
}

impl SafetyLevel {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "minimal" => Some(SafetyLevel::Minimal),
            "standard" => Some(SafetyLevel::Standard),
            "paranoid" => Some(SafetyLevel::Paranoid),
            _ => None,
        }
    }
}

impl fmt::Display for SafetyLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SafetyLevel::Minimal => write!(f, "minimal"),
            SafetyLevel::Standard => write!(f, "standard"),
            SafetyLevel::Paranoid => write!(f, "paranoid"),
        }
    }
}

/// How the Plan Gate treats dangerous actions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PatchValidationMode {
    /// Dangerous actions hard-block the plan
    Compliant,
    /// Dangerous actions need expert consent
    Bypass,
    /// Same gate as bypass, recorded for audit review
    AuditOnly,
}

impl Default for PatchValidationMode {
    fn default() -> Self {
        Self::Compliant
    }
}

impl PatchValidationMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            PatchValidationMode::Compliant => "compliant",
            PatchValidationMode::Bypass => "bypass",
            PatchValidationMode::AuditOnly => "audit_only",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().replace('-', "_").as_str() {
            "compliant" => Some(PatchValidationMode::Compliant),
            "bypass" => Some(PatchValidationMode::Bypass),
            "audit_only" => Some(PatchValidationMode::AuditOnly),
            _ => None,
        }
    }
}

impl fmt::Display for PatchValidationMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub safety_level: SafetyLevel,

    #[serde(default)]
    pub validation_mode: PatchValidationMode,

    /// JSONL audit log
    #[serde(default = "default_audit_log_path")]
    pub audit_log_path: PathBuf,

    /// Directory scanned for *.yaml patch catalogs
    #[serde(default)]
    pub catalog_dir: Option<PathBuf>,

    /// Register the built-in reference sets at startup
    #[serde(default = "default_load_builtin")]
    pub load_builtin: bool,

    /// Recorded as `user_id` in audit records
    #[serde(default = "default_operator")]
    pub operator: String,
}

fn default_audit_log_path() -> PathBuf {
    dirs::data_local_dir()
        .map(|d| d.join("patchgate").join("audit.jsonl"))
        .unwrap_or_else(|| PathBuf::from(FALLBACK_AUDIT_LOG))
}

fn default_load_builtin() -> bool {
    true
}

fn default_operator() -> String {
    "system".to_string()
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            safety_level: SafetyLevel::default(),
            validation_mode: PatchValidationMode::default(),
            audit_log_path: default_audit_log_path(),
            catalog_dir: None,
            load_builtin: default_load_builtin(),
            operator: default_operator(),
        }
    }
}

impl EngineConfig {
    /// Per-user config file, if a config directory is known
    pub fn user_config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join("patchgate").join("config.toml"))
    }

    /// Load config from the system path, then the user path, else defaults
    pub fn load() -> Self {
        Self::load_from_path(Path::new(CONFIG_PATH))
            .or_else(|e| match Self::user_config_path() {
                Some(p) => Self::load_from_path(&p),
                None => Err(e),
            })
            .unwrap_or_else(|e| {
                warn!("Config not found, using defaults: {}", e);
                EngineConfig::default()
            })
    }

    pub fn load_from_path(path: &Path) -> Result<Self, PatchgateError> {
        let content = fs::read_to_string(path)?;
        let config: EngineConfig = toml::from_str(&content)
            .map_err(|e| PatchgateError::Config(format!("{}: {}", path.display(), e)))?;
        info!("Loaded config from {}", path.display());
        Ok(config)
    }

    pub fn to_toml(&self) -> Result<String, PatchgateError> {
        toml::to_string_pretty(self).map_err(|e| PatchgateError::Config(e.to_string()))
    }
}
