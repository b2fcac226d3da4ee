//! Audit log.
//!
//! One JSON object per line, appended and fsynced, never rewritten. Field
//! names and types of [`AuditRecord`] are a durability contract: add fields,
//! never rename or retype existing ones.

use crate::error::AuditWriteError;
use crate::severity::Severity;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Longest error message kept in a record
pub const MAX_MESSAGE_LEN: usize = 1000;

/// One immutable audit entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditRecord {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub operation_type: String,
    pub operation_details: serde_json::Value,
    pub user_id: String,
    pub risk_level: Severity,
    pub consent_given: bool,
    pub validation_mode: String,
    pub target_device: Option<String>,
    pub files_modified: Vec<String>,
    pub commands_executed: Vec<String>,
    pub environment_info: BTreeMap<String, String>,
    pub success: bool,
    pub error_message: Option<String>,
    pub rollback_info: Option<serde_json::Value>,
}

impl AuditRecord {
    pub fn new(operation_type: &str, risk_level: Severity, validation_mode: &str) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            operation_type: operation_type.to_string(),
            operation_details: serde_json::Value::Object(serde_json::Map::new()),
            user_id: "system".to_string(),
            risk_level,
            consent_given: false,
            validation_mode: validation_mode.to_string(),
            target_device: None,
            files_modified: Vec::new(),
            commands_executed: Vec::new(),
            environment_info: environment_info(),
            success: false,
            error_message: None,
            rollback_info: None,
        }
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.operation_details = details;
        self
    }

    pub fn with_user(mut self, user_id: &str) -> Self {
        self.user_id = user_id.to_string();
        self
    }

    pub fn with_consent(mut self, consent_given: bool) -> Self {
        self.consent_given = consent_given;
        self
    }

    pub fn with_target(mut self, target: &str) -> Self {
        self.target_device = Some(target.to_string());
        self
    }

    pub fn with_files(mut self, files: Vec<String>) -> Self {
        self.files_modified = files;
        self
    }

    pub fn with_commands(mut self, commands: Vec<String>) -> Self {
        self.commands_executed = commands;
        self
    }

    pub fn succeeded(mut self) -> Self {
        self.success = true;
        self.error_message = None;
        self
    }

    pub fn failed(mut self, error: &str) -> Self {
        self.success = false;
        self.error_message = Some(sanitize_for_audit(error));
        self
    }
}

fn environment_info() -> BTreeMap<String, String> {
    let mut info = BTreeMap::new();
    info.insert("os".to_string(), std::env::consts::OS.to_string());
    info.insert("arch".to_string(), std::env::consts::ARCH.to_string());
    info.insert(
        "patchgate_version".to_string(),
        env!("CARGO_PKG_VERSION").to_string(),
    );
    info
}

/// Append-only JSONL audit file
#[derive(Debug, Clone)]
pub struct AuditLog {
    path: PathBuf,
}

impl AuditLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn io_error(&self, source: std::io::Error) -> AuditWriteError {
        AuditWriteError::Io {
            path: self.path.clone(),
            source,
        }
    }

    /// Create the parent directory, owner-only on Unix
    fn ensure_dir(&self) -> Result<(), AuditWriteError> {
        let Some(parent) = self.path.parent() else {
            return Ok(());
        };
        if parent.as_os_str().is_empty() || parent.exists() {
            return Ok(());
        }

        fs::create_dir_all(parent).map_err(|e| self.io_error(e))?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(parent, fs::Permissions::from_mode(0o700))
                .map_err(|e| self.io_error(e))?;
        }

        Ok(())
    }

    pub fn append(&self, record: &AuditRecord) -> Result<(), AuditWriteError> {
        self.ensure_dir()?;

        let json = serde_json::to_string(record)?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| self.io_error(e))?;

        writeln!(file, "{}", json).map_err(|e| self.io_error(e))?;
        file.sync_all().map_err(|e| self.io_error(e))?;

        debug!("Audit {} {} -> {}", record.id, record.operation_type, self.path.display());
        Ok(())
    }

    /// Every readable record in file order. Malformed lines are skipped.
    pub fn read_all(&self) -> Vec<AuditRecord> {
        let content = match fs::read_to_string(&self.path) {
            Ok(c) => c,
            Err(_) => return Vec::new(),
        };

        content
            .lines()
            .filter(|line| !line.trim().is_empty())
            .filter_map(|line| serde_json::from_str(line).ok())
            .collect()
    }

    /// Last `limit` records, newest first
    pub fn recent(&self, limit: usize) -> Vec<AuditRecord> {
        let mut records = self.read_all();
        records.reverse();
        records.truncate(limit);
        records
    }
}

/// Redact likely secrets and cap the length of text stored in a record
pub fn sanitize_for_audit(text: &str) -> String {
    let secret_patterns = [
        (r"(?i)(password|passwd|pwd)\s*[=:]\s*\S+", "[REDACTED_PASSWORD]"),
        (r"(?i)(api[_-]?key|apikey)\s*[=:]\s*\S+", "[REDACTED_API_KEY]"),
        (r"(?i)(secret|token)\s*[=:]\s*\S+", "[REDACTED_SECRET]"),
    ];

    let mut sanitized = text.to_string();
    for (pattern, replacement) in &secret_patterns {
        if let Ok(re) = regex::Regex::new(pattern) {
            sanitized = re.replace_all(&sanitized, *replacement).to_string();
        }
    }

    if sanitized.len() > MAX_MESSAGE_LEN {
        let mut cut = MAX_MESSAGE_LEN;
        while !sanitized.is_char_boundary(cut) {
            cut -= 1;
        }
        sanitized = format!("{}... [truncated]", &sanitized[..cut]);
    }

    sanitized
}
