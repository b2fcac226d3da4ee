//! Consent ledger
//!
//! Validates and stores time-bounded, severity-matched consent records that the
//! presentation layer collected from a human. The ledger never prompts anyone.
//!
//! A record satisfies a requirement iff its level ordinal is at least the
//! required ordinal AND it is less than one hour old. Age alone invalidates.

use crate::error::ConsentError;
use crate::severity::Severity;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use tracing::{info, warn};

/// Consent lifetime in seconds
pub const CONSENT_TTL_SECS: i64 = 3600;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConsentLevel {
    None,
    Basic,
    Informed,
    Expert,
}

impl Default for ConsentLevel {
    fn default() -> Self {
        Self::None
    }
}

impl ConsentLevel {
    pub fn ordinal(&self) -> u8 {
        match self {
            ConsentLevel::None => 0,
            ConsentLevel::Basic => 1,
            ConsentLevel::Informed => 2,
            ConsentLevel::Expert => 3,
        }
    }

    /// Level needed to proceed at `severity`
    pub fn required_for(severity: Severity) -> Self {
        match severity {
            Severity::Safe => ConsentLevel::None,
            Severity::Warning => ConsentLevel::Basic,
            Severity::Dangerous => ConsentLevel::Informed,
            Severity::Blocked => ConsentLevel::Expert,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ConsentLevel::None => "none",
            ConsentLevel::Basic => "basic",
            ConsentLevel::Informed => "informed",
            ConsentLevel::Expert => "expert",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "none" => Some(ConsentLevel::None),
            "basic" => Some(ConsentLevel::Basic),
            "informed" => Some(ConsentLevel::Informed),
            "expert" => Some(ConsentLevel::Expert),
            _ => None,
        }
    }
}

impl fmt::Display for ConsentLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A human's authorization for one operation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserConsent {
    pub operation_id: String,
    #[serde(default)]
    pub operation_type: String,
    pub consent_level: ConsentLevel,
    /// Risk factors disclosed to the user
    #[serde(default)]
    pub risk_factors: Vec<String>,
    #[serde(default)]
    pub warnings_shown: Vec<String>,
    pub user_confirmation: String,
    pub timestamp: DateTime<Utc>,
}

impl UserConsent {
    pub fn new(operation_id: &str, consent_level: ConsentLevel, user_confirmation: &str) -> Self {
        Self {
            operation_id: operation_id.to_string(),
            operation_type: String::new(),
            consent_level,
            risk_factors: Vec::new(),
            warnings_shown: Vec::new(),
            user_confirmation: user_confirmation.to_string(),
            timestamp: Utc::now(),
        }
    }

    pub fn with_operation_type(mut self, operation_type: &str) -> Self {
        self.operation_type = operation_type.to_string();
        self
    }

    pub fn with_risk_factors(mut self, factors: Vec<String>) -> Self {
        self.risk_factors = factors;
        self
    }

    pub fn issued_at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn age_secs(&self, now: DateTime<Utc>) -> i64 {
        (now - self.timestamp).num_seconds()
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        self.timestamp + Duration::seconds(CONSENT_TTL_SECS)
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        let age = self.age_secs(now);
        age < 0 || age >= CONSENT_TTL_SECS
    }

    pub fn satisfies(&self, required: ConsentLevel, now: DateTime<Utc>) -> bool {
        self.consent_level.ordinal() >= required.ordinal() && !self.is_expired(now)
    }

    pub fn satisfies_severity(&self, severity: Severity, now: DateTime<Utc>) -> bool {
        self.satisfies(ConsentLevel::required_for(severity), now)
    }

    /// Explain why this record does not cover `required`
    pub fn check(&self, required: ConsentLevel, now: DateTime<Utc>) -> Result<(), ConsentError> {
        if self.is_expired(now) {
            return Err(ConsentError::Expired {
                operation_id: self.operation_id.clone(),
                age_secs: self.age_secs(now),
            });
        }
        if self.consent_level.ordinal() < required.ordinal() {
            return Err(ConsentError::Insufficient {
                operation_id: self.operation_id.clone(),
                provided: self.consent_level.to_string(),
                required: required.to_string(),
            });
        }
        if required > ConsentLevel::None && self.user_confirmation.trim().is_empty() {
            return Err(ConsentError::MissingConfirmation(self.operation_id.clone()));
        }
        Ok(())
    }
}

/// Consent records keyed by operation id. Never implicitly cleared.
#[derive(Debug, Default)]
pub struct ConsentLedger {
    records: HashMap<String, UserConsent>,
}

impl ConsentLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate `consent` against `required` severity and store it
    pub fn record(&mut self, consent: UserConsent, required: Severity) -> Result<(), ConsentError> {
        let level = ConsentLevel::required_for(required);
        self.record_at_level(consent, level)
    }

    /// Validate `consent` against an explicit level and store it
    pub fn record_at_level(
        &mut self,
        consent: UserConsent,
        required: ConsentLevel,
    ) -> Result<(), ConsentError> {
        if let Err(e) = consent.check(required, Utc::now()) {
            warn!("Consent rejected: {}", e);
            return Err(e);
        }

        info!(
            "Consent recorded for {}: {} (required {}, {} risk factors disclosed)",
            consent.operation_id,
            consent.consent_level,
            required,
            consent.risk_factors.len()
        );
        self.records.insert(consent.operation_id.clone(), consent);
        Ok(())
    }

    pub fn get(&self, operation_id: &str) -> Option<&UserConsent> {
        self.records.get(operation_id)
    }

    /// Re-check a stored record against `required` at `now`
    pub fn check(&self, operation_id: &str, required: ConsentLevel, now: DateTime<Utc>) -> bool {
        self.records
            .get(operation_id)
            .map(|c| c.check(required, now).is_ok())
            .unwrap_or(required == ConsentLevel::None)
    }

    pub fn revoke(&mut self, operation_id: &str) -> Option<UserConsent> {
        self.records.remove(operation_id)
    }

    /// Drop expired records. Returns how many were removed.
    pub fn clear_expired(&mut self, now: DateTime<Utc>) -> usize {
        let before = self.records.len();
        self.records.retain(|_, c| !c.is_expired(now));
        before - self.records.len()
    }

    pub fn clear(&mut self) {
        self.records.clear();
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}
