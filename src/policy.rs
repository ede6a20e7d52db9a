//! Circulation policy: loan period, hold expiry and lock timeout.

use std::{fs, path::Path, time::Duration};

use chrono::TimeDelta;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors raised while loading a policy
#[derive(Debug, Error)]
pub enum PolicyError {
    /// The policy file could not be read
    #[error("failed to read policy file: {0}")]
    Io(#[from] std::io::Error),
    /// The policy is not valid JSON for this schema
    #[error("failed to parse policy: {0}")]
    Parse(#[from] serde_json::Error),
    /// A value is out of range
    #[error("invalid policy value for {field}: {reason}")]
    Invalid {
        /// The offending field
        field: &'static str,
        /// Why it was rejected
        reason: &'static str,
    },
}

/// Tunable rules shared by every branch of a registry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CirculationPolicy {
    /// Days between checkout and due date
    pub loan_period_days: u32,
    /// Hours a notified patron has to collect a held book; `None` keeps holds forever
    pub hold_period_hours: Option<u32>,
    /// Milliseconds to wait for a branch lock in the shared registry
    pub transfer_lock_timeout_ms: u64,
}

impl Default for CirculationPolicy {
    fn default() -> Self {
        Self { loan_period_days: 14, hold_period_hours: None, transfer_lock_timeout_ms: 500 }
    }
}

impl CirculationPolicy {
    /// Parse and validate a policy from a JSON document.
    ///
    /// Missing fields take their defaults.
    ///
    /// # Errors
    ///
    /// Returns `PolicyError::Parse` for malformed JSON or unknown fields and
    /// `PolicyError::Invalid` for out-of-range values.
    pub fn from_json_str(json: &str) -> Result<Self, PolicyError> {
        let policy: Self = serde_json::from_str(json)?;
        policy.validate()?;
        Ok(policy)
    }

    /// Read, parse and validate a policy file.
    ///
    /// # Errors
    ///
    /// Returns `PolicyError::Io` if the file cannot be read, otherwise as
    /// [`CirculationPolicy::from_json_str`].
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, PolicyError> {
        let contents = fs::read_to_string(path)?;
        Self::from_json_str(&contents)
    }

    /// Check the policy values are usable.
    ///
    /// # Errors
    ///
    /// Returns `PolicyError::Invalid` naming the first bad field.
    pub fn validate(&self) -> Result<(), PolicyError> {
        if self.loan_period_days == 0 {
            return Err(PolicyError::Invalid {
                field: "loan_period_days",
                reason: "must be at least one day",
            });
        }
        if self.hold_period_hours == Some(0) {
            return Err(PolicyError::Invalid {
                field: "hold_period_hours",
                reason: "must be at least one hour when set",
            });
        }
        Ok(())
    }

    /// The loan period as a chrono delta
    #[must_use]
    pub fn loan_period(&self) -> TimeDelta {
        TimeDelta::try_days(i64::from(self.loan_period_days)).unwrap_or(TimeDelta::MAX)
    }

    /// The hold period as a chrono delta, if holds expire
    #[must_use]
    pub fn hold_period(&self) -> Option<TimeDelta> {
        self.hold_period_hours
            .map(|hours| TimeDelta::try_hours(i64::from(hours)).unwrap_or(TimeDelta::MAX))
    }

    /// How long the shared registry waits for a branch lock
    #[must_use]
    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.transfer_lock_timeout_ms)
    }
}
