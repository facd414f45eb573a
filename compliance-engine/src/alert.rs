//! Alert records surfaced to operators.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::alert_id;
use crate::standards::Parameter;
use crate::validation::Status;

/// Severity of an actionable alert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertSeverity {
    Critical,
    Emergency,
}

impl AlertSeverity {
    pub fn as_str(self) -> &'static str {
        match self {
            AlertSeverity::Critical  => "critical",
            AlertSeverity::Emergency => "emergency",
        }
    }

    /// Map a validation status to an alert severity; `None` for statuses that
    /// do not raise alerts.
    pub fn from_status(status: Status) -> Option<Self> {
        match status {
            Status::Critical  => Some(AlertSeverity::Critical),
            Status::Emergency => Some(AlertSeverity::Emergency),
            Status::Good | Status::Warning => None,
        }
    }
}

impl std::fmt::Display for AlertSeverity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// What raised an alert.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlertTrigger {
    Chemical(Parameter),
    Stale,
}

impl AlertTrigger {
    pub fn key(self) -> &'static str {
        match self {
            AlertTrigger::Chemical(p) => p.key(),
            AlertTrigger::Stale       => "stale",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    pub id:            String,
    pub facility_id:   String,
    pub facility_name: String,
    pub severity:      AlertSeverity,
    pub message:       String,
    /// Timestamp of the reading that raised the alert.
    pub timestamp:     DateTime<Utc>,
    pub chemical:      Option<Parameter>,
    pub value:         Option<f64>,
    pub acknowledged:  bool,
}

impl Alert {
    pub fn new(
        facility_id: &str,
        facility_name: &str,
        trigger: AlertTrigger,
        severity: AlertSeverity,
        message: String,
        timestamp: DateTime<Utc>,
        value: Option<f64>,
    ) -> Self {
        let chemical = match trigger {
            AlertTrigger::Chemical(p) => Some(p),
            AlertTrigger::Stale       => None,
        };
        Self {
            id: alert_id::compute(facility_id, trigger.key(), severity.as_str()),
            facility_id: facility_id.to_string(),
            facility_name: facility_name.to_string(),
            severity,
            message,
            timestamp,
            chemical,
            value,
            acknowledged: false,
        }
    }
}
