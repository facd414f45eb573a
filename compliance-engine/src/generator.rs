//! Candidate alert generation from the latest reading of every facility.

use std::collections::HashSet;

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, warn};

use crate::aggregate::latest_per_facility;
use crate::alert::{Alert, AlertSeverity, AlertTrigger};
use crate::reading::ChemicalReading;
use crate::validation::{ValidationEngine, ValidationError};

/// Default compliance window before a facility is considered stale.
pub const DEFAULT_STALE_AFTER_DAYS: i64 = 14;

#[derive(Debug, Clone)]
pub struct AlertGenerator {
    engine:      ValidationEngine,
    stale_after: Duration,
}

impl Default for AlertGenerator {
    fn default() -> Self {
        Self::new(ValidationEngine::default())
    }
}

impl AlertGenerator {
    pub fn new(engine: ValidationEngine) -> Self {
        Self {
            engine,
            stale_after: Duration::days(DEFAULT_STALE_AFTER_DAYS),
        }
    }

    pub fn with_stale_after(mut self, stale_after: Duration) -> Self {
        self.stale_after = stale_after;
        self
    }

    /// Evaluate `readings` as of `now`, dropping candidates already in
    /// `dismissed`.
    pub fn scan(
        &self,
        readings: &[ChemicalReading],
        dismissed: &HashSet<String>,
        now: DateTime<Utc>,
    ) -> Vec<Alert> {
        let mut candidates = Vec::new();

        for reading in latest_per_facility(readings).values() {
            self.chemical_alerts(reading, &mut candidates);
            if let Some(alert) = self.stale_alert(reading, now) {
                candidates.push(alert);
            }
        }

        candidates.retain(|a| !dismissed.contains(&a.id));
        candidates
    }

    fn chemical_alerts(&self, reading: &ChemicalReading, out: &mut Vec<Alert>) {
        let Some(timestamp) = reading.timestamp else {
            return;
        };

        for (key, value) in &reading.values {
            let result = match self.engine.classify(*value, key) {
                Ok(r) => r,
                Err(e @ ValidationError::UnknownParameter(_)) => {
                    debug!(facility_id = %reading.facility_id, error = %e, "ignoring untracked parameter");
                    continue;
                }
                Err(e) => {
                    warn!(facility_id = %reading.facility_id, error = %e, "skipping parameter");
                    continue;
                }
            };

            let Some(severity) = AlertSeverity::from_status(result.status) else {
                continue;
            };

            let message = match &result.recommendation {
                Some(rec) => format!("{}. {rec}", result.message),
                None => result.message.clone(),
            };
            out.push(Alert::new(
                &reading.facility_id,
                reading.display_name(),
                AlertTrigger::Chemical(result.parameter),
                severity,
                message,
                timestamp,
                Some(result.value),
            ));
        }
    }

    fn stale_alert(&self, reading: &ChemicalReading, now: DateTime<Utc>) -> Option<Alert> {
        let timestamp = reading.timestamp?;
        let age = now - timestamp;
        if age <= self.stale_after {
            return None;
        }

        let days = age.num_days();
        Some(Alert::new(
            &reading.facility_id,
            reading.display_name(),
            AlertTrigger::Stale,
            AlertSeverity::Critical,
            format!(
                "No chemical test recorded for {days} days. Compliance risk: testing is required at least every {} days",
                self.stale_after.num_days()
            ),
            timestamp,
            None,
        ))
    }
}
