//! Chemical test readings as supplied by the reading store.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// One recorded pool test.
///
/// `facility_id` and `timestamp` are required for a reading to take part in
/// evaluation; they are modelled leniently here so that a bad row from the
/// store can be reported and skipped instead of failing the whole fetch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChemicalReading {
    #[serde(default)]
    pub facility_id: String,
    #[serde(default)]
    pub facility_name: String,
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(default)]
    pub technician_id: String,
    /// Parameter key → measured value.
    #[serde(default)]
    pub values: BTreeMap<String, f64>,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum MalformedReading {
    #[error("facility_id is empty")]
    MissingFacilityId,
    #[error("timestamp is missing")]
    MissingTimestamp,
}

impl ChemicalReading {
    pub fn new(
        facility_id: impl Into<String>,
        facility_name: impl Into<String>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            facility_id: facility_id.into(),
            facility_name: facility_name.into(),
            timestamp: Some(timestamp),
            technician_id: String::new(),
            values: BTreeMap::new(),
        }
    }

    pub fn with_technician(mut self, technician_id: impl Into<String>) -> Self {
        self.technician_id = technician_id.into();
        self
    }

    pub fn with_value(mut self, key: &str, value: f64) -> Self {
        self.values.insert(key.to_string(), value);
        self
    }

    /// Check required fields, returning the reading's timestamp on success.
    pub fn validate(&self) -> Result<DateTime<Utc>, MalformedReading> {
        if self.facility_id.trim().is_empty() {
            return Err(MalformedReading::MissingFacilityId);
        }
        self.timestamp.ok_or(MalformedReading::MissingTimestamp)
    }

    /// Display name, falling back to the id when the store has none.
    pub fn display_name(&self) -> &str {
        if self.facility_name.trim().is_empty() {
            &self.facility_id
        } else {
            &self.facility_name
        }
    }
}
