//! Stable alert ID generation.
//!
//! The alert ID is a hex-encoded SHA-256 hash of the facility, the condition
//! that raised the alert and its severity. It carries no time component, so a
//! violation that persists across scans keeps the same ID.

use sha2::{Digest, Sha256};

/// Compute a stable alert ID.
pub fn compute(facility_id: &str, trigger: &str, severity: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(facility_id.as_bytes());
    hasher.update(b"\0");
    hasher.update(trigger.as_bytes());
    hasher.update(b"\0");
    hasher.update(severity.as_bytes());
    hex::encode(hasher.finalize())
}
