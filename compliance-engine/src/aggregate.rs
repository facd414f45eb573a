//! Latest-reading-per-facility reduction.

use std::collections::BTreeMap;

use tracing::warn;

use crate::reading::ChemicalReading;

/// Pick the most recent reading for every facility.
///
/// Malformed readings are logged and skipped. When two readings for the same
/// facility carry an identical timestamp, the one later in `readings` wins.
pub fn latest_per_facility(readings: &[ChemicalReading]) -> BTreeMap<String, ChemicalReading> {
    let mut latest: BTreeMap<String, ChemicalReading> = BTreeMap::new();

    for reading in readings {
        let timestamp = match reading.validate() {
            Ok(ts) => ts,
            Err(e) => {
                warn!(facility_id = %reading.facility_id, error = %e, "skipping malformed reading");
                continue;
            }
        };

        let replace = match latest.get(&reading.facility_id) {
            Some(current) => current.timestamp.map_or(true, |cur| timestamp >= cur),
            None => true,
        };
        if replace {
            latest.insert(reading.facility_id.clone(), reading.clone());
        }
    }

    latest
}
