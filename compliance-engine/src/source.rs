//! ReadingSource trait and implementations.
//!
//! The engine treats the reading store as read-only: it fetches the full
//! history on every scan and reduces it itself. A row that cannot be decoded
//! is logged and dropped; only a failure of the store itself fails a fetch.

use std::collections::BTreeMap;
use std::fmt::Display;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{postgres::PgPoolOptions, PgPool, Row};
use tracing::warn;

use crate::reading::ChemicalReading;
use crate::standards::Parameter;

// ------------------------------------------------------------------ //
//  Trait                                                              //
// ------------------------------------------------------------------ //

#[async_trait]
pub trait ReadingSource: Send + Sync {
    async fn fetch_readings(&self) -> Result<Vec<ChemicalReading>>;
}

// ------------------------------------------------------------------ //
//  StaticReadingSource                                                //
// ------------------------------------------------------------------ //

/// In-memory source, shared by clone. Can be switched into a failing mode to
/// simulate an unavailable store.
#[derive(Debug, Default, Clone)]
pub struct StaticReadingSource {
    readings:    Arc<RwLock<Vec<ChemicalReading>>>,
    unavailable: Arc<AtomicBool>,
    fetches:     Arc<AtomicUsize>,
}

impl StaticReadingSource {
    pub fn new(readings: Vec<ChemicalReading>) -> Self {
        Self {
            readings: Arc::new(RwLock::new(readings)),
            ..Self::default()
        }
    }

    pub fn push(&self, reading: ChemicalReading) {
        self.readings.write().unwrap().push(reading);
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::Release);
    }

    /// Number of fetch attempts so far, failed ones included.
    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::Acquire)
    }
}

#[async_trait]
impl ReadingSource for StaticReadingSource {
    async fn fetch_readings(&self) -> Result<Vec<ChemicalReading>> {
        self.fetches.fetch_add(1, Ordering::AcqRel);
        if self.unavailable.load(Ordering::Acquire) {
            anyhow::bail!("reading store unavailable");
        }
        Ok(self.readings.read().unwrap().clone())
    }
}

// ------------------------------------------------------------------ //
//  JsonFileReadingSource                                              //
// ------------------------------------------------------------------ //

/// Reads a JSON array of readings from disk on every fetch.
#[derive(Debug, Clone)]
pub struct JsonFileReadingSource {
    path: PathBuf,
}

impl JsonFileReadingSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

/// Decode each array element on its own so one bad row only loses itself.
fn decode_rows(bytes: &[u8], origin: &str) -> Result<Vec<ChemicalReading>> {
    let rows: Vec<serde_json::Value> =
        serde_json::from_slice(bytes).with_context(|| format!("{origin} is not a JSON array"))?;

    Ok(rows
        .into_iter()
        .enumerate()
        .filter_map(|(index, row)| match serde_json::from_value::<ChemicalReading>(row) {
            Ok(reading) => Some(reading),
            Err(e) => {
                warn!(source = origin, row = index, error = %e, "skipping undecodable reading");
                None
            }
        })
        .collect())
}

#[async_trait]
impl ReadingSource for JsonFileReadingSource {
    async fn fetch_readings(&self) -> Result<Vec<ChemicalReading>> {
        let bytes = tokio::fs::read(&self.path)
            .await
            .with_context(|| format!("failed to read {}", self.path.display()))?;
        decode_rows(&bytes, &self.path.display().to_string())
    }
}

// ------------------------------------------------------------------ //
//  PgReadingSource (production)                                       //
// ------------------------------------------------------------------ //

/// Reads the `chemical_reading` table, one nullable column per parameter.
/// Parameter columns are cast to `float8` and `tested_at` to `timestamptz`
/// so NUMERIC/REAL and zone-less TIMESTAMP columns decode too.
pub struct PgReadingSource {
    pool: PgPool,
}

impl PgReadingSource {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await
            .context("Failed to connect to PostgreSQL")?;
        Ok(Self::new(pool))
    }
}

/// Unwrap a column decode result, logging instead of silently dropping a
/// value the store holds but we could not read.
fn column_value<T, E: Display>(
    facility_id: &str,
    column: &str,
    decoded: std::result::Result<Option<T>, E>,
) -> Option<T> {
    match decoded {
        Ok(v) => v,
        Err(e) => {
            warn!(facility_id, column, error = %e, "column decode failed; value ignored");
            None
        }
    }
}

#[async_trait]
impl ReadingSource for PgReadingSource {
    async fn fetch_readings(&self) -> Result<Vec<ChemicalReading>> {
        let rows = sqlx::query(
            r#"
            SELECT facility_id::text       AS facility_id,
                   facility_name::text     AS facility_name,
                   tested_at::timestamptz  AS tested_at,
                   technician_id::text     AS technician_id,
                   free_chlorine::float8    AS free_chlorine,
                   total_chlorine::float8   AS total_chlorine,
                   ph::float8               AS ph,
                   alkalinity::float8       AS alkalinity,
                   cyanuric_acid::float8    AS cyanuric_acid,
                   calcium_hardness::float8 AS calcium_hardness,
                   temperature::float8      AS temperature
            FROM chemical_reading
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .context("chemical_reading SELECT failed")?;

        Ok(rows
            .iter()
            .map(|r| {
                let facility_id =
                    column_value("", "facility_id", r.try_get::<Option<String>, _>("facility_id"))
                        .unwrap_or_default();
                let fid = facility_id.as_str();

                let mut values = BTreeMap::new();
                for p in Parameter::ALL {
                    if let Some(v) = column_value(fid, p.key(), r.try_get::<Option<f64>, _>(p.key())) {
                        values.insert(p.key().to_string(), v);
                    }
                }

                ChemicalReading {
                    facility_name: column_value(fid, "facility_name", r.try_get("facility_name"))
                        .unwrap_or_default(),
                    timestamp: column_value::<DateTime<Utc>, _>(fid, "tested_at", r.try_get("tested_at")),
                    technician_id: column_value(fid, "technician_id", r.try_get("technician_id"))
                        .unwrap_or_default(),
                    values,
                    facility_id,
                }
            })
            .collect())
    }
}
