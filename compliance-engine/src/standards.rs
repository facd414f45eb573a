//! MAHC chemical standards catalog.

use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::validation::ValidationError;

/// Free chlorine below this level requires closing the pool.
pub const FREE_CHLORINE_CLOSURE_PPM: f64 = 0.5;

// ------------------------------------------------------------------ //
//  Types                                                              //
// ------------------------------------------------------------------ //

/// A chemical parameter tracked on a pool test.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Parameter {
    FreeChlorine,
    TotalChlorine,
    Ph,
    Alkalinity,
    CyanuricAcid,
    CalciumHardness,
    Temperature,
}

impl Parameter {
    pub const ALL: [Parameter; 7] = [
        Parameter::FreeChlorine,
        Parameter::TotalChlorine,
        Parameter::Ph,
        Parameter::Alkalinity,
        Parameter::CyanuricAcid,
        Parameter::CalciumHardness,
        Parameter::Temperature,
    ];

    /// Key used in reading payloads and database columns.
    pub fn key(self) -> &'static str {
        match self {
            Parameter::FreeChlorine    => "free_chlorine",
            Parameter::TotalChlorine   => "total_chlorine",
            Parameter::Ph              => "ph",
            Parameter::Alkalinity      => "alkalinity",
            Parameter::CyanuricAcid    => "cyanuric_acid",
            Parameter::CalciumHardness => "calcium_hardness",
            Parameter::Temperature     => "temperature",
        }
    }

    /// Human-readable label for alert messages.
    pub fn label(self) -> &'static str {
        match self {
            Parameter::FreeChlorine    => "Free chlorine",
            Parameter::TotalChlorine   => "Total chlorine",
            Parameter::Ph              => "pH",
            Parameter::Alkalinity      => "Total alkalinity",
            Parameter::CyanuricAcid    => "Cyanuric acid",
            Parameter::CalciumHardness => "Calcium hardness",
            Parameter::Temperature     => "Water temperature",
        }
    }

    pub fn from_key(key: &str) -> Option<Self> {
        Parameter::ALL.into_iter().find(|p| p.key() == key)
    }
}

impl std::fmt::Display for Parameter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.key())
    }
}

/// Inclusive sub-range considered ideal.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct IdealRange {
    pub min: f64,
    pub max: f64,
}

/// Acceptable and ideal bounds for one parameter.
///
/// `min`/`max` are the critical boundary; anything strictly outside them is
/// a violation. `ideal` is the band classified as good.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChemicalStandard {
    pub min:   f64,
    pub max:   f64,
    pub ideal: IdealRange,
    pub unit:  String,
}

impl ChemicalStandard {
    fn new(min: f64, max: f64, ideal_min: f64, ideal_max: f64, unit: &str) -> Self {
        Self {
            min,
            max,
            ideal: IdealRange { min: ideal_min, max: ideal_max },
            unit: unit.to_string(),
        }
    }
}

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("failed to read standards file: {0}")]
    Io(#[from] std::io::Error),
    #[error("standards JSON decode error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("unknown parameter {0:?} in standards file")]
    UnknownParameter(String),
    #[error("invalid bounds for {parameter}: {reason}")]
    InvalidBounds { parameter: Parameter, reason: &'static str },
}

// ------------------------------------------------------------------ //
//  Catalog                                                            //
// ------------------------------------------------------------------ //

/// Read-only lookup table of chemical standards.
#[derive(Debug, Clone, Default)]
pub struct StandardsCatalog {
    entries: HashMap<Parameter, ChemicalStandard>,
}

impl StandardsCatalog {
    pub fn empty() -> Self {
        Self::default()
    }

    /// The compiled-in MAHC table.
    pub fn mahc() -> Self {
        Self::empty()
            .with_standard(Parameter::FreeChlorine,    ChemicalStandard::new(1.0, 5.0, 1.0, 3.0, "ppm"))
            .with_standard(Parameter::TotalChlorine,   ChemicalStandard::new(1.0, 6.0, 1.0, 3.5, "ppm"))
            .with_standard(Parameter::Ph,              ChemicalStandard::new(7.0, 8.0, 7.2, 7.6, "pH"))
            .with_standard(Parameter::Alkalinity,      ChemicalStandard::new(60.0, 180.0, 80.0, 120.0, "ppm"))
            .with_standard(Parameter::CyanuricAcid,    ChemicalStandard::new(0.0, 90.0, 30.0, 50.0, "ppm"))
            .with_standard(Parameter::CalciumHardness, ChemicalStandard::new(150.0, 1000.0, 200.0, 400.0, "ppm"))
            .with_standard(Parameter::Temperature,     ChemicalStandard::new(60.0, 104.0, 78.0, 84.0, "°F"))
    }

    pub fn with_standard(mut self, parameter: Parameter, standard: ChemicalStandard) -> Self {
        self.entries.insert(parameter, standard);
        self
    }

    /// Start from the MAHC table and replace entries found in a JSON object
    /// keyed by parameter key.
    pub fn from_json(json: &str) -> Result<Self, CatalogError> {
        let overrides: HashMap<String, ChemicalStandard> = serde_json::from_str(json)?;
        let mut catalog = Self::mahc();
        for (key, standard) in overrides {
            let parameter =
                Parameter::from_key(&key).ok_or_else(|| CatalogError::UnknownParameter(key.clone()))?;
            check_bounds(parameter, &standard)?;
            catalog.entries.insert(parameter, standard);
        }
        Ok(catalog)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, CatalogError> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json(&json)
    }

    pub fn lookup(&self, parameter: Parameter) -> Result<&ChemicalStandard, ValidationError> {
        self.entries
            .get(&parameter)
            .ok_or_else(|| ValidationError::UnknownParameter(parameter.key().to_string()))
    }

    pub fn contains(&self, parameter: Parameter) -> bool {
        self.entries.contains_key(&parameter)
    }
}

fn check_bounds(parameter: Parameter, s: &ChemicalStandard) -> Result<(), CatalogError> {
    if s.min > s.max {
        return Err(CatalogError::InvalidBounds { parameter, reason: "min exceeds max" });
    }
    if s.ideal.min > s.ideal.max {
        return Err(CatalogError::InvalidBounds { parameter, reason: "ideal.min exceeds ideal.max" });
    }
    if s.ideal.min < s.min || s.ideal.max > s.max {
        return Err(CatalogError::InvalidBounds { parameter, reason: "ideal range outside min/max" });
    }
    Ok(())
}

// ------------------------------------------------------------------ //
//  Tests                                                              //
// ------------------------------------------------------------------ //
