//! Classification of a single chemical value against its standard.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::reading::ChemicalReading;
use crate::standards::{ChemicalStandard, Parameter, StandardsCatalog, FREE_CHLORINE_CLOSURE_PPM};

// ------------------------------------------------------------------ //
//  Types                                                              //
// ------------------------------------------------------------------ //

/// Graded safety classification, ordered from safest to worst.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    Good,
    Warning,
    Critical,
    Emergency,
}

impl Status {
    pub fn as_str(self) -> &'static str {
        match self {
            Status::Good      => "good",
            Status::Warning   => "warning",
            Status::Critical  => "critical",
            Status::Emergency => "emergency",
        }
    }

    pub fn tone(self) -> Tone {
        match self {
            Status::Good                         => Tone::Success,
            Status::Warning                      => Tone::Warning,
            Status::Critical | Status::Emergency => Tone::Danger,
        }
    }
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Semantic presentation tag carried alongside a status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tone {
    Success,
    Warning,
    Danger,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationResult {
    pub parameter:      Parameter,
    pub status:         Status,
    pub tone:           Tone,
    pub message:        String,
    /// Present whenever `status` is not [`Status::Good`].
    pub recommendation: Option<String>,
    pub value:          f64,
    pub unit:           String,
}

#[derive(Debug, Error, PartialEq)]
pub enum ValidationError {
    #[error("unknown parameter {0:?}")]
    UnknownParameter(String),
    #[error("non-finite value {value} for {parameter}")]
    NonFiniteValue { parameter: Parameter, value: f64 },
}

// ------------------------------------------------------------------ //
//  Engine                                                             //
// ------------------------------------------------------------------ //

/// Classifies values against a [`StandardsCatalog`].
#[derive(Debug, Clone)]
pub struct ValidationEngine {
    catalog: StandardsCatalog,
}

impl Default for ValidationEngine {
    fn default() -> Self {
        Self::new(StandardsCatalog::mahc())
    }
}

impl ValidationEngine {
    pub fn new(catalog: StandardsCatalog) -> Self {
        Self { catalog }
    }

    /// Classify `value` for the parameter named by `key`.
    pub fn classify(&self, value: f64, key: &str) -> Result<ValidationResult, ValidationError> {
        let parameter =
            Parameter::from_key(key).ok_or_else(|| ValidationError::UnknownParameter(key.to_string()))?;
        self.classify_parameter(value, parameter)
    }

    pub fn classify_parameter(
        &self,
        value: f64,
        parameter: Parameter,
    ) -> Result<ValidationResult, ValidationError> {
        let standard = self.catalog.lookup(parameter)?;
        if !value.is_finite() {
            return Err(ValidationError::NonFiniteValue { parameter, value });
        }

        let verdict = match parameter {
            Parameter::FreeChlorine => free_chlorine(value, standard),
            _ => three_tier(parameter, value, standard),
        };

        Ok(ValidationResult {
            parameter,
            status: verdict.status,
            tone: verdict.status.tone(),
            message: verdict.message,
            recommendation: verdict.recommendation,
            value,
            unit: standard.unit.clone(),
        })
    }

    /// Classify every value on a reading. Keys that fail to classify are
    /// returned alongside their error rather than aborting the reading.
    pub fn classify_reading(
        &self,
        reading: &ChemicalReading,
    ) -> Vec<(String, Result<ValidationResult, ValidationError>)> {
        reading
            .values
            .iter()
            .map(|(key, value)| (key.clone(), self.classify(*value, key)))
            .collect()
    }
}

/// Worst status across a set of results; `Good` when empty.
pub fn facility_status<'a>(results: impl IntoIterator<Item = &'a ValidationResult>) -> Status {
    results
        .into_iter()
        .map(|r| r.status)
        .max()
        .unwrap_or(Status::Good)
}

// ------------------------------------------------------------------ //
//  Rules                                                              //
// ------------------------------------------------------------------ //

struct Verdict {
    status:         Status,
    message:        String,
    recommendation: Option<String>,
}

impl Verdict {
    fn good(message: String) -> Self {
        Self { status: Status::Good, message, recommendation: None }
    }

    fn flagged(status: Status, message: String, recommendation: impl Into<String>) -> Self {
        Self { status, message, recommendation: Some(recommendation.into()) }
    }
}

fn free_chlorine(value: f64, s: &ChemicalStandard) -> Verdict {
    let unit = &s.unit;
    if value < FREE_CHLORINE_CLOSURE_PPM {
        return Verdict::flagged(
            Status::Emergency,
            format!(
                "Free chlorine {value} {unit} is below {FREE_CHLORINE_CLOSURE_PPM} {unit}: pool closure required"
            ),
            format!(
                "Close the pool immediately and superchlorinate until free chlorine reaches {} {unit}",
                s.min
            ),
        );
    }
    if value < s.min {
        return Verdict::flagged(
            Status::Critical,
            format!("Free chlorine {value} {unit} is below safe range ({} {unit} minimum)", s.min),
            format!("Add chlorine to bring levels into {}-{} {unit}", s.ideal.min, s.ideal.max),
        );
    }
    if value > s.max {
        return Verdict::flagged(
            Status::Warning,
            format!("Free chlorine {value} {unit} is above {} {unit}: reduce dosing", s.max),
            "Reduce chlorine dosing and retest before bathers enter the water",
        );
    }
    if value >= s.ideal.min && value <= s.ideal.max {
        return Verdict::good(format!("Free chlorine {value} {unit} is within ideal range"));
    }
    Verdict::flagged(
        Status::Warning,
        format!("Free chlorine {value} {unit} is above ideal range"),
        format!("Reduce chlorine feed toward {}-{} {unit}", s.ideal.min, s.ideal.max),
    )
}

fn three_tier(parameter: Parameter, value: f64, s: &ChemicalStandard) -> Verdict {
    let label = parameter.label();
    let unit = &s.unit;
    let (raise, lower) = remedies(parameter);

    if value < s.min {
        return Verdict::flagged(
            Status::Critical,
            format!("{label} {value} {unit} is below safe range ({} {unit} minimum)", s.min),
            raise,
        );
    }
    if value > s.max {
        return Verdict::flagged(
            Status::Critical,
            format!("{label} {value} {unit} is above safe range ({} {unit} maximum)", s.max),
            lower,
        );
    }
    if value < s.ideal.min {
        return Verdict::flagged(
            Status::Warning,
            format!("{label} {value} {unit} is below ideal range ({}-{} {unit})", s.ideal.min, s.ideal.max),
            raise,
        );
    }
    if value > s.ideal.max {
        return Verdict::flagged(
            Status::Warning,
            format!("{label} {value} {unit} is above ideal range ({}-{} {unit})", s.ideal.min, s.ideal.max),
            lower,
        );
    }
    Verdict::good(format!("{label} {value} {unit} is within ideal range"))
}

/// (too low, too high) remedial actions.
fn remedies(parameter: Parameter) -> (&'static str, &'static str) {
    match parameter {
        Parameter::FreeChlorine | Parameter::TotalChlorine => (
            "Add chlorine and retest within one hour",
            "Reduce chlorine dosing and shock to break down combined chlorine",
        ),
        Parameter::Ph => (
            "Add sodium carbonate (soda ash) to raise pH",
            "Add muriatic acid or sodium bisulfate to lower pH",
        ),
        Parameter::Alkalinity => (
            "Add sodium bicarbonate to raise alkalinity",
            "Add acid in small doses to lower alkalinity",
        ),
        Parameter::CyanuricAcid => (
            "Add stabilizer (cyanuric acid)",
            "Partially drain and refill to dilute cyanuric acid",
        ),
        Parameter::CalciumHardness => (
            "Add calcium chloride to raise hardness",
            "Partially drain and refill with softer water",
        ),
        Parameter::Temperature => (
            "Check heater operation",
            "Lower the heater setpoint and keep bathers out until the water cools",
        ),
    }
}

// ------------------------------------------------------------------ //
//  Tests                                                              //
// ------------------------------------------------------------------ //
