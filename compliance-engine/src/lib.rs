//! Pool chemical-safety compliance engine.
//!
//! Classifies chemical readings against MAHC ranges, turns violations and
//! stale facilities into de-duplicated alerts, and re-evaluates on a fixed
//! schedule.

pub mod aggregate;
pub mod alert;
pub mod alert_id;
pub mod config;
pub mod generator;
pub mod monitor;
pub mod notify;
pub mod reading;
pub mod source;
pub mod standards;
pub mod store;
pub mod validation;

pub use alert::{Alert, AlertSeverity};
pub use monitor::{ComplianceMonitor, EngineError, ScanOutcome, ScanState, SchedulerHandle, Summary};
pub use reading::ChemicalReading;
pub use standards::{Parameter, StandardsCatalog};
pub use validation::{Status, ValidationEngine, ValidationResult};
