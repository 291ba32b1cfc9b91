//! Data models for kpiboard

pub mod kpi;
pub mod record;

pub use kpi::Kpi;
pub use record::{records_from_json, Dataset, FieldValue, Record};
