//! Record and dataset models
//!
//! A record is a flat field-to-scalar map; all records in one dataset share a
//! schema. Payloads arrive as JSON arrays of objects or as objects keyed by id.

use crate::error::CoreError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Scalar value carried by a record field
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Number(f64),
    Text(String),
    Null,
}

impl FieldValue {
    pub fn as_number(&self) -> Option<f64> {
        match self {
            FieldValue::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            FieldValue::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Convert a JSON scalar. Booleans become text ("true"/"false") so they
    /// stay usable as categorical values; nested arrays/objects are dropped.
    fn from_json(value: &serde_json::Value) -> Option<FieldValue> {
        match value {
            serde_json::Value::Number(n) => n.as_f64().map(FieldValue::Number),
            serde_json::Value::String(s) => Some(FieldValue::Text(s.clone())),
            serde_json::Value::Bool(b) => Some(FieldValue::Text(b.to_string())),
            serde_json::Value::Null => Some(FieldValue::Null),
            _ => None,
        }
    }
}

impl From<f64> for FieldValue {
    fn from(n: f64) -> Self {
        FieldValue::Number(n)
    }
}

impl From<&str> for FieldValue {
    fn from(s: &str) -> Self {
        FieldValue::Text(s.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(s: String) -> Self {
        FieldValue::Text(s)
    }
}

/// One row of a dataset
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Record {
    pub fields: HashMap<String, FieldValue>,
}

impl Record {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a record from a JSON object, keeping every scalar field and
    /// silently dropping nested structures (missing-field policies downstream
    /// handle the gaps).
    pub fn from_json_object(object: &serde_json::Map<String, serde_json::Value>) -> Self {
        let fields = object
            .iter()
            .filter_map(|(k, v)| FieldValue::from_json(v).map(|fv| (k.clone(), fv)))
            .collect();
        Self { fields }
    }

    /// Numeric metric accessor: a missing or non-numeric field reads as 0
    pub fn number(&self, field: &str) -> f64 {
        self.try_number(field).unwrap_or(0.0)
    }

    /// Numeric accessor without the zero fallback
    pub fn try_number(&self, field: &str) -> Option<f64> {
        self.fields.get(field).and_then(FieldValue::as_number)
    }

    /// Text accessor
    pub fn text(&self, field: &str) -> Option<&str> {
        self.fields.get(field).and_then(FieldValue::as_text)
    }

    /// Categorical key accessor used for filtering and grouping: text values
    /// are taken verbatim, numbers are rendered (integer years stay "2024",
    /// not "2024.0"), null/missing yields None.
    pub fn key(&self, field: &str) -> Option<String> {
        match self.fields.get(field)? {
            FieldValue::Text(s) => Some(s.clone()),
            FieldValue::Number(n) => {
                if n.fract() == 0.0 && n.abs() < 1e15 {
                    Some(format!("{}", *n as i64))
                } else {
                    Some(n.to_string())
                }
            }
            FieldValue::Null => None,
        }
    }

    pub fn has_field(&self, field: &str) -> bool {
        matches!(
            self.fields.get(field),
            Some(FieldValue::Number(_)) | Some(FieldValue::Text(_))
        )
    }

    /// Insert or replace a field (fixtures and synthesized rows)
    pub fn set(&mut self, field: impl Into<String>, value: impl Into<FieldValue>) {
        self.fields.insert(field.into(), value.into());
    }

    /// Builder-style variant of [`Record::set`]
    pub fn with(mut self, field: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        self.set(field, value);
        self
    }
}

/// An ordered sequence of records sharing a schema, owned by the record store
///
/// Populated once per fetch and replaced wholesale by the next fetch; never
/// mutated in place.
#[derive(Debug, Clone, Serialize)]
pub struct Dataset {
    pub name: String,
    pub records: Vec<Record>,
}

impl Dataset {
    pub fn new(name: impl Into<String>, records: Vec<Record>) -> Self {
        Self {
            name: name.into(),
            records,
        }
    }

    pub fn empty(name: impl Into<String>) -> Self {
        Self::new(name, Vec::new())
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Check that every record carries the schema's required fields.
    /// Returns the first offending record for the store's load-time guard.
    pub fn validate_required(&self, required: &[String]) -> Result<(), CoreError> {
        for (index, record) in self.records.iter().enumerate() {
            for field in required {
                if !record.has_field(field) {
                    return Err(CoreError::Payload {
                        dataset: self.name.clone(),
                        message: format!("record {index} is missing required field '{field}'"),
                    });
                }
            }
        }
        Ok(())
    }
}

/// Decode a fetch payload into records.
///
/// Accepts the two shapes the backend serves: a JSON array of record objects,
/// or an object whose values are record objects (keyed by id; key order is
/// deterministic). A JSON `null` decodes as zero records.
pub fn records_from_json(
    dataset: &str,
    payload: &serde_json::Value,
) -> Result<Vec<Record>, CoreError> {
    match payload {
        serde_json::Value::Array(items) => {
            let mut records = Vec::with_capacity(items.len());
            for (index, item) in items.iter().enumerate() {
                let object = item.as_object().ok_or_else(|| CoreError::Payload {
                    dataset: dataset.to_string(),
                    message: format!("element {index} is not an object"),
                })?;
                records.push(Record::from_json_object(object));
            }
            Ok(records)
        }
        serde_json::Value::Object(map) => {
            let mut records = Vec::with_capacity(map.len());
            for (key, item) in map {
                let object = item.as_object().ok_or_else(|| CoreError::Payload {
                    dataset: dataset.to_string(),
                    message: format!("value under key '{key}' is not an object"),
                })?;
                records.push(Record::from_json_object(object));
            }
            Ok(records)
        }
        serde_json::Value::Null => Ok(Vec::new()),
        other => Err(CoreError::Payload {
            dataset: dataset.to_string(),
            message: format!("expected array or keyed object, got {other}"),
        }),
    }
}
