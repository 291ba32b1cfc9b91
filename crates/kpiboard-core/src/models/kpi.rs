//! KPI card model

use serde::{Deserialize, Serialize};

/// Headline metric paired with its prior-period value and percent change
///
/// Regenerated on every selection or dataset change; `percent_change` is 0
/// when the previous value is 0 (explicit policy, not an error). `estimated`
/// marks synthetic ratio-split metrics so no surface presents a proxy as a
/// measured value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Kpi {
    pub label: String,
    pub value: f64,
    pub previous_value: f64,
    pub percent_change: f64,
    #[serde(default)]
    pub estimated: bool,
}

impl Kpi {
    pub fn is_estimate(&self) -> bool {
        self.estimated
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kpi_serializes_camel_case() {
        let kpi = Kpi {
            label: "Revenue".to_string(),
            value: 150.0,
            previous_value: 100.0,
            percent_change: 50.0,
            estimated: false,
        };

        let value = serde_json::to_value(&kpi).unwrap();
        assert!(value.get("previousValue").is_some());
        assert!(value.get("percentChange").is_some());
        assert!(value.get("previous_value").is_none());
    }
}
