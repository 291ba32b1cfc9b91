//! Page specification and engine configuration
//!
//! A dashboard page is data, not code: a `PageSpec` names the datasets to
//! fetch, binds dimensions to record fields and query parameters, and lists
//! the metrics, KPI cards, and drill-down for that page. One generic engine
//! instantiates per spec.

use crate::aggregate::{AggregateOp, MetricSpec};
use crate::error::CoreError;
use crate::kpi::{KpiKind, KpiSpec};
use crate::selection::Dimension;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

/// One logical dataset a page fetches
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DatasetSpec {
    /// Logical name used as the record-store key
    pub name: String,
    /// Backend GET endpoint, relative to the configured base URL
    pub endpoint: String,
    /// Fields every record must carry; a violating payload loads as empty
    #[serde(default)]
    pub required_fields: Vec<String>,
    /// The primary dataset feeds the filter/aggregate/KPI pipeline.
    /// When no dataset is marked, the first one is primary.
    #[serde(default)]
    pub primary: bool,
    /// Whether selection changes re-fetch this dataset with filter
    /// parameters (pre-computed auxiliary views usually opt out)
    #[serde(default = "default_true")]
    pub selection_scoped: bool,
}

/// Binding of a discrete dimension to a record field and a query parameter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DimensionBinding {
    pub dimension: Dimension,
    /// Record field carrying this dimension's value
    pub field: String,
    /// Query-parameter name on scoped fetches (values comma-joined)
    pub param: String,
}

/// Drill-down wiring for the page's drillable chart
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DrillSpec {
    /// The clicked axis (its group key becomes the scoped-fetch key)
    pub dimension: Dimension,
    /// Query-parameter name carrying the clicked key (`month`, `category`)
    pub param: String,
    /// Scoped-fetch endpoint; defaults to the primary dataset's endpoint
    #[serde(default)]
    pub endpoint: Option<String>,
    /// How the expanded sub-view is grouped
    pub group_by: Dimension,
    /// Metrics of the sub-view; empty means the page's own metrics
    #[serde(default)]
    pub metrics: Vec<MetricSpec>,
}

/// Declarative description of one dashboard page
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageSpec {
    pub name: String,
    pub datasets: Vec<DatasetSpec>,
    pub dimensions: Vec<DimensionBinding>,
    pub group_by: Dimension,
    /// Secondary grouping dimension for per-series chart data
    #[serde(default)]
    pub series_by: Option<Dimension>,
    pub metrics: Vec<MetricSpec>,
    #[serde(default)]
    pub kpis: Vec<KpiSpec>,
    #[serde(default)]
    pub drill: Option<DrillSpec>,
}

impl PageSpec {
    /// Parse and validate a page spec from a JSON string
    pub fn from_json_str(json: &str) -> Result<Self, CoreError> {
        let spec: PageSpec =
            serde_json::from_str(json).map_err(|e| CoreError::InvalidPageSpec {
                message: e.to_string(),
            })?;
        spec.validate()?;
        Ok(spec)
    }

    /// Load and validate a page spec from a JSON file
    pub fn load(path: &Path) -> Result<Self, CoreError> {
        let content = std::fs::read_to_string(path).map_err(|e| CoreError::SpecRead {
            path: path.to_path_buf(),
            source: e,
        })?;
        let spec: PageSpec =
            serde_json::from_str(&content).map_err(|e| CoreError::SpecParse {
                path: path.to_path_buf(),
                message: e.to_string(),
                source: e,
            })?;
        spec.validate()?;
        Ok(spec)
    }

    /// Structural validation; every engine entry point assumes a valid spec
    pub fn validate(&self) -> Result<(), CoreError> {
        if self.name.trim().is_empty() {
            return Err(invalid("page name is empty"));
        }
        if self.datasets.is_empty() {
            return Err(invalid(format!("page '{}' declares no datasets", self.name)));
        }

        let mut names = HashSet::new();
        for dataset in &self.datasets {
            if dataset.name.trim().is_empty() {
                return Err(invalid("dataset name is empty"));
            }
            if dataset.endpoint.trim().is_empty() {
                return Err(invalid(format!("dataset '{}' has no endpoint", dataset.name)));
            }
            if !names.insert(dataset.name.as_str()) {
                return Err(invalid(format!("duplicate dataset name '{}'", dataset.name)));
            }
        }
        if self.datasets.iter().filter(|d| d.primary).count() > 1 {
            return Err(invalid("more than one dataset is marked primary"));
        }

        let mut bound = HashSet::new();
        for binding in &self.dimensions {
            if binding.field.trim().is_empty() || binding.param.trim().is_empty() {
                return Err(invalid(format!(
                    "binding for dimension '{}' needs a field and a param",
                    binding.dimension
                )));
            }
            if !bound.insert(binding.dimension) {
                return Err(invalid(format!(
                    "dimension '{}' is bound twice",
                    binding.dimension
                )));
            }
        }

        if !bound.contains(&self.group_by) {
            return Err(invalid(format!(
                "groupBy dimension '{}' is not bound",
                self.group_by
            )));
        }
        if let Some(series) = self.series_by {
            if !bound.contains(&series) {
                return Err(invalid(format!("seriesBy dimension '{series}' is not bound")));
            }
            if series == self.group_by {
                return Err(invalid("seriesBy must differ from groupBy"));
            }
        }

        if self.metrics.is_empty() {
            return Err(invalid(format!("page '{}' declares no metrics", self.name)));
        }
        validate_metrics(&self.metrics)?;

        for kpi in &self.kpis {
            match &kpi.kind {
                KpiKind::PerUnit { denominator_field } if denominator_field.trim().is_empty() => {
                    return Err(invalid(format!(
                        "KPI '{}' has an empty denominator field",
                        kpi.label
                    )));
                }
                KpiKind::EstimatedShare { ratio } if !(*ratio > 0.0 && *ratio <= 1.0) => {
                    return Err(invalid(format!(
                        "KPI '{}' has ratio {} outside (0, 1]",
                        kpi.label, ratio
                    )));
                }
                _ => {}
            }
        }

        if let Some(drill) = &self.drill {
            if drill.param.trim().is_empty() {
                return Err(invalid("drill param is empty"));
            }
            if !bound.contains(&drill.dimension) {
                return Err(invalid(format!(
                    "drill dimension '{}' is not bound",
                    drill.dimension
                )));
            }
            if !bound.contains(&drill.group_by) {
                return Err(invalid(format!(
                    "drill groupBy dimension '{}' is not bound",
                    drill.group_by
                )));
            }
            validate_metrics(&drill.metrics)?;
        }

        Ok(())
    }

    /// The dataset feeding the filter/aggregate/KPI pipeline
    pub fn primary_dataset(&self) -> Option<&DatasetSpec> {
        self.datasets
            .iter()
            .find(|d| d.primary)
            .or_else(|| self.datasets.first())
    }

    pub fn dataset(&self, name: &str) -> Option<&DatasetSpec> {
        self.datasets.iter().find(|d| d.name == name)
    }

    pub fn binding(&self, dimension: Dimension) -> Option<&DimensionBinding> {
        self.dimensions.iter().find(|b| b.dimension == dimension)
    }

    /// Record field bound to a dimension
    pub fn field_of(&self, dimension: Dimension) -> Option<&str> {
        self.binding(dimension).map(|b| b.field.as_str())
    }

    /// Dimensions this page tracks, in binding order
    pub fn tracked_dimensions(&self) -> Vec<Dimension> {
        self.dimensions.iter().map(|b| b.dimension).collect()
    }

    /// Metrics of the expanded drill-down view (page metrics unless the
    /// drill declares its own)
    pub fn drill_metrics(&self) -> &[MetricSpec] {
        match &self.drill {
            Some(drill) if !drill.metrics.is_empty() => &drill.metrics,
            _ => &self.metrics,
        }
    }
}

fn validate_metrics(metrics: &[MetricSpec]) -> Result<(), CoreError> {
    let mut names = HashSet::new();
    for metric in metrics {
        if metric.name.trim().is_empty() || metric.field.trim().is_empty() {
            return Err(invalid("metric needs a name and a field"));
        }
        if !names.insert(metric.name.as_str()) {
            return Err(invalid(format!("duplicate metric name '{}'", metric.name)));
        }
        if let AggregateOp::WeightedAvg { weight_field } = &metric.op {
            if weight_field.trim().is_empty() {
                return Err(invalid(format!(
                    "metric '{}' has an empty weight field",
                    metric.name
                )));
            }
        }
    }
    Ok(())
}

fn invalid(message: impl Into<String>) -> CoreError {
    CoreError::InvalidPageSpec {
        message: message.into(),
    }
}

fn default_true() -> bool {
    true
}

/// Engine-level configuration shared by every page
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Backend base URL
    pub base_url: String,
    /// Client-side timeout applied to every fetch; a timed-out request is an
    /// ordinary fetch failure
    pub request_timeout: Duration,
    /// Event bus channel capacity
    pub event_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:5000".to_string(),
            request_timeout: Duration::from_secs(30),
            event_capacity: 256,
        }
    }
}
