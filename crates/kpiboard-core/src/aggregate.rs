//! Grouped aggregation over filtered records
//!
//! Turns the filtered subset into chart-ready rows: one row per group key, or
//! one per (group, series) pair for two-level grouping, with one value per
//! requested metric. Rows are always regenerated from the filtered dataset.

use crate::models::Record;
use crate::selection::Dimension;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::HashMap;
use tracing::debug;

/// Aggregation operator for one metric
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum AggregateOp {
    #[default]
    Sum,
    Avg,
    Max,
    WeightedAvg {
        weight_field: String,
    },
}

/// One metric requested from the aggregation engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricSpec {
    /// Name of the output value on each row
    pub name: String,
    /// Record field the metric reads
    pub field: String,
    #[serde(default)]
    pub op: AggregateOp,
}

impl MetricSpec {
    /// Plain sum metric (the default operator)
    pub fn sum(name: impl Into<String>, field: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            field: field.into(),
            op: AggregateOp::Sum,
        }
    }

    pub fn with_op(name: impl Into<String>, field: impl Into<String>, op: AggregateOp) -> Self {
        Self {
            name: name.into(),
            field: field.into(),
            op,
        }
    }
}

/// One grouped, metric-summed row produced for charting
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregateRow {
    /// Primary group key (entity name or period label)
    pub key: String,
    /// Secondary key when two-level grouping was requested
    #[serde(skip_serializing_if = "Option::is_none")]
    pub series: Option<String>,
    /// Metric name to aggregated value
    pub values: HashMap<String, f64>,
}

impl AggregateRow {
    /// Metric accessor; an unknown metric reads as 0
    pub fn value(&self, metric: &str) -> f64 {
        self.values.get(metric).copied().unwrap_or(0.0)
    }
}

/// Ratio with the zero-division policy: a zero denominator yields 0,
/// never NaN or infinity.
pub fn safe_ratio(numerator: f64, denominator: f64) -> f64 {
    if denominator == 0.0 {
        0.0
    } else {
        numerator / denominator
    }
}

/// Running state for one metric within one group
#[derive(Debug, Default)]
struct MetricAccumulator {
    sum: f64,
    count: usize,
    max: Option<f64>,
    weighted_sum: f64,
    weight_sum: f64,
}

impl MetricAccumulator {
    fn add(&mut self, value: f64, weight: f64) {
        self.sum += value;
        self.count += 1;
        self.max = Some(match self.max {
            Some(current) => current.max(value),
            None => value,
        });
        self.weighted_sum += value * weight;
        self.weight_sum += weight;
    }

    fn finalize(&self, op: &AggregateOp) -> f64 {
        match op {
            AggregateOp::Sum => self.sum,
            AggregateOp::Avg => safe_ratio(self.sum, self.count as f64),
            AggregateOp::Max => self.max.unwrap_or(0.0),
            AggregateOp::WeightedAvg { .. } => safe_ratio(self.weighted_sum, self.weight_sum),
        }
    }
}

/// Group `records` by the field bound to `group_by` and compute every metric
/// per group.
///
/// With `series` present the engine nests one level: one row per
/// (group, series) pair, emitted flat and tagged with both keys so the
/// presentation layer can split series without re-aggregating.
///
/// Sort order: alphabetical group keys, except that a period axis sorts
/// ascending numerically (integer labels numeric-first, other labels such as
/// ISO dates lexicographically, which is chronological). Records missing the
/// group or series field are excluded from grouping.
pub fn aggregate(
    records: &[Record],
    group_by: Dimension,
    group_field: &str,
    series: Option<(Dimension, &str)>,
    metrics: &[MetricSpec],
) -> Vec<AggregateRow> {
    let mut groups: HashMap<(String, Option<String>), Vec<MetricAccumulator>> = HashMap::new();
    let mut skipped = 0usize;

    for record in records {
        let Some(group_key) = record.key(group_field) else {
            skipped += 1;
            continue;
        };
        let series_key = match series {
            Some((_, series_field)) => match record.key(series_field) {
                Some(key) => Some(key),
                None => {
                    skipped += 1;
                    continue;
                }
            },
            None => None,
        };

        let accumulators = groups
            .entry((group_key, series_key))
            .or_insert_with(|| metrics.iter().map(|_| MetricAccumulator::default()).collect());

        for (metric, accumulator) in metrics.iter().zip(accumulators.iter_mut()) {
            let value = record.number(&metric.field);
            let weight = match &metric.op {
                AggregateOp::WeightedAvg { weight_field } => record.number(weight_field),
                _ => 1.0,
            };
            accumulator.add(value, weight);
        }
    }

    if skipped > 0 {
        debug!(
            skipped,
            group_field, "records without grouping keys excluded from aggregation"
        );
    }

    let mut rows: Vec<AggregateRow> = groups
        .into_iter()
        .map(|((key, series_key), accumulators)| AggregateRow {
            key,
            series: series_key,
            values: metrics
                .iter()
                .zip(accumulators.iter())
                .map(|(metric, accumulator)| (metric.name.clone(), accumulator.finalize(&metric.op)))
                .collect(),
        })
        .collect();

    let series_dimension = series.map(|(dimension, _)| dimension);
    rows.sort_by(|a, b| {
        dimension_cmp(group_by, &a.key, &b.key).then_with(|| {
            match (&a.series, &b.series, series_dimension) {
                (Some(sa), Some(sb), Some(dimension)) => dimension_cmp(dimension, sa, sb),
                _ => Ordering::Equal,
            }
        })
    });

    rows
}

/// Order two group keys along a dimension: periods sort ascending
/// numerically, everything else alphabetically.
pub fn dimension_cmp(dimension: Dimension, a: &str, b: &str) -> Ordering {
    match dimension {
        Dimension::Period => period_sort_key(a).cmp(&period_sort_key(b)),
        _ => a.cmp(b),
    }
}

/// Sort key for period labels: integer labels (years) sort numerically and
/// before non-integer labels; the rest (ISO dates, "YYYY-MM" keys) sort
/// lexicographically.
pub(crate) fn period_sort_key(label: &str) -> (u8, i64, String) {
    match label.trim().parse::<i64>() {
        Ok(n) => (0, n, String::new()),
        Err(_) => (1, 0, label.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(customer: &str, date: &str, revenue: f64, hours: f64) -> Record {
        Record::new()
            .with("customer_name", customer)
            .with("worked_date", date)
            .with("revenue", revenue)
            .with("hours", hours)
    }

    fn revenue_metrics() -> Vec<MetricSpec> {
        vec![MetricSpec::sum("revenue", "revenue")]
    }

    // ============ Grouping & Sorting ============

    #[test]
    fn test_sum_by_entity_sorted_alphabetically() {
        let records = vec![
            entry("Globex", "2024-01-10", 200.0, 2.0),
            entry("Acme", "2024-01-11", 100.0, 1.0),
            entry("Acme", "2024-02-01", 50.0, 1.0),
        ];

        let rows = aggregate(
            &records,
            Dimension::Entity,
            "customer_name",
            None,
            &revenue_metrics(),
        );

        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].key, "Acme");
        assert_eq!(rows[0].value("revenue"), 150.0);
        assert_eq!(rows[1].key, "Globex");
        assert_eq!(rows[1].value("revenue"), 200.0);
    }

    #[test]
    fn test_period_keys_sort_numerically() {
        let mut records: Vec<Record> = Vec::new();
        for year in [2024.0, 2009.0, 2023.0] {
            records.push(Record::new().with("year", year).with("rev", 1.0));
        }

        let rows = aggregate(
            &records,
            Dimension::Period,
            "year",
            None,
            &[MetricSpec::sum("rev", "rev")],
        );

        let keys: Vec<&str> = rows.iter().map(|r| r.key.as_str()).collect();
        assert_eq!(keys, vec!["2009", "2023", "2024"]);
    }

    #[test]
    fn test_iso_period_keys_sort_chronologically() {
        let records = vec![
            entry("Acme", "2024-10-01", 1.0, 1.0),
            entry("Acme", "2024-02-01", 2.0, 1.0),
            entry("Acme", "2023-12-31", 3.0, 1.0),
        ];

        let rows = aggregate(
            &records,
            Dimension::Period,
            "worked_date",
            None,
            &revenue_metrics(),
        );

        let keys: Vec<&str> = rows.iter().map(|r| r.key.as_str()).collect();
        assert_eq!(keys, vec!["2023-12-31", "2024-02-01", "2024-10-01"]);
    }

    // ============ Operators ============

    #[test]
    fn test_avg_and_max_operators() {
        let records = vec![
            entry("Acme", "2024-01-01", 100.0, 4.0),
            entry("Acme", "2024-01-02", 200.0, 6.0),
        ];
        let metrics = vec![
            MetricSpec::with_op("avgRevenue", "revenue", AggregateOp::Avg),
            MetricSpec::with_op("peakRevenue", "revenue", AggregateOp::Max),
        ];

        let rows = aggregate(&records, Dimension::Entity, "customer_name", None, &metrics);

        assert_eq!(rows[0].value("avgRevenue"), 150.0);
        assert_eq!(rows[0].value("peakRevenue"), 200.0);
    }

    #[test]
    fn test_weighted_avg_weights_by_hours() {
        // Hourly rates 100 and 200 weighted by 1h and 3h -> 175
        let records = vec![
            Record::new()
                .with("customer_name", "Acme")
                .with("rate", 100.0)
                .with("hours", 1.0),
            Record::new()
                .with("customer_name", "Acme")
                .with("rate", 200.0)
                .with("hours", 3.0),
        ];
        let metrics = vec![MetricSpec::with_op(
            "blendedRate",
            "rate",
            AggregateOp::WeightedAvg {
                weight_field: "hours".to_string(),
            },
        )];

        let rows = aggregate(&records, Dimension::Entity, "customer_name", None, &metrics);
        assert_eq!(rows[0].value("blendedRate"), 175.0);
    }

    #[test]
    fn test_weighted_avg_zero_weights_reports_zero() {
        let records = vec![Record::new()
            .with("customer_name", "Acme")
            .with("rate", 100.0)
            .with("hours", 0.0)];
        let metrics = vec![MetricSpec::with_op(
            "blendedRate",
            "rate",
            AggregateOp::WeightedAvg {
                weight_field: "hours".to_string(),
            },
        )];

        let rows = aggregate(&records, Dimension::Entity, "customer_name", None, &metrics);
        assert_eq!(rows[0].value("blendedRate"), 0.0, "zero weight must not divide");
    }

    // ============ Two-level grouping ============

    #[test]
    fn test_two_level_grouping_emits_flat_tagged_rows() {
        let records = vec![
            Record::new().with("customer_name", "Acme").with("year", 2023.0).with("revenue", 10.0),
            Record::new().with("customer_name", "Acme").with("year", 2024.0).with("revenue", 20.0),
            Record::new().with("customer_name", "Globex").with("year", 2024.0).with("revenue", 30.0),
        ];

        let rows = aggregate(
            &records,
            Dimension::Entity,
            "customer_name",
            Some((Dimension::Period, "year")),
            &revenue_metrics(),
        );

        assert_eq!(rows.len(), 3);
        assert_eq!(rows[0].key, "Acme");
        assert_eq!(rows[0].series.as_deref(), Some("2023"));
        assert_eq!(rows[1].key, "Acme");
        assert_eq!(rows[1].series.as_deref(), Some("2024"));
        assert_eq!(rows[2].key, "Globex");
        assert_eq!(rows[2].series.as_deref(), Some("2024"));
    }

    // ============ Degradation policies ============

    #[test]
    fn test_missing_numeric_field_counts_as_zero() {
        let records = vec![
            entry("Acme", "2024-01-01", 100.0, 1.0),
            Record::new().with("customer_name", "Acme"),
        ];
        let metrics = vec![
            MetricSpec::sum("revenue", "revenue"),
            MetricSpec::with_op("avgRevenue", "revenue", AggregateOp::Avg),
        ];

        let rows = aggregate(&records, Dimension::Entity, "customer_name", None, &metrics);

        assert_eq!(rows[0].value("revenue"), 100.0);
        assert_eq!(rows[0].value("avgRevenue"), 50.0, "missing numeric joins the avg as 0");
    }

    #[test]
    fn test_records_without_group_key_are_excluded() {
        let records = vec![
            entry("Acme", "2024-01-01", 100.0, 1.0),
            Record::new().with("revenue", 999.0),
        ];

        let rows = aggregate(
            &records,
            Dimension::Entity,
            "customer_name",
            None,
            &revenue_metrics(),
        );

        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].value("revenue"), 100.0);
    }

    #[test]
    fn test_aggregate_totals_match_record_totals() {
        // No record with a group key may be dropped by grouping
        let records = vec![
            entry("Acme", "2024-01-01", 100.0, 1.0),
            entry("Globex", "2024-01-02", 250.5, 2.0),
            entry("Initech", "2024-02-01", 49.5, 3.0),
            entry("Acme", "2024-03-01", 10.0, 4.0),
        ];

        let rows = aggregate(
            &records,
            Dimension::Entity,
            "customer_name",
            None,
            &revenue_metrics(),
        );

        let row_total: f64 = rows.iter().map(|r| r.value("revenue")).sum();
        let record_total: f64 = records.iter().map(|r| r.number("revenue")).sum();
        assert!((row_total - record_total).abs() < 1e-9);
    }

    #[test]
    fn test_empty_input_yields_empty_rows() {
        let rows = aggregate(
            &[],
            Dimension::Entity,
            "customer_name",
            None,
            &revenue_metrics(),
        );
        assert!(rows.is_empty());
    }

    #[test]
    fn test_unknown_metric_reads_zero() {
        let rows = aggregate(
            &[entry("Acme", "2024-01-01", 100.0, 1.0)],
            Dimension::Entity,
            "customer_name",
            None,
            &revenue_metrics(),
        );
        assert_eq!(rows[0].value("nope"), 0.0);
    }

    #[test]
    fn test_safe_ratio_zero_denominator() {
        assert_eq!(safe_ratio(10.0, 0.0), 0.0);
        assert_eq!(safe_ratio(10.0, 4.0), 2.5);
        assert_eq!(safe_ratio(0.0, 0.0), 0.0);
    }

    #[test]
    fn test_metric_spec_json_defaults_to_sum() {
        let spec: MetricSpec =
            serde_json::from_str(r#"{"name": "revenue", "field": "revenue"}"#).unwrap();
        assert_eq!(spec.op, AggregateOp::Sum);

        let weighted: MetricSpec = serde_json::from_str(
            r#"{"name": "rate", "field": "rate", "op": {"weightedAvg": {"weightField": "hours"}}}"#,
        )
        .unwrap();
        assert_eq!(
            weighted.op,
            AggregateOp::WeightedAvg {
                weight_field: "hours".to_string()
            }
        );
    }
}
