//! KPI derivation
//!
//! Headline cards compare the two most recent distinct periods present in the
//! filtered set. With fewer than two periods there is nothing to compare and
//! derivation reports "insufficient history" (None), not an error.

use crate::aggregate::{period_sort_key, safe_ratio};
use crate::models::{Kpi, Record};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use tracing::debug;

/// How one KPI reads its value out of a period window
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum KpiKind {
    /// Sum of the field across every record in the window
    #[default]
    Total,
    /// Ratio of two summed fields, e.g. blended rate = revenue / hours
    PerUnit { denominator_field: String },
    /// Fixed-ratio split of a parent metric. The raw dataset does not break
    /// this sub-population out; the result is an estimate and is flagged as
    /// one on the derived KPI.
    EstimatedShare { ratio: f64 },
}

/// One KPI card requested from the deriver
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KpiSpec {
    pub label: String,
    pub field: String,
    #[serde(default)]
    pub kind: KpiKind,
}

impl KpiSpec {
    /// Plain total KPI (the default kind)
    pub fn total(label: impl Into<String>, field: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            field: field.into(),
            kind: KpiKind::Total,
        }
    }
}

/// Percent change with the zero-guard policy: a zero previous value reports
/// 0 change, never infinity or NaN.
pub fn percent_change(current: f64, previous: f64) -> f64 {
    if previous == 0.0 {
        0.0
    } else {
        (current - previous) / previous * 100.0
    }
}

/// Derive KPI cards from the filtered records.
///
/// Picks the two most recent distinct values of `period_field` (period
/// ordering: integer labels numerically, ISO labels lexicographically), sums
/// each spec over both windows across every matching entity, and pairs the
/// totals with their percent change. Returns None when fewer than two
/// distinct periods exist, so the caller renders an insufficient-history
/// state instead of a bogus comparison.
pub fn derive_kpis(
    records: &[Record],
    period_field: &str,
    specs: &[KpiSpec],
) -> Option<Vec<Kpi>> {
    let distinct: BTreeSet<String> = records
        .iter()
        .filter_map(|r| r.key(period_field))
        .collect();
    let mut periods: Vec<String> = distinct.into_iter().collect();
    periods.sort_by(|a, b| period_sort_key(a).cmp(&period_sort_key(b)));

    if periods.len() < 2 {
        debug!(
            distinct_periods = periods.len(),
            period_field, "insufficient history for KPI derivation"
        );
        return None;
    }

    let current_period = &periods[periods.len() - 1];
    let previous_period = &periods[periods.len() - 2];

    let kpis = specs
        .iter()
        .map(|spec| {
            let value = window_value(records, period_field, current_period, spec);
            let previous_value = window_value(records, period_field, previous_period, spec);
            Kpi {
                label: spec.label.clone(),
                value,
                previous_value,
                percent_change: percent_change(value, previous_value),
                estimated: matches!(spec.kind, KpiKind::EstimatedShare { .. }),
            }
        })
        .collect();

    Some(kpis)
}

/// Evaluate one spec over the records belonging to one period
fn window_value(records: &[Record], period_field: &str, period: &str, spec: &KpiSpec) -> f64 {
    let window = records
        .iter()
        .filter(|r| r.key(period_field).as_deref() == Some(period));

    match &spec.kind {
        KpiKind::Total => window.map(|r| r.number(&spec.field)).sum(),
        KpiKind::PerUnit { denominator_field } => {
            let mut numerator = 0.0;
            let mut denominator = 0.0;
            for record in window {
                numerator += record.number(&spec.field);
                denominator += record.number(denominator_field);
            }
            safe_ratio(numerator, denominator)
        }
        KpiKind::EstimatedShare { ratio } => {
            let total: f64 = window.map(|r| r.number(&spec.field)).sum();
            total * ratio
        }
    }
}
