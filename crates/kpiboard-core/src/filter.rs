//! Filter evaluation
//!
//! Pure predicates deriving the filtered subset of a dataset from the current
//! selection. No side effects; safe to call on every recomputation.

use crate::config::DimensionBinding;
use crate::models::{Dataset, Record};
use crate::selection::{Dimension, SelectionState, ALL};

/// Check one record against every dimension of the selection.
///
/// A record passes iff, per bound dimension, the selection is `{"all"}` or
/// the record's value is a member of the selection set; and, when a
/// date-range is present, the record's period field falls lexicographically
/// within `[start, end]` inclusive.
///
/// # Examples
///
/// ```
/// use kpiboard_core::{record_matches, Dimension, DimensionBinding, Record, SelectionState};
///
/// let bindings = vec![DimensionBinding {
///     dimension: Dimension::Entity,
///     field: "university".to_string(),
///     param: "universities".to_string(),
/// }];
/// let mut selection = SelectionState::new(&[Dimension::Entity]);
/// let record = Record::new().with("university", "UBC");
///
/// assert!(record_matches(&record, &selection, &bindings));
///
/// selection.set_selection(Dimension::Entity, ["SFU".to_string()].into());
/// assert!(!record_matches(&record, &selection, &bindings));
/// ```
pub fn record_matches(
    record: &Record,
    selection: &SelectionState,
    bindings: &[DimensionBinding],
) -> bool {
    for binding in bindings {
        let Some(values) = selection.selected(binding.dimension) else {
            continue;
        };
        if values.contains(ALL) {
            continue;
        }
        match record.key(&binding.field) {
            Some(key) if values.contains(&key) => {}
            _ => return false,
        }
    }

    if let Some(range) = selection.date_range() {
        // The interval applies to the page's period field. A page without a
        // period binding cannot evaluate it, so the range is ignored there.
        if let Some(period_field) = bindings
            .iter()
            .find(|b| b.dimension == Dimension::Period)
            .map(|b| b.field.as_str())
        {
            match record.key(period_field) {
                Some(key) if range.contains(&key) => {}
                _ => return false,
            }
        }
    }

    true
}

/// Filtered view of a dataset under the current selection
pub fn filter_records(
    dataset: &Dataset,
    selection: &SelectionState,
    bindings: &[DimensionBinding],
) -> Vec<Record> {
    dataset
        .records
        .iter()
        .filter(|record| record_matches(record, selection, bindings))
        .cloned()
        .collect()
}
