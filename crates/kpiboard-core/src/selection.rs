//! Multi-dimensional selection state
//!
//! Each dashboard page filters its records along independent discrete
//! dimensions (entities, periods, categories, resources) plus an optional
//! ISO date-range. Discrete selections carry the reserved sentinel `"all"`
//! meaning "no restriction".

use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::fmt;

/// Reserved selection value meaning "no restriction on this dimension"
pub const ALL: &str = "all";

/// A named axis over which selection and grouping occur
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Dimension {
    /// University, customer, ... (the main grouping axis)
    Entity,
    /// Year, month key, or ISO date
    Period,
    Category,
    Resource,
}

impl Dimension {
    pub fn as_str(&self) -> &'static str {
        match self {
            Dimension::Entity => "entity",
            Dimension::Period => "period",
            Dimension::Category => "category",
            Dimension::Resource => "resource",
        }
    }

    pub fn all() -> [Dimension; 4] {
        [
            Dimension::Entity,
            Dimension::Period,
            Dimension::Category,
            Dimension::Resource,
        ]
    }
}

impl fmt::Display for Dimension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Closed date interval compared lexicographically on ISO date strings
///
/// No `start <= end` validation happens here; an inverted interval simply
/// matches nothing downstream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DateRange {
    pub start: String,
    pub end: String,
}

impl DateRange {
    pub fn new(start: impl Into<String>, end: impl Into<String>) -> Self {
        Self {
            start: start.into(),
            end: end.into(),
        }
    }

    /// Inclusive membership test on the raw string form
    pub fn contains(&self, key: &str) -> bool {
        self.start.as_str() <= key && key <= self.end.as_str()
    }
}

/// Current filter selections for one page
///
/// Invariants, upheld by every setter:
/// - a discrete dimension's selection is never empty;
/// - the sentinel never coexists with concrete values.
#[derive(Debug, Clone, PartialEq)]
pub struct SelectionState {
    selections: HashMap<Dimension, BTreeSet<String>>,
    date_range: Option<DateRange>,
}

impl SelectionState {
    /// Start with `{"all"}` on each tracked dimension and no date-range
    pub fn new(dimensions: &[Dimension]) -> Self {
        let selections = dimensions.iter().map(|d| (*d, all_only())).collect();
        Self {
            selections,
            date_range: None,
        }
    }

    /// Apply a raw multi-select event to one dimension. Returns whether the
    /// stored selection actually changed.
    ///
    /// A single multi-select control conflates "pick all" and "pick
    /// everything individually" into the same raw event: the incoming set can
    /// contain `"all"` alongside concrete values. The call is disambiguated
    /// by whichever state was active before the click:
    ///
    /// 1. incoming contains `"all"` plus concrete values:
    ///    - previous selection contained `"all"` → the user is narrowing from
    ///      all, so the sentinel is dropped: result = incoming minus `"all"`;
    ///    - previous selection was concrete → the user explicitly picked
    ///      `"all"`: result = `{"all"}`.
    /// 2. incoming is empty → result = `{"all"}` (a selection is never empty).
    /// 3. otherwise → result = incoming verbatim.
    pub fn set_selection(&mut self, dimension: Dimension, values: BTreeSet<String>) -> bool {
        let previously_all = self
            .selections
            .get(&dimension)
            .map(|s| s.contains(ALL))
            .unwrap_or(true);

        let next = if values.contains(ALL) && values.len() > 1 {
            if previously_all {
                let mut concrete = values;
                concrete.remove(ALL);
                concrete
            } else {
                all_only()
            }
        } else if values.is_empty() {
            all_only()
        } else {
            values
        };

        let changed = self.selections.get(&dimension) != Some(&next);
        self.selections.insert(dimension, next);
        changed
    }

    /// Overwrite the date-range interval. No start/end ordering validation;
    /// an inverted range propagates as an empty filtered set.
    pub fn set_date_range(&mut self, start: impl Into<String>, end: impl Into<String>) {
        self.date_range = Some(DateRange::new(start, end));
    }

    pub fn clear_date_range(&mut self) {
        self.date_range = None;
    }

    /// Reset every tracked dimension to `{"all"}` and drop the date-range
    pub fn reset(&mut self) {
        for values in self.selections.values_mut() {
            *values = all_only();
        }
        self.date_range = None;
    }

    pub fn selected(&self, dimension: Dimension) -> Option<&BTreeSet<String>> {
        self.selections.get(&dimension)
    }

    /// True when the dimension is unrestricted (untracked dimensions are
    /// unrestricted by definition)
    pub fn is_all(&self, dimension: Dimension) -> bool {
        self.selections
            .get(&dimension)
            .map(|s| s.contains(ALL))
            .unwrap_or(true)
    }

    pub fn date_range(&self) -> Option<&DateRange> {
        self.date_range.as_ref()
    }

    /// Iterate over tracked dimensions and their selections
    pub fn iter(&self) -> impl Iterator<Item = (Dimension, &BTreeSet<String>)> {
        self.selections.iter().map(|(d, s)| (*d, s))
    }
}

fn all_only() -> BTreeSet<String> {
    BTreeSet::from([ALL.to_string()])
}
