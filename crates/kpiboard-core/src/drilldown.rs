//! Drill-down state machine
//!
//! One controller per drillable chart. A point-click narrows the view to the
//! clicked key (layered on top of the active filters, never replacing them);
//! the controller tracks the scoped sub-view through Collapsed, Loading, and
//! Expanded. Failures revert to Collapsed with a transient chart-scoped
//! error so the view is never stuck on a spinner.

use crate::aggregate::AggregateRow;
use crate::selection::Dimension;
use serde::Serialize;
use tracing::debug;

/// The single clicked data point a drill-down narrows to
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DrillDownScope {
    /// Axis the clicked chart groups by
    pub dimension: Dimension,
    /// Clicked group key (a month label, a category name)
    pub key: String,
}

impl DrillDownScope {
    pub fn new(dimension: Dimension, key: impl Into<String>) -> Self {
        Self {
            dimension,
            key: key.into(),
        }
    }
}

/// Observable state of one drillable chart
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "state", rename_all = "camelCase")]
pub enum DrillDownState {
    /// Showing the aggregate view
    Collapsed,
    /// Scoped fetch in flight
    Loading { scope: DrillDownScope },
    /// Showing the scoped sub-view
    Expanded {
        scope: DrillDownScope,
        rows: Vec<AggregateRow>,
    },
}

/// What the engine must do after routing a click
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClickAction {
    /// Re-click on the expanded point folded the view back; nothing to fetch
    Collapsed,
    /// A new scope entered Loading; issue the scoped fetch
    FetchScoped,
}

pub struct DrillDownController {
    state: DrillDownState,
    error: Option<String>,
    request_seq: u64,
}

impl DrillDownController {
    pub fn new() -> Self {
        Self {
            state: DrillDownState::Collapsed,
            error: None,
            request_seq: 0,
        }
    }

    /// Route a point-click. Re-clicking the expanded point collapses the
    /// view; any other click captures the point's key and enters Loading.
    /// `seq` is the stale-guard token of the fetch about to be issued.
    pub fn click(&mut self, scope: DrillDownScope, seq: u64) -> ClickAction {
        self.error = None;
        match &self.state {
            DrillDownState::Expanded { scope: current, .. } if *current == scope => {
                self.state = DrillDownState::Collapsed;
                ClickAction::Collapsed
            }
            _ => {
                self.request_seq = seq;
                self.state = DrillDownState::Loading { scope };
                ClickAction::FetchScoped
            }
        }
    }

    /// Scoped fetch succeeded. Applies only while Loading the matching
    /// request; a stale completion is discarded. Returns whether the state
    /// changed.
    pub fn complete(&mut self, seq: u64, rows: Vec<AggregateRow>) -> bool {
        match &self.state {
            DrillDownState::Loading { scope } if self.request_seq == seq => {
                self.state = DrillDownState::Expanded {
                    scope: scope.clone(),
                    rows,
                };
                true
            }
            _ => {
                debug!(seq, "stale drill-down completion discarded");
                false
            }
        }
    }

    /// Scoped fetch failed: revert to Collapsed and surface a transient
    /// error scoped to this chart. Stale failures are discarded.
    pub fn fail(&mut self, seq: u64, message: impl Into<String>) -> bool {
        match &self.state {
            DrillDownState::Loading { .. } if self.request_seq == seq => {
                self.state = DrillDownState::Collapsed;
                self.error = Some(message.into());
                true
            }
            _ => {
                debug!(seq, "stale drill-down failure discarded");
                false
            }
        }
    }

    /// Explicit back action to the parent view
    pub fn back(&mut self) {
        self.error = None;
        self.state = DrillDownState::Collapsed;
    }

    /// The parent selection changed, so any scope is stale. Forces
    /// Collapsed; an in-flight completion will be discarded on arrival.
    /// Returns whether an active scope was dropped.
    pub fn invalidate(&mut self) -> bool {
        let was_active = !matches!(self.state, DrillDownState::Collapsed);
        if was_active {
            debug!("parent selection changed, collapsing drill-down");
        }
        self.error = None;
        self.state = DrillDownState::Collapsed;
        was_active
    }

    pub fn state(&self) -> &DrillDownState {
        &self.state
    }

    /// Transient error from the last failed scoped fetch, cleared by the
    /// next interaction
    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }
}

impl Default for DrillDownController {
    fn default() -> Self {
        Self::new()
    }
}
