//! Generic page engine
//!
//! One engine instance drives one dashboard page, whatever its domain: the
//! [`PageSpec`] supplies dataset endpoints, dimension bindings, metrics,
//! KPI cards, and drill-down wiring, and the engine runs the shared
//! fetch/filter/aggregate/derive cycle against them. The rendering layer
//! reads immutable [`PageSnapshot`]s and subscribes to the event bus for
//! redraw triggers; it never touches the pipeline stages directly.

use crate::aggregate::{aggregate, AggregateRow};
use crate::config::{DatasetSpec, DimensionBinding, DrillSpec, EngineConfig, PageSpec};
use crate::drilldown::{ClickAction, DrillDownController, DrillDownScope, DrillDownState};
use crate::error::{CoreError, ErrorSeverity, FetchReport, LoadError, PageHealth};
use crate::event::{EngineEvent, EventBus};
use crate::fetch::{DataFetcher, FetchRequest, HttpFetcher};
use crate::filter::filter_records;
use crate::kpi::derive_kpis;
use crate::models::{Dataset, Kpi, Record};
use crate::selection::{DateRange, Dimension, SelectionState, ALL};
use crate::store::RecordStore;
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

/// Immutable view of a page for the rendering layer
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PageSnapshot {
    /// Primary-dataset records passing the active filters
    pub filtered_records: Vec<Record>,
    /// Chart-ready grouped rows
    pub aggregate_rows: Vec<AggregateRow>,
    /// KPI cards; None until the filtered view spans two distinct periods
    pub kpis: Option<Vec<Kpi>>,
    pub drill_down: DrillDownState,
    /// Transient error scoped to the drillable chart
    pub drill_error: Option<String>,
    pub loading: bool,
    /// Page-level error; a manual refresh is the retry path
    pub error: Option<String>,
    pub computed_at: DateTime<Utc>,
}

impl PageSnapshot {
    fn empty() -> Self {
        Self {
            filtered_records: Vec::new(),
            aggregate_rows: Vec::new(),
            kpis: None,
            drill_down: DrillDownState::Collapsed,
            drill_error: None,
            loading: false,
            error: None,
            computed_at: Utc::now(),
        }
    }
}

/// Engine behind one dashboard page
pub struct PageEngine {
    spec: PageSpec,
    store: Arc<RecordStore>,
    fetcher: Arc<dyn DataFetcher>,
    bus: EventBus,
    selection: RwLock<SelectionState>,
    drill: Mutex<DrillDownController>,
    snapshot: RwLock<Arc<PageSnapshot>>,
    health: RwLock<PageHealth>,
    page_error: Mutex<Option<String>>,
    loading: AtomicBool,
    /// Stale-response guard for dataset fetch cycles
    refresh_seq: AtomicU64,
    /// Stale-response guard for scoped drill-down fetches
    drill_seq: AtomicU64,
}

impl PageEngine {
    /// Build an engine over a validated spec and an injected fetcher
    pub fn new(
        spec: PageSpec,
        config: &EngineConfig,
        fetcher: Arc<dyn DataFetcher>,
    ) -> Result<Self, CoreError> {
        spec.validate()?;

        let bus = EventBus::new(config.event_capacity);
        let store = Arc::new(RecordStore::new(bus.clone()));
        let selection = SelectionState::new(&spec.tracked_dimensions());

        Ok(Self {
            store,
            fetcher,
            bus,
            selection: RwLock::new(selection),
            drill: Mutex::new(DrillDownController::new()),
            snapshot: RwLock::new(Arc::new(PageSnapshot::empty())),
            health: RwLock::new(PageHealth::Healthy),
            page_error: Mutex::new(None),
            loading: AtomicBool::new(false),
            refresh_seq: AtomicU64::new(0),
            drill_seq: AtomicU64::new(0),
            spec,
        })
    }

    /// Convenience constructor wiring the HTTP fetcher from the config
    pub fn with_http(spec: PageSpec, config: &EngineConfig) -> anyhow::Result<Self> {
        let fetcher = Arc::new(HttpFetcher::new(config)?);
        Ok(Self::new(spec, config, fetcher)?)
    }

    // ===================
    // Fetch cycles
    // ===================

    /// Mount-time load of every dataset the page declares
    pub async fn initial_load(&self) -> FetchReport {
        info!(page = %self.spec.name, "Mounting page");
        self.reload_all().await
    }

    /// Manual refresh; the only retry path after a page-level failure
    pub async fn refresh(&self) -> FetchReport {
        info!(page = %self.spec.name, "Manual refresh requested");
        self.reload_all().await
    }

    async fn reload_all(&self) -> FetchReport {
        let seq = self.next_refresh_seq();
        self.loading.store(true, Ordering::SeqCst);
        self.recompute_snapshot();

        let requests: Vec<(DatasetSpec, FetchRequest)> = {
            let selection = self.selection.read();
            self.spec
                .datasets
                .iter()
                .map(|dataset| {
                    let request = if dataset.selection_scoped {
                        FetchRequest::for_selection(
                            &dataset.endpoint,
                            &selection,
                            &self.spec.dimensions,
                        )
                    } else {
                        FetchRequest::new(dataset.endpoint.clone())
                    };
                    (dataset.clone(), request)
                })
                .collect()
        };

        let report = self.fetch_into_store(seq, requests).await;

        // Only the latest cycle may publish its outcome
        if seq == self.refresh_seq.load(Ordering::SeqCst) {
            self.apply_health(&report);
            self.loading.store(false, Ordering::SeqCst);
            self.recompute_snapshot();
            self.bus.publish(EngineEvent::RefreshCompleted);

            let (warnings, errors, fatal) = report.error_count();
            info!(
                page = %self.spec.name,
                datasets_loaded = report.datasets_loaded,
                records_loaded = report.records_loaded,
                warnings,
                errors,
                fatal,
                "Fetch cycle finished"
            );
        }

        report
    }

    /// Re-fetch the selection-scoped datasets after a filter change
    async fn refetch_scoped(&self) {
        let seq = self.next_refresh_seq();
        let requests: Vec<(DatasetSpec, FetchRequest)> = {
            let selection = self.selection.read();
            self.spec
                .datasets
                .iter()
                .filter(|dataset| dataset.selection_scoped)
                .map(|dataset| {
                    (
                        dataset.clone(),
                        FetchRequest::for_selection(
                            &dataset.endpoint,
                            &selection,
                            &self.spec.dimensions,
                        ),
                    )
                })
                .collect()
        };
        if requests.is_empty() {
            return;
        }

        let report = self.fetch_into_store(seq, requests).await;

        if seq == self.refresh_seq.load(Ordering::SeqCst) {
            self.apply_health(&report);
            self.recompute_snapshot();
        }
    }

    /// Fetch every request in parallel and load the responses that are
    /// still current. A superseded response never reaches the store.
    async fn fetch_into_store(
        &self,
        seq: u64,
        requests: Vec<(DatasetSpec, FetchRequest)>,
    ) -> FetchReport {
        let mut handles = Vec::with_capacity(requests.len());
        for (dataset, request) in requests {
            let fetcher = Arc::clone(&self.fetcher);
            let name = dataset.name.clone();
            let handle = tokio::spawn(async move {
                let result = fetcher.fetch_records(&request).await;
                (dataset, result)
            });
            handles.push((name, handle));
        }

        let mut report = FetchReport::new();
        for (name, handle) in handles {
            match handle.await {
                Ok((dataset, Ok(records))) => {
                    if seq != self.refresh_seq.load(Ordering::SeqCst) {
                        debug!(dataset = %dataset.name, seq, "Superseded fetch discarded");
                        continue;
                    }
                    match self
                        .store
                        .load(&dataset.name, records, &dataset.required_fields)
                    {
                        Ok(count) => {
                            report.datasets_loaded += 1;
                            report.records_loaded += count;
                        }
                        Err(error) => {
                            warn!(dataset = %dataset.name, %error, "Dataset rejected, loaded as empty");
                            report.add_warning(&dataset.name, error.to_string());
                            report.datasets_loaded += 1;
                        }
                    }
                }
                Ok((dataset, Err(error))) => {
                    let message = format!("{error:#}");
                    warn!(dataset = %dataset.name, %message, "Dataset fetch failed");
                    self.bus
                        .publish(EngineEvent::FetchFailed(dataset.name.clone()));
                    report.add_error(LoadError::error(&dataset.name, message));
                    report.datasets_failed += 1;
                }
                Err(join_error) => {
                    self.bus.publish(EngineEvent::FetchFailed(name.clone()));
                    report.add_error(LoadError::fatal(
                        &name,
                        format!("Fetch task crashed: {join_error}"),
                    ));
                    report.datasets_failed += 1;
                }
            }
        }
        report
    }

    // ===================
    // Filter interactions
    // ===================

    /// Apply a selector change. The raw incoming set may combine the "all"
    /// sentinel with concrete values; disambiguation happens in
    /// [`SelectionState::set_selection`]. A no-op change fetches nothing.
    pub async fn set_selection(&self, dimension: Dimension, values: BTreeSet<String>) {
        let changed = self.selection.write().set_selection(dimension, values);
        if !changed {
            return;
        }
        debug!(page = %self.spec.name, %dimension, "Selection changed");
        self.bus.publish(EngineEvent::SelectionChanged(dimension));
        self.after_filter_change().await;
    }

    /// Apply a date-range interval (inclusive, ISO `YYYY-MM-DD` strings)
    pub async fn set_date_range(&self, start: impl Into<String>, end: impl Into<String>) {
        let next = DateRange::new(start, end);
        {
            let mut selection = self.selection.write();
            if selection.date_range() == Some(&next) {
                return;
            }
            selection.set_date_range(next.start.clone(), next.end.clone());
        }
        self.bus.publish(EngineEvent::DateRangeChanged);
        self.after_filter_change().await;
    }

    pub async fn clear_date_range(&self) {
        {
            let mut selection = self.selection.write();
            if selection.date_range().is_none() {
                return;
            }
            selection.clear_date_range();
        }
        self.bus.publish(EngineEvent::DateRangeChanged);
        self.after_filter_change().await;
    }

    /// Reset every dimension to unrestricted and drop the date range
    pub async fn reset_filters(&self) {
        self.selection.write().reset();
        self.bus.publish(EngineEvent::FiltersReset);
        self.after_filter_change().await;
    }

    /// Shared tail of every filter interaction: drop any drill-down scope,
    /// recompute locally for instant feedback, then re-fetch the scoped
    /// datasets for the authoritative server-side pass.
    async fn after_filter_change(&self) {
        if self.drill.lock().invalidate() {
            self.bus.publish(EngineEvent::DrillDownChanged);
        }
        self.recompute_snapshot();
        self.refetch_scoped().await;
    }

    // ===================
    // Drill-down
    // ===================

    /// Route a chart point-click into the drill-down controller and run
    /// the scoped fetch it asks for. Fetch failures surface through the
    /// snapshot's chart-scoped error, not through the returned Result.
    pub async fn drill_click(&self, key: impl Into<String>) -> Result<(), CoreError> {
        let key = key.into();
        let Some(drill_spec) = self.spec.drill.clone() else {
            return Err(CoreError::DrillUnsupported {
                page: self.spec.name.clone(),
            });
        };

        let scope = DrillDownScope::new(drill_spec.dimension, key.clone());
        let seq = self.drill_seq.fetch_add(1, Ordering::SeqCst) + 1;
        let action = self.drill.lock().click(scope, seq);
        self.bus.publish(EngineEvent::DrillDownChanged);
        self.recompute_snapshot();

        if action == ClickAction::Collapsed {
            return Ok(());
        }

        let endpoint = match &drill_spec.endpoint {
            Some(endpoint) => endpoint.clone(),
            None => match self.spec.primary_dataset() {
                Some(primary) => primary.endpoint.clone(),
                None => {
                    return Err(CoreError::InvalidPageSpec {
                        message: "page has no datasets".to_string(),
                    })
                }
            },
        };

        let request = {
            let selection = self.selection.read();
            FetchRequest::scoped(
                &endpoint,
                &selection,
                &self.spec.dimensions,
                &drill_spec.param,
                &key,
            )
        };
        debug!(page = %self.spec.name, %key, %endpoint, "Drill-down fetch");

        let changed = match self.fetcher.fetch_records(&request).await {
            Ok(records) => {
                let rows = self.drill_rows(&drill_spec, records);
                self.drill.lock().complete(seq, rows)
            }
            Err(error) => {
                let message = format!("{error:#}");
                warn!(page = %self.spec.name, %key, %message, "Drill-down fetch failed");
                self.drill.lock().fail(seq, message)
            }
        };

        if changed {
            self.bus.publish(EngineEvent::DrillDownChanged);
            self.recompute_snapshot();
        }
        Ok(())
    }

    /// Collapse the drill-down back to the parent view
    pub fn drill_back(&self) {
        self.drill.lock().back();
        self.bus.publish(EngineEvent::DrillDownChanged);
        self.recompute_snapshot();
    }

    /// Aggregate a scoped response into sub-view rows. The scoped request
    /// carried the parent filters, so the server response is authoritative;
    /// a record that omits a parent-bound field is trusted, while one that
    /// carries a contradicting value is dropped. The sub-view can therefore
    /// never show rows outside the parent scope.
    fn drill_rows(&self, drill_spec: &DrillSpec, records: Vec<Record>) -> Vec<AggregateRow> {
        let kept: Vec<Record> = {
            let selection = self.selection.read();
            records
                .into_iter()
                .filter(|record| passes_parent_filters(record, &selection, &self.spec.dimensions))
                .collect()
        };

        let Some(group_field) = self.spec.field_of(drill_spec.group_by) else {
            return Vec::new();
        };
        aggregate(
            &kept,
            drill_spec.group_by,
            group_field,
            None,
            self.spec.drill_metrics(),
        )
    }

    // ===================
    // Views
    // ===================

    /// Current immutable snapshot
    pub fn snapshot(&self) -> Arc<PageSnapshot> {
        Arc::clone(&self.snapshot.read())
    }

    /// Copy of the live filter state
    pub fn selection(&self) -> SelectionState {
        self.selection.read().clone()
    }

    /// Options for a dimension's selector control: the "all" sentinel
    /// first, then the distinct values observed in the primary dataset
    pub fn selector_options(&self, dimension: Dimension) -> Vec<String> {
        let mut options = vec![ALL.to_string()];
        if let (Some(field), Some(primary)) =
            (self.spec.field_of(dimension), self.spec.primary_dataset())
        {
            options.extend(self.store.domain_of(field, &[primary.name.clone()]));
        }
        options
    }

    /// Loaded records of one dataset; auxiliary views read these directly
    pub fn dataset(&self, name: &str) -> Result<Arc<Dataset>, CoreError> {
        self.store.get(name).ok_or_else(|| CoreError::DatasetMissing {
            name: name.to_string(),
        })
    }

    pub fn health(&self) -> PageHealth {
        self.health.read().clone()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.bus.subscribe()
    }

    pub fn spec(&self) -> &PageSpec {
        &self.spec
    }

    pub fn store(&self) -> &Arc<RecordStore> {
        &self.store
    }

    // ===================
    // Internals
    // ===================

    fn next_refresh_seq(&self) -> u64 {
        self.refresh_seq.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Rebuild the snapshot from the store and the live filter state
    fn recompute_snapshot(&self) {
        let snapshot = self.build_snapshot();
        *self.snapshot.write() = Arc::new(snapshot);
        self.bus.publish(EngineEvent::SnapshotUpdated);
    }

    fn build_snapshot(&self) -> PageSnapshot {
        let selection = self.selection.read().clone();

        let filtered = match self
            .spec
            .primary_dataset()
            .and_then(|primary| self.store.get(&primary.name))
        {
            Some(dataset) => filter_records(&dataset, &selection, &self.spec.dimensions),
            None => Vec::new(),
        };

        let aggregate_rows = match self.spec.field_of(self.spec.group_by) {
            Some(group_field) => {
                let series = self
                    .spec
                    .series_by
                    .and_then(|dim| self.spec.field_of(dim).map(|field| (dim, field)));
                aggregate(
                    &filtered,
                    self.spec.group_by,
                    group_field,
                    series,
                    &self.spec.metrics,
                )
            }
            None => Vec::new(),
        };

        let kpis = self
            .spec
            .field_of(Dimension::Period)
            .and_then(|period_field| derive_kpis(&filtered, period_field, &self.spec.kpis));

        let (drill_down, drill_error) = {
            let drill = self.drill.lock();
            (drill.state().clone(), drill.error().map(String::from))
        };

        PageSnapshot {
            filtered_records: filtered,
            aggregate_rows,
            kpis,
            drill_down,
            drill_error,
            loading: self.loading.load(Ordering::SeqCst),
            error: self.page_error.lock().clone(),
            computed_at: Utc::now(),
        }
    }

    /// Derive page health after a fetch cycle. A dataset degrades the page
    /// when it never loaded, or when this cycle's re-fetch failed and the
    /// store still serves the previous records. The primary dataset decides
    /// between unavailable and degraded; the page-level error names every
    /// degraded dataset.
    fn apply_health(&self, report: &FetchReport) {
        let failed = report.failed_sources();
        let degraded: Vec<String> = self
            .spec
            .datasets
            .iter()
            .filter(|dataset| {
                !self.store.contains(&dataset.name) || failed.contains(&dataset.name)
            })
            .map(|dataset| dataset.name.clone())
            .collect();

        let primary_missing = self
            .spec
            .primary_dataset()
            .map(|primary| !self.store.contains(&primary.name))
            .unwrap_or(true);

        let primary_error = self.primary_failure(report);
        let health = if primary_missing {
            PageHealth::Unavailable {
                reason: primary_error
                    .unwrap_or_else(|| "primary dataset never loaded".to_string()),
            }
        } else if degraded.is_empty() {
            PageHealth::Healthy
        } else {
            let names = degraded.join(", ");
            let reason = match primary_error {
                Some(message) => format!("showing previous data ({names}): {message}"),
                None => format!("auxiliary dataset(s) unavailable: {names}"),
            };
            PageHealth::PartialData {
                missing: degraded,
                reason,
            }
        };

        if health.is_degraded() {
            warn!(page = %self.spec.name, ?health, "Page degraded");
        }
        *self.page_error.lock() = match &health {
            PageHealth::Healthy => None,
            PageHealth::PartialData { reason, .. } | PageHealth::Unavailable { reason } => {
                Some(reason.clone())
            }
        };
        *self.health.write() = health;
    }

    /// Message of the primary dataset's failure in this cycle, if any
    fn primary_failure(&self, report: &FetchReport) -> Option<String> {
        let primary = self.spec.primary_dataset()?;
        report
            .errors
            .iter()
            .find(|e| e.severity != ErrorSeverity::Warning && e.source == primary.name)
            .map(|e| e.message.clone())
    }
}

/// Parent-filter consistency check for scoped payloads: bound fields the
/// record carries must agree with the selection; absent fields pass.
fn passes_parent_filters(
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
        if let Some(key) = record.key(&binding.field) {
            if !values.contains(&key) {
                return false;
            }
        }
    }

    if let Some(range) = selection.date_range() {
        if let Some(period_field) = bindings
            .iter()
            .find(|b| b.dimension == Dimension::Period)
            .map(|b| b.field.as_str())
        {
            if let Some(key) = record.key(period_field) {
                if !range.contains(&key) {
                    return false;
                }
            }
        }
    }

    true
}
