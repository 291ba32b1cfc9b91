//! End-to-end page engine flows over a scripted fetcher
//!
//! Drives a consulting-hours page (time entries plus a pre-computed
//! seasonal summary) through mount, filter changes, drill-down, and
//! failure cycles, asserting on the snapshots and requests the engine
//! produces.

use async_trait::async_trait;
use kpiboard_core::{
    CoreError, DataFetcher, Dimension, DrillDownState, EngineConfig, EngineEvent, FetchRequest,
    PageEngine, PageHealth, PageSpec, Record,
};
use parking_lot::Mutex;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;

const PROJECT_PAGE: &str = r#"{
    "name": "project-overview",
    "datasets": [
        {
            "name": "entries",
            "endpoint": "/api/project-data",
            "requiredFields": ["customer_name", "worked_date"],
            "primary": true
        },
        {
            "name": "seasonal",
            "endpoint": "/api/seasonal-analysis/summary",
            "selectionScoped": false
        }
    ],
    "dimensions": [
        {"dimension": "entity", "field": "customer_name", "param": "customers"},
        {"dimension": "period", "field": "worked_date", "param": "dates"},
        {"dimension": "category", "field": "customer_category", "param": "categories"}
    ],
    "groupBy": "entity",
    "metrics": [
        {"name": "revenue", "field": "revenue"},
        {"name": "hours", "field": "hours"}
    ],
    "kpis": [
        {"label": "Total revenue", "field": "revenue"},
        {"label": "Blended rate", "field": "revenue", "kind": {"perUnit": {"denominatorField": "hours"}}}
    ],
    "drill": {
        "dimension": "category",
        "param": "category",
        "endpoint": "/api/customers-in-category",
        "groupBy": "entity"
    }
}"#;

const ENTRIES: &str = "/api/project-data";
const SEASONAL: &str = "/api/seasonal-analysis/summary";
const DRILL: &str = "/api/customers-in-category";

fn entry(customer: &str, date: &str, category: &str, revenue: f64, hours: f64) -> Record {
    Record::new()
        .with("customer_name", customer)
        .with("worked_date", date)
        .with("customer_category", category)
        .with("revenue", revenue)
        .with("hours", hours)
}

fn project_entries() -> Vec<Record> {
    vec![
        entry("UBC", "2024-03-04", "Universities", 4800.0, 32.0),
        entry("UBC", "2024-04-02", "Universities", 5200.0, 40.0),
        entry("Hootsuite", "2024-03-11", "Tech", 6100.0, 41.0),
        entry("Hootsuite", "2024-04-08", "Tech", 5900.0, 38.0),
        entry("SFU", "2024-04-15", "Universities", 3500.0, 25.0),
    ]
}

fn seasonal_summary() -> Vec<Record> {
    vec![
        Record::new().with("month", "2024-03").with("total_revenue", 10900.0),
        Record::new().with("month", "2024-04").with("total_revenue", 14600.0),
    ]
}

fn concrete(values: &[&str]) -> BTreeSet<String> {
    values.iter().map(|v| v.to_string()).collect()
}

/// One request shape the fetcher should park until released
struct Hold {
    param: String,
    value: String,
    gate: Arc<Notify>,
}

/// Scripted per-endpoint fetcher with failure injection and a request log
struct MockFetcher {
    responses: Mutex<HashMap<String, Vec<Record>>>,
    failing: Mutex<HashSet<String>>,
    log: Mutex<Vec<FetchRequest>>,
    hold: Mutex<Option<Hold>>,
}

impl MockFetcher {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            responses: Mutex::new(HashMap::new()),
            failing: Mutex::new(HashSet::new()),
            log: Mutex::new(Vec::new()),
            hold: Mutex::new(None),
        })
    }

    fn respond(&self, endpoint: &str, records: Vec<Record>) {
        self.responses.lock().insert(endpoint.to_string(), records);
    }

    fn fail_endpoint(&self, endpoint: &str) {
        self.failing.lock().insert(endpoint.to_string());
    }

    fn recover_endpoint(&self, endpoint: &str) {
        self.failing.lock().remove(endpoint);
    }

    /// Park any request carrying `param=value` until the returned gate is
    /// notified
    fn hold_when(&self, param: &str, value: &str) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        *self.hold.lock() = Some(Hold {
            param: param.to_string(),
            value: value.to_string(),
            gate: Arc::clone(&gate),
        });
        gate
    }

    fn requests_to(&self, endpoint: &str) -> Vec<FetchRequest> {
        self.log
            .lock()
            .iter()
            .filter(|r| r.endpoint == endpoint)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl DataFetcher for MockFetcher {
    async fn fetch_records(&self, request: &FetchRequest) -> anyhow::Result<Vec<Record>> {
        self.log.lock().push(request.clone());

        if self.failing.lock().contains(&request.endpoint) {
            anyhow::bail!("HTTP 500 from {}", request.endpoint);
        }

        // Capture the scripted payload before parking; a held request must
        // return what the server had when it started
        let payload = self
            .responses
            .lock()
            .get(&request.endpoint)
            .cloned()
            .unwrap_or_default();

        let gate = {
            let hold = self.hold.lock();
            hold.as_ref()
                .filter(|h| request.param(&h.param) == Some(h.value.as_str()))
                .map(|h| Arc::clone(&h.gate))
        };
        if let Some(gate) = gate {
            gate.notified().await;
        }

        Ok(payload)
    }
}

fn project_engine(fetcher: Arc<MockFetcher>) -> PageEngine {
    fetcher.respond(ENTRIES, project_entries());
    fetcher.respond(SEASONAL, seasonal_summary());
    PageEngine::new(
        PageSpec::from_json_str(PROJECT_PAGE).unwrap(),
        &EngineConfig::default(),
        fetcher,
    )
    .unwrap()
}

async fn wait_until(mut condition: impl FnMut() -> bool) {
    for _ in 0..200 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("condition not reached within 1s");
}

// ============ Mount ============

#[tokio::test]
async fn test_mount_loads_every_dataset_and_renders() {
    let fetcher = MockFetcher::new();
    let engine = project_engine(Arc::clone(&fetcher));

    let report = engine.initial_load().await;
    assert_eq!(report.datasets_loaded, 2);
    assert_eq!(report.records_loaded, 7);
    assert!(!report.has_errors());
    assert!(engine.health().is_healthy());

    let snapshot = engine.snapshot();
    assert_eq!(snapshot.filtered_records.len(), 5);
    assert!(!snapshot.loading);

    // Grouped by entity, alphabetical
    let rows = &snapshot.aggregate_rows;
    assert_eq!(rows.len(), 3);
    assert_eq!(rows[0].key, "Hootsuite");
    assert_eq!(rows[0].value("revenue"), 12000.0);
    assert_eq!(rows[0].value("hours"), 79.0);
    assert_eq!(rows[1].key, "SFU");
    assert_eq!(rows[2].key, "UBC");
    assert_eq!(rows[2].value("revenue"), 10000.0);

    let kpis = snapshot.kpis.as_ref().expect("history spans two periods");
    assert_eq!(kpis[0].label, "Total revenue");
    assert_eq!(kpis[1].label, "Blended rate");

    // The auxiliary dataset is readable alongside the pipeline
    assert_eq!(engine.dataset("seasonal").unwrap().len(), 2);

    // The unrestricted mount sends no filter parameters
    let initial_requests = fetcher.requests_to(ENTRIES);
    assert_eq!(initial_requests.len(), 1);
    assert!(initial_requests[0].params.is_empty());
    assert_eq!(fetcher.requests_to(SEASONAL).len(), 1);
}

#[tokio::test]
async fn test_events_reach_the_rendering_layer() {
    let fetcher = MockFetcher::new();
    let engine = project_engine(fetcher);
    let mut rx = engine.subscribe();

    engine.initial_load().await;

    let mut saw_dataset_loaded = false;
    let mut saw_snapshot = false;
    loop {
        let event = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .expect("event stream stalled")
            .expect("bus closed");
        match event {
            EngineEvent::DatasetLoaded(_) => saw_dataset_loaded = true,
            EngineEvent::SnapshotUpdated => saw_snapshot = true,
            EngineEvent::RefreshCompleted => break,
            _ => {}
        }
    }
    assert!(saw_dataset_loaded);
    assert!(saw_snapshot);
}

// ============ Filter interactions ============

#[tokio::test]
async fn test_filter_change_refetches_with_reduced_params() {
    let fetcher = MockFetcher::new();
    let engine = project_engine(Arc::clone(&fetcher));
    engine.initial_load().await;

    engine
        .set_selection(Dimension::Category, concrete(&["Universities"]))
        .await;

    // Only the scoped dataset is re-fetched, carrying the concrete
    // selection and omitting the unrestricted dimensions
    let requests = fetcher.requests_to(ENTRIES);
    assert_eq!(requests.len(), 2);
    let refetch = &requests[1];
    assert_eq!(refetch.param("categories"), Some("Universities"));
    assert_eq!(refetch.param("customers"), None);
    assert_eq!(refetch.param("dates"), None);
    assert_eq!(fetcher.requests_to(SEASONAL).len(), 1);

    let snapshot = engine.snapshot();
    assert_eq!(snapshot.filtered_records.len(), 3);
    let keys: Vec<&str> = snapshot.aggregate_rows.iter().map(|r| r.key.as_str()).collect();
    assert_eq!(keys, vec!["SFU", "UBC"]);
}

#[tokio::test]
async fn test_date_range_rides_on_the_refetch() {
    let fetcher = MockFetcher::new();
    let engine = project_engine(Arc::clone(&fetcher));
    engine.initial_load().await;

    engine.set_date_range("2024-04-01", "2024-04-30").await;

    let requests = fetcher.requests_to(ENTRIES);
    let refetch = requests.last().unwrap();
    assert_eq!(refetch.param("startDate"), Some("2024-04-01"));
    assert_eq!(refetch.param("endDate"), Some("2024-04-30"));

    // Inclusive interval, applied client-side as well
    let snapshot = engine.snapshot();
    assert_eq!(snapshot.filtered_records.len(), 3);
    assert!(snapshot
        .filtered_records
        .iter()
        .all(|r| r.text("worked_date").unwrap() >= "2024-04-01"));
}

#[tokio::test]
async fn test_reset_restores_the_unfiltered_view() {
    let fetcher = MockFetcher::new();
    let engine = project_engine(Arc::clone(&fetcher));
    engine.initial_load().await;

    engine
        .set_selection(Dimension::Entity, concrete(&["UBC"]))
        .await;
    engine.set_date_range("2024-03-01", "2024-03-31").await;
    engine.reset_filters().await;

    let snapshot = engine.snapshot();
    assert_eq!(snapshot.filtered_records.len(), 5);
    let last = fetcher.requests_to(ENTRIES);
    assert!(last.last().unwrap().params.is_empty());
}

// ============ Drill-down ============

#[tokio::test]
async fn test_drill_down_expands_with_scoped_rows() {
    let fetcher = MockFetcher::new();
    let engine = project_engine(Arc::clone(&fetcher));
    fetcher.respond(
        DRILL,
        vec![
            entry("UBC", "2024-04-02", "Universities", 10000.0, 72.0),
            entry("SFU", "2024-04-15", "Universities", 3500.0, 25.0),
        ],
    );
    engine.initial_load().await;

    engine.drill_click("Universities").await.unwrap();

    let scoped = fetcher.requests_to(DRILL);
    assert_eq!(scoped.len(), 1);
    assert_eq!(scoped[0].param("category"), Some("Universities"));

    let snapshot = engine.snapshot();
    match &snapshot.drill_down {
        DrillDownState::Expanded { scope, rows } => {
            assert_eq!(scope.key, "Universities");
            let keys: Vec<&str> = rows.iter().map(|r| r.key.as_str()).collect();
            assert_eq!(keys, vec!["SFU", "UBC"]);
            assert_eq!(rows[1].value("revenue"), 10000.0);
        }
        other => panic!("expected Expanded, got {other:?}"),
    }

    // Re-clicking the same point folds the view back without a fetch
    engine.drill_click("Universities").await.unwrap();
    assert_eq!(fetcher.requests_to(DRILL).len(), 1);
    assert!(matches!(
        engine.snapshot().drill_down,
        DrillDownState::Collapsed
    ));
}

#[tokio::test]
async fn test_drill_failure_leaves_the_page_intact() {
    let fetcher = MockFetcher::new();
    let engine = project_engine(Arc::clone(&fetcher));
    engine.initial_load().await;
    fetcher.fail_endpoint(DRILL);

    engine.drill_click("Tech").await.unwrap();

    let snapshot = engine.snapshot();
    assert!(matches!(snapshot.drill_down, DrillDownState::Collapsed));
    assert!(snapshot.drill_error.as_deref().unwrap().contains("HTTP 500"));

    // The failure stays scoped to the chart
    assert_eq!(snapshot.filtered_records.len(), 5);
    assert_eq!(snapshot.error, None);
    assert!(engine.health().is_healthy());
}

#[tokio::test]
async fn test_filter_change_collapses_an_expanded_drill_down() {
    let fetcher = MockFetcher::new();
    let engine = project_engine(Arc::clone(&fetcher));
    fetcher.respond(
        DRILL,
        vec![entry("UBC", "2024-04-02", "Universities", 10000.0, 72.0)],
    );
    engine.initial_load().await;

    engine.drill_click("Universities").await.unwrap();
    assert!(matches!(
        engine.snapshot().drill_down,
        DrillDownState::Expanded { .. }
    ));

    engine
        .set_selection(Dimension::Entity, concrete(&["Hootsuite"]))
        .await;

    let snapshot = engine.snapshot();
    assert!(matches!(snapshot.drill_down, DrillDownState::Collapsed));
    assert_eq!(snapshot.drill_error, None);
}

#[tokio::test]
async fn test_scoped_rows_never_contradict_the_parent_filters() {
    let fetcher = MockFetcher::new();
    let engine = project_engine(Arc::clone(&fetcher));
    // The scoped payload smuggles in a record from another category
    fetcher.respond(
        DRILL,
        vec![
            entry("UBC", "2024-04-02", "Universities", 10000.0, 72.0),
            entry("SFU", "2024-04-15", "Universities", 3500.0, 25.0),
            entry("Hootsuite", "2024-04-08", "Tech", 12000.0, 79.0),
        ],
    );
    engine.initial_load().await;

    engine
        .set_selection(Dimension::Category, concrete(&["Universities"]))
        .await;
    engine.drill_click("Universities").await.unwrap();

    match &engine.snapshot().drill_down {
        DrillDownState::Expanded { rows, .. } => {
            let keys: Vec<&str> = rows.iter().map(|r| r.key.as_str()).collect();
            assert_eq!(keys, vec!["SFU", "UBC"], "the Tech record must be dropped");
        }
        other => panic!("expected Expanded, got {other:?}"),
    }
}

// ============ Degradation ============

#[tokio::test]
async fn test_auxiliary_failure_degrades_to_partial_data() {
    let fetcher = MockFetcher::new();
    let engine = project_engine(Arc::clone(&fetcher));
    fetcher.fail_endpoint(SEASONAL);

    let report = engine.initial_load().await;
    assert_eq!(report.datasets_loaded, 1);
    assert_eq!(report.datasets_failed, 1);

    match engine.health() {
        PageHealth::PartialData { missing, .. } => assert_eq!(missing, vec!["seasonal"]),
        other => panic!("expected PartialData, got {other:?}"),
    }
    assert!(matches!(
        engine.dataset("seasonal"),
        Err(CoreError::DatasetMissing { .. })
    ));

    // The primary pipeline still renders; the page-level error names the
    // failed dataset
    let snapshot = engine.snapshot();
    assert_eq!(snapshot.filtered_records.len(), 5);
    assert!(snapshot.error.as_deref().unwrap().contains("seasonal"));
}

#[tokio::test]
async fn test_aux_refetch_failure_degrades_to_partial_data() {
    // Unlike the pre-computed summary above, this page re-fetches its
    // auxiliary dataset on every selection change
    const LIVE_SUMMARY_PAGE: &str = r#"{
        "name": "project-live-summary",
        "datasets": [
            {"name": "entries", "endpoint": "/api/project-data", "primary": true},
            {"name": "seasonal", "endpoint": "/api/seasonal-analysis/summary"}
        ],
        "dimensions": [
            {"dimension": "entity", "field": "customer_name", "param": "customers"},
            {"dimension": "period", "field": "worked_date", "param": "dates"}
        ],
        "groupBy": "entity",
        "metrics": [{"name": "revenue", "field": "revenue"}],
        "kpis": [{"label": "Total revenue", "field": "revenue"}]
    }"#;

    let fetcher = MockFetcher::new();
    fetcher.respond(ENTRIES, project_entries());
    fetcher.respond(SEASONAL, seasonal_summary());
    let engine = PageEngine::new(
        PageSpec::from_json_str(LIVE_SUMMARY_PAGE).unwrap(),
        &EngineConfig::default(),
        fetcher.clone(),
    )
    .unwrap();

    engine.initial_load().await;
    assert!(engine.health().is_healthy());

    // The summary endpoint starts refusing; the selection change
    // re-fetches both scoped datasets
    fetcher.fail_endpoint(SEASONAL);
    engine
        .set_selection(Dimension::Entity, concrete(&["UBC"]))
        .await;

    match engine.health() {
        PageHealth::PartialData { missing, reason } => {
            assert_eq!(missing, vec!["seasonal"]);
            assert!(reason.contains("seasonal"));
        }
        other => panic!("expected PartialData, got {other:?}"),
    }

    // The stale summary stays readable, the page-level error reports the
    // failure, and the primary narrowed normally
    assert_eq!(engine.dataset("seasonal").unwrap().len(), 2);
    let snapshot = engine.snapshot();
    assert!(snapshot.error.as_deref().unwrap().contains("seasonal"));
    assert_eq!(snapshot.filtered_records.len(), 2);

    // The next successful cycle clears the degradation
    fetcher.recover_endpoint(SEASONAL);
    engine
        .set_selection(Dimension::Entity, concrete(&["SFU"]))
        .await;
    assert!(engine.health().is_healthy());
    assert_eq!(engine.snapshot().error, None);
}

#[tokio::test]
async fn test_primary_failure_on_mount_is_unavailable() {
    let fetcher = MockFetcher::new();
    let engine = project_engine(Arc::clone(&fetcher));
    fetcher.fail_endpoint(ENTRIES);

    engine.initial_load().await;

    assert!(matches!(engine.health(), PageHealth::Unavailable { .. }));
    let snapshot = engine.snapshot();
    assert!(snapshot.error.as_deref().unwrap().contains("HTTP 500"));
    assert!(snapshot.filtered_records.is_empty());
}

// ============ Stale responses ============

#[tokio::test]
async fn test_superseded_selection_fetch_is_discarded() {
    let fetcher = MockFetcher::new();
    let engine = Arc::new(project_engine(Arc::clone(&fetcher)));

    let batch_one: Vec<Record> = project_entries()
        .into_iter()
        .map(|r| r.with("batch", 1.0))
        .collect();
    fetcher.respond(ENTRIES, batch_one);
    engine.initial_load().await;

    // Park the UBC refetch mid-flight
    let gate = fetcher.hold_when("customers", "UBC");
    let slow = tokio::spawn({
        let engine = Arc::clone(&engine);
        async move {
            engine
                .set_selection(Dimension::Entity, concrete(&["UBC"]))
                .await;
        }
    });
    {
        let fetcher = Arc::clone(&fetcher);
        wait_until(move || fetcher.requests_to(ENTRIES).len() == 2).await;
    }

    // A newer interaction supersedes the parked request
    fetcher.respond(
        ENTRIES,
        vec![entry("SFU", "2024-04-15", "Universities", 3500.0, 25.0).with("batch", 2.0)],
    );
    engine
        .set_selection(Dimension::Entity, concrete(&["SFU"]))
        .await;

    gate.notify_one();
    slow.await.unwrap();

    // The parked response must not reach the store or the view
    let stored = engine.dataset("entries").unwrap();
    assert!(stored.records.iter().all(|r| r.number("batch") == 2.0));

    let snapshot = engine.snapshot();
    assert_eq!(snapshot.filtered_records.len(), 1);
    assert_eq!(
        snapshot.filtered_records[0].text("customer_name"),
        Some("SFU")
    );
}
