//! kpiboard-core - Core library for kpiboard
//!
//! Provides the record store, filter evaluation, grouped aggregation, KPI
//! derivation, and drill-down state behind data-driven dashboard pages.

pub mod aggregate;
pub mod config;
pub mod drilldown;
pub mod error;
pub mod event;
pub mod fetch;
pub mod filter;
pub mod kpi;
pub mod models;
pub mod page;
pub mod selection;
pub mod store;

pub use aggregate::{aggregate, AggregateOp, AggregateRow, MetricSpec};
pub use config::{DatasetSpec, DimensionBinding, DrillSpec, EngineConfig, PageSpec};
pub use drilldown::{DrillDownController, DrillDownScope, DrillDownState};
pub use error::{CoreError, FetchReport, LoadError, PageHealth};
pub use event::{EngineEvent, EventBus};
pub use fetch::{DataFetcher, FetchRequest, HttpFetcher};
pub use filter::{filter_records, record_matches};
pub use kpi::{derive_kpis, percent_change, KpiKind, KpiSpec};
pub use models::{records_from_json, Dataset, FieldValue, Kpi, Record};
pub use page::{PageEngine, PageSnapshot};
pub use selection::{DateRange, Dimension, SelectionState, ALL};
pub use store::RecordStore;
