//! Record store
//!
//! Holds the datasets fetched for a page, keyed by logical dataset name
//! ("financial", "enrollment", "project-time-entries"). A load replaces the
//! named dataset wholesale and notifies dependents through the event bus;
//! readers receive Arc snapshots and never observe partial mutation.

use crate::error::CoreError;
use crate::event::{EngineEvent, EventBus};
use crate::models::{Dataset, Record};
use dashmap::DashMap;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{info, warn};

pub struct RecordStore {
    datasets: DashMap<String, Arc<Dataset>>,
    bus: EventBus,
}

impl RecordStore {
    pub fn new(bus: EventBus) -> Self {
        Self {
            datasets: DashMap::new(),
            bus,
        }
    }

    /// Replace the named dataset atomically.
    ///
    /// A payload violating `required` is rejected: the store logs, stores an
    /// empty dataset in its place (downstream charts degrade to empty rather
    /// than crash), and returns the rejection so the caller's fetch report
    /// can record it. A `DatasetLoaded` event fires either way because the
    /// stored dataset changed.
    pub fn load(
        &self,
        name: &str,
        records: Vec<Record>,
        required: &[String],
    ) -> Result<usize, CoreError> {
        let dataset = Dataset::new(name, records);
        let (stored, outcome) = match dataset.validate_required(required) {
            Ok(()) => (dataset, Ok(())),
            Err(error) => {
                warn!(dataset = name, %error, "malformed payload, storing empty dataset");
                (Dataset::empty(name), Err(error))
            }
        };

        let count = stored.len();
        info!(dataset = name, records = count, "dataset loaded");
        self.datasets.insert(name.to_string(), Arc::new(stored));
        self.bus.publish(EngineEvent::DatasetLoaded(name.to_string()));

        outcome.map(|()| count)
    }

    /// Snapshot of the named dataset
    pub fn get(&self, name: &str) -> Option<Arc<Dataset>> {
        self.datasets.get(name).map(|entry| Arc::clone(entry.value()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.datasets.contains_key(name)
    }

    pub fn dataset_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.datasets.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    /// Sorted-unique union of a field's values across the named datasets,
    /// used to populate selector option lists. Datasets not currently loaded
    /// contribute nothing.
    pub fn domain_of(&self, field: &str, dataset_names: &[String]) -> Vec<String> {
        let mut domain = BTreeSet::new();
        for name in dataset_names {
            if let Some(dataset) = self.get(name) {
                for record in &dataset.records {
                    if let Some(key) = record.key(field) {
                        domain.insert(key);
                    }
                }
            }
        }
        domain.into_iter().collect()
    }
}

impl Default for RecordStore {
    fn default() -> Self {
        Self::new(EventBus::default_capacity())
    }
}
