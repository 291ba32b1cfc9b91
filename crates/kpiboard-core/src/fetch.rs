//! Data fetch plumbing
//!
//! Builds dashboard API requests from the active selection and executes
//! them over HTTP. Fetching sits behind the [`DataFetcher`] trait so engine
//! flows can be driven by scripted sources in tests.

use crate::config::{DimensionBinding, EngineConfig};
use crate::models::{records_from_json, Record};
use crate::selection::{SelectionState, ALL};
use anyhow::{Context, Result};
use async_trait::async_trait;

/// One outgoing dashboard API request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchRequest {
    /// Path under the API base URL (e.g. `/api/project-time-entries`)
    pub endpoint: String,
    /// Query parameters, already reduced per the omission rules
    pub params: Vec<(String, String)>,
}

impl FetchRequest {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            params: Vec::new(),
        }
    }

    /// Build the query for `endpoint` from the active selection.
    ///
    /// A dimension whose selection contains the "all" sentinel contributes
    /// no parameter at all (the backend treats absence as unfiltered);
    /// concrete selections are comma-joined under the binding's parameter
    /// name. An active date range rides along as `startDate`/`endDate`.
    pub fn for_selection(
        endpoint: &str,
        selection: &SelectionState,
        bindings: &[DimensionBinding],
    ) -> Self {
        let mut params = Vec::new();

        for binding in bindings {
            let Some(values) = selection.selected(binding.dimension) else {
                continue;
            };
            if values.contains(ALL) {
                continue;
            }
            let joined = values.iter().cloned().collect::<Vec<_>>().join(",");
            params.push((binding.param.clone(), joined));
        }

        if let Some(range) = selection.date_range() {
            params.push(("startDate".to_string(), range.start.clone()));
            params.push(("endDate".to_string(), range.end.clone()));
        }

        Self {
            endpoint: endpoint.to_string(),
            params,
        }
    }

    /// Same query as [`FetchRequest::for_selection`] with the drill-down
    /// key pinned on top
    pub fn scoped(
        endpoint: &str,
        selection: &SelectionState,
        bindings: &[DimensionBinding],
        param: &str,
        key: &str,
    ) -> Self {
        let mut request = Self::for_selection(endpoint, selection, bindings);
        request.params.push((param.to_string(), key.to_string()));
        request
    }

    /// First value carried under `name`, if any
    pub fn param(&self, name: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }
}

/// Source of dashboard records, one call per dataset request
#[async_trait]
pub trait DataFetcher: Send + Sync {
    /// Fetch and decode the records behind one request
    async fn fetch_records(&self, request: &FetchRequest) -> Result<Vec<Record>>;
}

/// HTTP implementation backed by the dashboard's JSON API
pub struct HttpFetcher {
    client: reqwest::Client,
    base_url: String,
}

impl HttpFetcher {
    /// Build a client honoring the configured request timeout
    pub fn new(config: &EngineConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl DataFetcher for HttpFetcher {
    async fn fetch_records(&self, request: &FetchRequest) -> Result<Vec<Record>> {
        let url = format!("{}{}", self.base_url, request.endpoint);
        tracing::debug!(%url, params = request.params.len(), "Fetching dataset");

        let response = self
            .client
            .get(&url)
            .query(&request.params)
            .send()
            .await
            .with_context(|| format!("Failed to fetch {url}"))?
            .error_for_status()
            .with_context(|| format!("Server rejected {url}"))?;

        let payload: serde_json::Value = response
            .json()
            .await
            .with_context(|| format!("Failed to decode JSON from {url}"))?;

        let records = records_from_json(&request.endpoint, &payload)?;
        tracing::debug!(%url, records = records.len(), "Dataset fetched");

        Ok(records)
    }
}
