//! Error types for kpiboard-core
//!
//! Provides the error hierarchy with thiserror for graceful degradation.

use std::path::PathBuf;
use thiserror::Error;

/// Core error type for kpiboard operations
#[derive(Error, Debug)]
pub enum CoreError {
    // ===================
    // Page spec errors
    // ===================
    #[error("Failed to read page spec: {path}")]
    SpecRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse page spec {path}: {message}")]
    SpecParse {
        path: PathBuf,
        message: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Invalid page spec: {message}")]
    InvalidPageSpec { message: String },

    // ===================
    // Payload errors
    // ===================
    #[error("Malformed payload for dataset '{dataset}': {message}")]
    Payload { dataset: String, message: String },

    // ===================
    // Engine errors
    // ===================
    #[error("Dataset not loaded: {name}")]
    DatasetMissing { name: String },

    #[error("Page '{page}' has no drill-down binding")]
    DrillUnsupported { page: String },
}

/// Severity level for errors during fetch/load
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorSeverity {
    /// Non-critical, can continue with degraded functionality
    Warning,
    /// Significant but not fatal
    Error,
    /// Cannot continue
    Fatal,
}

/// Individual error entry in a fetch report
#[derive(Debug, Clone)]
pub struct LoadError {
    pub source: String,
    pub message: String,
    pub severity: ErrorSeverity,
    /// Actionable suggestion for user (optional)
    pub suggestion: Option<String>,
}

impl LoadError {
    pub fn warning(source: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            message: message.into(),
            severity: ErrorSeverity::Warning,
            suggestion: None,
        }
    }

    pub fn error(source: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            message: message.into(),
            severity: ErrorSeverity::Error,
            suggestion: None,
        }
    }

    pub fn fatal(source: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            message: message.into(),
            severity: ErrorSeverity::Fatal,
            suggestion: None,
        }
    }

    /// Add an actionable suggestion to this error
    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestion = Some(suggestion.into());
        self
    }

    /// Create user-friendly error from CoreError with context-aware suggestions
    pub fn from_core_error(source: impl Into<String>, error: &CoreError) -> Self {
        let source = source.into();
        let (message, suggestion) = match error {
            CoreError::SpecRead { path, .. } => (
                format!("Cannot read page spec: {}", path.display()),
                Some(format!("Check the file exists: ls {}", path.display())),
            ),
            CoreError::Payload { dataset, message } => (
                format!("Malformed payload for '{dataset}': {message}"),
                Some("Expected a JSON array of records or an object keyed by id".to_string()),
            ),
            CoreError::DatasetMissing { name } => (
                format!("Dataset not loaded: {name}"),
                Some("Verify the dataset name against the page spec".to_string()),
            ),
            _ => (error.to_string(), None),
        };

        Self {
            source,
            message,
            severity: ErrorSeverity::Error,
            suggestion,
        }
    }
}

/// Report of errors encountered while fetching a page's datasets
///
/// Enables graceful degradation by tracking partial failures
/// instead of failing the whole page on any error.
#[derive(Debug, Default)]
pub struct FetchReport {
    pub errors: Vec<LoadError>,
    pub datasets_loaded: usize,
    pub datasets_failed: usize,
    pub records_loaded: usize,
}

impl FetchReport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_error(&mut self, error: LoadError) {
        self.errors.push(error);
    }

    pub fn add_warning(&mut self, source: impl Into<String>, message: impl Into<String>) {
        self.errors.push(LoadError::warning(source, message));
    }

    pub fn add_fatal(&mut self, source: impl Into<String>, message: impl Into<String>) {
        self.errors.push(LoadError::fatal(source, message));
    }

    /// Returns true if there are any fatal errors
    pub fn has_fatal_errors(&self) -> bool {
        self.errors
            .iter()
            .any(|e| e.severity == ErrorSeverity::Fatal)
    }

    /// Returns true if there are any errors (including warnings)
    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    /// Returns only warnings
    pub fn warnings(&self) -> impl Iterator<Item = &LoadError> {
        self.errors
            .iter()
            .filter(|e| e.severity == ErrorSeverity::Warning)
    }

    /// Names of the datasets that failed (error severity or above)
    pub fn failed_sources(&self) -> Vec<String> {
        self.errors
            .iter()
            .filter(|e| e.severity != ErrorSeverity::Warning)
            .map(|e| e.source.clone())
            .collect()
    }

    /// Returns count by severity
    pub fn error_count(&self) -> (usize, usize, usize) {
        let warnings = self
            .errors
            .iter()
            .filter(|e| e.severity == ErrorSeverity::Warning)
            .count();
        let errors = self
            .errors
            .iter()
            .filter(|e| e.severity == ErrorSeverity::Error)
            .count();
        let fatal = self
            .errors
            .iter()
            .filter(|e| e.severity == ErrorSeverity::Fatal)
            .count();
        (warnings, errors, fatal)
    }

    /// Merge another report into this one
    pub fn merge(&mut self, other: FetchReport) {
        self.errors.extend(other.errors);
        self.datasets_loaded += other.datasets_loaded;
        self.datasets_failed += other.datasets_failed;
        self.records_loaded += other.records_loaded;
    }
}

/// Health indicator for a page after its last fetch cycle
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PageHealth {
    /// Every dataset loaded successfully
    Healthy,
    /// Some datasets missing but the page can render partial charts
    PartialData {
        missing: Vec<String>,
        reason: String,
    },
    /// Nothing loaded; the page has no data to show
    Unavailable { reason: String },
}

impl PageHealth {
    pub fn is_healthy(&self) -> bool {
        matches!(self, PageHealth::Healthy)
    }

    pub fn is_degraded(&self) -> bool {
        !self.is_healthy()
    }
}
