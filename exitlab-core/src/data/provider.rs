//! Price data source trait and structured error types.
//!
//! Sources are injected into the sweep executor so that tests can supply
//! fixed tables and production code can wrap any market data backend.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::table::PriceTable;

/// What to fetch for a subject.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DataRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start: Option<NaiveDate>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end: Option<NaiveDate>,
    /// Bar interval understood by the source, e.g. `1d`.
    pub interval: String,
}

impl Default for DataRequest {
    fn default() -> Self {
        Self {
            start: None,
            end: None,
            interval: "1d".into(),
        }
    }
}

/// A successful fetch.
#[derive(Debug, Clone)]
pub struct PriceFetch {
    pub table: PriceTable,
    /// Canonical subject name when the source rewrote the requested one
    /// (e.g. `BTC` resolved to `BTC-USD`).
    pub resolved_subject: Option<String>,
}

impl PriceFetch {
    pub fn new(table: PriceTable) -> Self {
        Self {
            table,
            resolved_subject: None,
        }
    }
}

#[derive(Debug, Error)]
pub enum DataError {
    #[error("subject not found: {subject}")]
    SubjectNotFound { subject: String },

    #[error("invalid date range: {0}")]
    InvalidRange(String),

    #[error("price source failed: {0}")]
    Source(String),
}

/// Fetches price history for one subject.
pub trait PriceDataSource: Send + Sync {
    fn name(&self) -> &str;

    /// `Ok(None)` when the source has no data for the subject.
    fn fetch(&self, subject: &str, request: &DataRequest) -> Result<Option<PriceFetch>, DataError>;
}
