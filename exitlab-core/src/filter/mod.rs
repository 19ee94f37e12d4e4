//! Quality gates over sweep results.
//!
//! The chain always runs [`InvalidMetricsFilter`] then [`MinimumsFilter`].
//! Stages accept any [`RecordSet`] representation and return the same
//! representation; a polars frame is filtered through a boolean mask so its
//! column dtypes are untouched.

mod invalid_metrics;
mod minimums;

use std::collections::BTreeMap;

use polars::prelude::*;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::schema::{PortfolioRecord, RawRecord};

pub use invalid_metrics::{InvalidMetricsFilter, REQUIRED_METRICS};
pub use minimums::{FilterConfig, MinimumsFilter, MINIMUM_RULES};

#[derive(Debug, Error)]
pub enum FilterError {
    #[error("frame filter failed: {0}")]
    Frame(#[from] PolarsError),
}

/// Rows handed to the filter chain.
#[derive(Debug, Clone)]
pub enum RecordSet {
    Records(Vec<PortfolioRecord>),
    Rows(Vec<RawRecord>),
    Frame(DataFrame),
}

impl RecordSet {
    pub fn len(&self) -> usize {
        match self {
            RecordSet::Records(records) => records.len(),
            RecordSet::Rows(rows) => rows.len(),
            RecordSet::Frame(df) => df.height(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether any row carries `column`.
    pub fn has_column(&self, column: &str) -> bool {
        match self {
            RecordSet::Records(records) => records.iter().any(|r| r.shape().contains(column)),
            RecordSet::Rows(rows) => rows.iter().any(|row| row.contains_key(column)),
            RecordSet::Frame(df) => df.column(column).is_ok(),
        }
    }

    /// Numeric view of one column, row-aligned. `None` where the row lacks
    /// the column or the value is not numeric.
    pub fn numeric_column(&self, column: &str) -> Result<Vec<Option<f64>>, FilterError> {
        Ok(match self {
            RecordSet::Records(records) => records
                .iter()
                .map(|r| r.get(column).and_then(|v| v.as_f64()))
                .collect(),
            RecordSet::Rows(rows) => rows
                .iter()
                .map(|row| row.get(column).and_then(|v| v.as_f64()))
                .collect(),
            RecordSet::Frame(df) => match df.column(column) {
                Ok(col) => {
                    let cast = col.cast(&DataType::Float64)?;
                    cast.f64()?.into_iter().collect()
                }
                Err(_) => vec![None; df.height()],
            },
        })
    }

    /// Keep rows whose mask entry is true.
    pub fn retain_mask(self, mask: &[bool]) -> Result<RecordSet, FilterError> {
        Ok(match self {
            RecordSet::Records(records) => RecordSet::Records(
                records
                    .into_iter()
                    .zip(mask)
                    .filter_map(|(r, keep)| keep.then_some(r))
                    .collect(),
            ),
            RecordSet::Rows(rows) => RecordSet::Rows(
                rows.into_iter()
                    .zip(mask)
                    .filter_map(|(row, keep)| keep.then_some(row))
                    .collect(),
            ),
            RecordSet::Frame(df) => {
                let mask = BooleanChunked::from_slice("mask".into(), mask);
                RecordSet::Frame(df.filter(&mask)?)
            }
        })
    }

    pub fn into_records(self) -> Option<Vec<PortfolioRecord>> {
        match self {
            RecordSet::Records(records) => Some(records),
            _ => None,
        }
    }
}

/// One quality gate. Stages are pure and idempotent.
pub trait FilterStage: Send + Sync {
    fn name(&self) -> &'static str;

    fn apply(&self, input: RecordSet) -> Result<RecordSet, FilterError>;
}

/// Run a stage and log row counts around it.
fn run_stage(stage: &dyn FilterStage, input: RecordSet) -> Result<RecordSet, FilterError> {
    let before = input.len();
    let output = stage.apply(input)?;
    debug!(
        stage = stage.name(),
        before,
        after = output.len(),
        "filter stage complete"
    );
    Ok(output)
}

/// InvalidMetrics then Minimums.
#[derive(Debug, Clone, Default)]
pub struct FilterChain {
    invalid: InvalidMetricsFilter,
    minimums: MinimumsFilter,
}

impl FilterChain {
    /// Chain with minimum thresholds keyed by rule (`WIN_RATE`, `TRADES`, ...).
    pub fn new(minimums: &BTreeMap<String, f64>) -> Self {
        Self {
            invalid: InvalidMetricsFilter,
            minimums: MinimumsFilter::from_thresholds(minimums),
        }
    }

    pub fn minimums(&self) -> &MinimumsFilter {
        &self.minimums
    }

    pub fn apply(&self, input: RecordSet) -> Result<RecordSet, FilterError> {
        let before = input.len();
        let valid = run_stage(&self.invalid, input)?;
        if valid.is_empty() {
            info!(before, "no rows with valid metrics, skipping remaining filters");
            return Ok(valid);
        }
        let output = run_stage(&self.minimums, valid)?;
        info!(before, after = output.len(), "filter chain complete");
        Ok(output)
    }

    /// Filter typed records. Record sets never go through polars, so this
    /// cannot fail.
    pub fn apply_records(&self, records: Vec<PortfolioRecord>) -> Vec<PortfolioRecord> {
        match self.apply(RecordSet::Records(records)) {
            Ok(RecordSet::Records(kept)) => kept,
            Ok(_) => Vec::new(),
            Err(e) => {
                warn!(error = %e, "filter chain failed on records");
                Vec::new()
            }
        }
    }
}
