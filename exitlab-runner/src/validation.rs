//! Post-sweep sanity checks on the final record set.

use std::collections::HashSet;

use exitlab_core::schema::{validate_schema, FieldValue, PortfolioRecord, SchemaShape};
use serde::{Deserialize, Serialize};

use crate::config::ValidationConfig;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SweepValidation {
    pub is_valid: bool,
    pub errors: Vec<String>,
}

impl SweepValidation {
    pub fn failed(reason: impl Into<String>) -> Self {
        Self {
            is_valid: false,
            errors: vec![reason.into()],
        }
    }

    fn from_errors(errors: Vec<String>) -> Self {
        Self {
            is_valid: errors.is_empty(),
            errors,
        }
    }
}

/// Check a sweep's records:
///
/// - the set is non-empty
/// - the first `sample_size` records conform to `shape`
/// - the first `tag_sample_size` records carry every tag column
/// - above `diversity_threshold` records, the tag columns take at least
///   `min_distinct_combinations` distinct value tuples
pub fn validate_sweep_results(
    records: &[PortfolioRecord],
    shape: SchemaShape,
    tag_columns: &[&str],
    config: &ValidationConfig,
) -> SweepValidation {
    if records.is_empty() {
        return SweepValidation::failed("sweep produced no results");
    }

    let mut errors = Vec::new();
    for (i, record) in records.iter().take(config.sample_size).enumerate() {
        let check = validate_schema(&record.to_raw(), shape);
        if !check.is_valid {
            errors.push(format!("record {i}: {}", check.errors.join("; ")));
        }
    }

    for (i, record) in records.iter().take(config.tag_sample_size).enumerate() {
        for column in tag_columns {
            if record.get(column).map_or(true, |v| v.is_null()) {
                errors.push(format!("record {i}: tag column '{column}' is missing"));
            }
        }
    }

    if records.len() > config.diversity_threshold && !tag_columns.is_empty() {
        let distinct: HashSet<Vec<String>> = records
            .iter()
            .map(|record| {
                tag_columns
                    .iter()
                    .map(|column| record.get(column).unwrap_or(FieldValue::Null).to_cell())
                    .collect()
            })
            .collect();
        if distinct.len() < config.min_distinct_combinations {
            errors.push(format!(
                "only {} distinct parameter combinations across {} results (need {})",
                distinct.len(),
                records.len(),
                config.min_distinct_combinations
            ));
        }
    }

    SweepValidation::from_errors(errors)
}
