use super::{FilterError, FilterStage, RecordSet};
use crate::schema::{EXPECTANCY_PER_TRADE, PROFIT_FACTOR, SCORE, SORTINO_RATIO, WIN_RATE};

/// Columns that must hold a finite number for a row to be kept.
pub const REQUIRED_METRICS: &[&str] = &[
    SCORE,
    WIN_RATE,
    PROFIT_FACTOR,
    EXPECTANCY_PER_TRADE,
    SORTINO_RATIO,
];

/// Drops rows with a missing, null, NaN, or infinite required metric.
#[derive(Debug, Clone, Copy, Default)]
pub struct InvalidMetricsFilter;

impl FilterStage for InvalidMetricsFilter {
    fn name(&self) -> &'static str {
        "invalid_metrics"
    }

    fn apply(&self, input: RecordSet) -> Result<RecordSet, FilterError> {
        let mut mask = vec![true; input.len()];
        for column in REQUIRED_METRICS {
            let values = input.numeric_column(column)?;
            for (keep, value) in mask.iter_mut().zip(values) {
                *keep &= value.is_some_and(f64::is_finite);
            }
        }
        input.retain_mask(&mask)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{FieldValue, RawRecord};

    fn valid_row() -> RawRecord {
        REQUIRED_METRICS
            .iter()
            .map(|c| (c.to_string(), FieldValue::Float(1.0)))
            .collect()
    }

    #[test]
    fn drops_each_kind_of_invalid_value() {
        let mut null = valid_row();
        null.insert(SCORE.into(), FieldValue::Null);
        let mut missing = valid_row();
        missing.remove(SORTINO_RATIO);
        let mut nan_text = valid_row();
        nan_text.insert(PROFIT_FACTOR.into(), FieldValue::Text("NaN".into()));
        let mut neg_inf = valid_row();
        neg_inf.insert(WIN_RATE.into(), FieldValue::Float(f64::NEG_INFINITY));

        let rows = vec![valid_row(), null, missing, nan_text, neg_inf];
        let out = InvalidMetricsFilter.apply(RecordSet::Rows(rows)).unwrap();
        assert_eq!(out.len(), 1);
    }

    #[test]
    fn idempotent() {
        let mut bad = valid_row();
        bad.insert(SCORE.into(), FieldValue::Float(f64::NAN));
        let once = InvalidMetricsFilter
            .apply(RecordSet::Rows(vec![valid_row(), bad]))
            .unwrap();
        let twice = InvalidMetricsFilter.apply(once.clone()).unwrap();
        assert_eq!(once.len(), twice.len());
    }
}
