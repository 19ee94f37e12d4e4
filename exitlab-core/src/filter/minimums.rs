use std::collections::BTreeMap;

use serde::Serialize;
use tracing::warn;

use super::{FilterError, FilterStage, RecordSet};
use crate::schema::{
    BEATS_BNH, EXPECTANCY_PER_TRADE, PROFIT_FACTOR, SCORE, SORTINO_RATIO, TOTAL_TRADES, WIN_RATE,
};

/// `(config key, column, scale)`. Win rate is stored in percent but
/// configured as a fraction.
pub const MINIMUM_RULES: &[(&str, &str, f64)] = &[
    ("WIN_RATE", WIN_RATE, 0.01),
    ("TRADES", TOTAL_TRADES, 1.0),
    ("EXPECTANCY_PER_TRADE", EXPECTANCY_PER_TRADE, 1.0),
    ("PROFIT_FACTOR", PROFIT_FACTOR, 1.0),
    ("SORTINO_RATIO", SORTINO_RATIO, 1.0),
    ("SCORE", SCORE, 1.0),
    ("BEATS_BNH", BEATS_BNH, 1.0),
];

/// One configured minimum.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FilterConfig {
    pub key: &'static str,
    pub column: &'static str,
    pub scale: f64,
    pub threshold: f64,
}

/// Drops rows whose scaled metric is below its configured minimum.
#[derive(Debug, Clone, Default)]
pub struct MinimumsFilter {
    rules: Vec<FilterConfig>,
}

impl MinimumsFilter {
    /// Build from key → threshold pairs. Unknown keys are logged and ignored.
    pub fn from_thresholds(thresholds: &BTreeMap<String, f64>) -> Self {
        for key in thresholds.keys() {
            if !MINIMUM_RULES.iter().any(|(k, _, _)| k == key) {
                warn!(key = %key, "ignoring unknown minimum");
            }
        }
        let rules = MINIMUM_RULES
            .iter()
            .filter_map(|&(key, column, scale)| {
                thresholds.get(key).map(|&threshold| FilterConfig {
                    key,
                    column,
                    scale,
                    threshold,
                })
            })
            .collect();
        Self { rules }
    }

    pub fn rules(&self) -> &[FilterConfig] {
        &self.rules
    }
}

impl FilterStage for MinimumsFilter {
    fn name(&self) -> &'static str {
        "minimums"
    }

    fn apply(&self, input: RecordSet) -> Result<RecordSet, FilterError> {
        let mut mask = vec![true; input.len()];
        for rule in &self.rules {
            if !input.has_column(rule.column) {
                continue;
            }
            let values = input.numeric_column(rule.column)?;
            for (keep, value) in mask.iter_mut().zip(values) {
                *keep &= value.is_some_and(|v| v * rule.scale >= rule.threshold);
            }
        }
        input.retain_mask(&mask)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{FieldValue, RawRecord};

    fn row(win_rate: f64, trades: i64) -> RawRecord {
        let mut row = RawRecord::new();
        row.insert(WIN_RATE.into(), FieldValue::Float(win_rate));
        row.insert(TOTAL_TRADES.into(), FieldValue::Int(trades));
        row
    }

    #[test]
    fn win_rate_is_scaled_from_percent() {
        let filter =
            MinimumsFilter::from_thresholds(&BTreeMap::from([("WIN_RATE".to_string(), 0.55)]));
        let out = filter
            .apply(RecordSet::Rows(vec![row(54.9, 10), row(55.0, 10), row(70.0, 10)]))
            .unwrap();
        assert_eq!(out.len(), 2);
    }

    #[test]
    fn unconfigured_and_unknown_keys_are_inert() {
        let filter =
            MinimumsFilter::from_thresholds(&BTreeMap::from([("LUCK".to_string(), 100.0)]));
        assert!(filter.rules().is_empty());
        let out = filter.apply(RecordSet::Rows(vec![row(1.0, 0)])).unwrap();
        assert_eq!(out.len(), 1);
    }

    #[test]
    fn rules_follow_declared_order() {
        let filter = MinimumsFilter::from_thresholds(&BTreeMap::from([
            ("SCORE".to_string(), 1.0),
            ("TRADES".to_string(), 5.0),
        ]));
        let keys: Vec<&str> = filter.rules().iter().map(|r| r.key).collect();
        assert_eq!(keys, vec!["TRADES", "SCORE"]);
    }
}
