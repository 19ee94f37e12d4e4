//! Strategy collaborators: entry configuration, signal generation, and the
//! backtest engine.
//!
//! The sweep holds the entry fixed and varies only the exit parameters, so a
//! signal generator receives both. Backtest results are opaque to the sweep:
//! they expose a raw metrics mapping that the schema registry normalizes.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::data::PriceTable;
use crate::params::ParameterCombination;
use crate::schema::{FieldValue, RawRecord, LONG_WINDOW, SHORT_WINDOW, SIGNAL_WINDOW, STRATEGY_TYPE};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    #[default]
    Long,
    Short,
}

/// The fixed entry side of a sweep.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EntryConfig {
    /// Entry family, e.g. `SMA`, `EMA`, `MACD`.
    pub strategy_type: String,
    pub short_window: i64,
    pub long_window: i64,
    /// Signal-line period; zero for strategies without one.
    pub signal_window: i64,
    pub direction: Direction,
}

impl Default for EntryConfig {
    fn default() -> Self {
        Self {
            strategy_type: "SMA".into(),
            short_window: 20,
            long_window: 50,
            signal_window: 0,
            direction: Direction::Long,
        }
    }
}

impl EntryConfig {
    pub fn validate(&self) -> Result<(), StrategyError> {
        if self.strategy_type.trim().is_empty() {
            return Err(StrategyError::InvalidEntry("strategy_type is empty".into()));
        }
        if self.short_window <= 0 || self.long_window <= 0 {
            return Err(StrategyError::InvalidEntry(format!(
                "windows must be positive (short={}, long={})",
                self.short_window, self.long_window
            )));
        }
        if self.short_window >= self.long_window {
            return Err(StrategyError::InvalidEntry(format!(
                "short window {} must be below long window {}",
                self.short_window, self.long_window
            )));
        }
        if self.signal_window < 0 {
            return Err(StrategyError::InvalidEntry(format!(
                "signal window {} is negative",
                self.signal_window
            )));
        }
        Ok(())
    }

    /// Whether `column` carries a parameter of this entry. `Signal Window` is
    /// free for entries without a signal line, so an exit period (such as an
    /// exit EMA) can be tagged onto it.
    pub fn occupies(&self, column: &str) -> bool {
        match column {
            SIGNAL_WINDOW => self.signal_window > 0,
            _ => self.tags().iter().any(|(col, _)| *col == column),
        }
    }

    /// Columns every sweep record is tagged with. Sweep dimensions tagged
    /// onto a free `Signal Window` replace the zero written here.
    pub fn tags(&self) -> [(&'static str, FieldValue); 4] {
        [
            (STRATEGY_TYPE, FieldValue::Text(self.strategy_type.clone())),
            (SHORT_WINDOW, FieldValue::Int(self.short_window)),
            (LONG_WINDOW, FieldValue::Int(self.long_window)),
            (SIGNAL_WINDOW, FieldValue::Int(self.signal_window)),
        ]
    }
}

/// Entry/exit flags for one bar.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Signal {
    pub entry: bool,
    pub exit: bool,
}

/// Prices plus one signal per bar.
#[derive(Debug, Clone)]
pub struct SignalTable {
    pub prices: Arc<PriceTable>,
    pub signals: Vec<Signal>,
}

impl SignalTable {
    pub fn len(&self) -> usize {
        self.signals.len()
    }

    pub fn is_empty(&self) -> bool {
        self.signals.is_empty()
    }

    pub fn entry_count(&self) -> usize {
        self.signals.iter().filter(|s| s.entry).count()
    }

    pub fn exit_count(&self) -> usize {
        self.signals.iter().filter(|s| s.exit).count()
    }
}

/// Position sizing handed to the backtest engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AllocationPolicy {
    /// Share of capital risked per position, in percent.
    pub risk_allocation_pct: f64,
    /// Optional Kelly confidence in `[0, 1]` that scales the allocation.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kelly_confidence: Option<f64>,
}

impl Default for AllocationPolicy {
    fn default() -> Self {
        Self {
            risk_allocation_pct: 11.8,
            kelly_confidence: None,
        }
    }
}

impl AllocationPolicy {
    /// Allocation after Kelly scaling, clamped to `[0, 100]`.
    pub fn effective_allocation_pct(&self) -> f64 {
        let confidence = self.kelly_confidence.unwrap_or(1.0).clamp(0.0, 1.0);
        (self.risk_allocation_pct * confidence).clamp(0.0, 100.0)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BacktestSettings {
    pub initial_capital: f64,
    /// Proportional fee per order, e.g. `0.001` for 10 bps.
    pub fees: f64,
    pub allocation: AllocationPolicy,
}

impl Default for BacktestSettings {
    fn default() -> Self {
        Self {
            initial_capital: 1_000.0,
            fees: 0.001,
            allocation: AllocationPolicy::default(),
        }
    }
}

#[derive(Debug, Error)]
pub enum StrategyError {
    #[error("invalid entry configuration: {0}")]
    InvalidEntry(String),

    #[error("signal generation failed: {0}")]
    Signal(String),

    #[error("backtest failed: {0}")]
    Backtest(String),
}

/// Produces entry/exit signals for one exit-parameter combination.
pub trait SignalGenerator: Send + Sync {
    /// `Ok(None)` when no signals could be produced.
    fn generate(
        &self,
        prices: &Arc<PriceTable>,
        entry: &EntryConfig,
        exit: &ParameterCombination,
    ) -> Result<Option<SignalTable>, StrategyError>;
}

/// Runs a backtest over a signal table.
pub trait Backtester: Send + Sync {
    fn run(
        &self,
        signals: &SignalTable,
        settings: &BacktestSettings,
    ) -> Result<Option<Box<dyn BacktestStats>>, StrategyError>;
}

/// Backtest output the sweep can read metrics from.
pub trait BacktestStats: Send {
    /// Raw metric mapping, `None` if the backtest produced no statistics.
    fn extract_metrics(&self) -> Option<RawRecord>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entry_validation() {
        assert!(EntryConfig::default().validate().is_ok());
        let inverted = EntryConfig {
            short_window: 50,
            long_window: 20,
            ..EntryConfig::default()
        };
        assert!(matches!(
            inverted.validate(),
            Err(StrategyError::InvalidEntry(_))
        ));
    }

    #[test]
    fn entry_tags() {
        let entry = EntryConfig {
            strategy_type: "EMA".into(),
            short_window: 8,
            long_window: 21,
            signal_window: 0,
            direction: Direction::Long,
        };
        let tags = entry.tags();
        assert_eq!(tags[0], (STRATEGY_TYPE, FieldValue::Text("EMA".into())));
        assert_eq!(tags[2], (LONG_WINDOW, FieldValue::Int(21)));
    }

    #[test]
    fn signal_window_is_free_without_signal_line() {
        let sma = EntryConfig::default();
        assert!(sma.occupies(SHORT_WINDOW));
        assert!(sma.occupies(STRATEGY_TYPE));
        assert!(!sma.occupies(SIGNAL_WINDOW));
        assert!(!sma.occupies("Stop Length"));

        let macd = EntryConfig {
            strategy_type: "MACD".into(),
            short_window: 12,
            long_window: 26,
            signal_window: 9,
            direction: Direction::Long,
        };
        assert!(macd.occupies(SIGNAL_WINDOW));
    }

    #[test]
    fn kelly_scales_allocation() {
        let policy = AllocationPolicy {
            risk_allocation_pct: 11.8,
            kelly_confidence: Some(0.5),
        };
        assert!((policy.effective_allocation_pct() - 5.9).abs() < 1e-12);
        assert_eq!(AllocationPolicy::default().effective_allocation_pct(), 11.8);
    }

    #[test]
    fn settings_parse_partially() {
        let settings: BacktestSettings =
            serde_json::from_str(r#"{"allocation": {"kelly_confidence": 0.25}}"#).unwrap();
        assert_eq!(settings.initial_capital, 1_000.0);
        assert_eq!(settings.allocation.risk_allocation_pct, 11.8);
        assert_eq!(settings.allocation.kelly_confidence, Some(0.25));
    }
}
