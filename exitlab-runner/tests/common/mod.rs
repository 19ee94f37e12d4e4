//! Deterministic collaborators and fixtures shared by the runner tests.

#![allow(dead_code)]

use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use chrono::NaiveDate;
use exitlab_core::data::{DataError, DataRequest, PriceBar, PriceDataSource, PriceFetch, PriceTable};
use exitlab_core::params::ParameterCombination;
use exitlab_core::schema::{
    FieldValue, PortfolioRecord, RawRecord, SchemaRegistry, SchemaShape, TransformOptions,
    EXPECTANCY_PER_TRADE, PROFIT_FACTOR, SCORE, SORTINO_RATIO, STOP_LENGTH, STOP_MULTIPLIER,
    TICKER, TOTAL_TRADES, WIN_RATE,
};
use exitlab_core::strategy::{
    BacktestSettings, BacktestStats, Backtester, EntryConfig, Signal, SignalGenerator,
    SignalTable, StrategyError,
};
use exitlab_runner::{Collaborators, SweepConfig};

pub const BARS: usize = 60;

pub fn price_table(subject: &str, bars: usize) -> PriceTable {
    let start = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
    let bars = (0..bars)
        .map(|i| {
            let close = 100.0 + i as f64;
            PriceBar {
                date: start + chrono::Duration::days(i as i64),
                open: close - 0.5,
                high: close + 1.0,
                low: close - 1.0,
                close,
                volume: 1_000.0,
            }
        })
        .collect();
    PriceTable::new(subject, bars)
}

// ─── Price source ────────────────────────────────────────────────────

pub enum PriceMode {
    Available,
    Empty,
    Missing,
    Broken,
}

pub struct MockPrices {
    pub mode: PriceMode,
    pub resolved: Option<String>,
}

impl MockPrices {
    pub fn available() -> Self {
        Self {
            mode: PriceMode::Available,
            resolved: None,
        }
    }

    pub fn with_mode(mode: PriceMode) -> Self {
        Self {
            mode,
            resolved: None,
        }
    }

    pub fn resolving_to(resolved: &str) -> Self {
        Self {
            mode: PriceMode::Available,
            resolved: Some(resolved.to_string()),
        }
    }
}

impl PriceDataSource for MockPrices {
    fn name(&self) -> &str {
        "mock"
    }

    fn fetch(&self, subject: &str, _request: &DataRequest) -> Result<Option<PriceFetch>, DataError> {
        match self.mode {
            PriceMode::Available => Ok(Some(PriceFetch {
                table: price_table(subject, BARS),
                resolved_subject: self.resolved.clone(),
            })),
            PriceMode::Empty => Ok(Some(PriceFetch::new(price_table(subject, 0)))),
            PriceMode::Missing => Ok(None),
            PriceMode::Broken => Err(DataError::Source("connection reset".into())),
        }
    }
}

// ─── Signals ─────────────────────────────────────────────────────────

/// Enters every `stop_length` bars. Can be told to fail or panic for one
/// stop length.
#[derive(Default)]
pub struct MockSignals {
    pub fail_length: Option<i64>,
    pub panic_length: Option<i64>,
    pub calls: AtomicUsize,
}

impl MockSignals {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

fn stop_length(exit: &ParameterCombination) -> i64 {
    exit.get("stop_length").map(|v| v.as_f64() as i64).unwrap_or(1)
}

impl SignalGenerator for MockSignals {
    fn generate(
        &self,
        prices: &Arc<PriceTable>,
        _entry: &EntryConfig,
        exit: &ParameterCombination,
    ) -> Result<Option<SignalTable>, StrategyError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let length = stop_length(exit);
        if self.panic_length == Some(length) {
            panic!("signal generator exploded for length {length}");
        }
        if self.fail_length == Some(length) {
            return Err(StrategyError::Signal(format!("no crossover for length {length}")));
        }
        let period = length.max(1) as usize;
        let signals = (0..prices.len())
            .map(|i| Signal {
                entry: i % period == 0,
                exit: i % period == period - 1,
            })
            .collect();
        Ok(Some(SignalTable {
            prices: Arc::clone(prices),
            signals,
        }))
    }
}

// ─── Backtester ──────────────────────────────────────────────────────

struct MockStats {
    trades: usize,
    signals: usize,
}

impl BacktestStats for MockStats {
    fn extract_metrics(&self) -> Option<RawRecord> {
        let mut raw = RawRecord::new();
        // The executor must replace this with the swept subject.
        raw.insert(TICKER.into(), FieldValue::Text("WRONG".into()));
        raw.insert(SCORE.into(), FieldValue::Float(self.trades as f64 / 10.0));
        raw.insert(WIN_RATE.into(), FieldValue::Float(50.0));
        raw.insert(PROFIT_FACTOR.into(), FieldValue::Float(1.5));
        raw.insert(EXPECTANCY_PER_TRADE.into(), FieldValue::Float(0.1));
        raw.insert(SORTINO_RATIO.into(), FieldValue::Float(1.0));
        raw.insert(TOTAL_TRADES.into(), FieldValue::Int(self.trades as i64));
        raw.insert("Signal Count".into(), FieldValue::Int(self.signals as i64));
        raw.insert("Avg Trade Duration".into(), FieldValue::Duration(86_400));
        Some(raw)
    }
}

/// One trade per entry signal.
pub struct MockBacktester;

impl Backtester for MockBacktester {
    fn run(
        &self,
        signals: &SignalTable,
        _settings: &BacktestSettings,
    ) -> Result<Option<Box<dyn BacktestStats>>, StrategyError> {
        Ok(Some(Box::new(MockStats {
            trades: signals.entry_count(),
            signals: signals.entry_count() + signals.exit_count(),
        })))
    }
}

// ─── Fixtures ────────────────────────────────────────────────────────

pub fn collaborators(prices: MockPrices, signals: Arc<MockSignals>) -> Collaborators {
    Collaborators {
        prices: Arc::new(prices),
        signals,
        backtester: Arc::new(MockBacktester),
    }
}

/// Default 180-combination volatility-stop sweep caching under `cache_dir`.
pub fn sweep_config(cache_dir: &Path) -> SweepConfig {
    let mut config = SweepConfig::default();
    config.cache.dir = cache_dir.to_path_buf();
    config
}

/// A conforming StopExtended record.
pub fn stop_record(ticker: &str, length: i64, multiplier: f64) -> PortfolioRecord {
    let mut raw = RawRecord::new();
    raw.insert(TICKER.into(), FieldValue::Text(ticker.into()));
    raw.insert(SCORE.into(), FieldValue::Float(1.0));
    raw.insert(STOP_LENGTH.into(), FieldValue::Int(length));
    raw.insert(STOP_MULTIPLIER.into(), FieldValue::Float(multiplier));
    SchemaRegistry::new()
        .transform_to(SchemaShape::StopExtended, &raw, &TransformOptions::analysis())
        .unwrap()
}
