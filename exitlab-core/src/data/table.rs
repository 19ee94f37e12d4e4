use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// One daily OHLCV bar.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceBar {
    pub date: NaiveDate,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

/// Bars for one subject, ascending by date. Shared read-only across sweep
/// workers.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PriceTable {
    pub subject: String,
    pub bars: Vec<PriceBar>,
}

impl PriceTable {
    pub fn new(subject: impl Into<String>, bars: Vec<PriceBar>) -> Self {
        Self {
            subject: subject.into(),
            bars,
        }
    }

    pub fn len(&self) -> usize {
        self.bars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bars.is_empty()
    }

    pub fn first_date(&self) -> Option<NaiveDate> {
        self.bars.first().map(|b| b.date)
    }

    pub fn last_date(&self) -> Option<NaiveDate> {
        self.bars.last().map(|b| b.date)
    }

    /// Rough heap footprint, used for the sweep's memory estimate.
    pub fn approx_bytes(&self) -> usize {
        self.bars.capacity() * std::mem::size_of::<PriceBar>() + self.subject.capacity()
    }
}
