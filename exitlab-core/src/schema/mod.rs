//! Result-record schemas.
//!
//! Every sweep result is one of five fixed shapes. A shape is an ordered list
//! of column definitions assembled from column groups:
//!
//! | Shape        | Columns                                   | Count |
//! |--------------|-------------------------------------------|-------|
//! | Base         | base metrics                              | 52    |
//! | Extended     | base + position                           | 56    |
//! | StopExtended | base + stop params + position             | 58    |
//! | Filtered     | metric label + base + position            | 57    |
//! | StopFiltered | metric label + base + stop params + position | 59 |
//!
//! Raw metric mappings (`RawRecord`) enter through [`SchemaRegistry`], which
//! detects, transforms, and validates them into typed [`PortfolioRecord`]s.

mod columns;
mod record;
mod registry;
mod value;

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;

use serde::{Deserialize, Serialize};

pub use columns::{
    BaseMetrics, MetricLabel, PositionFields, StopParams, BASE_COLUMNS, METRIC_COLUMNS,
    POSITION_COLUMNS, STOP_COLUMNS,
};
pub use record::{
    ExtendedRecord, FilteredRecord, PortfolioRecord, StopExtendedRecord, StopFilteredRecord,
};
pub use registry::{validate_schema, SchemaRegistry, SchemaValidation, TransformOptions};
pub use value::{format_duration, FieldCodec, FieldValue};

/// Untyped metric mapping keyed by column name.
pub type RawRecord = BTreeMap<String, FieldValue>;

// ── Column names referenced outside the schema tables ────────────────

pub const TICKER: &str = "Ticker";
pub const STRATEGY_TYPE: &str = "Strategy Type";
pub const SHORT_WINDOW: &str = "Short Window";
pub const LONG_WINDOW: &str = "Long Window";
pub const SIGNAL_WINDOW: &str = "Signal Window";
pub const TOTAL_TRADES: &str = "Total Trades";
pub const SCORE: &str = "Score";
pub const WIN_RATE: &str = "Win Rate [%]";
pub const PROFIT_FACTOR: &str = "Profit Factor";
pub const EXPECTANCY_PER_TRADE: &str = "Expectancy per Trade";
pub const SORTINO_RATIO: &str = "Sortino Ratio";
pub const BEATS_BNH: &str = "Beats BNH [%]";
pub const STOP_LENGTH: &str = "Stop Length";
pub const STOP_MULTIPLIER: &str = "Stop Multiplier";
pub const ALLOCATION: &str = "Allocation [%]";
pub const STOP_LOSS: &str = "Stop Loss [%]";
pub const LAST_POSITION_OPEN_DATE: &str = "Last Position Open Date";
pub const LAST_POSITION_CLOSE_DATE: &str = "Last Position Close Date";
pub const METRIC_TYPE: &str = "Metric Type";

/// Logical type of a column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ColumnType {
    Float,
    Integer,
    Boolean,
    Text,
    /// Elapsed time, stored as `"N days HH:MM:SS"`.
    Duration,
    Timestamp,
}

/// One column of a shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ColumnDef {
    pub name: &'static str,
    pub kind: ColumnType,
    pub nullable: bool,
    pub description: &'static str,
}

/// The five record shapes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum SchemaShape {
    Base,
    Extended,
    StopExtended,
    Filtered,
    StopFiltered,
}

impl SchemaShape {
    pub const ALL: [SchemaShape; 5] = [
        SchemaShape::Base,
        SchemaShape::Extended,
        SchemaShape::StopExtended,
        SchemaShape::Filtered,
        SchemaShape::StopFiltered,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            SchemaShape::Base => "Base",
            SchemaShape::Extended => "Extended",
            SchemaShape::StopExtended => "StopExtended",
            SchemaShape::Filtered => "Filtered",
            SchemaShape::StopFiltered => "StopFiltered",
        }
    }

    /// Column groups of this shape, in export order.
    fn groups(self) -> &'static [&'static [ColumnDef]] {
        match self {
            SchemaShape::Base => &[BASE_COLUMNS],
            SchemaShape::Extended => &[BASE_COLUMNS, POSITION_COLUMNS],
            SchemaShape::StopExtended => &[BASE_COLUMNS, STOP_COLUMNS, POSITION_COLUMNS],
            SchemaShape::Filtered => &[METRIC_COLUMNS, BASE_COLUMNS, POSITION_COLUMNS],
            SchemaShape::StopFiltered => &[
                METRIC_COLUMNS,
                BASE_COLUMNS,
                STOP_COLUMNS,
                POSITION_COLUMNS,
            ],
        }
    }

    /// Ordered column definitions.
    pub fn columns(self) -> &'static [ColumnDef] {
        static TABLE: OnceLock<[Vec<ColumnDef>; 5]> = OnceLock::new();
        let table = TABLE.get_or_init(|| {
            SchemaShape::ALL.map(|shape| {
                shape
                    .groups()
                    .iter()
                    .flat_map(|group| group.iter().copied())
                    .collect()
            })
        });
        &table[self as usize]
    }

    pub fn column_count(self) -> usize {
        self.columns().len()
    }

    pub fn column(self, name: &str) -> Option<&'static ColumnDef> {
        self.columns().iter().find(|def| def.name == name)
    }

    pub fn contains(self, name: &str) -> bool {
        self.column(name).is_some()
    }
}

impl fmt::Display for SchemaShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SchemaShape {
    type Err = SchemaError;

    /// Accepts `StopExtended`, `stop_extended`, `stop-extended` and so on.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let key: String = s
            .chars()
            .filter(|c| *c != '_' && *c != '-')
            .collect::<String>()
            .to_ascii_lowercase();
        SchemaShape::ALL
            .into_iter()
            .find(|shape| shape.as_str().to_ascii_lowercase() == key)
            .ok_or_else(|| SchemaError::UnknownShape(s.to_string()))
    }
}

/// Errors raised while building typed records.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SchemaError {
    #[error("column '{column}': cannot coerce {found} value '{value}'")]
    InvalidValue {
        column: &'static str,
        value: String,
        found: &'static str,
    },
    #[error("{shape} record is missing columns: {}", .missing.join(", "))]
    MissingColumns {
        shape: SchemaShape,
        missing: Vec<String>,
    },
    #[error("{shape} record has extra columns: {}", .extra.join(", "))]
    ExtraColumns {
        shape: SchemaShape,
        extra: Vec<String>,
    },
    #[error("unknown column '{0}'")]
    UnknownColumn(String),
    #[error("unknown schema shape '{0}'")]
    UnknownShape(String),
}
