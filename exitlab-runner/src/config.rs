//! Sweep configuration loaded from TOML.
//!
//! Every section has defaults, so a file only needs the keys it changes:
//!
//! ```toml
//! target_shape = "StopExtended"
//!
//! [entry]
//! strategy_type = "EMA"
//! short_window = 8
//! long_window = 21
//!
//! [[grid.dimensions]]
//! name = "stop_length"
//! column = "Stop Length"
//! range = { type = "integer", min = 2, max = 10 }
//!
//! [minimums]
//! WIN_RATE = 0.45
//! TRADES = 20
//! ```

use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};

use exitlab_core::data::DataRequest;
use exitlab_core::filter::MINIMUM_RULES;
use exitlab_core::params::{Dimension, DimensionRange, ParameterError, ParameterGrid};
use exitlab_core::schema::{ColumnType, SchemaShape, STOP_LENGTH, STOP_MULTIPLIER};
use exitlab_core::strategy::{BacktestSettings, EntryConfig, StrategyError};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Content hash of the parts of a configuration that determine sweep output.
pub type SweepFingerprint = String;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {}: {source}", path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("failed to hash config: {0}")]
    Fingerprint(#[from] serde_json::Error),

    #[error("invalid grid: {0}")]
    Grid(#[from] ParameterError),

    #[error(transparent)]
    Entry(#[from] StrategyError),

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Full sweep configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SweepConfig {
    /// Shape every result record is transformed to.
    pub target_shape: SchemaShape,
    pub entry: EntryConfig,
    pub grid: GridConfig,
    pub data: DataRequest,
    pub backtest: BacktestSettings,
    pub execution: ExecutionConfig,
    pub validation: ValidationConfig,
    /// Filter minimums keyed by rule (`WIN_RATE`, `TRADES`, `SCORE`, ...).
    pub minimums: BTreeMap<String, f64>,
    pub cache: CacheConfig,
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            target_shape: SchemaShape::StopExtended,
            entry: EntryConfig::default(),
            grid: GridConfig::default(),
            data: DataRequest::default(),
            backtest: BacktestSettings::default(),
            execution: ExecutionConfig::default(),
            validation: ValidationConfig::default(),
            minimums: BTreeMap::new(),
            cache: CacheConfig::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GridConfig {
    pub dimensions: Vec<Dimension>,
}

impl Default for GridConfig {
    /// Volatility stop: length 2..=10 × multiplier [1.0, 11.0) step 0.5.
    fn default() -> Self {
        Self {
            dimensions: vec![
                Dimension::new(
                    "stop_length",
                    STOP_LENGTH,
                    DimensionRange::Integer {
                        min: 2,
                        max: 10,
                        step: 1,
                    },
                ),
                Dimension::new(
                    "stop_multiplier",
                    STOP_MULTIPLIER,
                    DimensionRange::Float {
                        min: 1.0,
                        max: 11.0,
                        step: 0.5,
                    },
                ),
            ],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutionConfig {
    /// Combinations per chunk; the unit of dispatch and caching.
    pub chunk_size: usize,
    /// Upper bound on worker threads.
    pub max_workers: usize,
    pub parallel: bool,
    /// Combinations between memory samples.
    pub reclaim_interval: usize,
    /// Reuse a fresh checkpoint and its chunk caches.
    pub resume: bool,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            chunk_size: 50,
            max_workers: 4,
            parallel: true,
            reclaim_interval: 20,
            resume: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidationConfig {
    /// Leading records checked against the target shape.
    pub sample_size: usize,
    /// Leading records checked for non-null tag columns.
    pub tag_sample_size: usize,
    /// Result count above which tag diversity is checked.
    pub diversity_threshold: usize,
    pub min_distinct_combinations: usize,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            sample_size: 10,
            tag_sample_size: 3,
            diversity_threshold: 100,
            min_distinct_combinations: 10,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub dir: PathBuf,
    /// Checkpoints older than this are discarded.
    pub freshness_hours: u32,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("cache/sweeps"),
            freshness_hours: 24,
        }
    }
}

/// Inputs that change sweep results. Execution, validation, and cache
/// settings are excluded so that tuning them keeps checkpoints valid.
#[derive(Serialize)]
struct FingerprintInput<'a> {
    target_shape: SchemaShape,
    entry: &'a EntryConfig,
    grid: &'a GridConfig,
    data: &'a DataRequest,
    backtest: &'a BacktestSettings,
}

impl SweepConfig {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&text)
    }

    pub fn from_toml(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }

    pub fn to_toml(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    pub fn parameter_grid(&self) -> Result<ParameterGrid, ConfigError> {
        Ok(ParameterGrid::new(self.grid.dimensions.clone())?)
    }

    /// Check cross-field constraints the types cannot express.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.entry.validate()?;
        let grid = self.parameter_grid()?;

        let mut names = HashSet::new();
        let mut columns = HashSet::new();
        for dim in grid.dimensions() {
            if !names.insert(dim.name.as_str()) {
                return Err(ConfigError::Invalid(format!(
                    "duplicate dimension name '{}'",
                    dim.name
                )));
            }
            if !columns.insert(dim.column.as_str()) {
                return Err(ConfigError::Invalid(format!(
                    "dimensions share column '{}'",
                    dim.column
                )));
            }
            let Some(def) = self.target_shape.column(&dim.column) else {
                return Err(ConfigError::Invalid(format!(
                    "dimension '{}' tags column '{}', which {} records do not have",
                    dim.name, dim.column, self.target_shape
                )));
            };
            let compatible = match def.kind {
                ColumnType::Integer => dim.range.is_integer(),
                ColumnType::Float => true,
                _ => false,
            };
            if !compatible {
                return Err(ConfigError::Invalid(format!(
                    "dimension '{}' values do not fit {:?} column '{}'",
                    dim.name, def.kind, dim.column
                )));
            }
            if self.entry.occupies(&dim.column) {
                return Err(ConfigError::Invalid(format!(
                    "dimension '{}' would overwrite entry column '{}'",
                    dim.name, dim.column
                )));
            }
        }

        let exec = &self.execution;
        if exec.chunk_size == 0 || exec.max_workers == 0 || exec.reclaim_interval == 0 {
            return Err(ConfigError::Invalid(
                "chunk_size, max_workers, and reclaim_interval must be positive".into(),
            ));
        }
        if self.cache.freshness_hours == 0 {
            return Err(ConfigError::Invalid("freshness_hours must be positive".into()));
        }
        for key in self.minimums.keys() {
            if !MINIMUM_RULES.iter().any(|(rule, _, _)| rule == key) {
                return Err(ConfigError::Invalid(format!("unknown minimum '{key}'")));
            }
        }
        Ok(())
    }

    /// blake3 hash of the result-determining configuration.
    pub fn fingerprint(&self) -> Result<SweepFingerprint, ConfigError> {
        let input = FingerprintInput {
            target_shape: self.target_shape,
            entry: &self.entry,
            grid: &self.grid,
            data: &self.data,
            backtest: &self.backtest,
        };
        let json = serde_json::to_string(&input)?;
        Ok(blake3::hash(json.as_bytes()).to_hex().to_string())
    }
}
