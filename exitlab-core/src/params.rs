//! Exit-parameter grids: dimensions, combinations, and chunk partitioning.
//!
//! A `ParameterGrid` is an ordered list of dimensions. Its Cartesian product is
//! generated outer-dimension-slowest, so the combination at a given position is
//! the same for identical inputs. Chunk indices derived from that order are
//! what the progress checkpoint refers to on resume.

use std::fmt;
use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Decimal places kept for stepped float values (1.1 rather than 1.1000000000000001).
const FLOAT_DECIMALS: i32 = 10;

/// Tolerance used when counting float steps.
const STEP_EPSILON: f64 = 1e-9;

/// Largest grid `ParameterGrid::new` accepts. Combinations are materialized
/// up front, so this bounds sweep memory.
pub const MAX_COMBINATIONS: usize = 10_000_000;

/// A single exit-parameter value.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    Integer(i64),
    Float(f64),
}

impl ParamValue {
    pub fn as_f64(&self) -> f64 {
        match *self {
            ParamValue::Integer(v) => v as f64,
            ParamValue::Float(v) => v,
        }
    }

    /// Bit pattern used for identity; `-0.0` and `0.0` compare equal.
    fn identity_bits(&self) -> (u8, u64) {
        match *self {
            ParamValue::Integer(v) => (0, v as u64),
            ParamValue::Float(v) if v == 0.0 => (1, 0),
            ParamValue::Float(v) => (1, v.to_bits()),
        }
    }
}

impl fmt::Display for ParamValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParamValue::Integer(v) => write!(f, "{v}"),
            ParamValue::Float(v) => write!(f, "{v}"),
        }
    }
}

impl From<ParamValue> for crate::schema::FieldValue {
    fn from(value: ParamValue) -> Self {
        match value {
            ParamValue::Integer(v) => crate::schema::FieldValue::Int(v),
            ParamValue::Float(v) => crate::schema::FieldValue::Float(v),
        }
    }
}

/// Range of one grid dimension.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DimensionRange {
    /// Integer values from `min` to `max`, both inclusive.
    Integer {
        min: i64,
        max: i64,
        #[serde(default = "default_int_step")]
        step: i64,
    },
    /// Float values from `min` (inclusive) to `max` (exclusive).
    Float { min: f64, max: f64, step: f64 },
}

fn default_int_step() -> i64 {
    1
}

impl DimensionRange {
    /// Number of values this range produces. Zero for malformed ranges,
    /// saturating at `usize::MAX`.
    pub fn cardinality(&self) -> usize {
        match *self {
            DimensionRange::Integer { min, max, step } => {
                if step <= 0 || max < min {
                    return 0;
                }
                let n = (i128::from(max) - i128::from(min)) / i128::from(step) + 1;
                usize::try_from(n).unwrap_or(usize::MAX)
            }
            DimensionRange::Float { min, max, step } => {
                if !(step > 0.0) || !min.is_finite() || !max.is_finite() || max <= min {
                    return 0;
                }
                ((max - min) / step + STEP_EPSILON).floor() as usize
            }
        }
    }

    /// All values of the range, ascending.
    pub fn values(&self) -> Vec<ParamValue> {
        let n = self.cardinality();
        match *self {
            // Every value lies within [min, max], so the i128 sum fits in i64.
            DimensionRange::Integer { min, step, .. } => (0..n)
                .map(|i| {
                    ParamValue::Integer((i128::from(min) + i128::from(step) * i as i128) as i64)
                })
                .collect(),
            DimensionRange::Float { min, step, .. } => (0..n)
                .map(|i| ParamValue::Float(round_to(min + step * i as f64, FLOAT_DECIMALS)))
                .collect(),
        }
    }

    pub fn is_integer(&self) -> bool {
        matches!(self, DimensionRange::Integer { .. })
    }

    fn check(&self, name: &str) -> Result<(), ParameterError> {
        let ok = match *self {
            DimensionRange::Integer { min, max, step } => step > 0 && min <= max,
            DimensionRange::Float { min, max, step } => {
                step > 0.0 && min.is_finite() && max.is_finite() && min < max
            }
        };
        if ok {
            Ok(())
        } else {
            Err(ParameterError::InvalidRange {
                dimension: name.to_string(),
                range: format!("{self:?}"),
            })
        }
    }
}

fn round_to(value: f64, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    (value * factor).round() / factor
}

/// One exit-parameter dimension of a sweep.
///
/// `column` names the record column the dimension's value is tagged onto
/// (e.g. `Stop Length`), which is how a result row remembers its parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Dimension {
    pub name: String,
    pub column: String,
    pub range: DimensionRange,
}

impl Dimension {
    pub fn new(name: impl Into<String>, column: impl Into<String>, range: DimensionRange) -> Self {
        Self {
            name: name.into(),
            column: column.into(),
            range,
        }
    }
}

/// Errors from grid construction and parameter validation.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ParameterError {
    #[error("grid has no dimensions")]
    EmptyGrid,

    #[error("grid exceeds {max} combinations")]
    GridTooLarge { max: usize },

    #[error("dimension '{dimension}' has an invalid range: {range}")]
    InvalidRange { dimension: String, range: String },

    #[error("expected {expected} parameters, got {actual}")]
    ArityMismatch { expected: usize, actual: usize },

    #[error("parameter {position} is '{actual}', expected '{expected}'")]
    NameMismatch {
        position: usize,
        expected: String,
        actual: String,
    },

    #[error("parameter '{name}' must be an integer, got {value}")]
    NotInteger { name: String, value: ParamValue },

    #[error("parameter '{name}' must be finite and positive, got {value}")]
    NotPositive { name: String, value: ParamValue },
}

/// An ordered tuple of named exit-parameter values.
///
/// Identity is the value tuple: two combinations with the same values in the
/// same order are equal and hash identically regardless of names.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParameterCombination {
    params: Vec<(String, ParamValue)>,
}

impl ParameterCombination {
    pub fn new(params: Vec<(String, ParamValue)>) -> Self {
        Self { params }
    }

    pub fn params(&self) -> &[(String, ParamValue)] {
        &self.params
    }

    pub fn get(&self, name: &str) -> Option<ParamValue> {
        self.params
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| *v)
    }

    pub fn values(&self) -> impl Iterator<Item = ParamValue> + '_ {
        self.params.iter().map(|(_, v)| *v)
    }

    pub fn len(&self) -> usize {
        self.params.len()
    }

    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }
}

impl PartialEq for ParameterCombination {
    fn eq(&self, other: &Self) -> bool {
        self.params.len() == other.params.len()
            && self
                .values()
                .zip(other.values())
                .all(|(a, b)| a.identity_bits() == b.identity_bits())
    }
}

impl Eq for ParameterCombination {}

impl Hash for ParameterCombination {
    fn hash<H: Hasher>(&self, state: &mut H) {
        for value in self.values() {
            value.identity_bits().hash(state);
        }
    }
}

impl fmt::Display for ParameterCombination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self
            .params
            .iter()
            .map(|(name, value)| format!("{name}={value}"))
            .collect();
        write!(f, "({})", parts.join(", "))
    }
}

/// Cartesian grid of exit parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterGrid {
    dimensions: Vec<Dimension>,
}

impl ParameterGrid {
    /// Build a grid, rejecting empty grids, malformed ranges, and grids above
    /// [`MAX_COMBINATIONS`].
    pub fn new(dimensions: Vec<Dimension>) -> Result<Self, ParameterError> {
        if dimensions.is_empty() {
            return Err(ParameterError::EmptyGrid);
        }
        for dim in &dimensions {
            dim.range.check(&dim.name)?;
        }
        let grid = Self { dimensions };
        match grid.checked_cardinality() {
            Some(n) if n <= MAX_COMBINATIONS => Ok(grid),
            _ => Err(ParameterError::GridTooLarge {
                max: MAX_COMBINATIONS,
            }),
        }
    }

    /// Volatility-stop grid: inclusive length range × stepped multiplier range.
    ///
    /// Tagged onto the `Stop Length` / `Stop Multiplier` columns.
    pub fn volatility_stop(
        length: (i64, i64),
        multiplier: (f64, f64),
        step: f64,
    ) -> Result<Self, ParameterError> {
        Self::new(vec![
            Dimension::new(
                "stop_length",
                crate::schema::STOP_LENGTH,
                DimensionRange::Integer {
                    min: length.0,
                    max: length.1,
                    step: 1,
                },
            ),
            Dimension::new(
                "stop_multiplier",
                crate::schema::STOP_MULTIPLIER,
                DimensionRange::Float {
                    min: multiplier.0,
                    max: multiplier.1,
                    step,
                },
            ),
        ])
    }

    pub fn dimensions(&self) -> &[Dimension] {
        &self.dimensions
    }

    /// Columns the sweep tags onto each record, in dimension order.
    pub fn tag_columns(&self) -> Vec<&str> {
        self.dimensions.iter().map(|d| d.column.as_str()).collect()
    }

    /// Total number of combinations: the product of dimension cardinalities.
    pub fn cardinality(&self) -> usize {
        self.checked_cardinality().unwrap_or(usize::MAX)
    }

    fn checked_cardinality(&self) -> Option<usize> {
        self.dimensions
            .iter()
            .try_fold(1usize, |acc, d| acc.checked_mul(d.range.cardinality()))
    }

    /// Generate every combination, outer dimension iterating slowest.
    pub fn combinations(&self) -> Vec<ParameterCombination> {
        let axes: Vec<Vec<ParamValue>> = self.dimensions.iter().map(|d| d.range.values()).collect();
        let total = self.cardinality();
        if total == 0 {
            return Vec::new();
        }

        let mut out = Vec::with_capacity(total);
        let mut cursor = vec![0usize; axes.len()];
        loop {
            let params = self
                .dimensions
                .iter()
                .zip(&axes)
                .zip(&cursor)
                .map(|((dim, values), &i)| (dim.name.clone(), values[i]))
                .collect();
            out.push(ParameterCombination::new(params));

            // Odometer increment, innermost dimension first.
            let mut axis = axes.len();
            loop {
                if axis == 0 {
                    return out;
                }
                axis -= 1;
                cursor[axis] += 1;
                if cursor[axis] < axes[axis].len() {
                    break;
                }
                cursor[axis] = 0;
            }
        }
    }

    /// Check a combination against this grid's dimensions.
    ///
    /// Names must match in order, integer dimensions must carry integers, and
    /// every value must be finite and strictly positive.
    pub fn validate(&self, combination: &ParameterCombination) -> Result<(), ParameterError> {
        if combination.len() != self.dimensions.len() {
            return Err(ParameterError::ArityMismatch {
                expected: self.dimensions.len(),
                actual: combination.len(),
            });
        }
        for (position, (dim, (name, value))) in self
            .dimensions
            .iter()
            .zip(combination.params())
            .enumerate()
        {
            if dim.name != *name {
                return Err(ParameterError::NameMismatch {
                    position,
                    expected: dim.name.clone(),
                    actual: name.clone(),
                });
            }
            if dim.range.is_integer() && !matches!(value, ParamValue::Integer(_)) {
                return Err(ParameterError::NotInteger {
                    name: name.clone(),
                    value: *value,
                });
            }
            let v = value.as_f64();
            if !v.is_finite() || v <= 0.0 {
                return Err(ParameterError::NotPositive {
                    name: name.clone(),
                    value: *value,
                });
            }
        }
        Ok(())
    }
}

/// A contiguous slice of the combination sequence: the unit of dispatch.
#[derive(Debug, Clone, Copy)]
pub struct Chunk<'a> {
    pub index: usize,
    pub combinations: &'a [ParameterCombination],
}

impl Chunk<'_> {
    pub fn len(&self) -> usize {
        self.combinations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.combinations.is_empty()
    }
}

/// Split combinations into fixed-size chunks. A size of zero is treated as one.
pub fn partition_chunks(combinations: &[ParameterCombination], chunk_size: usize) -> Vec<Chunk<'_>> {
    combinations
        .chunks(chunk_size.max(1))
        .enumerate()
        .map(|(index, combinations)| Chunk {
            index,
            combinations,
        })
        .collect()
}

/// Number of chunks `total` combinations split into.
pub fn chunk_count(total: usize, chunk_size: usize) -> usize {
    total.div_ceil(chunk_size.max(1))
}
