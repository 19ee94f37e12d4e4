//! Shape detection, transformation, and validation of raw metric records.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::trace;

use super::columns::{METRIC_COLUMNS, POSITION_COLUMNS, STOP_COLUMNS};
use super::record::PortfolioRecord;
use super::value::{format_duration, FieldValue};
use super::{
    ColumnDef, ColumnType, RawRecord, SchemaError, SchemaShape, BASE_COLUMNS, METRIC_TYPE,
    STRATEGY_TYPE, TICKER,
};

/// Result of schema validation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchemaValidation {
    pub is_valid: bool,
    pub errors: Vec<String>,
}

/// Per-call transform behaviour.
#[derive(Debug, Clone, Default)]
pub struct TransformOptions {
    /// Values that win over the source record.
    pub overrides: RawRecord,
    /// Null the four position columns regardless of source or overrides.
    pub force_analysis_defaults: bool,
}

impl TransformOptions {
    /// Options used for sweep analysis output.
    pub fn analysis() -> Self {
        Self {
            overrides: RawRecord::new(),
            force_analysis_defaults: true,
        }
    }

    pub fn with_override(mut self, column: &str, value: impl Into<FieldValue>) -> Self {
        self.overrides.insert(column.to_string(), value.into());
        self
    }
}

/// Column definitions of every shape plus the default value table.
#[derive(Debug, Clone)]
pub struct SchemaRegistry {
    defaults: BTreeMap<&'static str, FieldValue>,
}

impl Default for SchemaRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl SchemaRegistry {
    /// Registry with the built-in default table.
    pub fn new() -> Self {
        let mut defaults = BTreeMap::new();
        for shape in SchemaShape::ALL {
            for def in shape.columns() {
                defaults
                    .entry(def.name)
                    .or_insert_with(|| builtin_default(def));
            }
        }
        Self { defaults }
    }

    /// Replace the default of one column.
    pub fn with_default(
        mut self,
        column: &str,
        value: impl Into<FieldValue>,
    ) -> Result<Self, SchemaError> {
        let slot = self
            .defaults
            .get_mut(column)
            .ok_or_else(|| SchemaError::UnknownColumn(column.to_string()))?;
        *slot = value.into();
        Ok(self)
    }

    pub fn default_value(&self, column: &str) -> Option<&FieldValue> {
        self.defaults.get(column)
    }

    pub fn columns(&self, shape: SchemaShape) -> &'static [ColumnDef] {
        shape.columns()
    }

    /// Infer which shape a raw record belongs to. `None` when the record is
    /// too small to be any shape.
    pub fn detect_shape(&self, raw: &RawRecord) -> Option<SchemaShape> {
        let has_any = |group: &[ColumnDef]| group.iter().any(|def| raw.contains_key(def.name));
        let labelled = has_any(METRIC_COLUMNS);
        let stop = has_any(STOP_COLUMNS);
        let position = has_any(POSITION_COLUMNS);

        match (labelled, stop, position) {
            (true, true, _) => Some(SchemaShape::StopFiltered),
            (true, false, _) => Some(SchemaShape::Filtered),
            (false, true, true) => Some(SchemaShape::StopExtended),
            (false, _, true) => Some(SchemaShape::Extended),
            _ if raw.len() >= BASE_COLUMNS.len() => Some(SchemaShape::Base),
            _ => None,
        }
    }

    /// Build a record of `shape` from `raw`.
    ///
    /// Per column: override, else non-null source value, else default. With
    /// `force_analysis_defaults` the position columns are always null.
    pub fn transform_to(
        &self,
        shape: SchemaShape,
        raw: &RawRecord,
        options: &TransformOptions,
    ) -> Result<PortfolioRecord, SchemaError> {
        let dropped = raw.keys().filter(|name| !shape.contains(name)).count();
        if dropped > 0 {
            trace!(%shape, dropped, "transform drops columns not in target shape");
        }

        PortfolioRecord::resolve(shape, &mut |column| {
            if options.force_analysis_defaults && is_position_column(column) {
                return FieldValue::Null;
            }
            if let Some(value) = options.overrides.get(column) {
                return value.clone();
            }
            match raw.get(column) {
                Some(value) if !value.is_null() => value.clone(),
                _ => self.defaults.get(column).cloned().unwrap_or_default(),
            }
        })
    }

    /// Convert a typed record into another shape.
    pub fn convert(
        &self,
        record: &PortfolioRecord,
        shape: SchemaShape,
        options: &TransformOptions,
    ) -> Result<PortfolioRecord, SchemaError> {
        self.transform_to(shape, &record.to_raw(), options)
    }

    pub fn validate_schema(&self, raw: &RawRecord, shape: SchemaShape) -> SchemaValidation {
        validate_schema(raw, shape)
    }
}

fn is_position_column(column: &str) -> bool {
    POSITION_COLUMNS.iter().any(|def| def.name == column)
}

fn builtin_default(def: &ColumnDef) -> FieldValue {
    match def.name {
        TICKER => FieldValue::Text("UNKNOWN".into()),
        STRATEGY_TYPE => FieldValue::Text("SMA".into()),
        METRIC_TYPE => FieldValue::Text("Unclassified".into()),
        _ if def.nullable => FieldValue::Null,
        _ => match def.kind {
            ColumnType::Float => FieldValue::Float(0.0),
            ColumnType::Integer => FieldValue::Int(0),
            ColumnType::Boolean => FieldValue::Bool(false),
            ColumnType::Text => FieldValue::Text(String::new()),
            ColumnType::Duration => FieldValue::Text(format_duration(0)),
            ColumnType::Timestamp => FieldValue::Null,
        },
    }
}

/// Check that `raw` has exactly the columns of `shape` with conforming values.
pub fn validate_schema(raw: &RawRecord, shape: SchemaShape) -> SchemaValidation {
    let columns = shape.columns();
    let mut errors = Vec::new();

    let missing: Vec<&str> = columns
        .iter()
        .filter(|def| !raw.contains_key(def.name))
        .map(|def| def.name)
        .collect();
    if !missing.is_empty() {
        errors.push(format!("missing columns: {}", missing.join(", ")));
    }

    let extra: Vec<&str> = raw
        .keys()
        .filter(|name| !shape.contains(name))
        .map(String::as_str)
        .collect();
    if !extra.is_empty() {
        errors.push(format!("extra columns: {}", extra.join(", ")));
    }

    if raw.len() != columns.len() {
        errors.push(format!(
            "count mismatch: {shape} expects {} columns, found {}",
            columns.len(),
            raw.len()
        ));
    }

    for def in columns {
        let Some(value) = raw.get(def.name) else {
            continue;
        };
        if value.is_null() {
            if !def.nullable {
                errors.push(format!("column '{}': null in non-nullable column", def.name));
            }
        } else if !def.kind.accepts(value) {
            errors.push(format!(
                "column '{}': expected {:?}, got {}",
                def.name,
                def.kind,
                value.type_name()
            ));
        }
    }

    SchemaValidation {
        is_valid: errors.is_empty(),
        errors,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{ALLOCATION, SCORE, STOP_LENGTH, STOP_MULTIPLIER};

    fn metrics() -> RawRecord {
        let mut raw = RawRecord::new();
        raw.insert(SCORE.into(), FieldValue::Float(1.4));
        raw.insert("Win Rate [%]".into(), FieldValue::Float(55.0));
        raw.insert("Total Trades".into(), FieldValue::Int(42));
        raw.insert("Avg Trade Duration".into(), FieldValue::Duration(3 * 86_400));
        raw
    }

    #[test]
    fn defaults_cover_every_column() {
        let registry = SchemaRegistry::new();
        for def in SchemaShape::StopFiltered.columns() {
            assert!(registry.default_value(def.name).is_some(), "{}", def.name);
        }
        assert_eq!(
            registry.default_value(TICKER),
            Some(&FieldValue::Text("UNKNOWN".into()))
        );
        assert_eq!(
            registry.default_value("Period"),
            Some(&FieldValue::Text("0 days 00:00:00".into()))
        );
        assert_eq!(registry.default_value(ALLOCATION), Some(&FieldValue::Null));
    }

    #[test]
    fn injected_default_is_used() {
        let registry = SchemaRegistry::new()
            .with_default(TICKER, "SPY")
            .unwrap();
        let record = registry
            .transform_to(SchemaShape::Base, &metrics(), &TransformOptions::default())
            .unwrap();
        assert_eq!(record.base().ticker, "SPY");
        assert!(SchemaRegistry::new().with_default("Nope", 1i64).is_err());
    }

    #[test]
    fn transform_precedence() {
        let registry = SchemaRegistry::new();
        let mut raw = metrics();
        raw.insert(ALLOCATION.into(), FieldValue::Float(25.0));

        let opts = TransformOptions::default().with_override(SCORE, 9.0);
        let record = registry
            .transform_to(SchemaShape::Extended, &raw, &opts)
            .unwrap();
        assert_eq!(record.base().score, 9.0);
        assert_eq!(record.base().total_trades, 42);
        assert_eq!(record.base().profit_factor, 0.0);
        assert_eq!(record.position().unwrap().allocation_pct, Some(25.0));
        assert_eq!(record.base().avg_trade_duration, "3 days 00:00:00");
    }

    #[test]
    fn numeric_duration_seconds_are_formatted() {
        let registry = SchemaRegistry::new();
        let mut raw = metrics();
        raw.insert("Avg Trade Duration".into(), FieldValue::Float(86_400.0));
        raw.insert("Period".into(), FieldValue::Int(2 * 86_400 + 3_661));

        let record = registry
            .transform_to(SchemaShape::Base, &raw, &TransformOptions::default())
            .unwrap();
        assert_eq!(
            record.get("Avg Trade Duration"),
            Some(FieldValue::Text("1 days 00:00:00".into()))
        );
        assert_eq!(
            record.get("Period"),
            Some(FieldValue::Text("2 days 01:01:01".into()))
        );
    }

    #[test]
    fn analysis_defaults_beat_overrides() {
        let registry = SchemaRegistry::new();
        let mut raw = metrics();
        raw.insert(ALLOCATION.into(), FieldValue::Float(25.0));
        let opts = TransformOptions::analysis().with_override(ALLOCATION, 10.0);

        let record = registry
            .transform_to(SchemaShape::Extended, &raw, &opts)
            .unwrap();
        assert_eq!(record.position().unwrap().allocation_pct, None);
    }

    #[test]
    fn uncoercible_value_is_an_error() {
        let registry = SchemaRegistry::new();
        let mut raw = metrics();
        raw.insert("Total Trades".into(), FieldValue::Text("many".into()));
        let err = registry
            .transform_to(SchemaShape::Base, &raw, &TransformOptions::default())
            .unwrap_err();
        assert!(matches!(
            err,
            SchemaError::InvalidValue {
                column: "Total Trades",
                ..
            }
        ));
    }

    #[test]
    fn detection_by_markers() {
        let registry = SchemaRegistry::new();
        for shape in SchemaShape::ALL {
            let record = registry
                .transform_to(shape, &metrics(), &TransformOptions::analysis())
                .unwrap();
            assert_eq!(registry.detect_shape(&record.to_raw()), Some(shape));
        }

        // Any one stop marker is enough.
        let mut raw = registry
            .transform_to(SchemaShape::Extended, &metrics(), &TransformOptions::default())
            .unwrap()
            .to_raw();
        raw.insert(STOP_MULTIPLIER.into(), FieldValue::Float(2.0));
        assert_eq!(registry.detect_shape(&raw), Some(SchemaShape::StopExtended));

        assert_eq!(registry.detect_shape(&metrics()), None);
    }

    #[test]
    fn base_projection_of_extended_drops_position_columns() {
        let registry = SchemaRegistry::new();
        let extended = registry
            .transform_to(SchemaShape::Extended, &metrics(), &TransformOptions::analysis())
            .unwrap();
        let base = registry
            .convert(&extended, SchemaShape::Base, &TransformOptions::default())
            .unwrap();

        let ext_raw = extended.to_raw();
        let base_raw = base.to_raw();
        assert_eq!(ext_raw.len() - base_raw.len(), 4);
        for (name, value) in &base_raw {
            assert_eq!(ext_raw.get(name), Some(value), "{name}");
        }
    }

    #[test]
    fn validation_reports_bijection_errors() {
        let registry = SchemaRegistry::new();
        let record = registry
            .transform_to(SchemaShape::StopExtended, &metrics(), &TransformOptions::analysis())
            .unwrap();
        let raw = record.to_raw();
        assert!(validate_schema(&raw, SchemaShape::StopExtended).is_valid);

        let mut missing = raw.clone();
        missing.remove(STOP_LENGTH);
        let result = validate_schema(&missing, SchemaShape::StopExtended);
        assert!(!result.is_valid);
        assert!(result.errors.iter().any(|e| e.contains("missing columns")));
        assert!(result.errors.iter().any(|e| e.contains("count mismatch")));

        let mut extra = raw.clone();
        extra.insert("Unexpected".into(), FieldValue::Int(1));
        let result = validate_schema(&extra, SchemaShape::StopExtended);
        assert!(result.errors.iter().any(|e| e.contains("extra columns")));

        let mut bad_type = raw.clone();
        bad_type.insert(STOP_LENGTH.into(), FieldValue::Text("x".into()));
        let result = validate_schema(&bad_type, SchemaShape::StopExtended);
        assert!(result.errors.iter().any(|e| e.contains(STOP_LENGTH)));

        let mut null = raw;
        null.insert(SCORE.into(), FieldValue::Null);
        let result = validate_schema(&null, SchemaShape::StopExtended);
        assert!(result.errors.iter().any(|e| e.contains("non-nullable")));
    }
}
