//! Typed portfolio records, one variant per shape.

use serde::de::{self, Deserializer};
use serde::ser::Serializer;
use serde::{Deserialize, Serialize};

use super::columns::{BaseMetrics, MetricLabel, PositionFields, StopParams};
use super::value::FieldValue;
use super::{RawRecord, SchemaError, SchemaShape};

#[derive(Debug, Clone, PartialEq)]
pub struct ExtendedRecord {
    pub base: BaseMetrics,
    pub position: PositionFields,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StopExtendedRecord {
    pub base: BaseMetrics,
    pub stop: StopParams,
    pub position: PositionFields,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FilteredRecord {
    pub label: MetricLabel,
    pub record: ExtendedRecord,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StopFilteredRecord {
    pub label: MetricLabel,
    pub record: StopExtendedRecord,
}

/// A result record in exactly one shape.
#[derive(Debug, Clone, PartialEq)]
pub enum PortfolioRecord {
    Base(BaseMetrics),
    Extended(ExtendedRecord),
    StopExtended(StopExtendedRecord),
    Filtered(FilteredRecord),
    StopFiltered(StopFilteredRecord),
}

impl PortfolioRecord {
    pub fn shape(&self) -> SchemaShape {
        match self {
            PortfolioRecord::Base(_) => SchemaShape::Base,
            PortfolioRecord::Extended(_) => SchemaShape::Extended,
            PortfolioRecord::StopExtended(_) => SchemaShape::StopExtended,
            PortfolioRecord::Filtered(_) => SchemaShape::Filtered,
            PortfolioRecord::StopFiltered(_) => SchemaShape::StopFiltered,
        }
    }

    pub fn base(&self) -> &BaseMetrics {
        match self {
            PortfolioRecord::Base(base) => base,
            PortfolioRecord::Extended(r) => &r.base,
            PortfolioRecord::StopExtended(r) => &r.base,
            PortfolioRecord::Filtered(r) => &r.record.base,
            PortfolioRecord::StopFiltered(r) => &r.record.base,
        }
    }

    pub fn stop(&self) -> Option<&StopParams> {
        match self {
            PortfolioRecord::StopExtended(r) => Some(&r.stop),
            PortfolioRecord::StopFiltered(r) => Some(&r.record.stop),
            _ => None,
        }
    }

    pub fn position(&self) -> Option<&PositionFields> {
        match self {
            PortfolioRecord::Base(_) => None,
            PortfolioRecord::Extended(r) => Some(&r.position),
            PortfolioRecord::StopExtended(r) => Some(&r.position),
            PortfolioRecord::Filtered(r) => Some(&r.record.position),
            PortfolioRecord::StopFiltered(r) => Some(&r.record.position),
        }
    }

    pub fn label(&self) -> Option<&MetricLabel> {
        match self {
            PortfolioRecord::Filtered(r) => Some(&r.label),
            PortfolioRecord::StopFiltered(r) => Some(&r.label),
            _ => None,
        }
    }

    /// Value of `column`, or `None` if the shape has no such column.
    pub fn get(&self, column: &str) -> Option<FieldValue> {
        self.base()
            .get(column)
            .or_else(|| self.stop().and_then(|s| s.get(column)))
            .or_else(|| self.position().and_then(|p| p.get(column)))
            .or_else(|| self.label().and_then(|l| l.get(column)))
    }

    /// `(column, value)` pairs in the shape's declared column order.
    pub fn values(&self) -> Vec<(&'static str, FieldValue)> {
        let mut out = Vec::with_capacity(self.shape().column_count());
        if let Some(label) = self.label() {
            label.push_values(&mut out);
        }
        self.base().push_values(&mut out);
        if let Some(stop) = self.stop() {
            stop.push_values(&mut out);
        }
        if let Some(position) = self.position() {
            position.push_values(&mut out);
        }
        out
    }

    pub fn to_raw(&self) -> RawRecord {
        self.values()
            .into_iter()
            .map(|(name, value)| (name.to_string(), value))
            .collect()
    }

    /// Assemble a record of `shape`, pulling every column through `resolve`.
    pub(crate) fn resolve(
        shape: SchemaShape,
        resolve: &mut dyn FnMut(&'static str) -> FieldValue,
    ) -> Result<Self, SchemaError> {
        Ok(match shape {
            SchemaShape::Base => PortfolioRecord::Base(BaseMetrics::resolve(resolve)?),
            SchemaShape::Extended => PortfolioRecord::Extended(resolve_extended(resolve)?),
            SchemaShape::StopExtended => PortfolioRecord::StopExtended(resolve_stop_extended(resolve)?),
            SchemaShape::Filtered => PortfolioRecord::Filtered(FilteredRecord {
                label: MetricLabel::resolve(resolve)?,
                record: resolve_extended(resolve)?,
            }),
            SchemaShape::StopFiltered => PortfolioRecord::StopFiltered(StopFilteredRecord {
                label: MetricLabel::resolve(resolve)?,
                record: resolve_stop_extended(resolve)?,
            }),
        })
    }

    /// Strict construction: `fields` must hold exactly the shape's columns.
    pub fn from_exact(shape: SchemaShape, fields: &RawRecord) -> Result<Self, SchemaError> {
        let columns = shape.columns();
        let missing: Vec<String> = columns
            .iter()
            .filter(|def| !fields.contains_key(def.name))
            .map(|def| def.name.to_string())
            .collect();
        if !missing.is_empty() {
            return Err(SchemaError::MissingColumns { shape, missing });
        }
        let extra: Vec<String> = fields
            .keys()
            .filter(|name| !shape.contains(name))
            .cloned()
            .collect();
        if !extra.is_empty() {
            return Err(SchemaError::ExtraColumns { shape, extra });
        }

        Self::resolve(shape, &mut |column| {
            fields.get(column).cloned().unwrap_or_default()
        })
    }
}

type Resolver<'a> = &'a mut dyn FnMut(&'static str) -> FieldValue;

fn resolve_extended(resolve: Resolver<'_>) -> Result<ExtendedRecord, SchemaError> {
    Ok(ExtendedRecord {
        base: BaseMetrics::resolve(resolve)?,
        position: PositionFields::resolve(resolve)?,
    })
}

fn resolve_stop_extended(resolve: Resolver<'_>) -> Result<StopExtendedRecord, SchemaError> {
    Ok(StopExtendedRecord {
        base: BaseMetrics::resolve(resolve)?,
        stop: StopParams::resolve(resolve)?,
        position: PositionFields::resolve(resolve)?,
    })
}

// ── Serde ────────────────────────────────────────────────────────────

#[derive(Serialize, Deserialize)]
struct Envelope {
    shape: SchemaShape,
    fields: RawRecord,
}

impl Serialize for PortfolioRecord {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        Envelope {
            shape: self.shape(),
            fields: self.to_raw(),
        }
        .serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for PortfolioRecord {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let envelope = Envelope::deserialize(deserializer)?;
        PortfolioRecord::from_exact(envelope.shape, &envelope.fields).map_err(de::Error::custom)
    }
}
