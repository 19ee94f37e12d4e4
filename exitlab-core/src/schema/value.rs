//! Dynamic cell values and their coercion into typed record fields.

use std::fmt;

use serde::de::Deserializer;
use serde::ser::{SerializeMap, Serializer};
use serde::{Deserialize, Serialize};

use super::ColumnType;

/// A single untyped cell, as produced by the backtest collaborator or read
/// from a CSV row.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum FieldValue {
    #[default]
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    /// Elapsed time in whole seconds. Written out as a plain string.
    Duration(i64),
}

impl FieldValue {
    pub fn is_null(&self) -> bool {
        matches!(self, FieldValue::Null)
    }

    /// Numeric view of the value. Text is parsed, so `"NaN"` yields NaN.
    pub fn as_f64(&self) -> Option<f64> {
        f64::decode(self)
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            FieldValue::Null => "null",
            FieldValue::Bool(_) => "bool",
            FieldValue::Int(_) => "int",
            FieldValue::Float(_) => "float",
            FieldValue::Text(_) => "text",
            FieldValue::Duration(_) => "duration",
        }
    }

    /// Infer a value from a CSV cell. Empty cells are null.
    pub fn infer(cell: &str) -> Self {
        let trimmed = cell.trim();
        if trimmed.is_empty() {
            return FieldValue::Null;
        }
        if let Ok(v) = trimmed.parse::<i64>() {
            return FieldValue::Int(v);
        }
        if let Ok(v) = trimmed.parse::<f64>() {
            return FieldValue::Float(v);
        }
        match trimmed {
            "true" | "True" | "TRUE" => FieldValue::Bool(true),
            "false" | "False" | "FALSE" => FieldValue::Bool(false),
            _ => FieldValue::Text(trimmed.to_string()),
        }
    }

    /// Render the value as a flat CSV cell.
    pub fn to_cell(&self) -> String {
        match self {
            FieldValue::Null => String::new(),
            FieldValue::Bool(b) => b.to_string(),
            FieldValue::Int(v) => v.to_string(),
            FieldValue::Float(v) => format_float(*v),
            FieldValue::Text(s) => s.clone(),
            FieldValue::Duration(secs) => format_duration(*secs),
        }
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_cell())
    }
}

impl From<f64> for FieldValue {
    fn from(v: f64) -> Self {
        FieldValue::Float(v)
    }
}

impl From<i64> for FieldValue {
    fn from(v: i64) -> Self {
        FieldValue::Int(v)
    }
}

impl From<bool> for FieldValue {
    fn from(v: bool) -> Self {
        FieldValue::Bool(v)
    }
}

impl From<&str> for FieldValue {
    fn from(v: &str) -> Self {
        FieldValue::Text(v.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(v: String) -> Self {
        FieldValue::Text(v)
    }
}

fn format_float(v: f64) -> String {
    if v.is_nan() {
        "NaN".into()
    } else if v.is_infinite() {
        if v > 0.0 { "inf".into() } else { "-inf".into() }
    } else {
        v.to_string()
    }
}

/// Format seconds as `"{days} days HH:MM:SS"`.
pub fn format_duration(total_secs: i64) -> String {
    let sign = if total_secs < 0 { "-" } else { "" };
    let secs = total_secs.unsigned_abs();
    let days = secs / 86_400;
    let rem = secs % 86_400;
    format!(
        "{sign}{days} days {:02}:{:02}:{:02}",
        rem / 3600,
        (rem % 3600) / 60,
        rem % 60
    )
}

// ── Serde ────────────────────────────────────────────────────────────
//
// JSON has no NaN/inf, so non-finite floats are written as strings and come
// back as text; float decoding parses them.

impl Serialize for FieldValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            FieldValue::Null => serializer.serialize_unit(),
            FieldValue::Bool(b) => serializer.serialize_bool(*b),
            FieldValue::Int(v) => serializer.serialize_i64(*v),
            FieldValue::Float(v) if v.is_finite() => serializer.serialize_f64(*v),
            FieldValue::Float(v) => serializer.serialize_str(&format_float(*v)),
            FieldValue::Text(s) => serializer.serialize_str(s),
            FieldValue::Duration(secs) => {
                let mut map = serializer.serialize_map(Some(1))?;
                map.serialize_entry("duration_secs", secs)?;
                map.end()
            }
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum WireValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Duration { duration_secs: i64 },
}

impl<'de> Deserialize<'de> for FieldValue {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Ok(match WireValue::deserialize(deserializer)? {
            WireValue::Null => FieldValue::Null,
            WireValue::Bool(b) => FieldValue::Bool(b),
            WireValue::Int(v) => FieldValue::Int(v),
            WireValue::Float(v) => FieldValue::Float(v),
            WireValue::Text(s) => FieldValue::Text(s),
            WireValue::Duration { duration_secs } => FieldValue::Duration(duration_secs),
        })
    }
}

// ── Typed coercion ───────────────────────────────────────────────────

/// Conversion between a dynamic cell and a typed record field.
pub trait FieldCodec: Sized {
    /// `None` when the value cannot be represented as `Self`.
    fn decode(value: &FieldValue) -> Option<Self>;
    fn encode(&self) -> FieldValue;
}

impl FieldCodec for f64 {
    fn decode(value: &FieldValue) -> Option<Self> {
        match value {
            FieldValue::Float(v) => Some(*v),
            FieldValue::Int(v) => Some(*v as f64),
            FieldValue::Text(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    fn encode(&self) -> FieldValue {
        FieldValue::Float(*self)
    }
}

impl FieldCodec for i64 {
    fn decode(value: &FieldValue) -> Option<Self> {
        match value {
            FieldValue::Int(v) => Some(*v),
            FieldValue::Float(v) if v.is_finite() && v.fract() == 0.0 => Some(*v as i64),
            FieldValue::Text(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    fn encode(&self) -> FieldValue {
        FieldValue::Int(*self)
    }
}

impl FieldCodec for bool {
    fn decode(value: &FieldValue) -> Option<Self> {
        match value {
            FieldValue::Bool(b) => Some(*b),
            FieldValue::Int(0) => Some(false),
            FieldValue::Int(1) => Some(true),
            FieldValue::Text(s) => match s.trim().to_ascii_lowercase().as_str() {
                "true" => Some(true),
                "false" => Some(false),
                _ => None,
            },
            _ => None,
        }
    }

    fn encode(&self) -> FieldValue {
        FieldValue::Bool(*self)
    }
}

impl FieldCodec for String {
    fn decode(value: &FieldValue) -> Option<Self> {
        match value {
            FieldValue::Text(s) => Some(s.clone()),
            FieldValue::Int(v) => Some(v.to_string()),
            FieldValue::Float(v) => Some(format_float(*v)),
            FieldValue::Duration(secs) => Some(format_duration(*secs)),
            _ => None,
        }
    }

    fn encode(&self) -> FieldValue {
        FieldValue::Text(self.clone())
    }
}

impl<T: FieldCodec> FieldCodec for Option<T> {
    fn decode(value: &FieldValue) -> Option<Self> {
        match value {
            FieldValue::Null => Some(None),
            other => T::decode(other).map(Some),
        }
    }

    fn encode(&self) -> FieldValue {
        match self {
            Some(v) => v.encode(),
            None => FieldValue::Null,
        }
    }
}

impl ColumnType {
    /// Whether a non-null value conforms to this column type.
    pub fn accepts(&self, value: &FieldValue) -> bool {
        match self {
            ColumnType::Float => f64::decode(value).is_some(),
            ColumnType::Integer => i64::decode(value).is_some(),
            ColumnType::Boolean => bool::decode(value).is_some(),
            ColumnType::Text => matches!(
                value,
                FieldValue::Text(_) | FieldValue::Int(_) | FieldValue::Float(_)
            ),
            ColumnType::Duration => match value {
                FieldValue::Text(_) | FieldValue::Duration(_) | FieldValue::Int(_) => true,
                FieldValue::Float(v) => v.is_finite(),
                _ => false,
            },
            ColumnType::Timestamp => matches!(value, FieldValue::Text(_)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duration_formats_as_plain_string() {
        assert_eq!(format_duration(0), "0 days 00:00:00");
        assert_eq!(format_duration(5 * 86_400 + 3 * 3600 + 61), "5 days 03:01:01");
        assert_eq!(
            String::decode(&FieldValue::Duration(86_400)).unwrap(),
            "1 days 00:00:00"
        );
    }

    #[test]
    fn non_finite_floats_survive_json() {
        let values = vec![
            FieldValue::Float(f64::NAN),
            FieldValue::Float(f64::INFINITY),
            FieldValue::Float(1.5),
            FieldValue::Int(7),
            FieldValue::Null,
            FieldValue::Duration(3600),
        ];
        let json = serde_json::to_string(&values).unwrap();
        let back: Vec<FieldValue> = serde_json::from_str(&json).unwrap();

        assert!(back[0].as_f64().unwrap().is_nan());
        assert_eq!(back[1].as_f64(), Some(f64::INFINITY));
        assert_eq!(back[2], FieldValue::Float(1.5));
        assert_eq!(back[3], FieldValue::Int(7));
        assert_eq!(back[4], FieldValue::Null);
        assert_eq!(back[5], FieldValue::Duration(3600));
    }

    #[test]
    fn integer_decoding_rejects_fractions() {
        assert_eq!(i64::decode(&FieldValue::Float(4.0)), Some(4));
        assert_eq!(i64::decode(&FieldValue::Float(4.5)), None);
        assert_eq!(i64::decode(&FieldValue::Text("12".into())), Some(12));
    }

    #[test]
    fn optional_decoding_maps_null() {
        assert_eq!(Option::<f64>::decode(&FieldValue::Null), Some(None));
        assert_eq!(Option::<f64>::decode(&FieldValue::Int(2)), Some(Some(2.0)));
        assert_eq!(Option::<f64>::decode(&FieldValue::Bool(true)), None);
    }

    #[test]
    fn csv_inference() {
        assert_eq!(FieldValue::infer(""), FieldValue::Null);
        assert_eq!(FieldValue::infer("42"), FieldValue::Int(42));
        assert_eq!(FieldValue::infer("4.25"), FieldValue::Float(4.25));
        assert_eq!(FieldValue::infer("True"), FieldValue::Bool(true));
        assert_eq!(FieldValue::infer("BTC-USD"), FieldValue::Text("BTC-USD".into()));
        assert!(FieldValue::infer("NaN").as_f64().unwrap().is_nan());
    }

    #[test]
    fn column_type_acceptance() {
        assert!(ColumnType::Float.accepts(&FieldValue::Int(3)));
        assert!(!ColumnType::Float.accepts(&FieldValue::Text("abc".into())));
        assert!(ColumnType::Duration.accepts(&FieldValue::Duration(10)));
        assert!(ColumnType::Duration.accepts(&FieldValue::Int(86_400)));
        assert!(!ColumnType::Duration.accepts(&FieldValue::Float(f64::NAN)));
        assert!(!ColumnType::Timestamp.accepts(&FieldValue::Int(10)));
        assert!(!ColumnType::Boolean.accepts(&FieldValue::Int(2)));
    }
}
