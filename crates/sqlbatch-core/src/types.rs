//! Core types for sqlbatch

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A single result cell.
///
/// Exactly one variant is active and it is chosen from the driver-reported
/// native type when the row is decoded. Integer variants are never widened
/// into floating point and exact numerics keep their textual form.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    /// NULL value
    Null,
    /// Boolean
    Bool(bool),
    /// Any signed integer up to 64 bits
    Int64(i64),
    /// Unsigned 64-bit integer (MySQL `BIGINT UNSIGNED` above `i64::MAX`)
    UInt64(u64),
    /// 32-bit floating point
    Float32(f32),
    /// 64-bit floating point
    Float64(f64),
    /// Decimal/Numeric (stored as string for precision)
    Decimal(String),
    /// UTF-8 string
    String(String),
    /// Binary data
    Bytes(Vec<u8>),
    /// UUID
    Uuid(Uuid),
    /// Date (year, month, day)
    Date(NaiveDate),
    /// Time (hour, minute, second, nanosecond)
    Time(NaiveTime),
    /// DateTime without timezone
    DateTime(NaiveDateTime),
    /// Timestamp with timezone, normalized to UTC
    DateTimeUtc(DateTime<Utc>),
    /// JSON value
    Json(serde_json::Value),
    /// Array of values
    Array(Vec<Value>),
}

/// Target variant when decoding a driver's text representation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueKind {
    Bool,
    Int64,
    UInt64,
    Float32,
    Float64,
    Decimal,
    String,
    Bytes,
    Date,
    Time,
    DateTime,
    Json,
}

impl Value {
    /// Check if the value is NULL
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Try to get as i64
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int64(v) => Some(*v),
            Value::UInt64(v) => i64::try_from(*v).ok(),
            Value::String(s) => s.parse::<i64>().ok(),
            _ => None,
        }
    }

    /// Render the value in the text form a driver would print for it.
    ///
    /// Integers and floats use their shortest exact representation and byte
    /// strings use PostgreSQL's `\x` hex form, so `from_text` restores the
    /// same value.
    pub fn to_text(&self) -> String {
        match self {
            Value::Bytes(bytes) => format!("\\x{}", hex::encode(bytes)),
            Value::Float32(v) => float_text(*v as f64, v.to_string()),
            Value::Float64(v) => float_text(*v, v.to_string()),
            other => other.to_string(),
        }
    }

    /// Decode a driver text value into the requested variant.
    ///
    /// Returns `None` when the text is not a valid literal for `kind`; callers
    /// fall back to `Value::String` so the cell is never lost.
    pub fn from_text(text: &str, kind: ValueKind) -> Option<Value> {
        match kind {
            ValueKind::Bool => match text.to_ascii_lowercase().as_str() {
                "t" | "true" | "1" | "y" | "yes" | "on" => Some(Value::Bool(true)),
                "f" | "false" | "0" | "n" | "no" | "off" => Some(Value::Bool(false)),
                _ => None,
            },
            ValueKind::Int64 => text.parse::<i64>().ok().map(Value::Int64),
            ValueKind::UInt64 => text.parse::<u64>().ok().map(|v| match i64::try_from(v) {
                Ok(signed) => Value::Int64(signed),
                Err(_) => Value::UInt64(v),
            }),
            ValueKind::Float32 => parse_float(text).map(|v| Value::Float32(v as f32)),
            ValueKind::Float64 => parse_float(text).map(Value::Float64),
            ValueKind::Decimal => {
                is_decimal_literal(text).then(|| Value::Decimal(text.to_string()))
            }
            ValueKind::String => Some(Value::String(text.to_string())),
            ValueKind::Bytes => match text.strip_prefix("\\x") {
                Some(hex_digits) => hex::decode(hex_digits).ok().map(Value::Bytes),
                None => Some(Value::Bytes(text.as_bytes().to_vec())),
            },
            ValueKind::Date => NaiveDate::parse_from_str(text, "%Y-%m-%d").ok().map(Value::Date),
            ValueKind::Time => NaiveTime::parse_from_str(text, "%H:%M:%S%.f")
                .ok()
                .map(Value::Time),
            ValueKind::DateTime => NaiveDateTime::parse_from_str(text, "%Y-%m-%d %H:%M:%S%.f")
                .ok()
                .map(Value::DateTime),
            ValueKind::Json => serde_json::from_str(text).ok().map(Value::Json),
        }
    }
}

fn float_text(value: f64, shortest: String) -> String {
    if value.is_nan() {
        "NaN".to_string()
    } else if value.is_infinite() {
        if value > 0.0 { "Infinity" } else { "-Infinity" }.to_string()
    } else {
        shortest
    }
}

/// `[+-]digits[.digits][(e|E)[+-]digits]` with at least one mantissa digit,
/// or one of PostgreSQL's special numeric values.
fn is_decimal_literal(text: &str) -> bool {
    if matches!(text, "NaN" | "Infinity" | "-Infinity") {
        return true;
    }

    fn digits(s: &str) -> usize {
        s.bytes().take_while(u8::is_ascii_digit).count()
    }

    let unsigned = text.strip_prefix(['+', '-']).unwrap_or(text);
    let (mantissa, exponent) = match unsigned.find(['e', 'E']) {
        Some(at) => (&unsigned[..at], Some(&unsigned[at + 1..])),
        None => (unsigned, None),
    };

    let int_len = digits(mantissa);
    let mantissa_ok = match mantissa[int_len..].strip_prefix('.') {
        Some(fraction) => {
            let frac_len = digits(fraction);
            frac_len == fraction.len() && int_len + frac_len > 0
        }
        None => int_len > 0 && int_len == mantissa.len(),
    };

    let exponent_ok = exponent.is_none_or(|exp| {
        let exp = exp.strip_prefix(['+', '-']).unwrap_or(exp);
        !exp.is_empty() && digits(exp) == exp.len()
    });

    mantissa_ok && exponent_ok
}

fn parse_float(text: &str) -> Option<f64> {
    match text {
        "NaN" => Some(f64::NAN),
        "Infinity" | "inf" => Some(f64::INFINITY),
        "-Infinity" | "-inf" => Some(f64::NEG_INFINITY),
        _ => text.parse::<f64>().ok(),
    }
}

impl std::fmt::Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::Null => write!(f, "NULL"),
            Value::Bool(v) => write!(f, "{}", v),
            Value::Int64(v) => write!(f, "{}", v),
            Value::UInt64(v) => write!(f, "{}", v),
            Value::Float32(v) => write!(f, "{}", v),
            Value::Float64(v) => write!(f, "{}", v),
            Value::Decimal(v) => write!(f, "{}", v),
            Value::String(v) => write!(f, "{}", v),
            Value::Bytes(v) => write!(f, "<{} bytes>", v.len()),
            Value::Uuid(v) => write!(f, "{}", v),
            Value::Date(v) => write!(f, "{}", v),
            Value::Time(v) => write!(f, "{}", v),
            Value::DateTime(v) => write!(f, "{}", v),
            Value::DateTimeUtc(v) => write!(f, "{}", v),
            Value::Json(v) => write!(f, "{}", v),
            Value::Array(v) => write!(f, "[{} items]", v.len()),
        }
    }
}

/// A row from a result set
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Row {
    /// Column values, in column order
    pub values: Vec<Value>,
}

impl Row {
    /// Create a new row
    pub fn new(values: Vec<Value>) -> Self {
        Self { values }
    }

    /// Get a value by column index
    pub fn get(&self, index: usize) -> Option<&Value> {
        self.values.get(index)
    }

    /// Number of cells in the row
    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Column metadata as reported by the driver's row descriptor
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct ColumnMeta {
    /// Column name
    #[serde(default)]
    pub name: String,
    /// Driver-reported type label (e.g. `INT`, `VARCHAR`, `TIMESTAMPTZ`)
    #[serde(default)]
    pub data_type: String,
    /// Column ordinal position (0-based)
    #[serde(default)]
    pub ordinal: usize,
}

impl ColumnMeta {
    pub fn new(name: impl Into<String>, data_type: impl Into<String>, ordinal: usize) -> Self {
        Self {
            name: name.into(),
            data_type: data_type.into(),
            ordinal,
        }
    }
}

/// Engine-native outcome of one statement (or one result set of a statement)
/// before normalization.
///
/// `row_descriptor` is `Some` exactly when the driver described a column set
/// for the result; that is the only signal used to tell row-returning
/// statements from mutations.
#[derive(Debug, Clone, PartialEq)]
pub struct ProvisionalResult {
    /// Column set reported by the driver, if any
    pub row_descriptor: Option<Vec<ColumnMeta>>,
    /// Decoded rows (empty without a row descriptor)
    pub rows: Vec<Row>,
    /// Affected row count exactly as the driver reported it
    pub affected_rows: u64,
}

impl ProvisionalResult {
    /// A row-returning result
    pub fn rows(columns: Vec<ColumnMeta>, rows: Vec<Row>) -> Self {
        Self {
            row_descriptor: Some(columns),
            rows,
            affected_rows: 0,
        }
    }

    /// A mutation/DDL result
    pub fn affected(affected_rows: u64) -> Self {
        Self {
            row_descriptor: None,
            rows: Vec::new(),
            affected_rows,
        }
    }

    /// Whether the driver reported a row descriptor for this result
    pub fn has_row_descriptor(&self) -> bool {
        self.row_descriptor.is_some()
    }
}
