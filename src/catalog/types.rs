use compact_str::CompactString;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

/// Primitive kinds a partition key, resource id or secondary index value
/// may take.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ColumnType {
    Integer,
    Long,
    String,
    Boolean,
    Timestamp,
    Decimal,
}

impl ColumnType {
    pub fn as_str(self) -> &'static str {
        match self {
            ColumnType::Integer => "integer",
            ColumnType::Long => "long",
            ColumnType::String => "string",
            ColumnType::Boolean => "boolean",
            ColumnType::Timestamp => "timestamp",
            ColumnType::Decimal => "decimal",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "integer" => Some(ColumnType::Integer),
            "long" => Some(ColumnType::Long),
            "string" => Some(ColumnType::String),
            "boolean" => Some(ColumnType::Boolean),
            "timestamp" => Some(ColumnType::Timestamp),
            "decimal" => Some(ColumnType::Decimal),
            _ => None,
        }
    }
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A key value tagged with its primitive kind.
///
/// Timestamps are microseconds since the Unix epoch.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Value {
    Integer(i32),
    Long(i64),
    String(CompactString),
    Boolean(bool),
    Timestamp(i64),
    Decimal(Decimal),
}

impl Value {
    pub fn column_type(&self) -> ColumnType {
        match self {
            Value::Integer(_) => ColumnType::Integer,
            Value::Long(_) => ColumnType::Long,
            Value::String(_) => ColumnType::String,
            Value::Boolean(_) => ColumnType::Boolean,
            Value::Timestamp(_) => ColumnType::Timestamp,
            Value::Decimal(_) => ColumnType::Decimal,
        }
    }

    pub fn now() -> Self {
        Value::Timestamp(now_micros())
    }

    pub fn as_long(&self) -> Option<i64> {
        match self {
            Value::Integer(v) => Some(i64::from(*v)),
            Value::Long(v) | Value::Timestamp(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Boolean(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(v) => Some(v.as_str()),
            _ => None,
        }
    }

    /// Stable byte encoding used for hashing keys onto nodes.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(16);
        match self {
            Value::Integer(v) => {
                out.push(0x10);
                out.extend_from_slice(&v.to_be_bytes());
            }
            Value::Long(v) => {
                out.push(0x11);
                out.extend_from_slice(&v.to_be_bytes());
            }
            Value::String(v) => {
                out.push(0x14);
                out.extend_from_slice(v.as_bytes());
            }
            Value::Boolean(v) => {
                out.push(0x16);
                out.push(u8::from(*v));
            }
            Value::Timestamp(v) => {
                out.push(0x12);
                out.extend_from_slice(&v.to_be_bytes());
            }
            Value::Decimal(v) => {
                out.push(0x17);
                out.extend_from_slice(v.normalize().to_string().as_bytes());
            }
        }
        out
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Integer(v) => write!(f, "{v}"),
            Value::Long(v) => write!(f, "{v}"),
            Value::String(v) => write!(f, "'{v}'"),
            Value::Boolean(v) => write!(f, "{v}"),
            Value::Timestamp(v) => write!(f, "@{v}"),
            Value::Decimal(v) => write!(f, "{v}"),
        }
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Value::Integer(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Long(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::String(value.into())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::String(value.into())
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Boolean(value)
    }
}

impl From<Decimal> for Value {
    fn from(value: Decimal) -> Self {
        Value::Decimal(value)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
pub struct Row {
    pub values: Vec<Value>,
}

impl Row {
    pub fn from_values(values: Vec<Value>) -> Self {
        Self { values }
    }
}

/// Lock state shared by the directory as a whole, nodes and primary keys.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum Status {
    #[default]
    Writable,
    ReadOnly,
}

impl Status {
    pub fn from_read_only(read_only: bool) -> Self {
        if read_only {
            Status::ReadOnly
        } else {
            Status::Writable
        }
    }

    pub fn is_read_only(self) -> bool {
        matches!(self, Status::ReadOnly)
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Status::Writable => f.write_str("writable"),
            Status::ReadOnly => f.write_str("read_only"),
        }
    }
}

pub fn now_micros() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| i64::try_from(d.as_micros()).unwrap_or(i64::MAX))
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::{ColumnType, Status, Value};
    use rust_decimal::Decimal;
    use std::str::FromStr;

    #[test]
    fn column_type_names_round_trip() {
        for ty in [
            ColumnType::Integer,
            ColumnType::Long,
            ColumnType::String,
            ColumnType::Boolean,
            ColumnType::Timestamp,
            ColumnType::Decimal,
        ] {
            assert_eq!(ColumnType::parse(ty.as_str()), Some(ty));
        }
        assert_eq!(ColumnType::parse("varchar"), None);
    }

    #[test]
    fn value_reports_its_kind() {
        assert_eq!(Value::from(7).column_type(), ColumnType::Integer);
        assert_eq!(Value::from(7_i64).column_type(), ColumnType::Long);
        assert_eq!(Value::from("NA").column_type(), ColumnType::String);
        assert_eq!(Value::from(true).column_type(), ColumnType::Boolean);
        assert_eq!(Value::Timestamp(1).column_type(), ColumnType::Timestamp);
        assert_eq!(
            Value::from(Decimal::from_str("1.50").expect("decimal")).column_type(),
            ColumnType::Decimal
        );
    }

    #[test]
    fn decimal_encoding_ignores_trailing_zeros() {
        let a = Value::from(Decimal::from_str("1.50").expect("decimal"));
        let b = Value::from(Decimal::from_str("1.5").expect("decimal"));
        assert_eq!(a.encode(), b.encode());
    }

    #[test]
    fn encoding_separates_kinds() {
        assert_ne!(Value::Integer(1).encode(), Value::Long(1).encode());
        assert_ne!(Value::Long(1).encode(), Value::Timestamp(1).encode());
    }

    #[test]
    fn status_maps_read_only_flag() {
        assert_eq!(Status::from_read_only(true), Status::ReadOnly);
        assert_eq!(Status::from_read_only(false), Status::Writable);
        assert!(Status::ReadOnly.is_read_only());
        assert!(!Status::default().is_read_only());
    }
}
