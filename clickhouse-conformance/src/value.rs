//! Tagged values: positional query arguments, external-table cells and decoded result cells.
use std::fmt;
use std::fmt::Write as _;

use chrono::{DateTime, Datelike, NaiveDate, Timelike, Utc};
use uuid::Uuid;

/// Day number of 1970-01-01 counted from the common era, as used by `chrono`.
pub(crate) const UNIX_EPOCH_DAY_CE: i32 = 719_163;

/// A single typed value.
///
/// Strings that are not valid UTF-8 on the wire decode to [`Value::Bytes`].
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Int8(i8),
    Int16(i16),
    Int32(i32),
    Int64(i64),
    UInt8(u8),
    UInt16(u16),
    UInt32(u32),
    UInt64(u64),
    Float32(f32),
    Float64(f64),
    String(String),
    Bytes(Vec<u8>),
    Uuid(Uuid),
    Date(NaiveDate),
    DateTime(DateTime<Utc>),
}

impl Value {
    pub fn is_null(&self) -> bool { matches!(self, Value::Null) }

    /// Name of the variant, used in mismatch diagnostics.
    pub fn variant_name(&self) -> &'static str {
        match self {
            Value::Null => "Null",
            Value::Bool(_) => "Bool",
            Value::Int8(_) => "Int8",
            Value::Int16(_) => "Int16",
            Value::Int32(_) => "Int32",
            Value::Int64(_) => "Int64",
            Value::UInt8(_) => "UInt8",
            Value::UInt16(_) => "UInt16",
            Value::UInt32(_) => "UInt32",
            Value::UInt64(_) => "UInt64",
            Value::Float32(_) => "Float32",
            Value::Float64(_) => "Float64",
            Value::String(_) => "String",
            Value::Bytes(_) => "Bytes",
            Value::Uuid(_) => "Uuid",
            Value::Date(_) => "Date",
            Value::DateTime(_) => "DateTime",
        }
    }

    /// Widen any integer variant; `None` for everything else.
    pub fn as_i128(&self) -> Option<i128> {
        match *self {
            Value::Int8(v) => Some(i128::from(v)),
            Value::Int16(v) => Some(i128::from(v)),
            Value::Int32(v) => Some(i128::from(v)),
            Value::Int64(v) => Some(i128::from(v)),
            Value::UInt8(v) => Some(i128::from(v)),
            Value::UInt16(v) => Some(i128::from(v)),
            Value::UInt32(v) => Some(i128::from(v)),
            Value::UInt64(v) => Some(i128::from(v)),
            _ => None,
        }
    }

    /// Render the value as a SQL literal that the server parses back to the same value.
    pub fn to_sql_literal(&self) -> String {
        match self {
            Value::Null => "NULL".into(),
            Value::Bool(v) => v.to_string(),
            Value::Int8(v) => signed_literal(i64::from(*v)),
            Value::Int16(v) => signed_literal(i64::from(*v)),
            Value::Int32(v) => signed_literal(i64::from(*v)),
            Value::Int64(v) => signed_literal(*v),
            Value::UInt8(v) => v.to_string(),
            Value::UInt16(v) => v.to_string(),
            Value::UInt32(v) => v.to_string(),
            Value::UInt64(v) => v.to_string(),
            Value::Float32(v) => float_literal(f64::from(*v)),
            Value::Float64(v) => float_literal(*v),
            Value::String(v) => quote(v.as_bytes()),
            Value::Bytes(v) => quote(v),
            Value::Uuid(v) => format!("toUUID('{v}')"),
            Value::Date(v) => format!("toDate('{}')", v.format("%Y-%m-%d")),
            Value::DateTime(v) if v.nanosecond() == 0 => {
                format!("toDateTime('{}', 'UTC')", v.format("%Y-%m-%d %H:%M:%S"))
            }
            Value::DateTime(v) => {
                format!("toDateTime64('{}', 9, 'UTC')", v.format("%Y-%m-%d %H:%M:%S%.9f"))
            }
        }
    }

    /// Days since 1970-01-01 for date values.
    pub(crate) fn days_since_epoch(date: NaiveDate) -> i64 {
        i64::from(date.num_days_from_ce() - UNIX_EPOCH_DAY_CE)
    }
}

fn signed_literal(v: i64) -> String { if v < 0 { format!("({v})") } else { v.to_string() } }

fn float_literal(v: f64) -> String {
    if v.is_nan() {
        "nan".into()
    } else if v.is_infinite() {
        if v > 0.0 { "inf".into() } else { "(-inf)".into() }
    } else if v < 0.0 {
        format!("({v})")
    } else {
        v.to_string()
    }
}

/// Single-quote a string, escaping quotes, backslashes and non-printable bytes.
fn quote(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() + 2);
    out.push('\'');
    match std::str::from_utf8(bytes) {
        Ok(s) => {
            for c in s.chars() {
                match c {
                    '\\' => out.push_str("\\\\"),
                    '\'' => out.push_str("\\'"),
                    '\0' => out.push_str("\\0"),
                    _ => out.push(c),
                }
            }
        }
        Err(_) => {
            for &b in bytes {
                match b {
                    b'\\' => out.push_str("\\\\"),
                    b'\'' => out.push_str("\\'"),
                    0x20..=0x7e => out.push(char::from(b)),
                    _ => {
                        let _ = write!(out, "\\x{b:02X}");
                    }
                }
            }
        }
    }
    out.push('\'');
    out
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "NULL"),
            Value::Bool(v) => write!(f, "{v}"),
            Value::Int8(v) => write!(f, "{v}"),
            Value::Int16(v) => write!(f, "{v}"),
            Value::Int32(v) => write!(f, "{v}"),
            Value::Int64(v) => write!(f, "{v}"),
            Value::UInt8(v) => write!(f, "{v}"),
            Value::UInt16(v) => write!(f, "{v}"),
            Value::UInt32(v) => write!(f, "{v}"),
            Value::UInt64(v) => write!(f, "{v}"),
            Value::Float32(v) => write!(f, "{v}"),
            Value::Float64(v) => write!(f, "{v}"),
            Value::String(v) => write!(f, "{v}"),
            Value::Bytes(v) => write!(f, "{}", String::from_utf8_lossy(v)),
            Value::Uuid(v) => write!(f, "{v}"),
            Value::Date(v) => write!(f, "{v}"),
            Value::DateTime(v) => write!(f, "{v}"),
        }
    }
}

macro_rules! impl_from_for_value {
    ($($t:ty => $variant:ident),* $(,)?) => {
        $(
            impl From<$t> for Value {
                fn from(v: $t) -> Self { Value::$variant(v) }
            }
        )*
    };
}

impl_from_for_value!(
    bool => Bool,
    i8 => Int8,
    i16 => Int16,
    i32 => Int32,
    i64 => Int64,
    u8 => UInt8,
    u16 => UInt16,
    u32 => UInt32,
    u64 => UInt64,
    f32 => Float32,
    f64 => Float64,
    String => String,
    Vec<u8> => Bytes,
    Uuid => Uuid,
    NaiveDate => Date,
    DateTime<Utc> => DateTime,
);

impl From<&str> for Value {
    fn from(v: &str) -> Self { Value::String(v.to_string()) }
}

impl From<&[u8]> for Value {
    fn from(v: &[u8]) -> Self { Value::Bytes(v.to_vec()) }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self { v.map_or(Value::Null, Into::into) }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    #[test]
    fn test_integer_literals() {
        assert_eq!(Value::from(10_i32).to_sql_literal(), "10");
        assert_eq!(Value::from(-5_i8).to_sql_literal(), "(-5)");
        assert_eq!(Value::from(u64::MAX).to_sql_literal(), "18446744073709551615");
    }

    #[test]
    fn test_string_literal_escaping() {
        assert_eq!(Value::from("it's").to_sql_literal(), r"'it\'s'");
        assert_eq!(Value::from(r"a\b").to_sql_literal(), r"'a\\b'");
        assert_eq!(Value::from(vec![0xff_u8, b'a']).to_sql_literal(), r"'\xFFa'");
    }

    #[test]
    fn test_temporal_literals() {
        let dt = Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap();
        assert_eq!(Value::from(dt).to_sql_literal(), "toDateTime('2024-01-02 03:04:05', 'UTC')");
        let date = NaiveDate::from_ymd_opt(2024, 1, 2).unwrap();
        assert_eq!(Value::from(date).to_sql_literal(), "toDate('2024-01-02')");
        assert_eq!(Value::days_since_epoch(NaiveDate::from_ymd_opt(1970, 1, 2).unwrap()), 1);
    }

    #[test]
    fn test_option_into_value() {
        assert_eq!(Value::from(None::<u64>), Value::Null);
        assert_eq!(Value::from(Some(3_u64)), Value::UInt64(3));
        assert_eq!(Value::from(Some(3_u64)).as_i128(), Some(3));
        assert_eq!(Value::from("x").as_i128(), None);
    }
}
