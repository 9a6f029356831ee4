//! ClickHouse type names understood by the harness and the reference client.
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use chrono_tz::Tz;
use uuid::Uuid;

use crate::value::{UNIX_EPOCH_DAY_CE, Value};
use crate::{Error, Result};

/// A parsed ClickHouse column type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Type {
    Int8,
    Int16,
    Int32,
    Int64,
    UInt8,
    UInt16,
    UInt32,
    UInt64,
    Float32,
    Float64,
    Bool,
    String,
    FixedString(usize),
    Uuid,
    Date,
    Date32,
    DateTime(Option<Tz>),
    DateTime64(u8, Option<Tz>),
    Nothing,
    Nullable(Box<Type>),
}

impl Type {
    pub fn is_nullable(&self) -> bool { matches!(self, Type::Nullable(_)) }

    #[must_use]
    pub fn strip_null(&self) -> &Type {
        match self {
            Type::Nullable(inner) => inner,
            t => t,
        }
    }

    /// Parse a type name sent by the server. Unknown names are protocol errors there.
    pub(crate) fn from_server(name: &str) -> Result<Self> {
        name.parse::<Type>().map_err(|_| Error::Protocol(format!("unsupported column type {name}")))
    }

    /// Convert `value` to the canonical variant stored for this type.
    ///
    /// # Errors
    /// Returns [`Error::TypeMismatch`] if the value cannot be represented as this type.
    pub fn coerce(&self, value: Value) -> Result<Value> {
        let mismatch = |value: &Value| Error::type_mismatch(self, format!("{value:?}"));

        if let Type::Nullable(inner) = self {
            return if value.is_null() { Ok(Value::Null) } else { inner.coerce(value) };
        }

        macro_rules! int {
            ($t:ty, $variant:ident) => {
                value
                    .as_i128()
                    .and_then(|v| <$t>::try_from(v).ok())
                    .map(Value::$variant)
                    .ok_or_else(|| mismatch(&value))
            };
        }

        match self {
            Type::Int8 => int!(i8, Int8),
            Type::Int16 => int!(i16, Int16),
            Type::Int32 => int!(i32, Int32),
            Type::Int64 => int!(i64, Int64),
            Type::UInt8 => int!(u8, UInt8),
            Type::UInt16 => int!(u16, UInt16),
            Type::UInt32 => int!(u32, UInt32),
            Type::UInt64 => int!(u64, UInt64),
            Type::Float32 => match value {
                Value::Float32(_) => Ok(value),
                _ => Err(mismatch(&value)),
            },
            Type::Float64 => match value {
                Value::Float32(v) => Ok(Value::Float64(f64::from(v))),
                Value::Float64(_) => Ok(value),
                _ => Err(mismatch(&value)),
            },
            Type::Bool => match value {
                Value::Bool(_) => Ok(value),
                Value::UInt8(v @ (0 | 1)) => Ok(Value::Bool(v == 1)),
                _ => Err(mismatch(&value)),
            },
            Type::String => match value {
                Value::String(_) | Value::Bytes(_) => Ok(value),
                _ => Err(mismatch(&value)),
            },
            Type::FixedString(n) => {
                let mut bytes = match value {
                    Value::String(ref s) if s.len() <= *n => s.as_bytes().to_vec(),
                    Value::Bytes(ref b) if b.len() <= *n => b.clone(),
                    _ => return Err(mismatch(&value)),
                };
                bytes.resize(*n, 0);
                Ok(Value::Bytes(bytes))
            }
            Type::Uuid => match value {
                Value::Uuid(_) => Ok(value),
                Value::String(ref s) => {
                    Uuid::parse_str(s).map(Value::Uuid).map_err(|_| mismatch(&value))
                }
                _ => Err(mismatch(&value)),
            },
            Type::Date => match value {
                Value::Date(d) if u16::try_from(Value::days_since_epoch(d)).is_ok() => Ok(value),
                _ => Err(mismatch(&value)),
            },
            Type::Date32 => match value {
                Value::Date(d) if i32::try_from(Value::days_since_epoch(d)).is_ok() => Ok(value),
                _ => Err(mismatch(&value)),
            },
            Type::DateTime(_) => match value {
                Value::DateTime(dt) if u32::try_from(dt.timestamp()).is_ok() => Ok(value),
                Value::UInt32(secs) => DateTime::<Utc>::from_timestamp(i64::from(secs), 0)
                    .map(Value::DateTime)
                    .ok_or_else(|| mismatch(&value)),
                _ => Err(mismatch(&value)),
            },
            Type::DateTime64(precision, _) => match value {
                Value::DateTime(dt) if datetime64_ticks(dt, *precision).is_some() => Ok(value),
                _ => Err(mismatch(&value)),
            },
            Type::Nothing | Type::Nullable(_) => Err(mismatch(&value)),
        }
    }
}

/// Ticks of `10^-precision` seconds since the epoch.
pub(crate) fn datetime64_ticks(dt: DateTime<Utc>, precision: u8) -> Option<i64> {
    let precision = u32::from(precision);
    if precision > 9 {
        return None;
    }
    let secs = dt.timestamp().checked_mul(10_i64.pow(precision))?;
    let frac = i64::from(dt.timestamp_subsec_nanos()) / 10_i64.pow(9 - precision);
    secs.checked_add(frac)
}

/// Inverse of [`datetime64_ticks`].
pub(crate) fn datetime64_from_ticks(ticks: i64, precision: u8) -> Option<DateTime<Utc>> {
    let precision = u32::from(precision);
    if precision > 9 {
        return None;
    }
    let scale = 10_i64.pow(precision);
    let secs = ticks.div_euclid(scale);
    let nanos = u32::try_from(ticks.rem_euclid(scale) * 10_i64.pow(9 - precision)).ok()?;
    DateTime::<Utc>::from_timestamp(secs, nanos)
}

pub(crate) fn date_from_days(days: i64) -> Option<NaiveDate> {
    let days = i32::try_from(days).ok()?.checked_add(UNIX_EPOCH_DAY_CE)?;
    NaiveDate::from_num_days_from_ce_opt(days)
}

/// Strip `prefix(` ... `)` from a type name.
fn unwrap_args<'a>(name: &'a str, prefix: &str) -> Option<&'a str> {
    name.strip_prefix(prefix)?.strip_prefix('(')?.strip_suffix(')').map(str::trim)
}

fn parse_tz(arg: &str) -> Result<Tz> {
    let arg = arg.trim();
    let tz = arg
        .strip_prefix('\'')
        .and_then(|a| a.strip_suffix('\''))
        .ok_or_else(|| Error::InvalidArgument(format!("malformed timezone argument {arg}")))?;
    tz.parse::<Tz>().map_err(|_| Error::InvalidArgument(format!("unknown timezone {tz}")))
}

impl FromStr for Type {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let name = s.trim();
        let unknown = || Error::InvalidArgument(format!("unknown ClickHouse type {name:?}"));

        if let Some(inner) = unwrap_args(name, "Nullable") {
            let inner = inner.parse::<Type>()?;
            if inner.is_nullable() {
                return Err(Error::InvalidArgument(format!("nested Nullable in {name}")));
            }
            return Ok(Type::Nullable(Box::new(inner)));
        }
        if let Some(arg) = unwrap_args(name, "FixedString") {
            let n = arg.parse::<usize>().ok().filter(|n| *n > 0).ok_or_else(unknown)?;
            return Ok(Type::FixedString(n));
        }
        if let Some(arg) = unwrap_args(name, "DateTime64") {
            let (precision, tz) = match arg.split_once(',') {
                Some((p, tz)) => (p.trim(), Some(parse_tz(tz)?)),
                None => (arg, None),
            };
            let precision = precision.parse::<u8>().ok().filter(|p| *p <= 9).ok_or_else(unknown)?;
            return Ok(Type::DateTime64(precision, tz));
        }
        if let Some(arg) = unwrap_args(name, "DateTime") {
            return Ok(Type::DateTime(Some(parse_tz(arg)?)));
        }

        Ok(match name {
            "Int8" => Type::Int8,
            "Int16" => Type::Int16,
            "Int32" => Type::Int32,
            "Int64" => Type::Int64,
            "UInt8" => Type::UInt8,
            "UInt16" => Type::UInt16,
            "UInt32" => Type::UInt32,
            "UInt64" => Type::UInt64,
            "Float32" => Type::Float32,
            "Float64" => Type::Float64,
            "Bool" => Type::Bool,
            "String" => Type::String,
            "UUID" => Type::Uuid,
            "Date" => Type::Date,
            "Date32" => Type::Date32,
            "DateTime" => Type::DateTime(None),
            "Nothing" => Type::Nothing,
            _ => return Err(unknown()),
        })
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Type::Int8 => write!(f, "Int8"),
            Type::Int16 => write!(f, "Int16"),
            Type::Int32 => write!(f, "Int32"),
            Type::Int64 => write!(f, "Int64"),
            Type::UInt8 => write!(f, "UInt8"),
            Type::UInt16 => write!(f, "UInt16"),
            Type::UInt32 => write!(f, "UInt32"),
            Type::UInt64 => write!(f, "UInt64"),
            Type::Float32 => write!(f, "Float32"),
            Type::Float64 => write!(f, "Float64"),
            Type::Bool => write!(f, "Bool"),
            Type::String => write!(f, "String"),
            Type::FixedString(n) => write!(f, "FixedString({n})"),
            Type::Uuid => write!(f, "UUID"),
            Type::Date => write!(f, "Date"),
            Type::Date32 => write!(f, "Date32"),
            Type::DateTime(None) => write!(f, "DateTime"),
            Type::DateTime(Some(tz)) => write!(f, "DateTime('{}')", tz.name()),
            Type::DateTime64(p, None) => write!(f, "DateTime64({p})"),
            Type::DateTime64(p, Some(tz)) => write!(f, "DateTime64({p}, '{}')", tz.name()),
            Type::Nothing => write!(f, "Nothing"),
            Type::Nullable(inner) => write!(f, "Nullable({inner})"),
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;
    use crate::ErrorKind;

    #[test]
    fn test_parse_and_display() {
        for name in [
            "UInt8",
            "Nullable(UInt64)",
            "FixedString(16)",
            "DateTime",
            "DateTime('UTC')",
            "DateTime64(3)",
            "DateTime64(6, 'Europe/Berlin')",
            "UUID",
            "Nullable(Nothing)",
        ] {
            assert_eq!(name.parse::<Type>().unwrap().to_string(), name);
        }
    }

    #[test]
    fn test_parse_rejects_unknown() {
        for name in ["", "Uint8", "Nullable(Nullable(UInt8))", "FixedString(0)", "Array(UInt8)"] {
            assert_eq!(name.parse::<Type>().unwrap_err().kind(), ErrorKind::InvalidArgument);
        }
        let err = Type::from_server("Map(String, UInt8)").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Protocol);
    }

    #[test]
    fn test_coerce_integers() {
        assert_eq!(Type::UInt8.coerce(Value::Int32(9)).unwrap(), Value::UInt8(9));
        let err = Type::UInt8.coerce(Value::Int32(256)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::TypeMismatch);
        assert_eq!(Type::Int8.coerce(Value::Int64(-128)).unwrap(), Value::Int8(-128));
        let err = Type::UInt64.coerce(Value::from("1")).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::TypeMismatch);
    }

    #[test]
    fn test_coerce_nullability() {
        let nullable = Type::Nullable(Box::new(Type::UInt64));
        assert_eq!(nullable.coerce(Value::Null).unwrap(), Value::Null);
        assert_eq!(nullable.coerce(Value::UInt8(1)).unwrap(), Value::UInt64(1));
        assert_eq!(Type::UInt64.coerce(Value::Null).unwrap_err().kind(), ErrorKind::TypeMismatch);
    }

    #[test]
    fn test_coerce_strings_and_times() {
        assert_eq!(
            Type::FixedString(4).coerce(Value::from("ab")).unwrap(),
            Value::Bytes(vec![b'a', b'b', 0, 0])
        );
        assert!(Type::FixedString(1).coerce(Value::from("ab")).is_err());

        let now = Utc.with_ymd_and_hms(2024, 5, 6, 7, 8, 9).unwrap();
        assert_eq!(Type::DateTime(None).coerce(Value::from(now)).unwrap(), Value::DateTime(now));
        let before_epoch = Utc.with_ymd_and_hms(1960, 1, 1, 0, 0, 0).unwrap();
        assert!(Type::DateTime(None).coerce(Value::from(before_epoch)).is_err());
        assert!(Type::DateTime(None).coerce(Value::from("2024-01-01")).is_err());
    }

    #[test]
    fn test_datetime64_ticks() {
        let dt = Utc.timestamp_opt(1_700_000_000, 123_456_789).unwrap();
        assert_eq!(datetime64_ticks(dt, 3), Some(1_700_000_000_123));
        let millis = datetime64_from_ticks(1_700_000_000_123, 3).unwrap();
        assert_eq!(millis.timestamp_subsec_millis(), 123);
        assert_eq!(datetime64_from_ticks(-1, 0).unwrap().timestamp(), -1);
        assert_eq!(date_from_days(0), NaiveDate::from_ymd_opt(1970, 1, 1));
    }
}
