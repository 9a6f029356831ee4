//! Positional scan destinations for result rows.
//!
//! A row is scanned into a tuple whose arity must equal the column count. `Nullable` columns
//! need an `Option<T>` destination; everything else may scan into either form.
use chrono::{DateTime, NaiveDate, Utc};
use uuid::Uuid;

use crate::types::Type;
use crate::value::Value;
use crate::{Error, Result};

/// Borrowed view of the current row of a result set.
#[derive(Debug, Clone, Copy)]
pub struct RowRef<'a> {
    pub values: &'a [Value],
    pub names:  &'a [String],
    pub types:  &'a [Type],
}

impl RowRef<'_> {
    pub fn len(&self) -> usize { self.values.len() }

    pub fn is_empty(&self) -> bool { self.values.is_empty() }

    /// Scan the cell at `index` into `T`, enforcing the nullable-destination rule.
    ///
    /// # Errors
    /// Returns [`Error::TypeMismatch`] (with the column name attached) if the cell does not fit.
    pub fn get<T: FromValue>(&self, index: usize) -> Result<T> {
        let value = self.values.get(index).ok_or_else(|| {
            Error::InvalidArgument(format!("column index {index} out of range ({})", self.len()))
        })?;
        let name = self.names.get(index).map_or("", String::as_str);
        if let Some(ty) = self.types.get(index)
            && ty.is_nullable()
            && !T::NULLABLE
        {
            return Err(Error::type_mismatch("nullable destination", ty).with_column_name(name));
        }
        T::from_value(value).map_err(|e| e.with_column_name(name))
    }
}

/// A single scan destination.
pub trait FromValue: Sized {
    /// Whether the destination can represent an absent value.
    const NULLABLE: bool = false;

    /// # Errors
    /// Returns [`Error::TypeMismatch`] if `value` cannot be represented as `Self`.
    fn from_value(value: &Value) -> Result<Self>;
}

fn mismatch(expected: &str, value: &Value) -> Error {
    Error::type_mismatch(expected, value.variant_name())
}

macro_rules! impl_from_value_int {
    ($($t:ty),* $(,)?) => {
        $(
            impl FromValue for $t {
                fn from_value(value: &Value) -> Result<Self> {
                    value
                        .as_i128()
                        .and_then(|v| <$t>::try_from(v).ok())
                        .ok_or_else(|| mismatch(stringify!($t), value))
                }
            }
        )*
    };
}

impl_from_value_int!(i8, i16, i32, i64, u8, u16, u32, u64);

impl FromValue for f32 {
    fn from_value(value: &Value) -> Result<Self> {
        match value {
            Value::Float32(v) => Ok(*v),
            _ => Err(mismatch("f32", value)),
        }
    }
}

impl FromValue for f64 {
    fn from_value(value: &Value) -> Result<Self> {
        match value {
            Value::Float32(v) => Ok(f64::from(*v)),
            Value::Float64(v) => Ok(*v),
            _ => Err(mismatch("f64", value)),
        }
    }
}

impl FromValue for bool {
    fn from_value(value: &Value) -> Result<Self> {
        match value {
            Value::Bool(v) => Ok(*v),
            Value::UInt8(v @ (0 | 1)) => Ok(*v == 1),
            _ => Err(mismatch("bool", value)),
        }
    }
}

impl FromValue for String {
    fn from_value(value: &Value) -> Result<Self> {
        match value {
            Value::String(v) => Ok(v.clone()),
            _ => Err(mismatch("String", value)),
        }
    }
}

impl FromValue for Vec<u8> {
    fn from_value(value: &Value) -> Result<Self> {
        match value {
            Value::String(v) => Ok(v.as_bytes().to_vec()),
            Value::Bytes(v) => Ok(v.clone()),
            _ => Err(mismatch("Vec<u8>", value)),
        }
    }
}

impl FromValue for Uuid {
    fn from_value(value: &Value) -> Result<Self> {
        match value {
            Value::Uuid(v) => Ok(*v),
            _ => Err(mismatch("Uuid", value)),
        }
    }
}

impl FromValue for NaiveDate {
    fn from_value(value: &Value) -> Result<Self> {
        match value {
            Value::Date(v) => Ok(*v),
            _ => Err(mismatch("NaiveDate", value)),
        }
    }
}

impl FromValue for DateTime<Utc> {
    fn from_value(value: &Value) -> Result<Self> {
        match value {
            Value::DateTime(v) => Ok(*v),
            _ => Err(mismatch("DateTime<Utc>", value)),
        }
    }
}

impl FromValue for Value {
    const NULLABLE: bool = true;

    fn from_value(value: &Value) -> Result<Self> { Ok(value.clone()) }
}

impl<T: FromValue> FromValue for Option<T> {
    const NULLABLE: bool = true;

    fn from_value(value: &Value) -> Result<Self> {
        if value.is_null() { Ok(None) } else { T::from_value(value).map(Some) }
    }
}

/// A full row of scan destinations.
pub trait FromRow: Sized {
    /// # Errors
    /// Returns [`Error::ArityMismatch`] or [`Error::TypeMismatch`].
    fn from_row(row: RowRef<'_>) -> Result<Self>;
}

impl FromRow for Vec<Value> {
    fn from_row(row: RowRef<'_>) -> Result<Self> { Ok(row.values.to_vec()) }
}

macro_rules! impl_from_row_tuple {
    ($len:literal => $($t:ident $idx:tt),+) => {
        impl<$($t: FromValue),+> FromRow for ($($t,)+) {
            fn from_row(row: RowRef<'_>) -> Result<Self> {
                if row.len() != $len {
                    return Err(Error::ArityMismatch { expected: row.len(), provided: $len });
                }
                Ok(($(row.get::<$t>($idx)?,)+))
            }
        }
    };
}

impl_from_row_tuple!(1 => A 0);
impl_from_row_tuple!(2 => A 0, B 1);
impl_from_row_tuple!(3 => A 0, B 1, C 2);
impl_from_row_tuple!(4 => A 0, B 1, C 2, D 3);
impl_from_row_tuple!(5 => A 0, B 1, C 2, D 3, E 4);
impl_from_row_tuple!(6 => A 0, B 1, C 2, D 3, E 4, F 5);
impl_from_row_tuple!(7 => A 0, B 1, C 2, D 3, E 4, F 5, G 6);
impl_from_row_tuple!(8 => A 0, B 1, C 2, D 3, E 4, F 5, G 6, H 7);
impl_from_row_tuple!(9 => A 0, B 1, C 2, D 3, E 4, F 5, G 6, H 7, I 8);
impl_from_row_tuple!(10 => A 0, B 1, C 2, D 3, E 4, F 5, G 6, H 7, I 8, J 9);
impl_from_row_tuple!(11 => A 0, B 1, C 2, D 3, E 4, F 5, G 6, H 7, I 8, J 9, K 10);
impl_from_row_tuple!(12 => A 0, B 1, C 2, D 3, E 4, F 5, G 6, H 7, I 8, J 9, K 10, L 11);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ErrorKind;

    fn row<'a>(values: &'a [Value], names: &'a [String], types: &'a [Type]) -> RowRef<'a> {
        RowRef { values, names, types }
    }

    #[test]
    fn test_scan_nullable_columns() {
        let names = vec!["int".to_string(), "nullable".to_string()];
        let types = vec![Type::UInt64, Type::Nullable(Box::new(Type::UInt64))];

        let values = vec![Value::UInt64(3), Value::UInt64(3)];
        let (a, b) = <(u64, Option<u64>)>::from_row(row(&values, &names, &types)).unwrap();
        assert_eq!((a, b), (3, Some(3)));

        let values = vec![Value::UInt64(4), Value::Null];
        let (_, b) = <(u64, Option<u64>)>::from_row(row(&values, &names, &types)).unwrap();
        assert_eq!(b, None);

        // A Nullable column needs an Option destination even when the cell is present.
        let values = vec![Value::UInt64(3), Value::UInt64(3)];
        let err = <(u64, u64)>::from_row(row(&values, &names, &types)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::TypeMismatch);
        assert!(err.to_string().contains("nullable"));
    }

    #[test]
    fn test_scan_arity() {
        let names = vec!["a".to_string()];
        let types = vec![Type::UInt8];
        let values = vec![Value::UInt8(1)];
        let err = <(u8, u8)>::from_row(row(&values, &names, &types)).unwrap_err();
        assert!(matches!(err, Error::ArityMismatch { expected: 1, provided: 2 }));
        let all = Vec::<Value>::from_row(row(&values, &names, &types)).unwrap();
        assert_eq!(all, values);
    }

    #[test]
    fn test_scan_integer_widths() {
        let names = vec!["a".to_string(), "b".to_string()];
        let types = vec![Type::Int8, Type::UInt64];
        let values = vec![Value::Int8(10), Value::UInt64(1000)];
        let (a, b) = <(i64, u16)>::from_row(row(&values, &names, &types)).unwrap();
        assert_eq!((a, b), (10, 1000));
        let err = <(i8, u8)>::from_row(row(&values, &names, &types)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::TypeMismatch);
    }

    #[test]
    fn test_scan_strings() {
        assert_eq!(String::from_value(&Value::from("x")).unwrap(), "x");
        assert!(String::from_value(&Value::Bytes(vec![0xff])).is_err());
        assert_eq!(Vec::<u8>::from_value(&Value::from("x")).unwrap(), b"x");
    }
}
