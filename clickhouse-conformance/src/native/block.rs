//! Block codec: block info header, column headers and the column data of every supported type.
use bytes::BufMut;
use chrono::DateTime;
use tokio::io::AsyncReadExt;
use uuid::Uuid;

use super::io::{ClickHouseBytesWrite, ClickHouseRead};
use crate::types::{Type, date_from_days, datetime64_from_ticks, datetime64_ticks};
use crate::value::Value;
use crate::{Error, Result};

/// Upper bounds that guard allocations against corrupt headers.
const MAX_COLUMNS: u64 = 1 << 16;
const MAX_ROWS: u64 = 1 << 28;

/// A decoded data block, stored row-major so rows can be borrowed as slices.
#[derive(Debug, Clone, Default, PartialEq)]
pub(crate) struct Block {
    pub(crate) names: Vec<String>,
    pub(crate) types: Vec<Type>,
    pub(crate) rows:  usize,
    cells:            Vec<Value>,
}

impl Block {
    pub(crate) fn row(&self, index: usize) -> Option<&[Value]> {
        let width = self.names.len();
        (index < self.rows).then(|| &self.cells[index * width..(index + 1) * width])
    }

    pub(crate) async fn read<R: ClickHouseRead>(reader: &mut R) -> Result<Self> {
        read_block_info(reader).await?;

        let columns = reader.read_var_uint().await?;
        let rows = reader.read_var_uint().await?;
        if columns > MAX_COLUMNS || rows > MAX_ROWS {
            return Err(Error::Protocol(format!("block of {columns}x{rows} exceeds limits")));
        }
        #[expect(clippy::cast_possible_truncation)]
        let (columns, rows) = (columns as usize, rows as usize);

        let mut names = Vec::with_capacity(columns);
        let mut types = Vec::with_capacity(columns);
        let mut data = Vec::with_capacity(columns);
        for _ in 0..columns {
            names.push(reader.read_utf8_string().await?);
            let ty = Type::from_server(&reader.read_utf8_string().await?)?;
            data.push(read_column(reader, &ty, rows).await?.into_iter());
            types.push(ty);
        }

        let mut cells = Vec::with_capacity(columns * rows);
        for _ in 0..rows {
            for column in &mut data {
                cells.push(column.next().unwrap_or(Value::Null));
            }
        }
        Ok(Self { names, types, rows, cells })
    }
}

async fn read_block_info<R: ClickHouseRead>(reader: &mut R) -> Result<()> {
    loop {
        match reader.read_var_uint().await? {
            0 => return Ok(()),
            // is_overflows
            1 => {
                let _ = reader.read_u8().await?;
            }
            // bucket_num
            2 => {
                let _ = reader.read_i32_le().await?;
            }
            field => return Err(Error::Protocol(format!("unknown block info field {field}"))),
        }
    }
}

async fn read_column<R: ClickHouseRead>(
    reader: &mut R,
    ty: &Type,
    rows: usize,
) -> Result<Vec<Value>> {
    let Type::Nullable(inner) = ty else {
        return read_values(reader, ty, rows).await;
    };
    let mut nulls = vec![0u8; rows];
    let _ = reader.read_exact(&mut nulls).await?;
    let mut values = read_values(reader, inner, rows).await?;
    for (value, null) in values.iter_mut().zip(nulls) {
        if null != 0 {
            *value = Value::Null;
        }
    }
    Ok(values)
}

async fn read_values<R: ClickHouseRead>(
    reader: &mut R,
    ty: &Type,
    rows: usize,
) -> Result<Vec<Value>> {
    let invalid = |what: &str| Error::Protocol(format!("invalid {what} value for {ty}"));
    let mut values = Vec::with_capacity(rows);
    for _ in 0..rows {
        let value = match ty {
            Type::Int8 => Value::Int8(reader.read_i8().await?),
            Type::Int16 => Value::Int16(reader.read_i16_le().await?),
            Type::Int32 => Value::Int32(reader.read_i32_le().await?),
            Type::Int64 => Value::Int64(reader.read_i64_le().await?),
            Type::UInt8 => Value::UInt8(reader.read_u8().await?),
            Type::UInt16 => Value::UInt16(reader.read_u16_le().await?),
            Type::UInt32 => Value::UInt32(reader.read_u32_le().await?),
            Type::UInt64 => Value::UInt64(reader.read_u64_le().await?),
            Type::Float32 => Value::Float32(reader.read_f32_le().await?),
            Type::Float64 => Value::Float64(reader.read_f64_le().await?),
            Type::Bool => Value::Bool(reader.read_u8().await? != 0),
            Type::String => match String::from_utf8(reader.read_string().await?) {
                Ok(s) => Value::String(s),
                Err(e) => Value::Bytes(e.into_bytes()),
            },
            Type::FixedString(n) => {
                let mut bytes = vec![0u8; *n];
                let _ = reader.read_exact(&mut bytes).await?;
                Value::Bytes(bytes)
            }
            Type::Uuid => {
                let high = reader.read_u64_le().await?;
                let low = reader.read_u64_le().await?;
                Value::Uuid(Uuid::from_u64_pair(high, low))
            }
            Type::Date => {
                let days = i64::from(reader.read_u16_le().await?);
                Value::Date(date_from_days(days).ok_or_else(|| invalid("date"))?)
            }
            Type::Date32 => {
                let days = i64::from(reader.read_i32_le().await?);
                Value::Date(date_from_days(days).ok_or_else(|| invalid("date"))?)
            }
            Type::DateTime(_) => {
                let secs = i64::from(reader.read_u32_le().await?);
                let dt = DateTime::from_timestamp(secs, 0).ok_or_else(|| invalid("datetime"))?;
                Value::DateTime(dt)
            }
            Type::DateTime64(precision, _) => {
                let ticks = reader.read_i64_le().await?;
                Value::DateTime(
                    datetime64_from_ticks(ticks, *precision).ok_or_else(|| invalid("datetime"))?,
                )
            }
            Type::Nothing => {
                let _ = reader.read_u8().await?;
                Value::Null
            }
            Type::Nullable(_) => return Err(Error::Protocol(format!("nested nullable type {ty}"))),
        };
        values.push(value);
    }
    Ok(values)
}

fn write_block_info(buf: &mut impl BufMut) {
    buf.put_var_uint(1);
    buf.put_u8(0);
    buf.put_var_uint(2);
    buf.put_i32_le(-1);
    buf.put_var_uint(0);
}

/// Encode a block from column-major data. Values must already be coerced to their column type.
pub(crate) fn write_block<'a>(
    buf: &mut impl BufMut,
    rows: usize,
    columns: impl ExactSizeIterator<Item = (&'a str, &'a Type, &'a [Value])>,
) -> Result<()> {
    write_block_info(buf);
    buf.put_var_uint(columns.len() as u64);
    buf.put_var_uint(rows as u64);
    for (name, ty, values) in columns {
        if values.len() != rows {
            return Err(Error::ArityMismatch { expected: rows, provided: values.len() });
        }
        buf.put_string(name);
        buf.put_string(ty.to_string());
        write_column(buf, ty, values)?;
    }
    Ok(())
}

/// The empty block that terminates a stream of data blocks.
pub(crate) fn write_empty_block(buf: &mut impl BufMut) {
    write_block_info(buf);
    buf.put_var_uint(0);
    buf.put_var_uint(0);
}

fn write_column(buf: &mut impl BufMut, ty: &Type, values: &[Value]) -> Result<()> {
    let Type::Nullable(inner) = ty else {
        return values.iter().try_for_each(|value| write_value(buf, ty, value));
    };
    for value in values {
        buf.put_u8(u8::from(value.is_null()));
    }
    for value in values {
        if value.is_null() {
            write_default(buf, inner);
        } else {
            write_value(buf, inner, value)?;
        }
    }
    Ok(())
}

fn write_default(buf: &mut impl BufMut, ty: &Type) {
    match ty {
        Type::Int8 | Type::UInt8 | Type::Bool | Type::Nothing => buf.put_u8(0),
        Type::Int16 | Type::UInt16 | Type::Date => buf.put_u16_le(0),
        Type::Int32 | Type::UInt32 | Type::Float32 | Type::Date32 | Type::DateTime(_) => {
            buf.put_u32_le(0);
        }
        Type::Int64 | Type::UInt64 | Type::Float64 | Type::DateTime64(..) => buf.put_u64_le(0),
        Type::String => buf.put_var_uint(0),
        Type::FixedString(n) => buf.put_bytes(0, *n),
        Type::Uuid => buf.put_bytes(0, 16),
        Type::Nullable(inner) => write_default(buf, inner),
    }
}

fn write_value(buf: &mut impl BufMut, ty: &Type, value: &Value) -> Result<()> {
    let mismatch = || Error::type_mismatch(ty, value.variant_name());
    match (ty, value) {
        (Type::Int8, Value::Int8(v)) => buf.put_i8(*v),
        (Type::Int16, Value::Int16(v)) => buf.put_i16_le(*v),
        (Type::Int32, Value::Int32(v)) => buf.put_i32_le(*v),
        (Type::Int64, Value::Int64(v)) => buf.put_i64_le(*v),
        (Type::UInt8, Value::UInt8(v)) => buf.put_u8(*v),
        (Type::UInt16, Value::UInt16(v)) => buf.put_u16_le(*v),
        (Type::UInt32, Value::UInt32(v)) => buf.put_u32_le(*v),
        (Type::UInt64, Value::UInt64(v)) => buf.put_u64_le(*v),
        (Type::Float32, Value::Float32(v)) => buf.put_f32_le(*v),
        (Type::Float64, Value::Float64(v)) => buf.put_f64_le(*v),
        (Type::Bool, Value::Bool(v)) => buf.put_u8(u8::from(*v)),
        (Type::String, Value::String(v)) => buf.put_string(v),
        (Type::String, Value::Bytes(v)) => buf.put_string(v),
        (Type::FixedString(n), Value::Bytes(v)) if v.len() == *n => buf.put_slice(v),
        (Type::Uuid, Value::Uuid(v)) => {
            let (high, low) = v.as_u64_pair();
            buf.put_u64_le(high);
            buf.put_u64_le(low);
        }
        (Type::Date, Value::Date(d)) => {
            buf.put_u16_le(u16::try_from(Value::days_since_epoch(*d)).map_err(|_| mismatch())?);
        }
        (Type::Date32, Value::Date(d)) => {
            buf.put_i32_le(i32::try_from(Value::days_since_epoch(*d)).map_err(|_| mismatch())?);
        }
        (Type::DateTime(_), Value::DateTime(dt)) => {
            buf.put_u32_le(u32::try_from(dt.timestamp()).map_err(|_| mismatch())?);
        }
        (Type::DateTime64(precision, _), Value::DateTime(dt)) => {
            buf.put_i64_le(datetime64_ticks(*dt, *precision).ok_or_else(mismatch)?);
        }
        (Type::Nothing, Value::Null) => buf.put_u8(0),
        _ => return Err(mismatch()),
    }
    Ok(())
}
