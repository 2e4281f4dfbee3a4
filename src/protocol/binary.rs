//! Binary COPY record writer.
//!
//! Wire format (all integers big-endian):
//! - header: `PGCOPY\n\xff\r\n\0`, flags (i32 = 0), extension length (i32 = 0)
//! - row: field count (i16), then per field a length (i32) and payload, or -1 for NULL
//! - footer: -1 (i16)
//!
//! Reference: https://www.postgresql.org/docs/current/sql-copy.html#id-1.9.3.55.9.4

use arrow::array::cast::AsArray;
use arrow::array::types::{
    Date32Type, Date64Type, Float32Type, Float64Type, Int8Type, Int16Type, Int32Type, Int64Type,
    Time32MillisecondType, Time32SecondType, Time64MicrosecondType, Time64NanosecondType,
    TimestampMicrosecondType, TimestampMillisecondType, TimestampNanosecondType,
    TimestampSecondType, UInt8Type, UInt16Type, UInt32Type, UInt64Type,
};
use arrow::array::{Array, StructArray};
use arrow::datatypes::{DataType, TimeUnit};
use bytes::{BufMut, BytesMut};

use super::EncodeError;
use super::types::{field_oid, scalar_oid};
use crate::config::CopyOptions;

/// Binary COPY file signature.
pub const SIGNATURE: &[u8; 11] = b"PGCOPY\n\xff\r\n\0";

/// Days from 1970-01-01 to 2000-01-01 (PostgreSQL's epoch).
const PG_EPOCH_DAYS: i64 = 10_957;
const PG_EPOCH_MICROS: i64 = PG_EPOCH_DAYS * MICROS_PER_DAY;
const MICROS_PER_DAY: i64 = 86_400_000_000;
const MILLIS_PER_DAY: i64 = 86_400_000;

/// Writes binary COPY frames into a session buffer.
pub struct BinaryWriter<'a> {
    buf: &'a mut BytesMut,
    replacement: Option<&'a str>,
    pending_fields: usize,
}

impl<'a> BinaryWriter<'a> {
    pub fn new(buf: &'a mut BytesMut, options: &'a CopyOptions) -> Self {
        Self {
            buf,
            replacement: options.null_byte_replacement.as_deref(),
            pending_fields: 0,
        }
    }

    /// Signature, flags and an empty header extension.
    pub fn write_header(&mut self) {
        self.buf.reserve(SIGNATURE.len() + 8);
        self.buf.put_slice(SIGNATURE);
        self.buf.put_i32(0);
        self.buf.put_i32(0);
    }

    pub fn begin_row(&mut self, field_count: usize) -> Result<(), EncodeError> {
        let count =
            i16::try_from(field_count).map_err(|_| EncodeError::TooManyColumns(field_count))?;
        self.buf.put_i16(count);
        self.pending_fields = field_count;
        Ok(())
    }

    pub fn write_value(&mut self, array: &dyn Array, row: usize) -> Result<(), EncodeError> {
        debug_assert!(self.pending_fields > 0, "more fields than announced by begin_row");
        self.pending_fields = self.pending_fields.saturating_sub(1);
        write_field(self.buf, array, row, self.replacement)
    }

    pub fn finish_row(&mut self) {
        debug_assert_eq!(self.pending_fields, 0, "row finished with fields missing");
    }

    pub fn write_footer(&mut self) {
        self.buf.put_i16(-1);
    }
}

#[inline]
fn is_null(array: &dyn Array, row: usize) -> bool {
    matches!(array.data_type(), DataType::Null) || array.is_null(row)
}

/// One length-prefixed field. The length is patched in after the payload.
fn write_field(
    buf: &mut BytesMut,
    array: &dyn Array,
    row: usize,
    replacement: Option<&str>,
) -> Result<(), EncodeError> {
    if is_null(array, row) {
        buf.put_i32(-1);
        return Ok(());
    }
    let len_at = buf.len();
    buf.put_i32(0);
    encode_value(buf, array, row, replacement)?;
    let len = buf.len() - len_at - 4;
    let len = i32::try_from(len).map_err(|_| EncodeError::FieldTooLarge(len))?;
    buf[len_at..len_at + 4].copy_from_slice(&len.to_be_bytes());
    Ok(())
}

fn out_of_range(target: &'static str, value: impl ToString) -> EncodeError {
    EncodeError::OutOfRange {
        target,
        value: value.to_string(),
    }
}

fn encode_value(
    buf: &mut BytesMut,
    array: &dyn Array,
    row: usize,
    replacement: Option<&str>,
) -> Result<(), EncodeError> {
    match array.data_type() {
        DataType::Boolean => buf.put_u8(array.as_boolean().value(row) as u8),

        DataType::Int8 => buf.put_i16(array.as_primitive::<Int8Type>().value(row).into()),
        DataType::Int16 => buf.put_i16(array.as_primitive::<Int16Type>().value(row)),
        DataType::Int32 => buf.put_i32(array.as_primitive::<Int32Type>().value(row)),
        DataType::Int64 => buf.put_i64(array.as_primitive::<Int64Type>().value(row)),
        DataType::UInt8 => buf.put_i16(array.as_primitive::<UInt8Type>().value(row).into()),
        DataType::UInt16 => buf.put_i32(array.as_primitive::<UInt16Type>().value(row).into()),
        DataType::UInt32 => buf.put_i64(array.as_primitive::<UInt32Type>().value(row).into()),
        DataType::UInt64 => {
            let v = array.as_primitive::<UInt64Type>().value(row);
            buf.put_i64(i64::try_from(v).map_err(|_| out_of_range("int8", v))?);
        }

        DataType::Float32 => buf.put_f32(array.as_primitive::<Float32Type>().value(row)),
        DataType::Float64 => buf.put_f64(array.as_primitive::<Float64Type>().value(row)),

        DataType::Utf8 => put_text(buf, array.as_string::<i32>().value(row), replacement)?,
        DataType::LargeUtf8 => put_text(buf, array.as_string::<i64>().value(row), replacement)?,

        DataType::Binary => buf.put_slice(array.as_binary::<i32>().value(row)),
        DataType::LargeBinary => buf.put_slice(array.as_binary::<i64>().value(row)),
        DataType::FixedSizeBinary(_) => buf.put_slice(array.as_fixed_size_binary().value(row)),

        DataType::Date32 => {
            let days = i64::from(array.as_primitive::<Date32Type>().value(row)) - PG_EPOCH_DAYS;
            buf.put_i32(i32::try_from(days).map_err(|_| out_of_range("date", days))?);
        }
        DataType::Date64 => {
            let millis = array.as_primitive::<Date64Type>().value(row);
            let days = millis.div_euclid(MILLIS_PER_DAY) - PG_EPOCH_DAYS;
            buf.put_i32(i32::try_from(days).map_err(|_| out_of_range("date", millis))?);
        }
        DataType::Timestamp(unit, _) => {
            let micros = timestamp_micros(array, *unit, row)
                .and_then(|us| us.checked_sub(PG_EPOCH_MICROS))
                .ok_or_else(|| out_of_range("timestamp", format!("row {}", row)))?;
            buf.put_i64(micros);
        }
        DataType::Time32(TimeUnit::Second) => {
            let secs = array.as_primitive::<Time32SecondType>().value(row);
            buf.put_i64(i64::from(secs) * 1_000_000);
        }
        DataType::Time32(TimeUnit::Millisecond) => {
            let millis = array.as_primitive::<Time32MillisecondType>().value(row);
            buf.put_i64(i64::from(millis) * 1_000);
        }
        DataType::Time64(TimeUnit::Microsecond) => {
            buf.put_i64(array.as_primitive::<Time64MicrosecondType>().value(row));
        }
        DataType::Time64(TimeUnit::Nanosecond) => {
            buf.put_i64(array.as_primitive::<Time64NanosecondType>().value(row) / 1_000);
        }

        DataType::List(_) => encode_array(buf, array.as_list::<i32>().value(row).as_ref(), replacement)?,
        DataType::LargeList(_) => {
            encode_array(buf, array.as_list::<i64>().value(row).as_ref(), replacement)?
        }
        DataType::FixedSizeList(_, _) => {
            encode_array(buf, array.as_fixed_size_list().value(row).as_ref(), replacement)?
        }
        DataType::Struct(_) => encode_record(buf, array.as_struct(), row, replacement)?,

        other => return Err(EncodeError::Unsupported(other.to_string())),
    }
    Ok(())
}

fn timestamp_micros(array: &dyn Array, unit: TimeUnit, row: usize) -> Option<i64> {
    match unit {
        TimeUnit::Second => array
            .as_primitive::<TimestampSecondType>()
            .value(row)
            .checked_mul(1_000_000),
        TimeUnit::Millisecond => array
            .as_primitive::<TimestampMillisecondType>()
            .value(row)
            .checked_mul(1_000),
        TimeUnit::Microsecond => Some(array.as_primitive::<TimestampMicrosecondType>().value(row)),
        TimeUnit::Nanosecond => Some(
            array
                .as_primitive::<TimestampNanosecondType>()
                .value(row)
                .div_euclid(1_000),
        ),
    }
}

/// Text payload with NUL bytes replaced, or rejected when no replacement is set.
pub(crate) fn put_text(
    buf: &mut BytesMut,
    text: &str,
    replacement: Option<&str>,
) -> Result<(), EncodeError> {
    let bytes = text.as_bytes();
    if !bytes.contains(&0) {
        buf.put_slice(bytes);
        return Ok(());
    }
    let replacement = replacement.ok_or(EncodeError::NullByte)?;
    for (i, part) in bytes.split(|b| *b == 0).enumerate() {
        if i > 0 {
            buf.put_slice(replacement.as_bytes());
        }
        buf.put_slice(part);
    }
    Ok(())
}

/// One-dimensional array of scalars: ndim, has-null flag, element oid,
/// (size, lower bound), elements.
fn encode_array(
    buf: &mut BytesMut,
    elements: &dyn Array,
    replacement: Option<&str>,
) -> Result<(), EncodeError> {
    let element_type = elements.data_type();
    let oid = scalar_oid(element_type)
        .ok_or_else(|| EncodeError::Unsupported(format!("array of {}", element_type)))?;

    if elements.is_empty() {
        buf.put_i32(0);
        buf.put_i32(0);
        buf.put_u32(oid);
        return Ok(());
    }

    let len = elements.len();
    let has_nulls = (0..len).any(|i| is_null(elements, i));
    buf.put_i32(1);
    buf.put_i32(has_nulls as i32);
    buf.put_u32(oid);
    buf.put_i32(i32::try_from(len).map_err(|_| EncodeError::FieldTooLarge(len))?);
    buf.put_i32(1);
    for i in 0..len {
        write_field(buf, elements, i, replacement)?;
    }
    Ok(())
}

/// Composite: field count, then per field its oid and a length-prefixed value.
fn encode_record(
    buf: &mut BytesMut,
    record: &StructArray,
    row: usize,
    replacement: Option<&str>,
) -> Result<(), EncodeError> {
    let columns = record.columns();
    buf.put_i32(columns.len() as i32);
    for column in columns {
        let oid = field_oid(column.data_type()).ok_or_else(|| {
            EncodeError::Unsupported(format!("{} inside a record", column.data_type()))
        })?;
        buf.put_u32(oid);
        write_field(buf, column.as_ref(), row, replacement)?;
    }
    Ok(())
}
