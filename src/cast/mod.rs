//! Arrow to PostgreSQL text literals.
//!
//! Lists become array literals (`{1,NULL,3}`), structs become composite
//! literals (`(1,)`), binary becomes hex bytea (`\x0AFF`) and everything else
//! goes through a primitive formatter. Dispatch happens once per column on
//! its `DataType`; the per-row loops are monomorphic.
//!
//! Null handling differs by container. A null array element is the bare
//! token `NULL`, while a null composite field is an empty segment. Both are
//! what the server's literal parsers expect.

mod column;

pub use column::{CastedChunk, TextColumn};

use std::ops::Range;

use arrow::array::cast::AsArray;
use arrow::array::types::{
    Float32Type, Float64Type, Int8Type, Int16Type, Int32Type, Int64Type, UInt8Type, UInt16Type,
    UInt32Type, UInt64Type,
};
use arrow::array::{
    Array, ArrayRef, ArrowPrimitiveType, FixedSizeListArray, GenericListArray, OffsetSizeTrait,
    StructArray,
};
use arrow::datatypes::DataType;
use arrow::error::ArrowError;
use arrow::util::display::{ArrayFormatter, FormatOptions};

use crate::protocol::quote::quote_and_escape_if_needed;
use crate::protocol::types::list_element;

const HEX_UPPER: &[u8; 16] = b"0123456789ABCDEF";

/// Append the text form of every row of `array` to `out`.
///
/// Exactly `array.len()` entries are appended; top-level nulls stay null.
pub fn cast_to_text(array: &dyn Array, out: &mut TextColumn) -> Result<(), ArrowError> {
    match array.data_type() {
        DataType::List(_) => cast_list(array.as_list::<i32>(), out),
        DataType::LargeList(_) => cast_list(array.as_list::<i64>(), out),
        DataType::FixedSizeList(_, _) => {
            let list = array.as_fixed_size_list();
            let size = list.value_length() as usize;
            let (child, _) = fixed_size_list_child(list);
            cast_list_entries(array, child.as_ref(), out, |row| row * size..(row + 1) * size)
        }
        DataType::Struct(_) => cast_struct(array.as_struct(), out),
        DataType::Binary => {
            let blobs = array.as_binary::<i32>();
            cast_blob(array, out, |row| blobs.value(row));
            Ok(())
        }
        DataType::LargeBinary => {
            let blobs = array.as_binary::<i64>();
            cast_blob(array, out, |row| blobs.value(row));
            Ok(())
        }
        DataType::FixedSizeBinary(_) => {
            let blobs = array.as_fixed_size_binary();
            cast_blob(array, out, |row| blobs.value(row));
            Ok(())
        }
        _ => cast_scalar(array, out),
    }
}

fn cast_list<O: OffsetSizeTrait>(
    list: &GenericListArray<O>,
    out: &mut TextColumn,
) -> Result<(), ArrowError> {
    let offsets = list.value_offsets();
    let (child, first) = list_child(list);
    cast_list_entries(list, child.as_ref(), out, |row| {
        offsets[row].as_usize() - first..offsets[row + 1].as_usize() - first
    })
}

/// The elements referenced by the rows of `list`, and the child index they
/// start at. A sliced list still holds its whole child array.
fn list_child<O: OffsetSizeTrait>(list: &GenericListArray<O>) -> (ArrayRef, usize) {
    let offsets = list.value_offsets();
    let first = offsets[0].as_usize();
    let last = offsets[offsets.len() - 1].as_usize();
    (list.values().slice(first, last - first), first)
}

fn fixed_size_list_child(list: &FixedSizeListArray) -> (ArrayRef, usize) {
    let first = if list.is_empty() {
        0
    } else {
        list.value_offset(0) as usize
    };
    let len = list.len() * list.value_length() as usize;
    (list.values().slice(first, len), first)
}

/// Build `{...}` literals. `child` holds exactly the referenced elements; it
/// is cast once and each row picks its element range out of it.
fn cast_list_entries(
    list: &dyn Array,
    child: &dyn Array,
    out: &mut TextColumn,
    entry: impl Fn(usize) -> Range<usize>,
) -> Result<(), ArrowError> {
    let mut elements = TextColumn::with_capacity(child.len());
    cast_to_text(child, &mut elements)?;

    // Inner dimensions of a multi-dimensional array are inserted as-is.
    let verbatim = list_element(child.data_type()).is_some();

    for row in 0..list.len() {
        if list.is_null(row) {
            out.push_null();
            continue;
        }
        out.push_with(|buf| {
            buf.push('{');
            for (i, index) in entry(row).enumerate() {
                if i > 0 {
                    buf.push(',');
                }
                match elements.value(index) {
                    None => buf.push_str("NULL"),
                    Some(text) if verbatim => buf.push_str(text),
                    // A bare NULL element would read back as SQL NULL.
                    Some(text) if text.eq_ignore_ascii_case("NULL") => {
                        buf.push('"');
                        buf.push_str(text);
                        buf.push('"');
                    }
                    Some(text) => quote_and_escape_if_needed(text, buf),
                }
            }
            buf.push('}');
        });
    }
    Ok(())
}

fn cast_struct(array: &StructArray, out: &mut TextColumn) -> Result<(), ArrowError> {
    let fields = array
        .columns()
        .iter()
        .map(|child| {
            let mut text = TextColumn::with_capacity(child.len());
            cast_to_text(child.as_ref(), &mut text)?;
            Ok(text)
        })
        .collect::<Result<Vec<_>, ArrowError>>()?;

    for row in 0..array.len() {
        if array.is_null(row) {
            out.push_null();
            continue;
        }
        out.push_with(|buf| {
            buf.push('(');
            for (i, field) in fields.iter().enumerate() {
                if i > 0 {
                    buf.push(',');
                }
                // A null field is left empty.
                if let Some(text) = field.value(row) {
                    quote_and_escape_if_needed(text, buf);
                }
            }
            buf.push(')');
        });
    }
    Ok(())
}

fn cast_blob<'a>(array: &dyn Array, out: &mut TextColumn, value: impl Fn(usize) -> &'a [u8]) {
    push_rows(array, out, |row, buf| {
        let bytes = value(row);
        buf.reserve(2 + bytes.len() * 2);
        buf.push_str("\\x");
        for byte in bytes {
            buf.push(HEX_UPPER[(byte >> 4) as usize] as char);
            buf.push(HEX_UPPER[(byte & 0x0f) as usize] as char);
        }
    });
}

fn cast_scalar(array: &dyn Array, out: &mut TextColumn) -> Result<(), ArrowError> {
    match array.data_type() {
        DataType::Null => {
            (0..array.len()).for_each(|_| out.push_null());
        }
        DataType::Boolean => {
            let values = array.as_boolean();
            push_rows(array, out, |row, buf| {
                buf.push(if values.value(row) { 't' } else { 'f' })
            });
        }
        DataType::Int8 => cast_integers::<Int8Type>(array, out),
        DataType::Int16 => cast_integers::<Int16Type>(array, out),
        DataType::Int32 => cast_integers::<Int32Type>(array, out),
        DataType::Int64 => cast_integers::<Int64Type>(array, out),
        DataType::UInt8 => cast_integers::<UInt8Type>(array, out),
        DataType::UInt16 => cast_integers::<UInt16Type>(array, out),
        DataType::UInt32 => cast_integers::<UInt32Type>(array, out),
        DataType::UInt64 => cast_integers::<UInt64Type>(array, out),
        DataType::Float32 => cast_floats::<Float32Type>(array, out),
        DataType::Float64 => cast_floats::<Float64Type>(array, out),
        DataType::Utf8 => {
            let values = array.as_string::<i32>();
            push_rows(array, out, |row, buf| buf.push_str(values.value(row)));
        }
        DataType::LargeUtf8 => {
            let values = array.as_string::<i64>();
            push_rows(array, out, |row, buf| buf.push_str(values.value(row)));
        }
        _ => cast_with_formatter(array, out)?,
    }
    Ok(())
}

fn cast_integers<T>(array: &dyn Array, out: &mut TextColumn)
where
    T: ArrowPrimitiveType,
    T::Native: itoa::Integer,
{
    let values = array.as_primitive::<T>();
    let mut tmp = itoa::Buffer::new();
    push_rows(array, out, |row, buf| {
        buf.push_str(tmp.format(values.value(row)))
    });
}

fn cast_floats<T>(array: &dyn Array, out: &mut TextColumn)
where
    T: ArrowPrimitiveType,
    T::Native: ryu::Float,
{
    let values = array.as_primitive::<T>();
    let mut tmp = ryu::Buffer::new();
    push_rows(array, out, |row, buf| {
        buf.push_str(tmp.format(values.value(row)))
    });
}

/// Dates, times, decimals and the rest: Arrow's own display formatting.
fn cast_with_formatter(array: &dyn Array, out: &mut TextColumn) -> Result<(), ArrowError> {
    let options = FormatOptions::default();
    let formatter = ArrayFormatter::try_new(array, &options)?;
    for row in 0..array.len() {
        if array.is_null(row) {
            out.push_null();
        } else {
            out.push_with(|buf| formatter.value(row).write(buf))?;
        }
    }
    Ok(())
}

#[inline]
fn push_rows(array: &dyn Array, out: &mut TextColumn, mut write: impl FnMut(usize, &mut String)) {
    for row in 0..array.len() {
        if array.is_null(row) {
            out.push_null();
        } else {
            out.push_with(|buf| write(row, buf));
        }
    }
}
