//! Text COPY record writer.
//!
//! COPY text format rules:
//! - fields separated by the delimiter, rows terminated by `\n`
//! - NULL: the configured marker (backspace by default)
//! - values: backslash, newline, carriage return, tab, backspace and the
//!   delimiter are backslash-escaped
//! - end of data: `\.` on its own line

use bytes::{BufMut, BytesMut};

use super::EncodeError;
use crate::cast::TextColumn;
use crate::config::CopyOptions;

/// Writes COPY text lines into a session buffer.
pub struct TextWriter<'a> {
    buf: &'a mut BytesMut,
    delimiter: u8,
    null_marker: &'a [u8],
    replacement: Option<&'a str>,
}

impl<'a> TextWriter<'a> {
    pub fn new(buf: &'a mut BytesMut, options: &'a CopyOptions) -> Self {
        Self {
            buf,
            delimiter: options.delimiter_byte(),
            null_marker: options.null_marker.as_bytes(),
            replacement: options.null_byte_replacement.as_deref(),
        }
    }

    /// Between two fields of the same row.
    #[inline]
    pub fn write_separator(&mut self) {
        self.buf.put_u8(self.delimiter);
    }

    pub fn write_value(&mut self, column: &TextColumn, row: usize) -> Result<(), EncodeError> {
        match column.value(row) {
            None => {
                self.buf.put_slice(self.null_marker);
                Ok(())
            }
            Some(text) => self.write_text(text),
        }
    }

    #[inline]
    pub fn finish_row(&mut self) {
        self.buf.put_u8(b'\n');
    }

    /// End-of-data marker.
    pub fn write_footer(&mut self) {
        self.buf.put_slice(b"\\.\n");
    }

    fn write_text(&mut self, text: &str) -> Result<(), EncodeError> {
        self.buf.reserve(text.len());
        for &b in text.as_bytes() {
            if b == 0 {
                let replacement = self.replacement.ok_or(EncodeError::NullByte)?;
                for &r in replacement.as_bytes() {
                    self.put_escaped(r);
                }
            } else {
                self.put_escaped(b);
            }
        }
        Ok(())
    }

    #[inline]
    fn put_escaped(&mut self, b: u8) {
        match b {
            b'\\' => self.buf.put_slice(b"\\\\"),
            b'\n' => self.buf.put_slice(b"\\n"),
            b'\r' => self.buf.put_slice(b"\\r"),
            b'\t' => self.buf.put_slice(b"\\t"),
            0x08 => self.buf.put_slice(b"\\b"),
            d if d == self.delimiter => self.buf.put_slice(&[b'\\', d]),
            _ => self.buf.put_u8(b),
        }
    }
}
