//! Encoding errors for COPY payloads.
//!
//! Shared by the text and binary record writers.

use thiserror::Error;

/// Errors that can occur while encoding rows.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EncodeError {
    /// A text value contains a NUL byte (0x00) and no replacement is configured.
    #[error(
        "Value contains NULL byte (0x00) which is invalid in PostgreSQL; \
         set pg_null_byte_replacement to substitute it"
    )]
    NullByte,

    /// Too many columns for one binary row frame (limit is i16::MAX = 32767).
    #[error("Too many columns: {0} (Limit is 32767)")]
    TooManyColumns(usize),

    /// A value does not fit the PostgreSQL type it maps to.
    #[error("Value out of range for {target}: {value}")]
    OutOfRange { target: &'static str, value: String },

    /// The Arrow type has no binary COPY encoding.
    #[error("Unsupported type for binary COPY: {0} (use the text format)")]
    Unsupported(String),

    /// A single payload exceeds the i32 length prefix.
    #[error("Field too large for COPY: {0} bytes")]
    FieldTooLarge(usize),
}
