//! COPY wire encoding (pure, sync)
//!
//! No async, no I/O - just values → bytes.

pub mod binary;
pub mod command;
pub mod error;
pub mod quote;
pub mod text;
pub mod types;

pub use error::EncodeError;

pub use binary::BinaryWriter;
pub use command::{CopyTarget, quote_ident};
pub use quote::{escape_quotes, needs_quotes, quote_and_escape_if_needed};
pub use text::TextWriter;
pub use types::{oid, pg_type_oid};
