//! # qail-copy — Arrow to PostgreSQL over COPY
//!
//! > **Stop inserting rows. Stream them.**
//!
//! qail-copy bulk-loads Arrow record batches into PostgreSQL through
//! `COPY ... FROM STDIN`, in either wire format:
//!
//! | Format   | Frames                                  | Nested values          |
//! |----------|-----------------------------------------|------------------------|
//! | `binary` | `PGCOPY` header, length-prefixed fields | 1-D arrays, records    |
//! | `text`   | delimited lines, NULL marker            | any depth, as literals |
//!
//! ## Quick Example
//!
//! ```rust,ignore
//! use qail_copy::prelude::*;
//!
//! let pool = PgPool::connect("postgres://localhost/app").await?;
//! let mut tx = pool.begin().await?;
//! let mut channel = SqlxChannel::new(&mut *tx);
//! let mut session = CopySession::new(&mut channel, CopyOptions::default())?;
//! session.begin(&CopyTarget::new("events").columns(["id", "tags"])).await?;
//! session.copy_batch(&batch).await?;
//! let rows = session.finish().await?;
//! drop(session);
//! drop(channel);
//! tx.commit().await?;
//! ```
//!
//! ## Layers
//!
//! - [`cast`] - Arrow columns to PostgreSQL text literals (`{1,NULL}`, `(a,)`, `\x0A`)
//! - [`protocol`] - pure, sync encoders for both COPY formats
//! - [`driver`] - the async session and its channels

pub mod cast;
pub mod config;
pub mod driver;
pub mod error;
pub mod protocol;

pub use config::{CopyFormat, CopyOptions, Settings};
pub use driver::{CopyChannel, CopySession, DumpChannel, ExecStatus, PutStatus, SqlxChannel};
pub use error::{CopyError, CopyResult};
pub use protocol::{CopyTarget, EncodeError};

pub mod prelude {
    pub use crate::cast::{CastedChunk, TextColumn, cast_to_text};
    pub use crate::config::{CopyFormat, CopyOptions, Settings};
    pub use crate::driver::{
        CopyChannel, CopySession, DumpChannel, ExecStatus, PutStatus, SessionState, SqlxChannel,
    };
    pub use crate::error::*;
    pub use crate::protocol::{CopyTarget, EncodeError};
}
