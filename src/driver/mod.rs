//! COPY session driver (async I/O)
//!
//! The session encodes chunks with the writers from [`crate::protocol`] and
//! pushes them through a [`CopyChannel`]:
//! - `session.rs` - phase handling, chunking and retries
//! - `sqlx_channel.rs` - the production channel over one sqlx connection
//! - `dump.rs` - a channel that writes copy data to any `io::Write`

mod dump;
mod session;
mod sqlx_channel;

pub use dump::DumpChannel;
pub use session::{CopySession, SessionState};
pub use sqlx_channel::SqlxChannel;

use async_trait::async_trait;

/// Outcome of executing a statement or fetching a final result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecStatus {
    /// The server is ready to receive copy data.
    CopyIn,
    /// The command completed; carries the affected row count.
    CommandOk(u64),
    /// The server reported an error; carries its message verbatim.
    Error(String),
}

/// Outcome of one copy-data transmission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PutStatus {
    Sent,
    /// Output buffers are full; the same data must be offered again.
    WouldBlock,
    Fatal(String),
}

/// A connection able to run the COPY IN sub-protocol.
///
/// Calls are made in protocol order by a single [`CopySession`]:
/// `execute`, any number of `put_copy_data`, then either
/// `put_copy_end` + `get_result` or `put_copy_fail`.
#[async_trait]
pub trait CopyChannel: Send {
    async fn execute(&mut self, sql: &str) -> ExecStatus;

    async fn put_copy_data(&mut self, data: &[u8]) -> PutStatus;

    /// Signal end of data. `Err` means the signal itself could not be sent.
    async fn put_copy_end(&mut self) -> Result<(), String>;

    /// Final result of the COPY command, after `put_copy_end`.
    async fn get_result(&mut self) -> ExecStatus;

    /// Abandon the COPY so the connection becomes usable again.
    async fn put_copy_fail(&mut self, reason: &str) -> Result<(), String>;
}
