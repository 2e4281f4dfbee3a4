//! One `COPY ... FROM STDIN` from start to end.

use arrow::array::RecordBatch;
use bytes::BytesMut;

use super::{CopyChannel, ExecStatus, PutStatus};
use crate::cast::CastedChunk;
use crate::config::{CopyFormat, CopyOptions};
use crate::error::{CopyError, CopyResult};
use crate::protocol::{BinaryWriter, CopyTarget, TextWriter};

/// Phase of a [`CopySession`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Created, no command sent yet.
    Idle,
    /// The server accepted the COPY and is receiving data.
    Active,
    /// Encoding or transmission failed mid-stream; only `abort` is allowed.
    Failed,
    /// Finished or aborted.
    Closed,
}

/// Drives one COPY IN over a borrowed channel.
///
/// ```rust,ignore
/// let mut session = CopySession::new(&mut channel, CopyOptions::default())?;
/// session.begin(&CopyTarget::new("users").columns(["id", "name"])).await?;
/// session.copy_batch(&batch).await?;
/// let rows = session.finish().await?;
/// ```
///
/// Any error after `begin` voids the whole COPY; nothing sent before it may be
/// assumed committed.
pub struct CopySession<'c, C: CopyChannel> {
    channel: &'c mut C,
    options: CopyOptions,
    state: SessionState,
    /// Output buffer, cleared before every transmission.
    buf: BytesMut,
    casted: CastedChunk,
    columns: Option<usize>,
    rows_sent: u64,
    command: Option<String>,
}

impl<'c, C: CopyChannel> CopySession<'c, C> {
    /// Create a session. Options are validated here, before any I/O.
    pub fn new(channel: &'c mut C, options: CopyOptions) -> CopyResult<Self> {
        options.validate()?;
        Ok(Self {
            channel,
            options,
            state: SessionState::Idle,
            buf: BytesMut::with_capacity(64 * 1024),
            casted: CastedChunk::new(),
            columns: None,
            rows_sent: 0,
            command: None,
        })
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn options(&self) -> &CopyOptions {
        &self.options
    }

    /// Rows encoded and handed to the channel so far.
    pub fn rows_sent(&self) -> u64 {
        self.rows_sent
    }

    /// The COPY command sent by [`begin`](Self::begin).
    pub fn command(&self) -> Option<&str> {
        self.command.as_deref()
    }

    /// Send the COPY command and wait for the server to enter COPY IN mode.
    ///
    /// In binary format the file header follows as its own transmission.
    pub async fn begin(&mut self, target: &CopyTarget) -> CopyResult<()> {
        self.require_state(SessionState::Idle, "begin")?;

        let sql = target.copy_command(&self.options);
        tracing::debug!("Starting COPY: {}", sql);

        let refused = match self.channel.execute(&sql).await {
            ExecStatus::CopyIn => None,
            ExecStatus::Error(message) => Some(message),
            ExecStatus::CommandOk(_) => Some("server did not enter COPY IN mode".to_string()),
        };
        if let Some(message) = refused {
            self.state = SessionState::Closed;
            return Err(CopyError::Negotiation { sql, message });
        }

        self.state = SessionState::Active;
        self.columns = (!target.columns.is_empty()).then(|| target.columns.len());
        self.command = Some(sql);

        if self.options.format == CopyFormat::Binary {
            self.buf.clear();
            BinaryWriter::new(&mut self.buf, &self.options).write_header();
            self.transmit().await?;
        }
        Ok(())
    }

    /// Encode and send one batch, split into chunks of at most `batch_rows` rows.
    ///
    /// Every batch of a session must have the same column count: the length
    /// of the target's column list, or else that of the first batch.
    pub async fn copy_batch(&mut self, batch: &RecordBatch) -> CopyResult<()> {
        self.require_state(SessionState::Active, "copy_batch")?;

        let actual = batch.num_columns();
        match self.columns {
            Some(expected) if expected != actual => {
                return Err(CopyError::ColumnCount { expected, actual });
            }
            Some(_) => {}
            None => self.columns = Some(actual),
        }

        let total = batch.num_rows();
        let mut offset = 0;
        while offset < total {
            let len = self.options.batch_rows.min(total - offset);
            let chunk = batch.slice(offset, len);
            if let Err(e) = self.encode_chunk(&chunk) {
                self.state = SessionState::Failed;
                return Err(e);
            }
            self.transmit().await?;
            self.rows_sent += len as u64;
            offset += len;
        }
        Ok(())
    }

    /// Send the footer and the end signal, then check the final result.
    ///
    /// Returns the row count reported by the server.
    pub async fn finish(&mut self) -> CopyResult<u64> {
        self.require_state(SessionState::Active, "finish")?;

        self.buf.clear();
        match self.options.format {
            CopyFormat::Binary => BinaryWriter::new(&mut self.buf, &self.options).write_footer(),
            CopyFormat::Text => TextWriter::new(&mut self.buf, &self.options).write_footer(),
        }
        self.transmit().await?;

        self.state = SessionState::Closed;
        self.channel
            .put_copy_end()
            .await
            .map_err(CopyError::Finalization)?;

        match self.channel.get_result().await {
            ExecStatus::CommandOk(rows) => {
                tracing::info!("COPY complete: {} rows ({} sent)", rows, self.rows_sent);
                Ok(rows)
            }
            ExecStatus::Error(message) => Err(CopyError::Finalization(message)),
            ExecStatus::CopyIn => Err(CopyError::Finalization(
                "server still expects copy data after end of data".to_string(),
            )),
        }
    }

    /// Abandon the COPY. Nothing sent by this session is committed.
    pub async fn abort(&mut self, reason: &str) -> CopyResult<()> {
        if !matches!(self.state, SessionState::Active | SessionState::Failed) {
            return Err(CopyError::state(format!(
                "abort called in {:?} state",
                self.state
            )));
        }
        tracing::warn!("Aborting COPY: {}", reason);
        self.state = SessionState::Closed;
        self.channel
            .put_copy_fail(reason)
            .await
            .map_err(CopyError::Transmission)
    }

    fn require_state(&self, state: SessionState, operation: &str) -> CopyResult<()> {
        if self.state == state {
            Ok(())
        } else {
            Err(CopyError::state(format!(
                "{} requires {:?} state, session is {:?}",
                operation, state, self.state
            )))
        }
    }

    /// Encode `chunk` into the output buffer, replacing its contents.
    fn encode_chunk(&mut self, chunk: &RecordBatch) -> CopyResult<()> {
        self.buf.clear();
        match self.options.format {
            CopyFormat::Binary => {
                let mut writer = BinaryWriter::new(&mut self.buf, &self.options);
                let columns = chunk.columns();
                for row in 0..chunk.num_rows() {
                    writer.begin_row(columns.len())?;
                    for column in columns {
                        writer.write_value(column.as_ref(), row)?;
                    }
                    writer.finish_row();
                }
            }
            CopyFormat::Text => {
                self.casted.cast(chunk)?;
                let mut writer = TextWriter::new(&mut self.buf, &self.options);
                for row in 0..self.casted.num_rows() {
                    for (i, column) in self.casted.columns().iter().enumerate() {
                        if i > 0 {
                            writer.write_separator();
                        }
                        writer.write_value(column, row)?;
                    }
                    writer.finish_row();
                }
            }
        }
        Ok(())
    }

    /// Send the buffer as one transmission, retrying while the channel would block.
    async fn transmit(&mut self) -> CopyResult<()> {
        let mut retries = 0u64;
        loop {
            match self.channel.put_copy_data(&self.buf[..]).await {
                PutStatus::Sent => break,
                PutStatus::WouldBlock => {
                    retries = retries.wrapping_add(1);
                    tracing::trace!("COPY data would block, retry {}", retries);
                    tokio::task::yield_now().await;
                }
                PutStatus::Fatal(message) => {
                    self.state = SessionState::Failed;
                    return Err(CopyError::Transmission(message));
                }
            }
        }
        tracing::trace!("Sent {} bytes of COPY data", self.buf.len());
        self.buf.clear();
        Ok(())
    }
}
