//! [`CopyChannel`] that writes copy data to any writer instead of a server.

use std::io::Write;

use async_trait::async_trait;

use super::{CopyChannel, ExecStatus, PutStatus};

/// Records the statements it is asked to execute and writes copy data
/// verbatim to `out`. Used for dry runs.
pub struct DumpChannel<W> {
    out: W,
    statements: Vec<String>,
    in_copy: bool,
    bytes_written: u64,
    chunks: usize,
    aborted: Option<String>,
}

impl<W: Write + Send> DumpChannel<W> {
    pub fn new(out: W) -> Self {
        Self {
            out,
            statements: Vec::new(),
            in_copy: false,
            bytes_written: 0,
            chunks: 0,
            aborted: None,
        }
    }

    /// Every statement passed to `execute`, in order.
    pub fn statements(&self) -> &[String] {
        &self.statements
    }

    pub fn bytes_written(&self) -> u64 {
        self.bytes_written
    }

    /// Number of copy-data transmissions received.
    pub fn chunks(&self) -> usize {
        self.chunks
    }

    /// The abort reason, if the copy was abandoned.
    pub fn aborted(&self) -> Option<&str> {
        self.aborted.as_deref()
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

#[async_trait]
impl<W: Write + Send> CopyChannel for DumpChannel<W> {
    async fn execute(&mut self, sql: &str) -> ExecStatus {
        self.statements.push(sql.to_string());
        if sql.trim_start().starts_with("COPY") {
            self.in_copy = true;
            ExecStatus::CopyIn
        } else {
            ExecStatus::CommandOk(0)
        }
    }

    async fn put_copy_data(&mut self, data: &[u8]) -> PutStatus {
        if !self.in_copy {
            return PutStatus::Fatal("no COPY in progress".to_string());
        }
        match self.out.write_all(data) {
            Ok(()) => {
                self.bytes_written += data.len() as u64;
                self.chunks += 1;
                PutStatus::Sent
            }
            Err(e) => PutStatus::Fatal(e.to_string()),
        }
    }

    async fn put_copy_end(&mut self) -> Result<(), String> {
        self.in_copy = false;
        self.out.flush().map_err(|e| e.to_string())
    }

    /// No server counts the rows, so the result is always zero.
    async fn get_result(&mut self) -> ExecStatus {
        ExecStatus::CommandOk(0)
    }

    async fn put_copy_fail(&mut self, reason: &str) -> Result<(), String> {
        self.in_copy = false;
        self.aborted = Some(reason.to_string());
        Ok(())
    }
}
