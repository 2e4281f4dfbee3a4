//! [`CopyChannel`] over a borrowed sqlx connection.

use async_trait::async_trait;
use sqlx::postgres::{PgConnection, PgCopyIn};

use super::{CopyChannel, ExecStatus, PutStatus};

/// Production channel over one connection, usually a transaction.
///
/// Plain statements run on the connection until a COPY starts. The COPY then
/// takes the connection for good: a channel carries at most one COPY, and the
/// borrow ends when the channel is dropped.
///
/// ```rust,ignore
/// let mut tx = pool.begin().await?;
/// {
///     let mut channel = SqlxChannel::new(&mut *tx);
///     // TRUNCATE, then one CopySession
/// }
/// tx.commit().await?;
/// ```
pub struct SqlxChannel<'c> {
    conn: Option<&'c mut PgConnection>,
    copy: Option<PgCopyIn<&'c mut PgConnection>>,
    outcome: Option<ExecStatus>,
}

impl<'c> SqlxChannel<'c> {
    pub fn new(conn: &'c mut PgConnection) -> Self {
        Self {
            conn: Some(conn),
            copy: None,
            outcome: None,
        }
    }
}

fn is_copy(sql: &str) -> bool {
    sql.trim_start()
        .get(..4)
        .is_some_and(|keyword| keyword.eq_ignore_ascii_case("COPY"))
}

/// The server's own message for database errors, sqlx's description otherwise.
fn server_message(err: &sqlx::Error) -> String {
    match err.as_database_error() {
        Some(db) => db.message().to_string(),
        None => err.to_string(),
    }
}

#[async_trait]
impl<'c> CopyChannel for SqlxChannel<'c> {
    async fn execute(&mut self, sql: &str) -> ExecStatus {
        if is_copy(sql) {
            let Some(conn) = self.conn.take() else {
                return ExecStatus::Error("connection already carried a COPY".to_string());
            };
            return match conn.copy_in_raw(sql).await {
                Ok(copy) => {
                    self.copy = Some(copy);
                    self.outcome = None;
                    ExecStatus::CopyIn
                }
                Err(e) => ExecStatus::Error(server_message(&e)),
            };
        }
        let Some(conn) = self.conn.as_mut() else {
            return ExecStatus::Error("connection already carried a COPY".to_string());
        };
        match sqlx::query(sql).execute(&mut **conn).await {
            Ok(done) => ExecStatus::CommandOk(done.rows_affected()),
            Err(e) => ExecStatus::Error(server_message(&e)),
        }
    }

    async fn put_copy_data(&mut self, data: &[u8]) -> PutStatus {
        let Some(copy) = self.copy.as_mut() else {
            return PutStatus::Fatal("no COPY in progress".to_string());
        };
        match copy.send(data).await {
            Ok(_) => PutStatus::Sent,
            Err(e) => PutStatus::Fatal(server_message(&e)),
        }
    }

    async fn put_copy_end(&mut self) -> Result<(), String> {
        let copy = self
            .copy
            .take()
            .ok_or_else(|| "no COPY in progress".to_string())?;
        // A server-side rejection arrives with the completion; it belongs to
        // the result, not to the end signal.
        self.outcome = Some(match copy.finish().await {
            Ok(rows) => ExecStatus::CommandOk(rows),
            Err(e) if e.as_database_error().is_some() => ExecStatus::Error(server_message(&e)),
            Err(e) => return Err(e.to_string()),
        });
        Ok(())
    }

    async fn get_result(&mut self) -> ExecStatus {
        self.outcome
            .take()
            .unwrap_or_else(|| ExecStatus::Error("no COPY result pending".to_string()))
    }

    async fn put_copy_fail(&mut self, reason: &str) -> Result<(), String> {
        match self.copy.take() {
            Some(copy) => copy.abort(reason).await.map_err(|e| server_message(&e)),
            None => Ok(()),
        }
    }
}
