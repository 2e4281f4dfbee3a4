//! Session behaviour against a scripted channel. No database needed.

use std::collections::VecDeque;
use std::sync::Arc;

use arrow::array::{ArrayRef, Int32Array, ListArray, RecordBatch, StringArray};
use arrow::datatypes::Int32Type;
use async_trait::async_trait;
use pretty_assertions::assert_eq;
use qail_copy::prelude::*;
use qail_copy::protocol::binary::SIGNATURE;

/// Replays scripted replies and records every call.
struct MockChannel {
    calls: Vec<String>,
    exec_replies: VecDeque<ExecStatus>,
    put_replies: VecDeque<PutStatus>,
    end_reply: Result<(), String>,
    result_reply: ExecStatus,
    sent: Vec<Vec<u8>>,
}

impl MockChannel {
    fn new() -> Self {
        Self {
            calls: Vec::new(),
            exec_replies: VecDeque::new(),
            put_replies: VecDeque::new(),
            end_reply: Ok(()),
            result_reply: ExecStatus::CommandOk(0),
            sent: Vec::new(),
        }
    }

    fn data_calls(&self) -> usize {
        self.calls.iter().filter(|c| c.starts_with("data")).count()
    }
}

#[async_trait]
impl CopyChannel for MockChannel {
    async fn execute(&mut self, sql: &str) -> ExecStatus {
        self.calls.push(format!("execute {}", sql));
        self.exec_replies.pop_front().unwrap_or(ExecStatus::CopyIn)
    }

    async fn put_copy_data(&mut self, data: &[u8]) -> PutStatus {
        self.calls.push(format!("data {}", data.len()));
        let reply = self.put_replies.pop_front().unwrap_or(PutStatus::Sent);
        if reply == PutStatus::Sent {
            self.sent.push(data.to_vec());
        }
        reply
    }

    async fn put_copy_end(&mut self) -> Result<(), String> {
        self.calls.push("end".to_string());
        self.end_reply.clone()
    }

    async fn get_result(&mut self) -> ExecStatus {
        self.calls.push("result".to_string());
        self.result_reply.clone()
    }

    async fn put_copy_fail(&mut self, reason: &str) -> Result<(), String> {
        self.calls.push(format!("fail {}", reason));
        Ok(())
    }
}

fn id_name_batch() -> RecordBatch {
    RecordBatch::try_from_iter(vec![
        ("id", Arc::new(Int32Array::from(vec![Some(1), None])) as ArrayRef),
        ("name", Arc::new(StringArray::from(vec!["x", "y"])) as ArrayRef),
    ])
    .unwrap()
}

fn numbered_batch(rows: i32) -> RecordBatch {
    let ids: Vec<i32> = (0..rows).collect();
    let names: Vec<String> = ids.iter().map(|i| format!("row\t{}", i)).collect();
    RecordBatch::try_from_iter(vec![
        ("id", Arc::new(Int32Array::from(ids)) as ArrayRef),
        ("name", Arc::new(StringArray::from(names)) as ArrayRef),
    ])
    .unwrap()
}

fn target() -> CopyTarget {
    CopyTarget::new("t").columns(["id", "name"])
}

#[tokio::test]
async fn test_text_end_to_end() {
    let mut channel = MockChannel::new();
    channel.result_reply = ExecStatus::CommandOk(2);

    let mut session = CopySession::new(&mut channel, CopyOptions::default()).unwrap();
    session.begin(&target()).await.unwrap();
    session.copy_batch(&id_name_batch()).await.unwrap();
    assert_eq!(session.finish().await.unwrap(), 2);
    assert_eq!(session.state(), SessionState::Closed);
    assert_eq!(session.rows_sent(), 2);

    assert_eq!(
        channel.calls[0],
        "execute COPY \"t\" (\"id\", \"name\") FROM STDIN (FORMAT text, NULL '\u{8}')"
    );
    assert_eq!(
        channel.sent,
        vec![b"1\tx\n\x08\ty\n".to_vec(), b"\\.\n".to_vec()]
    );
    assert_eq!(&channel.calls[channel.calls.len() - 2..], ["end", "result"]);
}

#[tokio::test]
async fn test_binary_header_is_its_own_transmission() {
    let mut channel = MockChannel::new();
    let options = CopyOptions::new().format(CopyFormat::Binary);

    let mut session = CopySession::new(&mut channel, options).unwrap();
    session.begin(&target()).await.unwrap();
    session.copy_batch(&id_name_batch()).await.unwrap();
    session.finish().await.unwrap();

    assert!(channel.calls[0].ends_with("FROM STDIN (FORMAT binary)"));
    assert_eq!(channel.sent.len(), 3);

    let mut header = SIGNATURE.to_vec();
    header.extend_from_slice(&[0; 8]);
    assert_eq!(channel.sent[0], header);

    let mut rows = Vec::new();
    rows.extend_from_slice(&[0, 2, 0, 0, 0, 4, 0, 0, 0, 1, 0, 0, 0, 1, b'x']);
    rows.extend_from_slice(&[0, 2, 0xff, 0xff, 0xff, 0xff, 0, 0, 0, 1, b'y']);
    assert_eq!(channel.sent[1], rows);

    assert_eq!(channel.sent[2], vec![0xff, 0xff]);
}

#[tokio::test]
async fn test_would_block_is_retried() {
    let mut channel = MockChannel::new();
    channel.put_replies = VecDeque::from(vec![PutStatus::WouldBlock, PutStatus::WouldBlock]);

    let mut session = CopySession::new(&mut channel, CopyOptions::default()).unwrap();
    session.begin(&target()).await.unwrap();
    session.copy_batch(&id_name_batch()).await.unwrap();
    session.finish().await.unwrap();

    // Three attempts for the rows, one for the footer.
    assert_eq!(channel.data_calls(), 4);
    assert_eq!(channel.sent.len(), 2);
    assert_eq!(channel.sent[0], b"1\tx\n\x08\ty\n".to_vec());
}

#[tokio::test]
async fn test_long_would_block_run_is_retried() {
    let mut channel = MockChannel::new();
    channel.put_replies = std::iter::repeat_n(PutStatus::WouldBlock, 10_000).collect();

    let mut session = CopySession::new(&mut channel, CopyOptions::default()).unwrap();
    session.begin(&target()).await.unwrap();
    session.copy_batch(&id_name_batch()).await.unwrap();
    session.finish().await.unwrap();

    assert_eq!(channel.data_calls(), 10_002);
    assert_eq!(channel.sent.len(), 2);
}

#[tokio::test]
async fn test_fatal_send_fails_the_session() {
    let mut channel = MockChannel::new();
    channel.put_replies = VecDeque::from(vec![PutStatus::Fatal("broken pipe".to_string())]);

    let mut session = CopySession::new(&mut channel, CopyOptions::default()).unwrap();
    session.begin(&target()).await.unwrap();

    let err = session.copy_batch(&id_name_batch()).await.unwrap_err();
    assert!(matches!(err, CopyError::Transmission(ref m) if m == "broken pipe"));
    assert_eq!(session.state(), SessionState::Failed);

    assert!(matches!(session.finish().await, Err(CopyError::State(_))));
    session.abort("load failed").await.unwrap();
    assert_eq!(session.state(), SessionState::Closed);

    assert_eq!(channel.calls.last().map(String::as_str), Some("fail load failed"));
    assert!(!channel.calls.iter().any(|c| c == "end"));
}

#[tokio::test]
async fn test_negotiation_failure_carries_server_text() {
    let mut channel = MockChannel::new();
    channel
        .exec_replies
        .push_back(ExecStatus::Error("relation \"t\" does not exist".to_string()));

    let mut session = CopySession::new(&mut channel, CopyOptions::default()).unwrap();
    let err = session.begin(&target()).await.unwrap_err();
    match err {
        CopyError::Negotiation { sql, message } => {
            assert!(sql.starts_with("COPY \"t\""));
            assert_eq!(message, "relation \"t\" does not exist");
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert_eq!(session.state(), SessionState::Closed);
    assert_eq!(channel.data_calls(), 0);
}

#[tokio::test]
async fn test_non_copy_reply_is_a_negotiation_failure() {
    let mut channel = MockChannel::new();
    channel.exec_replies.push_back(ExecStatus::CommandOk(0));

    let mut session = CopySession::new(&mut channel, CopyOptions::default()).unwrap();
    assert!(matches!(
        session.begin(&target()).await,
        Err(CopyError::Negotiation { .. })
    ));
}

#[tokio::test]
async fn test_final_result_is_checked_after_end_signal() {
    let mut channel = MockChannel::new();
    channel.result_reply = ExecStatus::Error("duplicate key value".to_string());

    let mut session = CopySession::new(&mut channel, CopyOptions::default()).unwrap();
    session.begin(&target()).await.unwrap();
    session.copy_batch(&id_name_batch()).await.unwrap();

    let err = session.finish().await.unwrap_err();
    assert!(matches!(err, CopyError::Finalization(ref m) if m == "duplicate key value"));
    assert!(err.to_string().starts_with("Failed to copy data"));
    assert_eq!(&channel.calls[channel.calls.len() - 2..], ["end", "result"]);
}

#[tokio::test]
async fn test_end_signal_failure() {
    let mut channel = MockChannel::new();
    channel.end_reply = Err("connection lost".to_string());

    let mut session = CopySession::new(&mut channel, CopyOptions::default()).unwrap();
    session.begin(&target()).await.unwrap();

    let err = session.finish().await.unwrap_err();
    assert!(matches!(err, CopyError::Finalization(ref m) if m == "connection lost"));
    assert!(!channel.calls.iter().any(|c| c == "result"));
}

#[tokio::test]
async fn test_config_error_before_any_io() {
    let mut channel = MockChannel::new();
    let options = CopyOptions::new().null_byte_replacement("a\0");

    let err = CopySession::new(&mut channel, options).err().unwrap();
    assert!(matches!(err, CopyError::Config(_)));
    assert!(channel.calls.is_empty());
}

#[tokio::test]
async fn test_calls_out_of_order() {
    let mut channel = MockChannel::new();
    let mut session = CopySession::new(&mut channel, CopyOptions::default()).unwrap();

    assert!(matches!(
        session.copy_batch(&id_name_batch()).await,
        Err(CopyError::State(_))
    ));
    assert!(matches!(session.finish().await, Err(CopyError::State(_))));
    assert!(matches!(session.abort("nope").await, Err(CopyError::State(_))));

    session.begin(&target()).await.unwrap();
    assert!(matches!(session.begin(&target()).await, Err(CopyError::State(_))));
    session.finish().await.unwrap();

    assert!(matches!(
        session.copy_batch(&id_name_batch()).await,
        Err(CopyError::State(_))
    ));
    assert!(matches!(session.finish().await, Err(CopyError::State(_))));
}

#[tokio::test]
async fn test_column_count_mismatch() {
    let mut channel = MockChannel::new();
    let mut session = CopySession::new(&mut channel, CopyOptions::default()).unwrap();
    session.begin(&CopyTarget::new("t").columns(["id"])).await.unwrap();

    let err = session.copy_batch(&id_name_batch()).await.unwrap_err();
    assert!(matches!(
        err,
        CopyError::ColumnCount {
            expected: 1,
            actual: 2
        }
    ));
    assert_eq!(session.state(), SessionState::Active);
}

#[tokio::test]
async fn test_chunking_is_invisible_on_the_wire() {
    async fn stream(format: CopyFormat, batch_rows: usize) -> Vec<Vec<u8>> {
        let mut channel = MockChannel::new();
        let options = CopyOptions::new().format(format).batch_rows(batch_rows);
        let mut session = CopySession::new(&mut channel, options).unwrap();
        session.begin(&target()).await.unwrap();
        session.copy_batch(&numbered_batch(5)).await.unwrap();
        session.copy_batch(&numbered_batch(3)).await.unwrap();
        session.finish().await.unwrap();
        channel.sent
    }

    for format in [CopyFormat::Text, CopyFormat::Binary] {
        let whole = stream(format, 100).await;
        let sliced = stream(format, 2).await;

        // 5 rows -> 3 chunks, 3 rows -> 2 chunks
        assert_eq!(sliced.len(), whole.len() + 3, "{format}");
        assert_eq!(sliced.concat(), whole.concat(), "{format}");
    }
}

#[tokio::test]
async fn test_chunked_list_column() {
    let tags = ListArray::from_iter_primitive::<Int32Type, _, _>(vec![
        Some(vec![Some(1), Some(2)]),
        None,
        Some(vec![Some(3)]),
        Some(vec![]),
        Some(vec![Some(4), None]),
    ]);
    let batch = RecordBatch::try_from_iter(vec![("tags", Arc::new(tags) as ArrayRef)]).unwrap();

    let mut channel = MockChannel::new();
    let options = CopyOptions::new().batch_rows(2);
    let mut session = CopySession::new(&mut channel, options).unwrap();
    session.begin(&CopyTarget::new("t").columns(["tags"])).await.unwrap();
    session.copy_batch(&batch).await.unwrap();
    session.finish().await.unwrap();

    assert_eq!(
        channel.sent,
        vec![
            b"{1,2}\n\x08\n".to_vec(),
            b"{3}\n{}\n".to_vec(),
            b"{4,NULL}\n".to_vec(),
            b"\\.\n".to_vec(),
        ]
    );
}

#[tokio::test]
async fn test_nul_bytes_in_text() {
    let batch = RecordBatch::try_from_iter(vec![(
        "name",
        Arc::new(StringArray::from(vec!["a\0b"])) as ArrayRef,
    )])
    .unwrap();

    let mut channel = MockChannel::new();
    let mut session = CopySession::new(&mut channel, CopyOptions::default()).unwrap();
    session.begin(&CopyTarget::new("t")).await.unwrap();
    let err = session.copy_batch(&batch).await.unwrap_err();
    assert!(matches!(err, CopyError::Encode(EncodeError::NullByte)));
    assert_eq!(session.state(), SessionState::Failed);
    assert_eq!(channel.data_calls(), 0);

    let mut channel = MockChannel::new();
    let options = CopyOptions::new().null_byte_replacement("?");
    let mut session = CopySession::new(&mut channel, options).unwrap();
    session.begin(&CopyTarget::new("t")).await.unwrap();
    session.copy_batch(&batch).await.unwrap();
    assert_eq!(channel.sent[0], b"a?b\n".to_vec());

    let mut channel = MockChannel::new();
    let options = CopyOptions::new()
        .format(CopyFormat::Binary)
        .null_byte_replacement("?");
    let mut session = CopySession::new(&mut channel, options).unwrap();
    session.begin(&CopyTarget::new("t")).await.unwrap();
    session.copy_batch(&batch).await.unwrap();
    assert_eq!(channel.sent[1], vec![0, 1, 0, 0, 0, 3, b'a', b'?', b'b']);
}

#[tokio::test]
async fn test_nested_list_as_text_literal() {
    let tags = ListArray::from_iter_primitive::<Int32Type, _, _>(vec![
        Some(vec![Some(1), None, Some(3)]),
        Some(vec![]),
        None,
    ]);
    let batch = RecordBatch::try_from_iter(vec![("tags", Arc::new(tags) as ArrayRef)]).unwrap();

    let mut channel = MockChannel::new();
    let mut session = CopySession::new(&mut channel, CopyOptions::default()).unwrap();
    session.begin(&CopyTarget::new("t").columns(["tags"])).await.unwrap();
    session.copy_batch(&batch).await.unwrap();

    assert_eq!(channel.sent[0], b"{1,NULL,3}\n{}\n\x08\n".to_vec());
}

#[tokio::test]
async fn test_dump_channel_dry_run() {
    let mut channel = DumpChannel::new(Vec::new());
    let mut session = CopySession::new(&mut channel, CopyOptions::default()).unwrap();
    session.begin(&target()).await.unwrap();
    session.copy_batch(&id_name_batch()).await.unwrap();
    assert_eq!(session.finish().await.unwrap(), 0);

    assert_eq!(channel.statements().len(), 1);
    assert_eq!(channel.into_inner(), b"1\tx\n\x08\ty\n\\.\n".to_vec());
}
