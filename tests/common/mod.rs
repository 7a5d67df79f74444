//! In-process IPROTO server for connection tests.
//!
//! Serves the `tester` space (id 42) holding three tuples, and a handful of
//! stored functions:
//!
//! - `sel_all()` / `sel_name(id, name)` - select from `tester`
//! - `echo(...)` - one row holding the arguments
//! - `sleep(ms, tag)` - replies `[[tag]]` after `ms` milliseconds
//! - `hang()` - never replies
//! - `boom()` - error reply
//! - `eof()` - server closes the connection without replying
//! - `garbage()` / `bad_header()` / `oversize()` - server writes a corrupt
//!   reply stream

#![allow(dead_code)]

use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use bytes::BytesMut;
use iproto_client::greeting::{Greeting, Version};
use iproto_client::protocol::FrameBuffer;
use iproto_client::query::Select;
use iproto_client::reply::pack_error;
use iproto_client::{Connection, ConnectionBuilder, Query, Reply, Row, Target, Value};
use tokio::io::{
    AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, DuplexStream, ReadBuf, WriteHalf,
};
use tokio::sync::Mutex;

pub const TESTER_SPACE: u32 = 42;

const ER_NO_SUCH_PROC: u32 = 33;
const ER_NO_SUCH_SPACE: u32 = 36;
const ER_PROC_LUA: u32 = 32;

pub fn dataset() -> Vec<Row> {
    vec![
        vec![Value::Unsigned(1), Value::from("First record")],
        vec![Value::Unsigned(2), Value::from("Music")],
        vec![Value::Unsigned(3), Value::from("Length"), Value::Unsigned(93)],
    ]
}

pub fn greeting() -> Greeting {
    Greeting {
        version: Version::new(1, 10, 3),
        protocol: "Binary".into(),
        uuid: Some("a9f7ad2e-3c6b-4d02-8a0e-93c1fb05a1d7".into()),
        salt: "8nV4Ur0ZIEY1yA0SstQkzQJqHdY8Sq0uIq4AvDNWPBM=".into(),
    }
}

type Writer = Arc<Mutex<WriteHalf<DuplexStream>>>;

/// Open a connection to a fresh mock server.
pub async fn connect() -> Connection {
    connect_with(Connection::builder()).await
}

pub async fn connect_with(builder: ConnectionBuilder) -> Connection {
    let (client, server) = tokio::io::duplex(64 * 1024);
    tokio::spawn(serve(server));
    builder
        .connect_stream(client, "mock:3301")
        .await
        .expect("connect to mock server")
}

/// Run the server side of one connection.
pub async fn serve(stream: DuplexStream) {
    let (mut reader, mut writer) = tokio::io::split(stream);
    if writer.write_all(&greeting().encode()).await.is_err() {
        return;
    }
    let writer: Writer = Arc::new(Mutex::new(writer));

    let mut frames = FrameBuffer::new();
    let mut buf = vec![0u8; 16 * 1024];
    loop {
        let n = match reader.read(&mut buf).await {
            Ok(0) | Err(_) => return,
            Ok(n) => n,
        };
        let Ok(batch) = frames.push(&buf[..n]) else {
            return;
        };

        for frame in batch {
            let sync = frame.sync();
            let query = match Query::from_frame(&frame) {
                Ok(query) => query,
                Err(e) => {
                    respond_error(&writer, sync, ER_PROC_LUA, &e.to_string()).await;
                    continue;
                }
            };

            match handle(query) {
                Action::Reply(rows) => respond(&writer, sync, rows).await,
                Action::Error(errcode, message) => {
                    respond_error(&writer, sync, errcode, &message).await
                }
                Action::Delayed(delay, rows) => {
                    let writer = Arc::clone(&writer);
                    tokio::spawn(async move {
                        tokio::time::sleep(delay).await;
                        respond(&writer, sync, rows).await;
                    });
                }
                Action::Raw(bytes) => {
                    let _ = writer.lock().await.write_all(&bytes).await;
                }
                Action::Ignore => {}
                Action::Disconnect => return,
            }
        }
    }
}

enum Action {
    Reply(Vec<Row>),
    Error(u32, String),
    Delayed(Duration, Vec<Row>),
    Raw(Vec<u8>),
    Ignore,
    Disconnect,
}

fn handle(query: Query) -> Action {
    match query {
        Query::Ping => Action::Reply(Vec::new()),
        Query::Select(select) => select_rows(&select),
        Query::Call(call) => match call.name.as_str() {
            "sel_all" => Action::Reply(dataset()),
            "sel_name" => Action::Reply(
                dataset()
                    .into_iter()
                    .filter(|row| row.len() >= 2 && row[..2] == call.tuple[..])
                    .collect(),
            ),
            "echo" => Action::Reply(vec![call.tuple]),
            "sleep" => {
                let ms = call.tuple.first().and_then(Value::as_u64).unwrap_or(0);
                let tag = call.tuple.get(1).cloned().unwrap_or(Value::Nil);
                Action::Delayed(Duration::from_millis(ms), vec![vec![tag]])
            }
            "hang" => Action::Ignore,
            "boom" => Action::Error(ER_PROC_LUA, "boom".into()),
            "eof" => Action::Disconnect,
            // fixstr marker where the length prefix belongs
            "garbage" => Action::Raw(b"\xa3garbage".to_vec()),
            // well-formed prefix around a header that is not a map
            "bad_header" => Action::Raw(vec![0xce, 0x00, 0x00, 0x00, 0x01, 0x01]),
            // announces a 1 MiB packet
            "oversize" => Action::Raw(vec![0xce, 0x00, 0x10, 0x00, 0x00]),
            other => Action::Error(
                ER_NO_SUCH_PROC,
                format!("Procedure '{}' is not defined", other),
            ),
        },
        other => Action::Error(ER_PROC_LUA, format!("unsupported request {:#x}", other.code())),
    }
}

fn select_rows(select: &Select) -> Action {
    if select.space != Target::Id(TESTER_SPACE) {
        return Action::Error(
            ER_NO_SUCH_SPACE,
            format!("Space '{}' does not exist", select.space),
        );
    }

    let rows = dataset()
        .into_iter()
        .filter(|row| row.len() >= select.key.len() && row[..select.key.len()] == select.key[..])
        .skip(select.offset as usize)
        .take(select.limit as usize)
        .collect();
    Action::Reply(rows)
}

async fn respond(writer: &Writer, sync: u64, rows: Vec<Row>) {
    let mut buf = BytesMut::new();
    let packed = Reply::from_rows(rows).and_then(|reply| reply.pack(sync, &mut buf));
    if packed.is_ok() {
        let _ = writer.lock().await.write_all(&buf).await;
    }
}

async fn respond_error(writer: &Writer, sync: u64, errcode: u32, message: &str) {
    let mut buf = BytesMut::new();
    if pack_error(sync, errcode, message, &mut buf).is_ok() {
        let _ = writer.lock().await.write_all(&buf).await;
    }
}

/// Poll `cond` until it holds or a second passes.
pub async fn eventually(mut cond: impl FnMut() -> bool) -> bool {
    for _ in 0..1000 {
        if cond() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
    cond()
}

/// Open a connection whose socket accepts reads but fails every write.
pub async fn connect_write_broken() -> Connection {
    let (client, server) = tokio::io::duplex(64 * 1024);
    tokio::spawn(serve(server));
    Connection::builder()
        .connect_stream(BrokenWrites(client), "mock:3301")
        .await
        .expect("connect to mock server")
}

/// Stream wrapper whose write side is already gone.
pub struct BrokenWrites(pub DuplexStream);

impl AsyncRead for BrokenWrites {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.0).poll_read(cx, buf)
    }
}

impl AsyncWrite for BrokenWrites {
    fn poll_write(self: Pin<&mut Self>, _: &mut Context<'_>, _: &[u8]) -> Poll<io::Result<usize>> {
        Poll::Ready(Err(io::ErrorKind::BrokenPipe.into()))
    }

    fn poll_flush(self: Pin<&mut Self>, _: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }
}
