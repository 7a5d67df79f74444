//! Connection builder and runtime.
//!
//! A [`Connection`] multiplexes many concurrent requests over one socket.
//! Its lifecycle:
//! 1. Open the stream (TCP or Unix socket) under the connect timeout
//! 2. Read the 128-byte server greeting
//! 3. Spawn the writer task (owns the write half)
//! 4. Spawn the reader task (parses reply frames, routes them by sync id)
//!
//! Each [`execute`](Connection::execute) packs its query into a pooled
//! buffer under a fresh sync id, registers a pending slot, queues the buffer
//! on the writer and waits for the reader to complete the slot.
//!
//! # Example
//!
//! ```no_run
//! use std::time::Duration;
//! use iproto_client::{Call, Connection};
//!
//! # async fn run() -> iproto_client::Result<()> {
//! let conn = Connection::builder()
//!     .connect_timeout(Duration::from_secs(1))
//!     .request_timeout(Duration::from_millis(500))
//!     .connect("127.0.0.1:3301")
//!     .await?;
//!
//! let reply = conn.execute(&Call::new("sel_name").arg(2u64).arg("Music").into()).await?;
//! for row in &reply {
//!     println!("{:?}", row);
//! }
//! conn.close();
//! # Ok(())
//! # }
//! ```

use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::task::AbortHandle;
use tokio::time::Instant;

use crate::codec::Value;
use crate::error::{Error, Result};
use crate::greeting::Greeting;
use crate::pending::{PendingGuard, PendingRequests, RegisterError};
use crate::protocol::{BufferPool, Frame, FrameBuffer, DEFAULT_MAX_BODY_SIZE};
use crate::query::{Call, Query};
use crate::reply::{server_error, Reply};
use crate::schema::{PackContext, SchemaLookup};
use crate::transport::{self, Address, AsyncStream};
use crate::writer::{spawn_writer_task, OutboundFrame, WriterConfig, WriterHandle};

/// Default time allowed for connect plus greeting.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Default writer channel capacity.
pub const DEFAULT_CHANNEL_CAPACITY: usize = crate::writer::DEFAULT_CHANNEL_CAPACITY;

/// Size of the socket read buffer.
const READ_BUFFER_SIZE: usize = 64 * 1024;

/// Connection settings.
#[derive(Debug, Clone)]
pub struct Options {
    /// Deadline for opening the socket and reading the greeting.
    pub connect_timeout: Duration,
    /// Deadline applied by [`Connection::execute`]. `None` waits forever.
    pub request_timeout: Option<Duration>,
    /// Frames queued for the writer before `execute` waits.
    pub channel_capacity: usize,
    /// Largest reply packet accepted from the server.
    pub max_body_size: u32,
    /// Name resolution used while packing queries.
    pub schema: PackContext,
    /// Buffer pool to share between connections. A private one otherwise.
    pub pool: Option<Arc<BufferPool>>,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            request_timeout: None,
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
            max_body_size: DEFAULT_MAX_BODY_SIZE,
            schema: PackContext::default(),
            pool: None,
        }
    }
}

/// Builder for configuring and opening a [`Connection`].
#[derive(Debug, Clone, Default)]
pub struct ConnectionBuilder {
    options: Options,
}

impl ConnectionBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Time allowed for connect plus greeting.
    ///
    /// Default: 5 seconds
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.options.connect_timeout = timeout;
        self
    }

    /// Default deadline for every request.
    ///
    /// Default: none
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.options.request_timeout = Some(timeout);
        self
    }

    /// Set the writer channel capacity.
    ///
    /// Default: 1024
    pub fn channel_capacity(mut self, capacity: usize) -> Self {
        self.options.channel_capacity = capacity;
        self
    }

    /// Largest reply packet accepted.
    ///
    /// Default: 64 MB
    pub fn max_body_size(mut self, size: u32) -> Self {
        self.options.max_body_size = size;
        self
    }

    /// Resolve space and index names through `schema`.
    pub fn schema<S: SchemaLookup>(mut self, schema: S) -> Self {
        self.options.schema = PackContext::new(schema);
        self
    }

    /// Pack request frames into buffers from `pool`.
    pub fn pool(mut self, pool: Arc<BufferPool>) -> Self {
        self.options.pool = Some(pool);
        self
    }

    /// Connect to `addr` (`host:port`, `tcp://host:port` or `unix:/path`).
    pub async fn connect(self, addr: &str) -> Result<Connection> {
        let address: Address = addr
            .parse()
            .map_err(|e: std::io::Error| Error::connection(addr, e.to_string(), false))?;
        let remote = address.to_string();
        let deadline = Instant::now() + self.options.connect_timeout;

        tracing::debug!(remote = %remote, "connecting");
        let stream = match tokio::time::timeout_at(deadline, transport::connect(&address)).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => {
                let timeout = e.kind() == std::io::ErrorKind::TimedOut;
                return Err(Error::connection(&remote, e.to_string(), timeout));
            }
            Err(_) => return Err(Error::connection(&remote, "connect timed out", true)),
        };

        Connection::start(stream, remote, self.options, deadline).await
    }

    /// Run a connection over an already open stream.
    ///
    /// The server greeting is read from `stream` first. `remote` only labels
    /// errors and logs.
    pub async fn connect_stream<S: AsyncStream>(
        self,
        stream: S,
        remote: impl Into<String>,
    ) -> Result<Connection> {
        let deadline = Instant::now() + self.options.connect_timeout;
        Connection::start(stream, remote.into(), self.options, deadline).await
    }
}

impl From<Options> for ConnectionBuilder {
    fn from(options: Options) -> Self {
        Self { options }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
enum State {
    Connecting = 0,
    Open = 1,
    Closing = 2,
    Closed = 3,
}

impl State {
    fn from_u8(raw: u8) -> Self {
        match raw {
            0 => State::Connecting,
            1 => State::Open,
            2 => State::Closing,
            _ => State::Closed,
        }
    }
}

/// State shared between the connection handle and its tasks.
struct Shared {
    remote: String,
    state: AtomicU8,
    close_error: Mutex<Option<Error>>,
    pending: PendingRequests,
    tasks: Mutex<Vec<AbortHandle>>,
}

impl Shared {
    fn new(remote: String) -> Self {
        Self {
            remote,
            state: AtomicU8::new(State::Connecting as u8),
            close_error: Mutex::new(None),
            pending: PendingRequests::new(),
            tasks: Mutex::new(Vec::new()),
        }
    }

    fn state(&self) -> State {
        State::from_u8(self.state.load(Ordering::Acquire))
    }

    fn is_closed(&self) -> bool {
        self.state() != State::Open
    }

    /// Greeting accepted: `Connecting -> Open`.
    fn open(&self) -> bool {
        self.state
            .compare_exchange(
                State::Connecting as u8,
                State::Open as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }

    fn close_error(&self) -> Option<Error> {
        self.close_error
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// The error handed to callers of a connection that is not open.
    fn closed_error(&self) -> Error {
        Error::closed(&self.remote, self.close_error().as_ref())
    }

    /// Abort `task` on teardown, or now if teardown already happened.
    fn track(&self, task: AbortHandle) {
        let mut tasks = self.tasks.lock().unwrap_or_else(PoisonError::into_inner);
        if self.is_closed() {
            task.abort();
        } else {
            tasks.push(task);
        }
    }

    fn abort_tasks(&self) {
        let tasks = std::mem::take(&mut *self.tasks.lock().unwrap_or_else(PoisonError::into_inner));
        for task in tasks {
            task.abort();
        }
    }

    /// Unrecoverable I/O or parse failure: `Open -> Closed`.
    fn fail(&self, err: Error) {
        if self
            .state
            .compare_exchange(
                State::Open as u8,
                State::Closed as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_err()
        {
            tracing::debug!(remote = %self.remote, "ignoring failure after close: {}", err);
            return;
        }

        tracing::error!(remote = %self.remote, "connection failed: {}", err);
        let cancel = Error::closed(&self.remote, Some(&err));
        *self.close_error.lock().unwrap_or_else(PoisonError::into_inner) = Some(err);
        let cancelled = self.pending.cancel_all(cancel);
        if cancelled > 0 {
            tracing::debug!(remote = %self.remote, cancelled, "failed pending requests");
        }
        self.abort_tasks();
    }

    /// Caller-requested teardown: `Open -> Closing -> Closed`.
    fn close(&self) {
        if self
            .state
            .compare_exchange(
                State::Open as u8,
                State::Closing as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_err()
        {
            return;
        }

        let cancelled = self.pending.cancel_all(Error::closed(&self.remote, None));
        tracing::debug!(remote = %self.remote, cancelled, "connection closed");
        self.abort_tasks();
        self.state.store(State::Closed as u8, Ordering::Release);
    }

    /// Route one reply frame to its waiting caller.
    fn dispatch(&self, frame: Frame) -> crate::error::CodecResult<()> {
        let sync = frame.sync();
        let outcome = if frame.is_error() {
            Err(server_error(&frame)?)
        } else {
            Ok(Reply::unpack(&frame)?)
        };

        if !self.pending.complete(sync, outcome) {
            tracing::warn!(remote = %self.remote, sync, "reply for unknown request, skipped");
        }
        Ok(())
    }
}

/// A connection to one server.
///
/// Safe to share between tasks (`&Connection` is enough to execute).
/// Dropping it closes the connection.
pub struct Connection {
    shared: Arc<Shared>,
    writer: WriterHandle,
    pool: Arc<BufferPool>,
    schema: PackContext,
    next_sync: AtomicU64,
    greeting: Greeting,
    request_timeout: Option<Duration>,
}

impl Connection {
    /// Create a new connection builder.
    pub fn builder() -> ConnectionBuilder {
        ConnectionBuilder::new()
    }

    /// Connect to `addr` with `options`.
    pub async fn connect(addr: &str, options: Options) -> Result<Self> {
        ConnectionBuilder::from(options).connect(addr).await
    }

    async fn start<S: AsyncStream>(
        mut stream: S,
        remote: String,
        options: Options,
        deadline: Instant,
    ) -> Result<Self> {
        let shared = Arc::new(Shared::new(remote));
        let greeting = match tokio::time::timeout_at(deadline, Greeting::read_from(&mut stream)).await
        {
            Ok(Ok(greeting)) => greeting,
            Ok(Err(e)) => {
                return Err(Error::connection(
                    &shared.remote,
                    format!("bad greeting: {}", e),
                    false,
                ))
            }
            Err(_) => return Err(Error::connection(&shared.remote, "greeting timed out", true)),
        };
        tracing::debug!(
            remote = %shared.remote,
            version = %greeting.version,
            "connected"
        );

        let (read_half, write_half) = tokio::io::split(stream);
        shared.open();

        let (writer, writer_task) = spawn_writer_task(
            write_half,
            WriterConfig {
                channel_capacity: options.channel_capacity,
                ..WriterConfig::default()
            },
        );

        let watcher = {
            let shared = Arc::clone(&shared);
            shared.track(writer_task.abort_handle());
            tokio::spawn(async move {
                match writer_task.await {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => {
                        let timeout = e.kind() == std::io::ErrorKind::TimedOut;
                        shared.fail(Error::connection(
                            &shared.remote,
                            format!("write failed: {}", e),
                            timeout,
                        ));
                    }
                    Err(e) if e.is_cancelled() => {}
                    Err(e) => shared.fail(Error::connection(
                        &shared.remote,
                        format!("writer task panicked: {}", e),
                        false,
                    )),
                }
            })
        };

        let reader = tokio::spawn(read_loop(
            read_half,
            Arc::clone(&shared),
            options.max_body_size,
        ));

        shared.track(reader.abort_handle());
        shared.track(watcher.abort_handle());

        Ok(Self {
            shared,
            writer,
            pool: options.pool.unwrap_or_default(),
            schema: options.schema,
            next_sync: AtomicU64::new(1),
            greeting,
            request_timeout: options.request_timeout,
        })
    }

    /// Next synchronization id. Monotonic, wraps at `u64::MAX`.
    fn next_sync(&self) -> u64 {
        self.next_sync.fetch_add(1, Ordering::Relaxed)
    }

    /// Execute `query` with the default request timeout.
    pub async fn execute(&self, query: &Query) -> Result<Reply> {
        self.execute_timeout(query, self.request_timeout).await
    }

    /// Execute `query`, giving up after `timeout`.
    ///
    /// The deadline covers queueing and waiting. On expiry the slot is
    /// dropped and a context error returned; the connection stays usable and
    /// a late reply is skipped by the reader.
    pub async fn execute_timeout(&self, query: &Query, timeout: Option<Duration>) -> Result<Reply> {
        let Some(limit) = timeout else {
            return self.round_trip(query).await;
        };

        match tokio::time::timeout(limit, self.round_trip(query)).await {
            Ok(outcome) => outcome,
            Err(_) => Err(Error::context(
                &self.shared.remote,
                format!("request timed out after {:?}", limit),
            )),
        }
    }

    async fn round_trip(&self, query: &Query) -> Result<Reply> {
        if self.shared.is_closed() {
            return Err(self.shared.closed_error());
        }

        let mut buffer = self.pool.acquire();
        let sync = self.next_sync();
        query.pack(sync, &self.schema, &mut buffer)?;

        let completion = self.shared.pending.register(sync).map_err(|e| match e {
            RegisterError::Closed => self.shared.closed_error(),
            RegisterError::InUse(_) => Error::connection(&self.shared.remote, e.to_string(), false),
        })?;
        let mut guard = PendingGuard::new(&self.shared.pending, sync);

        if let Err(e) = self.writer.send(OutboundFrame::new(sync, buffer)).await {
            tracing::debug!(sync, "request not queued: {}", e);
            return Err(self.shared.closed_error());
        }

        let outcome = completion.await;
        guard.disarm();
        match outcome {
            Ok(result) => result,
            // slot dropped without an answer: only teardown does that
            Err(_) => Err(self.shared.closed_error()),
        }
    }

    /// Call a stored function.
    pub async fn call(&self, name: &str, args: Vec<Value>) -> Result<Reply> {
        self.execute(&Call::new(name).tuple(args).into()).await
    }

    /// Round-trip an empty request.
    pub async fn ping(&self) -> Result<()> {
        self.execute(&Query::Ping).await.map(|_| ())
    }

    /// Greeting the server sent on connect.
    pub fn greeting(&self) -> &Greeting {
        &self.greeting
    }

    /// Address or label of the server.
    pub fn remote(&self) -> &str {
        &self.shared.remote
    }

    /// Is the connection closed (by [`close`](Self::close) or a failure)?
    pub fn is_closed(&self) -> bool {
        self.shared.is_closed()
    }

    /// The failure that closed the connection, if it was not a plain close.
    pub fn close_error(&self) -> Option<Error> {
        self.shared.close_error()
    }

    /// Requests still waiting for a reply.
    pub fn pending_requests(&self) -> usize {
        self.shared.pending.len()
    }

    /// Pool the request buffers come from.
    pub fn pool(&self) -> &Arc<BufferPool> {
        &self.pool
    }

    /// Close the connection. Every waiting request fails with a connection
    /// error. Calling it again does nothing.
    pub fn close(&self) {
        self.shared.close();
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("remote", &self.shared.remote)
            .field("state", &self.shared.state())
            .field("pending", &self.shared.pending.len())
            .finish()
    }
}

/// Reads reply frames and routes them until the stream ends or breaks.
async fn read_loop<R: AsyncRead + Unpin>(mut reader: R, shared: Arc<Shared>, max_body_size: u32) {
    let mut frame_buffer = FrameBuffer::with_max_body(max_body_size);
    let mut buf = vec![0u8; READ_BUFFER_SIZE];

    let err = 'read: loop {
        let n = match reader.read(&mut buf).await {
            Ok(0) => break Error::connection(&shared.remote, "connection closed by peer", false),
            Ok(n) => n,
            Err(e) => {
                let timeout = e.kind() == std::io::ErrorKind::TimedOut;
                break Error::connection(&shared.remote, format!("read failed: {}", e), timeout);
            }
        };

        let frames = match frame_buffer.push(&buf[..n]) {
            Ok(frames) => frames,
            Err(e) => {
                break Error::connection(&shared.remote, format!("invalid reply stream: {}", e), false)
            }
        };

        for frame in frames {
            if let Err(e) = shared.dispatch(frame) {
                break 'read Error::connection(&shared.remote, format!("invalid reply: {}", e), false);
            }
        }
    };

    shared.fail(err);
}
