//! Socket state machine
//!
//! A socket moves forward through `Opened -> Connecting -> Connected` and
//! never back. Once connected it owns two independent pipelines:
//!
//! ```text
//! receive:  Idle(buf) --empty read--> Insufficient --poll--> Busy --+--> Idle(filled)
//!                                                                     +--> Eof
//!                                                                     +--> Err
//! transmit: Idle(buf, staged) --poll, staged > 0--> Busy --+--> Idle(empty)
//!                                                           +--> Err
//! ```
//!
//! Guest-facing calls (`recv_into`, `send_from`) only copy between guest
//! memory and the pipeline buffers and never wait. Real I/O happens in the
//! poll driver, which checks a [`Step`] out of the socket (leaving the
//! pipeline `Busy`), runs it without holding the descriptor table, and
//! hands the buffer and stream back through one of the `finish_*` methods.
//! A pipeline is therefore never doing two operations at once, and the
//! bytes it holds travel with the step and come back unchanged.
//!
//! The receive stream is shared with the step rather than moved into it,
//! so a refill whose poll was dropped goes back to `Insufficient` and is
//! retried. Closing the descriptor fires the socket's close signal, which
//! makes any in-flight step give up and release its stream.

use crate::memory::GuestMemory;
use crate::transport::{ByteSink, ByteSource, Connection};
use futures::future::BoxFuture;
use std::io;
use std::sync::Arc;
use tokio::sync::{watch, Mutex};
use wasi_sock_abi::{Errno, Fdstat, Iovec};

/// Pending connect attempt, driven by the poll driver
pub(crate) type ConnectFuture = BoxFuture<'static, io::Result<Connection>>;

/// Receive stream, shared between the pipeline and an in-flight refill
pub(crate) type SharedSource = Arc<Mutex<Box<dyn ByteSource>>>;

fn shared(source: Box<dyn ByteSource>) -> SharedSource {
    Arc::new(Mutex::new(source))
}

/// Receive scratch buffer; `start..end` is the unread window
pub(crate) struct RecvBuf {
    storage: Box<[u8]>,
    start: usize,
    end: usize,
}

impl RecvBuf {
    fn empty(storage: Box<[u8]>) -> Self {
        Self {
            storage,
            start: 0,
            end: 0,
        }
    }

    fn filled(storage: Box<[u8]>, len: usize) -> Self {
        let end = len.min(storage.len());
        Self {
            storage,
            start: 0,
            end,
        }
    }

    fn available(&self) -> usize {
        self.end - self.start
    }

    fn unread(&self) -> &[u8] {
        &self.storage[self.start..self.end]
    }

    fn consume(&mut self, n: usize) {
        self.start = (self.start + n).min(self.end);
    }

    /// Copy unread bytes across `iovs` in order until either side runs out
    fn copy_out(&mut self, mem: &mut GuestMemory<'_>, iovs: &[Iovec]) -> Result<usize, Errno> {
        let mut total = 0;
        for iov in iovs {
            if self.available() == 0 {
                break;
            }
            let n = (iov.buf_len as usize).min(self.available());
            mem.slice_mut(iov.buf, n as u32)?
                .copy_from_slice(&self.unread()[..n]);
            self.consume(n);
            total += n;
        }
        Ok(total)
    }
}

/// Transmit scratch buffer; `..filled` is staged for the next flush
pub(crate) struct SendBuf {
    storage: Box<[u8]>,
    filled: usize,
}

impl SendBuf {
    fn new(storage: Box<[u8]>) -> Self {
        Self { storage, filled: 0 }
    }

    fn room(&self) -> usize {
        self.storage.len() - self.filled
    }

    pub(crate) fn staged(&self) -> &[u8] {
        &self.storage[..self.filled]
    }

    fn clear(&mut self) {
        self.filled = 0;
    }

    /// Copy from `iovs` in order into the free room
    fn copy_in(&mut self, mem: &GuestMemory<'_>, iovs: &[Iovec]) -> Result<usize, Errno> {
        let mut total = 0;
        for iov in iovs {
            if self.room() == 0 {
                break;
            }
            let n = (iov.buf_len as usize).min(self.room());
            let src = mem.slice(iov.buf, n as u32)?;
            self.storage[self.filled..self.filled + n].copy_from_slice(src);
            self.filled += n;
            total += n;
        }
        Ok(total)
    }
}

pub(crate) enum RecvState {
    Idle {
        buf: RecvBuf,
        source: SharedSource,
    },
    Insufficient {
        storage: Box<[u8]>,
        source: SharedSource,
    },
    /// A refill holds the storage; the stream stays reachable from here
    Busy {
        source: SharedSource,
    },
    Eof {
        buf: RecvBuf,
    },
    Err(Arc<io::Error>),
}

impl RecvState {
    /// Turn an exhausted `Idle` into `Insufficient`, registering a refill
    fn mark_insufficient(&mut self) {
        if let RecvState::Idle { buf, source } = self {
            if buf.available() == 0 {
                let storage = std::mem::take(&mut buf.storage);
                let source = source.clone();
                *self = RecvState::Insufficient { storage, source };
            }
        }
    }

    fn status(&self) -> RecvStatus {
        match self {
            RecvState::Idle { buf, .. } => RecvStatus::Idle {
                buffered: buf.available(),
            },
            RecvState::Insufficient { .. } => RecvStatus::Insufficient,
            RecvState::Busy { .. } => RecvStatus::Busy,
            RecvState::Eof { buf } => RecvStatus::Eof {
                buffered: buf.available(),
            },
            RecvState::Err(_) => RecvStatus::Err,
        }
    }
}

pub(crate) enum SendState {
    Idle {
        buf: SendBuf,
        sink: Box<dyn ByteSink>,
    },
    Busy,
    Err(Arc<io::Error>),
}

impl SendState {
    fn status(&self) -> SendStatus {
        match self {
            SendState::Idle { buf, .. } => SendStatus::Idle {
                staged: buf.filled,
                room: buf.room(),
            },
            SendState::Busy => SendStatus::Busy,
            SendState::Err(_) => SendStatus::Err,
        }
    }
}

pub(crate) enum SocketState {
    Opened {
        recv_buf: Box<[u8]>,
        send_buf: Box<[u8]>,
    },
    Connecting {
        recv_buf: Box<[u8]>,
        send_buf: Box<[u8]>,
        /// `None` while the poll driver is awaiting the attempt
        pending: Option<ConnectFuture>,
    },
    Connected {
        recv: RecvState,
        send: SendState,
    },
}

/// Which pipelines a poll step may advance
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interest {
    /// Flush first, then refill
    Any,
    Read,
    Write,
}

impl Interest {
    fn wants_read(self) -> bool {
        matches!(self, Interest::Any | Interest::Read)
    }

    fn wants_write(self) -> bool {
        matches!(self, Interest::Any | Interest::Write)
    }
}

/// Unit of asynchronous work checked out of a socket by the poll driver
pub(crate) enum Step {
    Connect(ConnectFuture),
    Flush {
        buf: SendBuf,
        sink: Box<dyn ByteSink>,
    },
    Fill {
        storage: Box<[u8]>,
        source: SharedSource,
    },
}

impl Step {
    pub(crate) fn kind(&self) -> StepKind {
        match self {
            Step::Connect(_) => StepKind::Connect,
            Step::Flush { .. } => StepKind::Flush,
            Step::Fill { .. } => StepKind::Fill,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum StepKind {
    Connect,
    Flush,
    Fill,
}

/// What one poll step achieved
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome {
    /// Nothing was pending
    Idle,
    /// Connect attempt resolved and both pipelines are ready
    Connected,
    /// Staged bytes were written to the transport
    Flushed(usize),
    /// Receive buffer was refilled
    Filled(usize),
    /// Inbound stream ended
    Eof,
    /// The step failed; the affected pipeline is now terminal
    Failed,
    /// Descriptor was closed while the step was in flight; result dropped
    Discarded,
}

/// Externally visible lifecycle of a socket
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
    Opened,
    Connecting,
    Connected,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecvStatus {
    Idle { buffered: usize },
    Insufficient,
    Busy,
    Eof { buffered: usize },
    Err,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendStatus {
    Idle { staged: usize, room: usize },
    Busy,
    Err,
}

/// Snapshot of a socket for the embedding runtime
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SocketStatus {
    pub lifecycle: Lifecycle,
    /// `None` until connected
    pub recv: Option<RecvStatus>,
    pub send: Option<SendStatus>,
}

/// Readiness reported to `poll_oneoff`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Readiness {
    Ready { nbytes: usize, hangup: bool },
    Again,
    Failed,
}

/// Stream socket backed by an embedder-supplied connection
pub struct Socket {
    pub(crate) stat: Fdstat,
    peer: String,
    recv_capacity: usize,
    state: SocketState,
    /// Flipped to `true` when the descriptor is closed
    closed: watch::Sender<bool>,
}

impl Socket {
    /// New socket with pre-allocated scratch buffers
    pub(crate) fn open(stat: Fdstat, peer: String, recv_capacity: usize, send_capacity: usize) -> Self {
        Self {
            stat,
            peer,
            recv_capacity,
            closed: watch::Sender::new(false),
            state: SocketState::Opened {
                recv_buf: vec![0u8; recv_capacity].into_boxed_slice(),
                send_buf: vec![0u8; send_capacity].into_boxed_slice(),
            },
        }
    }

    /// Socket over a connection the embedder already established
    pub(crate) fn attached(
        stat: Fdstat,
        peer: String,
        recv_capacity: usize,
        send_capacity: usize,
        conn: Connection,
    ) -> Self {
        Self {
            stat,
            peer,
            recv_capacity,
            closed: watch::Sender::new(false),
            state: SocketState::Connected {
                recv: RecvState::Idle {
                    buf: RecvBuf::empty(vec![0u8; recv_capacity].into_boxed_slice()),
                    source: shared(conn.source),
                },
                send: SendState::Idle {
                    buf: SendBuf::new(vec![0u8; send_capacity].into_boxed_slice()),
                    sink: conn.sink,
                },
            },
        }
    }

    /// Move an opened socket to `Connecting` with its connect attempt
    pub(crate) fn begin_connect(&mut self, attempt: ConnectFuture) {
        self.state = match std::mem::replace(&mut self.state, placeholder()) {
            SocketState::Opened { recv_buf, send_buf } => SocketState::Connecting {
                recv_buf,
                send_buf,
                pending: Some(attempt),
            },
            other => {
                tracing::warn!(peer = %self.peer, "Connect requested on a socket past Opened");
                other
            }
        };
    }

    /// Fire the close signal; in-flight steps give up and drop their stream
    pub(crate) fn cancel(&self) {
        self.closed.send_replace(true);
    }

    pub(crate) fn close_signal(&self) -> watch::Receiver<bool> {
        self.closed.subscribe()
    }

    pub fn status(&self) -> SocketStatus {
        match &self.state {
            SocketState::Opened { .. } => SocketStatus {
                lifecycle: Lifecycle::Opened,
                recv: None,
                send: None,
            },
            SocketState::Connecting { .. } => SocketStatus {
                lifecycle: Lifecycle::Connecting,
                recv: None,
                send: None,
            },
            SocketState::Connected { recv, send } => SocketStatus {
                lifecycle: Lifecycle::Connected,
                recv: Some(recv.status()),
                send: Some(send.status()),
            },
        }
    }

    /// Copy buffered inbound bytes into `iovs`; never waits
    pub(crate) fn recv_into(
        &mut self,
        mem: &mut GuestMemory<'_>,
        iovs: &[Iovec],
    ) -> Result<usize, Errno> {
        let SocketState::Connected { recv, .. } = &mut self.state else {
            return Err(Errno::Again);
        };

        // Fail before consuming anything so a bad iovec cannot lose bytes.
        for iov in iovs {
            mem.slice(iov.buf, iov.buf_len)?;
        }

        match recv {
            RecvState::Idle { buf, .. } if buf.available() > 0 => buf.copy_out(mem, iovs),
            RecvState::Idle { .. } => {
                recv.mark_insufficient();
                Err(Errno::Again)
            }
            RecvState::Insufficient { .. } | RecvState::Busy { .. } => Err(Errno::Again),
            RecvState::Eof { buf } => buf.copy_out(mem, iovs),
            RecvState::Err(_) => Err(Errno::Io),
        }
    }

    /// Stage outbound bytes from `iovs` into the transmit buffer; never waits
    pub(crate) fn send_from(&mut self, mem: &GuestMemory<'_>, iovs: &[Iovec]) -> Result<usize, Errno> {
        let SocketState::Connected { send, .. } = &mut self.state else {
            return Err(Errno::Again);
        };

        for iov in iovs {
            mem.slice(iov.buf, iov.buf_len)?;
        }

        match send {
            SendState::Idle { buf, .. } if buf.room() > 0 => buf.copy_in(mem, iovs),
            SendState::Idle { .. } | SendState::Busy => Err(Errno::Again),
            SendState::Err(_) => Err(Errno::Io),
        }
    }

    pub(crate) fn read_readiness(&mut self) -> Readiness {
        let SocketState::Connected { recv, .. } = &mut self.state else {
            return Readiness::Again;
        };
        match recv {
            RecvState::Idle { buf, .. } if buf.available() > 0 => Readiness::Ready {
                nbytes: buf.available(),
                hangup: false,
            },
            RecvState::Idle { .. } => {
                recv.mark_insufficient();
                Readiness::Again
            }
            RecvState::Insufficient { .. } | RecvState::Busy { .. } => Readiness::Again,
            RecvState::Eof { buf } => Readiness::Ready {
                nbytes: buf.available(),
                hangup: true,
            },
            RecvState::Err(_) => Readiness::Failed,
        }
    }

    pub(crate) fn write_readiness(&self) -> Readiness {
        let SocketState::Connected { send, .. } = &self.state else {
            return Readiness::Again;
        };
        match send {
            SendState::Idle { buf, .. } if buf.room() > 0 => Readiness::Ready {
                nbytes: buf.room(),
                hangup: false,
            },
            SendState::Idle { .. } | SendState::Busy => Readiness::Again,
            SendState::Err(_) => Readiness::Failed,
        }
    }

    /// Check out the next unit of work, leaving its pipeline in flight
    pub(crate) fn take_step(&mut self, interest: Interest) -> Option<Step> {
        match &mut self.state {
            SocketState::Opened { .. } => None,
            SocketState::Connecting { pending, .. } => pending.take().map(Step::Connect),
            SocketState::Connected { recv, send } => {
                if interest.wants_write() {
                    if let SendState::Idle { buf, .. } = send {
                        if buf.filled > 0 {
                            if let SendState::Idle { buf, sink } =
                                std::mem::replace(send, SendState::Busy)
                            {
                                return Some(Step::Flush { buf, sink });
                            }
                        }
                    }
                }
                if interest.wants_read() {
                    if let RecvState::Insufficient { storage, source } = recv {
                        let storage = std::mem::take(storage);
                        let source = source.clone();
                        *recv = RecvState::Busy {
                            source: source.clone(),
                        };
                        return Some(Step::Fill { storage, source });
                    }
                }
                None
            }
        }
    }

    pub(crate) fn finish_connect(&mut self, result: io::Result<Connection>) -> PollOutcome {
        let (recv_buf, send_buf) = match std::mem::replace(&mut self.state, placeholder()) {
            SocketState::Connecting {
                recv_buf,
                send_buf,
                pending: None,
            } => (recv_buf, send_buf),
            other => {
                self.state = other;
                tracing::warn!(peer = %self.peer, "Connect completed for a socket not awaiting it");
                return PollOutcome::Discarded;
            }
        };

        match result {
            Ok(conn) => {
                self.state = SocketState::Connected {
                    recv: RecvState::Idle {
                        buf: RecvBuf::empty(recv_buf),
                        source: shared(conn.source),
                    },
                    send: SendState::Idle {
                        buf: SendBuf::new(send_buf),
                        sink: conn.sink,
                    },
                };
                tracing::debug!(peer = %self.peer, "Socket connected");
                PollOutcome::Connected
            }
            Err(e) => {
                tracing::warn!(peer = %self.peer, error = %e, "Connect failed");
                let cause = Arc::new(e);
                self.state = SocketState::Connected {
                    recv: RecvState::Err(cause.clone()),
                    send: SendState::Err(cause),
                };
                PollOutcome::Failed
            }
        }
    }

    pub(crate) fn finish_flush(
        &mut self,
        mut buf: SendBuf,
        sink: Box<dyn ByteSink>,
        result: io::Result<()>,
    ) -> PollOutcome {
        let SocketState::Connected { send, .. } = &mut self.state else {
            return PollOutcome::Discarded;
        };
        if !matches!(send, SendState::Busy) {
            tracing::warn!(peer = %self.peer, "Flush completed for a pipeline not in flight");
            return PollOutcome::Discarded;
        }

        match result {
            Ok(()) => {
                let n = buf.filled;
                buf.clear();
                *send = SendState::Idle { buf, sink };
                tracing::trace!(peer = %self.peer, bytes = n, "Transmit buffer flushed");
                PollOutcome::Flushed(n)
            }
            Err(e) => {
                tracing::warn!(peer = %self.peer, error = %e, "Transmit failed");
                *send = SendState::Err(Arc::new(e));
                PollOutcome::Failed
            }
        }
    }

    pub(crate) fn finish_fill(&mut self, storage: Box<[u8]>, result: io::Result<usize>) -> PollOutcome {
        let SocketState::Connected { recv, .. } = &mut self.state else {
            return PollOutcome::Discarded;
        };
        let RecvState::Busy { source } = recv else {
            tracing::warn!(peer = %self.peer, "Refill completed for a pipeline not in flight");
            return PollOutcome::Discarded;
        };
        let source = source.clone();

        match result {
            Ok(0) => {
                *recv = RecvState::Eof {
                    buf: RecvBuf::empty(storage),
                };
                tracing::debug!(peer = %self.peer, "Inbound stream ended");
                PollOutcome::Eof
            }
            Ok(n) => {
                *recv = RecvState::Idle {
                    buf: RecvBuf::filled(storage, n),
                    source,
                };
                tracing::trace!(peer = %self.peer, bytes = n, "Receive buffer refilled");
                PollOutcome::Filled(n)
            }
            Err(e) => {
                tracing::warn!(peer = %self.peer, error = %e, "Receive failed");
                *recv = RecvState::Err(Arc::new(e));
                PollOutcome::Failed
            }
        }
    }

    /// A checked-out step will never come back
    ///
    /// An unfinished read consumed nothing, so a refill is owed again. A
    /// connect or a partial write cannot be resumed and fails its pipeline.
    pub(crate) fn abandon(&mut self, kind: StepKind) {
        let cause = || {
            Arc::new(io::Error::new(
                io::ErrorKind::Interrupted,
                "poll was cancelled while an operation was in flight",
            ))
        };
        match (&mut self.state, kind) {
            (SocketState::Connected { recv, .. }, StepKind::Fill) => {
                if let RecvState::Busy { source } = recv {
                    let source = source.clone();
                    *recv = RecvState::Insufficient {
                        storage: vec![0u8; self.recv_capacity].into_boxed_slice(),
                        source,
                    };
                    tracing::debug!(peer = %self.peer, "Refill cancelled; owed again");
                }
                return;
            }
            (
                SocketState::Connecting {
                    pending: None, ..
                },
                StepKind::Connect,
            ) => {
                let cause = cause();
                self.state = SocketState::Connected {
                    recv: RecvState::Err(cause.clone()),
                    send: SendState::Err(cause),
                };
            }
            (SocketState::Connected { send, .. }, StepKind::Flush)
                if matches!(send, SendState::Busy) =>
            {
                *send = SendState::Err(cause());
            }
            _ => return,
        }
        tracing::warn!(peer = %self.peer, step = ?kind, "Poll cancelled mid-operation; pipeline failed");
    }
}

fn placeholder() -> SocketState {
    SocketState::Opened {
        recv_buf: Box::default(),
        send_buf: Box::default(),
    }
}
