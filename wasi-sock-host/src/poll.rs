//! Poll driver
//!
//! The only place where the shim waits on I/O. The embedder calls
//! [`WasiCtx::poll`] after a syscall returned `again`; each call performs
//! at most one transport operation:
//!
//! ```text
//!   lock ─► take step ─► unlock ─► await I/O ─► lock ─► fd still open? ─► apply
//!                                                          │
//!                                                          └─ no ─► drop result
//! ```
//!
//! Every await also watches the socket's close signal, so `fd_close`
//! ends an in-flight step at once and the step drops its stream.
//!
//! Priority for [`Interest::Any`]: finish a pending connect, then flush
//! staged outbound bytes, then refill an exhausted receive buffer. Under
//! sustained write pressure an embedder can alternate
//! [`Interest::Read`] and [`Interest::Write`] instead.

use crate::ctx::WasiCtx;
use crate::error::PollError;
use crate::socket::{Interest, PollOutcome, Socket, Step, StepKind};
use tokio::sync::watch;
use wasi_sock_abi::Fd;

impl WasiCtx {
    /// Drive one step of I/O for socket `fd`
    ///
    /// Safe to call speculatively; returns [`PollOutcome::Idle`] when
    /// nothing is owed or the owed step is already in flight elsewhere.
    ///
    /// # Errors
    ///
    /// Returns [`PollError::BadDescriptor`] if `fd` is not an open socket.
    pub async fn poll(&self, fd: Fd) -> Result<PollOutcome, PollError> {
        self.poll_interest(fd, Interest::Any).await
    }

    /// Like [`poll`](Self::poll), restricted to one direction
    pub async fn poll_interest(
        &self,
        fd: Fd,
        interest: Interest,
    ) -> Result<PollOutcome, PollError> {
        let (step, signal) = {
            let mut inner = self.lock();
            let sock = inner
                .table
                .socket_mut(fd)
                .ok_or(PollError::BadDescriptor(fd))?;
            (sock.take_step(interest), sock.close_signal())
        };

        let Some(step) = step else {
            return Ok(PollOutcome::Idle);
        };

        let kind = step.kind();
        let mut guard = InFlight {
            ctx: self,
            fd,
            kind,
            armed: true,
        };

        let outcome = match step {
            Step::Connect(attempt) => {
                let result = tokio::select! {
                    result = attempt => Some(result),
                    () = until_closed(signal) => None,
                };
                guard.disarm();
                match result {
                    Some(result) => self.complete(fd, kind, move |sock| sock.finish_connect(result)),
                    None => discarded(fd, kind),
                }
            }
            Step::Flush { buf, mut sink } => {
                let result = tokio::select! {
                    result = sink.write_all(buf.staged()) => Some(result),
                    () = until_closed(signal) => None,
                };
                guard.disarm();
                match result {
                    Some(result) => self.complete(fd, kind, move |sock| {
                        sock.finish_flush(buf, sink, result)
                    }),
                    None => discarded(fd, kind),
                }
            }
            Step::Fill {
                mut storage,
                source,
            } => {
                let result = tokio::select! {
                    result = async { source.lock().await.read(&mut storage).await } => Some(result),
                    () = until_closed(signal) => None,
                };
                guard.disarm();
                match result {
                    Some(result) => self.complete(fd, kind, move |sock| {
                        sock.finish_fill(storage, result)
                    }),
                    None => discarded(fd, kind),
                }
            }
        };
        Ok(outcome)
    }

    /// Apply a finished step, unless the descriptor went away meanwhile
    fn complete(
        &self,
        fd: Fd,
        kind: StepKind,
        apply: impl FnOnce(&mut Socket) -> PollOutcome,
    ) -> PollOutcome {
        let mut inner = self.lock();
        match inner.table.socket_mut(fd) {
            Some(sock) => apply(sock),
            // Dropping `apply` releases the stream and buffer it captured.
            None => discarded(fd, kind),
        }
    }
}

fn discarded(fd: Fd, kind: StepKind) -> PollOutcome {
    tracing::debug!(fd, step = ?kind, "Descriptor closed while in flight; result dropped");
    PollOutcome::Discarded
}

/// Resolves once the socket's descriptor is closed
async fn until_closed(mut signal: watch::Receiver<bool>) {
    // A dropped sender means the socket itself is gone.
    let _ = signal.wait_for(|closed| *closed).await;
}

/// Fails the checked-out pipeline if the poll future is dropped mid-await
struct InFlight<'a> {
    ctx: &'a WasiCtx,
    fd: Fd,
    kind: StepKind,
    armed: bool,
}

impl InFlight<'_> {
    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let mut inner = self.ctx.lock();
        if let Some(sock) = inner.table.socket_mut(self.fd) {
            sock.abandon(self.kind);
        }
    }
}
