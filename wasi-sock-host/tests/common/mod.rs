//! Shared helpers for integration tests
//!
//! [`Guest`] plays the part of a compiled guest: it owns a linear memory,
//! lays out iovecs and result slots the way a preview1 caller would, and
//! invokes the syscalls on a [`WasiCtx`].

#![allow(dead_code)]

use async_trait::async_trait;
use std::io;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::io::DuplexStream;
use tokio::sync::Notify;
use wasi_sock_abi::{Errno, Event, Eventrwflags, Eventtype, Fd, Iovec, Subscription};
use wasi_sock_host::{
    ByteSink, ByteSource, Connection, Connector, GuestMemory, WasiCtx, TCP_DIR_FD,
};

const MEMORY_SIZE: usize = 64 * 1024;
const PATH_AT: u32 = 0x100;
const IOVEC_AT: u32 = 0x200;
const RESULT_AT: u32 = 0x300;
const FLAGS_AT: u32 = 0x304;
const SUBS_AT: u32 = 0x400;
const EVENTS_AT: u32 = 0x1000;
const RECV_AT: u32 = 0x4000;
const SEND_AT: u32 = 0x8000;
const MAX_IO: usize = 0x4000;

pub struct Guest {
    pub ctx: WasiCtx,
    pub memory: Vec<u8>,
}

/// One decoded `poll_oneoff` event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Readiness {
    pub userdata: u64,
    pub error: u16,
    pub type_: u8,
    pub nbytes: u64,
    pub hangup: bool,
}

impl Guest {
    pub fn new(ctx: WasiCtx) -> Self {
        Self {
            ctx,
            memory: vec![0u8; MEMORY_SIZE],
        }
    }

    fn mem(&mut self) -> GuestMemory<'_> {
        GuestMemory::new(&mut self.memory)
    }

    fn read_u32(&self, at: u32) -> u32 {
        let at = at as usize;
        u32::from_le_bytes(self.memory[at..at + 4].try_into().unwrap())
    }

    fn write_iovec(&mut self, at: u32, buf: u32, len: usize) {
        let iov = Iovec {
            buf,
            buf_len: len as u32,
        };
        let at = at as usize;
        self.memory[at..at + Iovec::SIZE].copy_from_slice(&iov.encode());
    }

    /// `path_open` under the socket namespace
    pub fn open(&mut self, name: &str) -> Result<Fd, Errno> {
        self.open_in(TCP_DIR_FD, name)
    }

    pub fn open_in(&mut self, dirfd: Fd, name: &str) -> Result<Fd, Errno> {
        let at = PATH_AT as usize;
        self.memory[at..at + name.len()].copy_from_slice(name.as_bytes());
        let ctx = self.ctx.clone();
        ctx.path_open(
            &mut self.mem(),
            dirfd,
            0,
            PATH_AT,
            name.len() as u32,
            0,
            0,
            0,
            0,
            RESULT_AT,
        )?;
        Ok(self.read_u32(RESULT_AT))
    }

    /// `sock_recv` into a single iovec of `len` bytes
    pub fn recv(&mut self, fd: Fd, len: usize) -> Result<Vec<u8>, Errno> {
        assert!(len <= MAX_IO);
        self.write_iovec(IOVEC_AT, RECV_AT, len);
        let ctx = self.ctx.clone();
        ctx.sock_recv(&mut self.mem(), fd, IOVEC_AT, 1, 0, RESULT_AT, FLAGS_AT)?;
        assert_eq!(self.read_u32(FLAGS_AT) & 0xffff, 0);
        let n = self.read_u32(RESULT_AT) as usize;
        let at = RECV_AT as usize;
        Ok(self.memory[at..at + n].to_vec())
    }

    /// `fd_read` into a single iovec of `len` bytes
    pub fn read(&mut self, fd: Fd, len: usize) -> Result<Vec<u8>, Errno> {
        assert!(len <= MAX_IO);
        self.write_iovec(IOVEC_AT, RECV_AT, len);
        let ctx = self.ctx.clone();
        ctx.fd_read(&mut self.mem(), fd, IOVEC_AT, 1, RESULT_AT)?;
        let n = self.read_u32(RESULT_AT) as usize;
        let at = RECV_AT as usize;
        Ok(self.memory[at..at + n].to_vec())
    }

    /// `sock_send` of `data` as a single iovec
    pub fn send(&mut self, fd: Fd, data: &[u8]) -> Result<usize, Errno> {
        assert!(data.len() <= MAX_IO);
        let at = SEND_AT as usize;
        self.memory[at..at + data.len()].copy_from_slice(data);
        self.write_iovec(IOVEC_AT, SEND_AT, data.len());
        let ctx = self.ctx.clone();
        ctx.sock_send(&mut self.mem(), fd, IOVEC_AT, 1, 0, RESULT_AT)?;
        Ok(self.read_u32(RESULT_AT) as usize)
    }

    /// `poll_oneoff` over `subs`, decoded
    pub fn poll_oneoff(&mut self, subs: &[Subscription]) -> Result<Vec<Readiness>, Errno> {
        for (i, sub) in subs.iter().enumerate() {
            let at = SUBS_AT as usize + i * Subscription::SIZE;
            self.memory[at..at + Subscription::SIZE].copy_from_slice(&sub.encode());
        }
        let ctx = self.ctx.clone();
        ctx.poll_oneoff(
            &mut self.mem(),
            SUBS_AT,
            EVENTS_AT,
            subs.len() as u32,
            RESULT_AT,
        )?;
        assert_eq!(self.read_u32(RESULT_AT) as usize, subs.len());

        Ok((0..subs.len())
            .map(|i| {
                let at = EVENTS_AT as usize + i * Event::SIZE;
                let raw = &self.memory[at..at + Event::SIZE];
                let flags = u16::from_le_bytes([raw[24], raw[25]]);
                Readiness {
                    userdata: u64::from_le_bytes(raw[..8].try_into().unwrap()),
                    error: u16::from_le_bytes([raw[8], raw[9]]),
                    type_: raw[10],
                    nbytes: u64::from_le_bytes(raw[16..24].try_into().unwrap()),
                    hangup: flags & Eventrwflags::FD_READWRITE_HANGUP.bits() != 0,
                }
            })
            .collect())
    }

    pub fn read_ready(&mut self, fd: Fd) -> Readiness {
        let sub = Subscription {
            userdata: 1,
            u: wasi_sock_abi::SubscriptionU::FdRead(fd),
        };
        let event = self.poll_oneoff(&[sub]).unwrap()[0];
        assert_eq!(event.type_, Eventtype::FdRead as u8);
        event
    }

    pub fn write_ready(&mut self, fd: Fd) -> Readiness {
        let sub = Subscription {
            userdata: 2,
            u: wasi_sock_abi::SubscriptionU::FdWrite(fd),
        };
        let event = self.poll_oneoff(&[sub]).unwrap()[0];
        assert_eq!(event.type_, Eventtype::FdWrite as u8);
        event
    }
}

/// Hands out one pre-made duplex end per connect call
pub struct PipeConnector {
    ends: Mutex<Vec<DuplexStream>>,
    pub calls: AtomicUsize,
}

impl PipeConnector {
    /// Connector for one connection; returns the peer's end
    pub fn pair(capacity: usize) -> (Self, DuplexStream) {
        let (near, far) = tokio::io::duplex(capacity);
        (
            Self {
                ends: Mutex::new(vec![near]),
                calls: AtomicUsize::new(0),
            },
            far,
        )
    }
}

#[async_trait]
impl Connector for PipeConnector {
    async fn connect(&self, _host: &str, _port: u16) -> io::Result<Connection> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let end = self
            .ends
            .lock()
            .unwrap()
            .pop()
            .ok_or_else(|| io::Error::new(io::ErrorKind::ConnectionRefused, "no more pipes"))?;
        Ok(Connection::from_io(end))
    }
}

/// Connector whose peer has already hung up: reads end immediately
pub struct ClosedConnector;

#[async_trait]
impl Connector for ClosedConnector {
    async fn connect(&self, _host: &str, _port: u16) -> io::Result<Connection> {
        let (near, far) = tokio::io::duplex(64);
        drop(far);
        Ok(Connection::from_io(near))
    }
}

/// Source that records when it is dropped
pub struct TrackedSource {
    pub dropped: Arc<AtomicBool>,
}

#[async_trait]
impl ByteSource for TrackedSource {
    async fn read(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
        Ok(0)
    }
}

impl Drop for TrackedSource {
    fn drop(&mut self) {
        self.dropped.store(true, Ordering::SeqCst);
    }
}

pub struct NullSink;

#[async_trait]
impl ByteSink for NullSink {
    async fn write_all(&mut self, _buf: &[u8]) -> io::Result<()> {
        Ok(())
    }
}

/// Connector that blocks until released, so a test can close the
/// descriptor while the connect is in flight
#[derive(Default)]
pub struct GatedConnector {
    pub entered: Notify,
    pub gate: Notify,
    pub dropped: Arc<AtomicBool>,
    pub calls: AtomicUsize,
}

#[async_trait]
impl Connector for GatedConnector {
    async fn connect(&self, _host: &str, _port: u16) -> io::Result<Connection> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.entered.notify_one();
        self.gate.notified().await;
        Ok(Connection::new(
            TrackedSource {
                dropped: self.dropped.clone(),
            },
            NullSink,
        ))
    }
}

/// Wait until the spawned poll has checked its step out
pub async fn until<F: Fn() -> bool>(cond: F) {
    for _ in 0..1000 {
        if cond() {
            return;
        }
        tokio::task::yield_now().await;
    }
    panic!("condition never became true");
}
