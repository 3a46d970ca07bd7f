//! wasi-sock-host: Non-blocking preview1 socket shim for wasm guests
//!
//! Lets a guest written against blocking, retry-on-`again` socket calls do
//! real asynchronous network I/O. Guest syscalls only move bytes through
//! per-socket buffers; the embedder drives the actual transport by calling
//! [`WasiCtx::poll`] whenever a call reported `again`.
//!
//! ```text
//!  guest ──sock_send/sock_recv──► WasiCtx ◄──poll(fd)── embedder retry loop
//!                                   │
//!                          descriptor table
//!                                   │
//!                       Connector ─► ByteSource / ByteSink
//! ```

pub mod config;
pub mod ctx;
pub mod error;
pub mod linker;
pub mod memory;
mod path;
mod poll;
pub mod socket;
mod syscalls;
pub mod table;
pub mod transport;

pub use config::{WasiConfig, WasiCtxBuilder};
pub use ctx::WasiCtx;
pub use error::{HostError, PollError, ProcExit};
pub use linker::add_to_linker;
pub use memory::GuestMemory;
pub use socket::{Interest, Lifecycle, PollOutcome, RecvStatus, SendStatus, SocketStatus};
pub use table::{DEV_DIR_FD, TCP_DIR_FD};
pub use transport::{ByteSink, ByteSource, Connection, Connector, IoSink, IoSource, TcpConnector};
pub use wasi_sock_abi::{Errno, Fd};
