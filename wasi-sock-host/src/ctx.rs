//! Per-instance shim state
//!
//! One [`WasiCtx`] belongs to one guest instance. It is a cheap cloneable
//! handle: the syscall imports hold one clone inside the wasmtime store and
//! the embedder's retry loop holds another to drive [`WasiCtx::poll`].
//!
//! The descriptor table sits behind a mutex that is only ever held for the
//! synchronous part of a call. The poll driver releases it before awaiting
//! transport I/O, so a guest syscall never waits on the network.

use crate::config::{WasiConfig, WasiCtxBuilder};
use crate::socket::SocketStatus;
use crate::table::{Descriptor, Directory, FdTable, DEV_DIR_FD, TCP_DIR_FD};
use crate::transport::Connector;
use rand::RngCore;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::SystemTime;
use wasi_sock_abi::{Fd, Fdflags, Fdstat, Filetype, Rights};

/// Wall clock read by `clock_time_get`
pub(crate) type Clock = Arc<dyn Fn() -> SystemTime + Send + Sync>;

pub(crate) struct CtxInner {
    pub(crate) table: FdTable,
    pub(crate) random: Box<dyn RngCore + Send>,
    pub(crate) exit_code: Option<u32>,
}

/// Shim state for one guest instance
#[derive(Clone)]
pub struct WasiCtx {
    inner: Arc<Mutex<CtxInner>>,
    config: Arc<WasiConfig>,
    pub(crate) clock: Clock,
    pub(crate) connector: Option<Arc<dyn Connector>>,
}

impl WasiCtx {
    pub fn builder() -> WasiCtxBuilder {
        WasiCtxBuilder::new()
    }

    pub(crate) fn new(
        config: WasiConfig,
        connector: Option<Arc<dyn Connector>>,
        random: Box<dyn RngCore + Send>,
        clock: Clock,
    ) -> Self {
        let mut table = FdTable::new();
        table.insert(DEV_DIR_FD, preopen(&config.dev_dir));
        table.insert(TCP_DIR_FD, preopen(&config.tcp_dir));

        Self {
            inner: Arc::new(Mutex::new(CtxInner {
                table,
                random,
                exit_code: None,
            })),
            config: Arc::new(config),
            clock,
            connector,
        }
    }

    /// Lock the shared state. A panic elsewhere cannot leave the table
    /// half-updated, so a poisoned lock is still usable.
    pub(crate) fn lock(&self) -> MutexGuard<'_, CtxInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn config(&self) -> &WasiConfig {
        &self.config
    }

    /// Exit code recorded by `proc_exit`, if the guest called it
    pub fn exit_code(&self) -> Option<u32> {
        self.lock().exit_code
    }

    pub fn is_open(&self, fd: Fd) -> bool {
        self.lock().table.contains(fd)
    }

    /// Snapshot of a socket's pipelines; `None` if `fd` is not a socket
    pub fn socket_status(&self, fd: Fd) -> Option<SocketStatus> {
        match self.lock().table.get(fd) {
            Some(Descriptor::Socket(sock)) => Some(sock.status()),
            _ => None,
        }
    }
}

impl std::fmt::Debug for WasiCtx {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WasiCtx")
            .field("config", &self.config)
            .field("open", &self.lock().table.len())
            .field("connector", &self.connector.is_some())
            .finish_non_exhaustive()
    }
}

fn preopen(name: &str) -> Descriptor {
    Descriptor::Directory(Directory {
        name: name.to_string(),
        stat: Fdstat {
            fs_filetype: Filetype::Directory,
            fs_flags: Fdflags::empty(),
            fs_rights_base: Rights::FD_READDIR,
            fs_rights_inheriting: Rights::empty(),
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_preopens_installed() {
        let ctx = WasiCtx::builder().build().unwrap();
        assert!(ctx.is_open(DEV_DIR_FD));
        assert!(ctx.is_open(TCP_DIR_FD));
        assert!(!ctx.is_open(0));
        assert!(!ctx.is_open(5));

        let inner = ctx.lock();
        match inner.table.get(TCP_DIR_FD) {
            Some(Descriptor::Directory(dir)) => assert_eq!(dir.name, "/dev/tcp"),
            _ => panic!("fd 4 should be the socket namespace"),
        }
    }

    #[test]
    fn test_clones_share_state() {
        let ctx = WasiCtx::builder().build().unwrap();
        let other = ctx.clone();
        other.lock().table.remove(DEV_DIR_FD);
        assert!(!ctx.is_open(DEV_DIR_FD));
    }

    #[test]
    fn test_socket_status_of_directory() {
        let ctx = WasiCtx::builder().build().unwrap();
        assert!(ctx.socket_status(DEV_DIR_FD).is_none());
        assert!(ctx.exit_code().is_none());
    }
}
