//! End-to-end tests through wasmtime
//!
//! Each test instantiates a small WAT guest against the registered
//! imports and checks what the guest observes.

mod common;

use common::PipeConnector;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use wasi_sock_host::{add_to_linker, Errno, HostError, PollOutcome, ProcExit, WasiCtx};
use wasmtime::{Engine, Instance, Linker, Module, Store};

const GUEST: &str = r#"
(module
  (import "wasi_snapshot_preview1" "path_open"
    (func $path_open (param i32 i32 i32 i32 i32 i64 i64 i32 i32) (result i32)))
  (import "wasi_snapshot_preview1" "sock_send"
    (func $sock_send (param i32 i32 i32 i32 i32) (result i32)))
  (import "wasi_snapshot_preview1" "sock_recv"
    (func $sock_recv (param i32 i32 i32 i32 i32 i32) (result i32)))
  (import "wasi_snapshot_preview1" "fd_close" (func $fd_close (param i32) (result i32)))
  (import "wasi_snapshot_preview1" "proc_exit" (func $proc_exit (param i32)))
  (import "wasi_snapshot_preview1" "random_get" (func $random_get (param i32 i32) (result i32)))
  (import "wasi_snapshot_preview1" "fd_write"
    (func $fd_write (param i32 i32 i32 i32) (result i32)))

  (memory (export "memory") 1)
  (data (i32.const 16) "peer:9")
  (data (i32.const 32) "urandom")
  (data (i32.const 48) "hello")

  ;; new descriptor lands at offset 0
  (func (export "open_socket") (result i32)
    (call $path_open (i32.const 4) (i32.const 0) (i32.const 16) (i32.const 6)
      (i32.const 0) (i64.const 0) (i64.const 0) (i32.const 0) (i32.const 0)))
  (func (export "open_random") (result i32)
    (call $path_open (i32.const 3) (i32.const 0) (i32.const 32) (i32.const 7)
      (i32.const 0) (i64.const 0) (i64.const 0) (i32.const 0) (i32.const 0)))

  ;; byte count lands at offset 8
  (func (export "send_hello") (param $fd i32) (result i32)
    (i32.store (i32.const 64) (i32.const 48))
    (i32.store (i32.const 68) (i32.const 5))
    (call $sock_send (local.get $fd) (i32.const 64) (i32.const 1) (i32.const 0) (i32.const 8)))
  (func (export "recv") (param $fd i32) (result i32)
    (i32.store (i32.const 72) (i32.const 256))
    (i32.store (i32.const 76) (i32.const 64))
    (call $sock_recv (local.get $fd) (i32.const 72) (i32.const 1) (i32.const 0)
      (i32.const 8) (i32.const 12)))

  (func (export "close") (param i32) (result i32) (call $fd_close (local.get 0)))
  (func (export "exit") (param i32) (call $proc_exit (local.get 0)))
  (func (export "random") (param i32 i32) (result i32)
    (call $random_get (local.get 0) (local.get 1)))
  (func (export "write") (result i32)
    (call $fd_write (i32.const 1) (i32.const 0) (i32.const 0) (i32.const 0)))
)
"#;

struct Harness {
    store: Store<WasiCtx>,
    instance: Instance,
}

impl Harness {
    fn new(ctx: WasiCtx, wat: &str) -> Self {
        let engine = Engine::default();
        let module = Module::new(&engine, wat).unwrap();
        let mut linker: Linker<WasiCtx> = Linker::new(&engine);
        add_to_linker(&mut linker, |ctx: &WasiCtx| ctx).unwrap();
        let mut store = Store::new(&engine, ctx);
        let instance = linker.instantiate(&mut store, &module).unwrap();
        Self { store, instance }
    }

    fn call0(&mut self, name: &str) -> wasmtime::Result<i32> {
        let f = self
            .instance
            .get_typed_func::<(), i32>(&mut self.store, name)
            .unwrap();
        f.call(&mut self.store, ())
    }

    fn call1(&mut self, name: &str, arg: i32) -> wasmtime::Result<i32> {
        let f = self
            .instance
            .get_typed_func::<i32, i32>(&mut self.store, name)
            .unwrap();
        f.call(&mut self.store, arg)
    }

    fn memory(&mut self) -> &[u8] {
        let memory = self.instance.get_memory(&mut self.store, "memory").unwrap();
        memory.data(&self.store)
    }

    fn read_u32(&mut self, at: usize) -> u32 {
        u32::from_le_bytes(self.memory()[at..at + 4].try_into().unwrap())
    }
}

fn raw(errno: Errno) -> i32 {
    i32::from(errno.raw())
}

#[test]
fn test_fd_close_unknown_is_badf() {
    let mut h = Harness::new(WasiCtx::builder().build().unwrap(), GUEST);
    assert_eq!(h.call1("close", 99).unwrap(), raw(Errno::Badf));
    assert_eq!(h.call1("close", 3).unwrap(), 0);
}

#[test]
fn test_unsupported_import_traps() {
    let mut h = Harness::new(WasiCtx::builder().build().unwrap(), GUEST);
    let err = h.call0("write").unwrap_err();
    let host = err.downcast_ref::<HostError>().expect("trap should carry HostError");
    assert!(matches!(host, HostError::UnsupportedImport("fd_write")));
}

#[test]
fn test_proc_exit_traps_with_code() {
    let ctx = WasiCtx::builder().build().unwrap();
    let mut h = Harness::new(ctx.clone(), GUEST);
    let f = h
        .instance
        .get_typed_func::<i32, ()>(&mut h.store, "exit")
        .unwrap();
    let err = f.call(&mut h.store, 7).unwrap_err();
    assert_eq!(err.downcast_ref::<ProcExit>(), Some(&ProcExit(7)));
    assert_eq!(ctx.exit_code(), Some(7));
}

#[test]
fn test_random_get_bounds() {
    let mut h = Harness::new(WasiCtx::builder().build().unwrap(), GUEST);
    let f = h
        .instance
        .get_typed_func::<(i32, i32), i32>(&mut h.store, "random")
        .unwrap();
    assert_eq!(f.call(&mut h.store, (1024, 64)).unwrap(), 0);
    assert!(h.memory()[1024..1088].iter().any(|&b| b != 0));

    assert_eq!(f.call(&mut h.store, (65530, 100)).unwrap(), raw(Errno::Fault));
}

#[test]
fn test_open_random_device() {
    let mut h = Harness::new(WasiCtx::builder().build().unwrap(), GUEST);
    assert_eq!(h.call0("open_random").unwrap(), 0);
    assert_eq!(h.read_u32(0), 5);
}

#[test]
fn test_missing_memory_export() {
    let wat = r#"
    (module
      (import "wasi_snapshot_preview1" "random_get"
        (func $random_get (param i32 i32) (result i32)))
      (func (export "random") (result i32)
        (call $random_get (i32.const 0) (i32.const 4))))
    "#;
    let mut h = Harness::new(WasiCtx::builder().build().unwrap(), wat);
    let err = h.call0("random").unwrap_err();
    assert!(matches!(
        err.downcast_ref::<HostError>(),
        Some(HostError::MissingMemory)
    ));
}

#[tokio::test]
async fn test_guest_socket_round_trip() {
    let (connector, mut peer) = PipeConnector::pair(1024);
    let ctx = WasiCtx::builder().with_connector(connector).build().unwrap();
    let mut h = Harness::new(ctx.clone(), GUEST);

    assert_eq!(h.call0("open_socket").unwrap(), 0);
    let fd = h.read_u32(0);
    assert_eq!(fd, 5);

    assert_eq!(h.call1("send_hello", fd as i32).unwrap(), raw(Errno::Again));
    assert_eq!(ctx.poll(fd).await.unwrap(), PollOutcome::Connected);

    assert_eq!(h.call1("send_hello", fd as i32).unwrap(), 0);
    assert_eq!(h.read_u32(8), 5);
    assert_eq!(ctx.poll(fd).await.unwrap(), PollOutcome::Flushed(5));

    let mut buf = [0u8; 5];
    peer.read_exact(&mut buf).await.unwrap();
    assert_eq!(&buf, b"hello");

    peer.write_all(b"world").await.unwrap();
    assert_eq!(h.call1("recv", fd as i32).unwrap(), raw(Errno::Again));
    assert_eq!(ctx.poll(fd).await.unwrap(), PollOutcome::Filled(5));
    assert_eq!(h.call1("recv", fd as i32).unwrap(), 0);
    assert_eq!(h.read_u32(8), 5);
    assert_eq!(h.read_u32(12), 0);
    assert_eq!(&h.memory()[256..261], b"world");

    assert_eq!(h.call1("close", fd as i32).unwrap(), 0);
    assert!(!ctx.is_open(fd));
}
