//! Import wiring for wasmtime
//!
//! Registers the full `wasi_snapshot_preview1` import set into a
//! [`Linker`], so any preview1 guest instantiates:
//!
//! ```text
//! ┌────────────────────────┬──────────────────────────────────────────────┐
//! │ import                 │ behavior                                     │
//! ├────────────────────────┼──────────────────────────────────────────────┤
//! │ clock_time_get         │                                              │
//! │ fd_close, fd_read      │                                              │
//! │ fd_fdstat_get/_flags   │ delegates to WasiCtx with the caller's       │
//! │ fd_filestat_get        │ exported `memory`, returns the errno         │
//! │ fd_prestat_get/_name   │                                              │
//! │ path_open, poll_oneoff │                                              │
//! │ random_get, sock_*     │                                              │
//! ├────────────────────────┼──────────────────────────────────────────────┤
//! │ proc_exit              │ records the code, traps with ProcExit        │
//! ├────────────────────────┼──────────────────────────────────────────────┤
//! │ everything else        │ traps with HostError::UnsupportedImport      │
//! └────────────────────────┴──────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```rust,ignore
//! let mut linker: Linker<WasiCtx> = Linker::new(&engine);
//! wasi_sock_host::add_to_linker(&mut linker, |ctx| ctx)?;
//! let mut store = Store::new(&engine, ctx.clone());
//! let instance = linker.instantiate(&mut store, &module)?;
//! ```

use crate::ctx::WasiCtx;
use crate::error::HostError;
use crate::memory::GuestMemory;
use wasi_sock_abi::{errno, Errno, MODULE_NAME};
use wasmtime::{Caller, Extern, Linker};

/// Register every preview1 import
///
/// `get` projects the store data onto the shim context.
///
/// # Errors
///
/// Returns [`HostError::Linker`] if a name is already defined in `linker`.
pub fn add_to_linker<T, G>(linker: &mut Linker<T>, get: G) -> Result<(), HostError>
where
    T: 'static,
    G: Fn(&T) -> &WasiCtx + Send + Sync + Copy + 'static,
{
    add_supported(linker, get)?;
    add_unsupported(linker)?;
    Ok(())
}

fn code(result: Result<(), Errno>) -> i32 {
    i32::from(errno::to_raw(result))
}

/// Narrow a 16-bit flag argument; wider values are invalid
fn flags16(raw: i32) -> Result<u16, Errno> {
    u16::try_from(raw).map_err(|_| Errno::Inval)
}

/// Run `f` with the caller's exported memory and the shim context
fn with_memory<T, G>(
    caller: &mut Caller<'_, T>,
    get: G,
    f: impl FnOnce(&WasiCtx, &mut GuestMemory<'_>) -> Result<(), Errno>,
) -> anyhow::Result<i32>
where
    G: Fn(&T) -> &WasiCtx,
{
    let memory = match caller.get_export("memory") {
        Some(Extern::Memory(memory)) => memory,
        _ => return Err(HostError::MissingMemory.into()),
    };
    let (bytes, data) = memory.data_and_store_mut(caller);
    let ctx = get(data);
    let mut mem = GuestMemory::new(bytes);
    Ok(code(f(ctx, &mut mem)))
}

fn wrap(name: &'static str, source: anyhow::Error) -> HostError {
    HostError::Linker { name, source }
}

fn add_supported<T, G>(linker: &mut Linker<T>, get: G) -> Result<(), HostError>
where
    T: 'static,
    G: Fn(&T) -> &WasiCtx + Send + Sync + Copy + 'static,
{
    linker
        .func_wrap(
            MODULE_NAME,
            "clock_time_get",
            move |mut caller: Caller<'_, T>, id: i32, precision: i64, out: i32| {
                with_memory(&mut caller, get, |ctx, mem| {
                    ctx.clock_time_get(mem, id as u32, precision as u64, out as u32)
                })
            },
        )
        .map_err(|e| wrap("clock_time_get", e))?;

    linker
        .func_wrap(
            MODULE_NAME,
            "fd_close",
            move |caller: Caller<'_, T>, fd: i32| -> i32 {
                code(get(caller.data()).fd_close(fd as u32))
            },
        )
        .map_err(|e| wrap("fd_close", e))?;

    linker
        .func_wrap(
            MODULE_NAME,
            "fd_fdstat_get",
            move |mut caller: Caller<'_, T>, fd: i32, out: i32| {
                with_memory(&mut caller, get, |ctx, mem| {
                    ctx.fd_fdstat_get(mem, fd as u32, out as u32)
                })
            },
        )
        .map_err(|e| wrap("fd_fdstat_get", e))?;

    linker
        .func_wrap(
            MODULE_NAME,
            "fd_fdstat_set_flags",
            move |caller: Caller<'_, T>, fd: i32, flags: i32| -> i32 {
                code(flags16(flags).and_then(|flags| get(caller.data()).fd_fdstat_set_flags(fd as u32, flags)))
            },
        )
        .map_err(|e| wrap("fd_fdstat_set_flags", e))?;

    linker
        .func_wrap(
            MODULE_NAME,
            "fd_filestat_get",
            move |mut caller: Caller<'_, T>, fd: i32, out: i32| {
                with_memory(&mut caller, get, |ctx, mem| {
                    ctx.fd_filestat_get(mem, fd as u32, out as u32)
                })
            },
        )
        .map_err(|e| wrap("fd_filestat_get", e))?;

    linker
        .func_wrap(
            MODULE_NAME,
            "fd_prestat_get",
            move |mut caller: Caller<'_, T>, fd: i32, out: i32| {
                with_memory(&mut caller, get, |ctx, mem| {
                    ctx.fd_prestat_get(mem, fd as u32, out as u32)
                })
            },
        )
        .map_err(|e| wrap("fd_prestat_get", e))?;

    linker
        .func_wrap(
            MODULE_NAME,
            "fd_prestat_dir_name",
            move |mut caller: Caller<'_, T>, fd: i32, path: i32, path_len: i32| {
                with_memory(&mut caller, get, |ctx, mem| {
                    ctx.fd_prestat_dir_name(mem, fd as u32, path as u32, path_len as u32)
                })
            },
        )
        .map_err(|e| wrap("fd_prestat_dir_name", e))?;

    linker
        .func_wrap(
            MODULE_NAME,
            "fd_read",
            move |mut caller: Caller<'_, T>, fd: i32, iovs: i32, iovs_len: i32, nread: i32| {
                with_memory(&mut caller, get, |ctx, mem| {
                    ctx.fd_read(mem, fd as u32, iovs as u32, iovs_len as u32, nread as u32)
                })
            },
        )
        .map_err(|e| wrap("fd_read", e))?;

    linker
        .func_wrap(
            MODULE_NAME,
            "path_open",
            move |mut caller: Caller<'_, T>,
                  dirfd: i32,
                  dirflags: i32,
                  path: i32,
                  path_len: i32,
                  oflags: i32,
                  rights_base: i64,
                  rights_inheriting: i64,
                  fdflags: i32,
                  fd_out: i32| {
                with_memory(&mut caller, get, |ctx, mem| {
                    ctx.path_open(
                        mem,
                        dirfd as u32,
                        dirflags as u32,
                        path as u32,
                        path_len as u32,
                        flags16(oflags)?,
                        rights_base as u64,
                        rights_inheriting as u64,
                        flags16(fdflags)?,
                        fd_out as u32,
                    )
                })
            },
        )
        .map_err(|e| wrap("path_open", e))?;

    linker
        .func_wrap(
            MODULE_NAME,
            "poll_oneoff",
            move |mut caller: Caller<'_, T>, in_: i32, out: i32, nsubs: i32, nevents: i32| {
                with_memory(&mut caller, get, |ctx, mem| {
                    ctx.poll_oneoff(mem, in_ as u32, out as u32, nsubs as u32, nevents as u32)
                })
            },
        )
        .map_err(|e| wrap("poll_oneoff", e))?;

    linker
        .func_wrap(
            MODULE_NAME,
            "proc_exit",
            move |caller: Caller<'_, T>, code: i32| -> anyhow::Result<()> {
                Err(get(caller.data()).proc_exit(code as u32).into())
            },
        )
        .map_err(|e| wrap("proc_exit", e))?;

    linker
        .func_wrap(
            MODULE_NAME,
            "random_get",
            move |mut caller: Caller<'_, T>, buf: i32, buf_len: i32| {
                with_memory(&mut caller, get, |ctx, mem| {
                    ctx.random_get(mem, buf as u32, buf_len as u32)
                })
            },
        )
        .map_err(|e| wrap("random_get", e))?;

    linker
        .func_wrap(
            MODULE_NAME,
            "sock_recv",
            move |mut caller: Caller<'_, T>,
                  fd: i32,
                  ri_data: i32,
                  ri_data_len: i32,
                  ri_flags: i32,
                  ro_datalen: i32,
                  ro_flags: i32| {
                with_memory(&mut caller, get, |ctx, mem| {
                    ctx.sock_recv(
                        mem,
                        fd as u32,
                        ri_data as u32,
                        ri_data_len as u32,
                        flags16(ri_flags)?,
                        ro_datalen as u32,
                        ro_flags as u32,
                    )
                })
            },
        )
        .map_err(|e| wrap("sock_recv", e))?;

    linker
        .func_wrap(
            MODULE_NAME,
            "sock_send",
            move |mut caller: Caller<'_, T>,
                  fd: i32,
                  si_data: i32,
                  si_data_len: i32,
                  si_flags: i32,
                  so_datalen: i32| {
                with_memory(&mut caller, get, |ctx, mem| {
                    ctx.sock_send(
                        mem,
                        fd as u32,
                        si_data as u32,
                        si_data_len as u32,
                        flags16(si_flags)?,
                        so_datalen as u32,
                    )
                })
            },
        )
        .map_err(|e| wrap("sock_send", e))?;

    Ok(())
}

/// Define an import that traps when called
macro_rules! unsupported {
    ($linker:expr, $name:literal, ($($arg:ty),*)) => {
        $linker
            .func_wrap(
                MODULE_NAME,
                $name,
                move |_caller: Caller<'_, T>, $(_: $arg),*| -> anyhow::Result<i32> {
                    tracing::error!(import = $name, "Guest called an unsupported import");
                    Err(HostError::UnsupportedImport($name).into())
                },
            )
            .map_err(|e| wrap($name, e))?;
    };
}

/// Names of every import that traps instead of doing work
pub const UNSUPPORTED_IMPORTS: &[&str] = &[
    "args_get",
    "args_sizes_get",
    "environ_get",
    "environ_sizes_get",
    "clock_res_get",
    "fd_advise",
    "fd_allocate",
    "fd_datasync",
    "fd_fdstat_set_rights",
    "fd_filestat_set_size",
    "fd_filestat_set_times",
    "fd_pread",
    "fd_pwrite",
    "fd_readdir",
    "fd_renumber",
    "fd_seek",
    "fd_sync",
    "fd_tell",
    "fd_write",
    "path_create_directory",
    "path_filestat_get",
    "path_filestat_set_times",
    "path_link",
    "path_readlink",
    "path_remove_directory",
    "path_rename",
    "path_symlink",
    "path_unlink_file",
    "proc_raise",
    "sched_yield",
    "sock_accept",
    "sock_shutdown",
];

fn add_unsupported<T: 'static>(linker: &mut Linker<T>) -> Result<(), HostError> {
    unsupported!(linker, "args_get", (i32, i32));
    unsupported!(linker, "args_sizes_get", (i32, i32));
    unsupported!(linker, "environ_get", (i32, i32));
    unsupported!(linker, "environ_sizes_get", (i32, i32));
    unsupported!(linker, "clock_res_get", (i32, i32));
    unsupported!(linker, "fd_advise", (i32, i64, i64, i32));
    unsupported!(linker, "fd_allocate", (i32, i64, i64));
    unsupported!(linker, "fd_datasync", (i32));
    unsupported!(linker, "fd_fdstat_set_rights", (i32, i64, i64));
    unsupported!(linker, "fd_filestat_set_size", (i32, i64));
    unsupported!(linker, "fd_filestat_set_times", (i32, i64, i64, i32));
    unsupported!(linker, "fd_pread", (i32, i32, i32, i64, i32));
    unsupported!(linker, "fd_pwrite", (i32, i32, i32, i64, i32));
    unsupported!(linker, "fd_readdir", (i32, i32, i32, i64, i32));
    unsupported!(linker, "fd_renumber", (i32, i32));
    unsupported!(linker, "fd_seek", (i32, i64, i32, i32));
    unsupported!(linker, "fd_sync", (i32));
    unsupported!(linker, "fd_tell", (i32, i32));
    unsupported!(linker, "fd_write", (i32, i32, i32, i32));
    unsupported!(linker, "path_create_directory", (i32, i32, i32));
    unsupported!(linker, "path_filestat_get", (i32, i32, i32, i32, i32));
    unsupported!(linker, "path_filestat_set_times", (i32, i32, i32, i32, i64, i64, i32));
    unsupported!(linker, "path_link", (i32, i32, i32, i32, i32, i32, i32));
    unsupported!(linker, "path_readlink", (i32, i32, i32, i32, i32, i32));
    unsupported!(linker, "path_remove_directory", (i32, i32, i32));
    unsupported!(linker, "path_rename", (i32, i32, i32, i32, i32, i32));
    unsupported!(linker, "path_symlink", (i32, i32, i32, i32, i32));
    unsupported!(linker, "path_unlink_file", (i32, i32, i32));
    unsupported!(linker, "proc_raise", (i32));
    unsupported!(linker, "sched_yield", ());
    unsupported!(linker, "sock_accept", (i32, i32, i32));
    unsupported!(linker, "sock_shutdown", (i32, i32));
    Ok(())
}
