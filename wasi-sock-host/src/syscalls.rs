//! Guest-facing syscalls
//!
//! Each method implements one preview1 import against a borrowed view of
//! guest memory. All of them are synchronous and none waits on the network:
//! socket calls only move bytes between guest memory and the pipeline
//! buffers, and answer `again` when the poll driver owes work.
//!
//! Results are `Result<_, Errno>`; the import wiring collapses them into
//! the raw code the guest sees.

use crate::ctx::WasiCtx;
use crate::error::ProcExit;
use crate::memory::GuestMemory;
use crate::path::{self, VirtualPath};
use crate::socket::{Readiness, Socket};
use crate::table::{Descriptor, RandomDevice};
use crate::transport::Connection;
use rand::RngCore;
use std::time::{Duration, UNIX_EPOCH};
use wasi_sock_abi::{
    Clockid, Errno, Event, EventFdReadwrite, Eventrwflags, Eventtype, Fd, Fdflags, Fdstat,
    Filestat, Filetype, Iovec, Oflags, Prestat, Ptr, Rights, Riflags, Subscription, SubscriptionU,
};

impl WasiCtx {
    pub fn clock_time_get(
        &self,
        mem: &mut GuestMemory<'_>,
        id: u32,
        _precision: u64,
        time_out: Ptr,
    ) -> Result<(), Errno> {
        match Clockid::try_from(id)? {
            Clockid::Realtime => {
                let since_epoch = (self.clock)()
                    .duration_since(UNIX_EPOCH)
                    .unwrap_or(Duration::ZERO);
                let nanos = u64::try_from(since_epoch.as_nanos()).unwrap_or(u64::MAX);
                mem.write_u64(time_out, nanos)
            }
            Clockid::Monotonic | Clockid::ProcessCputimeId | Clockid::ThreadCputimeId => {
                Err(Errno::Nosys)
            }
        }
    }

    pub fn fd_close(&self, fd: Fd) -> Result<(), Errno> {
        let removed = self.lock().table.remove(fd).ok_or(Errno::Badf)?;
        tracing::debug!(fd, kind = removed.kind(), "Descriptor closed");
        Ok(())
    }

    pub fn fd_fdstat_get(&self, mem: &mut GuestMemory<'_>, fd: Fd, out: Ptr) -> Result<(), Errno> {
        let stat = *self.lock().table.get(fd).ok_or(Errno::Badf)?.stat();
        mem.write_bytes(out, &stat.encode())
    }

    pub fn fd_fdstat_set_flags(&self, fd: Fd, flags: u16) -> Result<(), Errno> {
        let flags = Fdflags::from_bits(flags).ok_or(Errno::Inval)?;
        let mut inner = self.lock();
        let descriptor = inner.table.get_mut(fd).ok_or(Errno::Badf)?;
        let flags = match descriptor {
            Descriptor::Socket(_) => flags | Fdflags::NONBLOCK,
            _ => flags,
        };
        descriptor.stat_mut().fs_flags = flags;
        Ok(())
    }

    pub fn fd_filestat_get(&self, mem: &mut GuestMemory<'_>, fd: Fd, out: Ptr) -> Result<(), Errno> {
        let filetype = self.lock().table.get(fd).ok_or(Errno::Badf)?.filetype();
        let stat = Filestat {
            dev: 1,
            ino: u64::from(fd),
            filetype,
            nlink: 1,
            size: 0,
            atim: 0,
            mtim: 0,
            ctim: 0,
        };
        mem.write_bytes(out, &stat.encode())
    }

    pub fn fd_prestat_get(&self, mem: &mut GuestMemory<'_>, fd: Fd, out: Ptr) -> Result<(), Errno> {
        let name_len = match self.lock().table.get(fd) {
            Some(Descriptor::Directory(dir)) => dir.name.len(),
            _ => return Err(Errno::Badf),
        };
        let prestat = Prestat {
            pr_name_len: u32::try_from(name_len).map_err(|_| Errno::Nametoolong)?,
        };
        mem.write_bytes(out, &prestat.encode())
    }

    pub fn fd_prestat_dir_name(
        &self,
        mem: &mut GuestMemory<'_>,
        fd: Fd,
        path: Ptr,
        path_len: u32,
    ) -> Result<(), Errno> {
        let name = match self.lock().table.get(fd) {
            Some(Descriptor::Directory(dir)) => dir.name.clone(),
            _ => return Err(Errno::Badf),
        };
        if (path_len as usize) < name.len() {
            return Err(Errno::Inval);
        }
        mem.write_bytes(path, name.as_bytes())
    }

    pub fn fd_read(
        &self,
        mem: &mut GuestMemory<'_>,
        fd: Fd,
        iovs: Ptr,
        iovs_len: u32,
        nread_out: Ptr,
    ) -> Result<(), Errno> {
        let iovs = mem.read_iovecs(iovs, iovs_len)?;
        mem.slice(nread_out, 4)?;

        let mut inner = self.lock();
        let inner = &mut *inner;
        let n = match inner.table.get_mut(fd) {
            Some(Descriptor::Random(_)) => {
                let mut total = 0u32;
                for iov in &iovs {
                    mem.slice(iov.buf, iov.buf_len)?;
                }
                for iov in &iovs {
                    inner.random.fill_bytes(mem.slice_mut(iov.buf, iov.buf_len)?);
                    total = total.wrapping_add(iov.buf_len);
                }
                total
            }
            Some(Descriptor::Socket(sock)) => byte_count(sock.recv_into(mem, &iovs)?),
            Some(Descriptor::Directory(_)) | None => return Err(Errno::Badf),
        };
        mem.write_u32(nread_out, n)
    }

    #[allow(clippy::too_many_arguments)]
    pub fn path_open(
        &self,
        mem: &mut GuestMemory<'_>,
        dirfd: Fd,
        _dirflags: u32,
        path: Ptr,
        path_len: u32,
        oflags: u16,
        rights_base: u64,
        rights_inheriting: u64,
        fdflags: u16,
        fd_out: Ptr,
    ) -> Result<(), Errno> {
        if !Oflags::from_bits_retain(oflags).is_empty() {
            return Err(Errno::Inval);
        }
        mem.slice(fd_out, 4)?;
        let relative = std::str::from_utf8(mem.slice(path, path_len)?)
            .map_err(|_| Errno::Noent)?
            .to_string();

        let fd = self.open_path(
            dirfd,
            &relative,
            Rights::from_bits_retain(rights_base),
            Rights::from_bits_retain(rights_inheriting),
            Fdflags::from_bits_retain(fdflags),
        )?;
        mem.write_u32(fd_out, fd)
    }

    /// Open a virtual path relative to preopen `parent` from the host side
    ///
    /// Same resolution as the `path_open` import, with default rights.
    pub fn open_virtual(&self, parent: Fd, relative: &str) -> Result<Fd, Errno> {
        self.open_path(
            parent,
            relative,
            Rights::empty(),
            Rights::empty(),
            Fdflags::empty(),
        )
    }

    fn open_path(
        &self,
        parent: Fd,
        relative: &str,
        rights_base: Rights,
        rights_inheriting: Rights,
        fdflags: Fdflags,
    ) -> Result<Fd, Errno> {
        let mut inner = self.lock();
        let full_path = match inner.table.get(parent) {
            Some(Descriptor::Directory(dir)) => path::join(&dir.name, relative),
            _ => return Err(Errno::Badf),
        };

        let resolved = path::resolve(self.config(), &full_path).inspect_err(|_| {
            tracing::debug!(path = %full_path, "No such virtual path");
        })?;

        let descriptor = match resolved {
            VirtualPath::Random => Descriptor::Random(RandomDevice {
                stat: Fdstat {
                    fs_filetype: Filetype::CharacterDevice,
                    fs_flags: fdflags,
                    fs_rights_base: or_default(rights_base, Rights::FD_READ),
                    fs_rights_inheriting: rights_inheriting,
                },
            }),
            VirtualPath::Socket { host, port } => {
                let connector = self.connector.clone().ok_or(Errno::Nosys)?;
                let mut sock = Socket::open(
                    socket_stat(rights_base, rights_inheriting, fdflags),
                    format!("{}:{}", host, port),
                    self.config().recv_buffer_size,
                    self.config().send_buffer_size,
                );
                sock.begin_connect(Box::pin(async move { connector.connect(&host, port).await }));
                Descriptor::Socket(sock)
            }
        };

        let kind = descriptor.kind();
        let fd = inner.table.push(descriptor)?;
        tracing::debug!(fd, path = %full_path, kind, "Opened virtual path");
        Ok(fd)
    }

    /// Install an already connected stream pair as a socket descriptor
    pub fn attach(&self, conn: Connection, peer: impl Into<String>) -> Result<Fd, Errno> {
        let peer = peer.into();
        let sock = Socket::attached(
            socket_stat(Rights::empty(), Rights::empty(), Fdflags::empty()),
            peer.clone(),
            self.config().recv_buffer_size,
            self.config().send_buffer_size,
            conn,
        );
        let fd = self.lock().table.push(Descriptor::Socket(sock))?;
        tracing::debug!(fd, peer = %peer, "Attached connection");
        Ok(fd)
    }

    /// Report readiness for a batch of subscriptions without performing I/O
    pub fn poll_oneoff(
        &self,
        mem: &mut GuestMemory<'_>,
        in_: Ptr,
        out: Ptr,
        nsubscriptions: u32,
        nevents_out: Ptr,
    ) -> Result<(), Errno> {
        if nsubscriptions == 0 {
            return Err(Errno::Nosys);
        }
        let count = nsubscriptions as usize;
        let out_len = count.checked_mul(Event::SIZE).ok_or(Errno::Fault)?;
        mem.slice(out, u32::try_from(out_len).map_err(|_| Errno::Fault)?)?;
        mem.slice(nevents_out, 4)?;

        let subscriptions = (0..nsubscriptions)
            .map(|i| {
                let at = in_
                    .checked_add(i.checked_mul(Subscription::SIZE as u32).ok_or(Errno::Fault)?)
                    .ok_or(Errno::Fault)?;
                Subscription::decode(&mem.read_array::<{ Subscription::SIZE }>(at)?)
            })
            .collect::<Result<Vec<_>, Errno>>()?;

        let events: Vec<Event> = {
            let mut inner = self.lock();
            subscriptions
                .iter()
                .map(|sub| {
                    let (type_, readiness) = match sub.u {
                        SubscriptionU::Clock(_) => {
                            return Event {
                                userdata: sub.userdata,
                                error: Errno::Notsup,
                                type_: Eventtype::Clock,
                                fd_readwrite: EventFdReadwrite::empty(),
                            };
                        }
                        SubscriptionU::FdRead(fd) => (
                            Eventtype::FdRead,
                            inner.table.socket_mut(fd).map(Socket::read_readiness),
                        ),
                        SubscriptionU::FdWrite(fd) => (
                            Eventtype::FdWrite,
                            inner.table.socket_mut(fd).map(|sock| sock.write_readiness()),
                        ),
                    };
                    readiness_event(sub.userdata, type_, readiness)
                })
                .collect()
        };

        for (i, event) in events.iter().enumerate() {
            mem.write_bytes(out + (i * Event::SIZE) as u32, &event.encode())?;
        }
        mem.write_u32(nevents_out, nsubscriptions)
    }

    /// Record the exit code; the caller unwinds the guest with the result
    pub fn proc_exit(&self, code: u32) -> ProcExit {
        self.lock().exit_code = Some(code);
        tracing::debug!(code, "Guest called proc_exit");
        ProcExit(code)
    }

    pub fn random_get(&self, mem: &mut GuestMemory<'_>, buf: Ptr, buf_len: u32) -> Result<(), Errno> {
        let dst = mem.slice_mut(buf, buf_len)?;
        self.lock().random.fill_bytes(dst);
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    pub fn sock_recv(
        &self,
        mem: &mut GuestMemory<'_>,
        fd: Fd,
        ri_data: Ptr,
        ri_data_len: u32,
        ri_flags: u16,
        ro_datalen_out: Ptr,
        ro_flags_out: Ptr,
    ) -> Result<(), Errno> {
        if !Riflags::from_bits_retain(ri_flags).is_empty() {
            return Err(Errno::Inval);
        }
        let iovs = mem.read_iovecs(ri_data, ri_data_len)?;
        mem.slice(ro_datalen_out, 4)?;
        mem.slice(ro_flags_out, 2)?;

        let n = {
            let mut inner = self.lock();
            let sock = inner.table.socket_mut(fd).ok_or(Errno::Badf)?;
            byte_count(sock.recv_into(mem, &iovs)?)
        };
        mem.write_u32(ro_datalen_out, n)?;
        mem.write_u16(ro_flags_out, 0)
    }

    pub fn sock_send(
        &self,
        mem: &mut GuestMemory<'_>,
        fd: Fd,
        si_data: Ptr,
        si_data_len: u32,
        _si_flags: u16,
        so_datalen_out: Ptr,
    ) -> Result<(), Errno> {
        let iovs: Vec<Iovec> = mem.read_iovecs(si_data, si_data_len)?;
        mem.slice(so_datalen_out, 4)?;

        let n = {
            let mut inner = self.lock();
            let sock = inner.table.socket_mut(fd).ok_or(Errno::Badf)?;
            byte_count(sock.send_from(mem, &iovs)?)
        };
        mem.write_u32(so_datalen_out, n)
    }
}

/// Byte counts are bounded by the buffer capacities
fn byte_count(n: usize) -> u32 {
    u32::try_from(n).unwrap_or(u32::MAX)
}

fn or_default(requested: Rights, default: Rights) -> Rights {
    if requested.is_empty() {
        default
    } else {
        requested
    }
}

/// Sockets never block, whatever flags were requested
fn socket_stat(rights_base: Rights, rights_inheriting: Rights, fdflags: Fdflags) -> Fdstat {
    Fdstat {
        fs_filetype: Filetype::SocketStream,
        fs_flags: fdflags | Fdflags::NONBLOCK,
        fs_rights_base: or_default(
            rights_base,
            Rights::FD_READ | Rights::FD_WRITE | Rights::POLL_FD_READWRITE,
        ),
        fs_rights_inheriting: rights_inheriting,
    }
}

fn readiness_event(userdata: u64, type_: Eventtype, readiness: Option<Readiness>) -> Event {
    let (error, fd_readwrite) = match readiness {
        None => (Errno::Badf, EventFdReadwrite::empty()),
        Some(Readiness::Again) => (Errno::Again, EventFdReadwrite::empty()),
        Some(Readiness::Ready { nbytes, hangup }) => (
            Errno::Success,
            EventFdReadwrite {
                nbytes: nbytes as u64,
                flags: if hangup {
                    Eventrwflags::FD_READWRITE_HANGUP
                } else {
                    Eventrwflags::empty()
                },
            },
        ),
        Some(Readiness::Failed) => (
            Errno::Io,
            EventFdReadwrite {
                nbytes: 0,
                flags: Eventrwflags::FD_READWRITE_HANGUP,
            },
        ),
    };
    Event {
        userdata,
        error,
        type_,
        fd_readwrite,
    }
}
