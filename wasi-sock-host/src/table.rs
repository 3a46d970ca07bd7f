//! Descriptor table
//!
//! Maps guest handles to the records they name. The table is the single
//! owner of every record and its buffers; syscalls and the poll driver
//! only borrow them for the length of one call.

use crate::socket::Socket;
use std::collections::HashMap;
use wasi_sock_abi::{Errno, Fd, Fdstat, Filetype};

/// Handle of the preopened device directory
pub const DEV_DIR_FD: Fd = 3;

/// Handle of the preopened TCP namespace directory
pub const TCP_DIR_FD: Fd = 4;

const FIRST_DYNAMIC_FD: Fd = 5;

/// Preopened virtual directory
pub struct Directory {
    /// Absolute guest path, e.g. `/dev/tcp`
    pub name: String,
    pub stat: Fdstat,
}

/// Random-byte device
pub struct RandomDevice {
    pub stat: Fdstat,
}

/// Everything a handle can name
pub enum Descriptor {
    Directory(Directory),
    Random(RandomDevice),
    Socket(Socket),
}

impl Descriptor {
    pub fn stat(&self) -> &Fdstat {
        match self {
            Descriptor::Directory(dir) => &dir.stat,
            Descriptor::Random(dev) => &dev.stat,
            Descriptor::Socket(sock) => &sock.stat,
        }
    }

    pub fn stat_mut(&mut self) -> &mut Fdstat {
        match self {
            Descriptor::Directory(dir) => &mut dir.stat,
            Descriptor::Random(dev) => &mut dev.stat,
            Descriptor::Socket(sock) => &mut sock.stat,
        }
    }

    pub fn filetype(&self) -> Filetype {
        self.stat().fs_filetype
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Descriptor::Directory(_) => "directory",
            Descriptor::Random(_) => "random",
            Descriptor::Socket(_) => "socket",
        }
    }
}

/// Handle-keyed store of descriptor records
pub struct FdTable {
    entries: HashMap<Fd, Descriptor>,
    next: Fd,
}

impl FdTable {
    pub fn new() -> Self {
        Self {
            entries: HashMap::new(),
            next: FIRST_DYNAMIC_FD,
        }
    }

    /// Reserve a fresh handle; handles are never handed out twice
    pub fn allocate(&mut self) -> Result<Fd, Errno> {
        let fd = self.next;
        self.next = fd.checked_add(1).ok_or(Errno::Mfile)?;
        Ok(fd)
    }

    pub fn insert(&mut self, fd: Fd, descriptor: Descriptor) {
        self.entries.insert(fd, descriptor);
    }

    /// Allocate a handle and store `descriptor` under it
    pub fn push(&mut self, descriptor: Descriptor) -> Result<Fd, Errno> {
        let fd = self.allocate()?;
        self.insert(fd, descriptor);
        Ok(fd)
    }

    pub fn get(&self, fd: Fd) -> Option<&Descriptor> {
        self.entries.get(&fd)
    }

    pub fn get_mut(&mut self, fd: Fd) -> Option<&mut Descriptor> {
        self.entries.get_mut(&fd)
    }

    /// Remove a record. A socket's close signal fires, so any step the
    /// poll driver holds for it stops and drops its stream.
    pub fn remove(&mut self, fd: Fd) -> Option<Descriptor> {
        let removed = self.entries.remove(&fd)?;
        if let Descriptor::Socket(sock) = &removed {
            sock.cancel();
        }
        Some(removed)
    }

    pub fn contains(&self, fd: Fd) -> bool {
        self.entries.contains_key(&fd)
    }

    pub fn socket_mut(&mut self, fd: Fd) -> Option<&mut Socket> {
        match self.entries.get_mut(&fd) {
            Some(Descriptor::Socket(sock)) => Some(sock),
            _ => None,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for FdTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wasi_sock_abi::{Fdflags, Rights};

    fn random() -> Descriptor {
        Descriptor::Random(RandomDevice {
            stat: Fdstat {
                fs_filetype: Filetype::CharacterDevice,
                fs_flags: Fdflags::empty(),
                fs_rights_base: Rights::FD_READ,
                fs_rights_inheriting: Rights::empty(),
            },
        })
    }

    #[test]
    fn test_allocation_is_monotonic() {
        let mut table = FdTable::new();
        let a = table.push(random()).unwrap();
        let b = table.push(random()).unwrap();
        assert_eq!(a, FIRST_DYNAMIC_FD);
        assert_eq!(b, a + 1);

        assert!(table.remove(a).is_some());
        let c = table.push(random()).unwrap();
        assert_eq!(c, b + 1);
        assert!(!table.contains(a));
    }

    #[test]
    fn test_remove_missing() {
        let mut table = FdTable::new();
        assert!(table.remove(42).is_none());
        assert!(table.get(42).is_none());
        assert!(table.is_empty());
    }

    #[test]
    fn test_handle_space_exhaustion() {
        let mut table = FdTable::new();
        table.next = Fd::MAX;
        assert_eq!(table.allocate(), Err(Errno::Mfile));
    }

    #[test]
    fn test_remove_socket_fires_close_signal() {
        let mut table = FdTable::new();
        let sock = Socket::open(
            Fdstat {
                fs_filetype: Filetype::SocketStream,
                fs_flags: Fdflags::NONBLOCK,
                fs_rights_base: Rights::FD_READ | Rights::FD_WRITE,
                fs_rights_inheriting: Rights::empty(),
            },
            "h:1".into(),
            8,
            8,
        );
        let fd = table.push(Descriptor::Socket(sock)).unwrap();
        let signal = table.socket_mut(fd).unwrap().close_signal();
        assert!(!*signal.borrow());

        let removed = table.remove(fd);
        assert!(*signal.borrow());
        drop(removed);
        assert!(signal.has_changed().is_err());
    }

    #[test]
    fn test_socket_mut_rejects_other_kinds() {
        let mut table = FdTable::new();
        let fd = table.push(random()).unwrap();
        assert!(table.socket_mut(fd).is_none());
        assert_eq!(table.get(fd).map(Descriptor::kind), Some("random"));
    }
}
