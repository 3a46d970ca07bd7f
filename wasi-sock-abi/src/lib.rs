//! wasi-sock-abi: Shared types for the wasi-sock host shim
//!
//! This crate defines the contract between host and guest: the preview1
//! error numbers, flag sets and enumerations, plus the fixed-layout struct
//! codec in [`codec`]. Everything here is plain data; the host crate owns
//! all state and I/O.

pub mod codec;
pub mod errno;

pub use codec::{
    Event, EventFdReadwrite, Fdstat, Filestat, Iovec, Prestat, Subscription, SubscriptionClock,
    SubscriptionU,
};
pub use errno::Errno;

use bitflags::bitflags;

/// Import module name every preview1 guest links against
pub const MODULE_NAME: &str = "wasi_snapshot_preview1";

/// Guest-visible descriptor handle
pub type Fd = u32;

/// Guest linear-memory address
pub type Ptr = u32;

/// Nanoseconds, either absolute (since the Unix epoch) or relative
pub type Timestamp = u64;

bitflags! {
    /// File descriptor rights, carried opaquely by the host
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct Rights: u64 {
        const FD_DATASYNC = 1 << 0;
        const FD_READ = 1 << 1;
        const FD_SEEK = 1 << 2;
        const FD_FDSTAT_SET_FLAGS = 1 << 3;
        const FD_SYNC = 1 << 4;
        const FD_TELL = 1 << 5;
        const FD_WRITE = 1 << 6;
        const FD_ADVISE = 1 << 7;
        const FD_ALLOCATE = 1 << 8;
        const PATH_CREATE_DIRECTORY = 1 << 9;
        const PATH_CREATE_FILE = 1 << 10;
        const PATH_LINK_SOURCE = 1 << 11;
        const PATH_LINK_TARGET = 1 << 12;
        const PATH_OPEN = 1 << 13;
        const FD_READDIR = 1 << 14;
        const PATH_READLINK = 1 << 15;
        const PATH_RENAME_SOURCE = 1 << 16;
        const PATH_RENAME_TARGET = 1 << 17;
        const PATH_FILESTAT_GET = 1 << 18;
        const PATH_FILESTAT_SET_SIZE = 1 << 19;
        const PATH_FILESTAT_SET_TIMES = 1 << 20;
        const FD_FILESTAT_GET = 1 << 21;
        const FD_FILESTAT_SET_SIZE = 1 << 22;
        const FD_FILESTAT_SET_TIMES = 1 << 23;
        const PATH_SYMLINK = 1 << 24;
        const PATH_REMOVE_DIRECTORY = 1 << 25;
        const PATH_UNLINK_FILE = 1 << 26;
        const POLL_FD_READWRITE = 1 << 27;
        const SOCK_SHUTDOWN = 1 << 28;
        const SOCK_ACCEPT = 1 << 29;
    }
}

bitflags! {
    /// File descriptor flags
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct Fdflags: u16 {
        const APPEND = 1 << 0;
        const DSYNC = 1 << 1;
        const NONBLOCK = 1 << 2;
        const RSYNC = 1 << 3;
        const SYNC = 1 << 4;
    }
}

bitflags! {
    /// Open flags for `path_open`
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct Oflags: u16 {
        const CREAT = 1 << 0;
        const DIRECTORY = 1 << 1;
        const EXCL = 1 << 2;
        const TRUNC = 1 << 3;
    }
}

bitflags! {
    /// Flags on a read/write readiness event
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct Eventrwflags: u16 {
        const FD_READWRITE_HANGUP = 1 << 0;
    }
}

bitflags! {
    /// Flags on a clock subscription
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct Subclockflags: u16 {
        const SUBSCRIPTION_CLOCK_ABSTIME = 1 << 0;
    }
}

bitflags! {
    /// Flags accepted by `sock_recv`
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct Riflags: u16 {
        const RECV_PEEK = 1 << 0;
        const RECV_WAITALL = 1 << 1;
    }
}

/// Type of a file descriptor or file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Filetype {
    Unknown = 0,
    BlockDevice = 1,
    CharacterDevice = 2,
    Directory = 3,
    RegularFile = 4,
    SocketDgram = 5,
    SocketStream = 6,
    SymbolicLink = 7,
}

impl Filetype {
    /// Decode a raw filetype byte; unknown values collapse to `Unknown`
    pub fn from_raw(raw: u8) -> Self {
        match raw {
            1 => Filetype::BlockDevice,
            2 => Filetype::CharacterDevice,
            3 => Filetype::Directory,
            4 => Filetype::RegularFile,
            5 => Filetype::SocketDgram,
            6 => Filetype::SocketStream,
            7 => Filetype::SymbolicLink,
            _ => Filetype::Unknown,
        }
    }
}

/// Clock identifiers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum Clockid {
    Realtime = 0,
    Monotonic = 1,
    ProcessCputimeId = 2,
    ThreadCputimeId = 3,
}

impl TryFrom<u32> for Clockid {
    type Error = Errno;

    fn try_from(raw: u32) -> Result<Self, Errno> {
        match raw {
            0 => Ok(Clockid::Realtime),
            1 => Ok(Clockid::Monotonic),
            2 => Ok(Clockid::ProcessCputimeId),
            3 => Ok(Clockid::ThreadCputimeId),
            _ => Err(Errno::Inval),
        }
    }
}

/// Type of a subscription and of its matching event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Eventtype {
    Clock = 0,
    FdRead = 1,
    FdWrite = 2,
}

impl TryFrom<u8> for Eventtype {
    type Error = Errno;

    fn try_from(raw: u8) -> Result<Self, Errno> {
        match raw {
            0 => Ok(Eventtype::Clock),
            1 => Ok(Eventtype::FdRead),
            2 => Ok(Eventtype::FdWrite),
            _ => Err(Errno::Inval),
        }
    }
}
