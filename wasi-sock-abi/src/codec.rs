//! Bit-exact codec for preview1 structures
//!
//! Each structure encodes to, or decodes from, a fixed-size byte array laid
//! out exactly as the preview1 ABI describes (little-endian, C alignment).
//! Padding bytes are always written as zero. Bounds checking against guest
//! memory happens before a value reaches this module, so every function
//! here is total.
//!
//! ```text
//! iovec         0: buf u32        4: buf_len u32                                   (8)
//! fdstat        0: filetype u8    2: flags u16    8: rights_base u64
//!              16: rights_inheriting u64                                          (24)
//! filestat      0: dev u64        8: ino u64     16: filetype u8   24: nlink u64
//!              32: size u64      40: atim u64    48: mtim u64      56: ctim u64    (64)
//! prestat       0: tag u8         4: pr_name_len u32                               (8)
//! subscription  0: userdata u64   8: tag u8      16: payload                      (48)
//!    clock     16: id u32        24: timeout u64 32: precision u64 40: flags u16
//!    fd rw     16: fd u32
//! event         0: userdata u64   8: error u16   10: type u8
//!              16: nbytes u64    24: flags u16                                    (32)
//! ```
//!
//! Both flag fields are 16-bit (`subclockflags`, `eventrwflags`). Only the
//! low byte carries defined bits, so a reader treating them as `u8` sees
//! the same value.

use crate::{
    Errno, Eventrwflags, Eventtype, Fd, Fdflags, Filetype, Ptr, Rights, Subclockflags, Timestamp,
};

fn get_u16(src: &[u8], at: usize) -> u16 {
    let mut raw = [0u8; 2];
    raw.copy_from_slice(&src[at..at + 2]);
    u16::from_le_bytes(raw)
}

fn get_u32(src: &[u8], at: usize) -> u32 {
    let mut raw = [0u8; 4];
    raw.copy_from_slice(&src[at..at + 4]);
    u32::from_le_bytes(raw)
}

fn get_u64(src: &[u8], at: usize) -> u64 {
    let mut raw = [0u8; 8];
    raw.copy_from_slice(&src[at..at + 8]);
    u64::from_le_bytes(raw)
}

fn put_u16(out: &mut [u8], at: usize, value: u16) {
    out[at..at + 2].copy_from_slice(&value.to_le_bytes());
}

fn put_u32(out: &mut [u8], at: usize, value: u32) {
    out[at..at + 4].copy_from_slice(&value.to_le_bytes());
}

fn put_u64(out: &mut [u8], at: usize, value: u64) {
    out[at..at + 8].copy_from_slice(&value.to_le_bytes());
}

/// Scatter/gather vector (`iovec` and `ciovec` share this layout)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Iovec {
    /// Start of the buffer in guest memory
    pub buf: Ptr,

    /// Length of the buffer in bytes
    pub buf_len: u32,
}

impl Iovec {
    pub const SIZE: usize = 8;

    pub fn decode(raw: &[u8; Self::SIZE]) -> Self {
        Self {
            buf: get_u32(raw, 0),
            buf_len: get_u32(raw, 4),
        }
    }

    pub fn encode(&self) -> [u8; Self::SIZE] {
        let mut out = [0u8; Self::SIZE];
        put_u32(&mut out, 0, self.buf);
        put_u32(&mut out, 4, self.buf_len);
        out
    }
}

/// Descriptor status
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Fdstat {
    pub fs_filetype: Filetype,
    pub fs_flags: Fdflags,
    pub fs_rights_base: Rights,
    pub fs_rights_inheriting: Rights,
}

impl Fdstat {
    pub const SIZE: usize = 24;

    pub fn encode(&self) -> [u8; Self::SIZE] {
        let mut out = [0u8; Self::SIZE];
        out[0] = self.fs_filetype as u8;
        put_u16(&mut out, 2, self.fs_flags.bits());
        put_u64(&mut out, 8, self.fs_rights_base.bits());
        put_u64(&mut out, 16, self.fs_rights_inheriting.bits());
        out
    }

    pub fn decode(raw: &[u8; Self::SIZE]) -> Self {
        Self {
            fs_filetype: Filetype::from_raw(raw[0]),
            fs_flags: Fdflags::from_bits_retain(get_u16(raw, 2)),
            fs_rights_base: Rights::from_bits_retain(get_u64(raw, 8)),
            fs_rights_inheriting: Rights::from_bits_retain(get_u64(raw, 16)),
        }
    }
}

/// File status
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Filestat {
    pub dev: u64,
    pub ino: u64,
    pub filetype: Filetype,
    pub nlink: u64,
    pub size: u64,
    pub atim: Timestamp,
    pub mtim: Timestamp,
    pub ctim: Timestamp,
}

impl Filestat {
    pub const SIZE: usize = 64;

    pub fn encode(&self) -> [u8; Self::SIZE] {
        let mut out = [0u8; Self::SIZE];
        put_u64(&mut out, 0, self.dev);
        put_u64(&mut out, 8, self.ino);
        out[16] = self.filetype as u8;
        put_u64(&mut out, 24, self.nlink);
        put_u64(&mut out, 32, self.size);
        put_u64(&mut out, 40, self.atim);
        put_u64(&mut out, 48, self.mtim);
        put_u64(&mut out, 56, self.ctim);
        out
    }
}

/// Preopened directory description; the only variant is `dir` (tag 0)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Prestat {
    /// Length of the directory name, without a terminator
    pub pr_name_len: u32,
}

impl Prestat {
    pub const SIZE: usize = 8;
    pub const TAG_DIR: u8 = 0;

    pub fn encode(&self) -> [u8; Self::SIZE] {
        let mut out = [0u8; Self::SIZE];
        out[0] = Self::TAG_DIR;
        put_u32(&mut out, 4, self.pr_name_len);
        out
    }
}

/// Payload of a clock subscription
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubscriptionClock {
    /// Raw clock id; kept raw so unknown ids can still be answered
    pub id: u32,
    pub timeout: Timestamp,
    pub precision: Timestamp,
    pub flags: Subclockflags,
}

/// What a subscription waits for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionU {
    Clock(SubscriptionClock),
    FdRead(Fd),
    FdWrite(Fd),
}

impl SubscriptionU {
    pub fn eventtype(&self) -> Eventtype {
        match self {
            SubscriptionU::Clock(_) => Eventtype::Clock,
            SubscriptionU::FdRead(_) => Eventtype::FdRead,
            SubscriptionU::FdWrite(_) => Eventtype::FdWrite,
        }
    }
}

/// One entry of the `poll_oneoff` input array
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Subscription {
    pub userdata: u64,
    pub u: SubscriptionU,
}

impl Subscription {
    pub const SIZE: usize = 48;

    /// Decode a subscription; an unknown tag is `Errno::Inval`
    pub fn decode(raw: &[u8; Self::SIZE]) -> Result<Self, Errno> {
        let userdata = get_u64(raw, 0);
        let u = match Eventtype::try_from(raw[8])? {
            Eventtype::Clock => SubscriptionU::Clock(SubscriptionClock {
                id: get_u32(raw, 16),
                timeout: get_u64(raw, 24),
                precision: get_u64(raw, 32),
                flags: Subclockflags::from_bits_retain(get_u16(raw, 40)),
            }),
            Eventtype::FdRead => SubscriptionU::FdRead(get_u32(raw, 16)),
            Eventtype::FdWrite => SubscriptionU::FdWrite(get_u32(raw, 16)),
        };
        Ok(Self { userdata, u })
    }

    pub fn encode(&self) -> [u8; Self::SIZE] {
        let mut out = [0u8; Self::SIZE];
        put_u64(&mut out, 0, self.userdata);
        out[8] = self.u.eventtype() as u8;
        match self.u {
            SubscriptionU::Clock(clock) => {
                put_u32(&mut out, 16, clock.id);
                put_u64(&mut out, 24, clock.timeout);
                put_u64(&mut out, 32, clock.precision);
                put_u16(&mut out, 40, clock.flags.bits());
            }
            SubscriptionU::FdRead(fd) | SubscriptionU::FdWrite(fd) => {
                put_u32(&mut out, 16, fd);
            }
        }
        out
    }
}

/// Read/write readiness payload of an event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EventFdReadwrite {
    /// Bytes available to read, or room available to write
    pub nbytes: u64,
    pub flags: Eventrwflags,
}

impl EventFdReadwrite {
    pub fn empty() -> Self {
        Self {
            nbytes: 0,
            flags: Eventrwflags::empty(),
        }
    }
}

/// One entry of the `poll_oneoff` output array
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Event {
    pub userdata: u64,
    pub error: Errno,
    pub type_: Eventtype,
    pub fd_readwrite: EventFdReadwrite,
}

impl Event {
    pub const SIZE: usize = 32;

    pub fn encode(&self) -> [u8; Self::SIZE] {
        let mut out = [0u8; Self::SIZE];
        put_u64(&mut out, 0, self.userdata);
        put_u16(&mut out, 8, self.error.raw());
        out[10] = self.type_ as u8;
        put_u64(&mut out, 16, self.fd_readwrite.nbytes);
        put_u16(&mut out, 24, self.fd_readwrite.flags.bits());
        out
    }
}
