//! Error numbers of the preview1 ABI
//!
//! Only the codes a socket shim can plausibly report are listed. The
//! numeric values are fixed by the ABI and must not change.

use thiserror::Error;

/// Result code returned by every preview1 import
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Error)]
#[repr(u16)]
pub enum Errno {
    #[error("No error occurred")]
    Success = 0,

    #[error("Permission denied")]
    Acces = 2,

    #[error("Resource unavailable, try again")]
    Again = 6,

    #[error("Bad file descriptor")]
    Badf = 8,

    #[error("Device or resource busy")]
    Busy = 10,

    #[error("Operation canceled")]
    Canceled = 11,

    #[error("Connection aborted")]
    Connaborted = 13,

    #[error("Connection refused")]
    Connrefused = 14,

    #[error("Connection reset")]
    Connreset = 15,

    #[error("Bad address")]
    Fault = 21,

    #[error("Host is unreachable")]
    Hostunreach = 23,

    #[error("Invalid argument")]
    Inval = 28,

    #[error("I/O error")]
    Io = 29,

    #[error("File descriptor value too large")]
    Mfile = 33,

    #[error("Filename too long")]
    Nametoolong = 37,

    #[error("Network unreachable")]
    Netunreach = 40,

    #[error("No such file or directory")]
    Noent = 44,

    #[error("Function not supported")]
    Nosys = 52,

    #[error("The socket is not connected")]
    Notconn = 53,

    #[error("Not a directory")]
    Notdir = 54,

    #[error("Not a socket")]
    Notsock = 57,

    #[error("Not supported")]
    Notsup = 58,

    #[error("Broken pipe")]
    Pipe = 64,

    #[error("Connection timed out")]
    Timedout = 73,

    #[error("Extension: Capabilities insufficient")]
    Notcapable = 76,
}

impl Errno {
    /// Raw value handed back to the guest
    pub fn raw(self) -> u16 {
        self as u16
    }
}

impl From<Errno> for u16 {
    fn from(errno: Errno) -> Self {
        errno.raw()
    }
}

impl From<Errno> for i32 {
    fn from(errno: Errno) -> Self {
        i32::from(errno.raw())
    }
}

/// Collapses a typed syscall result into the code the guest sees
pub fn to_raw(result: Result<(), Errno>) -> u16 {
    match result {
        Ok(()) => Errno::Success.raw(),
        Err(errno) => errno.raw(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_abi_values() {
        assert_eq!(Errno::Success.raw(), 0);
        assert_eq!(Errno::Again.raw(), 6);
        assert_eq!(Errno::Badf.raw(), 8);
        assert_eq!(Errno::Fault.raw(), 21);
        assert_eq!(Errno::Inval.raw(), 28);
        assert_eq!(Errno::Io.raw(), 29);
        assert_eq!(Errno::Noent.raw(), 44);
        assert_eq!(Errno::Nosys.raw(), 52);
        assert_eq!(Errno::Notsup.raw(), 58);
    }

    #[test]
    fn test_to_raw() {
        assert_eq!(to_raw(Ok(())), 0);
        assert_eq!(to_raw(Err(Errno::Again)), 6);
        assert_eq!(i32::from(Errno::Badf), 8);
    }
}
