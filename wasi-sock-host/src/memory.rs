//! Bounds-checked access to guest linear memory
//!
//! A [`GuestMemory`] borrows the guest's memory for the duration of one
//! syscall only. Every access takes an explicit address and length and fails
//! with [`Errno::Fault`] when the range leaves the memory.

use std::ops::Range;
use wasi_sock_abi::{Errno, Iovec, Ptr};

/// Borrowed view of guest linear memory
pub struct GuestMemory<'a> {
    bytes: &'a mut [u8],
}

impl<'a> GuestMemory<'a> {
    pub fn new(bytes: &'a mut [u8]) -> Self {
        Self { bytes }
    }

    /// Size of the memory in bytes
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    fn range(&self, ptr: Ptr, len: usize) -> Result<Range<usize>, Errno> {
        let start = ptr as usize;
        let end = start.checked_add(len).ok_or(Errno::Fault)?;
        if end > self.bytes.len() {
            return Err(Errno::Fault);
        }
        Ok(start..end)
    }

    pub fn slice(&self, ptr: Ptr, len: u32) -> Result<&[u8], Errno> {
        let range = self.range(ptr, len as usize)?;
        Ok(&self.bytes[range])
    }

    pub fn slice_mut(&mut self, ptr: Ptr, len: u32) -> Result<&mut [u8], Errno> {
        let range = self.range(ptr, len as usize)?;
        Ok(&mut self.bytes[range])
    }

    /// Copy a fixed-size record out of guest memory
    pub fn read_array<const N: usize>(&self, ptr: Ptr) -> Result<[u8; N], Errno> {
        let range = self.range(ptr, N)?;
        let mut out = [0u8; N];
        out.copy_from_slice(&self.bytes[range]);
        Ok(out)
    }

    pub fn write_bytes(&mut self, ptr: Ptr, data: &[u8]) -> Result<(), Errno> {
        let range = self.range(ptr, data.len())?;
        self.bytes[range].copy_from_slice(data);
        Ok(())
    }

    pub fn write_u16(&mut self, ptr: Ptr, value: u16) -> Result<(), Errno> {
        self.write_bytes(ptr, &value.to_le_bytes())
    }

    pub fn write_u32(&mut self, ptr: Ptr, value: u32) -> Result<(), Errno> {
        self.write_bytes(ptr, &value.to_le_bytes())
    }

    pub fn write_u64(&mut self, ptr: Ptr, value: u64) -> Result<(), Errno> {
        self.write_bytes(ptr, &value.to_le_bytes())
    }

    /// Decode an array of `count` scatter/gather vectors starting at `ptr`
    pub fn read_iovecs(&self, ptr: Ptr, count: u32) -> Result<Vec<Iovec>, Errno> {
        let total = (count as usize)
            .checked_mul(Iovec::SIZE)
            .ok_or(Errno::Fault)?;
        self.range(ptr, total)?;

        (0..count)
            .map(|i| {
                let at = ptr
                    .checked_add(i * Iovec::SIZE as u32)
                    .ok_or(Errno::Fault)?;
                Ok(Iovec::decode(&self.read_array::<{ Iovec::SIZE }>(at)?))
            })
            .collect()
    }
}
