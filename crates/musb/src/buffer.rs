use core::ptr::NonNull;

use crate::error::{Error, Result};

/// Caller-owned memory for one transfer.
///
/// The controllers never allocate or free transfer memory. A `Buffer` only
/// records where the caller's region lives so that FIFO copies and DMA
/// programming can reach it across interrupts. The controller stops touching
/// the region once the matching completion callback has run.
#[derive(Debug, Clone, Copy)]
pub struct Buffer {
    ptr: NonNull<u8>,
    len: usize,
    writable: bool,
}

impl Buffer {
    /// Wraps a region that may be both read from and received into.
    pub fn new(buf: &'static mut [u8]) -> Self {
        let len = buf.len();
        Self {
            ptr: NonNull::from(buf).cast(),
            len,
            writable: true,
        }
    }

    /// Wraps a read-only region, usable as the source of a transmit only.
    pub fn from_static(buf: &'static [u8]) -> Self {
        let len = buf.len();
        Self {
            ptr: NonNull::from(buf).cast(),
            len,
            writable: false,
        }
    }

    /// Safety: `ptr` must be valid for reads and writes of `len` bytes until
    /// the completion callback of every transfer using this buffer has run,
    /// and nothing else may access the region while a transfer is in flight.
    pub unsafe fn from_raw_parts(ptr: *mut u8, len: usize) -> Self {
        Self {
            ptr: NonNull::new(ptr).unwrap_or(NonNull::dangling()),
            len,
            writable: true,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn is_writable(&self) -> bool {
        self.writable
    }

    /// Bus address of the first byte, as programmed into a DMA channel.
    pub fn addr(&self) -> usize {
        self.ptr.as_ptr() as usize
    }

    pub(crate) fn check_writable(&self) -> Result<()> {
        if self.writable {
            Ok(())
        } else {
            Err(Error::BufferNotWritable)
        }
    }

    /// Safety: no other reference into the region may be live; the caller's
    /// contract on construction covers the lifetime.
    pub(crate) unsafe fn slice(&self, offset: usize, len: usize) -> &[u8] {
        assert!(offset + len <= self.len);
        unsafe { core::slice::from_raw_parts(self.ptr.as_ptr().add(offset), len) }
    }

    /// Safety: as for [`Buffer::slice`], and the buffer must be writable.
    #[allow(clippy::mut_from_ref)]
    pub(crate) unsafe fn slice_mut(&self, offset: usize, len: usize) -> &mut [u8] {
        assert!(self.writable);
        assert!(offset + len <= self.len);
        unsafe { core::slice::from_raw_parts_mut(self.ptr.as_ptr().add(offset), len) }
    }
}
