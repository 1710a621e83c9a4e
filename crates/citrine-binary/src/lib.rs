//! # Citrine Binary Utilities
//!
//! Length-checked reading and writing of big-endian wire data on top of the
//! `bytes` crate. Every read validates the remaining buffer length first and
//! reports a structured [`BinaryError`] instead of panicking.

use bytes::{Buf, BufMut, Bytes};

pub mod error;

pub use error::{BinaryError, Result};

/// Checks if the buffer has enough remaining bytes and returns an error if not.
macro_rules! check_remaining {
    ($buf:expr, $len:expr) => {
        let needed = $len;
        let remaining = $buf.remaining();
        if remaining < needed {
            return Err(BinaryError::UnexpectedEof { needed, remaining });
        }
    };
}

/// Extension trait for `bytes::Buf` providing checked reads of wire primitives.
pub trait BinaryReader: Buf {
    /// Reads a single `u8` byte.
    #[inline]
    fn read_u8(&mut self) -> Result<u8> {
        check_remaining!(self, 1);
        Ok(self.get_u8())
    }

    /// Reads a `u16` in big-endian (network) byte order.
    #[inline]
    fn read_u16_be(&mut self) -> Result<u16> {
        check_remaining!(self, 2);
        Ok(self.get_u16())
    }

    /// Reads a `u32` in big-endian (network) byte order.
    #[inline]
    fn read_u32_be(&mut self) -> Result<u32> {
        check_remaining!(self, 4);
        Ok(self.get_u32())
    }

    /// Reads exactly `len` bytes into an owned `Bytes`.
    #[inline]
    fn read_bytes(&mut self, len: usize) -> Result<Bytes> {
        check_remaining!(self, len);
        Ok(self.copy_to_bytes(len))
    }

    /// Reads all remaining bytes into an owned `Bytes`.
    #[inline]
    fn read_remaining(&mut self) -> Result<Bytes> {
        let len = self.remaining();
        Ok(self.copy_to_bytes(len))
    }
}

/// Extension trait for `bytes::BufMut` providing writes of wire primitives.
/// Writing into a growable buffer cannot fail, so these return nothing.
pub trait BinaryWriter: BufMut {
    /// Writes a single `u8` byte.
    #[inline]
    fn write_u8(&mut self, value: u8) {
        self.put_u8(value);
    }

    /// Writes a `u16` in big-endian (network) byte order.
    #[inline]
    fn write_u16_be(&mut self, value: u16) {
        self.put_u16(value);
    }

    /// Writes a `u32` in big-endian (network) byte order.
    #[inline]
    fn write_u32_be(&mut self, value: u32) {
        self.put_u32(value);
    }

    /// Writes a raw byte slice as-is.
    #[inline]
    fn write_bytes(&mut self, value: &[u8]) {
        self.put_slice(value);
    }
}

// Blanket implementations: anything that can Buf/BufMut gets the checked API.
impl<T: Buf> BinaryReader for T {}
impl<T: BufMut> BinaryWriter for T {}
