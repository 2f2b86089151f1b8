//! Non-owning cursor over a byte buffer.
//!
//! All multi-byte reads are big-endian, matching the PostgreSQL wire
//! encoding. Reads past the end of the buffer fail with
//! [`Error::ShortBuffer`](crate::Error::ShortBuffer) instead of panicking.

use crate::{Error, Result};

/// A view over a byte slice with a mutable read offset. Never allocates.
pub struct Cursor<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    /// Bytes left to read.
    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    /// Returns the next `n` bytes and advances past them.
    pub fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        if self.remaining() < n {
            return Err(Error::ShortBuffer {
                need: n,
                have: self.remaining(),
            });
        }

        let out = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(out)
    }

    pub fn u16_be(&mut self) -> Result<u16> {
        let b = self.take(2)?;
        Ok(u16::from_be_bytes([b[0], b[1]]))
    }

    pub fn i16_be(&mut self) -> Result<i16> {
        Ok(self.u16_be()? as i16)
    }

    pub fn u32_be(&mut self) -> Result<u32> {
        let b = self.take(4)?;
        Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    pub fn i32_be(&mut self) -> Result<i32> {
        Ok(self.u32_be()? as i32)
    }

    pub fn u64_be(&mut self) -> Result<u64> {
        let b = self.take(8)?;
        let mut out = [0u8; 8];
        out.copy_from_slice(b);
        Ok(u64::from_be_bytes(out))
    }

    pub fn i64_be(&mut self) -> Result<i64> {
        Ok(self.u64_be()? as i64)
    }

    /// True when the next `n` bytes all equal `byte`. Does not advance.
    /// False when fewer than `n` bytes remain.
    pub fn peek_all(&self, byte: u8, n: usize) -> bool {
        if self.remaining() < n {
            return false;
        }

        self.buf[self.pos..self.pos + n].iter().all(|b| *b == byte)
    }
}
