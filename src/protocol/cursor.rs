//! Bounds-checked read cursor over an immutable byte buffer.
//!
//! The cursor never moves past the end of its buffer: every read that would
//! cross the end fails with [`DecodeError::OutOfBounds`] and leaves the offset
//! untouched. Multi-byte reads always take an explicit [`Endian`].
//!
//! # Example
//!
//! ```
//! use tlvscan::protocol::{ByteCursor, Endian};
//!
//! let mut cursor = ByteCursor::from_static(&[0x12, 0x34, 0x56]);
//! assert_eq!(cursor.peek_u16(0, Endian::Big).unwrap(), 0x1234);
//! assert_eq!(cursor.read_u16(Endian::Little).unwrap(), 0x3412);
//! assert_eq!(cursor.remaining(), 1);
//! assert!(cursor.advance(2).is_err());
//! assert_eq!(cursor.offset(), 2);
//! ```

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::error::{DecodeError, DecodeResult};

/// Byte order for multi-byte integer reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Endian {
    /// Network byte order.
    #[default]
    Big,
    /// Least significant byte first.
    Little,
}

impl Endian {
    /// Assemble an unsigned integer from up to 4 bytes.
    #[inline]
    pub fn uint(self, bytes: &[u8]) -> u32 {
        debug_assert!(bytes.len() <= 4);
        match self {
            Endian::Big => bytes.iter().fold(0u32, |acc, &b| (acc << 8) | b as u32),
            Endian::Little => bytes
                .iter()
                .rev()
                .fold(0u32, |acc, &b| (acc << 8) | b as u32),
        }
    }

    /// Write the low `width` bytes of `value` into `out`.
    #[inline]
    pub fn put_uint(self, value: u32, width: usize, out: &mut Vec<u8>) {
        debug_assert!(width <= 4);
        for i in 0..width {
            let shift = match self {
                Endian::Big => 8 * (width - 1 - i),
                Endian::Little => 8 * i,
            };
            out.push((value >> shift) as u8);
        }
    }
}

/// Offset-tracked read view over a [`Bytes`] buffer.
///
/// Cloning a cursor is cheap (the buffer is reference counted). Sub-cursors
/// created with [`ByteCursor::sub_cursor`] share the buffer and report
/// absolute offsets through [`ByteCursor::position`].
#[derive(Debug, Clone)]
pub struct ByteCursor {
    buf: Bytes,
    /// Absolute position of `buf[0]` within the enclosing session.
    base: usize,
    offset: usize,
}

impl ByteCursor {
    /// Create a cursor at the start of `buf`.
    pub fn new(buf: Bytes) -> Self {
        Self::with_base(buf, 0)
    }

    /// Create a cursor whose first byte sits at absolute position `base`.
    pub fn with_base(buf: Bytes, base: usize) -> Self {
        Self {
            buf,
            base,
            offset: 0,
        }
    }

    /// Create a cursor over a static slice.
    pub fn from_static(data: &'static [u8]) -> Self {
        Self::new(Bytes::from_static(data))
    }

    /// Offset relative to the start of this cursor's buffer.
    #[inline]
    pub fn offset(&self) -> usize {
        self.offset
    }

    /// Absolute position of the current offset.
    #[inline]
    pub fn position(&self) -> usize {
        self.base + self.offset
    }

    /// Absolute position of this cursor's first byte.
    #[inline]
    pub fn base(&self) -> usize {
        self.base
    }

    /// Total buffer length.
    #[inline]
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    /// Check if the buffer has no bytes at all.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Bytes left between the offset and the end of the buffer.
    #[inline]
    pub fn remaining(&self) -> usize {
        self.buf.len() - self.offset
    }

    /// Check if the cursor has consumed the whole buffer.
    #[inline]
    pub fn is_exhausted(&self) -> bool {
        self.remaining() == 0
    }

    /// The unread part of the buffer.
    #[inline]
    pub fn rest(&self) -> &[u8] {
        &self.buf[self.offset..]
    }

    /// Zero-copy handle to the unread part of the buffer.
    pub fn rest_bytes(&self) -> Bytes {
        self.buf.slice(self.offset..)
    }

    fn check(&self, at: usize, len: usize) -> DecodeResult<usize> {
        let start = self.offset.checked_add(at);
        match start.and_then(|s| s.checked_add(len)) {
            Some(end) if end <= self.buf.len() => Ok(self.offset + at),
            _ => Err(DecodeError::OutOfBounds {
                offset: self.position().saturating_add(at),
                needed: len,
                available: self.remaining().saturating_sub(at),
            }),
        }
    }

    /// Move the offset forward by `n` bytes.
    ///
    /// Fails without moving if `n > remaining()`.
    pub fn advance(&mut self, n: usize) -> DecodeResult<()> {
        self.check(0, n)?;
        self.offset += n;
        Ok(())
    }

    /// Borrow `len` bytes starting `at` bytes past the offset.
    pub fn peek_bytes(&self, at: usize, len: usize) -> DecodeResult<&[u8]> {
        let start = self.check(at, len)?;
        Ok(&self.buf[start..start + len])
    }

    /// Read an unsigned integer of `width` (1..=4) bytes without advancing.
    pub fn peek_uint(&self, at: usize, width: usize, endian: Endian) -> DecodeResult<u32> {
        if width == 0 || width > 4 {
            return Err(DecodeError::malformed_header(
                self.position() + at,
                format!("unsupported integer width {}", width),
            ));
        }
        Ok(endian.uint(self.peek_bytes(at, width)?))
    }

    /// Read a byte without advancing.
    #[inline]
    pub fn peek_u8(&self, at: usize) -> DecodeResult<u8> {
        Ok(self.peek_bytes(at, 1)?[0])
    }

    /// Read a 16-bit integer without advancing.
    #[inline]
    pub fn peek_u16(&self, at: usize, endian: Endian) -> DecodeResult<u16> {
        Ok(endian.uint(self.peek_bytes(at, 2)?) as u16)
    }

    /// Read a 24-bit integer without advancing.
    #[inline]
    pub fn peek_u24(&self, at: usize, endian: Endian) -> DecodeResult<u32> {
        Ok(endian.uint(self.peek_bytes(at, 3)?))
    }

    /// Read a 32-bit integer without advancing.
    #[inline]
    pub fn peek_u32(&self, at: usize, endian: Endian) -> DecodeResult<u32> {
        Ok(endian.uint(self.peek_bytes(at, 4)?))
    }

    /// Read a byte and advance.
    pub fn read_u8(&mut self) -> DecodeResult<u8> {
        let v = self.peek_u8(0)?;
        self.offset += 1;
        Ok(v)
    }

    /// Read a 16-bit integer and advance.
    pub fn read_u16(&mut self, endian: Endian) -> DecodeResult<u16> {
        let v = self.peek_u16(0, endian)?;
        self.offset += 2;
        Ok(v)
    }

    /// Read a 24-bit integer and advance.
    pub fn read_u24(&mut self, endian: Endian) -> DecodeResult<u32> {
        let v = self.peek_u24(0, endian)?;
        self.offset += 3;
        Ok(v)
    }

    /// Read a 32-bit integer and advance.
    pub fn read_u32(&mut self, endian: Endian) -> DecodeResult<u32> {
        let v = self.peek_u32(0, endian)?;
        self.offset += 4;
        Ok(v)
    }

    /// Take `n` bytes as a zero-copy [`Bytes`] and advance.
    pub fn take(&mut self, n: usize) -> DecodeResult<Bytes> {
        let start = self.check(0, n)?;
        self.offset += n;
        Ok(self.buf.slice(start..start + n))
    }

    /// Take `n` bytes as a new cursor and advance past them.
    ///
    /// The returned cursor keeps absolute positions, so diagnostics raised
    /// while decoding a payload point into the original buffer.
    pub fn sub_cursor(&mut self, n: usize) -> DecodeResult<ByteCursor> {
        let base = self.position();
        let bytes = self.take(n)?;
        Ok(ByteCursor::with_base(bytes, base))
    }
}
