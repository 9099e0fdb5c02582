//! Record struct with typed accessors.
//!
//! A [`Record`] is a decoded header plus a zero-copy handle to its payload.
//! Records only exist once the declared length has been checked against the
//! available bytes.
//!
//! # Example
//!
//! ```
//! use tlvscan::protocol::{Record, RecordHeader};
//! use bytes::Bytes;
//!
//! let mut header = RecordHeader::new(1, 5);
//! header.header_len = 2;
//! let record = Record::new(header, 0, Bytes::from_static(b"hello"));
//!
//! assert_eq!(record.type_code(), 1);
//! assert_eq!(record.payload(), b"hello");
//! assert_eq!(record.total_len(), 7);
//! ```

use bytes::Bytes;

use super::cursor::ByteCursor;
use super::wire_format::RecordHeader;

/// A complete record.
#[derive(Debug, Clone)]
pub struct Record {
    /// Decoded header.
    pub header: RecordHeader,
    /// Absolute offset of the first header byte.
    pub offset: usize,
    /// Payload bytes, padding excluded (zero-copy via `bytes::Bytes`).
    pub payload: Bytes,
}

impl Record {
    /// Create a new record from header and payload.
    pub fn new(header: RecordHeader, offset: usize, payload: Bytes) -> Self {
        Self {
            header,
            offset,
            payload,
        }
    }

    /// Get a reference to the payload bytes.
    #[inline]
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Get the payload length.
    #[inline]
    pub fn payload_len(&self) -> usize {
        self.payload.len()
    }

    /// Get the type code.
    #[inline]
    pub fn type_code(&self) -> u32 {
        self.header.type_code
    }

    /// Get the flags.
    #[inline]
    pub fn flags(&self) -> u32 {
        self.header.flags
    }

    /// Bytes the record occupies on the wire, padding included.
    #[inline]
    pub fn total_len(&self) -> usize {
        self.header.total_len()
    }

    /// Absolute offset of the first payload byte.
    #[inline]
    pub fn payload_offset(&self) -> usize {
        self.offset + self.header.header_len
    }

    /// A cursor over the payload that reports absolute offsets.
    pub fn payload_cursor(&self) -> ByteCursor {
        ByteCursor::with_base(self.payload.clone(), self.payload_offset())
    }
}
