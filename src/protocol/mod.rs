//! Protocol module - cursors, header formats, records and reassembly.
//!
//! This module implements the format-independent parts of record parsing:
//! - Bounds-checked byte cursor with explicit endianness
//! - Declarative header formats with a decoder and encoder
//! - Record struct with typed accessors
//! - Reassembly of records split across stream chunks

mod cursor;
mod reassembly;
mod record;
mod wire_format;

pub use cursor::{ByteCursor, Endian};
pub use reassembly::{Awaiting, ReassemblyTracker, Termination, TrackerState};
pub use record::Record;
pub use wire_format::{
    decode_header, encode_header, FieldSpec, HeaderFormat, LengthEncoding, LengthScope, Padding,
    RecordHeader, SHORT_LONG_FLAG, SHORT_LONG_MASK, SHORT_LONG_MAX_SHORT,
};
