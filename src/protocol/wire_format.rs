//! Declarative record header formats and the header decoder.
//!
//! A [`HeaderFormat`] describes one protocol's record header as an ordered
//! list of fields plus the rules for interpreting the length field and any
//! trailing padding. Typical shapes:
//!
//! ```text
//! simple TLV      ┌──────┬────────┬─────────┐
//!                 │ Type │ Length │ Value   │
//!                 │ 1 B  │ 1 B    │ N bytes │
//!                 └──────┴────────┴─────────┘
//!
//! FastCGI record  ┌─────────┬──────┬────────┬─────────┬─────────┬──────────┬─────────┬─────────┐
//!                 │ Version │ Type │ Req ID │ Content │ Padding │ Reserved │ Content │ Padding │
//!                 │ 1 B     │ 1 B  │ 2 B    │ 2 B     │ 1 B     │ 1 B      │ N bytes │ P bytes │
//!                 └─────────┴──────┴────────┴─────────┴─────────┴──────────┴─────────┴─────────┘
//!
//! SHIM6 option    ┌───────────┬────────┬─────────┬──────────────────────┐
//!                 │ C + Type  │ Length │ Value   │ pad to 8-byte bound. │
//!                 │ 2 B       │ 2 B    │ N bytes │                      │
//!                 └───────────┴────────┴─────────┴──────────────────────┘
//! ```
//!
//! Formats are `serde` (de)serialisable so they can be loaded from JSON.
//!
//! # Example
//!
//! ```
//! use tlvscan::protocol::{ByteCursor, Endian, HeaderFormat};
//!
//! let format = HeaderFormat::tlv("demo", 1, 1, Endian::Big);
//! let cursor = ByteCursor::from_static(&[0x01, 0x05, b'A', b'B', b'C', b'D', b'E']);
//! let header = format.decode_header(&cursor).unwrap();
//! assert_eq!(header.type_code, 1);
//! assert_eq!(header.declared_length, 5);
//! assert_eq!(header.total_len(), 7);
//! ```

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

use super::cursor::{ByteCursor, Endian};
use crate::error::{DecodeError, DecodeResult, Error, Result};

/// Mask applied to the 4-byte form of a short/long length.
pub const SHORT_LONG_MASK: u32 = 0x7FFF_FFFF;

/// High bit that selects the 4-byte form of a short/long length.
pub const SHORT_LONG_FLAG: u8 = 0x80;

/// Largest value the 1-byte form of a short/long length can carry.
pub const SHORT_LONG_MAX_SHORT: u32 = 0x7F;

/// How the length field is encoded on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LengthEncoding {
    /// Unsigned integer of `width` bytes (1..=4).
    Fixed { width: u8 },
    /// 1 byte if the high bit is clear, else 4 bytes masked to 31 bits.
    ///
    /// The flag is always the high bit of the first wire byte, so the long
    /// form is big-endian whatever the format's byte order.
    ShortLong,
}

/// One field of a record header, in wire order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "field", rename_all = "snake_case")]
pub enum FieldSpec {
    /// Record type code. Bits outside `mask` are moved into the flags and
    /// the masked bits are shifted down to bit 0.
    Type {
        width: u8,
        #[serde(default)]
        mask: Option<u32>,
    },
    /// Record length.
    Length { encoding: LengthEncoding },
    /// Flags bitset.
    Flags { width: u8 },
    /// Number of padding bytes that follow the payload.
    PadLength { width: u8 },
    /// Extra integer kept in [`RecordHeader::extras`].
    Extra { width: u8 },
    /// Bytes with no meaning to the parser.
    Reserved { width: u8 },
}

impl FieldSpec {
    fn width(&self) -> Option<u8> {
        match *self {
            FieldSpec::Type { width, .. }
            | FieldSpec::Flags { width }
            | FieldSpec::PadLength { width }
            | FieldSpec::Extra { width }
            | FieldSpec::Reserved { width } => Some(width),
            FieldSpec::Length {
                encoding: LengthEncoding::Fixed { width },
            } => Some(width),
            FieldSpec::Length {
                encoding: LengthEncoding::ShortLong,
            } => None,
        }
    }
}

/// What the decoded length value covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LengthScope {
    /// Length counts payload bytes only.
    #[default]
    Payload,
    /// Length counts the header as well as the payload.
    Record,
}

/// Trailing padding rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "rule", rename_all = "snake_case")]
pub enum Padding {
    /// No padding.
    #[default]
    None,
    /// Pad header + payload up to a multiple of `to` bytes.
    AlignRecord { to: u32 },
    /// Pad the payload alone up to a multiple of `to` bytes.
    AlignPayload { to: u32 },
    /// Padding length carried in a [`FieldSpec::PadLength`] field.
    Explicit,
}

impl Padding {
    fn compute(&self, header_len: usize, payload_len: usize, explicit: usize) -> usize {
        match *self {
            Padding::None => 0,
            Padding::AlignRecord { to } => pad_to(header_len + payload_len, to as usize),
            Padding::AlignPayload { to } => pad_to(payload_len, to as usize),
            Padding::Explicit => explicit,
        }
    }
}

#[inline]
fn pad_to(len: usize, to: usize) -> usize {
    if to <= 1 {
        return 0;
    }
    (to - len % to) % to
}

fn one() -> u32 {
    1
}

/// Declarative description of a record header.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeaderFormat {
    /// Human-readable format name, used in diagnostics and logs.
    pub name: String,
    /// Byte order of every multi-byte header field.
    #[serde(default)]
    pub endian: Endian,
    /// Header fields in wire order.
    pub fields: Vec<FieldSpec>,
    /// What the length field counts.
    #[serde(default)]
    pub length_scope: LengthScope,
    /// Multiplier applied to the length field (after the bias).
    #[serde(default = "one")]
    pub length_scale: u32,
    /// Added to the raw length field before scaling.
    #[serde(default)]
    pub length_bias: u32,
    /// Trailing padding rule.
    #[serde(default)]
    pub padding: Padding,
    /// Largest accepted payload length.
    #[serde(default)]
    pub max_length: Option<u32>,
}

impl HeaderFormat {
    /// Create an empty format; add fields with the builder methods.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            endian: Endian::Big,
            fields: Vec::new(),
            length_scope: LengthScope::Payload,
            length_scale: 1,
            length_bias: 0,
            padding: Padding::None,
            max_length: None,
        }
    }

    /// Plain type/length/value format.
    pub fn tlv(name: impl Into<String>, type_width: u8, length_width: u8, endian: Endian) -> Self {
        Self::new(name)
            .endian(endian)
            .field(FieldSpec::Type {
                width: type_width,
                mask: None,
            })
            .field(FieldSpec::Length {
                encoding: LengthEncoding::Fixed {
                    width: length_width,
                },
            })
    }

    /// Set the byte order.
    pub fn endian(mut self, endian: Endian) -> Self {
        self.endian = endian;
        self
    }

    /// Append a header field.
    pub fn field(mut self, field: FieldSpec) -> Self {
        self.fields.push(field);
        self
    }

    /// Set what the length field covers.
    pub fn length_scope(mut self, scope: LengthScope) -> Self {
        self.length_scope = scope;
        self
    }

    /// Interpret the length field as `(raw + bias) * scale`.
    pub fn length_units(mut self, scale: u32, bias: u32) -> Self {
        self.length_scale = scale;
        self.length_bias = bias;
        self
    }

    /// Set the padding rule.
    pub fn padding(mut self, padding: Padding) -> Self {
        self.padding = padding;
        self
    }

    /// Reject payloads longer than `max`.
    pub fn max_length(mut self, max: u32) -> Self {
        self.max_length = Some(max);
        self
    }

    /// Load and validate a format from JSON.
    pub fn from_json(json: &str) -> Result<Self> {
        let format: HeaderFormat = serde_json::from_str(json)?;
        format.validate()?;
        Ok(format)
    }

    /// Serialize the format to JSON.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Check the format for internal consistency.
    ///
    /// Checks:
    /// - Exactly one type field and one length field
    /// - At most one flags field and one pad-length field
    /// - Field widths are 1..=4 bytes
    /// - A pad-length field is present exactly when padding is explicit
    /// - Alignment and scale are non-zero
    pub fn validate(&self) -> Result<()> {
        let count = |pred: fn(&FieldSpec) -> bool| self.fields.iter().filter(|f| pred(f)).count();

        if count(|f| matches!(f, FieldSpec::Type { .. })) != 1 {
            return Err(self.config_error("needs exactly one type field"));
        }
        if count(|f| matches!(f, FieldSpec::Length { .. })) != 1 {
            return Err(self.config_error("needs exactly one length field"));
        }
        if count(|f| matches!(f, FieldSpec::Flags { .. })) > 1 {
            return Err(self.config_error("has more than one flags field"));
        }
        let pad_fields = count(|f| matches!(f, FieldSpec::PadLength { .. }));
        if pad_fields > 1 {
            return Err(self.config_error("has more than one pad-length field"));
        }
        if (pad_fields == 1) != (self.padding == Padding::Explicit) {
            return Err(self.config_error(
                "a pad-length field requires explicit padding and vice versa",
            ));
        }
        for field in &self.fields {
            if let Some(width) = field.width() {
                if width == 0 || width > 4 {
                    return Err(self.config_error(&format!("field width {} not in 1..=4", width)));
                }
            }
        }
        match self.padding {
            Padding::AlignRecord { to: 0 } | Padding::AlignPayload { to: 0 } => {
                return Err(self.config_error("alignment must be non-zero"));
            }
            _ => {}
        }
        if self.length_scale == 0 {
            return Err(self.config_error("length scale must be non-zero"));
        }
        Ok(())
    }

    fn config_error(&self, what: &str) -> Error {
        Error::Config(format!("header format '{}' {}", self.name, what))
    }

    /// Smallest possible header size (short/long lengths count as 1 byte).
    pub fn min_header_len(&self) -> usize {
        self.fields
            .iter()
            .map(|f| f.width().unwrap_or(1) as usize)
            .sum()
    }

    /// Largest possible header size (short/long lengths count as 4 bytes).
    pub fn max_header_len(&self) -> usize {
        self.fields
            .iter()
            .map(|f| f.width().unwrap_or(4) as usize)
            .sum()
    }

    /// Decode the header at the cursor's current offset.
    ///
    /// Peeks only; the cursor is not advanced and payload bytes are never
    /// read. Returns `Incomplete` when the header itself is cut short and
    /// `MalformedHeader` when the length fields are inconsistent.
    pub fn decode_header(&self, cursor: &ByteCursor) -> DecodeResult<RecordHeader> {
        let start = cursor.position();
        let mut at = 0usize;
        let mut type_code = 0u32;
        let mut flags = 0u32;
        let mut raw_length = 0u32;
        let mut explicit_pad = 0usize;
        let mut extras = SmallVec::new();

        for field in &self.fields {
            match *field {
                FieldSpec::Type { width, mask } => {
                    let raw = self.peek(cursor, at, width)?;
                    match mask {
                        Some(mask) => {
                            type_code = (raw & mask) >> mask.trailing_zeros().min(31);
                            flags |= raw & !mask;
                        }
                        None => type_code = raw,
                    }
                    at += width as usize;
                }
                FieldSpec::Length {
                    encoding: LengthEncoding::Fixed { width },
                } => {
                    raw_length = self.peek(cursor, at, width)?;
                    at += width as usize;
                }
                FieldSpec::Length {
                    encoding: LengthEncoding::ShortLong,
                } => {
                    let first = self.peek(cursor, at, 1)?;
                    if first as u8 & SHORT_LONG_FLAG == 0 {
                        raw_length = first;
                        at += 1;
                    } else {
                        raw_length =
                            self.peek_in(cursor, at, 4, Endian::Big)? & SHORT_LONG_MASK;
                        at += 4;
                    }
                }
                FieldSpec::Flags { width } => {
                    flags |= self.peek(cursor, at, width)?;
                    at += width as usize;
                }
                FieldSpec::PadLength { width } => {
                    explicit_pad = self.peek(cursor, at, width)? as usize;
                    at += width as usize;
                }
                FieldSpec::Extra { width } => {
                    extras.push(self.peek(cursor, at, width)?);
                    at += width as usize;
                }
                FieldSpec::Reserved { width } => {
                    // Still has to be present.
                    self.peek(cursor, at, width)?;
                    at += width as usize;
                }
            }
        }

        let header_len = at;
        let scaled = (raw_length as u64)
            .checked_add(self.length_bias as u64)
            .and_then(|v| v.checked_mul(self.length_scale as u64))
            .ok_or_else(|| DecodeError::malformed_header(start, "length overflows"))?;

        let payload_len = match self.length_scope {
            LengthScope::Payload => scaled,
            LengthScope::Record => scaled.checked_sub(header_len as u64).ok_or_else(|| {
                DecodeError::malformed_header(
                    start,
                    format!(
                        "record length {} is shorter than its {} byte header",
                        scaled, header_len
                    ),
                )
            })?,
        };

        let declared_length = u32::try_from(payload_len).map_err(|_| {
            DecodeError::malformed_header(start, format!("length {} overflows", payload_len))
        })?;

        if let Some(max) = self.max_length {
            if declared_length > max {
                return Err(DecodeError::malformed_header(
                    start,
                    format!("length {} exceeds maximum {}", declared_length, max),
                ));
            }
        }

        let padding = self
            .padding
            .compute(header_len, declared_length as usize, explicit_pad);

        header_len
            .checked_add(declared_length as usize)
            .and_then(|v| v.checked_add(padding))
            .ok_or_else(|| DecodeError::malformed_header(start, "record length overflows"))?;

        Ok(RecordHeader {
            type_code,
            declared_length,
            flags,
            header_len,
            padding,
            extras,
        })
    }

    fn peek(&self, cursor: &ByteCursor, at: usize, width: u8) -> DecodeResult<u32> {
        self.peek_in(cursor, at, width, self.endian)
    }

    fn peek_in(
        &self,
        cursor: &ByteCursor,
        at: usize,
        width: u8,
        endian: Endian,
    ) -> DecodeResult<u32> {
        let width = width as usize;
        if cursor.remaining() < at + width {
            return Err(DecodeError::Incomplete {
                offset: cursor.position(),
                needed: at + width - cursor.remaining(),
            });
        }
        cursor.peek_uint(at, width, endian)
    }

    /// Check that a decoded record fits in the bytes left in `cursor`.
    ///
    /// Returns `Incomplete` when header + payload are not all present. When
    /// only the trailing padding is missing, a complete buffer (`at_end`)
    /// yields `MalformedHeader` while a stream yields `Incomplete`.
    pub fn check_fit(
        &self,
        header: &RecordHeader,
        cursor: &ByteCursor,
        at_end: bool,
    ) -> DecodeResult<()> {
        let remaining = cursor.remaining();
        let body = header.header_len + header.declared_length as usize;
        let total = header.total_len();

        if body > remaining {
            return Err(DecodeError::Incomplete {
                offset: cursor.position(),
                needed: total - remaining,
            });
        }
        if total > remaining {
            if at_end {
                return Err(DecodeError::malformed_header(
                    cursor.position(),
                    format!(
                        "{} padding bytes run past the end of the buffer",
                        header.padding
                    ),
                ));
            }
            return Err(DecodeError::Incomplete {
                offset: cursor.position(),
                needed: total - remaining,
            });
        }
        Ok(())
    }

    /// Encode a header.
    ///
    /// `header.header_len` and (for alignment rules) `header.padding` are
    /// recomputed from the format. Extras are written in order; missing ones
    /// are written as zero.
    pub fn encode_header(&self, header: &RecordHeader) -> Result<Vec<u8>> {
        let header_len = self.encoded_header_len(header.declared_length)?;
        let raw_length = self.raw_length(header.declared_length, header_len)?;
        let padding = self.padding.compute(
            header_len,
            header.declared_length as usize,
            header.padding,
        );

        let mut buf = Vec::with_capacity(header_len);
        let mut extras = header.extras.iter();

        for field in &self.fields {
            match *field {
                FieldSpec::Type { width, mask } => {
                    let value = match mask {
                        Some(mask) => {
                            let shift = mask.trailing_zeros().min(31);
                            let shifted = header.type_code << shift;
                            if shifted & !mask != 0 || shifted >> shift != header.type_code {
                                return Err(self.config_error(&format!(
                                    "type code {:#x} does not fit mask {:#x}",
                                    header.type_code, mask
                                )));
                            }
                            shifted | (header.flags & !mask)
                        }
                        None => header.type_code,
                    };
                    self.put(value, width, &mut buf)?;
                }
                FieldSpec::Length {
                    encoding: LengthEncoding::Fixed { width },
                } => self.put(raw_length, width, &mut buf)?,
                FieldSpec::Length {
                    encoding: LengthEncoding::ShortLong,
                } => {
                    if raw_length <= SHORT_LONG_MAX_SHORT {
                        buf.push(raw_length as u8);
                    } else if raw_length <= SHORT_LONG_MASK {
                        Endian::Big.put_uint(raw_length | 0x8000_0000, 4, &mut buf);
                    } else {
                        return Err(self.config_error("length does not fit 31 bits"));
                    }
                }
                FieldSpec::Flags { width } => self.put(header.flags, width, &mut buf)?,
                FieldSpec::PadLength { width } => self.put(padding as u32, width, &mut buf)?,
                FieldSpec::Extra { width } => {
                    let value = extras.next().copied().unwrap_or(0);
                    self.put(value, width, &mut buf)?;
                }
                FieldSpec::Reserved { width } => buf.resize(buf.len() + width as usize, 0),
            }
        }

        debug_assert_eq!(buf.len(), header_len);
        Ok(buf)
    }

    /// Build a complete record: header, payload and zeroed padding.
    ///
    /// `header.declared_length` is taken from the payload.
    pub fn build_record(&self, header: &RecordHeader, payload: &[u8]) -> Result<Vec<u8>> {
        let declared_length = u32::try_from(payload.len())
            .map_err(|_| self.config_error("payload longer than u32::MAX"))?;
        let mut header = header.clone();
        header.declared_length = declared_length;

        let mut buf = self.encode_header(&header)?;
        let padding = self
            .padding
            .compute(buf.len(), payload.len(), header.padding);
        buf.reserve(payload.len() + padding);
        buf.extend_from_slice(payload);
        buf.resize(buf.len() + padding, 0);
        Ok(buf)
    }

    fn encoded_header_len(&self, declared_length: u32) -> Result<usize> {
        let fixed: usize = self
            .fields
            .iter()
            .filter_map(|f| f.width())
            .map(|w| w as usize)
            .sum();
        let short_long = self.fields.iter().any(|f| {
            matches!(
                f,
                FieldSpec::Length {
                    encoding: LengthEncoding::ShortLong
                }
            )
        });
        if !short_long {
            return Ok(fixed);
        }
        let short = fixed + 1;
        let raw = self.raw_length(declared_length, short)?;
        Ok(if raw <= SHORT_LONG_MAX_SHORT {
            short
        } else {
            fixed + 4
        })
    }

    fn raw_length(&self, declared_length: u32, header_len: usize) -> Result<u32> {
        let covered = match self.length_scope {
            LengthScope::Payload => declared_length as u64,
            LengthScope::Record => declared_length as u64 + header_len as u64,
        };
        let scale = self.length_scale as u64;
        if covered % scale != 0 {
            return Err(self.config_error(&format!(
                "length {} is not a multiple of {}",
                covered, scale
            )));
        }
        let raw = (covered / scale)
            .checked_sub(self.length_bias as u64)
            .ok_or_else(|| self.config_error("length smaller than the length bias"))?;
        u32::try_from(raw).map_err(|_| self.config_error("length does not fit 32 bits"))
    }

    fn put(&self, value: u32, width: u8, buf: &mut Vec<u8>) -> Result<()> {
        if width < 4 && value >> (8 * width as u32) != 0 {
            return Err(self.config_error(&format!(
                "value {:#x} does not fit {} bytes",
                value, width
            )));
        }
        self.endian.put_uint(value, width as usize, buf);
        Ok(())
    }
}

/// A decoded record header.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordHeader {
    /// Record type code.
    pub type_code: u32,
    /// Payload length in bytes (after scale, bias and scope adjustments).
    pub declared_length: u32,
    /// Flag bits, including bits masked out of the type field.
    pub flags: u32,
    /// Header size in bytes.
    pub header_len: usize,
    /// Trailing padding in bytes.
    pub padding: usize,
    /// Values of [`FieldSpec::Extra`] fields, in wire order.
    pub extras: SmallVec<[u32; 4]>,
}

impl RecordHeader {
    /// Create a header with no flags, padding or extras.
    ///
    /// `header_len` is filled in by the decoder; for encoding it is derived
    /// from the format.
    pub fn new(type_code: u32, declared_length: u32) -> Self {
        Self {
            type_code,
            declared_length,
            flags: 0,
            header_len: 0,
            padding: 0,
            extras: SmallVec::new(),
        }
    }

    /// Set the flags.
    pub fn with_flags(mut self, flags: u32) -> Self {
        self.flags = flags;
        self
    }

    /// Set explicit padding.
    pub fn with_padding(mut self, padding: usize) -> Self {
        self.padding = padding;
        self
    }

    /// Set extra header values.
    pub fn with_extras(mut self, extras: &[u32]) -> Self {
        self.extras = SmallVec::from_slice(extras);
        self
    }

    /// Check if a flag bit is set.
    #[inline]
    pub fn has_flag(&self, flag: u32) -> bool {
        self.flags & flag != 0
    }

    /// Header + payload + padding.
    #[inline]
    pub fn total_len(&self) -> usize {
        self.header_len + self.declared_length as usize + self.padding
    }

    /// Extra header value by position.
    #[inline]
    pub fn extra(&self, index: usize) -> Option<u32> {
        self.extras.get(index).copied()
    }
}

/// Decode a header (standalone function).
#[inline]
pub fn decode_header(format: &HeaderFormat, cursor: &ByteCursor) -> DecodeResult<RecordHeader> {
    format.decode_header(cursor)
}

/// Encode a header (standalone function).
#[inline]
pub fn encode_header(format: &HeaderFormat, header: &RecordHeader) -> Result<Vec<u8>> {
    format.encode_header(header)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fcgi_like() -> HeaderFormat {
        HeaderFormat::new("fcgi")
            .field(FieldSpec::Extra { width: 1 })
            .field(FieldSpec::Type {
                width: 1,
                mask: None,
            })
            .field(FieldSpec::Extra { width: 2 })
            .field(FieldSpec::Length {
                encoding: LengthEncoding::Fixed { width: 2 },
            })
            .field(FieldSpec::PadLength { width: 1 })
            .field(FieldSpec::Reserved { width: 1 })
            .padding(Padding::Explicit)
    }

    fn short_long() -> HeaderFormat {
        HeaderFormat::new("nv")
            .field(FieldSpec::Type {
                width: 1,
                mask: None,
            })
            .field(FieldSpec::Length {
                encoding: LengthEncoding::ShortLong,
            })
    }

    #[test]
    fn test_simple_tlv_decode() {
        let format = HeaderFormat::tlv("t", 1, 1, Endian::Big);
        let cursor = ByteCursor::from_static(&[0x01, 0x05, b'A', b'B', b'C', b'D', b'E']);
        let header = format.decode_header(&cursor).unwrap();

        assert_eq!(header.type_code, 1);
        assert_eq!(header.declared_length, 5);
        assert_eq!(header.header_len, 2);
        assert_eq!(header.padding, 0);
        assert_eq!(cursor.offset(), 0);
        assert!(format.check_fit(&header, &cursor, true).is_ok());
    }

    #[test]
    fn test_little_endian_fields() {
        let format = HeaderFormat::tlv("le", 2, 2, Endian::Little);
        let cursor = ByteCursor::from_static(&[0x02, 0x01, 0x03, 0x00, 1, 2, 3]);
        let header = format.decode_header(&cursor).unwrap();
        assert_eq!(header.type_code, 0x0102);
        assert_eq!(header.declared_length, 3);
    }

    #[test]
    fn test_truncated_header_is_incomplete() {
        let format = HeaderFormat::tlv("t", 2, 2, Endian::Big);
        let cursor = ByteCursor::from_static(&[0x00, 0x01, 0x00]);
        let err = format.decode_header(&cursor).unwrap_err();
        assert_eq!(
            err,
            DecodeError::Incomplete {
                offset: 0,
                needed: 1
            }
        );
    }

    #[test]
    fn test_short_payload_is_incomplete_not_malformed() {
        let format = HeaderFormat::tlv("t", 1, 1, Endian::Big);
        let cursor = ByteCursor::from_static(&[0x02, 0x0A, 0x00, 0x00]);
        let header = format.decode_header(&cursor).unwrap();
        let err = format.check_fit(&header, &cursor, false).unwrap_err();
        assert_eq!(
            err,
            DecodeError::Incomplete {
                offset: 0,
                needed: 8
            }
        );
    }

    #[test]
    fn test_short_long_lengths() {
        let format = short_long();

        let cursor = ByteCursor::from_static(&[0x07, 0x03, 1, 2, 3]);
        let header = format.decode_header(&cursor).unwrap();
        assert_eq!(header.declared_length, 3);
        assert_eq!(header.header_len, 2);

        let cursor = ByteCursor::from_static(&[0x07, 0x80, 0x00, 0x01, 0x00]);
        let header = format.decode_header(&cursor).unwrap();
        assert_eq!(header.declared_length, 256);
        assert_eq!(header.header_len, 5);

        // High bit of the 4-byte form is masked off.
        let cursor = ByteCursor::from_static(&[0x07, 0xFF, 0xFF, 0xFF, 0xFF]);
        let header = format.decode_header(&cursor).unwrap();
        assert_eq!(header.declared_length, 0x7FFF_FFFF);
    }

    #[test]
    fn test_short_long_truncated_long_form() {
        let format = short_long();
        let cursor = ByteCursor::from_static(&[0x07, 0x80, 0x00]);
        assert!(matches!(
            format.decode_header(&cursor),
            Err(DecodeError::Incomplete { needed: 2, .. })
        ));
    }

    #[test]
    fn test_explicit_padding_and_extras() {
        let format = fcgi_like();
        format.validate().unwrap();
        let cursor = ByteCursor::from_static(&[
            0x01, 0x06, 0x00, 0x2A, 0x00, 0x03, 0x05, 0x00, b'a', b'b', b'c', 0, 0, 0, 0, 0,
        ]);
        let header = format.decode_header(&cursor).unwrap();
        assert_eq!(header.type_code, 6);
        assert_eq!(header.extra(0), Some(1));
        assert_eq!(header.extra(1), Some(42));
        assert_eq!(header.declared_length, 3);
        assert_eq!(header.padding, 5);
        assert_eq!(header.total_len(), 16);
    }

    #[test]
    fn test_padding_past_end_of_complete_buffer_is_malformed() {
        let format = fcgi_like();
        let cursor = ByteCursor::from_static(&[
            0x01, 0x06, 0x00, 0x01, 0x00, 0x02, 0x04, 0x00, b'h', b'i', 0,
        ]);
        let header = format.decode_header(&cursor).unwrap();
        assert!(matches!(
            format.check_fit(&header, &cursor, true),
            Err(DecodeError::MalformedHeader { .. })
        ));
        assert!(matches!(
            format.check_fit(&header, &cursor, false),
            Err(DecodeError::Incomplete { needed: 3, .. })
        ));
    }

    #[test]
    fn test_shim6_option_alignment() {
        let format = HeaderFormat::new("shim6-opt")
            .field(FieldSpec::Type {
                width: 2,
                mask: Some(0x7FFF),
            })
            .field(FieldSpec::Length {
                encoding: LengthEncoding::Fixed { width: 2 },
            })
            .padding(Padding::AlignRecord { to: 8 });

        // padding = 7 - ((len + 3) % 8)
        for len in 0u32..40 {
            let header = RecordHeader::new(1, len);
            let bytes = format.build_record(&header, &vec![0xEE; len as usize]).unwrap();
            let decoded = format.decode_header(&ByteCursor::new(bytes.into())).unwrap();
            assert_eq!(decoded.padding as u32, 7 - ((len + 3) % 8));
            assert_eq!(decoded.total_len() % 8, 0);
        }
    }

    #[test]
    fn test_type_mask_moves_bits_to_flags() {
        let format = HeaderFormat::new("crit")
            .field(FieldSpec::Type {
                width: 2,
                mask: Some(0x7FFF),
            })
            .field(FieldSpec::Length {
                encoding: LengthEncoding::Fixed { width: 2 },
            });
        let cursor = ByteCursor::from_static(&[0x80, 0x05, 0x00, 0x00]);
        let header = format.decode_header(&cursor).unwrap();
        assert_eq!(header.type_code, 5);
        assert!(header.has_flag(0x8000));
    }

    #[test]
    fn test_type_mask_shifts_high_bits_down() {
        // 15-bit type above a critical bit.
        let format = HeaderFormat::new("opt")
            .field(FieldSpec::Type {
                width: 2,
                mask: Some(0xFFFE),
            })
            .field(FieldSpec::Length {
                encoding: LengthEncoding::Fixed { width: 2 },
            });
        let header = format
            .decode_header(&ByteCursor::from_static(&[0x00, 0x07, 0x00, 0x00]))
            .unwrap();
        assert_eq!(header.type_code, 3);
        assert!(header.has_flag(0x0001));

        let bytes = format
            .encode_header(&RecordHeader::new(3, 0).with_flags(1))
            .unwrap();
        assert_eq!(bytes, vec![0x00, 0x07, 0x00, 0x00]);
        assert!(format.encode_header(&RecordHeader::new(0x8000, 0)).is_err());
    }

    #[test]
    fn test_record_scoped_units() {
        // SHIM6 header: length in 8-octet units not counting the first 8.
        let format = HeaderFormat::new("shim6")
            .field(FieldSpec::Reserved { width: 1 })
            .field(FieldSpec::Length {
                encoding: LengthEncoding::Fixed { width: 1 },
            })
            .field(FieldSpec::Type {
                width: 1,
                mask: Some(0x7F),
            })
            .field(FieldSpec::Reserved { width: 1 })
            .length_scope(LengthScope::Record)
            .length_units(8, 1);
        format.validate().unwrap();

        let cursor = ByteCursor::from_static(&[0x3B, 0x01, 0x41, 0x00]);
        let header = format.decode_header(&cursor).unwrap();
        assert_eq!(header.header_len, 4);
        assert_eq!(header.declared_length, 12);
        assert_eq!(header.type_code, 0x41);
    }

    #[test]
    fn test_record_length_shorter_than_header_is_malformed() {
        let format = HeaderFormat::tlv("rec", 1, 1, Endian::Big).length_scope(LengthScope::Record);
        let cursor = ByteCursor::from_static(&[0x01, 0x01, 0x00]);
        assert!(matches!(
            format.decode_header(&cursor),
            Err(DecodeError::MalformedHeader { .. })
        ));
    }

    #[test]
    fn test_length_overflow_is_malformed() {
        let format = HeaderFormat::tlv("big", 1, 4, Endian::Big).length_units(16, 0);
        let cursor = ByteCursor::from_static(&[0x01, 0xFF, 0xFF, 0xFF, 0xFF]);
        assert!(matches!(
            format.decode_header(&cursor),
            Err(DecodeError::MalformedHeader { .. })
        ));
    }

    #[test]
    fn test_max_length_enforced() {
        let format = HeaderFormat::tlv("t", 1, 2, Endian::Big).max_length(100);
        let cursor = ByteCursor::from_static(&[0x01, 0x03, 0xE8]);
        let err = format.decode_header(&cursor).unwrap_err();
        assert!(err.to_string().contains("exceeds maximum"));
    }

    #[test]
    fn test_round_trip_all_strategies() {
        let formats = vec![
            HeaderFormat::tlv("tlv11", 1, 1, Endian::Big),
            HeaderFormat::tlv("tlv24", 2, 4, Endian::Little),
            short_long(),
            short_long().endian(Endian::Little),
            fcgi_like(),
            HeaderFormat::tlv("aligned", 2, 2, Endian::Big)
                .padding(Padding::AlignPayload { to: 4 }),
            HeaderFormat::tlv("record", 1, 2, Endian::Big).length_scope(LengthScope::Record),
        ];
        let lengths = [0usize, 1, 5, 127, 128, 200];

        for format in &formats {
            format.validate().unwrap();
            for &len in &lengths {
                let header = RecordHeader::new(9, 0).with_extras(&[1, 7]).with_padding(3);
                let payload = vec![0x5A; len];
                let bytes = format.build_record(&header, &payload).unwrap();

                let cursor = ByteCursor::new(bytes.clone().into());
                let decoded = format.decode_header(&cursor).unwrap();
                assert_eq!(decoded.type_code, 9, "{}", format.name);
                assert_eq!(decoded.declared_length as usize, len, "{}", format.name);
                assert_eq!(decoded.total_len(), bytes.len(), "{}", format.name);
                assert!(format.check_fit(&decoded, &cursor, true).is_ok());
            }
        }
    }

    #[test]
    fn test_short_long_flag_leads_in_any_byte_order() {
        for endian in [Endian::Big, Endian::Little] {
            let format = short_long().endian(endian);
            for len in [5usize, 127, 128, 256, 300, 70_000] {
                let bytes = format
                    .build_record(&RecordHeader::new(7, 0), &vec![0u8; len])
                    .unwrap();
                if len > 127 {
                    assert_eq!(bytes[1] & SHORT_LONG_FLAG, SHORT_LONG_FLAG);
                    assert_eq!(&bytes[1..5], &((len as u32) | 0x8000_0000).to_be_bytes());
                }

                let cursor = ByteCursor::new(bytes.clone().into());
                let decoded = format.decode_header(&cursor).unwrap();
                assert_eq!(decoded.declared_length as usize, len, "{:?}", endian);
                assert_eq!(decoded.total_len(), bytes.len(), "{:?}", endian);
            }
        }

        let bytes = short_long()
            .endian(Endian::Little)
            .build_record(&RecordHeader::new(7, 0), &[0u8; 256])
            .unwrap();
        assert_eq!(&bytes[..5], &[0x07u8, 0x80, 0x00, 0x01, 0x00]);
    }

    #[test]
    fn test_encode_rejects_values_too_wide() {
        let format = HeaderFormat::tlv("t", 1, 1, Endian::Big);
        assert!(format.encode_header(&RecordHeader::new(300, 0)).is_err());
        assert!(format.build_record(&RecordHeader::new(1, 0), &[0u8; 256]).is_err());
    }

    #[test]
    fn test_validate_rejects_bad_formats() {
        assert!(HeaderFormat::new("empty").validate().is_err());
        assert!(HeaderFormat::tlv("w", 5, 1, Endian::Big).validate().is_err());
        assert!(HeaderFormat::tlv("p", 1, 1, Endian::Big)
            .padding(Padding::Explicit)
            .validate()
            .is_err());
        assert!(HeaderFormat::tlv("a", 1, 1, Endian::Big)
            .padding(Padding::AlignRecord { to: 0 })
            .validate()
            .is_err());
        assert!(HeaderFormat::tlv("s", 1, 1, Endian::Big)
            .length_units(0, 0)
            .validate()
            .is_err());
    }

    #[test]
    fn test_json_round_trip() {
        let format = fcgi_like();
        let json = format.to_json().unwrap();
        let loaded = HeaderFormat::from_json(&json).unwrap();
        assert_eq!(loaded, format);
    }

    #[test]
    fn test_json_defaults() {
        let json = r#"{
            "name": "mini",
            "fields": [
                {"field": "type", "width": 1},
                {"field": "length", "encoding": {"kind": "short_long"}}
            ]
        }"#;
        let format = HeaderFormat::from_json(json).unwrap();
        assert_eq!(format.endian, Endian::Big);
        assert_eq!(format.length_scale, 1);
        assert_eq!(format.padding, Padding::None);
        assert_eq!(format.min_header_len(), 2);
    }
}
