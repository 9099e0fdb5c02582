//! MikroTik Neighbor Discovery Protocol.
//!
//! A UDP datagram (port 5678) holds a 4-byte preamble followed by TLVs with
//! a 2-byte type and a 2-byte length, both big-endian. The length covers the
//! value only.

use bytes::Bytes;
use serde::Serialize;

use crate::diagnostics::DiagnosticsSink;
use crate::driver::{Driver, Scan, ScanOutcome};
use crate::error::{DecodeError, DecodeResult, Result};
use crate::handler::{DispatchContext, Field, FieldValue};
use crate::protocol::{ByteCursor, Endian, HeaderFormat, RecordHeader};
use crate::sniff::Dissector;

/// Protocol name.
pub const NAME: &str = "mndp";

/// UDP port MNDP is sent to and from.
pub const PORT: u16 = 5678;

/// Preamble size.
pub const PREAMBLE_LEN: usize = 4;

pub const MAC_ADDRESS: u32 = 1;
pub const IDENTITY: u32 = 5;
pub const VERSION: u32 = 7;
pub const PLATFORM: u32 = 8;
pub const UPTIME: u32 = 10;
pub const SOFTWARE_ID: u32 = 11;
pub const BOARD: u32 = 12;
pub const UNPACK: u32 = 14;
pub const IPV6_ADDRESS: u32 = 15;
pub const INTERFACE_NAME: u32 = 16;
pub const IPV4_ADDRESS: u32 = 17;

/// TLV type name.
pub fn type_name(type_code: u32) -> Option<&'static str> {
    Some(match type_code {
        MAC_ADDRESS => "MAC-Address",
        IDENTITY => "Identity",
        VERSION => "Version",
        PLATFORM => "Platform",
        UPTIME => "Uptime",
        SOFTWARE_ID => "Software-ID",
        BOARD => "Board",
        UNPACK => "Unpack",
        IPV6_ADDRESS => "IPv6-Address",
        INTERFACE_NAME => "Interface name",
        IPV4_ADDRESS => "IPv4-Address",
        _ => return None,
    })
}

/// The 4 bytes in front of the TLVs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Preamble {
    pub unknown: [u8; 2],
    pub seq_no: u16,
}

impl Preamble {
    /// Read the preamble and advance past it.
    pub fn read(cursor: &mut ByteCursor) -> DecodeResult<Self> {
        let unknown = cursor.peek_bytes(0, 2)?;
        let unknown = [unknown[0], unknown[1]];
        cursor.advance(2)?;
        let seq_no = cursor.read_u16(Endian::Big)?;
        Ok(Self { unknown, seq_no })
    }
}

/// A parsed datagram.
#[derive(Debug, Clone)]
pub struct Packet {
    pub preamble: Preamble,
    /// TLVs, with offsets into the whole datagram.
    pub scan: Scan,
}

/// The TLV header.
pub fn header_format() -> HeaderFormat {
    HeaderFormat::tlv(NAME, 2, 2, Endian::Big)
}

/// MNDP datagram parser.
#[derive(Debug, Clone)]
pub struct Mndp {
    driver: Driver,
}

impl Mndp {
    pub fn new() -> Result<Self> {
        let driver = Driver::builder(header_format())
            .handle(MAC_ADDRESS, "mndp.mac", mac_address)
            .handle(IDENTITY, "mndp.identity", text)
            .handle(VERSION, "mndp.version", text)
            .handle(PLATFORM, "mndp.platform", text)
            .handle(UPTIME, "mndp.uptime", uptime)
            .handle(SOFTWARE_ID, "mndp.softwareid", text)
            .handle(BOARD, "mndp.board", text)
            .handle(UNPACK, "mndp.unpack", unpack)
            .handle(IPV6_ADDRESS, "mndp.ipv6address", ipv6_address)
            .handle(INTERFACE_NAME, "mndp.interfacename", text)
            .handle(IPV4_ADDRESS, "mndp.ipv4address", ipv4_address)
            .build()?;
        Ok(Self { driver })
    }

    /// The TLV driver.
    pub fn driver(&self) -> &Driver {
        &self.driver
    }

    /// Parse a datagram.
    ///
    /// Fails only when the preamble itself is cut short.
    pub fn parse(&self, buf: impl Into<Bytes>) -> DecodeResult<Packet> {
        let mut cursor = ByteCursor::new(buf.into());
        let preamble = Preamble::read(&mut cursor)?;
        let scan = self.driver.scan_cursor(cursor);
        Ok(Packet { preamble, scan })
    }
}

impl Dissector for Mndp {
    fn name(&self) -> &'static str {
        NAME
    }

    fn sniff(&self, buf: &[u8]) -> Option<u32> {
        sniff(buf)
    }

    fn dissect(&self, buf: Bytes) -> Scan {
        match self.parse(buf) {
            Ok(packet) => packet.scan,
            Err(err) => {
                let mut sink = DiagnosticsSink::new();
                sink.record(&err, 0);
                Scan {
                    records: Vec::new(),
                    diagnostics: sink.drain(),
                    outcome: ScanOutcome::Aborted { offset: 0 },
                    consumed: 0,
                }
            }
        }
    }
}

/// Score a datagram as MNDP.
///
/// Needs at least a preamble and one TLV header. The first TLV must be a
/// 6-byte MAC address that fits, and anything after it must have room for
/// another TLV header.
pub fn sniff(buf: &[u8]) -> Option<u32> {
    if buf.len() < PREAMBLE_LEN + 4 {
        return None;
    }
    let tlv_type = u16::from_be_bytes([buf[4], buf[5]]);
    let tlv_len = u16::from_be_bytes([buf[6], buf[7]]) as usize;
    if tlv_type as u32 != MAC_ADDRESS || tlv_len != 6 {
        return None;
    }
    let rest = buf.len().checked_sub(PREAMBLE_LEN + 4 + tlv_len)?;
    if rest > 0 && rest < 4 {
        return None;
    }
    Some(70)
}

/// Build a datagram from a sequence number and `(type, value)` TLVs.
pub fn encode_packet(seq_no: u16, tlvs: &[(u32, &[u8])]) -> Result<Vec<u8>> {
    let format = header_format();
    let mut out = vec![0, 0];
    out.extend_from_slice(&seq_no.to_be_bytes());
    for (type_code, value) in tlvs {
        out.extend(format.build_record(&RecordHeader::new(*type_code, 0), value)?);
    }
    Ok(out)
}

/// Decode a fixed-size value; an empty TLV carries no value.
fn fixed(
    payload: &mut ByteCursor,
    name: &'static str,
    size: usize,
    value: impl FnOnce(&[u8]) -> Option<FieldValue>,
) -> DecodeResult<Vec<Field>> {
    if payload.is_exhausted() {
        return Ok(Vec::new());
    }
    let at = payload.position();
    if payload.remaining() != size {
        return Err(DecodeError::malformed_payload(
            at,
            format!("{} needs {} bytes, got {}", name, size, payload.remaining()),
        ));
    }
    let bytes = payload.take(size)?;
    let value = value(&bytes)
        .ok_or_else(|| DecodeError::malformed_payload(at, format!("bad {} value", name)))?;
    Ok(vec![Field::new(name, at, size, value)])
}

fn mac_address(
    payload: &mut ByteCursor,
    _ctx: &mut DispatchContext<'_>,
) -> DecodeResult<Vec<Field>> {
    fixed(payload, "mac", 6, FieldValue::mac)
}

fn ipv4_address(
    payload: &mut ByteCursor,
    _ctx: &mut DispatchContext<'_>,
) -> DecodeResult<Vec<Field>> {
    fixed(payload, "ipv4", 4, FieldValue::ipv4)
}

fn ipv6_address(
    payload: &mut ByteCursor,
    _ctx: &mut DispatchContext<'_>,
) -> DecodeResult<Vec<Field>> {
    fixed(payload, "ipv6", 16, FieldValue::ipv6)
}

fn uptime(payload: &mut ByteCursor, _ctx: &mut DispatchContext<'_>) -> DecodeResult<Vec<Field>> {
    // Seconds, little-endian unlike the rest of the datagram.
    fixed(payload, "uptime", 4, |b| {
        Some(FieldValue::UInt(Endian::Little.uint(b) as u64))
    })
}

fn unpack(payload: &mut ByteCursor, _ctx: &mut DispatchContext<'_>) -> DecodeResult<Vec<Field>> {
    let mut fields = fixed(payload, "unpack", 1, |b| Some(FieldValue::UInt(b[0] as u64)))?;
    if let Some(field) = fields.first() {
        if field.value.as_uint() == Some(1) {
            let (at, len) = (field.offset, field.len);
            fields.push(Field::new("unpack_name", at, len, FieldValue::Text("None".into())));
        }
    }
    Ok(fields)
}

fn text(payload: &mut ByteCursor, _ctx: &mut DispatchContext<'_>) -> DecodeResult<Vec<Field>> {
    let at = payload.position();
    let len = payload.remaining();
    let bytes = payload.take(len)?;
    Ok(vec![Field::new("text", at, len, FieldValue::text(&bytes))])
}
