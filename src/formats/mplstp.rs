//! MPLS-TP fault management messages.
//!
//! A 5-byte message header (version, message type, flags, refresh timer,
//! total TLV length) is followed by TLVs with a 1-byte type and a 1-byte
//! length.

use bytes::Bytes;

use crate::driver::{Driver, Scan};
use crate::error::{DecodeError, DecodeResult, Error, Result};
use crate::handler::{DispatchContext, Field, FieldValue};
use crate::protocol::{ByteCursor, Endian, HeaderFormat, RecordHeader};

/// Protocol name.
pub const NAME: &str = "mplstp-fm";

/// Message header size.
pub const HEADER_LEN: usize = 5;

pub const GLOBAL_ID: u32 = 1;
pub const IF_ID: u32 = 2;

/// Link down indication flag.
pub const FLAG_LINK_DOWN: u8 = 0x02;
/// Fault condition cleared flag.
pub const FLAG_CLEARED: u8 = 0x01;

/// Message type name.
pub fn message_type_name(message_type: u8) -> Option<&'static str> {
    Some(match message_type {
        0 => "No Return Code",
        1 => "Alarm-Indication Signal(A)",
        2 => "Lock-Report(L)",
        _ => return None,
    })
}

/// The TLV header.
pub fn tlv_format() -> HeaderFormat {
    HeaderFormat::tlv(NAME, 1, 1, Endian::Big)
}

/// A parsed fault management message.
#[derive(Debug, Clone)]
pub struct FmMessage {
    pub version: u8,
    pub message_type: u8,
    pub flags: u8,
    pub refresh_timer: u8,
    pub tlv_len: u8,
    pub tlvs: Scan,
}

impl FmMessage {
    #[inline]
    pub fn link_down(&self) -> bool {
        self.flags & FLAG_LINK_DOWN != 0
    }

    #[inline]
    pub fn cleared(&self) -> bool {
        self.flags & FLAG_CLEARED != 0
    }
}

/// Fault management message parser.
#[derive(Debug, Clone)]
pub struct FaultManagement {
    driver: Driver,
}

impl FaultManagement {
    pub fn new() -> Result<Self> {
        let driver = Driver::builder(tlv_format())
            .handle(GLOBAL_ID, "mplstp.global_id", global_id)
            .handle(IF_ID, "mplstp.if_id", if_id)
            .build()?;
        Ok(Self { driver })
    }

    pub fn driver(&self) -> &Driver {
        &self.driver
    }

    /// Parse a message.
    ///
    /// The TLVs cover exactly the total TLV length from the header; any bytes
    /// after them are ignored.
    pub fn parse(&self, buf: impl Into<Bytes>) -> DecodeResult<FmMessage> {
        let mut cursor = ByteCursor::new(buf.into());
        let first = cursor.read_u8()?;
        let message_type = cursor.read_u8()?;
        let flags = cursor.read_u8()?;
        let refresh_timer = cursor.read_u8()?;
        let tlv_len = cursor.read_u8()?;

        if (tlv_len as usize) > cursor.remaining() {
            return Err(DecodeError::malformed_header(
                4,
                format!(
                    "TLV length {} exceeds the {} bytes left",
                    tlv_len,
                    cursor.remaining()
                ),
            ));
        }
        let tlvs = self.driver.scan_cursor(cursor.sub_cursor(tlv_len as usize)?);

        Ok(FmMessage {
            version: first >> 4,
            message_type,
            flags,
            refresh_timer,
            tlv_len,
            tlvs,
        })
    }
}

/// Build a message around already encoded TLVs.
pub fn encode_message(
    message_type: u8,
    flags: u8,
    refresh_timer: u8,
    tlvs: &[u8],
) -> Result<Vec<u8>> {
    let tlv_len = u8::try_from(tlvs.len()).map_err(|_| {
        Error::Config(format!("{} TLV bytes do not fit a u8 length", tlvs.len()))
    })?;
    let mut out = vec![0x00, message_type, flags, refresh_timer, tlv_len];
    out.extend_from_slice(tlvs);
    Ok(out)
}

/// Encode an IF-ID TLV.
pub fn encode_if_id(node_id: [u8; 4], if_num: u32) -> Result<Vec<u8>> {
    let mut value = node_id.to_vec();
    value.extend_from_slice(&if_num.to_be_bytes());
    tlv_format().build_record(&RecordHeader::new(IF_ID, 0), &value)
}

/// Encode a GLOBAL-ID TLV.
pub fn encode_global_id(global_id: u32) -> Result<Vec<u8>> {
    tlv_format().build_record(&RecordHeader::new(GLOBAL_ID, 0), &global_id.to_be_bytes())
}

fn if_id(payload: &mut ByteCursor, _ctx: &mut DispatchContext<'_>) -> DecodeResult<Vec<Field>> {
    let at = payload.position();
    let node = payload.take(4)?;
    let node_id = FieldValue::ipv4(&node)
        .ok_or_else(|| DecodeError::malformed_payload(at, "bad node id"))?;
    let if_num = payload.read_u32(Endian::Big)?;
    Ok(vec![
        Field::new("node_id", at, 4, node_id),
        Field::new("if_num", at + 4, 4, FieldValue::UInt(if_num as u64)),
    ])
}

fn global_id(payload: &mut ByteCursor, _ctx: &mut DispatchContext<'_>) -> DecodeResult<Vec<Field>> {
    let at = payload.position();
    let id = payload.read_u32(Endian::Big)?;
    Ok(vec![Field::new("global_id", at, 4, FieldValue::UInt(id as u64))])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::ScanOutcome;
    use std::net::{IpAddr, Ipv4Addr};

    fn message() -> Vec<u8> {
        let mut tlvs = encode_if_id([10, 0, 0, 1], 42).unwrap();
        tlvs.extend(encode_global_id(0xBEEF).unwrap());
        encode_message(1, FLAG_LINK_DOWN, 20, &tlvs).unwrap()
    }

    #[test]
    fn test_parse_message() {
        let fm = FaultManagement::new().unwrap();
        let msg = fm.parse(message()).unwrap();

        assert_eq!(msg.message_type, 1);
        assert_eq!(message_type_name(msg.message_type), Some("Alarm-Indication Signal(A)"));
        assert!(msg.link_down());
        assert!(!msg.cleared());
        assert_eq!(msg.refresh_timer, 20);
        assert_eq!(msg.tlv_len, 16);

        let tlvs = &msg.tlvs;
        assert!(tlvs.is_clean());
        assert_eq!(tlvs.records.len(), 2);
        assert_eq!(tlvs.records[0].offset, 5);
        assert_eq!(
            tlvs.records[0].value("node_id"),
            Some(&FieldValue::IpAddr(IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1))))
        );
        assert_eq!(tlvs.records[0].value("if_num").unwrap().as_uint(), Some(42));
        assert_eq!(tlvs.records[1].value("global_id").unwrap().as_uint(), Some(0xBEEF));
    }

    #[test]
    fn test_tlv_len_past_end() {
        let mut buf = message();
        buf[4] = 40;
        let err = FaultManagement::new().unwrap().parse(buf).unwrap_err();
        assert!(matches!(err, DecodeError::MalformedHeader { offset: 4, .. }));
    }

    #[test]
    fn test_zero_tlv_len() {
        let msg = FaultManagement::new()
            .unwrap()
            .parse(encode_message(2, FLAG_CLEARED, 0, &[]).unwrap())
            .unwrap();
        assert!(msg.cleared());
        assert!(msg.tlvs.records.is_empty());
        assert_eq!(msg.tlvs.outcome, ScanOutcome::Done);
    }

    #[test]
    fn test_short_if_id_kept_raw() {
        let tlvs = [IF_ID as u8, 3, 10, 0, 0];
        let msg = FaultManagement::new()
            .unwrap()
            .parse(encode_message(0, 0, 0, &tlvs).unwrap())
            .unwrap();
        assert!(msg.tlvs.records[0].is_malformed());
    }
}
