//! SHIM6 control message options.
//!
//! Each option has a 2-byte field holding a 15-bit type above a critical
//! bit, a 2-byte content length, the content and padding that rounds the
//! whole option up to a multiple of 8 bytes. The critical bit ends up in the
//! record flags as [`CRITICAL`].

use bytes::Bytes;

use crate::driver::{Driver, Scan};
use crate::error::{DecodeError, DecodeResult, Result};
use crate::handler::{DispatchContext, Field, FieldValue};
use crate::protocol::{
    ByteCursor, Endian, FieldSpec, HeaderFormat, LengthEncoding, Padding, RecordHeader,
};

/// Protocol name.
pub const NAME: &str = "shim6";

/// Critical bit, as found in the record flags.
pub const CRITICAL: u32 = 0x0001;

pub const RESPONDER_VALIDATOR: u32 = 1;
pub const LOCATOR_LIST: u32 = 2;
pub const LOCATOR_PREFERENCES: u32 = 3;
pub const CGA_PARAMETER_DATA_STRUCTURE: u32 = 4;
pub const CGA_SIGNATURE: u32 = 5;
pub const ULID_PAIR: u32 = 6;
pub const FORKED_INSTANCE_ID: u32 = 7;

/// Option holding a further option list.
///
/// Taken from the top of the type space, which has no assigned options; it
/// gives nested option lists a wire form.
pub const CONTAINER: u32 = 0x7FFF;

/// Option type name.
pub fn type_name(type_code: u32) -> Option<&'static str> {
    Some(match type_code {
        RESPONDER_VALIDATOR => "Responder Validator",
        LOCATOR_LIST => "Locator List",
        LOCATOR_PREFERENCES => "Locator Preferences",
        CGA_PARAMETER_DATA_STRUCTURE => "CGA Parameter Data Structure",
        CGA_SIGNATURE => "CGA Signature",
        ULID_PAIR => "ULID Pair",
        FORKED_INSTANCE_ID => "Forked Instance Identifier",
        CONTAINER => "Container",
        _ => return None,
    })
}

/// Verification method name used in locator lists.
pub fn verification_method_name(method: u8) -> Option<&'static str> {
    Some(match method {
        1 => "HBA",
        2 => "CGA",
        _ => return None,
    })
}

/// Length of a SHIM6 message from its header extension length field.
#[inline]
pub fn message_len(hdr_ext_len: u8) -> usize {
    (hdr_ext_len as usize + 1) << 3
}

/// The option header.
pub fn option_format() -> HeaderFormat {
    HeaderFormat::new("shim6-option")
        .endian(Endian::Big)
        .field(FieldSpec::Type {
            width: 2,
            mask: Some(0xFFFE),
        })
        .field(FieldSpec::Length {
            encoding: LengthEncoding::Fixed { width: 2 },
        })
        .padding(Padding::AlignRecord { to: 8 })
}

/// A driver for option lists.
pub fn driver() -> Result<Driver> {
    Driver::builder(option_format())
        .handle(RESPONDER_VALIDATOR, "shim6.validator", |p, _| bytes(p, "validator"))
        .handle(LOCATOR_LIST, "shim6.locator_list", locator_list)
        .handle(LOCATOR_PREFERENCES, "shim6.locator_preferences", locator_preferences)
        .handle(CGA_PARAMETER_DATA_STRUCTURE, "shim6.cga_pds", |p, _| {
            bytes(p, "cga_parameter_data_structure")
        })
        .handle(CGA_SIGNATURE, "shim6.cga_signature", |p, _| bytes(p, "cga_signature"))
        .handle(ULID_PAIR, "shim6.ulid_pair", ulid_pair)
        .handle(FORKED_INSTANCE_ID, "shim6.fii", forked_instance_id)
        .handle(CONTAINER, "shim6.container", container)
        .build()
}

/// Scan an option list.
pub fn scan_options(buf: impl Into<Bytes>) -> Result<Scan> {
    Ok(driver()?.scan(buf))
}

/// Build one option with its padding.
pub fn encode_option(type_code: u32, critical: bool, content: &[u8]) -> Result<Vec<u8>> {
    let flags = if critical { CRITICAL } else { 0 };
    let header = RecordHeader::new(type_code, 0).with_flags(flags);
    option_format().build_record(&header, content)
}

fn bytes(payload: &mut ByteCursor, name: &'static str) -> DecodeResult<Vec<Field>> {
    let at = payload.position();
    let len = payload.remaining();
    let data = payload.take(len)?;
    Ok(vec![Field::new(name, at, len, FieldValue::Bytes(data))])
}

fn ipv6(payload: &mut ByteCursor, name: &'static str) -> DecodeResult<Field> {
    let at = payload.position();
    let raw = payload.take(16)?;
    let value = FieldValue::ipv6(&raw)
        .ok_or_else(|| DecodeError::malformed_payload(at, "bad IPv6 address"))?;
    Ok(Field::new(name, at, 16, value))
}

fn generation(payload: &mut ByteCursor) -> DecodeResult<Field> {
    let at = payload.position();
    let value = payload.read_u32(Endian::Big)?;
    Ok(Field::new("generation", at, 4, FieldValue::UInt(value as u64)))
}

fn locator_list(
    payload: &mut ByteCursor,
    _ctx: &mut DispatchContext<'_>,
) -> DecodeResult<Vec<Field>> {
    let mut fields = vec![generation(payload)?];

    let at = payload.position();
    let count = payload.read_u8()? as usize;
    fields.push(Field::new("locator_count", at, 1, FieldValue::UInt(count as u64)));

    for _ in 0..count {
        let at = payload.position();
        let method = payload.read_u8()?;
        fields.push(Field::new(
            "verification_method",
            at,
            1,
            FieldValue::UInt(method as u64),
        ));
    }
    // Pads generation, count and methods to an 8-byte boundary.
    payload.advance(7 - count % 8)?;

    for _ in 0..count {
        fields.push(ipv6(payload, "locator")?);
    }
    Ok(fields)
}

fn locator_preferences(
    payload: &mut ByteCursor,
    _ctx: &mut DispatchContext<'_>,
) -> DecodeResult<Vec<Field>> {
    let mut fields = vec![generation(payload)?];

    let at = payload.position();
    let element_len = payload.read_u8()? as usize;
    if !(1..=3).contains(&element_len) {
        return Err(DecodeError::malformed_payload(
            at,
            format!("invalid element length: {}", element_len),
        ));
    }
    fields.push(Field::new(
        "element_len",
        at,
        1,
        FieldValue::UInt(element_len as u64),
    ));

    const PARTS: [&str; 3] = ["flags", "priority", "weight"];
    while payload.remaining() >= element_len {
        for &name in &PARTS[..element_len] {
            let at = payload.position();
            let value = payload.read_u8()?;
            fields.push(Field::new(name, at, 1, FieldValue::UInt(value as u64)));
        }
    }
    Ok(fields)
}

fn ulid_pair(payload: &mut ByteCursor, _ctx: &mut DispatchContext<'_>) -> DecodeResult<Vec<Field>> {
    payload.advance(4)?;
    Ok(vec![
        ipv6(payload, "sender_ulid")?,
        ipv6(payload, "receiver_ulid")?,
    ])
}

fn forked_instance_id(
    payload: &mut ByteCursor,
    _ctx: &mut DispatchContext<'_>,
) -> DecodeResult<Vec<Field>> {
    let at = payload.position();
    let id = payload.read_u32(Endian::Big)?;
    Ok(vec![Field::new("forked_instance_id", at, 4, FieldValue::UInt(id as u64))])
}

fn container(payload: &mut ByteCursor, ctx: &mut DispatchContext<'_>) -> DecodeResult<Vec<Field>> {
    let at = payload.position();
    let len = payload.remaining();
    let inner = payload.sub_cursor(len)?;
    let options = ctx.scan_nested(&option_format(), inner)?;
    Ok(vec![Field::new("options", at, len, FieldValue::Records(options))])
}
