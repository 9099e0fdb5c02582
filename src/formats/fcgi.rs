//! FastCGI records.
//!
//! Every record starts with an 8-byte header:
//!
//! ```text
//! version(1) type(1) request_id(2) content_length(2) padding_length(1) reserved(1)
//! ```
//!
//! followed by `content_length` bytes of content and `padding_length` bytes
//! of padding. `request_id` ends up in `extras[1]`, `version` in `extras[0]`.

use crate::driver::Driver;
use crate::error::{DecodeResult, Result};
use crate::handler::{DecodedRecord, DispatchContext, Field, FieldValue};
use crate::protocol::{
    ByteCursor, Endian, FieldSpec, HeaderFormat, LengthEncoding, Padding, RecordHeader,
    SHORT_LONG_FLAG, SHORT_LONG_MASK, SHORT_LONG_MAX_SHORT,
};
use crate::sniff::DriverDissector;

/// Protocol name.
pub const NAME: &str = "fcgi";

/// The only FastCGI version.
pub const VERSION_1: u8 = 1;

/// Fixed header size.
pub const HEADER_LEN: usize = 8;

pub const BEGIN_REQUEST: u32 = 1;
pub const ABORT_REQUEST: u32 = 2;
pub const END_REQUEST: u32 = 3;
pub const PARAMS: u32 = 4;
pub const STDIN: u32 = 5;
pub const STDOUT: u32 = 6;
pub const STDERR: u32 = 7;
pub const DATA: u32 = 8;
pub const GET_VALUES: u32 = 9;
pub const GET_VALUES_RESULT: u32 = 10;
pub const UNKNOWN_TYPE: u32 = 11;

/// `flags` bit of BEGIN_REQUEST: keep the connection open after the request.
pub const KEEP_CONN: u8 = 1;

/// Record type name.
pub fn type_name(type_code: u32) -> Option<&'static str> {
    Some(match type_code {
        BEGIN_REQUEST => "FCGI_BEGIN_REQUEST",
        ABORT_REQUEST => "FCGI_ABORT_REQUEST",
        END_REQUEST => "FCGI_END_REQUEST",
        PARAMS => "FCGI_PARAMS",
        STDIN => "FCGI_STDIN",
        STDOUT => "FCGI_STDOUT",
        STDERR => "FCGI_STDERR",
        DATA => "FCGI_DATA",
        GET_VALUES => "FCGI_GET_VALUES",
        GET_VALUES_RESULT => "FCGI_GET_VALUES_RESULT",
        UNKNOWN_TYPE => "FCGI_UNKNOWN_TYPE",
        _ => return None,
    })
}

/// Application role name.
pub fn role_name(role: u16) -> Option<&'static str> {
    Some(match role {
        1 => "FCGI_RESPONDER",
        2 => "FCGI_AUTHORIZER",
        3 => "FCGI_FILTER",
        _ => return None,
    })
}

/// Protocol status name.
pub fn protocol_status_name(status: u8) -> Option<&'static str> {
    Some(match status {
        0 => "FCGI_REQUEST_COMPLETE",
        1 => "FCGI_CANT_MPX_CONN",
        2 => "FCGI_OVERLOADED",
        3 => "FCGI_UNKNOWN_ROLE",
        _ => return None,
    })
}

/// The FastCGI record header.
pub fn header_format() -> HeaderFormat {
    HeaderFormat::new(NAME)
        .endian(Endian::Big)
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

/// A driver with handlers for every FastCGI record type.
pub fn driver() -> Result<Driver> {
    Driver::builder(header_format())
        .handle(BEGIN_REQUEST, "fcgi.begin_request", begin_request)
        .handle(ABORT_REQUEST, "fcgi.abort_request", empty)
        .handle(END_REQUEST, "fcgi.end_request", end_request)
        .handle(PARAMS, "fcgi.params", name_value_pairs)
        .handle(STDIN, "fcgi.stdin", stream)
        .handle(STDOUT, "fcgi.stdout", stream)
        .handle(STDERR, "fcgi.stderr", stream)
        .handle(DATA, "fcgi.data", stream)
        .handle(GET_VALUES, "fcgi.get_values", name_value_pairs)
        .handle(GET_VALUES_RESULT, "fcgi.get_values_result", name_value_pairs)
        .handle(UNKNOWN_TYPE, "fcgi.unknown_type", unknown_type)
        .build()
}

/// Dissector for a [`ProtocolTable`](crate::sniff::ProtocolTable).
pub fn dissector() -> Result<DriverDissector> {
    Ok(DriverDissector::new(NAME, sniff, driver()?))
}

/// Score a buffer as FastCGI.
///
/// Looks at the first header only: version 1, a known record type and a
/// zero reserved byte. A first record that fits in the buffer scores higher.
pub fn sniff(buf: &[u8]) -> Option<u32> {
    if buf.len() < HEADER_LEN || buf[0] != VERSION_1 || buf[7] != 0 {
        return None;
    }
    type_name(buf[1] as u32)?;

    let content_len = u16::from_be_bytes([buf[4], buf[5]]) as usize;
    let total = HEADER_LEN + content_len + buf[6] as usize;
    if total <= buf.len() {
        Some(60)
    } else {
        Some(30)
    }
}

/// Build one record. Content is padded to a multiple of 8 bytes.
pub fn encode_record(type_code: u32, request_id: u16, content: &[u8]) -> Result<Vec<u8>> {
    let padding = (8 - content.len() % 8) % 8;
    let header = RecordHeader::new(type_code, 0)
        .with_extras(&[VERSION_1 as u32, request_id as u32])
        .with_padding(padding);
    header_format().build_record(&header, content)
}

/// Encode name/value pairs as PARAMS or GET_VALUES content.
pub fn encode_pairs<'a>(pairs: impl IntoIterator<Item = (&'a str, &'a str)>) -> Vec<u8> {
    fn put_len(out: &mut Vec<u8>, len: usize) {
        if len as u32 <= SHORT_LONG_MAX_SHORT {
            out.push(len as u8);
        } else {
            let long = (len as u32 & SHORT_LONG_MASK) | 0x8000_0000;
            out.extend_from_slice(&long.to_be_bytes());
        }
    }

    let mut out = Vec::new();
    for (name, value) in pairs {
        put_len(&mut out, name.len());
        put_len(&mut out, value.len());
        out.extend_from_slice(name.as_bytes());
        out.extend_from_slice(value.as_bytes());
    }
    out
}

/// Name/value pairs of a decoded PARAMS, GET_VALUES or GET_VALUES_RESULT
/// record, in wire order.
pub fn pairs(record: &DecodedRecord) -> Vec<(&str, &str)> {
    let mut out = Vec::new();
    let mut name = None;
    for field in &record.fields {
        match (field.name, &field.value) {
            ("name", FieldValue::Text(text)) => name = Some(text.as_str()),
            ("value", FieldValue::Text(text)) => {
                if let Some(name) = name.take() {
                    out.push((name, text.as_str()));
                }
            }
            _ => {}
        }
    }
    out
}

fn begin_request(
    payload: &mut ByteCursor,
    _ctx: &mut DispatchContext<'_>,
) -> DecodeResult<Vec<Field>> {
    let at = payload.position();
    let role = payload.read_u16(Endian::Big)?;
    let flags = payload.read_u8()?;
    payload.advance(5)?;

    let mut fields = vec![Field::new("role", at, 2, FieldValue::UInt(role as u64))];
    if let Some(name) = role_name(role) {
        fields.push(Field::new("role_name", at, 2, FieldValue::Text(name.into())));
    }
    fields.push(Field::new("flags", at + 2, 1, FieldValue::UInt(flags as u64)));
    fields.push(Field::new(
        "keep_conn",
        at + 2,
        1,
        FieldValue::Bool(flags & KEEP_CONN != 0),
    ));
    Ok(fields)
}

fn end_request(
    payload: &mut ByteCursor,
    _ctx: &mut DispatchContext<'_>,
) -> DecodeResult<Vec<Field>> {
    let at = payload.position();
    let app_status = payload.read_u32(Endian::Big)?;
    let protocol_status = payload.read_u8()?;
    payload.advance(3)?;

    let mut fields = vec![
        Field::new("app_status", at, 4, FieldValue::UInt(app_status as u64)),
        Field::new(
            "protocol_status",
            at + 4,
            1,
            FieldValue::UInt(protocol_status as u64),
        ),
    ];
    if let Some(name) = protocol_status_name(protocol_status) {
        fields.push(Field::new(
            "protocol_status_name",
            at + 4,
            1,
            FieldValue::Text(name.into()),
        ));
    }
    Ok(fields)
}

/// Read a 1-byte or 4-byte name/value length.
fn read_pair_len(payload: &mut ByteCursor) -> DecodeResult<usize> {
    if payload.peek_u8(0)? & SHORT_LONG_FLAG == 0 {
        Ok(payload.read_u8()? as usize)
    } else {
        Ok((payload.read_u32(Endian::Big)? & SHORT_LONG_MASK) as usize)
    }
}

fn name_value_pairs(
    payload: &mut ByteCursor,
    _ctx: &mut DispatchContext<'_>,
) -> DecodeResult<Vec<Field>> {
    let mut fields = Vec::new();
    while !payload.is_exhausted() {
        let name_len = read_pair_len(payload)?;
        let value_len = read_pair_len(payload)?;

        let name_at = payload.position();
        let name = payload.take(name_len)?;
        let value_at = payload.position();
        let value = payload.take(value_len)?;

        fields.push(Field::new("name", name_at, name_len, FieldValue::text(&name)));
        fields.push(Field::new("value", value_at, value_len, FieldValue::text(&value)));
    }
    Ok(fields)
}

/// STDIN, STDOUT, STDERR and DATA: raw bytes; empty content ends the stream.
fn stream(payload: &mut ByteCursor, _ctx: &mut DispatchContext<'_>) -> DecodeResult<Vec<Field>> {
    let at = payload.position();
    if payload.is_exhausted() {
        return Ok(vec![Field::new("end_of_stream", at, 0, FieldValue::Bool(true))]);
    }
    let len = payload.remaining();
    let data = payload.take(len)?;
    Ok(vec![Field::new("data", at, len, FieldValue::Bytes(data))])
}

fn empty(_payload: &mut ByteCursor, _ctx: &mut DispatchContext<'_>) -> DecodeResult<Vec<Field>> {
    Ok(Vec::new())
}

fn unknown_type(
    payload: &mut ByteCursor,
    _ctx: &mut DispatchContext<'_>,
) -> DecodeResult<Vec<Field>> {
    let at = payload.position();
    let unknown = payload.read_u8()?;
    payload.advance(7)?;
    Ok(vec![Field::new("type", at, 1, FieldValue::UInt(unknown as u64))])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostics::DiagnosticKind;
    use crate::driver::ScanOutcome;

    fn begin(request_id: u16, role: u16, flags: u8) -> Vec<u8> {
        let mut body = role.to_be_bytes().to_vec();
        body.push(flags);
        body.extend_from_slice(&[0; 5]);
        encode_record(BEGIN_REQUEST, request_id, &body).unwrap()
    }

    #[test]
    fn test_header_layout() {
        let bytes = encode_record(STDOUT, 0x0102, b"abc").unwrap();
        assert_eq!(&bytes[..8], &[1, 6, 0x01, 0x02, 0x00, 0x03, 0x05, 0x00]);
        assert_eq!(bytes.len(), 16);
    }

    #[test]
    fn test_begin_request() {
        let scan = driver().unwrap().scan(begin(1, 1, KEEP_CONN));
        assert!(scan.is_clean());
        let record = &scan.records[0];
        assert_eq!(record.handler, "fcgi.begin_request");
        assert_eq!(record.header.extra(1), Some(1));
        assert_eq!(record.value("role").unwrap().as_uint(), Some(1));
        assert_eq!(record.value("role_name").unwrap().as_text(), Some("FCGI_RESPONDER"));
        assert_eq!(record.value("keep_conn"), Some(&FieldValue::Bool(true)));
    }

    #[test]
    fn test_end_request() {
        let body = [0, 0, 0, 7, 2, 0, 0, 0];
        let scan = driver()
            .unwrap()
            .scan(encode_record(END_REQUEST, 3, &body).unwrap());
        let record = &scan.records[0];
        assert_eq!(record.value("app_status").unwrap().as_uint(), Some(7));
        assert_eq!(
            record.value("protocol_status_name").unwrap().as_text(),
            Some("FCGI_OVERLOADED")
        );
    }

    #[test]
    fn test_params_short_and_long_lengths() {
        let long_value = "x".repeat(200);
        let content = encode_pairs([("SCRIPT_NAME", "/index.php"), ("QUERY", long_value.as_str())]);
        // 200 needs the 4-byte form.
        assert_eq!(&content[24..28], &[0x80, 0x00, 0x00, 0xC8]);

        let scan = driver()
            .unwrap()
            .scan(encode_record(PARAMS, 1, &content).unwrap());
        assert!(scan.is_clean());
        let pairs = pairs(&scan.records[0]);
        assert_eq!(pairs.len(), 2);
        assert_eq!(pairs[0], ("SCRIPT_NAME", "/index.php"));
        assert_eq!(pairs[1].1.len(), 200);
    }

    #[test]
    fn test_params_overrun_is_caught() {
        // Name length 9 but only 2 bytes follow.
        let scan = driver()
            .unwrap()
            .scan(encode_record(PARAMS, 1, &[9, 0, b'a', b'b']).unwrap());
        assert_eq!(scan.outcome, ScanOutcome::Done);
        assert!(scan.records[0].is_malformed());
        assert_eq!(scan.diagnostics_of(DiagnosticKind::MalformedPayload).count(), 1);
    }

    #[test]
    fn test_request_sequence() {
        let mut buf = begin(1, 1, 0);
        buf.extend(encode_record(PARAMS, 1, &encode_pairs([("A", "1")])).unwrap());
        buf.extend(encode_record(PARAMS, 1, &[]).unwrap());
        buf.extend(encode_record(STDIN, 1, &[]).unwrap());
        buf.extend(encode_record(STDOUT, 1, b"Content-type: text/html\r\n\r\nhi").unwrap());
        buf.extend(encode_record(END_REQUEST, 1, &[0; 8]).unwrap());

        let scan = driver().unwrap().scan(buf.clone());
        assert!(scan.is_clean(), "{:?}", scan.diagnostics);
        assert_eq!(scan.consumed, buf.len());
        let types: Vec<u32> = scan.records.iter().map(|r| r.type_code()).collect();
        assert_eq!(types, vec![BEGIN_REQUEST, PARAMS, PARAMS, STDIN, STDOUT, END_REQUEST]);
        assert_eq!(scan.records[3].value("end_of_stream"), Some(&FieldValue::Bool(true)));
        assert!(scan.records[4].value("data").unwrap().as_bytes().unwrap().ends_with(b"hi"));
    }

    #[test]
    fn test_sniff() {
        let record = begin(1, 1, 0);
        assert_eq!(sniff(&record), Some(60));
        assert_eq!(sniff(&record[..10]), Some(30));
        assert_eq!(sniff(&record[..7]), None);

        let mut bad_version = record.clone();
        bad_version[0] = 2;
        assert_eq!(sniff(&bad_version), None);

        let mut bad_type = record;
        bad_type[1] = 12;
        assert_eq!(sniff(&bad_type), None);
    }
}
