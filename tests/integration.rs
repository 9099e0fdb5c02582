//! Integration tests for tlvscan.
//!
//! These tests drive the public API across modules: buffer scans, stream
//! sessions, async sources, ready-made formats and reports.

use tlvscan::formats::{fcgi, mndp, protocol_table, shim6};
use tlvscan::handler::{Field, FieldValue};
use tlvscan::protocol::{Awaiting, Endian, HeaderFormat};
use tlvscan::source::{hexdump, read_stream};
use tlvscan::{DecodeError, DiagnosticKind, Driver, Report, ScanOutcome};

fn echo_driver() -> Driver {
    Driver::builder(HeaderFormat::tlv("echo", 1, 1, Endian::Big))
        .handle(1, "echo", |payload, _ctx| {
            let at = payload.position();
            let data = payload.take(payload.remaining())?;
            Ok(vec![Field::new("data", at, data.len(), FieldValue::Bytes(data))])
        })
        .build()
        .unwrap()
}

/// Records nested `depth` times inside type 9 wrappers.
fn nested(depth: usize) -> Vec<u8> {
    let mut buf = vec![1, 0];
    for _ in 0..depth {
        let mut outer = vec![9, buf.len() as u8];
        outer.extend(buf);
        buf = outer;
    }
    buf
}

fn nesting_driver(max_depth: usize) -> Driver {
    let format = HeaderFormat::tlv("nest", 1, 1, Endian::Big);
    let inner = format.clone();
    Driver::builder(format)
        .handle(1, "leaf", |_payload, _ctx| Ok(Vec::new()))
        .handle(9, "wrap", move |payload, ctx| {
            let at = payload.position();
            let len = payload.remaining();
            let records = ctx.scan_nested(&inner, payload.sub_cursor(len)?)?;
            Ok(vec![Field::new("inner", at, len, FieldValue::Records(records))])
        })
        .max_depth(max_depth)
        .build()
        .unwrap()
}

#[test]
fn test_echo_record() {
    let scan = echo_driver().scan(vec![1, 5, b'A', b'B', b'C', b'D', b'E']);

    assert_eq!(scan.consumed, 7);
    assert_eq!(scan.outcome, ScanOutcome::Done);
    assert!(scan.diagnostics.is_empty());
    assert_eq!(scan.records.len(), 1);
    assert_eq!(
        scan.records[0].value("data").and_then(|v| v.as_bytes()),
        Some(&b"ABCDE"[..])
    );
}

#[test]
fn test_chunking_matches_whole_buffer() {
    let driver = echo_driver();
    let input: Vec<u8> = [
        &[1, 3, 1, 2, 3][..],
        &[7, 2, 0xAA, 0xBB][..],
        &[1, 0][..],
        &[1, 4, 9, 8, 7, 6][..],
    ]
    .concat();
    let whole = driver.scan(input.clone());

    for chunk_len in [1, 2, 3, 5, input.len()] {
        let mut session = driver.session();
        let mut records = Vec::new();
        for chunk in input.chunks(chunk_len) {
            records.extend(session.feed(chunk).unwrap().records);
        }
        assert_eq!(session.outcome(), ScanOutcome::Done, "chunk size {}", chunk_len);
        assert_eq!(records, whole.records, "chunk size {}", chunk_len);
        assert_eq!(session.drain_diagnostics(), whole.diagnostics);
    }
}

#[test]
fn test_partial_header_suspends() {
    let mut session = echo_driver().session();
    let feed = session.feed(&[0x02, 0x0A, 0, 0]).unwrap();

    assert!(feed.records.is_empty());
    assert_eq!(
        feed.outcome,
        ScanOutcome::Suspended {
            awaiting: Awaiting::Payload,
            needed: 8,
        }
    );

    let scan = echo_driver().scan(vec![0x02, 0x0A, 0, 0]);
    assert_eq!(scan.diagnostics_of(DiagnosticKind::TruncatedRecord).count(), 1);
    assert_eq!(scan.diagnostics_of(DiagnosticKind::MalformedHeader).count(), 0);
}

#[test]
fn test_record_ending_on_buffer_end() {
    let scan = echo_driver().scan(vec![1, 2, 0xAB, 0xCD]);
    assert_eq!(scan.outcome, ScanOutcome::Done);
    assert_eq!(scan.consumed, 4);
    assert!(scan.is_clean());
}

#[test]
fn test_unknown_types_are_stable_across_scans() {
    let driver = echo_driver();
    let input = vec![4, 1, 0, 1, 1, 0xFF, 4, 0];

    let first = driver.scan(input.clone());
    let second = driver.scan(input);

    assert_eq!(first.diagnostics, second.diagnostics);
    assert_eq!(first.diagnostics_of(DiagnosticKind::UnknownType).count(), 2);
    assert_eq!(first.records, second.records);
}

#[test]
fn test_recursion_is_bounded() {
    let scan = nesting_driver(3).scan(nested(10));

    assert_eq!(scan.outcome, ScanOutcome::Done);
    assert_eq!(scan.records.len(), 1);
    assert_eq!(scan.diagnostics_of(DiagnosticKind::RecursionLimit).count(), 1);

    let scan = nesting_driver(32).scan(nested(10));
    assert!(scan.is_clean());
}

#[test]
fn test_terminated_session_rejects_feed() {
    let mut session = echo_driver().session();
    session.feed(&[1, 1, 0]).unwrap();
    assert_eq!(session.close(), ScanOutcome::Terminated);
    assert!(matches!(session.feed(&[1, 0]), Err(DecodeError::StreamTerminated)));
}

#[tokio::test]
async fn test_fcgi_request_over_stream() {
    let begin = [0, 1, fcgi::KEEP_CONN, 0, 0, 0, 0, 0];
    let mut wire = fcgi::encode_record(fcgi::BEGIN_REQUEST, 1, &begin).unwrap();
    let params = fcgi::encode_pairs([("SCRIPT_NAME", "/index.php"), ("QUERY_STRING", "")]);
    wire.extend(fcgi::encode_record(fcgi::PARAMS, 1, &params).unwrap());
    wire.extend(fcgi::encode_record(fcgi::PARAMS, 1, &[]).unwrap());
    wire.extend(fcgi::encode_record(fcgi::STDIN, 1, &[]).unwrap());

    let (mut tx, rx) = tokio::io::duplex(5);
    let expected_len = wire.len() as u64;
    let writer = tokio::spawn(async move {
        use tokio::io::AsyncWriteExt;
        tx.write_all(&wire).await.unwrap();
    });

    let mut session = fcgi::driver().unwrap().session();
    let scan = read_stream(rx, &mut session).await.unwrap();
    writer.await.unwrap();

    assert_eq!(scan.bytes_read, expected_len);
    assert_eq!(scan.outcome, ScanOutcome::Done);
    assert!(scan.diagnostics.is_empty());
    assert_eq!(scan.records.len(), 4);
    assert_eq!(scan.records[0].value("keep_conn"), Some(&FieldValue::Bool(true)));
    assert_eq!(
        fcgi::pairs(&scan.records[1]),
        vec![("SCRIPT_NAME", "/index.php"), ("QUERY_STRING", "")]
    );
    assert_eq!(scan.records[3].value("end_of_stream"), Some(&FieldValue::Bool(true)));
}

#[test]
fn test_detect_and_report() {
    let table = protocol_table().unwrap();
    let packet = mndp::encode_packet(
        3,
        &[
            (mndp::MAC_ADDRESS, &[0, 0x0C, 0x42, 1, 2, 3][..]),
            (mndp::IDENTITY, &b"gw-1"[..]),
        ],
    )
    .unwrap();

    let (found, scan) = table.dissect(packet).unwrap();
    assert_eq!(found.name, mndp::NAME);

    let report = Report::new(found.name, scan);
    assert_eq!(report.summary.records, 2);
    assert_eq!(report.summary.errors, 0);

    let json: serde_json::Value = serde_json::from_str(&report.to_json().unwrap()).unwrap();
    assert_eq!(json["format"], "mndp");
    assert_eq!(json["outcome"]["status"], "done");
    assert_eq!(json["records"].as_array().unwrap().len(), 2);
    assert!(!report.to_msgpack().unwrap().is_empty());
}

#[test]
fn test_hexdump_into_scan() {
    let dump = "
        00 0E 00 04 00 00 00 2A  00 02 00 04 01 02 03 04
";
    let bytes = hexdump::parse_expected(dump, 16).unwrap();
    let scan = shim6::scan_options(bytes).unwrap();

    assert_eq!(scan.records.len(), 2);
    assert_eq!(scan.records[0].type_code(), shim6::FORKED_INSTANCE_ID);
    assert_eq!(scan.records[1].type_code(), shim6::RESPONDER_VALIDATOR);
    assert_eq!(scan.records[1].offset, 8);
}
