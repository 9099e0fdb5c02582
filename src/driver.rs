//! Driver loop: decode a header, dispatch the payload, advance.
//!
//! [`Driver::scan`] runs the loop over a complete buffer. [`Driver::session`]
//! opens a [`StreamSession`] that runs it over chunks as they arrive, holding
//! partial records in a [`ReassemblyTracker`].
//!
//! # Example
//!
//! ```
//! use bytes::Bytes;
//! use tlvscan::{Driver, ScanOutcome};
//! use tlvscan::handler::{Field, FieldValue};
//! use tlvscan::protocol::{Endian, HeaderFormat};
//!
//! let driver = Driver::builder(HeaderFormat::tlv("demo", 1, 1, Endian::Big))
//!     .handle(1, "text", |payload, _ctx| {
//!         let offset = payload.position();
//!         let text = payload.take(payload.remaining())?;
//!         Ok(vec![Field::new("text", offset, text.len(), FieldValue::text(&text))])
//!     })
//!     .build()
//!     .unwrap();
//!
//! let scan = driver.scan(Bytes::from_static(b"\x01\x05hello\x09\x00"));
//! assert_eq!(scan.outcome, ScanOutcome::Done);
//! assert_eq!(scan.records.len(), 2);
//! assert_eq!(scan.records[0].value("text").unwrap().as_text(), Some("hello"));
//! ```

use std::sync::Arc;

use bytes::Bytes;
use serde::Serialize;

use crate::config::{MalformedPolicy, ScanConfig, ScanProfile};
use crate::diagnostics::{Diagnostic, DiagnosticKind, DiagnosticsSink, Severity};
use crate::error::{DecodeError, DecodeResult, Result};
use crate::handler::{DecodedRecord, DispatchContext, Field, Handler, PayloadDispatcher};
use crate::protocol::{
    Awaiting, ByteCursor, HeaderFormat, ReassemblyTracker, Record, RecordHeader, Termination,
    TrackerState,
};

/// How a scan or stream feed ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ScanOutcome {
    /// Every byte was consumed.
    Done,
    /// A malformed header or fatal diagnostic stopped the scan at `offset`.
    Aborted { offset: usize },
    /// A stream is waiting for `needed` more bytes.
    Suspended { awaiting: Awaiting, needed: usize },
    /// A stream was closed or exceeded its reassembly cap.
    Terminated,
}

/// Result of scanning a complete buffer.
#[derive(Debug, Clone)]
pub struct Scan {
    pub records: Vec<DecodedRecord>,
    pub diagnostics: Vec<Diagnostic>,
    pub outcome: ScanOutcome,
    /// Bytes the loop moved past, skipped bytes included.
    pub consumed: usize,
}

impl Scan {
    /// Check if no error-severity diagnostic was recorded.
    pub fn is_clean(&self) -> bool {
        !self.diagnostics.iter().any(|d| d.severity == Severity::Error)
    }

    /// Diagnostics of one kind.
    pub fn diagnostics_of(&self, kind: DiagnosticKind) -> impl Iterator<Item = &Diagnostic> {
        self.diagnostics.iter().filter(move |d| d.kind == kind)
    }
}

/// Records dispatched by one [`StreamSession::feed`] call.
#[derive(Debug, Clone)]
pub struct Feed {
    pub records: Vec<DecodedRecord>,
    pub outcome: ScanOutcome,
}

/// How the inner loop stopped.
enum LoopEnd {
    Done,
    /// A record runs past the end of the buffer.
    Truncated(DecodeError),
    /// A malformed header the policy could not recover from.
    Malformed(DecodeError),
    /// A fatal diagnostic was recorded.
    Halted { offset: usize },
}

/// Move the cursor past one record and hand out its payload.
fn take_record(cursor: &mut ByteCursor, header: RecordHeader) -> DecodeResult<Record> {
    let offset = cursor.position();
    let mut view = cursor.clone();
    view.advance(header.header_len)?;
    let payload = view.take(header.declared_length as usize)?;
    view.advance(header.padding)?;
    *cursor = view;
    Ok(Record::new(header, offset, payload))
}

fn scan_loop(
    format: &HeaderFormat,
    cursor: &mut ByteCursor,
    ctx: &mut DispatchContext<'_>,
    records: &mut Vec<DecodedRecord>,
) -> LoopEnd {
    let dispatcher = ctx.dispatcher();
    let mut resyncs = 0usize;

    while !cursor.is_exhausted() {
        let start = cursor.position();
        let decoded = format.decode_header(cursor).and_then(|header| {
            format.check_fit(&header, cursor, true)?;
            Ok(header)
        });

        let header = match decoded {
            Ok(header) => header,
            Err(err @ DecodeError::Incomplete { .. }) => return LoopEnd::Truncated(err),
            Err(err) => {
                let config = ctx.config();
                let window = match config.on_malformed {
                    MalformedPolicy::Resync { window } if resyncs < config.max_resync => window,
                    _ => return LoopEnd::Malformed(err),
                };
                resyncs += 1;
                ctx.sink().record(&err, start);

                let skip = window.max(1).min(cursor.remaining());
                if let Err(err) = cursor.advance(skip) {
                    return LoopEnd::Malformed(err);
                }
                ctx.warning(
                    DiagnosticKind::Resync,
                    start,
                    format!("skipped {} bytes after malformed {} header", skip, format.name),
                );
                continue;
            }
        };

        let record = match take_record(cursor, header) {
            Ok(record) => record,
            Err(err) => return LoopEnd::Malformed(err),
        };
        records.push(dispatcher.dispatch(&record, ctx));

        if ctx.halted() {
            return LoopEnd::Halted {
                offset: cursor.position(),
            };
        }
    }

    LoopEnd::Done
}

/// Scan records nested inside a payload.
pub(crate) fn scan_nested(
    format: &HeaderFormat,
    cursor: &mut ByteCursor,
    ctx: &mut DispatchContext<'_>,
) -> DecodeResult<Vec<DecodedRecord>> {
    let mut records = Vec::new();
    match scan_loop(format, cursor, ctx, &mut records) {
        LoopEnd::Done | LoopEnd::Halted { .. } => Ok(records),
        LoopEnd::Truncated(err) | LoopEnd::Malformed(err) => {
            let offset = err.offset().unwrap_or(cursor.position());
            Err(DecodeError::malformed_payload(
                offset,
                format!("nested {} record: {}", format.name, err),
            ))
        }
    }
}

/// Parses one protocol's records.
///
/// Cheap to clone and safe to share: the format, handlers and config are
/// immutable behind `Arc`s, so independent buffers and streams can be
/// scanned on separate threads.
#[derive(Debug, Clone)]
pub struct Driver {
    format: Arc<HeaderFormat>,
    dispatcher: Arc<PayloadDispatcher>,
    config: Arc<ScanConfig>,
}

impl Driver {
    /// Start building a driver for `format`.
    pub fn builder(format: HeaderFormat) -> DriverBuilder {
        DriverBuilder::new(format)
    }

    /// Create a driver from parts.
    pub fn new(
        format: HeaderFormat,
        dispatcher: PayloadDispatcher,
        config: ScanConfig,
    ) -> Result<Self> {
        format.validate()?;
        config.validate()?;
        Ok(Self {
            format: Arc::new(format),
            dispatcher: Arc::new(dispatcher),
            config: Arc::new(config),
        })
    }

    /// The header format.
    pub fn format(&self) -> &HeaderFormat {
        &self.format
    }

    /// The handler table.
    pub fn dispatcher(&self) -> &PayloadDispatcher {
        &self.dispatcher
    }

    /// The scan config.
    pub fn config(&self) -> &ScanConfig {
        &self.config
    }

    /// Scan a complete buffer.
    pub fn scan(&self, buf: impl Into<Bytes>) -> Scan {
        self.scan_cursor(ByteCursor::new(buf.into()))
    }

    /// Scan from the cursor's offset to the end of its buffer.
    ///
    /// Offsets in the result are absolute, so a cursor created with
    /// [`ByteCursor::with_base`] yields offsets into the enclosing capture.
    pub fn scan_cursor(&self, mut cursor: ByteCursor) -> Scan {
        let start = cursor.position();
        let mut sink = DiagnosticsSink::new();
        let mut records = Vec::new();

        let outcome = {
            let mut ctx = DispatchContext::new(&self.dispatcher, &mut sink, &self.config);
            match scan_loop(&self.format, &mut cursor, &mut ctx, &mut records) {
                LoopEnd::Done => ScanOutcome::Done,
                LoopEnd::Truncated(err) => {
                    ctx.sink().record(&err, cursor.position());
                    let rest = cursor.remaining();
                    let _ = cursor.advance(rest);
                    ScanOutcome::Done
                }
                LoopEnd::Malformed(err) => {
                    let offset = err.offset().unwrap_or(cursor.position());
                    ctx.sink().record(&err, offset);
                    ctx.error(
                        DiagnosticKind::Fatal,
                        offset,
                        format!("{} scan aborted", self.format.name),
                    );
                    ScanOutcome::Aborted { offset }
                }
                LoopEnd::Halted { offset } => ScanOutcome::Aborted { offset },
            }
        };

        tracing::debug!(
            format = %self.format.name,
            records = records.len(),
            diagnostics = sink.len(),
            ?outcome,
            "scan finished"
        );

        Scan {
            records,
            diagnostics: sink.drain(),
            outcome,
            consumed: cursor.position() - start,
        }
    }

    /// Open a stream session.
    pub fn session(&self) -> StreamSession {
        StreamSession {
            tracker: ReassemblyTracker::new(self.format.clone(), &self.config),
            dispatcher: self.dispatcher.clone(),
            config: self.config.clone(),
            sink: DiagnosticsSink::new(),
        }
    }
}

/// Builder for [`Driver`].
pub struct DriverBuilder {
    format: HeaderFormat,
    dispatcher: PayloadDispatcher,
    config: ScanConfig,
}

impl DriverBuilder {
    /// Create a builder with no handlers and the default config.
    pub fn new(format: HeaderFormat) -> Self {
        Self {
            format,
            dispatcher: PayloadDispatcher::new(),
            config: ScanConfig::default(),
        }
    }

    /// Create a builder from a loaded profile.
    pub fn from_profile(profile: ScanProfile) -> Self {
        Self {
            format: profile.format,
            dispatcher: PayloadDispatcher::new(),
            config: profile.config,
        }
    }

    /// Register a handler for a type code.
    pub fn handler<H: Handler>(mut self, type_code: u32, handler: H) -> Self {
        self.dispatcher.register(type_code, handler);
        self
    }

    /// Register a closure for a type code.
    pub fn handle<F>(mut self, type_code: u32, name: &'static str, handler: F) -> Self
    where
        F: Fn(&mut ByteCursor, &mut DispatchContext<'_>) -> DecodeResult<Vec<Field>>
            + Send
            + Sync
            + 'static,
    {
        self.dispatcher.register_fn(type_code, name, handler);
        self
    }

    /// Replace the fallback for unregistered type codes.
    pub fn fallback<H: Handler>(mut self, handler: H) -> Self {
        self.dispatcher.set_fallback(handler);
        self
    }

    /// Use a prepared handler table.
    pub fn dispatcher(mut self, dispatcher: PayloadDispatcher) -> Self {
        self.dispatcher = dispatcher;
        self
    }

    /// Replace the whole config.
    pub fn config(mut self, config: ScanConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the maximum nesting depth.
    pub fn max_depth(mut self, depth: usize) -> Self {
        self.config.max_depth = depth;
        self
    }

    /// Set the stream reassembly cap in bytes.
    pub fn reassembly_cap(mut self, cap: usize) -> Self {
        self.config.reassembly_cap = cap;
        self
    }

    /// Set the malformed-header policy.
    pub fn on_malformed(mut self, policy: MalformedPolicy) -> Self {
        self.config.on_malformed = policy;
        self
    }

    /// Set the number of resync attempts allowed.
    pub fn max_resync(mut self, attempts: usize) -> Self {
        self.config.max_resync = attempts;
        self
    }

    /// Validate the format and config and build the driver.
    pub fn build(self) -> Result<Driver> {
        Driver::new(self.format, self.dispatcher, self.config)
    }
}

/// A chunked stream being parsed.
///
/// Owned by one task; independent sessions share nothing mutable.
pub struct StreamSession {
    tracker: ReassemblyTracker,
    dispatcher: Arc<PayloadDispatcher>,
    config: Arc<ScanConfig>,
    sink: DiagnosticsSink,
}

impl StreamSession {
    /// Feed a chunk and dispatch every record it completes.
    ///
    /// # Errors
    ///
    /// Returns `StreamTerminated` if the session was closed, capped or
    /// aborted earlier.
    pub fn feed(&mut self, chunk: &[u8]) -> DecodeResult<Feed> {
        let completed = self.tracker.push(chunk, &mut self.sink)?;

        let mut records = Vec::with_capacity(completed.len());
        let mut ctx = DispatchContext::new(&self.dispatcher, &mut self.sink, &self.config);
        for record in &completed {
            records.push(self.dispatcher.dispatch(record, &mut ctx));
            if ctx.halted() {
                self.tracker.abort(record.offset + record.total_len());
                break;
            }
        }

        Ok(Feed {
            records,
            outcome: self.outcome(),
        })
    }

    /// Close the stream; a pending partial record is discarded with a warning.
    pub fn close(&mut self) -> ScanOutcome {
        self.tracker.close(&mut self.sink);
        self.outcome()
    }

    /// Outcome as of the last feed.
    pub fn outcome(&self) -> ScanOutcome {
        match self.tracker.state() {
            TrackerState::Idle => ScanOutcome::Done,
            TrackerState::AwaitingHeader { needed } => ScanOutcome::Suspended {
                awaiting: Awaiting::Header,
                needed,
            },
            TrackerState::AwaitingPayload { needed } => ScanOutcome::Suspended {
                awaiting: Awaiting::Payload,
                needed,
            },
            TrackerState::Terminated(Termination::Aborted { offset }) => {
                ScanOutcome::Aborted { offset }
            }
            TrackerState::Terminated(_) => ScanOutcome::Terminated,
        }
    }

    /// Take the diagnostics recorded so far.
    pub fn drain_diagnostics(&mut self) -> Vec<Diagnostic> {
        self.sink.drain()
    }

    /// Diagnostics recorded since the last drain.
    pub fn diagnostics(&self) -> &[Diagnostic] {
        self.sink.as_slice()
    }

    /// Absolute offset of the next unconsumed stream byte.
    pub fn offset(&self) -> usize {
        self.tracker.stream_offset()
    }

    /// Records completed so far.
    pub fn records_consumed(&self) -> u64 {
        self.tracker.records_consumed()
    }

    /// Check if the session accepts no more data.
    pub fn is_terminated(&self) -> bool {
        self.tracker.is_terminated()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::FieldValue;
    use crate::protocol::Endian;

    fn echo(payload: &mut ByteCursor, _ctx: &mut DispatchContext<'_>) -> DecodeResult<Vec<Field>> {
        let offset = payload.position();
        let len = payload.remaining();
        payload.advance(len)?;
        Ok(vec![Field::new("len", offset, len, FieldValue::UInt(len as u64))])
    }

    fn driver() -> Driver {
        Driver::builder(HeaderFormat::tlv("t", 1, 1, Endian::Big))
            .handle(1, "echo", echo)
            .build()
            .unwrap()
    }

    #[test]
    fn test_echo_record_consumes_seven() {
        let scan = driver().scan(vec![0x01, 0x05, b'A', b'B', b'C', b'D', b'E']);
        assert_eq!(scan.outcome, ScanOutcome::Done);
        assert_eq!(scan.consumed, 7);
        assert_eq!(scan.records.len(), 1);
        assert_eq!(scan.records[0].consumed, 7);
        assert_eq!(scan.records[0].value("len"), Some(&FieldValue::UInt(5)));
        assert!(scan.diagnostics.is_empty());
    }

    #[test]
    fn test_empty_buffer_is_done() {
        let scan = driver().scan(Bytes::new());
        assert_eq!(scan.outcome, ScanOutcome::Done);
        assert!(scan.records.is_empty());
    }

    #[test]
    fn test_truncated_final_record() {
        let scan = driver().scan(vec![0x01, 0x00, 0x02, 0x0A, 0x00, 0x00]);
        assert_eq!(scan.outcome, ScanOutcome::Done);
        assert_eq!(scan.records.len(), 1);
        assert_eq!(scan.consumed, 6);

        let truncated: Vec<_> = scan.diagnostics_of(DiagnosticKind::TruncatedRecord).collect();
        assert_eq!(truncated.len(), 1);
        assert_eq!(truncated[0].offset, 2);
        assert_eq!(truncated[0].severity, Severity::Error);
    }

    #[test]
    fn test_malformed_header_aborts() {
        let driver = Driver::builder(HeaderFormat::tlv("t", 1, 1, Endian::Big).max_length(3))
            .handle(1, "echo", echo)
            .build()
            .unwrap();
        let scan = driver.scan(vec![0x01, 0x01, 0xAA, 0x01, 0x09, 0, 0, 0]);

        assert_eq!(scan.outcome, ScanOutcome::Aborted { offset: 3 });
        assert_eq!(scan.records.len(), 1);
        assert!(scan.diagnostics.iter().any(|d| d.kind == DiagnosticKind::Fatal));
        assert!(!scan.is_clean());
    }

    #[test]
    fn test_resync_recovers() {
        let driver = Driver::builder(HeaderFormat::tlv("t", 1, 1, Endian::Big).max_length(3))
            .handle(1, "echo", echo)
            .on_malformed(MalformedPolicy::Resync { window: 2 })
            .build()
            .unwrap();
        let scan = driver.scan(vec![0x07, 0x09, 0x01, 0x01, 0xAA]);

        assert_eq!(scan.outcome, ScanOutcome::Done);
        assert_eq!(scan.records.len(), 1);
        assert_eq!(scan.records[0].offset, 2);
        assert_eq!(scan.diagnostics_of(DiagnosticKind::Resync).count(), 1);
    }

    #[test]
    fn test_resync_attempts_are_bounded() {
        let driver = Driver::builder(HeaderFormat::tlv("t", 1, 1, Endian::Big).max_length(0))
            .on_malformed(MalformedPolicy::Resync { window: 1 })
            .max_resync(2)
            .build()
            .unwrap();
        let scan = driver.scan(vec![0xFF; 8]);
        assert_eq!(scan.outcome, ScanOutcome::Aborted { offset: 2 });
        assert_eq!(scan.diagnostics_of(DiagnosticKind::Resync).count(), 2);
    }

    #[test]
    fn test_fatal_diagnostic_from_handler_halts() {
        let driver = Driver::builder(HeaderFormat::tlv("t", 1, 1, Endian::Big))
            .handle(2, "stop", |payload, ctx| {
                ctx.error(DiagnosticKind::Fatal, payload.position(), "stop here");
                payload.advance(payload.remaining())?;
                Ok(Vec::new())
            })
            .build()
            .unwrap();
        let scan = driver.scan(vec![0x02, 0x00, 0x01, 0x00]);
        assert_eq!(scan.outcome, ScanOutcome::Aborted { offset: 2 });
        assert_eq!(scan.records.len(), 1);
    }

    #[test]
    fn test_scan_cursor_reports_absolute_offsets() {
        let cursor = ByteCursor::with_base(Bytes::from_static(&[0x05, 0x00]), 100);
        let scan = driver().scan_cursor(cursor);
        assert_eq!(scan.records[0].offset, 100);
        assert_eq!(scan.diagnostics[0].offset, 100);
    }

    #[test]
    fn test_stream_incomplete_not_malformed() {
        let mut session = driver().session();
        let feed = session.feed(&[0x02, 0x0A, 0x00, 0x00]).unwrap();
        assert!(feed.records.is_empty());
        assert_eq!(
            feed.outcome,
            ScanOutcome::Suspended {
                awaiting: Awaiting::Payload,
                needed: 8
            }
        );
        assert!(session.diagnostics().is_empty());
    }

    #[test]
    fn test_stream_close_and_reject() {
        let mut session = driver().session();
        session.feed(&[0x01, 0x03, 0xAA]).unwrap();
        assert_eq!(session.close(), ScanOutcome::Terminated);

        let diags = session.drain_diagnostics();
        assert_eq!(diags.len(), 1);
        assert_eq!(diags[0].kind, DiagnosticKind::StreamClosed);
        assert_eq!(diags[0].severity, Severity::Warning);

        assert_eq!(
            session.feed(&[0x00]).unwrap_err(),
            DecodeError::StreamTerminated
        );
    }

    #[test]
    fn test_stream_keeps_children_before_bad_header() {
        let format = HeaderFormat::tlv("t", 1, 1, Endian::Big).max_length(4);
        let inner = format.clone();
        let driver = Driver::builder(format)
            .handle(1, "nest", move |payload, ctx| {
                let at = payload.position();
                let len = payload.remaining();
                let children = ctx.scan_nested(&inner, payload.sub_cursor(len)?)?;
                Ok(vec![Field::new("children", at, len, FieldValue::Records(children))])
            })
            .build()
            .unwrap();
        let input = [0x01, 0x04, 0x02, 0x00, 0x03, 0x00, 0x05, 0x09, 0x00];

        let scan = driver.scan(input.to_vec());
        let mut session = driver.session();
        let feed = session.feed(&input).unwrap();

        let children = |records: &[DecodedRecord]| {
            records[0].value("children").and_then(|v| v.as_records()).map(|c| c.len())
        };
        assert_eq!(children(&scan.records), Some(2));
        assert_eq!(children(&feed.records), Some(2));
        assert_eq!(feed.records, scan.records);
        assert_eq!(scan.outcome, ScanOutcome::Aborted { offset: 6 });
        assert_eq!(feed.outcome, ScanOutcome::Aborted { offset: 6 });
    }

    #[test]
    fn test_driver_is_send_sync_clone() {
        fn assert_bounds<T: Send + Sync + Clone>() {}
        fn assert_send<T: Send>() {}
        assert_bounds::<Driver>();
        assert_send::<StreamSession>();
    }
}
