//! Dispatch context for handlers.
//!
//! Gives a handler access to:
//! - the diagnostics sink (`note`, `warning`, `error`)
//! - the record being decoded (`type_code`, `record_offset`)
//! - nested scanning (`scan_nested`, `scan_nested_with`) with a bounded depth
//!
//! # Example
//!
//! ```
//! use tlvscan::handler::{DispatchContext, Field, FieldValue};
//! use tlvscan::protocol::{ByteCursor, Endian, HeaderFormat};
//! use tlvscan::DecodeResult;
//!
//! fn container(
//!     payload: &mut ByteCursor,
//!     ctx: &mut DispatchContext<'_>,
//! ) -> DecodeResult<Vec<Field>> {
//!     let offset = payload.position();
//!     let len = payload.remaining();
//!     let inner = payload.sub_cursor(len)?;
//!     let format = HeaderFormat::tlv("inner", 1, 1, Endian::Big);
//!     let records = ctx.scan_nested(&format, inner)?;
//!     Ok(vec![Field::new("children", offset, len, FieldValue::Records(records))])
//! }
//! ```

use crate::config::ScanConfig;
use crate::diagnostics::{DiagnosticKind, DiagnosticsSink};
use crate::driver;
use crate::error::{DecodeError, DecodeResult};
use crate::handler::{DecodedRecord, PayloadDispatcher};
use crate::protocol::{ByteCursor, HeaderFormat, Record};

/// Per-dispatch state handed to a [`Handler`](super::Handler).
pub struct DispatchContext<'a> {
    dispatcher: &'a PayloadDispatcher,
    sink: &'a mut DiagnosticsSink,
    config: &'a ScanConfig,
    depth: usize,
    type_code: Option<u32>,
    record_offset: usize,
    /// Stopping diagnostics already in the sink when dispatch started.
    fatal_baseline: usize,
}

impl<'a> DispatchContext<'a> {
    /// Create a top-level context (depth 0).
    pub fn new(
        dispatcher: &'a PayloadDispatcher,
        sink: &'a mut DiagnosticsSink,
        config: &'a ScanConfig,
    ) -> Self {
        let fatal_baseline = sink.fatal_count();
        Self {
            dispatcher,
            sink,
            config,
            depth: 0,
            type_code: None,
            record_offset: 0,
            fatal_baseline,
        }
    }

    /// Context for a handler running on `record`, dispatched by `dispatcher`.
    pub(crate) fn for_record<'b>(
        &'b mut self,
        dispatcher: &'b PayloadDispatcher,
        record: &Record,
    ) -> DispatchContext<'b> {
        DispatchContext {
            dispatcher,
            sink: &mut *self.sink,
            config: self.config,
            depth: self.depth,
            type_code: Some(record.type_code()),
            record_offset: record.offset,
            fatal_baseline: self.fatal_baseline,
        }
    }

    fn nested<'b>(&'b mut self, dispatcher: &'b PayloadDispatcher) -> DispatchContext<'b> {
        DispatchContext {
            dispatcher,
            sink: &mut *self.sink,
            config: self.config,
            depth: self.depth + 1,
            type_code: None,
            record_offset: self.record_offset,
            fatal_baseline: self.fatal_baseline,
        }
    }

    /// Check if a stopping diagnostic was recorded since this dispatch began.
    ///
    /// Diagnostics already in the sink beforehand (a stream aborted on a
    /// later header) do not count.
    #[inline]
    pub fn halted(&self) -> bool {
        self.sink.fatal_count() > self.fatal_baseline
    }

    /// Nesting depth of the record being decoded; top level is 0.
    #[inline]
    pub fn depth(&self) -> usize {
        self.depth
    }

    /// Type code of the record being decoded.
    #[inline]
    pub fn type_code(&self) -> Option<u32> {
        self.type_code
    }

    /// Absolute offset of the record being decoded.
    #[inline]
    pub fn record_offset(&self) -> usize {
        self.record_offset
    }

    /// The scan config in effect.
    #[inline]
    pub fn config(&self) -> &ScanConfig {
        self.config
    }

    /// The dispatcher that selected the current handler.
    #[inline]
    pub fn dispatcher(&self) -> &'a PayloadDispatcher {
        self.dispatcher
    }

    /// The diagnostics sink for this session.
    #[inline]
    pub fn sink(&mut self) -> &mut DiagnosticsSink {
        self.sink
    }

    /// Record a note.
    pub fn note(&mut self, kind: DiagnosticKind, offset: usize, message: impl Into<String>) {
        self.sink.note(kind, offset, message);
    }

    /// Record a warning.
    pub fn warning(&mut self, kind: DiagnosticKind, offset: usize, message: impl Into<String>) {
        self.sink.warning(kind, offset, message);
    }

    /// Record an error.
    ///
    /// An error of kind [`DiagnosticKind::Fatal`] stops the scan after the
    /// current record.
    pub fn error(&mut self, kind: DiagnosticKind, offset: usize, message: impl Into<String>) {
        self.sink.error(kind, offset, message);
    }

    /// Scan records nested in `payload` with the current dispatcher.
    pub fn scan_nested(
        &mut self,
        format: &HeaderFormat,
        payload: ByteCursor,
    ) -> DecodeResult<Vec<DecodedRecord>> {
        let dispatcher = self.dispatcher;
        self.scan_nested_with(format, dispatcher, payload)
    }

    /// Scan records nested in `payload` with another dispatcher.
    ///
    /// Returns `RecursionLimitExceeded` when the nested records would sit
    /// deeper than the configured maximum. A malformed or truncated nested
    /// record fails the whole nested scan with `MalformedPayload`, unless
    /// the resync policy recovers from it.
    pub fn scan_nested_with(
        &mut self,
        format: &HeaderFormat,
        dispatcher: &PayloadDispatcher,
        payload: ByteCursor,
    ) -> DecodeResult<Vec<DecodedRecord>> {
        if self.depth + 1 > self.config.max_depth {
            return Err(DecodeError::RecursionLimitExceeded {
                offset: payload.position(),
                limit: self.config.max_depth,
            });
        }
        let mut cursor = payload;
        let mut child = self.nested(dispatcher);
        driver::scan_nested(format, &mut cursor, &mut child)
    }
}
