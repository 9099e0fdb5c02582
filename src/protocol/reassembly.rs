//! Reassembly of records split across stream chunks.
//!
//! Uses `bytes::BytesMut` for the pending bytes. State machine:
//! - `Idle`: no partial record pending
//! - `AwaitingHeader`: some header bytes buffered, header not decodable yet
//! - `AwaitingPayload`: header decoded, waiting for payload and padding
//! - `Terminated`: closed, capped or aborted; accepts no more data
//!
//! A record is only emitted once all of its bytes (padding included) are
//! buffered, so the same records come out no matter how the stream is
//! chunked.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use tlvscan::config::ScanConfig;
//! use tlvscan::diagnostics::DiagnosticsSink;
//! use tlvscan::protocol::{Endian, HeaderFormat, ReassemblyTracker};
//!
//! let format = Arc::new(HeaderFormat::tlv("t", 1, 1, Endian::Big));
//! let mut tracker = ReassemblyTracker::new(format, &ScanConfig::default());
//! let mut sink = DiagnosticsSink::new();
//!
//! assert!(tracker.push(&[0x01, 0x03, b'a'], &mut sink).unwrap().is_empty());
//! let records = tracker.push(&[b'b', b'c'], &mut sink).unwrap();
//! assert_eq!(records[0].payload(), b"abc");
//! ```

use std::sync::Arc;

use bytes::{Buf, Bytes, BytesMut};
use serde::Serialize;

use super::cursor::ByteCursor;
use super::record::Record;
use super::wire_format::{HeaderFormat, RecordHeader};
use crate::config::{MalformedPolicy, ScanConfig};
use crate::diagnostics::{DiagnosticKind, DiagnosticsSink};
use crate::error::{DecodeError, DecodeResult};

/// What a suspended stream is waiting for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Awaiting {
    Header,
    Payload,
}

/// Why a tracker stopped accepting data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum Termination {
    /// Closed by the caller.
    Closed,
    /// Too many bytes were pending.
    CapExceeded,
    /// A malformed header (or a fatal handler diagnostic) stopped the stream.
    Aborted { offset: usize },
}

/// Observable tracker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackerState {
    Idle,
    AwaitingHeader { needed: usize },
    AwaitingPayload { needed: usize },
    Terminated(Termination),
}

#[derive(Debug, Clone)]
enum State {
    Idle,
    AwaitingHeader { needed: usize },
    AwaitingPayload { header: RecordHeader },
    Terminated(Termination),
}

/// Per-stream buffer that turns chunks into complete records.
pub struct ReassemblyTracker {
    format: Arc<HeaderFormat>,
    /// Bytes received but not yet emitted as records.
    buffer: BytesMut,
    state: State,
    cap: usize,
    policy: MalformedPolicy,
    max_resync: usize,
    resyncs: usize,
    /// Absolute stream offset of `buffer[0]`.
    stream_offset: usize,
    records_consumed: u64,
}

impl ReassemblyTracker {
    /// Create a tracker with the cap and malformed policy from `config`.
    pub fn new(format: Arc<HeaderFormat>, config: &ScanConfig) -> Self {
        Self {
            format,
            buffer: BytesMut::with_capacity(64 * 1024),
            state: State::Idle,
            cap: config.reassembly_cap,
            policy: config.on_malformed,
            max_resync: config.max_resync,
            resyncs: 0,
            stream_offset: 0,
            records_consumed: 0,
        }
    }

    /// Push a chunk and extract every record it completes.
    ///
    /// Records completed before a cap breach or a malformed header are
    /// still returned; the tracker is terminated afterwards.
    ///
    /// # Errors
    ///
    /// Returns `StreamTerminated` if the tracker was already terminated.
    pub fn push(&mut self, data: &[u8], sink: &mut DiagnosticsSink) -> DecodeResult<Vec<Record>> {
        if let State::Terminated(_) = self.state {
            return Err(DecodeError::StreamTerminated);
        }

        self.buffer.extend_from_slice(data);

        let mut records = Vec::new();
        while let Some(record) = self.try_extract_one(sink) {
            records.push(record);
        }

        if !self.is_terminated() && self.buffer.len() > self.cap {
            self.exceed_cap(self.buffer.len(), sink);
        }

        Ok(records)
    }

    fn try_extract_one(&mut self, sink: &mut DiagnosticsSink) -> Option<Record> {
        loop {
            match &self.state {
                State::Terminated(_) => return None,

                State::Idle | State::AwaitingHeader { .. } => {
                    if self.buffer.is_empty() {
                        self.state = State::Idle;
                        return None;
                    }

                    let peek = self.buffer.len().min(self.format.max_header_len());
                    let cursor = ByteCursor::with_base(
                        Bytes::copy_from_slice(&self.buffer[..peek]),
                        self.stream_offset,
                    );

                    match self.format.decode_header(&cursor) {
                        Ok(header) => {
                            let total = header.total_len();
                            if total > self.cap {
                                self.exceed_cap(total, sink);
                                return None;
                            }
                            tracing::trace!(
                                offset = self.stream_offset,
                                type_code = header.type_code,
                                total,
                                "header decoded"
                            );
                            self.state = State::AwaitingPayload { header };
                        }
                        Err(DecodeError::Incomplete { needed, .. }) => {
                            self.state = State::AwaitingHeader { needed };
                            return None;
                        }
                        Err(err) => {
                            if !self.resync(err, sink) {
                                return None;
                            }
                        }
                    }
                }

                State::AwaitingPayload { header } => {
                    let total = header.total_len();
                    if self.buffer.len() < total {
                        return None;
                    }

                    let header = header.clone();
                    let bytes = self.buffer.split_to(total).freeze();
                    let start = header.header_len;
                    let payload = bytes.slice(start..start + header.declared_length as usize);
                    let record = Record::new(header, self.stream_offset, payload);

                    self.stream_offset += total;
                    self.records_consumed += 1;
                    self.state = State::Idle;
                    return Some(record);
                }
            }
        }
    }

    /// Handle a malformed header. Returns `true` if extraction may continue.
    fn resync(&mut self, err: DecodeError, sink: &mut DiagnosticsSink) -> bool {
        let offset = err.offset().unwrap_or(self.stream_offset);
        sink.record(&err, offset);

        let window = match self.policy {
            MalformedPolicy::Resync { window } if self.resyncs < self.max_resync => window,
            _ => {
                sink.error(
                    DiagnosticKind::Fatal,
                    offset,
                    format!("{} stream aborted", self.format.name),
                );
                self.terminate(Termination::Aborted { offset });
                return false;
            }
        };

        self.resyncs += 1;
        let skip = window.max(1).min(self.buffer.len());
        self.buffer.advance(skip);
        self.stream_offset += skip;
        self.state = State::Idle;
        sink.warning(
            DiagnosticKind::Resync,
            offset,
            format!("skipped {} bytes after malformed header", skip),
        );
        true
    }

    fn exceed_cap(&mut self, pending: usize, sink: &mut DiagnosticsSink) {
        let err = DecodeError::ReassemblyCapExceeded {
            cap: self.cap,
            pending,
        };
        sink.record(&err, self.stream_offset);
        self.terminate(Termination::CapExceeded);
    }

    fn terminate(&mut self, reason: Termination) {
        tracing::debug!(
            offset = self.stream_offset,
            discarded = self.buffer.len(),
            ?reason,
            "stream terminated"
        );
        self.buffer.clear();
        self.state = State::Terminated(reason);
    }

    /// Stop the stream at `offset` after a fatal diagnostic.
    pub fn abort(&mut self, offset: usize) {
        if !self.is_terminated() {
            self.terminate(Termination::Aborted { offset });
        }
    }

    /// Close the stream, discarding any partial record.
    ///
    /// Returns the number of discarded bytes; a non-zero count is also
    /// recorded as a warning.
    pub fn close(&mut self, sink: &mut DiagnosticsSink) -> usize {
        if self.is_terminated() {
            return 0;
        }
        let discarded = self.buffer.len();
        if discarded > 0 {
            sink.warning(
                DiagnosticKind::StreamClosed,
                self.stream_offset,
                format!("stream closed with {} bytes of a partial record pending", discarded),
            );
        }
        self.terminate(Termination::Closed);
        discarded
    }

    /// Current state.
    pub fn state(&self) -> TrackerState {
        match &self.state {
            State::Idle => TrackerState::Idle,
            State::AwaitingHeader { needed } => TrackerState::AwaitingHeader { needed: *needed },
            State::AwaitingPayload { header } => TrackerState::AwaitingPayload {
                needed: header.total_len().saturating_sub(self.buffer.len()),
            },
            State::Terminated(reason) => TrackerState::Terminated(*reason),
        }
    }

    /// Check if the tracker accepts no more data.
    #[inline]
    pub fn is_terminated(&self) -> bool {
        matches!(self.state, State::Terminated(_))
    }

    /// Number of buffered bytes.
    #[inline]
    pub fn pending_len(&self) -> usize {
        self.buffer.len()
    }

    /// Absolute stream offset of the next unconsumed byte.
    #[inline]
    pub fn stream_offset(&self) -> usize {
        self.stream_offset
    }

    /// Records emitted so far.
    #[inline]
    pub fn records_consumed(&self) -> u64 {
        self.records_consumed
    }

    /// Get the current state name for debugging.
    #[cfg(test)]
    fn state_name(&self) -> &'static str {
        match &self.state {
            State::Idle => "Idle",
            State::AwaitingHeader { .. } => "AwaitingHeader",
            State::AwaitingPayload { .. } => "AwaitingPayload",
            State::Terminated(_) => "Terminated",
        }
    }
}
