//! Structured diagnostics collected during a parse session.
//!
//! Per-record problems (unknown type, malformed length, truncated record)
//! are recorded here instead of stopping the scan. The host pulls them with
//! [`DiagnosticsSink::drain`] and renders them however it likes.
//!
//! Every diagnostic is also mirrored to `tracing`: notes at `trace`,
//! warnings at `debug` and errors at `warn`.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::DecodeError;

/// Diagnostic severity, ordered from least to most severe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Note,
    Warning,
    Error,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Severity::Note => "note",
            Severity::Warning => "warning",
            Severity::Error => "error",
        })
    }
}

/// What went wrong.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiagnosticKind {
    /// No handler registered for the type code; the payload was kept raw.
    UnknownType,
    /// Header fields were inconsistent.
    MalformedHeader,
    /// A handler rejected the payload contents.
    MalformedPayload,
    /// A record ran past the end of a complete buffer.
    TruncatedRecord,
    /// A handler left part of its payload undecoded.
    TrailingBytes,
    /// Bytes were skipped to find the next header.
    Resync,
    /// Nested records went deeper than allowed.
    RecursionLimit,
    /// A stream buffered more bytes than allowed and was terminated.
    ReassemblyCap,
    /// A stream was closed with a partial record pending.
    StreamClosed,
    /// Further offsets in the buffer are meaningless; the scan stopped.
    Fatal,
}

impl DiagnosticKind {
    /// Kinds that make the driver stop scanning the current buffer.
    #[inline]
    pub fn is_fatal(self) -> bool {
        matches!(self, DiagnosticKind::Fatal | DiagnosticKind::ReassemblyCap)
    }
}

/// A single diagnostic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostic {
    pub severity: Severity,
    /// Absolute offset the problem was found at.
    pub offset: usize,
    pub kind: DiagnosticKind,
    pub message: String,
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} at offset {}: {}",
            self.severity, self.offset, self.message
        )
    }
}

/// Append-only diagnostics collection for one parse session.
#[derive(Debug, Clone, Default)]
pub struct DiagnosticsSink {
    entries: Vec<Diagnostic>,
    errors: usize,
    fatal: usize,
}

impl DiagnosticsSink {
    /// Create an empty sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a diagnostic.
    pub fn push(
        &mut self,
        severity: Severity,
        kind: DiagnosticKind,
        offset: usize,
        message: impl Into<String>,
    ) {
        let message = message.into();
        match severity {
            Severity::Note => tracing::trace!(offset, ?kind, "{}", message),
            Severity::Warning => tracing::debug!(offset, ?kind, "{}", message),
            Severity::Error => tracing::warn!(offset, ?kind, "{}", message),
        }
        if severity == Severity::Error {
            self.errors += 1;
        }
        if kind.is_fatal() {
            self.fatal += 1;
        }
        self.entries.push(Diagnostic {
            severity,
            offset,
            kind,
            message,
        });
    }

    /// Record a note.
    pub fn note(&mut self, kind: DiagnosticKind, offset: usize, message: impl Into<String>) {
        self.push(Severity::Note, kind, offset, message);
    }

    /// Record a warning.
    pub fn warning(&mut self, kind: DiagnosticKind, offset: usize, message: impl Into<String>) {
        self.push(Severity::Warning, kind, offset, message);
    }

    /// Record an error.
    pub fn error(&mut self, kind: DiagnosticKind, offset: usize, message: impl Into<String>) {
        self.push(Severity::Error, kind, offset, message);
    }

    /// Record a decode error with the kind and severity it maps to.
    pub fn record(&mut self, err: &DecodeError, fallback_offset: usize) {
        let offset = err.offset().unwrap_or(fallback_offset);
        let (severity, kind) = match err {
            DecodeError::OutOfBounds { .. } | DecodeError::MalformedPayload { .. } => {
                (Severity::Error, DiagnosticKind::MalformedPayload)
            }
            DecodeError::Incomplete { .. } => (Severity::Error, DiagnosticKind::TruncatedRecord),
            DecodeError::MalformedHeader { .. } => {
                (Severity::Error, DiagnosticKind::MalformedHeader)
            }
            DecodeError::RecursionLimitExceeded { .. } => {
                (Severity::Error, DiagnosticKind::RecursionLimit)
            }
            DecodeError::ReassemblyCapExceeded { .. } => {
                (Severity::Error, DiagnosticKind::ReassemblyCap)
            }
            DecodeError::StreamTerminated => (Severity::Warning, DiagnosticKind::StreamClosed),
        };
        self.push(severity, kind, offset, err.to_string());
    }

    /// Take all diagnostics, leaving the sink empty.
    pub fn drain(&mut self) -> Vec<Diagnostic> {
        self.errors = 0;
        self.fatal = 0;
        std::mem::take(&mut self.entries)
    }

    /// Check if any error-severity diagnostic was recorded since the last drain.
    #[inline]
    pub fn has_errors(&self) -> bool {
        self.errors > 0
    }

    /// Check if a diagnostic that stops the scan was recorded since the last drain.
    #[inline]
    pub fn has_fatal(&self) -> bool {
        self.fatal > 0
    }

    /// Number of stopping diagnostics recorded since the last drain.
    #[inline]
    pub fn fatal_count(&self) -> usize {
        self.fatal
    }

    /// Number of diagnostics with the given severity.
    pub fn count(&self, severity: Severity) -> usize {
        self.entries.iter().filter(|d| d.severity == severity).count()
    }

    /// Iterate over the recorded diagnostics.
    pub fn iter(&self) -> impl Iterator<Item = &Diagnostic> {
        self.entries.iter()
    }

    /// Number of recorded diagnostics.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if nothing was recorded.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Borrow the diagnostics as a slice.
    pub fn as_slice(&self) -> &[Diagnostic] {
        &self.entries
    }
}
