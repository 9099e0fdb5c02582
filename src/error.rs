//! Error types for tlvscan.
//!
//! Two layers:
//! - [`DecodeError`] - recoverable per-record failures. The driver turns
//!   these into diagnostics and keeps scanning.
//! - [`Error`] - crate-level errors, including the fatal buffer-source
//!   failures (I/O) that are propagated to the caller immediately.

use thiserror::Error;

/// Per-record decoding failure.
///
/// None of these abort a whole scan on their own; the driver decides what
/// each one means for the session (skip, resync, suspend or terminate).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    /// A read would run past the end of the buffer.
    #[error("out of bounds at offset {offset}: need {needed} bytes, have {available}")]
    OutOfBounds {
        offset: usize,
        needed: usize,
        available: usize,
    },

    /// The bytes seen so far are a valid prefix; `needed` more are required.
    #[error("incomplete record at offset {offset}: {needed} more bytes needed")]
    Incomplete { offset: usize, needed: usize },

    /// The header violates the format rules (length overflow, padding, bounds).
    #[error("malformed header at offset {offset}: {reason}")]
    MalformedHeader { offset: usize, reason: String },

    /// A handler rejected the payload contents.
    #[error("malformed payload at offset {offset}: {reason}")]
    MalformedPayload { offset: usize, reason: String },

    /// Nested records went deeper than the configured maximum.
    #[error("recursion limit of {limit} exceeded at offset {offset}")]
    RecursionLimitExceeded { offset: usize, limit: usize },

    /// A stream accumulated more pending bytes than allowed.
    #[error("reassembly cap of {cap} bytes exceeded ({pending} pending)")]
    ReassemblyCapExceeded { cap: usize, pending: usize },

    /// The stream was already terminated and accepts no more data.
    #[error("stream terminated")]
    StreamTerminated,
}

impl DecodeError {
    /// Build a `MalformedHeader` error.
    pub fn malformed_header(offset: usize, reason: impl Into<String>) -> Self {
        DecodeError::MalformedHeader {
            offset,
            reason: reason.into(),
        }
    }

    /// Build a `MalformedPayload` error.
    pub fn malformed_payload(offset: usize, reason: impl Into<String>) -> Self {
        DecodeError::MalformedPayload {
            offset,
            reason: reason.into(),
        }
    }

    /// Absolute offset the error refers to, when it has one.
    pub fn offset(&self) -> Option<usize> {
        match self {
            DecodeError::OutOfBounds { offset, .. }
            | DecodeError::Incomplete { offset, .. }
            | DecodeError::MalformedHeader { offset, .. }
            | DecodeError::MalformedPayload { offset, .. }
            | DecodeError::RecursionLimitExceeded { offset, .. } => Some(*offset),
            DecodeError::ReassemblyCapExceeded { .. } | DecodeError::StreamTerminated => None,
        }
    }
}

/// Errors from parsing textual hex dumps.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HexDumpError {
    /// A dump line contained no byte values.
    #[error("line {line}: no hex byte values")]
    NoValues { line: usize },

    /// A token could not be parsed as a hex byte.
    #[error("line {line}: invalid hex byte {token:?}")]
    InvalidByte { line: usize, token: String },

    /// The dump ended before the announced length was reached.
    #[error("hex dump is short: expected {expected} bytes, got {actual}")]
    Short { expected: usize, actual: usize },
}

/// Main error type for all tlvscan operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Record decoding failure surfaced to the caller.
    #[error("decode error: {0}")]
    Decode(#[from] DecodeError),

    /// I/O error from a buffer source. Always fatal for the session.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON configuration error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// MsgPack serialization error.
    #[error("MsgPack encode error: {0}")]
    MsgPackEncode(#[from] rmp_serde::encode::Error),

    /// MsgPack deserialization error.
    #[error("MsgPack decode error: {0}")]
    MsgPackDecode(#[from] rmp_serde::decode::Error),

    /// Textual hex dump could not be parsed.
    #[error("hex dump error: {0}")]
    HexDump(#[from] HexDumpError),

    /// Invalid configuration (bad header format, zero alignment, ...).
    #[error("invalid configuration: {0}")]
    Config(String),
}

/// Result type alias using [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

/// Result type alias for per-record decoding.
pub type DecodeResult<T> = std::result::Result<T, DecodeError>;
