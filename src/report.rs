//! Serializable scan reports.
//!
//! A [`Report`] is what a host renders or ships elsewhere: the decoded
//! records, the diagnostics and a per-severity summary, as JSON or
//! MessagePack.

use serde::Serialize;

use crate::codec::MsgPackCodec;
use crate::diagnostics::{Diagnostic, Severity};
use crate::driver::{Scan, ScanOutcome};
use crate::error::Result;
use crate::handler::DecodedRecord;

/// Diagnostic counts by severity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Summary {
    pub records: usize,
    pub notes: usize,
    pub warnings: usize,
    pub errors: usize,
}

impl Summary {
    fn tally(records: usize, diagnostics: &[Diagnostic]) -> Self {
        let mut summary = Summary {
            records,
            ..Summary::default()
        };
        for diag in diagnostics {
            match diag.severity {
                Severity::Note => summary.notes += 1,
                Severity::Warning => summary.warnings += 1,
                Severity::Error => summary.errors += 1,
            }
        }
        summary
    }
}

/// Output of one scan, ready to serialize.
#[derive(Debug, Clone, Serialize)]
pub struct Report {
    /// Name of the header format that was scanned.
    pub format: String,
    pub outcome: ScanOutcome,
    pub consumed: usize,
    pub summary: Summary,
    pub records: Vec<DecodedRecord>,
    pub diagnostics: Vec<Diagnostic>,
}

impl Report {
    /// Build a report from a finished scan.
    pub fn new(format: impl Into<String>, scan: Scan) -> Self {
        Self {
            format: format.into(),
            outcome: scan.outcome,
            consumed: scan.consumed,
            summary: Summary::tally(scan.records.len(), &scan.diagnostics),
            records: scan.records,
            diagnostics: scan.diagnostics,
        }
    }

    /// Serialize to compact JSON.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Serialize to indented JSON.
    pub fn to_json_pretty(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Serialize to MessagePack.
    pub fn to_msgpack(&self) -> Result<Vec<u8>> {
        MsgPackCodec::encode(self)
    }
}
