//! # tlvscan
//!
//! Streaming parser for length-prefixed binary records and TLVs.
//!
//! A protocol is described by a [`HeaderFormat`] (type, length, padding and
//! extra header fields) and a set of payload handlers keyed by type code.
//! The [`Driver`] walks a buffer record by record, or reassembles records
//! from arbitrary chunks through a [`StreamSession`], and reports problems
//! as [`Diagnostic`]s instead of failing the whole scan.
//!
//! ## Architecture
//!
//! - **Protocol** ([`protocol`]): header formats, bounds-checked cursor,
//!   stream reassembly
//! - **Handlers** ([`handler`]): payload decoders and the dispatcher
//! - **Driver** ([`driver`]): buffer scans and stream sessions
//! - **Formats** ([`formats`]): FastCGI, MNDP, SHIM6 options, MPLS-TP FM
//! - **Detection** ([`sniff`]): picks the best dissector for a buffer
//!
//! ## Example
//!
//! ```
//! use tlvscan::protocol::{Endian, HeaderFormat};
//! use tlvscan::handler::{Field, FieldValue};
//! use tlvscan::{Driver, ScanOutcome};
//!
//! let driver = Driver::builder(HeaderFormat::tlv("demo", 1, 1, Endian::Big))
//!     .handle(1, "echo", |payload, _ctx| {
//!         let at = payload.position();
//!         let data = payload.take(payload.remaining())?;
//!         Ok(vec![Field::new("data", at, data.len(), FieldValue::Bytes(data))])
//!     })
//!     .build()
//!     .unwrap();
//!
//! let scan = driver.scan(vec![1, 5, b'A', b'B', b'C', b'D', b'E']);
//! assert_eq!(scan.records.len(), 1);
//! assert_eq!(scan.consumed, 7);
//! assert_eq!(scan.outcome, ScanOutcome::Done);
//! ```

pub mod codec;
pub mod config;
pub mod diagnostics;
pub mod driver;
pub mod error;
pub mod formats;
pub mod handler;
pub mod protocol;
pub mod report;
pub mod sniff;
pub mod source;

pub use config::{MalformedPolicy, ScanConfig, ScanProfile};
pub use diagnostics::{Diagnostic, DiagnosticKind, Severity};
pub use driver::{Driver, DriverBuilder, Feed, Scan, ScanOutcome, StreamSession};
pub use error::{DecodeError, DecodeResult, Error, HexDumpError, Result};
pub use protocol::HeaderFormat;
pub use report::Report;
pub use sniff::{Dissector, ProtocolTable};
