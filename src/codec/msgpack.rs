//! MsgPack codec using `rmp-serde`.
//!
//! Always encodes with `to_vec_named`: structs become maps keyed by field
//! name, so reports stay readable by consumers that don't share our types.
//!
//! # Example
//!
//! ```
//! use tlvscan::codec::MsgPackCodec;
//! use tlvscan::diagnostics::{Diagnostic, DiagnosticKind, Severity};
//!
//! let diag = Diagnostic {
//!     severity: Severity::Note,
//!     offset: 4,
//!     kind: DiagnosticKind::UnknownType,
//!     message: "no handler for type 9".to_string(),
//! };
//! let encoded = MsgPackCodec::encode(&diag).unwrap();
//! let decoded: Diagnostic = MsgPackCodec::decode(&encoded).unwrap();
//! assert_eq!(decoded, diag);
//! ```

use crate::error::Result;

/// MessagePack codec for reports, diagnostics and configs.
pub struct MsgPackCodec;

impl MsgPackCodec {
    /// Encode a value to MsgPack bytes (struct-as-map format).
    ///
    /// # Errors
    ///
    /// Returns error if the value cannot be serialized.
    #[inline]
    pub fn encode<T: serde::Serialize + ?Sized>(value: &T) -> Result<Vec<u8>> {
        Ok(rmp_serde::to_vec_named(value)?)
    }

    /// Decode MsgPack bytes to a value.
    ///
    /// # Errors
    ///
    /// Returns error if the bytes cannot be deserialized to type T.
    #[inline]
    pub fn decode<T: serde::de::DeserializeOwned>(bytes: &[u8]) -> Result<T> {
        Ok(rmp_serde::from_slice(bytes)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostics::{Diagnostic, DiagnosticKind, Severity};
    use crate::protocol::RecordHeader;

    #[test]
    fn test_diagnostics_round_trip() {
        let diags = vec![
            Diagnostic {
                severity: Severity::Warning,
                offset: 12,
                kind: DiagnosticKind::Resync,
                message: "skipped 2 bytes".into(),
            },
            Diagnostic {
                severity: Severity::Error,
                offset: 40,
                kind: DiagnosticKind::TruncatedRecord,
                message: "incomplete".into(),
            },
        ];
        let encoded = MsgPackCodec::encode(&diags).unwrap();
        let decoded: Vec<Diagnostic> = MsgPackCodec::decode(&encoded).unwrap();
        assert_eq!(decoded, diags);
    }

    #[test]
    fn test_header_round_trip_keeps_extras() {
        let mut header = RecordHeader::new(6, 3).with_extras(&[1, 42]).with_padding(5);
        header.header_len = 8;
        let encoded = MsgPackCodec::encode(&header).unwrap();
        let decoded: RecordHeader = MsgPackCodec::decode(&encoded).unwrap();
        assert_eq!(decoded, header);
    }

    #[test]
    fn test_to_vec_named_produces_map_format() {
        let diag = Diagnostic {
            severity: Severity::Note,
            offset: 0,
            kind: DiagnosticKind::UnknownType,
            message: String::new(),
        };
        let encoded = MsgPackCodec::encode(&diag).unwrap();

        // fixmap with 4 entries; array format would be 0x94.
        assert_eq!(encoded[0], 0x84, "Expected fixmap, got {:02X}", encoded[0]);
    }

    #[test]
    fn test_decode_error_on_invalid_data() {
        let result: Result<Diagnostic> = MsgPackCodec::decode(b"not valid msgpack");
        assert!(result.is_err());
    }
}
