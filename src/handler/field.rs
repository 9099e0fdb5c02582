//! Decoded output: fields and records.
//!
//! Handlers annotate a payload by returning [`Field`]s. Byte-valued fields
//! share memory with the scanned buffer.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use bytes::Bytes;
use serde::Serialize;

use crate::protocol::{Record, RecordHeader};

/// Value of a decoded field.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum FieldValue {
    /// Unsigned integer of any width up to 64 bits.
    UInt(u64),
    /// Boolean flag.
    Bool(bool),
    /// Text decoded from the payload.
    Text(String),
    /// Raw bytes (zero-copy).
    Bytes(Bytes),
    /// MAC address.
    MacAddr([u8; 6]),
    /// IPv4 or IPv6 address.
    IpAddr(IpAddr),
    /// Records nested inside this field.
    Records(Vec<DecodedRecord>),
}

impl FieldValue {
    /// Text from bytes, replacing invalid UTF-8.
    pub fn text(bytes: &[u8]) -> Self {
        FieldValue::Text(String::from_utf8_lossy(bytes).into_owned())
    }

    /// MAC address from exactly 6 bytes.
    pub fn mac(bytes: &[u8]) -> Option<Self> {
        <[u8; 6]>::try_from(bytes).ok().map(FieldValue::MacAddr)
    }

    /// IPv4 address from exactly 4 bytes.
    pub fn ipv4(bytes: &[u8]) -> Option<Self> {
        <[u8; 4]>::try_from(bytes)
            .ok()
            .map(|b| FieldValue::IpAddr(IpAddr::V4(Ipv4Addr::from(b))))
    }

    /// IPv6 address from exactly 16 bytes.
    pub fn ipv6(bytes: &[u8]) -> Option<Self> {
        <[u8; 16]>::try_from(bytes)
            .ok()
            .map(|b| FieldValue::IpAddr(IpAddr::V6(Ipv6Addr::from(b))))
    }

    /// Integer value, if this is one.
    pub fn as_uint(&self) -> Option<u64> {
        match self {
            FieldValue::UInt(v) => Some(*v),
            _ => None,
        }
    }

    /// Text value, if this is one.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            FieldValue::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Byte value, if this is one.
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            FieldValue::Bytes(b) => Some(b),
            _ => None,
        }
    }

    /// Nested records, if this holds any.
    pub fn as_records(&self) -> Option<&[DecodedRecord]> {
        match self {
            FieldValue::Records(r) => Some(r),
            _ => None,
        }
    }
}

/// A named, located value inside a record.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Field {
    pub name: &'static str,
    /// Absolute offset of the first byte.
    pub offset: usize,
    /// Length in bytes on the wire.
    pub len: usize,
    pub value: FieldValue,
}

impl Field {
    /// Create a field.
    pub fn new(name: &'static str, offset: usize, len: usize, value: FieldValue) -> Self {
        Self {
            name,
            offset,
            len,
            value,
        }
    }
}

/// Result of dispatching one record.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DecodedRecord {
    /// Absolute offset of the record's first header byte.
    pub offset: usize,
    pub header: RecordHeader,
    /// Name of the handler that produced `fields`.
    pub handler: &'static str,
    pub fields: Vec<Field>,
    /// Bytes the record occupied: header, payload and padding.
    pub consumed: usize,
    /// Set when the handler failed and the payload was kept raw.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl DecodedRecord {
    pub(crate) fn new(record: &Record, handler: &'static str, fields: Vec<Field>) -> Self {
        Self {
            offset: record.offset,
            header: record.header.clone(),
            handler,
            fields,
            consumed: record.total_len(),
            error: None,
        }
    }

    /// Record type code.
    #[inline]
    pub fn type_code(&self) -> u32 {
        self.header.type_code
    }

    /// Payload length from the header.
    #[inline]
    pub fn payload_len(&self) -> usize {
        self.header.declared_length as usize
    }

    /// First field with the given name.
    pub fn field(&self, name: &str) -> Option<&Field> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Value of the first field with the given name.
    pub fn value(&self, name: &str) -> Option<&FieldValue> {
        self.field(name).map(|f| &f.value)
    }

    /// Check if the handler failed on this record.
    #[inline]
    pub fn is_malformed(&self) -> bool {
        self.error.is_some()
    }
}
