//! Ready-made header formats and handlers.
//!
//! - [`fcgi`]: FastCGI records over a byte stream
//! - [`mndp`]: MikroTik neighbor discovery datagrams
//! - [`shim6`]: SHIM6 option lists
//! - [`mplstp`]: MPLS-TP fault management TLVs

pub mod fcgi;
pub mod mndp;
pub mod mplstp;
pub mod shim6;

use crate::error::Result;
use crate::sniff::ProtocolTable;

/// A detection table with every format that has a sniffer.
pub fn protocol_table() -> Result<ProtocolTable> {
    let mut table = ProtocolTable::new();
    table.register(mndp::Mndp::new()?);
    table.register(fcgi::dissector()?);
    Ok(table)
}
