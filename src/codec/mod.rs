//! Codec module - binary serialization of reports and configs.
//!
//! - [`MsgPackCodec`] - MessagePack using `rmp-serde` (`to_vec_named`, so
//!   structs keep their field names)
//!
//! JSON goes through `serde_json` directly at the call sites.

mod msgpack;

pub use msgpack::MsgPackCodec;
