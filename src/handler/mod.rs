//! Handler module - payload decoding and dispatch.
//!
//! Provides:
//! - [`PayloadDispatcher`] - maps type codes to handlers, with an opaque fallback
//! - [`Handler`] - the payload decoder trait, and [`FnHandler`] for closures
//! - [`DispatchContext`] - diagnostics and nested scanning for handlers
//! - [`Field`], [`FieldValue`], [`DecodedRecord`] - decoded output

mod context;
mod field;
mod registry;

pub use context::DispatchContext;
pub use field::{DecodedRecord, Field, FieldValue};
pub use registry::{FnHandler, Handler, OpaqueHandler, PayloadDispatcher, OPAQUE_HANDLER};
