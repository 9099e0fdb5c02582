//! Handler registry for dispatching record payloads by type code.
//!
//! The dispatcher maps type codes to handlers. A record whose type has no
//! handler goes to the fallback ([`OpaqueHandler`] unless replaced), which
//! reports the payload as raw bytes.
//!
//! # Example
//!
//! ```
//! use tlvscan::handler::{Field, FieldValue, PayloadDispatcher};
//!
//! let mut dispatcher = PayloadDispatcher::new();
//! dispatcher.register_fn(1, "echo", |payload, _ctx| {
//!     let offset = payload.position();
//!     let len = payload.remaining();
//!     payload.advance(len)?;
//!     Ok(vec![Field::new("len", offset, len, FieldValue::UInt(len as u64))])
//! });
//!
//! assert_eq!(dispatcher.handler_name(1), Some("echo"));
//! assert_eq!(dispatcher.handler_name(2), None);
//! ```

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use super::context::DispatchContext;
use super::field::{DecodedRecord, Field, FieldValue};
use crate::diagnostics::DiagnosticKind;
use crate::error::{DecodeError, DecodeResult};
use crate::protocol::{ByteCursor, Record};

/// Name reported for records decoded by the opaque fallback.
pub const OPAQUE_HANDLER: &str = "opaque";

/// Payload decoder for one record type.
///
/// `payload` covers exactly the record's payload and reports absolute
/// offsets. Bytes left unread are reported as a `TrailingBytes` note.
pub trait Handler: Send + Sync + 'static {
    /// Name used in decoded records and diagnostics.
    fn name(&self) -> &'static str;

    /// Decode a payload into fields.
    fn decode(
        &self,
        payload: &mut ByteCursor,
        ctx: &mut DispatchContext<'_>,
    ) -> DecodeResult<Vec<Field>>;
}

/// Wrapper that turns a closure into a [`Handler`].
pub struct FnHandler<F> {
    name: &'static str,
    handler: F,
}

impl<F> FnHandler<F>
where
    F: Fn(&mut ByteCursor, &mut DispatchContext<'_>) -> DecodeResult<Vec<Field>>
        + Send
        + Sync
        + 'static,
{
    /// Create a new closure handler.
    pub fn new(name: &'static str, handler: F) -> Self {
        Self { name, handler }
    }
}

impl<F> Handler for FnHandler<F>
where
    F: Fn(&mut ByteCursor, &mut DispatchContext<'_>) -> DecodeResult<Vec<Field>>
        + Send
        + Sync
        + 'static,
{
    fn name(&self) -> &'static str {
        self.name
    }

    fn decode(
        &self,
        payload: &mut ByteCursor,
        ctx: &mut DispatchContext<'_>,
    ) -> DecodeResult<Vec<Field>> {
        (self.handler)(payload, ctx)
    }
}

/// Fallback that reports the whole payload as one `data` field.
#[derive(Debug, Clone, Copy, Default)]
pub struct OpaqueHandler;

impl OpaqueHandler {
    fn fields(payload: &mut ByteCursor) -> Vec<Field> {
        let offset = payload.position();
        let data = payload.rest_bytes();
        // Cannot fail: advancing by exactly what is left.
        let _ = payload.advance(data.len());
        vec![Field::new("data", offset, data.len(), FieldValue::Bytes(data))]
    }
}

impl Handler for OpaqueHandler {
    fn name(&self) -> &'static str {
        OPAQUE_HANDLER
    }

    fn decode(
        &self,
        payload: &mut ByteCursor,
        _ctx: &mut DispatchContext<'_>,
    ) -> DecodeResult<Vec<Field>> {
        Ok(Self::fields(payload))
    }
}

/// Type code to handler table.
///
/// Immutable once handed to a [`Driver`](crate::Driver); shared between
/// threads through an `Arc`.
#[derive(Clone)]
pub struct PayloadDispatcher {
    handlers: HashMap<u32, Arc<dyn Handler>>,
    fallback: Arc<dyn Handler>,
}

impl PayloadDispatcher {
    /// Create an empty dispatcher with the opaque fallback.
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
            fallback: Arc::new(OpaqueHandler),
        }
    }

    /// Register a handler for a type code.
    ///
    /// Registering the same type code twice replaces the earlier handler.
    pub fn register<H: Handler>(&mut self, type_code: u32, handler: H) {
        self.register_arc(type_code, Arc::new(handler));
    }

    /// Register a shared handler for a type code.
    pub fn register_arc(&mut self, type_code: u32, handler: Arc<dyn Handler>) {
        if let Some(previous) = self.handlers.insert(type_code, handler.clone()) {
            tracing::warn!(
                type_code,
                replaced = previous.name(),
                by = handler.name(),
                "handler registered twice for type code, last registration wins"
            );
        }
    }

    /// Register a closure as the handler for a type code.
    pub fn register_fn<F>(&mut self, type_code: u32, name: &'static str, handler: F)
    where
        F: Fn(&mut ByteCursor, &mut DispatchContext<'_>) -> DecodeResult<Vec<Field>>
            + Send
            + Sync
            + 'static,
    {
        self.register(type_code, FnHandler::new(name, handler));
    }

    /// Replace the handler used for unregistered type codes.
    pub fn set_fallback<H: Handler>(&mut self, handler: H) {
        self.fallback = Arc::new(handler);
    }

    /// Get the handler for a type code.
    pub fn get(&self, type_code: u32) -> Option<&dyn Handler> {
        self.handlers.get(&type_code).map(|h| h.as_ref())
    }

    /// Get the name of the handler registered for a type code.
    pub fn handler_name(&self, type_code: u32) -> Option<&'static str> {
        self.get(type_code).map(|h| h.name())
    }

    /// Check if a handler is registered for a type code.
    pub fn contains(&self, type_code: u32) -> bool {
        self.handlers.contains_key(&type_code)
    }

    /// Number of registered handlers (fallback excluded).
    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    /// Check if no handler is registered.
    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Run the handler for a record without catching its failure.
    ///
    /// Unknown types go to the fallback without a diagnostic.
    pub fn try_dispatch(
        &self,
        record: &Record,
        ctx: &mut DispatchContext<'_>,
    ) -> DecodeResult<Vec<Field>> {
        let handler = self.handlers.get(&record.type_code()).unwrap_or(&self.fallback);
        let mut payload = record.payload_cursor();
        let mut child = ctx.for_record(self, record);
        handler.decode(&mut payload, &mut child)
    }

    /// Dispatch a record to its handler.
    ///
    /// Never fails: an unknown type is recorded as a note, and a handler
    /// failure is recorded as an error with the payload kept raw. The
    /// returned record always reports the full wire size as consumed.
    pub fn dispatch(&self, record: &Record, ctx: &mut DispatchContext<'_>) -> DecodedRecord {
        let type_code = record.type_code();
        let handler = match self.handlers.get(&type_code) {
            Some(handler) => handler,
            None => {
                ctx.sink().note(
                    DiagnosticKind::UnknownType,
                    record.offset,
                    format!(
                        "no handler for type {} ({} byte payload)",
                        type_code,
                        record.payload_len()
                    ),
                );
                &self.fallback
            }
        };

        let mut payload = record.payload_cursor();
        let result = {
            let mut child = ctx.for_record(self, record);
            handler.decode(&mut payload, &mut child)
        };

        match result {
            Ok(fields) => {
                if !payload.is_exhausted() {
                    ctx.sink().note(
                        DiagnosticKind::TrailingBytes,
                        payload.position(),
                        format!(
                            "{} left {} of {} payload bytes undecoded",
                            handler.name(),
                            payload.remaining(),
                            record.payload_len()
                        ),
                    );
                }
                DecodedRecord::new(record, handler.name(), fields)
            }
            Err(err) => self.recover(record, handler.as_ref(), err, ctx),
        }
    }

    fn recover(
        &self,
        record: &Record,
        handler: &dyn Handler,
        err: DecodeError,
        ctx: &mut DispatchContext<'_>,
    ) -> DecodedRecord {
        ctx.sink().record(&err, record.payload_offset());
        tracing::debug!(
            type_code = record.type_code(),
            handler = handler.name(),
            offset = record.offset,
            "handler failed, keeping payload raw: {}",
            err
        );
        let mut payload = record.payload_cursor();
        let mut decoded =
            DecodedRecord::new(record, OPAQUE_HANDLER, OpaqueHandler::fields(&mut payload));
        decoded.error = Some(format!("{}: {}", handler.name(), err));
        decoded
    }
}

impl Default for PayloadDispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for PayloadDispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut types: Vec<_> = self
            .handlers
            .iter()
            .map(|(code, h)| (*code, h.name()))
            .collect();
        types.sort_unstable();
        f.debug_struct("PayloadDispatcher")
            .field("handlers", &types)
            .field("fallback", &self.fallback.name())
            .finish()
    }
}
