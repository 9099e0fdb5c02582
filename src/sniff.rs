//! Heuristic protocol detection.
//!
//! A [`ProtocolTable`] holds one [`Dissector`] per protocol. Each dissector
//! scores a buffer with [`Dissector::sniff`] (higher = more specific match);
//! [`ProtocolTable::detect`] picks the best score and
//! [`ProtocolTable::dissect`] scans the buffer with the winner.
//!
//! Detection runs before and outside the driver loop. A sniffer only looks
//! at bytes, it never dispatches handlers.

use std::fmt;
use std::sync::Arc;

use bytes::Bytes;
use serde::Serialize;

use crate::driver::{Driver, Scan};

/// A protocol that can recognise and scan its own buffers.
pub trait Dissector: Send + Sync {
    /// Unique protocol name.
    fn name(&self) -> &'static str;

    /// Score how likely `buf` is this protocol.
    ///
    /// Returns `None` when the buffer can't be this protocol.
    fn sniff(&self, buf: &[u8]) -> Option<u32>;

    /// Scan a complete buffer.
    fn dissect(&self, buf: Bytes) -> Scan;
}

/// Sniffer function used by [`DriverDissector`].
pub type SniffFn = dyn Fn(&[u8]) -> Option<u32> + Send + Sync;

/// A [`Dissector`] made of a name, a sniffer and a [`Driver`].
pub struct DriverDissector {
    name: &'static str,
    sniffer: Arc<SniffFn>,
    driver: Driver,
}

impl DriverDissector {
    pub fn new<F>(name: &'static str, sniffer: F, driver: Driver) -> Self
    where
        F: Fn(&[u8]) -> Option<u32> + Send + Sync + 'static,
    {
        Self {
            name,
            sniffer: Arc::new(sniffer),
            driver,
        }
    }

    pub fn driver(&self) -> &Driver {
        &self.driver
    }
}

impl Dissector for DriverDissector {
    fn name(&self) -> &'static str {
        self.name
    }

    fn sniff(&self, buf: &[u8]) -> Option<u32> {
        (self.sniffer)(buf)
    }

    fn dissect(&self, buf: Bytes) -> Scan {
        self.driver.scan(buf)
    }
}

impl fmt::Debug for DriverDissector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DriverDissector")
            .field("name", &self.name)
            .field("format", &self.driver.format().name)
            .finish()
    }
}

/// Winning protocol for a buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Detection {
    pub name: &'static str,
    pub confidence: u32,
}

/// Registry of dissectors with score-based selection.
#[derive(Default)]
pub struct ProtocolTable {
    entries: Vec<Arc<dyn Dissector>>,
}

impl ProtocolTable {
    /// Create an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a dissector.
    ///
    /// A dissector with the same name as an existing one replaces it in
    /// place, keeping its position for tie-breaking.
    pub fn register<D: Dissector + 'static>(&mut self, dissector: D) {
        self.register_arc(Arc::new(dissector));
    }

    /// Register a shared dissector.
    pub fn register_arc(&mut self, dissector: Arc<dyn Dissector>) {
        match self.entries.iter_mut().find(|d| d.name() == dissector.name()) {
            Some(slot) => {
                tracing::warn!(protocol = dissector.name(), "replacing registered dissector");
                *slot = dissector;
            }
            None => self.entries.push(dissector),
        }
    }

    /// Register a driver with a sniffer function.
    pub fn register_driver<F>(&mut self, name: &'static str, sniffer: F, driver: Driver)
    where
        F: Fn(&[u8]) -> Option<u32> + Send + Sync + 'static,
    {
        self.register(DriverDissector::new(name, sniffer, driver));
    }

    /// Every protocol that accepts `buf`, best first.
    pub fn candidates(&self, buf: &[u8]) -> Vec<Detection> {
        let mut found: Vec<Detection> = self
            .entries
            .iter()
            .filter_map(|d| {
                d.sniff(buf).map(|confidence| Detection {
                    name: d.name(),
                    confidence,
                })
            })
            .collect();
        // Stable sort keeps registration order among equal scores.
        found.sort_by(|a, b| b.confidence.cmp(&a.confidence));
        found
    }

    /// Best protocol for `buf`; ties go to the earliest registered.
    pub fn detect(&self, buf: &[u8]) -> Option<Detection> {
        let mut best: Option<Detection> = None;
        for d in &self.entries {
            if let Some(confidence) = d.sniff(buf) {
                if best.map_or(true, |b| confidence > b.confidence) {
                    best = Some(Detection {
                        name: d.name(),
                        confidence,
                    });
                }
            }
        }
        tracing::trace!(len = buf.len(), ?best, "sniffed buffer");
        best
    }

    /// Detect the protocol of `buf` and scan it.
    pub fn dissect(&self, buf: impl Into<Bytes>) -> Option<(Detection, Scan)> {
        let buf = buf.into();
        let detection = self.detect(&buf)?;
        let dissector = self.get(detection.name)?;
        Some((detection, dissector.dissect(buf)))
    }

    /// Look up a dissector by name.
    pub fn get(&self, name: &str) -> Option<&Arc<dyn Dissector>> {
        self.entries.iter().find(|d| d.name() == name)
    }

    /// Registered protocol names in registration order.
    pub fn names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.entries.iter().map(|d| d.name())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl fmt::Debug for ProtocolTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.names()).finish()
    }
}
