//! Scan configuration.
//!
//! [`ScanConfig`] carries the limits and policies the driver applies to
//! every buffer or stream. [`ScanProfile`] bundles a header format with a
//! config so a complete protocol setup can be loaded from one JSON document.
//!
//! # Example
//!
//! ```
//! use tlvscan::config::{MalformedPolicy, ScanProfile};
//!
//! let profile = ScanProfile::from_json(r#"{
//!     "format": {
//!         "name": "tlv",
//!         "fields": [
//!             {"field": "type", "width": 1},
//!             {"field": "length", "encoding": {"kind": "fixed", "width": 1}}
//!         ]
//!     },
//!     "config": {"on_malformed": {"action": "resync", "window": 1}}
//! }"#).unwrap();
//!
//! assert_eq!(profile.config.max_depth, 32);
//! assert_eq!(profile.config.on_malformed, MalformedPolicy::Resync { window: 1 });
//! ```

use serde::{Deserialize, Serialize};

use crate::codec::MsgPackCodec;
use crate::error::{Error, Result};
use crate::protocol::HeaderFormat;

/// Default maximum nesting depth for records inside records.
pub const DEFAULT_MAX_DEPTH: usize = 32;

/// Default cap on bytes buffered by a stream while waiting for a record (4 MiB).
pub const DEFAULT_REASSEMBLY_CAP: usize = 4 * 1024 * 1024;

/// Default number of resynchronisation attempts per buffer or stream.
pub const DEFAULT_MAX_RESYNC: usize = 64;

/// What to do when a header is malformed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum MalformedPolicy {
    /// Record a fatal diagnostic and stop.
    #[default]
    Abort,
    /// Skip `window` bytes and try to decode a header again.
    Resync { window: usize },
}

fn default_max_depth() -> usize {
    DEFAULT_MAX_DEPTH
}

fn default_reassembly_cap() -> usize {
    DEFAULT_REASSEMBLY_CAP
}

fn default_max_resync() -> usize {
    DEFAULT_MAX_RESYNC
}

/// Limits and policies for a scan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanConfig {
    /// Maximum nesting depth; top-level records are depth 0.
    #[serde(default = "default_max_depth")]
    pub max_depth: usize,
    /// Maximum bytes a stream may hold pending.
    #[serde(default = "default_reassembly_cap")]
    pub reassembly_cap: usize,
    /// Malformed-header policy.
    #[serde(default)]
    pub on_malformed: MalformedPolicy,
    /// Resync attempts allowed before the scan aborts.
    #[serde(default = "default_max_resync")]
    pub max_resync: usize,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            max_depth: DEFAULT_MAX_DEPTH,
            reassembly_cap: DEFAULT_REASSEMBLY_CAP,
            on_malformed: MalformedPolicy::Abort,
            max_resync: DEFAULT_MAX_RESYNC,
        }
    }
}

impl ScanConfig {
    /// Create a config with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Check the config for unusable values.
    pub fn validate(&self) -> Result<()> {
        if self.reassembly_cap == 0 {
            return Err(Error::Config("reassembly cap must be non-zero".into()));
        }
        if let MalformedPolicy::Resync { window: 0 } = self.on_malformed {
            return Err(Error::Config("resync window must be non-zero".into()));
        }
        Ok(())
    }

    /// Load and validate a config from JSON.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: ScanConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a config from MessagePack.
    pub fn from_msgpack(bytes: &[u8]) -> Result<Self> {
        let config: ScanConfig = MsgPackCodec::decode(bytes)?;
        config.validate()?;
        Ok(config)
    }

    /// Serialize the config to MessagePack.
    pub fn to_msgpack(&self) -> Result<Vec<u8>> {
        MsgPackCodec::encode(self)
    }
}

/// A header format together with the config to scan it with.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanProfile {
    pub format: HeaderFormat,
    #[serde(default)]
    pub config: ScanConfig,
}

impl ScanProfile {
    /// Load and validate a profile from JSON.
    pub fn from_json(json: &str) -> Result<Self> {
        let profile: ScanProfile = serde_json::from_str(json)?;
        profile.format.validate()?;
        profile.config.validate()?;
        Ok(profile)
    }

    /// Serialize the profile to JSON.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ScanConfig::default();
        assert_eq!(config.max_depth, 32);
        assert_eq!(config.reassembly_cap, 4 * 1024 * 1024);
        assert_eq!(config.on_malformed, MalformedPolicy::Abort);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_json_fills_defaults() {
        let config = ScanConfig::from_json(r#"{"max_depth": 4}"#).unwrap();
        assert_eq!(config.max_depth, 4);
        assert_eq!(config.reassembly_cap, DEFAULT_REASSEMBLY_CAP);
        assert_eq!(config.max_resync, DEFAULT_MAX_RESYNC);
    }

    #[test]
    fn test_policy_json_shape() {
        let json = serde_json::to_string(&MalformedPolicy::Resync { window: 2 }).unwrap();
        assert_eq!(json, r#"{"action":"resync","window":2}"#);
        let abort: MalformedPolicy = serde_json::from_str(r#"{"action":"abort"}"#).unwrap();
        assert_eq!(abort, MalformedPolicy::Abort);
    }

    #[test]
    fn test_validate_rejects_zero_values() {
        assert!(ScanConfig::from_json(r#"{"reassembly_cap": 0}"#).is_err());
        assert!(
            ScanConfig::from_json(r#"{"on_malformed": {"action": "resync", "window": 0}}"#)
                .is_err()
        );
    }

    #[test]
    fn test_msgpack_round_trip() {
        let config = ScanConfig {
            max_depth: 3,
            on_malformed: MalformedPolicy::Resync { window: 4 },
            ..ScanConfig::default()
        };
        let bytes = config.to_msgpack().unwrap();
        assert_eq!(ScanConfig::from_msgpack(&bytes).unwrap(), config);
    }

    #[test]
    fn test_profile_rejects_invalid_format() {
        let json = r#"{"format": {"name": "bad", "fields": []}}"#;
        assert!(matches!(
            ScanProfile::from_json(json),
            Err(Error::Config(_))
        ));
    }
}
