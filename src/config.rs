//! Connection configuration.
//!
//! # Example
//!
//! ```
//! use westfield_core::{ConnectionConfig, object::Role};
//!
//! let config = ConnectionConfig::from_json(r#"{ "role": "server", "max_object_index": 4096 }"#)
//!     .unwrap();
//! assert_eq!(config.role, Role::Server);
//! assert_eq!(config.max_batch_bytes, westfield_core::config::DEFAULT_MAX_BATCH_BYTES);
//! ```

use serde::Deserialize;

use crate::error::Result;
use crate::object::Role;

/// Default largest slot index per id range.
pub const DEFAULT_MAX_OBJECT_INDEX: u32 = 1 << 20;

/// Default largest inbound batch (16 MiB).
pub const DEFAULT_MAX_BATCH_BYTES: usize = 16 * 1024 * 1024;

/// Configuration for one connection.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
    /// Which id range this side allocates from.
    pub role: Role,
    /// Ids whose slot index (offset inside their range) exceeds this are rejected.
    pub max_object_index: u32,
    /// Larger inbound batches are rejected as malformed.
    pub max_batch_bytes: usize,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            role: Role::Client,
            max_object_index: DEFAULT_MAX_OBJECT_INDEX,
            max_batch_bytes: DEFAULT_MAX_BATCH_BYTES,
        }
    }
}

impl ConnectionConfig {
    /// Client side defaults.
    pub fn client() -> Self {
        Self::default()
    }

    /// Server side defaults.
    pub fn server() -> Self {
        Self {
            role: Role::Server,
            ..Self::default()
        }
    }

    /// Parse a JSON configuration; missing fields keep their defaults.
    pub fn from_json(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn role(mut self, role: Role) -> Self {
        self.role = role;
        self
    }

    pub fn max_object_index(mut self, max: u32) -> Self {
        self.max_object_index = max;
        self
    }

    pub fn max_batch_bytes(mut self, max: usize) -> Self {
        self.max_batch_bytes = max;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::WireError;

    #[test]
    fn test_defaults() {
        let config = ConnectionConfig::default();
        assert_eq!(config.role, Role::Client);
        assert_eq!(config.max_object_index, DEFAULT_MAX_OBJECT_INDEX);
        assert_eq!(ConnectionConfig::server().role, Role::Server);
    }

    #[test]
    fn test_builder_setters() {
        let config = ConnectionConfig::client()
            .role(Role::Server)
            .max_object_index(8)
            .max_batch_bytes(1024);
        assert_eq!(config.role, Role::Server);
        assert_eq!(config.max_object_index, 8);
        assert_eq!(config.max_batch_bytes, 1024);
    }

    #[test]
    fn test_from_json_partial() {
        let config = ConnectionConfig::from_json(r#"{"max_batch_bytes": 64}"#).unwrap();
        assert_eq!(config.role, Role::Client);
        assert_eq!(config.max_batch_bytes, 64);
    }

    #[test]
    fn test_from_json_invalid() {
        let err = ConnectionConfig::from_json(r#"{"role": "peer"}"#).unwrap_err();
        assert!(matches!(err, WireError::Config(_)));
    }
}
