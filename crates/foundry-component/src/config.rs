//! Per-invocation component configuration
//!
//! A `ComponentConfig` is assembled fresh for every reconcile: CLI flags,
//! version pins, the cluster VIP, resolved secrets and values collected from
//! dependencies. Nothing here is global.

use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use crate::error::{ComponentError, Result};

/// Well-known configuration keys
pub mod keys {
    pub const VERSION: &str = "version";
    pub const DRY_RUN: &str = "dry_run";
    pub const CLUSTER_NAME: &str = "cluster_name";
    pub const CLUSTER_VIP: &str = "cluster_vip";
    pub const STORAGE_BACKEND: &str = "storage_backend";
    pub const NFS_SERVER: &str = "nfs_server";
    pub const NFS_PATH: &str = "nfs_path";
    pub const HOST_ADDRESS: &str = "host_address";
    pub const DNS_ZONE: &str = "dns_zone";
    pub const DNS_ZONES: &str = "dns_zones";
    pub const DNS_FORWARDERS: &str = "dns_forwarders";
    pub const DNS_SERVER: &str = "dns_server";
    pub const DNS_API_PORT: &str = "dns_api_port";
    pub const REGISTRY_ADDRESS: &str = "registry_address";
}

/// Ordered key/value configuration handed to a component
#[derive(Clone, Default, PartialEq)]
pub struct ComponentConfig {
    values: BTreeMap<String, Value>,
    secret_keys: BTreeSet<String>,
}

impl ComponentConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a value, replacing any previous one
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<Value>) -> &mut Self {
        self.values.insert(key.into(), value.into());
        self
    }

    /// Set a value only if present
    pub fn set_opt<V: Into<Value>>(&mut self, key: &str, value: Option<V>) -> &mut Self {
        if let Some(value) = value {
            self.set(key, value);
        }
        self
    }

    /// Set a value that must never be printed
    pub fn set_secret(&mut self, key: impl Into<String>, value: impl Into<String>) -> &mut Self {
        let key = key.into();
        self.secret_keys.insert(key.clone());
        self.values.insert(key, Value::String(value.into()));
        self
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    /// String value; empty strings count as absent
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.values
            .get(key)
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
    }

    pub fn get_bool(&self, key: &str) -> bool {
        self.values.get(key).and_then(Value::as_bool).unwrap_or(false)
    }

    /// String value or `MissingConfig`
    pub fn require_str(&self, key: &str) -> Result<&str> {
        self.get_str(key).ok_or_else(|| ComponentError::MissingConfig {
            key: key.to_string(),
        })
    }

    /// Requested version, if pinned
    pub fn version(&self) -> Option<&str> {
        self.get_str(keys::VERSION)
    }

    pub fn cluster_vip(&self) -> Option<&str> {
        self.get_str(keys::CLUSTER_VIP)
    }

    pub fn is_dry_run(&self) -> bool {
        self.get_bool(keys::DRY_RUN)
    }

    pub fn is_secret(&self, key: &str) -> bool {
        self.secret_keys.contains(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(String::as_str)
    }
}

impl fmt::Debug for ComponentConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut map = f.debug_map();
        for (key, value) in &self.values {
            if self.secret_keys.contains(key) {
                map.entry(key, &"<redacted>");
            } else {
                map.entry(key, value);
            }
        }
        map.finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_and_require() {
        let mut cfg = ComponentConfig::new();
        cfg.set(keys::VERSION, "1.2.3").set(keys::DRY_RUN, true);

        assert_eq!(cfg.version(), Some("1.2.3"));
        assert!(cfg.is_dry_run());
        assert_eq!(cfg.require_str(keys::VERSION).unwrap(), "1.2.3");

        let err = cfg.require_str(keys::NFS_SERVER).unwrap_err();
        assert!(matches!(err, ComponentError::MissingConfig { ref key } if key == "nfs_server"));
    }

    #[test]
    fn test_empty_string_is_absent() {
        let mut cfg = ComponentConfig::new();
        cfg.set(keys::CLUSTER_VIP, "");
        assert_eq!(cfg.cluster_vip(), None);
    }

    #[test]
    fn test_set_opt_skips_none() {
        let mut cfg = ComponentConfig::new();
        cfg.set_opt::<String>(keys::NFS_PATH, None);
        cfg.set_opt(keys::NFS_SERVER, Some("10.0.0.5"));
        assert!(!cfg.contains(keys::NFS_PATH));
        assert_eq!(cfg.get_str(keys::NFS_SERVER), Some("10.0.0.5"));
    }

    #[test]
    fn test_debug_redacts_secrets() {
        let mut cfg = ComponentConfig::new();
        cfg.set_secret("api_key", "hunter2");
        cfg.set(keys::VERSION, "4.9");

        let debug = format!("{:?}", cfg);
        assert!(!debug.contains("hunter2"));
        assert!(debug.contains("<redacted>"));
        assert!(debug.contains("4.9"));
        assert_eq!(cfg.get_str("api_key"), Some("hunter2"));
        assert!(cfg.is_secret("api_key"));
    }
}
