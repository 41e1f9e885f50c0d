//! Persisted setup state
//!
//! `SetupState` records which foundational components have completed
//! installation. It lives inside the stack configuration file and is the
//! only source of truth for foundational dependency checks across runs.

use serde::{Deserialize, Serialize};
use std::fmt;

/// One boolean per foundational component
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StateFlag {
    /// OpenBAO secrets backend
    SecretsBackend,
    /// PowerDNS
    Dns,
    /// Container registry
    Registry,
    /// K3s cluster
    Kubernetes,
}

impl StateFlag {
    /// All flags, in install order
    pub const ALL: [StateFlag; 4] = [
        StateFlag::SecretsBackend,
        StateFlag::Dns,
        StateFlag::Registry,
        StateFlag::Kubernetes,
    ];
}

impl fmt::Display for StateFlag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            StateFlag::SecretsBackend => "secrets-backend",
            StateFlag::Dns => "dns",
            StateFlag::Registry => "registry",
            StateFlag::Kubernetes => "kubernetes",
        };
        f.write_str(name)
    }
}

/// Installation flags for the foundational components
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct SetupState {
    #[serde(default)]
    pub openbao_installed: bool,

    /// Set once the backend has been initialized and unsealed
    #[serde(default)]
    pub openbao_initialized: bool,

    #[serde(default)]
    pub dns_installed: bool,

    #[serde(default)]
    pub zot_installed: bool,

    #[serde(default)]
    pub k3s_installed: bool,
}

impl SetupState {
    /// Read a flag
    pub fn is_set(&self, flag: StateFlag) -> bool {
        match flag {
            StateFlag::SecretsBackend => self.openbao_installed,
            StateFlag::Dns => self.dns_installed,
            StateFlag::Registry => self.zot_installed,
            StateFlag::Kubernetes => self.k3s_installed,
        }
    }

    /// Set a flag
    pub fn set(&mut self, flag: StateFlag, value: bool) {
        match flag {
            StateFlag::SecretsBackend => self.openbao_installed = value,
            StateFlag::Dns => self.dns_installed = value,
            StateFlag::Registry => self.zot_installed = value,
            StateFlag::Kubernetes => self.k3s_installed = value,
        }
    }

    /// Flags currently set, in install order
    pub fn installed(&self) -> Vec<StateFlag> {
        StateFlag::ALL
            .into_iter()
            .filter(|f| self.is_set(*f))
            .collect()
    }

    /// Clear every flag
    pub fn reset(&mut self) {
        *self = SetupState::default();
    }
}

/// DNS configuration block
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct DnsConfig {
    /// Backend implementation (only `powerdns` is supported)
    #[serde(default = "default_backend")]
    pub backend: String,

    /// Upstream recursors
    #[serde(default = "default_forwarders")]
    pub forwarders: Vec<String>,

    /// Reference to the API key, never the key itself
    #[serde(default = "default_api_key_ref")]
    pub api_key: String,

    /// Authoritative zones served publicly
    #[serde(default)]
    pub public_zones: Vec<String>,

    /// Zones for internal names
    #[serde(default = "default_local_zones")]
    pub local_zones: Vec<String>,

    /// HTTP API port on the DNS host
    #[serde(default = "default_api_port")]
    pub api_port: u16,
}

fn default_backend() -> String {
    "powerdns".to_string()
}

fn default_forwarders() -> Vec<String> {
    vec!["1.1.1.1".to_string(), "8.8.8.8".to_string()]
}

fn default_api_key_ref() -> String {
    "${secret:foundry-core/dns:api_key}".to_string()
}

fn default_local_zones() -> Vec<String> {
    vec!["infra.local".to_string()]
}

fn default_api_port() -> u16 {
    8081
}

impl Default for DnsConfig {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            forwarders: default_forwarders(),
            api_key: default_api_key_ref(),
            public_zones: Vec::new(),
            local_zones: default_local_zones(),
            api_port: default_api_port(),
        }
    }
}

impl DnsConfig {
    /// Zone that infrastructure A records are created in
    pub fn primary_zone(&self) -> Option<&str> {
        self.local_zones
            .first()
            .or_else(|| self.public_zones.first())
            .map(String::as_str)
    }
}
