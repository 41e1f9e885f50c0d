//! Stack configuration
//!
//! Stored in `~/.config/foundry/stack.yaml`. The same document carries the
//! host inventory, cluster settings, DNS settings and the persisted
//! [`SetupState`].

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::error::{CoreError, Result};
use crate::state::{DnsConfig, SetupState};

/// Stack configuration file
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct StackConfig {
    /// Machines reachable over SSH
    #[serde(default)]
    pub hosts: Vec<Host>,

    #[serde(default)]
    pub cluster: ClusterConfig,

    #[serde(default)]
    pub dns: DnsConfig,

    #[serde(default)]
    pub secrets: SecretsConfig,

    /// Per-component overrides keyed by component name
    #[serde(default)]
    pub components: BTreeMap<String, ComponentOverride>,

    #[serde(default)]
    pub setup_state: SetupState,
}

impl StackConfig {
    /// First host carrying `role`
    pub fn host_for_role(&self, role: &str) -> Result<&Host> {
        self.hosts
            .iter()
            .find(|h| h.has_role(role))
            .ok_or_else(|| CoreError::HostNotFound {
                role: role.to_string(),
            })
    }

    /// Pinned version for a component, if any
    pub fn version_for(&self, component: &str) -> Option<&str> {
        self.components
            .get(component)
            .and_then(|c| c.version.as_deref())
    }
}

/// A machine in the inventory
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct Host {
    pub hostname: String,
    pub address: String,

    #[serde(default = "default_ssh_port")]
    pub port: u16,

    #[serde(default = "default_ssh_user")]
    pub user: String,

    /// Roles served by this host (`openbao`, `dns`, `zot`, `cluster`)
    #[serde(default)]
    pub roles: Vec<String>,
}

fn default_ssh_port() -> u16 {
    22
}

fn default_ssh_user() -> String {
    "root".to_string()
}

impl Host {
    /// Create a host with default port and user
    pub fn new(hostname: impl Into<String>, address: impl Into<String>) -> Self {
        Self {
            hostname: hostname.into(),
            address: address.into(),
            port: default_ssh_port(),
            user: default_ssh_user(),
            roles: Vec::new(),
        }
    }

    /// Builder: add a role
    pub fn with_role(mut self, role: impl Into<String>) -> Self {
        self.roles.push(role.into());
        self
    }

    pub fn has_role(&self, role: &str) -> bool {
        self.roles.iter().any(|r| r == role)
    }

    /// SSH destination (`user@address`)
    pub fn destination(&self) -> String {
        format!("{}@{}", self.user, self.address)
    }
}

/// Kubernetes cluster settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct ClusterConfig {
    #[serde(default = "default_cluster_name")]
    pub name: String,

    /// Virtual IP fronting the API server and ingress
    #[serde(default)]
    pub vip: Option<String>,

    /// Kubeconfig used by helm and the Kubernetes client
    #[serde(default)]
    pub kubeconfig: Option<PathBuf>,
}

fn default_cluster_name() -> String {
    "foundry".to_string()
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            name: default_cluster_name(),
            vip: None,
            kubeconfig: None,
        }
    }
}

/// Secret backend settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct SecretsConfig {
    /// Backend URL; derived from the `openbao` host when unset
    #[serde(default)]
    pub address: Option<String>,

    /// File holding the root token (`{"root_token": "..."}`)
    #[serde(default)]
    pub token_file: Option<PathBuf>,

    /// KV v2 mount used when a reference names none
    #[serde(default = "default_mount")]
    pub mount: String,
}

fn default_mount() -> String {
    "secret".to_string()
}

impl Default for SecretsConfig {
    fn default() -> Self {
        Self {
            address: None,
            token_file: None,
            mount: default_mount(),
        }
    }
}

/// Per-component overrides
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct ComponentOverride {
    #[serde(default)]
    pub version: Option<String>,
}

/// Reads and writes the stack configuration file
#[derive(Debug, Clone)]
pub struct ConfigStore {
    path: PathBuf,
}

impl ConfigStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Store at the default location
    pub fn default_location() -> Result<Self> {
        Ok(Self::new(default_config_path()?))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the configuration, or the default if the file does not exist
    pub fn load(&self) -> Result<StackConfig> {
        if !self.path.exists() {
            return Ok(StackConfig::default());
        }
        let content = std::fs::read_to_string(&self.path)?;
        if content.trim().is_empty() {
            return Ok(StackConfig::default());
        }
        let config: StackConfig = serde_yaml::from_str(&content)?;
        Ok(config)
    }

    /// Write the configuration, creating parent directories
    pub fn save(&self, config: &StackConfig) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = serde_yaml::to_string(config)?;
        std::fs::write(&self.path, content)?;
        Ok(())
    }
}

/// Directory holding foundry's local files
pub fn config_dir() -> Result<PathBuf> {
    let dir = dirs::config_dir().ok_or_else(|| CoreError::InvalidConfig {
        message: "Could not determine config directory".to_string(),
    })?;
    Ok(dir.join("foundry"))
}

/// `~/.config/foundry/stack.yaml`
pub fn default_config_path() -> Result<PathBuf> {
    Ok(config_dir()?.join("stack.yaml"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::StateFlag;
    use tempfile::TempDir;

    #[test]
    fn test_missing_file_loads_default() {
        let temp = TempDir::new().unwrap();
        let store = ConfigStore::new(temp.path().join("stack.yaml"));

        let config = store.load().unwrap();
        assert_eq!(config, StackConfig::default());
    }

    #[test]
    fn test_save_and_load() {
        let temp = TempDir::new().unwrap();
        let store = ConfigStore::new(temp.path().join("nested").join("stack.yaml"));

        let mut config = StackConfig::default();
        config
            .hosts
            .push(Host::new("bao-1", "10.0.0.10").with_role("openbao"));
        config.cluster.vip = Some("10.0.0.100".to_string());
        config.setup_state.set(StateFlag::SecretsBackend, true);

        store.save(&config).unwrap();
        let loaded = store.load().unwrap();

        assert_eq!(loaded, config);
        assert!(loaded.setup_state.openbao_installed);
    }

    #[test]
    fn test_parse_minimal_document() {
        let yaml = r#"
hosts:
  - hostname: ns1
    address: 10.0.0.11
    roles: [dns]
dns:
  local_zones: [lab.local]
components:
  grafana:
    version: "8.5.0"
"#;
        let config: StackConfig = serde_yaml::from_str(yaml).unwrap();

        let host = config.host_for_role("dns").unwrap();
        assert_eq!(host.port, 22);
        assert_eq!(host.user, "root");
        assert_eq!(host.destination(), "root@10.0.0.11");
        assert_eq!(config.dns.primary_zone(), Some("lab.local"));
        assert_eq!(config.version_for("grafana"), Some("8.5.0"));
        assert_eq!(config.version_for("loki"), None);
        assert_eq!(config.secrets.mount, "secret");
    }

    #[test]
    fn test_host_for_missing_role() {
        let config = StackConfig::default();
        let err = config.host_for_role("zot").unwrap_err();
        assert!(matches!(err, CoreError::HostNotFound { role } if role == "zot"));
    }
}
