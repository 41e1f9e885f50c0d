//! The `Component` capability and its registration metadata

use async_trait::async_trait;
use foundry_core::{StackConfig, StateFlag};
use foundry_kube::{ClusterClient, HelmClient, PodReadiness};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::config::ComponentConfig;
use crate::error::{ComponentError, Result};
use crate::ssh::RemoteExecutor;

/// Where a component is installed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Substrate {
    /// Commands executed over SSH on the host carrying `role`
    Host { role: String },
    /// Workloads deployed into the cluster
    Kubernetes,
}

impl fmt::Display for Substrate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Substrate::Host { role } => write!(f, "host ({})", role),
            Substrate::Kubernetes => f.write_str("kubernetes"),
        }
    }
}

/// What to do when the release is already deployed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RefreshPolicy {
    /// Leave the release alone
    #[default]
    Skip,
    /// Re-apply values with an upgrade on every invocation
    Upgrade,
}

/// Reserved release name and namespace of a Helm-backed component
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReleaseRef {
    pub name: String,
    pub namespace: String,
}

/// Pod readiness check run after a Helm operation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Readiness {
    pub namespace: String,
    pub predicate: PodReadiness,
    pub timeout: Duration,
}

/// Where the `${secret:...}` reference of a requirement comes from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SecretSource {
    /// A reference fixed at registration
    Reference(String),
    /// The reference configured as `dns.api_key` in the stack file
    DnsApiKey,
}

impl SecretSource {
    pub fn reference<'a>(&'a self, config: &'a StackConfig) -> &'a str {
        match self {
            SecretSource::Reference(reference) => reference,
            SecretSource::DnsApiKey => &config.dns.api_key,
        }
    }
}

/// A secret that must be resolved before install
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecretRequirement {
    /// Key it is stored under in the `ComponentConfig`
    pub key: String,
    pub source: SecretSource,
}

/// Static registration metadata
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComponentSpec {
    pub name: String,

    /// Checked in declared order
    pub dependencies: Vec<String>,

    pub substrate: Substrate,

    /// Foundational components record installation in `SetupState`
    pub state_flag: Option<StateFlag>,

    pub release: Option<ReleaseRef>,

    /// Owns persistent volumes; never uninstalled during repair
    pub stateful: bool,

    pub refresh: RefreshPolicy,

    pub readiness: Option<Readiness>,

    pub secrets: Vec<SecretRequirement>,

    /// Present as soon as the cluster exists (ships with k3s)
    pub bundled: bool,
}

impl ComponentSpec {
    fn new(name: &str, substrate: Substrate) -> Self {
        Self {
            name: name.to_string(),
            dependencies: Vec::new(),
            substrate,
            state_flag: None,
            release: None,
            stateful: false,
            refresh: RefreshPolicy::Skip,
            readiness: None,
            secrets: Vec::new(),
            bundled: false,
        }
    }

    /// A component installed over SSH on the host with `role`
    pub fn host(name: &str, role: &str, flag: StateFlag) -> Self {
        let mut spec = Self::new(
            name,
            Substrate::Host {
                role: role.to_string(),
            },
        );
        spec.state_flag = Some(flag);
        spec
    }

    /// A component deployed into the cluster
    pub fn kubernetes(name: &str) -> Self {
        Self::new(name, Substrate::Kubernetes)
    }

    pub fn depends_on(mut self, dependencies: &[&str]) -> Self {
        self.dependencies = dependencies.iter().map(|d| d.to_string()).collect();
        self
    }

    /// Reserve a release name; readiness defaults to all pods in the namespace
    pub fn release(mut self, name: &str, namespace: &str) -> Self {
        self.release = Some(ReleaseRef {
            name: name.to_string(),
            namespace: namespace.to_string(),
        });
        self.readiness.get_or_insert(Readiness {
            namespace: namespace.to_string(),
            predicate: PodReadiness::AllRunning,
            timeout: foundry_kube::DEFAULT_HEALTH_TIMEOUT,
        });
        self
    }

    pub fn stateful(mut self) -> Self {
        self.stateful = true;
        self
    }

    pub fn refresh(mut self, policy: RefreshPolicy) -> Self {
        self.refresh = policy;
        self
    }

    pub fn readiness(mut self, namespace: &str, predicate: PodReadiness, timeout: Duration) -> Self {
        self.readiness = Some(Readiness {
            namespace: namespace.to_string(),
            predicate,
            timeout,
        });
        self
    }

    pub fn no_readiness(mut self) -> Self {
        self.readiness = None;
        self
    }

    pub fn secret(mut self, key: &str, reference: &str) -> Self {
        self.secrets.push(SecretRequirement {
            key: key.to_string(),
            source: SecretSource::Reference(reference.to_string()),
        });
        self
    }

    /// Require the DNS API key under `key`, using the configured reference
    pub fn dns_api_key(mut self, key: &str) -> Self {
        self.secrets.push(SecretRequirement {
            key: key.to_string(),
            source: SecretSource::DnsApiKey,
        });
        self
    }

    pub fn bundled(mut self) -> Self {
        self.bundled = true;
        self
    }

    pub fn is_foundational(&self) -> bool {
        self.state_flag.is_some()
    }

    /// Name used for the component's A record
    pub fn dns_name(&self) -> &str {
        &self.name
    }
}

/// Point-in-time view of a component; never cached
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ComponentStatus {
    pub installed: bool,
    pub version: String,
    pub healthy: bool,
    pub message: String,
}

impl ComponentStatus {
    pub fn not_installed() -> Self {
        Self {
            message: "not installed".to_string(),
            ..Default::default()
        }
    }

    pub fn running(version: impl Into<String>) -> Self {
        Self {
            installed: true,
            version: version.into(),
            healthy: true,
            message: "running".to_string(),
        }
    }

    pub fn unhealthy(version: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            installed: true,
            version: version.into(),
            healthy: false,
            message: message.into(),
        }
    }
}

/// Kubernetes substrate clients
#[derive(Clone)]
pub struct ClusterHandle {
    pub helm: Arc<dyn HelmClient>,
    pub cluster: Arc<dyn ClusterClient>,
}

impl ClusterHandle {
    pub fn new(helm: Arc<dyn HelmClient>, cluster: Arc<dyn ClusterClient>) -> Self {
        Self { helm, cluster }
    }
}

/// The substrate a capability call operates on
#[derive(Clone, Copy)]
pub enum Target<'a> {
    Host(&'a dyn RemoteExecutor),
    Cluster(&'a ClusterHandle),
}

impl<'a> Target<'a> {
    /// Remote executor, or `WrongSubstrate`
    pub fn executor(&self, component: &str) -> Result<&'a dyn RemoteExecutor> {
        match *self {
            Target::Host(exec) => Ok(exec),
            Target::Cluster(_) => Err(self.mismatch(component, "host")),
        }
    }

    /// Cluster clients, or `WrongSubstrate`
    pub fn cluster(&self, component: &str) -> Result<&'a ClusterHandle> {
        match *self {
            Target::Cluster(handle) => Ok(handle),
            Target::Host(_) => Err(self.mismatch(component, "kubernetes")),
        }
    }

    fn mismatch(&self, component: &str, expected: &str) -> ComponentError {
        let actual = match self {
            Target::Host(_) => "host",
            Target::Cluster(_) => "kubernetes",
        };
        ComponentError::WrongSubstrate {
            component: component.to_string(),
            expected: expected.to_string(),
            actual: actual.to_string(),
        }
    }
}

/// An independently installable unit of the stack
#[async_trait]
pub trait Component: Send + Sync {
    /// Registration metadata
    fn spec(&self) -> &ComponentSpec;

    fn name(&self) -> &str {
        &self.spec().name
    }

    /// Reject bad input before any side effect
    fn validate(&self, _cfg: &ComponentConfig) -> Result<()> {
        Ok(())
    }

    /// Collect values from dependencies into `cfg`
    async fn prepare(&self, _target: Target<'_>, _cfg: &mut ComponentConfig) -> Result<()> {
        Ok(())
    }

    async fn install(&self, target: Target<'_>, cfg: &ComponentConfig) -> Result<()>;

    async fn upgrade(&self, target: Target<'_>, cfg: &ComponentConfig) -> Result<()>;

    async fn status(&self, target: Target<'_>) -> Result<ComponentStatus>;

    async fn uninstall(&self, target: Target<'_>) -> Result<()>;
}
