//! Error types for component orchestration

use foundry_core::CoreError;
use foundry_kube::KubeError;
use thiserror::Error;

/// Result type for foundry-component operations
pub type Result<T> = std::result::Result<T, ComponentError>;

/// Errors raised while reconciling a component
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ComponentError {
    // ============ Validation Errors ============
    #[error("component '{name}' not found{}", suggestion.as_ref().map(|s| format!("\nHint: did you mean '{}'?", s)).unwrap_or_default())]
    ComponentNotFound {
        name: String,
        suggestion: Option<String>,
    },

    #[error("component '{name}' is already registered")]
    AlreadyRegistered { name: String },

    #[error("component '{component}' requires --{flag}")]
    MissingFlag { component: String, flag: String },

    #[error("missing configuration value '{key}'")]
    MissingConfig { key: String },

    #[error("invalid configuration: {message}")]
    InvalidConfig { message: String },

    #[error("{operation} is not supported for component '{component}'")]
    Unsupported { component: String, operation: String },

    #[error("component '{component}' runs on {expected}, not on {actual}")]
    WrongSubstrate {
        component: String,
        expected: String,
        actual: String,
    },

    #[error("no Kubernetes client available\nHint: check cluster.kubeconfig in the stack configuration")]
    ClusterUnavailable,

    // ============ Dependency Errors ============
    #[error("cannot install '{component}': dependency '{dependency}' is not installed\nHint: {hint}")]
    DependencyNotSatisfied {
        component: String,
        dependency: String,
        hint: String,
    },

    // ============ Substrate Errors ============
    #[error("host {host} is unreachable: {message}")]
    HostUnreachable { host: String, message: String },

    #[error("remote command failed on {host} (exit code {}): {stderr}", exit_code.map(|c| c.to_string()).unwrap_or_else(|| "none".to_string()))]
    RemoteCommand {
        host: String,
        exit_code: Option<i32>,
        stdout: String,
        stderr: String,
    },

    #[error("failed to download {url}: {message}")]
    Download { url: String, message: String },

    #[error("DNS API error: {message}")]
    Dns { message: String },

    #[error("{context}: {source}")]
    Kube {
        context: String,
        #[source]
        source: KubeError,
    },

    // ============ Partial Failure ============
    #[error("{component}: release '{release}' was '{status}' and the in-place upgrade failed: {source}

Manual intervention required (automatic repair could destroy persistent data):
  1. Inspect pods:                kubectl get pods -n {namespace}
  2. Inspect volume claims:       kubectl get pvc -n {namespace}
  3. Review release history:      helm history {release} -n {namespace}
  4. If the data can be discarded: helm uninstall {release} -n {namespace}
  5. Then re-run:                 foundry component install {component}")]
    ManualIntervention {
        component: String,
        release: String,
        namespace: String,
        status: String,
        #[source]
        source: Box<ComponentError>,
    },

    #[error("operation cancelled")]
    Cancelled,

    // ============ Passthrough ============
    #[error(transparent)]
    Core(#[from] CoreError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(String),
}

impl From<KubeError> for ComponentError {
    fn from(e: KubeError) -> Self {
        match e {
            KubeError::Cancelled => ComponentError::Cancelled,
            source => ComponentError::Kube {
                context: "kubernetes".to_string(),
                source,
            },
        }
    }
}

impl From<serde_json::Error> for ComponentError {
    fn from(e: serde_json::Error) -> Self {
        ComponentError::Serialization(e.to_string())
    }
}

/// Attach an operation description to substrate errors
pub trait KubeContext<T> {
    fn context(self, context: impl Into<String>) -> Result<T>;
}

impl<T> KubeContext<T> for std::result::Result<T, KubeError> {
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|source| match source {
            KubeError::Cancelled => ComponentError::Cancelled,
            source => ComponentError::Kube {
                context: context.into(),
                source,
            },
        })
    }
}

impl ComponentError {
    /// Input problems detected before any side effect
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            ComponentError::ComponentNotFound { .. }
                | ComponentError::AlreadyRegistered { .. }
                | ComponentError::MissingFlag { .. }
                | ComponentError::MissingConfig { .. }
                | ComponentError::InvalidConfig { .. }
                | ComponentError::Unsupported { .. }
                | ComponentError::WrongSubstrate { .. }
                | ComponentError::Core(CoreError::HostNotFound { .. })
                | ComponentError::Core(CoreError::InvalidSecretRef { .. })
                | ComponentError::Core(CoreError::InvalidConfig { .. })
        )
    }

    pub fn is_dependency(&self) -> bool {
        matches!(self, ComponentError::DependencyNotSatisfied { .. })
    }

    pub fn is_manual_intervention(&self) -> bool {
        matches!(self, ComponentError::ManualIntervention { .. })
    }
}
