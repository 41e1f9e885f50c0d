//! Error types for foundry-kube

use std::time::Duration;
use thiserror::Error;

/// Result type for foundry-kube operations
pub type Result<T> = std::result::Result<T, KubeError>;

/// Errors that can occur on the Kubernetes substrate
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum KubeError {
    /// Kubernetes API error
    #[error("Kubernetes API error: {0}")]
    Api(#[from] kube::Error),

    /// Could not build a client from the kubeconfig
    #[error("kubeconfig error: {0}")]
    Kubeconfig(String),

    /// A helm invocation exited non-zero
    #[error("helm {operation} failed: {stderr}")]
    Helm { operation: String, stderr: String },

    /// The helm binary could not be started
    #[error("failed to execute helm: {0}")]
    HelmSpawn(#[source] std::io::Error),

    /// Secret not found
    #[error("secret '{name}' not found in namespace '{namespace}'")]
    SecretNotFound { name: String, namespace: String },

    /// Poll deadline elapsed
    #[error("timed out after {}s waiting for {what}", elapsed.as_secs())]
    Timeout { what: String, elapsed: Duration },

    /// Caller cancelled the operation
    #[error("operation cancelled")]
    Cancelled,

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Invalid manifest
    #[error("invalid manifest: {0}")]
    InvalidManifest(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<serde_json::Error> for KubeError {
    fn from(e: serde_json::Error) -> Self {
        KubeError::Serialization(e.to_string())
    }
}

impl From<serde_yaml::Error> for KubeError {
    fn from(e: serde_yaml::Error) -> Self {
        KubeError::Serialization(e.to_string())
    }
}

impl KubeError {
    /// Check if this is a Kubernetes 404 Not Found error
    pub fn is_not_found(&self) -> bool {
        matches!(self, KubeError::Api(kube::Error::Api(resp)) if resp.code == 404)
            || matches!(self, KubeError::SecretNotFound { .. })
    }

    /// Check if this is a conflict error (409)
    pub fn is_conflict(&self) -> bool {
        matches!(self, KubeError::Api(kube::Error::Api(resp)) if resp.code == 409)
    }
}
