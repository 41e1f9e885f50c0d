//! Error types for foundry-core

use thiserror::Error;

/// Result type for foundry-core operations
pub type Result<T> = std::result::Result<T, CoreError>;

/// Errors raised while loading configuration or resolving secrets
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum CoreError {
    // ============ Configuration Errors ============
    #[error("Invalid configuration: {message}")]
    InvalidConfig { message: String },

    #[error("No host with role '{role}' in stack configuration\nHint: add a host with `roles: [{role}]` to the hosts section")]
    HostNotFound { role: String },

    // ============ Secret Errors ============
    #[error("Invalid secret reference '{reference}': expected ${{secret:path:key}} or ${{secret:mount:path:key}}")]
    InvalidSecretRef { reference: String },

    #[error("Secret not found: {reference}{}\nHint: set {env_var} or store it in the secrets backend", cause.as_ref().map(|c| format!(" ({})", c)).unwrap_or_default())]
    SecretNotFound {
        reference: String,
        env_var: String,
        /// Last resolver failure, when a resolver errored instead of missing
        cause: Option<String>,
    },

    #[error("Secret backend error: {message}")]
    Backend { message: String },

    #[error("Secret backend returned HTTP {status} for {path}")]
    BackendHttp { status: u16, path: String },

    // ============ Passthrough ============
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl From<reqwest::Error> for CoreError {
    fn from(e: reqwest::Error) -> Self {
        CoreError::Backend {
            message: e.to_string(),
        }
    }
}

impl CoreError {
    /// Whether this error means "the secret does not exist" rather than a failure
    pub fn is_not_found(&self) -> bool {
        matches!(self, CoreError::SecretNotFound { .. })
            || matches!(self, CoreError::BackendHttp { status: 404, .. })
    }
}
