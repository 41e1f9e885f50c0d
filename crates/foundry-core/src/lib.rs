//! Foundry Core - configuration, setup state and secrets
//!
//! This crate provides:
//! - **Stack configuration**: host inventory, cluster and DNS settings, loaded from YAML
//! - **Setup state**: persisted flags for the foundational components
//! - **Secret resolution**: `${secret:...}` references resolved through an ordered chain
//! - **Secret backend**: OpenBAO KV v2 client

pub mod config;
pub mod error;
pub mod openbao;
pub mod secrets;
pub mod state;

pub use config::{
    ClusterConfig, ComponentOverride, ConfigStore, Host, SecretsConfig, StackConfig, config_dir,
    default_config_path,
};
pub use error::{CoreError, Result};
pub use openbao::{MockSecretBackend, OpenBaoClient, SecretBackend, SecretOperationCounts};
pub use secrets::{
    BackendResolver, EnvResolver, SecretRef, SecretResolver, SecretResolverChain,
};
pub use state::{DnsConfig, SetupState, StateFlag};
