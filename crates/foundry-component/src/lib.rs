//! Foundry Component - lifecycle orchestration for platform components
//!
//! This crate provides:
//! - **Component registry**: named components with their dependencies and substrate
//! - **Reconciler**: install, upgrade, repair or skip based on observed state
//! - **Substrates**: SSH-driven hosts and the Kubernetes cluster
//! - **DNS self-registration**: A records for foundational services in PowerDNS
//! - **Built-in components**: OpenBAO, PowerDNS, Zot, K3s and the cluster add-ons

pub mod component;
pub mod components;
pub mod config;
pub mod dns;
pub mod error;
pub mod reconciler;
pub mod registry;
pub mod ssh;

pub use component::{
    ClusterHandle, Component, ComponentSpec, ComponentStatus, Readiness, RefreshPolicy,
    ReleaseRef, SecretRequirement, SecretSource, Substrate, Target,
};
pub use components::{ComponentPaths, default_registry, register_all};
pub use config::{ComponentConfig, keys};
pub use dns::{
    ARecord, DnsClient, DnsConnector, DnsRegistrar, MockDnsClient, PowerDnsClient,
    PowerDnsConnector,
};
pub use error::{ComponentError, Result};
pub use reconciler::{
    Action, InstallOptions, ReconcileAction, ReconcileOutcome, Reconciler, plan,
};
pub use registry::Registry;
pub use ssh::{
    MockRemoteConnector, MockRemoteExecutor, RemoteConnector, RemoteExecutor, SshConnector,
    SshExecutor,
};
