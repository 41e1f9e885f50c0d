//! Foundry Kube - the Kubernetes substrate
//!
//! This crate provides:
//! - **Helm client**: install/upgrade/uninstall/list releases through the `helm` binary
//! - **Cluster client**: pods, secrets, CRD checks and manifest apply via the Kubernetes API
//! - **Polling**: a fixed-interval poll loop with deadline and cancellation
//! - **Health verification**: wait for a component's pods to be running
//! - **Mocks**: in-memory helm and cluster clients that record every call

pub mod cluster;
pub mod error;
pub mod health;
pub mod helm;
pub mod mock;
pub mod poll;
pub mod release;

pub use cluster::{ClusterClient, KubeCluster, PodInfo};
pub use error::{KubeError, Result};
pub use health::{DEFAULT_HEALTH_TIMEOUT, HealthVerifier, PodReadiness};
pub use helm::{ChartRelease, DEFAULT_HELM_TIMEOUT, HelmCli, HelmClient, RepoCredentials};
pub use mock::{HelmOperation, HelmOperationCounts, MockClusterClient, MockHelmClient};
pub use poll::{CancelHandle, CancelToken, DEFAULT_POLL_INTERVAL, PollConfig, poll_until};
pub use release::{DeploymentRecord, ReleaseStatus};
