//! Health verification for freshly deployed releases
//!
//! After a helm operation the verifier lists pods in the target namespace
//! every 5 seconds until they satisfy a readiness predicate. Zero pods means
//! "not ready yet", never failure.

use std::sync::Arc;
use std::time::Duration;

use crate::cluster::{ClusterClient, PodInfo};
use crate::error::Result;
use crate::poll::{CancelToken, DEFAULT_POLL_INTERVAL, PollConfig, poll_until};

/// Default deadline for pods to come up
pub const DEFAULT_HEALTH_TIMEOUT: Duration = Duration::from_secs(300);

/// What "ready" means for a component's pods
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PodReadiness {
    /// Every pod whose name contains the substring is running (at least one)
    NameContains(String),
    /// Every pod in the namespace is running or completed (at least one running)
    AllRunning,
}

impl PodReadiness {
    pub fn name_contains(fragment: impl Into<String>) -> Self {
        Self::NameContains(fragment.into())
    }

    /// Evaluate against a pod listing
    pub fn is_satisfied(&self, pods: &[PodInfo]) -> bool {
        match self {
            PodReadiness::NameContains(fragment) => {
                let matching: Vec<&PodInfo> =
                    pods.iter().filter(|p| p.name.contains(fragment.as_str())).collect();
                !matching.is_empty() && matching.iter().all(|p| p.is_running())
            }
            PodReadiness::AllRunning => {
                pods.iter().any(PodInfo::is_running)
                    && pods
                        .iter()
                        .all(|p| p.is_running() || p.phase == "Succeeded")
            }
        }
    }

    /// Short description for logs and timeout errors
    pub fn describe(&self, namespace: &str) -> String {
        match self {
            PodReadiness::NameContains(fragment) => {
                format!("pods matching '{}' in {} to be running", fragment, namespace)
            }
            PodReadiness::AllRunning => format!("all pods in {} to be running", namespace),
        }
    }
}

/// Polls pod state until a readiness predicate holds
pub struct HealthVerifier {
    cluster: Arc<dyn ClusterClient>,
    interval: Duration,
}

impl HealthVerifier {
    pub fn new(cluster: Arc<dyn ClusterClient>) -> Self {
        Self {
            cluster,
            interval: DEFAULT_POLL_INTERVAL,
        }
    }

    /// Override the poll cadence
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Wait until `readiness` holds for `namespace`
    pub async fn verify(
        &self,
        namespace: &str,
        readiness: &PodReadiness,
        timeout: Duration,
        cancel: &CancelToken,
    ) -> Result<()> {
        let what = readiness.describe(namespace);
        tracing::info!("waiting for {}", what);

        let cluster = &self.cluster;
        poll_until(
            &what,
            PollConfig::new(self.interval, timeout),
            cancel,
            move || async move {
                let pods = cluster.get_pods(namespace).await?;
                let ready = readiness.is_satisfied(&pods);
                tracing::debug!(
                    "{}: {}/{} running",
                    namespace,
                    pods.iter().filter(|p| p.is_running()).count(),
                    pods.len()
                );
                Ok(ready)
            },
        )
        .await
    }
}
