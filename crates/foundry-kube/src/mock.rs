//! In-memory substrate clients for testing
//!
//! These record every call so tests can assert on what the reconciler did
//! without a cluster or a helm binary.

use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use crate::cluster::{ClusterClient, PodInfo};
use crate::error::{KubeError, Result};
use crate::helm::{ChartRelease, HelmClient, RepoCredentials};
use crate::release::{DeploymentRecord, ReleaseStatus};

/// A recorded helm call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HelmOperation {
    AddRepo { name: String },
    Install { name: String, namespace: String },
    Upgrade { name: String, namespace: String },
    Uninstall { name: String, namespace: String },
    List { namespace: String },
}

/// Counts of operations performed for testing assertions
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct HelmOperationCounts {
    pub repo_adds: usize,
    pub installs: usize,
    pub upgrades: usize,
    pub uninstalls: usize,
    pub lists: usize,
}

/// In-memory helm for testing
#[derive(Clone, Default)]
pub struct MockHelmClient {
    /// Storage: (namespace, name) -> release
    releases: Arc<RwLock<HashMap<(String, String), DeploymentRecord>>>,
    operations: Arc<RwLock<Vec<HelmOperation>>>,
    last_values: Arc<RwLock<HashMap<String, serde_json::Value>>>,
    failing_installs: Arc<RwLock<HashSet<String>>>,
    failing_upgrades: Arc<RwLock<HashSet<String>>>,
}

impl MockHelmClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create with pre-populated releases
    pub fn with_releases(releases: Vec<DeploymentRecord>) -> Self {
        let client = Self::new();
        for release in releases {
            client.insert_release(release);
        }
        client
    }

    pub fn insert_release(&self, release: DeploymentRecord) {
        self.releases
            .write()
            .unwrap()
            .insert((release.namespace.clone(), release.name.clone()), release);
    }

    /// Make installs of `name` fail (leaving a `failed` release behind)
    pub fn fail_install(&self, name: &str) {
        self.failing_installs.write().unwrap().insert(name.to_string());
    }

    /// Make upgrades of `name` fail
    pub fn fail_upgrade(&self, name: &str) {
        self.failing_upgrades.write().unwrap().insert(name.to_string());
    }

    pub fn release(&self, namespace: &str, name: &str) -> Option<DeploymentRecord> {
        self.releases
            .read()
            .unwrap()
            .get(&(namespace.to_string(), name.to_string()))
            .cloned()
    }

    /// Values passed to the most recent install/upgrade of `name`
    pub fn last_values(&self, name: &str) -> Option<serde_json::Value> {
        self.last_values.read().unwrap().get(name).cloned()
    }

    /// Every call in order
    pub fn operations(&self) -> Vec<HelmOperation> {
        self.operations.read().unwrap().clone()
    }

    /// Calls that change cluster state (lists and repo adds left out)
    pub fn mutations(&self) -> Vec<HelmOperation> {
        self.operations()
            .into_iter()
            .filter(|op| {
                matches!(
                    op,
                    HelmOperation::Install { .. }
                        | HelmOperation::Upgrade { .. }
                        | HelmOperation::Uninstall { .. }
                )
            })
            .collect()
    }

    pub fn operation_counts(&self) -> HelmOperationCounts {
        let mut counts = HelmOperationCounts::default();
        for op in self.operations.read().unwrap().iter() {
            match op {
                HelmOperation::AddRepo { .. } => counts.repo_adds += 1,
                HelmOperation::Install { .. } => counts.installs += 1,
                HelmOperation::Upgrade { .. } => counts.upgrades += 1,
                HelmOperation::Uninstall { .. } => counts.uninstalls += 1,
                HelmOperation::List { .. } => counts.lists += 1,
            }
        }
        counts
    }

    /// Reset the operation log
    pub fn reset_counts(&self) {
        self.operations.write().unwrap().clear();
    }

    fn record(&self, op: HelmOperation) {
        self.operations.write().unwrap().push(op);
    }

    fn store(&self, release: &ChartRelease, status: ReleaseStatus) {
        let mut record = DeploymentRecord::new(&release.name, &release.namespace, status);
        record.chart = release.chart.clone();
        record.app_version = release.version.clone().unwrap_or_default();
        self.insert_release(record);
        self.last_values
            .write()
            .unwrap()
            .insert(release.name.clone(), release.values.clone());
    }
}

#[async_trait]
impl HelmClient for MockHelmClient {
    async fn add_repo(
        &self,
        name: &str,
        _url: &str,
        _credentials: Option<&RepoCredentials>,
        _force_update: bool,
    ) -> Result<()> {
        self.record(HelmOperation::AddRepo {
            name: name.to_string(),
        });
        Ok(())
    }

    async fn install(&self, release: &ChartRelease) -> Result<()> {
        self.record(HelmOperation::Install {
            name: release.name.clone(),
            namespace: release.namespace.clone(),
        });

        if self.release(&release.namespace, &release.name).is_some() {
            return Err(KubeError::Helm {
                operation: "install".to_string(),
                stderr: format!("cannot re-use a name that is still in use: {}", release.name),
            });
        }

        if self.failing_installs.read().unwrap().contains(&release.name) {
            self.store(release, ReleaseStatus::Failed);
            return Err(KubeError::Helm {
                operation: "install".to_string(),
                stderr: "context deadline exceeded".to_string(),
            });
        }

        self.store(release, ReleaseStatus::Deployed);
        Ok(())
    }

    async fn upgrade(&self, release: &ChartRelease) -> Result<()> {
        self.record(HelmOperation::Upgrade {
            name: release.name.clone(),
            namespace: release.namespace.clone(),
        });

        if self.release(&release.namespace, &release.name).is_none() {
            return Err(KubeError::Helm {
                operation: "upgrade".to_string(),
                stderr: format!("\"{}\" has no deployed releases", release.name),
            });
        }

        if self.failing_upgrades.read().unwrap().contains(&release.name) {
            self.store(release, ReleaseStatus::Failed);
            return Err(KubeError::Helm {
                operation: "upgrade".to_string(),
                stderr: "another operation (install/upgrade/rollback) is in progress".to_string(),
            });
        }

        self.store(release, ReleaseStatus::Deployed);
        Ok(())
    }

    async fn uninstall(
        &self,
        name: &str,
        namespace: &str,
        _wait: bool,
        _timeout: Duration,
    ) -> Result<()> {
        self.record(HelmOperation::Uninstall {
            name: name.to_string(),
            namespace: namespace.to_string(),
        });

        self.releases
            .write()
            .unwrap()
            .remove(&(namespace.to_string(), name.to_string()))
            .map(|_| ())
            .ok_or_else(|| KubeError::Helm {
                operation: "uninstall".to_string(),
                stderr: format!("release: not found: {}", name),
            })
    }

    async fn list(&self, namespace: &str) -> Result<Vec<DeploymentRecord>> {
        self.record(HelmOperation::List {
            namespace: namespace.to_string(),
        });

        let mut releases: Vec<DeploymentRecord> = self
            .releases
            .read()
            .unwrap()
            .values()
            .filter(|r| r.namespace == namespace)
            .cloned()
            .collect();
        releases.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(releases)
    }
}

/// In-memory cluster for testing
#[derive(Clone, Default)]
pub struct MockClusterClient {
    pods: Arc<RwLock<HashMap<String, Vec<PodInfo>>>>,
    /// One-shot listings returned before `pods`
    queued_pods: Arc<RwLock<HashMap<String, VecDeque<Vec<PodInfo>>>>>,
    pod_calls: Arc<RwLock<HashMap<String, usize>>>,
    secrets: Arc<RwLock<HashMap<(String, String), BTreeMap<String, String>>>>,
    crds: Arc<RwLock<HashSet<String>>>,
    applied: Arc<RwLock<Vec<String>>>,
}

impl MockClusterClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Listing returned for `namespace` once queued listings run out
    pub fn set_pods(&self, namespace: &str, pods: Vec<PodInfo>) {
        self.pods.write().unwrap().insert(namespace.to_string(), pods);
    }

    /// Queue a listing returned once, before the steady-state one
    pub fn push_pods(&self, namespace: &str, pods: Vec<PodInfo>) {
        self.queued_pods
            .write()
            .unwrap()
            .entry(namespace.to_string())
            .or_default()
            .push_back(pods);
    }

    /// Mark one running pod named `name` in `namespace`
    pub fn running(&self, namespace: &str, name: &str) {
        self.set_pods(namespace, vec![PodInfo::new(name, namespace, "Running")]);
    }

    pub fn set_secret(&self, namespace: &str, name: &str, data: BTreeMap<String, String>) {
        self.secrets
            .write()
            .unwrap()
            .insert((namespace.to_string(), name.to_string()), data);
    }

    pub fn add_crd(&self, name: &str) {
        self.crds.write().unwrap().insert(name.to_string());
    }

    pub fn pod_list_calls(&self, namespace: &str) -> usize {
        self.pod_calls
            .read()
            .unwrap()
            .get(namespace)
            .copied()
            .unwrap_or(0)
    }

    /// Manifests applied so far
    pub fn applied_manifests(&self) -> Vec<String> {
        self.applied.read().unwrap().clone()
    }
}

#[async_trait]
impl ClusterClient for MockClusterClient {
    async fn get_pods(&self, namespace: &str) -> Result<Vec<PodInfo>> {
        *self
            .pod_calls
            .write()
            .unwrap()
            .entry(namespace.to_string())
            .or_default() += 1;

        if let Some(queued) = self
            .queued_pods
            .write()
            .unwrap()
            .get_mut(namespace)
            .and_then(VecDeque::pop_front)
        {
            return Ok(queued);
        }

        Ok(self
            .pods
            .read()
            .unwrap()
            .get(namespace)
            .cloned()
            .unwrap_or_default())
    }

    async fn get_secret(&self, namespace: &str, name: &str) -> Result<BTreeMap<String, String>> {
        self.secrets
            .read()
            .unwrap()
            .get(&(namespace.to_string(), name.to_string()))
            .cloned()
            .ok_or_else(|| KubeError::SecretNotFound {
                name: name.to_string(),
                namespace: namespace.to_string(),
            })
    }

    async fn crd_exists(&self, name: &str) -> Result<bool> {
        Ok(self.crds.read().unwrap().contains(name))
    }

    async fn apply_manifest(&self, manifest: &str) -> Result<()> {
        self.applied.write().unwrap().push(manifest.to_string());
        Ok(())
    }
}
