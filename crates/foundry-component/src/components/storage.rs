//! Persistent volume provisioning
//!
//! K3s ships the local-path provisioner, so `local-path` needs no install
//! and the component counts as present as soon as the cluster is up. The
//! `nfs` backend installs the NFS subdir provisioner chart and makes its
//! storage class the default.

use async_trait::async_trait;
use foundry_kube::{ClusterClient, PodReadiness};
use serde_json::{Value, json};
use std::time::Duration;

use super::chart::HelmChart;
use crate::component::{Component, ComponentSpec, ComponentStatus, Target};
use crate::config::{ComponentConfig, keys};
use crate::error::{ComponentError, KubeContext, Result};

pub const NAME: &str = "storage";
pub const NAMESPACE: &str = "kube-system";
pub const RELEASE: &str = "nfs-provisioner";

/// Storage backend selected with `--storage-backend`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageBackend {
    LocalPath,
    Nfs,
}

impl StorageBackend {
    pub fn from_config(cfg: &ComponentConfig) -> Result<Self> {
        match cfg.get_str(keys::STORAGE_BACKEND).unwrap_or("local-path") {
            "local-path" => Ok(StorageBackend::LocalPath),
            "nfs" => Ok(StorageBackend::Nfs),
            other => Err(ComponentError::InvalidConfig {
                message: format!(
                    "unknown storage backend '{}' (expected local-path or nfs)",
                    other
                ),
            }),
        }
    }
}

pub struct Storage {
    nfs: HelmChart,
}

impl Storage {
    pub fn new() -> Self {
        let spec = ComponentSpec::kubernetes(NAME)
            .depends_on(&["k3s"])
            .bundled()
            .release(RELEASE, NAMESPACE)
            .readiness(
                NAMESPACE,
                PodReadiness::name_contains("provisioner"),
                Duration::from_secs(180),
            );

        Self {
            nfs: HelmChart::new(
                spec,
                "nfs-subdir-external-provisioner/nfs-subdir-external-provisioner",
                nfs_values,
            )
            .with_repo(
                "nfs-subdir-external-provisioner",
                "https://kubernetes-sigs.github.io/nfs-subdir-external-provisioner/",
            )
            .with_version("4.0.18"),
        }
    }
}

impl Default for Storage {
    fn default() -> Self {
        Self::new()
    }
}

fn nfs_values(cfg: &ComponentConfig) -> Result<Value> {
    Ok(json!({
        "nfs": {
            "server": cfg.require_str(keys::NFS_SERVER)?,
            "path": cfg.require_str(keys::NFS_PATH)?,
        },
        "storageClass": {
            "name": "nfs-client",
            "defaultClass": true,
            "reclaimPolicy": "Retain",
            "archiveOnDelete": true,
        },
    }))
}

async fn local_path_status(cluster: &dyn ClusterClient) -> Result<ComponentStatus> {
    let pods = cluster
        .get_pods(NAMESPACE)
        .await
        .context("listing kube-system pods")?;
    let readiness = PodReadiness::name_contains("local-path-provisioner");
    if readiness.is_satisfied(&pods) {
        Ok(ComponentStatus::running("bundled"))
    } else {
        Ok(ComponentStatus::unhealthy(
            "bundled",
            "local-path provisioner is not running",
        ))
    }
}

#[async_trait]
impl Component for Storage {
    fn spec(&self) -> &ComponentSpec {
        self.nfs.spec()
    }

    fn validate(&self, cfg: &ComponentConfig) -> Result<()> {
        if StorageBackend::from_config(cfg)? == StorageBackend::Nfs {
            for flag in [keys::NFS_SERVER, keys::NFS_PATH] {
                if cfg.get_str(flag).is_none() {
                    return Err(ComponentError::MissingFlag {
                        component: NAME.to_string(),
                        flag: flag.replace('_', "-"),
                    });
                }
            }
        }
        Ok(())
    }

    async fn install(&self, target: Target<'_>, cfg: &ComponentConfig) -> Result<()> {
        match StorageBackend::from_config(cfg)? {
            StorageBackend::LocalPath => {
                tracing::info!("using the bundled local-path provisioner");
                target.cluster(NAME)?;
                Ok(())
            }
            StorageBackend::Nfs => self.nfs.install(target, cfg).await,
        }
    }

    async fn upgrade(&self, target: Target<'_>, cfg: &ComponentConfig) -> Result<()> {
        match StorageBackend::from_config(cfg)? {
            StorageBackend::LocalPath => Ok(()),
            StorageBackend::Nfs => self.nfs.upgrade(target, cfg).await,
        }
    }

    async fn status(&self, target: Target<'_>) -> Result<ComponentStatus> {
        let status = self.nfs.status(target).await?;
        if status.installed {
            return Ok(status);
        }
        local_path_status(target.cluster(NAME)?.cluster.as_ref()).await
    }

    async fn uninstall(&self, target: Target<'_>) -> Result<()> {
        self.nfs.uninstall(target).await
    }
}
