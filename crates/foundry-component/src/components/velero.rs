//! Velero backups into SeaweedFS
//!
//! Before install the S3 credentials are read from the SeaweedFS secret
//! and handed to the chart as the backup location's credentials.

use async_trait::async_trait;
use foundry_kube::PodReadiness;
use serde_json::{Value, json};

use super::chart::HelmChart;
use super::charts::{SEAWEEDFS_NAMESPACE, SEAWEEDFS_S3_ENDPOINT, SEAWEEDFS_S3_SECRET};
use crate::component::{Component, ComponentSpec, ComponentStatus, Target};
use crate::config::ComponentConfig;
use crate::error::{ComponentError, KubeContext, Result};

pub const NAME: &str = "velero";
pub const NAMESPACE: &str = "velero";
pub const BUCKET: &str = "velero";

const ACCESS_KEY: &str = "s3_access_key";
const SECRET_KEY: &str = "s3_secret_key";
const S3_ENDPOINT: &str = "s3_endpoint";

pub struct Velero {
    chart: HelmChart,
}

impl Velero {
    pub fn new() -> Self {
        let spec = ComponentSpec::kubernetes(NAME)
            .depends_on(&["seaweedfs"])
            .release(NAME, NAMESPACE)
            .stateful()
            .readiness(
                NAMESPACE,
                PodReadiness::name_contains("velero"),
                foundry_kube::DEFAULT_HEALTH_TIMEOUT,
            );

        Self {
            chart: HelmChart::new(spec, "vmware-tanzu/velero", values)
                .with_repo("vmware-tanzu", "https://vmware-tanzu.github.io/helm-charts")
                .with_version("8.1.0"),
        }
    }
}

impl Default for Velero {
    fn default() -> Self {
        Self::new()
    }
}

fn values(cfg: &ComponentConfig) -> Result<Value> {
    let credentials = format!(
        "[default]\naws_access_key_id={}\naws_secret_access_key={}\n",
        cfg.require_str(ACCESS_KEY)?,
        cfg.require_str(SECRET_KEY)?
    );

    Ok(json!({
        "initContainers": [{
            "name": "velero-plugin-for-aws",
            "image": "velero/velero-plugin-for-aws:v1.11.0",
            "volumeMounts": [{ "mountPath": "/target", "name": "plugins" }],
        }],
        "configuration": {
            "backupStorageLocation": [{
                "name": "default",
                "provider": "aws",
                "bucket": BUCKET,
                "config": {
                    "region": "us-east-1",
                    "s3ForcePathStyle": "true",
                    "s3Url": cfg.require_str(S3_ENDPOINT)?,
                },
            }],
            "volumeSnapshotLocation": [],
        },
        "credentials": {
            "useSecret": true,
            "secretContents": { "cloud": credentials },
        },
        "snapshotsEnabled": false,
        "deployNodeAgent": true,
    }))
}

#[async_trait]
impl Component for Velero {
    fn spec(&self) -> &ComponentSpec {
        self.chart.spec()
    }

    async fn prepare(&self, target: Target<'_>, cfg: &mut ComponentConfig) -> Result<()> {
        let handle = target.cluster(NAME)?;
        let secret = handle
            .cluster
            .get_secret(SEAWEEDFS_NAMESPACE, SEAWEEDFS_S3_SECRET)
            .await
            .context("reading SeaweedFS S3 credentials")?;

        let field = |key: &str| {
            secret
                .get(key)
                .cloned()
                .ok_or_else(|| ComponentError::InvalidConfig {
                    message: format!("secret {} has no '{}' key", SEAWEEDFS_S3_SECRET, key),
                })
        };
        cfg.set_secret(ACCESS_KEY, field("admin_access_key_id")?);
        cfg.set_secret(SECRET_KEY, field("admin_secret_access_key")?);
        cfg.set(S3_ENDPOINT, SEAWEEDFS_S3_ENDPOINT);
        Ok(())
    }

    async fn install(&self, target: Target<'_>, cfg: &ComponentConfig) -> Result<()> {
        self.chart.install(target, cfg).await
    }

    async fn upgrade(&self, target: Target<'_>, cfg: &ComponentConfig) -> Result<()> {
        self.chart.upgrade(target, cfg).await
    }

    async fn status(&self, target: Target<'_>) -> Result<ComponentStatus> {
        self.chart.status(target).await
    }

    async fn uninstall(&self, target: Target<'_>) -> Result<()> {
        self.chart.uninstall(target).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::component::ClusterHandle;
    use foundry_kube::{MockClusterClient, MockHelmClient};
    use std::collections::BTreeMap;
    use std::sync::Arc;

    fn handle() -> (Arc<MockHelmClient>, Arc<MockClusterClient>, ClusterHandle) {
        let helm = Arc::new(MockHelmClient::new());
        let cluster = Arc::new(MockClusterClient::new());
        let handle = ClusterHandle::new(helm.clone(), cluster.clone());
        (helm, cluster, handle)
    }

    #[tokio::test]
    async fn test_prepare_reads_seaweedfs_credentials() {
        let (helm, cluster, handle) = handle();
        cluster.set_secret(
            SEAWEEDFS_NAMESPACE,
            SEAWEEDFS_S3_SECRET,
            BTreeMap::from([
                ("admin_access_key_id".to_string(), "AKID".to_string()),
                ("admin_secret_access_key".to_string(), "SECRET".to_string()),
            ]),
        );

        let velero = Velero::new();
        let mut cfg = ComponentConfig::new();
        velero.prepare(Target::Cluster(&handle), &mut cfg).await.unwrap();
        assert!(cfg.is_secret(ACCESS_KEY));

        velero.install(Target::Cluster(&handle), &cfg).await.unwrap();
        let values = helm.last_values(NAME).unwrap();
        let cloud = values["credentials"]["secretContents"]["cloud"].as_str().unwrap();
        assert!(cloud.contains("aws_access_key_id=AKID"));
        assert_eq!(
            values["configuration"]["backupStorageLocation"][0]["config"]["s3Url"],
            SEAWEEDFS_S3_ENDPOINT
        );
    }

    #[tokio::test]
    async fn test_prepare_without_secret_fails() {
        let (_helm, _cluster, handle) = handle();
        let mut cfg = ComponentConfig::new();
        let err = Velero::new()
            .prepare(Target::Cluster(&handle), &mut cfg)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("SeaweedFS S3 credentials"));
    }
}
