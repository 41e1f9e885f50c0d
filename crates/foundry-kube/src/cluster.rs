//! Cluster-introspection client

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{Pod, Secret};
use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
use kube::{
    Client, Config,
    api::{Api, DynamicObject, ListParams, Patch, PatchParams},
    config::{KubeConfigOptions, Kubeconfig},
    core::{GroupVersionKind, TypeMeta},
    discovery::{Discovery, Scope},
};
use std::collections::BTreeMap;
use std::path::Path;

use crate::error::{KubeError, Result};

const FIELD_MANAGER: &str = "foundry";

/// Minimal view of a pod
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PodInfo {
    pub name: String,
    pub namespace: String,
    /// Pod phase (`Pending`, `Running`, `Succeeded`, `Failed`, `Unknown`)
    pub phase: String,
}

impl PodInfo {
    pub fn new(name: impl Into<String>, namespace: impl Into<String>, phase: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespace: namespace.into(),
            phase: phase.into(),
        }
    }

    pub fn is_running(&self) -> bool {
        self.phase == "Running"
    }
}

/// Read access to the cluster plus manifest apply
#[async_trait]
pub trait ClusterClient: Send + Sync {
    /// Pods in a namespace
    async fn get_pods(&self, namespace: &str) -> Result<Vec<PodInfo>>;

    /// Decoded data of a secret
    async fn get_secret(&self, namespace: &str, name: &str) -> Result<BTreeMap<String, String>>;

    /// Whether a CustomResourceDefinition is installed
    async fn crd_exists(&self, name: &str) -> Result<bool>;

    /// Server-side apply a multi-document YAML manifest
    async fn apply_manifest(&self, manifest: &str) -> Result<()>;
}

/// [`ClusterClient`] backed by the Kubernetes API
#[derive(Clone)]
pub struct KubeCluster {
    client: Client,
}

impl KubeCluster {
    /// Connect using an explicit kubeconfig, or the default resolution
    pub async fn connect(kubeconfig: Option<&Path>) -> Result<Self> {
        let client = match kubeconfig {
            Some(path) => {
                let kubeconfig = Kubeconfig::read_from(path)
                    .map_err(|e| KubeError::Kubeconfig(e.to_string()))?;
                let config =
                    Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
                        .await
                        .map_err(|e| KubeError::Kubeconfig(e.to_string()))?;
                Client::try_from(config)?
            }
            None => Client::try_default().await?,
        };
        Ok(Self { client })
    }

    /// Create with an existing Kubernetes client
    pub fn with_client(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ClusterClient for KubeCluster {
    async fn get_pods(&self, namespace: &str) -> Result<Vec<PodInfo>> {
        let api: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        let pods = api.list(&ListParams::default()).await?;

        Ok(pods
            .items
            .into_iter()
            .map(|pod| PodInfo {
                name: pod.metadata.name.unwrap_or_default(),
                namespace: pod
                    .metadata
                    .namespace
                    .unwrap_or_else(|| namespace.to_string()),
                phase: pod
                    .status
                    .and_then(|s| s.phase)
                    .unwrap_or_else(|| "Unknown".to_string()),
            })
            .collect())
    }

    async fn get_secret(&self, namespace: &str, name: &str) -> Result<BTreeMap<String, String>> {
        let api: Api<Secret> = Api::namespaced(self.client.clone(), namespace);
        let secret = api
            .get_opt(name)
            .await?
            .ok_or_else(|| KubeError::SecretNotFound {
                name: name.to_string(),
                namespace: namespace.to_string(),
            })?;

        let mut data: BTreeMap<String, String> = secret
            .data
            .unwrap_or_default()
            .into_iter()
            .map(|(k, v)| (k, String::from_utf8_lossy(&v.0).to_string()))
            .collect();
        if let Some(plain) = secret.string_data {
            data.extend(plain);
        }
        Ok(data)
    }

    async fn crd_exists(&self, name: &str) -> Result<bool> {
        let api: Api<CustomResourceDefinition> = Api::all(self.client.clone());
        Ok(api.get_opt(name).await?.is_some())
    }

    async fn apply_manifest(&self, manifest: &str) -> Result<()> {
        let discovery = Discovery::new(self.client.clone()).run().await?;
        let mut params = PatchParams::apply(FIELD_MANAGER);
        params.force = true;

        for (index, doc) in split_documents(manifest).into_iter().enumerate() {
            let obj: DynamicObject = serde_yaml::from_str(doc).map_err(|e| {
                KubeError::InvalidManifest(format!("document {}: {}", index, e))
            })?;
            let type_meta = obj.types.as_ref().ok_or_else(|| {
                KubeError::InvalidManifest(format!("document {} missing apiVersion or kind", index))
            })?;
            let gvk = gvk_from_type_meta(type_meta);
            let (resource, capabilities) = discovery.resolve_gvk(&gvk).ok_or_else(|| {
                KubeError::InvalidManifest(format!(
                    "unknown resource type {}/{}",
                    type_meta.api_version, type_meta.kind
                ))
            })?;
            let name = obj.metadata.name.clone().ok_or_else(|| {
                KubeError::InvalidManifest(format!("document {} missing metadata.name", index))
            })?;

            let api: Api<DynamicObject> = if capabilities.scope == Scope::Namespaced {
                let ns = obj.metadata.namespace.as_deref().unwrap_or("default");
                Api::namespaced_with(self.client.clone(), ns, &resource)
            } else {
                Api::all_with(self.client.clone(), &resource)
            };

            tracing::debug!("applying {} {}", gvk.kind, name);
            api.patch(&name, &params, &Patch::Apply(&obj)).await?;
        }
        Ok(())
    }
}

/// Non-empty documents of a multi-document YAML stream
fn split_documents(manifest: &str) -> Vec<&str> {
    manifest
        .split("\n---")
        .map(str::trim)
        .map(|doc| doc.strip_prefix("---").unwrap_or(doc).trim())
        .filter(|doc| {
            !doc.lines()
                .all(|l| l.trim().is_empty() || l.trim().starts_with('#'))
        })
        .collect()
}

/// Convert TypeMeta to GroupVersionKind
fn gvk_from_type_meta(tm: &TypeMeta) -> GroupVersionKind {
    let (group, version) = match tm.api_version.rsplit_once('/') {
        Some((g, v)) => (g.to_string(), v.to_string()),
        None => (String::new(), tm.api_version.clone()),
    };

    GroupVersionKind {
        group,
        version,
        kind: tm.kind.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_documents_skips_comments() {
        let manifest = "---\n# header only\n---\napiVersion: v1\nkind: Namespace\nmetadata:\n  name: a\n---\n\n---\napiVersion: v1\nkind: Namespace\nmetadata:\n  name: b\n";
        let docs = split_documents(manifest);
        assert_eq!(docs.len(), 2);
        assert!(docs[0].contains("name: a"));
        assert!(docs[1].contains("name: b"));
    }

    #[test]
    fn test_gvk_core_group() {
        let gvk = gvk_from_type_meta(&TypeMeta {
            api_version: "v1".to_string(),
            kind: "Namespace".to_string(),
        });
        assert_eq!(gvk.group, "");
        assert_eq!(gvk.version, "v1");
    }

    #[test]
    fn test_gvk_named_group() {
        let gvk = gvk_from_type_meta(&TypeMeta {
            api_version: "gateway.networking.k8s.io/v1".to_string(),
            kind: "GatewayClass".to_string(),
        });
        assert_eq!(gvk.group, "gateway.networking.k8s.io");
        assert_eq!(gvk.kind, "GatewayClass");
    }

    #[test]
    fn test_pod_running() {
        assert!(PodInfo::new("a", "ns", "Running").is_running());
        assert!(!PodInfo::new("a", "ns", "Pending").is_running());
    }
}
