//! CLI commands

pub mod install;
pub mod list;
pub mod reset;
pub mod status;
pub mod uninstall;

use foundry_component::components::k3s;
use foundry_component::{
    ClusterHandle, ComponentPaths, PowerDnsConnector, Reconciler, Registry, SshConnector,
    Substrate, register_all,
};
use foundry_core::{ConfigStore, StackConfig};
use foundry_kube::{CancelToken, HelmCli, KubeCluster};
use std::path::PathBuf;
use std::sync::Arc;

use crate::error::Result;

/// What every command needs: the config store, the registry and Ctrl-C
pub struct Context {
    pub store: ConfigStore,
    pub config: StackConfig,
    pub registry: Arc<Registry>,
    pub cancel: CancelToken,
}

impl Context {
    /// Load the stack configuration and register every component
    pub fn load(config_path: Option<PathBuf>, cancel: CancelToken) -> Result<Self> {
        let store = match config_path {
            Some(path) => ConfigStore::new(path),
            None => ConfigStore::default_location()?,
        };
        let config = store.load()?;
        tracing::debug!("stack configuration: {}", store.path().display());

        let registry = Registry::new();
        register_all(
            &registry,
            &ComponentPaths {
                openbao_keys: config.secrets.token_file.clone(),
                kubeconfig: config.cluster.kubeconfig.clone(),
            },
        )?;

        Ok(Self {
            store,
            config,
            registry: Arc::new(registry),
            cancel,
        })
    }

    /// Reconciler with the real SSH, DNS and (when requested) cluster clients
    pub async fn reconciler(&self, with_cluster: bool) -> Reconciler {
        let reconciler = Reconciler::new(
            self.registry.clone(),
            self.store.clone(),
            Arc::new(SshConnector::new()),
            Arc::new(PowerDnsConnector),
        )
        .with_cancel(self.cancel.clone());

        if !with_cluster {
            return reconciler;
        }
        match self.cluster_handle().await {
            Some(handle) => reconciler.with_cluster(handle),
            None => reconciler,
        }
    }

    /// Whether `name` or one of its direct dependencies lives in the cluster
    pub fn needs_cluster(&self, name: &str) -> bool {
        let Some(component) = self.registry.get(name) else {
            return false;
        };
        let spec = component.spec();
        spec.substrate == Substrate::Kubernetes
            || spec.dependencies.iter().any(|dep| {
                self.registry
                    .get(dep)
                    .is_some_and(|c| c.spec().substrate == Substrate::Kubernetes)
            })
    }

    /// Kubeconfig from the configuration, else the one written by the k3s install
    fn kubeconfig(&self) -> Option<PathBuf> {
        if let Some(path) = &self.config.cluster.kubeconfig {
            return Some(path.clone());
        }
        k3s::default_kubeconfig_path().ok().filter(|p| p.exists())
    }

    /// `None` when the cluster cannot be reached; cluster operations then
    /// fail with a clear error
    async fn cluster_handle(&self) -> Option<ClusterHandle> {
        let kubeconfig = self.kubeconfig();
        match KubeCluster::connect(kubeconfig.as_deref()).await {
            Ok(cluster) => Some(ClusterHandle::new(
                Arc::new(HelmCli::new(kubeconfig)),
                Arc::new(cluster),
            )),
            Err(e) => {
                tracing::debug!("Kubernetes client unavailable: {}", e);
                None
            }
        }
    }
}

/// Ask on stderr; anything but `y`/`yes` (including EOF) declines
pub fn confirm(prompt: &str) -> Result<bool> {
    use std::io::Write;

    eprint!("{} [y/N] ", prompt);
    std::io::stderr().flush()?;
    let mut answer = String::new();
    std::io::stdin().read_line(&mut answer)?;
    Ok(matches!(
        answer.trim().to_ascii_lowercase().as_str(),
        "y" | "yes"
    ))
}
