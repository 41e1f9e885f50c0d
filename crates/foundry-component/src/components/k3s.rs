//! K3s server
//!
//! The cluster VIP (when configured) is added as a TLS SAN and becomes the
//! API endpoint in the kubeconfig written locally after install. The zot
//! registry is configured as a mirror.

use async_trait::async_trait;
use foundry_core::StateFlag;
use std::path::PathBuf;

use super::host;
use crate::component::{Component, ComponentSpec, ComponentStatus, Target};
use crate::config::{ComponentConfig, keys};
use crate::error::Result;
use crate::ssh::RemoteExecutor;

pub const NAME: &str = "k3s";
pub const ROLE: &str = "cluster";
pub const DEFAULT_VERSION: &str = "v1.31.4+k3s1";

const REMOTE_KUBECONFIG: &str = "/etc/rancher/k3s/k3s.yaml";

pub struct K3s {
    spec: ComponentSpec,
    kubeconfig: Option<PathBuf>,
}

impl K3s {
    /// `kubeconfig` defaults to `~/.config/foundry/kubeconfig`
    pub fn new(kubeconfig: Option<PathBuf>) -> Self {
        Self {
            spec: ComponentSpec::host(NAME, ROLE, StateFlag::Kubernetes).depends_on(&[
                "openbao", "dns", "zot",
            ]),
            kubeconfig,
        }
    }

    fn kubeconfig_path(&self) -> Result<PathBuf> {
        match &self.kubeconfig {
            Some(path) => Ok(path.clone()),
            None => Ok(default_kubeconfig_path()?),
        }
    }

    async fn fetch_kubeconfig(&self, exec: &dyn RemoteExecutor, cfg: &ComponentConfig) -> Result<()> {
        let raw = exec.execute(&format!("cat {REMOTE_KUBECONFIG}")).await?;
        let endpoint = api_endpoint(cfg);
        let rewritten = match &endpoint {
            Some(address) => raw.replace("https://127.0.0.1:6443", &format!("https://{address}:6443")),
            None => raw,
        };

        let path = self.kubeconfig_path()?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&path, rewritten)?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o600))?;
        }

        tracing::info!("wrote kubeconfig to {}", path.display());
        Ok(())
    }
}

/// `~/.config/foundry/kubeconfig`
pub fn default_kubeconfig_path() -> foundry_core::Result<PathBuf> {
    Ok(foundry_core::config_dir()?.join("kubeconfig"))
}

/// The VIP when configured, else the host's own address
fn api_endpoint(cfg: &ComponentConfig) -> Option<&str> {
    cfg.cluster_vip().or_else(|| cfg.get_str(keys::HOST_ADDRESS))
}

fn normalize_version(version: &str) -> String {
    if version.starts_with('v') {
        version.to_string()
    } else {
        format!("v{version}")
    }
}

/// Arguments passed to `k3s server`
fn server_args(cfg: &ComponentConfig) -> Vec<String> {
    let mut args = vec![
        "server".to_string(),
        "--disable=traefik".to_string(),
        "--write-kubeconfig-mode=0600".to_string(),
    ];
    for san in [cfg.cluster_vip(), cfg.get_str(keys::HOST_ADDRESS)]
        .into_iter()
        .flatten()
    {
        args.push(format!("--tls-san={san}"));
    }
    if let Some(name) = cfg.get_str(keys::CLUSTER_NAME) {
        args.push(format!("--node-label=foundry.io/cluster={name}"));
    }
    args
}

fn registries_config(registry: &str) -> String {
    format!(
        "mirrors:\n  \"{registry}\":\n    endpoint:\n      - \"http://{registry}\"\n"
    )
}

#[async_trait]
impl Component for K3s {
    fn spec(&self) -> &ComponentSpec {
        &self.spec
    }

    async fn install(&self, target: Target<'_>, cfg: &ComponentConfig) -> Result<()> {
        let exec = target.executor(NAME)?;
        let version = normalize_version(cfg.version().unwrap_or(DEFAULT_VERSION));

        if let Some(registry) = cfg.get_str(keys::REGISTRY_ADDRESS) {
            exec.write_file(
                "/etc/rancher/k3s/registries.yaml",
                &registries_config(registry),
                0o644,
            )
            .await?;
        }

        exec.execute(&format!(
            "set -euo pipefail\n\
             curl -sfL https://get.k3s.io | INSTALL_K3S_VERSION='{version}' sh -s - {args}\n\
             for i in $(seq 1 60); do k3s kubectl get nodes >/dev/null 2>&1 && exit 0; sleep 2; done\n\
             echo 'k3s API did not come up' >&2; exit 1",
            args = server_args(cfg).join(" ")
        ))
        .await?;

        self.fetch_kubeconfig(exec, cfg).await
    }

    async fn upgrade(&self, target: Target<'_>, cfg: &ComponentConfig) -> Result<()> {
        // The installer script upgrades in place
        self.install(target, cfg).await
    }

    async fn status(&self, target: Target<'_>) -> Result<ComponentStatus> {
        let exec = target.executor(NAME)?;
        host::service_status(exec, NAME, "k3s --version | head -n1").await
    }

    async fn uninstall(&self, _target: Target<'_>) -> Result<()> {
        Err(host::refuse_uninstall(&self.spec))
    }
}
