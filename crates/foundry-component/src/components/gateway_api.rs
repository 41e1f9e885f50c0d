//! Gateway API CRDs
//!
//! Not a Helm release: the upstream standard-channel manifest is fetched
//! and server-side applied. CRDs own every Gateway and HTTPRoute in the
//! cluster, so the component is stateful and never deleted.

use async_trait::async_trait;

use crate::component::{Component, ComponentSpec, ComponentStatus, Target};
use crate::config::ComponentConfig;
use crate::error::{ComponentError, KubeContext, Result};

pub const NAME: &str = "gateway-api";
pub const DEFAULT_VERSION: &str = "v1.2.1";
const RELEASES_URL: &str = "https://github.com/kubernetes-sigs/gateway-api/releases/download";

/// CRDs that must exist for the component to count as installed
pub const REQUIRED_CRDS: [&str; 3] = [
    "gatewayclasses.gateway.networking.k8s.io",
    "gateways.gateway.networking.k8s.io",
    "httproutes.gateway.networking.k8s.io",
];

pub struct GatewayApi {
    spec: ComponentSpec,
    releases_url: String,
    http: reqwest::Client,
}

impl GatewayApi {
    pub fn new() -> Self {
        Self::with_releases_url(RELEASES_URL)
    }

    /// Fetch manifests from a mirror instead of GitHub
    pub fn with_releases_url(url: impl Into<String>) -> Self {
        Self {
            spec: ComponentSpec::kubernetes(NAME).depends_on(&["k3s"]).stateful(),
            releases_url: url.into().trim_end_matches('/').to_string(),
            http: reqwest::Client::new(),
        }
    }

    fn manifest_url(&self, cfg: &ComponentConfig) -> String {
        let version = cfg.version().unwrap_or(DEFAULT_VERSION);
        let version = if version.starts_with('v') {
            version.to_string()
        } else {
            format!("v{version}")
        };
        format!("{}/{}/standard-install.yaml", self.releases_url, version)
    }

    async fn apply(&self, target: Target<'_>, cfg: &ComponentConfig) -> Result<()> {
        let handle = target.cluster(NAME)?;
        let url = self.manifest_url(cfg);

        tracing::info!("fetching {}", url);
        let download_error = |message: String| ComponentError::Download {
            url: url.clone(),
            message,
        };
        let response = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| download_error(e.to_string()))?;
        if !response.status().is_success() {
            return Err(download_error(format!(
                "HTTP {}",
                response.status().as_u16()
            )));
        }
        let manifest = response
            .text()
            .await
            .map_err(|e| download_error(e.to_string()))?;

        handle
            .cluster
            .apply_manifest(&manifest)
            .await
            .context("applying Gateway API CRDs")
    }
}

impl Default for GatewayApi {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Component for GatewayApi {
    fn spec(&self) -> &ComponentSpec {
        &self.spec
    }

    async fn install(&self, target: Target<'_>, cfg: &ComponentConfig) -> Result<()> {
        self.apply(target, cfg).await
    }

    async fn upgrade(&self, target: Target<'_>, cfg: &ComponentConfig) -> Result<()> {
        self.apply(target, cfg).await
    }

    async fn status(&self, target: Target<'_>) -> Result<ComponentStatus> {
        let handle = target.cluster(NAME)?;
        let mut missing = Vec::new();
        for crd in REQUIRED_CRDS {
            if !handle
                .cluster
                .crd_exists(crd)
                .await
                .context(format!("checking CRD {}", crd))?
            {
                missing.push(crd);
            }
        }

        if missing.len() == REQUIRED_CRDS.len() {
            Ok(ComponentStatus::not_installed())
        } else if missing.is_empty() {
            Ok(ComponentStatus::running(""))
        } else {
            Ok(ComponentStatus::unhealthy(
                "",
                format!("missing CRDs: {}", missing.join(", ")),
            ))
        }
    }

    async fn uninstall(&self, _target: Target<'_>) -> Result<()> {
        Err(ComponentError::Unsupported {
            component: NAME.to_string(),
            operation: "uninstall".to_string(),
        })
    }
}
