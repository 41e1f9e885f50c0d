//! Generic Helm-backed component
//!
//! Most cluster add-ons differ only in chart coordinates and values; they
//! share one implementation parameterized by a values builder.

use async_trait::async_trait;
use foundry_kube::{ChartRelease, DEFAULT_HELM_TIMEOUT, HelmClient};
use serde_json::Value;
use std::time::Duration;

use crate::component::{Component, ComponentSpec, ComponentStatus, ReleaseRef, Target};
use crate::config::ComponentConfig;
use crate::error::{ComponentError, KubeContext, Result};

/// Builds chart values from the invocation config
pub type ValuesFn = fn(&ComponentConfig) -> Result<Value>;

/// A chart repository to register before install
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChartRepo {
    pub name: &'static str,
    pub url: &'static str,
}

/// A component deployed as a single Helm release
pub struct HelmChart {
    spec: ComponentSpec,
    repo: Option<ChartRepo>,
    chart: &'static str,
    default_version: Option<&'static str>,
    values: ValuesFn,
    timeout: Duration,
}

impl HelmChart {
    /// `spec` must carry a release reference
    pub fn new(spec: ComponentSpec, chart: &'static str, values: ValuesFn) -> Self {
        Self {
            spec,
            repo: None,
            chart,
            default_version: None,
            values,
            timeout: DEFAULT_HELM_TIMEOUT,
        }
    }

    pub fn with_repo(mut self, name: &'static str, url: &'static str) -> Self {
        self.repo = Some(ChartRepo { name, url });
        self
    }

    pub fn with_version(mut self, version: &'static str) -> Self {
        self.default_version = Some(version);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn release_ref(&self) -> Result<&ReleaseRef> {
        self.spec
            .release
            .as_ref()
            .ok_or_else(|| ComponentError::InvalidConfig {
                message: format!("{} has no release name", self.spec.name),
            })
    }

    /// Release description for this invocation
    pub fn chart_release(&self, cfg: &ComponentConfig) -> Result<ChartRelease> {
        let release = self.release_ref()?;
        let version = cfg
            .version()
            .or(self.default_version)
            .map(str::to_string);

        Ok(
            ChartRelease::new(&release.name, &release.namespace, self.chart)
                .with_version(version)
                .with_values((self.values)(cfg)?)
                .with_wait(self.timeout),
        )
    }

    async fn ensure_repo(&self, helm: &dyn HelmClient) -> Result<()> {
        if let Some(repo) = &self.repo {
            helm.add_repo(repo.name, repo.url, None, true)
                .await
                .context(format!("adding chart repository {}", repo.name))?;
        }
        Ok(())
    }
}

#[async_trait]
impl Component for HelmChart {
    fn spec(&self) -> &ComponentSpec {
        &self.spec
    }

    async fn install(&self, target: Target<'_>, cfg: &ComponentConfig) -> Result<()> {
        let handle = target.cluster(&self.spec.name)?;
        let release = self.chart_release(cfg)?;
        self.ensure_repo(handle.helm.as_ref()).await?;

        tracing::info!("installing {} ({})", release.name, release.chart);
        handle
            .helm
            .install(&release)
            .await
            .context(format!("installing release {}", release.name))
    }

    async fn upgrade(&self, target: Target<'_>, cfg: &ComponentConfig) -> Result<()> {
        let handle = target.cluster(&self.spec.name)?;
        let release = self.chart_release(cfg)?;
        self.ensure_repo(handle.helm.as_ref()).await?;

        tracing::info!("upgrading {} ({})", release.name, release.chart);
        handle
            .helm
            .upgrade(&release)
            .await
            .context(format!("upgrading release {}", release.name))
    }

    async fn status(&self, target: Target<'_>) -> Result<ComponentStatus> {
        let handle = target.cluster(&self.spec.name)?;
        let release = self.release_ref()?;

        let Some(record) = handle
            .helm
            .find(&release.name, &release.namespace)
            .await
            .context(format!("listing releases in {}", release.namespace))?
        else {
            return Ok(ComponentStatus::not_installed());
        };

        let version = record.app_version.clone();
        if !record.status.is_deployed() {
            return Ok(ComponentStatus::unhealthy(
                version,
                format!("release is {}", record.status),
            ));
        }

        let Some(readiness) = &self.spec.readiness else {
            return Ok(ComponentStatus::running(version));
        };
        let pods = handle
            .cluster
            .get_pods(&readiness.namespace)
            .await
            .context(format!("listing pods in {}", readiness.namespace))?;
        if readiness.predicate.is_satisfied(&pods) {
            Ok(ComponentStatus::running(version))
        } else {
            Ok(ComponentStatus::unhealthy(
                version,
                format!(
                    "{}/{} pods running",
                    pods.iter().filter(|p| p.is_running()).count(),
                    pods.len()
                ),
            ))
        }
    }

    async fn uninstall(&self, target: Target<'_>) -> Result<()> {
        let handle = target.cluster(&self.spec.name)?;
        let release = self.release_ref()?;

        tracing::info!("uninstalling {}", release.name);
        handle
            .helm
            .uninstall(&release.name, &release.namespace, true, self.timeout)
            .await
            .context(format!("uninstalling release {}", release.name))
    }
}
