//! Chart-deployment client
//!
//! [`HelmClient`] is the seam the reconciler talks to. [`HelmCli`] drives the
//! `helm` binary; values are written to a temporary YAML file and passed
//! with `-f`.

use async_trait::async_trait;
use std::io::Write;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use crate::error::{KubeError, Result};
use crate::release::DeploymentRecord;

/// Default wait for helm operations
pub const DEFAULT_HELM_TIMEOUT: Duration = Duration::from_secs(600);

/// Credentials for a private chart repository
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepoCredentials {
    pub username: String,
    pub password: String,
}

/// Everything needed to install or upgrade a chart
#[derive(Debug, Clone, PartialEq)]
pub struct ChartRelease {
    /// Release name
    pub name: String,

    /// Target namespace
    pub namespace: String,

    /// Chart reference (`repo/chart` or `oci://...`)
    pub chart: String,

    /// Chart version; latest when unset
    pub version: Option<String>,

    /// Values passed to the chart
    pub values: serde_json::Value,

    /// Create namespace if it doesn't exist
    pub create_namespace: bool,

    /// Wait for resources to be ready
    pub wait: bool,

    /// Timeout for wait
    pub timeout: Duration,
}

impl ChartRelease {
    pub fn new(
        name: impl Into<String>,
        namespace: impl Into<String>,
        chart: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            namespace: namespace.into(),
            chart: chart.into(),
            version: None,
            values: serde_json::Value::Object(Default::default()),
            create_namespace: true,
            wait: false,
            timeout: DEFAULT_HELM_TIMEOUT,
        }
    }

    pub fn with_version(mut self, version: Option<String>) -> Self {
        self.version = version;
        self
    }

    pub fn with_values(mut self, values: serde_json::Value) -> Self {
        self.values = values;
        self
    }

    /// Enable waiting for resources
    pub fn with_wait(mut self, timeout: Duration) -> Self {
        self.wait = true;
        self.timeout = timeout;
        self
    }
}

/// Chart-deployment operations
#[async_trait]
pub trait HelmClient: Send + Sync {
    /// Register a chart repository
    async fn add_repo(
        &self,
        name: &str,
        url: &str,
        credentials: Option<&RepoCredentials>,
        force_update: bool,
    ) -> Result<()>;

    /// Install a new release
    async fn install(&self, release: &ChartRelease) -> Result<()>;

    /// Upgrade an existing release
    async fn upgrade(&self, release: &ChartRelease) -> Result<()>;

    /// Remove a release
    async fn uninstall(&self, name: &str, namespace: &str, wait: bool, timeout: Duration)
    -> Result<()>;

    /// Releases in a namespace, in any status
    async fn list(&self, namespace: &str) -> Result<Vec<DeploymentRecord>>;

    /// Find a release by name
    async fn find(&self, name: &str, namespace: &str) -> Result<Option<DeploymentRecord>> {
        Ok(self
            .list(namespace)
            .await?
            .into_iter()
            .find(|r| r.name == name))
    }
}

/// [`HelmClient`] backed by the `helm` binary
#[derive(Debug, Clone, Default)]
pub struct HelmCli {
    binary: Option<PathBuf>,
    kubeconfig: Option<PathBuf>,
}

impl HelmCli {
    pub fn new(kubeconfig: Option<PathBuf>) -> Self {
        Self {
            binary: None,
            kubeconfig,
        }
    }

    /// Use a specific helm binary instead of the one on PATH
    pub fn with_binary(mut self, binary: impl Into<PathBuf>) -> Self {
        self.binary = Some(binary.into());
        self
    }

    fn command(&self) -> Command {
        let mut cmd = Command::new(self.binary.clone().unwrap_or_else(|| PathBuf::from("helm")));
        if let Some(kubeconfig) = &self.kubeconfig {
            cmd.env("KUBECONFIG", kubeconfig);
        }
        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        cmd
    }

    async fn run(&self, operation: &str, args: &[String], stdin: Option<&str>) -> Result<String> {
        tracing::debug!("helm {}", args.join(" "));

        let mut cmd = self.command();
        cmd.args(args);
        if stdin.is_some() {
            cmd.stdin(Stdio::piped());
        }

        let mut child = cmd.spawn().map_err(KubeError::HelmSpawn)?;
        if let (Some(input), Some(mut pipe)) = (stdin, child.stdin.take()) {
            pipe.write_all(input.as_bytes()).await?;
        }

        let output = child.wait_with_output().await?;
        if !output.status.success() {
            return Err(KubeError::Helm {
                operation: operation.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }

    /// Arguments shared by install and upgrade
    fn release_args(verb: &str, release: &ChartRelease, values_file: &str) -> Vec<String> {
        let mut args = vec![
            verb.to_string(),
            release.name.clone(),
            release.chart.clone(),
            "--namespace".to_string(),
            release.namespace.clone(),
            "-f".to_string(),
            values_file.to_string(),
            "--timeout".to_string(),
            format!("{}s", release.timeout.as_secs()),
        ];
        if let Some(version) = &release.version {
            args.push("--version".to_string());
            args.push(version.clone());
        }
        if release.create_namespace {
            args.push("--create-namespace".to_string());
        }
        if release.wait {
            args.push("--wait".to_string());
        }
        args
    }

    async fn apply_release(&self, verb: &str, release: &ChartRelease) -> Result<()> {
        let mut values_file = tempfile::Builder::new()
            .prefix("foundry-values-")
            .suffix(".yaml")
            .tempfile()?;
        values_file.write_all(serde_yaml::to_string(&release.values)?.as_bytes())?;
        values_file.flush()?;

        let path = values_file.path().to_string_lossy().to_string();
        let args = Self::release_args(verb, release, &path);
        self.run(verb, &args, None).await?;
        Ok(())
    }
}

#[async_trait]
impl HelmClient for HelmCli {
    async fn add_repo(
        &self,
        name: &str,
        url: &str,
        credentials: Option<&RepoCredentials>,
        force_update: bool,
    ) -> Result<()> {
        let mut args = vec![
            "repo".to_string(),
            "add".to_string(),
            name.to_string(),
            url.to_string(),
        ];
        if force_update {
            args.push("--force-update".to_string());
        }
        let stdin = credentials.map(|c| {
            args.push("--username".to_string());
            args.push(c.username.clone());
            args.push("--password-stdin".to_string());
            c.password.as_str()
        });
        self.run("repo add", &args, stdin).await?;

        if force_update {
            self.run(
                "repo update",
                &["repo".to_string(), "update".to_string(), name.to_string()],
                None,
            )
            .await?;
        }
        Ok(())
    }

    async fn install(&self, release: &ChartRelease) -> Result<()> {
        self.apply_release("install", release).await
    }

    async fn upgrade(&self, release: &ChartRelease) -> Result<()> {
        self.apply_release("upgrade", release).await
    }

    async fn uninstall(
        &self,
        name: &str,
        namespace: &str,
        wait: bool,
        timeout: Duration,
    ) -> Result<()> {
        let mut args = vec![
            "uninstall".to_string(),
            name.to_string(),
            "--namespace".to_string(),
            namespace.to_string(),
            "--timeout".to_string(),
            format!("{}s", timeout.as_secs()),
        ];
        if wait {
            args.push("--wait".to_string());
        }
        self.run("uninstall", &args, None).await?;
        Ok(())
    }

    async fn list(&self, namespace: &str) -> Result<Vec<DeploymentRecord>> {
        let args = vec![
            "list".to_string(),
            "--namespace".to_string(),
            namespace.to_string(),
            "--all".to_string(),
            "--output".to_string(),
            "json".to_string(),
        ];
        let stdout = self.run("list", &args, None).await?;
        parse_list_output(&stdout)
    }
}

/// Parse `helm list -o json`
pub fn parse_list_output(stdout: &str) -> Result<Vec<DeploymentRecord>> {
    let trimmed = stdout.trim();
    if trimmed.is_empty() {
        return Ok(Vec::new());
    }
    Ok(serde_json::from_str(trimmed)?)
}
