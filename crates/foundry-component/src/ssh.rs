//! Remote execution over SSH
//!
//! Host components run shell commands through the system `ssh` binary in
//! batch mode. A non-zero exit status becomes `RemoteCommand` carrying the
//! exit code with captured stdout and stderr. Nothing is retried.

use async_trait::async_trait;
use foundry_core::Host;
use std::collections::{HashMap, HashSet};
use std::process::Stdio;
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use crate::error::{ComponentError, Result};

/// Executes commands on one host
#[async_trait]
pub trait RemoteExecutor: Send + Sync {
    /// Host label for messages
    fn host(&self) -> &str;

    /// Run `command` through the remote shell, returning stdout
    async fn execute(&self, command: &str) -> Result<String>;

    /// Write `content` to `path` with the given octal mode
    async fn write_file(&self, path: &str, content: &str, mode: u32) -> Result<()> {
        let command = format!(
            "install -d -m 0755 \"$(dirname {path})\" && cat > {path} <<'FOUNDRY_EOF'\n{content}\nFOUNDRY_EOF\nchmod {mode:o} {path}",
        );
        self.execute(&command).await.map(|_| ())
    }
}

/// Opens executors for inventory hosts
#[async_trait]
pub trait RemoteConnector: Send + Sync {
    /// Connect and verify the host answers; `HostUnreachable` otherwise
    async fn connect(&self, host: &Host) -> Result<Arc<dyn RemoteExecutor>>;
}

/// `ssh`-binary connector
#[derive(Debug, Clone)]
pub struct SshConnector {
    connect_timeout: Duration,
    identity: Option<std::path::PathBuf>,
}

impl SshConnector {
    pub fn new() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            identity: None,
        }
    }

    pub fn with_identity(mut self, identity: impl Into<std::path::PathBuf>) -> Self {
        self.identity = Some(identity.into());
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }
}

impl Default for SshConnector {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RemoteConnector for SshConnector {
    async fn connect(&self, host: &Host) -> Result<Arc<dyn RemoteExecutor>> {
        let executor = SshExecutor {
            host: host.clone(),
            args: ssh_args(host, self.connect_timeout, self.identity.as_deref()),
        };

        tracing::debug!("probing ssh {}", host.destination());
        executor
            .execute("true")
            .await
            .map_err(|e| ComponentError::HostUnreachable {
                host: host.hostname.clone(),
                message: match e {
                    ComponentError::RemoteCommand { stderr, .. } => stderr.trim().to_string(),
                    other => other.to_string(),
                },
            })?;

        Ok(Arc::new(executor))
    }
}

fn ssh_args(host: &Host, timeout: Duration, identity: Option<&std::path::Path>) -> Vec<String> {
    let mut args: Vec<String> = [
        "-o",
        "BatchMode=yes",
        "-o",
        "StrictHostKeyChecking=accept-new",
        "-o",
        "LogLevel=ERROR",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect();

    args.push("-o".to_string());
    args.push(format!("ConnectTimeout={}", timeout.as_secs().max(1)));
    args.push("-p".to_string());
    args.push(host.port.to_string());
    if let Some(identity) = identity {
        args.push("-i".to_string());
        args.push(identity.display().to_string());
    }
    args.push(host.destination());
    args
}

/// Runs commands on a single host through `ssh`
pub struct SshExecutor {
    host: Host,
    args: Vec<String>,
}

#[async_trait]
impl RemoteExecutor for SshExecutor {
    fn host(&self) -> &str {
        &self.host.hostname
    }

    async fn execute(&self, command: &str) -> Result<String> {
        tracing::debug!("[{}] $ {}", self.host.hostname, first_line(command));

        // The script goes through stdin so quoting survives intact
        let mut child = Command::new("ssh")
            .args(&self.args)
            .arg("bash -s")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(command.as_bytes()).await?;
        }

        let output = child.wait_with_output().await?;
        let stdout = String::from_utf8_lossy(&output.stdout).to_string();

        if !output.status.success() {
            return Err(ComponentError::RemoteCommand {
                host: self.host.hostname.clone(),
                exit_code: output.status.code(),
                stdout,
                stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            });
        }

        Ok(stdout)
    }
}

fn first_line(command: &str) -> &str {
    command.lines().next().unwrap_or_default()
}

// ============ Mocks ============

#[derive(Debug, Clone)]
struct Scripted {
    pattern: String,
    result: std::result::Result<String, (i32, String)>,
}

/// Records commands and answers from scripted responses
///
/// Clones share state, so a test can keep one handle while the connector
/// hands another to the code under test.
#[derive(Debug, Clone)]
pub struct MockRemoteExecutor {
    host: String,
    commands: Arc<RwLock<Vec<String>>>,
    scripted: Arc<RwLock<Vec<Scripted>>>,
}

impl MockRemoteExecutor {
    pub fn new(host: &str) -> Self {
        Self {
            host: host.to_string(),
            commands: Arc::new(RwLock::new(Vec::new())),
            scripted: Arc::new(RwLock::new(Vec::new())),
        }
    }

    /// Commands containing `pattern` print `stdout`
    pub fn respond(&self, pattern: &str, stdout: &str) {
        self.scripted.write().unwrap().push(Scripted {
            pattern: pattern.to_string(),
            result: Ok(stdout.to_string()),
        });
    }

    /// Commands containing `pattern` exit with `code`
    pub fn fail(&self, pattern: &str, code: i32, stderr: &str) {
        self.scripted.write().unwrap().push(Scripted {
            pattern: pattern.to_string(),
            result: Err((code, stderr.to_string())),
        });
    }

    pub fn commands(&self) -> Vec<String> {
        self.commands.read().unwrap().clone()
    }

    pub fn ran(&self, fragment: &str) -> bool {
        self.commands.read().unwrap().iter().any(|c| c.contains(fragment))
    }
}

#[async_trait]
impl RemoteExecutor for MockRemoteExecutor {
    fn host(&self) -> &str {
        &self.host
    }

    async fn execute(&self, command: &str) -> Result<String> {
        self.commands.write().unwrap().push(command.to_string());

        let scripted = self.scripted.read().unwrap();
        match scripted.iter().find(|s| command.contains(&s.pattern)) {
            Some(Scripted { result: Ok(stdout), .. }) => Ok(stdout.clone()),
            Some(Scripted {
                result: Err((code, stderr)),
                ..
            }) => Err(ComponentError::RemoteCommand {
                host: self.host.clone(),
                exit_code: Some(*code),
                stdout: String::new(),
                stderr: stderr.clone(),
            }),
            None => Ok(String::new()),
        }
    }
}

/// Hands out shared [`MockRemoteExecutor`]s keyed by hostname
#[derive(Debug, Default)]
pub struct MockRemoteConnector {
    executors: RwLock<HashMap<String, MockRemoteExecutor>>,
    unreachable: RwLock<HashSet<String>>,
    connects: RwLock<Vec<String>>,
}

impl MockRemoteConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Executor for `hostname`, created on first use
    pub fn executor(&self, hostname: &str) -> MockRemoteExecutor {
        self.executors
            .write()
            .unwrap()
            .entry(hostname.to_string())
            .or_insert_with(|| MockRemoteExecutor::new(hostname))
            .clone()
    }

    pub fn set_unreachable(&self, hostname: &str) {
        self.unreachable.write().unwrap().insert(hostname.to_string());
    }

    /// Hostnames connected to, in order
    pub fn connects(&self) -> Vec<String> {
        self.connects.read().unwrap().clone()
    }
}

#[async_trait]
impl RemoteConnector for MockRemoteConnector {
    async fn connect(&self, host: &Host) -> Result<Arc<dyn RemoteExecutor>> {
        self.connects.write().unwrap().push(host.hostname.clone());
        if self.unreachable.read().unwrap().contains(&host.hostname) {
            return Err(ComponentError::HostUnreachable {
                host: host.hostname.clone(),
                message: "connection refused".to_string(),
            });
        }
        Ok(Arc::new(self.executor(&host.hostname)))
    }
}
