//! OpenBAO secrets backend
//!
//! Installed as a systemd service with file storage. Install also
//! initializes the backend (single unseal key), stores the root token and
//! unseal key in the local key file, unseals it and enables the KV v2
//! engine used by the secret resolver chain.

use async_trait::async_trait;
use foundry_core::StateFlag;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use super::host;
use crate::component::{Component, ComponentSpec, ComponentStatus, Target};
use crate::config::ComponentConfig;
use crate::error::{ComponentError, Result};
use crate::ssh::RemoteExecutor;

pub const NAME: &str = "openbao";
pub const DEFAULT_VERSION: &str = "2.1.0";

const BAO_ENV: &str = "export BAO_ADDR=http://127.0.0.1:8200";
const KV_MOUNT: &str = "secret";

/// Keys written by `bao operator init`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyFile {
    pub unseal_keys_b64: Vec<String>,
    pub root_token: String,
}

#[derive(Debug, Deserialize)]
struct SealStatus {
    initialized: bool,
    sealed: bool,
}

pub struct OpenBao {
    spec: ComponentSpec,
    key_file: Option<PathBuf>,
}

impl OpenBao {
    /// `key_file` defaults to `~/.config/foundry/openbao-keys.json`
    pub fn new(key_file: Option<PathBuf>) -> Self {
        Self {
            spec: ComponentSpec::host(NAME, NAME, StateFlag::SecretsBackend),
            key_file,
        }
    }

    fn key_path(&self) -> Result<PathBuf> {
        match &self.key_file {
            Some(path) => Ok(path.clone()),
            None => Ok(foundry_core::secrets::default_token_path()?),
        }
    }

    async fn install_binary(&self, exec: &dyn RemoteExecutor, version: &str) -> Result<()> {
        let url = format!(
            "https://github.com/openbao/openbao/releases/download/v{version}/bao_{version}_Linux_x86_64.tar.gz"
        );
        exec.execute(&host::fetch_tarball_binary(&url, "bao")).await?;
        host::ensure_user(exec, "openbao", &["/etc/openbao", "/var/lib/openbao"]).await?;
        exec.write_file("/etc/openbao/config.hcl", SERVER_CONFIG, 0o640)
            .await?;
        host::install_service(
            exec,
            NAME,
            &host::systemd_unit(
                "OpenBao secrets backend",
                "/usr/local/bin/bao server -config=/etc/openbao/config.hcl",
                "openbao",
            ),
        )
        .await
    }

    async fn seal_status(&self, exec: &dyn RemoteExecutor) -> Result<SealStatus> {
        // `bao status` exits 2 while sealed
        let out = exec
            .execute(&format!(
                "{BAO_ENV}\nfor i in $(seq 1 30); do bao status -format=json && exit 0; [ $? -eq 2 ] && exit 0; sleep 1; done; exit 1"
            ))
            .await?;
        Ok(serde_json::from_str(out.trim())?)
    }

    /// Initialize if needed and return the keys
    async fn initialize(&self, exec: &dyn RemoteExecutor, status: &SealStatus) -> Result<KeyFile> {
        let path = self.key_path()?;
        if status.initialized {
            return read_key_file(&path);
        }

        tracing::info!("initializing {}", NAME);
        let out = exec
            .execute(&format!(
                "{BAO_ENV}\nbao operator init -key-shares=1 -key-threshold=1 -format=json"
            ))
            .await?;
        let keys: KeyFile = serde_json::from_str(out.trim())?;
        write_key_file(&path, &keys)?;
        Ok(keys)
    }

    async fn unseal(&self, exec: &dyn RemoteExecutor, keys: &KeyFile) -> Result<()> {
        for key in &keys.unseal_keys_b64 {
            exec.execute(&format!("{BAO_ENV}\nbao operator unseal '{key}' >/dev/null"))
                .await?;
        }
        Ok(())
    }

    async fn enable_kv(&self, exec: &dyn RemoteExecutor, keys: &KeyFile) -> Result<()> {
        exec.execute(&format!(
            "{BAO_ENV}\nexport BAO_TOKEN='{token}'\n\
             bao secrets list -format=json | grep -q '\"{KV_MOUNT}/\"' || bao secrets enable -path={KV_MOUNT} kv-v2",
            token = keys.root_token
        ))
        .await?;
        Ok(())
    }
}

const SERVER_CONFIG: &str = r#"ui = true

storage "file" {
  path = "/var/lib/openbao"
}

listener "tcp" {
  address     = "0.0.0.0:8200"
  tls_disable = true
}

api_addr = "http://127.0.0.1:8200"
"#;

/// Read a key file written by a previous install
pub fn read_key_file(path: &Path) -> Result<KeyFile> {
    let content = std::fs::read_to_string(path).map_err(|e| ComponentError::InvalidConfig {
        message: format!(
            "backend is initialized but its key file {} is unreadable: {}",
            path.display(),
            e
        ),
    })?;
    Ok(serde_json::from_str(&content)?)
}

fn write_key_file(path: &Path, keys: &KeyFile) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, serde_json::to_string_pretty(keys)?)?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))?;
    }

    tracing::info!("wrote backend keys to {}", path.display());
    Ok(())
}

#[async_trait]
impl Component for OpenBao {
    fn spec(&self) -> &ComponentSpec {
        &self.spec
    }

    async fn install(&self, target: Target<'_>, cfg: &ComponentConfig) -> Result<()> {
        let exec = target.executor(NAME)?;
        let version = cfg.version().unwrap_or(DEFAULT_VERSION);

        self.install_binary(exec, version).await?;

        let status = self.seal_status(exec).await?;
        let keys = self.initialize(exec, &status).await?;
        if status.sealed || !status.initialized {
            self.unseal(exec, &keys).await?;
        }
        self.enable_kv(exec, &keys).await
    }

    async fn upgrade(&self, target: Target<'_>, cfg: &ComponentConfig) -> Result<()> {
        let exec = target.executor(NAME)?;
        let version = cfg.version().unwrap_or(DEFAULT_VERSION);

        // A restarted server comes back sealed
        self.install_binary(exec, version).await?;
        let keys = read_key_file(&self.key_path()?)?;
        self.unseal(exec, &keys).await
    }

    async fn status(&self, target: Target<'_>) -> Result<ComponentStatus> {
        let exec = target.executor(NAME)?;
        let mut status = host::service_status(exec, NAME, "/usr/local/bin/bao version").await?;
        if status.healthy {
            let seal = self.seal_status(exec).await?;
            if seal.sealed {
                status.healthy = false;
                status.message = "sealed".to_string();
            }
        }
        Ok(status)
    }

    async fn uninstall(&self, _target: Target<'_>) -> Result<()> {
        Err(host::refuse_uninstall(&self.spec))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ssh::MockRemoteExecutor;
    use tempfile::TempDir;

    const INIT_OUTPUT: &str =
        r#"{"unseal_keys_b64":["k1"],"unseal_shares":1,"unseal_threshold":1,"root_token":"s.root"}"#;

    #[tokio::test]
    async fn test_install_initializes_and_stores_keys() {
        let dir = TempDir::new().unwrap();
        let key_path = dir.path().join("keys.json");
        let bao = OpenBao::new(Some(key_path.clone()));

        let exec = MockRemoteExecutor::new("bao-1");
        exec.respond("bao status", r#"{"initialized":false,"sealed":true}"#);
        exec.respond("operator init", INIT_OUTPUT);

        bao.install(Target::Host(&exec), &ComponentConfig::new())
            .await
            .unwrap();

        let keys = read_key_file(&key_path).unwrap();
        assert_eq!(keys.root_token, "s.root");
        assert!(exec.ran("bao operator unseal 'k1'"));
        assert!(exec.ran("secrets enable -path=secret kv-v2"));
        assert!(exec.ran(&format!("download/v{DEFAULT_VERSION}/")));

        // The token file is what the resolver chain reads
        assert_eq!(
            foundry_core::secrets::read_token(&key_path).unwrap(),
            "s.root"
        );
    }

    #[tokio::test]
    async fn test_install_reuses_existing_keys() {
        let dir = TempDir::new().unwrap();
        let key_path = dir.path().join("keys.json");
        write_key_file(
            &key_path,
            &KeyFile {
                unseal_keys_b64: vec!["old".to_string()],
                root_token: "s.old".to_string(),
            },
        )
        .unwrap();

        let exec = MockRemoteExecutor::new("bao-1");
        exec.respond("bao status", r#"{"initialized":true,"sealed":true}"#);

        OpenBao::new(Some(key_path))
            .install(Target::Host(&exec), &ComponentConfig::new())
            .await
            .unwrap();

        assert!(!exec.ran("operator init"));
        assert!(exec.ran("bao operator unseal 'old'"));
    }

    #[tokio::test]
    async fn test_initialized_without_key_file_fails() {
        let dir = TempDir::new().unwrap();
        let exec = MockRemoteExecutor::new("bao-1");
        exec.respond("bao status", r#"{"initialized":true,"sealed":true}"#);

        let err = OpenBao::new(Some(dir.path().join("missing.json")))
            .install(Target::Host(&exec), &ComponentConfig::new())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("key file"));
    }

    #[tokio::test]
    async fn test_uninstall_refused() {
        let exec = MockRemoteExecutor::new("bao-1");
        let err = OpenBao::new(None)
            .uninstall(Target::Host(&exec))
            .await
            .unwrap_err();
        assert!(err.is_validation());
        assert!(exec.commands().is_empty());
    }
}
