//! Zot OCI registry

use async_trait::async_trait;
use foundry_core::StateFlag;
use serde_json::json;

use super::host;
use crate::component::{Component, ComponentSpec, ComponentStatus, Target};
use crate::config::ComponentConfig;
use crate::error::Result;

pub const NAME: &str = "zot";
pub const DEFAULT_VERSION: &str = "2.1.2";
pub const REGISTRY_PORT: u16 = 5000;

pub struct Zot {
    spec: ComponentSpec,
}

impl Zot {
    pub fn new() -> Self {
        Self {
            spec: ComponentSpec::host(NAME, NAME, StateFlag::Registry).depends_on(&["openbao"]),
        }
    }
}

impl Default for Zot {
    fn default() -> Self {
        Self::new()
    }
}

fn server_config() -> String {
    let config = json!({
        "distSpecVersion": "1.1.0",
        "storage": {
            "rootDirectory": "/var/lib/zot",
            "gc": true,
            "dedupe": true
        },
        "http": {
            "address": "0.0.0.0",
            "port": REGISTRY_PORT.to_string()
        },
        "log": { "level": "info" },
        "extensions": {
            "search": { "enable": true },
            "ui": { "enable": true }
        }
    });
    serde_json::to_string_pretty(&config).unwrap_or_default()
}

#[async_trait]
impl Component for Zot {
    fn spec(&self) -> &ComponentSpec {
        &self.spec
    }

    async fn install(&self, target: Target<'_>, cfg: &ComponentConfig) -> Result<()> {
        let exec = target.executor(NAME)?;
        let version = cfg.version().unwrap_or(DEFAULT_VERSION);
        let url = format!(
            "https://github.com/project-zot/zot/releases/download/v{version}/zot-linux-amd64"
        );

        exec.execute(&host::fetch_binary(&url, "zot")).await?;
        host::ensure_user(exec, "zot", &["/etc/zot", "/var/lib/zot"]).await?;
        exec.write_file("/etc/zot/config.json", &server_config(), 0o644)
            .await?;
        host::install_service(
            exec,
            NAME,
            &host::systemd_unit(
                "Zot OCI registry",
                "/usr/local/bin/zot serve /etc/zot/config.json",
                "zot",
            ),
        )
        .await
    }

    async fn upgrade(&self, target: Target<'_>, cfg: &ComponentConfig) -> Result<()> {
        self.install(target, cfg).await
    }

    async fn status(&self, target: Target<'_>) -> Result<ComponentStatus> {
        let exec = target.executor(NAME)?;
        host::service_status(exec, NAME, "/usr/local/bin/zot --version 2>&1 | head -n1").await
    }

    async fn uninstall(&self, _target: Target<'_>) -> Result<()> {
        Err(host::refuse_uninstall(&self.spec))
    }
}
