//! Shared helpers for components running as systemd services on a host

use crate::component::{ComponentSpec, ComponentStatus};
use crate::error::{ComponentError, Result};
use crate::ssh::RemoteExecutor;

/// Download a release binary into `/usr/local/bin`
pub fn fetch_binary(url: &str, binary: &str) -> String {
    format!(
        "set -euo pipefail\n\
         tmp=$(mktemp)\n\
         curl -fsSL --retry 3 -o \"$tmp\" '{url}'\n\
         install -m 0755 \"$tmp\" /usr/local/bin/{binary}\n\
         rm -f \"$tmp\""
    )
}

/// Download a tarball and install one binary from it into `/usr/local/bin`
pub fn fetch_tarball_binary(url: &str, binary: &str) -> String {
    format!(
        "set -euo pipefail\n\
         tmp=$(mktemp -d)\n\
         curl -fsSL --retry 3 '{url}' | tar -xz -C \"$tmp\"\n\
         install -m 0755 \"$tmp/{binary}\" /usr/local/bin/{binary}\n\
         rm -rf \"$tmp\""
    )
}

/// Minimal systemd unit
pub fn systemd_unit(description: &str, exec_start: &str, user: &str) -> String {
    format!(
        "[Unit]\n\
         Description={description}\n\
         After=network-online.target\n\
         Wants=network-online.target\n\
         \n\
         [Service]\n\
         User={user}\n\
         ExecStart={exec_start}\n\
         Restart=on-failure\n\
         RestartSec=5\n\
         LimitNOFILE=65536\n\
         \n\
         [Install]\n\
         WantedBy=multi-user.target\n"
    )
}

/// Install a unit file and (re)start it
pub async fn install_service(exec: &dyn RemoteExecutor, unit: &str, content: &str) -> Result<()> {
    exec.write_file(&format!("/etc/systemd/system/{unit}.service"), content, 0o644)
        .await?;
    exec.execute(&format!(
        "systemctl daemon-reload && systemctl enable {unit} && systemctl restart {unit}"
    ))
    .await?;
    Ok(())
}

/// Create a system user that owns `dirs`
pub async fn ensure_user(exec: &dyn RemoteExecutor, user: &str, dirs: &[&str]) -> Result<()> {
    let mut command = format!(
        "id -u {user} >/dev/null 2>&1 || useradd --system --home /nonexistent --shell /usr/sbin/nologin {user}"
    );
    for dir in dirs {
        command.push_str(&format!(" && install -d -o {user} -g {user} -m 0750 {dir}"));
    }
    exec.execute(&command).await?;
    Ok(())
}

/// Status of a systemd service, with version from `version_command`
pub async fn service_status(
    exec: &dyn RemoteExecutor,
    unit: &str,
    version_command: &str,
) -> Result<ComponentStatus> {
    let load = exec
        .execute(&format!("systemctl show -p LoadState --value {unit}"))
        .await?;
    if load.trim() != "loaded" {
        return Ok(ComponentStatus::not_installed());
    }

    let active = exec
        .execute(&format!("systemctl is-active {unit} || true"))
        .await?;
    let version = match exec.execute(version_command).await {
        Ok(out) => parse_version(&out),
        Err(e) => {
            tracing::debug!("version probe for {} failed: {}", unit, e);
            String::new()
        }
    };

    match active.trim() {
        "active" => Ok(ComponentStatus::running(version)),
        state => Ok(ComponentStatus::unhealthy(
            version,
            format!("service {unit} is {state}"),
        )),
    }
}

/// First token that looks like a version number
pub fn parse_version(output: &str) -> String {
    output
        .split_whitespace()
        .map(|t| t.trim_start_matches('v').trim_end_matches(','))
        .find(|t| t.chars().next().is_some_and(|c| c.is_ascii_digit()) && t.contains('.'))
        .unwrap_or_default()
        .to_string()
}

/// Host components are never removed by the CLI
pub fn refuse_uninstall(spec: &ComponentSpec) -> ComponentError {
    ComponentError::Unsupported {
        component: spec.name.clone(),
        operation: "uninstall".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ssh::MockRemoteExecutor;

    #[test]
    fn test_parse_version() {
        assert_eq!(parse_version("Bao v2.1.0 ('abc'), built 2024"), "2.1.0");
        assert_eq!(parse_version("k3s version v1.31.4+k3s1 (a1b2c3)\n"), "1.31.4+k3s1");
        assert_eq!(parse_version("no version here"), "");
    }

    #[test]
    fn test_unit_contents() {
        let unit = systemd_unit("Zot registry", "/usr/local/bin/zot serve /etc/zot/config.json", "zot");
        assert!(unit.contains("ExecStart=/usr/local/bin/zot serve"));
        assert!(unit.contains("User=zot"));
        assert!(unit.contains("WantedBy=multi-user.target"));
    }

    #[tokio::test]
    async fn test_service_status_states() {
        let exec = MockRemoteExecutor::new("zot-1");
        exec.respond("LoadState", "not-found\n");
        let status = service_status(&exec, "zot", "zot --version").await.unwrap();
        assert!(!status.installed);

        let exec = MockRemoteExecutor::new("zot-1");
        exec.respond("LoadState", "loaded\n");
        exec.respond("is-active", "failed\n");
        exec.respond("--version", "zot v2.1.1\n");
        let status = service_status(&exec, "zot", "zot --version").await.unwrap();
        assert!(status.installed);
        assert!(!status.healthy);
        assert_eq!(status.version, "2.1.1");
        assert_eq!(status.message, "service zot is failed");
    }
}
