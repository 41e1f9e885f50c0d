//! Integration tests for CLI commands

use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

const STACK: &str = r#"
hosts:
  - hostname: bao-1
    address: 10.0.0.10
    roles: [openbao]
  - hostname: dns-1
    address: 10.0.0.11
    roles: [dns]
  - hostname: zot-1
    address: 10.0.0.12
    roles: [zot]
  - hostname: k3s-1
    address: 10.0.0.13
    roles: [cluster]
cluster:
  vip: 10.0.0.100
"#;

/// Temp directory holding `stack.yaml`; HOME points here too so nothing
/// from the user's real configuration leaks in
struct Workspace {
    dir: TempDir,
}

impl Workspace {
    fn new(setup_state: &str) -> Self {
        let dir = TempDir::new().unwrap();
        let token_file = dir.path().join("openbao-keys.json");
        let contents = format!(
            "{}secrets:\n  token_file: {}\nsetup_state:\n{}",
            STACK,
            token_file.display(),
            setup_state
        );
        std::fs::write(dir.path().join("stack.yaml"), contents).unwrap();
        Self { dir }
    }

    fn empty() -> Self {
        Self::new("  {}\n")
    }

    fn config(&self) -> PathBuf {
        self.dir.path().join("stack.yaml")
    }

    fn state(&self) -> serde_yaml::Value {
        let contents = std::fs::read_to_string(self.config()).unwrap();
        let config: serde_yaml::Value = serde_yaml::from_str(&contents).unwrap();
        config["setup_state"].clone()
    }

    fn foundry(&self, args: &[&str]) -> std::process::Output {
        foundry_in(self.dir.path(), &self.config(), args, &[])
    }

    fn foundry_with_env(&self, args: &[&str], env: &[(&str, &str)]) -> std::process::Output {
        foundry_in(self.dir.path(), &self.config(), args, env)
    }
}

/// Helper to run the foundry binary against an isolated home directory
fn foundry_in(
    home: &Path,
    config: &Path,
    args: &[&str],
    env: &[(&str, &str)],
) -> std::process::Output {
    let mut command = Command::new(env!("CARGO_BIN_EXE_foundry"));
    command
        .arg("--config")
        .arg(config)
        .args(args)
        .env_remove("FOUNDRY_CONFIG")
        .env_remove("RUST_LOG")
        .env("HOME", home)
        .env("XDG_CONFIG_HOME", home.join(".config"))
        .env("KUBECONFIG", home.join("missing-kubeconfig"))
        .env("NO_COLOR", "1");
    for (key, value) in env {
        command.env(key, value);
    }
    command.output().expect("Failed to execute foundry")
}

mod general {
    use super::*;

    #[test]
    fn test_help() {
        let output = Command::new(env!("CARGO_BIN_EXE_foundry"))
            .arg("--help")
            .output()
            .expect("Failed to execute foundry");

        assert!(output.status.success());
        let stdout = String::from_utf8_lossy(&output.stdout);
        assert!(stdout.contains("component"));
        assert!(stdout.contains("setup"));
    }

    #[test]
    fn test_install_help_lists_flags() {
        let output = Command::new(env!("CARGO_BIN_EXE_foundry"))
            .args(["component", "install", "--help"])
            .output()
            .expect("Failed to execute foundry");

        assert!(output.status.success());
        let stdout = String::from_utf8_lossy(&output.stdout);
        for flag in [
            "--dry-run",
            "--version",
            "--storage-backend",
            "--nfs-server",
            "--nfs-path",
        ] {
            assert!(stdout.contains(flag), "missing {flag} in:\n{stdout}");
        }
    }

    #[test]
    fn test_unknown_flag_is_usage_error() {
        let ws = Workspace::empty();
        let output = ws.foundry(&["component", "install", "dns", "--bogus"]);

        assert_eq!(output.status.code(), Some(64));
    }

    #[test]
    fn test_invalid_storage_backend_value_is_usage_error() {
        let ws = Workspace::empty();
        let output = ws.foundry(&["component", "install", "storage", "--storage-backend", "ceph"]);

        assert_eq!(output.status.code(), Some(64));
    }
}

mod list_command {
    use super::*;

    #[test]
    fn test_list_shows_every_component() {
        let ws = Workspace::new("  openbao_installed: true\n");
        let output = ws.foundry(&["component", "list"]);

        assert!(output.status.success());
        let stdout = String::from_utf8_lossy(&output.stdout);
        for name in [
            "openbao",
            "dns",
            "zot",
            "k3s",
            "gateway-api",
            "contour",
            "cert-manager",
            "storage",
            "seaweedfs",
            "velero",
            "prometheus",
            "loki",
            "grafana",
            "external-dns",
        ] {
            assert!(stdout.contains(name), "missing {name} in:\n{stdout}");
        }
        let openbao = stdout
            .lines()
            .find(|line| line.starts_with("openbao"))
            .unwrap();
        assert!(openbao.contains("installed"));
        assert!(!openbao.contains("not installed"));
    }
}

mod install_command {
    use super::*;

    #[test]
    fn test_unknown_component_suggests_name() {
        let ws = Workspace::empty();
        let output = ws.foundry(&["component", "install", "grafna"]);

        assert_eq!(output.status.code(), Some(2));
        let stderr = String::from_utf8_lossy(&output.stderr);
        assert!(stderr.contains("not found"));
        assert!(stderr.contains("did you mean 'grafana'"));
    }

    #[test]
    fn test_missing_dependency_names_next_step() {
        let ws = Workspace::empty();
        let output = ws.foundry(&["component", "install", "k3s"]);

        assert_eq!(output.status.code(), Some(3));
        let stderr = String::from_utf8_lossy(&output.stderr);
        assert!(stderr.contains("openbao"));
        assert!(stderr.contains("foundry component install openbao"));
        assert_eq!(ws.state()["k3s_installed"].as_bool(), None);
    }

    #[test]
    fn test_nfs_backend_requires_server() {
        let ws = Workspace::empty();
        let output = ws.foundry(&[
            "component",
            "install",
            "storage",
            "--storage-backend",
            "nfs",
        ]);

        assert_eq!(output.status.code(), Some(2));
        let stderr = String::from_utf8_lossy(&output.stderr);
        assert!(stderr.contains("nfs"));
    }

    #[test]
    fn test_dry_run_plans_without_recording_state() {
        let ws = Workspace::new("  openbao_installed: true\n");
        let output = ws.foundry_with_env(
            &["component", "install", "dns", "--dry-run"],
            &[("FOUNDRY_SECRET_FOUNDRY_CORE_DNS_API_KEY", "pdns-key")],
        );

        assert!(
            output.status.success(),
            "stderr: {}",
            String::from_utf8_lossy(&output.stderr)
        );
        let stdout = String::from_utf8_lossy(&output.stdout);
        assert!(stdout.contains("would install"));
        assert_eq!(ws.state()["dns_installed"].as_bool(), None);
        assert_eq!(ws.state()["openbao_installed"].as_bool(), Some(true));
    }

    #[test]
    fn test_unresolvable_secret_stops_before_install() {
        let ws = Workspace::new("  openbao_installed: true\n");
        let output = ws.foundry(&["component", "install", "dns", "--dry-run"]);

        assert_eq!(output.status.code(), Some(2));
        let stderr = String::from_utf8_lossy(&output.stderr);
        assert!(stderr.contains("FOUNDRY_SECRET_FOUNDRY_CORE_DNS_API_KEY"));
    }
}

mod setup_command {
    use super::*;

    #[test]
    fn test_reset_clears_flags() {
        let ws = Workspace::new(
            "  openbao_installed: true\n  openbao_initialized: true\n  dns_installed: true\n",
        );
        let output = ws.foundry(&["setup", "reset", "--yes"]);

        assert!(output.status.success());
        let state = ws.state();
        assert_eq!(state["openbao_installed"].as_bool(), Some(false));
        assert_eq!(state["openbao_initialized"].as_bool(), Some(false));
        assert_eq!(state["dns_installed"].as_bool(), Some(false));

        // Hosts survive the reset
        let contents = std::fs::read_to_string(ws.config()).unwrap();
        assert!(contents.contains("bao-1"));
    }

    #[test]
    fn test_reset_on_empty_state() {
        let ws = Workspace::empty();
        let output = ws.foundry(&["setup", "reset", "--yes"]);

        assert!(output.status.success());
        let stdout = String::from_utf8_lossy(&output.stdout);
        assert!(stdout.contains("already empty"));
    }
}
