//! PowerDNS: authoritative server for the local zones behind a recursor
//!
//! The authoritative server listens on 127.0.0.1:5300 and serves the HTTP
//! API used for record registration. The recursor owns port 53, forwards
//! the stack's zones to the authoritative server and everything else to
//! the configured upstreams.

use async_trait::async_trait;
use foundry_core::StateFlag;

use super::host;
use crate::component::{Component, ComponentSpec, ComponentStatus, Target};
use crate::config::{ComponentConfig, keys};
use crate::error::Result;
use crate::ssh::RemoteExecutor;

pub const NAME: &str = "dns";

/// Config key holding the resolved API key
pub const API_KEY: &str = "api_key";

const AUTH_PORT: u16 = 5300;
const DEFAULT_API_PORT: u64 = 8081;
const DEFAULT_FORWARDERS: [&str; 2] = ["1.1.1.1", "9.9.9.9"];

pub struct PowerDns {
    spec: ComponentSpec,
}

impl PowerDns {
    pub fn new() -> Self {
        Self {
            spec: ComponentSpec::host(NAME, NAME, StateFlag::Dns)
                .depends_on(&["openbao"])
                .dns_api_key(API_KEY),
        }
    }

    async fn configure(&self, exec: &dyn RemoteExecutor, cfg: &ComponentConfig) -> Result<()> {
        let zones = zones(cfg);

        exec.write_file(
            "/etc/powerdns/pdns.conf",
            &auth_config(cfg.require_str(API_KEY)?, api_port(cfg)),
            0o640,
        )
        .await?;
        exec.write_file(
            "/etc/powerdns/recursor.conf",
            &recursor_config(&zones, &forwarders(cfg)),
            0o644,
        )
        .await?;

        exec.execute(
            "set -euo pipefail\n\
             db=/var/lib/powerdns/pdns.sqlite3\n\
             if [ ! -s \"$db\" ]; then\n\
               install -d -o pdns -g pdns /var/lib/powerdns\n\
               sqlite3 \"$db\" < /usr/share/doc/pdns-backend-sqlite3/schema.sqlite3.sql\n\
               chown pdns:pdns \"$db\"\n\
             fi\n\
             systemctl restart pdns pdns-recursor",
        )
        .await?;

        for zone in &zones {
            exec.execute(&format!(
                "pdnsutil list-zone {zone} >/dev/null 2>&1 || pdnsutil create-zone {zone} ns1.{zone}"
            ))
            .await?;
        }
        Ok(())
    }
}

impl Default for PowerDns {
    fn default() -> Self {
        Self::new()
    }
}

fn zones(cfg: &ComponentConfig) -> Vec<String> {
    string_list(cfg, keys::DNS_ZONES)
}

fn forwarders(cfg: &ComponentConfig) -> Vec<String> {
    let configured = string_list(cfg, keys::DNS_FORWARDERS);
    if configured.is_empty() {
        DEFAULT_FORWARDERS.iter().map(|s| s.to_string()).collect()
    } else {
        configured
    }
}

fn api_port(cfg: &ComponentConfig) -> u64 {
    cfg.get(keys::DNS_API_PORT)
        .and_then(serde_json::Value::as_u64)
        .unwrap_or(DEFAULT_API_PORT)
}

fn string_list(cfg: &ComponentConfig, key: &str) -> Vec<String> {
    cfg.get(key)
        .and_then(serde_json::Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(|v| v.as_str().map(str::to_string))
                .collect()
        })
        .unwrap_or_default()
}

fn auth_config(api_key: &str, api_port: u64) -> String {
    format!(
        "launch=gsqlite3\n\
         gsqlite3-database=/var/lib/powerdns/pdns.sqlite3\n\
         local-address=127.0.0.1\n\
         local-port={AUTH_PORT}\n\
         api=yes\n\
         api-key={api_key}\n\
         webserver=yes\n\
         webserver-address=0.0.0.0\n\
         webserver-port={api_port}\n\
         webserver-allow-from=0.0.0.0/0\n"
    )
}

fn recursor_config(zones: &[String], forwarders: &[String]) -> String {
    let local: Vec<String> = zones
        .iter()
        .map(|z| format!("{z}=127.0.0.1:{AUTH_PORT}"))
        .collect();
    let mut conf = String::from("local-address=0.0.0.0\nallow-from=0.0.0.0/0\n");
    if !local.is_empty() {
        conf.push_str(&format!("forward-zones={}\n", local.join(",")));
    }
    conf.push_str(&format!("forward-zones-recurse=.={}\n", forwarders.join(";")));
    conf
}

#[async_trait]
impl Component for PowerDns {
    fn spec(&self) -> &ComponentSpec {
        &self.spec
    }

    async fn install(&self, target: Target<'_>, cfg: &ComponentConfig) -> Result<()> {
        let exec = target.executor(NAME)?;

        // resolved's stub listener would hold port 53
        exec.execute(
            "set -euo pipefail\n\
             export DEBIAN_FRONTEND=noninteractive\n\
             if systemctl is-active --quiet systemd-resolved; then\n\
               install -d /etc/systemd/resolved.conf.d\n\
               printf '[Resolve]\\nDNSStubListener=no\\n' > /etc/systemd/resolved.conf.d/foundry.conf\n\
               systemctl restart systemd-resolved\n\
             fi\n\
             apt-get update -q\n\
             apt-get install -y -q pdns-server pdns-backend-sqlite3 pdns-recursor sqlite3",
        )
        .await?;

        self.configure(exec, cfg).await
    }

    async fn upgrade(&self, target: Target<'_>, cfg: &ComponentConfig) -> Result<()> {
        let exec = target.executor(NAME)?;
        exec.execute(
            "export DEBIAN_FRONTEND=noninteractive\n\
             apt-get update -q && apt-get install -y -q --only-upgrade pdns-server pdns-recursor",
        )
        .await?;
        self.configure(exec, cfg).await
    }

    async fn status(&self, target: Target<'_>) -> Result<ComponentStatus> {
        let exec = target.executor(NAME)?;
        host::service_status(exec, "pdns", "pdns_server --version 2>&1 | head -n1").await
    }

    async fn uninstall(&self, _target: Target<'_>) -> Result<()> {
        Err(host::refuse_uninstall(&self.spec))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::component::SecretSource;
    use crate::error::ComponentError;
    use crate::ssh::MockRemoteExecutor;
    use serde_json::json;

    fn cfg() -> ComponentConfig {
        let mut cfg = ComponentConfig::new();
        cfg.set_secret(API_KEY, "pdns-key");
        cfg.set(keys::DNS_ZONES, json!(["infra.local", "example.org"]));
        cfg.set(keys::DNS_FORWARDERS, json!(["10.0.0.1"]));
        cfg
    }

    #[test]
    fn test_recursor_forwards_local_zones() {
        let conf = recursor_config(
            &["infra.local".to_string()],
            &["1.1.1.1".to_string(), "9.9.9.9".to_string()],
        );
        assert!(conf.contains("forward-zones=infra.local=127.0.0.1:5300"));
        assert!(conf.contains("forward-zones-recurse=.=1.1.1.1;9.9.9.9"));
    }

    #[test]
    fn test_defaults() {
        let cfg = ComponentConfig::new();
        assert_eq!(forwarders(&cfg), vec!["1.1.1.1", "9.9.9.9"]);
        assert_eq!(api_port(&cfg), 8081);
        assert!(zones(&cfg).is_empty());
    }

    #[tokio::test]
    async fn test_install_writes_config_and_zones() {
        let exec = MockRemoteExecutor::new("dns-1");
        PowerDns::new()
            .install(Target::Host(&exec), &cfg())
            .await
            .unwrap();

        assert!(exec.ran("apt-get install -y -q pdns-server"));
        assert!(exec.ran("api-key=pdns-key"));
        assert!(exec.ran("forward-zones-recurse=.=10.0.0.1"));
        assert!(exec.ran("pdnsutil create-zone infra.local ns1.infra.local"));
        assert!(exec.ran("pdnsutil create-zone example.org ns1.example.org"));
    }

    #[tokio::test]
    async fn test_install_requires_api_key() {
        let exec = MockRemoteExecutor::new("dns-1");
        let mut cfg = ComponentConfig::new();
        cfg.set(keys::DNS_ZONES, json!(["infra.local"]));

        let err = PowerDns::new()
            .install(Target::Host(&exec), &cfg)
            .await
            .unwrap_err();
        assert!(matches!(err, ComponentError::MissingConfig { ref key } if key == "api_key"));
    }

    #[test]
    fn test_spec() {
        let dns = PowerDns::new();
        assert_eq!(dns.spec().dependencies, vec!["openbao"]);
        assert_eq!(dns.spec().secrets[0].source, SecretSource::DnsApiKey);
    }
}
