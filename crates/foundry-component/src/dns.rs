//! Service discovery: A records in PowerDNS
//!
//! Registration runs after a foundational component is installed:
//!
//! - installing DNS itself backfills one record per foundational component
//!   already marked installed, plus DNS's own record
//! - installing any other foundational component once DNS exists adds a
//!   single record for that component
//!
//! Record creation is idempotent at the client level, so repeating either
//! pass never duplicates records. A backfill that fails partway leaves the
//! records created so far in place.

use async_trait::async_trait;
use foundry_core::{SecretResolverChain, StackConfig, StateFlag};
use serde_json::json;
use std::collections::BTreeSet;
use std::sync::{Arc, RwLock};

use crate::component::ComponentSpec;
use crate::error::{ComponentError, Result};
use crate::registry::Registry;

/// Default TTL for registered records
pub const RECORD_TTL: u32 = 300;

/// Role of the host that runs the DNS server
pub const DNS_ROLE: &str = "dns";

/// An A record `name.zone -> address`
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ARecord {
    pub zone: String,
    pub name: String,
    pub address: String,
}

impl ARecord {
    pub fn fqdn(&self) -> String {
        format!("{}.{}", self.name, canonical_zone(&self.zone))
    }
}

/// Authoritative DNS API
#[async_trait]
pub trait DnsClient: Send + Sync {
    /// Create or replace `short_name.zone A address`; identical records are a no-op
    async fn add_a_record(&self, zone: &str, short_name: &str, address: &str) -> Result<()>;
}

/// Builds a DNS client for an endpoint
pub trait DnsConnector: Send + Sync {
    fn connect(&self, endpoint: &str, api_key: &str) -> Arc<dyn DnsClient>;
}

/// Zone name with a trailing dot
pub fn canonical_zone(zone: &str) -> String {
    format!("{}.", zone.trim_end_matches('.'))
}

// ============ PowerDNS ============

/// PowerDNS HTTP API client
#[derive(Clone)]
pub struct PowerDnsClient {
    endpoint: String,
    api_key: String,
    server_id: String,
    http: reqwest::Client,
}

impl PowerDnsClient {
    pub fn new(endpoint: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            server_id: "localhost".to_string(),
            http: reqwest::Client::new(),
        }
    }

    fn zone_url(&self, zone: &str) -> String {
        format!(
            "{}/api/v1/servers/{}/zones/{}",
            self.endpoint,
            self.server_id,
            canonical_zone(zone)
        )
    }
}

#[async_trait]
impl DnsClient for PowerDnsClient {
    async fn add_a_record(&self, zone: &str, short_name: &str, address: &str) -> Result<()> {
        let record = ARecord {
            zone: zone.to_string(),
            name: short_name.to_string(),
            address: address.to_string(),
        };

        // REPLACE makes repeated calls converge on the same rrset
        let body = json!({
            "rrsets": [{
                "name": record.fqdn(),
                "type": "A",
                "ttl": RECORD_TTL,
                "changetype": "REPLACE",
                "records": [{ "content": address, "disabled": false }],
            }]
        });

        let response = self
            .http
            .patch(self.zone_url(zone))
            .header("X-API-Key", &self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| ComponentError::Dns {
                message: format!("creating {} failed: {}", record.fqdn(), e),
            })?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(ComponentError::Dns {
                message: format!(
                    "creating {} failed with HTTP {}: {}",
                    record.fqdn(),
                    status.as_u16(),
                    detail.trim()
                ),
            });
        }

        tracing::info!("registered {} -> {}", record.fqdn(), address);
        Ok(())
    }
}

/// Connects [`PowerDnsClient`]s
#[derive(Debug, Default, Clone, Copy)]
pub struct PowerDnsConnector;

impl DnsConnector for PowerDnsConnector {
    fn connect(&self, endpoint: &str, api_key: &str) -> Arc<dyn DnsClient> {
        Arc::new(PowerDnsClient::new(endpoint, api_key))
    }
}

// ============ Registration ============

/// Runs the self-registration pass for a freshly installed component
pub struct DnsRegistrar<'a> {
    config: &'a StackConfig,
    registry: &'a Registry,
    connector: &'a dyn DnsConnector,
    secrets: &'a SecretResolverChain,
}

impl<'a> DnsRegistrar<'a> {
    /// `config` must already reflect the new installation state
    pub fn new(
        config: &'a StackConfig,
        registry: &'a Registry,
        connector: &'a dyn DnsConnector,
        secrets: &'a SecretResolverChain,
    ) -> Self {
        Self {
            config,
            registry,
            connector,
            secrets,
        }
    }

    /// Records to create after `spec` was installed; empty when nothing applies
    pub fn plan(&self, spec: &ComponentSpec) -> Result<Vec<ARecord>> {
        let Some(flag) = spec.state_flag else {
            return Ok(Vec::new());
        };

        let state = &self.config.setup_state;
        let members: Vec<ComponentSpec> = if flag == StateFlag::Dns {
            let mut installed = self.foundational_installed(&spec.name);
            installed.push(spec.clone());
            installed
        } else if state.is_set(StateFlag::Dns) {
            vec![spec.clone()]
        } else {
            tracing::debug!("no DNS server yet; {} not registered", spec.name);
            return Ok(Vec::new());
        };

        let zone = self.zone()?;
        members
            .iter()
            .map(|member| {
                let address = self.address_of(member)?;
                Ok(ARecord {
                    zone: zone.clone(),
                    name: member.dns_name().to_string(),
                    address,
                })
            })
            .collect()
    }

    /// Create the planned records, stopping at the first failure
    pub async fn register(&self, spec: &ComponentSpec) -> Result<Vec<ARecord>> {
        let records = self.plan(spec)?;
        if records.is_empty() {
            return Ok(records);
        }

        let client = self.client().await?;
        for record in &records {
            client
                .add_a_record(&record.zone, &record.name, &record.address)
                .await?;
        }
        Ok(records)
    }

    /// Installed foundational components other than `except`, in install order
    fn foundational_installed(&self, except: &str) -> Vec<ComponentSpec> {
        let mut specs: Vec<ComponentSpec> = self
            .registry
            .specs()
            .into_iter()
            .filter(|s| s.name != except)
            .filter(|s| {
                s.state_flag
                    .is_some_and(|flag| self.config.setup_state.is_set(flag))
            })
            .collect();
        specs.sort_by_key(|s| {
            StateFlag::ALL
                .iter()
                .position(|f| Some(*f) == s.state_flag)
        });
        specs
    }

    fn zone(&self) -> Result<String> {
        self.config
            .dns
            .primary_zone()
            .map(str::to_string)
            .ok_or_else(|| ComponentError::InvalidConfig {
                message: "no DNS zone configured (dns.local_zones or dns.public_zones)"
                    .to_string(),
            })
    }

    fn address_of(&self, spec: &ComponentSpec) -> Result<String> {
        match &spec.substrate {
            crate::component::Substrate::Host { role } => {
                Ok(self.config.host_for_role(role)?.address.clone())
            }
            crate::component::Substrate::Kubernetes => Err(ComponentError::InvalidConfig {
                message: format!("{} has no host address to register", spec.name),
            }),
        }
    }

    async fn client(&self) -> Result<Arc<dyn DnsClient>> {
        let host = self.config.host_for_role(DNS_ROLE)?;
        let endpoint = format!("http://{}:{}", host.address, self.config.dns.api_port);
        let api_key = self.secrets.resolve_str(&self.config.dns.api_key).await?;
        Ok(self.connector.connect(&endpoint, &api_key))
    }
}

// ============ Mocks ============

/// In-memory DNS server holding a set of records
#[derive(Debug, Default, Clone)]
pub struct MockDnsClient {
    records: Arc<RwLock<BTreeSet<ARecord>>>,
    calls: Arc<RwLock<usize>>,
    fail_names: Arc<RwLock<BTreeSet<String>>>,
    endpoints: Arc<RwLock<Vec<(String, String)>>>,
}

impl MockDnsClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make record creation for `short_name` fail
    pub fn fail_on(&self, short_name: &str) {
        self.fail_names.write().unwrap().insert(short_name.to_string());
    }

    pub fn records(&self) -> Vec<ARecord> {
        self.records.read().unwrap().iter().cloned().collect()
    }

    /// Total `add_a_record` calls, including no-ops
    pub fn calls(&self) -> usize {
        *self.calls.read().unwrap()
    }

    /// (endpoint, api key) pairs connected with
    pub fn endpoints(&self) -> Vec<(String, String)> {
        self.endpoints.read().unwrap().clone()
    }
}

#[async_trait]
impl DnsClient for MockDnsClient {
    async fn add_a_record(&self, zone: &str, short_name: &str, address: &str) -> Result<()> {
        *self.calls.write().unwrap() += 1;
        if self.fail_names.read().unwrap().contains(short_name) {
            return Err(ComponentError::Dns {
                message: format!("refused {}", short_name),
            });
        }

        let mut records = self.records.write().unwrap();
        records.retain(|r| !(r.zone == zone && r.name == short_name));
        records.insert(ARecord {
            zone: zone.to_string(),
            name: short_name.to_string(),
            address: address.to_string(),
        });
        Ok(())
    }
}

impl DnsConnector for MockDnsClient {
    fn connect(&self, endpoint: &str, api_key: &str) -> Arc<dyn DnsClient> {
        self.endpoints
            .write()
            .unwrap()
            .push((endpoint.to_string(), api_key.to_string()));
        Arc::new(self.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::components;
    use foundry_core::{EnvResolver, Host};
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn stack() -> StackConfig {
        let mut config = StackConfig::default();
        config.hosts = vec![
            Host::new("bao-1", "10.0.0.10").with_role("openbao"),
            Host::new("dns-1", "10.0.0.11").with_role("dns"),
            Host::new("zot-1", "10.0.0.12").with_role("zot"),
            Host::new("k3s-1", "10.0.0.13").with_role("cluster"),
        ];
        config.dns.local_zones = vec!["infra.local".to_string()];
        config
    }

    fn secrets() -> SecretResolverChain {
        SecretResolverChain::new().with_resolver(EnvResolver::from_vars([(
            "FOUNDRY_SECRET_FOUNDRY_CORE_DNS_API_KEY",
            "pdns-key",
        )]))
    }

    fn spec_of(registry: &Registry, name: &str) -> ComponentSpec {
        registry.get(name).unwrap().spec().clone()
    }

    #[test]
    fn test_canonical_zone() {
        assert_eq!(canonical_zone("infra.local"), "infra.local.");
        assert_eq!(canonical_zone("infra.local."), "infra.local.");
    }

    #[tokio::test]
    async fn test_backfill_registers_installed_components_and_dns() {
        let registry = components::default_registry();
        let mut config = stack();
        config.setup_state.openbao_installed = true;
        config.setup_state.zot_installed = true;
        config.setup_state.dns_installed = true;

        let dns = MockDnsClient::new();
        let chain = secrets();
        let registrar = DnsRegistrar::new(&config, &registry, &dns, &chain);

        let records = registrar.register(&spec_of(&registry, "dns")).await.unwrap();
        let names: Vec<&str> = records.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, vec!["openbao", "zot", "dns"]);
        assert_eq!(dns.records().len(), 3);
        assert_eq!(
            dns.endpoints(),
            vec![("http://10.0.0.11:8081".to_string(), "pdns-key".to_string())]
        );

        // Second pass converges on the same set
        registrar.register(&spec_of(&registry, "dns")).await.unwrap();
        assert_eq!(dns.records().len(), 3);
        assert_eq!(dns.calls(), 6);
    }

    #[tokio::test]
    async fn test_self_register_after_dns() {
        let registry = components::default_registry();
        let mut config = stack();
        config.setup_state.openbao_installed = true;
        config.setup_state.dns_installed = true;
        config.setup_state.k3s_installed = true;

        let dns = MockDnsClient::new();
        let chain = secrets();
        let registrar = DnsRegistrar::new(&config, &registry, &dns, &chain);

        let records = registrar.register(&spec_of(&registry, "k3s")).await.unwrap();
        assert_eq!(
            records,
            vec![ARecord {
                zone: "infra.local".to_string(),
                name: "k3s".to_string(),
                address: "10.0.0.13".to_string(),
            }]
        );
    }

    #[tokio::test]
    async fn test_no_registration_without_dns() {
        let registry = components::default_registry();
        let mut config = stack();
        config.setup_state.openbao_installed = true;

        let dns = MockDnsClient::new();
        let chain = secrets();
        let registrar = DnsRegistrar::new(&config, &registry, &dns, &chain);

        let records = registrar.register(&spec_of(&registry, "openbao")).await.unwrap();
        assert!(records.is_empty());
        assert_eq!(dns.calls(), 0);
        assert!(dns.endpoints().is_empty());
    }

    #[tokio::test]
    async fn test_kubernetes_components_never_register() {
        let registry = components::default_registry();
        let mut config = stack();
        config.setup_state.dns_installed = true;

        let dns = MockDnsClient::new();
        let chain = secrets();
        let registrar = DnsRegistrar::new(&config, &registry, &dns, &chain);

        assert!(registrar.plan(&spec_of(&registry, "grafana")).unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_backfill_failure_keeps_earlier_records() {
        let registry = components::default_registry();
        let mut config = stack();
        config.setup_state.openbao_installed = true;
        config.setup_state.zot_installed = true;
        config.setup_state.dns_installed = true;

        let dns = MockDnsClient::new();
        dns.fail_on("zot");
        let chain = secrets();
        let registrar = DnsRegistrar::new(&config, &registry, &dns, &chain);

        let err = registrar.register(&spec_of(&registry, "dns")).await.unwrap_err();
        assert!(matches!(err, ComponentError::Dns { .. }));
        let names: Vec<String> = dns.records().into_iter().map(|r| r.name).collect();
        assert_eq!(names, vec!["openbao"]);
    }

    #[tokio::test]
    async fn test_missing_zone_is_config_error() {
        let registry = components::default_registry();
        let mut config = stack();
        config.dns.local_zones.clear();
        config.setup_state.dns_installed = true;

        let dns = MockDnsClient::new();
        let chain = secrets();
        let registrar = DnsRegistrar::new(&config, &registry, &dns, &chain);

        let err = registrar.plan(&spec_of(&registry, "dns")).unwrap_err();
        assert!(matches!(err, ComponentError::InvalidConfig { .. }));
    }

    #[tokio::test]
    async fn test_powerdns_patch_rrset() {
        let server = MockServer::start().await;
        Mock::given(method("PATCH"))
            .and(path("/api/v1/servers/localhost/zones/infra.local."))
            .and(header("X-API-Key", "pdns-key"))
            .and(body_partial_json(json!({
                "rrsets": [{
                    "name": "openbao.infra.local.",
                    "type": "A",
                    "changetype": "REPLACE",
                    "records": [{ "content": "10.0.0.10", "disabled": false }]
                }]
            })))
            .respond_with(ResponseTemplate::new(204))
            .expect(2)
            .mount(&server)
            .await;

        let client = PowerDnsClient::new(server.uri(), "pdns-key");
        client.add_a_record("infra.local", "openbao", "10.0.0.10").await.unwrap();
        client.add_a_record("infra.local", "openbao", "10.0.0.10").await.unwrap();
    }

    #[tokio::test]
    async fn test_powerdns_error_status() {
        let server = MockServer::start().await;
        Mock::given(method("PATCH"))
            .respond_with(ResponseTemplate::new(422).set_body_string("Zone not found"))
            .mount(&server)
            .await;

        let client = PowerDnsClient::new(server.uri(), "pdns-key");
        let err = client
            .add_a_record("missing.zone", "dns", "10.0.0.11")
            .await
            .unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("HTTP 422"));
        assert!(msg.contains("Zone not found"));
    }

    #[tokio::test]
    async fn test_powerdns_unreachable() {
        let uri = MockServer::start().await.uri();

        let client = PowerDnsClient::new(uri, "pdns-key");
        let err = client
            .add_a_record("infra.local", "zot", "10.0.0.12")
            .await
            .unwrap_err();
        assert!(matches!(err, ComponentError::Dns { .. }));
        assert!(err.to_string().contains("creating zot.infra.local."));
    }
}
