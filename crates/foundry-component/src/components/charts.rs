//! Chart coordinates and values for the Helm-only components

use foundry_kube::PodReadiness;
use serde_json::{Value, json};
use std::time::Duration;

use super::chart::HelmChart;
use super::powerdns;
use crate::component::{ComponentSpec, RefreshPolicy};
use crate::config::{ComponentConfig, keys};
use crate::error::Result;

pub const MONITORING_NAMESPACE: &str = "monitoring";
pub const SEAWEEDFS_NAMESPACE: &str = "seaweedfs";
pub const SEAWEEDFS_S3_SECRET: &str = "seaweedfs-s3-secret";
pub const SEAWEEDFS_S3_ENDPOINT: &str = "http://seaweedfs-s3.seaweedfs.svc.cluster.local:8333";

const PROMETHEUS_URL: &str = "http://prometheus-server.monitoring.svc.cluster.local";
const LOKI_URL: &str = "http://loki.monitoring.svc.cluster.local:3100";

// ============ Networking ============

pub fn cert_manager() -> HelmChart {
    HelmChart::new(
        ComponentSpec::kubernetes("cert-manager")
            .depends_on(&["k3s"])
            .release("cert-manager", "cert-manager"),
        "jetstack/cert-manager",
        cert_manager_values,
    )
    .with_repo("jetstack", "https://charts.jetstack.io")
    .with_version("v1.16.2")
}

fn cert_manager_values(_cfg: &ComponentConfig) -> Result<Value> {
    Ok(json!({
        "crds": { "enabled": true, "keep": true },
        "config": {
            "apiVersion": "controller.config.cert-manager.io/v1alpha1",
            "kind": "ControllerConfiguration",
            "enableGatewayAPI": true,
        },
    }))
}

pub fn contour() -> HelmChart {
    HelmChart::new(
        ComponentSpec::kubernetes("contour")
            .depends_on(&["gateway-api"])
            .release("contour", "projectcontour")
            .refresh(RefreshPolicy::Upgrade),
        "bitnami/contour",
        contour_values,
    )
    .with_repo("bitnami", "https://charts.bitnami.com/bitnami")
    .with_version("19.3.2")
}

fn contour_values(cfg: &ComponentConfig) -> Result<Value> {
    let mut service = json!({ "type": "LoadBalancer", "externalTrafficPolicy": "Local" });
    if let Some(vip) = cfg.cluster_vip() {
        service["loadBalancerIP"] = json!(vip);
        service["annotations"] = json!({ "metallb.universe.tf/loadBalancerIPs": vip });
    }

    Ok(json!({
        "contour": {
            "ingressClass": { "create": true, "default": true },
        },
        "envoy": {
            "service": service,
        },
        "gatewayAPI": { "manageCRDs": false },
    }))
}

pub fn external_dns() -> HelmChart {
    HelmChart::new(
        ComponentSpec::kubernetes("external-dns")
            .depends_on(&["dns", "contour"])
            .release("external-dns", "external-dns")
            .refresh(RefreshPolicy::Upgrade)
            .dns_api_key(powerdns::API_KEY),
        "external-dns/external-dns",
        external_dns_values,
    )
    .with_repo("external-dns", "https://kubernetes-sigs.github.io/external-dns/")
    .with_version("1.15.0")
}

fn external_dns_values(cfg: &ComponentConfig) -> Result<Value> {
    let server = cfg.require_str(keys::DNS_SERVER)?;
    let zone = cfg.require_str(keys::DNS_ZONE)?;
    let owner = cfg.get_str(keys::CLUSTER_NAME).unwrap_or("foundry");

    Ok(json!({
        "provider": { "name": "pdns" },
        "sources": ["service", "ingress", "gateway-httproute"],
        "domainFilters": [zone],
        "policy": "upsert-only",
        "txtOwnerId": owner,
        "env": [{
            "name": "EXTERNAL_DNS_PDNS_API_KEY",
            "value": cfg.require_str(powerdns::API_KEY)?,
        }],
        "extraArgs": [format!("--pdns-server={}", server)],
    }))
}

// ============ Object storage ============

pub fn seaweedfs() -> HelmChart {
    HelmChart::new(
        ComponentSpec::kubernetes("seaweedfs")
            .depends_on(&["storage"])
            .release("seaweedfs", SEAWEEDFS_NAMESPACE)
            .readiness(
                SEAWEEDFS_NAMESPACE,
                PodReadiness::AllRunning,
                Duration::from_secs(600),
            )
            .stateful()
            .refresh(RefreshPolicy::Upgrade),
        "seaweedfs/seaweedfs",
        seaweedfs_values,
    )
    .with_repo("seaweedfs", "https://seaweedfs.github.io/seaweedfs/helm")
    .with_version("4.0.0")
}

fn seaweedfs_values(_cfg: &ComponentConfig) -> Result<Value> {
    Ok(json!({
        "master": {
            "replicas": 1,
            "data": { "type": "persistentVolumeClaim", "size": "5Gi" },
        },
        "volume": {
            "replicas": 1,
            "dataDirs": [{
                "name": "data",
                "type": "persistentVolumeClaim",
                "size": "50Gi",
                "maxVolumes": 0,
            }],
        },
        "filer": {
            "replicas": 1,
            "data": { "type": "persistentVolumeClaim", "size": "5Gi" },
            "s3": { "enabled": true, "enableAuth": true },
        },
        "s3": { "enabled": true, "enableAuth": true },
    }))
}

// ============ Observability ============

pub fn prometheus() -> HelmChart {
    HelmChart::new(
        ComponentSpec::kubernetes("prometheus")
            .depends_on(&["storage"])
            .release("prometheus", MONITORING_NAMESPACE)
            .readiness(
                MONITORING_NAMESPACE,
                PodReadiness::name_contains("prometheus-server"),
                foundry_kube::DEFAULT_HEALTH_TIMEOUT,
            )
            .stateful(),
        "prometheus-community/prometheus",
        prometheus_values,
    )
    .with_repo(
        "prometheus-community",
        "https://prometheus-community.github.io/helm-charts",
    )
    .with_version("26.0.0")
}

fn prometheus_values(_cfg: &ComponentConfig) -> Result<Value> {
    Ok(json!({
        "server": {
            "retention": "15d",
            "persistentVolume": { "enabled": true, "size": "20Gi" },
        },
        "alertmanager": { "enabled": false },
        "prometheus-pushgateway": { "enabled": false },
    }))
}

pub fn loki() -> HelmChart {
    HelmChart::new(
        ComponentSpec::kubernetes("loki")
            .depends_on(&["storage"])
            .release("loki", MONITORING_NAMESPACE)
            .readiness(
                MONITORING_NAMESPACE,
                PodReadiness::name_contains("loki"),
                foundry_kube::DEFAULT_HEALTH_TIMEOUT,
            )
            .stateful(),
        "grafana/loki",
        loki_values,
    )
    .with_repo("grafana", "https://grafana.github.io/helm-charts")
    .with_version("6.23.0")
}

fn loki_values(_cfg: &ComponentConfig) -> Result<Value> {
    Ok(json!({
        "deploymentMode": "SingleBinary",
        "loki": {
            "auth_enabled": false,
            "commonConfig": { "replication_factor": 1 },
            "storage": { "type": "filesystem" },
            "schemaConfig": {
                "configs": [{
                    "from": "2024-01-01",
                    "store": "tsdb",
                    "object_store": "filesystem",
                    "schema": "v13",
                    "index": { "prefix": "index_", "period": "24h" },
                }],
            },
        },
        "singleBinary": {
            "replicas": 1,
            "persistence": { "enabled": true, "size": "20Gi" },
        },
        "read": { "replicas": 0 },
        "write": { "replicas": 0 },
        "backend": { "replicas": 0 },
        "chunksCache": { "enabled": false },
        "resultsCache": { "enabled": false },
    }))
}

pub fn grafana() -> HelmChart {
    HelmChart::new(
        ComponentSpec::kubernetes("grafana")
            .depends_on(&["prometheus", "loki"])
            .release("grafana", MONITORING_NAMESPACE)
            .readiness(
                MONITORING_NAMESPACE,
                PodReadiness::name_contains("grafana"),
                foundry_kube::DEFAULT_HEALTH_TIMEOUT,
            )
            .stateful()
            .refresh(RefreshPolicy::Upgrade),
        "grafana/grafana",
        grafana_values,
    )
    .with_repo("grafana", "https://grafana.github.io/helm-charts")
    .with_version("8.8.2")
}

fn grafana_values(cfg: &ComponentConfig) -> Result<Value> {
    let mut values = json!({
        "persistence": { "enabled": true, "size": "5Gi" },
        "datasources": {
            "datasources.yaml": {
                "apiVersion": 1,
                "datasources": [
                    {
                        "name": "Prometheus",
                        "type": "prometheus",
                        "url": PROMETHEUS_URL,
                        "access": "proxy",
                        "isDefault": true,
                    },
                    {
                        "name": "Loki",
                        "type": "loki",
                        "url": LOKI_URL,
                        "access": "proxy",
                    },
                ],
            },
        },
    });

    if let Some(zone) = cfg.get_str(keys::DNS_ZONE) {
        let host = format!("grafana.{}", zone);
        values["grafana.ini"] = json!({ "server": { "root_url": format!("http://{}", host) } });
        values["ingress"] = json!({ "enabled": true, "hosts": [host] });
    }
    Ok(values)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::component::Component;

    #[test]
    fn test_contour_threads_vip_through_config() {
        let mut cfg = ComponentConfig::new();
        let values = contour_values(&cfg).unwrap();
        assert!(values["envoy"]["service"].get("loadBalancerIP").is_none());

        cfg.set(keys::CLUSTER_VIP, "10.0.0.100");
        let values = contour_values(&cfg).unwrap();
        assert_eq!(values["envoy"]["service"]["loadBalancerIP"], "10.0.0.100");
    }

    #[test]
    fn test_external_dns_requires_server_and_key() {
        let mut cfg = ComponentConfig::new();
        cfg.set(keys::DNS_ZONE, "infra.local");
        assert!(external_dns_values(&cfg).is_err());

        cfg.set(keys::DNS_SERVER, "http://10.0.0.11:8081");
        cfg.set_secret(powerdns::API_KEY, "pdns-key");
        let values = external_dns_values(&cfg).unwrap();
        assert_eq!(values["domainFilters"][0], "infra.local");
        assert_eq!(values["extraArgs"][0], "--pdns-server=http://10.0.0.11:8081");
    }

    #[test]
    fn test_grafana_ingress_follows_zone() {
        let mut cfg = ComponentConfig::new();
        assert!(grafana_values(&cfg).unwrap().get("ingress").is_none());

        cfg.set(keys::DNS_ZONE, "infra.local");
        let values = grafana_values(&cfg).unwrap();
        assert_eq!(values["ingress"]["hosts"][0], "grafana.infra.local");
    }

    #[test]
    fn test_stateful_and_refresh_attributes() {
        assert!(seaweedfs().spec().stateful);
        assert_eq!(seaweedfs().spec().refresh, RefreshPolicy::Upgrade);
        assert!(!contour().spec().stateful);
        assert_eq!(contour().spec().refresh, RefreshPolicy::Upgrade);
        assert!(!cert_manager().spec().stateful);
        assert_eq!(cert_manager().spec().refresh, RefreshPolicy::Skip);
        assert!(grafana().spec().stateful);
    }
}
