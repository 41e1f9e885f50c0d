//! The stack's components
//!
//! Host components (installed over SSH): `openbao`, `dns`, `zot`, `k3s`.
//! Cluster components: `storage`, `gateway-api`, `cert-manager`, `contour`,
//! `seaweedfs`, `prometheus`, `loki`, `grafana`, `external-dns`, `velero`.

pub mod chart;
pub mod charts;
pub mod gateway_api;
pub mod host;
pub mod k3s;
pub mod openbao;
pub mod powerdns;
pub mod storage;
pub mod velero;
pub mod zot;

use std::path::PathBuf;
use std::sync::Arc;

use crate::component::Component;
use crate::error::Result;
use crate::registry::Registry;

pub use chart::HelmChart;
pub use gateway_api::GatewayApi;
pub use k3s::K3s;
pub use openbao::OpenBao;
pub use powerdns::PowerDns;
pub use storage::{Storage, StorageBackend};
pub use velero::Velero;
pub use zot::Zot;

/// Local paths components write to
#[derive(Debug, Clone, Default)]
pub struct ComponentPaths {
    /// Backend key file (`~/.config/foundry/openbao-keys.json` when unset)
    pub openbao_keys: Option<PathBuf>,
    /// Kubeconfig written after k3s install (`~/.config/foundry/kubeconfig` when unset)
    pub kubeconfig: Option<PathBuf>,
}

/// Every stack component
pub fn all(paths: &ComponentPaths) -> Vec<Arc<dyn Component>> {
    vec![
        Arc::new(OpenBao::new(paths.openbao_keys.clone())),
        Arc::new(PowerDns::new()),
        Arc::new(Zot::new()),
        Arc::new(K3s::new(paths.kubeconfig.clone())),
        Arc::new(Storage::new()),
        Arc::new(GatewayApi::new()),
        Arc::new(charts::cert_manager()),
        Arc::new(charts::contour()),
        Arc::new(charts::seaweedfs()),
        Arc::new(charts::prometheus()),
        Arc::new(charts::loki()),
        Arc::new(charts::grafana()),
        Arc::new(charts::external_dns()),
        Arc::new(Velero::new()),
    ]
}

/// Register every stack component
pub fn register_all(registry: &Registry, paths: &ComponentPaths) -> Result<()> {
    for component in all(paths) {
        registry.register(component)?;
    }
    Ok(())
}

/// A registry holding every stack component with default paths
pub fn default_registry() -> Registry {
    let registry = Registry::new();
    for component in all(&ComponentPaths::default()) {
        // Names in `all` are unique
        let _ = registry.register(component);
    }
    registry
}
