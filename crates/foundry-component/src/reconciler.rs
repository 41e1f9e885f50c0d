//! Component reconciliation
//!
//! `install` drives one component from whatever state it is in to
//! installed and healthy:
//!
//! 1. Resolve the component and build its [`ComponentConfig`]
//! 2. Validate flags, then check every dependency is installed
//! 3. Resolve declared secrets
//! 4. Host components: connect over SSH and run the install
//! 5. Cluster components: inspect the release and pick an [`Action`],
//!    execute it, then wait for the readiness predicate
//! 6. Persist the setup-state flag and register DNS records
//!
//! Nothing is mutated before step 4, so validation and dependency
//! failures leave the hosts, the cluster and the state file untouched.
//! Once the substrate has been changed, a failure to save state or to
//! register DNS is reported as a warning instead of failing the install.

use foundry_core::{ConfigStore, SecretResolverChain, StackConfig, StateFlag};
use foundry_kube::{CancelToken, HealthVerifier, ReleaseStatus};
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use crate::component::{
    ClusterHandle, Component, ComponentSpec, ComponentStatus, RefreshPolicy, Substrate, Target,
};
use crate::components::zot;
use crate::config::{ComponentConfig, keys};
use crate::dns::{ARecord, DNS_ROLE, DnsConnector, DnsRegistrar};
use crate::error::{ComponentError, KubeContext, Result};
use crate::registry::Registry;
use crate::ssh::RemoteConnector;

/// Options for `foundry component install`
#[derive(Debug, Clone, Default)]
pub struct InstallOptions {
    /// Report the planned action without changing anything
    pub dry_run: bool,

    /// Version override; falls back to `components.<name>.version`
    pub version: Option<String>,

    /// `local-path` or `nfs`
    pub storage_backend: Option<String>,

    pub nfs_server: Option<String>,
    pub nfs_path: Option<String>,
}

impl InstallOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enable dry-run mode
    pub fn dry_run(mut self) -> Self {
        self.dry_run = true;
        self
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = Some(version.into());
        self
    }

    pub fn with_storage_backend(mut self, backend: impl Into<String>) -> Self {
        self.storage_backend = Some(backend.into());
        self
    }

    pub fn with_nfs(mut self, server: impl Into<String>, path: impl Into<String>) -> Self {
        self.nfs_server = Some(server.into());
        self.nfs_path = Some(path.into());
        self
    }
}

/// What reconciliation will do to a component
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Install,
    Upgrade,
    /// Upgrade in place a release that is not deployed
    Repair,
    /// Uninstall then install a release that is not deployed
    Reinstall,
    Skip,
}

impl Action {
    fn completed(self) -> ReconcileAction {
        match self {
            Action::Install => ReconcileAction::Installed,
            Action::Upgrade => ReconcileAction::Upgraded,
            Action::Repair => ReconcileAction::Repaired,
            Action::Reinstall => ReconcileAction::Reinstalled,
            Action::Skip => ReconcileAction::Skipped,
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Action::Install => write!(f, "install"),
            Action::Upgrade => write!(f, "upgrade"),
            Action::Repair => write!(f, "repair in place"),
            Action::Reinstall => write!(f, "uninstall and reinstall"),
            Action::Skip => write!(f, "skip"),
        }
    }
}

/// What reconciliation did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileAction {
    Installed,
    Upgraded,
    Repaired,
    Reinstalled,
    Skipped,
    /// Dry run: the action that would have been taken
    Planned(Action),
}

impl fmt::Display for ReconcileAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReconcileAction::Installed => write!(f, "installed"),
            ReconcileAction::Upgraded => write!(f, "upgraded"),
            ReconcileAction::Repaired => write!(f, "repaired"),
            ReconcileAction::Reinstalled => write!(f, "reinstalled"),
            ReconcileAction::Skipped => write!(f, "already installed"),
            ReconcileAction::Planned(action) => write!(f, "would {}", action),
        }
    }
}

/// Result of reconciling one component
#[derive(Debug, Clone)]
pub struct ReconcileOutcome {
    pub component: String,
    pub action: ReconcileAction,

    /// Release status observed before acting (cluster components)
    pub previous: Option<ReleaseStatus>,

    /// DNS records created after install
    pub dns_records: Vec<ARecord>,

    /// Non-fatal problems after the substrate was changed
    pub warnings: Vec<String>,
}

impl ReconcileOutcome {
    fn new(component: &str, action: ReconcileAction, previous: Option<ReleaseStatus>) -> Self {
        Self {
            component: component.to_string(),
            action,
            previous,
            dns_records: Vec::new(),
            warnings: Vec::new(),
        }
    }

    fn warn(&mut self, message: String) {
        tracing::warn!("{}", message);
        self.warnings.push(message);
    }
}

/// Choose the action for a cluster component from its observed release status
///
/// `None` means the release does not exist.
pub fn plan(spec: &ComponentSpec, current: Option<&ReleaseStatus>) -> Action {
    match current {
        None => Action::Install,
        Some(status) if status.is_deployed() => match spec.refresh {
            RefreshPolicy::Skip => Action::Skip,
            RefreshPolicy::Upgrade => Action::Upgrade,
        },
        Some(_) if spec.stateful => Action::Repair,
        Some(_) => Action::Reinstall,
    }
}

/// Drives components to the installed state
pub struct Reconciler {
    registry: Arc<Registry>,
    store: ConfigStore,
    connector: Arc<dyn RemoteConnector>,
    dns: Arc<dyn DnsConnector>,
    cluster: Option<ClusterHandle>,
    secrets: Option<Arc<SecretResolverChain>>,
    poll_interval: Option<Duration>,
    cancel: CancelToken,
}

impl Reconciler {
    pub fn new(
        registry: Arc<Registry>,
        store: ConfigStore,
        connector: Arc<dyn RemoteConnector>,
        dns: Arc<dyn DnsConnector>,
    ) -> Self {
        Self {
            registry,
            store,
            connector,
            dns,
            cluster: None,
            secrets: None,
            poll_interval: None,
            cancel: CancelToken::never(),
        }
    }

    /// Kubernetes clients; without them cluster components fail with
    /// [`ComponentError::ClusterUnavailable`]
    pub fn with_cluster(mut self, cluster: ClusterHandle) -> Self {
        self.cluster = Some(cluster);
        self
    }

    /// Use this chain instead of one built from the stack configuration
    pub fn with_secrets(mut self, secrets: SecretResolverChain) -> Self {
        self.secrets = Some(Arc::new(secrets));
        self
    }

    /// Override the health check poll interval
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = Some(interval);
        self
    }

    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    // ========== Install ==========

    /// Install, upgrade or repair `name`
    pub async fn install(&self, name: &str, options: &InstallOptions) -> Result<ReconcileOutcome> {
        let component = self.registry.require(name)?;
        let spec = component.spec().clone();
        let mut config = self.store.load()?;
        let secrets = self.secrets_for(&config);

        let mut cfg = base_config(&spec, &config, options)?;
        component.validate(&cfg)?;
        self.check_dependencies(&spec, &config).await?;
        self.cancel.check()?;

        for requirement in &spec.secrets {
            let reference = requirement.source.reference(&config);
            let value = secrets.resolve_str(reference).await?;
            cfg.set_secret(requirement.key.clone(), value);
        }

        tracing::info!(
            "{} {} on {}",
            if options.dry_run { "planning" } else { "reconciling" },
            spec.name,
            spec.substrate
        );

        let mut outcome = match &spec.substrate {
            Substrate::Host { role } => {
                self.install_on_host(component.as_ref(), role, &config, cfg, options.dry_run)
                    .await?
            }
            Substrate::Kubernetes => {
                self.install_on_cluster(component.as_ref(), cfg, options.dry_run)
                    .await?
            }
        };

        if options.dry_run || outcome.action == ReconcileAction::Skipped {
            return Ok(outcome);
        }

        if let Some(flag) = spec.state_flag {
            config.setup_state.set(flag, true);
            if flag == StateFlag::SecretsBackend {
                config.setup_state.openbao_initialized = true;
            }
            if let Err(e) = self.store.save(&config) {
                outcome.warn(format!(
                    "{} was installed but the state file could not be saved: {}",
                    spec.name, e
                ));
            }

            let registrar = DnsRegistrar::new(&config, &self.registry, self.dns.as_ref(), &secrets);
            match registrar.register(&spec).await {
                Ok(records) => outcome.dns_records = records,
                Err(e) => outcome.warn(format!("DNS registration for {} failed: {}", spec.name, e)),
            }
        }

        Ok(outcome)
    }

    async fn install_on_host(
        &self,
        component: &dyn Component,
        role: &str,
        config: &StackConfig,
        mut cfg: ComponentConfig,
        dry_run: bool,
    ) -> Result<ReconcileOutcome> {
        let name = component.name();
        let host = config.host_for_role(role)?;
        if dry_run {
            tracing::info!("would install {} on {} ({})", name, host.hostname, host.address);
            return Ok(ReconcileOutcome::new(name, ReconcileAction::Planned(Action::Install), None));
        }

        let exec = self.connector.connect(host).await?;
        let target = Target::Host(exec.as_ref());
        self.guarded(component.prepare(target, &mut cfg)).await?;
        self.guarded(component.install(target, &cfg)).await?;

        tracing::info!("{} installed on {}", name, host.hostname);
        Ok(ReconcileOutcome::new(name, ReconcileAction::Installed, None))
    }

    async fn install_on_cluster(
        &self,
        component: &dyn Component,
        mut cfg: ComponentConfig,
        dry_run: bool,
    ) -> Result<ReconcileOutcome> {
        let spec = component.spec();
        let handle = self.cluster()?;
        let target = Target::Cluster(handle);

        let current = self.observe(component, handle).await?;
        let action = plan(spec, current.as_ref());
        match &current {
            Some(status) => tracing::info!("{} is {}; action: {}", spec.name, status, action),
            None => tracing::info!("{} is not installed; action: {}", spec.name, action),
        }

        if dry_run {
            return Ok(ReconcileOutcome::new(&spec.name, ReconcileAction::Planned(action), current));
        }
        if action == Action::Skip {
            return Ok(ReconcileOutcome::new(&spec.name, ReconcileAction::Skipped, current));
        }

        self.guarded(component.prepare(target, &mut cfg)).await?;
        match action {
            Action::Install => self.guarded(component.install(target, &cfg)).await?,
            Action::Upgrade => self.guarded(component.upgrade(target, &cfg)).await?,
            Action::Repair => {
                let status = current
                    .as_ref()
                    .map(ToString::to_string)
                    .unwrap_or_default();
                self.guarded(component.upgrade(target, &cfg))
                    .await
                    .map_err(|source| manual_intervention(spec, status, source))?
            }
            Action::Reinstall => {
                self.guarded(component.uninstall(target)).await?;
                self.guarded(component.install(target, &cfg)).await?
            }
            Action::Skip => {}
        }

        self.verify_health(spec, handle).await?;
        Ok(ReconcileOutcome::new(&spec.name, action.completed(), current))
    }

    /// Release status, or a status derived from the component's own check
    /// for components without a release
    async fn observe(
        &self,
        component: &dyn Component,
        handle: &ClusterHandle,
    ) -> Result<Option<ReleaseStatus>> {
        let spec = component.spec();
        if let Some(release) = &spec.release {
            let record = handle
                .helm
                .find(&release.name, &release.namespace)
                .await
                .context(format!("inspecting release {}", release.name))?;
            return Ok(record.map(|r| r.status));
        }

        let status = component.status(Target::Cluster(handle)).await?;
        Ok(match status {
            ComponentStatus { installed: false, .. } => None,
            ComponentStatus { healthy: true, .. } => Some(ReleaseStatus::Deployed),
            _ => Some(ReleaseStatus::Failed),
        })
    }

    async fn verify_health(&self, spec: &ComponentSpec, handle: &ClusterHandle) -> Result<()> {
        let Some(readiness) = &spec.readiness else {
            return Ok(());
        };

        let mut verifier = HealthVerifier::new(handle.cluster.clone());
        if let Some(interval) = self.poll_interval {
            verifier = verifier.with_interval(interval);
        }
        verifier
            .verify(
                &readiness.namespace,
                &readiness.predicate,
                readiness.timeout,
                &self.cancel,
            )
            .await
            .context(format!("{} did not become ready", spec.name))
    }

    // ========== Dependencies ==========

    async fn check_dependencies(&self, spec: &ComponentSpec, config: &StackConfig) -> Result<()> {
        for dependency in &spec.dependencies {
            let component = self.registry.require(dependency)?;
            if let Some(hint) = self.unsatisfied(component.as_ref(), config).await? {
                return Err(ComponentError::DependencyNotSatisfied {
                    component: spec.name.clone(),
                    dependency: dependency.clone(),
                    hint,
                });
            }
        }
        Ok(())
    }

    /// `Some(hint)` when `dependency` is not installed
    async fn unsatisfied(
        &self,
        dependency: &dyn Component,
        config: &StackConfig,
    ) -> Result<Option<String>> {
        let spec = dependency.spec();
        let install_hint = format!("run `foundry component install {}` first", spec.name);

        if let Some(flag) = spec.state_flag {
            return Ok((!config.setup_state.is_set(flag)).then_some(install_hint));
        }

        if !config.setup_state.is_set(StateFlag::Kubernetes) {
            return Ok(Some(format!(
                "the cluster is not installed; run `foundry component install k3s`, then `foundry component install {}`",
                spec.name
            )));
        }
        if spec.bundled {
            return Ok(None);
        }

        let handle = self.cluster()?;
        let installed = match &spec.release {
            Some(release) => handle
                .helm
                .find(&release.name, &release.namespace)
                .await
                .context(format!("inspecting release {}", release.name))?
                .is_some_and(|r| r.status.is_deployed()),
            None => {
                let status = dependency.status(Target::Cluster(handle)).await?;
                status.installed && status.healthy
            }
        };
        Ok((!installed).then_some(install_hint))
    }

    // ========== Status and uninstall ==========

    /// Live status of `name` from its substrate
    pub async fn status(&self, name: &str) -> Result<ComponentStatus> {
        let component = self.registry.require(name)?;
        match &component.spec().substrate {
            Substrate::Host { role } => {
                let config = self.store.load()?;
                let exec = self.connector.connect(config.host_for_role(role)?).await?;
                component.status(Target::Host(exec.as_ref())).await
            }
            Substrate::Kubernetes => component.status(Target::Cluster(self.cluster()?)).await,
        }
    }

    /// Remove a cluster component; foundational components are never removed
    pub async fn uninstall(&self, name: &str) -> Result<()> {
        let component = self.registry.require(name)?;
        if component.spec().is_foundational() {
            return Err(ComponentError::Unsupported {
                component: name.to_string(),
                operation: "uninstall".to_string(),
            });
        }
        self.guarded(component.uninstall(Target::Cluster(self.cluster()?)))
            .await?;
        tracing::info!("{} uninstalled", name);
        Ok(())
    }

    // ========== Helpers ==========

    fn cluster(&self) -> Result<&ClusterHandle> {
        self.cluster.as_ref().ok_or(ComponentError::ClusterUnavailable)
    }

    fn secrets_for(&self, config: &StackConfig) -> Arc<SecretResolverChain> {
        match &self.secrets {
            Some(secrets) => secrets.clone(),
            None => Arc::new(SecretResolverChain::from_config(config)),
        }
    }

    /// Run `operation` unless cancelled first
    async fn guarded<T>(&self, operation: impl Future<Output = Result<T>>) -> Result<T> {
        let mut cancel = self.cancel.clone();
        tokio::select! {
            result = operation => result,
            _ = cancel.cancelled() => Err(ComponentError::Cancelled),
        }
    }
}

/// Values every component sees, from the stack configuration and the flags
fn base_config(
    spec: &ComponentSpec,
    config: &StackConfig,
    options: &InstallOptions,
) -> Result<ComponentConfig> {
    let mut cfg = ComponentConfig::new();
    cfg.set(keys::DRY_RUN, options.dry_run)
        .set(keys::CLUSTER_NAME, config.cluster.name.clone())
        .set_opt(
            keys::VERSION,
            options
                .version
                .clone()
                .or_else(|| config.version_for(&spec.name).map(str::to_string)),
        )
        .set_opt(keys::CLUSTER_VIP, config.cluster.vip.clone())
        .set_opt(keys::STORAGE_BACKEND, options.storage_backend.clone())
        .set_opt(keys::NFS_SERVER, options.nfs_server.clone())
        .set_opt(keys::NFS_PATH, options.nfs_path.clone());

    let dns = &config.dns;
    let zones: Vec<String> = dns
        .local_zones
        .iter()
        .chain(&dns.public_zones)
        .cloned()
        .collect();
    cfg.set_opt(keys::DNS_ZONE, dns.primary_zone())
        .set(keys::DNS_ZONES, zones)
        .set(keys::DNS_FORWARDERS, dns.forwarders.clone())
        .set(keys::DNS_API_PORT, dns.api_port);

    if let Ok(host) = config.host_for_role(DNS_ROLE) {
        cfg.set(
            keys::DNS_SERVER,
            format!("http://{}:{}", host.address, dns.api_port),
        );
    }
    if let Ok(host) = config.host_for_role(zot::NAME) {
        cfg.set(
            keys::REGISTRY_ADDRESS,
            format!("{}:{}", host.address, zot::REGISTRY_PORT),
        );
    }

    if let Substrate::Host { role } = &spec.substrate {
        cfg.set(keys::HOST_ADDRESS, config.host_for_role(role)?.address.clone());
    }
    Ok(cfg)
}

fn manual_intervention(spec: &ComponentSpec, status: String, source: ComponentError) -> ComponentError {
    if matches!(source, ComponentError::Cancelled) {
        return source;
    }
    let (release, namespace) = match &spec.release {
        Some(release) => (release.name.clone(), release.namespace.clone()),
        None => (
            spec.name.clone(),
            spec.readiness
                .as_ref()
                .map(|r| r.namespace.clone())
                .unwrap_or_else(|| "default".to_string()),
        ),
    };
    ComponentError::ManualIntervention {
        component: spec.name.clone(),
        release,
        namespace,
        status,
        source: Box::new(source),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::components::{ComponentPaths, gateway_api, register_all};
    use crate::dns::MockDnsClient;
    use crate::ssh::{MockRemoteConnector, RemoteExecutor};
    use async_trait::async_trait;
    use foundry_core::{EnvResolver, Host, SetupState};
    use std::path::PathBuf;
    use foundry_kube::{
        DeploymentRecord, HelmOperation, MockClusterClient, MockHelmClient, PodInfo,
    };
    use tempfile::TempDir;

    const INIT_OUTPUT: &str = r#"{"unseal_keys_b64":["k1"],"root_token":"s.root"}"#;

    struct Fixture {
        dir: TempDir,
        store: ConfigStore,
        registry: Arc<Registry>,
        helm: Arc<MockHelmClient>,
        cluster: Arc<MockClusterClient>,
        ssh: Arc<MockRemoteConnector>,
        dns: MockDnsClient,
    }

    impl Fixture {
        fn new() -> Self {
            let dir = TempDir::new().unwrap();
            let store = ConfigStore::new(dir.path().join("stack.yaml"));

            let mut config = StackConfig::default();
            config.hosts = vec![
                Host::new("bao-1", "10.0.0.10").with_role("openbao"),
                Host::new("dns-1", "10.0.0.11").with_role("dns"),
                Host::new("zot-1", "10.0.0.12").with_role("zot"),
                Host::new("k3s-1", "10.0.0.13").with_role("cluster"),
            ];
            config.cluster.vip = Some("10.0.0.100".to_string());
            store.save(&config).unwrap();

            let registry = Registry::new();
            register_all(
                &registry,
                &ComponentPaths {
                    openbao_keys: Some(dir.path().join("openbao-keys.json")),
                    kubeconfig: Some(dir.path().join("kubeconfig")),
                },
            )
            .unwrap();

            Self {
                dir,
                store,
                registry: Arc::new(registry),
                helm: Arc::new(MockHelmClient::new()),
                cluster: Arc::new(MockClusterClient::new()),
                ssh: Arc::new(MockRemoteConnector::new()),
                dns: MockDnsClient::new(),
            }
        }

        fn reconciler(&self) -> Reconciler {
            self.reconciler_with(SecretResolverChain::new().with_resolver(EnvResolver::from_vars([(
                "FOUNDRY_SECRET_FOUNDRY_CORE_DNS_API_KEY",
                "pdns-key",
            )])))
        }

        fn reconciler_with(&self, secrets: SecretResolverChain) -> Reconciler {
            Reconciler::new(
                self.registry.clone(),
                self.store.clone(),
                self.ssh.clone(),
                Arc::new(self.dns.clone()),
            )
            .with_cluster(ClusterHandle::new(self.helm.clone(), self.cluster.clone()))
            .with_secrets(secrets)
            .with_poll_interval(Duration::from_millis(1))
        }

        fn mark(&self, flags: &[StateFlag]) {
            let mut config = self.store.load().unwrap();
            for flag in flags {
                config.setup_state.set(*flag, true);
            }
            self.store.save(&config).unwrap();
        }

        fn state(&self) -> SetupState {
            self.store.load().unwrap().setup_state
        }

        /// k3s installed and the Gateway API CRDs present
        fn cluster_ready(&self) {
            self.mark(&[
                StateFlag::SecretsBackend,
                StateFlag::Dns,
                StateFlag::Registry,
                StateFlag::Kubernetes,
            ]);
            for crd in gateway_api::REQUIRED_CRDS {
                self.cluster.add_crd(crd);
            }
        }

        fn release(&self, name: &str, namespace: &str, status: ReleaseStatus) {
            self.helm
                .insert_release(DeploymentRecord::new(name, namespace, status));
        }
    }

    // ========== Validation and dependencies ==========

    #[tokio::test]
    async fn test_unknown_component_suggests_name() {
        let fx = Fixture::new();
        let err = fx
            .reconciler()
            .install("grafna", &InstallOptions::new())
            .await
            .unwrap_err();

        assert!(err.is_validation());
        assert!(err.to_string().contains("did you mean 'grafana'"));
    }

    #[tokio::test]
    async fn test_k3s_blocked_on_first_missing_dependency() {
        let fx = Fixture::new();
        let err = fx
            .reconciler()
            .install("k3s", &InstallOptions::new())
            .await
            .unwrap_err();

        match err {
            ComponentError::DependencyNotSatisfied {
                ref component,
                ref dependency,
                ref hint,
            } => {
                assert_eq!(component, "k3s");
                assert_eq!(dependency, "openbao");
                assert!(hint.contains("foundry component install openbao"));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(fx.ssh.connects().is_empty());
        assert!(fx.state().installed().is_empty());

        fx.mark(&[StateFlag::SecretsBackend, StateFlag::Dns]);
        let err = fx
            .reconciler()
            .install("k3s", &InstallOptions::new())
            .await
            .unwrap_err();
        assert!(matches!(err, ComponentError::DependencyNotSatisfied { ref dependency, .. } if dependency == "zot"));
    }

    #[tokio::test]
    async fn test_cluster_component_requires_cluster() {
        let fx = Fixture::new();
        let err = fx
            .reconciler()
            .install("contour", &InstallOptions::new())
            .await
            .unwrap_err();

        assert!(err.is_dependency());
        assert!(err.to_string().contains("foundry component install k3s"));
        assert!(fx.helm.mutations().is_empty());
    }

    #[tokio::test]
    async fn test_release_dependency_must_be_deployed() {
        let fx = Fixture::new();
        fx.cluster_ready();
        fx.release("seaweedfs", "seaweedfs", ReleaseStatus::Failed);

        let err = fx
            .reconciler()
            .install("velero", &InstallOptions::new())
            .await
            .unwrap_err();

        assert!(matches!(err, ComponentError::DependencyNotSatisfied { ref dependency, .. } if dependency == "seaweedfs"));
        assert!(fx.helm.mutations().is_empty());
    }

    #[tokio::test]
    async fn test_flags_validated_before_dependencies() {
        let fx = Fixture::new();
        let err = fx
            .reconciler()
            .install("storage", &InstallOptions::new().with_storage_backend("nfs"))
            .await
            .unwrap_err();

        assert!(matches!(err, ComponentError::MissingFlag { ref flag, .. } if flag == "nfs-server"));
    }

    #[tokio::test]
    async fn test_missing_host_is_validation_error() {
        let fx = Fixture::new();
        let mut config = fx.store.load().unwrap();
        config.hosts.retain(|h| !h.has_role("zot"));
        fx.store.save(&config).unwrap();
        fx.mark(&[StateFlag::SecretsBackend]);

        let err = fx
            .reconciler()
            .install("zot", &InstallOptions::new())
            .await
            .unwrap_err();
        assert!(err.is_validation());
        assert!(fx.ssh.connects().is_empty());
    }

    #[tokio::test]
    async fn test_unresolvable_secret_fails_before_install() {
        let fx = Fixture::new();
        fx.mark(&[StateFlag::SecretsBackend]);

        let reconciler = fx.reconciler_with(
            SecretResolverChain::new().with_resolver(EnvResolver::from_vars(Vec::<(String, String)>::new())),
        );
        let err = reconciler
            .install("dns", &InstallOptions::new())
            .await
            .unwrap_err();

        assert!(err.to_string().contains("FOUNDRY_SECRET_FOUNDRY_CORE_DNS_API_KEY"));
        assert!(fx.ssh.connects().is_empty());
        assert!(!fx.state().dns_installed);
    }

    // ========== Host components ==========

    #[tokio::test]
    async fn test_openbao_install_persists_state() {
        let fx = Fixture::new();
        let exec = fx.ssh.executor("bao-1");
        exec.respond("bao status", r#"{"initialized":false,"sealed":true}"#);
        exec.respond("operator init", INIT_OUTPUT);

        let outcome = fx
            .reconciler()
            .install("openbao", &InstallOptions::new())
            .await
            .unwrap();

        assert_eq!(outcome.action, ReconcileAction::Installed);
        assert!(outcome.dns_records.is_empty());
        assert_eq!(fx.ssh.connects(), vec!["bao-1"]);

        let state = fx.state();
        assert!(state.openbao_installed);
        assert!(state.openbao_initialized);
        assert!(fx.dir.path().join("openbao-keys.json").exists());
        assert_eq!(fx.dns.calls(), 0);
    }

    #[tokio::test]
    async fn test_dns_install_backfills_records() {
        let fx = Fixture::new();
        fx.mark(&[StateFlag::SecretsBackend, StateFlag::Registry]);

        let outcome = fx
            .reconciler()
            .install("dns", &InstallOptions::new())
            .await
            .unwrap();

        let names: Vec<&str> = outcome.dns_records.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, vec!["openbao", "zot", "dns"]);
        assert!(fx.state().dns_installed);
        assert_eq!(
            fx.dns.endpoints(),
            vec![("http://10.0.0.11:8081".to_string(), "pdns-key".to_string())]
        );
        assert!(fx.ssh.executor("dns-1").ran("api-key=pdns-key"));

        // Re-running adds nothing new
        fx.reconciler()
            .install("dns", &InstallOptions::new())
            .await
            .unwrap();
        assert_eq!(fx.dns.records().len(), 3);
        assert_eq!(fx.dns.calls(), 6);
    }

    #[tokio::test]
    async fn test_state_kept_when_dns_registration_fails() {
        let fx = Fixture::new();
        fx.mark(&[StateFlag::SecretsBackend, StateFlag::Dns]);
        fx.dns.fail_on("zot");

        let outcome = fx
            .reconciler()
            .install("zot", &InstallOptions::new())
            .await
            .unwrap();

        assert_eq!(outcome.action, ReconcileAction::Installed);
        assert_eq!(outcome.warnings.len(), 1);
        assert!(outcome.warnings[0].contains("DNS registration"));
        assert!(fx.state().zot_installed);
    }

    #[tokio::test]
    async fn test_dns_uses_configured_api_key_reference() {
        let fx = Fixture::new();
        fx.mark(&[StateFlag::SecretsBackend]);
        let mut config = fx.store.load().unwrap();
        config.dns.api_key = "${secret:custom/pdns:key}".to_string();
        fx.store.save(&config).unwrap();

        let secrets = SecretResolverChain::new().with_resolver(EnvResolver::from_vars([(
            "FOUNDRY_SECRET_CUSTOM_PDNS_KEY",
            "custom-key",
        )]));
        let outcome = fx
            .reconciler_with(secrets)
            .install("dns", &InstallOptions::new())
            .await
            .unwrap();

        assert_eq!(outcome.action, ReconcileAction::Installed);
        assert!(outcome.warnings.is_empty(), "{:?}", outcome.warnings);
        assert!(fx.ssh.executor("dns-1").ran("api-key=custom-key"));
        assert_eq!(
            fx.dns.endpoints(),
            vec![("http://10.0.0.11:8081".to_string(), "custom-key".to_string())]
        );
    }

    /// Replaces the state file with a directory once a host is reached, so
    /// the configuration loads but cannot be written back
    struct StateBreakingConnector {
        inner: Arc<MockRemoteConnector>,
        state_file: PathBuf,
    }

    #[async_trait]
    impl RemoteConnector for StateBreakingConnector {
        async fn connect(&self, host: &Host) -> Result<Arc<dyn RemoteExecutor>> {
            std::fs::remove_file(&self.state_file).unwrap();
            std::fs::create_dir(&self.state_file).unwrap();
            self.inner.connect(host).await
        }
    }

    #[tokio::test]
    async fn test_state_save_failure_is_a_warning() {
        let fx = Fixture::new();
        fx.mark(&[StateFlag::SecretsBackend]);
        let connector = StateBreakingConnector {
            inner: fx.ssh.clone(),
            state_file: fx.store.path().to_path_buf(),
        };

        let outcome = Reconciler::new(
            fx.registry.clone(),
            fx.store.clone(),
            Arc::new(connector),
            Arc::new(fx.dns.clone()),
        )
        .with_secrets(SecretResolverChain::new())
        .install("zot", &InstallOptions::new())
        .await
        .unwrap();

        assert_eq!(outcome.action, ReconcileAction::Installed);
        assert_eq!(outcome.warnings.len(), 1);
        assert!(outcome.warnings[0].contains("could not be saved"));
        assert!(!fx.ssh.executor("zot-1").commands().is_empty());
    }

    #[tokio::test]
    async fn test_unreachable_host_leaves_state() {
        let fx = Fixture::new();
        fx.ssh.set_unreachable("bao-1");

        let err = fx
            .reconciler()
            .install("openbao", &InstallOptions::new())
            .await
            .unwrap_err();

        assert!(matches!(err, ComponentError::HostUnreachable { ref host, .. } if host == "bao-1"));
        assert!(!fx.state().openbao_installed);
    }

    #[tokio::test]
    async fn test_remote_command_failure_keeps_exit_code() {
        let fx = Fixture::new();
        fx.mark(&[StateFlag::SecretsBackend]);
        fx.ssh
            .executor("zot-1")
            .fail("zot-linux-amd64", 22, "curl: (22) The requested URL returned error: 404");

        let err = fx
            .reconciler()
            .install("zot", &InstallOptions::new().with_version("9.9.9"))
            .await
            .unwrap_err();

        assert!(matches!(err, ComponentError::RemoteCommand { exit_code: Some(22), .. }));
        assert!(!fx.state().zot_installed);
    }

    #[tokio::test]
    async fn test_host_dry_run_does_not_connect() {
        let fx = Fixture::new();
        fx.mark(&[StateFlag::SecretsBackend]);

        let outcome = fx
            .reconciler()
            .install("dns", &InstallOptions::new().dry_run())
            .await
            .unwrap();

        assert_eq!(outcome.action, ReconcileAction::Planned(Action::Install));
        assert!(fx.ssh.connects().is_empty());
        assert!(!fx.state().dns_installed);
        assert_eq!(fx.dns.calls(), 0);
    }

    // ========== Cluster components ==========

    #[tokio::test]
    async fn test_fresh_install_waits_for_pods() {
        let fx = Fixture::new();
        fx.cluster_ready();
        fx.cluster.push_pods(
            "projectcontour",
            vec![PodInfo::new("contour-envoy-x", "projectcontour", "Pending")],
        );
        fx.cluster.running("projectcontour", "contour-envoy-x");

        let outcome = fx
            .reconciler()
            .install("contour", &InstallOptions::new())
            .await
            .unwrap();

        assert_eq!(outcome.action, ReconcileAction::Installed);
        assert_eq!(outcome.previous, None);
        assert!(fx.cluster.pod_list_calls("projectcontour") >= 2);
        let values = fx.helm.last_values("contour").unwrap();
        assert_eq!(values["envoy"]["service"]["loadBalancerIP"], "10.0.0.100");
    }

    #[tokio::test]
    async fn test_version_flag_reaches_chart() {
        let fx = Fixture::new();
        fx.cluster_ready();
        fx.cluster.running("cert-manager", "cert-manager-abc");

        fx.reconciler()
            .install("cert-manager", &InstallOptions::new().with_version("v1.17.0"))
            .await
            .unwrap();

        let release = fx.helm.release("cert-manager", "cert-manager").unwrap();
        assert_eq!(release.app_version, "v1.17.0");
    }

    #[tokio::test]
    async fn test_deployed_release_is_skipped() {
        let fx = Fixture::new();
        fx.cluster_ready();
        fx.release("cert-manager", "cert-manager", ReleaseStatus::Deployed);

        let outcome = fx
            .reconciler()
            .install("cert-manager", &InstallOptions::new())
            .await
            .unwrap();

        assert_eq!(outcome.action, ReconcileAction::Skipped);
        assert!(fx.helm.mutations().is_empty());
        assert_eq!(fx.cluster.pod_list_calls("cert-manager"), 0);
    }

    #[tokio::test]
    async fn test_deployed_release_with_refresh_is_upgraded() {
        let fx = Fixture::new();
        fx.cluster_ready();
        fx.release("contour", "projectcontour", ReleaseStatus::Deployed);
        fx.cluster.running("projectcontour", "contour-envoy-x");

        let outcome = fx
            .reconciler()
            .install("contour", &InstallOptions::new())
            .await
            .unwrap();

        assert_eq!(outcome.action, ReconcileAction::Upgraded);
        let counts = fx.helm.operation_counts();
        assert_eq!((counts.installs, counts.upgrades, counts.uninstalls), (0, 1, 0));
    }

    #[tokio::test]
    async fn test_failed_stateless_release_is_reinstalled() {
        let fx = Fixture::new();
        fx.cluster_ready();
        fx.release("contour", "projectcontour", ReleaseStatus::Failed);
        fx.cluster.running("projectcontour", "contour-envoy-x");

        let outcome = fx
            .reconciler()
            .install("contour", &InstallOptions::new())
            .await
            .unwrap();

        assert_eq!(outcome.action, ReconcileAction::Reinstalled);
        assert_eq!(outcome.previous, Some(ReleaseStatus::Failed));
        assert_eq!(
            fx.helm.mutations(),
            vec![
                HelmOperation::Uninstall {
                    name: "contour".to_string(),
                    namespace: "projectcontour".to_string(),
                },
                HelmOperation::Install {
                    name: "contour".to_string(),
                    namespace: "projectcontour".to_string(),
                },
            ]
        );
    }

    #[tokio::test]
    async fn test_failed_stateful_release_is_upgraded_in_place() {
        let fx = Fixture::new();
        fx.cluster_ready();
        fx.release("seaweedfs", "seaweedfs", ReleaseStatus::PendingUpgrade);
        fx.cluster.running("seaweedfs", "seaweedfs-master-0");

        let outcome = fx
            .reconciler()
            .install("seaweedfs", &InstallOptions::new())
            .await
            .unwrap();

        assert_eq!(outcome.action, ReconcileAction::Repaired);
        assert_eq!(
            fx.helm.mutations(),
            vec![HelmOperation::Upgrade {
                name: "seaweedfs".to_string(),
                namespace: "seaweedfs".to_string(),
            }]
        );
    }

    #[tokio::test]
    async fn test_failed_repair_needs_manual_intervention() {
        let fx = Fixture::new();
        fx.cluster_ready();
        fx.release("seaweedfs", "seaweedfs", ReleaseStatus::Failed);
        fx.helm.fail_upgrade("seaweedfs");

        let err = fx
            .reconciler()
            .install("seaweedfs", &InstallOptions::new())
            .await
            .unwrap_err();

        assert!(err.is_manual_intervention());
        let message = err.to_string();
        assert!(message.contains("was 'failed'"));
        assert!(message.contains("helm uninstall seaweedfs -n seaweedfs"));
        assert_eq!(fx.helm.operation_counts().uninstalls, 0);
    }

    #[tokio::test]
    async fn test_cluster_dry_run_reports_plan() {
        let fx = Fixture::new();
        fx.cluster_ready();
        fx.release("contour", "projectcontour", ReleaseStatus::Failed);

        let outcome = fx
            .reconciler()
            .install("contour", &InstallOptions::new().dry_run())
            .await
            .unwrap();

        assert_eq!(outcome.action, ReconcileAction::Planned(Action::Reinstall));
        assert!(fx.helm.mutations().is_empty());
        assert_eq!(outcome.action.to_string(), "would uninstall and reinstall");
    }

    #[tokio::test]
    async fn test_release_less_component_uses_status() {
        let fx = Fixture::new();
        fx.cluster_ready();

        // CRDs already present: nothing to do
        let outcome = fx
            .reconciler()
            .install("gateway-api", &InstallOptions::new())
            .await
            .unwrap();
        assert_eq!(outcome.action, ReconcileAction::Skipped);
        assert!(fx.cluster.applied_manifests().is_empty());
    }

    #[tokio::test]
    async fn test_without_cluster_client() {
        let fx = Fixture::new();
        fx.cluster_ready();
        let reconciler = Reconciler::new(
            fx.registry.clone(),
            fx.store.clone(),
            fx.ssh.clone(),
            Arc::new(fx.dns.clone()),
        );

        let err = reconciler
            .install("cert-manager", &InstallOptions::new())
            .await
            .unwrap_err();
        assert!(matches!(err, ComponentError::ClusterUnavailable));
    }

    #[tokio::test]
    async fn test_cancelled_before_mutation() {
        let fx = Fixture::new();
        fx.cluster_ready();
        let (handle, token) = CancelToken::new();
        handle.cancel();

        let err = fx
            .reconciler()
            .with_cancel(token)
            .install("cert-manager", &InstallOptions::new())
            .await
            .unwrap_err();

        assert!(matches!(err, ComponentError::Cancelled));
        assert!(fx.helm.mutations().is_empty());
    }

    // ========== Planning ==========

    #[test]
    fn test_plan() {
        let stateless = ComponentSpec::kubernetes("a").release("a", "ns");
        let refreshed = stateless.clone().refresh(RefreshPolicy::Upgrade);
        let stateful = stateless.clone().stateful();

        assert_eq!(plan(&stateless, None), Action::Install);
        assert_eq!(plan(&stateless, Some(&ReleaseStatus::Deployed)), Action::Skip);
        assert_eq!(plan(&refreshed, Some(&ReleaseStatus::Deployed)), Action::Upgrade);
        assert_eq!(plan(&stateless, Some(&ReleaseStatus::Failed)), Action::Reinstall);
        assert_eq!(plan(&refreshed, Some(&ReleaseStatus::PendingInstall)), Action::Reinstall);
        assert_eq!(plan(&stateful, Some(&ReleaseStatus::Failed)), Action::Repair);
        assert_eq!(plan(&stateful, Some(&ReleaseStatus::Superseded)), Action::Repair);
    }

    // ========== Status and uninstall ==========

    #[tokio::test]
    async fn test_status_and_uninstall() {
        let fx = Fixture::new();
        fx.release("cert-manager", "cert-manager", ReleaseStatus::Deployed);
        fx.cluster.running("cert-manager", "cert-manager-abc");
        let reconciler = fx.reconciler();

        assert!(reconciler.status("cert-manager").await.unwrap().healthy);

        reconciler.uninstall("cert-manager").await.unwrap();
        assert!(fx.helm.release("cert-manager", "cert-manager").is_none());
        assert!(!reconciler.status("cert-manager").await.unwrap().installed);
    }

    #[tokio::test]
    async fn test_foundational_components_are_not_uninstalled() {
        let fx = Fixture::new();
        let err = fx.reconciler().uninstall("openbao").await.unwrap_err();
        assert!(matches!(err, ComponentError::Unsupported { .. }));
        assert!(fx.ssh.connects().is_empty());
    }
}
