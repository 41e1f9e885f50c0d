//! Secret references and the resolver chain
//!
//! Configuration never stores secret values. It stores references such as
//! `${secret:foundry-core/dns:api_key}` which are resolved on demand by
//! trying each resolver in order:
//!
//! 1. **Environment**: `FOUNDRY_SECRET_<PATH>_<KEY>`
//! 2. **Backend**: OpenBAO KV v2, only when an address and a token are available
//!
//! Nothing is cached: every call re-reads the environment and re-contacts the
//! backend.

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::config::{StackConfig, config_dir};
use crate::error::{CoreError, Result};
use crate::openbao::{OpenBaoClient, SecretBackend};

static SECRET_REF: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\$\{secret:([^:}]+)(?::([^:}]+))?:([^:}]+)\}$").expect("valid secret regex")
});

/// Prefix for environment overrides
pub const ENV_PREFIX: &str = "FOUNDRY_SECRET_";

/// Port the secrets backend listens on
pub const BACKEND_PORT: u16 = 8200;

/// A parsed `${secret:...}` reference
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SecretRef {
    pub mount: String,
    pub path: String,
    pub key: String,
}

impl SecretRef {
    /// Parse `${secret:path:key}` (default mount) or `${secret:mount:path:key}`
    pub fn parse(reference: &str, default_mount: &str) -> Result<Self> {
        let caps = SECRET_REF
            .captures(reference.trim())
            .ok_or_else(|| CoreError::InvalidSecretRef {
                reference: reference.to_string(),
            })?;

        let first = caps[1].to_string();
        let key = caps[3].to_string();
        let (mount, path) = match caps.get(2) {
            Some(path) => (first, path.as_str().to_string()),
            None => (default_mount.to_string(), first),
        };

        Ok(Self { mount, path, key })
    }

    /// Whether a string looks like a secret reference
    pub fn is_reference(value: &str) -> bool {
        SECRET_REF.is_match(value.trim())
    }

    /// Environment variable consulted for this reference
    pub fn env_var(&self) -> String {
        let raw = format!("{}_{}", self.path, self.key);
        let normalized: String = raw
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() {
                    c.to_ascii_uppercase()
                } else {
                    '_'
                }
            })
            .collect();
        format!("{ENV_PREFIX}{normalized}")
    }
}

impl fmt::Display for SecretRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "${{secret:{}:{}:{}}}", self.mount, self.path, self.key)
    }
}

/// One link in the resolver chain
#[async_trait]
pub trait SecretResolver: Send + Sync {
    /// Short name for logs
    fn name(&self) -> &'static str;

    /// `Ok(None)` when this resolver does not know the secret
    async fn resolve(&self, reference: &SecretRef) -> Result<Option<String>>;
}

type EnvLookup = Box<dyn Fn(&str) -> Option<String> + Send + Sync>;

/// Resolves references from environment variables
pub struct EnvResolver {
    lookup: EnvLookup,
}

impl EnvResolver {
    /// Read the process environment
    pub fn new() -> Self {
        Self {
            lookup: Box::new(|var| std::env::var(var).ok().filter(|v| !v.is_empty())),
        }
    }

    /// Read from a fixed set of variables instead of the process environment
    pub fn from_vars<I, K, V>(vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let vars: HashMap<String, String> = vars
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();
        Self {
            lookup: Box::new(move |var| vars.get(var).cloned()),
        }
    }
}

impl Default for EnvResolver {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SecretResolver for EnvResolver {
    fn name(&self) -> &'static str {
        "env"
    }

    async fn resolve(&self, reference: &SecretRef) -> Result<Option<String>> {
        Ok((self.lookup)(&reference.env_var()))
    }
}

/// Resolves references from a KV v2 secret backend
pub struct BackendResolver {
    backend: Arc<dyn SecretBackend>,
}

impl BackendResolver {
    pub fn new(backend: Arc<dyn SecretBackend>) -> Self {
        Self { backend }
    }
}

#[async_trait]
impl SecretResolver for BackendResolver {
    fn name(&self) -> &'static str {
        "openbao"
    }

    async fn resolve(&self, reference: &SecretRef) -> Result<Option<String>> {
        let data = self
            .backend
            .read_secret_v2(&reference.mount, &reference.path)
            .await?;
        Ok(data.and_then(|mut d| d.remove(&reference.key)))
    }
}

/// Ordered list of resolvers; the first hit wins
pub struct SecretResolverChain {
    resolvers: Vec<Box<dyn SecretResolver>>,
    default_mount: String,
}

impl SecretResolverChain {
    /// Empty chain using mount `secret`
    pub fn new() -> Self {
        Self {
            resolvers: Vec::new(),
            default_mount: "secret".to_string(),
        }
    }

    /// Builder: append a resolver
    pub fn with_resolver(mut self, resolver: impl SecretResolver + 'static) -> Self {
        self.resolvers.push(Box::new(resolver));
        self
    }

    /// Builder: mount used for two-part references
    pub fn with_default_mount(mut self, mount: impl Into<String>) -> Self {
        self.default_mount = mount.into();
        self
    }

    /// Environment first, then the backend when it is reachable
    ///
    /// The backend resolver is left out when no address or no token can be
    /// found. That is not an error: resolution silently degrades to the
    /// environment only.
    pub fn from_config(config: &StackConfig) -> Self {
        let chain = Self::new()
            .with_default_mount(config.secrets.mount.clone())
            .with_resolver(EnvResolver::new());

        let Some(address) = backend_address(config) else {
            tracing::debug!("no secrets backend address; using environment only");
            return chain;
        };

        let token_path = match &config.secrets.token_file {
            Some(path) => path.clone(),
            None => match default_token_path() {
                Ok(path) => path,
                Err(e) => {
                    tracing::debug!("no token path: {}", e);
                    return chain;
                }
            },
        };

        match read_token(&token_path) {
            Ok(token) => {
                tracing::debug!("secrets backend resolver enabled at {}", address);
                chain.with_resolver(BackendResolver::new(Arc::new(OpenBaoClient::new(
                    address, token,
                ))))
            }
            Err(e) => {
                tracing::debug!(
                    "secrets backend token unavailable ({}): {}",
                    token_path.display(),
                    e
                );
                chain
            }
        }
    }

    /// Names of the resolvers in order
    pub fn resolver_names(&self) -> Vec<&'static str> {
        self.resolvers.iter().map(|r| r.name()).collect()
    }

    /// Resolve a parsed reference
    ///
    /// A failing resolver does not stop the chain, but its error is kept and
    /// reported on the final miss.
    pub async fn resolve(&self, reference: &SecretRef) -> Result<String> {
        let mut cause = None;
        for resolver in &self.resolvers {
            match resolver.resolve(reference).await {
                Ok(Some(value)) => {
                    tracing::debug!("resolved {} via {}", reference, resolver.name());
                    return Ok(value);
                }
                Ok(None) => {}
                Err(e) if e.is_not_found() => {
                    tracing::debug!("{} has no {}", resolver.name(), reference);
                }
                Err(e) => {
                    tracing::warn!("resolver {} failed for {}: {}", resolver.name(), reference, e);
                    cause = Some(format!("{} resolver failed: {}", resolver.name(), e));
                }
            }
        }

        Err(CoreError::SecretNotFound {
            reference: reference.to_string(),
            env_var: reference.env_var(),
            cause,
        })
    }

    /// Parse and resolve a reference string
    pub async fn resolve_str(&self, reference: &str) -> Result<String> {
        let parsed = SecretRef::parse(reference, &self.default_mount)?;
        self.resolve(&parsed).await
    }

    /// Parse a reference with this chain's default mount
    pub fn parse(&self, reference: &str) -> Result<SecretRef> {
        SecretRef::parse(reference, &self.default_mount)
    }
}

impl Default for SecretResolverChain {
    fn default() -> Self {
        Self::new()
    }
}

/// Backend URL from config, else derived from the `openbao` host
pub fn backend_address(config: &StackConfig) -> Option<String> {
    if let Some(address) = &config.secrets.address {
        return Some(address.trim_end_matches('/').to_string());
    }
    config
        .host_for_role("openbao")
        .ok()
        .map(|h| format!("http://{}:{}", h.address, BACKEND_PORT))
}

/// `~/.config/foundry/openbao-keys.json`
pub fn default_token_path() -> Result<PathBuf> {
    Ok(config_dir()?.join("openbao-keys.json"))
}

#[derive(Deserialize)]
struct KeyFile {
    root_token: String,
}

/// Read the root token from a key file
pub fn read_token(path: &Path) -> Result<String> {
    let content = std::fs::read_to_string(path)?;
    let keys: KeyFile = serde_json::from_str(&content)?;
    if keys.root_token.is_empty() {
        return Err(CoreError::InvalidConfig {
            message: format!("empty root_token in {}", path.display()),
        });
    }
    Ok(keys.root_token)
}
