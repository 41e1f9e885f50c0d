//! Secret backend client (OpenBAO / Vault KV v2)

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, RwLock};

use crate::error::{CoreError, Result};

/// Key/value secret storage
#[async_trait]
pub trait SecretBackend: Send + Sync {
    /// Read the latest version of a secret; `Ok(None)` if it does not exist
    async fn read_secret_v2(&self, mount: &str, path: &str)
    -> Result<Option<BTreeMap<String, String>>>;

    /// Write a new version of a secret
    async fn write_secret_v2(
        &self,
        mount: &str,
        path: &str,
        data: &BTreeMap<String, String>,
    ) -> Result<()>;
}

/// HTTP client for the OpenBAO API
#[derive(Clone)]
pub struct OpenBaoClient {
    address: String,
    token: String,
    http: reqwest::Client,
}

#[derive(Deserialize)]
struct KvReadResponse {
    data: KvData,
}

#[derive(Deserialize)]
struct KvData {
    #[serde(default)]
    data: BTreeMap<String, serde_json::Value>,
}

impl OpenBaoClient {
    pub fn new(address: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            address: address.into().trim_end_matches('/').to_string(),
            token: token.into(),
            http: reqwest::Client::new(),
        }
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    fn data_url(&self, mount: &str, path: &str) -> String {
        format!(
            "{}/v1/{}/data/{}",
            self.address,
            mount.trim_matches('/'),
            path.trim_matches('/')
        )
    }
}

#[async_trait]
impl SecretBackend for OpenBaoClient {
    async fn read_secret_v2(
        &self,
        mount: &str,
        path: &str,
    ) -> Result<Option<BTreeMap<String, String>>> {
        let response = self
            .http
            .get(self.data_url(mount, path))
            .header("X-Vault-Token", &self.token)
            .send()
            .await?;

        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !status.is_success() {
            return Err(CoreError::BackendHttp {
                status: status.as_u16(),
                path: format!("{}/{}", mount, path),
            });
        }

        let body: KvReadResponse = response.json().await?;
        let data = body
            .data
            .data
            .into_iter()
            .map(|(k, v)| {
                let value = match v {
                    serde_json::Value::String(s) => s,
                    other => other.to_string(),
                };
                (k, value)
            })
            .collect();
        Ok(Some(data))
    }

    async fn write_secret_v2(
        &self,
        mount: &str,
        path: &str,
        data: &BTreeMap<String, String>,
    ) -> Result<()> {
        let response = self
            .http
            .post(self.data_url(mount, path))
            .header("X-Vault-Token", &self.token)
            .json(&json!({ "data": data }))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(CoreError::BackendHttp {
                status: status.as_u16(),
                path: format!("{}/{}", mount, path),
            });
        }
        Ok(())
    }
}

/// In-memory secret backend for testing
#[derive(Clone, Default)]
pub struct MockSecretBackend {
    /// Storage: "mount/path" -> data
    store: Arc<RwLock<HashMap<String, BTreeMap<String, String>>>>,
    operations: Arc<RwLock<SecretOperationCounts>>,
    fail_reads: Arc<RwLock<bool>>,
}

/// Counts of backend calls for testing assertions
#[derive(Debug, Default, Clone)]
pub struct SecretOperationCounts {
    pub reads: usize,
    pub writes: usize,
}

impl MockSecretBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a whole secret
    pub fn put(&self, mount: &str, path: &str, data: BTreeMap<String, String>) {
        self.store
            .write()
            .unwrap()
            .insert(format!("{}/{}", mount, path), data);
    }

    /// Store a single key
    pub fn insert(&self, mount: &str, path: &str, key: &str, value: &str) {
        self.store
            .write()
            .unwrap()
            .entry(format!("{}/{}", mount, path))
            .or_default()
            .insert(key.to_string(), value.to_string());
    }

    /// Make every read fail
    pub fn fail_reads(&self, fail: bool) {
        *self.fail_reads.write().unwrap() = fail;
    }

    pub fn operation_counts(&self) -> SecretOperationCounts {
        self.operations.read().unwrap().clone()
    }
}

#[async_trait]
impl SecretBackend for MockSecretBackend {
    async fn read_secret_v2(
        &self,
        mount: &str,
        path: &str,
    ) -> Result<Option<BTreeMap<String, String>>> {
        self.operations.write().unwrap().reads += 1;

        if *self.fail_reads.read().unwrap() {
            return Err(CoreError::Backend {
                message: "connection refused".to_string(),
            });
        }

        Ok(self
            .store
            .read()
            .unwrap()
            .get(&format!("{}/{}", mount, path))
            .cloned())
    }

    async fn write_secret_v2(
        &self,
        mount: &str,
        path: &str,
        data: &BTreeMap<String, String>,
    ) -> Result<()> {
        self.operations.write().unwrap().writes += 1;
        self.put(mount, path, data.clone());
        Ok(())
    }
}
