//! Helm release snapshots

use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;

/// Release status as reported by `helm list`
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
#[non_exhaustive]
pub enum ReleaseStatus {
    Deployed,
    Failed,
    Uninstalled,
    Superseded,
    Uninstalling,
    PendingInstall,
    PendingUpgrade,
    PendingRollback,
    /// A status this client does not know about
    Unknown(String),
}

impl ReleaseStatus {
    /// Parse helm's status string
    pub fn parse(status: &str) -> Self {
        match status.trim().to_ascii_lowercase().as_str() {
            "deployed" => Self::Deployed,
            "failed" => Self::Failed,
            "uninstalled" => Self::Uninstalled,
            "superseded" => Self::Superseded,
            "uninstalling" => Self::Uninstalling,
            "pending-install" => Self::PendingInstall,
            "pending-upgrade" => Self::PendingUpgrade,
            "pending-rollback" => Self::PendingRollback,
            other => Self::Unknown(other.to_string()),
        }
    }

    pub fn is_deployed(&self) -> bool {
        matches!(self, Self::Deployed)
    }

    /// Check if this is a pending (transitional) state
    pub fn is_pending(&self) -> bool {
        matches!(
            self,
            Self::PendingInstall | Self::PendingUpgrade | Self::PendingRollback | Self::Uninstalling
        )
    }

    /// Human-readable status name
    pub fn status_name(&self) -> &str {
        match self {
            Self::Deployed => "deployed",
            Self::Failed => "failed",
            Self::Uninstalled => "uninstalled",
            Self::Superseded => "superseded",
            Self::Uninstalling => "uninstalling",
            Self::PendingInstall => "pending-install",
            Self::PendingUpgrade => "pending-upgrade",
            Self::PendingRollback => "pending-rollback",
            Self::Unknown(s) => s,
        }
    }
}

impl fmt::Display for ReleaseStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.status_name())
    }
}

impl<'de> Deserialize<'de> for ReleaseStatus {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Ok(Self::parse(&s))
    }
}

/// Point-in-time view of a release
///
/// Fetched before every decision; another actor may change the release
/// between two reads.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentRecord {
    pub name: String,
    pub namespace: String,
    pub status: ReleaseStatus,
    #[serde(default)]
    pub app_version: String,
    #[serde(default)]
    pub chart: String,
}

impl DeploymentRecord {
    pub fn new(
        name: impl Into<String>,
        namespace: impl Into<String>,
        status: ReleaseStatus,
    ) -> Self {
        Self {
            name: name.into(),
            namespace: namespace.into(),
            status,
            app_version: String::new(),
            chart: String::new(),
        }
    }
}
