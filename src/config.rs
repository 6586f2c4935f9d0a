//! Declarative manager configuration, loaded from JSON.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::lock::{LockError, LockResult, ResourceType};

/// How a timed multi-resource acquisition spends its timeout.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GroupTimeout {
    /// Every member may wait the full timeout, so a call over N resources can
    /// take up to N times the timeout.
    #[default]
    PerMember,
    /// The whole call shares one deadline; each member waits only for what is
    /// left of it.
    SharedBudget,
}

/// Configuration for [`LockManager::from_config`](crate::LockManager::from_config).
///
/// ```json
/// {
///   "group_timeout": "per_member",
///   "resource_types": [
///     { "name": "doc", "capacity": 1, "sharing_mode": "exclusive_per_owner" }
///   ]
/// }
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockManagerConfig {
    #[serde(default)]
    pub group_timeout: GroupTimeout,
    #[serde(default)]
    pub resource_types: Vec<ResourceType>,
}

impl LockManagerConfig {
    pub fn from_json_str(json: &str) -> LockResult<Self> {
        serde_json::from_str(json).map_err(|e| LockError::Config(e.to_string()))
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> LockResult<Self> {
        let path = path.as_ref();
        let json = fs::read_to_string(path)
            .map_err(|e| LockError::Config(format!("{}: {}", path.display(), e)))?;
        Self::from_json_str(&json)
    }

    /// Add a resource type declaration.
    pub fn resource_type(mut self, resource_type: ResourceType) -> Self {
        self.resource_types.push(resource_type);
        self
    }
}
