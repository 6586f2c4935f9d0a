use std::collections::HashMap;
use std::fmt;
use std::sync::RwLock;

use serde::{Deserialize, Serialize};

use super::{LockError, LockResult};

/// How the owner set of a slot is interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SharingMode {
    /// Each permit belongs to exactly one owner; distinct owners may hold
    /// distinct permits up to the type's capacity.
    ExclusivePerOwner,
    /// One permit is held jointly by a whole set of owners.
    SharedGroup,
}

impl fmt::Display for SharingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SharingMode::ExclusivePerOwner => write!(f, "exclusive_per_owner"),
            SharingMode::SharedGroup => write!(f, "shared_group"),
        }
    }
}

/// Configuration of a named resource type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceType {
    pub name: String,
    pub capacity: usize,
    pub sharing_mode: SharingMode,
}

impl ResourceType {
    pub fn new(name: impl Into<String>, capacity: usize, sharing_mode: SharingMode) -> Self {
        ResourceType {
            name: name.into(),
            capacity,
            sharing_mode,
        }
    }

    /// Fails with `SharingModeMismatch` unless this type uses `expected`.
    pub fn require_mode(&self, expected: SharingMode) -> LockResult<()> {
        if self.sharing_mode == expected {
            Ok(())
        } else {
            Err(LockError::SharingModeMismatch {
                type_name: self.name.clone(),
                expected,
                actual: self.sharing_mode,
            })
        }
    }
}

/// Registered resource types, keyed by name.
///
/// Types are never removed. Registering an existing name replaces its
/// configuration for slots created afterwards.
#[derive(Debug, Default)]
pub struct ResourceTypeRegistry {
    types: RwLock<HashMap<String, ResourceType>>,
}

impl ResourceTypeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a type. Returns the configuration it replaced, if any.
    pub fn register(&self, resource_type: ResourceType) -> LockResult<Option<ResourceType>> {
        if resource_type.capacity == 0 {
            return Err(LockError::InvalidCapacity {
                type_name: resource_type.name,
                capacity: 0,
            });
        }

        let mut types = self
            .types
            .write()
            .map_err(|_| LockError::Poisoned("resource type registry poisoned".into()))?;
        Ok(types.insert(resource_type.name.clone(), resource_type))
    }

    pub fn resolve(&self, type_name: &str) -> LockResult<ResourceType> {
        let types = self
            .types
            .read()
            .map_err(|_| LockError::Poisoned("resource type registry poisoned".into()))?;
        types
            .get(type_name)
            .cloned()
            .ok_or_else(|| LockError::unknown_type(type_name))
    }

    /// Registered type names, sorted.
    pub fn names(&self) -> LockResult<Vec<String>> {
        let types = self
            .types
            .read()
            .map_err(|_| LockError::Poisoned("resource type registry poisoned".into()))?;
        let mut names: Vec<String> = types.keys().cloned().collect();
        names.sort_unstable();
        Ok(names)
    }
}
