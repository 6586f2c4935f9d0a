use thiserror::Error;

use super::{OwnerId, ResourceId, SharingMode};

/// Error type for lock operations.
///
/// Timing out in a `try_lock*` call is not an error; those return `Ok(false)`.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LockError {
    /// The resource type was never registered with `create_resource_type`.
    #[error("unknown resource type '{type_name}'")]
    UnknownResourceType { type_name: String },

    /// A state query referenced a slot that no lock operation ever created.
    #[error("resource {type_name}/{resource_id} was never locked")]
    ResourceNeverLocked {
        type_name: String,
        resource_id: ResourceId,
    },

    /// Release attempted by owners that do not hold the resource.
    #[error("owners {owners:?} do not own resource {type_name}/{resource_id}")]
    NotOwner {
        type_name: String,
        resource_id: ResourceId,
        owners: Vec<OwnerId>,
    },

    /// An exclusive operation was used on a shared-group type, or vice versa.
    #[error("resource type '{type_name}' is {actual}, operation requires {expected}")]
    SharingModeMismatch {
        type_name: String,
        expected: SharingMode,
        actual: SharingMode,
    },

    #[error("resource type '{type_name}' needs a positive capacity, got {capacity}")]
    InvalidCapacity { type_name: String, capacity: usize },

    #[error("group operation on '{type_name}' called with no owners")]
    EmptyOwnerSet { type_name: String },

    /// A thread panicked while holding slot or table state. The wait cannot be
    /// resumed, so this is fatal for the calling operation.
    #[error("lock poisoned: {0}")]
    Poisoned(String),

    #[error("invalid lock configuration: {0}")]
    Config(String),
}

impl LockError {
    pub(crate) fn unknown_type(type_name: &str) -> Self {
        LockError::UnknownResourceType {
            type_name: type_name.to_string(),
        }
    }
}

pub type LockResult<T> = Result<T, LockError>;
