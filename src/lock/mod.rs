mod error;
pub mod events;
mod manager;
mod resource_type;
mod slot;

pub use error::{LockError, LockResult};
pub use manager::{GroupAcquire, LockManager};
pub use resource_type::{ResourceType, ResourceTypeRegistry, SharingMode};
pub(crate) use slot::ResourceSlot;
pub use slot::{SlotPhase, SlotState};

/// Application-chosen identifier of a resource within its type.
pub type ResourceId = i64;

/// Identifier of a user or session holding a permit.
pub type OwnerId = i64;
