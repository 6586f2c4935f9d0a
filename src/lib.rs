//! In-process resource lock manager.
//!
//! Callers register named resource types with a capacity and a sharing mode,
//! then lock and unlock integer resource ids of that type on behalf of integer
//! owner ids. See [`LockManager`] for the full API.

mod config;
mod lock;

pub use config::{GroupTimeout, LockManagerConfig};
pub use lock::events;
pub use lock::{
    GroupAcquire, LockError, LockManager, LockResult, OwnerId, ResourceId,
    ResourceType, ResourceTypeRegistry, SharingMode, SlotPhase, SlotState,
};
