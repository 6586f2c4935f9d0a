//! Lock lifecycle notifications.
//!
//! Listeners registered through `LockManager::on` are called on their own
//! thread by `event_emitter_rs` after the state change has completed.

#[cfg(feature = "emitter")]
use std::sync::atomic::{AtomicBool, Ordering};
#[cfg(feature = "emitter")]
use std::sync::Mutex;

#[cfg(feature = "emitter")]
use event_emitter_rs::EventEmitter;
use serde::{Deserialize, Serialize};

#[cfg(feature = "emitter")]
use super::{LockError, LockResult};
use super::{OwnerId, ResourceId};

/// A permit was taken.
pub const RESOURCE_LOCKED: &str = "ResourceLocked";
/// A permit was returned, including returns made by a rollback.
pub const RESOURCE_UNLOCKED: &str = "ResourceUnlocked";
/// A timed group acquisition failed and released what it had taken.
/// `resource_id` is the member that could not be acquired.
pub const GROUP_ROLLED_BACK: &str = "GroupRolledBack";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockEvent {
    pub type_name: String,
    pub resource_id: ResourceId,
    pub owners: Vec<OwnerId>,
}

#[cfg(feature = "emitter")]
pub(crate) struct LockEvents {
    emitter: Mutex<EventEmitter>,
    listening: AtomicBool,
}

#[cfg(feature = "emitter")]
impl LockEvents {
    pub(crate) fn new() -> Self {
        LockEvents {
            emitter: Mutex::new(EventEmitter::new()),
            listening: AtomicBool::new(false),
        }
    }

    /// Register a listener; returns the listener id.
    pub(crate) fn on<F>(&self, event: &str, listener: F) -> LockResult<String>
    where
        F: Fn(LockEvent) + Send + Sync + 'static,
    {
        let mut emitter = self
            .emitter
            .lock()
            .map_err(|_| LockError::Poisoned("lock event emitter poisoned".into()))?;
        let id = emitter.on(event, listener);
        self.listening.store(true, Ordering::Release);
        Ok(id)
    }

    pub(crate) fn remove_listener(&self, id: &str) -> LockResult<bool> {
        let mut emitter = self
            .emitter
            .lock()
            .map_err(|_| LockError::Poisoned("lock event emitter poisoned".into()))?;
        Ok(emitter.remove_listener(id).is_some())
    }

    /// Emit `event`; the payload is only built when someone listens.
    pub(crate) fn emit<F>(&self, event: &str, payload: F)
    where
        F: FnOnce() -> LockEvent,
    {
        if !self.listening.load(Ordering::Acquire) {
            return;
        }
        match self.emitter.lock() {
            Ok(mut emitter) => {
                emitter.emit(event, payload());
            }
            Err(_) => tracing::warn!(event, "lock event emitter poisoned, event dropped"),
        }
    }
}
