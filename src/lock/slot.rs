use std::collections::{BTreeSet, VecDeque};
use std::sync::{Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use super::{LockError, LockResult, OwnerId, ResourceId, SharingMode};

/// Coarse occupancy of a slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SlotPhase {
    Free,
    PartiallyHeld,
    Full,
}

/// Read-only snapshot of a slot, as returned by `LockManager::slot_state`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotState {
    pub type_name: String,
    pub resource_id: ResourceId,
    pub sharing_mode: SharingMode,
    pub capacity: usize,
    /// Permits not currently checked out.
    pub available: usize,
    /// Owners currently holding a permit, ascending and deduplicated.
    pub owners: Vec<OwnerId>,
    /// One entry per checked-out permit, in acquisition order.
    pub holders: Vec<Vec<OwnerId>>,
    /// Callers queued for a permit.
    pub waiting: usize,
}

impl SlotState {
    /// Number of permits checked out.
    pub fn held(&self) -> usize {
        self.capacity - self.available
    }

    pub fn phase(&self) -> SlotPhase {
        if self.available == self.capacity {
            SlotPhase::Free
        } else if self.available == 0 {
            SlotPhase::Full
        } else {
            SlotPhase::PartiallyHeld
        }
    }
}

/// Serial of one checked-out permit, unique within its slot.
pub(crate) type PermitId = u64;

#[derive(Debug)]
struct Holding {
    permit: PermitId,
    owners: BTreeSet<OwnerId>,
}

#[derive(Debug)]
struct SlotInner {
    available: usize,
    /// Owner group of each checked-out permit.
    holders: Vec<Holding>,
    next_permit: PermitId,
    /// Tickets of waiting acquirers, in arrival order.
    queue: VecDeque<u64>,
    next_ticket: u64,
}

impl SlotInner {
    fn can_take(&self, ticket: u64) -> bool {
        self.available > 0 && self.queue.front() == Some(&ticket)
    }

    fn abandon(&mut self, ticket: u64) {
        self.queue.retain(|t| *t != ticket);
    }

    fn owners(&self) -> BTreeSet<OwnerId> {
        self.holders
            .iter()
            .flat_map(|holding| holding.owners.iter().copied())
            .collect()
    }
}

/// Runtime lock state of one `(type, id)` resource.
///
/// A counting semaphore built on `Mutex` + `Condvar` with a FIFO ticket queue:
/// a caller may only take a permit once every caller that arrived before it
/// has either been served or given up.
#[derive(Debug)]
pub(crate) struct ResourceSlot {
    type_name: String,
    resource_id: ResourceId,
    capacity: usize,
    sharing_mode: SharingMode,
    state: Mutex<SlotInner>,
    wake: Condvar,
}

impl ResourceSlot {
    pub fn new(
        type_name: impl Into<String>,
        resource_id: ResourceId,
        capacity: usize,
        sharing_mode: SharingMode,
    ) -> Self {
        ResourceSlot {
            type_name: type_name.into(),
            resource_id,
            capacity,
            sharing_mode,
            state: Mutex::new(SlotInner {
                available: capacity,
                holders: Vec::new(),
                next_permit: 0,
                queue: VecDeque::new(),
                next_ticket: 0,
            }),
            wake: Condvar::new(),
        }
    }

    /// Take one permit for a single owner.
    ///
    /// `None` waits indefinitely. With a timeout, returns `Ok(None)` on
    /// expiry and leaves the slot untouched.
    pub fn acquire_one(
        &self,
        owner: OwnerId,
        timeout: Option<Duration>,
    ) -> LockResult<Option<PermitId>> {
        self.acquire(&[owner], timeout)
    }

    /// Take one permit held jointly by every id in `owners`.
    pub fn acquire_shared(
        &self,
        owners: &[OwnerId],
        timeout: Option<Duration>,
    ) -> LockResult<Option<PermitId>> {
        if owners.is_empty() {
            return Err(LockError::EmptyOwnerSet {
                type_name: self.type_name.clone(),
            });
        }
        self.acquire(owners, timeout)
    }

    fn acquire(&self, owners: &[OwnerId], timeout: Option<Duration>) -> LockResult<Option<PermitId>> {
        // A timeout too large to represent behaves like no timeout.
        let deadline = timeout.and_then(|t| Instant::now().checked_add(t));

        let mut state = self.inner()?;
        let ticket = state.next_ticket;
        state.next_ticket += 1;
        state.queue.push_back(ticket);

        if !state.can_take(ticket) {
            tracing::trace!(
                type_name = %self.type_name,
                resource_id = self.resource_id,
                ahead = state.queue.len() - 1,
                "waiting for permit"
            );
        }

        while !state.can_take(ticket) {
            match deadline {
                None => {
                    state = self.wake.wait(state).map_err(|_| self.poisoned())?;
                }
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        state.abandon(ticket);
                        drop(state);
                        // The queue head may have changed.
                        self.wake.notify_all();
                        return Ok(None);
                    }
                    let (guard, _) = self
                        .wake
                        .wait_timeout(state, deadline - now)
                        .map_err(|_| self.poisoned())?;
                    state = guard;
                }
            }
        }

        state.queue.pop_front();
        state.available -= 1;
        let permit = state.next_permit;
        state.next_permit += 1;
        state.holders.push(Holding {
            permit,
            owners: owners.iter().copied().collect(),
        });
        let next_may_proceed = state.available > 0 && !state.queue.is_empty();
        drop(state);

        if next_may_proceed {
            self.wake.notify_all();
        }
        Ok(Some(permit))
    }

    /// Return one permit held by `owner`.
    pub fn release(&self, owner: OwnerId) -> LockResult<()> {
        self.release_where(|holding| holding.owners.contains(&owner), || vec![owner])
    }

    /// Return a shared-group permit.
    ///
    /// Any one of `owners` being a member is enough to release the group's
    /// permit; the whole group it belonged to stops owning the slot.
    pub fn release_shared(&self, owners: &[OwnerId]) -> LockResult<()> {
        self.release_where(
            |holding| owners.iter().any(|owner| holding.owners.contains(owner)),
            || owners.to_vec(),
        )
    }

    /// Return exactly the permit `acquire_*` handed out as `permit`.
    pub fn release_permit(&self, permit: PermitId, owners: &[OwnerId]) -> LockResult<()> {
        self.release_where(|holding| holding.permit == permit, || owners.to_vec())
    }

    fn release_where<F, E>(&self, matches: F, requested: E) -> LockResult<()>
    where
        F: Fn(&Holding) -> bool,
        E: FnOnce() -> Vec<OwnerId>,
    {
        let mut state = self.inner()?;
        let Some(position) = state.holders.iter().position(matches) else {
            return Err(self.not_owner(requested()));
        };
        state.holders.remove(position);
        self.return_permit(state);
        Ok(())
    }

    fn return_permit(&self, mut state: MutexGuard<'_, SlotInner>) {
        debug_assert!(state.available < self.capacity);
        state.available = (state.available + 1).min(self.capacity);
        let has_waiters = !state.queue.is_empty();
        drop(state);

        if has_waiters {
            self.wake.notify_all();
        }
    }

    pub fn state(&self) -> LockResult<SlotState> {
        let state = self.inner()?;
        Ok(SlotState {
            type_name: self.type_name.clone(),
            resource_id: self.resource_id,
            sharing_mode: self.sharing_mode,
            capacity: self.capacity,
            available: state.available,
            owners: state.owners().into_iter().collect(),
            holders: state
                .holders
                .iter()
                .map(|holding| holding.owners.iter().copied().collect())
                .collect(),
            waiting: state.queue.len(),
        })
    }

    /// True when no permit is out, nobody owns it and nobody waits.
    pub fn is_idle(&self) -> LockResult<bool> {
        let state = self.inner()?;
        Ok(state.available == self.capacity && state.holders.is_empty() && state.queue.is_empty())
    }

    fn inner(&self) -> LockResult<MutexGuard<'_, SlotInner>> {
        self.state.lock().map_err(|_| self.poisoned())
    }

    fn poisoned(&self) -> LockError {
        LockError::Poisoned(format!("slot {}/{}", self.type_name, self.resource_id))
    }

    fn not_owner(&self, owners: Vec<OwnerId>) -> LockError {
        LockError::NotOwner {
            type_name: self.type_name.clone(),
            resource_id: self.resource_id,
            owners,
        }
    }
}
