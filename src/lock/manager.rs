use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use crate::config::{GroupTimeout, LockManagerConfig};

use super::events;
#[cfg(feature = "emitter")]
use super::events::{LockEvent, LockEvents};
use super::slot::PermitId;
use super::{
    LockError, LockResult, OwnerId, ResourceId, ResourceSlot, ResourceType, ResourceTypeRegistry,
    SharingMode, SlotState,
};

/// Outcome of a timed multi-resource acquisition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GroupAcquire {
    /// Every requested resource is now held.
    Acquired,
    /// `failed_id` could not be acquired in time; `released` lists the
    /// resources taken earlier in the same call and given back, in order.
    RolledBack {
        failed_id: ResourceId,
        released: Vec<ResourceId>,
    },
}

impl GroupAcquire {
    pub fn is_acquired(&self) -> bool {
        matches!(self, GroupAcquire::Acquired)
    }
}

/// Who a permit is taken for or returned by.
#[derive(Debug, Clone, Copy)]
enum Holder<'a> {
    Owner(OwnerId),
    Group(&'a [OwnerId]),
}

impl Holder<'_> {
    fn mode(&self) -> SharingMode {
        match self {
            Holder::Owner(_) => SharingMode::ExclusivePerOwner,
            Holder::Group(_) => SharingMode::SharedGroup,
        }
    }

    fn ids(&self) -> Vec<OwnerId> {
        match self {
            Holder::Owner(owner) => vec![*owner],
            Holder::Group(owners) => owners.to_vec(),
        }
    }
}

type SlotKey = (String, ResourceId);

/// Arbitrates access to typed, integer-identified resources.
///
/// Each `(type, id)` pair gets its own slot, created on first use.
/// The slot table is only locked long enough to find or create a slot; waiting
/// for a permit happens on the slot itself, so contention on one resource
/// never stalls another.
///
/// The `lock*` family waits indefinitely. The `try_lock*` family waits at most
/// the given timeout and returns `Ok(false)` instead of failing. Multi-resource
/// `try_lock_many*` calls are all-or-nothing: on the first member that cannot
/// be acquired, every member already taken in that call is released again.
/// Blocking `lock_many*` calls give no such guarantee.
pub struct LockManager {
    registry: ResourceTypeRegistry,
    slots: Mutex<HashMap<SlotKey, Arc<ResourceSlot>>>,
    group_timeout: GroupTimeout,
    #[cfg(feature = "emitter")]
    events: LockEvents,
}

impl LockManager {
    pub fn new() -> Self {
        LockManager {
            registry: ResourceTypeRegistry::new(),
            slots: Mutex::new(HashMap::new()),
            group_timeout: GroupTimeout::default(),
            #[cfg(feature = "emitter")]
            events: LockEvents::new(),
        }
    }

    /// Choose how `try_lock_many*` spends its timeout across members.
    pub fn with_group_timeout(mut self, group_timeout: GroupTimeout) -> Self {
        self.group_timeout = group_timeout;
        self
    }

    /// Build a manager with every resource type listed in `config` registered.
    pub fn from_config(config: &LockManagerConfig) -> LockResult<Self> {
        let manager = Self::new().with_group_timeout(config.group_timeout);
        for resource_type in &config.resource_types {
            manager.create_resource_type(
                resource_type.name.as_str(),
                resource_type.capacity,
                resource_type.sharing_mode,
            )?;
        }
        Ok(manager)
    }

    pub fn group_timeout(&self) -> GroupTimeout {
        self.group_timeout
    }

    // ========================================================================
    // Resource types
    // ========================================================================

    /// Register a resource type, replacing any previous configuration.
    ///
    /// Slots that already exist keep the capacity they were created with.
    pub fn create_resource_type(
        &self,
        name: impl Into<String>,
        capacity: usize,
        sharing_mode: SharingMode,
    ) -> LockResult<()> {
        let resource_type = ResourceType::new(name, capacity, sharing_mode);
        let name = resource_type.name.clone();
        match self.registry.register(resource_type)? {
            Some(previous) => tracing::warn!(
                type_name = %name,
                previous_capacity = previous.capacity,
                capacity,
                %sharing_mode,
                "resource type re-registered"
            ),
            None => tracing::info!(type_name = %name, capacity, %sharing_mode, "resource type registered"),
        }
        Ok(())
    }

    pub fn resource_type(&self, type_name: &str) -> LockResult<ResourceType> {
        self.registry.resolve(type_name)
    }

    pub fn resource_type_names(&self) -> LockResult<Vec<String>> {
        self.registry.names()
    }

    // ========================================================================
    // Exclusive (one owner per permit)
    // ========================================================================

    /// Take a permit on `type_name/resource_id` for `owner`, waiting as long as needed.
    pub fn lock(&self, type_name: &str, resource_id: ResourceId, owner: OwnerId) -> LockResult<()> {
        let holder = Holder::Owner(owner);
        let resource_type = self.resolve_for(type_name, holder)?;
        self.take(&resource_type, resource_id, holder, None)?;
        Ok(())
    }

    /// Lock each id in turn. Not atomic: if a later id fails, earlier ones stay held.
    pub fn lock_many(
        &self,
        type_name: &str,
        resource_ids: &[ResourceId],
        owner: OwnerId,
    ) -> LockResult<()> {
        let holder = Holder::Owner(owner);
        let resource_type = self.resolve_for(type_name, holder)?;
        for resource_id in unique_ids(resource_ids) {
            self.take(&resource_type, resource_id, holder, None)?;
        }
        Ok(())
    }

    pub fn unlock(&self, type_name: &str, resource_id: ResourceId, owner: OwnerId) -> LockResult<()> {
        let holder = Holder::Owner(owner);
        self.resolve_for(type_name, holder)?;
        self.give_back(type_name, resource_id, holder)
    }

    /// Unlock each id in turn; the first failure aborts the remainder.
    pub fn unlock_many(
        &self,
        type_name: &str,
        resource_ids: &[ResourceId],
        owner: OwnerId,
    ) -> LockResult<()> {
        let holder = Holder::Owner(owner);
        self.resolve_for(type_name, holder)?;
        for resource_id in unique_ids(resource_ids) {
            self.give_back(type_name, resource_id, holder)?;
        }
        Ok(())
    }

    /// Take a permit, waiting at most `timeout`. `Ok(false)` means nothing changed.
    pub fn try_lock(
        &self,
        type_name: &str,
        resource_id: ResourceId,
        owner: OwnerId,
        timeout: Duration,
    ) -> LockResult<bool> {
        let holder = Holder::Owner(owner);
        let resource_type = self.resolve_for(type_name, holder)?;
        Ok(self
            .take(&resource_type, resource_id, holder, Some(timeout))?
            .is_some())
    }

    /// All-or-nothing timed acquisition of several resources.
    pub fn try_lock_many(
        &self,
        type_name: &str,
        resource_ids: &[ResourceId],
        owner: OwnerId,
        timeout: Duration,
    ) -> LockResult<bool> {
        self.try_lock_many_detailed(type_name, resource_ids, owner, timeout)
            .map(|outcome| outcome.is_acquired())
    }

    /// Like [`try_lock_many`](Self::try_lock_many), reporting which id failed.
    pub fn try_lock_many_detailed(
        &self,
        type_name: &str,
        resource_ids: &[ResourceId],
        owner: OwnerId,
        timeout: Duration,
    ) -> LockResult<GroupAcquire> {
        let holder = Holder::Owner(owner);
        let resource_type = self.resolve_for(type_name, holder)?;
        self.take_all(&resource_type, resource_ids, holder, timeout)
    }

    // ========================================================================
    // Shared group (one permit held jointly by a set of owners)
    // ========================================================================

    pub fn lock_group(
        &self,
        type_name: &str,
        resource_id: ResourceId,
        owners: &[OwnerId],
    ) -> LockResult<()> {
        let holder = Holder::Group(owners);
        let resource_type = self.resolve_for(type_name, holder)?;
        self.take(&resource_type, resource_id, holder, None)?;
        Ok(())
    }

    /// Group-lock each id in turn. Not atomic, like [`lock_many`](Self::lock_many).
    pub fn lock_many_group(
        &self,
        type_name: &str,
        resource_ids: &[ResourceId],
        owners: &[OwnerId],
    ) -> LockResult<()> {
        let holder = Holder::Group(owners);
        let resource_type = self.resolve_for(type_name, holder)?;
        for resource_id in unique_ids(resource_ids) {
            self.take(&resource_type, resource_id, holder, None)?;
        }
        Ok(())
    }

    /// Release a group permit. Naming any one member of the holding group is enough.
    pub fn unlock_group(
        &self,
        type_name: &str,
        resource_id: ResourceId,
        owners: &[OwnerId],
    ) -> LockResult<()> {
        let holder = Holder::Group(owners);
        self.resolve_for(type_name, holder)?;
        self.give_back(type_name, resource_id, holder)
    }

    pub fn unlock_many_group(
        &self,
        type_name: &str,
        resource_ids: &[ResourceId],
        owners: &[OwnerId],
    ) -> LockResult<()> {
        let holder = Holder::Group(owners);
        self.resolve_for(type_name, holder)?;
        for resource_id in unique_ids(resource_ids) {
            self.give_back(type_name, resource_id, holder)?;
        }
        Ok(())
    }

    pub fn try_lock_group(
        &self,
        type_name: &str,
        resource_id: ResourceId,
        owners: &[OwnerId],
        timeout: Duration,
    ) -> LockResult<bool> {
        let holder = Holder::Group(owners);
        let resource_type = self.resolve_for(type_name, holder)?;
        Ok(self
            .take(&resource_type, resource_id, holder, Some(timeout))?
            .is_some())
    }

    pub fn try_lock_many_group(
        &self,
        type_name: &str,
        resource_ids: &[ResourceId],
        owners: &[OwnerId],
        timeout: Duration,
    ) -> LockResult<bool> {
        self.try_lock_many_group_detailed(type_name, resource_ids, owners, timeout)
            .map(|outcome| outcome.is_acquired())
    }

    pub fn try_lock_many_group_detailed(
        &self,
        type_name: &str,
        resource_ids: &[ResourceId],
        owners: &[OwnerId],
        timeout: Duration,
    ) -> LockResult<GroupAcquire> {
        let holder = Holder::Group(owners);
        let resource_type = self.resolve_for(type_name, holder)?;
        self.take_all(&resource_type, resource_ids, holder, timeout)
    }

    // ========================================================================
    // Inspection and administration
    // ========================================================================

    /// Snapshot of a slot. Fails with `ResourceNeverLocked` if no lock
    /// operation ever touched `type_name/resource_id`.
    pub fn slot_state(&self, type_name: &str, resource_id: ResourceId) -> LockResult<SlotState> {
        self.registry.resolve(type_name)?;
        self.existing_slot(type_name, resource_id)?.state()
    }

    /// True if at least one permit on the resource is checked out.
    pub fn is_locked(&self, type_name: &str, resource_id: ResourceId) -> LockResult<bool> {
        match self.slot_state(type_name, resource_id) {
            Ok(state) => Ok(state.held() > 0),
            Err(LockError::ResourceNeverLocked { .. }) => Ok(false),
            Err(err) => Err(err),
        }
    }

    pub fn slot_count(&self) -> LockResult<usize> {
        Ok(self.slots()?.len())
    }

    /// Drop slots that are free, unowned and unused by any caller.
    ///
    /// Slots with outstanding permits or waiters are never evicted. Returns the
    /// number of slots removed.
    pub fn evict_idle(&self) -> LockResult<usize> {
        let mut slots = self.slots()?;
        let before = slots.len();
        // Slot handles are only cloned under the table lock, so a count of one
        // means no caller is between lookup and acquisition.
        slots.retain(|_, slot| Arc::strong_count(slot) > 1 || !matches!(slot.is_idle(), Ok(true)));
        let evicted = before - slots.len();
        if evicted > 0 {
            tracing::info!(evicted, remaining = slots.len(), "evicted idle slots");
        }
        Ok(evicted)
    }

    /// Register a lifecycle listener (see [`crate::events`]). Returns its id.
    #[cfg(feature = "emitter")]
    pub fn on<F>(&self, event: &str, listener: F) -> LockResult<String>
    where
        F: Fn(LockEvent) + Send + Sync + 'static,
    {
        self.events.on(event, listener)
    }

    #[cfg(feature = "emitter")]
    pub fn remove_listener(&self, listener_id: &str) -> LockResult<bool> {
        self.events.remove_listener(listener_id)
    }

    // ========================================================================
    // Internals
    // ========================================================================

    /// Resolve the type and check it is used with the matching method family.
    fn resolve_for(&self, type_name: &str, holder: Holder<'_>) -> LockResult<ResourceType> {
        let resource_type = self.registry.resolve(type_name)?;
        resource_type.require_mode(holder.mode())?;
        if let Holder::Group(owners) = holder {
            if owners.is_empty() {
                return Err(LockError::EmptyOwnerSet {
                    type_name: type_name.to_string(),
                });
            }
        }
        Ok(resource_type)
    }

    fn slots(&self) -> LockResult<MutexGuard<'_, HashMap<SlotKey, Arc<ResourceSlot>>>> {
        self.slots
            .lock()
            .map_err(|_| LockError::Poisoned("slot table poisoned".into()))
    }

    fn find_or_create_slot(
        &self,
        resource_type: &ResourceType,
        resource_id: ResourceId,
    ) -> LockResult<Arc<ResourceSlot>> {
        let mut slots = self.slots()?;
        Ok(slots
            .entry((resource_type.name.clone(), resource_id))
            .or_insert_with(|| {
                Arc::new(ResourceSlot::new(
                    resource_type.name.as_str(),
                    resource_id,
                    resource_type.capacity,
                    resource_type.sharing_mode,
                ))
            })
            .clone())
    }

    fn existing_slot(&self, type_name: &str, resource_id: ResourceId) -> LockResult<Arc<ResourceSlot>> {
        let slots = self.slots()?;
        slots
            .get(&(type_name.to_string(), resource_id))
            .cloned()
            .ok_or_else(|| LockError::ResourceNeverLocked {
                type_name: type_name.to_string(),
                resource_id,
            })
    }

    /// Take a permit; `None` means the timeout expired.
    fn take(
        &self,
        resource_type: &ResourceType,
        resource_id: ResourceId,
        holder: Holder<'_>,
        timeout: Option<Duration>,
    ) -> LockResult<Option<PermitId>> {
        let slot = self.find_or_create_slot(resource_type, resource_id)?;
        let permit = match holder {
            Holder::Owner(owner) => slot.acquire_one(owner, timeout)?,
            Holder::Group(owners) => slot.acquire_shared(owners, timeout)?,
        };

        tracing::debug!(
            type_name = %resource_type.name,
            resource_id,
            owners = ?holder.ids(),
            acquired = permit.is_some(),
            ?timeout,
            "lock attempt"
        );
        if permit.is_some() {
            self.emit_lock_event(events::RESOURCE_LOCKED, &resource_type.name, resource_id, holder);
        }
        Ok(permit)
    }

    fn give_back(&self, type_name: &str, resource_id: ResourceId, holder: Holder<'_>) -> LockResult<()> {
        let slot = self.existing_slot(type_name, resource_id)?;
        match holder {
            Holder::Owner(owner) => slot.release(owner)?,
            Holder::Group(owners) => slot.release_shared(owners)?,
        }
        self.released(type_name, resource_id, holder);
        Ok(())
    }

    fn released(&self, type_name: &str, resource_id: ResourceId, holder: Holder<'_>) {
        tracing::debug!(type_name, resource_id, owners = ?holder.ids(), "resource unlocked");
        self.emit_lock_event(events::RESOURCE_UNLOCKED, type_name, resource_id, holder);
    }

    /// Acquire every id in order; on the first miss, release what this call took.
    fn take_all(
        &self,
        resource_type: &ResourceType,
        resource_ids: &[ResourceId],
        holder: Holder<'_>,
        timeout: Duration,
    ) -> LockResult<GroupAcquire> {
        let deadline = match self.group_timeout {
            GroupTimeout::PerMember => None,
            GroupTimeout::SharedBudget => Instant::now().checked_add(timeout),
        };

        let mut acquired: Vec<(ResourceId, PermitId)> = Vec::new();
        for resource_id in unique_ids(resource_ids) {
            let budget = deadline
                .map(|deadline| deadline.saturating_duration_since(Instant::now()))
                .unwrap_or(timeout);

            match self.take(resource_type, resource_id, holder, Some(budget)) {
                Ok(Some(permit)) => acquired.push((resource_id, permit)),
                Ok(None) => {
                    self.roll_back(&resource_type.name, &acquired, holder)?;
                    tracing::warn!(
                        type_name = %resource_type.name,
                        failed_id = resource_id,
                        rolled_back = acquired.len(),
                        owners = ?holder.ids(),
                        "group acquisition rolled back"
                    );
                    self.emit_lock_event(
                        events::GROUP_ROLLED_BACK,
                        &resource_type.name,
                        resource_id,
                        holder,
                    );
                    return Ok(GroupAcquire::RolledBack {
                        failed_id: resource_id,
                        released: acquired.into_iter().map(|(id, _)| id).collect(),
                    });
                }
                Err(err) => {
                    // Give back what was taken, then report the acquisition error.
                    if let Err(rollback_err) = self.roll_back(&resource_type.name, &acquired, holder) {
                        tracing::warn!(
                            type_name = %resource_type.name,
                            error = %rollback_err,
                            "rollback after failed acquisition incomplete"
                        );
                    }
                    return Err(err);
                }
            }
        }
        Ok(GroupAcquire::Acquired)
    }

    /// Release exactly the permits this call took, in acquisition order. Every
    /// member is attempted; the first failure is reported.
    fn roll_back(
        &self,
        type_name: &str,
        acquired: &[(ResourceId, PermitId)],
        holder: Holder<'_>,
    ) -> LockResult<()> {
        let mut first_error = None;
        for &(resource_id, permit) in acquired {
            let result = self
                .existing_slot(type_name, resource_id)
                .and_then(|slot| slot.release_permit(permit, &holder.ids()));
            match result {
                Ok(()) => self.released(type_name, resource_id, holder),
                Err(err) => {
                    tracing::warn!(type_name, resource_id, error = %err, "rollback release failed");
                    first_error.get_or_insert(err);
                }
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    #[cfg(feature = "emitter")]
    fn emit_lock_event(&self, event: &str, type_name: &str, resource_id: ResourceId, holder: Holder<'_>) {
        self.events.emit(event, || LockEvent {
            type_name: type_name.to_string(),
            resource_id,
            owners: holder.ids(),
        });
    }

    #[cfg(not(feature = "emitter"))]
    fn emit_lock_event(&self, _event: &str, _type_name: &str, _resource_id: ResourceId, _holder: Holder<'_>) {}
}

impl Default for LockManager {
    fn default() -> Self {
        Self::new()
    }
}

/// Ids in first-seen order with duplicates dropped.
fn unique_ids(resource_ids: &[ResourceId]) -> Vec<ResourceId> {
    let mut seen = HashSet::with_capacity(resource_ids.len());
    resource_ids
        .iter()
        .copied()
        .filter(|id| seen.insert(*id))
        .collect()
}
