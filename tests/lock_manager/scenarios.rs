//! Single-threaded behavior of the public API.

use std::time::Duration;

use resource_locks::{GroupAcquire, LockError, SharingMode, SlotPhase};

use crate::support::doc_manager;

const NOW: Duration = Duration::ZERO;

// ============================================================================
// Exclusive locks
// ============================================================================

#[test]
fn exclusive_lock_blocks_others_until_unlocked() {
    let manager = doc_manager(SharingMode::ExclusivePerOwner, 1);

    manager.lock("doc", 42, 7).unwrap();
    assert!(!manager.try_lock("doc", 42, 9, NOW).unwrap());

    manager.unlock("doc", 42, 7).unwrap();
    assert!(manager.try_lock("doc", 42, 9, NOW).unwrap());
    assert_eq!(manager.slot_state("doc", 42).unwrap().owners, vec![9]);
}

#[test]
fn lock_then_unlock_restores_prior_state() {
    let manager = doc_manager(SharingMode::ExclusivePerOwner, 2);
    manager.lock("doc", 42, 1).unwrap();
    let before = manager.slot_state("doc", 42).unwrap();

    manager.lock("doc", 42, 7).unwrap();
    assert_eq!(manager.slot_state("doc", 42).unwrap().phase(), SlotPhase::Full);
    manager.unlock("doc", 42, 7).unwrap();

    assert_eq!(manager.slot_state("doc", 42).unwrap(), before);
}

#[test]
fn capacity_allows_distinct_owners_side_by_side() {
    let manager = doc_manager(SharingMode::ExclusivePerOwner, 2);
    assert!(manager.try_lock("doc", 42, 1, NOW).unwrap());
    assert!(manager.try_lock("doc", 42, 2, NOW).unwrap());
    assert!(!manager.try_lock("doc", 42, 3, Duration::from_millis(10)).unwrap());

    let state = manager.slot_state("doc", 42).unwrap();
    assert_eq!(state.held(), 2);
    assert_eq!(state.owners, vec![1, 2]);
}

#[test]
fn unlock_by_non_owner_fails_and_changes_nothing() {
    let manager = doc_manager(SharingMode::ExclusivePerOwner, 1);
    manager.lock("doc", 42, 7).unwrap();
    let before = manager.slot_state("doc", 42).unwrap();

    let err = manager.unlock("doc", 42, 9).unwrap_err();
    assert_eq!(
        err,
        LockError::NotOwner {
            type_name: "doc".into(),
            resource_id: 42,
            owners: vec![9],
        }
    );
    assert_eq!(manager.slot_state("doc", 42).unwrap(), before);
}

#[test]
fn unlock_of_untouched_resource_reports_never_locked() {
    let manager = doc_manager(SharingMode::ExclusivePerOwner, 1);
    assert!(matches!(
        manager.unlock("doc", 42, 7),
        Err(LockError::ResourceNeverLocked { resource_id: 42, .. })
    ));
}

#[test]
fn never_locked_differs_from_currently_free() {
    let manager = doc_manager(SharingMode::ExclusivePerOwner, 1);
    assert!(matches!(
        manager.slot_state("doc", 42),
        Err(LockError::ResourceNeverLocked { .. })
    ));
    assert!(!manager.is_locked("doc", 42).unwrap());

    manager.lock("doc", 42, 7).unwrap();
    manager.unlock("doc", 42, 7).unwrap();
    let state = manager.slot_state("doc", 42).unwrap();
    assert_eq!(state.phase(), SlotPhase::Free);
    assert!(state.owners.is_empty());
}

// ============================================================================
// Multi-resource calls
// ============================================================================

#[test]
fn lock_many_holds_every_id() {
    let manager = doc_manager(SharingMode::ExclusivePerOwner, 1);
    manager.lock_many("doc", &[1, 2, 3], 7).unwrap();
    for id in [1, 2, 3] {
        assert_eq!(manager.slot_state("doc", id).unwrap().owners, vec![7]);
    }

    manager.unlock_many("doc", &[1, 2, 3], 7).unwrap();
    for id in [1, 2, 3] {
        assert!(!manager.is_locked("doc", id).unwrap());
    }
}

#[test]
fn unlock_many_stops_at_first_failure() {
    let manager = doc_manager(SharingMode::ExclusivePerOwner, 1);
    manager.lock_many("doc", &[1, 3], 7).unwrap();
    manager.lock("doc", 2, 8).unwrap();

    assert!(matches!(
        manager.unlock_many("doc", &[1, 2, 3], 7),
        Err(LockError::NotOwner { resource_id: 2, .. })
    ));
    assert!(!manager.is_locked("doc", 1).unwrap());
    assert!(manager.is_locked("doc", 2).unwrap());
    assert!(manager.is_locked("doc", 3).unwrap());
}

#[test]
fn failed_try_lock_many_releases_earlier_members() {
    let manager = doc_manager(SharingMode::ExclusivePerOwner, 1);
    manager.lock("doc", 43, 8).unwrap();

    let acquired = manager
        .try_lock_many("doc", &[42, 43], 7, Duration::from_millis(100))
        .unwrap();
    assert!(!acquired);

    // 42 was taken and given back, so another caller gets it at once.
    assert!(manager.try_lock("doc", 42, 9, NOW).unwrap());
    assert_eq!(manager.slot_state("doc", 43).unwrap().owners, vec![8]);
}

#[test]
fn detailed_outcome_names_failing_member_and_rollback() {
    let manager = doc_manager(SharingMode::ExclusivePerOwner, 1);
    manager.lock("doc", 3, 8).unwrap();

    let outcome = manager
        .try_lock_many_detailed("doc", &[1, 2, 3, 4], 7, Duration::from_millis(10))
        .unwrap();
    assert_eq!(
        outcome,
        GroupAcquire::RolledBack {
            failed_id: 3,
            released: vec![1, 2],
        }
    );
    assert!(!manager.is_locked("doc", 1).unwrap());
    assert!(!manager.is_locked("doc", 2).unwrap());
    // Never reached, never created.
    assert!(matches!(
        manager.slot_state("doc", 4),
        Err(LockError::ResourceNeverLocked { .. })
    ));
}

#[test]
fn successful_try_lock_many_holds_everything() {
    let manager = doc_manager(SharingMode::ExclusivePerOwner, 1);
    let outcome = manager
        .try_lock_many_detailed("doc", &[1, 2], 7, NOW)
        .unwrap();
    assert_eq!(outcome, GroupAcquire::Acquired);
    assert!(manager.is_locked("doc", 1).unwrap());
    assert!(manager.is_locked("doc", 2).unwrap());
}

// ============================================================================
// Shared groups
// ============================================================================

#[test]
fn group_lock_holds_one_permit_for_all_members() {
    let manager = doc_manager(SharingMode::SharedGroup, 1);
    manager.lock_group("doc", 42, &[7, 9]).unwrap();

    let state = manager.slot_state("doc", 42).unwrap();
    assert_eq!(state.owners, vec![7, 9]);
    assert_eq!(state.held(), 1);

    manager.unlock_group("doc", 42, &[9]).unwrap();
    let state = manager.slot_state("doc", 42).unwrap();
    assert_eq!(state.held(), 0);
    assert!(state.owners.is_empty());
}

#[test]
fn group_unlock_needs_some_member() {
    let manager = doc_manager(SharingMode::SharedGroup, 1);
    manager.lock_group("doc", 42, &[7, 9]).unwrap();
    assert!(matches!(
        manager.unlock_group("doc", 42, &[1, 2]),
        Err(LockError::NotOwner { .. })
    ));
    assert!(manager.is_locked("doc", 42).unwrap());
}

#[test]
fn wider_shared_slot_holds_several_groups() {
    let manager = doc_manager(SharingMode::SharedGroup, 2);
    manager.lock_group("doc", 1, &[1, 2]).unwrap();
    manager.lock_group("doc", 1, &[3, 4]).unwrap();
    assert!(!manager.try_lock_group("doc", 1, &[5], NOW).unwrap());

    let state = manager.slot_state("doc", 1).unwrap();
    assert_eq!(state.owners, vec![1, 2, 3, 4]);
    assert_eq!(state.holders, vec![vec![1, 2], vec![3, 4]]);

    manager.unlock_group("doc", 1, &[4]).unwrap();
    let state = manager.slot_state("doc", 1).unwrap();
    assert_eq!(state.held(), 1);
    assert_eq!(state.holders, vec![vec![1, 2]]);
    assert!(manager.try_lock_group("doc", 1, &[5], NOW).unwrap());
}

#[test]
fn rollback_leaves_overlapping_groups_alone() {
    let manager = doc_manager(SharingMode::SharedGroup, 2);
    // Another session already holds doc/1 with a group sharing member 9.
    manager.lock_group("doc", 1, &[9, 10]).unwrap();
    manager.lock_group("doc", 2, &[1]).unwrap();
    manager.lock_group("doc", 2, &[2]).unwrap();

    let outcome = manager
        .try_lock_many_group_detailed("doc", &[1, 2], &[7, 9], Duration::from_millis(10))
        .unwrap();
    assert_eq!(
        outcome,
        GroupAcquire::RolledBack {
            failed_id: 2,
            released: vec![1],
        }
    );

    let state = manager.slot_state("doc", 1).unwrap();
    assert_eq!(state.held(), 1);
    assert_eq!(state.holders, vec![vec![9, 10]]);
}

#[test]
fn failed_try_lock_many_group_rolls_back() {
    let manager = doc_manager(SharingMode::SharedGroup, 1);
    manager.lock_group("doc", 2, &[1]).unwrap();

    assert!(!manager
        .try_lock_many_group("doc", &[1, 2], &[7, 9], Duration::from_millis(10))
        .unwrap());
    assert!(manager.try_lock_group("doc", 1, &[5], NOW).unwrap());
}

#[test]
fn lock_many_group_and_unlock_many_group() {
    let manager = doc_manager(SharingMode::SharedGroup, 1);
    manager.lock_many_group("doc", &[1, 2], &[7, 9]).unwrap();
    assert!(manager
        .try_lock_many_group_detailed("doc", &[3], &[7], NOW)
        .unwrap()
        .is_acquired());

    manager.unlock_many_group("doc", &[1, 2, 3], &[7]).unwrap();
    for id in [1, 2, 3] {
        assert!(!manager.is_locked("doc", id).unwrap());
    }
}

// ============================================================================
// Validation
// ============================================================================

#[test]
fn unknown_type_is_rejected_everywhere_without_side_effects() {
    let manager = doc_manager(SharingMode::ExclusivePerOwner, 1);
    let unknown = |result: Result<(), LockError>| {
        assert_eq!(
            result,
            Err(LockError::UnknownResourceType {
                type_name: "page".into()
            })
        );
    };

    unknown(manager.lock("page", 1, 7));
    unknown(manager.lock_many("page", &[1, 2], 7));
    unknown(manager.lock_group("page", 1, &[7]));
    unknown(manager.lock_many_group("page", &[1], &[7]));
    unknown(manager.unlock("page", 1, 7));
    unknown(manager.unlock_many("page", &[1], 7));
    unknown(manager.unlock_group("page", 1, &[7]));
    unknown(manager.unlock_many_group("page", &[1], &[7]));
    unknown(manager.try_lock("page", 1, 7, NOW).map(|_| ()));
    unknown(manager.try_lock_many("page", &[1], 7, NOW).map(|_| ()));
    unknown(manager.try_lock_group("page", 1, &[7], NOW).map(|_| ()));
    unknown(manager.try_lock_many_group("page", &[1], &[7], NOW).map(|_| ()));
    unknown(manager.slot_state("page", 1).map(|_| ()));

    assert_eq!(manager.slot_count().unwrap(), 0);
}

#[test]
fn method_family_must_match_sharing_mode() {
    let manager = doc_manager(SharingMode::ExclusivePerOwner, 1);
    assert_eq!(
        manager.lock_group("doc", 42, &[7]),
        Err(LockError::SharingModeMismatch {
            type_name: "doc".into(),
            expected: SharingMode::SharedGroup,
            actual: SharingMode::ExclusivePerOwner,
        })
    );
    assert!(manager.try_lock_group("doc", 42, &[7], NOW).is_err());
    assert_eq!(manager.slot_count().unwrap(), 0);
}

#[test]
fn zero_capacity_type_is_rejected() {
    let manager = doc_manager(SharingMode::ExclusivePerOwner, 1);
    assert!(matches!(
        manager.create_resource_type("page", 0, SharingMode::SharedGroup),
        Err(LockError::InvalidCapacity { .. })
    ));
    assert!(manager.resource_type("page").is_err());
}

#[test]
fn reregistration_applies_to_new_slots_only() {
    let manager = doc_manager(SharingMode::ExclusivePerOwner, 1);
    manager.lock("doc", 1, 7).unwrap();

    manager
        .create_resource_type("doc", 2, SharingMode::ExclusivePerOwner)
        .unwrap();
    assert_eq!(manager.resource_type("doc").unwrap().capacity, 2);
    assert_eq!(manager.slot_state("doc", 1).unwrap().capacity, 1);

    manager.lock("doc", 2, 7).unwrap();
    assert_eq!(manager.slot_state("doc", 2).unwrap().capacity, 2);
    assert_eq!(manager.resource_type_names().unwrap(), vec!["doc".to_string()]);
}
