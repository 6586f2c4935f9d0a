use std::time::Duration;

use resource_locks::{
    GroupTimeout, LockError, LockManager, LockManagerConfig, ResourceType, SharingMode,
};

use crate::support::init_tracing;

#[test]
fn manager_from_json_registers_every_type() {
    init_tracing();
    let config = LockManagerConfig::from_json_str(
        r#"{
            "group_timeout": "shared_budget",
            "resource_types": [
                { "name": "doc", "capacity": 1, "sharing_mode": "exclusive_per_owner" },
                { "name": "print_job", "capacity": 2, "sharing_mode": "shared_group" }
            ]
        }"#,
    )
    .unwrap();
    let manager = LockManager::from_config(&config).unwrap();

    assert_eq!(manager.group_timeout(), GroupTimeout::SharedBudget);
    assert_eq!(
        manager.resource_type_names().unwrap(),
        vec!["doc".to_string(), "print_job".to_string()]
    );
    assert!(manager.try_lock("doc", 1, 7, Duration::ZERO).unwrap());
    assert!(manager
        .try_lock_group("print_job", 1, &[7, 9], Duration::ZERO)
        .unwrap());
}

#[test]
fn builder_style_config() {
    let config = LockManagerConfig::default()
        .resource_type(ResourceType::new("doc", 1, SharingMode::ExclusivePerOwner));
    let manager = LockManager::from_config(&config).unwrap();
    assert_eq!(manager.group_timeout(), GroupTimeout::PerMember);
    assert_eq!(manager.resource_type("doc").unwrap().capacity, 1);
}

#[test]
fn zero_capacity_in_config_fails_construction() {
    let config = LockManagerConfig::default()
        .resource_type(ResourceType::new("doc", 0, SharingMode::ExclusivePerOwner));
    assert!(matches!(
        LockManager::from_config(&config),
        Err(LockError::InvalidCapacity { .. })
    ));
}
