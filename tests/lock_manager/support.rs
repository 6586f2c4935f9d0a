use std::sync::Once;
use std::thread;
use std::time::{Duration, Instant};

use resource_locks::{LockManager, ResourceId, SharingMode};

static TRACING: Once = Once::new();

/// Install a test subscriber once; filter with `RUST_LOG`.
pub fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

/// A manager with a single `"doc"` type registered.
pub fn doc_manager(sharing_mode: SharingMode, capacity: usize) -> LockManager {
    init_tracing();
    let manager = LockManager::new();
    manager
        .create_resource_type("doc", capacity, sharing_mode)
        .unwrap();
    manager
}

/// Block until `expected` callers are queued on `doc/resource_id`.
pub fn wait_for_waiters(manager: &LockManager, resource_id: ResourceId, expected: usize) {
    let deadline = Instant::now() + Duration::from_secs(5);
    loop {
        if let Ok(state) = manager.slot_state("doc", resource_id) {
            if state.waiting >= expected {
                return;
            }
        }
        assert!(Instant::now() < deadline, "waiters never queued on doc/{resource_id}");
        thread::sleep(Duration::from_millis(1));
    }
}
