//! Tests for the entity cache manager and its concurrency strategies.

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use serde_json::json;

use super::entity::EntityRegion;
use super::entry::CacheResult;
use super::error::Error;
use super::key::CacheKey;
use super::strategy::{ConcurrencyStrategy, IsolationLevel, KeyState};

fn region(strategy: ConcurrencyStrategy) -> EntityRegion {
    EntityRegion::in_memory("Pet", strategy, 100, Duration::from_secs(60))
}

fn pet_key(id: i64) -> CacheKey {
    CacheKey::for_entity("Pet", id)
}

// ========== Population round trip ==========

#[test]
fn test_after_load_then_lookup_hits() {
    let region = region(ConcurrencyStrategy::ReadWrite);
    let key = pet_key(1);

    let inserted = region
        .after_load(&key, json!({"name": "Fluffy", "species": "dog"}), 1)
        .unwrap();
    assert!(inserted);

    match region.lookup(&key) {
        CacheResult::Hit(entry) => {
            assert_eq!(entry.state["name"], "Fluffy");
            assert_eq!(entry.version, 1);
        }
        other => panic!("Expected hit, got {other:?}"),
    }
}

#[test]
fn test_lookup_empty_region_misses() {
    let region = region(ConcurrencyStrategy::ReadWrite);

    assert!(matches!(region.lookup(&pet_key(42)), CacheResult::Miss));
}

#[test]
fn test_after_load_same_version_is_idempotent() {
    let region = region(ConcurrencyStrategy::ReadWrite);
    let key = pet_key(1);

    assert!(region.after_load(&key, json!({"v": 5}), 5).unwrap());
    // Reloading the same version is a no-op, not an error.
    assert!(!region.after_load(&key, json!({"v": 5}), 5).unwrap());
}

// ========== Stale-write guard ==========

#[test]
fn test_after_load_rejects_version_regression() {
    let region = region(ConcurrencyStrategy::ReadWrite);
    let key = pet_key(1);

    region.after_load(&key, json!({"v": 5}), 5).unwrap();

    let result = region.after_load(&key, json!({"v": 3}), 3);
    assert!(matches!(
        result,
        Err(Error::StaleWriteRejected {
            stored: 5,
            attempted: 3,
            ..
        })
    ));

    // The newer entry stays visible.
    let entry = region.lookup(&key);
    assert_eq!(entry.entry().unwrap().version, 5);
}

#[test]
fn test_after_update_rejects_version_regression() {
    let region = region(ConcurrencyStrategy::ReadWrite);
    let key = pet_key(1);

    region.after_load(&key, json!({"v": 5}), 5).unwrap();
    let handle = region.before_update(&key).unwrap();

    let result = region.after_update(&handle, json!({"v": 3}), 3, true);
    assert!(matches!(result, Err(Error::StaleWriteRejected { .. })));

    // The lock is released even though the put was rejected.
    assert_eq!(region.key_state(&key), KeyState::Clean);
}

// ========== Read-write strategy ==========

#[test]
fn test_locked_key_is_forced_miss_for_readers() {
    let region = region(ConcurrencyStrategy::ReadWrite);
    let key = pet_key(1);

    region.after_load(&key, json!({"name": "Fluffy"}), 1).unwrap();
    let _handle = region.before_update(&key).unwrap();

    assert!(matches!(region.lookup(&key), CacheResult::Locked));
}

#[test]
fn test_commit_replaces_entry_and_releases_lock() {
    let region = region(ConcurrencyStrategy::ReadWrite);
    let key = pet_key(1);

    region.after_load(&key, json!({"name": "Fluffy"}), 1).unwrap();
    let handle = region.before_update(&key).unwrap();

    let visible = region
        .after_update(&handle, json!({"name": "Fluffy II"}), 2, true)
        .unwrap();
    assert!(visible);

    match region.lookup(&key) {
        CacheResult::Hit(entry) => {
            assert_eq!(entry.state["name"], "Fluffy II");
            assert_eq!(entry.version, 2);
        }
        other => panic!("Expected hit, got {other:?}"),
    }
}

#[test]
fn test_rollback_restores_pre_update_visibility() {
    let region = region(ConcurrencyStrategy::ReadWrite);
    let key = pet_key(1);

    region.after_load(&key, json!({"name": "Fluffy"}), 1).unwrap();
    let handle = region.before_update(&key).unwrap();

    let visible = region
        .after_update(&handle, json!({"name": "Fluffy II"}), 2, false)
        .unwrap();
    assert!(!visible);

    // The pre-update entry is unchanged.
    match region.lookup(&key) {
        CacheResult::Hit(entry) => {
            assert_eq!(entry.state["name"], "Fluffy");
            assert_eq!(entry.version, 1);
        }
        other => panic!("Expected hit, got {other:?}"),
    }
}

#[test]
fn test_second_writer_conflicts() {
    let region = region(ConcurrencyStrategy::ReadWrite);
    let key = pet_key(1);

    let _first = region.before_update(&key).unwrap();

    let second = region.before_update(&key);
    assert!(matches!(
        second,
        Err(Error::ConcurrentUpdateConflict { .. })
    ));
}

#[test]
fn test_concurrent_writers_exactly_one_wins() {
    let region = Arc::new(region(ConcurrencyStrategy::ReadWrite));
    let key = pet_key(1);

    let mut handles = vec![];
    for _ in 0..8 {
        let region = Arc::clone(&region);
        let key = key.clone();
        handles.push(thread::spawn(move || region.before_update(&key).is_ok()));
    }

    let wins: usize = handles
        .into_iter()
        .map(|h| usize::from(h.join().unwrap()))
        .sum();

    assert_eq!(wins, 1, "exactly one writer may hold the soft lock");
}

#[test]
fn test_after_update_without_lock_conflicts() {
    let region = region(ConcurrencyStrategy::ReadWrite);
    let handle = super::entry::LockHandle {
        key: pet_key(1),
        token: uuid::Uuid::new_v4(),
    };

    let result = region.after_update(&handle, json!({}), 1, true);
    assert!(matches!(
        result,
        Err(Error::ConcurrentUpdateConflict { .. })
    ));
}

#[test]
fn test_after_load_skipped_under_foreign_lock() {
    let region = region(ConcurrencyStrategy::ReadWrite);
    let key = pet_key(1);

    let _handle = region.before_update(&key).unwrap();

    // A reader that loaded from the data source must not overwrite a
    // key with a write in flight.
    let inserted = region.after_load(&key, json!({"name": "stale"}), 1).unwrap();
    assert!(!inserted);
    assert!(matches!(region.lookup(&key), CacheResult::Locked));
}

// ========== Lock expiry ==========

#[test]
fn test_expired_lock_clears_to_invalidated() {
    let region = EntityRegion::in_memory(
        "Pet",
        ConcurrencyStrategy::ReadWrite,
        100,
        Duration::from_millis(10),
    );
    let key = pet_key(1);

    region.after_load(&key, json!({"name": "Fluffy"}), 1).unwrap();
    let _handle = region.before_update(&key).unwrap();

    thread::sleep(Duration::from_millis(30));

    // The crashed writer's lock is cleared and the key invalidated.
    assert!(matches!(region.lookup(&key), CacheResult::Miss));
    assert_eq!(region.key_state(&key), KeyState::Invalidated);
}

#[test]
fn test_expired_lock_displaced_by_new_writer() {
    let region = EntityRegion::in_memory(
        "Pet",
        ConcurrencyStrategy::ReadWrite,
        100,
        Duration::from_millis(10),
    );
    let key = pet_key(1);

    let stale_handle = region.before_update(&key).unwrap();
    thread::sleep(Duration::from_millis(30));

    // A new writer takes over the expired lock.
    let fresh_handle = region.before_update(&key).unwrap();

    // The late writer lost its lock and must not publish.
    let late = region.after_update(&stale_handle, json!({"v": 1}), 1, true);
    assert!(matches!(late, Err(Error::ConcurrentUpdateConflict { .. })));

    // The new owner completes normally.
    assert!(region
        .after_update(&fresh_handle, json!({"v": 2}), 2, true)
        .unwrap());
}

// ========== Read-only strategy ==========

#[test]
fn test_read_only_rejects_updates() {
    let region = region(ConcurrencyStrategy::ReadOnly);
    let key = pet_key(1);

    region.after_load(&key, json!({"name": "Fluffy"}), 1).unwrap();

    let result = region.before_update(&key);
    assert!(matches!(result, Err(Error::ImmutableEntry(_))));

    // The entry is untouched.
    assert!(region.lookup(&key).is_hit());
}

// ========== Nonstrict-read-write strategy ==========

#[test]
fn test_nonstrict_invalidates_immediately() {
    let region = region(ConcurrencyStrategy::NonstrictReadWrite);
    let key = pet_key(1);

    region.after_load(&key, json!({"name": "Fluffy"}), 1).unwrap();

    let handle = region.before_update(&key).unwrap();
    // The entry is gone before the database write even runs.
    assert!(matches!(region.lookup(&key), CacheResult::Miss));

    // after_update never repopulates; the next load does.
    assert!(!region.after_update(&handle, json!({"v": 2}), 2, true).unwrap());
    assert!(matches!(region.lookup(&key), CacheResult::Miss));

    region.after_load(&key, json!({"v": 2}), 2).unwrap();
    assert!(region.lookup(&key).is_hit());
}

// ========== Transactional strategy ==========

#[test]
fn test_transactional_prepare_commit_publishes() {
    let region = region(ConcurrencyStrategy::Transactional);
    let key = pet_key(1);

    region.after_load(&key, json!({"name": "Fluffy"}), 1).unwrap();
    let handle = region
        .before_update_isolated(&key, IsolationLevel::Serializable)
        .unwrap();

    region
        .prepare_update(&handle, json!({"name": "Fluffy II"}), 2)
        .unwrap();

    // Prepared but uncommitted: readers still see a forced miss.
    assert!(matches!(region.lookup(&key), CacheResult::Locked));

    assert!(region.commit_update(&handle).unwrap());

    match region.lookup(&key) {
        CacheResult::Hit(entry) => assert_eq!(entry.version, 2),
        other => panic!("Expected hit, got {other:?}"),
    }
}

#[test]
fn test_transactional_rollback_discards_pending() {
    let region = region(ConcurrencyStrategy::Transactional);
    let key = pet_key(1);

    region.after_load(&key, json!({"name": "Fluffy"}), 1).unwrap();
    let handle = region.before_update(&key).unwrap();

    region
        .prepare_update(&handle, json!({"name": "Fluffy II"}), 2)
        .unwrap();
    region.rollback_update(&handle).unwrap();

    // The staged entry was discarded; the old snapshot is visible.
    match region.lookup(&key) {
        CacheResult::Hit(entry) => {
            assert_eq!(entry.state["name"], "Fluffy");
            assert_eq!(entry.version, 1);
        }
        other => panic!("Expected hit, got {other:?}"),
    }
}

#[test]
fn test_commit_without_prepare_publishes_nothing() {
    let region = region(ConcurrencyStrategy::Transactional);
    let key = pet_key(1);

    let handle = region.before_update(&key).unwrap();
    assert!(!region.commit_update(&handle).unwrap());
    assert!(matches!(region.lookup(&key), CacheResult::Miss));
}

#[test]
fn test_prepare_requires_transactional_strategy() {
    let region = region(ConcurrencyStrategy::ReadWrite);
    let key = pet_key(1);

    let handle = region.before_update(&key).unwrap();
    let result = region.prepare_update(&handle, json!({}), 2);
    assert!(matches!(result, Err(Error::Internal(_))));
}

// ========== Invalidation & key state ==========

#[test]
fn test_invalidate_removes_entry_and_lock() {
    let region = region(ConcurrencyStrategy::ReadWrite);
    let key = pet_key(1);

    region.after_load(&key, json!({"name": "Fluffy"}), 1).unwrap();
    let _handle = region.before_update(&key).unwrap();

    region.invalidate(&key);

    assert_eq!(region.key_state(&key), KeyState::Invalidated);
    assert!(matches!(region.lookup(&key), CacheResult::Miss));
}

#[test]
fn test_key_state_transitions() {
    let region = region(ConcurrencyStrategy::ReadWrite);
    let key = pet_key(1);

    assert_eq!(region.key_state(&key), KeyState::Invalidated);

    region.after_load(&key, json!({"v": 1}), 1).unwrap();
    assert_eq!(region.key_state(&key), KeyState::Clean);

    let handle = region.before_update(&key).unwrap();
    assert_eq!(region.key_state(&key), KeyState::PendingWrite);

    region.after_update(&handle, json!({"v": 2}), 2, true).unwrap();
    assert_eq!(region.key_state(&key), KeyState::Clean);
}

// ========== Statistics side effects ==========

#[test]
fn test_lookup_and_put_update_statistics() {
    let region = region(ConcurrencyStrategy::ReadWrite);
    let key = pet_key(1);

    assert!(!region.lookup(&key).is_hit()); // miss
    region.after_load(&key, json!({"v": 1}), 1).unwrap(); // put
    assert!(region.lookup(&key).is_hit()); // hit

    let stats = region.statistics();
    assert_eq!(stats.hits, 1);
    assert_eq!(stats.misses, 1);
    assert_eq!(stats.puts, 1);
}

#[test]
fn test_locked_lookup_counts_as_miss() {
    let region = region(ConcurrencyStrategy::ReadWrite);
    let key = pet_key(1);

    region.after_load(&key, json!({"v": 1}), 1).unwrap();
    let _handle = region.before_update(&key).unwrap();

    let _ = region.lookup(&key);

    assert_eq!(region.statistics().misses, 1);
}

// ========== Concurrent mixed workload ==========

#[test]
fn test_concurrent_loads_and_lookups() {
    let region = Arc::new(EntityRegion::in_memory(
        "Pet",
        ConcurrencyStrategy::ReadWrite,
        1000,
        Duration::from_secs(60),
    ));

    let mut handles = vec![];
    for t in 0..4 {
        let region = Arc::clone(&region);
        handles.push(thread::spawn(move || {
            for i in 0..50 {
                let id = i64::from(t * 50 + i);
                let key = pet_key(id);
                region.after_load(&key, json!({"id": id}), 1).unwrap();
                assert!(region.lookup(&key).is_hit());
            }
        }));
    }

    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(region.len(), 200);
}
