mod common;

use std::sync::Arc;

use query_cache::cache::{
    CacheConfig, CacheState, InvalidationStrategy, MemoryStore, TaglessFallback,
};
use query_cache::domain::{Cacheable, MutationKind};
use serde_json::json;

use common::{FlakyStore, User, row, state, state_with, users_engine};

struct Archive;

impl Cacheable for Archive {
    const ENTITY: &'static str = "users";

    fn invalidate_on() -> &'static [MutationKind] {
        &[MutationKind::Deleted]
    }
}

fn tagless_state(fallback: TaglessFallback) -> CacheState {
    let config = CacheConfig {
        tagless_fallback: fallback,
        ..CacheConfig::default()
    };
    let store = Arc::new(MemoryStore::without_tags(&config));
    CacheState::new(config, store)
}

#[test]
fn created_row_shows_up_in_the_next_collection_read() {
    let engine = users_engine();
    let state = state();
    let users = state.decorator::<User>(engine.clone());

    assert_eq!(users.get(&User::query()).expect("get").len(), 3);

    engine.insert("users", row(json!({"id": 4, "name": "dee", "active": true, "age": 50})));
    state.invalidation().created::<User>(4).expect("created");

    let rows = users.get(&User::query()).expect("get after create");
    assert_eq!(rows.len(), 4);
    assert!(rows.iter().any(|r| r.get("id") == Some(&json!(4))));
    assert_eq!(engine.executions(), 2);
}

#[test]
fn scoped_create_keeps_identity_entries() {
    let engine = users_engine();
    let state = state();
    let users = state.decorator::<User>(engine.clone());

    users.find(&User::query(), 1).expect("find");
    users.count(&User::query()).expect("count");
    assert_eq!(engine.executions(), 2);

    state.invalidation().created::<User>(4).expect("created");

    users.find(&User::query(), 1).expect("find again");
    assert_eq!(engine.executions(), 2);
    users.count(&User::query()).expect("count again");
    assert_eq!(engine.executions(), 3);
}

#[test]
fn create_clears_a_cached_miss_for_the_new_key() {
    let engine = users_engine();
    let state = state();
    let users = state.decorator::<User>(engine.clone());

    assert!(users.find(&User::query(), 4).expect("find").is_none());

    engine.insert("users", row(json!({"id": 4, "name": "dee", "active": true, "age": 50})));
    state.invalidation().created::<User>(4).expect("created");

    assert!(users.find(&User::query(), 4).expect("find again").is_some());
    assert_eq!(engine.executions(), 2);
}

#[test]
fn blanket_create_evicts_everything_for_the_entity() {
    let engine = users_engine();
    let config = CacheConfig {
        invalidation: InvalidationStrategy::Blanket,
        ..CacheConfig::default()
    };
    let state = state_with(config);
    let users = state.decorator::<User>(engine.clone());

    users.find(&User::query(), 1).expect("find");
    users.count(&User::query()).expect("count");

    state.invalidation().created::<User>(4).expect("created");

    users.find(&User::query(), 1).expect("find again");
    users.count(&User::query()).expect("count again");
    assert_eq!(engine.executions(), 4);
}

#[test]
fn update_flushes_the_changed_identity_only() {
    let engine = users_engine();
    let state = state();
    let users = state.decorator::<User>(engine.clone());

    users.find(&User::query(), 1).expect("find 1");
    users.find(&User::query(), 2).expect("find 2");

    let mut changes = query_cache::domain::Row::new();
    changes.insert("name".to_string(), json!("ada lovelace"));
    assert_eq!(engine.update("users", "id", &json!(1), &changes), 1);
    state.invalidation().updated::<User>(1).expect("updated");

    let ada = users.find(&User::query(), 1).expect("find 1 again").expect("row");
    assert_eq!(ada.get("name"), Some(&json!("ada lovelace")));
    users.find(&User::query(), 2).expect("find 2 again");
    assert_eq!(engine.executions(), 3);
}

#[test]
fn delete_and_restore_flush_identity_and_collections() {
    let engine = users_engine();
    let state = state();
    let users = state.decorator::<User>(engine.clone());

    assert!(users.find(&User::query(), 2).expect("find").is_some());
    assert_eq!(engine.delete("users", "id", &json!(2)), 1);
    state.invalidation().deleted::<User>(2).expect("deleted");
    assert!(users.find(&User::query(), 2).expect("find deleted").is_none());

    engine.insert("users", row(json!({"id": 2, "name": "bob", "active": false, "age": 41})));
    state.invalidation().restored::<User>(2).expect("restored");
    assert!(users.find(&User::query(), 2).expect("find restored").is_some());
    assert_eq!(engine.executions(), 3);
}

#[test]
fn unsubscribed_kinds_do_not_invalidate() {
    let engine = users_engine();
    let state = state();
    let archive = state.decorator::<Archive>(engine.clone());

    archive.count(&Archive::query()).expect("count");
    state.invalidation().created::<Archive>(4).expect("created");
    state.invalidation().updated::<Archive>(1).expect("updated");
    archive.count(&Archive::query()).expect("count");
    assert_eq!(engine.executions(), 1);

    state.invalidation().deleted::<Archive>(1).expect("deleted");
    archive.count(&Archive::query()).expect("count");
    assert_eq!(engine.executions(), 2);
}

#[test]
fn tagless_store_tracks_keys_when_asked() {
    let engine = users_engine();
    let state = tagless_state(TaglessFallback::TrackKeys);
    let users = state.decorator::<User>(engine.clone());

    users.count(&User::query()).expect("count");
    assert_eq!(state.registry.key_count(), 1);

    state.invalidation().created::<User>(4).expect("created");
    assert_eq!(state.registry.key_count(), 0);

    users.count(&User::query()).expect("count again");
    assert_eq!(engine.executions(), 2);
}

#[test]
fn tagless_store_without_fallback_keeps_entries() {
    let engine = users_engine();
    let state = tagless_state(TaglessFallback::None);
    let users = state.decorator::<User>(engine.clone());

    users.count(&User::query()).expect("count");
    assert_eq!(state.registry.key_count(), 0);

    state.invalidation().created::<User>(4).expect("created");
    users.count(&User::query()).expect("count again");
    assert_eq!(engine.executions(), 1);
}

#[test]
fn flush_entity_drops_every_read() {
    let engine = users_engine();
    let state = state();
    let users = state.decorator::<User>(engine.clone());

    users.find(&User::query(), 1).expect("find");
    users.count(&User::query()).expect("count");
    users.exists(&User::query().where_eq("name", "zed")).expect("exists");

    let removed = state.invalidation().flush_entity::<User>().expect("flush");
    assert_eq!(removed, 3);
}

#[test]
fn disabled_cache_publishes_nothing() {
    let config = CacheConfig {
        enabled: false,
        ..CacheConfig::default()
    };
    let state = state_with(config);

    assert!(
        state
            .invalidation()
            .publish::<User>(MutationKind::Created, 1)
            .is_none()
    );
    assert!(state.queue.is_empty());
}

#[test]
fn publish_defers_the_flush_until_pending_events_are_consumed() {
    let engine = users_engine();
    let state = state();
    let users = state.decorator::<User>(engine.clone());

    users.count(&User::query()).expect("count");
    let id = state
        .invalidation()
        .publish::<User>(MutationKind::Created, 4)
        .expect("published");
    assert!(!id.is_nil());
    assert_eq!(state.queue.len(), 1);

    users.count(&User::query()).expect("still cached");
    assert_eq!(engine.executions(), 1);

    state.invalidation().flush_pending().expect("flush pending");
    assert!(state.queue.is_empty());
    users.count(&User::query()).expect("recomputed");
    assert_eq!(engine.executions(), 2);
}

#[test]
fn overflowed_events_still_evict_warmed_entries() {
    let engine = users_engine();
    let state = state_with(CacheConfig {
        event_queue_limit: 1,
        ..CacheConfig::default()
    });
    let users = state.decorator::<User>(engine.clone());

    users.find(&User::query(), 1).expect("find");
    users.count(&User::query()).expect("count");
    assert_eq!(engine.executions(), 2);

    let manager = state.invalidation();
    manager.publish::<User>(MutationKind::Updated, 1).expect("published");
    manager.publish::<User>(MutationKind::Updated, 2).expect("published");
    assert_eq!(state.queue.len(), 1);

    manager.flush_pending().expect("flush pending");
    assert!(state.queue.is_empty());

    users.find(&User::query(), 1).expect("find again");
    users.count(&User::query()).expect("count again");
    assert_eq!(engine.executions(), 4);
}

#[test]
fn failed_flush_is_retried_after_the_store_recovers() {
    let engine = users_engine();
    let config = CacheConfig::default();
    let store = Arc::new(FlakyStore::new(&config));
    let state = CacheState::new(config, store.clone());
    let users = state.decorator::<User>(engine.clone());

    users.find(&User::query(), 1).expect("find");
    assert_eq!(engine.executions(), 1);

    store.set_down(true);
    assert!(state.invalidation().updated::<User>(1).is_err());
    assert_eq!(state.queue.len(), 1);

    store.set_down(false);
    state.invalidation().flush_pending().expect("flush pending");
    assert!(state.queue.is_empty());

    users.find(&User::query(), 1).expect("find again");
    assert_eq!(engine.executions(), 2);
}

#[test]
fn requeued_batch_keeps_the_queue_bounded() {
    let config = CacheConfig {
        event_queue_limit: 1,
        ..CacheConfig::default()
    };
    let store = Arc::new(FlakyStore::new(&config));
    let state = CacheState::new(config, store.clone());

    store.set_down(true);
    assert!(state.invalidation().updated::<User>(1).is_err());
    assert!(state.invalidation().updated::<User>(2).is_err());
    assert_eq!(state.queue.len(), 1);

    store.set_down(false);
    state.invalidation().flush_pending().expect("flush pending");
    assert!(state.queue.is_empty());
}
