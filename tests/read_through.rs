mod common;

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use query_cache::cache::{CacheConfig, CacheError, CacheState, Expiry, Operation};
use query_cache::domain::{Cacheable, Direction, Operator};
use query_cache::engine::EngineError;
use serde_json::json;
use time::OffsetDateTime;

use common::{FlakyStore, Session, Uncached, User, row, state, state_with, users_engine};

#[test]
fn repeated_collection_read_executes_once() {
    let engine = users_engine();
    engine.delete("users", "id", &json!(3));
    let users = state().decorator::<User>(engine.clone());
    let query = User::query();

    let first = users.get(&query).expect("first get");
    let second = users.get(&query).expect("second get");

    assert_eq!(first.len(), 2);
    assert_eq!(first, second);
    assert_eq!(engine.executions(), 1);
}

#[test]
fn distinct_predicates_get_distinct_entries() {
    let engine = users_engine();
    let users = state().decorator::<User>(engine.clone());
    let active = User::query().where_eq("active", true);
    let all = User::query();

    assert_eq!(users.get(&active).expect("active").len(), 2);
    assert_eq!(users.get(&all).expect("all").len(), 3);
    assert_eq!(engine.executions(), 2);

    assert_eq!(users.get(&active).expect("active again").len(), 2);
    assert_eq!(users.get(&all).expect("all again").len(), 3);
    assert_eq!(engine.executions(), 2);
}

#[test]
fn count_is_cached() {
    let engine = users_engine();
    let users = state().decorator::<User>(engine.clone());

    assert_eq!(users.count(&User::query()).expect("count"), 3);
    assert_eq!(users.count(&User::query()).expect("count"), 3);
    assert_eq!(engine.executions(), 1);
}

#[test]
fn negative_results_are_cached() {
    let engine = users_engine();
    let users = state().decorator::<User>(engine.clone());
    let nobody = User::query().where_eq("name", "zed");

    assert!(!users.exists(&nobody).expect("exists"));
    assert!(!users.exists(&nobody).expect("exists"));
    assert!(users.first(&nobody).expect("first").is_none());
    assert!(users.first(&nobody).expect("first").is_none());
    assert!(users.find(&User::query(), 99).expect("find").is_none());
    assert!(users.find(&User::query(), 99).expect("find").is_none());
    assert!(users.get(&nobody).expect("get").is_empty());
    assert!(users.get(&nobody).expect("get").is_empty());
    assert_eq!(users.count(&nobody).expect("count"), 0);
    assert_eq!(users.count(&nobody).expect("count"), 0);

    assert_eq!(engine.executions(), 5);
}

#[test]
fn cached_null_is_reported_as_null() {
    let engine = users_engine();
    let users = state().decorator::<User>(engine);
    let nobody = User::query().where_eq("name", "zed");

    users.first(&nobody).expect("first");
    let entry = users
        .describe(&nobody, &Operation::First)
        .expect("describe")
        .expect("entry stored");
    assert!(entry.value.is_null());
}

#[test]
fn operations_on_one_query_do_not_share_entries() {
    let engine = users_engine();
    let users = state().decorator::<User>(engine.clone());
    let query = User::query().where_eq("active", true);

    users.get(&query).expect("get");
    users.first(&query).expect("first");
    users.count(&query).expect("count");
    users.exists(&query).expect("exists");
    users.sum(&query, "age").expect("sum");
    users.max(&query, "age").expect("max");
    users.pluck(&query, "name").expect("pluck");
    users.get_columns(&query, ["name"]).expect("get_columns");
    assert_eq!(engine.executions(), 8);

    users.get(&query).expect("get");
    users.first(&query).expect("first");
    users.count(&query).expect("count");
    users.exists(&query).expect("exists");
    users.sum(&query, "age").expect("sum");
    users.max(&query, "age").expect("max");
    users.pluck(&query, "name").expect("pluck");
    users.get_columns(&query, ["name"]).expect("get_columns");
    assert_eq!(engine.executions(), 8);
}

#[test]
fn aggregate_values_match_the_engine() {
    let users = state().decorator::<User>(users_engine());
    let active = User::query().where_eq("active", true);

    assert_eq!(users.sum(&active, "age").expect("sum"), json!(65));
    assert_eq!(users.min(&active, "age").expect("min"), json!(29));
    assert_eq!(users.max(&active, "age").expect("max"), json!(36));
    assert_eq!(
        users.pluck(&active.clone().order_by("age", Direction::Asc), "name").expect("pluck"),
        vec![json!("cyd"), json!("ada")]
    );
}

#[test]
fn find_and_find_many_use_identity_keys() {
    let engine = users_engine();
    let users = state().decorator::<User>(engine.clone());

    let ada = users.find(&User::query(), 1).expect("find").expect("row");
    assert_eq!(ada.get("name"), Some(&json!("ada")));

    let key = users.key_for(
        &User::query().where_eq("id", 1),
        &Operation::Find { id: json!(1) },
    );
    assert!(key.as_str().starts_with("query-cache:users:id:1:"));

    let many = users.find_many(&User::query(), [1, 3]).expect("find_many");
    assert_eq!(many.len(), 2);
    users.find_many(&User::query(), [1, 3]).expect("find_many");
    assert_eq!(engine.executions(), 2);
}

#[test]
fn predicate_order_changes_the_key() {
    let users = state().decorator::<User>(users_engine());
    let left = User::query()
        .where_eq("active", true)
        .where_op("age", Operator::Gt, 30);
    let right = User::query()
        .where_op("age", Operator::Gt, 30)
        .where_eq("active", true);

    assert_ne!(
        users.key_for(&left, &Operation::Count),
        users.key_for(&right, &Operation::Count)
    );
}

#[test]
fn warmed_entry_never_expires_and_serves_plain_reads() {
    let engine = users_engine();
    let state = state();
    let query = User::query().where_eq("active", true);

    let mut warmer = state.decorator::<User>(engine.clone());
    warmer.warmup();
    let warmed = warmer.get(&query).expect("warmup get");
    assert_eq!(engine.executions(), 1);

    let entry = warmer
        .describe(&query, &Operation::Get { columns: vec![] })
        .expect("describe")
        .expect("entry stored");
    assert_eq!(entry.expires_at, Expiry::Never);

    let reader = state.decorator::<User>(engine.clone());
    assert_eq!(reader.get(&query).expect("plain get"), warmed);
    assert_eq!(engine.executions(), 1);
}

#[test]
fn warmup_executes_even_when_an_entry_exists() {
    let engine = users_engine();
    let state = state();
    let query = User::query();

    let reader = state.decorator::<User>(engine.clone());
    assert_eq!(reader.count(&query).expect("count"), 3);

    engine.insert("users", row(json!({"id": 4, "name": "dee", "active": true, "age": 50})));
    assert_eq!(reader.count(&query).expect("stale count"), 3);

    let mut warmer = state.decorator::<User>(engine.clone());
    warmer.warmup();
    assert_eq!(warmer.count(&query).expect("warm count"), 4);
    assert_eq!(reader.count(&query).expect("refreshed count"), 4);
    assert_eq!(engine.executions(), 2);
}

#[test]
fn normal_entries_expire_within_the_default_ttl() {
    let users = state().decorator::<User>(users_engine());
    let query = User::query();

    let before = OffsetDateTime::now_utc();
    users.count(&query).expect("count");
    let after = OffsetDateTime::now_utc();

    let entry = users
        .describe(&query, &Operation::Count)
        .expect("describe")
        .expect("entry stored");
    match entry.expires_at {
        Expiry::At(at) => {
            assert!(at >= before + Duration::from_secs(600));
            assert!(at <= after + Duration::from_secs(600));
        }
        Expiry::Never => panic!("normal reads must expire"),
    }
}

#[test]
fn entity_ttl_overrides_the_default() {
    let engine = Arc::new(query_cache::engine::MemoryEngine::new().with_table("sessions", vec![]));
    let sessions = state().decorator::<Session>(engine);
    let query = Session::query();

    let before = OffsetDateTime::now_utc();
    sessions.count(&query).expect("count");
    let entry = sessions
        .describe(&query, &Operation::Count)
        .expect("describe")
        .expect("entry stored");

    match entry.expires_at {
        Expiry::At(at) => assert!(at <= before + Duration::from_secs(6)),
        Expiry::Never => panic!("entity ttl must expire"),
    }
}

#[test]
fn non_positive_default_ttl_is_a_configuration_error() {
    let engine = users_engine();
    let config = CacheConfig {
        default_ttl_seconds: 0,
        ..CacheConfig::default()
    };
    let users = state_with(config).decorator::<User>(engine.clone());

    let err = users.count(&User::query()).expect_err("invalid ttl");
    assert!(matches!(err, CacheError::Configuration { .. }));
    assert_eq!(engine.executions(), 0);
}

#[test]
fn engine_failures_propagate_and_are_not_cached() {
    let engine = users_engine();
    let users = state().decorator::<User>(engine.clone());
    let query = User::query();

    engine.fail_next("connection reset");
    let err = users.count(&query).expect_err("engine failure");
    assert!(matches!(err, CacheError::Engine(EngineError::Query { .. })));

    assert_eq!(users.count(&query).expect("retry"), 3);
    assert_eq!(engine.executions(), 2);
}

#[test]
fn unserializable_results_surface_as_serialization_errors() {
    let users = state().decorator::<User>(users_engine());

    let err = users
        .remember(&User::query(), Operation::Count, || {
            let mut map = BTreeMap::new();
            map.insert((1, 2), 3);
            Ok(map)
        })
        .expect_err("tuple keys cannot be encoded");

    assert!(matches!(err, CacheError::Serialization { ref operation, .. } if operation == "count"));
}

#[test]
fn failing_store_is_bypassed_when_fail_open() {
    let engine = users_engine();
    let config = CacheConfig {
        fail_open: true,
        ..CacheConfig::default()
    };
    let store = Arc::new(FlakyStore::new(&config));
    store.set_down(true);
    let users = CacheState::new(config, store).decorator::<User>(engine.clone());

    assert_eq!(users.count(&User::query()).expect("count"), 3);
    assert_eq!(users.count(&User::query()).expect("count"), 3);
    assert_eq!(engine.executions(), 2);
}

#[test]
fn failing_store_is_an_error_when_fail_closed() {
    let engine = users_engine();
    let config = CacheConfig::default();
    let store = Arc::new(FlakyStore::new(&config));
    store.set_down(true);
    let users = CacheState::new(config, store).decorator::<User>(engine.clone());

    let err = users.count(&User::query()).expect_err("store down");
    assert!(matches!(err, CacheError::Unavailable(_)));
    assert_eq!(engine.executions(), 0);
}

#[test]
fn paginate_caches_items_but_not_the_total() {
    let engine = users_engine();
    let users = state().decorator::<User>(engine.clone());
    let query = User::query().order_by("id", Direction::Asc);

    let page = users.paginate(&query, 2, 1).expect("paginate");
    assert_eq!(page.items.len(), 2);
    assert_eq!(page.total, 3);
    assert_eq!(page.last_page, 2);
    assert_eq!(engine.executions(), 1);

    engine.insert("users", row(json!({"id": 4, "name": "dee", "active": true, "age": 50})));
    let again = users.paginate(&query, 2, 1).expect("paginate again");
    assert_eq!(again.items, page.items);
    assert_eq!(again.total, 4);
    assert_eq!(engine.executions(), 2);
}

#[test]
fn simple_paginate_reports_more_rows() {
    let engine = users_engine();
    let users = state().decorator::<User>(engine.clone());
    let query = User::query().order_by("id", Direction::Asc);

    let first = users.simple_paginate(&query, 2, 1).expect("page 1");
    assert_eq!(first.items.len(), 2);
    assert!(first.has_more);

    let last = users.simple_paginate(&query, 2, 2).expect("page 2");
    assert_eq!(last.items.len(), 1);
    assert!(!last.has_more);

    users.simple_paginate(&query, 2, 1).expect("page 1 again");
    assert_eq!(engine.executions(), 2);
}

#[test]
fn zero_page_arguments_are_raised_to_one() {
    let users = state().decorator::<User>(users_engine());
    let page = users.paginate(&User::query(), 0, 0).expect("paginate");
    assert_eq!(page.per_page, 1);
    assert_eq!(page.current_page, 1);
    assert_eq!(page.last_page, 3);
}

#[test]
fn disabled_cache_always_executes() {
    let engine = users_engine();
    let config = CacheConfig {
        enabled: false,
        ..CacheConfig::default()
    };
    let users = state_with(config).decorator::<User>(engine.clone());

    users.count(&User::query()).expect("count");
    users.count(&User::query()).expect("count");
    assert_eq!(engine.executions(), 2);
}

#[test]
fn entity_opt_out_always_executes() {
    let engine = users_engine();
    let state = state();
    let users = state.decorator::<Uncached>(engine.clone());

    users.count(&Uncached::query()).expect("count");
    users.count(&Uncached::query()).expect("count");
    assert_eq!(engine.executions(), 2);
    assert!(
        users
            .describe(&Uncached::query(), &Operation::Count)
            .expect("describe")
            .is_none()
    );
}
