//! Integration tests for the cache coordinator
//!
//! Covers:
//! - Negative caching and tombstones
//! - Batched reads (MGet, HMGet, HGetAll)
//! - Commit replay and rollback compensation
//! - Lifecycle hooks and mirror reconciliation

use mirrorkv_core::{
    BackingStore, CacheCoordinator, CacheError, MemoryStore, MirrorConfig, RecordingStore,
    ReplayKind, ReplayPolicy, Resolution, StoreError, TransactionState, Value,
};
use std::collections::HashMap;

// =========================================================================
// Test Helpers
// =========================================================================

type TestCache = CacheCoordinator<RecordingStore<MemoryStore>>;

fn cache() -> TestCache {
    CacheCoordinator::new(RecordingStore::new(MemoryStore::new()))
}

fn cache_with(config: MirrorConfig) -> TestCache {
    CacheCoordinator::with_config(RecordingStore::new(MemoryStore::new()), config)
}

fn cache_with_hooks() -> TestCache {
    let store = RecordingStore::new(MemoryStore::new());
    let hooks = store.hooks();
    CacheCoordinator::new(store).with_hooks(hooks)
}

/// Write straight to the store, bypassing the coordinator and the journal
fn seed(cache: &TestCache, key: &str, value: &str) {
    cache.store().inner().set(key, &Value::from(value)).unwrap();
}

fn seed_field(cache: &TestCache, key: &str, field: &str, value: &str) {
    cache
        .store()
        .inner()
        .hset(key, field, &Value::from(value))
        .unwrap();
}

fn expected(pairs: &[(&str, &str)]) -> HashMap<String, String> {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

// =========================================================================
// Negative caching and tombstones
// =========================================================================

#[test]
fn test_negative_cache_is_idempotent() {
    let mut cache = cache();

    assert!(matches!(cache.get("missing"), Err(CacheError::ValueNil)));
    assert!(matches!(cache.get("missing"), Err(CacheError::ValueNil)));

    assert_eq!(cache.store().count("get"), 1);
    assert_eq!(cache.mirror().lookup("missing"), Resolution::Nil);
}

#[test]
fn test_tombstone_lifecycle() {
    let mut cache = cache();

    cache.set("k", "v").unwrap();
    cache.del("k").unwrap();
    assert!(cache.get("k").unwrap_err().is_value_nil());

    cache.set("k", "v2").unwrap();
    let calls_before = cache.store().calls().len();
    assert_eq!(cache.get("k").unwrap(), "v2");

    assert_eq!(cache.store().calls().len(), calls_before);
    assert_eq!(cache.store().count("get"), 0);
}

#[test]
fn test_tombstone_masks_store_value() {
    let mut cache = cache();
    cache.begin_transaction().unwrap();

    seed(&cache, "k", "remote");
    cache.del("k").unwrap();

    assert!(cache.get("k").unwrap_err().is_value_nil());
    assert!(!cache.exists("k").unwrap());
    assert_eq!(cache.store().count("get"), 0);
    assert_eq!(cache.store().count("exists"), 0);
}

#[test]
fn test_string_delete_leaves_hash_mirror() {
    let mut cache = cache();
    cache.hset("shared", "f", "1").unwrap();
    cache.del("shared").unwrap();

    // The string tombstone does not reach the hash keyspace
    assert_eq!(cache.hget("shared", "f").unwrap(), "1");
    assert_eq!(cache.store().count("hget"), 0);
}

#[test]
fn test_exists_uses_mirror() {
    let mut cache = cache();
    cache.set("present", 1).unwrap();
    cache.hset("hash", "f", "v").unwrap();
    let _ = cache.get("absent");

    assert!(cache.exists("present").unwrap());
    assert!(cache.exists("hash").unwrap());
    assert!(!cache.exists("absent").unwrap());
    assert_eq!(cache.store().count("exists"), 0);

    seed(&cache, "remote", "x");
    assert!(cache.exists("remote").unwrap());
    assert_eq!(cache.store().count("exists"), 1);
}

#[test]
fn test_exists_ignores_hash_without_confirmed_fields() {
    let mut cache = cache();
    let _ = cache.hget("h", "missing");
    cache.hdel("h", "gone").unwrap();

    assert!(!cache.exists("h").unwrap());
    assert_eq!(cache.store().count("exists"), 1);
}

#[test]
fn test_flush_resets_fast_paths() {
    let mut cache = cache();
    cache.set("mirrored", "v").unwrap();
    cache.set("deleted", "v").unwrap();
    cache.del("deleted").unwrap();
    cache.begin_transaction().unwrap();
    cache.set("pending", "p").unwrap();

    cache.flush_memory();
    assert!(cache.mirror().is_empty());
    assert_eq!(cache.transaction().unwrap().len(), 1);

    assert_eq!(cache.get("mirrored").unwrap(), "v");
    assert!(!cache.exists("deleted").unwrap());
    assert_eq!(cache.store().count("get"), 1);
    assert_eq!(cache.store().count("exists"), 1);
}

// =========================================================================
// Batched reads
// =========================================================================

#[test]
fn test_mget_merges_mirror_and_store() {
    let mut cache = cache();

    cache.set("k1", "1").unwrap();
    let _ = cache.get("k2");
    cache.set("k5", "gone").unwrap();
    cache.del("k5").unwrap();
    seed(&cache, "k3", "t3");
    cache.store().clear_calls();

    let result = cache.mget(&["k1", "k2", "k3", "k4", "k5"]).unwrap();

    assert_eq!(
        result,
        expected(&[("k1", "1"), ("k2", ""), ("k3", "t3"), ("k4", ""), ("k5", "")])
    );
    let mgets = cache.store().calls_for("mget");
    assert_eq!(mgets.len(), 1);
    assert_eq!(mgets[0].args, vec!["k3", "k4"]);
}

#[test]
fn test_mget_writes_back_non_empty_results() {
    let mut cache = cache();
    seed(&cache, "k3", "t3");

    cache.mget(&["k3", "k4"]).unwrap();

    assert_eq!(cache.mirror().lookup("k3"), Resolution::Value("t3".to_string()));
    assert_eq!(cache.mirror().lookup("k4"), Resolution::Unknown);

    cache.mget(&["k3"]).unwrap();
    assert_eq!(cache.store().count("mget"), 1);
}

#[test]
fn test_mget_without_write_back() {
    let mut config = MirrorConfig::default();
    config.cache.mirror_batch_reads = false;
    let mut cache = cache_with(config);
    seed(&cache, "k", "v");

    cache.mget(&["k"]).unwrap();
    cache.mget(&["k"]).unwrap();

    assert_eq!(cache.store().count("mget"), 2);
    assert_eq!(cache.mirror().lookup("k"), Resolution::Unknown);
}

#[test]
fn test_mget_deduplicates_and_skips_resolved() {
    let mut cache = cache();
    cache.set("a", "1").unwrap();

    let result = cache.mget(&["b", "a", "b"]).unwrap();
    assert_eq!(result, expected(&[("a", "1"), ("b", "")]));
    assert_eq!(cache.store().calls_for("mget")[0].args, vec!["b"]);

    cache.store().clear_calls();
    cache.mget(&["a"]).unwrap();
    assert!(cache.store().calls().is_empty());
}

#[test]
fn test_hmget_partial_hit() {
    let mut cache = cache();

    cache
        .hmset("hash", [("test1", "1"), ("test2", "good"), ("test3", "ok")])
        .unwrap();
    let _ = cache.hget("hash", "test4");
    seed_field(&cache, "hash", "test5", "test5");
    cache.store().clear_calls();

    let result = cache
        .hmget("hash", &["test1", "test3", "test4", "test5", "test6"])
        .unwrap();

    assert_eq!(
        result,
        expected(&[
            ("test1", "1"),
            ("test3", "ok"),
            ("test4", ""),
            ("test5", "test5"),
            ("test6", ""),
        ])
    );
    assert_eq!(
        cache.store().calls_for("hmget")[0].args,
        vec!["hash", "test5", "test6"]
    );
    assert_eq!(
        cache.mirror().lookup_field("hash", "test5"),
        Resolution::Value("test5".to_string())
    );
}

#[test]
fn test_hexists_uses_field_tombstone() {
    let mut cache = cache();
    seed_field(&cache, "h", "f", "v");

    cache.hdel("h", "f").unwrap();
    assert!(!cache.hexists("h", "f").unwrap());
    assert_eq!(cache.store().count("hexists"), 0);
}

#[test]
fn test_hexists_uses_nil_flag() {
    let mut cache = cache();

    assert!(cache.hget("h", "missing").unwrap_err().is_value_nil());
    assert!(!cache.hexists("h", "missing").unwrap());
    assert_eq!(cache.store().count("hget"), 1);
    assert_eq!(cache.store().count("hexists"), 0);
}

#[test]
fn test_hexists_confirmed_and_unknown_fields() {
    let mut cache = cache();
    cache.hset("h", "mirrored", "1").unwrap();
    seed_field(&cache, "h", "remote", "2");

    assert!(cache.hexists("h", "mirrored").unwrap());
    assert_eq!(cache.store().count("hexists"), 0);

    assert!(cache.hexists("h", "remote").unwrap());
    assert!(!cache.hexists("h", "nowhere").unwrap());
    assert_eq!(cache.store().count("hexists"), 2);
    assert_eq!(
        cache.store().calls_for("hexists")[0].args,
        vec!["h", "remote"]
    );
}

#[test]
fn test_rollback_compensates_hash_decrement() {
    let mut cache = cache();
    seed_field(&cache, "stock", "widgets", "10");

    cache.begin_transaction().unwrap();
    assert_eq!(cache.hdecr("stock", "widgets", 4).unwrap(), "6");
    assert_eq!(cache.hget("stock", "widgets").unwrap(), "6");
    cache.store().clear_calls();

    cache.rollback().unwrap();

    assert_eq!(cache.store().ops(), vec!["hincr"]);
    assert_eq!(
        cache.store().calls_for("hincr")[0].args,
        vec!["stock", "widgets", "4"]
    );
    assert_eq!(cache.store().inner().hget("stock", "widgets").unwrap(), "10");
    assert_eq!(cache.hget("stock", "widgets").unwrap(), "10");
    assert_eq!(cache.store().count("hget"), 0);
}

#[test]
fn test_hgetall_overlays_session_state() {
    let mut cache = cache();
    seed_field(&cache, "user", "name", "ada");
    seed_field(&cache, "user", "email", "old@example.com");
    seed_field(&cache, "user", "phone", "555");

    cache.begin_transaction().unwrap();
    cache.hset("user", "email", "new@example.com").unwrap();
    cache.hdel("user", "phone").unwrap();
    cache.hset("user", "role", "admin").unwrap();

    let all = cache.hgetall("user").unwrap();
    assert_eq!(
        all,
        expected(&[
            ("name", "ada"),
            ("email", "new@example.com"),
            ("role", "admin"),
        ])
    );

    // Learned from the store
    assert_eq!(cache.hget("user", "name").unwrap(), "ada");
    assert_eq!(cache.store().count("hget"), 0);
}

// =========================================================================
// Transactions
// =========================================================================

#[test]
fn test_deferred_writes_skip_the_store() {
    let mut cache = cache();
    cache.begin_transaction().unwrap();

    cache.set("a", 1).unwrap();
    cache.mset([("b", "2"), ("c", "3")]).unwrap();
    cache.hset("h", "f", 1.5).unwrap();
    cache.expire("a", 30).unwrap();

    assert!(cache.store().calls().is_empty());
    assert_eq!(cache.get("a").unwrap(), "1");
    assert_eq!(cache.hget("h", "f").unwrap(), "1.500000");
    assert_eq!(cache.transaction().unwrap().len(), 4);
}

#[test]
fn test_commit_replays_fifo() {
    let mut cache = cache_with_hooks();
    cache.begin_transaction().unwrap();

    cache.set("a", "1").unwrap();
    cache.hset("h", "f", "x").unwrap();
    cache.del("a").unwrap();
    cache.expire("h", 60).unwrap();

    let report = cache.commit().unwrap();
    assert_eq!(report.kind, ReplayKind::Commit);
    assert_eq!(report.replayed, 4);

    assert_eq!(
        cache.store().ops(),
        vec![
            "before_create",
            "after_create",
            "before_commit",
            "set",
            "hset",
            "del",
            "expire",
            "after_commit",
        ]
    );
    assert!(!cache.store().inner().exists("a").unwrap());
    assert!(cache.store().inner().ttl("h").is_some());

    let tx = cache.transaction().unwrap();
    assert_eq!(tx.state(), TransactionState::Inactive);
    assert!(tx.is_empty());
}

#[test]
fn test_rollback_compensates_increment() {
    let mut cache = cache();
    cache.begin_transaction().unwrap();

    assert_eq!(cache.incr("k", 11).unwrap(), "11");
    assert_eq!(cache.get("k").unwrap(), "11");
    cache.store().clear_calls();

    cache.rollback().unwrap();

    let decrs = cache.store().calls_for("decr");
    assert_eq!(cache.store().calls().len(), 1);
    assert_eq!(decrs.len(), 1);
    assert_eq!(decrs[0].args, vec!["k", "11"]);

    let tx = cache.transaction().unwrap();
    assert_eq!(tx.state(), TransactionState::Inactive);
    assert!(tx.is_empty());
    assert_eq!(cache.store().inner().get("k").unwrap(), "0");
    assert_eq!(cache.get("k").unwrap(), "0");
}

#[test]
fn test_rollback_is_lifo_with_hooks() {
    let mut cache = cache_with_hooks();
    cache.begin_transaction().unwrap();

    cache.incr("a", 1).unwrap();
    cache.set("ignored", "x").unwrap();
    cache.hincr("h", "f", 2).unwrap();
    cache.decr("b", 3).unwrap();
    cache.store().clear_calls();

    let report = cache.rollback().unwrap();
    assert_eq!(report.kind, ReplayKind::Rollback);
    assert_eq!(report.compensations.len(), 3);
    assert_eq!(report.untouched.len(), 1);

    assert_eq!(
        cache.store().ops(),
        vec!["before_rollback", "incr", "hdecr", "decr", "after_rollback"]
    );
    assert!(!cache.store().inner().exists("ignored").unwrap());
}

#[test]
fn test_rollback_reverts_discarded_writes() {
    let mut cache = cache();
    seed(&cache, "k", "original");
    assert_eq!(cache.get("k").unwrap(), "original");

    cache.begin_transaction().unwrap();
    cache.set("k", "optimistic").unwrap();
    cache.hdel("h", "f").unwrap();
    cache.rollback().unwrap();

    assert_eq!(cache.mirror().lookup("k"), Resolution::Unknown);
    assert_eq!(cache.mirror().lookup_field("h", "f"), Resolution::Unknown);
    assert_eq!(cache.get("k").unwrap(), "original");
}

#[test]
fn test_rollback_can_keep_optimistic_mirror() {
    let mut config = MirrorConfig::default();
    config.transaction.revert_mirror_on_rollback = false;
    let mut cache = cache_with(config);

    cache.begin_transaction().unwrap();
    cache.set("k", "optimistic").unwrap();
    cache.rollback().unwrap();

    assert_eq!(cache.get("k").unwrap(), "optimistic");
    assert!(!cache.store().inner().exists("k").unwrap());
}

#[test]
fn test_failed_replay_is_reported_and_evicted() {
    let mut cache = cache();
    cache.begin_transaction().unwrap();
    cache.set("a", "1").unwrap();
    cache.set("b", "2").unwrap();
    cache.set("c", "3").unwrap();

    cache
        .store()
        .fail_next("set", StoreError::backend("connection reset"));
    let err = cache.commit().unwrap_err();

    let report = err.replay_report().unwrap();
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].record.sequence, 1);
    assert_eq!(report.replayed, 2);
    assert!(!cache.in_transaction());

    assert_eq!(cache.mirror().lookup("a"), Resolution::Unknown);
    assert_eq!(cache.mirror().lookup("b"), Resolution::Value("2".to_string()));
    assert!(cache.get("a").unwrap_err().is_value_nil());
    assert_eq!(cache.store().inner().get("c").unwrap(), "3");
}

#[test]
fn test_stop_on_error_leaves_remaining_untouched() {
    let mut config = MirrorConfig::default();
    config.transaction.replay_policy = ReplayPolicy::StopOnError;
    let mut cache = cache_with(config);

    cache.begin_transaction().unwrap();
    cache.set("a", "1").unwrap();
    cache.set("b", "2").unwrap();
    cache.set("c", "3").unwrap();

    cache.store().fail_next("set", StoreError::backend("down"));
    let err = cache.commit().unwrap_err();
    let report = err.replay_report().unwrap();

    assert_eq!(report.untouched.len(), 2);
    assert_eq!(cache.store().count("set"), 1);
    assert!(cache.mirror().is_empty());
    assert!(cache.store().inner().is_empty());
}

#[test]
fn test_failed_compensation_is_reported() {
    let mut cache = cache();
    cache.begin_transaction().unwrap();
    cache.incr("a", 1).unwrap();
    cache.incr("b", 1).unwrap();

    cache.store().fail_next("decr", StoreError::backend("down"));
    let err = cache.rollback().unwrap_err();
    let report = err.replay_report().unwrap();

    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.compensations.len(), 1);
    // b was compensated first and failed; a was restored
    assert_eq!(cache.mirror().lookup("b"), Resolution::Unknown);
    assert_eq!(cache.mirror().lookup("a"), Resolution::Value("0".to_string()));
}

#[test]
fn test_failing_before_commit_hook_keeps_transaction() {
    let mut cache = cache_with_hooks();
    cache.begin_transaction().unwrap();
    cache.set("k", "v").unwrap();

    cache
        .store()
        .fail_next("before_commit", StoreError::backend("vetoed"));
    let err = cache.commit().unwrap_err();
    assert!(matches!(err, CacheError::Internal { .. }));

    assert!(cache.in_transaction());
    assert_eq!(cache.transaction().unwrap().len(), 1);
    assert_eq!(cache.store().count("set"), 0);

    cache.commit().unwrap();
    assert_eq!(cache.store().inner().get("k").unwrap(), "v");
}

#[test]
fn test_failing_before_create_hook() {
    let mut cache = cache_with_hooks();
    cache
        .store()
        .fail_next("before_create", StoreError::backend("no sessions left"));

    assert!(matches!(
        cache.begin_transaction(),
        Err(CacheError::Internal { .. })
    ));
    assert!(!cache.in_transaction());
    assert_eq!(cache.begin_transaction().unwrap().id(), 1);
}

#[test]
fn test_transaction_log_limit() {
    let mut config = MirrorConfig::default();
    config.transaction.max_log_entries = Some(2);
    let mut cache = cache_with(config);

    cache.begin_transaction().unwrap();
    cache.set("a", "1").unwrap();
    cache.incr("n", 1).unwrap();

    let err = cache.set("b", "2").unwrap_err();
    assert!(matches!(err, CacheError::TransactionLogFull { limit: 2 }));
    assert_eq!(cache.mirror().lookup("b"), Resolution::Unknown);

    // A full log rejects increments before they reach the store
    assert!(cache.incr("n", 1).is_err());
    assert_eq!(cache.store().count("incr"), 1);
    assert_eq!(cache.store().inner().get("n").unwrap(), "1");
}

#[test]
fn test_export_log_is_json() {
    let mut cache = cache();
    cache.begin_transaction().unwrap();
    cache.set("a", 7).unwrap();
    cache.incr("n", 2).unwrap();

    let json = cache.transaction().unwrap().export_log().unwrap();
    let parsed: serde_json::Value = serde_json::from_str(&json).unwrap();

    assert_eq!(parsed.as_array().unwrap().len(), 2);
    assert_eq!(parsed[0]["sequence"], 1);
    assert_eq!(parsed[1]["entry"]["Applied"]["Incr"]["key"], "n");
}
