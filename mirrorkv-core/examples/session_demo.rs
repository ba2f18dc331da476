//! Example walking through a cache session
//!
//! This example shows how to:
//! - Set up logging from the coordinator configuration
//! - Read through the mirror, including negative caching
//! - Commit a transaction with deferred writes
//! - Roll back eager increments with compensating commands

use mirrorkv_core::{
    init_logging, BackingStore, CacheCoordinator, LogLevel, MemoryStore, MirrorConfig,
};

fn main() -> anyhow::Result<()> {
    let mut config = MirrorConfig::default();
    config.logging.level = LogLevel::Debug;
    init_logging(&config.logging)?;

    let store = MemoryStore::new();
    let mut cache = CacheCoordinator::with_config(store.clone(), config);
    cache.init()?;

    println!("MirrorKV Session Example");
    println!("========================");

    // Plain write-through
    cache.set("user:1:name", "ada")?;
    cache.hset("user:1", "visits", 0)?;
    println!("name = {}", cache.get("user:1:name")?);

    // A missing key is remembered after the first lookup
    for _ in 0..3 {
        if let Err(e) = cache.get("user:2:name") {
            println!("user:2:name -> {}", e);
        }
    }

    // Deferred writes stay local until commit
    cache.begin_transaction()?;
    cache.set("user:1:name", "ada lovelace")?;
    cache.hincr("user:1", "visits", 1)?;
    println!(
        "inside transaction: mirror = {}, store = {}",
        cache.get("user:1:name")?,
        store.get("user:1:name")?
    );
    let report = cache.commit()?;
    println!(
        "committed transaction {}: {} command(s) replayed",
        report.transaction, report.replayed
    );

    // Increments reach the store immediately and are undone on rollback
    cache.begin_transaction()?;
    cache.incr("page:views", 10)?;
    cache.incr("page:views", 5)?;
    println!("views before rollback = {}", store.get("page:views")?);
    let report = cache.rollback()?;
    println!(
        "rolled back transaction {}: {} compensation(s), views = {}",
        report.transaction,
        report.compensations.len(),
        store.get("page:views")?
    );

    let stats = cache.stats();
    println!("\nSession statistics");
    println!("  mirror hits:   {}", stats.mirror_hits);
    println!("  mirror misses: {}", stats.mirror_misses);
    println!("  hit rate:      {:.1}%", stats.hit_rate() * 100.0);
    println!("  store calls:   {}", stats.store_calls);
    println!("  committed:     {}", stats.transactions_committed);
    println!("  rolled back:   {}", stats.transactions_rolled_back);

    Ok(())
}
