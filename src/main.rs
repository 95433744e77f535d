use std::sync::Arc;

use keel::buffer::BufferPoolManager;
use keel::common::{PageId, RecordId, SlotId, DEFAULT_BUFFER_POOL_SIZE, DEFAULT_LRUK_K};
use keel::concurrency::{IsolationLevel, LockManager, LockMode, TransactionManager};
use keel::index::BPlusTree;
use keel::storage::disk::DiskManager;

fn main() {
    println!("Keel - storage & concurrency core demo");
    println!("=======================================\n");

    let db_path = "demo.db";

    let disk_manager = Arc::new(DiskManager::new(db_path).expect("Failed to create disk manager"));
    println!("Opened database file: {}", db_path);

    let bpm = Arc::new(BufferPoolManager::new(
        DEFAULT_BUFFER_POOL_SIZE,
        DEFAULT_LRUK_K,
        disk_manager,
    ));
    println!(
        "Created buffer pool with {} frames (LRU-{} replacement)\n",
        DEFAULT_BUFFER_POOL_SIZE, DEFAULT_LRUK_K
    );

    let lock_manager = Arc::new(LockManager::new());
    lock_manager.start_cycle_detection();
    let txn_manager = TransactionManager::new(Arc::clone(&lock_manager));

    let index =
        BPlusTree::new("demo_pk", Arc::clone(&bpm), 8, 8).expect("Failed to create index");

    let txn = txn_manager.begin(IsolationLevel::RepeatableRead);
    lock_manager
        .lock_table(&txn, LockMode::IntentionExclusive, 1)
        .expect("table lock");

    for key in [42u32, 7, 19, 3, 88, 51, 64, 26, 11, 70] {
        let rid = RecordId::new(PageId::new(100 + key as i32), SlotId::new(0));
        lock_manager
            .lock_row(&txn, LockMode::Exclusive, 1, rid)
            .expect("row lock");
        index.insert(key, rid, &txn).expect("insert");
        println!("Inserted key {}", key);
    }

    println!("\nRange scan:");
    for entry in index.begin().expect("begin") {
        let (key, rid) = entry.expect("scan");
        println!("  {} -> {}", key, rid);
    }

    index.remove(19, &txn).expect("remove");
    println!("\nRemoved key 19; scan from 11:");
    for entry in index.begin_at(11).expect("begin_at") {
        let (key, rid) = entry.expect("scan");
        println!("  {} -> {}", key, rid);
    }

    txn_manager.commit(&txn);
    println!("\nTransaction committed");

    bpm.flush_all().expect("flush");
    lock_manager.stop_cycle_detection();

    std::fs::remove_file(db_path).ok();
    println!("Demo completed successfully!");
}
