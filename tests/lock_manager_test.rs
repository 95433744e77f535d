//! Integration tests for the hierarchical lock manager and its deadlock
//! detector

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use keel::common::{PageId, RecordId, SlotId};
use keel::concurrency::{
    AbortReason, IsolationLevel, LockManager, LockMode, Transaction, TransactionManager,
    TransactionState,
};

fn rid(n: i32) -> RecordId {
    RecordId::new(PageId::new(n), SlotId::new(0))
}

fn txn(id: i32) -> Arc<Transaction> {
    let _ = env_logger::builder().is_test(true).try_init();
    Arc::new(Transaction::new(id, IsolationLevel::RepeatableRead))
}

const TABLE: u32 = 1;

#[test]
fn test_basic_table_lock_cycle() {
    let lm = LockManager::new();
    let t = txn(0);

    assert!(lm.lock_table(&t, LockMode::Exclusive, TABLE).unwrap());
    assert!(t.is_table_locked(TABLE, LockMode::Exclusive));

    // Re-requesting the same mode succeeds immediately.
    assert!(lm.lock_table(&t, LockMode::Exclusive, TABLE).unwrap());

    assert!(lm.unlock_table(&t, TABLE).unwrap());
    assert!(!t.is_table_locked(TABLE, LockMode::Exclusive));
}

#[test]
fn test_shared_locks_coexist() {
    let lm = Arc::new(LockManager::new());
    let t0 = txn(0);
    let t1 = txn(1);

    assert!(lm.lock_table(&t0, LockMode::Shared, TABLE).unwrap());
    assert!(lm.lock_table(&t1, LockMode::Shared, TABLE).unwrap());

    assert!(lm.unlock_table(&t0, TABLE).unwrap());
    assert!(lm.unlock_table(&t1, TABLE).unwrap());
}

#[test]
fn test_exclusive_blocks_until_released() {
    let lm = Arc::new(LockManager::new());
    let t0 = txn(0);
    let t1 = txn(1);

    assert!(lm.lock_table(&t0, LockMode::Exclusive, TABLE).unwrap());

    let waiter = {
        let lm = Arc::clone(&lm);
        let t1 = Arc::clone(&t1);
        thread::spawn(move || lm.lock_table(&t1, LockMode::Shared, TABLE).unwrap())
    };

    // The shared request must sit behind the exclusive holder.
    thread::sleep(Duration::from_millis(100));
    assert!(!t1.is_table_locked(TABLE, LockMode::Shared));

    assert!(lm.unlock_table(&t0, TABLE).unwrap());
    assert!(waiter.join().unwrap());
    assert!(t1.is_table_locked(TABLE, LockMode::Shared));
}

#[test]
fn test_lock_upgrade() {
    let lm = LockManager::new();
    let t = txn(0);

    assert!(lm.lock_table(&t, LockMode::IntentionShared, TABLE).unwrap());
    assert!(lm.lock_table(&t, LockMode::Exclusive, TABLE).unwrap());

    assert!(!t.is_table_locked(TABLE, LockMode::IntentionShared));
    assert!(t.is_table_locked(TABLE, LockMode::Exclusive));
}

#[test]
fn test_incompatible_upgrade_aborts() {
    let lm = LockManager::new();
    let t = txn(0);

    assert!(lm.lock_table(&t, LockMode::Exclusive, TABLE).unwrap());
    let err = lm.lock_table(&t, LockMode::Shared, TABLE).unwrap_err();
    assert_eq!(err.reason, AbortReason::IncompatibleUpgrade);
    assert_eq!(t.state(), TransactionState::Aborted);
}

#[test]
fn test_upgrade_conflict_aborts_second_upgrader() {
    let lm = Arc::new(LockManager::new());
    let t0 = txn(0);
    let t1 = txn(1);

    assert!(lm.lock_table(&t0, LockMode::Shared, TABLE).unwrap());
    assert!(lm.lock_table(&t1, LockMode::Shared, TABLE).unwrap());

    // T0 queues an upgrade to X; it has to wait for T1's shared lock.
    let upgrader = {
        let lm = Arc::clone(&lm);
        let t0 = Arc::clone(&t0);
        thread::spawn(move || lm.lock_table(&t0, LockMode::Exclusive, TABLE).unwrap())
    };
    thread::sleep(Duration::from_millis(100));

    // A second upgrade on the same queue dies immediately.
    let err = lm.lock_table(&t1, LockMode::Exclusive, TABLE).unwrap_err();
    assert_eq!(err.reason, AbortReason::UpgradeConflict);
    assert_eq!(t1.state(), TransactionState::Aborted);

    // Once T1's shared lock goes away, T0's upgrade is granted.
    lm.release_all_locks(&t1);
    assert!(upgrader.join().unwrap());
    assert!(t0.is_table_locked(TABLE, LockMode::Exclusive));
}

#[test]
fn test_row_lock_requires_table_lock() {
    let lm = LockManager::new();
    let t = txn(0);

    let err = lm.lock_row(&t, LockMode::Exclusive, TABLE, rid(1)).unwrap_err();
    assert_eq!(err.reason, AbortReason::TableLockNotPresent);

    let t = txn(1);
    let err = lm.lock_row(&t, LockMode::Shared, TABLE, rid(1)).unwrap_err();
    assert_eq!(err.reason, AbortReason::TableLockNotPresent);

    // IS is enough for a shared row lock but not an exclusive one.
    let t = txn(2);
    assert!(lm.lock_table(&t, LockMode::IntentionShared, TABLE).unwrap());
    assert!(lm.lock_row(&t, LockMode::Shared, TABLE, rid(1)).unwrap());
    let err = lm.lock_row(&t, LockMode::Exclusive, TABLE, rid(2)).unwrap_err();
    assert_eq!(err.reason, AbortReason::TableLockNotPresent);
}

#[test]
fn test_intention_lock_on_row_rejected() {
    let lm = LockManager::new();
    let t = txn(0);

    assert!(lm.lock_table(&t, LockMode::IntentionExclusive, TABLE).unwrap());
    for mode in [
        LockMode::IntentionShared,
        LockMode::IntentionExclusive,
        LockMode::SharedIntentionExclusive,
    ] {
        let t = txn(1);
        let err = lm.lock_row(&t, mode, TABLE, rid(1)).unwrap_err();
        assert_eq!(err.reason, AbortReason::AttemptedIntentionLockOnRow);
    }
}

#[test]
fn test_read_uncommitted_rejects_shared_family() {
    let lm = LockManager::new();

    for mode in [
        LockMode::Shared,
        LockMode::IntentionShared,
        LockMode::SharedIntentionExclusive,
    ] {
        let t = Arc::new(Transaction::new(0, IsolationLevel::ReadUncommitted));
        let err = lm.lock_table(&t, mode, TABLE).unwrap_err();
        assert_eq!(err.reason, AbortReason::LockSharedOnReadUncommitted);
        assert_eq!(t.state(), TransactionState::Aborted);
    }

    // The write side still works.
    let t = Arc::new(Transaction::new(1, IsolationLevel::ReadUncommitted));
    assert!(lm.lock_table(&t, LockMode::IntentionExclusive, TABLE).unwrap());
    assert!(lm.lock_row(&t, LockMode::Exclusive, TABLE, rid(1)).unwrap());
}

#[test]
fn test_unlock_without_lock_aborts() {
    let lm = LockManager::new();
    let t = txn(0);

    let err = lm.unlock_table(&t, TABLE).unwrap_err();
    assert_eq!(err.reason, AbortReason::AttemptedUnlockButNoLockHeld);

    // Same for a queue that exists but has no request from this txn.
    let holder = txn(1);
    assert!(lm.lock_table(&holder, LockMode::Shared, TABLE).unwrap());
    let t = txn(2);
    let err = lm.unlock_table(&t, TABLE).unwrap_err();
    assert_eq!(err.reason, AbortReason::AttemptedUnlockButNoLockHeld);
}

#[test]
fn test_double_unlock_aborts() {
    let lm = LockManager::new();
    let t = txn(0);

    assert!(lm.lock_table(&t, LockMode::IntentionExclusive, TABLE).unwrap());
    assert!(lm.lock_row(&t, LockMode::Exclusive, TABLE, rid(1)).unwrap());

    assert!(lm.unlock_row(&t, TABLE, rid(1)).unwrap());
    let err = lm.unlock_row(&t, TABLE, rid(1)).unwrap_err();
    assert_eq!(err.reason, AbortReason::AttemptedUnlockButNoLockHeld);
}

#[test]
fn test_table_unlock_blocked_by_row_locks() {
    let lm = LockManager::new();
    let t = txn(0);

    assert!(lm.lock_table(&t, LockMode::IntentionExclusive, TABLE).unwrap());
    assert!(lm.lock_row(&t, LockMode::Exclusive, TABLE, rid(1)).unwrap());

    let err = lm.unlock_table(&t, TABLE).unwrap_err();
    assert_eq!(err.reason, AbortReason::TableUnlockedBeforeUnlockingRows);
}

#[test]
fn test_repeatable_read_shrinking_after_row_unlock() {
    let lm = LockManager::new();
    let t = txn(0);

    assert!(lm.lock_table(&t, LockMode::IntentionExclusive, TABLE).unwrap());
    assert!(lm.lock_row(&t, LockMode::Exclusive, TABLE, rid(1)).unwrap());
    assert_eq!(t.state(), TransactionState::Growing);

    // Releasing an X row lock under REPEATABLE_READ ends the growing phase.
    assert!(lm.unlock_row(&t, TABLE, rid(1)).unwrap());
    assert_eq!(t.state(), TransactionState::Shrinking);

    let err = lm.lock_row(&t, LockMode::Exclusive, TABLE, rid(2)).unwrap_err();
    assert_eq!(err.reason, AbortReason::LockOnShrinking);
    assert_eq!(t.state(), TransactionState::Aborted);
}

#[test]
fn test_read_committed_allows_shared_while_shrinking() {
    let lm = LockManager::new();
    let t = Arc::new(Transaction::new(0, IsolationLevel::ReadCommitted));

    assert!(lm.lock_table(&t, LockMode::IntentionExclusive, TABLE).unwrap());
    assert!(lm.lock_row(&t, LockMode::Exclusive, TABLE, rid(1)).unwrap());
    assert!(lm.unlock_row(&t, TABLE, rid(1)).unwrap());
    assert_eq!(t.state(), TransactionState::Shrinking);

    // READ_COMMITTED may still take S/IS while shrinking, but not IX/X.
    assert!(lm.lock_table(&t, LockMode::IntentionShared, 2).unwrap());
    assert!(lm.lock_row(&t, LockMode::Shared, 2, rid(9)).unwrap());
    let err = lm.lock_row(&t, LockMode::Exclusive, TABLE, rid(2)).unwrap_err();
    assert_eq!(err.reason, AbortReason::LockOnShrinking);
}

#[test]
fn test_deadlock_detection_picks_youngest() {
    let lm = Arc::new(LockManager::new());
    let t10 = txn(10);
    let t20 = txn(20);

    assert!(lm.lock_table(&t10, LockMode::IntentionExclusive, TABLE).unwrap());
    assert!(lm.lock_table(&t20, LockMode::IntentionExclusive, TABLE).unwrap());
    assert!(lm.lock_row(&t10, LockMode::Exclusive, TABLE, rid(1)).unwrap());
    assert!(lm.lock_row(&t20, LockMode::Exclusive, TABLE, rid(2)).unwrap());

    // T10 wants r2 (held by T20); T20 wants r1 (held by T10).
    let a = {
        let lm = Arc::clone(&lm);
        let t10 = Arc::clone(&t10);
        thread::spawn(move || lm.lock_row(&t10, LockMode::Exclusive, TABLE, rid(2)).unwrap())
    };
    let b = {
        let lm = Arc::clone(&lm);
        let t20 = Arc::clone(&t20);
        thread::spawn(move || lm.lock_row(&t20, LockMode::Exclusive, TABLE, rid(1)).unwrap())
    };
    thread::sleep(Duration::from_millis(200));

    lm.run_cycle_detection_round();

    // The younger transaction dies and its wait returns false.
    assert!(!b.join().unwrap());
    assert_eq!(t20.state(), TransactionState::Aborted);

    // Once the victim's locks are stripped, T10 gets the row.
    lm.release_all_locks(&t20);
    assert!(a.join().unwrap());
    assert!(t10.is_row_locked(TABLE, rid(2), LockMode::Exclusive));
    assert_eq!(t10.state(), TransactionState::Growing);
}

#[test]
fn test_background_cycle_detection() {
    let lm = Arc::new(LockManager::with_interval(Duration::from_millis(10)));
    lm.start_cycle_detection();

    let txn_mgr = TransactionManager::new(Arc::clone(&lm));
    let t0 = txn_mgr.begin(IsolationLevel::RepeatableRead);
    let t1 = txn_mgr.begin(IsolationLevel::RepeatableRead);

    assert!(lm.lock_table(&t0, LockMode::IntentionExclusive, TABLE).unwrap());
    assert!(lm.lock_table(&t1, LockMode::IntentionExclusive, TABLE).unwrap());
    assert!(lm.lock_row(&t0, LockMode::Exclusive, TABLE, rid(1)).unwrap());
    assert!(lm.lock_row(&t1, LockMode::Exclusive, TABLE, rid(2)).unwrap());

    let a = {
        let lm = Arc::clone(&lm);
        let t0 = Arc::clone(&t0);
        thread::spawn(move || lm.lock_row(&t0, LockMode::Exclusive, TABLE, rid(2)).unwrap())
    };
    let b = {
        let lm = Arc::clone(&lm);
        let t1 = Arc::clone(&t1);
        thread::spawn(move || lm.lock_row(&t1, LockMode::Exclusive, TABLE, rid(1)).unwrap())
    };

    // Within a few scan intervals the detector kills the younger txn.
    assert!(!b.join().unwrap());
    assert_eq!(t1.state(), TransactionState::Aborted);

    txn_mgr.abort(&t1);
    assert!(a.join().unwrap());

    txn_mgr.commit(&t0);
    lm.stop_cycle_detection();
}

#[test]
fn test_wait_for_graph_api() {
    let lm = LockManager::new();

    lm.add_edge(10, 20);
    lm.add_edge(20, 10);
    assert_eq!(lm.edge_list(), vec![(10, 20), (20, 10)]);

    assert_eq!(lm.find_cycle_victim(), Some(20));

    lm.remove_edge(20, 10);
    assert_eq!(lm.find_cycle_victim(), None);
}

#[test]
fn test_commit_releases_everything() {
    let lm = Arc::new(LockManager::new());
    let txn_mgr = TransactionManager::new(Arc::clone(&lm));

    let t0 = txn_mgr.begin(IsolationLevel::RepeatableRead);
    assert!(lm.lock_table(&t0, LockMode::IntentionExclusive, TABLE).unwrap());
    assert!(lm.lock_row(&t0, LockMode::Exclusive, TABLE, rid(1)).unwrap());

    txn_mgr.commit(&t0);
    assert_eq!(t0.state(), TransactionState::Committed);
    assert!(!t0.is_table_locked(TABLE, LockMode::IntentionExclusive));

    // A new transaction can take the same locks without waiting.
    let t1 = txn_mgr.begin(IsolationLevel::RepeatableRead);
    assert!(lm.lock_table(&t1, LockMode::Exclusive, TABLE).unwrap());
    assert!(lm.lock_row(&t1, LockMode::Exclusive, TABLE, rid(1)).unwrap());
}
