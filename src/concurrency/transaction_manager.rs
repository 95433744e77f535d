use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Arc;

use log::debug;

use super::lock_manager::LockManager;
use super::transaction::{IsolationLevel, Transaction, TransactionState};

/// Hands out transaction ids and finishes transactions.
///
/// Commit and abort set the terminal state first and then strip every lock
/// the transaction still holds (rows before tables) through the lock
/// manager, waking any waiters.
pub struct TransactionManager {
    next_txn_id: AtomicI32,
    lock_manager: Arc<LockManager>,
}

impl TransactionManager {
    pub fn new(lock_manager: Arc<LockManager>) -> Self {
        Self {
            next_txn_id: AtomicI32::new(0),
            lock_manager,
        }
    }

    pub fn begin(&self, isolation_level: IsolationLevel) -> Arc<Transaction> {
        let id = self.next_txn_id.fetch_add(1, Ordering::SeqCst);
        debug!("txn {} begins ({:?})", id, isolation_level);
        Arc::new(Transaction::new(id, isolation_level))
    }

    pub fn commit(&self, txn: &Arc<Transaction>) {
        txn.set_state(TransactionState::Committed);
        self.lock_manager.release_all_locks(txn);
        debug!("txn {} committed", txn.id());
    }

    pub fn abort(&self, txn: &Arc<Transaction>) {
        txn.set_state(TransactionState::Aborted);
        self.lock_manager.release_all_locks(txn);
        debug!("txn {} aborted", txn.id());
    }

    pub fn lock_manager(&self) -> &Arc<LockManager> {
        &self.lock_manager
    }
}
