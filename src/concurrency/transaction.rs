use std::collections::{HashMap, HashSet};

use parking_lot::Mutex;

use crate::common::{PageId, RecordId, TableOid, TxnId};

use super::lock_manager::LockMode;

/// Isolation level of the transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IsolationLevel {
    ReadUncommitted,
    ReadCommitted,
    RepeatableRead,
}

/// Transaction states for two-phase locking
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    Growing,
    Shrinking,
    Committed,
    Aborted,
}

/// Held-lock bookkeeping, one set per table mode and one map per row mode.
#[derive(Debug, Default)]
struct LockSets {
    shared_tables: HashSet<TableOid>,
    exclusive_tables: HashSet<TableOid>,
    intention_shared_tables: HashSet<TableOid>,
    intention_exclusive_tables: HashSet<TableOid>,
    shared_intention_exclusive_tables: HashSet<TableOid>,
    shared_rows: HashMap<TableOid, HashSet<RecordId>>,
    exclusive_rows: HashMap<TableOid, HashSet<RecordId>>,
}

impl LockSets {
    fn table_set(&mut self, mode: LockMode) -> &mut HashSet<TableOid> {
        match mode {
            LockMode::Shared => &mut self.shared_tables,
            LockMode::Exclusive => &mut self.exclusive_tables,
            LockMode::IntentionShared => &mut self.intention_shared_tables,
            LockMode::IntentionExclusive => &mut self.intention_exclusive_tables,
            LockMode::SharedIntentionExclusive => &mut self.shared_intention_exclusive_tables,
        }
    }

    fn row_map(&mut self, mode: LockMode) -> &mut HashMap<TableOid, HashSet<RecordId>> {
        match mode {
            LockMode::Shared => &mut self.shared_rows,
            LockMode::Exclusive => &mut self.exclusive_rows,
            _ => unreachable!("intention locks are never taken on rows"),
        }
    }
}

/// A transaction. Shared as `Arc<Transaction>` between the session thread,
/// the lock manager's queues, and the deadlock detector; all mutable state
/// sits behind interior mutability.
pub struct Transaction {
    id: TxnId,
    isolation_level: IsolationLevel,
    state: Mutex<TransactionState>,
    lock_sets: Mutex<LockSets>,
    /// B+ tree pages scheduled for deletion once the current operation has
    /// released its latches
    deleted_pages: Mutex<Vec<PageId>>,
}

impl Transaction {
    pub fn new(id: TxnId, isolation_level: IsolationLevel) -> Self {
        Self {
            id,
            isolation_level,
            state: Mutex::new(TransactionState::Growing),
            lock_sets: Mutex::new(LockSets::default()),
            deleted_pages: Mutex::new(Vec::new()),
        }
    }

    pub fn id(&self) -> TxnId {
        self.id
    }

    pub fn isolation_level(&self) -> IsolationLevel {
        self.isolation_level
    }

    pub fn state(&self) -> TransactionState {
        *self.state.lock()
    }

    pub fn set_state(&self, state: TransactionState) {
        *self.state.lock() = state;
    }

    // ------------------------------------------------------------------
    // Lock-set maintenance (called by the lock manager)
    // ------------------------------------------------------------------

    pub(crate) fn insert_table_lock(&self, mode: LockMode, oid: TableOid) {
        self.lock_sets.lock().table_set(mode).insert(oid);
    }

    pub(crate) fn remove_table_lock(&self, mode: LockMode, oid: TableOid) {
        self.lock_sets.lock().table_set(mode).remove(&oid);
    }

    pub(crate) fn insert_row_lock(&self, mode: LockMode, oid: TableOid, rid: RecordId) {
        self.lock_sets
            .lock()
            .row_map(mode)
            .entry(oid)
            .or_default()
            .insert(rid);
    }

    pub(crate) fn remove_row_lock(&self, mode: LockMode, oid: TableOid, rid: RecordId) {
        let mut sets = self.lock_sets.lock();
        if let Some(rows) = sets.row_map(mode).get_mut(&oid) {
            rows.remove(&rid);
        }
    }

    /// Whether this transaction holds a table lock on `oid` in exactly
    /// `mode`.
    pub fn is_table_locked(&self, oid: TableOid, mode: LockMode) -> bool {
        self.lock_sets.lock().table_set(mode).contains(&oid)
    }

    /// Whether this transaction holds a table lock on `oid` in any of the
    /// given modes.
    pub fn is_table_locked_in_any(&self, oid: TableOid, modes: &[LockMode]) -> bool {
        let mut sets = self.lock_sets.lock();
        modes.iter().any(|&mode| sets.table_set(mode).contains(&oid))
    }

    pub fn is_row_locked(&self, oid: TableOid, rid: RecordId, mode: LockMode) -> bool {
        let mut sets = self.lock_sets.lock();
        sets.row_map(mode)
            .get(&oid)
            .is_some_and(|rows| rows.contains(&rid))
    }

    /// Whether any row of `oid` is still locked by this transaction.
    pub fn holds_row_locks_on(&self, oid: TableOid) -> bool {
        let sets = self.lock_sets.lock();
        sets.shared_rows.get(&oid).is_some_and(|r| !r.is_empty())
            || sets.exclusive_rows.get(&oid).is_some_and(|r| !r.is_empty())
    }

    /// Snapshot of all held table locks as (mode, oid) pairs.
    pub fn table_lock_snapshot(&self) -> Vec<(LockMode, TableOid)> {
        let sets = self.lock_sets.lock();
        let mut out = Vec::new();
        for &oid in &sets.shared_tables {
            out.push((LockMode::Shared, oid));
        }
        for &oid in &sets.exclusive_tables {
            out.push((LockMode::Exclusive, oid));
        }
        for &oid in &sets.intention_shared_tables {
            out.push((LockMode::IntentionShared, oid));
        }
        for &oid in &sets.intention_exclusive_tables {
            out.push((LockMode::IntentionExclusive, oid));
        }
        for &oid in &sets.shared_intention_exclusive_tables {
            out.push((LockMode::SharedIntentionExclusive, oid));
        }
        out
    }

    /// Snapshot of all held row locks as (mode, oid, rid) triples.
    pub fn row_lock_snapshot(&self) -> Vec<(LockMode, TableOid, RecordId)> {
        let sets = self.lock_sets.lock();
        let mut out = Vec::new();
        for (&oid, rows) in &sets.shared_rows {
            for &rid in rows {
                out.push((LockMode::Shared, oid, rid));
            }
        }
        for (&oid, rows) in &sets.exclusive_rows {
            for &rid in rows {
                out.push((LockMode::Exclusive, oid, rid));
            }
        }
        out
    }

    // ------------------------------------------------------------------
    // Deferred index page deletion
    // ------------------------------------------------------------------

    pub fn add_deleted_page(&self, page_id: PageId) {
        self.deleted_pages.lock().push(page_id);
    }

    pub fn take_deleted_pages(&self) -> Vec<PageId> {
        std::mem::take(&mut *self.deleted_pages.lock())
    }
}
