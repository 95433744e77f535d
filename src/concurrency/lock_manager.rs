use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use log::{debug, trace};
use parking_lot::{Condvar, Mutex};
use thiserror::Error;

use crate::common::{RecordId, TableOid, TxnId, CYCLE_DETECTION_INTERVAL, INVALID_TXN_ID};

use super::transaction::{IsolationLevel, Transaction, TransactionState};

/// Lock modes for multi-granularity locking
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LockMode {
    IntentionShared,
    IntentionExclusive,
    Shared,
    SharedIntentionExclusive,
    Exclusive,
}

/// Why a transaction was aborted by the lock manager
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AbortReason {
    LockOnShrinking,
    LockSharedOnReadUncommitted,
    UpgradeConflict,
    IncompatibleUpgrade,
    AttemptedIntentionLockOnRow,
    AttemptedUnlockButNoLockHeld,
    TableLockNotPresent,
    TableUnlockedBeforeUnlockingRows,
}

impl fmt::Display for AbortReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AbortReason::LockOnShrinking => "LOCK_ON_SHRINKING",
            AbortReason::LockSharedOnReadUncommitted => "LOCK_SHARED_ON_READ_UNCOMMITTED",
            AbortReason::UpgradeConflict => "UPGRADE_CONFLICT",
            AbortReason::IncompatibleUpgrade => "INCOMPATIBLE_UPGRADE",
            AbortReason::AttemptedIntentionLockOnRow => "ATTEMPTED_INTENTION_LOCK_ON_ROW",
            AbortReason::AttemptedUnlockButNoLockHeld => "ATTEMPTED_UNLOCK_BUT_NO_LOCK_HELD",
            AbortReason::TableLockNotPresent => "TABLE_LOCK_NOT_PRESENT",
            AbortReason::TableUnlockedBeforeUnlockingRows => "TABLE_UNLOCKED_BEFORE_UNLOCKING_ROWS",
        };
        f.write_str(name)
    }
}

/// Typed abort raised by lock operations. The transaction has already been
/// transitioned to ABORTED when this surfaces.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("transaction {txn_id} aborted: {reason}")]
pub struct TransactionAbort {
    pub txn_id: TxnId,
    pub reason: AbortReason,
}

/// A single lock request sitting in a resource's queue
struct LockRequest {
    txn: Arc<Transaction>,
    mode: LockMode,
    granted: bool,
}

impl LockRequest {
    fn new(txn: Arc<Transaction>, mode: LockMode) -> Self {
        Self {
            txn,
            mode,
            granted: false,
        }
    }

    fn txn_id(&self) -> TxnId {
        self.txn.id()
    }
}

struct RequestQueue {
    requests: VecDeque<LockRequest>,
    /// Transaction currently upgrading its lock; at most one per queue
    upgrading: TxnId,
}

/// Per-resource lock queue: a mutex-guarded FIFO of requests plus the
/// condition variable that waiters block on.
struct LockRequestQueue {
    inner: Mutex<RequestQueue>,
    cv: Condvar,
}

impl LockRequestQueue {
    fn new() -> Self {
        Self {
            inner: Mutex::new(RequestQueue {
                requests: VecDeque::new(),
                upgrading: INVALID_TXN_ID,
            }),
            cv: Condvar::new(),
        }
    }
}

/// Row = granted mode, column = requested mode.
fn compatible(held: LockMode, requested: LockMode) -> bool {
    use LockMode::*;
    match held {
        IntentionShared => requested != Exclusive,
        IntentionExclusive => matches!(requested, IntentionShared | IntentionExclusive),
        Shared => matches!(requested, IntentionShared | Shared),
        SharedIntentionExclusive => requested == IntentionShared,
        Exclusive => false,
    }
}

/// The legal upgrade lattice: IS -> {S, X, IX, SIX}; S -> {X, SIX};
/// IX -> {X, SIX}; SIX -> {X}; X -> nothing.
fn can_upgrade(held: LockMode, requested: LockMode) -> bool {
    use LockMode::*;
    matches!(
        (held, requested),
        (
            IntentionShared,
            Shared | Exclusive | IntentionExclusive | SharedIntentionExclusive
        ) | (Shared, Exclusive | SharedIntentionExclusive)
            | (IntentionExclusive, Exclusive | SharedIntentionExclusive)
            | (SharedIntentionExclusive, Exclusive)
    )
}

/// Wait-for graph rebuilt from scratch on every detector scan.
#[derive(Default)]
struct WaitsForGraph {
    edges: BTreeMap<TxnId, Vec<TxnId>>,
}

impl WaitsForGraph {
    fn clear(&mut self) {
        self.edges.clear();
    }

    fn add_edge(&mut self, from: TxnId, to: TxnId) {
        let targets = self.edges.entry(from).or_default();
        if !targets.contains(&to) {
            targets.push(to);
        }
    }

    fn remove_edge(&mut self, from: TxnId, to: TxnId) {
        if let Some(targets) = self.edges.get_mut(&from) {
            targets.retain(|&t| t != to);
        }
    }

    /// Drops every edge into or out of `txn_id`.
    fn remove_incident_edges(&mut self, txn_id: TxnId) {
        self.edges.remove(&txn_id);
        for targets in self.edges.values_mut() {
            targets.retain(|&t| t != txn_id);
        }
    }

    fn edge_list(&self) -> Vec<(TxnId, TxnId)> {
        let mut edges = Vec::new();
        for (&from, targets) in &self.edges {
            for &to in targets {
                edges.push((from, to));
            }
        }
        edges
    }

    /// DFS from each vertex in ascending id order, edge targets visited in
    /// ascending order. Returns the victim of the first cycle found: the
    /// largest transaction id seen along the cycle path.
    fn find_cycle_victim(&self) -> Option<TxnId> {
        for &start in self.edges.keys() {
            let mut visiting = HashSet::new();
            let mut max_txn_id = TxnId::MIN;
            if self.dfs(start, &mut visiting, &mut max_txn_id) {
                return Some(max_txn_id);
            }
        }
        None
    }

    fn dfs(&self, now: TxnId, visiting: &mut HashSet<TxnId>, max_txn_id: &mut TxnId) -> bool {
        visiting.insert(now);
        let targets = match self.edges.get(&now) {
            Some(targets) if !targets.is_empty() => {
                let mut sorted = targets.clone();
                sorted.sort_unstable();
                sorted
            }
            _ => {
                visiting.remove(&now);
                return false;
            }
        };

        for target in targets {
            if visiting.contains(&target) || self.dfs(target, visiting, max_txn_id) {
                *max_txn_id = (*max_txn_id).max(now);
                return true;
            }
        }
        visiting.remove(&now);
        false
    }
}

/// Hierarchical lock manager: table- and row-granularity locks with
/// IS/IX/S/SIX/X modes, isolation-level-aware acquisition and release, and
/// a periodic wait-for-graph deadlock detector.
///
/// Each resource has its own request queue (mutex + condvar); the table and
/// row maps each have a structural mutex. Locks are always taken in
/// map -> queue order, never reversed.
pub struct LockManager {
    table_lock_map: Mutex<HashMap<TableOid, Arc<LockRequestQueue>>>,
    row_lock_map: Mutex<HashMap<RecordId, Arc<LockRequestQueue>>>,
    waits_for: Mutex<WaitsForGraph>,
    cycle_detection_interval: Duration,
    detector_running: AtomicBool,
    detector_handle: Mutex<Option<JoinHandle<()>>>,
}

impl LockManager {
    pub fn new() -> Self {
        Self::with_interval(CYCLE_DETECTION_INTERVAL)
    }

    pub fn with_interval(cycle_detection_interval: Duration) -> Self {
        Self {
            table_lock_map: Mutex::new(HashMap::new()),
            row_lock_map: Mutex::new(HashMap::new()),
            waits_for: Mutex::new(WaitsForGraph::default()),
            cycle_detection_interval,
            detector_running: AtomicBool::new(false),
            detector_handle: Mutex::new(None),
        }
    }

    fn abort(txn: &Transaction, reason: AbortReason) -> TransactionAbort {
        txn.set_state(TransactionState::Aborted);
        debug!("txn {} aborted: {}", txn.id(), reason);
        TransactionAbort {
            txn_id: txn.id(),
            reason,
        }
    }

    /// Shared-phase pre-checks for both granularities.
    fn check_acquirable(
        txn: &Transaction,
        mode: LockMode,
    ) -> Result<(), TransactionAbort> {
        use LockMode::*;

        if txn.isolation_level() == IsolationLevel::ReadUncommitted
            && matches!(mode, Shared | IntentionShared | SharedIntentionExclusive)
        {
            return Err(Self::abort(txn, AbortReason::LockSharedOnReadUncommitted));
        }

        if txn.state() == TransactionState::Shrinking {
            let allowed = match txn.isolation_level() {
                IsolationLevel::RepeatableRead => false,
                IsolationLevel::ReadCommitted => matches!(mode, Shared | IntentionShared),
                IsolationLevel::ReadUncommitted => {
                    !matches!(mode, Exclusive | IntentionExclusive)
                }
            };
            if !allowed {
                return Err(Self::abort(txn, AbortReason::LockOnShrinking));
            }
        }

        Ok(())
    }

    /// Strict-FIFO grant check: every already-granted request must be
    /// compatible with the candidate, and no ungranted request may sit
    /// ahead of it.
    fn grant_lock(queue: &RequestQueue, txn_id: TxnId) -> bool {
        let mode = match queue
            .requests
            .iter()
            .find(|r| r.txn_id() == txn_id)
        {
            Some(request) => request.mode,
            None => return false,
        };

        for request in &queue.requests {
            if request.granted {
                if !compatible(request.mode, mode) {
                    return false;
                }
            } else if request.txn_id() == txn_id {
                return true;
            } else {
                return false;
            }
        }
        false
    }

    /// Acquires a table lock, blocking until granted.
    ///
    /// Returns `Ok(false)` when the waiting transaction was aborted by the
    /// deadlock detector; raises a [`TransactionAbort`] on every pre-check
    /// failure.
    pub fn lock_table(
        &self,
        txn: &Arc<Transaction>,
        mode: LockMode,
        oid: TableOid,
    ) -> Result<bool, TransactionAbort> {
        Self::check_acquirable(txn, mode)?;

        let queue = {
            let mut map = self.table_lock_map.lock();
            Arc::clone(
                map.entry(oid)
                    .or_insert_with(|| Arc::new(LockRequestQueue::new())),
            )
        };

        let mut q = queue.inner.lock();

        if let Some(pos) = q.requests.iter().position(|r| r.txn_id() == txn.id()) {
            let held = q.requests[pos].mode;
            if held == mode {
                return Ok(true);
            }
            if q.upgrading != INVALID_TXN_ID {
                return Err(Self::abort(txn, AbortReason::UpgradeConflict));
            }
            if !can_upgrade(held, mode) {
                return Err(Self::abort(txn, AbortReason::IncompatibleUpgrade));
            }

            // Drop the old request and reinsert just behind the granted
            // prefix; the queue remembers us as the one upgrader.
            q.requests.remove(pos);
            txn.remove_table_lock(held, oid);
            let insert_at = q
                .requests
                .iter()
                .position(|r| !r.granted)
                .unwrap_or(q.requests.len());
            q.requests
                .insert(insert_at, LockRequest::new(Arc::clone(txn), mode));
            q.upgrading = txn.id();

            while !Self::grant_lock(&q, txn.id()) {
                queue.cv.wait(&mut q);
                if txn.state() == TransactionState::Aborted {
                    Self::remove_request(&mut q, txn.id());
                    q.upgrading = INVALID_TXN_ID;
                    drop(q);
                    queue.cv.notify_all();
                    return Ok(false);
                }
            }

            Self::mark_granted(&mut q, txn.id());
            q.upgrading = INVALID_TXN_ID;
            txn.insert_table_lock(mode, oid);
            drop(q);
            queue.cv.notify_all();
            trace!("txn {} upgraded table {} to {:?}", txn.id(), oid, mode);
            return Ok(true);
        }

        q.requests.push_back(LockRequest::new(Arc::clone(txn), mode));

        while !Self::grant_lock(&q, txn.id()) {
            queue.cv.wait(&mut q);
            if txn.state() == TransactionState::Aborted {
                Self::remove_request(&mut q, txn.id());
                drop(q);
                queue.cv.notify_all();
                return Ok(false);
            }
        }

        Self::mark_granted(&mut q, txn.id());
        txn.insert_table_lock(mode, oid);
        drop(q);
        queue.cv.notify_all();
        trace!("txn {} locked table {} in {:?}", txn.id(), oid, mode);
        Ok(true)
    }

    /// Releases a table lock. All row locks under the table must have been
    /// released first.
    pub fn unlock_table(
        &self,
        txn: &Arc<Transaction>,
        oid: TableOid,
    ) -> Result<bool, TransactionAbort> {
        let queue = {
            let map = self.table_lock_map.lock();
            match map.get(&oid) {
                Some(queue) => Arc::clone(queue),
                None => {
                    return Err(Self::abort(txn, AbortReason::AttemptedUnlockButNoLockHeld))
                }
            }
        };

        if txn.holds_row_locks_on(oid) {
            return Err(Self::abort(
                txn,
                AbortReason::TableUnlockedBeforeUnlockingRows,
            ));
        }

        let mut q = queue.inner.lock();
        if let Some(pos) = q
            .requests
            .iter()
            .position(|r| r.txn_id() == txn.id() && r.granted)
        {
            let mode = q.requests[pos].mode;
            self.maybe_enter_shrinking(txn, mode);
            q.requests.remove(pos);
            txn.remove_table_lock(mode, oid);
            drop(q);
            queue.cv.notify_all();
            trace!("txn {} unlocked table {}", txn.id(), oid);
            return Ok(true);
        }

        Err(Self::abort(txn, AbortReason::AttemptedUnlockButNoLockHeld))
    }

    /// Acquires a row lock. Intent modes are rejected; the transaction must
    /// already hold an appropriate table lock.
    pub fn lock_row(
        &self,
        txn: &Arc<Transaction>,
        mode: LockMode,
        oid: TableOid,
        rid: RecordId,
    ) -> Result<bool, TransactionAbort> {
        use LockMode::*;

        if matches!(
            mode,
            IntentionShared | IntentionExclusive | SharedIntentionExclusive
        ) {
            return Err(Self::abort(txn, AbortReason::AttemptedIntentionLockOnRow));
        }

        Self::check_acquirable(txn, mode)?;

        if mode == Shared
            && !txn.is_table_locked_in_any(
                oid,
                &[
                    Shared,
                    Exclusive,
                    IntentionShared,
                    IntentionExclusive,
                    SharedIntentionExclusive,
                ],
            )
        {
            return Err(Self::abort(txn, AbortReason::TableLockNotPresent));
        }

        if mode == Exclusive
            && !txn.is_table_locked_in_any(
                oid,
                &[Exclusive, IntentionExclusive, SharedIntentionExclusive],
            )
        {
            return Err(Self::abort(txn, AbortReason::TableLockNotPresent));
        }

        let queue = {
            let mut map = self.row_lock_map.lock();
            Arc::clone(
                map.entry(rid)
                    .or_insert_with(|| Arc::new(LockRequestQueue::new())),
            )
        };

        let mut q = queue.inner.lock();

        if let Some(pos) = q.requests.iter().position(|r| r.txn_id() == txn.id()) {
            let held = q.requests[pos].mode;
            if held == mode {
                return Ok(true);
            }
            if q.upgrading != INVALID_TXN_ID {
                return Err(Self::abort(txn, AbortReason::UpgradeConflict));
            }
            if !can_upgrade(held, mode) {
                return Err(Self::abort(txn, AbortReason::IncompatibleUpgrade));
            }

            q.requests.remove(pos);
            txn.remove_row_lock(held, oid, rid);
            let insert_at = q
                .requests
                .iter()
                .position(|r| !r.granted)
                .unwrap_or(q.requests.len());
            q.requests
                .insert(insert_at, LockRequest::new(Arc::clone(txn), mode));
            q.upgrading = txn.id();

            while !Self::grant_lock(&q, txn.id()) {
                queue.cv.wait(&mut q);
                if txn.state() == TransactionState::Aborted {
                    Self::remove_request(&mut q, txn.id());
                    q.upgrading = INVALID_TXN_ID;
                    drop(q);
                    queue.cv.notify_all();
                    return Ok(false);
                }
            }

            Self::mark_granted(&mut q, txn.id());
            q.upgrading = INVALID_TXN_ID;
            txn.insert_row_lock(mode, oid, rid);
            drop(q);
            queue.cv.notify_all();
            trace!("txn {} upgraded row {} to {:?}", txn.id(), rid, mode);
            return Ok(true);
        }

        q.requests.push_back(LockRequest::new(Arc::clone(txn), mode));

        while !Self::grant_lock(&q, txn.id()) {
            queue.cv.wait(&mut q);
            if txn.state() == TransactionState::Aborted {
                Self::remove_request(&mut q, txn.id());
                drop(q);
                queue.cv.notify_all();
                return Ok(false);
            }
        }

        Self::mark_granted(&mut q, txn.id());
        txn.insert_row_lock(mode, oid, rid);
        drop(q);
        queue.cv.notify_all();
        trace!("txn {} locked row {} in {:?}", txn.id(), rid, mode);
        Ok(true)
    }

    /// Releases a row lock.
    pub fn unlock_row(
        &self,
        txn: &Arc<Transaction>,
        oid: TableOid,
        rid: RecordId,
    ) -> Result<bool, TransactionAbort> {
        let queue = {
            let map = self.row_lock_map.lock();
            match map.get(&rid) {
                Some(queue) => Arc::clone(queue),
                None => {
                    return Err(Self::abort(txn, AbortReason::AttemptedUnlockButNoLockHeld))
                }
            }
        };

        let mut q = queue.inner.lock();
        if let Some(pos) = q
            .requests
            .iter()
            .position(|r| r.txn_id() == txn.id() && r.granted)
        {
            let mode = q.requests[pos].mode;
            self.maybe_enter_shrinking(txn, mode);
            q.requests.remove(pos);
            txn.remove_row_lock(mode, oid, rid);
            drop(q);
            queue.cv.notify_all();
            trace!("txn {} unlocked row {}", txn.id(), rid);
            return Ok(true);
        }

        Err(Self::abort(txn, AbortReason::AttemptedUnlockButNoLockHeld))
    }

    /// Directly strips every lock the transaction still holds, rows before
    /// tables. Used on commit/abort; performs no isolation bookkeeping.
    pub fn release_all_locks(&self, txn: &Arc<Transaction>) {
        for (mode, oid, rid) in txn.row_lock_snapshot() {
            let queue = self.row_lock_map.lock().get(&rid).cloned();
            if let Some(queue) = queue {
                let mut q = queue.inner.lock();
                if let Some(pos) = q
                    .requests
                    .iter()
                    .position(|r| r.txn_id() == txn.id() && r.granted)
                {
                    q.requests.remove(pos);
                    txn.remove_row_lock(mode, oid, rid);
                }
                drop(q);
                queue.cv.notify_all();
            }
        }
        for (mode, oid) in txn.table_lock_snapshot() {
            let queue = self.table_lock_map.lock().get(&oid).cloned();
            if let Some(queue) = queue {
                let mut q = queue.inner.lock();
                if let Some(pos) = q
                    .requests
                    .iter()
                    .position(|r| r.txn_id() == txn.id() && r.granted)
                {
                    q.requests.remove(pos);
                    txn.remove_table_lock(mode, oid);
                }
                drop(q);
                queue.cv.notify_all();
            }
        }
    }

    fn maybe_enter_shrinking(&self, txn: &Transaction, released: LockMode) {
        let ends_growing = match txn.isolation_level() {
            IsolationLevel::RepeatableRead => {
                matches!(released, LockMode::Shared | LockMode::Exclusive)
            }
            IsolationLevel::ReadCommitted | IsolationLevel::ReadUncommitted => {
                released == LockMode::Exclusive
            }
        };
        if ends_growing
            && !matches!(
                txn.state(),
                TransactionState::Committed | TransactionState::Aborted
            )
        {
            txn.set_state(TransactionState::Shrinking);
        }
    }

    fn remove_request(q: &mut RequestQueue, txn_id: TxnId) {
        if let Some(pos) = q.requests.iter().position(|r| r.txn_id() == txn_id) {
            q.requests.remove(pos);
        }
    }

    fn mark_granted(q: &mut RequestQueue, txn_id: TxnId) {
        if let Some(request) = q.requests.iter_mut().find(|r| r.txn_id() == txn_id) {
            request.granted = true;
        }
    }

    // ------------------------------------------------------------------
    // Deadlock detection
    // ------------------------------------------------------------------

    pub fn add_edge(&self, from: TxnId, to: TxnId) {
        self.waits_for.lock().add_edge(from, to);
    }

    pub fn remove_edge(&self, from: TxnId, to: TxnId) {
        self.waits_for.lock().remove_edge(from, to);
    }

    pub fn edge_list(&self) -> Vec<(TxnId, TxnId)> {
        self.waits_for.lock().edge_list()
    }

    /// Victim of the first cycle in the current graph, if any.
    pub fn find_cycle_victim(&self) -> Option<TxnId> {
        self.waits_for.lock().find_cycle_victim()
    }

    /// One detector scan: rebuild the wait-for graph from every queue,
    /// abort the max-id transaction of each cycle, and wake the queues the
    /// victims were waiting on. Callable directly for deterministic tests.
    pub fn run_cycle_detection_round(&self) {
        let mut graph = self.waits_for.lock();
        graph.clear();

        let mut waiting_on: HashMap<TxnId, Vec<Arc<LockRequestQueue>>> = HashMap::new();
        let mut txns: HashMap<TxnId, Arc<Transaction>> = HashMap::new();

        let table_queues: Vec<Arc<LockRequestQueue>> =
            self.table_lock_map.lock().values().cloned().collect();
        let row_queues: Vec<Arc<LockRequestQueue>> =
            self.row_lock_map.lock().values().cloned().collect();

        for queue in table_queues.iter().chain(row_queues.iter()) {
            let q = queue.inner.lock();
            let mut granted: Vec<TxnId> = Vec::new();
            for request in &q.requests {
                if request.granted {
                    granted.push(request.txn_id());
                } else {
                    for &holder in &granted {
                        graph.add_edge(request.txn_id(), holder);
                    }
                    txns.insert(request.txn_id(), Arc::clone(&request.txn));
                    waiting_on
                        .entry(request.txn_id())
                        .or_default()
                        .push(Arc::clone(queue));
                }
            }
        }

        let mut victims = Vec::new();
        while let Some(victim) = graph.find_cycle_victim() {
            debug!("deadlock: aborting txn {}", victim);
            graph.remove_incident_edges(victim);
            if let Some(txn) = txns.get(&victim) {
                txn.set_state(TransactionState::Aborted);
            }
            victims.push(victim);
        }
        drop(graph);

        // Wake every queue each victim was parked on so it can observe its
        // aborted state and unwind.
        for victim in victims {
            if let Some(queues) = waiting_on.get(&victim) {
                for queue in queues {
                    let q = queue.inner.lock();
                    drop(q);
                    queue.cv.notify_all();
                }
            }
        }
    }

    /// Spawns the background detector thread. It holds only a weak handle,
    /// so dropping the manager (or calling [`Self::stop_cycle_detection`])
    /// shuts it down.
    pub fn start_cycle_detection(self: &Arc<Self>) {
        if self.detector_running.swap(true, Ordering::SeqCst) {
            return;
        }
        let weak: Weak<LockManager> = Arc::downgrade(self);
        let interval = self.cycle_detection_interval;
        let handle = thread::spawn(move || loop {
            thread::sleep(interval);
            match weak.upgrade() {
                Some(lock_manager) => {
                    if !lock_manager.detector_running.load(Ordering::SeqCst) {
                        break;
                    }
                    lock_manager.run_cycle_detection_round();
                }
                None => break,
            }
        });
        *self.detector_handle.lock() = Some(handle);
    }

    pub fn stop_cycle_detection(&self) {
        self.detector_running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.detector_handle.lock().take() {
            let _ = handle.join();
        }
    }
}

impl Default for LockManager {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for LockManager {
    fn drop(&mut self) {
        self.detector_running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.detector_handle.get_mut().take() {
            let _ = handle.join();
        }
    }
}
