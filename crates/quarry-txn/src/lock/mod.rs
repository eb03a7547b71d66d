//! Hierarchical lock manager.
//!
//! Locks come in five modes at two granularities:
//!
//! - table locks: IS, IX, S, SIX, X
//! - row locks: S, X only
//!
//! # Compatibility matrix
//!
//! ```text
//!         IS   IX   S   SIX   X
//!   IS     ✓    ✓   ✓    ✓    ✗
//!   IX     ✓    ✓   ✗    ✗    ✗
//!   S      ✓    ✗   ✓    ✗    ✗
//!   SIX    ✓    ✗   ✗    ✗    ✗
//!   X      ✗    ✗   ✗    ✗    ✗
//! ```
//!
//! # Upgrade paths
//!
//! IS → {S, X, IX, SIX};  S → {X, SIX};  IX → {X, SIX};  SIX → {X}.
//! A same-mode "upgrade" is a no-op. At most one transaction per resource
//! may have an upgrade in flight; the upgrade request jumps to the front of
//! the waiting section of the queue.
//!
//! # Waiting
//!
//! Each resource has a FIFO request queue with a condition variable. A
//! request is grantable when it is the earliest non-granted request and its
//! mode is compatible with every granted request. Waiters re-check both
//! conditions and their own aborted flag on every wake-up; a waiter that
//! observes itself aborted (the deadlock detector's doing) withdraws its
//! request and fails the lock call.
//!
//! Latch ordering: resource-map latch, then queue latch; the map latch is
//! released before any wait.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::thread::JoinHandle;
use std::time::Duration;

use parking_lot::{Condvar, Mutex, MutexGuard};
use quarry_common::{RecordId, TableOid, TxnId, DEFAULT_CYCLE_DETECTION_INTERVAL_MS};
use tracing::{debug, trace, warn};

use crate::deadlock::WaitForGraph;
use crate::transaction::{
    AbortReason, Transaction, TransactionError, TransactionState, TxnResult,
};

/// Lock mode for a table or row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LockMode {
    /// Intention to take shared row locks below.
    IntentionShared,
    /// Intention to take exclusive row locks below.
    IntentionExclusive,
    /// Shared (read) lock.
    Shared,
    /// Shared lock plus intention to take exclusive row locks.
    SharedIntentionExclusive,
    /// Exclusive (write) lock.
    Exclusive,
}

impl LockMode {
    /// Checks this mode (held) against `other` (requested) in the
    /// compatibility matrix.
    pub fn compatible_with(self, other: LockMode) -> bool {
        use LockMode::*;
        match self {
            IntentionShared => other != Exclusive,
            IntentionExclusive => matches!(other, IntentionShared | IntentionExclusive),
            Shared => matches!(other, IntentionShared | Shared),
            SharedIntentionExclusive => other == IntentionShared,
            Exclusive => false,
        }
    }

    /// Checks whether a held lock in this mode may be upgraded to
    /// `requested`. Same-mode is allowed (and a no-op at the call site).
    pub fn can_upgrade_to(self, requested: LockMode) -> bool {
        use LockMode::*;
        if self == requested {
            return true;
        }
        match self {
            IntentionShared => true,
            Shared | IntentionExclusive => {
                matches!(requested, Exclusive | SharedIntentionExclusive)
            }
            SharedIntentionExclusive => requested == Exclusive,
            Exclusive => false,
        }
    }

    /// Returns true for the modes a row may be locked in.
    pub fn valid_for_row(self) -> bool {
        matches!(self, LockMode::Shared | LockMode::Exclusive)
    }
}

impl fmt::Display for LockMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LockMode::IntentionShared => write!(f, "IS"),
            LockMode::IntentionExclusive => write!(f, "IX"),
            LockMode::Shared => write!(f, "S"),
            LockMode::SharedIntentionExclusive => write!(f, "SIX"),
            LockMode::Exclusive => write!(f, "X"),
        }
    }
}

/// One lock request, granted or waiting, owned by its queue.
///
/// Waiters hold an `Arc` to their own request so wake-ups can check the
/// granted flag without re-finding themselves in the queue.
pub struct LockRequest {
    txn: Arc<Transaction>,
    mode: LockMode,
    oid: TableOid,
    rid: Option<RecordId>,
    granted: AtomicBool,
}

impl LockRequest {
    fn new(txn: Arc<Transaction>, mode: LockMode, oid: TableOid, rid: Option<RecordId>) -> Self {
        Self {
            txn,
            mode,
            oid,
            rid,
            granted: AtomicBool::new(false),
        }
    }

    /// The requesting transaction's id.
    pub fn txn_id(&self) -> TxnId {
        self.txn.id()
    }

    /// The requested mode.
    pub fn mode(&self) -> LockMode {
        self.mode
    }

    /// Whether the request has been granted.
    pub fn is_granted(&self) -> bool {
        self.granted.load(Ordering::Acquire)
    }
}

impl fmt::Debug for LockRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LockRequest")
            .field("txn", &self.txn.id())
            .field("mode", &self.mode)
            .field("oid", &self.oid)
            .field("rid", &self.rid)
            .field("granted", &self.is_granted())
            .finish()
    }
}

/// FIFO queue of requests for one resource.
struct QueueState {
    /// Granted requests first, then waiters in arrival order (upgrades are
    /// inserted at the head of the waiting section).
    requests: Vec<Arc<LockRequest>>,
    /// The single transaction allowed to be upgrading on this resource.
    upgrading: Option<TxnId>,
}

/// A lock request queue: the state plus its condition variable.
pub(crate) struct LockRequestQueue {
    state: Mutex<QueueState>,
    cv: Condvar,
}

impl LockRequestQueue {
    fn new() -> Self {
        Self {
            state: Mutex::new(QueueState {
                requests: Vec::new(),
                upgrading: None,
            }),
            cv: Condvar::new(),
        }
    }

    /// Wakes every waiter on this queue.
    ///
    /// The state mutex is taken and released first: a waiter that has
    /// checked its wake-up condition but not yet parked still holds the
    /// mutex, so acquiring it here guarantees the notify lands after the
    /// park and cannot be lost. The deadlock detector relies on this when
    /// it flips a victim's state from outside the queue protocol.
    pub(crate) fn notify_all(&self) {
        drop(self.state.lock());
        self.cv.notify_all();
    }
}

/// Configuration for the lock manager.
#[derive(Debug, Clone)]
pub struct LockManagerConfig {
    /// Interval between deadlock detection passes.
    pub cycle_detection_interval: Duration,
}

impl Default for LockManagerConfig {
    fn default() -> Self {
        Self {
            cycle_detection_interval: Duration::from_millis(
                DEFAULT_CYCLE_DETECTION_INTERVAL_MS,
            ),
        }
    }
}

/// Multi-granularity lock manager with background deadlock detection.
pub struct LockManager {
    table_lock_map: Mutex<HashMap<TableOid, Arc<LockRequestQueue>>>,
    row_lock_map: Mutex<HashMap<RecordId, Arc<LockRequestQueue>>>,
    config: LockManagerConfig,
    detector_running: AtomicBool,
    detector_handle: Mutex<Option<JoinHandle<()>>>,
}

impl LockManager {
    /// Creates a lock manager with the default configuration.
    pub fn new() -> Self {
        Self::with_config(LockManagerConfig::default())
    }

    /// Creates a lock manager with a custom configuration.
    pub fn with_config(config: LockManagerConfig) -> Self {
        Self {
            table_lock_map: Mutex::new(HashMap::new()),
            row_lock_map: Mutex::new(HashMap::new()),
            config,
            detector_running: AtomicBool::new(false),
            detector_handle: Mutex::new(None),
        }
    }

    // -------------------------------------------------------------------------
    // Table locks
    // -------------------------------------------------------------------------

    /// Acquires `mode` on table `oid` for `txn`, blocking until granted.
    ///
    /// If `txn` already holds a lock on the table this becomes an upgrade.
    /// On a protocol violation the transaction is aborted and the typed
    /// reason is returned.
    pub fn lock_table(&self, txn: &Arc<Transaction>, mode: LockMode, oid: TableOid) -> TxnResult<()> {
        trace!(txn = %txn.id(), %mode, %oid, "lock table");
        self.check_isolation(txn, mode)?;
        let queue = self.table_queue(oid);
        self.acquire(&queue, txn, mode, oid, None)
    }

    /// Releases `txn`'s lock on table `oid`.
    ///
    /// Fails (aborting the transaction) if no lock is held, or if row locks
    /// on this table are still held. Releasing may move the transaction
    /// into its shrinking phase, depending on mode and isolation level.
    pub fn unlock_table(&self, txn: &Arc<Transaction>, oid: TableOid) -> TxnResult<()> {
        trace!(txn = %txn.id(), %oid, "unlock table");
        let queue = self.table_lock_map.lock().get(&oid).cloned();
        let Some(queue) = queue else {
            return Err(self.abort(txn, AbortReason::AttemptedUnlockButNoLockHeld));
        };

        let mut state = queue.state.lock();
        let position = state
            .requests
            .iter()
            .position(|r| r.txn.id() == txn.id() && r.is_granted());
        let Some(position) = position else {
            drop(state);
            return Err(self.abort(txn, AbortReason::AttemptedUnlockButNoLockHeld));
        };
        if txn.holds_row_locks_on_table(oid) {
            drop(state);
            return Err(self.abort(txn, AbortReason::TableUnlockedBeforeUnlockingRows));
        }

        let request = state.requests.remove(position);
        drop(state);
        txn.remove_table_lock(oid, request.mode);
        self.transition_on_unlock(txn, request.mode);
        queue.cv.notify_all();
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Row locks
    // -------------------------------------------------------------------------

    /// Acquires `mode` (S or X only) on row `rid` of table `oid`.
    ///
    /// An X row lock requires the transaction to already hold IX, SIX, or X
    /// on the table.
    pub fn lock_row(
        &self,
        txn: &Arc<Transaction>,
        mode: LockMode,
        oid: TableOid,
        rid: RecordId,
    ) -> TxnResult<()> {
        trace!(txn = %txn.id(), %mode, %oid, %rid, "lock row");
        if !mode.valid_for_row() {
            return Err(self.abort(txn, AbortReason::AttemptedIntentionLockOnRow));
        }
        self.check_isolation(txn, mode)?;
        if mode == LockMode::Exclusive
            && !txn.holds_table_lock_in(
                oid,
                &[
                    LockMode::IntentionExclusive,
                    LockMode::SharedIntentionExclusive,
                    LockMode::Exclusive,
                ],
            )
        {
            return Err(self.abort(txn, AbortReason::TableLockNotPresent));
        }
        let queue = self.row_queue(rid);
        self.acquire(&queue, txn, mode, oid, Some(rid))
    }

    /// Releases `txn`'s lock on row `rid`.
    pub fn unlock_row(
        &self,
        txn: &Arc<Transaction>,
        oid: TableOid,
        rid: RecordId,
    ) -> TxnResult<()> {
        trace!(txn = %txn.id(), %oid, %rid, "unlock row");
        let queue = self.row_lock_map.lock().get(&rid).cloned();
        let Some(queue) = queue else {
            return Err(self.abort(txn, AbortReason::AttemptedUnlockButNoLockHeld));
        };

        let mut state = queue.state.lock();
        let position = state
            .requests
            .iter()
            .position(|r| r.txn.id() == txn.id() && r.is_granted());
        let Some(position) = position else {
            drop(state);
            return Err(self.abort(txn, AbortReason::AttemptedUnlockButNoLockHeld));
        };

        let request = state.requests.remove(position);
        drop(state);
        txn.remove_row_lock(oid, rid, request.mode);
        self.transition_on_unlock(txn, request.mode);
        queue.cv.notify_all();
        Ok(())
    }

    /// Releases every lock a finished transaction still holds, rows before
    /// tables. Performs no phase transitions; the caller has already moved
    /// the transaction to a terminal state (or is about to).
    pub fn unlock_all(&self, txn: &Arc<Transaction>) {
        let (tables, rows) = txn.held_locks();
        for (oid, rid, mode) in rows {
            if let Some(queue) = self.row_lock_map.lock().get(&rid).cloned() {
                self.withdraw(&queue, txn.id());
            }
            txn.remove_row_lock(oid, rid, mode);
        }
        for (oid, mode) in tables {
            if let Some(queue) = self.table_lock_map.lock().get(&oid).cloned() {
                self.withdraw(&queue, txn.id());
            }
            txn.remove_table_lock(oid, mode);
        }
        debug!(txn = %txn.id(), "released all locks");
    }

    // -------------------------------------------------------------------------
    // Deadlock detection
    // -------------------------------------------------------------------------

    /// Starts the background deadlock detector.
    ///
    /// The thread wakes every `cycle_detection_interval`, rebuilds the
    /// wait-for graph, and aborts the youngest transaction on each cycle
    /// until none remain. Stopped by [`stop_deadlock_detection`] or when
    /// the lock manager is dropped.
    ///
    /// [`stop_deadlock_detection`]: Self::stop_deadlock_detection
    pub fn start_deadlock_detection(self: &Arc<Self>) {
        let mut handle = self.detector_handle.lock();
        if handle.is_some() {
            return;
        }
        self.detector_running.store(true, Ordering::Release);
        let weak: Weak<LockManager> = Arc::downgrade(self);
        let interval = self.config.cycle_detection_interval;
        *handle = Some(
            std::thread::Builder::new()
                .name("quarry-deadlock-detector".into())
                .spawn(move || loop {
                    std::thread::sleep(interval);
                    let Some(lock_manager) = weak.upgrade() else {
                        break;
                    };
                    if !lock_manager.detector_running.load(Ordering::Acquire) {
                        break;
                    }
                    lock_manager.run_cycle_detection();
                })
                .expect("failed to spawn deadlock detector"),
        );
        debug!(interval_ms = interval.as_millis() as u64, "deadlock detection started");
    }

    /// Stops and joins the background detector, if running.
    pub fn stop_deadlock_detection(&self) {
        self.detector_running.store(false, Ordering::Release);
        if let Some(handle) = self.detector_handle.lock().take() {
            let _ = handle.join();
        }
    }

    /// Runs deadlock detection to quiescence: rebuilds the wait-for graph,
    /// aborts the youngest transaction on a cycle, wakes its queues, and
    /// repeats until the graph is acyclic.
    pub fn run_cycle_detection(&self) {
        loop {
            let snapshot = self.build_waits_for();
            let Some(victim) = snapshot.graph.find_cycle() else {
                break;
            };
            warn!(victim = %victim, "deadlock detected; aborting youngest transaction on cycle");
            if let Some(txn) = snapshot.txns.get(&victim) {
                txn.set_state(TransactionState::Aborted);
            }
            if let Some(queues) = snapshot.waiting_on.get(&victim) {
                for queue in queues {
                    queue.notify_all();
                }
            }
            // Loop: the rebuilt graph skips aborted waiters, so this
            // terminates once every cycle has lost a member.
        }
    }

    /// Builds the current wait-for graph: an edge from every waiting
    /// transaction to every transaction granted on the same resource.
    ///
    /// Map latches are taken (tables, then rows) only long enough to clone
    /// the queue handles; queue latches are taken one at a time and never
    /// held during cycle search.
    fn build_waits_for(&self) -> WaitsForSnapshot {
        let mut queues: Vec<Arc<LockRequestQueue>> =
            self.table_lock_map.lock().values().cloned().collect();
        queues.extend(self.row_lock_map.lock().values().cloned());

        let mut snapshot = WaitsForSnapshot::default();
        for queue in &queues {
            let state = queue.state.lock();
            let granted: Vec<&Arc<LockRequest>> =
                state.requests.iter().filter(|r| r.is_granted()).collect();
            for waiter in state.requests.iter().filter(|r| !r.is_granted()) {
                // An already-aborted waiter is on its way out; edges from it
                // would re-detect the same cycle forever.
                if waiter.txn.state() == TransactionState::Aborted {
                    continue;
                }
                snapshot
                    .txns
                    .entry(waiter.txn.id())
                    .or_insert_with(|| Arc::clone(&waiter.txn));
                snapshot
                    .waiting_on
                    .entry(waiter.txn.id())
                    .or_default()
                    .push(Arc::clone(queue));
                for holder in &granted {
                    snapshot.graph.add_edge(waiter.txn.id(), holder.txn.id());
                    snapshot
                        .txns
                        .entry(holder.txn.id())
                        .or_insert_with(|| Arc::clone(&holder.txn));
                }
            }
        }
        snapshot
    }

    // -------------------------------------------------------------------------
    // Queue protocol
    // -------------------------------------------------------------------------

    fn table_queue(&self, oid: TableOid) -> Arc<LockRequestQueue> {
        Arc::clone(
            self.table_lock_map
                .lock()
                .entry(oid)
                .or_insert_with(|| Arc::new(LockRequestQueue::new())),
        )
    }

    fn row_queue(&self, rid: RecordId) -> Arc<LockRequestQueue> {
        Arc::clone(
            self.row_lock_map
                .lock()
                .entry(rid)
                .or_insert_with(|| Arc::new(LockRequestQueue::new())),
        )
    }

    /// The common grant path for tables and rows: detect upgrades, enqueue,
    /// wait, record the grant in the transaction's held set.
    fn acquire(
        &self,
        queue: &Arc<LockRequestQueue>,
        txn: &Arc<Transaction>,
        mode: LockMode,
        oid: TableOid,
        rid: Option<RecordId>,
    ) -> TxnResult<()> {
        let mut state = queue.state.lock();

        let existing = state
            .requests
            .iter()
            .position(|r| r.txn.id() == txn.id());
        if let Some(position) = existing {
            let held = state.requests[position].mode;
            debug_assert!(
                state.requests[position].is_granted(),
                "a transaction cannot request while already waiting"
            );
            if held == mode {
                return Ok(());
            }
            if state.upgrading.is_some() {
                drop(state);
                return Err(self.abort(txn, AbortReason::UpgradeConflict));
            }
            if !held.can_upgrade_to(mode) {
                drop(state);
                return Err(self.abort(txn, AbortReason::IncompatibleUpgrade));
            }

            // Drop the old grant and re-enter at the head of the waiting
            // section: upgrades outrank queued fresh requests.
            state.requests.remove(position);
            match rid {
                Some(rid) => txn.remove_row_lock(oid, rid, held),
                None => txn.remove_table_lock(oid, held),
            }

            let request = Arc::new(LockRequest::new(Arc::clone(txn), mode, oid, rid));
            let insert_at = state
                .requests
                .iter()
                .position(|r| !r.is_granted())
                .unwrap_or(state.requests.len());
            state.requests.insert(insert_at, Arc::clone(&request));
            state.upgrading = Some(txn.id());

            let waited = self.wait_for_grant(queue, &mut state, &request, txn);
            state.upgrading = None;
            drop(state);
            queue.cv.notify_all();
            waited?;

            match rid {
                Some(rid) => txn.insert_row_lock(oid, rid, mode),
                None => txn.insert_table_lock(oid, mode),
            }
            debug!(txn = %txn.id(), %mode, %oid, "lock upgraded");
            return Ok(());
        }

        // Fresh request: FIFO tail.
        let request = Arc::new(LockRequest::new(Arc::clone(txn), mode, oid, rid));
        state.requests.push(Arc::clone(&request));

        let waited = self.wait_for_grant(queue, &mut state, &request, txn);
        drop(state);
        if waited.is_err() {
            queue.cv.notify_all();
        }
        waited?;

        match rid {
            Some(rid) => txn.insert_row_lock(oid, rid, mode),
            None => txn.insert_table_lock(oid, mode),
        }
        queue.cv.notify_all();
        Ok(())
    }

    /// Blocks until `request` is grantable, the queue condition variable
    /// signalling retries. Observing the transaction aborted (the deadlock
    /// detector's verdict) withdraws the request and fails.
    fn wait_for_grant(
        &self,
        queue: &LockRequestQueue,
        state: &mut MutexGuard<'_, QueueState>,
        request: &Arc<LockRequest>,
        txn: &Arc<Transaction>,
    ) -> TxnResult<()> {
        loop {
            if txn.state() == TransactionState::Aborted {
                if let Some(position) = state
                    .requests
                    .iter()
                    .position(|r| Arc::ptr_eq(r, request))
                {
                    state.requests.remove(position);
                }
                return Err(TransactionError::Abort {
                    txn_id: txn.id(),
                    reason: AbortReason::DeadlockVictim,
                });
            }
            if Self::grantable(state, request) {
                request.granted.store(true, Ordering::Release);
                return Ok(());
            }
            queue.cv.wait(state);
        }
    }

    /// A request is grantable when it is the earliest non-granted request
    /// in its queue and compatible with every granted request.
    fn grantable(state: &QueueState, request: &Arc<LockRequest>) -> bool {
        for r in &state.requests {
            if Arc::ptr_eq(r, request) {
                return true;
            }
            if r.is_granted() {
                if !r.mode.compatible_with(request.mode) {
                    return false;
                }
            } else {
                // FIFO: an earlier waiter goes first.
                return false;
            }
        }
        // The request was withdrawn; never grant it.
        false
    }

    /// Removes a transaction's granted request from a queue without any
    /// phase bookkeeping. Used by `unlock_all`.
    fn withdraw(&self, queue: &Arc<LockRequestQueue>, txn_id: TxnId) {
        let mut state = queue.state.lock();
        if let Some(position) = state
            .requests
            .iter()
            .position(|r| r.txn.id() == txn_id && r.is_granted())
        {
            state.requests.remove(position);
        }
        drop(state);
        queue.cv.notify_all();
    }

    // -------------------------------------------------------------------------
    // Policy checks
    // -------------------------------------------------------------------------

    /// Isolation-level gating at request time.
    fn check_isolation(&self, txn: &Arc<Transaction>, mode: LockMode) -> TxnResult<()> {
        use crate::transaction::IsolationLevel::*;
        use LockMode::*;
        match txn.isolation_level() {
            RepeatableRead => {
                if txn.state() == TransactionState::Shrinking {
                    return Err(self.abort(txn, AbortReason::LockOnShrinking));
                }
            }
            ReadCommitted => {
                if txn.state() == TransactionState::Shrinking
                    && matches!(mode, Exclusive | IntentionExclusive | SharedIntentionExclusive)
                {
                    return Err(self.abort(txn, AbortReason::LockOnShrinking));
                }
            }
            ReadUncommitted => {
                if matches!(mode, Shared | IntentionShared | SharedIntentionExclusive) {
                    return Err(self.abort(txn, AbortReason::LockSharedOnReadUncommitted));
                }
                if txn.state() == TransactionState::Shrinking {
                    return Err(self.abort(txn, AbortReason::LockOnShrinking));
                }
            }
        }
        Ok(())
    }

    /// Applies the 2PL phase transition after a release.
    fn transition_on_unlock(&self, txn: &Arc<Transaction>, mode: LockMode) {
        use crate::transaction::IsolationLevel::*;
        let shrinks = match txn.isolation_level() {
            RepeatableRead => matches!(mode, LockMode::Shared | LockMode::Exclusive),
            ReadCommitted | ReadUncommitted => mode == LockMode::Exclusive,
        };
        if shrinks && txn.state() == TransactionState::Growing {
            txn.set_state(TransactionState::Shrinking);
            debug!(txn = %txn.id(), "entered shrinking phase");
        }
    }

    /// Marks the transaction aborted and builds the typed error.
    fn abort(&self, txn: &Arc<Transaction>, reason: AbortReason) -> TransactionError {
        txn.set_state(TransactionState::Aborted);
        warn!(txn = %txn.id(), %reason, "transaction aborted");
        TransactionError::Abort {
            txn_id: txn.id(),
            reason,
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
        self.detector_running.store(false, Ordering::Release);
        if let Some(handle) = self.detector_handle.get_mut().take() {
            let _ = handle.join();
        }
    }
}

impl fmt::Debug for LockManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LockManager")
            .field("table_queues", &self.table_lock_map.lock().len())
            .field("row_queues", &self.row_lock_map.lock().len())
            .finish()
    }
}

/// Point-in-time view the detector works from.
#[derive(Default)]
struct WaitsForSnapshot {
    graph: WaitForGraph,
    txns: HashMap<TxnId, Arc<Transaction>>,
    waiting_on: HashMap<TxnId, Vec<Arc<LockRequestQueue>>>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transaction::IsolationLevel;

    fn txn(id: u64) -> Arc<Transaction> {
        Arc::new(Transaction::new(TxnId::new(id), IsolationLevel::RepeatableRead))
    }

    #[test]
    fn test_compatibility_matrix() {
        use LockMode::*;
        let modes = [IntentionShared, IntentionExclusive, Shared, SharedIntentionExclusive, Exclusive];
        let expected = [
            // IS    IX     S     SIX     X
            [true, true, true, true, false],   // IS held
            [true, true, false, false, false], // IX held
            [true, false, true, false, false], // S held
            [true, false, false, false, false], // SIX held
            [false, false, false, false, false], // X held
        ];
        for (i, held) in modes.iter().enumerate() {
            for (j, requested) in modes.iter().enumerate() {
                assert_eq!(
                    held.compatible_with(*requested),
                    expected[i][j],
                    "{held} vs {requested}"
                );
            }
        }
    }

    #[test]
    fn test_upgrade_graph() {
        use LockMode::*;
        assert!(IntentionShared.can_upgrade_to(Shared));
        assert!(IntentionShared.can_upgrade_to(Exclusive));
        assert!(IntentionShared.can_upgrade_to(IntentionExclusive));
        assert!(IntentionShared.can_upgrade_to(SharedIntentionExclusive));
        assert!(Shared.can_upgrade_to(Exclusive));
        assert!(Shared.can_upgrade_to(SharedIntentionExclusive));
        assert!(!Shared.can_upgrade_to(IntentionShared));
        assert!(IntentionExclusive.can_upgrade_to(Exclusive));
        assert!(!IntentionExclusive.can_upgrade_to(Shared));
        assert!(SharedIntentionExclusive.can_upgrade_to(Exclusive));
        assert!(!SharedIntentionExclusive.can_upgrade_to(Shared));
        assert!(!Exclusive.can_upgrade_to(Shared));
        assert!(Exclusive.can_upgrade_to(Exclusive)); // no-op
    }

    #[test]
    fn test_basic_lock_unlock() {
        let lm = LockManager::new();
        let t = txn(1);
        let oid = TableOid::new(1);

        lm.lock_table(&t, LockMode::Shared, oid).unwrap();
        assert!(t.holds_table_lock(oid, LockMode::Shared));
        lm.unlock_table(&t, oid).unwrap();
        assert!(!t.holds_table_lock(oid, LockMode::Shared));
        // Repeatable read: releasing S starts shrinking.
        assert_eq!(t.state(), TransactionState::Shrinking);
    }

    #[test]
    fn test_same_mode_relock_is_noop() {
        let lm = LockManager::new();
        let t = txn(1);
        let oid = TableOid::new(1);

        lm.lock_table(&t, LockMode::IntentionShared, oid).unwrap();
        lm.lock_table(&t, LockMode::IntentionShared, oid).unwrap();
        lm.unlock_table(&t, oid).unwrap();
        // IS release does not shrink under repeatable read.
        assert_eq!(t.state(), TransactionState::Growing);
    }

    #[test]
    fn test_incompatible_upgrade_aborts() {
        let lm = LockManager::new();
        let t = txn(1);
        let oid = TableOid::new(1);

        lm.lock_table(&t, LockMode::Exclusive, oid).unwrap();
        let err = lm.lock_table(&t, LockMode::Shared, oid).unwrap_err();
        assert_eq!(err.abort_reason(), Some(AbortReason::IncompatibleUpgrade));
        assert_eq!(t.state(), TransactionState::Aborted);
    }

    #[test]
    fn test_unlock_without_lock_aborts() {
        let lm = LockManager::new();
        let t = txn(1);
        let err = lm.unlock_table(&t, TableOid::new(5)).unwrap_err();
        assert_eq!(
            err.abort_reason(),
            Some(AbortReason::AttemptedUnlockButNoLockHeld)
        );
    }

    #[test]
    fn test_intention_lock_on_row_aborts() {
        let lm = LockManager::new();
        let t = txn(1);
        let oid = TableOid::new(1);
        let rid = RecordId::new(quarry_common::PageId::new(0), 0);

        let err = lm
            .lock_row(&t, LockMode::IntentionShared, oid, rid)
            .unwrap_err();
        assert_eq!(
            err.abort_reason(),
            Some(AbortReason::AttemptedIntentionLockOnRow)
        );
    }

    #[test]
    fn test_row_x_requires_table_intent() {
        let lm = LockManager::new();
        let oid = TableOid::new(1);
        let rid = RecordId::new(quarry_common::PageId::new(0), 0);

        // Without any table lock: abort.
        let t1 = txn(1);
        let err = lm.lock_row(&t1, LockMode::Exclusive, oid, rid).unwrap_err();
        assert_eq!(err.abort_reason(), Some(AbortReason::TableLockNotPresent));

        // With IX on the table: fine.
        let t2 = txn(2);
        lm.lock_table(&t2, LockMode::IntentionExclusive, oid).unwrap();
        lm.lock_row(&t2, LockMode::Exclusive, oid, rid).unwrap();

        // S row lock never needs the table-side intent.
        let t3 = txn(3);
        let rid2 = RecordId::new(quarry_common::PageId::new(0), 1);
        lm.lock_row(&t3, LockMode::Shared, oid, rid2).unwrap();
    }

    #[test]
    fn test_unlock_table_with_rows_held_aborts() {
        let lm = LockManager::new();
        let t = txn(1);
        let oid = TableOid::new(1);
        let rid = RecordId::new(quarry_common::PageId::new(0), 0);

        lm.lock_table(&t, LockMode::IntentionExclusive, oid).unwrap();
        lm.lock_row(&t, LockMode::Exclusive, oid, rid).unwrap();

        let err = lm.unlock_table(&t, oid).unwrap_err();
        assert_eq!(
            err.abort_reason(),
            Some(AbortReason::TableUnlockedBeforeUnlockingRows)
        );
    }

    #[test]
    fn test_read_uncommitted_rejects_shared() {
        let lm = LockManager::new();
        let t = Arc::new(Transaction::new(
            TxnId::new(1),
            IsolationLevel::ReadUncommitted,
        ));
        let oid = TableOid::new(1);

        for mode in [
            LockMode::Shared,
            LockMode::IntentionShared,
            LockMode::SharedIntentionExclusive,
        ] {
            let t = Arc::new(Transaction::new(
                TxnId::new(10),
                IsolationLevel::ReadUncommitted,
            ));
            let err = lm.lock_table(&t, mode, oid).unwrap_err();
            assert_eq!(
                err.abort_reason(),
                Some(AbortReason::LockSharedOnReadUncommitted)
            );
        }

        // X and IX are fine.
        lm.lock_table(&t, LockMode::IntentionExclusive, oid).unwrap();
    }

    #[test]
    fn test_lock_on_shrinking_aborts() {
        let lm = LockManager::new();
        let oid = TableOid::new(1);

        // Repeatable read: any lock after shrinking begins is rejected.
        let t = txn(1);
        lm.lock_table(&t, LockMode::Shared, oid).unwrap();
        lm.unlock_table(&t, oid).unwrap();
        assert_eq!(t.state(), TransactionState::Shrinking);
        let err = lm.lock_table(&t, LockMode::Shared, oid).unwrap_err();
        assert_eq!(err.abort_reason(), Some(AbortReason::LockOnShrinking));

        // Read committed: S/IS are still allowed while shrinking.
        let t = Arc::new(Transaction::new(
            TxnId::new(2),
            IsolationLevel::ReadCommitted,
        ));
        lm.lock_table(&t, LockMode::Exclusive, oid).unwrap();
        lm.unlock_table(&t, oid).unwrap();
        assert_eq!(t.state(), TransactionState::Shrinking);
        lm.lock_table(&t, LockMode::Shared, oid).unwrap();
        let err = lm
            .lock_table(&t, LockMode::IntentionExclusive, oid)
            .unwrap_err();
        assert_eq!(err.abort_reason(), Some(AbortReason::LockOnShrinking));
    }

    #[test]
    fn test_upgrade_replaces_held_mode() {
        let lm = LockManager::new();
        let t = txn(1);
        let oid = TableOid::new(1);

        lm.lock_table(&t, LockMode::IntentionShared, oid).unwrap();
        lm.lock_table(&t, LockMode::Shared, oid).unwrap();
        assert!(t.holds_table_lock(oid, LockMode::Shared));
        assert!(!t.holds_table_lock(oid, LockMode::IntentionShared));
    }
}
