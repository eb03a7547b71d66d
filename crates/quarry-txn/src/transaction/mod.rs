//! Transaction state, isolation levels, and write sets.
//!
//! A [`Transaction`] is a handle shared between the executor driving it,
//! the lock manager, and the deadlock detector. Most of it is mutated only
//! by the owning executor thread; the `state` field is atomic because the
//! deadlock detector may flip it to `Aborted` from its own thread.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use quarry_common::{RecordId, TableOid, TxnId};
use quarry_storage::index::BPlusTree;
use thiserror::Error;

use crate::lock::LockMode;

/// Result type for transaction operations.
pub type TxnResult<T> = Result<T, TransactionError>;

/// Isolation level of a transaction, fixed at `begin`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IsolationLevel {
    /// Serializable two-phase locking minus range locks.
    RepeatableRead,
    /// Read locks are released early; only writes are held to commit.
    ReadCommitted,
    /// No read locks at all. Executors must not request shared locks.
    ReadUncommitted,
}

/// Two-phase-locking lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum TransactionState {
    /// May acquire locks.
    Growing = 0,
    /// Has released a lock; may only release from here on.
    Shrinking = 1,
    /// Finished successfully.
    Committed = 2,
    /// Rolled back, by its executor or by the deadlock detector.
    Aborted = 3,
}

impl TransactionState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => TransactionState::Growing,
            1 => TransactionState::Shrinking,
            2 => TransactionState::Committed,
            _ => TransactionState::Aborted,
        }
    }
}

impl fmt::Display for TransactionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransactionState::Growing => write!(f, "Growing"),
            TransactionState::Shrinking => write!(f, "Shrinking"),
            TransactionState::Committed => write!(f, "Committed"),
            TransactionState::Aborted => write!(f, "Aborted"),
        }
    }
}

/// Why a transaction was aborted by the lock manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AbortReason {
    /// A lock was requested while the transaction was shrinking.
    LockOnShrinking,
    /// A shared-flavored lock was requested under Read Uncommitted.
    LockSharedOnReadUncommitted,
    /// Another transaction is already upgrading on this resource.
    UpgradeConflict,
    /// The requested upgrade is not on the allowed upgrade paths.
    IncompatibleUpgrade,
    /// An intention mode was requested on a row.
    AttemptedIntentionLockOnRow,
    /// A row X-lock was requested without IX/SIX/X on the table.
    TableLockNotPresent,
    /// A table was unlocked while row locks on it were still held.
    TableUnlockedBeforeUnlockingRows,
    /// An unlock was requested for a lock that is not held.
    AttemptedUnlockButNoLockHeld,
    /// The deadlock detector chose this transaction as the victim.
    DeadlockVictim,
}

impl fmt::Display for AbortReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            AbortReason::LockOnShrinking => "lock requested in shrinking phase",
            AbortReason::LockSharedOnReadUncommitted => {
                "shared lock requested under read uncommitted"
            }
            AbortReason::UpgradeConflict => "another upgrade is already in flight",
            AbortReason::IncompatibleUpgrade => "upgrade path not allowed",
            AbortReason::AttemptedIntentionLockOnRow => "intention lock requested on a row",
            AbortReason::TableLockNotPresent => "row lock without matching table lock",
            AbortReason::TableUnlockedBeforeUnlockingRows => {
                "table unlocked while row locks remain"
            }
            AbortReason::AttemptedUnlockButNoLockHeld => "unlock without a held lock",
            AbortReason::DeadlockVictim => "chosen as deadlock victim",
        };
        f.write_str(text)
    }
}

/// Errors surfaced by the transaction layer.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransactionError {
    /// The transaction was aborted; the executor must roll it back.
    #[error("transaction {txn_id} aborted: {reason}")]
    Abort {
        /// Which transaction.
        txn_id: TxnId,
        /// Why it was aborted.
        reason: AbortReason,
    },

    /// Rolling back the write set failed.
    #[error("rollback failed: {message}")]
    UndoFailed {
        /// Description of the underlying storage failure.
        message: String,
    },
}

impl TransactionError {
    /// Returns the abort reason, if this is an abort.
    pub fn abort_reason(&self) -> Option<AbortReason> {
        match self {
            TransactionError::Abort { reason, .. } => Some(*reason),
            TransactionError::UndoFailed { .. } => None,
        }
    }
}

/// Kind of an index write, for undo.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOp {
    /// The key was inserted; undo deletes it.
    Insert,
    /// The key was deleted; undo re-inserts it.
    Delete,
}

/// One index modification recorded for rollback.
///
/// The record carries its target tree so the transaction manager can undo
/// without consulting a catalog.
#[derive(Clone)]
pub struct IndexWriteRecord {
    /// The key that was written.
    pub key: i64,
    /// The record the key mapped to.
    pub rid: RecordId,
    /// Insert or delete.
    pub op: WriteOp,
    /// The tree the write went to.
    pub index: Arc<BPlusTree>,
}

impl fmt::Debug for IndexWriteRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IndexWriteRecord")
            .field("key", &self.key)
            .field("rid", &self.rid)
            .field("op", &self.op)
            .finish()
    }
}

/// Held locks, bucketed by mode the way the lock manager grants them.
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

    fn row_set(&mut self, mode: LockMode) -> &mut HashMap<TableOid, HashSet<RecordId>> {
        match mode {
            LockMode::Shared => &mut self.shared_rows,
            LockMode::Exclusive => &mut self.exclusive_rows,
            _ => unreachable!("row locks are only S or X"),
        }
    }
}

/// A transaction handle.
pub struct Transaction {
    id: TxnId,
    isolation_level: IsolationLevel,
    state: AtomicU8,
    locks: Mutex<LockSets>,
    index_writes: Mutex<Vec<IndexWriteRecord>>,
}

impl Transaction {
    /// Creates a transaction in the `Growing` state.
    pub fn new(id: TxnId, isolation_level: IsolationLevel) -> Self {
        Self {
            id,
            isolation_level,
            state: AtomicU8::new(TransactionState::Growing as u8),
            locks: Mutex::new(LockSets::default()),
            index_writes: Mutex::new(Vec::new()),
        }
    }

    /// Returns the transaction id.
    #[inline]
    pub fn id(&self) -> TxnId {
        self.id
    }

    /// Returns the isolation level.
    #[inline]
    pub fn isolation_level(&self) -> IsolationLevel {
        self.isolation_level
    }

    /// Returns the current lifecycle state.
    #[inline]
    pub fn state(&self) -> TransactionState {
        TransactionState::from_u8(self.state.load(Ordering::Relaxed))
    }

    /// Overwrites the lifecycle state.
    ///
    /// Called by the owning executor, the transaction manager, and (for
    /// `Aborted` only) the deadlock detector.
    #[inline]
    pub fn set_state(&self, state: TransactionState) {
        self.state.store(state as u8, Ordering::Relaxed);
    }

    // -------------------------------------------------------------------------
    // Held-lock bookkeeping (called by the lock manager with the grant)
    // -------------------------------------------------------------------------

    /// Records a granted table lock.
    pub fn insert_table_lock(&self, oid: TableOid, mode: LockMode) {
        self.locks.lock().table_set(mode).insert(oid);
    }

    /// Forgets a released table lock.
    pub fn remove_table_lock(&self, oid: TableOid, mode: LockMode) {
        self.locks.lock().table_set(mode).remove(&oid);
    }

    /// Records a granted row lock.
    pub fn insert_row_lock(&self, oid: TableOid, rid: RecordId, mode: LockMode) {
        self.locks.lock().row_set(mode).entry(oid).or_default().insert(rid);
    }

    /// Forgets a released row lock.
    pub fn remove_row_lock(&self, oid: TableOid, rid: RecordId, mode: LockMode) {
        let mut locks = self.locks.lock();
        let rows_by_table = locks.row_set(mode);
        if let Some(rows) = rows_by_table.get_mut(&oid) {
            rows.remove(&rid);
            if rows.is_empty() {
                rows_by_table.remove(&oid);
            }
        }
    }

    /// Returns true if this transaction holds `oid` in `mode`.
    pub fn holds_table_lock(&self, oid: TableOid, mode: LockMode) -> bool {
        self.locks.lock().table_set(mode).contains(&oid)
    }

    /// Returns true if this transaction holds `oid` in any of `modes`.
    pub fn holds_table_lock_in(&self, oid: TableOid, modes: &[LockMode]) -> bool {
        modes.iter().any(|&mode| self.holds_table_lock(oid, mode))
    }

    /// Returns true if this transaction holds `rid` in `mode`.
    pub fn holds_row_lock(&self, oid: TableOid, rid: RecordId, mode: LockMode) -> bool {
        self.locks
            .lock()
            .row_set(mode)
            .get(&oid)
            .is_some_and(|rows| rows.contains(&rid))
    }

    /// Returns true if any row lock on `oid` is still held.
    pub fn holds_row_locks_on_table(&self, oid: TableOid) -> bool {
        let mut locks = self.locks.lock();
        let shared = locks
            .row_set(LockMode::Shared)
            .get(&oid)
            .is_some_and(|rows| !rows.is_empty());
        let exclusive = locks
            .row_set(LockMode::Exclusive)
            .get(&oid)
            .is_some_and(|rows| !rows.is_empty());
        shared || exclusive
    }

    /// Snapshots every held lock: `(tables, rows)`.
    pub fn held_locks(&self) -> (Vec<(TableOid, LockMode)>, Vec<(TableOid, RecordId, LockMode)>) {
        let mut locks = self.locks.lock();
        let mut tables = Vec::new();
        for mode in [
            LockMode::IntentionShared,
            LockMode::IntentionExclusive,
            LockMode::Shared,
            LockMode::SharedIntentionExclusive,
            LockMode::Exclusive,
        ] {
            for &oid in locks.table_set(mode).iter() {
                tables.push((oid, mode));
            }
        }
        let mut rows = Vec::new();
        for mode in [LockMode::Shared, LockMode::Exclusive] {
            for (&oid, rids) in locks.row_set(mode).iter() {
                for &rid in rids {
                    rows.push((oid, rid, mode));
                }
            }
        }
        (tables, rows)
    }

    // -------------------------------------------------------------------------
    // Write sets
    // -------------------------------------------------------------------------

    /// Appends an index write to the undo log.
    pub fn record_index_write(&self, record: IndexWriteRecord) {
        self.index_writes.lock().push(record);
    }

    /// Drains the recorded index writes, oldest first.
    pub fn take_index_writes(&self) -> Vec<IndexWriteRecord> {
        std::mem::take(&mut *self.index_writes.lock())
    }
}

impl fmt::Debug for Transaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transaction")
            .field("id", &self.id)
            .field("isolation", &self.isolation_level)
            .field("state", &self.state())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quarry_common::PageId;

    #[test]
    fn test_state_machine_storage() {
        let txn = Transaction::new(TxnId::new(1), IsolationLevel::RepeatableRead);
        assert_eq!(txn.state(), TransactionState::Growing);
        txn.set_state(TransactionState::Shrinking);
        assert_eq!(txn.state(), TransactionState::Shrinking);
        txn.set_state(TransactionState::Aborted);
        assert_eq!(txn.state(), TransactionState::Aborted);
    }

    #[test]
    fn test_table_lock_bookkeeping() {
        let txn = Transaction::new(TxnId::new(1), IsolationLevel::RepeatableRead);
        let oid = TableOid::new(3);

        txn.insert_table_lock(oid, LockMode::IntentionShared);
        assert!(txn.holds_table_lock(oid, LockMode::IntentionShared));
        assert!(!txn.holds_table_lock(oid, LockMode::Shared));
        assert!(txn.holds_table_lock_in(
            oid,
            &[LockMode::IntentionShared, LockMode::Exclusive]
        ));

        txn.remove_table_lock(oid, LockMode::IntentionShared);
        assert!(!txn.holds_table_lock(oid, LockMode::IntentionShared));
    }

    #[test]
    fn test_row_lock_bookkeeping() {
        let txn = Transaction::new(TxnId::new(1), IsolationLevel::RepeatableRead);
        let oid = TableOid::new(3);
        let rid = RecordId::new(PageId::new(1), 4);

        txn.insert_row_lock(oid, rid, LockMode::Exclusive);
        assert!(txn.holds_row_lock(oid, rid, LockMode::Exclusive));
        assert!(txn.holds_row_locks_on_table(oid));

        txn.remove_row_lock(oid, rid, LockMode::Exclusive);
        assert!(!txn.holds_row_locks_on_table(oid));
    }

    #[test]
    fn test_held_locks_snapshot() {
        let txn = Transaction::new(TxnId::new(1), IsolationLevel::RepeatableRead);
        let oid = TableOid::new(1);
        let rid = RecordId::new(PageId::new(2), 0);

        txn.insert_table_lock(oid, LockMode::IntentionExclusive);
        txn.insert_row_lock(oid, rid, LockMode::Exclusive);

        let (tables, rows) = txn.held_locks();
        assert_eq!(tables, vec![(oid, LockMode::IntentionExclusive)]);
        assert_eq!(rows, vec![(oid, rid, LockMode::Exclusive)]);
    }

    #[test]
    fn test_abort_reason_display() {
        assert_eq!(
            AbortReason::UpgradeConflict.to_string(),
            "another upgrade is already in flight"
        );
        let err = TransactionError::Abort {
            txn_id: TxnId::new(9),
            reason: AbortReason::DeadlockVictim,
        };
        assert_eq!(err.abort_reason(), Some(AbortReason::DeadlockVictim));
        assert!(err.to_string().contains("chosen as deadlock victim"));
    }
}
