//! Transaction lifecycle coordination.
//!
//! ```text
//! ┌─────────┐   begin()    ┌─────────┐  release lock   ┌───────────┐
//! │ (none)  │─────────────▶│ Growing │────────────────▶│ Shrinking │
//! └─────────┘              └────┬────┘                 └─────┬─────┘
//!                               │                            │
//!                     commit() / abort()           commit() / abort()
//!                               │                            │
//!                               ▼                            ▼
//!                     ┌───────────┐                ┌──────────┐
//!                     │ Committed │                │ Aborted  │
//!                     └───────────┘                └──────────┘
//! ```
//!
//! Commit releases every held lock and marks the transaction committed; the
//! writes themselves stay in place. Abort first undoes the transaction's
//! index writes in reverse order, then releases locks.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use quarry_common::TxnId;
use tracing::{debug, warn};

use crate::lock::LockManager;
use crate::transaction::{
    IsolationLevel, Transaction, TransactionError, TransactionState, TxnResult, WriteOp,
};

/// Creates, tracks, and finishes transactions.
pub struct TransactionManager {
    lock_manager: Arc<LockManager>,
    next_txn_id: AtomicU64,
    txn_map: Mutex<HashMap<TxnId, Arc<Transaction>>>,
}

impl TransactionManager {
    /// Creates a transaction manager that releases locks through
    /// `lock_manager`.
    pub fn new(lock_manager: Arc<LockManager>) -> Self {
        Self {
            lock_manager,
            next_txn_id: AtomicU64::new(0),
            txn_map: Mutex::new(HashMap::new()),
        }
    }

    /// Begins a transaction at the given isolation level.
    ///
    /// Ids are handed out monotonically; a larger id means a younger
    /// transaction, which is what deadlock victim selection keys on.
    pub fn begin(&self, isolation_level: IsolationLevel) -> Arc<Transaction> {
        let id = TxnId::new(self.next_txn_id.fetch_add(1, Ordering::Relaxed));
        let txn = Arc::new(Transaction::new(id, isolation_level));
        self.txn_map.lock().insert(id, Arc::clone(&txn));
        debug!(txn = %id, ?isolation_level, "transaction started");
        txn
    }

    /// Looks up a live transaction by id.
    pub fn get_transaction(&self, id: TxnId) -> Option<Arc<Transaction>> {
        self.txn_map.lock().get(&id).cloned()
    }

    /// Commits `txn`: releases every held lock and marks it committed.
    pub fn commit(&self, txn: &Arc<Transaction>) {
        // The write set is only needed for rollback.
        txn.take_index_writes();
        self.lock_manager.unlock_all(txn);
        txn.set_state(TransactionState::Committed);
        self.txn_map.lock().remove(&txn.id());
        debug!(txn = %txn.id(), "transaction committed");
    }

    /// Aborts `txn`: undoes its recorded index writes in reverse order,
    /// releases every held lock, and marks it aborted.
    pub fn abort(&self, txn: &Arc<Transaction>) -> TxnResult<()> {
        let mut undo_error = None;
        let writes = txn.take_index_writes();
        for record in writes.into_iter().rev() {
            let result = match record.op {
                WriteOp::Insert => record.index.remove(record.key).map(|_| ()),
                WriteOp::Delete => record.index.insert(record.key, record.rid).map(|_| ()),
            };
            if let Err(e) = result {
                // Keep unwinding; report the first failure after cleanup.
                warn!(txn = %txn.id(), key = record.key, error = %e, "undo step failed");
                if undo_error.is_none() {
                    undo_error = Some(e.to_string());
                }
            }
        }

        self.lock_manager.unlock_all(txn);
        txn.set_state(TransactionState::Aborted);
        self.txn_map.lock().remove(&txn.id());
        debug!(txn = %txn.id(), "transaction aborted");

        match undo_error {
            None => Ok(()),
            Some(message) => Err(TransactionError::UndoFailed { message }),
        }
    }

    /// Returns the number of live (not yet finished) transactions.
    pub fn active_count(&self) -> usize {
        self.txn_map.lock().len()
    }
}

impl fmt::Debug for TransactionManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransactionManager")
            .field("active", &self.active_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lock::LockMode;
    use crate::transaction::{IndexWriteRecord, WriteOp};
    use quarry_common::{PageId, RecordId, TableOid};
    use quarry_storage::buffer::{BufferPoolConfig, BufferPoolManager};
    use quarry_storage::disk::MemoryDiskManager;
    use quarry_storage::index::{BPlusTree, BPlusTreeConfig};

    fn test_tree() -> Arc<BPlusTree> {
        let bpm = Arc::new(
            BufferPoolManager::new(
                BufferPoolConfig::new(16),
                Arc::new(MemoryDiskManager::new()),
            )
            .unwrap(),
        );
        Arc::new(BPlusTree::new(bpm, BPlusTreeConfig::new(5, 4)).unwrap())
    }

    fn rid(key: i64) -> RecordId {
        RecordId::new(PageId::new(key as u32), key as u32)
    }

    #[test]
    fn test_begin_assigns_monotonic_ids() {
        let tm = TransactionManager::new(Arc::new(LockManager::new()));
        let t0 = tm.begin(IsolationLevel::RepeatableRead);
        let t1 = tm.begin(IsolationLevel::ReadCommitted);
        assert_eq!(t0.id(), TxnId::new(0));
        assert_eq!(t1.id(), TxnId::new(1));
        assert_eq!(tm.active_count(), 2);
        assert!(tm.get_transaction(t0.id()).is_some());
    }

    #[test]
    fn test_commit_releases_locks() {
        let lm = Arc::new(LockManager::new());
        let tm = TransactionManager::new(Arc::clone(&lm));
        let txn = tm.begin(IsolationLevel::RepeatableRead);
        let oid = TableOid::new(1);

        lm.lock_table(&txn, LockMode::Exclusive, oid).unwrap();
        tm.commit(&txn);

        assert_eq!(txn.state(), TransactionState::Committed);
        assert!(!txn.holds_table_lock(oid, LockMode::Exclusive));
        assert_eq!(tm.active_count(), 0);

        // Another transaction can now take the table exclusively.
        let txn2 = tm.begin(IsolationLevel::RepeatableRead);
        lm.lock_table(&txn2, LockMode::Exclusive, oid).unwrap();
    }

    #[test]
    fn test_abort_undoes_index_writes() {
        let lm = Arc::new(LockManager::new());
        let tm = TransactionManager::new(Arc::clone(&lm));
        let tree = test_tree();

        // Seed a committed row.
        tree.insert(1, rid(1)).unwrap();

        let txn = tm.begin(IsolationLevel::RepeatableRead);

        // The transaction inserts key 2 and deletes key 1, recording both.
        tree.insert(2, rid(2)).unwrap();
        txn.record_index_write(IndexWriteRecord {
            key: 2,
            rid: rid(2),
            op: WriteOp::Insert,
            index: Arc::clone(&tree),
        });
        tree.remove(1).unwrap();
        txn.record_index_write(IndexWriteRecord {
            key: 1,
            rid: rid(1),
            op: WriteOp::Delete,
            index: Arc::clone(&tree),
        });

        tm.abort(&txn).unwrap();
        assert_eq!(txn.state(), TransactionState::Aborted);

        // The pre-transaction state is restored.
        assert_eq!(tree.get(1).unwrap(), Some(rid(1)));
        assert_eq!(tree.get(2).unwrap(), None);
    }

    #[test]
    fn test_commit_discards_write_set() {
        let lm = Arc::new(LockManager::new());
        let tm = TransactionManager::new(Arc::clone(&lm));
        let tree = test_tree();

        let txn = tm.begin(IsolationLevel::RepeatableRead);
        tree.insert(7, rid(7)).unwrap();
        txn.record_index_write(IndexWriteRecord {
            key: 7,
            rid: rid(7),
            op: WriteOp::Insert,
            index: Arc::clone(&tree),
        });

        tm.commit(&txn);
        // Committed writes stay.
        assert_eq!(tree.get(7).unwrap(), Some(rid(7)));
    }
}
