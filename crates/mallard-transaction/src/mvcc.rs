//! MVCC (Multi-Version Concurrency Control) transactions

use mallard_common::{Error, Result};
use parking_lot::Mutex;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

pub type TransactionId = u64;
pub type Timestamp = u64;

/// Transaction ids are issued from here upward so that an uncommitted
/// version number is always larger than every start time.
pub const TRANSACTION_ID_START: TransactionId = 1 << 62;

/// State of a transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    Active,
    Committed,
    Aborted,
}

/// Storage that keeps per-vector version chains for a transaction.
///
/// A transaction registers one undo entry per (storage, vector) node it
/// creates and drives the node's lifecycle through this trait on commit,
/// rollback and garbage collection.
pub trait VersionedStorage: Send + Sync {
    /// Stamps the node of `transaction_id` with its commit id.
    fn commit_update(
        &self,
        vector_index: usize,
        transaction_id: TransactionId,
        commit_id: Timestamp,
    ) -> Result<()>;

    /// Restores the pre-update values and discards the node.
    fn rollback_update(&self, vector_index: usize, transaction_id: TransactionId) -> Result<()>;

    /// Discards a committed node that no active transaction can need.
    fn cleanup_update(&self, vector_index: usize, transaction_id: TransactionId) -> Result<()>;
}

/// One node registered in a transaction's undo list
#[derive(Clone)]
pub struct UndoEntry {
    pub target: Arc<dyn VersionedStorage>,
    pub vector_index: usize,
}

impl fmt::Debug for UndoEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UndoEntry")
            .field("vector_index", &self.vector_index)
            .finish()
    }
}

/// A transaction in the MVCC system
pub struct Transaction {
    /// Unique transaction ID, doubles as the version of uncommitted writes
    pub transaction_id: TransactionId,
    /// Logical time at which the transaction started
    pub start_time: Timestamp,
    /// Commit timestamp (0 if not committed)
    commit_id: AtomicU64,
    state: Mutex<TransactionState>,
    undo: Mutex<Vec<UndoEntry>>,
}

impl Transaction {
    pub fn new(transaction_id: TransactionId, start_time: Timestamp) -> Self {
        Transaction {
            transaction_id,
            start_time,
            commit_id: AtomicU64::new(0),
            state: Mutex::new(TransactionState::Active),
            undo: Mutex::new(Vec::new()),
        }
    }

    /// Whether a version stamped `version_number` belongs to this snapshot:
    /// either committed before this transaction started or written by it.
    pub fn can_see(&self, version_number: u64) -> bool {
        version_number <= self.start_time || version_number == self.transaction_id
    }

    /// Records a freshly created update node for commit/rollback.
    pub fn register_update(&self, target: Arc<dyn VersionedStorage>, vector_index: usize) {
        self.undo.lock().push(UndoEntry {
            target,
            vector_index,
        });
    }

    /// Number of update nodes this transaction owns
    pub fn undo_count(&self) -> usize {
        self.undo.lock().len()
    }

    pub(crate) fn take_undo(&self) -> Vec<UndoEntry> {
        std::mem::take(&mut *self.undo.lock())
    }

    pub(crate) fn undo_entries(&self) -> Vec<UndoEntry> {
        self.undo.lock().clone()
    }

    pub fn state(&self) -> TransactionState {
        *self.state.lock()
    }

    /// Check if transaction is active
    pub fn is_active(&self) -> bool {
        self.state() == TransactionState::Active
    }

    /// Check if transaction is committed
    pub fn is_committed(&self) -> bool {
        self.state() == TransactionState::Committed
    }

    /// Get commit timestamp (None if not committed)
    pub fn commit_id(&self) -> Option<Timestamp> {
        match self.commit_id.load(Ordering::Acquire) {
            0 => None,
            id => Some(id),
        }
    }

    /// Marks the transaction committed at `commit_id`.
    pub(crate) fn mark_committed(&self, commit_id: Timestamp) -> Result<()> {
        let mut state = self.state.lock();
        if *state != TransactionState::Active {
            return Err(Error::TransactionAborted(
                "Cannot commit non-active transaction".to_string(),
            ));
        }
        self.commit_id.store(commit_id, Ordering::Release);
        *state = TransactionState::Committed;
        Ok(())
    }

    pub(crate) fn mark_aborted(&self) -> Result<()> {
        let mut state = self.state.lock();
        if *state != TransactionState::Active {
            return Err(Error::TransactionAborted(
                "Cannot roll back non-active transaction".to_string(),
            ));
        }
        *state = TransactionState::Aborted;
        Ok(())
    }
}

impl fmt::Debug for Transaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transaction")
            .field("transaction_id", &self.transaction_id)
            .field("start_time", &self.start_time)
            .field("commit_id", &self.commit_id())
            .field("state", &self.state())
            .finish()
    }
}
