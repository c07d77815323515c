//! Transaction recovery support.
//!
//! Provides the `RecoveryTxnTable` for tracking transaction states during WAL replay.
//! This is used during crash recovery to determine which operations should be applied.

use std::collections::HashSet;

use crate::storage::btree::wal::WalRecord;
use crate::txn::{TxnId, TXN_NONE};

/// Transaction table built during WAL recovery.
///
/// Tracks which transactions were committed, aborted, or left pending (incomplete).
/// During recovery, only operations from committed transactions are applied.
///
/// This follows the Write-Ahead Logging protocol:
/// - TxnCommit record: transaction is committed
/// - TxnAbort record: transaction is aborted
/// - No commit/abort record: transaction is treated as aborted (presumed abort)
#[derive(Debug, Clone)]
#[allow(dead_code)]
pub struct RecoveryTxnTable {
    committed: HashSet<TxnId>,
    aborted: HashSet<TxnId>,
    /// Transactions that have started (seen operations) but not yet committed/aborted.
    /// These are considered pending until the end of recovery.
    pending: HashSet<TxnId>,
}

#[allow(dead_code)]
impl RecoveryTxnTable {
    /// Create a new empty transaction table.
    pub fn new() -> Self {
        Self {
            committed: HashSet::new(),
            aborted: HashSet::new(),
            pending: HashSet::new(),
        }
    }

    /// Process a WAL record and update the transaction table.
    ///
    /// This should be called for every record in the WAL during the first pass
    /// of recovery to build the complete transaction state.
    pub fn process_record(&mut self, record: &WalRecord) {
        match record {
            WalRecord::TxnCommit { txn_id, .. } => {
                self.pending.remove(txn_id);
                self.committed.insert(*txn_id);
            }
            WalRecord::TxnAbort { txn_id } => {
                self.pending.remove(txn_id);
                self.aborted.insert(*txn_id);
            }
            WalRecord::Put { txn_id, .. } | WalRecord::Delete { txn_id, .. } => {
                // Track transactions that have operations but no commit/abort yet
                if *txn_id != TXN_NONE && !self.is_finalized(*txn_id) {
                    self.pending.insert(*txn_id);
                }
            }
            WalRecord::Checkpoint { .. } => {
                // Checkpoints don't affect transaction state
            }
        }
    }

    /// Check if a transaction ID is in a finalized state (committed or aborted).
    fn is_finalized(&self, txn_id: TxnId) -> bool {
        self.committed.contains(&txn_id) || self.aborted.contains(&txn_id)
    }

    /// Check if a transaction was committed.
    pub fn is_committed(&self, txn_id: TxnId) -> bool {
        self.committed.contains(&txn_id)
    }

    /// Check if a transaction was aborted.
    pub fn is_aborted(&self, txn_id: TxnId) -> bool {
        self.aborted.contains(&txn_id)
    }

    /// Check if a transaction is pending (has operations but no commit/abort record).
    pub fn is_pending(&self, txn_id: TxnId) -> bool {
        self.pending.contains(&txn_id)
    }

    /// Returns true if the transaction should be treated as aborted.
    ///
    /// A transaction is considered aborted if:
    /// - It has an explicit abort record
    /// - It is pending at the end of recovery (no commit seen)
    /// - It is unknown (never seen during recovery) - treated as aborted for safety
    pub fn should_treat_as_aborted(&self, txn_id: TxnId) -> bool {
        if txn_id == TXN_NONE {
            return false; // Non-transactional operations are never aborted
        }
        // A transaction is treated as aborted if:
        // 1. It has an explicit abort record, OR
        // 2. It is pending (no commit/abort seen), OR
        // 3. It is unknown (not committed, not in our tracking at all)
        !self.is_committed(txn_id)
    }

    /// Determine if a record should be applied during recovery.
    ///
    /// Returns `true` if the operation should be replayed:
    /// - Non-transactional operations (txn_id = TXN_NONE): always apply
    /// - Committed transactions: apply
    /// - Aborted or pending transactions: do not apply
    pub fn should_apply(&self, record: &WalRecord) -> bool {
        let txn_id = match record {
            WalRecord::Put { txn_id, .. } => *txn_id,
            WalRecord::Delete { txn_id, .. } => *txn_id,
            // Transaction marker records are not "applied" to the btree
            WalRecord::TxnCommit { .. } => return false,
            WalRecord::TxnAbort { .. } => return false,
            WalRecord::Checkpoint { .. } => return false,
        };

        // Non-transactional operations are always applied
        if txn_id == TXN_NONE {
            return true;
        }

        // Only apply committed transactions
        self.is_committed(txn_id)
    }

    /// Mark all pending transactions as aborted.
    ///
    /// This should be called at the end of recovery to finalize the state
    /// of any transactions that didn't have a commit/abort record.
    pub fn finalize_pending(&mut self) {
        for txn_id in self.pending.drain() {
            self.aborted.insert(txn_id);
        }
    }

    /// Get the number of committed transactions.
    pub fn committed_count(&self) -> usize {
        self.committed.len()
    }

    /// Get the number of explicitly aborted transactions.
    /// Note: pending transactions are not included until finalized.
    pub fn aborted_count(&self) -> usize {
        self.aborted.len()
    }

    /// Get the number of pending transactions.
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }
}

impl Default for RecoveryTxnTable {
    fn default() -> Self {
        Self::new()
    }
}
