use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::index::IndexCatalog;
use crate::storage::btree::BTree;
use crate::txn::snapshot::Snapshot;
use crate::txn::{GlobalTxnState, TxnId};
use crate::WrongoDBError;

/// A low-level storage table, wrapping a BTree.
///
/// This provides a byte-oriented interface for storage operations.
/// It does not know about BSON or Documents.
#[derive(Debug)]
pub struct Table {
    btree: BTree,
    index_catalog: Option<IndexCatalog>,
    uri: String,
    global_txn: Arc<GlobalTxnState>,
    wal_enabled: bool,
    may_have_keys: AtomicBool,
    /// Set once a mutation partially applied (e.g. primary write succeeded
    /// but a secondary index update failed) and cleared only on reopen.
    /// Every mutating method checks this first so the table stops silently
    /// drifting out of sync with its indexes.
    fatal: AtomicBool,
}

impl Table {
    pub fn open_or_create_primary<P: AsRef<Path>>(
        collection: &str,
        db_dir: P,
        wal_enabled: bool,
        global_txn: Arc<GlobalTxnState>,
    ) -> Result<Self, WrongoDBError> {
        let db_dir = db_dir.as_ref();
        let path = db_dir.join(format!("{}.main.wt", collection));
        let uri = format!("table:{}", collection);
        let existed = path.exists();
        let btree = if existed {
            BTree::open(&path, global_txn.clone())?
        } else {
            BTree::create(&path, 4096, global_txn.clone())?
        };
        let index_catalog =
            IndexCatalog::load_or_init(collection, db_dir, wal_enabled, global_txn.clone())?;
        Ok(Self {
            btree,
            index_catalog: Some(index_catalog),
            uri,
            global_txn,
            wal_enabled,
            may_have_keys: AtomicBool::new(existed),
            fatal: AtomicBool::new(false),
        })
    }

    pub fn open_or_create_index<P: AsRef<Path>>(
        path: P,
        wal_enabled: bool,
        global_txn: Arc<GlobalTxnState>,
    ) -> Result<Self, WrongoDBError> {
        let path = path.as_ref();
        let uri = format!(
            "index-table:{}",
            path.file_name().and_then(|n| n.to_str()).unwrap_or("")
        );
        let existed = path.exists();
        let btree = if existed {
            BTree::open(path, global_txn.clone())?
        } else {
            BTree::create(path, 4096, global_txn.clone())?
        };
        Ok(Self {
            btree,
            index_catalog: None,
            uri,
            global_txn,
            wal_enabled,
            may_have_keys: AtomicBool::new(existed),
            fatal: AtomicBool::new(false),
        })
    }

    pub fn index_catalog(&self) -> Option<&IndexCatalog> {
        self.index_catalog.as_ref()
    }

    pub fn index_catalog_mut(&mut self) -> Option<&mut IndexCatalog> {
        self.index_catalog.as_mut()
    }

    /// Cheap hint for whether this table might already contain committed
    /// keys, used by callers to skip a duplicate-key read on a fresh table.
    pub fn base_may_have_keys(&self) -> bool {
        self.may_have_keys.load(Ordering::Relaxed)
    }

    /// Marks the table fatal after a partial write (e.g. the primary store
    /// committed but an index update failed). Once set, every mutating
    /// method refuses until the table is reopened.
    pub fn mark_fatal(&self, reason: impl Into<String>) {
        self.fatal.store(true, Ordering::SeqCst);
        tracing::error!(uri = %self.uri, reason = %reason.into(), "table marked fatal");
    }

    pub fn is_fatal(&self) -> bool {
        self.fatal.load(Ordering::SeqCst)
    }

    fn check_fatal(&self) -> Result<(), WrongoDBError> {
        if self.is_fatal() {
            return Err(WrongoDBError::Fatal(format!(
                "table {} is unusable after a prior partial write",
                self.uri
            )));
        }
        Ok(())
    }

    pub fn scan_range(
        &mut self,
        start_key: Option<&[u8]>,
        end_key: Option<&[u8]>,
        txn_id: TxnId,
    ) -> Result<Vec<(Vec<u8>, Vec<u8>)>, WrongoDBError> {
        let entries = self
            .btree
            .range(start_key, end_key)
            .map_err(|e| crate::core::errors::StorageError(format!("table scan failed: {e}")))?
            .collect::<Result<Vec<_>, _>>()?;

        let mut keys: Vec<Vec<u8>> = entries.into_iter().map(|(key, _)| key.to_vec()).collect();
        keys.extend(self.btree.mvcc_keys_in_range(start_key, end_key));
        keys.sort();
        keys.dedup();

        let mut out = Vec::new();
        for key in keys {
            if let Some(bytes) = self.btree.get_version(&key, txn_id)? {
                out.push((key, bytes));
            }
        }

        Ok(out)
    }

    pub fn checkpoint(&mut self) -> Result<(), WrongoDBError> {
        let snapshot = self.btree.checkpoint_snapshot();
        self.checkpoint_with_snapshot(&snapshot)
    }

    pub fn checkpoint_with_snapshot(&mut self, snapshot: &Snapshot) -> Result<(), WrongoDBError> {
        self.btree.checkpoint_with_snapshot(snapshot)?;
        if let Some(catalog) = self.index_catalog.as_mut() {
            catalog.checkpoint_with_snapshot(snapshot)?;
        }
        Ok(())
    }

    pub(crate) fn apply_recovery_put(&mut self, key: &[u8], value: &[u8]) -> Result<(), WrongoDBError> {
        self.btree.put(key, value)
    }

    pub(crate) fn apply_recovery_delete(&mut self, key: &[u8]) -> Result<(), WrongoDBError> {
        let _ = self.btree.delete(key)?;
        Ok(())
    }

    // ==========================================================================
    // MVCC operations
    // ==========================================================================

    pub fn mark_updates_committed(&mut self, txn_id: TxnId) -> Result<(), WrongoDBError> {
        self.btree.mark_updates_committed(txn_id)
    }

    pub fn mark_updates_aborted(&mut self, txn_id: TxnId) -> Result<(), WrongoDBError> {
        self.btree.mark_updates_aborted(txn_id)
    }

    /// Insert a new key, failing if it is already visible to `txn_id`.
    pub fn insert_mvcc_if_absent(
        &mut self,
        key: &[u8],
        value: &[u8],
        txn_id: TxnId,
    ) -> Result<bool, WrongoDBError> {
        self.check_fatal()?;
        if self.btree.get_version(key, txn_id)?.is_some() {
            return Ok(false);
        }
        self.queue_put(key, value, txn_id);
        self.btree.put_version(key, value, txn_id)?;
        self.may_have_keys.store(true, Ordering::Relaxed);
        Ok(true)
    }

    pub fn update_mvcc(&mut self, key: &[u8], value: &[u8], txn_id: TxnId) -> Result<bool, WrongoDBError> {
        self.check_fatal()?;
        if self.btree.get_version(key, txn_id)?.is_none() {
            return Ok(false);
        }
        self.queue_put(key, value, txn_id);
        self.btree.put_version(key, value, txn_id)?;
        Ok(true)
    }

    pub fn delete_mvcc(&mut self, key: &[u8], txn_id: TxnId) -> Result<bool, WrongoDBError> {
        self.check_fatal()?;
        if self.btree.get_version(key, txn_id)?.is_none() {
            return Ok(false);
        }
        self.queue_delete(key, txn_id);
        self.btree.delete_version(key, txn_id)?;
        Ok(true)
    }

    pub fn get_version(&mut self, key: &[u8], txn_id: TxnId) -> Result<Option<Vec<u8>>, WrongoDBError> {
        self.btree.get_version(key, txn_id)
    }

    #[allow(dead_code)]
    pub fn run_gc(&mut self) -> (usize, usize, usize) {
        let (chains, updates, dropped) = self.btree.run_gc();
        if let Some(catalog) = self.index_catalog.as_mut() {
            let (idx_chains, idx_updates, idx_dropped) = catalog.run_gc();
            return (
                chains + idx_chains,
                updates + idx_updates,
                dropped + idx_dropped,
            );
        }
        (chains, updates, dropped)
    }

    // ==========================================================================
    // Raw (non-versioned) operations, used by secondary indexes.
    // ==========================================================================

    pub fn insert_raw(&mut self, key: &[u8], value: &[u8]) -> Result<(), WrongoDBError> {
        self.check_fatal()?;
        self.btree.put(key, value)?;
        self.may_have_keys.store(true, Ordering::Relaxed);
        Ok(())
    }

    pub fn delete_raw(&mut self, key: &[u8]) -> Result<(), WrongoDBError> {
        self.check_fatal()?;
        let _ = self.btree.delete(key)?;
        Ok(())
    }

    fn queue_put(&self, key: &[u8], value: &[u8], txn_id: TxnId) {
        if self.wal_enabled {
            self.global_txn.queue_put(txn_id, &self.uri, key, value);
        }
    }

    fn queue_delete(&self, key: &[u8], txn_id: TxnId) {
        if self.wal_enabled {
            self.global_txn.queue_delete(txn_id, &self.uri, key);
        }
    }
}
