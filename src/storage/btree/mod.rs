use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

pub mod page;
mod pager;
mod page_cache;
mod layout;
mod iter;

pub use iter::BTreeRangeIter;

use layout::{
    build_internal_page, internal_entries, leaf_entries, map_internal_err, map_leaf_err, page_type,
    split_internal_entries, split_leaf_entries, PageType,
};
use self::pager::{BTreeStore, Pager, PinnedPageMut};
use crate::core::errors::{StorageError, WrongoDBError};
use crate::storage::block::file::NONE_BLOCK_ID;
use crate::txn::snapshot::Snapshot;
use crate::txn::update::{Update, UpdateChain, UpdateType};
use crate::txn::{GlobalTxnState, TxnId, TXN_NONE};
use page::{InternalPage, LeafPage, LeafPageError};

// Type aliases for B-tree operations to clarify intent and reduce complexity

/// Represents a key in the B-tree (stored as bytes)
type Key = Vec<u8>;

/// Represents a value in the B-tree (stored as bytes)
type Value = Vec<u8>;

/// A key-value pair for leaf node entries
type KeyValuePair = (Key, Value);

/// A key-child ID pair for internal node separators
type KeyChildId = (Key, u64);

/// Collection of key-value pairs from a leaf page
type LeafEntries = Vec<KeyValuePair>;

/// Internal page entries: (first_child_id, separators as key-child pairs)
type InternalEntries = (u64, Vec<KeyChildId>);

/// Iterator over key-value pairs, yielding results or errors
type KeyValueIter<'a> = BTreeRangeIter<'a>;

/// Per-key in-memory version chains, backed by the table's shared transaction state.
///
/// This sits on top of the committed, on-disk B+tree: reads consult the chain first
/// (for a visible in-flight or not-yet-checkpointed write) before falling back to disk.
#[derive(Debug)]
struct MvccState {
    global: Arc<GlobalTxnState>,
    chains: HashMap<Vec<u8>, UpdateChain>,
}

impl MvccState {
    fn new(global: Arc<GlobalTxnState>) -> Self {
        Self {
            global,
            chains: HashMap::new(),
        }
    }

    fn chain(&self, key: &[u8]) -> Option<&UpdateChain> {
        self.chains.get(key)
    }

    fn chain_mut_or_create(&mut self, key: &[u8]) -> &mut UpdateChain {
        self.chains.entry(key.to_vec()).or_default()
    }

    fn keys(&self) -> Vec<Vec<u8>> {
        self.chains.keys().cloned().collect()
    }

    /// Run garbage collection on all update chains.
    /// Returns (chains_cleaned, updates_removed, chains_dropped).
    fn run_gc(&mut self) -> (usize, usize, usize) {
        let threshold = self.global.oldest_active_txn_id();
        let mut chains_cleaned = 0;
        let mut updates_removed = 0;
        let mut keys_to_remove = Vec::new();

        for (key, chain) in self.chains.iter_mut() {
            let removed = chain.truncate_obsolete(threshold);
            if removed > 0 {
                chains_cleaned += 1;
                updates_removed += removed;
            }
            if chain.is_empty() {
                keys_to_remove.push(key.clone());
            }
        }

        let chains_dropped = keys_to_remove.len();
        for key in keys_to_remove {
            self.chains.remove(&key);
        }

        (chains_cleaned, updates_removed, chains_dropped)
    }
}

#[derive(Debug)]
pub struct BTree {
    pager: Box<dyn BTreeStore>,
    mvcc: MvccState,
}

impl BTree {
    pub fn create<P: AsRef<Path>>(
        path: P,
        page_size: usize,
        global_txn: Arc<GlobalTxnState>,
    ) -> Result<Self, WrongoDBError> {
        let mut pager = Pager::create(path, page_size)?;
        init_root_if_missing(&mut pager)?;
        pager.checkpoint()?;
        Ok(Self {
            pager: Box::new(pager),
            mvcc: MvccState::new(global_txn),
        })
    }

    pub fn open<P: AsRef<Path>>(path: P, global_txn: Arc<GlobalTxnState>) -> Result<Self, WrongoDBError> {
        let mut pager = Pager::open(path)?;
        init_root_if_missing(&mut pager)?;
        Ok(Self {
            pager: Box::new(pager),
            mvcc: MvccState::new(global_txn),
        })
    }

    pub fn get(&mut self, key: &[u8]) -> Result<Option<Vec<u8>>, WrongoDBError> {
        let mut node_id = self.pager.root_page_id();
        if node_id == NONE_BLOCK_ID {
            return Ok(None);
        }

        loop {
            let mut page = self.pager.pin_page(node_id)?;
            let page_id = page.page_id();
            let page_type = match page_type(page.payload()) {
                Ok(t) => t,
                Err(e) => {
                    self.pager.unpin_page(page_id);
                    return Err(e);
                }
            };
            match page_type {
                PageType::Leaf => {
                    let leaf = match LeafPage::open(page.payload_mut()) {
                        Ok(leaf) => leaf,
                        Err(e) => {
                            self.pager.unpin_page(page_id);
                            return Err(StorageError(format!("corrupt leaf {node_id}: {e}")).into());
                        }
                    };
                    let result = leaf.get(key).map_err(map_leaf_err);
                    self.pager.unpin_page(page_id);
                    return result;
                }
                PageType::Internal => {
                    let internal = match InternalPage::open(page.payload_mut()) {
                        Ok(internal) => internal,
                        Err(e) => {
                            self.pager.unpin_page(page_id);
                            return Err(
                                StorageError(format!("corrupt internal {node_id}: {e}")).into(),
                            );
                        }
                    };
                    node_id = match internal
                        .child_for_key(key)
                        .map_err(|e| StorageError(format!("routing failed at {node_id}: {e}")))
                    {
                        Ok(id) => id,
                        Err(e) => {
                            self.pager.unpin_page(page_id);
                            return Err(e.into());
                        }
                    };
                    self.pager.unpin_page(page_id);
                }
            }
        }
    }

    pub fn put(&mut self, key: &[u8], value: &[u8]) -> Result<(), WrongoDBError> {
        let root = self.pager.root_page_id();
        if root == NONE_BLOCK_ID {
            return Err(StorageError("btree missing root".into()).into());
        }

        let result = self.insert_recursive(root, key, value)?;
        if let Some(split) = result.split {
            let payload_len = self.pager.page_payload_len();
            let mut root_internal_bytes = vec![0u8; payload_len];
            {
                let mut internal =
                    InternalPage::init(&mut root_internal_bytes, result.new_node_id)
                        .map_err(|e| StorageError(format!("init new root internal failed: {e}")))?;
                internal
                    .put_separator(&split.sep_key, split.right_child)
                    .map_err(map_internal_err)?;
            }

            let new_root_id = self.pager.write_new_page(&root_internal_bytes)?;
            self.pager.set_root_page_id(new_root_id)?;
        } else {
            self.pager.set_root_page_id(result.new_node_id)?;
        }

        if self.pager.checkpoint_requested() {
            self.checkpoint()?;
        }

        Ok(())
    }

    pub fn delete(&mut self, key: &[u8]) -> Result<bool, WrongoDBError> {
        let root = self.pager.root_page_id();
        if root == NONE_BLOCK_ID {
            return Ok(false);
        }

        let result = self.delete_recursive(root, key)?;
        self.pager.set_root_page_id(result.new_node_id)?;

        if self.pager.checkpoint_requested() {
            self.checkpoint()?;
        }

        Ok(result.deleted)
    }

    /// Request automatic checkpointing after N updates.
    pub fn request_checkpoint_after_updates(&mut self, count: usize) {
        self.pager.request_checkpoint_after_updates(count);
    }

    pub fn sync_all(&mut self) -> Result<(), WrongoDBError> {
        self.pager.sync_all()
    }

    /// Explicitly checkpoint the committed B+tree (flush dirty pages, swap root).
    pub fn checkpoint(&mut self) -> Result<(), WrongoDBError> {
        let root = self.pager.checkpoint_prepare();
        self.pager.checkpoint_flush_data()?;
        self.pager.checkpoint_commit(root)?;
        Ok(())
    }

    pub fn range(
        &mut self,
        start: Option<&[u8]>,
        end: Option<&[u8]>,
    ) -> Result<KeyValueIter<'_>, WrongoDBError> {
        let root = self.pager.root_page_id();
        if root == NONE_BLOCK_ID {
            return Ok(BTreeRangeIter::empty());
        }
        BTreeRangeIter::new(self.pager.as_mut(), root, start, end)
    }

    // ==========================================================================
    // MVCC operations
    // ==========================================================================

    /// Read a key as seen by `txn_id`: check the in-memory version chain first
    /// (reconstructing a fresh snapshot from the shared transaction state), then
    /// fall back to the last checkpointed value on disk.
    pub fn get_version(&mut self, key: &[u8], txn_id: TxnId) -> Result<Option<Vec<u8>>, WrongoDBError> {
        if txn_id != TXN_NONE {
            let snapshot = self.mvcc.global.take_snapshot(txn_id);
            if let Some(chain) = self.mvcc.chain(key) {
                if let Some(update) = chain.find_visible_snapshot(&snapshot) {
                    return match update.type_ {
                        UpdateType::Standard => Ok(Some(update.data.clone())),
                        UpdateType::Tombstone | UpdateType::Reserve => Ok(None),
                    };
                }
            }
        }
        self.get(key)
    }

    pub fn put_version(&mut self, key: &[u8], value: &[u8], txn_id: TxnId) -> Result<(), WrongoDBError> {
        let chain = self.mvcc.chain_mut_or_create(key);
        if let Some(head) = chain.head_mut() {
            head.mark_stopped(txn_id);
        }
        chain.prepend(Update::new(txn_id, UpdateType::Standard, value.to_vec()));
        Ok(())
    }

    pub fn delete_version(&mut self, key: &[u8], txn_id: TxnId) -> Result<bool, WrongoDBError> {
        let chain = self.mvcc.chain_mut_or_create(key);
        if let Some(head) = chain.head_mut() {
            head.mark_stopped(txn_id);
        }
        chain.prepend(Update::new(txn_id, UpdateType::Tombstone, Vec::new()));
        Ok(true)
    }

    /// Keys that have pending (not yet checkpointed) version-chain entries within `[start, end)`.
    /// Used to merge in-flight writes with committed, on-disk range scans.
    pub fn mvcc_keys_in_range(&self, start: Option<&[u8]>, end: Option<&[u8]>) -> Vec<Vec<u8>> {
        self.mvcc
            .keys()
            .into_iter()
            .filter(|k| {
                start.map(|s| k.as_slice() >= s).unwrap_or(true)
                    && end.map(|e| k.as_slice() < e).unwrap_or(true)
            })
            .collect()
    }

    pub fn checkpoint_snapshot(&self) -> Snapshot {
        self.mvcc.global.checkpoint_snapshot()
    }

    /// Materialize every version-chain update visible under `snapshot` into the committed
    /// B+tree, checkpoint the pager, then garbage-collect chain entries older than the
    /// oldest still-active transaction.
    pub fn checkpoint_with_snapshot(&mut self, snapshot: &Snapshot) -> Result<(), WrongoDBError> {
        for key in self.mvcc.keys() {
            let materialize = self
                .mvcc
                .chain(&key)
                .and_then(|chain| chain.find_visible_snapshot(snapshot))
                .map(|update| (update.type_, update.data.clone()));
            match materialize {
                Some((UpdateType::Standard, data)) => self.put(&key, &data)?,
                Some((UpdateType::Tombstone, _)) | Some((UpdateType::Reserve, _)) => {
                    let _ = self.delete(&key)?;
                }
                None => {}
            }
        }
        self.checkpoint()?;
        self.mvcc.run_gc();
        Ok(())
    }

    pub fn mark_updates_committed(&mut self, txn_id: TxnId) -> Result<(), WrongoDBError> {
        for chain in self.mvcc.chains.values_mut() {
            if let Some(head) = chain.head_mut() {
                if head.txn_id == txn_id {
                    head.mark_committed();
                }
            }
        }
        Ok(())
    }

    pub fn mark_updates_aborted(&mut self, txn_id: TxnId) -> Result<(), WrongoDBError> {
        for chain in self.mvcc.chains.values_mut() {
            chain.mark_aborted(txn_id);
        }
        Ok(())
    }

    #[allow(dead_code)]
    pub fn run_gc(&mut self) -> (usize, usize, usize) {
        self.mvcc.run_gc()
    }

    /// Delete a key from the subtree rooted at `node_id`.
    ///
    /// Returns:
    /// - `Ok(DeleteResult)` with the new subtree root id and a flag indicating deletion.
    ///   No merge/borrow is performed; empty pages may remain.
    fn delete_recursive(&mut self, node_id: u64, key: &[u8]) -> Result<DeleteResult, WrongoDBError> {
        let mut page = self.pager.pin_page_mut(node_id)?;
        let page_type = match page_type(page.payload()) {
            Ok(t) => t,
            Err(e) => {
                if let Err(unpin_err) = self.pager.unpin_page_mut_abort(page) {
                    return Err(unpin_err);
                }
                return Err(e);
            }
        };
        let result = match page_type {
            PageType::Leaf => self.delete_from_leaf(node_id, &mut page, key),
            PageType::Internal => self.delete_from_internal(&mut page, key),
        };
        match result {
            Ok(ok) => {
                self.pager.unpin_page_mut_commit(page)?;
                Ok(ok)
            }
            Err(err) => {
                if let Err(unpin_err) = self.pager.unpin_page_mut_abort(page) {
                    return Err(unpin_err);
                }
                Err(err)
            }
        }
    }

    fn delete_from_leaf(
        &mut self,
        _node_id: u64,
        page: &mut PinnedPageMut,
        key: &[u8],
    ) -> Result<DeleteResult, WrongoDBError> {
        let page_id = page.page_id();
        let deleted = {
            let mut leaf = LeafPage::open(page.payload_mut())
                .map_err(|e| StorageError(format!("corrupt leaf {page_id}: {e}")))?;
            leaf.delete(key).map_err(map_leaf_err)?
        };

        Ok(DeleteResult {
            new_node_id: page_id,
            deleted,
        })
    }

    fn delete_from_internal(
        &mut self,
        page: &mut PinnedPageMut,
        key: &[u8],
    ) -> Result<DeleteResult, WrongoDBError> {
        let payload_len = page.payload().len();
        let page_id = page.page_id();
        let (mut first_child, mut entries) = internal_entries(page.payload_mut())?;
        let child_idx = child_index_for_key(&entries, key);
        let child_id = if child_idx == 0 {
            first_child
        } else {
            entries[child_idx - 1].1
        };

        let child_result = self.delete_recursive(child_id, key)?;
        if child_idx == 0 {
            first_child = child_result.new_node_id;
        } else {
            entries[child_idx - 1].1 = child_result.new_node_id;
        }

        let bytes = build_internal_page(first_child, &entries, payload_len)?;
        page.payload_mut().copy_from_slice(&bytes);

        Ok(DeleteResult {
            new_node_id: page_id,
            deleted: child_result.deleted,
        })
    }

    /// Insert into the subtree rooted at `node_id`.
    ///
    /// Returns:
    /// - `Ok(InsertResult)` with the new subtree root id and an optional split.
    ///   If `split` is `Some`, the caller must insert `(split.sep_key -> split.right_child)`
    ///   into its parent, and `new_node_id` is the left sibling's id.
    ///
    /// Separator invariant: for any split producing left+right siblings, `sep_key` is the
    /// minimum key in the right sibling.
    fn insert_recursive(
        &mut self,
        node_id: u64,
        key: &[u8],
        value: &[u8],
    ) -> Result<InsertResult, WrongoDBError> {
        let mut page = self.pager.pin_page_mut(node_id)?;
        let page_type = match page_type(page.payload()) {
            Ok(t) => t,
            Err(e) => {
                if let Err(unpin_err) = self.pager.unpin_page_mut_abort(page) {
                    return Err(unpin_err);
                }
                return Err(e);
            }
        };
        let result = match page_type {
            PageType::Leaf => self.insert_into_leaf(node_id, &mut page, key, value),
            PageType::Internal => self.insert_into_internal(node_id, &mut page, key, value),
        };
        match result {
            Ok(ok) => {
                self.pager.unpin_page_mut_commit(page)?;
                Ok(ok)
            }
            Err(err) => {
                if let Err(unpin_err) = self.pager.unpin_page_mut_abort(page) {
                    return Err(unpin_err);
                }
                Err(err)
            }
        }
    }

    /// Insert into a leaf page, splitting if it overflows.
    fn insert_into_leaf(
        &mut self,
        node_id: u64,
        page: &mut PinnedPageMut,
        key: &[u8],
        value: &[u8],
    ) -> Result<InsertResult, WrongoDBError> {
        let payload_len = page.payload().len();
        let page_id = page.page_id();
        {
            let mut leaf = LeafPage::open(page.payload_mut())
                .map_err(|e| StorageError(format!("corrupt leaf {node_id}: {e}")))?;
            match leaf.put(key, value) {
                Ok(()) => {
                    return Ok(InsertResult {
                        new_node_id: page_id,
                        split: None,
                    });
                }
                Err(LeafPageError::PageFull) => { /* split below */ }
                Err(e) => return Err(map_leaf_err(e)),
            }
        }

        let mut entries = leaf_entries(page.payload_mut())?;
        upsert_entry(&mut entries, key, value);
        let (left_bytes, right_bytes, split_key, _split_idx) = split_leaf_entries(&entries, payload_len)?;

        let right_leaf_id = self.pager.write_new_page(&right_bytes)?;

        page.payload_mut().copy_from_slice(&left_bytes);
        Ok(InsertResult {
            new_node_id: page_id,
            split: Some(SplitInfo {
                sep_key: split_key,
                right_child: right_leaf_id,
            }),
        })
    }

    /// Insert into an internal page, routing to the right child and splitting if it overflows.
    fn insert_into_internal(
        &mut self,
        _node_id: u64,
        page: &mut PinnedPageMut,
        key: &[u8],
        value: &[u8],
    ) -> Result<InsertResult, WrongoDBError> {
        let payload_len = page.payload().len();
        let page_id = page.page_id();
        let (mut first_child, mut entries) = internal_entries(page.payload_mut())?;
        let child_idx = child_index_for_key(&entries, key);
        let child_id = if child_idx == 0 {
            first_child
        } else {
            entries[child_idx - 1].1
        };

        let child_result = self.insert_recursive(child_id, key, value)?;
        if child_idx == 0 {
            first_child = child_result.new_node_id;
        } else {
            entries[child_idx - 1].1 = child_result.new_node_id;
        }

        if let Some(split) = child_result.split {
            upsert_internal_entry(&mut entries, &split.sep_key, split.right_child);
        }

        if let Ok(bytes) = build_internal_page(first_child, &entries, payload_len) {
            page.payload_mut().copy_from_slice(&bytes);
            return Ok(InsertResult {
                new_node_id: page_id,
                split: None,
            });
        }

        let (left_bytes, right_bytes, promoted_key, _left_first_child, _left_separators, _promote_idx) =
            split_internal_entries(first_child, &entries, payload_len)?;

        let right_internal_id = self.pager.write_new_page(&right_bytes)?;

        page.payload_mut().copy_from_slice(&left_bytes);
        Ok(InsertResult {
            new_node_id: page_id,
            split: Some(SplitInfo {
                sep_key: promoted_key,
                right_child: right_internal_id,
            }),
        })
    }
}

#[derive(Debug, Clone)]
/// A split propagated upward during recursive insert.
///
/// The caller must insert `sep_key -> right_child` into its internal page.
/// `sep_key` is the minimum key in `right_child` (the new right sibling).
struct SplitInfo {
    sep_key: Vec<u8>,
    right_child: u64,
}

#[derive(Debug, Clone)]
struct InsertResult {
    new_node_id: u64,
    split: Option<SplitInfo>,
}

#[derive(Debug, Clone)]
struct DeleteResult {
    new_node_id: u64,
    deleted: bool,
}

fn init_root_if_missing(pager: &mut dyn BTreeStore) -> Result<(), WrongoDBError> {
    if pager.root_page_id() != NONE_BLOCK_ID {
        return Ok(());
    }
    let payload_len = pager.page_payload_len();
    let mut leaf_bytes = vec![0u8; payload_len];
    LeafPage::init(&mut leaf_bytes).map_err(map_leaf_err)?;
    let leaf_id = pager.write_new_page(&leaf_bytes)?;
    pager.set_root_page_id(leaf_id)?;
    Ok(())
}

fn upsert_entry(entries: &mut Vec<(Vec<u8>, Vec<u8>)>, key: &[u8], value: &[u8]) {
    match entries.binary_search_by(|(k, _)| k.as_slice().cmp(key)) {
        Ok(i) => entries[i].1 = value.to_vec(),
        Err(i) => entries.insert(i, (key.to_vec(), value.to_vec())),
    }
}

fn upsert_internal_entry(entries: &mut Vec<(Vec<u8>, u64)>, key: &[u8], child: u64) {
    match entries.binary_search_by(|(k, _)| k.as_slice().cmp(key)) {
        Ok(i) => entries[i].1 = child,
        Err(i) => entries.insert(i, (key.to_vec(), child)),
    }
}

fn child_index_for_key(entries: &[(Vec<u8>, u64)], key: &[u8]) -> usize {
    let mut idx = 0;
    for (i, (sep_key, _)) in entries.iter().enumerate() {
        if key < sep_key.as_slice() {
            break;
        }
        idx = i + 1;
    }
    idx
}
