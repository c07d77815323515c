use std::fs;
use std::path::Path;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::core::bson::{decode_document, encode_document};
use crate::core::errors::StorageError;
use crate::{Connection, ConnectionConfig, Document, Session, WrongoDBError};

use super::catalog::{CollectionOptions, DatabaseCatalog};
use super::collection::{Collection, IndexInfo, UpdateResult};

/// Configuration for opening a WrongoDB database.
#[derive(Debug, Clone)]
pub struct WrongoDBConfig {
    /// Enable WAL for durability (default: true)
    pub wal_enabled: bool,
    /// WAL sync interval in milliseconds.
    /// - 0 = sync on every commit
    /// - N > 0 = at most one sync every N ms (group sync)
    pub wal_sync_interval_ms: u64,
    /// Enable collection of lock wait/hold counters.
    pub lock_stats_enabled: bool,
}

impl Default for WrongoDBConfig {
    fn default() -> Self {
        Self {
            wal_enabled: true,
            wal_sync_interval_ms: 100,
            lock_stats_enabled: false,
        }
    }
}

impl WrongoDBConfig {
    /// Create a new config with defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Enable or disable WAL (default: true).
    pub fn wal_enabled(mut self, enabled: bool) -> Self {
        self.wal_enabled = enabled;
        self
    }

    pub fn wal_sync_interval_ms(mut self, interval_ms: u64) -> Self {
        self.wal_sync_interval_ms = interval_ms;
        self
    }

    pub fn wal_sync_immediate(mut self) -> Self {
        self.wal_sync_interval_ms = 0;
        self
    }

    pub fn lock_stats_enabled(mut self, enabled: bool) -> Self {
        self.lock_stats_enabled = enabled;
        self
    }
}

/// Database statistics
#[derive(Debug, Clone)]
pub struct DbStats {
    pub collection_count: usize,
    pub document_count: usize,
    pub index_count: usize,
}

#[derive(Debug)]
pub struct WrongoDB {
    connection: Connection,
    catalog: Arc<RwLock<DatabaseCatalog>>,
}

/// How `WrongoDB::import` reconciles a collection's existing contents with
/// the documents being imported.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImportMode {
    /// Clear the collection before inserting the imported documents.
    Replace,
    /// Insert the imported documents alongside whatever is already there.
    Merge,
}

/// Sidecar written alongside an `export`, recording which collections (and
/// in what order) the `.bson` files in the same directory belong to.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct ExportManifest {
    collections: Vec<String>,
}

impl WrongoDB {
    /// Open a database with the given configuration.
    pub fn open_with_config<P>(path: P, config: WrongoDBConfig) -> Result<Self, WrongoDBError>
    where
        P: AsRef<Path>,
    {
        let base_path = path.as_ref();
        fs::create_dir_all(base_path)?;
        let conn = Connection::open(
            base_path,
            ConnectionConfig {
                wal_enabled: config.wal_enabled,
                wal_sync_interval_ms: config.wal_sync_interval_ms,
                lock_stats_enabled: config.lock_stats_enabled,
            },
        )?;
        let catalog = DatabaseCatalog::load_or_init(base_path)?;
        Ok(Self {
            connection: conn,
            catalog: Arc::new(RwLock::new(catalog)),
        })
    }

    /// Open a database with default settings.
    ///
    /// WAL is enabled by default.
    pub fn open<P>(path: P) -> Result<Self, WrongoDBError>
    where
        P: AsRef<Path>,
    {
        Self::open_with_config(path, WrongoDBConfig::default())
    }

    pub fn open_session(&self) -> Session {
        self.connection.open_session()
    }

    /// Hand back a handle to a collection, registering it in the database
    /// catalog with default (uncompressed) options on first use.
    pub fn collection(&self, name: &str) -> Collection {
        let _ = self.catalog.write().register(name, CollectionOptions::default());
        let compressed = self.catalog.read().options(name).compressed;
        Collection::new_with_options(name, compressed)
    }

    /// Register a collection explicitly, choosing its creation options
    /// (currently just `compressed`) up front rather than accepting the
    /// defaults `collection()` would register on first use.
    pub fn create_collection(&self, name: &str, options: CollectionOptions) -> Result<Collection, WrongoDBError> {
        self.catalog.write().register(name, options)?;
        Ok(Collection::new_with_options(name, options.compressed))
    }

    pub fn list_collections(&self) -> Result<Vec<String>, WrongoDBError> {
        Ok(self.catalog.read().collection_names())
    }

    pub fn stats(&self) -> Result<DbStats, WrongoDBError> {
        let collections = self.list_collections()?;
        let mut document_count = 0usize;
        let mut index_count = 0usize;

        for name in &collections {
            let coll = self.collection(name);
            let mut session = self.open_session();
            document_count += coll.count(&mut session, None)?;
            let indexes = coll.list_indexes(&mut session)?;
            index_count += indexes.len();
        }

        Ok(DbStats {
            collection_count: collections.len(),
            document_count,
            index_count,
        })
    }

    pub fn base_path(&self) -> &Path {
        self.connection.base_path()
    }

    /// Convenience wrappers used by the wire-protocol command handlers, each
    /// opening a fresh auto-commit session for a single collection operation.
    pub fn insert_one_doc_into(&self, coll: &str, doc: Document) -> Result<Document, WrongoDBError> {
        let mut session = self.open_session();
        self.collection(coll).insert_one(&mut session, Value::Object(doc))
    }

    pub fn find_in(&self, coll: &str, filter: Option<Value>) -> Result<Vec<Document>, WrongoDBError> {
        let mut session = self.open_session();
        self.collection(coll).find(&mut session, filter)
    }

    pub fn update_one_in(
        &self,
        coll: &str,
        filter: Option<Value>,
        update: Value,
    ) -> Result<UpdateResult, WrongoDBError> {
        let mut session = self.open_session();
        self.collection(coll).update_one(&mut session, filter, update)
    }

    pub fn update_many_in(
        &self,
        coll: &str,
        filter: Option<Value>,
        update: Value,
    ) -> Result<UpdateResult, WrongoDBError> {
        let mut session = self.open_session();
        self.collection(coll).update_many(&mut session, filter, update)
    }

    pub fn delete_one_in(&self, coll: &str, filter: Option<Value>) -> Result<usize, WrongoDBError> {
        let mut session = self.open_session();
        self.collection(coll).delete_one(&mut session, filter)
    }

    pub fn delete_many_in(&self, coll: &str, filter: Option<Value>) -> Result<usize, WrongoDBError> {
        let mut session = self.open_session();
        self.collection(coll).delete_many(&mut session, filter)
    }

    pub fn list_indexes_in(&self, coll: &str) -> Result<Vec<IndexInfo>, WrongoDBError> {
        let mut session = self.open_session();
        self.collection(coll).list_indexes(&mut session)
    }

    pub fn create_index_in(&self, coll: &str, field: &str) -> Result<(), WrongoDBError> {
        let mut session = self.open_session();
        self.collection(coll).create_index(&mut session, field)?;
        self.sync_index_catalog(coll)
    }

    pub fn create_index_in_with_kind(
        &self,
        coll: &str,
        field: &str,
        kind: crate::index::IndexKind,
    ) -> Result<(), WrongoDBError> {
        let mut session = self.open_session();
        self.collection(coll)
            .create_index_with_kind(&mut session, field, kind)?;
        self.sync_index_catalog(coll)
    }

    pub fn drop_index_in(&self, coll: &str, field: &str) -> Result<(), WrongoDBError> {
        let mut session = self.open_session();
        self.collection(coll).drop_index(&mut session, field)?;
        self.sync_index_catalog(coll)
    }

    pub fn rebuild_index_in(&self, coll: &str, field: &str) -> Result<(), WrongoDBError> {
        let mut session = self.open_session();
        self.collection(coll).rebuild_index(&mut session, field)
    }

    /// Refresh the top-level catalog's index summary for `coll` after a
    /// create/drop so `meta.json` doesn't drift from the collection's
    /// actual index set.
    fn sync_index_catalog(&self, coll: &str) -> Result<(), WrongoDBError> {
        let mut session = self.open_session();
        let indexes = self.collection(coll).list_indexes(&mut session)?;
        let kinds = indexes.into_iter().map(|info| (info.field, info.kind)).collect();
        self.catalog.write().set_indexes(coll, kinds)
    }

    pub fn checkpoint_in(&self, coll: &str) -> Result<(), WrongoDBError> {
        let mut session = self.open_session();
        self.collection(coll).checkpoint(&mut session)
    }

    /// Dump `collections` (or every collection if `None`) under `dir`: one
    /// `{name}.bson` file per collection holding its documents as
    /// length-prefixed BSON records, plus a `meta.json` sidecar recording
    /// which collections and in what order, so `import` can replay them
    /// without guessing from the directory listing.
    pub fn export(&self, dir: &Path, collections: Option<&[String]>) -> Result<(), WrongoDBError> {
        fs::create_dir_all(dir)?;
        let names = match collections {
            Some(names) => names.to_vec(),
            None => self.list_collections()?,
        };

        for name in &names {
            let docs = self.find_in(name, None)?;
            let mut buf = Vec::new();
            for doc in &docs {
                let bytes = encode_document(doc)?;
                buf.extend_from_slice(&(bytes.len() as u32).to_le_bytes());
                buf.extend_from_slice(&bytes);
            }
            fs::write(dir.join(format!("{name}.bson")), buf)?;
        }

        let sidecar = ExportManifest { collections: names };
        fs::write(dir.join("meta.json"), serde_json::to_vec_pretty(&sidecar)?)?;
        Ok(())
    }

    /// Reverse of `export`: read `dir/meta.json` for the collection list and
    /// replay each `{name}.bson` file's records. `ImportMode::Replace`
    /// truncates the collection first; `ImportMode::Merge` upserts each
    /// record by `_id` into whatever is already there.
    pub fn import(&self, dir: &Path, mode: ImportMode) -> Result<(), WrongoDBError> {
        let sidecar_path = dir.join("meta.json");
        let bytes = fs::read(&sidecar_path)
            .map_err(|e| StorageError(format!("cannot read export manifest {}: {e}", sidecar_path.display())))?;
        let manifest: ExportManifest = serde_json::from_slice(&bytes)
            .map_err(|e| StorageError(format!("corrupt export manifest {}: {e}", sidecar_path.display())))?;

        for name in &manifest.collections {
            let path = dir.join(format!("{name}.bson"));
            let data = fs::read(&path)
                .map_err(|e| StorageError(format!("cannot read export file {}: {e}", path.display())))?;

            if mode == ImportMode::Replace {
                self.delete_many_in(name, None)?;
            }

            let mut offset = 0usize;
            while offset + 4 <= data.len() {
                let len = u32::from_le_bytes(data[offset..offset + 4].try_into().unwrap()) as usize;
                offset += 4;
                if offset + len > data.len() {
                    return Err(StorageError(format!("truncated export record in {}", path.display())).into());
                }
                let doc = decode_document(&data[offset..offset + len])?;
                offset += len;

                match mode {
                    ImportMode::Replace => {
                        self.insert_one_doc_into(name, doc)?;
                    }
                    ImportMode::Merge => {
                        let existing = match doc.get("_id") {
                            Some(id) => !self
                                .find_in(name, Some(serde_json::json!({ "_id": id })))?
                                .is_empty(),
                            None => false,
                        };
                        if existing {
                            let id = doc.get("_id").cloned().unwrap();
                            let filter = Some(serde_json::json!({ "_id": id }));
                            let update = serde_json::json!({ "$set": Value::Object(doc.clone()) });
                            self.update_one_in(name, filter, update)?;
                        } else {
                            self.insert_one_doc_into(name, doc)?;
                        }
                    }
                }
            }
        }

        Ok(())
    }

    pub fn query_in(
        &self,
        coll: &str,
        filter: Value,
        or_branches: &[Value],
        hints: Value,
    ) -> Result<(Vec<Document>, Option<crate::query::executor::ExplainInfo>), WrongoDBError> {
        let mut session = self.open_session();
        self.collection(coll).query(&mut session, filter, or_branches, hints)
    }
}
