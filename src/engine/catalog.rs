//! Top-level database catalog, persisted as `meta.json` at the database
//! root directory.
//!
//! Grounded in `index::IndexCatalog`'s per-collection `{collection}.meta.json`
//! index descriptor (same load/tmp-write/rename save discipline, same
//! `serde_json` choice since this is metadata rather than document data),
//! generalized one level up: where `IndexCatalog` enumerates one
//! collection's indexes, `DatabaseCatalog` enumerates every collection in
//! the database plus its creation options and index summary.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::core::errors::StorageError;
use crate::index::IndexKind;
use crate::WrongoDBError;

const META_FILE: &str = "meta.json";

/// Per-collection creation options (spec §3/§4.E: `records`, `cached-records`,
/// `large`, `compressed`; only `compressed` has an observable effect here).
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct CollectionOptions {
    #[serde(default)]
    pub compressed: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct IndexSummary {
    path: String,
    kind: IndexKind,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct CollectionEntry {
    name: String,
    file: String,
    #[serde(default)]
    options: CollectionOptions,
    #[serde(default)]
    indexes: Vec<IndexSummary>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
struct CatalogFile {
    #[serde(default)]
    collections: Vec<CollectionEntry>,
}

#[derive(Debug, Clone, Default)]
struct CollectionState {
    options: CollectionOptions,
    indexes: Vec<(String, IndexKind)>,
}

#[derive(Debug)]
pub struct DatabaseCatalog {
    base_dir: PathBuf,
    collections: BTreeMap<String, CollectionState>,
}

impl DatabaseCatalog {
    fn meta_path(base_dir: &Path) -> PathBuf {
        base_dir.join(META_FILE)
    }

    /// Load the catalog from `base_dir/meta.json`, creating an empty one if
    /// the database hasn't been opened before.
    pub fn load_or_init(base_dir: &Path) -> Result<Self, WrongoDBError> {
        let path = Self::meta_path(base_dir);
        if !path.exists() {
            let catalog = Self {
                base_dir: base_dir.to_path_buf(),
                collections: BTreeMap::new(),
            };
            catalog.save()?;
            return Ok(catalog);
        }

        let bytes = fs::read(&path)?;
        let file: CatalogFile = serde_json::from_slice(&bytes)
            .map_err(|e| StorageError(format!("corrupt database catalog {}: {e}", path.display())))?;

        let collections = file
            .collections
            .into_iter()
            .map(|entry| {
                let state = CollectionState {
                    options: entry.options,
                    indexes: entry
                        .indexes
                        .into_iter()
                        .map(|idx| (idx.path, idx.kind))
                        .collect(),
                };
                (entry.name, state)
            })
            .collect();

        Ok(Self {
            base_dir: base_dir.to_path_buf(),
            collections,
        })
    }

    fn save(&self) -> Result<(), WrongoDBError> {
        let file = CatalogFile {
            collections: self
                .collections
                .iter()
                .map(|(name, state)| CollectionEntry {
                    name: name.clone(),
                    file: format!("{name}.main.wt"),
                    options: state.options,
                    indexes: state
                        .indexes
                        .iter()
                        .map(|(path, kind)| IndexSummary {
                            path: path.clone(),
                            kind: *kind,
                        })
                        .collect(),
                })
                .collect(),
        };

        let path = Self::meta_path(&self.base_dir);
        let tmp_path = self.base_dir.join(format!("{META_FILE}.tmp"));
        fs::write(&tmp_path, serde_json::to_vec_pretty(&file)?)?;
        fs::rename(&tmp_path, &path)?;
        Ok(())
    }

    pub fn collection_names(&self) -> Vec<String> {
        self.collections.keys().cloned().collect()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.collections.contains_key(name)
    }

    pub fn options(&self, name: &str) -> CollectionOptions {
        self.collections.get(name).map(|s| s.options).unwrap_or_default()
    }

    /// Register a collection if it isn't already known. A no-op (keeping
    /// the existing options) if it's already registered, matching
    /// `IndexCatalog::add_index`'s idempotent-on-repeat behavior.
    pub fn register(&mut self, name: &str, options: CollectionOptions) -> Result<(), WrongoDBError> {
        if self.collections.contains_key(name) {
            return Ok(());
        }
        self.collections.insert(name.to_string(), CollectionState { options, indexes: Vec::new() });
        self.save()
    }

    pub fn drop_collection(&mut self, name: &str) -> Result<(), WrongoDBError> {
        self.collections.remove(name);
        self.save()
    }

    /// Overwrite the index summary recorded for `name`, called after
    /// `create_index`/`drop_index`/`rebuild_index` so the catalog stays in
    /// sync with the collection's actual index set.
    pub fn set_indexes(&mut self, name: &str, indexes: Vec<(String, IndexKind)>) -> Result<(), WrongoDBError> {
        self.collections.entry(name.to_string()).or_default().indexes = indexes;
        self.save()
    }
}
