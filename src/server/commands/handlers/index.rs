use std::path::Path;

use crate::engine::ImportMode;
use crate::index::IndexKind;
use crate::server::commands::Command;
use crate::{WrongoDB, WrongoDBError};
use bson::{doc, Bson, Document};

/// Picks an `IndexKind` from a `createIndexes` index spec document. A
/// `collation` key (Mongo's case-insensitivity signal) maps to
/// `CaseInsensitiveString`; a string `"kind"` field (EJDB-style, not part of
/// the Mongo wire format) selects any of the four kinds directly; absent
/// either, the index is a plain `String` index.
fn index_kind_of(spec: &Document) -> IndexKind {
    if spec.get_document("collation").is_ok() {
        return IndexKind::CaseInsensitiveString;
    }
    match spec.get_str("kind") {
        Ok("case_insensitive_string") => IndexKind::CaseInsensitiveString,
        Ok("numeric") => IndexKind::Numeric,
        Ok("array") => IndexKind::Array,
        _ => IndexKind::String,
    }
}

/// Handles: listIndexes
pub struct ListIndexesCommand;

impl Command for ListIndexesCommand {
    fn names(&self) -> &[&str] {
        &["listIndexes"]
    }

    fn execute(&self, doc: &Document, db: &mut WrongoDB) -> Result<Document, WrongoDBError> {
        let coll_name = doc.get_str("listIndexes").unwrap_or("test");
        let indexes = db.list_indexes_in(coll_name)?;

        let indexes_bson: Vec<Bson> = indexes
            .into_iter()
            .map(|idx| {
                let mut key_doc = Document::new();
                key_doc.insert(idx.field.clone(), Bson::Int32(1));
                Bson::Document(doc! {
                    "v": Bson::Int32(2),
                    "key": key_doc,
                    "name": format!("{}_1", idx.field),
                    "ns": format!("test.{}", coll_name),
                })
            })
            .collect();

        let mut result_indexes = vec![Bson::Document(doc! {
            "v": Bson::Int32(2),
            "key": { "_id": Bson::Int32(1) },
            "name": "_id_",
            "ns": format!("test.{}", coll_name),
        })];
        result_indexes.extend(indexes_bson);

        Ok(doc! {
            "ok": Bson::Double(1.0),
            "cursor": {
                "id": Bson::Int64(0),
                "ns": format!("test.{}", coll_name),
                "firstBatch": Bson::Array(result_indexes),
            },
        })
    }
}

/// Handles: createIndexes
pub struct CreateIndexesCommand;

impl Command for CreateIndexesCommand {
    fn names(&self) -> &[&str] {
        &["createIndexes"]
    }

    fn execute(&self, doc: &Document, db: &mut WrongoDB) -> Result<Document, WrongoDBError> {
        let coll_name = doc.get_str("createIndexes").unwrap_or("test");
        let mut created = 0i32;

        if let Ok(indexes) = doc.get_array("indexes") {
            for index_spec in indexes {
                if let Bson::Document(spec) = index_spec {
                    if let Ok(key_doc) = spec.get_document("key") {
                        let kind = index_kind_of(spec);
                        for (field, _) in key_doc {
                            db.create_index_in_with_kind(coll_name, field, kind)?;
                            created += 1;
                        }
                    }
                }
            }
        }

        let total_indexes = db.list_indexes_in(coll_name)?.len() as i32 + 1;

        Ok(doc! {
            "ok": Bson::Double(1.0),
            "numIndexesBefore": Bson::Int32(total_indexes - created),
            "numIndexesAfter": Bson::Int32(total_indexes),
            "createdCollectionAutomatically": Bson::Boolean(false),
        })
    }
}

/// Handles: fsync / sync — forces a checkpoint of one or all collections.
/// Maps onto EJDB's `sync` command via `WrongoDB::checkpoint_in`.
pub struct SyncCommand;

impl Command for SyncCommand {
    fn names(&self) -> &[&str] {
        &["fsync", "sync"]
    }

    fn execute(&self, doc: &Document, db: &mut WrongoDB) -> Result<Document, WrongoDBError> {
        match doc.get_str("collection") {
            Ok(coll_name) => db.checkpoint_in(coll_name)?,
            Err(_) => {
                for coll_name in db.list_collections()? {
                    db.checkpoint_in(&coll_name)?;
                }
            }
        }

        Ok(doc! { "ok": Bson::Double(1.0) })
    }
}

/// Handles: dropIndexes
pub struct DropIndexesCommand;

impl Command for DropIndexesCommand {
    fn names(&self) -> &[&str] {
        &["dropIndexes"]
    }

    fn execute(&self, doc: &Document, db: &mut WrongoDB) -> Result<Document, WrongoDBError> {
        let coll_name = doc.get_str("dropIndexes").unwrap_or("test");
        let before = db.list_indexes_in(coll_name)?.len() as i32 + 1;

        match doc.get_str("index") {
            Ok("*") | Err(_) => {
                for idx in db.list_indexes_in(coll_name)? {
                    db.drop_index_in(coll_name, &idx.field)?;
                }
            }
            Ok(field) => db.drop_index_in(coll_name, field)?,
        }

        Ok(doc! {
            "ok": Bson::Double(1.0),
            "nIndexesWas": Bson::Int32(before),
        })
    }
}

/// Handles: rebuildIndex — EJDB-style index rebuild, not part of the Mongo
/// wire protocol but surfaced the same way as the other index commands.
pub struct RebuildIndexCommand;

impl Command for RebuildIndexCommand {
    fn names(&self) -> &[&str] {
        &["rebuildIndex"]
    }

    fn execute(&self, doc: &Document, db: &mut WrongoDB) -> Result<Document, WrongoDBError> {
        let coll_name = doc.get_str("rebuildIndex").unwrap_or("test");
        let field = doc
            .get_str("field")
            .map_err(|_| WrongoDBError::Protocol("rebuildIndex requires a 'field'".into()))?;
        db.rebuild_index_in(coll_name, field)?;
        Ok(doc! { "ok": Bson::Double(1.0) })
    }
}

/// Handles: export — dumps one or more collections to a directory of
/// length-prefixed BSON files plus a `meta.json` manifest.
pub struct ExportCommand;

impl Command for ExportCommand {
    fn names(&self) -> &[&str] {
        &["export"]
    }

    fn execute(&self, doc: &Document, db: &mut WrongoDB) -> Result<Document, WrongoDBError> {
        let path = doc
            .get_str("export")
            .map_err(|_| WrongoDBError::Protocol("export requires a destination path".into()))?;
        let collections: Option<Vec<String>> = doc.get_array("collections").ok().map(|arr| {
            arr.iter()
                .filter_map(|b| b.as_str().map(str::to_string))
                .collect()
        });
        db.export(Path::new(path), collections.as_deref())?;
        Ok(doc! { "ok": Bson::Double(1.0) })
    }
}

/// Handles: import — reverse of `export`; `mode: "merge"` upserts by `_id`,
/// anything else (including absent) replaces each collection's contents.
pub struct ImportCommand;

impl Command for ImportCommand {
    fn names(&self) -> &[&str] {
        &["import"]
    }

    fn execute(&self, doc: &Document, db: &mut WrongoDB) -> Result<Document, WrongoDBError> {
        let path = doc
            .get_str("import")
            .map_err(|_| WrongoDBError::Protocol("import requires a source path".into()))?;
        let mode = match doc.get_str("mode") {
            Ok("merge") => ImportMode::Merge,
            _ => ImportMode::Replace,
        };
        db.import(Path::new(path), mode)?;
        Ok(doc! { "ok": Bson::Double(1.0) })
    }
}
