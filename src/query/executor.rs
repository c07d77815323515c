//! Plans and runs a compiled [`QueryPlan`] against a collection: picks at
//! most one secondary index, scans, filters, sorts, paginates, projects, and
//! (for update-mode plans) mutates matches in place.
//!
//! Grounded in `engine::collection::mod.rs`'s existing `catalog.has_index`
//! branch and cursor-driven scan, generalized from equality-only lookups to
//! the full compiled operator set.

use std::cmp::Ordering;
use std::time::Instant;

use serde_json::Value;

use crate::api::Session;
use crate::core::bson::{decode_document, encode_document_with_options, encode_id_value};
use crate::core::errors::StorageError;
use crate::index::{decode_index_id, encode_range_bounds, IndexKind};
use crate::txn::Transaction;
use crate::{Document, WrongoDBError};

use super::compiler::{matches, Op, Predicate, Projection, QueryPlan, UpdateSpec};

/// Structured explain output, emitted alongside results when `plan.explain`.
#[derive(Debug, Clone)]
pub struct ExplainInfo {
    pub index_used: Option<String>,
    pub scanned: usize,
    pub matched: usize,
    pub elapsed_ms: f64,
}

pub struct ExecutionResult {
    pub documents: Vec<Document>,
    pub count: usize,
    pub explain: Option<ExplainInfo>,
}

pub fn execute(
    session: &mut Session,
    collection: &str,
    plan: &QueryPlan,
    compressed: bool,
) -> Result<ExecutionResult, WrongoDBError> {
    let started = Instant::now();
    let owns_txn = session.current_txn().is_none();
    if owns_txn {
        let mut txn = session.transaction()?;
        let result = run(txn.session_mut(), collection, plan, started, compressed);
        match result {
            Ok(value) => {
                txn.commit()?;
                Ok(value)
            }
            Err(e) => {
                let _ = txn.abort();
                Err(e)
            }
        }
    } else {
        run(session, collection, plan, started, compressed)
    }
}

fn run(
    session: &mut Session,
    collection: &str,
    plan: &QueryPlan,
    started: Instant,
    compressed: bool,
) -> Result<ExecutionResult, WrongoDBError> {
    let txn_id = session
        .current_txn()
        .map(Transaction::id)
        .ok_or(WrongoDBError::NoActiveTransaction)?;

    let best_index = choose_index(session, collection, plan)?;
    let mut scanned = 0usize;
    let mut candidates: Vec<Document> = Vec::new();

    match best_index {
        Some((field, op)) => {
            let mut index_cursor = session.open_cursor(&format!("index:{}:{}", collection, field))?;
            let mut table_cursor = session.open_cursor(&format!("table:{}", collection))?;
            if let Some((start, end)) = index_range_for(&op) {
                index_cursor.set_range(start, end);
            }
            while let Some((key, _)) = index_cursor.next(txn_id)? {
                let Some(id) = decode_index_id(&key)? else {
                    continue;
                };
                scanned += 1;
                let pk = encode_id_value(&id)?;
                if let Some(bytes) = table_cursor.get(&pk, txn_id)? {
                    candidates.push(decode_document(&bytes)?);
                }
            }
        }
        None => {
            let mut cursor = session.open_cursor(&format!("table:{}", collection))?;
            while let Some((_, bytes)) = cursor.next(txn_id)? {
                scanned += 1;
                candidates.push(decode_document(&bytes)?);
            }
        }
    }

    let mut matched: Vec<Document> = candidates.into_iter().filter(|d| matches(d, plan)).collect();

    if let Some(spec) = &plan.update {
        if matched.is_empty() {
            if let Some(new_doc) = build_upsert_document(&plan.predicates, spec) {
                let inserted = insert_upsert_document(session, collection, txn_id, new_doc, compressed)?;
                matched.push(inserted);
            }
        } else {
            for doc in &mut matched {
                let before = doc.clone();
                *doc = apply_update_ops(doc, spec)?;
                if *doc != before {
                    persist_update(session, collection, txn_id, &before, doc, compressed)?;
                }
            }
        }
    }

    let matched_count = matched.len();

    sort_documents(&mut matched, &plan.order_by);

    if plan.skip > 0 {
        matched = matched.into_iter().skip(plan.skip).collect();
    }
    if let Some(max) = plan.max {
        matched.truncate(max);
    }

    let documents = match &plan.projection {
        Some(projection) if !plan.only_count => {
            matched.into_iter().map(|d| project(&d, projection)).collect()
        }
        _ => matched,
    };

    let explain = plan.explain.then(|| ExplainInfo {
        index_used: best_index.map(|(field, _)| field),
        scanned,
        matched: matched_count,
        elapsed_ms: started.elapsed().as_secs_f64() * 1000.0,
    });

    Ok(ExecutionResult {
        count: documents.len(),
        documents,
        explain,
    })
}

/// Score every top-level predicate (and OR-branch predicate) against the
/// collection's index catalog; equality beats range beats prefix beats no
/// match. At most one index is used per execution.
fn choose_index(
    session: &mut Session,
    collection: &str,
    plan: &QueryPlan,
) -> Result<Option<(String, Op)>, WrongoDBError> {
    let table = session.table_handle(collection, false)?;
    let table_guard = table.read();
    let Some(catalog) = table_guard.index_catalog() else {
        return Ok(None);
    };

    let mut best: Option<(u8, String, Op)> = None;
    for predicate in &plan.predicates {
        if predicate.negate || !catalog.has_index(&predicate.path) {
            continue;
        }
        let kind = catalog.index_definition(&predicate.path).map(|d| d.kind);
        let score = score_op(&predicate.op, kind);
        let better = match &best {
            Some((s, _, _)) => score > *s,
            None => true,
        };
        if score > 0 && better {
            best = Some((score, predicate.path.clone(), predicate.op.clone()));
        }
    }

    Ok(best.map(|(_, field, op)| (field, op)))
}

/// An index only helps a predicate if its stored comparator matches how
/// the predicate needs to compare values: `$icase` needs a
/// case-insensitive-string index specifically, since a plain string index
/// stores the original case and can't satisfy a case-folded lookup.
fn score_op(op: &Op, kind: Option<IndexKind>) -> u8 {
    match op {
        Op::Eq(_) | Op::In(_) => 3,
        Op::Icase(_) if kind == Some(IndexKind::CaseInsensitiveString) => 3,
        Op::Gt(_) | Op::Gte(_) | Op::Lt(_) | Op::Lte(_) | Op::Bt(_, _) => 2,
        Op::Begin(_) => 1,
        _ => 0,
    }
}

fn index_range_for(op: &Op) -> Option<(Option<Vec<u8>>, Option<Vec<u8>>)> {
    match op {
        Op::Eq(v) => encode_range_bounds(v).map(|(s, e)| (Some(s), Some(e))),
        Op::Gte(v) | Op::Gt(v) => encode_range_bounds(v).map(|(s, _)| (Some(s), None)),
        Op::Lte(v) | Op::Lt(v) => encode_range_bounds(v).map(|(_, e)| (None, Some(e))),
        Op::Icase(s) => {
            encode_range_bounds(&Value::String(s.to_lowercase())).map(|(s, e)| (Some(s), Some(e)))
        }
        _ => None,
    }
}

fn sort_documents(docs: &mut [Document], order_by: &[(String, i8)]) {
    if order_by.is_empty() {
        return;
    }
    docs.sort_by(|a, b| {
        for (field, dir) in order_by {
            let av = super::compiler::get_path(a, field);
            let bv = super::compiler::get_path(b, field);
            let ord = compare_values(av, bv);
            if ord != Ordering::Equal {
                return if *dir < 0 { ord.reverse() } else { ord };
            }
        }
        Ordering::Equal
    });
}

fn compare_values(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    match (a, b) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Less,
        (Some(_), None) => Ordering::Greater,
        (Some(a), Some(b)) => {
            if let (Some(x), Some(y)) = (a.as_f64(), b.as_f64()) {
                x.partial_cmp(&y).unwrap_or(Ordering::Equal)
            } else if let (Some(x), Some(y)) = (a.as_str(), b.as_str()) {
                x.cmp(y)
            } else {
                Ordering::Equal
            }
        }
    }
}

fn project(doc: &Document, projection: &Projection) -> Document {
    let exclude_mode = projection.fields.iter().any(|(_, include)| !include)
        && !projection.fields.iter().any(|(_, include)| *include);

    if exclude_mode {
        let mut out = doc.clone();
        for (field, _) in &projection.fields {
            out.remove(field);
        }
        return out;
    }

    let mut out = Document::new();
    for (field, include) in &projection.fields {
        if *include {
            if let Some(v) = doc.get(field) {
                out.insert(field.clone(), v.clone());
            }
        }
    }
    if let Some(id) = doc.get("_id") {
        out.entry("_id".to_string()).or_insert_with(|| id.clone());
    }
    out
}

/// Apply the EJDB update-operator set to a single matched document.
pub fn apply_update_ops(doc: &Document, spec: &UpdateSpec) -> Result<Document, WrongoDBError> {
    let Some(ops) = spec.raw.as_object() else {
        return Ok(doc.clone());
    };
    let mut out = doc.clone();

    if let Some(Value::Object(fields)) = ops.get("$set") {
        for (k, v) in fields {
            out.insert(k.clone(), v.clone());
        }
    }
    if let Some(Value::Object(fields)) = ops.get("$inc") {
        for (k, v) in fields {
            if let Some(delta) = v.as_f64() {
                let current = out.get(k).and_then(Value::as_f64).unwrap_or(0.0);
                out.insert(
                    k.clone(),
                    Value::Number(
                        serde_json::Number::from_f64(current + delta)
                            .unwrap_or_else(|| serde_json::Number::from(0)),
                    ),
                );
            }
        }
    }
    if let Some(Value::Object(fields)) = ops.get("$upsert") {
        for (k, v) in fields {
            out.entry(k.clone()).or_insert_with(|| v.clone());
        }
    }
    if let Some(dropall) = ops.get("$dropall") {
        match dropall {
            Value::Object(fields) => {
                for k in fields.keys() {
                    out.remove(k);
                }
            }
            Value::Array(fields) => {
                for k in fields.iter().filter_map(Value::as_str) {
                    out.remove(k);
                }
            }
            _ => {}
        }
    }
    if let Some(Value::Object(fields)) = ops.get("$addToSet") {
        for (k, v) in fields {
            let arr = out.entry(k.clone()).or_insert_with(|| Value::Array(vec![]));
            if let Value::Array(arr) = arr {
                if !arr.contains(v) {
                    arr.push(v.clone());
                }
            }
        }
    }
    if let Some(Value::Object(fields)) = ops.get("$addToSetAll") {
        for (k, v) in fields {
            if let Value::Array(values) = v {
                let arr = out.entry(k.clone()).or_insert_with(|| Value::Array(vec![]));
                if let Value::Array(arr) = arr {
                    for item in values {
                        if !arr.contains(item) {
                            arr.push(item.clone());
                        }
                    }
                }
            }
        }
    }
    if let Some(Value::Object(fields)) = ops.get("$pull") {
        for (k, v) in fields {
            if let Some(Value::Array(arr)) = out.get_mut(k) {
                arr.retain(|item| item != v);
            }
        }
    }
    if let Some(Value::Object(fields)) = ops.get("$pullAll") {
        for (k, v) in fields {
            if let (Some(Value::Array(arr)), Value::Array(remove)) = (out.get_mut(k), v) {
                arr.retain(|item| !remove.contains(item));
            }
        }
    }

    Ok(out)
}

/// Builds the document a `$upsert` creates when the query's match set is
/// empty: the equality predicates from the filter (flat, top-level paths
/// only) merged with the `$upsert` payload, which wins on conflicting keys.
fn build_upsert_document(predicates: &[Predicate], spec: &UpdateSpec) -> Option<Document> {
    let ops = spec.raw.as_object()?;
    let upsert_fields = ops.get("$upsert")?.as_object()?;

    let mut doc = Document::new();
    for predicate in predicates {
        if predicate.negate || predicate.path.contains('.') {
            continue;
        }
        if let Op::Eq(value) = &predicate.op {
            doc.insert(predicate.path.clone(), value.clone());
        }
    }
    for (k, v) in upsert_fields {
        doc.insert(k.clone(), v.clone());
    }
    Some(doc)
}

/// Inserts the document built by `build_upsert_document`, assigning an `_id`
/// if the predicates/payload didn't supply one, and updates the secondary
/// indexes the same way a normal insert would.
fn insert_upsert_document(
    session: &mut Session,
    collection: &str,
    txn_id: crate::txn::TxnId,
    mut doc: Document,
    compressed: bool,
) -> Result<Document, WrongoDBError> {
    crate::core::document::normalize_document_in_place(&mut doc)?;
    let id = doc
        .get("_id")
        .ok_or_else(|| StorageError("upsert document missing _id".into()))?;
    let key = encode_id_value(id)?;
    let value = encode_document_with_options(&doc, compressed)?;

    let mut cursor = session.open_cursor(&format!("table:{}", collection))?;
    cursor.insert(&key, &value, txn_id)?;

    let table = session.table_handle(collection, false)?;
    let mut table_guard = table.write();
    if let Some(catalog) = table_guard.index_catalog_mut() {
        let _ = catalog.add_doc(&doc)?;
    }
    drop(table_guard);

    Ok(doc)
}

fn persist_update(
    session: &mut Session,
    collection: &str,
    txn_id: crate::txn::TxnId,
    before: &Document,
    after: &Document,
    compressed: bool,
) -> Result<(), WrongoDBError> {
    let id = before
        .get("_id")
        .ok_or_else(|| StorageError("document missing _id during update".into()))?;
    let key = encode_id_value(id)?;
    let value = encode_document_with_options(after, compressed)?;

    let mut cursor = session.open_cursor(&format!("table:{}", collection))?;
    cursor.update(&key, &value, txn_id)?;

    let table = session.table_handle(collection, false)?;
    let mut table_guard = table.write();
    if let Some(catalog) = table_guard.index_catalog_mut() {
        let _ = catalog.remove_doc(before)?;
        let _ = catalog.add_doc(after)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn apply_update_ops_set_and_inc() {
        let doc: Document = serde_json::from_value(json!({"_id": 1, "n": 10})).unwrap();
        let spec = UpdateSpec {
            raw: json!({"$set": {"name": "a"}, "$inc": {"n": 5}}),
        };
        let result = apply_update_ops(&doc, &spec).unwrap();
        assert_eq!(result.get("name").unwrap().as_str().unwrap(), "a");
        assert_eq!(result.get("n").unwrap().as_f64().unwrap(), 15.0);
    }

    #[test]
    fn apply_update_ops_add_to_set_dedups() {
        let doc: Document = serde_json::from_value(json!({"_id": 1, "tags": ["a"]})).unwrap();
        let spec = UpdateSpec {
            raw: json!({"$addToSetAll": {"tags": ["a", "b"]}}),
        };
        let result = apply_update_ops(&doc, &spec).unwrap();
        let tags = result.get("tags").unwrap().as_array().unwrap();
        assert_eq!(tags.len(), 2);
    }

    #[test]
    fn apply_update_ops_pull_all() {
        let doc: Document = serde_json::from_value(json!({"_id": 1, "tags": ["a", "b", "c"]})).unwrap();
        let spec = UpdateSpec {
            raw: json!({"$pullAll": {"tags": ["a", "c"]}}),
        };
        let result = apply_update_ops(&doc, &spec).unwrap();
        let tags = result.get("tags").unwrap().as_array().unwrap();
        assert_eq!(tags.len(), 1);
        assert_eq!(tags[0].as_str().unwrap(), "b");
    }
}
