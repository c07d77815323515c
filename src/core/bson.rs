use std::cmp::Ordering;

use bson::Bson;
use serde_json::{Map, Value};

use crate::core::errors::StorageError;
use crate::{Document, WrongoDBError};

pub fn encode_id_value(id: &Value) -> Result<Vec<u8>, WrongoDBError> {
    let bson_id = bson::to_bson(id)?;
    let mut doc = bson::Document::new();
    doc.insert("_id", bson_id);
    Ok(bson::to_vec(&doc)?)
}

pub fn decode_id_value(bytes: &[u8]) -> Result<Value, WrongoDBError> {
    let doc: bson::Document = bson::from_slice(bytes)?;
    let bson_id = doc
        .get("_id")
        .ok_or_else(|| StorageError("missing _id in encoded key".into()))?
        .clone();
    let value: Value = bson::from_bson(bson_id)?;
    Ok(value)
}

/// Leading byte written before every encoded document, so `decode_document`
/// can tell whether the BSON payload that follows is raw or DEFLATE-packed
/// without the caller having to remember a collection's compression setting.
const ENCODING_RAW: u8 = 0x00;
const ENCODING_DEFLATE: u8 = 0x01;

pub fn encode_document(doc: &Document) -> Result<Vec<u8>, WrongoDBError> {
    encode_document_with_options(doc, false)
}

/// Encode a document, optionally DEFLATE-compressing the BSON payload.
/// Used by collections created with the `compressed` option (spec'd in
/// §4.E's per-collection options, alongside `records`/`cached-records`).
pub fn encode_document_with_options(doc: &Document, compressed: bool) -> Result<Vec<u8>, WrongoDBError> {
    let raw = encode_document_raw(doc)?;
    let mut out = Vec::with_capacity(raw.len() + 1);
    if compressed {
        out.push(ENCODING_DEFLATE);
        out.extend(deflate_compress(&raw)?);
    } else {
        out.push(ENCODING_RAW);
        out.extend(raw);
    }
    Ok(out)
}

fn encode_document_raw(doc: &Document) -> Result<Vec<u8>, WrongoDBError> {
    let bson_doc = match bson::to_bson(doc)? {
        Bson::Document(doc) => doc,
        _ => {
            return Err(StorageError(
                "document did not serialize to a BSON document".into(),
            )
            .into())
        }
    };
    Ok(bson::to_vec(&bson_doc)?)
}

pub fn decode_document(bytes: &[u8]) -> Result<Document, WrongoDBError> {
    let (marker, rest) = bytes
        .split_first()
        .ok_or_else(|| StorageError("empty document bytes".into()))?;
    let raw = match *marker {
        ENCODING_RAW => rest.to_vec(),
        ENCODING_DEFLATE => deflate_decompress(rest)?,
        other => return Err(StorageError(format!("unknown document encoding marker {other:#x}")).into()),
    };
    decode_document_raw(&raw)
}

fn decode_document_raw(bytes: &[u8]) -> Result<Document, WrongoDBError> {
    let bson_doc: bson::Document = bson::from_slice(bytes)?;
    let value: Value = bson::from_bson(Bson::Document(bson_doc))?;
    match value {
        Value::Object(map) => Ok(map),
        _ => Err(StorageError("decoded BSON document was not an object".into()).into()),
    }
}

fn deflate_compress(bytes: &[u8]) -> Result<Vec<u8>, WrongoDBError> {
    use flate2::write::DeflateEncoder;
    use flate2::Compression;
    use std::io::Write;

    let mut encoder = DeflateEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(bytes)?;
    Ok(encoder.finish()?)
}

fn deflate_decompress(bytes: &[u8]) -> Result<Vec<u8>, WrongoDBError> {
    use flate2::read::DeflateDecoder;
    use std::io::Read;

    let mut decoder = DeflateDecoder::new(bytes);
    let mut out = Vec::new();
    decoder.read_to_end(&mut out)?;
    Ok(out)
}

/// Tokenize a JSON Pointer (RFC 6901) into its unescaped reference tokens.
/// `~1` decodes to `/` and `~0` decodes to `~`, in that order, matching the
/// RFC's worked example.
fn pointer_tokens(pointer: &str) -> Result<Vec<String>, WrongoDBError> {
    if pointer.is_empty() {
        return Ok(Vec::new());
    }
    if !pointer.starts_with('/') {
        return Err(StorageError(format!("invalid JSON pointer: {pointer}")).into());
    }
    Ok(pointer[1..]
        .split('/')
        .map(|tok| tok.replace("~1", "/").replace("~0", "~"))
        .collect())
}

/// Read the value at a JSON Pointer path, or `None` if any segment is
/// missing or the path descends into a scalar.
pub fn pointer_get<'a>(doc: &'a Value, pointer: &str) -> Option<&'a Value> {
    let tokens = pointer_tokens(pointer).ok()?;
    let mut current = doc;
    for token in tokens {
        current = match current {
            Value::Object(map) => map.get(&token)?,
            Value::Array(arr) => arr.get(token.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(current)
}

/// Write `value` at a JSON Pointer path, creating the final object key or
/// array slot if needed but requiring every intermediate segment to already
/// exist. An empty pointer replaces the whole document. `-` appends to an
/// array, per RFC 6901 §4.
pub fn pointer_set(doc: &mut Value, pointer: &str, value: Value) -> Result<(), WrongoDBError> {
    pointer_set_impl(doc, pointer, value, false)
}

/// Like [`pointer_set`], but creates missing intermediate object segments
/// instead of erroring. Used by the `add_create` patch extension and by
/// `increment`, which both commonly target paths that don't exist yet.
pub fn pointer_set_create(doc: &mut Value, pointer: &str, value: Value) -> Result<(), WrongoDBError> {
    pointer_set_impl(doc, pointer, value, true)
}

fn pointer_set_impl(
    doc: &mut Value,
    pointer: &str,
    value: Value,
    create_missing: bool,
) -> Result<(), WrongoDBError> {
    let tokens = pointer_tokens(pointer)?;
    let Some((last, parents)) = tokens.split_last() else {
        *doc = value;
        return Ok(());
    };

    let mut current = doc;
    for token in parents {
        current = match current {
            Value::Object(map) => {
                if !map.contains_key(token) {
                    if create_missing {
                        map.insert(token.clone(), Value::Object(Map::new()));
                    } else {
                        return Err(StorageError(format!("path segment '{token}' not found")).into());
                    }
                }
                map.get_mut(token).expect("just inserted or present")
            }
            Value::Array(arr) => {
                let idx: usize = token
                    .parse()
                    .map_err(|_| StorageError(format!("invalid array index '{token}'")))?;
                arr.get_mut(idx)
                    .ok_or_else(|| StorageError(format!("array index {idx} out of bounds")))?
            }
            _ => return Err(StorageError("cannot descend into a scalar value".into()).into()),
        };
    }

    match current {
        Value::Object(map) => {
            map.insert(last.clone(), value);
        }
        Value::Array(arr) => {
            if last == "-" {
                arr.push(value);
            } else {
                let idx: usize = last
                    .parse()
                    .map_err(|_| StorageError(format!("invalid array index '{last}'")))?;
                if idx > arr.len() {
                    return Err(StorageError(format!("array index {idx} out of bounds")).into());
                }
                arr.insert(idx, value);
            }
        }
        _ => return Err(StorageError("cannot set a field on a scalar value".into()).into()),
    }
    Ok(())
}

/// Remove and return the value at a JSON Pointer path.
pub fn pointer_remove(doc: &mut Value, pointer: &str) -> Result<Value, WrongoDBError> {
    let tokens = pointer_tokens(pointer)?;
    let Some((last, parents)) = tokens.split_last() else {
        return Err(StorageError("cannot remove the document root".into()).into());
    };

    let mut current = doc;
    for token in parents {
        current = match current {
            Value::Object(map) => map
                .get_mut(token)
                .ok_or_else(|| StorageError(format!("path segment '{token}' not found")))?,
            Value::Array(arr) => {
                let idx: usize = token
                    .parse()
                    .map_err(|_| StorageError(format!("invalid array index '{token}'")))?;
                arr.get_mut(idx)
                    .ok_or_else(|| StorageError(format!("array index {idx} out of bounds")))?
            }
            _ => return Err(StorageError("cannot descend into a scalar value".into()).into()),
        };
    }

    match current {
        Value::Object(map) => map
            .remove(last)
            .ok_or_else(|| StorageError(format!("key '{last}' not found")).into()),
        Value::Array(arr) => {
            let idx: usize = last
                .parse()
                .map_err(|_| StorageError(format!("invalid array index '{last}'")))?;
            if idx >= arr.len() {
                return Err(StorageError(format!("array index {idx} out of bounds")).into());
            }
            Ok(arr.remove(idx))
        }
        _ => Err(StorageError("cannot remove a field from a scalar value".into()).into()),
    }
}

/// Apply a single JSON-Pointer-addressed write to a copy of `node`, leaving
/// `node` itself untouched. The non-mutating counterpart to [`pointer_set`].
pub fn patch(node: &Value, pointer: &str, value: Value) -> Result<Value, WrongoDBError> {
    let mut out = node.clone();
    pointer_set(&mut out, pointer, value)?;
    Ok(out)
}

/// RFC 7386 JSON Merge Patch: recursively merge `patch` into `target`. A
/// `null` leaf in the patch deletes the corresponding key; a non-object
/// patch replaces the target outright.
pub fn merge_patch(target: &Value, patch: &Value) -> Value {
    match (target, patch) {
        (Value::Object(t), Value::Object(p)) => {
            let mut result = t.clone();
            for (key, patch_value) in p {
                if patch_value.is_null() {
                    result.remove(key);
                } else {
                    let existing = result.get(key).cloned().unwrap_or(Value::Null);
                    result.insert(key.clone(), merge_patch(&existing, patch_value));
                }
            }
            Value::Object(result)
        }
        _ => patch.clone(),
    }
}

/// RFC 6902 JSON Patch, extended with `increment` (numeric delta at a path,
/// creating the path if absent), `add_create` (like `add` but creates
/// missing intermediate objects), and `swap` (exchange the values at two
/// paths).
pub fn json_patch(doc: &mut Value, ops: &[Value]) -> Result<(), WrongoDBError> {
    for op in ops {
        apply_patch_op(doc, op)?;
    }
    Ok(())
}

fn apply_patch_op(doc: &mut Value, op_doc: &Value) -> Result<(), WrongoDBError> {
    let obj = op_doc
        .as_object()
        .ok_or_else(|| StorageError("patch operation must be an object".into()))?;
    let op = obj
        .get("op")
        .and_then(Value::as_str)
        .ok_or_else(|| StorageError("patch operation missing 'op'".into()))?;
    let path = obj
        .get("path")
        .and_then(Value::as_str)
        .ok_or_else(|| StorageError("patch operation missing 'path'".into()))?;

    match op {
        "add" => pointer_set(doc, path, obj.get("value").cloned().unwrap_or(Value::Null))?,
        "add_create" => pointer_set_create(doc, path, obj.get("value").cloned().unwrap_or(Value::Null))?,
        "remove" => {
            pointer_remove(doc, path)?;
        }
        "replace" => pointer_set(doc, path, obj.get("value").cloned().unwrap_or(Value::Null))?,
        "move" => {
            let from = patch_from(obj)?;
            let moved = pointer_remove(doc, from)?;
            pointer_set(doc, path, moved)?;
        }
        "copy" => {
            let from = patch_from(obj)?;
            let copied = pointer_get(doc, from)
                .cloned()
                .ok_or_else(|| StorageError(format!("copy source '{from}' not found")))?;
            pointer_set(doc, path, copied)?;
        }
        "test" => {
            let expected = obj.get("value").cloned().unwrap_or(Value::Null);
            let actual = pointer_get(doc, path).cloned().unwrap_or(Value::Null);
            if actual != expected {
                return Err(StorageError(format!("patch test failed at '{path}'")).into());
            }
        }
        "increment" => {
            let delta = obj.get("value").and_then(Value::as_f64).unwrap_or(1.0);
            let current = pointer_get(doc, path).and_then(Value::as_f64).unwrap_or(0.0);
            let sum = serde_json::Number::from_f64(current + delta).unwrap_or_else(|| 0.into());
            pointer_set_create(doc, path, Value::Number(sum))?;
        }
        "swap" => {
            let from = patch_from(obj)?;
            let a = pointer_get(doc, path).cloned().unwrap_or(Value::Null);
            let b = pointer_get(doc, from).cloned().unwrap_or(Value::Null);
            pointer_set(doc, path, b)?;
            pointer_set(doc, from, a)?;
        }
        other => return Err(StorageError(format!("unsupported patch op '{other}'")).into()),
    }
    Ok(())
}

fn patch_from(obj: &Map<String, Value>) -> Result<&str, WrongoDBError> {
    obj.get("from")
        .and_then(Value::as_str)
        .ok_or_else(|| StorageError("patch operation missing 'from'".into()).into())
}

/// BSON type-ordering rank. `Value` doesn't preserve BSON's binary/object-id
/// /date/regex subtypes once decoded to JSON (they all arrive as plain
/// strings or objects), so those buckets from the full BSON chain
/// (`null < number < string < object < array < binary < object-id <
/// boolean < date < regex`) collapse into the string/object bucket here;
/// the relative order of the JSON-representable types is preserved exactly.
fn type_rank(value: &Value) -> u8 {
    match value {
        Value::Null => 0,
        Value::Number(_) => 1,
        Value::String(_) => 2,
        Value::Object(_) => 3,
        Value::Array(_) => 4,
        Value::Bool(_) => 5,
    }
}

/// Compare two documents by the value at `path` (a JSON Pointer), honoring
/// BSON type ordering before falling back to a same-type value comparison.
/// A missing value sorts before a present one, matching the executor's
/// existing `None`-sorts-first `orderby` behavior.
pub fn compare(a: &Document, b: &Document, path: &str) -> Ordering {
    let wrap = |d: &Document| Value::Object(d.clone());
    compare_values(pointer_get(&wrap(a), path), pointer_get(&wrap(b), path))
}

fn compare_values(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    match (a, b) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Less,
        (Some(_), None) => Ordering::Greater,
        (Some(x), Some(y)) => {
            let (rx, ry) = (type_rank(x), type_rank(y));
            if rx != ry {
                return rx.cmp(&ry);
            }
            match (x, y) {
                (Value::Null, Value::Null) => Ordering::Equal,
                (Value::Number(nx), Value::Number(ny)) => nx
                    .as_f64()
                    .unwrap_or(0.0)
                    .partial_cmp(&ny.as_f64().unwrap_or(0.0))
                    .unwrap_or(Ordering::Equal),
                (Value::String(sx), Value::String(sy)) => sx.cmp(sy),
                (Value::Bool(bx), Value::Bool(by)) => bx.cmp(by),
                (Value::Array(ax), Value::Array(ay)) => {
                    for (ex, ey) in ax.iter().zip(ay.iter()) {
                        let ord = compare_values(Some(ex), Some(ey));
                        if ord != Ordering::Equal {
                            return ord;
                        }
                    }
                    ax.len().cmp(&ay.len())
                }
                (Value::Object(ox), Value::Object(oy)) => {
                    ox.len().cmp(&oy.len())
                }
                _ => Ordering::Equal,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn document_round_trip() {
        let doc: Document = serde_json::from_value(json!({"_id": "a1", "name": "alice", "age": 30}))
            .unwrap();
        let bytes = encode_document(&doc).unwrap();
        let decoded = decode_document(&bytes).unwrap();
        assert_eq!(doc, decoded);
    }

    #[test]
    fn id_value_round_trip() {
        let id = json!("abc123");
        let bytes = encode_id_value(&id).unwrap();
        let decoded = decode_id_value(&bytes).unwrap();
        assert_eq!(id, decoded);
    }

    #[test]
    fn document_round_trip_compressed() {
        let doc: Document =
            serde_json::from_value(json!({"_id": "a1", "name": "alice", "age": 30})).unwrap();
        let bytes = encode_document_with_options(&doc, true).unwrap();
        assert_eq!(bytes[0], ENCODING_DEFLATE);
        let decoded = decode_document(&bytes).unwrap();
        assert_eq!(doc, decoded);
    }

    #[test]
    fn pointer_get_traverses_objects_and_arrays() {
        let v = json!({"a": {"b": [1, 2, {"c": 3}]}});
        assert_eq!(pointer_get(&v, "/a/b/0"), Some(&json!(1)));
        assert_eq!(pointer_get(&v, "/a/b/2/c"), Some(&json!(3)));
        assert_eq!(pointer_get(&v, "/a/missing"), None);
        assert_eq!(pointer_get(&v, ""), Some(&v));
    }

    #[test]
    fn pointer_tokens_unescape_tilde_and_slash() {
        let mut v = json!({});
        pointer_set(&mut v, "/a~1b", json!(1)).unwrap();
        pointer_set(&mut v, "/a~0b", json!(2)).unwrap();
        assert_eq!(v.get("a/b"), Some(&json!(1)));
        assert_eq!(v.get("a~b"), Some(&json!(2)));
    }

    #[test]
    fn pointer_set_array_append_and_index() {
        let mut v = json!({"tags": ["a", "b"]});
        pointer_set(&mut v, "/tags/-", json!("c")).unwrap();
        assert_eq!(v["tags"], json!(["a", "b", "c"]));
        pointer_set(&mut v, "/tags/0", json!("z")).unwrap();
        assert_eq!(v["tags"], json!(["z", "a", "b", "c"]));
    }

    #[test]
    fn pointer_remove_deletes_key() {
        let mut v = json!({"a": 1, "b": 2});
        let removed = pointer_remove(&mut v, "/a").unwrap();
        assert_eq!(removed, json!(1));
        assert_eq!(v, json!({"b": 2}));
    }

    #[test]
    fn merge_patch_deletes_null_and_merges_nested() {
        let target = json!({"a": 1, "b": {"x": 1, "y": 2}});
        let patch = json!({"a": null, "b": {"y": 3, "z": 4}});
        let merged = merge_patch(&target, &patch);
        assert_eq!(merged, json!({"b": {"x": 1, "y": 3, "z": 4}}));
    }

    #[test]
    fn json_patch_add_remove_replace() {
        let mut doc = json!({"a": 1});
        json_patch(
            &mut doc,
            &[
                json!({"op": "add", "path": "/b", "value": 2}),
                json!({"op": "replace", "path": "/a", "value": 10}),
                json!({"op": "remove", "path": "/b"}),
            ],
        )
        .unwrap();
        assert_eq!(doc, json!({"a": 10}));
    }

    #[test]
    fn json_patch_increment_and_swap() {
        let mut doc = json!({"a": 1, "b": 5});
        json_patch(&mut doc, &[json!({"op": "increment", "path": "/a", "value": 4})]).unwrap();
        assert_eq!(doc["a"], json!(5.0));
        json_patch(&mut doc, &[json!({"op": "swap", "path": "/a", "from": "/b"})]).unwrap();
        assert_eq!(doc["a"], json!(5));
        assert_eq!(doc["b"], json!(5.0));
    }

    #[test]
    fn json_patch_add_create_builds_missing_parents() {
        let mut doc = json!({});
        json_patch(
            &mut doc,
            &[json!({"op": "add_create", "path": "/a/b/c", "value": 1})],
        )
        .unwrap();
        assert_eq!(doc, json!({"a": {"b": {"c": 1}}}));
    }

    #[test]
    fn json_patch_test_fails_on_mismatch() {
        let mut doc = json!({"a": 1});
        let result = json_patch(&mut doc, &[json!({"op": "test", "path": "/a", "value": 2})]);
        assert!(result.is_err());
    }

    #[test]
    fn compare_honors_type_ordering_before_value() {
        let a: Document = serde_json::from_value(json!({"v": Value::Null})).unwrap();
        let b: Document = serde_json::from_value(json!({"v": "x"})).unwrap();
        assert_eq!(compare(&a, &b, "/v"), Ordering::Less);

        let n1: Document = serde_json::from_value(json!({"v": 5})).unwrap();
        let n2: Document = serde_json::from_value(json!({"v": 10})).unwrap();
        assert_eq!(compare(&n1, &n2, "/v"), Ordering::Less);
    }
}
