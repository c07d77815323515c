//! End-to-end query tests driving `Collection::query` through real storage,
//! session, and index state (no mocked cursors or compiled plans).

use serde_json::json;
use tempfile::tempdir;

use wrongodb::{ImportMode, WrongoDB};

#[test]
fn query_gt_filters_across_real_storage() {
    let tmp = tempdir().unwrap();
    let db = WrongoDB::open(tmp.path().join("db")).unwrap();
    let coll = db.collection("people");
    let mut session = db.open_session();

    for age in [20, 25, 30, 35, 40] {
        coll.insert_one(&mut session, json!({"name": format!("p{age}"), "age": age}))
            .unwrap();
    }

    let (docs, _) = coll
        .query(&mut session, json!({"age": {"$gt": 28}}), &[], json!({}))
        .unwrap();

    let mut ages: Vec<i64> = docs.iter().map(|d| d.get("age").unwrap().as_i64().unwrap()).collect();
    ages.sort();
    assert_eq!(ages, vec![30, 35, 40]);
}

#[test]
fn query_between_with_orderby_matches_index_and_scan() {
    let tmp = tempdir().unwrap();
    let db = WrongoDB::open(tmp.path().join("db")).unwrap();
    let coll = db.collection("people");
    let mut session = db.open_session();

    for age in [18, 22, 29, 31, 45, 50] {
        coll.insert_one(&mut session, json!({"name": format!("p{age}"), "age": age}))
            .unwrap();
    }

    let filter = json!({"age": {"$bt": [20, 45]}});
    let hints = json!({"orderby": {"age": -1}});

    let (scan_docs, _) = coll.query(&mut session, filter.clone(), &[], hints.clone()).unwrap();
    let scan_ages: Vec<i64> = scan_docs
        .iter()
        .map(|d| d.get("age").unwrap().as_i64().unwrap())
        .collect();
    assert_eq!(scan_ages, vec![45, 31, 29, 22]);

    coll.create_index(&mut session, "age").unwrap();

    let (indexed_docs, _) = coll.query(&mut session, filter, &[], hints).unwrap();
    let indexed_ages: Vec<i64> = indexed_docs
        .iter()
        .map(|d| d.get("age").unwrap().as_i64().unwrap())
        .collect();
    assert_eq!(indexed_ages, scan_ages);
}

#[test]
fn query_upsert_inserts_when_no_match() {
    let tmp = tempdir().unwrap();
    let db = WrongoDB::open(tmp.path().join("db")).unwrap();
    let coll = db.collection("people");
    let mut session = db.open_session();

    let (result, _) = coll
        .query(
            &mut session,
            json!({"name": "nobody", "$set": {"age": 5}, "$upsert": {"age": 5}}),
            &[],
            json!({}),
        )
        .unwrap();
    assert_eq!(result.len(), 1);

    let found = coll
        .find(&mut session, Some(json!({"name": "nobody"})))
        .unwrap();
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].get("age").unwrap().as_i64().unwrap(), 5);
}

#[test]
fn query_rolls_back_on_txn_abort() {
    let tmp = tempdir().unwrap();
    let db = WrongoDB::open(tmp.path().join("db")).unwrap();
    let coll = db.collection("people");
    let mut session = db.open_session();

    coll.insert_one(&mut session, json!({"name": "alice", "age": 30}))
        .unwrap();

    let mut txn = session.transaction().unwrap();
    coll.query(
        txn.session_mut(),
        json!({"name": "alice", "$set": {"age": 99}}),
        &[],
        json!({}),
    )
    .unwrap();
    txn.abort().unwrap();

    let (docs, _) = coll
        .query(&mut session, json!({"name": "alice"}), &[], json!({}))
        .unwrap();
    assert_eq!(docs[0].get("age").unwrap().as_i64().unwrap(), 30);
}

#[test]
fn export_then_import_round_trips_a_collection() {
    let tmp = tempdir().unwrap();
    let db = WrongoDB::open(tmp.path().join("db")).unwrap();
    let coll = db.collection("people");
    let mut session = db.open_session();

    coll.insert_one(&mut session, json!({"_id": "a", "name": "alice", "age": 30}))
        .unwrap();
    coll.insert_one(&mut session, json!({"_id": "b", "name": "bob", "age": 25}))
        .unwrap();

    let export_dir = tmp.path().join("dump");
    db.export(&export_dir, None).unwrap();

    let db2 = WrongoDB::open(tmp.path().join("db2")).unwrap();
    db2.import(&export_dir, ImportMode::Replace).unwrap();

    let docs = db2.find_in("people", None).unwrap();
    assert_eq!(docs.len(), 2);

    let alice = db2
        .find_in("people", Some(json!({"_id": "a"})))
        .unwrap();
    assert_eq!(alice[0].get("age").unwrap().as_i64().unwrap(), 30);
}

#[test]
fn import_merge_upserts_existing_documents() {
    let tmp = tempdir().unwrap();
    let db = WrongoDB::open(tmp.path().join("db")).unwrap();
    db.insert_one_doc_into("people", serde_json::Map::from_iter([
        ("_id".to_string(), json!("a")),
        ("name".to_string(), json!("alice")),
        ("age".to_string(), json!(30)),
    ]))
    .unwrap();

    let export_dir = tmp.path().join("dump");
    db.export(&export_dir, Some(&["people".to_string()])).unwrap();

    db.update_one_in("people", Some(json!({"_id": "a"})), json!({"$set": {"age": 99}}))
        .unwrap();
    db.insert_one_doc_into("people", serde_json::Map::from_iter([
        ("_id".to_string(), json!("b")),
        ("name".to_string(), json!("bob")),
    ]))
    .unwrap();

    db.import(&export_dir, ImportMode::Merge).unwrap();

    let alice = db.find_in("people", Some(json!({"_id": "a"}))).unwrap();
    assert_eq!(alice[0].get("age").unwrap().as_i64().unwrap(), 30);
    let bob = db.find_in("people", Some(json!({"_id": "b"}))).unwrap();
    assert_eq!(bob.len(), 1);
}
