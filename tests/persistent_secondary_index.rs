//! Integration tests for persistent secondary indexes and explicit checkpoints.

use serde_json::json;
use tempfile::tempdir;

use wrongodb::WrongoDB;

#[test]
fn index_survives_reopen_and_speeds_equality_lookup() {
    let tmp = tempdir().unwrap();
    let path = tmp.path().join("db");

    {
        let db = WrongoDB::open(&path).unwrap();
        let coll = db.collection("users");
        let mut session = db.open_session();

        coll.create_index(&mut session, "username").unwrap();
        coll.insert_one(&mut session, json!({"username": "alice", "age": 30}))
            .unwrap();
        coll.insert_one(&mut session, json!({"username": "bob", "age": 25}))
            .unwrap();

        let indexes = coll.list_indexes(&mut session).unwrap();
        assert!(indexes.iter().any(|i| i.field == "username"));

        coll.checkpoint(&mut session).unwrap();
    }

    // Reopen: the index metadata and the documents it covers must both persist.
    let db = WrongoDB::open(&path).unwrap();
    let coll = db.collection("users");
    let mut session = db.open_session();

    let indexes = coll.list_indexes(&mut session).unwrap();
    assert!(indexes.iter().any(|i| i.field == "username"));

    let found = coll
        .find(&mut session, Some(json!({"username": "bob"})))
        .unwrap();
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].get("age").unwrap().as_i64().unwrap(), 25);
}

#[test]
fn index_tracks_updates_and_deletes() {
    let tmp = tempdir().unwrap();
    let path = tmp.path().join("db");
    let db = WrongoDB::open(&path).unwrap();
    let coll = db.collection("users");
    let mut session = db.open_session();

    coll.create_index(&mut session, "username").unwrap();
    let alice = coll
        .insert_one(&mut session, json!({"username": "alice", "age": 30}))
        .unwrap();
    let alice_id = alice.get("_id").unwrap().clone();

    coll.update_one(
        &mut session,
        Some(json!({"_id": alice_id.clone()})),
        json!({"$set": {"username": "alice2"}}),
    )
    .unwrap();

    assert!(coll
        .find(&mut session, Some(json!({"username": "alice"})))
        .unwrap()
        .is_empty());
    assert_eq!(
        coll.find(&mut session, Some(json!({"username": "alice2"})))
            .unwrap()
            .len(),
        1
    );

    coll.delete_one(&mut session, Some(json!({"username": "alice2"})))
        .unwrap();
    assert!(coll
        .find(&mut session, Some(json!({"username": "alice2"})))
        .unwrap()
        .is_empty());
}

#[test]
fn explicit_checkpoint_persists_uncommitted_page_cache_state() {
    let tmp = tempdir().unwrap();
    let path = tmp.path().join("db");

    {
        let db = WrongoDB::open(&path).unwrap();
        let coll = db.collection("items");
        let mut session = db.open_session();
        for i in 0..50 {
            coll.insert_one(&mut session, json!({"_id": i, "v": i}))
                .unwrap();
        }
        coll.checkpoint(&mut session).unwrap();
    }

    let db = WrongoDB::open(&path).unwrap();
    let coll = db.collection("items");
    let mut session = db.open_session();
    let all = coll.find(&mut session, None).unwrap();
    assert_eq!(all.len(), 50);
}
