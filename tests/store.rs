use docstore::query::SortDirection;
use docstore::{Client, Document, Value};

fn doc(pairs: &[(&str, Value)]) -> Document {
    let mut d = Document::new();
    for (k, v) in pairs {
        d.insert(*k, v.clone());
    }
    d
}

#[test]
fn insert_and_find_roundtrip_disk() {
    let tmp = tempfile::tempdir().unwrap();
    let client = Client::open_disk(tmp.path()).unwrap();
    let db = client.database("shop").unwrap();
    let coll = db.collection("items").unwrap();

    let inserted = coll
        .insert_one(doc(&[("name", Value::String("widget".into())), ("price", Value::Int64(5))]))
        .unwrap();

    let found = coll
        .find_one(&doc(&[("name", Value::String("widget".into()))]))
        .unwrap()
        .unwrap();
    assert_eq!(found.get("_id"), Some(&inserted.inserted_id));
    assert_eq!(found.get("price"), Some(&Value::Int64(5)));
}

#[test]
fn duplicate_id_is_rejected() {
    let client = Client::open_memory();
    let db = client.database("d").unwrap();
    let coll = db.collection("c").unwrap();
    let mut a = Document::new();
    a.insert("_id", Value::String("a".into()));
    coll.insert_one(a.clone()).unwrap();
    assert!(coll.insert_one(a).is_err());
}

#[test]
fn update_one_applies_set_and_inc() {
    let client = Client::open_memory();
    let db = client.database("d").unwrap();
    let coll = db.collection("c").unwrap();
    coll.insert_one(doc(&[("name", Value::String("a".into())), ("age", Value::Int64(1))]))
        .unwrap();

    let mut update = Document::new();
    let mut set = Document::new();
    set.insert("name", Value::String("b".into()));
    update.insert("$set", Value::Object(set));
    let mut inc = Document::new();
    inc.insert("age", Value::Int64(9));
    update.insert("$inc", Value::Object(inc));

    let result = coll
        .update_one(&doc(&[("name", Value::String("a".into()))]), &update)
        .unwrap();
    assert_eq!(result.matched_count, 1);
    assert_eq!(result.modified_count, 1);

    let updated = coll
        .find_one(&doc(&[("name", Value::String("b".into()))]))
        .unwrap()
        .unwrap();
    assert_eq!(updated.get("age"), Some(&Value::Int64(10)));
}

#[test]
fn delete_many_removes_matches_only() {
    let client = Client::open_memory();
    let db = client.database("d").unwrap();
    let coll = db.collection("c").unwrap();
    for i in 0..5 {
        coll.insert_one(doc(&[("group", Value::Int64(i % 2))])).unwrap();
    }
    let result = coll
        .delete_many(&doc(&[("group", Value::Int64(0))]))
        .unwrap();
    assert_eq!(result.deleted_count, 3);
    assert_eq!(coll.count_documents(&Document::new()).unwrap(), 2);
}

#[test]
fn index_accelerated_equality_and_range_queries() {
    let client = Client::open_memory();
    let db = client.database("d").unwrap();
    let coll = db.collection("c").unwrap();
    coll.create_index("age", 1, false, None).unwrap();

    for age in [10, 20, 20, 30] {
        coll.insert_one(doc(&[("age", Value::Int64(age))])).unwrap();
    }

    let mut gt = Document::new();
    let mut ops = Document::new();
    ops.insert("$gt", Value::Int64(15));
    gt.insert("age", Value::Object(ops));
    let results = coll.find(&gt, &[], 0, None).unwrap();
    assert_eq!(results.len(), 3);
}

#[test]
fn unique_index_rejects_duplicate_field_value() {
    let client = Client::open_memory();
    let db = client.database("d").unwrap();
    let coll = db.collection("c").unwrap();
    coll.create_index("email", 1, true, None).unwrap();
    coll.insert_one(doc(&[("email", Value::String("a@x.com".into()))]))
        .unwrap();
    assert!(coll
        .insert_one(doc(&[("email", Value::String("a@x.com".into()))]))
        .is_err());
}

#[test]
fn drop_index_on_missing_name_fails() {
    let client = Client::open_memory();
    let db = client.database("d").unwrap();
    let coll = db.collection("c").unwrap();
    assert!(coll.drop_index("nope").is_err());
}

#[test]
fn sort_orders_results_across_find() {
    let client = Client::open_memory();
    let db = client.database("d").unwrap();
    let coll = db.collection("c").unwrap();
    for age in [30, 10, 20] {
        coll.insert_one(doc(&[("age", Value::Int64(age))])).unwrap();
    }
    let results = coll
        .find(&Document::new(), &[("age".into(), SortDirection::Asc)], 0, None)
        .unwrap();
    let ages: Vec<_> = results.iter().map(|d| d.get("age").unwrap().clone()).collect();
    assert_eq!(ages, vec![Value::Int64(10), Value::Int64(20), Value::Int64(30)]);
}

#[test]
fn distinct_deduplicates_values() {
    let client = Client::open_memory();
    let db = client.database("d").unwrap();
    let coll = db.collection("c").unwrap();
    for group in ["a", "b", "a"] {
        coll.insert_one(doc(&[("group", Value::String(group.into()))])).unwrap();
    }
    let mut values = coll.distinct("group", &Document::new()).unwrap();
    values.sort_by(|a, b| format!("{a:?}").cmp(&format!("{b:?}")));
    assert_eq!(values, vec![Value::String("a".into()), Value::String("b".into())]);
}

#[test]
fn data_survives_reopening_the_disk_client() {
    let tmp = tempfile::tempdir().unwrap();
    let id = {
        let client = Client::open_disk(tmp.path()).unwrap();
        let db = client.database("d").unwrap();
        let coll = db.collection("c").unwrap();
        coll.insert_one(doc(&[("name", Value::String("persisted".into()))]))
            .unwrap()
            .inserted_id
    };

    let client = Client::open_disk(tmp.path()).unwrap();
    let db = client.database("d").unwrap();
    let coll = db.collection("c").unwrap();
    let found = coll
        .find_one(&doc(&[("name", Value::String("persisted".into()))]))
        .unwrap()
        .unwrap();
    assert_eq!(found.get("_id"), Some(&id));
}

#[test]
fn memory_strict_mode_round_trips_through_bson() {
    let client = Client::open_memory_strict();
    let db = client.database("d").unwrap();
    let coll = db.collection("c").unwrap();
    coll.insert_one(doc(&[("n", Value::Int64(7))])).unwrap();
    let found = coll.find_one(&Document::new()).unwrap().unwrap();
    assert_eq!(found.get("n"), Some(&Value::Int64(7)));
}

#[test]
fn list_valued_field_matches_by_element() {
    let client = Client::open_memory();
    let db = client.database("d").unwrap();
    let coll = db.collection("c").unwrap();
    coll.insert_one(doc(&[(
        "v",
        Value::List(vec![Value::Int64(1), Value::Int64(2), Value::Int64(3)]),
    )]))
    .unwrap();

    let found = coll.find_one(&doc(&[("v", Value::Int64(2))])).unwrap();
    assert!(found.is_some());
}

#[test]
fn list_valued_field_in_operator_matches_overlap() {
    let client = Client::open_memory();
    let db = client.database("d").unwrap();
    let coll = db.collection("c").unwrap();
    coll.insert_one(doc(&[("v", Value::List(vec![Value::Int64(1), Value::Int64(2)]))]))
        .unwrap();

    let mut ops = Document::new();
    ops.insert("$in", Value::List(vec![Value::Int64(2), Value::Int64(99)]));
    let filter = doc(&[("v", Value::Object(ops))]);
    assert_eq!(coll.find(&filter, &[], 0, None).unwrap().len(), 1);
}

#[test]
fn index_over_list_field_finds_by_element() {
    let client = Client::open_memory();
    let db = client.database("d").unwrap();
    let coll = db.collection("c").unwrap();
    coll.create_index("v", 1, false, None).unwrap();
    coll.insert_one(doc(&[("v", Value::List(vec![Value::Int64(1), Value::Int64(2)]))]))
        .unwrap();

    let found = coll.find_one(&doc(&[("v", Value::Int64(1))])).unwrap();
    assert!(found.is_some());
}

#[test]
fn descending_index_is_named_with_direction() {
    let client = Client::open_memory();
    let db = client.database("d").unwrap();
    let coll = db.collection("c").unwrap();
    let name = coll.create_index("age", -1, false, None).unwrap();
    assert_eq!(name, "age_-1");
    assert!(coll.drop_index_by_keys("age", -1).is_ok());
}

#[test]
fn ne_filter_is_accelerated_by_an_index() {
    let client = Client::open_memory();
    let db = client.database("d").unwrap();
    let coll = db.collection("c").unwrap();
    coll.create_index("age", 1, false, None).unwrap();
    for age in [10, 20, 30] {
        coll.insert_one(doc(&[("age", Value::Int64(age))])).unwrap();
    }
    let mut ops = Document::new();
    ops.insert("$ne", Value::Int64(20));
    let filter = doc(&[("age", Value::Object(ops))]);
    let results = coll.find(&filter, &[], 0, None).unwrap();
    assert_eq!(results.len(), 2);
}

#[test]
fn insert_many_ordered_stops_at_first_duplicate() {
    let client = Client::open_memory();
    let db = client.database("d").unwrap();
    let coll = db.collection("c").unwrap();
    let mut a = Document::new();
    a.insert("_id", Value::String("a".into()));
    let mut dup = Document::new();
    dup.insert("_id", Value::String("a".into()));
    let mut c = Document::new();
    c.insert("_id", Value::String("c".into()));

    let err = coll.insert_many(vec![a, dup, c], true).unwrap_err();
    assert!(matches!(err, docstore::Error::DuplicateKey(_)));
    assert_eq!(coll.count_documents(&Document::new()).unwrap(), 1);
}

#[test]
fn insert_many_unordered_keeps_non_duplicates() {
    let client = Client::open_memory();
    let db = client.database("d").unwrap();
    let coll = db.collection("c").unwrap();
    let mut a = Document::new();
    a.insert("_id", Value::String("a".into()));
    let mut dup = Document::new();
    dup.insert("_id", Value::String("a".into()));
    let mut c = Document::new();
    c.insert("_id", Value::String("c".into()));

    let err = coll.insert_many(vec![a, dup, c], false).unwrap_err();
    assert!(matches!(err, docstore::Error::OperationFailure(_)));
    assert_eq!(coll.count_documents(&Document::new()).unwrap(), 2);
}

#[test]
fn replace_one_upserts_when_no_match_and_upsert_is_set() {
    let client = Client::open_memory();
    let db = client.database("d").unwrap();
    let coll = db.collection("c").unwrap();

    let result = coll
        .replace_one(
            &doc(&[("name", Value::String("nope".into()))]),
            doc(&[("name", Value::String("fresh".into()))]),
            true,
        )
        .unwrap();
    assert_eq!(result.matched_count, 0);
    assert!(result.upserted_id.is_some());
    assert_eq!(coll.count_documents(&Document::new()).unwrap(), 1);

    let result = coll
        .replace_one(
            &doc(&[("name", Value::String("nope".into()))]),
            doc(&[("name", Value::String("still-nope".into()))]),
            false,
        )
        .unwrap();
    assert_eq!(result.matched_count, 0);
    assert!(result.upserted_id.is_none());
    assert_eq!(coll.count_documents(&Document::new()).unwrap(), 1);
}

#[test]
fn push_onto_a_non_list_field_fails() {
    let client = Client::open_memory();
    let db = client.database("d").unwrap();
    let coll = db.collection("c").unwrap();
    coll.insert_one(doc(&[("tags", Value::String("not-a-list".into()))]))
        .unwrap();

    let mut push = Document::new();
    push.insert("tags", Value::String("x".into()));
    let mut update = Document::new();
    update.insert("$push", Value::Object(push));

    assert!(coll.update_one(&Document::new(), &update).is_err());
}

#[test]
fn absent_field_never_matches_any_operator() {
    let client = Client::open_memory();
    let db = client.database("d").unwrap();
    let coll = db.collection("c").unwrap();
    coll.insert_one(doc(&[("name", Value::String("a".into()))])).unwrap();

    let mut ops = Document::new();
    ops.insert("$ne", Value::Int64(5));
    let filter = doc(&[("missing", Value::Object(ops))]);
    assert_eq!(coll.find(&filter, &[], 0, None).unwrap().len(), 0);

    let null_filter = doc(&[("missing", Value::Null)]);
    assert_eq!(coll.find(&null_filter, &[], 0, None).unwrap().len(), 0);
}

#[test]
fn multi_field_indexed_filter_intersects_candidates() {
    let client = Client::open_memory();
    let db = client.database("d").unwrap();
    let coll = db.collection("c").unwrap();
    coll.create_index("age", 1, false, None).unwrap();
    coll.create_index("group", 1, false, None).unwrap();

    coll.insert_one(doc(&[("age", Value::Int64(20)), ("group", Value::String("a".into()))]))
        .unwrap();
    coll.insert_one(doc(&[("age", Value::Int64(20)), ("group", Value::String("b".into()))]))
        .unwrap();
    coll.insert_one(doc(&[("age", Value::Int64(30)), ("group", Value::String("a".into()))]))
        .unwrap();

    let filter = doc(&[("age", Value::Int64(20)), ("group", Value::String("a".into()))]);
    let results = coll.find(&filter, &[], 0, None).unwrap();
    assert_eq!(results.len(), 1);
}

#[test]
fn drop_collection_removes_its_documents() {
    let client = Client::open_memory();
    let db = client.database("d").unwrap();
    let coll = db.collection("c").unwrap();
    coll.insert_one(doc(&[("n", Value::Int64(1))])).unwrap();
    db.drop_collection("c").unwrap();

    let coll = db.collection("c").unwrap();
    assert_eq!(coll.count_documents(&Document::new()).unwrap(), 0);
}
