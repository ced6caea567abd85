//! End-to-end behavior of the client over the in-memory driver.

use docstore::prelude::*;
use futures::TryStreamExt;
use serde::{Deserialize, Serialize};

async fn client() -> DocumentStoreClient<MemoryDriver> {
    DocumentStoreClient::connect(MemoryDriver::builder()).await.unwrap()
}

fn ns() -> Namespace {
    Namespace::new("testDB", "testColl").unwrap()
}

#[tokio::test]
async fn insert_update_find_delete() {
    let client = client().await;
    let ctx = OpContext::background().with_timeout(Duration::from_secs(5));
    let ns = ns();

    client.insert_one(&ctx, &ns, doc! { "foo": "bar" }).await.unwrap();
    let found = client.find_one(&ctx, &ns, doc! { "foo": "bar" }).await.unwrap();
    assert_eq!(found.get_str("foo").unwrap(), "bar");
    assert!(found.get_object_id("_id").is_ok());

    let outcome = client
        .update_one(&ctx, &ns, doc! { "foo": "bar" }, doc! { "$set": { "foo": "baz" } })
        .await
        .unwrap();
    assert_eq!((outcome.matched, outcome.modified), (1, 1));

    let found = client.find_one(&ctx, &ns, doc! { "foo": "baz" }).await.unwrap();
    assert_eq!(found.get_str("foo").unwrap(), "baz");
    assert!(client.find_one(&ctx, &ns, doc! { "foo": "bar" }).await.unwrap_err().is_not_found());

    client.insert_one(&ctx, &ns, doc! { "foo": "qux" }).await.unwrap();
    assert_eq!(client.count(&ctx, &ns, doc! {}).await.unwrap(), 2);

    let deleted = client.delete_one(&ctx, &ns, doc! { "foo": "baz" }).await.unwrap();
    assert_eq!(deleted.deleted, 1);
    assert_eq!(client.count(&ctx, &ns, doc! {}).await.unwrap(), 1);

    client.close().await.unwrap();
}

#[tokio::test]
async fn find_all_on_missing_collection_is_empty() {
    let client = client().await;
    let ctx = OpContext::background();

    let documents = client.find_all(&ctx, &ns(), doc! {}).await.unwrap();

    assert!(documents.is_empty());
    assert_eq!(client.count(&ctx, &ns(), doc! { "x": 1 }).await.unwrap(), 0);
}

#[tokio::test]
async fn many_variants_touch_every_match() {
    let client = client().await;
    let ctx = OpContext::background();
    let ns = ns();

    let report = client
        .insert_many(&ctx, &ns, vec![doc! { "n": 1, "odd": true }, doc! { "n": 2, "odd": false }, doc! { "n": 3, "odd": true }])
        .await
        .unwrap();
    assert!(report.is_complete());
    assert_eq!(report.inserted_ids().count(), 3);

    let updated = client
        .update_many(&ctx, &ns, doc! { "odd": true }, doc! { "$inc": { "n": 10 } })
        .await
        .unwrap();
    assert_eq!(updated.modified, 2);
    assert_eq!(client.count(&ctx, &ns, doc! { "n": { "$gt": 10 } }).await.unwrap(), 2);

    let deleted = client.delete_many(&ctx, &ns, doc! { "odd": true }).await.unwrap();
    assert_eq!(deleted.deleted, 2);
    assert_eq!(client.count(&ctx, &ns, doc! {}).await.unwrap(), 1);
}

#[tokio::test]
async fn bulk_insert_reports_each_position() {
    let client = client().await;
    let ctx = OpContext::background();
    let ns = ns();

    let report = client
        .insert_many(&ctx, &ns, vec![doc! { "_id": 1 }, doc! { "_id": 1 }, doc! { "_id": 2 }])
        .await
        .unwrap();

    assert_eq!(report.len(), 3);
    assert!(!report.is_complete());
    let failed = report.failures().map(|(position, failure)| (position, failure.code)).collect::<Vec<_>>();
    assert_eq!(failed, vec![(1, Some(11000))]);
    let inserted = report.inserted_ids().map(|(position, id)| (position, id.clone())).collect::<Vec<_>>();
    assert_eq!(inserted, vec![(0, Bson::Int32(1)), (2, Bson::Int32(2))]);
    assert_eq!(client.count(&ctx, &ns, doc! {}).await.unwrap(), 2);
}

#[tokio::test]
async fn upsert_inserts_when_nothing_matches() {
    let client = client().await;
    let ctx = OpContext::background();
    let ns = ns();

    let outcome = client
        .upsert_one(&ctx, &ns, doc! { "sku": "A1" }, doc! { "$set": { "qty": 5 } })
        .await
        .unwrap();

    assert_eq!(outcome.matched, 0);
    assert!(outcome.upserted_id.is_some());
    let found = client.find_one(&ctx, &ns, doc! { "sku": "A1" }).await.unwrap();
    assert_eq!(found.get_i32("qty").unwrap(), 5);
}

#[tokio::test]
async fn dotted_filters_match_inside_arrays() {
    let client = client().await;
    let ctx = OpContext::background();
    let ns = ns();
    client
        .insert_one(&ctx, &ns, doc! { "items": [ { "sku": "a" }, { "sku": "b" } ] })
        .await
        .unwrap();

    assert_eq!(client.count(&ctx, &ns, doc! { "items.sku": "b" }).await.unwrap(), 1);
    assert_eq!(client.count(&ctx, &ns, doc! { "items.sku": "z" }).await.unwrap(), 0);
}

#[tokio::test]
async fn unmatched_update_creates_nothing() {
    let client = client().await;
    let ctx = OpContext::background();

    let outcome = client
        .update_one(&ctx, &ns(), doc! { "x": 1 }, doc! { "$set": { "y": 1 } })
        .await
        .unwrap();

    assert_eq!(outcome.matched, 0);
    assert!(client.list_collections(&ctx, "testDB").await.unwrap().is_empty());
    assert!(client.list_databases(&ctx).await.unwrap().is_empty());
}

#[tokio::test]
async fn find_applies_options_lazily() {
    let client = client().await;
    let ctx = OpContext::background();
    let ns = ns();
    let documents = (1..=5).map(|n| doc! { "n": n, "label": format!("item-{n}") }).collect();
    client.insert_many(&ctx, &ns, documents).await.unwrap();

    let options = FindOptions::builder()
        .sort(doc! { "n": -1 })
        .skip(1)
        .limit(2)
        .projection(doc! { "n": 1, "_id": 0 })
        .build();
    let cursor = client.find(&ctx, &ns, doc! {}, options).await.unwrap();
    let page = cursor.try_collect::<Vec<_>>().await.unwrap();

    assert_eq!(page, vec![doc! { "n": 4 }, doc! { "n": 3 }]);
}

#[tokio::test]
async fn typed_reads_decode_documents() {
    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Exercise {
        name: String,
        sets: i32,
    }

    let client = client().await;
    let ctx = OpContext::background();
    let ns = Namespace::new("Fitness", "exercises").unwrap();

    let squat = to_document(&Exercise { name: "squat".into(), sets: 5 }).unwrap();
    client.insert_one(&ctx, &ns, squat).await.unwrap();

    let found: Exercise = client.find_one_as(&ctx, &ns, doc! { "name": "squat" }).await.unwrap();
    assert_eq!(found, Exercise { name: "squat".into(), sets: 5 });

    let all: Vec<Exercise> = client.find_all_as(&ctx, &ns, doc! {}).await.unwrap();
    assert_eq!(all.len(), 1);

    let err = client.find_one_as::<Exercise>(&ctx, &ns, doc! { "name": "lunge" }).await.unwrap_err();
    assert!(err.is_not_found());
}

#[tokio::test]
async fn distinct_and_aggregate() {
    let client = client().await;
    let ctx = OpContext::background();
    let ns = ns();
    client
        .insert_many(
            &ctx,
            &ns,
            vec![
                doc! { "item": "apple", "qty": 3 },
                doc! { "item": "pear", "qty": 1 },
                doc! { "item": "apple", "qty": 4 },
            ],
        )
        .await
        .unwrap();

    let items = client.distinct(&ctx, &ns, "item", doc! {}).await.unwrap();
    assert_eq!(items, vec![Bson::from("apple"), Bson::from("pear")]);

    let pipeline = vec![
        doc! { "$group": { "_id": "$item", "total": { "$sum": "$qty" } } },
        doc! { "$sort": { "_id": 1 } },
    ];
    let totals = client
        .aggregate(&ctx, &ns, pipeline)
        .await
        .unwrap()
        .try_collect_all()
        .await
        .unwrap();
    assert_eq!(totals, vec![doc! { "_id": "apple", "total": 7 }, doc! { "_id": "pear", "total": 1 }]);

    let err = client
        .aggregate(&ctx, &ns, vec![doc! { "$bogus": {} }])
        .await
        .unwrap_err();
    assert!(matches!(err, DocumentStoreError::Validation { .. }));
}

#[tokio::test]
async fn unique_index_rejects_duplicates() {
    let client = client().await;
    let ctx = OpContext::background();
    let ns = ns();

    let name = client
        .create_index(&ctx, &ns, IndexModel::new(doc! { "email": 1 }).unique(true))
        .await
        .unwrap();
    assert_eq!(name, "email_1");

    client.insert_one(&ctx, &ns, doc! { "email": "a@example.com" }).await.unwrap();
    let err = client
        .insert_one(&ctx, &ns, doc! { "email": "a@example.com" })
        .await
        .unwrap_err();
    assert_eq!(err.code(), Some(11000));

    let names = client
        .list_indexes(&ctx, &ns)
        .await
        .unwrap()
        .into_iter()
        .map(|index| index.name)
        .collect::<Vec<_>>();
    assert_eq!(names, vec!["_id_", "email_1"]);

    client.drop_index(&ctx, &ns, "email_1").await.unwrap();
    client.insert_one(&ctx, &ns, doc! { "email": "a@example.com" }).await.unwrap();
}

#[tokio::test]
async fn listing_and_dropping() {
    let client = client().await;
    let ctx = OpContext::background();
    let other = Namespace::new("testDB", "other").unwrap();
    let alpha = Namespace::new("alpha", "things").unwrap();

    for namespace in [&ns(), &other, &alpha] {
        client.insert_one(&ctx, namespace, doc! {}).await.unwrap();
    }

    assert_eq!(client.list_databases(&ctx).await.unwrap(), vec!["alpha", "testDB"]);
    assert_eq!(client.list_collections(&ctx, "testDB").await.unwrap(), vec!["other", "testColl"]);

    client.drop_collection(&ctx, &other).await.unwrap();
    assert_eq!(client.list_collections(&ctx, "testDB").await.unwrap(), vec!["testColl"]);

    client.drop_database(&ctx, "testDB").await.unwrap();
    assert_eq!(client.list_databases(&ctx).await.unwrap(), vec!["alpha"]);
    assert!(client.list_collections(&ctx, "testDB").await.unwrap().is_empty());

    // Dropping what is already gone is not an error.
    client.drop_database(&ctx, "testDB").await.unwrap();
    client.drop_collection(&ctx, &other).await.unwrap();
}

#[tokio::test]
async fn expired_deadline_fails_before_touching_data() {
    let client = client().await;
    let ctx = OpContext::background().with_timeout(Duration::ZERO);

    let err = client.insert_one(&ctx, &ns(), doc! { "foo": "bar" }).await.unwrap_err();

    assert!(matches!(err, DocumentStoreError::DeadlineExceeded));
    let count = client.count(&OpContext::background(), &ns(), doc! {}).await.unwrap();
    assert_eq!(count, 0);
}

#[tokio::test]
async fn cancelled_context_fails_every_operation() {
    let client = client().await;
    let (ctx, cancel) = OpContext::background().with_cancel();
    cancel.cancel();

    assert!(matches!(client.find_all(&ctx, &ns(), doc! {}).await, Err(DocumentStoreError::Cancelled)));
    assert!(matches!(client.list_databases(&ctx).await, Err(DocumentStoreError::Cancelled)));
    assert!(matches!(
        client.insert_many(&ctx, &ns(), vec![doc! {}]).await,
        Err(DocumentStoreError::Cancelled)
    ));
}

#[tokio::test]
async fn collection_view_binds_namespace() {
    let client = client().await;
    let ctx = OpContext::background();
    let exercises = client.collection(Namespace::new("Fitness", "exercises").unwrap());

    exercises.insert_one(&ctx, doc! { "name": "squat" }).await.unwrap();
    exercises.insert_one(&ctx, doc! { "name": "press" }).await.unwrap();

    assert_eq!(exercises.count(&ctx, doc! {}).await.unwrap(), 2);
    assert_eq!(client.count(&ctx, exercises.namespace(), doc! {}).await.unwrap(), 2);

    exercises.drop(&ctx).await.unwrap();
    assert!(exercises.find_all(&ctx, doc! {}).await.unwrap().is_empty());
}

#[tokio::test]
async fn connect_selects_driver_by_scheme() {
    let client = docstore::connect("memory://").await.unwrap();
    let ctx = OpContext::background();

    client.insert_one(&ctx, &ns(), doc! { "foo": "bar" }).await.unwrap();
    assert_eq!(client.count(&ctx, &ns(), doc! {}).await.unwrap(), 1);
    assert!(client.downcast_driver::<MemoryDriver>().is_some());
    client.close().await.unwrap();

    let err = docstore::connect("postgres://localhost/db").await.unwrap_err();
    assert!(matches!(err, DocumentStoreError::Initialization(_)));

    let err = docstore::connect("not a uri").await.unwrap_err();
    assert!(matches!(err, DocumentStoreError::Initialization(_)));
}
