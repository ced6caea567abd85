//! Tests against a live MongoDB server.
//!
//! Set `MONGO_URI` to run them; they return early otherwise. Transactions need a replica
//! set, so the transaction test also requires `MONGO_REPLICA_SET=1`.

use std::time::Duration;

use bson::doc;
use docstore_core::{
    client::DocumentStoreClient,
    context::OpContext,
    error::DocumentStoreError,
    namespace::Namespace,
};
use docstore_mongodb::{MongoDriver, MongoDriverBuilder};

async fn connect(database: &str) -> Option<(DocumentStoreClient<MongoDriver>, Namespace)> {
    let uri = std::env::var("MONGO_URI").ok()?;
    let client = DocumentStoreClient::connect(
        MongoDriverBuilder::new(&uri).server_selection_timeout(Duration::from_secs(5)),
    )
    .await
    .expect("connect to MONGO_URI");

    let ns = Namespace::new(database, "testColl").unwrap();
    client.drop_database(&OpContext::background(), database).await.unwrap();

    Some((client, ns))
}

#[tokio::test]
async fn crud_round_trip() {
    let Some((client, ns)) = connect("docstore_live_crud").await else {
        return;
    };
    let ctx = OpContext::background().with_timeout(Duration::from_secs(30));

    client.insert_one(&ctx, &ns, doc! { "foo": "bar" }).await.unwrap();
    let found = client.find_one(&ctx, &ns, doc! { "foo": "bar" }).await.unwrap();
    assert_eq!(found.get_str("foo").unwrap(), "bar");

    let outcome = client
        .update_one(&ctx, &ns, doc! { "foo": "bar" }, doc! { "$set": { "foo": "baz" } })
        .await
        .unwrap();
    assert_eq!(outcome.modified, 1);
    assert_eq!(client.count(&ctx, &ns, doc! { "foo": "baz" }).await.unwrap(), 1);

    client.delete_one(&ctx, &ns, doc! { "foo": "baz" }).await.unwrap();
    assert!(client.find_all(&ctx, &ns, doc! {}).await.unwrap().is_empty());

    client.drop_database(&ctx, ns.database()).await.unwrap();
    client.close().await.unwrap();
}

#[tokio::test]
async fn bulk_insert_reports_duplicates_by_position() {
    let Some((client, ns)) = connect("docstore_live_bulk").await else {
        return;
    };
    let ctx = OpContext::background();

    let report = client
        .insert_many(&ctx, &ns, vec![doc! { "_id": 1 }, doc! { "_id": 1 }, doc! { "_id": 2 }])
        .await
        .unwrap();

    let failed = report.failures().map(|(position, failure)| (position, failure.code)).collect::<Vec<_>>();
    assert_eq!(failed, vec![(1, Some(11000))]);
    assert_eq!(client.count(&ctx, &ns, doc! {}).await.unwrap(), 2);

    client.drop_database(&ctx, ns.database()).await.unwrap();
    client.close().await.unwrap();
}

#[tokio::test]
async fn transaction_rolls_back_on_error() {
    if std::env::var("MONGO_REPLICA_SET").is_err() {
        return;
    }
    let Some((client, ns)) = connect("docstore_live_tx").await else {
        return;
    };
    let ctx = OpContext::background();
    client.insert_one(&ctx, &ns, doc! { "seed": true }).await.unwrap();

    let result: Result<(), _> = client
        .run_transaction(&ctx, |tx| {
            let ns = ns.clone();
            Box::pin(async move {
                tx.insert_one(&ns, doc! { "x": 1 }).await?;
                Err(DocumentStoreError::validation("rejected by caller"))
            })
        })
        .await;

    assert!(matches!(result, Err(DocumentStoreError::Validation { .. })));
    assert_eq!(client.count(&ctx, &ns, doc! {}).await.unwrap(), 1);

    client.drop_database(&ctx, ns.database()).await.unwrap();
    client.close().await.unwrap();
}
