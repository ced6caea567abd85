//! Transaction semantics over the in-memory driver.

use std::error::Error as _;

use docstore::prelude::*;

fn ns() -> Namespace {
    Namespace::new("testDB", "testColl").unwrap()
}

#[tokio::test]
async fn commit_makes_writes_visible() {
    let client = DocumentStoreClient::new(MemoryDriver::new());
    let ctx = OpContext::background();
    let ns = ns();

    let seen = client
        .run_transaction(&ctx, |tx| {
            let ns = ns.clone();
            Box::pin(async move {
                tx.insert_one(&ns, doc! { "sku": "A1", "qty": 3 }).await?;
                tx.update_one(&ns, doc! { "sku": "A1" }, doc! { "$inc": { "qty": 2 } }).await?;
                tx.count(&ns, doc! {}).await
            })
        })
        .await
        .unwrap();

    assert_eq!(seen, 1);
    let found = client.find_one(&ctx, &ns, doc! { "sku": "A1" }).await.unwrap();
    assert_eq!(found.get_i32("qty").unwrap(), 5);
}

#[tokio::test]
async fn callback_error_rolls_back_and_is_returned() {
    let client = DocumentStoreClient::new(MemoryDriver::new());
    let ctx = OpContext::background();
    let ns = ns();
    client.insert_one(&ctx, &ns, doc! { "seed": true }).await.unwrap();

    let result: DocumentStoreResult<()> = client
        .run_transaction(&ctx, |tx| {
            let ns = ns.clone();
            Box::pin(async move {
                tx.insert_one(&ns, doc! { "x": 1 }).await?;
                tx.delete_many(&ns, doc! { "seed": true }).await?;
                Err(DocumentStoreError::validation("rejected by caller"))
            })
        })
        .await;

    let err = result.unwrap_err();
    assert!(matches!(&err, DocumentStoreError::Validation { message, .. } if message == "rejected by caller"));
    let remaining = client.find_all(&ctx, &ns, doc! {}).await.unwrap();
    assert_eq!(remaining.len(), 1);
    assert!(remaining[0].get_bool("seed").unwrap());
}

#[tokio::test]
async fn abort_failure_keeps_the_callback_error() {
    let driver = MemoryDriver::new();
    driver.fail_next_abort();
    let client = DocumentStoreClient::new(driver);
    let ctx = OpContext::background();
    let ns = ns();

    let result: DocumentStoreResult<()> = client
        .run_transaction(&ctx, |tx| {
            let ns = ns.clone();
            Box::pin(async move {
                tx.insert_one(&ns, doc! { "x": 1 }).await?;
                Err(DocumentStoreError::validation("rejected by caller"))
            })
        })
        .await;

    let err = result.unwrap_err();
    let DocumentStoreError::TransactionAbortFailed { cause, abort } = &err else {
        panic!("expected an abort failure, got {err:?}");
    };
    assert!(matches!(**cause, DocumentStoreError::Validation { .. }));
    assert!(matches!(**abort, DocumentStoreError::Connectivity(_)));
    assert_eq!(err.source().map(ToString::to_string), Some(cause.to_string()));

    assert_eq!(client.count(&ctx, &ns, doc! {}).await.unwrap(), 0);
}

#[tokio::test]
async fn deadline_inside_callback_aborts() {
    let client = DocumentStoreClient::new(MemoryDriver::new());
    let ns = ns();
    let ctx = OpContext::background().with_timeout(Duration::from_millis(50));

    let result: DocumentStoreResult<()> = client
        .run_transaction(&ctx, |tx| {
            let ns = ns.clone();
            Box::pin(async move {
                tx.insert_one(&ns, doc! { "x": 1 }).await?;
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok(())
            })
        })
        .await;

    assert!(matches!(result, Err(DocumentStoreError::DeadlineExceeded)));
    let count = client.count(&OpContext::background(), &ns, doc! {}).await.unwrap();
    assert_eq!(count, 0);
}

#[tokio::test]
async fn reads_inside_transaction_see_own_writes() {
    let client = DocumentStoreClient::new(MemoryDriver::new());
    let ctx = OpContext::background();
    let ns = ns();

    let inside = client
        .run_transaction(&ctx, |tx| {
            let ns = ns.clone();
            Box::pin(async move {
                tx.insert_many(&ns, vec![doc! { "n": 1 }, doc! { "n": 2 }]).await?;
                tx.find_all(&ns, doc! { "n": { "$gte": 1 } }).await
            })
        })
        .await
        .unwrap();

    assert_eq!(inside.len(), 2);
    assert_eq!(client.count(&ctx, &ns, doc! {}).await.unwrap(), 2);
}
