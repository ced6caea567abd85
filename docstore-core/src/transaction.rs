//! Transaction scoping.
//!
//! [`TransactionContext`] is lent to the callback of
//! [`DocumentStoreClient::run_transaction`](crate::client::DocumentStoreClient::run_transaction)
//! for the duration of the call. Every operation issued through it runs inside the
//! transaction's session and under the context passed to `run_transaction`.

use bson::Bson;
use futures::future::BoxFuture;
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use crate::{
    context::OpContext,
    cursor::DocumentCursor,
    document::{Document, from_document},
    driver::{Driver, Session},
    error::{DocumentStoreError, DocumentStoreResult},
    namespace::Namespace,
    options::{FindOptions, UpdateOptions},
    outcome::{BulkWriteReport, DeleteOutcome, InsertOneOutcome, UpdateOutcome},
};

/// A handle scoping operations to one transaction.
///
/// The handle only exists inside the transaction callback; it is borrowed mutably, so it
/// cannot be retained once the callback returns.
#[derive(Debug)]
pub struct TransactionContext<'c, D: Driver> {
    driver: &'c D,
    session: Session,
    ctx: OpContext,
}

impl<'c, D: Driver> TransactionContext<'c, D> {
    /// The context bounding this transaction.
    pub fn context(&self) -> &OpContext {
        &self.ctx
    }

    pub async fn insert_one(
        &mut self,
        namespace: &Namespace,
        document: Document,
    ) -> DocumentStoreResult<InsertOneOutcome> {
        self.ctx
            .run(self.driver.insert_one(namespace, document, Some(&mut self.session)))
            .await
    }

    pub async fn insert_many(
        &mut self,
        namespace: &Namespace,
        documents: Vec<Document>,
    ) -> DocumentStoreResult<BulkWriteReport> {
        self.ctx
            .run(self.driver.insert_many(namespace, documents, Some(&mut self.session)))
            .await
    }

    /// Returns the first matching document, or [`DocumentStoreError::NotFound`].
    pub async fn find_one(&mut self, namespace: &Namespace, filter: Document) -> DocumentStoreResult<Document> {
        self.ctx
            .run(self.driver.find_one(namespace, filter, Some(&mut self.session)))
            .await?
            .ok_or_else(|| DocumentStoreError::NotFound(namespace.to_string()))
    }

    pub async fn find_one_as<T: DeserializeOwned>(
        &mut self,
        namespace: &Namespace,
        filter: Document,
    ) -> DocumentStoreResult<T> {
        from_document(self.find_one(namespace, filter).await?)
    }

    pub async fn find(
        &mut self,
        namespace: &Namespace,
        filter: Document,
        options: FindOptions,
    ) -> DocumentStoreResult<DocumentCursor> {
        self.ctx
            .run(self.driver.find(namespace, filter, options, Some(&mut self.session)))
            .await
    }

    pub async fn find_all(&mut self, namespace: &Namespace, filter: Document) -> DocumentStoreResult<Vec<Document>> {
        self.find(namespace, filter, FindOptions::default())
            .await?
            .try_collect_all()
            .await
    }

    pub async fn update_one(
        &mut self,
        namespace: &Namespace,
        filter: Document,
        update: Document,
    ) -> DocumentStoreResult<UpdateOutcome> {
        self.ctx
            .run(self.driver.update_one(
                namespace,
                filter,
                update,
                UpdateOptions::default(),
                Some(&mut self.session),
            ))
            .await
    }

    pub async fn upsert_one(
        &mut self,
        namespace: &Namespace,
        filter: Document,
        update: Document,
    ) -> DocumentStoreResult<UpdateOutcome> {
        self.ctx
            .run(self.driver.update_one(
                namespace,
                filter,
                update,
                UpdateOptions::upsert(),
                Some(&mut self.session),
            ))
            .await
    }

    pub async fn update_many(
        &mut self,
        namespace: &Namespace,
        filter: Document,
        update: Document,
    ) -> DocumentStoreResult<UpdateOutcome> {
        self.ctx
            .run(self.driver.update_many(
                namespace,
                filter,
                update,
                UpdateOptions::default(),
                Some(&mut self.session),
            ))
            .await
    }

    pub async fn delete_one(&mut self, namespace: &Namespace, filter: Document) -> DocumentStoreResult<DeleteOutcome> {
        self.ctx
            .run(self.driver.delete_one(namespace, filter, Some(&mut self.session)))
            .await
    }

    pub async fn delete_many(&mut self, namespace: &Namespace, filter: Document) -> DocumentStoreResult<DeleteOutcome> {
        self.ctx
            .run(self.driver.delete_many(namespace, filter, Some(&mut self.session)))
            .await
    }

    pub async fn count(&mut self, namespace: &Namespace, filter: Document) -> DocumentStoreResult<u64> {
        self.ctx
            .run(self.driver.count(namespace, filter, Some(&mut self.session)))
            .await
    }

    pub async fn distinct(
        &mut self,
        namespace: &Namespace,
        field: &str,
        filter: Document,
    ) -> DocumentStoreResult<Vec<Bson>> {
        self.ctx
            .run(self.driver.distinct(namespace, field, filter, Some(&mut self.session)))
            .await
    }

    pub async fn aggregate(
        &mut self,
        namespace: &Namespace,
        pipeline: Vec<Document>,
    ) -> DocumentStoreResult<DocumentCursor> {
        self.ctx
            .run(self.driver.aggregate(namespace, pipeline, Some(&mut self.session)))
            .await
    }
}

/// Starts a session and transaction, runs `callback`, then commits or aborts.
pub(crate) async fn run_transaction<'c, D, T, F>(
    driver: &'c D,
    ctx: &OpContext,
    callback: F,
) -> DocumentStoreResult<T>
where
    D: Driver,
    F: for<'t> FnOnce(&'t mut TransactionContext<'c, D>) -> BoxFuture<'t, DocumentStoreResult<T>>,
{
    let mut session = ctx.run(driver.start_session()).await?;
    ctx.run(driver.start_transaction(&mut session)).await?;
    debug!("transaction started");

    let mut tx = TransactionContext { driver, session, ctx: ctx.clone() };
    let result = ctx.run(callback(&mut tx)).await;
    let mut session = tx.session;

    match result {
        Ok(value) => {
            ctx.run(driver.commit_transaction(&mut session)).await?;
            debug!("transaction committed");

            Ok(value)
        }
        Err(cause) => match driver.abort_transaction(&mut session).await {
            Ok(()) => {
                debug!(error = %cause, "transaction aborted");

                Err(cause)
            }
            Err(abort) => {
                warn!(error = %cause, abort_error = %abort, "transaction abort failed");

                Err(DocumentStoreError::TransactionAbortFailed {
                    cause: Box::new(cause),
                    abort: Box::new(abort),
                })
            }
        },
    }
}
