//! The document store client facade.
//!
//! [`DocumentStoreClient`] holds the connection to a database (through a [`Driver`]) and
//! exposes every operation as a plain method taking an [`OpContext`], a target
//! [`Namespace`] and the operation's own arguments.
//!
//! # Lifecycle
//!
//! A client is created open, either from an already built driver with
//! [`DocumentStoreClient::new`] or by connecting a [`DriverBuilder`] with
//! [`DocumentStoreClient::connect`]. [`DocumentStoreClient::close`] consumes the client,
//! so nothing can be issued after the connection is released. There is no reconnection:
//! a dropped connection surfaces as an error from whichever operation noticed it.
//!
//! # Example
//!
//! ```ignore
//! use docstore::prelude::*;
//!
//! let client = DocumentStoreClient::connect(MemoryDriver::builder()).await?;
//! let ctx = OpContext::background();
//! let ns = Namespace::new("testDB", "testColl")?;
//!
//! client.insert_one(&ctx, &ns, doc! { "foo": "bar" }).await?;
//! let found = client.find_one(&ctx, &ns, doc! { "foo": "bar" }).await?;
//!
//! client.close().await?;
//! ```

use bson::Bson;
use futures::future::BoxFuture;
use serde::de::DeserializeOwned;
use tracing::{debug, info, warn};

use crate::{
    collection::Collection,
    context::OpContext,
    cursor::DocumentCursor,
    document::{Document, from_document},
    driver::{Driver, DriverBuilder},
    error::{DocumentStoreError, DocumentStoreResult},
    namespace::{Namespace, validate_database_name},
    options::{FindOptions, IndexDescription, IndexModel, UpdateOptions},
    outcome::{BulkWriteReport, DeleteOutcome, InsertOneOutcome, UpdateOutcome},
    transaction::{TransactionContext, run_transaction},
};

/// A typed facade over a document database driver.
///
/// The client adds no locking or queuing of its own; it is as concurrent as the driver
/// it wraps and can be shared by reference across tasks.
#[derive(Debug)]
pub struct DocumentStoreClient<D: Driver> {
    driver: D,
}

impl<D: Driver> DocumentStoreClient<D> {
    /// Wraps an already connected driver.
    pub fn new(driver: D) -> Self {
        Self { driver }
    }

    /// Connects using `builder` and wraps the resulting driver.
    ///
    /// # Errors
    ///
    /// Returns whatever the builder reports, typically
    /// [`DocumentStoreError::Initialization`] or [`DocumentStoreError::Connectivity`].
    pub async fn connect<B>(builder: B) -> DocumentStoreResult<Self>
    where
        B: DriverBuilder<Driver = D>,
    {
        let driver = builder.build().await?;
        info!(driver = ?driver, "document store client connected");

        Ok(Self::new(driver))
    }

    /// The underlying driver.
    pub fn driver(&self) -> &D {
        &self.driver
    }

    /// A view of this client bound to one namespace.
    pub fn collection(&self, namespace: Namespace) -> Collection<'_, D> {
        Collection::new(namespace, self)
    }

    /// Checks that the database is reachable.
    pub async fn ping(&self, ctx: &OpContext) -> DocumentStoreResult<()> {
        ctx.run(self.driver.ping()).await
    }

    /// Inserts a single document.
    ///
    /// # Errors
    ///
    /// [`DocumentStoreError::Connectivity`] or [`DocumentStoreError::Validation`] as
    /// reported by the driver, e.g. for a duplicate `_id`.
    pub async fn insert_one(
        &self,
        ctx: &OpContext,
        namespace: &Namespace,
        document: Document,
    ) -> DocumentStoreResult<InsertOneOutcome> {
        debug!(%namespace, "insert_one");
        ctx.run(self.driver.insert_one(namespace, document, None)).await
    }

    /// Inserts many documents, reporting the outcome of each one by position.
    ///
    /// Every document is attempted even when earlier ones are rejected. Only failures of
    /// the request as a whole (connectivity, deadline) are returned as `Err`.
    pub async fn insert_many(
        &self,
        ctx: &OpContext,
        namespace: &Namespace,
        documents: Vec<Document>,
    ) -> DocumentStoreResult<BulkWriteReport> {
        debug!(%namespace, count = documents.len(), "insert_many");
        let report = ctx.run(self.driver.insert_many(namespace, documents, None)).await?;

        if !report.is_complete() {
            warn!(
                %namespace,
                failed = report.failures().count(),
                total = report.len(),
                "bulk insert partially failed"
            );
        }

        Ok(report)
    }

    /// Returns the first document matching `filter`.
    ///
    /// # Errors
    ///
    /// [`DocumentStoreError::NotFound`] when nothing matches.
    pub async fn find_one(
        &self,
        ctx: &OpContext,
        namespace: &Namespace,
        filter: Document,
    ) -> DocumentStoreResult<Document> {
        debug!(%namespace, "find_one");
        ctx.run(self.driver.find_one(namespace, filter, None))
            .await?
            .ok_or_else(|| DocumentStoreError::NotFound(namespace.to_string()))
    }

    /// Like [`find_one`](Self::find_one), decoding the document into `T`.
    pub async fn find_one_as<T: DeserializeOwned>(
        &self,
        ctx: &OpContext,
        namespace: &Namespace,
        filter: Document,
    ) -> DocumentStoreResult<T> {
        from_document(self.find_one(ctx, namespace, filter).await?)
    }

    /// Opens a lazy cursor over the documents matching `filter`.
    ///
    /// The context bounds opening the cursor; consuming it is up to the caller.
    pub async fn find(
        &self,
        ctx: &OpContext,
        namespace: &Namespace,
        filter: Document,
        options: FindOptions,
    ) -> DocumentStoreResult<DocumentCursor> {
        debug!(%namespace, "find");
        ctx.run(self.driver.find(namespace, filter, options, None)).await
    }

    /// Reads every document matching `filter` into memory.
    ///
    /// The first failure while draining aborts the call and discards what was read. An
    /// empty or missing collection yields an empty vector.
    pub async fn find_all(
        &self,
        ctx: &OpContext,
        namespace: &Namespace,
        filter: Document,
    ) -> DocumentStoreResult<Vec<Document>> {
        debug!(%namespace, "find_all");
        ctx.run(async {
            self.driver
                .find(namespace, filter, FindOptions::default(), None)
                .await?
                .try_collect_all()
                .await
        })
        .await
    }

    /// Like [`find_all`](Self::find_all), decoding every document into `T`.
    pub async fn find_all_as<T: DeserializeOwned>(
        &self,
        ctx: &OpContext,
        namespace: &Namespace,
        filter: Document,
    ) -> DocumentStoreResult<Vec<T>> {
        self.find_all(ctx, namespace, filter)
            .await?
            .into_iter()
            .map(from_document)
            .collect()
    }

    /// Applies `update` (operators such as `$set`, or a replacement document) to the
    /// first document matching `filter`.
    pub async fn update_one(
        &self,
        ctx: &OpContext,
        namespace: &Namespace,
        filter: Document,
        update: Document,
    ) -> DocumentStoreResult<UpdateOutcome> {
        debug!(%namespace, "update_one");
        ctx.run(self.driver.update_one(namespace, filter, update, UpdateOptions::default(), None))
            .await
    }

    /// Like [`update_one`](Self::update_one), inserting a document built from the filter
    /// and the update when nothing matches.
    pub async fn upsert_one(
        &self,
        ctx: &OpContext,
        namespace: &Namespace,
        filter: Document,
        update: Document,
    ) -> DocumentStoreResult<UpdateOutcome> {
        debug!(%namespace, "upsert_one");
        ctx.run(self.driver.update_one(namespace, filter, update, UpdateOptions::upsert(), None))
            .await
    }

    /// Applies `update` to every document matching `filter`.
    pub async fn update_many(
        &self,
        ctx: &OpContext,
        namespace: &Namespace,
        filter: Document,
        update: Document,
    ) -> DocumentStoreResult<UpdateOutcome> {
        debug!(%namespace, "update_many");
        ctx.run(self.driver.update_many(namespace, filter, update, UpdateOptions::default(), None))
            .await
    }

    /// Deletes the first document matching `filter`.
    pub async fn delete_one(
        &self,
        ctx: &OpContext,
        namespace: &Namespace,
        filter: Document,
    ) -> DocumentStoreResult<DeleteOutcome> {
        debug!(%namespace, "delete_one");
        ctx.run(self.driver.delete_one(namespace, filter, None)).await
    }

    /// Deletes every document matching `filter`.
    pub async fn delete_many(
        &self,
        ctx: &OpContext,
        namespace: &Namespace,
        filter: Document,
    ) -> DocumentStoreResult<DeleteOutcome> {
        debug!(%namespace, "delete_many");
        ctx.run(self.driver.delete_many(namespace, filter, None)).await
    }

    /// Counts the documents matching `filter`; a missing collection counts as empty.
    pub async fn count(
        &self,
        ctx: &OpContext,
        namespace: &Namespace,
        filter: Document,
    ) -> DocumentStoreResult<u64> {
        debug!(%namespace, "count");
        ctx.run(self.driver.count(namespace, filter, None)).await
    }

    /// Distinct values of `field` among the documents matching `filter`.
    pub async fn distinct(
        &self,
        ctx: &OpContext,
        namespace: &Namespace,
        field: &str,
        filter: Document,
    ) -> DocumentStoreResult<Vec<Bson>> {
        debug!(%namespace, field, "distinct");
        ctx.run(self.driver.distinct(namespace, field, filter, None)).await
    }

    /// Runs an aggregation pipeline and returns a lazy cursor over its output.
    pub async fn aggregate(
        &self,
        ctx: &OpContext,
        namespace: &Namespace,
        pipeline: Vec<Document>,
    ) -> DocumentStoreResult<DocumentCursor> {
        debug!(%namespace, stages = pipeline.len(), "aggregate");
        ctx.run(self.driver.aggregate(namespace, pipeline, None)).await
    }

    /// Creates an index and returns its name.
    pub async fn create_index(
        &self,
        ctx: &OpContext,
        namespace: &Namespace,
        index: IndexModel,
    ) -> DocumentStoreResult<String> {
        debug!(%namespace, keys = %index.keys, "create_index");
        ctx.run(self.driver.create_index(namespace, index)).await
    }

    /// Describes the indexes of a collection, `_id_` included.
    ///
    /// # Errors
    ///
    /// [`DocumentStoreError::NotFound`] when the collection does not exist.
    pub async fn list_indexes(
        &self,
        ctx: &OpContext,
        namespace: &Namespace,
    ) -> DocumentStoreResult<Vec<IndexDescription>> {
        ctx.run(self.driver.list_indexes(namespace)).await
    }

    /// Drops the index called `name`. The `_id_` index cannot be dropped.
    pub async fn drop_index(
        &self,
        ctx: &OpContext,
        namespace: &Namespace,
        name: &str,
    ) -> DocumentStoreResult<()> {
        debug!(%namespace, name, "drop_index");
        ctx.run(self.driver.drop_index(namespace, name)).await
    }

    /// Drops a collection with all of its documents. There is no confirmation step.
    pub async fn drop_collection(&self, ctx: &OpContext, namespace: &Namespace) -> DocumentStoreResult<()> {
        info!(%namespace, "dropping collection");
        ctx.run(self.driver.drop_collection(namespace)).await
    }

    /// Drops a whole database. There is no confirmation step.
    pub async fn drop_database(&self, ctx: &OpContext, database: &str) -> DocumentStoreResult<()> {
        validate_database_name(database)?;
        info!(database, "dropping database");
        ctx.run(self.driver.drop_database(database)).await
    }

    /// Names of the databases holding data, sorted.
    pub async fn list_databases(&self, ctx: &OpContext) -> DocumentStoreResult<Vec<String>> {
        ctx.run(self.driver.list_databases()).await
    }

    /// Names of the collections in `database`, sorted. A missing database has none.
    pub async fn list_collections(&self, ctx: &OpContext, database: &str) -> DocumentStoreResult<Vec<String>> {
        validate_database_name(database)?;
        ctx.run(self.driver.list_collections(database)).await
    }

    /// Runs `callback` inside a transaction.
    ///
    /// The transaction commits when the callback returns `Ok` and is aborted when it
    /// returns `Err`. The callback's error is always the one reported: if the abort fails
    /// too, the result is [`DocumentStoreError::TransactionAbortFailed`] carrying both.
    ///
    /// `ctx` bounds the whole transaction, including every operation issued through the
    /// [`TransactionContext`]. The abort itself is not bounded, so a transaction that
    /// timed out is still rolled back.
    ///
    /// # Example
    ///
    /// ```ignore
    /// let moved = client
    ///     .run_transaction(&ctx, |tx| Box::pin(async move {
    ///         tx.delete_one(&from, doc! { "sku": "A1" }).await?;
    ///         tx.insert_one(&to, doc! { "sku": "A1" }).await?;
    ///         Ok(1)
    ///     }))
    ///     .await?;
    /// ```
    pub async fn run_transaction<'c, T, F>(&'c self, ctx: &OpContext, callback: F) -> DocumentStoreResult<T>
    where
        F: for<'t> FnOnce(&'t mut TransactionContext<'c, D>) -> BoxFuture<'t, DocumentStoreResult<T>>,
    {
        run_transaction(&self.driver, ctx, callback).await
    }

    /// Releases the connection. The client cannot be used afterwards.
    pub async fn close(self) -> DocumentStoreResult<()> {
        info!("closing document store client");
        self.driver.shutdown().await
    }
}

impl<D: Driver + 'static> DocumentStoreClient<D> {
    /// Erases the driver type, for code that selects drivers at runtime.
    pub fn into_dyn(self) -> DocumentStoreClient<Box<dyn crate::driver::DynDriver>> {
        DocumentStoreClient::new(Box::new(self.driver))
    }
}

impl DocumentStoreClient<Box<dyn crate::driver::DynDriver>> {
    /// Recovers the concrete driver behind a type-erased client.
    pub fn downcast_driver<D: Driver + 'static>(&self) -> Option<&D> {
        <dyn crate::driver::DynDriver>::as_any(&*self.driver).downcast_ref::<D>()
    }
}
