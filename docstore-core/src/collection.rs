//! Namespace-bound views of a client.
//!
//! A [`Collection`] pairs a [`Namespace`] with a borrowed [`DocumentStoreClient`] so the
//! namespace need not be repeated on every call.
//!
//! # Example
//!
//! ```ignore
//! let exercises = client.collection(Namespace::new("Fitness", "exercises")?);
//!
//! exercises.insert_one(&ctx, doc! { "name": "squat" }).await?;
//! let all = exercises.find_all(&ctx, doc! {}).await?;
//! ```

use bson::Bson;
use serde::de::DeserializeOwned;

use crate::{
    client::DocumentStoreClient,
    context::OpContext,
    cursor::DocumentCursor,
    document::Document,
    driver::Driver,
    error::DocumentStoreResult,
    namespace::Namespace,
    options::{FindOptions, IndexDescription, IndexModel},
    outcome::{BulkWriteReport, DeleteOutcome, InsertOneOutcome, UpdateOutcome},
};

#[derive(Debug)]
pub struct Collection<'a, D: Driver> {
    namespace: Namespace,
    client: &'a DocumentStoreClient<D>,
}

impl<'a, D: Driver> Collection<'a, D> {
    pub(crate) fn new(namespace: Namespace, client: &'a DocumentStoreClient<D>) -> Self {
        Self { namespace, client }
    }

    pub fn namespace(&self) -> &Namespace {
        &self.namespace
    }

    pub async fn insert_one(&self, ctx: &OpContext, document: Document) -> DocumentStoreResult<InsertOneOutcome> {
        self.client.insert_one(ctx, &self.namespace, document).await
    }

    pub async fn insert_many(&self, ctx: &OpContext, documents: Vec<Document>) -> DocumentStoreResult<BulkWriteReport> {
        self.client.insert_many(ctx, &self.namespace, documents).await
    }

    pub async fn find_one(&self, ctx: &OpContext, filter: Document) -> DocumentStoreResult<Document> {
        self.client.find_one(ctx, &self.namespace, filter).await
    }

    pub async fn find_one_as<T: DeserializeOwned>(&self, ctx: &OpContext, filter: Document) -> DocumentStoreResult<T> {
        self.client.find_one_as(ctx, &self.namespace, filter).await
    }

    pub async fn find(
        &self,
        ctx: &OpContext,
        filter: Document,
        options: FindOptions,
    ) -> DocumentStoreResult<DocumentCursor> {
        self.client.find(ctx, &self.namespace, filter, options).await
    }

    pub async fn find_all(&self, ctx: &OpContext, filter: Document) -> DocumentStoreResult<Vec<Document>> {
        self.client.find_all(ctx, &self.namespace, filter).await
    }

    pub async fn find_all_as<T: DeserializeOwned>(&self, ctx: &OpContext, filter: Document) -> DocumentStoreResult<Vec<T>> {
        self.client.find_all_as(ctx, &self.namespace, filter).await
    }

    pub async fn update_one(
        &self,
        ctx: &OpContext,
        filter: Document,
        update: Document,
    ) -> DocumentStoreResult<UpdateOutcome> {
        self.client.update_one(ctx, &self.namespace, filter, update).await
    }

    pub async fn upsert_one(
        &self,
        ctx: &OpContext,
        filter: Document,
        update: Document,
    ) -> DocumentStoreResult<UpdateOutcome> {
        self.client.upsert_one(ctx, &self.namespace, filter, update).await
    }

    pub async fn update_many(
        &self,
        ctx: &OpContext,
        filter: Document,
        update: Document,
    ) -> DocumentStoreResult<UpdateOutcome> {
        self.client.update_many(ctx, &self.namespace, filter, update).await
    }

    pub async fn delete_one(&self, ctx: &OpContext, filter: Document) -> DocumentStoreResult<DeleteOutcome> {
        self.client.delete_one(ctx, &self.namespace, filter).await
    }

    pub async fn delete_many(&self, ctx: &OpContext, filter: Document) -> DocumentStoreResult<DeleteOutcome> {
        self.client.delete_many(ctx, &self.namespace, filter).await
    }

    pub async fn count(&self, ctx: &OpContext, filter: Document) -> DocumentStoreResult<u64> {
        self.client.count(ctx, &self.namespace, filter).await
    }

    pub async fn distinct(&self, ctx: &OpContext, field: &str, filter: Document) -> DocumentStoreResult<Vec<Bson>> {
        self.client.distinct(ctx, &self.namespace, field, filter).await
    }

    pub async fn aggregate(&self, ctx: &OpContext, pipeline: Vec<Document>) -> DocumentStoreResult<DocumentCursor> {
        self.client.aggregate(ctx, &self.namespace, pipeline).await
    }

    pub async fn create_index(&self, ctx: &OpContext, index: IndexModel) -> DocumentStoreResult<String> {
        self.client.create_index(ctx, &self.namespace, index).await
    }

    pub async fn list_indexes(&self, ctx: &OpContext) -> DocumentStoreResult<Vec<IndexDescription>> {
        self.client.list_indexes(ctx, &self.namespace).await
    }

    pub async fn drop_index(&self, ctx: &OpContext, name: &str) -> DocumentStoreResult<()> {
        self.client.drop_index(ctx, &self.namespace, name).await
    }

    /// Drops this collection. There is no confirmation step.
    pub async fn drop(&self, ctx: &OpContext) -> DocumentStoreResult<()> {
        self.client.drop_collection(ctx, &self.namespace).await
    }
}
