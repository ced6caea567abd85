//! Driver abstraction for the document store client.
//!
//! The client never speaks a wire protocol itself. Everything it does is forwarded to a
//! [`Driver`]: the database's native client library wrapped in a uniform async interface
//! covering per-namespace command dispatch, cursors, sessions and transactions.
//!
//! # Traits
//!
//! - [`Driver`]: the core trait implemented by concrete drivers
//! - [`DynDriver`]: an object-safe mirror for runtime driver selection
//! - [`DriverBuilder`]: factory trait that connects and yields a driver
//!
//! # Sessions
//!
//! Transactions are scoped by a [`Session`], an opaque handle created by
//! [`Driver::start_session`]. Each driver stores its own state inside the session and
//! recovers it with [`Session::downcast_mut`]. Passing a session to a data operation runs
//! that operation inside the session's transaction.

use std::{any::Any, fmt::Debug};

use async_trait::async_trait;
use bson::Bson;

use crate::{
    cursor::DocumentCursor,
    document::Document,
    error::{DocumentStoreError, DocumentStoreResult},
    namespace::Namespace,
    options::{FindOptions, IndexDescription, IndexModel, UpdateOptions},
    outcome::{BulkWriteReport, DeleteOutcome, InsertOneOutcome, UpdateOutcome},
};

/// Driver-specific session state.
pub trait SessionState: Any + Send {
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

impl<T: Any + Send> SessionState for T {
    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// An opaque driver session used to scope transactions.
pub struct Session {
    state: Box<dyn SessionState>,
}

impl Session {
    pub fn new(state: impl SessionState) -> Self {
        Self { state: Box::new(state) }
    }

    /// Recovers the driver's state from the session.
    ///
    /// # Errors
    ///
    /// Returns [`DocumentStoreError::Transaction`] if the session was created by a
    /// different driver.
    pub fn downcast_mut<S: SessionState>(&mut self) -> DocumentStoreResult<&mut S> {
        // Call through the trait object; `Box<dyn SessionState>` is itself a `SessionState`.
        <dyn SessionState>::as_any_mut(&mut *self.state)
            .downcast_mut::<S>()
            .ok_or_else(|| DocumentStoreError::Transaction("session belongs to a different driver".into()))
    }
}

impl Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session").finish_non_exhaustive()
    }
}

/// Abstract interface over a document database's native client.
///
/// Implementations must be safe to share between tasks and must support concurrent
/// outstanding operations. No method retries; errors are reported as the database
/// reported them, mapped onto [`DocumentStoreError`].
///
/// Every data operation accepts an optional [`Session`]. When present the operation runs
/// inside the session's active transaction.
#[async_trait]
pub trait Driver: Send + Sync + Debug {
    /// Round-trips a no-op command to check connectivity.
    async fn ping(&self) -> DocumentStoreResult<()>;

    /// Inserts a single document, returning its `_id`.
    ///
    /// Documents without an `_id` get one assigned by the driver.
    async fn insert_one(
        &self,
        namespace: &Namespace,
        document: Document,
        session: Option<&mut Session>,
    ) -> DocumentStoreResult<InsertOneOutcome>;

    /// Inserts many documents, attempting every one of them.
    ///
    /// Item-level rejections (e.g. duplicate keys) are reported inside the
    /// [`BulkWriteReport`]; only request-level failures are returned as `Err`.
    async fn insert_many(
        &self,
        namespace: &Namespace,
        documents: Vec<Document>,
        session: Option<&mut Session>,
    ) -> DocumentStoreResult<BulkWriteReport>;

    /// Returns the first document matching `filter`.
    async fn find_one(
        &self,
        namespace: &Namespace,
        filter: Document,
        session: Option<&mut Session>,
    ) -> DocumentStoreResult<Option<Document>>;

    /// Opens a cursor over the documents matching `filter`.
    async fn find(
        &self,
        namespace: &Namespace,
        filter: Document,
        options: FindOptions,
        session: Option<&mut Session>,
    ) -> DocumentStoreResult<DocumentCursor>;

    /// Applies `update` to the first document matching `filter`.
    async fn update_one(
        &self,
        namespace: &Namespace,
        filter: Document,
        update: Document,
        options: UpdateOptions,
        session: Option<&mut Session>,
    ) -> DocumentStoreResult<UpdateOutcome>;

    /// Applies `update` to every document matching `filter`.
    async fn update_many(
        &self,
        namespace: &Namespace,
        filter: Document,
        update: Document,
        options: UpdateOptions,
        session: Option<&mut Session>,
    ) -> DocumentStoreResult<UpdateOutcome>;

    async fn delete_one(
        &self,
        namespace: &Namespace,
        filter: Document,
        session: Option<&mut Session>,
    ) -> DocumentStoreResult<DeleteOutcome>;

    async fn delete_many(
        &self,
        namespace: &Namespace,
        filter: Document,
        session: Option<&mut Session>,
    ) -> DocumentStoreResult<DeleteOutcome>;

    /// Counts the documents matching `filter`.
    async fn count(
        &self,
        namespace: &Namespace,
        filter: Document,
        session: Option<&mut Session>,
    ) -> DocumentStoreResult<u64>;

    /// Returns the distinct values of `field` among documents matching `filter`.
    async fn distinct(
        &self,
        namespace: &Namespace,
        field: &str,
        filter: Document,
        session: Option<&mut Session>,
    ) -> DocumentStoreResult<Vec<Bson>>;

    /// Runs an aggregation pipeline, returning a cursor over its output.
    async fn aggregate(
        &self,
        namespace: &Namespace,
        pipeline: Vec<Document>,
        session: Option<&mut Session>,
    ) -> DocumentStoreResult<DocumentCursor>;

    /// Creates an index, returning its name.
    async fn create_index(&self, namespace: &Namespace, index: IndexModel) -> DocumentStoreResult<String>;

    async fn list_indexes(&self, namespace: &Namespace) -> DocumentStoreResult<Vec<IndexDescription>>;

    async fn drop_index(&self, namespace: &Namespace, name: &str) -> DocumentStoreResult<()>;

    /// Drops a collection and all of its documents and indexes.
    ///
    /// # Warning
    ///
    /// This operation is irreversible.
    async fn drop_collection(&self, namespace: &Namespace) -> DocumentStoreResult<()>;

    /// Drops a whole database.
    ///
    /// # Warning
    ///
    /// This operation is irreversible.
    async fn drop_database(&self, database: &str) -> DocumentStoreResult<()>;

    async fn list_databases(&self) -> DocumentStoreResult<Vec<String>>;

    async fn list_collections(&self, database: &str) -> DocumentStoreResult<Vec<String>>;

    /// Starts a new session.
    async fn start_session(&self) -> DocumentStoreResult<Session>;

    /// Starts a transaction on `session`.
    async fn start_transaction(&self, session: &mut Session) -> DocumentStoreResult<()>;

    /// Commits the active transaction on `session`.
    async fn commit_transaction(&self, session: &mut Session) -> DocumentStoreResult<()>;

    /// Aborts the active transaction on `session`, discarding its writes.
    async fn abort_transaction(&self, session: &mut Session) -> DocumentStoreResult<()>;

    /// Disconnects from the database, releasing every resource held by the driver.
    ///
    /// The default implementation is a no-op.
    async fn shutdown(self) -> DocumentStoreResult<()>
    where
        Self: Sized,
    {
        Ok(())
    }
}

/// Object-safe mirror of [`Driver`], implemented for every `Driver + 'static`.
#[async_trait]
pub trait DynDriver: Send + Sync + Debug {
    async fn ping(&self) -> DocumentStoreResult<()>;
    async fn insert_one(
        &self,
        namespace: &Namespace,
        document: Document,
        session: Option<&mut Session>,
    ) -> DocumentStoreResult<InsertOneOutcome>;
    async fn insert_many(
        &self,
        namespace: &Namespace,
        documents: Vec<Document>,
        session: Option<&mut Session>,
    ) -> DocumentStoreResult<BulkWriteReport>;
    async fn find_one(
        &self,
        namespace: &Namespace,
        filter: Document,
        session: Option<&mut Session>,
    ) -> DocumentStoreResult<Option<Document>>;
    async fn find(
        &self,
        namespace: &Namespace,
        filter: Document,
        options: FindOptions,
        session: Option<&mut Session>,
    ) -> DocumentStoreResult<DocumentCursor>;
    async fn update_one(
        &self,
        namespace: &Namespace,
        filter: Document,
        update: Document,
        options: UpdateOptions,
        session: Option<&mut Session>,
    ) -> DocumentStoreResult<UpdateOutcome>;
    async fn update_many(
        &self,
        namespace: &Namespace,
        filter: Document,
        update: Document,
        options: UpdateOptions,
        session: Option<&mut Session>,
    ) -> DocumentStoreResult<UpdateOutcome>;
    async fn delete_one(
        &self,
        namespace: &Namespace,
        filter: Document,
        session: Option<&mut Session>,
    ) -> DocumentStoreResult<DeleteOutcome>;
    async fn delete_many(
        &self,
        namespace: &Namespace,
        filter: Document,
        session: Option<&mut Session>,
    ) -> DocumentStoreResult<DeleteOutcome>;
    async fn count(
        &self,
        namespace: &Namespace,
        filter: Document,
        session: Option<&mut Session>,
    ) -> DocumentStoreResult<u64>;
    async fn distinct(
        &self,
        namespace: &Namespace,
        field: &str,
        filter: Document,
        session: Option<&mut Session>,
    ) -> DocumentStoreResult<Vec<Bson>>;
    async fn aggregate(
        &self,
        namespace: &Namespace,
        pipeline: Vec<Document>,
        session: Option<&mut Session>,
    ) -> DocumentStoreResult<DocumentCursor>;
    async fn create_index(&self, namespace: &Namespace, index: IndexModel) -> DocumentStoreResult<String>;
    async fn list_indexes(&self, namespace: &Namespace) -> DocumentStoreResult<Vec<IndexDescription>>;
    async fn drop_index(&self, namespace: &Namespace, name: &str) -> DocumentStoreResult<()>;
    async fn drop_collection(&self, namespace: &Namespace) -> DocumentStoreResult<()>;
    async fn drop_database(&self, database: &str) -> DocumentStoreResult<()>;
    async fn list_databases(&self) -> DocumentStoreResult<Vec<String>>;
    async fn list_collections(&self, database: &str) -> DocumentStoreResult<Vec<String>>;
    async fn start_session(&self) -> DocumentStoreResult<Session>;
    async fn start_transaction(&self, session: &mut Session) -> DocumentStoreResult<()>;
    async fn commit_transaction(&self, session: &mut Session) -> DocumentStoreResult<()>;
    async fn abort_transaction(&self, session: &mut Session) -> DocumentStoreResult<()>;
    async fn shutdown_boxed(self: Box<Self>) -> DocumentStoreResult<()>;

    fn as_any(&self) -> &dyn Any;
}

#[async_trait]
impl<D: Driver + 'static> DynDriver for D {
    async fn ping(&self) -> DocumentStoreResult<()> {
        Driver::ping(self).await
    }

    async fn insert_one(
        &self,
        namespace: &Namespace,
        document: Document,
        session: Option<&mut Session>,
    ) -> DocumentStoreResult<InsertOneOutcome> {
        Driver::insert_one(self, namespace, document, session).await
    }

    async fn insert_many(
        &self,
        namespace: &Namespace,
        documents: Vec<Document>,
        session: Option<&mut Session>,
    ) -> DocumentStoreResult<BulkWriteReport> {
        Driver::insert_many(self, namespace, documents, session).await
    }

    async fn find_one(
        &self,
        namespace: &Namespace,
        filter: Document,
        session: Option<&mut Session>,
    ) -> DocumentStoreResult<Option<Document>> {
        Driver::find_one(self, namespace, filter, session).await
    }

    async fn find(
        &self,
        namespace: &Namespace,
        filter: Document,
        options: FindOptions,
        session: Option<&mut Session>,
    ) -> DocumentStoreResult<DocumentCursor> {
        Driver::find(self, namespace, filter, options, session).await
    }

    async fn update_one(
        &self,
        namespace: &Namespace,
        filter: Document,
        update: Document,
        options: UpdateOptions,
        session: Option<&mut Session>,
    ) -> DocumentStoreResult<UpdateOutcome> {
        Driver::update_one(self, namespace, filter, update, options, session).await
    }

    async fn update_many(
        &self,
        namespace: &Namespace,
        filter: Document,
        update: Document,
        options: UpdateOptions,
        session: Option<&mut Session>,
    ) -> DocumentStoreResult<UpdateOutcome> {
        Driver::update_many(self, namespace, filter, update, options, session).await
    }

    async fn delete_one(
        &self,
        namespace: &Namespace,
        filter: Document,
        session: Option<&mut Session>,
    ) -> DocumentStoreResult<DeleteOutcome> {
        Driver::delete_one(self, namespace, filter, session).await
    }

    async fn delete_many(
        &self,
        namespace: &Namespace,
        filter: Document,
        session: Option<&mut Session>,
    ) -> DocumentStoreResult<DeleteOutcome> {
        Driver::delete_many(self, namespace, filter, session).await
    }

    async fn count(
        &self,
        namespace: &Namespace,
        filter: Document,
        session: Option<&mut Session>,
    ) -> DocumentStoreResult<u64> {
        Driver::count(self, namespace, filter, session).await
    }

    async fn distinct(
        &self,
        namespace: &Namespace,
        field: &str,
        filter: Document,
        session: Option<&mut Session>,
    ) -> DocumentStoreResult<Vec<Bson>> {
        Driver::distinct(self, namespace, field, filter, session).await
    }

    async fn aggregate(
        &self,
        namespace: &Namespace,
        pipeline: Vec<Document>,
        session: Option<&mut Session>,
    ) -> DocumentStoreResult<DocumentCursor> {
        Driver::aggregate(self, namespace, pipeline, session).await
    }

    async fn create_index(&self, namespace: &Namespace, index: IndexModel) -> DocumentStoreResult<String> {
        Driver::create_index(self, namespace, index).await
    }

    async fn list_indexes(&self, namespace: &Namespace) -> DocumentStoreResult<Vec<IndexDescription>> {
        Driver::list_indexes(self, namespace).await
    }

    async fn drop_index(&self, namespace: &Namespace, name: &str) -> DocumentStoreResult<()> {
        Driver::drop_index(self, namespace, name).await
    }

    async fn drop_collection(&self, namespace: &Namespace) -> DocumentStoreResult<()> {
        Driver::drop_collection(self, namespace).await
    }

    async fn drop_database(&self, database: &str) -> DocumentStoreResult<()> {
        Driver::drop_database(self, database).await
    }

    async fn list_databases(&self) -> DocumentStoreResult<Vec<String>> {
        Driver::list_databases(self).await
    }

    async fn list_collections(&self, database: &str) -> DocumentStoreResult<Vec<String>> {
        Driver::list_collections(self, database).await
    }

    async fn start_session(&self) -> DocumentStoreResult<Session> {
        Driver::start_session(self).await
    }

    async fn start_transaction(&self, session: &mut Session) -> DocumentStoreResult<()> {
        Driver::start_transaction(self, session).await
    }

    async fn commit_transaction(&self, session: &mut Session) -> DocumentStoreResult<()> {
        Driver::commit_transaction(self, session).await
    }

    async fn abort_transaction(&self, session: &mut Session) -> DocumentStoreResult<()> {
        Driver::abort_transaction(self, session).await
    }

    async fn shutdown_boxed(self: Box<Self>) -> DocumentStoreResult<()> {
        Driver::shutdown(*self).await
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[async_trait]
impl Driver for Box<dyn DynDriver> {
    async fn ping(&self) -> DocumentStoreResult<()> {
        DynDriver::ping(&**self).await
    }

    async fn insert_one(
        &self,
        namespace: &Namespace,
        document: Document,
        session: Option<&mut Session>,
    ) -> DocumentStoreResult<InsertOneOutcome> {
        DynDriver::insert_one(&**self, namespace, document, session).await
    }

    async fn insert_many(
        &self,
        namespace: &Namespace,
        documents: Vec<Document>,
        session: Option<&mut Session>,
    ) -> DocumentStoreResult<BulkWriteReport> {
        DynDriver::insert_many(&**self, namespace, documents, session).await
    }

    async fn find_one(
        &self,
        namespace: &Namespace,
        filter: Document,
        session: Option<&mut Session>,
    ) -> DocumentStoreResult<Option<Document>> {
        DynDriver::find_one(&**self, namespace, filter, session).await
    }

    async fn find(
        &self,
        namespace: &Namespace,
        filter: Document,
        options: FindOptions,
        session: Option<&mut Session>,
    ) -> DocumentStoreResult<DocumentCursor> {
        DynDriver::find(&**self, namespace, filter, options, session).await
    }

    async fn update_one(
        &self,
        namespace: &Namespace,
        filter: Document,
        update: Document,
        options: UpdateOptions,
        session: Option<&mut Session>,
    ) -> DocumentStoreResult<UpdateOutcome> {
        DynDriver::update_one(&**self, namespace, filter, update, options, session).await
    }

    async fn update_many(
        &self,
        namespace: &Namespace,
        filter: Document,
        update: Document,
        options: UpdateOptions,
        session: Option<&mut Session>,
    ) -> DocumentStoreResult<UpdateOutcome> {
        DynDriver::update_many(&**self, namespace, filter, update, options, session).await
    }

    async fn delete_one(
        &self,
        namespace: &Namespace,
        filter: Document,
        session: Option<&mut Session>,
    ) -> DocumentStoreResult<DeleteOutcome> {
        DynDriver::delete_one(&**self, namespace, filter, session).await
    }

    async fn delete_many(
        &self,
        namespace: &Namespace,
        filter: Document,
        session: Option<&mut Session>,
    ) -> DocumentStoreResult<DeleteOutcome> {
        DynDriver::delete_many(&**self, namespace, filter, session).await
    }

    async fn count(
        &self,
        namespace: &Namespace,
        filter: Document,
        session: Option<&mut Session>,
    ) -> DocumentStoreResult<u64> {
        DynDriver::count(&**self, namespace, filter, session).await
    }

    async fn distinct(
        &self,
        namespace: &Namespace,
        field: &str,
        filter: Document,
        session: Option<&mut Session>,
    ) -> DocumentStoreResult<Vec<Bson>> {
        DynDriver::distinct(&**self, namespace, field, filter, session).await
    }

    async fn aggregate(
        &self,
        namespace: &Namespace,
        pipeline: Vec<Document>,
        session: Option<&mut Session>,
    ) -> DocumentStoreResult<DocumentCursor> {
        DynDriver::aggregate(&**self, namespace, pipeline, session).await
    }

    async fn create_index(&self, namespace: &Namespace, index: IndexModel) -> DocumentStoreResult<String> {
        DynDriver::create_index(&**self, namespace, index).await
    }

    async fn list_indexes(&self, namespace: &Namespace) -> DocumentStoreResult<Vec<IndexDescription>> {
        DynDriver::list_indexes(&**self, namespace).await
    }

    async fn drop_index(&self, namespace: &Namespace, name: &str) -> DocumentStoreResult<()> {
        DynDriver::drop_index(&**self, namespace, name).await
    }

    async fn drop_collection(&self, namespace: &Namespace) -> DocumentStoreResult<()> {
        DynDriver::drop_collection(&**self, namespace).await
    }

    async fn drop_database(&self, database: &str) -> DocumentStoreResult<()> {
        DynDriver::drop_database(&**self, database).await
    }

    async fn list_databases(&self) -> DocumentStoreResult<Vec<String>> {
        DynDriver::list_databases(&**self).await
    }

    async fn list_collections(&self, database: &str) -> DocumentStoreResult<Vec<String>> {
        DynDriver::list_collections(&**self, database).await
    }

    async fn start_session(&self) -> DocumentStoreResult<Session> {
        DynDriver::start_session(&**self).await
    }

    async fn start_transaction(&self, session: &mut Session) -> DocumentStoreResult<()> {
        DynDriver::start_transaction(&**self, session).await
    }

    async fn commit_transaction(&self, session: &mut Session) -> DocumentStoreResult<()> {
        DynDriver::commit_transaction(&**self, session).await
    }

    async fn abort_transaction(&self, session: &mut Session) -> DocumentStoreResult<()> {
        DynDriver::abort_transaction(&**self, session).await
    }

    async fn shutdown(self) -> DocumentStoreResult<()> {
        self.shutdown_boxed().await
    }
}

/// Connects to a database and yields a ready driver.
#[async_trait]
pub trait DriverBuilder {
    type Driver: Driver;

    async fn build(self) -> DocumentStoreResult<Self::Driver>;
}
