//! In-memory driver implementation.
//!
//! [`MemoryDriver`] keeps every database in process memory behind an async-aware
//! read-write lock. It implements the full [`Driver`] contract, including sessions and
//! transactions, so the client facade can be exercised without a running server.

use std::{
    collections::BTreeMap,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
};

use async_trait::async_trait;
use bson::{Bson, Document};
use mea::rwlock::RwLock;
use tracing::debug;
use uuid::Uuid;

use docstore_core::{
    cursor::DocumentCursor,
    driver::{Driver, DriverBuilder, Session},
    error::{DocumentStoreError, DocumentStoreResult, ItemFailure},
    namespace::Namespace,
    options::{FindOptions, IndexDescription, IndexModel, UpdateOptions},
    outcome::{BulkWriteReport, DeleteOutcome, InsertOneOutcome, UpdateOutcome},
};

use crate::state::{self, CollectionState, StoreMap};

const WRITE_CONFLICT: i32 = 112;

/// URI scheme selecting the in-memory driver.
pub const MEMORY_SCHEME: &str = "memory";

/// Thread-safe in-memory document database.
///
/// `MemoryDriver` is cloneable and all clones share the same underlying data, so a test can
/// keep a handle to inspect the store after handing the driver to a client.
///
/// # Transactions
///
/// Starting a transaction takes a private snapshot of the store. Operations issued with
/// the session read and write that snapshot; commit copies the namespaces the transaction
/// wrote back into the shared store, and abort discards the snapshot. Commit fails with a
/// write conflict, discarding the transaction, when any of those namespaces was changed
/// by someone else after the transaction started.
///
/// # Example
///
/// ```ignore
/// use docstore_memory::MemoryDriver;
/// use docstore_core::client::DocumentStoreClient;
///
/// let client = DocumentStoreClient::new(MemoryDriver::new());
/// ```
#[derive(Clone, Debug)]
pub struct MemoryDriver {
    store: Arc<RwLock<StoreMap>>,
    fail_next_abort: Arc<AtomicBool>,
    id: Uuid,
}

impl Default for MemoryDriver {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryDriver {
    /// Creates an empty in-memory database.
    pub fn new() -> Self {
        Self {
            store: Arc::new(RwLock::new(StoreMap::new())),
            fail_next_abort: Arc::new(AtomicBool::new(false)),
            id: Uuid::new_v4(),
        }
    }

    pub fn builder() -> MemoryDriverBuilder {
        MemoryDriverBuilder::default()
    }

    /// Makes the next `abort_transaction` fail after discarding the transaction's writes.
    ///
    /// Lets callers observe how an abort failure is reported without a real network fault.
    pub fn fail_next_abort(&self) {
        self.fail_next_abort.store(true, Ordering::SeqCst);
    }

    fn session_state<'s>(&self, session: &'s mut Session) -> DocumentStoreResult<&'s mut MemorySession> {
        let state = session.downcast_mut::<MemorySession>()?;
        if state.driver != self.id {
            return Err(DocumentStoreError::Transaction("session belongs to a different driver".into()));
        }
        Ok(state)
    }

    /// Runs `f` against the session's snapshot when a transaction is active, otherwise
    /// against the shared store.
    async fn read<R>(
        &self,
        session: Option<&mut Session>,
        f: impl FnOnce(&StoreMap) -> DocumentStoreResult<R>,
    ) -> DocumentStoreResult<R> {
        if let Some(session) = session {
            if let Some(transaction) = self.session_state(session)?.transaction.as_ref() {
                return f(&transaction.snapshot);
            }
        }

        let store = self.store.read().await;
        f(&store)
    }

    /// Like [`read`](Self::read) for writes. A transaction records the state `namespace`
    /// had before its first write there.
    async fn write<R>(
        &self,
        namespace: &Namespace,
        session: Option<&mut Session>,
        f: impl FnOnce(&mut StoreMap) -> DocumentStoreResult<R>,
    ) -> DocumentStoreResult<R> {
        if let Some(session) = session {
            if let Some(transaction) = self.session_state(session)?.transaction.as_mut() {
                let key = (namespace.database().to_string(), namespace.collection().to_string());
                if !transaction.touched.contains_key(&key) {
                    let recorded = state::collection(&transaction.snapshot, namespace).cloned();
                    transaction.touched.insert(key, recorded);
                }
                return f(&mut transaction.snapshot);
            }
        }

        let mut store = self.store.write().await;
        f(&mut store)
    }
}

/// Session state stored inside a [`Session`] created by a [`MemoryDriver`].
#[derive(Debug)]
struct MemorySession {
    driver: Uuid,
    transaction: Option<TransactionState>,
}

#[derive(Debug)]
struct TransactionState {
    snapshot: StoreMap,
    /// Written namespaces and their state when the transaction started.
    touched: BTreeMap<(String, String), Option<CollectionState>>,
}

#[async_trait]
impl Driver for MemoryDriver {
    async fn ping(&self) -> DocumentStoreResult<()> {
        Ok(())
    }

    async fn insert_one(
        &self,
        namespace: &Namespace,
        document: Document,
        session: Option<&mut Session>,
    ) -> DocumentStoreResult<InsertOneOutcome> {
        let inserted_id = self
            .write(namespace, session, |store| state::insert_one(store, namespace, document))
            .await?;

        Ok(InsertOneOutcome { inserted_id })
    }

    async fn insert_many(
        &self,
        namespace: &Namespace,
        documents: Vec<Document>,
        session: Option<&mut Session>,
    ) -> DocumentStoreResult<BulkWriteReport> {
        let results = self
            .write(namespace, session, |store| Ok(state::insert_many(store, namespace, documents)))
            .await?;

        Ok(BulkWriteReport::new(
            results
                .into_iter()
                .map(|result| result.map_err(|err| ItemFailure::from(&err)))
                .collect(),
        ))
    }

    async fn find_one(
        &self,
        namespace: &Namespace,
        filter: Document,
        session: Option<&mut Session>,
    ) -> DocumentStoreResult<Option<Document>> {
        self.read(session, |store| state::find_one(store, namespace, &filter)).await
    }

    async fn find(
        &self,
        namespace: &Namespace,
        filter: Document,
        options: FindOptions,
        session: Option<&mut Session>,
    ) -> DocumentStoreResult<DocumentCursor> {
        let documents = self
            .read(session, |store| state::find(store, namespace, &filter, &options))
            .await?;

        Ok(DocumentCursor::from_documents(documents))
    }

    async fn update_one(
        &self,
        namespace: &Namespace,
        filter: Document,
        update: Document,
        options: UpdateOptions,
        session: Option<&mut Session>,
    ) -> DocumentStoreResult<UpdateOutcome> {
        self.write(namespace, session, |store| state::update(store, namespace, &filter, update, options, false))
            .await
    }

    async fn update_many(
        &self,
        namespace: &Namespace,
        filter: Document,
        update: Document,
        options: UpdateOptions,
        session: Option<&mut Session>,
    ) -> DocumentStoreResult<UpdateOutcome> {
        self.write(namespace, session, |store| state::update(store, namespace, &filter, update, options, true))
            .await
    }

    async fn delete_one(
        &self,
        namespace: &Namespace,
        filter: Document,
        session: Option<&mut Session>,
    ) -> DocumentStoreResult<DeleteOutcome> {
        self.write(namespace, session, |store| state::delete(store, namespace, &filter, false))
            .await
    }

    async fn delete_many(
        &self,
        namespace: &Namespace,
        filter: Document,
        session: Option<&mut Session>,
    ) -> DocumentStoreResult<DeleteOutcome> {
        self.write(namespace, session, |store| state::delete(store, namespace, &filter, true))
            .await
    }

    async fn count(
        &self,
        namespace: &Namespace,
        filter: Document,
        session: Option<&mut Session>,
    ) -> DocumentStoreResult<u64> {
        self.read(session, |store| state::count(store, namespace, &filter)).await
    }

    async fn distinct(
        &self,
        namespace: &Namespace,
        field: &str,
        filter: Document,
        session: Option<&mut Session>,
    ) -> DocumentStoreResult<Vec<Bson>> {
        self.read(session, |store| state::distinct(store, namespace, field, &filter))
            .await
    }

    async fn aggregate(
        &self,
        namespace: &Namespace,
        pipeline: Vec<Document>,
        session: Option<&mut Session>,
    ) -> DocumentStoreResult<DocumentCursor> {
        let documents = self
            .read(session, |store| state::aggregate(store, namespace, &pipeline))
            .await?;

        Ok(DocumentCursor::from_documents(documents))
    }

    async fn create_index(&self, namespace: &Namespace, index: IndexModel) -> DocumentStoreResult<String> {
        let mut store = self.store.write().await;
        state::create_index(&mut store, namespace, &index)
    }

    async fn list_indexes(&self, namespace: &Namespace) -> DocumentStoreResult<Vec<IndexDescription>> {
        let store = self.store.read().await;
        state::list_indexes(&store, namespace)
    }

    async fn drop_index(&self, namespace: &Namespace, name: &str) -> DocumentStoreResult<()> {
        let mut store = self.store.write().await;
        state::drop_index(&mut store, namespace, name)
    }

    async fn drop_collection(&self, namespace: &Namespace) -> DocumentStoreResult<()> {
        let mut store = self.store.write().await;
        state::drop_collection(&mut store, namespace);
        Ok(())
    }

    async fn drop_database(&self, database: &str) -> DocumentStoreResult<()> {
        let mut store = self.store.write().await;
        state::drop_database(&mut store, database);
        Ok(())
    }

    async fn list_databases(&self) -> DocumentStoreResult<Vec<String>> {
        let store = self.store.read().await;
        Ok(state::list_databases(&store))
    }

    async fn list_collections(&self, database: &str) -> DocumentStoreResult<Vec<String>> {
        let store = self.store.read().await;
        Ok(state::list_collections(&store, database))
    }

    async fn start_session(&self) -> DocumentStoreResult<Session> {
        Ok(Session::new(MemorySession { driver: self.id, transaction: None }))
    }

    async fn start_transaction(&self, session: &mut Session) -> DocumentStoreResult<()> {
        let state = self.session_state(session)?;
        if state.transaction.is_some() {
            return Err(DocumentStoreError::Transaction("transaction already in progress".into()));
        }

        let snapshot = StoreMap::clone(&*self.store.read().await);
        state.transaction = Some(TransactionState { snapshot, touched: BTreeMap::new() });
        debug!("memory transaction started");

        Ok(())
    }

    async fn commit_transaction(&self, session: &mut Session) -> DocumentStoreResult<()> {
        let transaction = self
            .session_state(session)?
            .transaction
            .take()
            .ok_or_else(|| DocumentStoreError::Transaction("no transaction in progress".into()))?;

        let mut store = self.store.write().await;
        if let Some((database, name)) = state::first_conflict(&store, &transaction.touched) {
            debug!(database = %database, collection = %name, "memory transaction hit a write conflict");
            return Err(DocumentStoreError::Transaction(format!(
                "WriteConflict ({WRITE_CONFLICT}): {database}.{name} was modified outside the transaction"
            )));
        }
        state::merge_namespaces(&mut store, &transaction.snapshot, transaction.touched.keys());
        debug!(namespaces = transaction.touched.len(), "memory transaction committed");

        Ok(())
    }

    async fn abort_transaction(&self, session: &mut Session) -> DocumentStoreResult<()> {
        self.session_state(session)?
            .transaction
            .take()
            .ok_or_else(|| DocumentStoreError::Transaction("no transaction in progress".into()))?;
        debug!("memory transaction aborted");

        if self.fail_next_abort.swap(false, Ordering::SeqCst) {
            return Err(DocumentStoreError::Connectivity("injected abort failure".into()));
        }

        Ok(())
    }

    async fn shutdown(self) -> DocumentStoreResult<()> {
        debug!("memory driver shut down");
        Ok(())
    }
}

/// Builder for [`MemoryDriver`].
#[derive(Debug, Default)]
pub struct MemoryDriverBuilder {
    shared: Option<MemoryDriver>,
}

impl MemoryDriverBuilder {
    /// Accepts `memory://` URIs. Anything after the scheme is ignored.
    ///
    /// # Errors
    ///
    /// Returns [`DocumentStoreError::Initialization`] for any other scheme.
    pub fn from_uri(uri: &str) -> DocumentStoreResult<Self> {
        match uri.split_once("://") {
            Some((scheme, _)) if scheme == MEMORY_SCHEME => Ok(Self::default()),
            _ => Err(DocumentStoreError::Initialization(format!(
                "not a {MEMORY_SCHEME}:// uri: {uri}"
            ))),
        }
    }

    /// Builds a driver sharing data with `driver` instead of starting empty.
    pub fn shared_with(mut self, driver: &MemoryDriver) -> Self {
        self.shared = Some(driver.clone());
        self
    }
}

#[async_trait]
impl DriverBuilder for MemoryDriverBuilder {
    type Driver = MemoryDriver;

    async fn build(self) -> DocumentStoreResult<Self::Driver> {
        Ok(self.shared.unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::doc;

    fn ns() -> Namespace {
        Namespace::new("testDB", "testColl").unwrap()
    }

    #[tokio::test]
    async fn transactions_isolate_until_commit() {
        let driver = MemoryDriver::new();
        let mut session = driver.start_session().await.unwrap();

        driver.start_transaction(&mut session).await.unwrap();
        driver.insert_one(&ns(), doc! { "foo": "bar" }, Some(&mut session)).await.unwrap();

        assert_eq!(driver.count(&ns(), doc! {}, None).await.unwrap(), 0);
        assert_eq!(driver.count(&ns(), doc! {}, Some(&mut session)).await.unwrap(), 1);

        driver.commit_transaction(&mut session).await.unwrap();
        assert_eq!(driver.count(&ns(), doc! {}, None).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn commit_rejects_namespaces_changed_outside() {
        let driver = MemoryDriver::new();
        let mut session = driver.start_session().await.unwrap();

        driver.start_transaction(&mut session).await.unwrap();
        driver.insert_one(&ns(), doc! { "tx": 1 }, Some(&mut session)).await.unwrap();
        driver.insert_one(&ns(), doc! { "outside": 1 }, None).await.unwrap();

        let err = driver.commit_transaction(&mut session).await.unwrap_err();
        assert!(matches!(&err, DocumentStoreError::Transaction(message) if message.contains("WriteConflict")));
        assert_eq!(driver.count(&ns(), doc! { "outside": 1 }, None).await.unwrap(), 1);
        assert_eq!(driver.count(&ns(), doc! { "tx": 1 }, None).await.unwrap(), 0);

        // The failed commit ended the transaction; a fresh one commits cleanly.
        driver.start_transaction(&mut session).await.unwrap();
        driver.insert_one(&ns(), doc! { "tx": 2 }, Some(&mut session)).await.unwrap();
        driver.commit_transaction(&mut session).await.unwrap();
        assert_eq!(driver.count(&ns(), doc! {}, None).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn second_of_two_overlapping_commits_conflicts() {
        let driver = MemoryDriver::new();
        let other_ns = Namespace::new("testDB", "other").unwrap();
        let mut first = driver.start_session().await.unwrap();
        let mut second = driver.start_session().await.unwrap();

        driver.start_transaction(&mut first).await.unwrap();
        driver.start_transaction(&mut second).await.unwrap();
        driver.insert_one(&ns(), doc! { "by": "first" }, Some(&mut first)).await.unwrap();
        driver.insert_one(&ns(), doc! { "by": "second" }, Some(&mut second)).await.unwrap();
        driver.insert_one(&other_ns, doc! { "by": "second" }, Some(&mut second)).await.unwrap();

        driver.commit_transaction(&mut first).await.unwrap();
        assert!(driver.commit_transaction(&mut second).await.is_err());

        assert_eq!(driver.count(&ns(), doc! {}, None).await.unwrap(), 1);
        assert_eq!(driver.count(&other_ns, doc! {}, None).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn abort_discards_writes_and_can_be_made_to_fail() {
        let driver = MemoryDriver::new();
        driver.insert_one(&ns(), doc! { "keep": true }, None).await.unwrap();

        let mut session = driver.start_session().await.unwrap();
        driver.start_transaction(&mut session).await.unwrap();
        driver.delete_many(&ns(), doc! {}, Some(&mut session)).await.unwrap();
        driver.fail_next_abort();

        let err = driver.abort_transaction(&mut session).await.unwrap_err();
        assert!(matches!(err, DocumentStoreError::Connectivity(_)));
        assert_eq!(driver.count(&ns(), doc! {}, None).await.unwrap(), 1);

        driver.start_transaction(&mut session).await.unwrap();
        driver.abort_transaction(&mut session).await.unwrap();
    }

    #[tokio::test]
    async fn transaction_primitives_check_session_state() {
        let driver = MemoryDriver::new();
        let other = MemoryDriver::new();
        let mut session = driver.start_session().await.unwrap();

        assert!(driver.commit_transaction(&mut session).await.is_err());
        driver.start_transaction(&mut session).await.unwrap();
        assert!(driver.start_transaction(&mut session).await.is_err());
        assert!(other.count(&ns(), doc! {}, Some(&mut session)).await.is_err());
    }

    #[tokio::test]
    async fn insert_many_reports_each_position() {
        let driver = MemoryDriver::new();
        let report = driver
            .insert_many(&ns(), vec![doc! { "_id": 1 }, doc! { "_id": 1 }, doc! { "_id": 2 }], None)
            .await
            .unwrap();

        assert_eq!(report.len(), 3);
        assert_eq!(report.failures().map(|(position, _)| position).collect::<Vec<_>>(), vec![1]);
        assert_eq!(report.failures().next().unwrap().1.code, Some(11000));
    }

    #[tokio::test]
    async fn builder_accepts_memory_uris_and_shares_data() {
        assert!(MemoryDriverBuilder::from_uri("memory://").is_ok());
        assert!(MemoryDriverBuilder::from_uri("mongodb://localhost").is_err());

        let original = MemoryDriver::new();
        original.insert_one(&ns(), doc! {}, None).await.unwrap();

        let shared = MemoryDriver::builder().shared_with(&original).build().await.unwrap();
        assert_eq!(shared.count(&ns(), doc! {}, None).await.unwrap(), 1);
    }
}
