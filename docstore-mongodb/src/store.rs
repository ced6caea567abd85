use std::{collections::HashMap, time::Duration};

use async_trait::async_trait;
use bson::{Bson, Document, doc, oid::ObjectId};
use futures::TryStreamExt;
use mongodb::{
    Client, ClientSession, Collection as MongoCollection, IndexModel as MongoIndexModel,
    error::ErrorKind,
    options::{ClientOptions, FindOptions as MongoFindOptions, IndexOptions as MongoIndexOptions},
};
use tracing::{debug, info};

use docstore_core::{
    cursor::DocumentCursor,
    document::ID_FIELD,
    driver::{Driver, DriverBuilder, Session},
    error::{DocumentStoreError, DocumentStoreResult, ItemFailure},
    namespace::Namespace,
    options::{FindOptions, IndexDescription, IndexModel, UpdateOptions},
    outcome::{BulkWriteReport, DeleteOutcome, InsertOneOutcome, UpdateOutcome},
};

use crate::error::{map_error, map_init_error};

/// URI schemes selecting the MongoDB driver.
pub const MONGODB_SCHEMES: [&str; 2] = ["mongodb", "mongodb+srv"];

/// Session state stored inside a [`Session`] created by a [`MongoDriver`].
struct MongoSession(ClientSession);

fn client_session(session: &mut Session) -> DocumentStoreResult<&mut ClientSession> {
    Ok(&mut session.downcast_mut::<MongoSession>()?.0)
}

/// Driver backed by the official MongoDB client.
///
/// The client keeps its own connection pool and is safe to share between tasks.
#[derive(Debug, Clone)]
pub struct MongoDriver {
    client: Client,
}

impl MongoDriver {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    pub fn builder(uri: &str) -> MongoDriverBuilder {
        MongoDriverBuilder::new(uri)
    }

    /// The wrapped MongoDB client.
    pub fn inner(&self) -> &Client {
        &self.client
    }

    fn get_collection(&self, namespace: &Namespace) -> MongoCollection<Document> {
        self.client
            .database(namespace.database())
            .collection(namespace.collection())
    }

    /// Drains a session-bound cursor. Session cursors borrow the session for every batch,
    /// so they cannot outlive the call that opened them.
    async fn drain(
        mut cursor: mongodb::SessionCursor<Document>,
        session: &mut ClientSession,
    ) -> DocumentStoreResult<Vec<Document>> {
        let mut documents = Vec::new();
        while let Some(document) = cursor.next(session).await {
            documents.push(document.map_err(map_error)?);
        }

        Ok(documents)
    }
}

fn is_operator_update(update: &Document) -> bool {
    update.keys().next().is_some_and(|key| key.starts_with('$'))
}

fn outcome_of(result: mongodb::results::UpdateResult) -> UpdateOutcome {
    UpdateOutcome {
        matched: result.matched_count,
        modified: result.modified_count,
        upserted_id: result.upserted_id,
    }
}

#[async_trait]
impl Driver for MongoDriver {
    async fn ping(&self) -> DocumentStoreResult<()> {
        self.client
            .database("admin")
            .run_command(doc! { "ping": 1 })
            .await
            .map_err(map_error)?;

        Ok(())
    }

    async fn insert_one(
        &self,
        namespace: &Namespace,
        document: Document,
        session: Option<&mut Session>,
    ) -> DocumentStoreResult<InsertOneOutcome> {
        let collection = self.get_collection(namespace);
        let action = collection.insert_one(document);
        let result = match session {
            Some(session) => action.session(client_session(session)?).await,
            None => action.await,
        }
        .map_err(map_error)?;

        Ok(InsertOneOutcome { inserted_id: result.inserted_id })
    }

    async fn insert_many(
        &self,
        namespace: &Namespace,
        documents: Vec<Document>,
        session: Option<&mut Session>,
    ) -> DocumentStoreResult<BulkWriteReport> {
        if documents.is_empty() {
            return Ok(BulkWriteReport::default());
        }

        // Assign ids up front so every position's id is known even when the batch fails.
        let mut ids = Vec::with_capacity(documents.len());
        let documents = documents
            .into_iter()
            .map(|mut document| {
                let id = match document.get(ID_FIELD) {
                    Some(id) => id.clone(),
                    None => {
                        let id = Bson::ObjectId(ObjectId::new());
                        document.insert(ID_FIELD, id.clone());
                        id
                    }
                };
                ids.push(id);
                document
            })
            .collect::<Vec<_>>();

        let collection = self.get_collection(namespace);
        let action = collection.insert_many(documents).ordered(false);
        let result = match session {
            Some(session) => action.session(client_session(session)?).await,
            None => action.await,
        };

        let failures: HashMap<usize, ItemFailure> = match result {
            Ok(_) => HashMap::new(),
            Err(err) => match err.kind.as_ref() {
                ErrorKind::InsertMany(failure) if failure.write_concern_error.is_none() => failure
                    .write_errors
                    .iter()
                    .flatten()
                    .map(|write_error| {
                        (
                            write_error.index,
                            ItemFailure { code: Some(write_error.code), message: write_error.message.clone() },
                        )
                    })
                    .collect(),
                _ => return Err(map_error(err)),
            },
        };

        Ok(BulkWriteReport::new(
            ids.into_iter()
                .enumerate()
                .map(|(position, id)| match failures.get(&position) {
                    Some(failure) => Err(failure.clone()),
                    None => Ok(id),
                })
                .collect(),
        ))
    }

    async fn find_one(
        &self,
        namespace: &Namespace,
        filter: Document,
        session: Option<&mut Session>,
    ) -> DocumentStoreResult<Option<Document>> {
        let collection = self.get_collection(namespace);
        let action = collection.find_one(filter);
        let result = match session {
            Some(session) => action.session(client_session(session)?).await,
            None => action.await,
        };

        result.map_err(map_error)
    }

    async fn find(
        &self,
        namespace: &Namespace,
        filter: Document,
        options: FindOptions,
        session: Option<&mut Session>,
    ) -> DocumentStoreResult<DocumentCursor> {
        let mut find_options = MongoFindOptions::default();
        find_options.sort = options.sort;
        find_options.skip = options.skip;
        find_options.limit = options.limit.map(|limit| limit as i64);
        find_options.projection = options.projection;

        let collection = self.get_collection(namespace);
        let action = collection.find(filter).with_options(find_options);
        match session {
            Some(session) => {
                let session = client_session(session)?;
                let cursor = action.session(&mut *session).await.map_err(map_error)?;
                Ok(DocumentCursor::from_documents(Self::drain(cursor, session).await?))
            }
            None => {
                let cursor = action.await.map_err(map_error)?;
                Ok(DocumentCursor::from_stream(cursor.map_err(map_error)))
            }
        }
    }

    async fn update_one(
        &self,
        namespace: &Namespace,
        filter: Document,
        update: Document,
        options: UpdateOptions,
        session: Option<&mut Session>,
    ) -> DocumentStoreResult<UpdateOutcome> {
        let collection = self.get_collection(namespace);
        let result = if is_operator_update(&update) {
            let action = collection.update_one(filter, update).upsert(options.upsert);
            match session {
                Some(session) => action.session(client_session(session)?).await,
                None => action.await,
            }
        } else {
            let action = collection.replace_one(filter, update).upsert(options.upsert);
            match session {
                Some(session) => action.session(client_session(session)?).await,
                None => action.await,
            }
        }
        .map_err(map_error)?;

        Ok(outcome_of(result))
    }

    async fn update_many(
        &self,
        namespace: &Namespace,
        filter: Document,
        update: Document,
        options: UpdateOptions,
        session: Option<&mut Session>,
    ) -> DocumentStoreResult<UpdateOutcome> {
        let collection = self.get_collection(namespace);
        let action = collection
            .update_many(filter, update)
            .upsert(options.upsert);
        let result = match session {
            Some(session) => action.session(client_session(session)?).await,
            None => action.await,
        }
        .map_err(map_error)?;

        Ok(outcome_of(result))
    }

    async fn delete_one(
        &self,
        namespace: &Namespace,
        filter: Document,
        session: Option<&mut Session>,
    ) -> DocumentStoreResult<DeleteOutcome> {
        let collection = self.get_collection(namespace);
        let action = collection.delete_one(filter);
        let result = match session {
            Some(session) => action.session(client_session(session)?).await,
            None => action.await,
        }
        .map_err(map_error)?;

        Ok(DeleteOutcome { deleted: result.deleted_count })
    }

    async fn delete_many(
        &self,
        namespace: &Namespace,
        filter: Document,
        session: Option<&mut Session>,
    ) -> DocumentStoreResult<DeleteOutcome> {
        let collection = self.get_collection(namespace);
        let action = collection.delete_many(filter);
        let result = match session {
            Some(session) => action.session(client_session(session)?).await,
            None => action.await,
        }
        .map_err(map_error)?;

        Ok(DeleteOutcome { deleted: result.deleted_count })
    }

    async fn count(
        &self,
        namespace: &Namespace,
        filter: Document,
        session: Option<&mut Session>,
    ) -> DocumentStoreResult<u64> {
        let collection = self.get_collection(namespace);
        let action = collection.count_documents(filter);
        let result = match session {
            Some(session) => action.session(client_session(session)?).await,
            None => action.await,
        };

        result.map_err(map_error)
    }

    async fn distinct(
        &self,
        namespace: &Namespace,
        field: &str,
        filter: Document,
        session: Option<&mut Session>,
    ) -> DocumentStoreResult<Vec<Bson>> {
        let collection = self.get_collection(namespace);
        let action = collection.distinct(field, filter);
        let result = match session {
            Some(session) => action.session(client_session(session)?).await,
            None => action.await,
        };

        result.map_err(map_error)
    }

    async fn aggregate(
        &self,
        namespace: &Namespace,
        pipeline: Vec<Document>,
        session: Option<&mut Session>,
    ) -> DocumentStoreResult<DocumentCursor> {
        let collection = self.get_collection(namespace);
        let action = collection.aggregate(pipeline);
        match session {
            Some(session) => {
                let session = client_session(session)?;
                let cursor = action.session(&mut *session).await.map_err(map_error)?;
                Ok(DocumentCursor::from_documents(Self::drain(cursor, session).await?))
            }
            None => {
                let cursor = action.await.map_err(map_error)?;
                Ok(DocumentCursor::from_stream(cursor.map_err(map_error)))
            }
        }
    }

    async fn create_index(&self, namespace: &Namespace, index: IndexModel) -> DocumentStoreResult<String> {
        let mut options = MongoIndexOptions::default();
        options.name = Some(index.resolved_name());
        options.unique = index.options.unique.then_some(true);
        options.sparse = index.options.sparse.then_some(true);
        options.expire_after = index.options.expire_after;

        let result = self
            .get_collection(namespace)
            .create_index(MongoIndexModel::builder().keys(index.keys).options(options).build())
            .await
            .map_err(map_error)?;

        Ok(result.index_name)
    }

    async fn list_indexes(&self, namespace: &Namespace) -> DocumentStoreResult<Vec<IndexDescription>> {
        Ok(self
            .get_collection(namespace)
            .list_indexes()
            .await
            .map_err(map_error)?
            .try_collect::<Vec<_>>()
            .await
            .map_err(map_error)?
            .into_iter()
            .map(|index| {
                let options = index.options.unwrap_or_default();
                IndexDescription {
                    name: options.name.unwrap_or_default(),
                    keys: index.keys,
                    unique: options.unique.unwrap_or(false),
                }
            })
            .collect())
    }

    async fn drop_index(&self, namespace: &Namespace, name: &str) -> DocumentStoreResult<()> {
        self.get_collection(namespace)
            .drop_index(name)
            .await
            .map_err(map_error)?;

        Ok(())
    }

    async fn drop_collection(&self, namespace: &Namespace) -> DocumentStoreResult<()> {
        self.get_collection(namespace)
            .drop()
            .await
            .map_err(map_error)?;

        Ok(())
    }

    async fn drop_database(&self, database: &str) -> DocumentStoreResult<()> {
        self.client
            .database(database)
            .drop()
            .await
            .map_err(map_error)?;

        Ok(())
    }

    async fn list_databases(&self) -> DocumentStoreResult<Vec<String>> {
        let mut names = self
            .client
            .list_database_names()
            .await
            .map_err(map_error)?;
        names.sort();

        Ok(names)
    }

    async fn list_collections(&self, database: &str) -> DocumentStoreResult<Vec<String>> {
        let mut names = self
            .client
            .database(database)
            .list_collection_names()
            .await
            .map_err(map_error)?;
        names.sort();

        Ok(names)
    }

    async fn start_session(&self) -> DocumentStoreResult<Session> {
        let session = self.client.start_session().await.map_err(map_error)?;
        Ok(Session::new(MongoSession(session)))
    }

    async fn start_transaction(&self, session: &mut Session) -> DocumentStoreResult<()> {
        client_session(session)?
            .start_transaction()
            .await
            .map_err(map_error)
    }

    async fn commit_transaction(&self, session: &mut Session) -> DocumentStoreResult<()> {
        client_session(session)?
            .commit_transaction()
            .await
            .map_err(map_error)
    }

    async fn abort_transaction(&self, session: &mut Session) -> DocumentStoreResult<()> {
        client_session(session)?
            .abort_transaction()
            .await
            .map_err(map_error)
    }

    async fn shutdown(self) -> DocumentStoreResult<()> {
        self.client.shutdown().await;
        info!("mongodb client shut down");

        Ok(())
    }
}

/// Builder for [`MongoDriver`].
///
/// Connecting parses the URI, builds the client and, unless disabled, round-trips a
/// `ping` so that an unreachable server is reported at connect time rather than on the
/// first operation.
#[derive(Debug, Clone)]
pub struct MongoDriverBuilder {
    uri: String,
    app_name: Option<String>,
    server_selection_timeout: Option<Duration>,
    verify: bool,
}

impl MongoDriverBuilder {
    pub fn new(uri: &str) -> Self {
        Self {
            uri: uri.to_string(),
            app_name: None,
            server_selection_timeout: None,
            verify: true,
        }
    }

    /// Name reported to the server in the connection handshake, overriding any
    /// `appName` in the URI.
    pub fn app_name(mut self, app_name: impl Into<String>) -> Self {
        self.app_name = Some(app_name.into());
        self
    }

    /// How long the client waits for a suitable server before failing an operation.
    pub fn server_selection_timeout(mut self, timeout: Duration) -> Self {
        self.server_selection_timeout = Some(timeout);
        self
    }

    /// Whether to ping the server while connecting. Defaults to `true`.
    pub fn verify(mut self, verify: bool) -> Self {
        self.verify = verify;
        self
    }

    async fn client_options(&self) -> DocumentStoreResult<ClientOptions> {
        let mut options = ClientOptions::parse(&self.uri)
            .await
            .map_err(|e| DocumentStoreError::Initialization(e.to_string()))?;
        if let Some(app_name) = &self.app_name {
            options.app_name = Some(app_name.clone());
        }
        if let Some(timeout) = self.server_selection_timeout {
            options.server_selection_timeout = Some(timeout);
        }

        Ok(options)
    }
}

#[async_trait]
impl DriverBuilder for MongoDriverBuilder {
    type Driver = MongoDriver;

    async fn build(self) -> DocumentStoreResult<Self::Driver> {
        let options = self.client_options().await?;
        let driver = MongoDriver::new(Client::with_options(options).map_err(map_init_error)?);
        if self.verify {
            driver.ping().await?;
        }
        debug!(verified = self.verify, "mongodb driver ready");

        Ok(driver)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn operator_updates_are_told_apart_from_replacements() {
        assert!(is_operator_update(&doc! { "$set": { "a": 1 } }));
        assert!(!is_operator_update(&doc! { "a": 1 }));
        assert!(!is_operator_update(&doc! {}));
    }

    #[tokio::test]
    async fn malformed_uris_fail_to_initialize() {
        let err = MongoDriver::builder("not-a-uri").build().await.unwrap_err();
        assert!(matches!(err, DocumentStoreError::Initialization(_)));
    }

    #[tokio::test]
    async fn builder_settings_override_the_uri() {
        let builder = MongoDriver::builder("mongodb://localhost:27017/?appName=fromUri&serverSelectionTimeoutMS=30000")
            .app_name("inventory")
            .server_selection_timeout(Duration::from_secs(2));

        let options = builder.client_options().await.unwrap();

        assert_eq!(options.app_name.as_deref(), Some("inventory"));
        assert_eq!(options.server_selection_timeout, Some(Duration::from_secs(2)));
    }

    #[tokio::test]
    async fn unverified_build_does_not_contact_the_server() {
        let driver = MongoDriver::builder("mongodb://127.0.0.1:1")
            .verify(false)
            .build()
            .await
            .unwrap();

        driver.shutdown().await.unwrap();
    }
}
