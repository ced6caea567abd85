//! A thin typed facade over remote document databases.
//!
//! This crate is the entry point of the docstore project. It re-exports the client,
//! driver traits and supporting types from `docstore-core`, the bundled drivers, and
//! [`connect`] / [`connect_with`] which pick a driver from the connection URI.
//!
//! # Quick Start
//!
//! ```ignore
//! use docstore::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), DocumentStoreError> {
//!     let client = docstore::connect_from_env().await?;
//!     let ctx = OpContext::background().with_timeout(Duration::from_secs(10));
//!     let ns = Namespace::new("testDB", "testColl")?;
//!
//!     client.insert_one(&ctx, &ns, doc! { "foo": "bar" }).await?;
//!     client
//!         .update_one(&ctx, &ns, doc! { "foo": "bar" }, doc! { "$set": { "foo": "baz" } })
//!         .await?;
//!
//!     for document in client.find_all(&ctx, &ns, doc! {}).await? {
//!         println!("{document}");
//!     }
//!
//!     client.close().await
//! }
//! ```
//!
//! # Transactions
//!
//! ```ignore
//! let total = client
//!     .run_transaction(&ctx, |tx| Box::pin(async move {
//!         tx.insert_one(&orders, doc! { "sku": "A1", "qty": 2 }).await?;
//!         tx.update_one(&stock, doc! { "sku": "A1" }, doc! { "$inc": { "qty": -2 } }).await?;
//!         tx.count(&orders, doc! {}).await
//!     }))
//!     .await?;
//! ```
//!
//! # Drivers
//!
//! - [`memory`] - In-process driver for tests and local development (`memory://`)
//! - [`mongodb`] - MongoDB driver (`mongodb://`, `mongodb+srv://`; requires the `mongodb` feature)

pub mod prelude;

pub use docstore_core::{
    client, collection, config, context, cursor, document, driver, error, namespace, options, outcome,
    transaction,
};

pub use bson;

use docstore_core::{
    client::DocumentStoreClient,
    config::ClientConfig,
    driver::DynDriver,
    error::{DocumentStoreError, DocumentStoreResult},
};
use tracing::info;

/// In-memory driver.
pub mod memory {
    pub use docstore_memory::{MEMORY_SCHEME, MemoryDriver, MemoryDriverBuilder};
}

/// MongoDB driver.
///
/// This module is only available when the `mongodb` feature is enabled.
#[cfg(feature = "mongodb")]
pub mod mongodb {
    pub use docstore_mongodb::{MONGODB_SCHEMES, MongoDriver, MongoDriverBuilder};
}

/// A client whose driver was chosen at runtime.
pub type DynClient = DocumentStoreClient<Box<dyn DynDriver>>;

/// Connects to the database named by `uri`.
///
/// See [`connect_with`].
pub async fn connect(uri: &str) -> DocumentStoreResult<DynClient> {
    connect_with(&ClientConfig::new(uri)).await
}

/// Connects using the URI found in the environment.
///
/// See [`ClientConfig::from_env`].
pub async fn connect_from_env() -> DocumentStoreResult<DynClient> {
    connect_with(&ClientConfig::from_env()?).await
}

/// Connects to the database described by `config`, choosing the driver by URI scheme.
///
/// # Errors
///
/// [`DocumentStoreError::Initialization`] for a malformed URI or a scheme no compiled-in
/// driver handles, and [`DocumentStoreError::Connectivity`] if the server is unreachable.
pub async fn connect_with(config: &ClientConfig) -> DocumentStoreResult<DynClient> {
    info!(uri = %config.redacted_uri(), "connecting document store client");

    match config.scheme() {
        Some(memory::MEMORY_SCHEME) => {
            let builder = memory::MemoryDriverBuilder::from_uri(&config.uri)?;
            Ok(DocumentStoreClient::connect(builder).await?.into_dyn())
        }
        #[cfg(feature = "mongodb")]
        Some(scheme) if mongodb::MONGODB_SCHEMES.contains(&scheme) => {
            let builder = mongodb::MongoDriverBuilder::new(&config.uri);
            Ok(DocumentStoreClient::connect(builder).await?.into_dyn())
        }
        Some(scheme) => Err(DocumentStoreError::Initialization(format!(
            "no driver for uri scheme `{scheme}`"
        ))),
        None => Err(DocumentStoreError::Initialization(format!(
            "malformed connection uri: {}",
            config.redacted_uri()
        ))),
    }
}
