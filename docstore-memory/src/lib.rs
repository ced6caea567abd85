//! In-memory document database driver for docstore.
//!
//! This crate provides a thread-safe, in-memory implementation of the `Driver` trait.
//! It evaluates filters, updates and aggregation pipelines itself and supports sessions
//! and transactions, which makes it suitable for tests, examples and local development.
//!
//! # Features
//!
//! - **Thread-safe access** - Concurrent reads and writes using an async-aware RwLock
//! - **Query operators** - `$eq`, `$ne`, `$gt(e)`, `$lt(e)`, `$in`, `$nin`, `$exists`, `$not`, `$and`, `$or`, `$nor`
//! - **Update operators** - `$set`, `$unset`, `$inc`, `$push`, `$addToSet`, `$rename`, `$setOnInsert`, replacements
//! - **Aggregation** - `$match`, `$sort`, `$skip`, `$limit`, `$project`, `$addFields`, `$group`, `$unwind`, `$count`
//! - **Indexes** - Unique and sparse indexes enforced on insert and update
//! - **Transactions** - Snapshot isolation per session, with commit and abort
//!
//! # Quick Start
//!
//! ```ignore
//! use docstore_core::{client::DocumentStoreClient, context::OpContext, namespace::Namespace};
//! use docstore_memory::MemoryDriver;
//! use bson::doc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = DocumentStoreClient::connect(MemoryDriver::builder()).await?;
//!     let ctx = OpContext::background();
//!     let ns = Namespace::new("testDB", "testColl")?;
//!
//!     client.insert_one(&ctx, &ns, doc! { "foo": "bar" }).await?;
//!     assert_eq!(client.count(&ctx, &ns, doc! {}).await?, 1);
//!
//!     client.close().await?;
//!     Ok(())
//! }
//! ```

#[allow(unused_extern_crates)]
extern crate self as docstore_memory;

mod aggregate;
mod evaluator;
mod filter;
mod state;
mod update;

pub mod store;

pub use store::{MEMORY_SCHEME, MemoryDriver, MemoryDriverBuilder};
