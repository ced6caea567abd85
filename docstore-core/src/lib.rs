//! A thin typed facade over remote document databases.
//!
//! This crate is the core of the docstore project and provides:
//!
//! - **Client facade** ([`client`]) - CRUD, aggregation, indexing and transactions as plain method calls
//! - **Driver abstraction** ([`driver`]) - Traits implemented by concrete database drivers
//! - **Operation context** ([`context`]) - Caller-supplied deadlines and cancellation
//! - **Namespaces** ([`namespace`]) - Database/collection targets
//! - **Documents and cursors** ([`document`], [`cursor`]) - Dynamic documents and lazy result streams
//! - **Options and outcomes** ([`options`], [`outcome`]) - Operation shaping and write results
//! - **Transactions** ([`transaction`]) - Callback-scoped transactions
//! - **Configuration** ([`config`]) - Connection URI from the caller or environment
//! - **Error handling** ([`error`]) - Error categories and result types
//!
//! # Example
//!
//! ```ignore
//! use docstore_core::{client::DocumentStoreClient, context::OpContext, namespace::Namespace};
//! use bson::doc;
//!
//! let client = DocumentStoreClient::connect(builder).await?;
//! let ctx = OpContext::background();
//! let ns = Namespace::new("Fitness", "exercises")?;
//!
//! for exercise in client.find_all(&ctx, &ns, doc! {}).await? {
//!     println!("{exercise}");
//! }
//! ```

#[allow(unused_extern_crates)]
extern crate self as docstore_core;

pub mod client;
pub mod collection;
pub mod config;
pub mod context;
pub mod cursor;
pub mod document;
pub mod driver;
pub mod error;
pub mod namespace;
pub mod options;
pub mod outcome;
pub mod transaction;
