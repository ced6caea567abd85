//! MongoDB driver for docstore.
//!
//! This crate implements the `Driver` trait on top of the official MongoDB async client,
//! so every client operation is executed by a real server.
//!
//! To use this driver through the umbrella crate, enable the `mongodb` feature:
//!
//! ```toml
//! [dependencies]
//! docstore = { version = "x.y.z", features = ["mongodb"] }
//! ```
//!
//! # Features
//!
//! - **Connection verification** - The builder pings the server before handing out a driver
//! - **Unordered bulk inserts** - Every document is attempted; failures are reported per position
//! - **Transactions** - Backed by MongoDB client sessions (replica set or sharded cluster required)
//! - **Error mapping** - Server codes and messages are kept on every mapped error
//!
//! # Example
//!
//! ```ignore
//! use docstore_core::client::DocumentStoreClient;
//! use docstore_mongodb::MongoDriver;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = DocumentStoreClient::connect(MongoDriver::builder("mongodb://localhost:27017")).await?;
//!
//!     client.close().await?;
//!     Ok(())
//! }
//! ```

#[allow(unused_extern_crates)]
extern crate self as docstore_mongodb;

mod error;

pub mod store;

pub use store::{MONGODB_SCHEMES, MongoDriver, MongoDriverBuilder};
