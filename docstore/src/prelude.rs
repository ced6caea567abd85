//! Convenient re-exports of commonly used types.
//!
//! ```ignore
//! use docstore::prelude::*;
//! ```

pub use std::time::Duration;

pub use bson::{Bson, doc};
pub use docstore_core::{
    client::DocumentStoreClient,
    collection::Collection,
    config::ClientConfig,
    context::{CancelHandle, OpContext},
    cursor::DocumentCursor,
    document::{Document, from_document, to_document},
    driver::{Driver, DriverBuilder, DynDriver, Session},
    error::{DocumentStoreError, DocumentStoreResult, ItemFailure},
    namespace::Namespace,
    options::{FindOptions, IndexDescription, IndexModel, UpdateOptions},
    outcome::{BulkWriteReport, DeleteOutcome, InsertOneOutcome, UpdateOutcome},
    transaction::TransactionContext,
};
pub use docstore_memory::{MemoryDriver, MemoryDriverBuilder};

pub use crate::DynClient;
