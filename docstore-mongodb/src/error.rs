//! Mapping of MongoDB driver errors onto [`DocumentStoreError`].

use mongodb::error::{Error as MongoError, ErrorKind, WriteFailure};

use docstore_core::error::DocumentStoreError;

const NAMESPACE_NOT_FOUND: i32 = 26;
const INDEX_NOT_FOUND: i32 = 27;

/// Maps a driver error onto the closest error category, keeping the driver's message and
/// server code.
pub(crate) fn map_error(err: MongoError) -> DocumentStoreError {
    let message = err.to_string();

    match err.kind.as_ref() {
        ErrorKind::Io(_)
        | ErrorKind::ServerSelection { .. }
        | ErrorKind::DnsResolve { .. }
        | ErrorKind::Authentication { .. }
        | ErrorKind::ConnectionPoolCleared { .. } => DocumentStoreError::Connectivity(message),
        ErrorKind::InvalidArgument { .. } => DocumentStoreError::Validation { code: None, message },
        ErrorKind::Write(WriteFailure::WriteError(write_error)) => DocumentStoreError::Validation {
            code: Some(write_error.code),
            message: write_error.message.clone(),
        },
        ErrorKind::Write(WriteFailure::WriteConcernError(concern)) => DocumentStoreError::Driver {
            code: Some(concern.code),
            message: concern.message.clone(),
        },
        ErrorKind::Command(command) if matches!(command.code, NAMESPACE_NOT_FOUND | INDEX_NOT_FOUND) => {
            DocumentStoreError::NotFound(command.message.clone())
        }
        ErrorKind::Command(command) => DocumentStoreError::Driver {
            code: Some(command.code),
            message: command.message.clone(),
        },
        ErrorKind::Bson(_) | ErrorKind::BsonDeserialization(_) | ErrorKind::BsonSerialization(_) => {
            DocumentStoreError::Decode(message)
        }
        ErrorKind::Transaction { .. } | ErrorKind::SessionsNotSupported => DocumentStoreError::Transaction(message),
        _ => DocumentStoreError::driver(message),
    }
}

/// Maps a failure that happened while connecting.
pub(crate) fn map_init_error(err: MongoError) -> DocumentStoreError {
    match map_error(err) {
        DocumentStoreError::Driver { message, .. } | DocumentStoreError::Validation { message, .. } => {
            DocumentStoreError::Initialization(message)
        }
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::doc;

    #[test]
    fn bson_failures_are_decode_errors() {
        let bson_error = bson::deserialize_from_document::<i32>(doc! { "a": 1 }).unwrap_err();

        let mapped = map_error(MongoError::from(bson_error));

        assert!(matches!(mapped, DocumentStoreError::Decode(_)), "got {mapped:?}");
    }

    #[test]
    fn unclassified_failures_become_initialization_while_connecting() {
        assert!(matches!(map_error(MongoError::custom("opaque")), DocumentStoreError::Driver { code: None, .. }));
        assert!(matches!(map_init_error(MongoError::custom("opaque")), DocumentStoreError::Initialization(_)));
    }
}
