//! Document representation and conversions.
//!
//! Documents are plain [`bson::Document`] values: unordered string keys mapping to
//! dynamically typed values. Identity (`_id`) is assigned by the driver when absent.
//! This module provides helpers for moving between documents and typed Rust values.

use bson::{Bson, de::deserialize_from_document, ser::serialize_to_document};
use serde::{Serialize, de::DeserializeOwned};
use serde_json::Value;

use crate::error::{DocumentStoreError, DocumentStoreResult};

pub use bson::{Document, doc};

/// The key under which documents carry their identity.
pub const ID_FIELD: &str = "_id";

/// Serializes a value into a document.
///
/// # Errors
///
/// Returns [`DocumentStoreError::Serialization`] if the value does not serialize to a map.
pub fn to_document<T: Serialize + ?Sized>(value: &T) -> DocumentStoreResult<Document> {
    Ok(serialize_to_document(value)?)
}

/// Decodes a document into a typed value.
///
/// # Errors
///
/// Returns [`DocumentStoreError::Decode`] if the document does not match the shape of `T`.
pub fn from_document<T: DeserializeOwned>(document: Document) -> DocumentStoreResult<T> {
    deserialize_from_document(document).map_err(|e| DocumentStoreError::Decode(e.to_string()))
}

/// Renders a document as JSON, for display and logging.
pub fn document_to_json(document: &Document) -> DocumentStoreResult<Value> {
    Ok(serde_json::to_value(document)?)
}

/// Looks up a possibly dotted path (`a.b.c`) inside a document.
pub fn get_path<'a>(document: &'a Document, path: &str) -> Option<&'a Bson> {
    let mut parts = path.split('.');
    let mut current = document.get(parts.next()?)?;

    for part in parts {
        current = match current {
            Bson::Document(inner) => inner.get(part)?,
            Bson::Array(items) => items.get(part.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }

    Some(current)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct Exercise {
        name: String,
        reps: i32,
    }

    #[test]
    fn typed_values_convert_both_ways() {
        let doc = to_document(&Exercise { name: "squat".into(), reps: 5 }).unwrap();
        assert_eq!(doc, doc! { "name": "squat", "reps": 5 });

        let back: Exercise = from_document(doc).unwrap();
        assert_eq!(back.reps, 5);
    }

    #[test]
    fn decode_failure_is_reported_as_decode() {
        let err = from_document::<Exercise>(doc! { "name": 1 }).unwrap_err();
        assert!(matches!(err, DocumentStoreError::Decode(_)));
    }

    #[test]
    fn dotted_paths_walk_documents_and_arrays() {
        let doc = doc! { "a": { "b": [ { "c": 3 } ] } };

        assert_eq!(get_path(&doc, "a.b.0.c"), Some(&Bson::Int32(3)));
        assert_eq!(get_path(&doc, "a.x"), None);
        assert_eq!(document_to_json(&doc! { "n": 1 }).unwrap(), serde_json::json!({ "n": 1 }));
    }
}
