//! Lazy result sequences.
//!
//! A [`DocumentCursor`] is a finite, non-restartable stream of documents produced by a
//! driver. It is what `find` and `aggregate` hand back; `find_all` drains one into memory.

use std::{
    fmt,
    pin::Pin,
    task::{Context, Poll},
};

use futures::{Stream, StreamExt, TryStreamExt, stream::BoxStream};
use serde::de::DeserializeOwned;

use crate::{
    document::{Document, from_document},
    error::DocumentStoreResult,
};

pub struct DocumentCursor {
    inner: BoxStream<'static, DocumentStoreResult<Document>>,
}

impl DocumentCursor {
    /// Wraps a driver stream.
    pub fn from_stream<S>(stream: S) -> Self
    where
        S: Stream<Item = DocumentStoreResult<Document>> + Send + 'static,
    {
        Self { inner: stream.boxed() }
    }

    /// A cursor over results that are already in memory.
    pub fn from_documents(documents: Vec<Document>) -> Self {
        Self::from_stream(futures::stream::iter(documents.into_iter().map(Ok)))
    }

    /// Pulls the next document, or `None` once exhausted.
    pub async fn try_next(&mut self) -> DocumentStoreResult<Option<Document>> {
        self.inner.try_next().await
    }

    /// Drains the cursor. The first error aborts the drain and discards what was read.
    pub async fn try_collect_all(self) -> DocumentStoreResult<Vec<Document>> {
        self.inner.try_collect().await
    }

    /// Drains the cursor, decoding every document into `T`.
    pub async fn deserialize_all<T: DeserializeOwned>(self) -> DocumentStoreResult<Vec<T>> {
        self.try_collect_all()
            .await?
            .into_iter()
            .map(from_document)
            .collect()
    }
}

impl Stream for DocumentCursor {
    type Item = DocumentStoreResult<Document>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.inner.poll_next_unpin(cx)
    }
}

impl fmt::Debug for DocumentCursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DocumentCursor").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DocumentStoreError;
    use bson::doc;

    #[tokio::test]
    async fn collect_fails_fast_and_discards_partials() {
        let cursor = DocumentCursor::from_stream(futures::stream::iter(vec![
            Ok(doc! { "n": 1 }),
            Err(DocumentStoreError::Decode("truncated document".into())),
            Ok(doc! { "n": 3 }),
        ]));

        let err = cursor.try_collect_all().await.unwrap_err();
        assert!(matches!(err, DocumentStoreError::Decode(_)));
    }

    #[tokio::test]
    async fn cursor_is_consumed_incrementally() {
        let mut cursor = DocumentCursor::from_documents(vec![doc! { "n": 1 }, doc! { "n": 2 }]);

        assert_eq!(cursor.try_next().await.unwrap(), Some(doc! { "n": 1 }));
        assert_eq!(cursor.next().await.unwrap().unwrap(), doc! { "n": 2 });
        assert_eq!(cursor.try_next().await.unwrap(), None);
    }

    #[tokio::test]
    async fn deserialize_all_decodes_every_document() {
        #[derive(Debug, PartialEq, serde::Deserialize)]
        struct Item {
            n: i32,
        }

        let cursor = DocumentCursor::from_documents(vec![doc! { "n": 1 }, doc! { "n": 2 }]);
        assert_eq!(cursor.deserialize_all::<Item>().await.unwrap(), vec![Item { n: 1 }, Item { n: 2 }]);

        let cursor = DocumentCursor::from_documents(vec![doc! { "n": 1 }, doc! { "n": "two" }]);
        let err = cursor.deserialize_all::<Item>().await.unwrap_err();
        assert!(matches!(err, DocumentStoreError::Decode(_)));
    }
}
