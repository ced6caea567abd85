//! Per-operation execution context.
//!
//! Every client operation takes an [`OpContext`] from the caller. The context bounds
//! the operation with an optional deadline and an optional cancellation signal; the
//! client never applies a timeout of its own.
//!
//! # Example
//!
//! ```ignore
//! use std::time::Duration;
//! use docstore::context::OpContext;
//!
//! let ctx = OpContext::background().with_timeout(Duration::from_secs(5));
//! let (ctx, cancel) = ctx.with_cancel();
//!
//! // elsewhere: cancel.cancel();
//! let docs = client.find_all(&ctx, &ns, doc! {}).await?;
//! ```

use std::{future::Future, sync::Arc, time::Duration};

use tokio::{sync::watch, time::Instant};

use crate::error::{DocumentStoreError, DocumentStoreResult};

/// Deadline and cancellation scope for a single operation (or a whole transaction).
///
/// Contexts are cheap to clone. Clones share the same cancellation signal.
#[derive(Debug, Clone, Default)]
pub struct OpContext {
    deadline: Option<Instant>,
    /// One receiver per `with_cancel` along the derivation chain.
    cancel: Vec<watch::Receiver<bool>>,
}

impl OpContext {
    /// A context with no deadline and no cancellation.
    pub fn background() -> Self {
        Self::default()
    }

    /// Bounds the operation to finish within `timeout` from now.
    ///
    /// An earlier deadline already present on the context is kept.
    pub fn with_timeout(self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    /// Bounds the operation to finish before `deadline`.
    ///
    /// An earlier deadline already present on the context is kept.
    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(match self.deadline {
            Some(current) if current < deadline => current,
            _ => deadline,
        });
        self
    }

    /// Attaches a fresh cancellation signal and returns the handle that fires it.
    ///
    /// Signals already on the context keep applying, so cancelling a parent also cancels
    /// every context derived from it.
    pub fn with_cancel(mut self) -> (Self, CancelHandle) {
        let (sender, receiver) = watch::channel(false);
        self.cancel.push(receiver);

        (self, CancelHandle { sender: Arc::new(sender) })
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Time left before the deadline, or `None` when unbounded.
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|deadline| deadline.saturating_duration_since(Instant::now()))
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.iter().any(|receiver| *receiver.borrow())
    }

    /// Fails fast if the context is already cancelled or past its deadline.
    pub fn check(&self) -> DocumentStoreResult<()> {
        if self.is_cancelled() {
            return Err(DocumentStoreError::Cancelled);
        }
        if self.deadline.is_some_and(|deadline| Instant::now() >= deadline) {
            return Err(DocumentStoreError::DeadlineExceeded);
        }

        Ok(())
    }

    /// Drives `operation` to completion under this context.
    ///
    /// Cancellation wins over completion when both are ready. When the deadline passes
    /// the operation future is dropped and [`DocumentStoreError::DeadlineExceeded`] is
    /// returned.
    pub async fn run<F, T>(&self, operation: F) -> DocumentStoreResult<T>
    where
        F: Future<Output = DocumentStoreResult<T>>,
    {
        self.check()?;

        let bounded = async {
            match self.deadline {
                Some(deadline) => tokio::time::timeout_at(deadline, operation)
                    .await
                    .map_err(|_| DocumentStoreError::DeadlineExceeded)?,
                None => operation.await,
            }
        };

        tokio::select! {
            biased;
            _ = self.cancelled() => Err(DocumentStoreError::Cancelled),
            result = bounded => result,
        }
    }

    /// Resolves once the context is cancelled; never resolves for uncancellable contexts.
    pub async fn cancelled(&self) {
        if self.cancel.is_empty() {
            return std::future::pending().await;
        }

        let signals = self
            .cancel
            .iter()
            .map(|receiver| Box::pin(fired(receiver.clone())));
        futures::future::select_all(signals).await;
    }
}

async fn fired(mut receiver: watch::Receiver<bool>) {
    // Sender dropped without cancelling: the signal can never fire.
    if receiver.wait_for(|cancelled| *cancelled).await.is_err() {
        std::future::pending::<()>().await;
    }
}

/// Fires the cancellation signal of the contexts created alongside it.
#[derive(Debug, Clone)]
pub struct CancelHandle {
    sender: Arc<watch::Sender<bool>>,
}

impl CancelHandle {
    pub fn cancel(&self) {
        self.sender.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.sender.borrow()
    }
}
