//! Single-resolution deferred values.
//!
//! A [`Resolver`] / [`Deferred`] pair is created before the event it waits
//! for can happen. The resolver side is held by whoever observes the event;
//! the deferred side is a future the orchestrator awaits. Resolution is
//! one-shot: a second resolution is rejected, and dropping an unresolved
//! resolver wakes the awaiting side with [`DeferredError::Abandoned`].
//!
//! There is no built-in timeout. Callers wrap the future in
//! `tokio::time::timeout` with their own step budget.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::sync::oneshot;

use crate::error::DeferredError;

/// Resolving half.
#[derive(Debug)]
pub struct Resolver<T> {
    tx: Option<oneshot::Sender<T>>,
}

/// Awaiting half.
#[derive(Debug)]
pub struct Deferred<T> {
    rx: oneshot::Receiver<T>,
}

/// Create a linked pair.
pub fn deferred<T>() -> (Resolver<T>, Deferred<T>) {
    let (tx, rx) = oneshot::channel();
    (Resolver { tx: Some(tx) }, Deferred { rx })
}

impl<T> Resolver<T> {
    /// Resolve with `value`.
    ///
    /// Succeeds even if the awaiting side was already dropped; the value is
    /// then discarded. Fails only on a repeated resolution.
    pub fn resolve(&mut self, value: T) -> Result<(), DeferredError> {
        let tx = self.tx.take().ok_or(DeferredError::AlreadyResolved)?;
        let _ = tx.send(value);
        Ok(())
    }

    /// Whether `resolve` has been called.
    pub fn is_resolved(&self) -> bool {
        self.tx.is_none()
    }

    /// Whether the awaiting side has gone away.
    pub fn is_orphaned(&self) -> bool {
        self.tx.as_ref().map_or(true, oneshot::Sender::is_closed)
    }
}

impl<T> Deferred<T> {
    /// Take the value if it is already available, without waiting.
    ///
    /// Returns `None` while still pending.
    pub fn try_take(&mut self) -> Option<Result<T, DeferredError>> {
        match self.rx.try_recv() {
            Ok(value) => Some(Ok(value)),
            Err(oneshot::error::TryRecvError::Empty) => None,
            Err(oneshot::error::TryRecvError::Closed) => Some(Err(DeferredError::Abandoned)),
        }
    }
}

impl<T> Future for Deferred<T> {
    type Output = Result<T, DeferredError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx)
            .poll(cx)
            .map_err(|_| DeferredError::Abandoned)
    }
}
