//! Promises backed by a cancelable resource.
//!
//! [`CancelablePromise::cancel`] asks the underlying resource to stop but does
//! not settle the promise. The resource's own completion path is expected to
//! reject it (typically with [`Error::Cancelled`]). Cancellation is not
//! propagated to futures derived through combinators.
use std::fmt;
use std::ops::Deref;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::ReentrantMutex;

use crate::context::ExecutionContext;
use crate::future::Future;
use crate::Error;

/// Something that can be asked to stop: a network request, a timer, a child
/// process.
pub trait Cancelable: Send + Sync + 'static {
    /// Called with the promise's settlement gate held.
    ///
    /// The handle may settle the promise from this thread. It must not block
    /// waiting for another thread that settles the same promise: that thread
    /// waits on the gate, and neither makes progress.
    fn cancel(&self);
}

impl<F> Cancelable for F
where
    F: Fn() + Send + Sync + 'static,
{
    fn cancel(&self) {
        self()
    }
}

/// A future paired with the handle of the work producing it.
pub struct CancelablePromise<T, E = Error> {
    future: Future<T, E>,
    handle: Arc<dyn Cancelable>,
    // Serializes cancellation with settlement. Reentrant so a handle that
    // rejects synchronously from `cancel` does not deadlock.
    gate: Arc<ReentrantMutex<()>>,
    cancel_requested: Arc<AtomicBool>,
}

impl<T, E> Clone for CancelablePromise<T, E> {
    fn clone(&self) -> Self {
        Self {
            future: self.future.clone(),
            handle: self.handle.clone(),
            gate: self.gate.clone(),
            cancel_requested: self.cancel_requested.clone(),
        }
    }
}

impl<T, E> fmt::Debug for CancelablePromise<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CancelablePromise")
            .field("future", &self.future)
            .field("cancel_requested", &self.cancel_requested.load(Ordering::Acquire))
            .finish()
    }
}

impl<T, E> Deref for CancelablePromise<T, E> {
    type Target = Future<T, E>;

    fn deref(&self) -> &Self::Target {
        &self.future
    }
}

impl<T, E> CancelablePromise<T, E>
where
    T: Clone + Send + 'static,
    E: Clone + Send + 'static,
{
    pub fn new<H: Cancelable>(handle: H) -> Self {
        Self {
            future: Future::new(),
            handle: Arc::new(handle),
            gate: Arc::new(ReentrantMutex::new(())),
            cancel_requested: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn resolve(&self, value: T) {
        self.settle(Ok(value));
    }

    pub fn reject(&self, err: E) {
        self.settle(Err(err));
    }

    pub fn settle(&self, result: Result<T, E>) {
        self.settle_on(result, None);
    }

    pub fn resolve_on(&self, value: T, context: ExecutionContext) {
        self.settle_on(Ok(value), Some(context));
    }

    pub fn reject_on(&self, err: E, context: ExecutionContext) {
        self.settle_on(Err(err), Some(context));
    }

    /// Settles under the gate shared with [`cancel`](Self::cancel), so a
    /// settlement never interleaves with a cancellation in progress.
    ///
    /// Observers that run synchronously run with the gate held.
    pub fn settle_on(&self, result: Result<T, E>, context: Option<ExecutionContext>) {
        let _gate = self.gate.lock();
        self.future.settle_on(result, context);
    }

    /// Requests cancellation of the underlying resource.
    ///
    /// Does nothing once the promise has settled or cancellation was already
    /// requested.
    pub fn cancel(&self) {
        let _gate = self.gate.lock();
        if !self.future.is_pending() {
            tracing::trace!("cancel ignored, promise already settled");
            return;
        }
        if self.cancel_requested.swap(true, Ordering::AcqRel) {
            return;
        }
        tracing::debug!("requesting cancellation of underlying resource");
        self.handle.cancel();
    }

    pub fn is_cancel_requested(&self) -> bool {
        self.cancel_requested.load(Ordering::Acquire)
    }

    /// The plain future, for callers that only observe.
    ///
    /// Settling through the returned handle skips the cancellation gate; use
    /// the settle methods on this type instead.
    pub fn future(&self) -> Future<T, E> {
        self.future.clone()
    }
}
