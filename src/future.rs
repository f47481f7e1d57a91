//! The single-assignment future at the heart of the crate.
//!
//! A [`Future`] is a cheap, cloneable handle to shared state guarded by one
//! lock per instance. It starts pending and is settled exactly once, by
//! [`Future::resolve`] or [`Future::reject`]; later attempts are ignored.
//! Observers may be attached before or after settlement and each one fires
//! exactly once, in registration order.
//!
//! ```
//! use promise_kit::Promise;
//!
//! let promise = Promise::<u32>::new();
//! let doubled = promise.map(|v| v * 2);
//! promise.resolve(21);
//! assert_eq!(doubled.value_now(), Some(42));
//! ```
use std::fmt;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll, Waker};

use parking_lot::Mutex;

use crate::context::ExecutionContext;
use crate::Error;

/// A future whose error channel is the crate's [`Error`].
pub type Promise<T> = Future<T, Error>;

type SuccessFn<T> = Box<dyn FnOnce(T) + Send + 'static>;
type FailureFn<E> = Box<dyn FnOnce(E) + Send + 'static>;
type CompleteFn<T, E> = Box<dyn FnOnce(Result<T, E>) + Send + 'static>;

enum Callback<T, E> {
    Success(SuccessFn<T>),
    Failure(FailureFn<E>),
    Complete(CompleteFn<T, E>),
}

struct Observer<T, E> {
    callback: Callback<T, E>,
    context: Option<ExecutionContext>,
}

impl<T, E> Observer<T, E>
where
    T: Clone + Send + 'static,
    E: Clone + Send + 'static,
{
    fn notify(self, result: &Result<T, E>, fallback: Option<&ExecutionContext>) {
        let call: Box<dyn FnOnce() + Send> = match (self.callback, result) {
            (Callback::Success(f), Ok(value)) => {
                let value = value.clone();
                Box::new(move || f(value))
            }
            (Callback::Failure(f), Err(err)) => {
                let err = err.clone();
                Box::new(move || f(err))
            }
            (Callback::Complete(f), result) => {
                let result = result.clone();
                Box::new(move || f(result))
            }
            _ => return,
        };
        match self.context.as_ref().or(fallback) {
            Some(context) => context.execute(call),
            None => call(),
        }
    }
}

struct State<T, E> {
    result: Option<Result<T, E>>,
    observers: Vec<Observer<T, E>>,
    wakers: Vec<Waker>,
    enabled: bool,
    draining: bool,
    settle_context: Option<ExecutionContext>,
}

/// A single-assignment, eventually available value or error.
pub struct Future<T, E = Error> {
    state: Arc<Mutex<State<T, E>>>,
}

impl<T, E> Clone for Future<T, E> {
    fn clone(&self) -> Self {
        Self {
            state: self.state.clone(),
        }
    }
}

impl<T, E> Default for Future<T, E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T, E> fmt::Debug for Future<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        let status = match &state.result {
            None => "pending",
            Some(Ok(_)) => "fulfilled",
            Some(Err(_)) => "rejected",
        };
        f.debug_struct("Future")
            .field("status", &status)
            .field("observers", &state.observers.len())
            .field("enabled", &state.enabled)
            .finish()
    }
}

impl<T, E> Future<T, E> {
    /// Creates a pending future.
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(State {
                result: None,
                observers: Vec::new(),
                wakers: Vec::new(),
                enabled: true,
                draining: false,
                settle_context: None,
            })),
        }
    }

    pub fn is_pending(&self) -> bool {
        self.state.lock().result.is_none()
    }

    pub fn is_fulfilled(&self) -> bool {
        matches!(self.state.lock().result, Some(Ok(_)))
    }

    pub fn is_rejected(&self) -> bool {
        matches!(self.state.lock().result, Some(Err(_)))
    }

    pub fn is_enabled(&self) -> bool {
        self.state.lock().enabled
    }

    /// True when both handles point at the same shared state.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.state, &other.state)
    }
}

impl<T, E> Future<T, E>
where
    T: Clone + Send + 'static,
    E: Clone + Send + 'static,
{
    /// Creates a future already fulfilled with `value`.
    pub fn value(value: T) -> Self {
        Self::from_result(Ok(value))
    }

    /// Creates a future already rejected with `err`.
    pub fn error(err: E) -> Self {
        Self::from_result(Err(err))
    }

    pub fn from_result(result: Result<T, E>) -> Self {
        let future = Self::new();
        future.settle(result);
        future
    }

    pub fn resolve(&self, value: T) {
        self.settle_on(Ok(value), None);
    }

    pub fn reject(&self, err: E) {
        self.settle_on(Err(err), None);
    }

    pub fn settle(&self, result: Result<T, E>) {
        self.settle_on(result, None);
    }

    /// Resolves and runs observers without a context of their own on `context`.
    pub fn resolve_on(&self, value: T, context: ExecutionContext) {
        self.settle_on(Ok(value), Some(context));
    }

    pub fn reject_on(&self, err: E, context: ExecutionContext) {
        self.settle_on(Err(err), Some(context));
    }

    /// Records `result` if the future is still pending, then notifies.
    ///
    /// Only the first settlement has any effect. Later calls are dropped
    /// without surfacing anything to the caller.
    pub fn settle_on(&self, result: Result<T, E>, context: Option<ExecutionContext>) {
        {
            let mut state = self.state.lock();
            if state.result.is_some() {
                tracing::trace!("ignoring redundant settlement of an already settled future");
                return;
            }
            state.result = Some(result);
            state.settle_context = context;
        }
        self.flush();
    }

    /// Silences or re-enables notification.
    ///
    /// A disabled future still records its result, but observers and awaiting
    /// tasks are held back. Re-enabling a settled future delivers everything
    /// that was held, in registration order.
    pub fn set_enabled(&self, enabled: bool) {
        self.state.lock().enabled = enabled;
        if enabled {
            self.flush();
        }
    }

    /// The recorded outcome, if settled.
    pub fn result(&self) -> Option<Result<T, E>> {
        self.state.lock().result.clone()
    }

    pub fn value_now(&self) -> Option<T> {
        match &self.state.lock().result {
            Some(Ok(value)) => Some(value.clone()),
            _ => None,
        }
    }

    pub fn error_now(&self) -> Option<E> {
        match &self.state.lock().result {
            Some(Err(err)) => Some(err.clone()),
            _ => None,
        }
    }

    /// Calls `f` with the value once fulfilled.
    pub fn on_success<F>(&self, f: F) -> &Self
    where
        F: FnOnce(T) + Send + 'static,
    {
        self.register(Callback::Success(Box::new(f)), None);
        self
    }

    /// Calls `f` with the error once rejected.
    pub fn on_failure<F>(&self, f: F) -> &Self
    where
        F: FnOnce(E) + Send + 'static,
    {
        self.register(Callback::Failure(Box::new(f)), None);
        self
    }

    /// Calls `f` with the outcome once settled either way.
    pub fn on_complete<F>(&self, f: F) -> &Self
    where
        F: FnOnce(Result<T, E>) + Send + 'static,
    {
        self.register(Callback::Complete(Box::new(f)), None);
        self
    }

    pub(crate) fn on_success_in<F>(&self, context: Option<ExecutionContext>, f: F)
    where
        F: FnOnce(T) + Send + 'static,
    {
        self.register(Callback::Success(Box::new(f)), context);
    }

    pub(crate) fn on_failure_in<F>(&self, context: Option<ExecutionContext>, f: F)
    where
        F: FnOnce(E) + Send + 'static,
    {
        self.register(Callback::Failure(Box::new(f)), context);
    }

    pub(crate) fn observe<F>(&self, context: Option<ExecutionContext>, f: F)
    where
        F: FnOnce(Result<T, E>) + Send + 'static,
    {
        self.register(Callback::Complete(Box::new(f)), context);
    }

    fn register(&self, callback: Callback<T, E>, context: Option<ExecutionContext>) {
        self.state.lock().observers.push(Observer { callback, context });
        self.flush();
    }

    /// Delivers the result to queued observers and wakers.
    ///
    /// Callbacks run outside the lock. Whoever flips `draining` owns delivery
    /// until the queue is empty, so registrations racing with settlement still
    /// fire in registration order and reentrant registrations never deadlock.
    fn flush(&self) {
        let (result, context, mut observers, mut wakers) = {
            let mut state = self.state.lock();
            if state.draining || !state.enabled {
                return;
            }
            let Some(result) = state.result.clone() else {
                return;
            };
            if state.observers.is_empty() && state.wakers.is_empty() {
                return;
            }
            state.draining = true;
            (
                result,
                state.settle_context.clone(),
                std::mem::take(&mut state.observers),
                std::mem::take(&mut state.wakers),
            )
        };
        loop {
            for observer in observers.drain(..) {
                observer.notify(&result, context.as_ref());
            }
            for waker in wakers.drain(..) {
                waker.wake();
            }
            let mut state = self.state.lock();
            if !state.enabled || (state.observers.is_empty() && state.wakers.is_empty()) {
                state.draining = false;
                return;
            }
            observers = std::mem::take(&mut state.observers);
            wakers = std::mem::take(&mut state.wakers);
        }
    }
}

impl<T, E> std::future::Future for Future<T, E>
where
    T: Clone + Send + 'static,
    E: Clone + Send + 'static,
{
    type Output = Result<T, E>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let mut state = self.state.lock();
        if state.enabled {
            if let Some(result) = &state.result {
                return Poll::Ready(result.clone());
            }
        }
        if !state.wakers.iter().any(|w| w.will_wake(cx.waker())) {
            state.wakers.push(cx.waker().clone());
        }
        Poll::Pending
    }
}
