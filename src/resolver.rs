//! Producer-side handles for adapting callback APIs.
//!
//! A [`Resolver`] can only settle its future, and settling consumes it. If it
//! is dropped while the future is still pending, the future is rejected with
//! [`Error::Abandoned`] so nobody waits forever on a producer that is gone.
//!
//! # Examples
//!
//! ```
//! use promise_kit::Promise;
//! use std::thread;
//!
//! fn fetch(done: impl FnOnce(Result<u32, promise_kit::Error>) + Send + 'static) {
//!     thread::spawn(move || done(Ok(7)));
//! }
//!
//! let promise = Promise::wrap(|resolver| fetch(resolver.into_callback()));
//! assert_eq!(futures::executor::block_on(promise), Ok(7));
//! ```
use std::fmt;

use crate::future::Future;
use crate::Error;

pub struct Resolver<T, E = Error>
where
    T: Clone + Send + 'static,
    E: Clone + Send + From<Error> + 'static,
{
    future: Future<T, E>,
}

impl<T, E> fmt::Debug for Resolver<T, E>
where
    T: Clone + Send + 'static,
    E: Clone + Send + From<Error> + 'static,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Resolver").field("future", &self.future).finish()
    }
}

impl<T, E> Resolver<T, E>
where
    T: Clone + Send + 'static,
    E: Clone + Send + From<Error> + 'static,
{
    /// Creates a resolver and the future it settles.
    pub fn new() -> (Self, Future<T, E>) {
        let future = Future::new();
        (
            Self {
                future: future.clone(),
            },
            future,
        )
    }

    pub fn resolve(self, value: T) {
        self.future.resolve(value);
    }

    pub fn reject(self, err: E) {
        self.future.reject(err);
    }

    pub fn complete(self, result: Result<T, E>) {
        self.future.settle(result);
    }

    /// Settles from a `(value?, error?)` pair. An error wins over a value;
    /// neither rejects with [`Error::MissingResult`].
    pub fn complete_pair(self, value: Option<T>, err: Option<E>) {
        let result = match (value, err) {
            (_, Some(err)) => Err(err),
            (Some(value), None) => Ok(value),
            (None, None) => Err(E::from(Error::MissingResult)),
        };
        self.complete(result);
    }

    /// Converts into a plain `Result` callback.
    pub fn into_callback(self) -> Box<dyn FnOnce(Result<T, E>) + Send + 'static> {
        Box::new(move |result| self.complete(result))
    }

    /// Converts into a `(value?, error?)` callback.
    pub fn into_pair_callback(self) -> Box<dyn FnOnce(Option<T>, Option<E>) + Send + 'static> {
        Box::new(move |value, err| self.complete_pair(value, err))
    }
}

impl<T, E> Drop for Resolver<T, E>
where
    T: Clone + Send + 'static,
    E: Clone + Send + From<Error> + 'static,
{
    fn drop(&mut self) {
        if self.future.is_pending() {
            tracing::debug!("resolver dropped while pending, rejecting");
            self.future.reject(E::from(Error::Abandoned));
        }
    }
}

impl<T, E> Future<T, E>
where
    T: Clone + Send + 'static,
    E: Clone + Send + From<Error> + 'static,
{
    /// Adapts a callback-style API into a future settled exactly once.
    pub fn wrap<F>(f: F) -> Self
    where
        F: FnOnce(Resolver<T, E>),
    {
        let (resolver, future) = Resolver::new();
        f(resolver);
        future
    }
}
