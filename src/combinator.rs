//! Combinators that build new futures out of existing ones.
//!
//! Every combinator registers a single observer on its input and settles a
//! fresh output future from it. Nothing here blocks. By default continuations
//! run on whichever thread settles the input; [`Future::on`] picks an
//! execution context instead:
//!
//! ```
//! use promise_kit::{Inline, Promise};
//! use std::sync::Arc;
//!
//! let price = Promise::<u32>::value(120);
//! let label = price
//!     .on(Arc::new(Inline))
//!     .map(|cents| format!("${}.{:02}", cents / 100, cents % 100));
//! assert_eq!(label.value_now().as_deref(), Some("$1.20"));
//! ```
use std::sync::Arc;

use parking_lot::Mutex;

use crate::context::ExecutionContext;
use crate::future::Future;
use crate::Error;

/// One of two values, used by [`Future::or`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Either<L, R> {
    Left(L),
    Right(R),
}

impl<L, R> Either<L, R> {
    pub fn is_left(&self) -> bool {
        matches!(self, Self::Left(_))
    }

    pub fn is_right(&self) -> bool {
        matches!(self, Self::Right(_))
    }

    pub fn left(self) -> Option<L> {
        match self {
            Self::Left(l) => Some(l),
            Self::Right(_) => None,
        }
    }

    pub fn right(self) -> Option<R> {
        match self {
            Self::Left(_) => None,
            Self::Right(r) => Some(r),
        }
    }
}

/// A future paired with the context its continuations should run on.
///
/// Returned by [`Future::on`]; offers the same combinators as [`Future`].
#[derive(Clone)]
pub struct On<'a, T, E> {
    future: &'a Future<T, E>,
    context: Option<ExecutionContext>,
}

impl<T, E> Future<T, E>
where
    T: Clone + Send + 'static,
    E: Clone + Send + 'static,
{
    /// Runs the continuations of the next combinator or observer on `context`.
    pub fn on(&self, context: ExecutionContext) -> On<'_, T, E> {
        On {
            future: self,
            context: Some(context),
        }
    }

    fn inline(&self) -> On<'_, T, E> {
        On {
            future: self,
            context: None,
        }
    }

    pub fn map<U, F>(&self, f: F) -> Future<U, E>
    where
        U: Clone + Send + 'static,
        F: FnOnce(T) -> U + Send + 'static,
    {
        self.inline().map(f)
    }

    pub fn try_map<U, F>(&self, f: F) -> Future<U, E>
    where
        U: Clone + Send + 'static,
        F: FnOnce(T) -> Result<U, E> + Send + 'static,
    {
        self.inline().try_map(f)
    }

    pub fn flat_map<U, F>(&self, f: F) -> Future<U, E>
    where
        U: Clone + Send + 'static,
        F: FnOnce(T) -> Future<U, E> + Send + 'static,
    {
        self.inline().flat_map(f)
    }

    pub fn map_error<E2, F>(&self, f: F) -> Future<T, E2>
    where
        E2: Clone + Send + 'static,
        F: FnOnce(E) -> E2 + Send + 'static,
    {
        self.inline().map_error(f)
    }

    pub fn flat_map_error<E2, F>(&self, f: F) -> Future<T, E2>
    where
        E2: Clone + Send + 'static,
        F: FnOnce(E) -> Future<T, E2> + Send + 'static,
    {
        self.inline().flat_map_error(f)
    }

    pub fn recover<F>(&self, f: F) -> Future<T, E>
    where
        F: FnOnce(E) -> T + Send + 'static,
    {
        self.inline().recover(f)
    }

    pub fn compact_map<U, F>(&self, f: F) -> Future<U, E>
    where
        U: Clone + Send + 'static,
        E: From<Error>,
        F: FnOnce(T) -> Option<U> + Send + 'static,
    {
        self.inline().compact_map(f)
    }

    pub fn compact_map_or<U, F>(&self, f: F, or_error: E) -> Future<U, E>
    where
        U: Clone + Send + 'static,
        F: FnOnce(T) -> Option<U> + Send + 'static,
    {
        self.inline().compact_map_or(f, or_error)
    }

    pub fn ensure<P>(&self, predicate: P) -> Future<T, E>
    where
        E: From<Error>,
        P: FnOnce(&T) -> bool + Send + 'static,
    {
        self.inline().ensure(predicate)
    }

    pub fn ensure_or<P>(&self, predicate: P, otherwise: E) -> Future<T, E>
    where
        P: FnOnce(&T) -> bool + Send + 'static,
    {
        self.inline().ensure_or(predicate, otherwise)
    }

    pub fn and<U>(&self, other: &Future<U, E>) -> Future<(T, U), E>
    where
        U: Clone + Send + 'static,
    {
        self.inline().and(other)
    }

    pub fn or<U>(&self, other: &Future<U, E>) -> Future<Either<T, U>, E>
    where
        U: Clone + Send + 'static,
    {
        self.inline().or(other)
    }

    /// Drops the value, keeping only success or failure.
    pub fn erase(&self) -> Future<(), E> {
        self.map(|_| ())
    }
}

impl<'a, T, E> On<'a, T, E>
where
    T: Clone + Send + 'static,
    E: Clone + Send + 'static,
{
    pub fn on_success<F>(self, f: F) -> &'a Future<T, E>
    where
        F: FnOnce(T) + Send + 'static,
    {
        self.future.on_success_in(self.context, f);
        self.future
    }

    pub fn on_failure<F>(self, f: F) -> &'a Future<T, E>
    where
        F: FnOnce(E) + Send + 'static,
    {
        self.future.on_failure_in(self.context, f);
        self.future
    }

    pub fn on_complete<F>(self, f: F) -> &'a Future<T, E>
    where
        F: FnOnce(Result<T, E>) + Send + 'static,
    {
        self.future.observe(self.context, f);
        self.future
    }

    /// Resolves with `f(value)`, or rejects with the same error.
    pub fn map<U, F>(self, f: F) -> Future<U, E>
    where
        U: Clone + Send + 'static,
        F: FnOnce(T) -> U + Send + 'static,
    {
        self.try_map(move |value| Ok(f(value)))
    }

    /// Like [`map`](Self::map), but a failing transform rejects the output.
    pub fn try_map<U, F>(self, f: F) -> Future<U, E>
    where
        U: Clone + Send + 'static,
        F: FnOnce(T) -> Result<U, E> + Send + 'static,
    {
        let output = Future::new();
        let settle = output.clone();
        self.future
            .observe(self.context, move |result| settle.settle(result.and_then(f)));
        output
    }

    /// Chains to the future returned by `f`.
    pub fn flat_map<U, F>(self, f: F) -> Future<U, E>
    where
        U: Clone + Send + 'static,
        F: FnOnce(T) -> Future<U, E> + Send + 'static,
    {
        let output = Future::new();
        let settle = output.clone();
        self.future.observe(self.context, move |result| match result {
            Ok(value) => {
                f(value).on_complete(move |inner| settle.settle(inner));
            }
            Err(err) => settle.reject(err),
        });
        output
    }

    pub fn map_error<E2, F>(self, f: F) -> Future<T, E2>
    where
        E2: Clone + Send + 'static,
        F: FnOnce(E) -> E2 + Send + 'static,
    {
        let output = Future::new();
        let settle = output.clone();
        self.future
            .observe(self.context, move |result| settle.settle(result.map_err(f)));
        output
    }

    /// Recovers from a failure by chaining to the future returned by `f`.
    pub fn flat_map_error<E2, F>(self, f: F) -> Future<T, E2>
    where
        E2: Clone + Send + 'static,
        F: FnOnce(E) -> Future<T, E2> + Send + 'static,
    {
        let output = Future::new();
        let settle = output.clone();
        self.future.observe(self.context, move |result| match result {
            Ok(value) => settle.resolve(value),
            Err(err) => {
                f(err).on_complete(move |inner| settle.settle(inner));
            }
        });
        output
    }

    /// Replaces a failure with the value produced by `f`.
    pub fn recover<F>(self, f: F) -> Future<T, E>
    where
        F: FnOnce(E) -> T + Send + 'static,
    {
        let output = Future::new();
        let settle = output.clone();
        self.future.observe(self.context, move |result| {
            settle.resolve(result.unwrap_or_else(f))
        });
        output
    }

    /// Maps through `f`; `None` rejects with [`Error::Validation`].
    pub fn compact_map<U, F>(self, f: F) -> Future<U, E>
    where
        U: Clone + Send + 'static,
        E: From<Error>,
        F: FnOnce(T) -> Option<U> + Send + 'static,
    {
        self.compact_map_or(f, E::from(Error::Validation))
    }

    pub fn compact_map_or<U, F>(self, f: F, or_error: E) -> Future<U, E>
    where
        U: Clone + Send + 'static,
        F: FnOnce(T) -> Option<U> + Send + 'static,
    {
        self.try_map(move |value| f(value).ok_or(or_error))
    }

    /// Rejects with [`Error::Validation`] when `predicate` fails.
    pub fn ensure<P>(self, predicate: P) -> Future<T, E>
    where
        E: From<Error>,
        P: FnOnce(&T) -> bool + Send + 'static,
    {
        self.ensure_or(predicate, E::from(Error::Validation))
    }

    pub fn ensure_or<P>(self, predicate: P, otherwise: E) -> Future<T, E>
    where
        P: FnOnce(&T) -> bool + Send + 'static,
    {
        self.try_map(move |value| {
            if predicate(&value) {
                Ok(value)
            } else {
                Err(otherwise)
            }
        })
    }

    /// Waits for both futures; the first failure rejects the pair.
    pub fn and<U>(self, other: &Future<U, E>) -> Future<(T, U), E>
    where
        U: Clone + Send + 'static,
    {
        let output = Future::new();
        let slots: Arc<Mutex<(Option<T>, Option<U>)>> = Arc::new(Mutex::new((None, None)));

        let (settle, barrier) = (output.clone(), slots.clone());
        self.future.observe(self.context.clone(), move |result| match result {
            Ok(left) => {
                let mut slots = barrier.lock();
                match slots.1.take() {
                    Some(right) => {
                        drop(slots);
                        settle.resolve((left, right));
                    }
                    None => slots.0 = Some(left),
                }
            }
            Err(err) => settle.reject(err),
        });

        let settle = output.clone();
        other.observe(self.context, move |result| match result {
            Ok(right) => {
                let mut slots = slots.lock();
                match slots.0.take() {
                    Some(left) => {
                        drop(slots);
                        settle.resolve((left, right));
                    }
                    None => slots.1 = Some(right),
                }
            }
            Err(err) => settle.reject(err),
        });
        output
    }

    /// Resolves with whichever future succeeds first. Rejects only when both
    /// fail, with the error of the one that failed last.
    pub fn or<U>(self, other: &Future<U, E>) -> Future<Either<T, U>, E>
    where
        U: Clone + Send + 'static,
    {
        let output = Future::new();
        let failures = Arc::new(Mutex::new(0_u8));

        let (settle, barrier) = (output.clone(), failures.clone());
        self.future.observe(self.context.clone(), move |result| match result {
            Ok(left) => settle.resolve(Either::Left(left)),
            Err(err) => {
                let mut failed = barrier.lock();
                *failed += 1;
                if *failed == 2 {
                    drop(failed);
                    settle.reject(err);
                }
            }
        });

        let settle = output.clone();
        other.observe(self.context, move |result| match result {
            Ok(right) => settle.resolve(Either::Right(right)),
            Err(err) => {
                let mut failed = failures.lock();
                *failed += 1;
                if *failed == 2 {
                    drop(failed);
                    settle.reject(err);
                }
            }
        });
        output
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::SerialQueue;
    use crate::Promise;
    use futures::executor::block_on;
    use std::thread;

    #[test]
    fn map_then_map_error_matches_direct_value() {
        let mapped = Promise::value(4).map(|v| v * 10).map_error(|_| Error::Cancelled);
        assert_eq!(mapped.result(), Promise::value(40).result());
    }

    #[test]
    fn map_passes_error_through() {
        let mapped = Promise::<i32>::error(Error::Validation).map(|v| v + 1);
        assert_eq!(mapped.error_now(), Some(Error::Validation));
    }

    #[test]
    fn try_map_rejects_with_transform_error() {
        let mapped = Promise::value("x")
            .try_map(|s| s.parse::<i32>().map_err(|e| Error::message(e.to_string())));
        assert!(matches!(mapped.error_now(), Some(Error::Message(_))));
    }

    #[test]
    fn flat_map_follows_inner_future() {
        let inner = Promise::<String>::new();
        let source = Promise::value(1);
        let captured = inner.clone();
        let chained = source.flat_map(move |_| captured);
        assert!(chained.is_pending());
        inner.resolve("later".into());
        assert_eq!(chained.value_now().as_deref(), Some("later"));
    }

    #[test]
    fn flat_map_error_recovers() {
        let recovered: Future<i32, String> = Promise::error(Error::Cancelled)
            .flat_map_error(|err| Future::value(if err == Error::Cancelled { 0 } else { 1 }));
        assert_eq!(recovered.value_now(), Some(0));
    }

    #[test]
    fn recover_replaces_failure() {
        let recovered =
            Promise::<u8>::error(Error::Timeout(std::time::Duration::ZERO)).recover(|_| 9);
        assert_eq!(recovered.value_now(), Some(9));
    }

    #[test]
    fn compact_map_rejects_on_none() {
        let none = Promise::value("abc").compact_map(|s| s.parse::<u32>().ok());
        assert_eq!(none.error_now(), Some(Error::Validation));
        let custom = Promise::value("abc")
            .compact_map_or(|s| s.parse::<u32>().ok(), Error::from("not a number"));
        assert_eq!(custom.error_now(), Some(Error::from("not a number")));
        let some = Promise::value("12").compact_map(|s| s.parse::<u32>().ok());
        assert_eq!(some.value_now(), Some(12));
    }

    #[test]
    fn ensure_validates_value() {
        assert_eq!(Promise::value(5).ensure(|v| *v > 3).value_now(), Some(5));
        assert_eq!(
            Promise::value(1).ensure(|v| *v > 3).error_now(),
            Some(Error::Validation)
        );
        assert_eq!(
            Promise::value(1).ensure_or(|v| *v > 3, Error::Cancelled).error_now(),
            Some(Error::Cancelled)
        );
    }

    #[test]
    fn and_waits_for_both() {
        let a = Promise::<i32>::new();
        let b = Promise::<&'static str>::new();
        let both = a.and(&b);
        b.resolve("b");
        assert!(both.is_pending());
        a.resolve(1);
        assert_eq!(both.value_now(), Some((1, "b")));
    }

    #[test]
    fn and_fails_fast() {
        let a = Promise::<i32>::new();
        let b = Promise::<i32>::new();
        let both = a.and(&b);
        b.reject(Error::Cancelled);
        assert_eq!(both.error_now(), Some(Error::Cancelled));
    }

    #[test]
    fn or_takes_first_success() {
        let a = Promise::<i32>::new();
        let b = Promise::<String>::new();
        let either = a.or(&b);
        a.reject(Error::Validation);
        assert!(either.is_pending());
        b.resolve("right".into());
        assert_eq!(either.value_now(), Some(Either::Right("right".to_owned())));
    }

    #[test]
    fn or_rejects_with_last_error_when_both_fail() {
        let a = Promise::<i32>::new();
        let b = Promise::<i32>::new();
        let either = a.or(&b);
        b.reject(Error::Validation);
        a.reject(Error::Cancelled);
        assert_eq!(either.error_now(), Some(Error::Cancelled));
    }

    #[test]
    fn on_runs_continuation_on_context() {
        let queue: ExecutionContext = Arc::new(SerialQueue::new("combinator-ctx").unwrap());
        let names = Promise::value(())
            .on(queue)
            .map(|_| thread::current().name().map(str::to_owned));
        assert_eq!(block_on(names).unwrap().as_deref(), Some("combinator-ctx"));
    }

    #[test]
    fn either_accessors() {
        let left: Either<i32, &str> = Either::Left(1);
        assert!(left.is_left());
        assert_eq!(left.left(), Some(1));
        assert_eq!(Either::<i32, &str>::Right("r").right(), Some("r"));
    }
}
