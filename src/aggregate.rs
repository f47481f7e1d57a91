//! Aggregates over collections of futures: [`all`], [`any`] and [`race`].
//!
//! Each call allocates one shared barrier that every input's observer goes
//! through, so "how many have settled" and "has one succeeded" are decided
//! atomically however the inputs complete. Inputs keep running after the
//! aggregate settles; their late results are discarded.
//!
//! The aggregate never references its inputs. Input observers hold the
//! barrier and the output until they fire, then drop them.
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::context::ExecutionContext;
use crate::future::Future;
use crate::Error;

struct AllState<T> {
    slots: Vec<Option<T>>,
    remaining: usize,
    failed: bool,
}

/// Resolves with every value in input order, or rejects with the first error.
///
/// An empty input resolves immediately with an empty list.
pub fn all<T, E, I>(futures: I) -> Future<Vec<T>, E>
where
    T: Clone + Send + 'static,
    E: Clone + Send + 'static,
    I: IntoIterator<Item = Future<T, E>>,
{
    all_in(None, futures)
}

/// [`all`], running the input observers on `context`.
pub fn all_on<T, E, I>(context: ExecutionContext, futures: I) -> Future<Vec<T>, E>
where
    T: Clone + Send + 'static,
    E: Clone + Send + 'static,
    I: IntoIterator<Item = Future<T, E>>,
{
    all_in(Some(context), futures)
}

fn all_in<T, E, I>(context: Option<ExecutionContext>, futures: I) -> Future<Vec<T>, E>
where
    T: Clone + Send + 'static,
    E: Clone + Send + 'static,
    I: IntoIterator<Item = Future<T, E>>,
{
    let inputs: Vec<Future<T, E>> = futures.into_iter().collect();
    if inputs.is_empty() {
        return Future::value(Vec::new());
    }
    let output = Future::new();
    let barrier = Arc::new(Mutex::new(AllState {
        slots: std::iter::repeat_with(|| None).take(inputs.len()).collect(),
        remaining: inputs.len(),
        failed: false,
    }));
    for (index, input) in inputs.into_iter().enumerate() {
        let (barrier, settle) = (barrier.clone(), output.clone());
        input.observe(context.clone(), move |result| {
            let mut state = barrier.lock();
            if state.failed {
                return;
            }
            match result {
                Ok(value) => {
                    state.slots[index] = Some(value);
                    state.remaining -= 1;
                    if state.remaining == 0 {
                        let values: Vec<T> = state.slots.drain(..).flatten().collect();
                        drop(state);
                        settle.resolve(values);
                    }
                }
                Err(err) => {
                    state.failed = true;
                    state.slots.clear();
                    drop(state);
                    settle.reject(err);
                }
            }
        });
    }
    output
}

struct AnyState<T> {
    slots: Vec<Option<T>>,
    failures: usize,
    succeeded: bool,
}

/// Resolves as soon as one input succeeds, with an index-aligned list holding
/// the values that had succeeded by then (`None` for failed or unsettled
/// inputs). Rejects with [`Error::AllFailed`] only when every input fails, and
/// with [`Error::EmptyInput`] when there are none.
///
/// Inputs that never settle keep the aggregate pending until another input
/// succeeds; bound it with [`Future::timeout`] when that matters.
pub fn any<T, E, I>(futures: I) -> Future<Vec<Option<T>>, E>
where
    T: Clone + Send + 'static,
    E: Clone + Send + From<Error> + 'static,
    I: IntoIterator<Item = Future<T, E>>,
{
    any_in(None, futures)
}

pub fn any_on<T, E, I>(context: ExecutionContext, futures: I) -> Future<Vec<Option<T>>, E>
where
    T: Clone + Send + 'static,
    E: Clone + Send + From<Error> + 'static,
    I: IntoIterator<Item = Future<T, E>>,
{
    any_in(Some(context), futures)
}

fn any_in<T, E, I>(context: Option<ExecutionContext>, futures: I) -> Future<Vec<Option<T>>, E>
where
    T: Clone + Send + 'static,
    E: Clone + Send + From<Error> + 'static,
    I: IntoIterator<Item = Future<T, E>>,
{
    let inputs: Vec<Future<T, E>> = futures.into_iter().collect();
    if inputs.is_empty() {
        return Future::error(E::from(Error::EmptyInput));
    }
    let count = inputs.len();
    let output = Future::new();
    let barrier = Arc::new(Mutex::new(AnyState {
        slots: std::iter::repeat_with(|| None).take(count).collect(),
        failures: 0,
        succeeded: false,
    }));
    for (index, input) in inputs.into_iter().enumerate() {
        let (barrier, settle) = (barrier.clone(), output.clone());
        input.observe(context.clone(), move |result| {
            let mut state = barrier.lock();
            if state.succeeded {
                return;
            }
            match result {
                Ok(value) => {
                    state.slots[index] = Some(value);
                    state.succeeded = true;
                    let values = std::mem::take(&mut state.slots);
                    drop(state);
                    settle.resolve(values);
                }
                Err(_) => {
                    state.failures += 1;
                    if state.failures == count {
                        drop(state);
                        settle.reject(E::from(Error::AllFailed { count }));
                    }
                }
            }
        });
    }
    output
}

/// Settles with whichever input settles first, success or failure.
/// An empty input rejects with [`Error::EmptyInput`].
pub fn race<T, E, I>(futures: I) -> Future<T, E>
where
    T: Clone + Send + 'static,
    E: Clone + Send + From<Error> + 'static,
    I: IntoIterator<Item = Future<T, E>>,
{
    race_in(None, futures)
}

pub fn race_on<T, E, I>(context: ExecutionContext, futures: I) -> Future<T, E>
where
    T: Clone + Send + 'static,
    E: Clone + Send + From<Error> + 'static,
    I: IntoIterator<Item = Future<T, E>>,
{
    race_in(Some(context), futures)
}

fn race_in<T, E, I>(context: Option<ExecutionContext>, futures: I) -> Future<T, E>
where
    T: Clone + Send + 'static,
    E: Clone + Send + From<Error> + 'static,
    I: IntoIterator<Item = Future<T, E>>,
{
    let inputs: Vec<Future<T, E>> = futures.into_iter().collect();
    if inputs.is_empty() {
        return Future::error(E::from(Error::EmptyInput));
    }
    let output = Future::new();
    let settled = Arc::new(AtomicBool::new(false));
    for input in inputs {
        let (settled, settle) = (settled.clone(), output.clone());
        input.observe(context.clone(), move |result| {
            if settled
                .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                settle.settle(result);
            }
        });
    }
    output
}

/// Typed [`any`] over two futures of different value types.
///
/// The inputs are erased to `()` futures, the erased aggregate gates the
/// output, and each slot is read back from the original future's cache.
pub fn any2<A, B, E>(a: &Future<A, E>, b: &Future<B, E>) -> Future<(Option<A>, Option<B>), E>
where
    A: Clone + Send + 'static,
    B: Clone + Send + 'static,
    E: Clone + Send + From<Error> + 'static,
{
    let (a, b) = (a.clone(), b.clone());
    any([a.erase(), b.erase()]).map(move |_| (a.value_now(), b.value_now()))
}

pub fn any3<A, B, C, E>(
    a: &Future<A, E>,
    b: &Future<B, E>,
    c: &Future<C, E>,
) -> Future<(Option<A>, Option<B>, Option<C>), E>
where
    A: Clone + Send + 'static,
    B: Clone + Send + 'static,
    C: Clone + Send + 'static,
    E: Clone + Send + From<Error> + 'static,
{
    let (a, b, c) = (a.clone(), b.clone(), c.clone());
    any([a.erase(), b.erase(), c.erase()])
        .map(move |_| (a.value_now(), b.value_now(), c.value_now()))
}

pub fn any4<A, B, C, D, E>(
    a: &Future<A, E>,
    b: &Future<B, E>,
    c: &Future<C, E>,
    d: &Future<D, E>,
) -> Future<(Option<A>, Option<B>, Option<C>, Option<D>), E>
where
    A: Clone + Send + 'static,
    B: Clone + Send + 'static,
    C: Clone + Send + 'static,
    D: Clone + Send + 'static,
    E: Clone + Send + From<Error> + 'static,
{
    let (a, b, c, d) = (a.clone(), b.clone(), c.clone(), d.clone());
    any([a.erase(), b.erase(), c.erase(), d.erase()])
        .map(move |_| (a.value_now(), b.value_now(), c.value_now(), d.value_now()))
}

#[allow(clippy::type_complexity)]
pub fn any5<A, B, C, D, F, E>(
    a: &Future<A, E>,
    b: &Future<B, E>,
    c: &Future<C, E>,
    d: &Future<D, E>,
    f: &Future<F, E>,
) -> Future<(Option<A>, Option<B>, Option<C>, Option<D>, Option<F>), E>
where
    A: Clone + Send + 'static,
    B: Clone + Send + 'static,
    C: Clone + Send + 'static,
    D: Clone + Send + 'static,
    F: Clone + Send + 'static,
    E: Clone + Send + From<Error> + 'static,
{
    let (a, b, c, d, f) = (a.clone(), b.clone(), c.clone(), d.clone(), f.clone());
    any([a.erase(), b.erase(), c.erase(), d.erase(), f.erase()]).map(move |_| {
        (
            a.value_now(),
            b.value_now(),
            c.value_now(),
            d.value_now(),
            f.value_now(),
        )
    })
}
