//! Timers and timeouts.
//!
//! There is no built-in deadline on a future. A timeout is a [`race`] between
//! the subject and a timer that rejects, and the subject keeps running after
//! losing.
use std::time::Duration;

use crate::aggregate::race;
use crate::context::SchedulingContext;
use crate::future::Future;
use crate::Error;

/// A future that resolves with `()` once `delay` has elapsed on `scheduler`.
pub fn after<E>(delay: Duration, scheduler: &SchedulingContext) -> Future<(), E>
where
    E: Clone + Send + 'static,
{
    let timer = Future::new();
    let fire = timer.clone();
    scheduler.schedule(delay, Box::new(move || fire.resolve(())));
    timer
}

impl<T, E> Future<T, E>
where
    T: Clone + Send + 'static,
    E: Clone + Send + From<Error> + 'static,
{
    /// Rejects with [`Error::Timeout`] unless this future settles within
    /// `delay`.
    pub fn timeout(&self, delay: Duration, scheduler: &SchedulingContext) -> Future<T, E> {
        let expired =
            after::<E>(delay, scheduler).try_map(move |_| Err(E::from(Error::Timeout(delay))));
        race([self.clone(), expired])
    }
}
