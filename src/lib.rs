//! Single-assignment futures and the combinators built on them.
//!
//! A [`Future`] is settled once and notifies its observers once. Everything
//! else here (mapping, aggregation, bounded dispatch, sequencing, polling) is
//! composed from that primitive without owning any threads: continuations run
//! on the settling thread unless an [`ExecutionContext`] says otherwise.
//!
//! ```
//! use promise_kit::{all, Promise};
//!
//! let a = Promise::<u32>::new();
//! let b = Promise::<u32>::new();
//! let sum = all([a.clone(), b.clone()]).map(|values| values.iter().sum::<u32>());
//! b.resolve(2);
//! a.resolve(40);
//! assert_eq!(sum.value_now(), Some(42));
//! ```
pub mod aggregate;
pub mod cancelable;
pub mod combinator;
pub mod context;
pub mod dispatch;
pub mod error;
pub mod future;
pub mod poll;
pub mod resolver;
pub mod sequence;
pub mod timer;

pub use aggregate::{all, all_on, any, any2, any3, any4, any5, any_on, race, race_on};
pub use cancelable::{Cancelable, CancelablePromise};
pub use combinator::{Either, On};
pub use context::{
    ExecutionContext, Executor, Inline, Job, Scheduler, SchedulingContext, SerialQueue,
    ThreadPool, ThreadSpawn,
};
pub use dispatch::{concurrently_dispatch, dispatch_all, DispatchOptions, Task};
pub use error::{Error, Result};
pub use future::{Future, Promise};
pub use poll::{poll, PollDelay, PollOptions};
pub use resolver::Resolver;
pub use sequence::{sequence, sequence_with};
pub use timer::after;
