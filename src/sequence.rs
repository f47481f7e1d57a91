//! One-at-a-time task execution.
//!
//! [`sequence`] is the single-lane case of
//! [`concurrently_dispatch`](crate::concurrently_dispatch): each task starts
//! only after the previous one succeeded, with the same retry policy. Prefer it
//! whenever tasks do not need to overlap; it skips lane bookkeeping and always
//! yields values in submission order.
use std::sync::Arc;

use parking_lot::Mutex;

use crate::context::ExecutionContext;
use crate::dispatch::Task;
use crate::future::Future;

type Source<T, E> = Box<dyn FnMut(usize) -> Option<Task<T, E>> + Send>;

struct Settled<T, E> {
    task: Task<T, E>,
    attempt: usize,
    result: Result<T, E>,
}

struct SequenceState<T, E> {
    source: Source<T, E>,
    pending: Option<Settled<T, E>>,
    draining: bool,
    values: Vec<T>,
}

struct Sequencer<T, E> {
    state: Mutex<SequenceState<T, E>>,
    output: Future<Vec<T>, E>,
    retry_count: usize,
    context: Option<ExecutionContext>,
}

impl<T, E> Sequencer<T, E>
where
    T: Clone + Send + 'static,
    E: Clone + Send + 'static,
{
    /// Records a completion and, unless a caller further up the stack is
    /// already looping, processes completions until a task stays pending.
    fn complete(self: &Arc<Self>, settled: Settled<T, E>) {
        {
            let mut state = self.state.lock();
            state.pending = Some(settled);
            if state.draining {
                return;
            }
            state.draining = true;
        }
        loop {
            let settled = {
                let mut state = self.state.lock();
                match state.pending.take() {
                    Some(settled) => settled,
                    None => {
                        state.draining = false;
                        return;
                    }
                }
            };
            self.advance(settled);
        }
    }

    fn advance(self: &Arc<Self>, settled: Settled<T, E>) {
        let Settled {
            task,
            attempt,
            result,
        } = settled;
        match result {
            Ok(value) => {
                self.state.lock().values.push(value);
                self.next();
            }
            Err(_) if attempt < self.retry_count => {
                tracing::debug!(attempt = attempt + 1, "retrying failed sequence task");
                self.run(task, attempt + 1);
            }
            Err(err) => {
                tracing::warn!(
                    attempts = attempt + 1,
                    "sequence task failed after exhausting retries"
                );
                self.output.reject(err);
            }
        }
    }

    fn next(self: &Arc<Self>) {
        let next = {
            let mut state = self.state.lock();
            let index = state.values.len();
            let source = &mut state.source;
            source(index)
        };
        match next {
            Some(task) => self.run(task, 0),
            None => {
                let values = std::mem::take(&mut self.state.lock().values);
                self.output.resolve(values);
            }
        }
    }

    fn run(self: &Arc<Self>, task: Task<T, E>, attempt: usize) {
        let attempt_future = task.spawn();
        let this = self.clone();
        attempt_future.observe(self.context.clone(), move |result| {
            this.complete(Settled {
                task,
                attempt,
                result,
            })
        });
    }
}

/// Runs tasks pulled from `next_task` one after another.
///
/// `next_task(index)` is asked for the next task after each success, with
/// `index` counting completed tasks. Each task gets `retry_count` extra
/// attempts; the first task to run out rejects the whole sequence.
pub fn sequence_with<T, E, S>(
    retry_count: usize,
    context: Option<ExecutionContext>,
    next_task: S,
) -> Future<Vec<T>, E>
where
    T: Clone + Send + 'static,
    E: Clone + Send + 'static,
    S: FnMut(usize) -> Option<Task<T, E>> + Send + 'static,
{
    let sequencer = Arc::new(Sequencer {
        state: Mutex::new(SequenceState {
            source: Box::new(next_task),
            pending: None,
            draining: false,
            values: Vec::new(),
        }),
        output: Future::new(),
        retry_count,
        context,
    });
    sequencer.next();
    sequencer.output.clone()
}

/// Runs `tasks` in order, one at a time.
pub fn sequence<T, E, I>(tasks: I, retry_count: usize) -> Future<Vec<T>, E>
where
    T: Clone + Send + 'static,
    E: Clone + Send + 'static,
    I: IntoIterator<Item = Task<T, E>>,
    I::IntoIter: Send + 'static,
{
    let mut tasks = tasks.into_iter();
    sequence_with(retry_count, None, move |_| tasks.next())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Error, Promise};
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn empty_sequence_resolves_empty() {
        let result = sequence(Vec::<Task<u8>>::new(), 0);
        assert_eq!(result.value_now(), Some(vec![]));
    }

    #[test]
    fn long_synchronous_sequence_does_not_recurse() {
        let tasks = (0..50_000).map(|i| Task::new(move || Promise::value(i)));
        let result = sequence(tasks, 0);
        assert_eq!(result.value_now().map(|v| v.len()), Some(50_000));
    }

    #[test]
    fn runs_tasks_one_at_a_time() {
        let gates: Vec<Promise<usize>> = (0..3).map(|_| Promise::new()).collect();
        let started = Arc::new(AtomicUsize::new(0));
        let tasks: Vec<Task<usize>> = gates
            .iter()
            .cloned()
            .map(|gate| {
                let started = started.clone();
                Task::new(move || {
                    started.fetch_add(1, Ordering::SeqCst);
                    gate.clone()
                })
            })
            .collect();
        let result = sequence(tasks, 0);
        assert_eq!(started.load(Ordering::SeqCst), 1);
        gates[0].resolve(10);
        assert_eq!(started.load(Ordering::SeqCst), 2);
        gates[1].resolve(11);
        gates[2].resolve(12);
        assert_eq!(result.value_now(), Some(vec![10, 11, 12]));
    }

    #[test]
    fn exhausted_retries_reject() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let counter = attempts.clone();
        let task = Task::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
            Promise::<u8>::error(Error::Validation)
        });
        let result = sequence([task], 2);
        assert_eq!(result.error_now(), Some(Error::Validation));
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }
}
