//! Bounded-concurrency task dispatch.
//!
//! [`concurrently_dispatch`] pulls work from a source function instead of a
//! collection, so open-ended streams (chunked uploads, paginated fetches) can
//! be driven without materializing every task up front. At most `concurrent`
//! lanes each run one task at a time; a lane pulls its next task when the
//! current one succeeds and goes idle when the source runs dry.
//!
//! Completions are fed through a queue drained by a single thread at a time.
//! Tasks that settle synchronously therefore loop instead of recursing, and
//! all bookkeeping is serialized behind one lock per dispatch.
use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::context::ExecutionContext;
use crate::future::Future;
use crate::Error;

/// A re-runnable unit of work. Retrying a task calls it again.
pub struct Task<T, E = Error> {
    run: Arc<dyn Fn() -> Future<T, E> + Send + Sync>,
}

impl<T, E> Clone for Task<T, E> {
    fn clone(&self) -> Self {
        Self {
            run: self.run.clone(),
        }
    }
}

impl<T, E> fmt::Debug for Task<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task").finish_non_exhaustive()
    }
}

impl<T, E> Task<T, E> {
    pub fn new<F>(f: F) -> Self
    where
        F: Fn() -> Future<T, E> + Send + Sync + 'static,
    {
        Self { run: Arc::new(f) }
    }

    /// Starts one attempt of the task.
    pub fn spawn(&self) -> Future<T, E> {
        (self.run)()
    }
}

/// Options for [`concurrently_dispatch`].
#[derive(Clone)]
pub struct DispatchOptions {
    /// Number of lanes, at least 1.
    pub concurrent: usize,
    /// Extra attempts each task gets after its first failure.
    pub retry_count: usize,
    /// Return values in submission order instead of completion order.
    pub preserve_order: bool,
    /// Where task completions are handled. `None` runs them on the
    /// settling thread.
    pub context: Option<ExecutionContext>,
}

impl fmt::Debug for DispatchOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DispatchOptions")
            .field("concurrent", &self.concurrent)
            .field("retry_count", &self.retry_count)
            .field("preserve_order", &self.preserve_order)
            .field("context", &self.context.is_some())
            .finish()
    }
}

impl DispatchOptions {
    /// One lane, no retries, submission order.
    #[must_use]
    pub fn new() -> Self {
        Self {
            concurrent: 1,
            retry_count: 0,
            preserve_order: true,
            context: None,
        }
    }

    #[must_use]
    pub fn with_concurrent(mut self, concurrent: usize) -> Self {
        self.concurrent = concurrent.max(1);
        self
    }

    #[must_use]
    pub fn with_retry_count(mut self, retry_count: usize) -> Self {
        self.retry_count = retry_count;
        self
    }

    #[must_use]
    pub fn with_preserve_order(mut self, preserve_order: bool) -> Self {
        self.preserve_order = preserve_order;
        self
    }

    #[must_use]
    pub fn with_context(mut self, context: ExecutionContext) -> Self {
        self.context = Some(context);
        self
    }
}

impl Default for DispatchOptions {
    fn default() -> Self {
        Self::new()
    }
}

type Source<T, E> = Box<dyn FnMut(usize) -> Option<Task<T, E>> + Send>;

enum Event<T, E> {
    Pull {
        lane: usize,
    },
    Settled {
        lane: usize,
        index: usize,
        attempt: usize,
        task: Task<T, E>,
        result: Result<T, E>,
    },
}

enum Step<T, E> {
    Launch { index: usize, task: Task<T, E> },
    Finish(Vec<(usize, T)>),
    Idle,
}

struct DispatchState<T, E> {
    source: Source<T, E>,
    events: VecDeque<Event<T, E>>,
    draining: bool,
    next_index: usize,
    exhausted: bool,
    active_lanes: usize,
    in_flight: usize,
    results: Vec<(usize, T)>,
    done: bool,
}

struct Dispatcher<T, E> {
    state: Mutex<DispatchState<T, E>>,
    output: Future<Vec<T>, E>,
    options: DispatchOptions,
}

impl<T, E> Dispatcher<T, E>
where
    T: Clone + Send + 'static,
    E: Clone + Send + 'static,
{
    fn submit(self: &Arc<Self>, events: impl IntoIterator<Item = Event<T, E>>) {
        {
            let mut state = self.state.lock();
            state.events.extend(events);
            if state.draining {
                return;
            }
            state.draining = true;
        }
        loop {
            let event = {
                let mut state = self.state.lock();
                match state.events.pop_front() {
                    Some(event) => event,
                    None => {
                        state.draining = false;
                        return;
                    }
                }
            };
            self.handle(event);
        }
    }

    fn handle(self: &Arc<Self>, event: Event<T, E>) {
        match event {
            Event::Pull { lane } => self.pull(lane),
            Event::Settled {
                lane,
                index,
                attempt,
                task: _,
                result: Ok(value),
            } => {
                {
                    let mut state = self.state.lock();
                    state.in_flight -= 1;
                    if state.done {
                        return;
                    }
                    state.results.push((index, value));
                }
                tracing::trace!(lane, index, attempt, "dispatched task succeeded");
                self.pull(lane);
            }
            Event::Settled {
                lane,
                index,
                attempt,
                task,
                result: Err(err),
            } => {
                let mut state = self.state.lock();
                if state.done {
                    state.in_flight -= 1;
                    return;
                }
                if attempt < self.options.retry_count {
                    drop(state);
                    tracing::debug!(lane, index, attempt = attempt + 1, "retrying failed task");
                    self.launch(lane, index, task, attempt + 1);
                    return;
                }
                state.in_flight -= 1;
                state.done = true;
                drop(state);
                tracing::warn!(
                    lane,
                    index,
                    attempts = attempt + 1,
                    "task failed after exhausting retries, abandoning dispatch"
                );
                self.output.reject(err);
            }
        }
    }

    fn pull(self: &Arc<Self>, lane: usize) {
        let step = {
            let mut state = self.state.lock();
            if state.done {
                return;
            }
            let next = if state.exhausted {
                None
            } else {
                let index = state.next_index;
                let source = &mut state.source;
                source(index)
            };
            match next {
                Some(task) => {
                    let index = state.next_index;
                    state.next_index += 1;
                    state.in_flight += 1;
                    Step::Launch { index, task }
                }
                None => {
                    state.exhausted = true;
                    state.active_lanes -= 1;
                    tracing::debug!(lane, remaining = state.active_lanes, "dispatch lane idle");
                    // A lane only goes idle after its own task settled, so
                    // the last idle lane leaves nothing in flight.
                    if state.active_lanes == 0 && state.in_flight == 0 {
                        state.done = true;
                        Step::Finish(std::mem::take(&mut state.results))
                    } else {
                        Step::Idle
                    }
                }
            }
        };
        match step {
            Step::Launch { index, task } => self.launch(lane, index, task, 0),
            Step::Finish(mut results) => {
                if self.options.preserve_order {
                    results.sort_by_key(|(index, _)| *index);
                }
                self.output
                    .resolve(results.into_iter().map(|(_, value)| value).collect());
            }
            Step::Idle => {}
        }
    }

    fn launch(self: &Arc<Self>, lane: usize, index: usize, task: Task<T, E>, attempt: usize) {
        let attempt_future = task.spawn();
        let this = self.clone();
        attempt_future.observe(self.options.context.clone(), move |result| {
            this.submit([Event::Settled {
                lane,
                index,
                attempt,
                task,
                result,
            }]);
        });
    }
}

/// Runs the tasks produced by `next_task` on at most `options.concurrent`
/// lanes.
///
/// `next_task(index)` is called with consecutive indices until it returns
/// `None`. A failed task is re-run up to `options.retry_count` more times;
/// once a task exhausts its retries the aggregate rejects with its last error
/// and no further tasks are pulled. Tasks already in flight keep running and
/// their results are discarded.
pub fn concurrently_dispatch<T, E, S>(options: DispatchOptions, next_task: S) -> Future<Vec<T>, E>
where
    T: Clone + Send + 'static,
    E: Clone + Send + 'static,
    S: FnMut(usize) -> Option<Task<T, E>> + Send + 'static,
{
    let lanes = options.concurrent.max(1);
    let dispatcher = Arc::new(Dispatcher {
        state: Mutex::new(DispatchState {
            source: Box::new(next_task),
            events: VecDeque::new(),
            draining: false,
            next_index: 0,
            exhausted: false,
            active_lanes: lanes,
            in_flight: 0,
            results: Vec::new(),
            done: false,
        }),
        output: Future::new(),
        options,
    });
    dispatcher.submit((0..lanes).map(|lane| Event::Pull { lane }));
    dispatcher.output.clone()
}

/// [`concurrently_dispatch`] over a finite collection of tasks.
pub fn dispatch_all<T, E, I>(options: DispatchOptions, tasks: I) -> Future<Vec<T>, E>
where
    T: Clone + Send + 'static,
    E: Clone + Send + 'static,
    I: IntoIterator<Item = Task<T, E>>,
    I::IntoIter: Send + 'static,
{
    let mut tasks = tasks.into_iter();
    concurrently_dispatch(options, move |_| tasks.next())
}
