//! Repeated probing until a condition clears.
//!
//! [`poll`] models "ask the server every few seconds until the job is no
//! longer pending". Probes and the delays between them run on the options'
//! scheduler; the final settlement is handed to a separate completion context.
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use crate::context::{ExecutionContext, SchedulingContext, ThreadSpawn};
use crate::future::Future;
use crate::Error;

/// How long to wait before the next probe.
pub enum PollDelay<T> {
    Fixed(Duration),
    /// Derives the delay from the last probe's value, e.g. a server-provided
    /// retry-after hint.
    PerResponse(Arc<dyn Fn(&T) -> Duration + Send + Sync>),
}

impl<T> PollDelay<T> {
    pub fn per_response<F>(f: F) -> Self
    where
        F: Fn(&T) -> Duration + Send + Sync + 'static,
    {
        PollDelay::PerResponse(Arc::new(f))
    }

    fn after(&self, value: &T) -> Duration {
        match self {
            PollDelay::Fixed(delay) => *delay,
            PollDelay::PerResponse(f) => f(value),
        }
    }
}

impl<T> Clone for PollDelay<T> {
    fn clone(&self) -> Self {
        match self {
            PollDelay::Fixed(delay) => PollDelay::Fixed(*delay),
            PollDelay::PerResponse(f) => PollDelay::PerResponse(f.clone()),
        }
    }
}

impl<T> fmt::Debug for PollDelay<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PollDelay::Fixed(delay) => f.debug_tuple("Fixed").field(delay).finish(),
            PollDelay::PerResponse(_) => f.write_str("PerResponse"),
        }
    }
}

/// Options for [`poll`].
pub struct PollOptions<T> {
    /// Maximum number of probes, at least 1.
    pub max_retry: usize,
    pub delay: PollDelay<T>,
    /// Runs the probes and the delay timer.
    pub scheduler: SchedulingContext,
    /// Runs the final settlement. `None` settles on the probing thread.
    pub completion: Option<ExecutionContext>,
}

impl<T> PollOptions<T> {
    /// Five probes one second apart, on spawned threads.
    #[must_use]
    pub fn new() -> Self {
        Self {
            max_retry: 5,
            delay: PollDelay::Fixed(Duration::from_secs(1)),
            scheduler: Arc::new(ThreadSpawn),
            completion: None,
        }
    }

    #[must_use]
    pub fn with_max_retry(mut self, max_retry: usize) -> Self {
        self.max_retry = max_retry.max(1);
        self
    }

    #[must_use]
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = PollDelay::Fixed(delay);
        self
    }

    #[must_use]
    pub fn with_delay_from<F>(mut self, f: F) -> Self
    where
        F: Fn(&T) -> Duration + Send + Sync + 'static,
    {
        self.delay = PollDelay::per_response(f);
        self
    }

    #[must_use]
    pub fn with_scheduler(mut self, scheduler: SchedulingContext) -> Self {
        self.scheduler = scheduler;
        self
    }

    #[must_use]
    pub fn with_completion(mut self, completion: ExecutionContext) -> Self {
        self.completion = Some(completion);
        self
    }
}

impl<T> Default for PollOptions<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Clone for PollOptions<T> {
    fn clone(&self) -> Self {
        Self {
            max_retry: self.max_retry,
            delay: self.delay.clone(),
            scheduler: self.scheduler.clone(),
            completion: self.completion.clone(),
        }
    }
}

impl<T> fmt::Debug for PollOptions<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PollOptions")
            .field("max_retry", &self.max_retry)
            .field("delay", &self.delay)
            .field("completion", &self.completion.is_some())
            .finish_non_exhaustive()
    }
}

struct ProbeQueue {
    next: Option<usize>,
    draining: bool,
}

struct Poller<T, E, P, C> {
    probe: P,
    keep_polling: C,
    options: PollOptions<T>,
    output: Future<T, E>,
    queue: Mutex<ProbeQueue>,
}

impl<T, E, P, C> Poller<T, E, P, C>
where
    T: Clone + Send + 'static,
    E: Clone + Send + From<Error> + 'static,
    P: Fn() -> Future<T, E> + Send + Sync + 'static,
    C: Fn(&T) -> bool + Send + Sync + 'static,
{
    /// Queues probe number `done + 1`. The thread already looping, if any,
    /// picks it up, so probes that settle synchronously on an inline
    /// scheduler do not nest.
    fn request(self: &Arc<Self>, done: usize) {
        {
            let mut queue = self.queue.lock();
            queue.next = Some(done);
            if queue.draining {
                return;
            }
            queue.draining = true;
        }
        loop {
            let done = {
                let mut queue = self.queue.lock();
                match queue.next.take() {
                    Some(done) => done,
                    None => {
                        queue.draining = false;
                        return;
                    }
                }
            };
            self.probe(done);
        }
    }

    fn probe(self: &Arc<Self>, done: usize) {
        let attempt = (self.probe)();
        let this = self.clone();
        attempt.on_complete(move |result| {
            let probes = done + 1;
            match result {
                Ok(value) if (this.keep_polling)(&value) => {
                    if probes >= this.options.max_retry {
                        tracing::warn!(probes, "polling gave up, condition still holds");
                        let exhausted = Error::RetryExhausted { attempts: probes };
                        return this.finish(Err(E::from(exhausted)));
                    }
                    let delay = this.options.delay.after(&value);
                    tracing::debug!(
                        probes,
                        delay_ms = delay.as_millis(),
                        "condition holds, polling again"
                    );
                    let scheduler = this.options.scheduler.clone();
                    scheduler.schedule(delay, Box::new(move || this.request(probes)));
                }
                result => this.finish(result),
            }
        });
    }

    fn finish(&self, result: Result<T, E>) {
        let output = self.output.clone();
        match &self.options.completion {
            Some(completion) => completion.execute(Box::new(move || output.settle(result))),
            None => output.settle(result),
        }
    }
}

/// Calls `probe` until `keep_polling` returns false for its value.
///
/// Resolves with the first value that clears the condition, rejects with the
/// probe's error as soon as one fails, and rejects with
/// [`Error::RetryExhausted`] once `max_retry` probes all returned values that
/// still satisfy `keep_polling`.
pub fn poll<T, E, P, C>(options: PollOptions<T>, probe: P, keep_polling: C) -> Future<T, E>
where
    T: Clone + Send + 'static,
    E: Clone + Send + From<Error> + 'static,
    P: Fn() -> Future<T, E> + Send + Sync + 'static,
    C: Fn(&T) -> bool + Send + Sync + 'static,
{
    let output = Future::new();
    let scheduler = options.scheduler.clone();
    let poller = Arc::new(Poller {
        probe,
        keep_polling,
        options,
        output: output.clone(),
        queue: Mutex::new(ProbeQueue {
            next: None,
            draining: false,
        }),
    });
    scheduler.schedule(Duration::ZERO, Box::new(move || poller.request(0)));
    output
}
