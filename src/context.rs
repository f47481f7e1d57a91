//! Execution contexts decide where continuations run.
//!
//! The core never owns threads. Observers, combinators and aggregates take an
//! optional [`ExecutionContext`]; without one, work runs synchronously on the
//! thread that triggered it.
use std::io;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{
    mpsc::{channel, Sender},
    Arc,
};
use std::thread;
use std::time::Duration;

use parking_lot::Mutex;

/// A unit of work handed to an executor.
pub type Job = Box<dyn FnOnce() + Send + 'static>;

/// Shared handle to an executor, the form every `_on` API accepts.
pub type ExecutionContext = Arc<dyn Executor>;

/// Shared handle to a scheduler, used where work must run after a delay.
pub type SchedulingContext = Arc<dyn Scheduler>;

/// Runs jobs somewhere: the current thread, a fresh thread, a queue.
pub trait Executor: Send + Sync + 'static {
    fn execute(&self, job: Job);
}

/// An executor that can also run jobs after a delay.
pub trait Scheduler: Executor {
    fn schedule(&self, delay: Duration, job: Job);
}

fn run_job(job: Job) {
    if catch_unwind(AssertUnwindSafe(job)).is_err() {
        tracing::error!("job panicked on executor thread");
    }
}

/// Sleeps on a dedicated timer thread, then hands the job to `sink`.
fn after_delay<S>(delay: Duration, job: Job, sink: S)
where
    S: FnOnce(Job) + Send + 'static,
{
    let spawned = thread::Builder::new()
        .name("promise-kit-timer".into())
        .spawn(move || {
            thread::sleep(delay);
            sink(job);
        });
    if let Err(err) = spawned {
        tracing::error!(%err, "failed to spawn timer thread, job dropped");
    }
}

/// Runs jobs immediately on the calling thread.
///
/// Delayed jobs block the caller for the delay, so this is meant for tests and
/// tooling rather than production polling. Jobs nest on the caller's stack;
/// the dispatch, sequence and poll drivers loop instead of recursing when
/// their work settles synchronously here.
#[derive(Debug, Default, Clone, Copy)]
pub struct Inline;

impl Executor for Inline {
    fn execute(&self, job: Job) {
        job()
    }
}

impl Scheduler for Inline {
    fn schedule(&self, delay: Duration, job: Job) {
        if !delay.is_zero() {
            thread::sleep(delay);
        }
        job()
    }
}

/// Spawns a new thread for every job.
#[derive(Debug, Default, Clone, Copy)]
pub struct ThreadSpawn;

impl Executor for ThreadSpawn {
    fn execute(&self, job: Job) {
        if let Err(err) = thread::Builder::new().spawn(move || run_job(job)) {
            tracing::error!(%err, "failed to spawn worker thread, job dropped");
        }
    }
}

impl Scheduler for ThreadSpawn {
    fn schedule(&self, delay: Duration, job: Job) {
        after_delay(delay, job, run_job);
    }
}

/// A single worker thread fed by a channel. Jobs run one at a time, in
/// submission order.
#[derive(Debug, Clone)]
pub struct SerialQueue {
    sender: Arc<Mutex<Sender<Job>>>,
}

impl SerialQueue {
    /// Starts the worker. It exits once every handle to the queue is dropped.
    pub fn new(label: &str) -> io::Result<Self> {
        let (tx, rx) = channel::<Job>();
        thread::Builder::new()
            .name(label.to_owned())
            .spawn(move || {
                for job in rx {
                    run_job(job);
                }
            })?;
        Ok(Self {
            sender: Arc::new(Mutex::new(tx)),
        })
    }

    fn submit(sender: &Mutex<Sender<Job>>, job: Job) {
        if sender.lock().send(job).is_err() {
            tracing::warn!("serial queue worker is gone, job dropped");
        }
    }
}

impl Executor for SerialQueue {
    fn execute(&self, job: Job) {
        Self::submit(&self.sender, job);
    }
}

impl Scheduler for SerialQueue {
    fn schedule(&self, delay: Duration, job: Job) {
        if delay.is_zero() {
            return self.execute(job);
        }
        let sender = self.sender.clone();
        after_delay(delay, job, move |job| Self::submit(&sender, job));
    }
}

/// A fixed set of worker threads draining one shared queue.
///
/// Every worker holds its own receiver of the same multi-consumer channel, so
/// idle workers pick up jobs independently.
#[derive(Debug, Clone)]
pub struct ThreadPool {
    sender: crossbeam_channel::Sender<Job>,
    size: usize,
}

impl ThreadPool {
    /// Starts `size` workers (at least one). They exit once every handle to
    /// the pool is dropped.
    pub fn new(size: usize) -> io::Result<Self> {
        let size = size.max(1);
        let (sender, receiver) = crossbeam_channel::unbounded::<Job>();
        for worker in 0..size {
            let receiver = receiver.clone();
            thread::Builder::new()
                .name(format!("promise-kit-pool-{worker}"))
                .spawn(move || {
                    for job in receiver {
                        run_job(job);
                    }
                })?;
        }
        tracing::debug!(size, "thread pool started");
        Ok(Self { sender, size })
    }

    pub fn size(&self) -> usize {
        self.size
    }

    fn submit(sender: &crossbeam_channel::Sender<Job>, job: Job) {
        if sender.send(job).is_err() {
            tracing::warn!("thread pool workers are gone, job dropped");
        }
    }
}

impl Executor for ThreadPool {
    fn execute(&self, job: Job) {
        Self::submit(&self.sender, job);
    }
}

impl Scheduler for ThreadPool {
    fn schedule(&self, delay: Duration, job: Job) {
        if delay.is_zero() {
            return self.execute(job);
        }
        let sender = self.sender.clone();
        after_delay(delay, job, move |job| Self::submit(&sender, job));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;

    #[test]
    fn inline_runs_on_caller() {
        let caller = thread::current().id();
        let (tx, rx) = mpsc::channel();
        Inline.execute(Box::new(move || tx.send(thread::current().id()).unwrap()));
        assert_eq!(rx.recv().unwrap(), caller);
    }

    #[test]
    fn serial_queue_keeps_submission_order() {
        let queue = SerialQueue::new("test-serial").unwrap();
        let (tx, rx) = mpsc::channel();
        for i in 0..20 {
            let tx = tx.clone();
            queue.execute(Box::new(move || tx.send(i).unwrap()));
        }
        let seen: Vec<i32> = rx.iter().take(20).collect();
        assert_eq!(seen, (0..20).collect::<Vec<_>>());
    }

    #[test]
    fn serial_queue_survives_panicking_job() {
        let queue = SerialQueue::new("test-panic").unwrap();
        let (tx, rx) = mpsc::channel();
        queue.execute(Box::new(|| panic!("boom")));
        queue.execute(Box::new(move || tx.send(7).unwrap()));
        assert_eq!(rx.recv().unwrap(), 7);
    }

    #[test]
    fn thread_pool_runs_every_job() {
        let pool = ThreadPool::new(3).unwrap();
        assert_eq!(pool.size(), 3);
        let (tx, rx) = mpsc::channel();
        for i in 0..10 {
            let tx = tx.clone();
            pool.execute(Box::new(move || tx.send(i).unwrap()));
        }
        let mut seen: Vec<i32> = rx.iter().take(10).collect();
        seen.sort_unstable();
        assert_eq!(seen, (0..10).collect::<Vec<_>>());
    }

    #[test]
    fn thread_pool_workers_run_side_by_side() {
        let pool = ThreadPool::new(3).unwrap();
        let barrier = Arc::new(std::sync::Barrier::new(3));
        let (tx, rx) = mpsc::channel();
        for _ in 0..3 {
            let barrier = barrier.clone();
            let tx = tx.clone();
            pool.execute(Box::new(move || {
                barrier.wait();
                tx.send(thread::current().name().map(str::to_owned)).unwrap();
            }));
        }
        let mut names: Vec<_> = rx.iter().take(3).flatten().collect();
        names.sort();
        names.dedup();
        assert_eq!(names.len(), 3);
    }

    #[test]
    fn scheduled_jobs_wait_for_delay() {
        let (tx, rx) = mpsc::channel();
        let start = std::time::Instant::now();
        ThreadSpawn.schedule(
            Duration::from_millis(20),
            Box::new(move || tx.send(()).unwrap()),
        );
        rx.recv().unwrap();
        assert!(start.elapsed() >= Duration::from_millis(20));
    }
}
