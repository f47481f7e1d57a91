use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use futures::executor::block_on;
use promise_kit::{
    concurrently_dispatch, dispatch_all, sequence_with, DispatchOptions, Error, Promise,
    SerialQueue, Task,
};

/// A task that settles on its own thread after `delay`, tracking how many
/// tasks are running at once.
fn tracked_task(
    value: usize,
    delay: Duration,
    in_flight: Arc<AtomicUsize>,
    peak: Arc<AtomicUsize>,
) -> Task<usize> {
    Task::new(move || {
        let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        peak.fetch_max(now, Ordering::SeqCst);
        let promise = Promise::new();
        let settle = promise.clone();
        let in_flight = in_flight.clone();
        thread::spawn(move || {
            thread::sleep(delay);
            in_flight.fetch_sub(1, Ordering::SeqCst);
            settle.resolve(value);
        });
        promise
    })
}

#[test]
fn never_exceeds_lane_limit() {
    let in_flight = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));
    let tasks: Vec<_> = (0..5)
        .map(|i| tracked_task(i, Duration::from_millis(10), in_flight.clone(), peak.clone()))
        .collect();
    let result = dispatch_all(DispatchOptions::new().with_concurrent(2), tasks);
    assert_eq!(block_on(result), Ok(vec![0, 1, 2, 3, 4]));
    assert!(peak.load(Ordering::SeqCst) <= 2);
    assert_eq!(peak.load(Ordering::SeqCst), 2);
}

#[test]
fn preserves_submission_order_despite_completion_order() {
    let in_flight = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));
    let delays = [40_u64, 5, 25, 1];
    let tasks: Vec<_> = delays
        .iter()
        .enumerate()
        .map(|(i, ms)| {
            tracked_task(i, Duration::from_millis(*ms), in_flight.clone(), peak.clone())
        })
        .collect();
    let ordered = dispatch_all(DispatchOptions::new().with_concurrent(4), tasks);
    assert_eq!(block_on(ordered), Ok(vec![0, 1, 2, 3]));
}

#[test]
fn completion_order_without_preserve_order() {
    let in_flight = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));
    let tasks: Vec<_> = [30_u64, 1]
        .iter()
        .enumerate()
        .map(|(i, ms)| {
            tracked_task(i, Duration::from_millis(*ms), in_flight.clone(), peak.clone())
        })
        .collect();
    let options = DispatchOptions::new()
        .with_concurrent(2)
        .with_preserve_order(false);
    assert_eq!(block_on(dispatch_all(options, tasks)), Ok(vec![1, 0]));
}

#[test]
fn retries_until_success() {
    let attempts = Arc::new(AtomicUsize::new(0));
    let counter = attempts.clone();
    let flaky = Task::new(move || {
        if counter.fetch_add(1, Ordering::SeqCst) < 2 {
            Promise::error(Error::from("try again"))
        } else {
            Promise::value(99)
        }
    });
    let steady = Task::new(|| Promise::value(1));
    let options = DispatchOptions::new().with_concurrent(2).with_retry_count(2);
    let result = dispatch_all(options, vec![flaky, steady]);
    assert_eq!(block_on(result), Ok(vec![99, 1]));
    assert_eq!(attempts.load(Ordering::SeqCst), 3);
}

#[test]
fn rejects_with_last_error_after_retries() {
    let attempts = Arc::new(AtomicUsize::new(0));
    let counter = attempts.clone();
    let result = concurrently_dispatch(
        DispatchOptions::new().with_concurrent(3).with_retry_count(1),
        move |index| {
            let counter = counter.clone();
            (index < 3).then(|| {
                Task::new(move || {
                    if index == 1 {
                        let attempt = counter.fetch_add(1, Ordering::SeqCst);
                        Promise::<usize>::error(Error::message(format!("attempt {attempt}")))
                    } else {
                        Promise::value(index)
                    }
                })
            })
        },
    );
    assert_eq!(block_on(result), Err(Error::from("attempt 1")));
    assert_eq!(attempts.load(Ordering::SeqCst), 2);
}

#[test]
fn streams_from_open_ended_source_on_a_queue() {
    let queue = Arc::new(SerialQueue::new("dispatch-queue").expect("queue thread"));
    let chunks = vec![b"ab".to_vec(), b"cd".to_vec(), b"ef".to_vec()];
    let result = concurrently_dispatch(
        DispatchOptions::new().with_concurrent(2).with_context(queue),
        move |index| {
            let chunk = chunks.get(index)?.clone();
            Some(Task::new(move || Promise::value(chunk.len())))
        },
    );
    assert_eq!(block_on(result), Ok(vec![2, 2, 2]));
}

#[test]
fn sequence_with_pulls_lazily() {
    let pulled = Arc::new(AtomicUsize::new(0));
    let counter = pulled.clone();
    let gate = Promise::<()>::new();
    let first_gate = gate.clone();
    let result = sequence_with(0, None, move |index| {
        counter.fetch_add(1, Ordering::SeqCst);
        match index {
            0 => {
                let first_gate = first_gate.clone();
                Some(Task::new(move || first_gate.map(|_| 0_usize)))
            }
            1 => Some(Task::new(|| Promise::value(1))),
            _ => None,
        }
    });
    assert_eq!(pulled.load(Ordering::SeqCst), 1);
    gate.resolve(());
    assert_eq!(block_on(result), Ok(vec![0, 1]));
    assert_eq!(pulled.load(Ordering::SeqCst), 3);
}
