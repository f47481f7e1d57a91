use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use futures::executor::block_on;
use promise_kit::{
    after, all, any, poll, race, sequence, Error, Inline, PollOptions, Promise,
    SchedulingContext, Task, ThreadSpawn,
};

#[test]
fn settles_exactly_once() {
    let promise = Promise::<i32>::new();
    let fired = Arc::new(AtomicUsize::new(0));
    let counter = fired.clone();
    promise.on_complete(move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
    });
    promise.reject(Error::Validation);
    promise.resolve(1);
    promise.reject(Error::Cancelled);
    assert_eq!(promise.error_now(), Some(Error::Validation));
    assert_eq!(fired.load(Ordering::SeqCst), 1);
}

#[test]
fn observers_registered_from_many_threads_fire_once_each() {
    let promise = Promise::<u64>::new();
    let fired = Arc::new(AtomicUsize::new(0));
    let registrars: Vec<_> = (0..8)
        .map(|_| {
            let promise = promise.clone();
            let fired = fired.clone();
            thread::spawn(move || {
                for _ in 0..50 {
                    let fired = fired.clone();
                    promise.on_success(move |_| {
                        fired.fetch_add(1, Ordering::SeqCst);
                    });
                }
            })
        })
        .collect();
    promise.resolve(7);
    for registrar in registrars {
        registrar.join().expect("The registrar thread has panicked");
    }
    assert_eq!(fired.load(Ordering::SeqCst), 400);
}

#[test]
fn all_of_empty_and_failing_inputs() {
    let empty: Vec<Promise<u8>> = Vec::new();
    assert_eq!(block_on(all(empty)), Ok(vec![]));

    let f1 = Promise::<u8>::new();
    let f2 = Promise::<u8>::new();
    let aggregate = all([f1.clone(), f2.clone()]);
    f1.resolve(1);
    f2.reject(Error::from("f2 failed"));
    assert_eq!(block_on(aggregate), Err(Error::from("f2 failed")));
}

#[test]
fn any_of_empty_and_mixed_inputs() {
    let empty: Vec<Promise<u8>> = Vec::new();
    assert!(block_on(any(empty)).is_err());

    let mixed = any([Promise::error(Error::Validation), Promise::value(5)]);
    assert_eq!(block_on(mixed), Ok(vec![None, Some(5)]));
}

#[test]
fn race_prefers_faster_input() {
    let scheduler: SchedulingContext = Arc::new(ThreadSpawn);
    let f1 = after::<Error>(Duration::from_millis(40), &scheduler).map(|_| "f1");
    let f2 = after::<Error>(Duration::from_millis(5), &scheduler).map(|_| "f2");
    assert_eq!(block_on(race([f1, f2])), Ok("f2"));
}

#[test]
fn map_then_map_error_is_value_of_mapped() {
    let chained = Promise::value(6).map(|x| x * 7).map_error(|_| Error::Cancelled);
    assert_eq!(block_on(chained), block_on(Promise::value(42)));
}

#[test]
fn poll_exhausts_after_max_retry_probes() {
    let probes = Arc::new(AtomicUsize::new(0));
    let counter = probes.clone();
    let options = PollOptions::new()
        .with_max_retry(3)
        .with_delay(Duration::from_millis(1))
        .with_scheduler(Arc::new(Inline));
    let status = poll(
        options,
        move || Promise::value(counter.fetch_add(1, Ordering::SeqCst)),
        |_| true,
    );
    assert_eq!(block_on(status), Err(Error::RetryExhausted { attempts: 3 }));
    assert_eq!(probes.load(Ordering::SeqCst), 3);
}

#[test]
fn sequence_retries_failing_thunk() {
    let invocations = Arc::new(AtomicUsize::new(0));
    let second_failures = Arc::new(AtomicUsize::new(0));
    let tasks: Vec<Task<usize>> = (0..3)
        .map(|i| {
            let invocations = invocations.clone();
            let second_failures = second_failures.clone();
            Task::new(move || {
                invocations.fetch_add(1, Ordering::SeqCst);
                if i == 1 && second_failures.fetch_add(1, Ordering::SeqCst) == 0 {
                    Promise::error(Error::from("flaky"))
                } else {
                    Promise::value(i)
                }
            })
        })
        .collect();
    let result = sequence(tasks, 1);
    assert_eq!(block_on(result), Ok(vec![0, 1, 2]));
    assert_eq!(invocations.load(Ordering::SeqCst), 4);
}
