//! End-to-end scheduler tests

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use strand::{Scheduler, TaskState};

type Log = Arc<Mutex<Vec<u64>>>;

fn new_log() -> Log {
    Arc::new(Mutex::new(Vec::new()))
}

#[test]
fn hello_join() {
    let scheduler = Scheduler::new(1).unwrap();
    let log = new_log();

    let log_a = Arc::clone(&log);
    let a = scheduler
        .spawn(move || {
            // Yield once so the joiner gets to block before we finish.
            strand::yield_now();
            log_a.lock().unwrap().push(1);
        })
        .unwrap();

    let log_b = Arc::clone(&log);
    let a_handle = a.clone();
    scheduler
        .spawn(move || {
            a_handle.join();
            log_b.lock().unwrap().push(2);
        })
        .unwrap();

    scheduler.start().unwrap();
    assert!(scheduler.wait_all(Duration::from_secs(5)));
    assert_eq!(*log.lock().unwrap(), vec![1, 2]);
}

#[test]
fn join_on_finished_target_returns_immediately() {
    let scheduler = Scheduler::new(1).unwrap();
    scheduler.start().unwrap();

    let a = scheduler.spawn(|| {}).unwrap();
    assert!(scheduler.wait_all(Duration::from_secs(5)));
    assert!(a.is_finished());

    let done = Arc::new(AtomicUsize::new(0));
    let done2 = Arc::clone(&done);
    scheduler
        .spawn(move || {
            a.join();
            done2.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();
    assert!(scheduler.wait_all(Duration::from_secs(5)));
    assert_eq!(done.load(Ordering::SeqCst), 1);
}

#[test]
fn join_observes_completion() {
    let scheduler = Scheduler::new(1).unwrap();

    let steps = Arc::new(AtomicUsize::new(0));
    let steps_a = Arc::clone(&steps);
    let a = scheduler
        .spawn(move || {
            strand::yield_now();
            strand::yield_now();
            steps_a.store(7, Ordering::SeqCst);
        })
        .unwrap();

    let a_handle = a.clone();
    let steps_b = Arc::clone(&steps);
    let b = scheduler
        .spawn(move || {
            a_handle.join();
            // The target finished strictly before the joiner was woken.
            assert!(a_handle.is_finished());
            assert_eq!(steps_b.load(Ordering::SeqCst), 7);
        })
        .unwrap();

    scheduler.start().unwrap();
    assert!(scheduler.wait_all(Duration::from_secs(5)));
    assert!(!b.panicked(), "{:?}", b.panic_message());
}

#[test]
fn round_robin() {
    let scheduler = Scheduler::new(1).unwrap();
    let log = new_log();

    for id in 1..=3u64 {
        let log = Arc::clone(&log);
        scheduler
            .spawn(move || {
                for _ in 0..3 {
                    log.lock().unwrap().push(id);
                    strand::yield_now();
                }
            })
            .unwrap();
    }

    scheduler.start().unwrap();
    assert!(scheduler.wait_all(Duration::from_secs(5)));
    assert_eq!(*log.lock().unwrap(), vec![1, 2, 3, 1, 2, 3, 1, 2, 3]);
}

#[test]
fn fifo_dispatch_order() {
    let scheduler = Scheduler::new(1).unwrap();
    let log = new_log();

    for id in 0..10u64 {
        let log = Arc::clone(&log);
        scheduler
            .spawn(move || {
                log.lock().unwrap().push(id);
            })
            .unwrap();
    }

    scheduler.start().unwrap();
    assert!(scheduler.wait_all(Duration::from_secs(5)));
    assert_eq!(*log.lock().unwrap(), (0..10).collect::<Vec<_>>());
}

#[test]
fn multi_worker_parallelism() {
    let scheduler = Scheduler::new(4).unwrap();
    scheduler.start().unwrap();

    let counter = Arc::new(Mutex::new(0u64));
    for _ in 0..100 {
        let counter = Arc::clone(&counter);
        scheduler
            .spawn(move || {
                for _ in 0..100 {
                    *counter.lock().unwrap() += 1;
                    strand::yield_now();
                }
            })
            .unwrap();
    }

    assert!(scheduler.wait_all(Duration::from_secs(30)));
    assert_eq!(*counter.lock().unwrap(), 10_000);
    scheduler.stop();
}

#[test]
fn sleep_wakes_up() {
    let scheduler = Scheduler::new(1).unwrap();

    let woke_at = Arc::new(Mutex::new(None));
    let woke_at2 = Arc::clone(&woke_at);
    scheduler
        .spawn(move || {
            strand::sleep(Duration::from_millis(50));
            *woke_at2.lock().unwrap() = Some(Instant::now());
        })
        .unwrap();

    let before = Instant::now();
    scheduler.start().unwrap();
    assert!(scheduler.wait_all(Duration::from_secs(5)));

    let woke_at = woke_at.lock().unwrap().expect("task did not record wake time");
    assert!(woke_at.duration_since(before) >= Duration::from_millis(50));
}

#[test]
fn sleep_outside_task_delegates_to_os_sleep() {
    let before = Instant::now();
    strand::sleep(Duration::from_millis(20));
    assert!(before.elapsed() >= Duration::from_millis(20));
}

#[test]
fn yield_outside_task_is_noop() {
    strand::yield_now();
}

#[test]
fn current_reports_the_running_task() {
    assert!(strand::current().is_none());

    let scheduler = Scheduler::new(1).unwrap();
    let seen = Arc::new(Mutex::new(None));
    let seen2 = Arc::clone(&seen);
    let handle = scheduler
        .spawn(move || {
            *seen2.lock().unwrap() = strand::current().map(|h| h.id());
        })
        .unwrap();

    scheduler.start().unwrap();
    assert!(scheduler.wait_all(Duration::from_secs(5)));
    assert_eq!(*seen.lock().unwrap(), Some(handle.id()));
}

#[test]
fn stop_is_idempotent() {
    let scheduler = Scheduler::new(4).unwrap();
    scheduler.stop();
    scheduler.stop();
    drop(scheduler);

    let scheduler = Scheduler::new(4).unwrap();
    scheduler.start().unwrap();
    scheduler.stop();
    scheduler.stop();
}

#[test]
fn no_dispatch_after_stop() {
    let scheduler = Scheduler::new(2).unwrap();
    scheduler.start().unwrap();
    scheduler.stop();

    let handle = scheduler.spawn(|| {}).unwrap();
    thread::sleep(Duration::from_millis(100));
    assert_eq!(handle.state(), TaskState::Ready);
    assert_eq!(scheduler.task_count(), 1);
}

#[test]
fn large_fan_out() {
    let scheduler = Scheduler::new(2).unwrap();
    scheduler.start().unwrap();

    let finished = Arc::new(AtomicUsize::new(0));
    for _ in 0..10_000 {
        let finished = Arc::clone(&finished);
        scheduler
            .spawn_with_stack_size(
                move || {
                    strand::yield_now();
                    finished.fetch_add(1, Ordering::SeqCst);
                },
                16 * 1024,
            )
            .unwrap();
    }

    assert!(scheduler.wait_all(Duration::from_secs(60)));
    assert_eq!(finished.load(Ordering::SeqCst), 10_000);
    assert_eq!(scheduler.task_count(), 0);
    scheduler.stop();
}

#[test]
fn stack_preserved_across_yields() {
    let scheduler = Scheduler::new(1).unwrap();

    let mut handles = Vec::new();
    for seed in 0..2u8 {
        let handle = scheduler
            .spawn(move || {
                let pattern = seed ^ 0xAB;
                let canary = [pattern; 512];
                for _ in 0..3 {
                    strand::yield_now();
                    assert!(canary.iter().all(|b| *b == pattern));
                }
            })
            .unwrap();
        handles.push(handle);
    }

    scheduler.start().unwrap();
    assert!(scheduler.wait_all(Duration::from_secs(5)));
    for handle in handles {
        assert!(!handle.panicked(), "{:?}", handle.panic_message());
    }
}

#[test]
fn randomized_schedules() {
    use rand::Rng;

    let scheduler = Scheduler::new(4).unwrap();
    scheduler.start().unwrap();

    let counter = Arc::new(AtomicUsize::new(0));
    for _ in 0..50 {
        let counter = Arc::clone(&counter);
        scheduler
            .spawn(move || {
                let mut rng = rand::thread_rng();
                for _ in 0..20 {
                    match rng.gen_range(0..3) {
                        0 => strand::yield_now(),
                        1 => strand::sleep(Duration::from_millis(1)),
                        _ => {}
                    }
                    counter.fetch_add(1, Ordering::SeqCst);
                }
            })
            .unwrap();
    }

    assert!(scheduler.wait_all(Duration::from_secs(60)));
    assert_eq!(counter.load(Ordering::SeqCst), 50 * 20);
    scheduler.stop();
}

#[test]
fn tasks_occupy_all_workers() {
    let scheduler = Scheduler::new(4).unwrap();
    scheduler.start().unwrap();

    // A sleeping task keeps its worker busy for the whole wait, so four
    // concurrent sleepers must land on four distinct worker threads.
    let threads = Arc::new(Mutex::new(std::collections::HashSet::new()));
    for _ in 0..4 {
        let threads = Arc::clone(&threads);
        scheduler
            .spawn(move || {
                threads
                    .lock()
                    .unwrap()
                    .insert(thread::current().name().map(String::from));
                strand::sleep(Duration::from_millis(100));
            })
            .unwrap();
    }

    assert!(scheduler.wait_all(Duration::from_secs(10)));
    assert_eq!(threads.lock().unwrap().len(), 4);
    scheduler.stop();
}
