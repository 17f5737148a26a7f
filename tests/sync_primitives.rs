mod common;
use crate::common::{init_tracing, Recorder, TIMEOUT};

use std::sync::atomic::{AtomicUsize, Ordering};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use taskline::sync::{
    BlockingQueue, CancellationSignal, EventLoop, Observers, QueueEvent, Signal, UnhandledFailure,
};

type TestResult = Result<(), Box<dyn std::error::Error>>;

#[test]
fn cancellation_signal_fires_handlers_once() {
    init_tracing();
    let signal = CancellationSignal::new();
    let fired = Arc::new(AtomicUsize::new(0));

    let counter = Arc::clone(&fired);
    signal.on_cancel(move || {
        counter.fetch_add(1, Ordering::SeqCst);
    });

    assert!(!signal.is_canceled());
    signal.cancel();
    signal.cancel();
    assert!(signal.is_canceled());
    assert_eq!(fired.load(Ordering::SeqCst), 1);

    // Clones share the flag.
    let clone = signal.clone();
    assert!(clone.is_canceled());
}

#[test]
fn cancellation_signal_unsubscribed_handler_is_not_called() {
    let signal = CancellationSignal::new();
    let fired = Arc::new(AtomicUsize::new(0));

    let counter = Arc::clone(&fired);
    let id = signal.on_cancel(move || {
        counter.fetch_add(1, Ordering::SeqCst);
    });
    assert!(signal.unsubscribe(id));
    assert!(!signal.unsubscribe(id));

    signal.cancel();
    assert_eq!(fired.load(Ordering::SeqCst), 0);
}

#[test]
fn cancellation_from_another_thread_is_visible() {
    let signal = CancellationSignal::new();
    let remote = signal.clone();
    thread::spawn(move || remote.cancel())
        .join()
        .expect("cancel thread panicked");
    assert!(signal.is_canceled());
}

#[test]
fn auto_reset_signal_is_consumed_by_one_wait() {
    let signal = Signal::auto(false);
    signal.set();
    assert!(signal.wait(Some(Duration::from_millis(10))));
    assert!(!signal.wait(Some(Duration::from_millis(10))));
}

#[test]
fn manual_signal_stays_set_until_reset() {
    let signal = Signal::manual(false);
    assert!(!signal.wait(Some(Duration::from_millis(5))));
    signal.set();
    assert!(signal.wait(Some(Duration::ZERO)));
    assert!(signal.wait(Some(Duration::ZERO)));
    signal.reset();
    assert!(!signal.is_set());
}

#[test]
fn queue_is_fifo_and_reports_transitions() {
    init_tracing();
    let queue = BlockingQueue::new();
    let events = Recorder::<QueueEvent>::new();
    queue.subscribe(events.handler());

    queue.enqueue(1);
    queue.enqueue(2);
    queue.enqueue(3);
    assert_eq!(queue.len(), 3);

    assert_eq!(queue.try_dequeue(), Some(1));
    assert_eq!(queue.try_dequeue(), Some(2));
    assert_eq!(queue.try_dequeue(), Some(3));
    assert_eq!(queue.try_dequeue(), None);

    // NewItem only on empty -> non-empty, Empty only when a removal empties it.
    assert_eq!(events.events(), vec![QueueEvent::NewItem, QueueEvent::Empty]);
}

#[test]
fn queue_blocking_dequeue_times_out_with_none() {
    let queue: BlockingQueue<u32> = BlockingQueue::new();
    let started = Instant::now();
    assert_eq!(queue.dequeue_blocking(Some(Duration::from_millis(20))), None);
    assert!(started.elapsed() >= Duration::from_millis(20));
}

#[test]
fn queue_blocking_dequeue_wakes_on_enqueue() -> TestResult {
    let queue = Arc::new(BlockingQueue::new());
    let consumer = {
        let queue = Arc::clone(&queue);
        thread::spawn(move || queue.dequeue_blocking(Some(TIMEOUT)))
    };

    thread::sleep(Duration::from_millis(10));
    queue.enqueue("item");

    let got = consumer.join().map_err(|_| "consumer panicked")?;
    assert_eq!(got, Some("item"));
    Ok(())
}

#[test]
fn queue_dispose_wakes_blocked_consumers() -> TestResult {
    let queue: Arc<BlockingQueue<u32>> = Arc::new(BlockingQueue::new());
    let events = Recorder::<QueueEvent>::new();
    queue.subscribe(events.handler());

    let consumers: Vec<_> = (0..3)
        .map(|_| {
            let queue = Arc::clone(&queue);
            thread::spawn(move || queue.dequeue_blocking(None))
        })
        .collect();

    thread::sleep(Duration::from_millis(10));
    queue.dispose();
    queue.dispose();

    for consumer in consumers {
        assert_eq!(consumer.join().map_err(|_| "consumer panicked")?, None);
    }
    assert!(queue.is_disposed());

    // Enqueue after dispose is dropped.
    queue.enqueue(7);
    assert!(queue.is_empty());
    assert_eq!(events.events(), vec![QueueEvent::Disposed]);
    Ok(())
}

#[test]
fn queue_wait_for_empty_and_drain() {
    let queue = BlockingQueue::new();
    assert!(queue.wait_for_empty(Some(Duration::ZERO)));

    queue.enqueue('a');
    queue.enqueue('b');
    assert!(!queue.wait_for_empty(Some(Duration::from_millis(5))));

    assert_eq!(queue.drain_all(), vec!['a', 'b']);
    assert!(queue.wait_for_empty(Some(Duration::ZERO)));
    assert!(queue.drain_all().is_empty());
}

#[test]
fn queue_concurrent_producers_lose_nothing() -> TestResult {
    let queue = Arc::new(BlockingQueue::new());
    let producers: Vec<_> = (0..4)
        .map(|p| {
            let queue = Arc::clone(&queue);
            thread::spawn(move || {
                for i in 0..250 {
                    queue.enqueue(p * 1000 + i);
                }
            })
        })
        .collect();

    let mut received = Vec::new();
    while received.len() < 1000 {
        match queue.dequeue_blocking(Some(TIMEOUT)) {
            Some(item) => received.push(item),
            None => return Err("queue starved".into()),
        }
    }
    for producer in producers {
        producer.join().map_err(|_| "producer panicked")?;
    }

    // Items of one producer keep their relative order.
    for p in 0..4 {
        let own: Vec<_> = received.iter().filter(|i| **i / 1000 == p).collect();
        assert!(own.windows(2).all(|w| w[0] < w[1]));
    }
    Ok(())
}

#[test]
fn event_loop_runs_closures_in_push_order_on_its_own_thread() -> TestResult {
    init_tracing();
    let event_loop = Arc::new(EventLoop::new("order")?);
    let seen = Arc::new(Mutex::new(Vec::new()));

    for i in 0..100 {
        let seen = Arc::clone(&seen);
        let check = Arc::clone(&event_loop);
        event_loop.push(move |ctx| {
            assert!(check.is_loop_thread());
            assert_eq!(ctx.loop_name(), "order");
            seen.lock().push(i);
        });
    }

    assert!(!event_loop.is_loop_thread());
    assert!(event_loop.wait_for_empty(Some(TIMEOUT)));
    assert_eq!(*seen.lock(), (0..100).collect::<Vec<_>>());
    event_loop.dispose();
    Ok(())
}

#[test]
fn event_loop_keeps_per_producer_order_under_concurrency() -> TestResult {
    let event_loop = Arc::new(EventLoop::new("concurrent")?);
    let seen = Arc::new(Mutex::new(Vec::new()));

    let producers: Vec<_> = (0..4)
        .map(|p| {
            let event_loop = Arc::clone(&event_loop);
            let seen = Arc::clone(&seen);
            thread::spawn(move || {
                for i in 0..100 {
                    let seen = Arc::clone(&seen);
                    event_loop.push(move |_| seen.lock().push((p, i)));
                }
            })
        })
        .collect();
    for producer in producers {
        producer.join().map_err(|_| "producer panicked")?;
    }

    assert!(event_loop.wait_for_empty(Some(TIMEOUT)));
    let seen = seen.lock().clone();
    assert_eq!(seen.len(), 400);
    for p in 0..4 {
        let own: Vec<_> = seen.iter().filter(|(q, _)| *q == p).map(|(_, i)| *i).collect();
        assert_eq!(own, (0..100).collect::<Vec<_>>());
    }
    Ok(())
}

#[test]
fn event_loop_reports_failures_and_keeps_running() -> TestResult {
    init_tracing();
    let event_loop = EventLoop::new("failures")?;
    let failures = Recorder::<UnhandledFailure>::new();
    event_loop.on_unhandled(failures.handler());

    event_loop.push(|_| panic!("boom"));
    event_loop.push_fallible(|_| Err(anyhow::anyhow!("broken handler")));
    let after = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&after);
    event_loop.push(move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
    });

    assert!(event_loop.wait_for_empty(Some(TIMEOUT)));
    assert_eq!(after.load(Ordering::SeqCst), 1);

    let failures = failures.events();
    assert_eq!(failures.len(), 2);
    assert!(failures[0].message.contains("boom"));
    assert!(failures[1].message.contains("broken handler"));
    assert!(failures.iter().all(|f| f.loop_name == "failures"));
    Ok(())
}

#[test]
fn event_loop_wait_for_empty_from_loop_thread_returns_false() -> TestResult {
    let event_loop = Arc::new(EventLoop::new("self-wait")?);
    let result = Arc::new(Mutex::new(None));

    let inner_loop = Arc::clone(&event_loop);
    let slot = Arc::clone(&result);
    event_loop.push(move |_| {
        *slot.lock() = Some(inner_loop.wait_for_empty(Some(Duration::from_millis(50))));
    });

    assert!(event_loop.wait_for_empty(Some(TIMEOUT)));
    assert_eq!(*result.lock(), Some(false));
    event_loop.dispose();
    Ok(())
}

#[test]
fn event_loop_dispose_drops_later_pushes() -> TestResult {
    let event_loop = EventLoop::new("disposed")?;
    event_loop.dispose();
    event_loop.dispose();
    assert!(event_loop.is_disposed());

    let ran = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&ran);
    event_loop.push(move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
    });
    assert!(event_loop.wait_for_empty(Some(Duration::from_millis(20))));
    assert_eq!(ran.load(Ordering::SeqCst), 0);
    Ok(())
}

#[test]
fn observers_deliver_past_a_panicking_handler() {
    let observers = Observers::<u32>::new();
    let seen = Arc::new(AtomicUsize::new(0));
    observers.subscribe(|value| {
        if *value == 7 {
            panic!("bad handler");
        }
    });
    let counter = Arc::clone(&seen);
    observers.subscribe(move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
    });

    let outcome = catch_unwind(AssertUnwindSafe(|| observers.emit(&7)));
    assert!(outcome.is_err());
    assert_eq!(seen.load(Ordering::SeqCst), 1);

    observers.emit(&1);
    assert_eq!(seen.load(Ordering::SeqCst), 2);
}
