//! Channel behaviour across real producer and consumer threads

use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use samplebox::channel::{ChannelError, bounded};

/// Long enough that a push which should block has clearly not completed
const SETTLE: Duration = Duration::from_millis(100);

#[test]
fn test_accepts_exactly_capacity_pushes() {
    for capacity in [1, 2, 7, 64] {
        let (tx, _rx) = bounded::<usize>(capacity).unwrap();
        for i in 0..capacity {
            tx.push(i).unwrap();
        }
        assert_eq!(tx.len(), capacity);

        // The next push has no room and gives up instead of completing
        assert_eq!(
            tx.push_timeout(capacity, Duration::from_millis(10)),
            Err(ChannelError::TimedOut(Duration::from_millis(10)))
        );
    }
}

#[test]
fn test_fifo_across_threads() {
    const COUNT: u64 = 100_000;
    let (tx, rx) = bounded(16).unwrap();

    let producer = thread::spawn(move || {
        for i in 0..COUNT {
            tx.push(i).unwrap();
        }
    });

    let received: Vec<u64> = rx.iter().collect();
    producer.join().unwrap();

    assert_eq!(received.len() as u64, COUNT);
    assert!(received.iter().copied().eq(0..COUNT));
}

#[test]
fn test_close_then_drain() {
    let (tx, rx) = bounded(8).unwrap();
    for word in ["a", "b", "c"] {
        tx.push(word.to_string()).unwrap();
    }
    tx.close();

    assert_eq!(rx.pop().unwrap(), "a");
    assert_eq!(rx.pop().unwrap(), "b");
    assert_eq!(rx.pop().unwrap(), "c");
    for _ in 0..3 {
        assert_eq!(rx.pop(), Err(ChannelError::EndOfStream));
    }
}

#[test]
fn test_close_wakes_blocked_consumer() {
    let (tx, rx) = bounded::<u8>(4).unwrap();
    let consumer = thread::spawn(move || rx.pop());

    thread::sleep(SETTLE);
    drop(tx);

    assert_eq!(consumer.join().unwrap(), Err(ChannelError::EndOfStream));
}

#[test]
fn test_blocked_push_completes_after_pop() {
    let (tx, rx) = bounded(1).unwrap();
    tx.push('a').unwrap();

    let (done_tx, done_rx) = mpsc::channel();
    let producer = thread::spawn(move || {
        let pushed = tx.push('b');
        done_tx.send(()).unwrap();
        pushed
    });

    // Still blocked while the slot is taken
    assert!(done_rx.recv_timeout(SETTLE).is_err());

    assert_eq!(rx.pop().unwrap(), 'a');
    done_rx.recv_timeout(Duration::from_secs(5)).unwrap();
    assert_eq!(producer.join().unwrap(), Ok(()));
    assert_eq!(rx.pop().unwrap(), 'b');
}

#[test]
fn test_cancel_releases_blocked_producer() {
    let (tx, rx) = bounded(1).unwrap();
    tx.push(1).unwrap();

    let producer = thread::spawn(move || tx.push(2));
    thread::sleep(SETTLE);
    rx.cancel();

    assert_eq!(producer.join().unwrap(), Err(ChannelError::Cancelled));
}

#[test]
fn test_cancel_from_handle_on_another_thread() {
    let (tx, rx) = bounded(1).unwrap();
    let handle = rx.canceller();
    tx.push(0u32).unwrap();

    let producer = thread::spawn(move || tx.push(1));
    thread::spawn(move || {
        thread::sleep(SETTLE);
        handle.cancel();
    })
    .join()
    .unwrap();

    assert_eq!(producer.join().unwrap(), Err(ChannelError::Cancelled));
    assert!(rx.is_cancelled());
}

#[test]
fn test_slow_consumer_keeps_memory_bounded() {
    let (tx, rx) = bounded(4).unwrap();

    let producer = thread::spawn(move || {
        let mut peak = 0;
        for i in 0..200u32 {
            tx.push(i).unwrap();
            peak = peak.max(tx.len());
        }
        peak
    });

    let mut received = Vec::new();
    while let Ok(value) = rx.pop() {
        if value % 50 == 0 {
            thread::sleep(Duration::from_millis(5));
        }
        received.push(value);
    }

    assert!(producer.join().unwrap() <= 4);
    assert_eq!(received, (0..200).collect::<Vec<_>>());
}

#[test]
fn test_large_capacity_allocates_lazily() {
    let (tx, rx) = bounded::<u64>(10_000_000).unwrap();
    assert_eq!(tx.capacity(), 10_000_000);

    tx.push(42).unwrap();
    tx.close();
    assert_eq!(rx.iter().collect::<Vec<_>>(), vec![42]);
}
