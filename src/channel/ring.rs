//! Fixed-capacity ring buffer shared by one producer and one consumer
//!
//! `crossbeam_channel::bounded` is not used here because its array flavour writes a stamp
//! into every slot when the channel is created, so a 10M-slot buffer is fully committed up
//! front. Slots here start uninitialised and their pages are only touched once written.

use super::error::{ChannelError, Result};
use std::cell::UnsafeCell;
use std::mem::MaybeUninit;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

/// Absolute point in time at which a blocked push/pop gives up
#[derive(Debug, Clone, Copy)]
pub(super) struct Deadline {
    at: Instant,
    after: Duration,
}

impl Deadline {
    /// `None` when the timeout is too large to be represented, which is treated as "wait forever"
    pub(super) fn after(timeout: Duration) -> Option<Self> {
        Instant::now().checked_add(timeout).map(|at| Self { at, after: timeout })
    }
}

/// Ring state.
///
/// `head` and `tail` count every pop and push since creation and wrap around `usize`;
/// the slot index is the cursor modulo capacity. Only the producer stores `tail`, only the
/// consumer stores `head`. The mutex guards no data: it only lets a side park until the other
/// side makes progress, and a side is notified only when it announced itself parked.
pub(super) struct Ring<T> {
    slots: Box<[UnsafeCell<MaybeUninit<T>>]>,
    head: AtomicUsize,
    tail: AtomicUsize,
    closed: AtomicBool,
    cancelled: AtomicBool,
    producer_parked: AtomicBool,
    consumer_parked: AtomicBool,
    park: Mutex<()>,
    not_full: Condvar,
    not_empty: Condvar,
}

// SAFETY: a slot is written only by the producer before publishing `tail` and read only by
// the consumer after observing it, so values of `T` move between exactly two threads.
unsafe impl<T: Send> Send for Ring<T> {}
unsafe impl<T: Send> Sync for Ring<T> {}

impl<T> Ring<T> {
    pub(super) fn with_capacity(capacity: usize) -> Self {
        debug_assert!(capacity > 0);

        // SAFETY: `UnsafeCell<MaybeUninit<T>>` is valid for any bit pattern. Slots are left
        // untouched so the pages backing a large buffer are only committed once written.
        let slots = unsafe { Box::new_uninit_slice(capacity).assume_init() };

        Self {
            slots,
            head: AtomicUsize::new(0),
            tail: AtomicUsize::new(0),
            closed: AtomicBool::new(false),
            cancelled: AtomicBool::new(false),
            producer_parked: AtomicBool::new(false),
            consumer_parked: AtomicBool::new(false),
            park: Mutex::new(()),
            not_full: Condvar::new(),
            not_empty: Condvar::new(),
        }
    }

    pub(super) fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub(super) fn len(&self) -> usize {
        let head = self.head.load(Ordering::SeqCst);
        self.tail.load(Ordering::SeqCst).wrapping_sub(head)
    }

    pub(super) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub(super) fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    fn slot(&self, cursor: usize) -> *mut MaybeUninit<T> {
        self.slots[cursor % self.slots.len()].get()
    }

    fn lock(&self) -> MutexGuard<'_, ()> {
        self.park.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn has_room(&self, tail: usize) -> bool {
        tail.wrapping_sub(self.head.load(Ordering::SeqCst)) < self.capacity()
    }

    /// Producer side. Must only be called from the thread owning the `Sender`.
    pub(super) fn push(&self, value: T, deadline: Option<Deadline>) -> Result<()> {
        if self.is_closed() {
            return Err(ChannelError::Closed);
        }

        let tail = self.tail.load(Ordering::Relaxed);
        loop {
            if self.is_cancelled() {
                return Err(ChannelError::Cancelled);
            }
            if self.has_room(tail) {
                break;
            }
            self.park_producer(tail, deadline)?;
        }

        // SAFETY: the slot at `tail` is free (checked above) and the consumer will not read
        // it until `tail` is advanced past it.
        unsafe { (*self.slot(tail)).write(value) };
        self.tail.store(tail.wrapping_add(1), Ordering::SeqCst);

        if self.consumer_parked.load(Ordering::SeqCst) {
            self.notify(&self.not_empty);
        }
        Ok(())
    }

    fn park_producer(&self, tail: usize, deadline: Option<Deadline>) -> Result<()> {
        let guard = self.lock();
        self.producer_parked.store(true, Ordering::SeqCst);

        let outcome = if !self.has_room(tail) && !self.is_cancelled() {
            wait(&self.not_full, guard, deadline)
        } else {
            Ok(guard)
        };

        self.producer_parked.store(false, Ordering::SeqCst);
        outcome.map(drop)
    }

    /// Consumer side. Must only be called from the thread owning the `Receiver`.
    pub(super) fn pop(&self, deadline: Option<Deadline>) -> Result<T> {
        let head = self.head.load(Ordering::Relaxed);
        loop {
            // `closed` is read before `tail`: the producer publishes its last item first.
            let closed = self.is_closed();
            if self.tail.load(Ordering::SeqCst) != head {
                break;
            }
            if closed {
                return Err(ChannelError::EndOfStream);
            }
            self.park_consumer(head, deadline)?;
        }

        Ok(self.take(head))
    }

    /// Non-blocking pop: `Ok(None)` when the buffer is momentarily empty
    pub(super) fn try_pop(&self) -> Result<Option<T>> {
        let head = self.head.load(Ordering::Relaxed);
        let closed = self.is_closed();
        if self.tail.load(Ordering::SeqCst) != head {
            return Ok(Some(self.take(head)));
        }
        if closed {
            return Err(ChannelError::EndOfStream);
        }
        Ok(None)
    }

    fn take(&self, head: usize) -> T {
        // SAFETY: `head != tail`, so the producer initialised this slot and published it.
        let value = unsafe { (*self.slot(head)).assume_init_read() };
        self.head.store(head.wrapping_add(1), Ordering::SeqCst);

        if self.producer_parked.load(Ordering::SeqCst) {
            self.notify(&self.not_full);
        }
        value
    }

    fn park_consumer(&self, head: usize, deadline: Option<Deadline>) -> Result<()> {
        let guard = self.lock();
        self.consumer_parked.store(true, Ordering::SeqCst);

        let empty = self.tail.load(Ordering::SeqCst) == head;
        let outcome = if empty && !self.is_closed() {
            wait(&self.not_empty, guard, deadline)
        } else {
            Ok(guard)
        };

        self.consumer_parked.store(false, Ordering::SeqCst);
        outcome.map(drop)
    }

    /// Returns `false` if the ring was already closed
    pub(super) fn close(&self) -> bool {
        if self.closed.swap(true, Ordering::SeqCst) {
            return false;
        }
        let _guard = self.lock();
        self.not_empty.notify_all();
        true
    }

    /// Returns `false` if the ring was already cancelled
    pub(super) fn cancel(&self) -> bool {
        if self.cancelled.swap(true, Ordering::SeqCst) {
            return false;
        }
        let _guard = self.lock();
        self.not_full.notify_all();
        true
    }

    fn notify(&self, condvar: &Condvar) {
        let _guard = self.lock();
        condvar.notify_one();
    }
}

fn wait<'a>(
    condvar: &Condvar,
    guard: MutexGuard<'a, ()>,
    deadline: Option<Deadline>,
) -> Result<MutexGuard<'a, ()>> {
    match deadline {
        None => Ok(condvar.wait(guard).unwrap_or_else(PoisonError::into_inner)),
        Some(deadline) => {
            let now = Instant::now();
            if now >= deadline.at {
                return Err(ChannelError::TimedOut(deadline.after));
            }
            let (guard, _) = condvar
                .wait_timeout(guard, deadline.at - now)
                .unwrap_or_else(PoisonError::into_inner);
            Ok(guard)
        }
    }
}

impl<T> Drop for Ring<T> {
    fn drop(&mut self) {
        let head = *self.head.get_mut();
        let tail = *self.tail.get_mut();
        let len = self.slots.len();

        for offset in 0..tail.wrapping_sub(head) {
            let slot = &mut self.slots[head.wrapping_add(offset) % len];
            // SAFETY: every slot between head and tail holds an unconsumed value.
            unsafe { slot.get_mut().assume_init_drop() };
        }
    }
}

/// Type-erased cancellation, so handles for differently typed rings can live side by side
pub(super) trait Cancel: Send + Sync {
    fn cancel(&self) -> bool;
    fn is_cancelled(&self) -> bool;
}

impl<T: Send> Cancel for Ring<T> {
    fn cancel(&self) -> bool {
        Ring::cancel(self)
    }

    fn is_cancelled(&self) -> bool {
        Ring::is_cancelled(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::AtomicUsize;

    struct DropCounter(Arc<AtomicUsize>);

    impl Drop for DropCounter {
        fn drop(&mut self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_cursor_wraps_around_capacity() {
        let ring = Ring::with_capacity(3);
        for round in 0..10 {
            ring.push(round * 2, None).unwrap();
            ring.push(round * 2 + 1, None).unwrap();
            assert_eq!(ring.pop(None).unwrap(), round * 2);
            assert_eq!(ring.pop(None).unwrap(), round * 2 + 1);
        }
        assert_eq!(ring.len(), 0);
    }

    #[test]
    fn test_unconsumed_values_dropped_with_ring() {
        let drops = Arc::new(AtomicUsize::new(0));
        let ring = Ring::with_capacity(4);
        for _ in 0..3 {
            ring.push(DropCounter(drops.clone()), None).unwrap();
        }
        drop(ring.pop(None).unwrap());
        assert_eq!(drops.load(Ordering::SeqCst), 1);

        drop(ring);
        assert_eq!(drops.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_close_and_cancel_report_first_call() {
        let ring: Ring<u8> = Ring::with_capacity(1);
        assert!(ring.close());
        assert!(!ring.close());
        assert!(ring.cancel());
        assert!(!ring.cancel());
    }

    #[test]
    fn test_deadline_overflow_means_no_deadline() {
        assert!(Deadline::after(Duration::MAX).is_none());
        assert!(Deadline::after(Duration::from_millis(1)).is_some());
    }
}
