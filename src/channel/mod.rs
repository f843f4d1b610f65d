//! Bounded single-producer/single-consumer channel
//!
//! Each sampling job streams its output through one of these channels. The buffer is
//! allocated once with a fixed number of slots, so a fast producer blocks (backpressure)
//! instead of growing memory when the consumer falls behind.
//!
//! - [`Sender`] is owned by the worker thread: `push`, `push_timeout`, `close`
//! - [`Receiver`] is owned by whichever thread drains the job: `pop`, `pop_timeout`,
//!   `try_pop`, `cancel`
//! - [`CancelHandle`] lets any other thread request early termination
//!
//! Neither end is `Clone` or `Sync`, so exactly one thread writes and one thread reads.
//! Dropping the `Sender` closes the channel; dropping the `Receiver` cancels it.
//!
//! ```rust
//! use samplebox::channel;
//!
//! let (tx, rx) = channel::bounded(2).unwrap();
//! tx.push("a").unwrap();
//! tx.push("b").unwrap();
//! tx.close();
//!
//! let drained: Vec<_> = rx.iter().collect();
//! assert_eq!(drained, vec!["a", "b"]);
//! assert!(rx.pop().unwrap_err().is_end_of_stream());
//! ```

mod error;
mod ring;

pub use error::{ChannelError, Result};

use ring::{Cancel, Deadline, Ring};
use std::cell::Cell;
use std::marker::PhantomData;
use std::mem;
use std::sync::Arc;
use std::time::Duration;

/// Create a channel holding at most `capacity` messages in flight
pub fn bounded<T>(capacity: usize) -> Result<(Sender<T>, Receiver<T>)> {
    let slot_bytes = mem::size_of::<T>().max(1);
    if capacity == 0 || capacity > isize::MAX as usize / slot_bytes {
        return Err(ChannelError::InvalidCapacity(capacity));
    }

    let ring = Arc::new(Ring::with_capacity(capacity));
    tracing::trace!(capacity, "Channel created");

    Ok((
        Sender {
            ring: ring.clone(),
            _not_sync: PhantomData,
        },
        Receiver {
            ring,
            _not_sync: PhantomData,
        },
    ))
}

/// Write end of a channel
pub struct Sender<T> {
    ring: Arc<Ring<T>>,
    _not_sync: PhantomData<Cell<()>>,
}

impl<T> Sender<T> {
    /// Push a message, blocking while the buffer is full
    ///
    /// Returns `Cancelled` if the consumer cancelled before or while waiting,
    /// and `Closed` if this sender was already closed.
    pub fn push(&self, message: T) -> Result<()> {
        self.ring.push(message, None)
    }

    /// Like [`Sender::push`], but gives up with `TimedOut` once `timeout` elapses
    pub fn push_timeout(&self, message: T, timeout: Duration) -> Result<()> {
        self.ring.push(message, Deadline::after(timeout))
    }

    /// Mark the end of the stream. Buffered messages stay available to the consumer.
    pub fn close(&self) {
        if self.ring.close() {
            tracing::trace!(pending = self.ring.len(), "Channel closed by producer");
        }
    }

    pub fn is_closed(&self) -> bool {
        self.ring.is_closed()
    }

    pub fn is_cancelled(&self) -> bool {
        self.ring.is_cancelled()
    }

    pub fn capacity(&self) -> usize {
        self.ring.capacity()
    }

    pub fn len(&self) -> usize {
        self.ring.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T> Drop for Sender<T> {
    fn drop(&mut self) {
        self.close();
    }
}

impl<T> std::fmt::Debug for Sender<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Sender")
            .field("capacity", &self.capacity())
            .field("len", &self.len())
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// Read end of a channel
pub struct Receiver<T> {
    ring: Arc<Ring<T>>,
    _not_sync: PhantomData<Cell<()>>,
}

impl<T> Receiver<T> {
    /// Pop the oldest message, blocking while the buffer is empty and the producer is active
    ///
    /// Returns `EndOfStream` once the producer closed and everything was consumed.
    pub fn pop(&self) -> Result<T> {
        self.ring.pop(None)
    }

    /// Like [`Receiver::pop`], but gives up with `TimedOut` once `timeout` elapses
    pub fn pop_timeout(&self, timeout: Duration) -> Result<T> {
        self.ring.pop(Deadline::after(timeout))
    }

    /// Pop without blocking; `Ok(None)` if nothing is buffered yet
    pub fn try_pop(&self) -> Result<Option<T>> {
        self.ring.try_pop()
    }

    /// Ask the producer to stop. A blocked or future `push` returns `Cancelled`.
    pub fn cancel(&self) {
        if self.ring.cancel() {
            tracing::debug!(pending = self.ring.len(), "Channel cancelled by consumer");
        }
    }

    /// Iterate over messages until the end of the stream
    pub fn iter(&self) -> Iter<'_, T> {
        Iter { receiver: self }
    }

    pub fn is_closed(&self) -> bool {
        self.ring.is_closed()
    }

    pub fn is_cancelled(&self) -> bool {
        self.ring.is_cancelled()
    }

    pub fn capacity(&self) -> usize {
        self.ring.capacity()
    }

    pub fn len(&self) -> usize {
        self.ring.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T: Send + 'static> Receiver<T> {
    /// Handle that can cancel this channel from another thread
    pub fn canceller(&self) -> CancelHandle {
        CancelHandle {
            ring: self.ring.clone(),
        }
    }
}

impl<T> Drop for Receiver<T> {
    fn drop(&mut self) {
        self.ring.cancel();
    }
}

impl<T> std::fmt::Debug for Receiver<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Receiver")
            .field("capacity", &self.capacity())
            .field("len", &self.len())
            .field("closed", &self.is_closed())
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

/// Blocking iterator over a [`Receiver`]
pub struct Iter<'a, T> {
    receiver: &'a Receiver<T>,
}

impl<T> Iterator for Iter<'_, T> {
    type Item = T;

    fn next(&mut self) -> Option<T> {
        self.receiver.pop().ok()
    }
}

impl<'a, T> IntoIterator for &'a Receiver<T> {
    type Item = T;
    type IntoIter = Iter<'a, T>;

    fn into_iter(self) -> Iter<'a, T> {
        self.iter()
    }
}

/// Cross-thread handle that can only cancel a channel
#[derive(Clone)]
pub struct CancelHandle {
    ring: Arc<dyn Cancel>,
}

impl CancelHandle {
    pub fn cancel(&self) {
        self.ring.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.ring.is_cancelled()
    }
}

impl std::fmt::Debug for CancelHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CancelHandle")
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}
