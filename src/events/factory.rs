//! # Per-bus event factory.
//!
//! Each bus owns one [`Factory`]. The factory holds the bus's sequence counter,
//! the only shared mutable state on the publication path, and advances it
//! atomically so concurrent publishers never observe the same number.

use std::fmt;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use super::event::Event;

/// Generator of sequence-stamped [`Event`]s for one bus.
///
/// Sequence numbers start at the configured origin (zero by default), strictly
/// increase, and wrap back to zero after `u64::MAX` is handed out.
pub struct Factory<T> {
    seq: AtomicU64,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Factory<T> {
    /// Factory numbering from zero.
    pub fn new() -> Self {
        Self::starting_at(0)
    }

    /// Factory whose first event gets `sequence`.
    pub fn starting_at(sequence: u64) -> Self {
        Self {
            seq: AtomicU64::new(sequence),
            _marker: PhantomData,
        }
    }

    /// Sequence number the next event will receive.
    pub fn peek(&self) -> u64 {
        self.seq.load(Ordering::Acquire)
    }

    /// Stamps a new event with the next sequence number and the current time.
    pub fn next(&self, data: Option<T>, key: Option<&str>, flag: Option<u64>) -> Event<T> {
        Event::stamped(self.advance(), key.map(Arc::from), flag, data)
    }

    fn advance(&self) -> u64 {
        let prev = self
            .seq
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |cur| {
                Some(cur.checked_add(1).unwrap_or(0))
            });
        // fetch_update only fails when the closure returns None.
        match prev {
            Ok(seq) | Err(seq) => seq,
        }
    }
}

impl<T> Default for Factory<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for Factory<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Factory").field("next", &self.peek()).finish()
    }
}
