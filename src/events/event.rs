//! # Events carried by a bus.
//!
//! An [`Event`] is an immutable occurrence record stamped by a bus
//! [`Factory`](crate::Factory): sequence number, capture time, optional routing
//! key, optional flag mask and optional payload. The only mutable part is the
//! one-way cancellation flag.
//!
//! `Event<T>` is a cheap handle: cloning it does not clone the payload, and all
//! clones observe the same cancellation state. Derived events (see
//! [`Event::with_data`]) are new occurrences that copy the source's metadata.
//!
//! ## Example
//! ```rust
//! use flowbus::Factory;
//!
//! let factory = Factory::new();
//! let ev = factory.next(Some(7_u32), Some("ready"), None);
//!
//! assert_eq!(ev.sequence(), 0);
//! assert_eq!(ev.key(), Some("ready"));
//! assert!(ev.cancel());
//! assert!(!ev.cancel());
//!
//! let doubled = ev.map_data(|v| v * 2).unwrap();
//! assert_eq!(doubled.data(), Some(&14));
//! assert!(doubled.is_cancelled());
//! ```

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// Flag value used when an event carries no flag: every bit set.
pub const FLAG_ALL: u64 = u64::MAX;

struct EventInner<T> {
    sequence: u64,
    timestamp: Instant,
    key: Option<Arc<str>>,
    flag: Option<u64>,
    data: Option<T>,
    cancelled: AtomicBool,
}

/// Sequence-stamped occurrence published on a [`Bus`](crate::Bus).
pub struct Event<T> {
    inner: Arc<EventInner<T>>,
}

impl<T> Event<T> {
    pub(crate) fn stamped(
        sequence: u64,
        key: Option<Arc<str>>,
        flag: Option<u64>,
        data: Option<T>,
    ) -> Self {
        Self::build(sequence, Instant::now(), key, flag, data, false)
    }

    fn build(
        sequence: u64,
        timestamp: Instant,
        key: Option<Arc<str>>,
        flag: Option<u64>,
        data: Option<T>,
        cancelled: bool,
    ) -> Self {
        Self {
            inner: Arc::new(EventInner {
                sequence,
                timestamp,
                key,
                flag,
                data,
                cancelled: AtomicBool::new(cancelled),
            }),
        }
    }

    /// Sequence number assigned by the owning bus's factory.
    #[inline]
    pub fn sequence(&self) -> u64 {
        self.inner.sequence
    }

    /// Monotonic capture time.
    #[inline]
    pub fn timestamp(&self) -> Instant {
        self.inner.timestamp
    }

    /// Routing key, if any.
    #[inline]
    pub fn key(&self) -> Option<&str> {
        self.inner.key.as_deref()
    }

    /// Raw flag mask; `None` means "no flag".
    #[inline]
    pub fn flag(&self) -> Option<u64> {
        self.inner.flag
    }

    /// Flag mask with the absent case resolved to [`FLAG_ALL`].
    #[inline]
    pub fn effective_flag(&self) -> u64 {
        self.inner.flag.unwrap_or(FLAG_ALL)
    }

    /// Payload, if any.
    #[inline]
    pub fn data(&self) -> Option<&T> {
        self.inner.data.as_ref()
    }

    #[inline]
    pub fn has_data(&self) -> bool {
        self.inner.data.is_some()
    }

    #[inline]
    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::Acquire)
    }

    /// Marks the event cancelled.
    ///
    /// Returns `true` only for the call that performed the transition; the flag
    /// never reverts. Cancelling during dispatch stops delivery to the remaining
    /// local listeners but not propagation to downstream buses.
    pub fn cancel(&self) -> bool {
        self.inner
            .cancelled
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Derives an event carrying `data` in place of the current payload.
    ///
    /// Sequence, timestamp, key, flag and the current cancelled state are
    /// copied. Returns `None` when this event has no payload.
    pub fn with_data<R>(&self, data: R) -> Option<Event<R>> {
        if self.inner.data.is_none() {
            return None;
        }
        Some(self.derive(self.inner.key.clone(), Some(data)))
    }

    /// Derives an event whose payload is `f(data)`; `None` if there is no
    /// payload or `f` yields nothing.
    pub fn map_data<R>(&self, f: impl FnOnce(&T) -> R) -> Option<Event<R>> {
        let data = f(self.inner.data.as_ref()?);
        Some(self.derive(self.inner.key.clone(), Some(data)))
    }

    /// Same occurrence re-keyed.
    pub fn with_key(&self, key: Option<impl Into<Arc<str>>>) -> Event<T>
    where
        T: Clone,
    {
        self.derive(key.map(Into::into), self.inner.data.clone())
    }

    fn derive<R>(&self, key: Option<Arc<str>>, data: Option<R>) -> Event<R> {
        Event::build(
            self.inner.sequence,
            self.inner.timestamp,
            key,
            self.inner.flag,
            data,
            self.is_cancelled(),
        )
    }
}

impl<T> Clone for Event<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for Event<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Event")
            .field("sequence", &self.inner.sequence)
            .field("key", &self.inner.key)
            .field("flag", &self.inner.flag)
            .field("data", &self.inner.data)
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}
