//! # Listener: a `(requirement, action)` pair bound to one bus.
//!
//! ## State machine
//! ```text
//!   Active ──close()──► Closed      (terminal)
//!   Active ──first accept() of a one-shot──► Closed
//! ```
//!
//! ## Rules
//! - A listener belongs to exactly one bus; the bus holds it, the listener only
//!   keeps a weak back-reference.
//! - `close()` is idempotent and detaches the listener from its bus.
//! - Ordering is priority-descending, ties broken by registration order.
//! - A listener never catches faults raised by its action: the dispatch task
//!   does (see [`Bus::accept`](crate::Bus::accept)).

use std::cmp::Ordering;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicI32, Ordering as AtomicOrdering};
use std::sync::{Arc, Mutex, PoisonError, Weak};

use crate::core::{Bus, BusInner};
use crate::events::Event;

/// Shared predicate deciding whether a listener wants an event.
pub type Requirement<T> = Arc<dyn Fn(&Event<T>) -> bool + Send + Sync>;
/// Shared consumer run for accepted events.
pub type Action<T> = Arc<dyn Fn(&Event<T>) + Send + Sync>;
pub(crate) type CloseHook = Box<dyn FnOnce() + Send>;

struct ListenerInner<T> {
    id: u64,
    bus: Weak<BusInner<T>>,
    requirement: Requirement<T>,
    action: Action<T>,
    priority: AtomicI32,
    active: AtomicBool,
    one_shot: bool,
    on_close: Mutex<Option<CloseHook>>,
}

/// Handle to a registration on a [`Bus`].
///
/// Cloning is cheap; all clones refer to the same registration.
pub struct Listener<T> {
    inner: Arc<ListenerInner<T>>,
}

impl<T> Listener<T> {
    pub(crate) fn new(
        id: u64,
        bus: Weak<BusInner<T>>,
        requirement: Requirement<T>,
        action: Action<T>,
        priority: i32,
        one_shot: bool,
        on_close: Option<CloseHook>,
    ) -> Self {
        Self {
            inner: Arc::new(ListenerInner {
                id,
                bus,
                requirement,
                action,
                priority: AtomicI32::new(priority),
                active: AtomicBool::new(true),
                one_shot,
                on_close: Mutex::new(on_close),
            }),
        }
    }

    /// Registration number, unique per bus and increasing with registration order.
    #[inline]
    pub fn id(&self) -> u64 {
        self.inner.id
    }

    #[inline]
    pub fn is_active(&self) -> bool {
        self.inner.active.load(AtomicOrdering::Acquire)
    }

    /// True for listeners that close themselves after their first delivery.
    #[inline]
    pub fn is_one_shot(&self) -> bool {
        self.inner.one_shot
    }

    #[inline]
    pub fn priority(&self) -> i32 {
        self.inner.priority.load(AtomicOrdering::Relaxed)
    }

    /// Changes the priority; takes effect from the next dispatch.
    pub fn set_priority(&self, priority: i32) {
        self.inner.priority.store(priority, AtomicOrdering::Relaxed);
    }

    /// Dispatch ordering: higher priority first, then earlier registration.
    pub fn cmp_priority(&self, other: &Self) -> Ordering {
        other
            .priority()
            .cmp(&self.priority())
            .then_with(|| self.inner.id.cmp(&other.inner.id))
    }

    /// Evaluates the requirement.
    #[inline]
    pub fn test(&self, event: &Event<T>) -> bool {
        (self.inner.requirement)(event)
    }

    /// Runs the action. Only meaningful after [`test`](Self::test) returned `true`.
    ///
    /// A one-shot listener runs its action at most once, even under concurrent
    /// dispatch, and closes itself afterwards.
    pub fn accept(&self, event: &Event<T>) {
        if !self.inner.one_shot {
            (self.inner.action)(event);
            return;
        }
        if !self.deactivate() {
            return;
        }
        let _detach = DetachOnDrop(self);
        (self.inner.action)(event);
    }

    /// Deactivates the listener and removes it from its bus. Idempotent.
    pub fn close(&self) {
        if self.deactivate() {
            self.detach();
        }
    }

    /// The bus this listener is bound to, unless it has been dropped.
    pub fn bus(&self) -> Option<Bus<T>> {
        self.inner.bus.upgrade().map(Bus::from_inner)
    }

    fn deactivate(&self) -> bool {
        self.inner.active.swap(false, AtomicOrdering::AcqRel)
    }

    fn detach(&self) {
        if let Some(bus) = self.inner.bus.upgrade() {
            bus.remove_listener(self.inner.id);
        }
        let hook = self
            .inner
            .on_close
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(hook) = hook {
            hook();
        }
        tracing::trace!(listener = self.inner.id, "listener closed");
    }
}

struct DetachOnDrop<'a, T>(&'a Listener<T>);

impl<T> Drop for DetachOnDrop<'_, T> {
    fn drop(&mut self) {
        self.0.detach();
    }
}

impl<T> Clone for Listener<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> fmt::Debug for Listener<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Listener")
            .field("id", &self.inner.id)
            .field("priority", &self.priority())
            .field("active", &self.is_active())
            .field("one_shot", &self.inner.one_shot)
            .finish()
    }
}
