//! # Filter: declarative listener builder
//!
//! [`Filter`] collects routing requirements for one bus and compiles them into
//! a standing [`Listener`] ([`Filter::subscribe`]) or a one-shot await
//! ([`Filter::once`]).
//!
//! ## Composition
//! ```text
//! filters() = key?        event.key == key
//!           ∧ flag?       test_flag(event.flag, mask, mode)
//!           ∧ of_type?    payload present and of the requested type
//!           ∧ predicates  every custom predicate (default: always true)
//! ```
//! Unset requirements always pass.
//!
//! ## Example
//! ```rust
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! use std::time::Duration;
//! use flowbus::{Bus, Config};
//!
//! let bus: Bus<u32> = Bus::builder("jobs").with_config(Config::direct()).build();
//! let ready = bus.listen().key("ready").timeout(Duration::from_secs(1)).once();
//!
//! bus.publish_with(Some("other"), None, 1);
//! bus.publish_with(Some("ready"), None, 2);
//!
//! let ev = ready.await.unwrap();
//! assert_eq!(ev.data(), Some(&2));
//! # }
//! ```

use std::any::Any;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::sync::oneshot;

use super::listener::{Action, CloseHook, Listener, Requirement};
use super::once::Once;
use crate::core::Bus;
use crate::events::{test_flag, DynPayload, Event, FlagMode};

type DataCheck<T> = Arc<dyn Fn(&T) -> bool + Send + Sync>;

/// Listener builder scoped to one bus. Reusable: each `subscribe`/`once` call
/// registers a new listener.
pub struct Filter<T> {
    bus: Bus<T>,
    key: Option<Arc<str>>,
    flag: Option<(u64, FlagMode)>,
    type_check: Option<DataCheck<T>>,
    predicates: Vec<Requirement<T>>,
    timeout: Option<Duration>,
    priority: i32,
}

impl<T: Send + Sync + 'static> Filter<T> {
    pub(crate) fn new(bus: Bus<T>) -> Self {
        Self {
            bus,
            key: None,
            flag: None,
            type_check: None,
            predicates: Vec::new(),
            timeout: None,
            priority: 0,
        }
    }

    /// Requires an event key equal to `key`.
    #[must_use]
    pub fn key(mut self, key: impl Into<Arc<str>>) -> Self {
        self.key = Some(key.into());
        self
    }

    /// Requires the event flag to share a bit with `mask`.
    #[must_use]
    pub fn flag(self, mask: u64) -> Self {
        self.flag_with(mask, FlagMode::BitwiseOr)
    }

    /// Requires the event flag to match `mask` under `mode`.
    #[must_use]
    pub fn flag_with(mut self, mask: u64, mode: FlagMode) -> Self {
        self.flag = Some((mask, mode));
        self
    }

    /// Adds a custom predicate; several predicates are ANDed.
    #[must_use]
    pub fn predicate(mut self, f: impl Fn(&Event<T>) -> bool + Send + Sync + 'static) -> Self {
        self.predicates.push(Arc::new(f));
        self
    }

    /// Adds a predicate on the payload; events without payload are rejected.
    #[must_use]
    pub fn data_predicate(self, f: impl Fn(&T) -> bool + Send + Sync + 'static) -> Self {
        self.predicate(move |ev| ev.data().is_some_and(&f))
    }

    /// Deadline for [`once`](Self::once). Ignored by `subscribe`.
    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Priority of the listeners this filter registers (default 0).
    #[must_use]
    pub fn priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    /// Composed requirement of every configured field.
    pub fn filters(&self) -> Requirement<T> {
        let key = self.key.clone();
        let flag = self.flag;
        let type_check = self.type_check.clone();
        let predicates = self.predicates.clone();

        Arc::new(move |ev: &Event<T>| {
            if let Some(key) = key.as_deref() {
                if ev.key() != Some(key) {
                    return false;
                }
            }
            if let Some((mask, mode)) = flag {
                if !test_flag(ev.flag(), mask, mode) {
                    return false;
                }
            }
            if let Some(check) = type_check.as_ref() {
                if !ev.data().is_some_and(|d| check(d)) {
                    return false;
                }
            }
            predicates.iter().all(|p| p(ev))
        })
    }

    /// Registers a standing listener running `action` for every match.
    pub fn subscribe(&self, action: impl Fn(&Event<T>) + Send + Sync + 'static) -> Listener<T> {
        self.bus
            .add_listener(self.filters(), Arc::new(action), self.priority, false, None)
    }

    /// Registers a standing listener receiving the payload of every match.
    /// Matches without payload are skipped.
    pub fn subscribe_data(&self, action: impl Fn(&T) + Send + Sync + 'static) -> Listener<T> {
        self.subscribe(move |ev| {
            if let Some(data) = ev.data() {
                action(data);
            }
        })
    }

    /// Registers a one-shot listener and returns a future resolving with the
    /// first matching event.
    ///
    /// Later matches are ignored. With a [`timeout`](Self::timeout) the future
    /// resolves to [`BusError::Timeout`](crate::BusError::Timeout) if nothing
    /// matched in time.
    ///
    /// # Panics
    ///
    /// With a timeout set, polling the returned future outside a tokio runtime
    /// panics (the deadline is a `tokio::time::Sleep`).
    pub fn once(&self) -> Once<T> {
        let (tx, rx) = oneshot::channel::<Event<T>>();
        let slot = Arc::new(Mutex::new(Some(tx)));

        let send_slot = Arc::clone(&slot);
        let action: Action<T> = Arc::new(move |ev: &Event<T>| {
            let tx = send_slot
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .take();
            if let Some(tx) = tx {
                let _ = tx.send(ev.clone());
            }
        });
        let on_close: CloseHook = Box::new(move || {
            drop(slot.lock().unwrap_or_else(PoisonError::into_inner).take());
        });

        let listener = self
            .bus
            .add_listener(self.filters(), action, self.priority, true, Some(on_close));
        Once::new(rx, listener, self.timeout)
    }
}

impl<T: DynPayload + Send + Sync + 'static> Filter<T> {
    /// Requires a payload whose runtime type is `R`.
    #[must_use]
    pub fn of_type<R: Any>(mut self) -> Self {
        self.type_check = Some(Arc::new(|data: &T| data.is::<R>()));
        self
    }
}

impl<T> Clone for Filter<T> {
    fn clone(&self) -> Self {
        Self {
            bus: self.bus.clone(),
            key: self.key.clone(),
            flag: self.flag,
            type_check: self.type_check.clone(),
            predicates: self.predicates.clone(),
            timeout: self.timeout,
            priority: self.priority,
        }
    }
}

impl<T> fmt::Debug for Filter<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Filter")
            .field("bus", &self.bus.name())
            .field("key", &self.key)
            .field("flag", &self.flag)
            .field("typed", &self.type_check.is_some())
            .field("predicates", &self.predicates.len())
            .field("timeout", &self.timeout)
            .field("priority", &self.priority)
            .finish()
    }
}
