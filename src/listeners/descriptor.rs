//! # Subscriber descriptors
//!
//! A [`Descriptor`] is a `{key, flag_mask, flag_mode, handler}` tuple describing
//! one handler of a subscriber object. [`Bus::register`](crate::Bus::register)
//! folds a list of them into a single composite listener.
//!
//! Descriptors are produced explicitly, either by hand or by implementing
//! [`Subscriber`] on the object that owns the handlers.
//!
//! ## Matching
//! ```text
//! key:  descriptor Some(k)  ─► event key == k
//!       descriptor None     ─► event key absent or ""
//! flag: test_flag(event.flag, flag_mask, flag_mode)
//! ```
//!
//! ## Example
//! ```rust
//! use std::sync::Arc;
//! use flowbus::{Bus, Config, Descriptor, Event, FlagMode, Subscriber};
//!
//! struct Audit;
//!
//! impl Subscriber<String> for Audit {
//!     fn descriptors(self: &Arc<Self>) -> Vec<Descriptor<String>> {
//!         vec![
//!             Descriptor::new(|ev: &Event<String>| { let _ = ev.data(); })
//!                 .with_key("login"),
//!             Descriptor::new(|_: &Event<String>| {})
//!                 .with_key("logout")
//!                 .with_flag(0b01, FlagMode::BitwiseOr),
//!         ]
//!     }
//! }
//!
//! let bus: Bus<String> = Bus::builder("audit").with_config(Config::direct()).build();
//! let listener = bus.register_subscriber(&Arc::new(Audit));
//! assert!(listener.is_some());
//! ```

use std::fmt;
use std::sync::Arc;

use super::listener::Action;
use crate::events::{test_flag, Event, FlagMode, FLAG_ALL};

/// One handler of a subscriber, with its routing requirements.
pub struct Descriptor<T> {
    /// Required event key; `None` only matches events without a key (or with
    /// an empty one).
    pub key: Option<String>,
    /// Mask compared with the event flag.
    pub flag_mask: u64,
    /// Comparison used for `flag_mask`.
    pub flag_mode: FlagMode,
    /// Invoked for every matching event.
    pub handler: Action<T>,
}

impl<T> Descriptor<T> {
    /// Keyless descriptor matching any event that has at least one flag bit set
    /// (`FLAG_ALL` under [`FlagMode::BitwiseOr`]).
    pub fn new(handler: impl Fn(&Event<T>) + Send + Sync + 'static) -> Self {
        Self {
            key: None,
            flag_mask: FLAG_ALL,
            flag_mode: FlagMode::BitwiseOr,
            handler: Arc::new(handler),
        }
    }

    #[must_use]
    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.key = Some(key.into());
        self
    }

    #[must_use]
    pub fn with_flag(mut self, mask: u64, mode: FlagMode) -> Self {
        self.flag_mask = mask;
        self.flag_mode = mode;
        self
    }

    /// Key and flag test for `event`.
    pub fn matches(&self, event: &Event<T>) -> bool {
        let key_ok = match (self.key.as_deref(), event.key()) {
            (Some(want), Some(got)) => want == got,
            (Some(_), None) => false,
            (None, got) => got.map_or(true, str::is_empty),
        };
        key_ok && test_flag(event.flag(), self.flag_mask, self.flag_mode)
    }
}

impl<T> Clone for Descriptor<T> {
    fn clone(&self) -> Self {
        Self {
            key: self.key.clone(),
            flag_mask: self.flag_mask,
            flag_mode: self.flag_mode,
            handler: Arc::clone(&self.handler),
        }
    }
}

impl<T> fmt::Debug for Descriptor<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Descriptor")
            .field("key", &self.key)
            .field("flag_mask", &format_args!("{:#b}", self.flag_mask))
            .field("flag_mode", &self.flag_mode)
            .finish()
    }
}

/// An object that declares its own handlers.
///
/// Stands in for attribute scanning: implementors list their descriptors
/// explicitly, usually capturing a clone of `self` in each handler.
pub trait Subscriber<T>: Send + Sync + 'static {
    fn descriptors(self: &Arc<Self>) -> Vec<Descriptor<T>>;
}
