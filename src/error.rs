//! Error types used by the bus and its one-shot awaits.
//!
//! This module defines two enums:
//!
//! - [`BusError`]: outcomes of awaiting a bus ([`Once`](crate::Once), [`Bus::get`](crate::Bus::get))
//!   and rejected re-parenting ([`Bus::set_upstream`](crate::Bus::set_upstream)).
//! - [`DispatchError`]: faults caught at the boundary of a dispatch task and
//!   handed to the [`Report`](crate::Report) collaborator.
//!
//! Both provide `as_label` for logs/metrics. Nothing here is ever returned from
//! `publish`: publishing on a closed bus is a silent no-op and dispatch faults
//! are reported, not propagated.

use std::any::Any;
use std::time::Duration;

use thiserror::Error;

/// # Errors produced while awaiting or wiring a bus.
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BusError {
    /// No matching event arrived within the configured timeout.
    #[error("no matching event within {timeout:?}")]
    Timeout {
        /// The timeout that elapsed.
        timeout: Duration,
    },

    /// The listener was closed (directly or by closing its bus) before a match,
    /// or a closed bus was asked to take a new upstream.
    #[error("listener closed before a matching event arrived")]
    Closed,

    /// Re-parenting would make a bus its own ancestor.
    #[error("bus '{bus}' cannot take '{upstream}' as upstream: it is one of its descendants")]
    Cycle {
        /// Bus being re-parented.
        bus: String,
        /// Rejected upstream.
        upstream: String,
    },
}

impl BusError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    ///
    /// # Example
    /// ```
    /// use flowbus::BusError;
    /// use std::time::Duration;
    ///
    /// let err = BusError::Timeout { timeout: Duration::from_secs(1) };
    /// assert_eq!(err.as_label(), "bus_timeout");
    /// ```
    pub fn as_label(&self) -> &'static str {
        match self {
            BusError::Timeout { .. } => "bus_timeout",
            BusError::Closed => "bus_closed",
            BusError::Cycle { .. } => "bus_cycle",
        }
    }

    /// True for the timeout outcome, which is expected rather than a fault.
    pub fn is_timeout(&self) -> bool {
        matches!(self, BusError::Timeout { .. })
    }
}

/// # Faults caught at a dispatch task boundary.
///
/// A panic raised by a listener action or by a derived bus's transform aborts
/// the rest of that task (remaining listeners and downstream propagation) and
/// is reported once.
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DispatchError {
    /// A listener or transform panicked while handling an event.
    #[error("dispatch of event #{sequence} on bus '{bus}' panicked: {message}")]
    Panicked {
        /// Bus whose task was aborted.
        bus: String,
        /// Sequence number of the event being dispatched.
        sequence: u64,
        /// Panic payload rendered as text.
        message: String,
    },
}

impl DispatchError {
    pub(crate) fn from_panic(bus: &str, sequence: u64, payload: Box<dyn Any + Send>) -> Self {
        DispatchError::Panicked {
            bus: bus.to_string(),
            sequence,
            message: panic_message(payload.as_ref()),
        }
    }

    /// Returns a short stable label (snake_case) for use in logs/metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            DispatchError::Panicked { .. } => "dispatch_panicked",
        }
    }

    /// Sequence number of the event whose dispatch failed.
    pub fn sequence(&self) -> u64 {
        match self {
            DispatchError::Panicked { sequence, .. } => *sequence,
        }
    }
}

/// Renders a panic payload (`&str` or `String` in practice).
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
