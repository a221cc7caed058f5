//! # Error reporting for dispatch tasks.
//!
//! Faults inside a dispatch task never reach the publisher. They are caught once
//! at the task boundary and handed to the bus's [`Report`] implementation.
//!
//! ## Implementing a reporter
//! ```rust
//! use flowbus::{DispatchError, Report};
//!
//! struct Counter(std::sync::atomic::AtomicUsize);
//!
//! impl Report for Counter {
//!     fn report(&self, _context: &str, _error: &DispatchError) {
//!         self.0.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
//!     }
//! }
//! ```

mod log;

pub use log::TracingReporter;

use crate::error::DispatchError;

/// Contract for the error-reporting collaborator.
///
/// Called from whatever thread ran the failed task; keep it cheap.
pub trait Report: Send + Sync + 'static {
    /// Reports one failed dispatch task. `context` is the name of the bus whose
    /// task failed.
    fn report(&self, context: &str, error: &DispatchError);

    /// Human-readable name (for logs).
    fn name(&self) -> &'static str {
        std::any::type_name::<Self>()
    }
}
