//! # TracingReporter: default reporter
//!
//! Emits one `tracing` error per failed dispatch task.
//!
//! ## Example output
//! ```text
//! ERROR flowbus::report::log: dispatch task failed bus="orders" sequence=12 kind="dispatch_panicked" error=dispatch of event #12 on bus 'orders' panicked: boom
//! ```

use crate::error::DispatchError;
use crate::report::Report;

/// Reporter writing to `tracing` at `ERROR` level.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingReporter;

impl TracingReporter {
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl Report for TracingReporter {
    fn report(&self, context: &str, error: &DispatchError) {
        tracing::error!(
            bus = context,
            sequence = error.sequence(),
            kind = error.as_label(),
            error = %error,
            "dispatch task failed"
        );
    }

    fn name(&self) -> &'static str {
        "tracing"
    }
}
