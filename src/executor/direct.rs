//! # DirectExecutor
//!
//! Runs every job synchronously on the caller's thread, so `publish` returns
//! only after local dispatch and same-executor propagation completed.

use super::{Executor, Job};

/// Caller-thread executor.
#[derive(Debug, Default, Clone, Copy)]
pub struct DirectExecutor;

impl DirectExecutor {
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl Executor for DirectExecutor {
    #[inline]
    fn submit(&self, job: Job) {
        job();
    }

    fn name(&self) -> &'static str {
        "direct"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn runs_inline() {
        let hits = Arc::new(AtomicUsize::new(0));
        let h = Arc::clone(&hits);
        DirectExecutor.submit(Box::new(move || {
            h.fetch_add(1, Ordering::SeqCst);
        }));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }
}
