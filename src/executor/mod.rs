//! # Executors: where dispatch tasks run.
//!
//! A bus never runs listeners on the publisher's stack by itself; it hands one
//! job per accepted event to an [`Executor`]. Submission is fire-and-forget:
//! the bus never inspects completion.
//!
//! ## Implementations
//! - [`DirectExecutor`] runs the job inline on the submitting thread. Delivery
//!   is synchronous and ordered; used in debug builds and tests.
//! - [`WorkerPool`] a fixed number of tokio worker tasks draining one shared
//!   queue. With more than one worker, two publishes on the same bus may be
//!   dispatched out of sequence order.
//!
//! ```text
//!   Bus::accept(ev) ──► Executor::submit(job)
//!                            │
//!            ┌───────────────┴────────────────┐
//!            ▼                                ▼
//!     DirectExecutor                      WorkerPool
//!     job() inline                 [queue] ─► worker 1..N ─► job()
//! ```

mod direct;
mod pool;

pub use direct::DirectExecutor;
pub use pool::WorkerPool;

/// Unit of work submitted by a bus.
pub type Job = Box<dyn FnOnce() + Send + 'static>;

/// Schedulable work queue.
///
/// Submitting guarantees eventual execution on one of the executor's workers.
/// No ordering is promised across jobs unless the implementation serializes
/// them.
pub trait Executor: Send + Sync + 'static {
    /// Schedules `job` for execution.
    fn submit(&self, job: Job);

    /// Human-readable name (for logs).
    fn name(&self) -> &'static str {
        std::any::type_name::<Self>()
    }
}
