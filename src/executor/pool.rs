//! # WorkerPool: fixed-size tokio worker pool
//!
//! [`WorkerPool`] spawns `N` worker tasks that pull jobs from one shared,
//! unbounded queue. `submit` never blocks; there is no backpressure beyond
//! what the runtime provides.
//!
//! ## What it guarantees
//! - Every job submitted before [`WorkerPool::shutdown`] is executed.
//! - A panicking job is contained: it is logged and the worker keeps going.
//! - With `workers == 1` jobs run one at a time in submission order.
//!
//! ## What it does **not** guarantee
//! - No ordering across jobs when `workers > 1`.
//!
//! ## Diagram
//! ```text
//!   submit(job) ──► [unbounded queue] ──┬──► worker 1 ─► job()
//!                                       ├──► worker 2 ─► job()
//!                                       └──► worker N ─► job()
//! ```

use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, PoisonError};

use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::{Executor, Job};
use crate::error::panic_message;

type SharedReceiver = Arc<tokio::sync::Mutex<mpsc::UnboundedReceiver<Job>>>;

/// Fixed-size pool of tokio worker tasks.
pub struct WorkerPool {
    sender: Mutex<Option<mpsc::UnboundedSender<Job>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    token: CancellationToken,
    size: usize,
}

impl WorkerPool {
    /// Creates a pool on the current tokio runtime.
    ///
    /// # Panics
    ///
    /// Panics if called outside a tokio runtime.
    #[must_use]
    pub fn new(workers: usize) -> Self {
        Self::with_handle(&Handle::current(), workers)
    }

    /// Creates a pool on the current runtime, or `None` when there is none.
    #[must_use]
    pub fn try_current(workers: usize) -> Option<Self> {
        Handle::try_current()
            .ok()
            .map(|handle| Self::with_handle(&handle, workers))
    }

    /// Creates a pool whose workers are spawned on `handle`.
    ///
    /// `workers` is clamped to a minimum of 1.
    #[must_use]
    pub fn with_handle(handle: &Handle, workers: usize) -> Self {
        let size = workers.max(1);
        let (tx, rx) = mpsc::unbounded_channel::<Job>();
        let rx: SharedReceiver = Arc::new(tokio::sync::Mutex::new(rx));
        let token = CancellationToken::new();

        let handles = (0..size)
            .map(|id| handle.spawn(worker_loop(id, Arc::clone(&rx), token.clone())))
            .collect();

        tracing::debug!(workers = size, "worker pool started");
        Self {
            sender: Mutex::new(Some(tx)),
            workers: Mutex::new(handles),
            token,
            size,
        }
    }

    /// Number of workers.
    #[must_use]
    pub fn size(&self) -> usize {
        self.size
    }

    /// True once [`shutdown`](Self::shutdown) or [`cancel`](Self::cancel) was called.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.token.is_cancelled() || self.lock_sender().is_none()
    }

    /// Graceful shutdown: closes the queue, lets workers drain it, and awaits them.
    pub async fn shutdown(&self) {
        drop(self.lock_sender().take());
        self.join_workers().await;
    }

    /// Stops workers without draining; queued jobs are dropped.
    pub async fn cancel(&self) {
        self.token.cancel();
        drop(self.lock_sender().take());
        self.join_workers().await;
    }

    async fn join_workers(&self) {
        let handles: Vec<_> = std::mem::take(
            &mut *self.workers.lock().unwrap_or_else(PoisonError::into_inner),
        );
        for h in handles {
            let _ = h.await;
        }
        tracing::debug!(workers = self.size, "worker pool stopped");
    }

    fn lock_sender(&self) -> std::sync::MutexGuard<'_, Option<mpsc::UnboundedSender<Job>>> {
        self.sender.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Executor for WorkerPool {
    fn submit(&self, job: Job) {
        let sent = match self.lock_sender().as_ref() {
            Some(tx) => tx.send(job).is_ok(),
            None => false,
        };
        if !sent {
            tracing::debug!("worker pool closed; job dropped");
        }
    }

    fn name(&self) -> &'static str {
        "worker-pool"
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

async fn worker_loop(id: usize, rx: SharedReceiver, token: CancellationToken) {
    loop {
        let job = {
            let mut rx = rx.lock().await;
            tokio::select! {
                biased;
                _ = token.cancelled() => None,
                job = rx.recv() => job,
            }
        };
        let Some(job) = job else { break };

        if let Err(panic) = std::panic::catch_unwind(AssertUnwindSafe(job)) {
            tracing::warn!(
                worker = id,
                panic = %panic_message(panic.as_ref()),
                "job panicked"
            );
        }
    }
}
