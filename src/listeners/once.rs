//! # One-shot awaits
//!
//! [`Once`] is the future returned by [`Filter::once`](crate::Filter::once).
//!
//! ## State machine
//! ```text
//!   Waiting ──first match──► Completed   → Ok(event)
//!   Waiting ──deadline─────► TimedOut    → Err(BusError::Timeout)
//!   Waiting ──closed───────► Closed      → Err(BusError::Closed)
//! ```
//! Every terminal state closes the underlying one-shot listener. Dropping an
//! unresolved `Once` closes it too.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use tokio::sync::oneshot;
use tokio::time::{Instant, Sleep};

use super::listener::Listener;
use crate::error::BusError;
use crate::events::Event;

/// Future resolving with the first event that satisfies a filter.
#[must_use = "a Once does nothing unless awaited; dropping it closes its listener"]
pub struct Once<T> {
    rx: oneshot::Receiver<Event<T>>,
    listener: Listener<T>,
    timeout: Option<(Duration, Instant)>,
    sleep: Option<Pin<Box<Sleep>>>,
}

impl<T> Once<T> {
    pub(crate) fn new(
        rx: oneshot::Receiver<Event<T>>,
        listener: Listener<T>,
        timeout: Option<Duration>,
    ) -> Self {
        Self {
            rx,
            listener,
            timeout: timeout.map(|d| (d, Instant::now() + d)),
            sleep: None,
        }
    }

    /// The one-shot listener backing this await.
    pub fn listener(&self) -> &Listener<T> {
        &self.listener
    }
}

impl<T> Future for Once<T> {
    type Output = Result<Event<T>, BusError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();

        match Pin::new(&mut this.rx).poll(cx) {
            Poll::Ready(Ok(ev)) => return Poll::Ready(Ok(ev)),
            Poll::Ready(Err(_)) => return Poll::Ready(Err(BusError::Closed)),
            Poll::Pending => {}
        }

        let Some((timeout, deadline)) = this.timeout else {
            return Poll::Pending;
        };
        let sleep = this
            .sleep
            .get_or_insert_with(|| Box::pin(tokio::time::sleep_until(deadline)));
        if sleep.as_mut().poll(cx).is_pending() {
            return Poll::Pending;
        }

        this.listener.close();
        // A match may have landed between the first poll and the close.
        match this.rx.try_recv() {
            Ok(ev) => Poll::Ready(Ok(ev)),
            Err(_) => Poll::Ready(Err(BusError::Timeout { timeout })),
        }
    }
}

impl<T> Drop for Once<T> {
    fn drop(&mut self) {
        self.listener.close();
    }
}
