//! Type-erased edges of the derivation graph.
//!
//! A parent `Bus<I>` stores its children as `Arc<dyn Downstream<I>>`, hiding
//! each child's payload type. The edge owns the child (strong reference) and
//! carries the child's transform. The child points back through a weak
//! [`Upstream`] handle used for re-parenting, cycle checks and detachment.

use std::sync::{Arc, Weak};

use super::bus::{Bus, BusInner};
use crate::events::Event;
use crate::executor::Executor;

/// Function a derived bus applies to each event coming from its upstream.
pub(crate) type Transform<I, T> = Arc<dyn Fn(&Event<I>) -> Option<Event<T>> + Send + Sync>;

/// Parent-side view of a child bus.
pub(crate) trait Downstream<I>: Send + Sync {
    /// Id of the child bus.
    fn child_id(&self) -> u64;

    /// Applies the transform and delivers the result to the child.
    ///
    /// `origin` is the executor running the parent's task. A child on the
    /// same executor is dispatched inline; otherwise it gets its own task.
    fn propagate(&self, event: &Event<I>, origin: &Arc<dyn Executor>);

    /// Closes the child and its own descendants.
    fn close(&self);
}

/// Child-side view of its parent.
pub(crate) trait Upstream: Send + Sync {
    fn name(&self) -> Option<String>;

    /// True if the parent, or any of its ancestors, has id `bus_id`.
    fn reaches(&self, bus_id: u64) -> bool;

    /// Removes the child with `child_id` from the parent's downstream set.
    fn detach(&self, child_id: u64);
}

pub(crate) struct Link<I, T> {
    child: Bus<T>,
    transform: Transform<I, T>,
}

impl<I, T> Link<I, T> {
    pub(crate) fn new(child: Bus<T>, transform: Transform<I, T>) -> Self {
        Self { child, transform }
    }
}

impl<I, T> Downstream<I> for Link<I, T>
where
    I: Send + Sync + 'static,
    T: Send + Sync + 'static,
{
    fn child_id(&self) -> u64 {
        self.child.id()
    }

    fn propagate(&self, event: &Event<I>, origin: &Arc<dyn Executor>) {
        if !self.child.is_active() {
            return;
        }
        let Some(derived) = (self.transform)(event) else {
            return;
        };
        if same_executor(origin, self.child.executor()) {
            self.child.dispatch(&derived);
        } else {
            self.child.accept(derived);
        }
    }

    fn close(&self) {
        self.child.close_self();
    }
}

pub(crate) struct UpstreamRef<I> {
    parent: Weak<BusInner<I>>,
}

impl<I> UpstreamRef<I> {
    pub(crate) fn new(parent: &Bus<I>) -> Self {
        Self {
            parent: parent.downgrade(),
        }
    }
}

impl<I: Send + Sync + 'static> Upstream for UpstreamRef<I> {
    fn name(&self) -> Option<String> {
        self.parent.upgrade().map(|p| p.name().to_string())
    }

    fn reaches(&self, bus_id: u64) -> bool {
        match self.parent.upgrade() {
            Some(parent) => parent.id() == bus_id || parent.upstream_reaches(bus_id),
            None => false,
        }
    }

    fn detach(&self, child_id: u64) {
        if let Some(parent) = self.parent.upgrade() {
            parent.remove_downstream(child_id);
        }
    }
}

fn same_executor(a: &Arc<dyn Executor>, b: &Arc<dyn Executor>) -> bool {
    std::ptr::eq(
        Arc::as_ptr(a) as *const (),
        Arc::as_ptr(b) as *const (),
    )
}
