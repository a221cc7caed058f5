//! # Bus: a node of the derivation graph.
//!
//! A [`Bus`] is both a publication point and, when derived, a subscriber to its
//! upstream. It owns its listeners, its downstream buses, an event
//! [`Factory`], an [`Executor`] and a [`Report`] collaborator.
//!
//! ## Publication flow
//! ```text
//! publish(key, flag, data)
//!   └─► Factory::next ──► accept(ev) ──► Executor::submit(task)
//!
//! task (one per accepted event, panics caught once here):
//!   1. listeners: snapshot ─► sort (priority desc, registration asc)
//!        for each active listener, until ev.is_cancelled():
//!          test(ev) ─► accept(ev)
//!   2. downstream: snapshot; for each child link:
//!        transform(ev) ─► Some(ev') ─► child.dispatch(ev')   (same executor)
//!                                  └─► child.accept(ev')     (other executor)
//!   3. panic ─► Report::report(bus name, DispatchError)
//! ```
//!
//! ## Rules
//! - `publish` on a closed bus is a no-op returning `None`.
//! - Cancelling an event stops **local** delivery only; downstream buses still
//!   receive it (cancelled flag included).
//! - Derived events inherit the cancelled flag, so listeners of a child bus
//!   never see an event cancelled upstream. Only the child's transform (and
//!   through it, `peek`) observes it.
//! - The first panic aborts the rest of the task (remaining listeners and
//!   propagation). Callers needing isolation between listeners wrap their
//!   own actions.
//! - A bus owns its derived buses. They stay alive as long as their parent
//!   does; only `close()` detaches them.
//! - Delivery order across two publishes is only guaranteed when the executor
//!   serializes tasks (direct executor, or a one-worker pool). Sequence numbers
//!   exist for auditing, not for ordering.

use std::any::Any;
use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{
    Arc, Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard, Weak,
};

use futures::FutureExt;

use super::builder::BusBuilder;
use super::link::{Downstream, Link, Transform, Upstream, UpstreamRef};
use crate::error::{BusError, DispatchError};
use crate::events::{DynPayload, Event, Factory};
use crate::executor::Executor;
use crate::listeners::{
    Action, CloseHook, Descriptor, Filter, Listener, Requirement, Subscriber,
};
use crate::report::Report;

/// Source of bus ids (used for generated names and downstream bookkeeping).
static BUS_IDS: AtomicU64 = AtomicU64::new(0);

/// Serializes `set_upstream` so the cycle check and the rewiring it guards
/// happen as one step.
static REWIRE: Mutex<()> = Mutex::new(());

pub(crate) struct BusInner<T> {
    id: u64,
    name: Arc<str>,
    active: AtomicBool,
    listeners: RwLock<Vec<Listener<T>>>,
    downstream: Mutex<Vec<Arc<dyn Downstream<T>>>>,
    upstream: Mutex<Option<Arc<dyn Upstream>>>,
    next_listener: AtomicU64,
    factory: Factory<T>,
    executor: Arc<dyn Executor>,
    reporter: Arc<dyn Report>,
}

impl<T> BusInner<T> {
    pub(crate) fn id(&self) -> u64 {
        self.id
    }

    pub(crate) fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn remove_listener(&self, listener_id: u64) {
        self.write_listeners().retain(|l| l.id() != listener_id);
    }

    pub(crate) fn remove_downstream(&self, child_id: u64) {
        self.lock_downstream().retain(|d| d.child_id() != child_id);
    }

    pub(crate) fn upstream_reaches(&self, bus_id: u64) -> bool {
        let upstream = self.lock_upstream().clone();
        upstream.is_some_and(|u| u.reaches(bus_id))
    }

    fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    fn read_listeners(&self) -> RwLockReadGuard<'_, Vec<Listener<T>>> {
        self.listeners.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_listeners(&self) -> RwLockWriteGuard<'_, Vec<Listener<T>>> {
        self.listeners.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_downstream(&self) -> MutexGuard<'_, Vec<Arc<dyn Downstream<T>>>> {
        self.downstream.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_upstream(&self) -> MutexGuard<'_, Option<Arc<dyn Upstream>>> {
        self.upstream.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Hierarchical publish/subscribe node.
///
/// Cloning is cheap; clones share the same node.
///
/// ## Example
/// ```rust
/// use std::sync::{Arc, Mutex};
/// use flowbus::{Bus, Config};
///
/// let root: Bus<u32> = Bus::builder("numbers").with_config(Config::direct()).build();
/// let big = root.filter_data(|v| *v > 10);
///
/// let seen = Arc::new(Mutex::new(Vec::new()));
/// let sink = Arc::clone(&seen);
/// big.subscribe_data(move |v| sink.lock().unwrap().push(*v));
///
/// root.publish(5);
/// root.publish(20);
/// assert_eq!(*seen.lock().unwrap(), vec![20]);
///
/// root.close();
/// assert!(!big.is_active());
/// ```
pub struct Bus<T> {
    inner: Arc<BusInner<T>>,
}

impl<T> Bus<T> {
    pub(crate) fn from_inner(inner: Arc<BusInner<T>>) -> Self {
        Self { inner }
    }

    pub(crate) fn from_parts(
        name: Option<String>,
        factory: Factory<T>,
        executor: Arc<dyn Executor>,
        reporter: Arc<dyn Report>,
    ) -> Self {
        let id = BUS_IDS.fetch_add(1, Ordering::Relaxed);
        let name: Arc<str> = match name {
            Some(name) => name.into(),
            None => format!("bus-{id}").into(),
        };
        tracing::debug!(bus = %name, executor = executor.name(), "bus created");
        Self {
            inner: Arc::new(BusInner {
                id,
                name,
                active: AtomicBool::new(true),
                listeners: RwLock::new(Vec::new()),
                downstream: Mutex::new(Vec::new()),
                upstream: Mutex::new(None),
                next_listener: AtomicU64::new(0),
                factory,
                executor,
                reporter,
            }),
        }
    }

    pub(crate) fn id(&self) -> u64 {
        self.inner.id
    }

    pub(crate) fn downgrade(&self) -> Weak<BusInner<T>> {
        Arc::downgrade(&self.inner)
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// False once the bus has been closed.
    pub fn is_active(&self) -> bool {
        self.inner.is_active()
    }

    /// Executor running this bus's dispatch tasks.
    pub fn executor(&self) -> &Arc<dyn Executor> {
        &self.inner.executor
    }

    /// Factory stamping this bus's events.
    pub fn factory(&self) -> &Factory<T> {
        &self.inner.factory
    }

    /// Number of registered (not yet closed) listeners.
    pub fn listener_count(&self) -> usize {
        self.inner.read_listeners().len()
    }

    /// Number of buses derived from this one.
    pub fn downstream_count(&self) -> usize {
        self.inner.lock_downstream().len()
    }

    /// Name of the upstream bus, if this bus is derived and its parent is alive.
    pub fn upstream_name(&self) -> Option<String> {
        let upstream = self.inner.lock_upstream().clone();
        upstream.and_then(|u| u.name())
    }
}

impl<T: Send + Sync + 'static> Bus<T> {
    /// Builder for a root bus.
    pub fn builder(name: impl Into<String>) -> BusBuilder<T> {
        BusBuilder::new(name)
    }

    /// Root bus with default configuration.
    pub fn root(name: impl Into<String>) -> Self {
        BusBuilder::new(name).build()
    }

    /// Root bus with a generated name and default configuration.
    pub fn new() -> Self {
        BusBuilder::anonymous().build()
    }

    // ---- publication ----

    /// Publishes `data` without key or flag.
    pub fn publish(&self, data: T) -> Option<Event<T>> {
        self.stamp(None, None, Some(data))
    }

    /// Publishes `data` with an optional routing key and flag.
    pub fn publish_with(&self, key: Option<&str>, flag: Option<u64>, data: T) -> Option<Event<T>> {
        self.stamp(key, flag, Some(data))
    }

    /// Publishes an event without payload.
    pub fn emit(&self, key: Option<&str>, flag: Option<u64>) -> Option<Event<T>> {
        self.stamp(key, flag, None)
    }

    fn stamp(&self, key: Option<&str>, flag: Option<u64>, data: Option<T>) -> Option<Event<T>> {
        if !self.is_active() {
            return None;
        }
        let event = self.inner.factory.next(data, key, flag);
        tracing::trace!(bus = %self.inner.name, sequence = event.sequence(), "publish");
        self.accept(event.clone());
        Some(event)
    }

    /// Schedules delivery of `event` on this bus's executor.
    ///
    /// Returns immediately unless the executor is direct. No-op on a closed bus.
    pub fn accept(&self, event: Event<T>) {
        if !self.is_active() {
            return;
        }
        let bus = self.clone();
        self.inner
            .executor
            .submit(Box::new(move || bus.run_task(event)));
    }

    fn run_task(&self, event: Event<T>) {
        let outcome = std::panic::catch_unwind(AssertUnwindSafe(|| self.dispatch(&event)));
        if let Err(panic) = outcome {
            let error = DispatchError::from_panic(&self.inner.name, event.sequence(), panic);
            self.inner.reporter.report(&self.inner.name, &error);
        }
    }

    /// Local delivery followed by downstream propagation, on the current thread.
    pub(crate) fn dispatch(&self, event: &Event<T>) {
        if !self.is_active() {
            return;
        }

        let mut listeners: Vec<Listener<T>> = self.inner.read_listeners().clone();
        listeners.sort_by(Listener::cmp_priority);
        for listener in &listeners {
            if event.is_cancelled() {
                tracing::trace!(
                    bus = %self.inner.name,
                    sequence = event.sequence(),
                    "event cancelled; local dispatch stopped"
                );
                break;
            }
            if listener.is_active() && listener.test(event) {
                listener.accept(event);
            }
        }

        let children: Vec<Arc<dyn Downstream<T>>> = self.inner.lock_downstream().clone();
        for child in &children {
            child.propagate(event, &self.inner.executor);
        }
    }

    // ---- registration ----

    pub(crate) fn add_listener(
        &self,
        requirement: Requirement<T>,
        action: Action<T>,
        priority: i32,
        one_shot: bool,
        on_close: Option<CloseHook>,
    ) -> Listener<T> {
        let id = self.inner.next_listener.fetch_add(1, Ordering::Relaxed);
        let listener = Listener::new(
            id,
            self.downgrade(),
            requirement,
            action,
            priority,
            one_shot,
            on_close,
        );

        let registered = {
            let mut listeners = self.inner.write_listeners();
            if self.is_active() {
                listeners.push(listener.clone());
                true
            } else {
                false
            }
        };
        if !registered {
            listener.close();
        }
        listener
    }

    /// Unconditional listener receiving every event.
    pub fn subscribe(&self, action: impl Fn(&Event<T>) + Send + Sync + 'static) -> Listener<T> {
        self.listen().subscribe(action)
    }

    /// Unconditional listener receiving every payload.
    pub fn subscribe_data(&self, action: impl Fn(&T) + Send + Sync + 'static) -> Listener<T> {
        self.listen().subscribe_data(action)
    }

    /// Fresh [`Filter`] scoped to this bus.
    pub fn listen(&self) -> Filter<T> {
        Filter::new(self.clone())
    }

    /// Folds `descriptors` into one composite listener.
    ///
    /// For each event, every descriptor whose key and flag match has its
    /// handler invoked, in list order. Returns `None` for an empty list.
    pub fn register(&self, descriptors: Vec<Descriptor<T>>) -> Option<Listener<T>> {
        if descriptors.is_empty() {
            return None;
        }
        let descriptors: Arc<[Descriptor<T>]> = descriptors.into();

        let wanted = Arc::clone(&descriptors);
        let requirement: Requirement<T> =
            Arc::new(move |ev: &Event<T>| wanted.iter().any(|d| d.matches(ev)));
        let action: Action<T> = Arc::new(move |ev: &Event<T>| {
            for d in descriptors.iter().filter(|d| d.matches(ev)) {
                (d.handler)(ev);
            }
        });
        Some(self.add_listener(requirement, action, 0, false, None))
    }

    /// Registers every descriptor declared by `subscriber`.
    pub fn register_subscriber<S: Subscriber<T>>(&self, subscriber: &Arc<S>) -> Option<Listener<T>> {
        self.register(subscriber.descriptors())
    }

    /// Resolves with the payload of the next event that carries one.
    pub fn get(&self) -> impl Future<Output = Result<T, BusError>> + Send + 'static
    where
        T: Clone,
    {
        self.listen()
            .predicate(|ev: &Event<T>| ev.has_data())
            .once()
            .map(|res| res.and_then(|ev| ev.data().cloned().ok_or(BusError::Closed)))
    }

    // ---- derivation ----

    /// Derived bus receiving `transform(ev)` for every event of this bus.
    /// `None` from the transform drops the event for the child.
    pub fn map<R: Send + Sync + 'static>(
        &self,
        transform: impl Fn(&Event<T>) -> Option<Event<R>> + Send + Sync + 'static,
    ) -> Bus<R> {
        self.derive("map", Arc::new(transform))
    }

    /// Derived bus forwarding only events satisfying `predicate`.
    pub fn filter(&self, predicate: impl Fn(&Event<T>) -> bool + Send + Sync + 'static) -> Bus<T> {
        self.filter_named("filter", predicate)
    }

    /// Derived bus carrying `f(data)`; events without payload, or for which `f`
    /// yields `None`, are dropped.
    pub fn map_data<R: Send + Sync + 'static>(
        &self,
        f: impl Fn(&T) -> Option<R> + Send + Sync + 'static,
    ) -> Bus<R> {
        self.derive(
            "map_data",
            Arc::new(move |ev: &Event<T>| ev.with_data(f(ev.data()?)?)),
        )
    }

    /// Derived bus forwarding events whose payload satisfies `predicate`.
    pub fn filter_data(&self, predicate: impl Fn(&T) -> bool + Send + Sync + 'static) -> Bus<T> {
        self.filter_named("filter_data", move |ev| ev.data().is_some_and(&predicate))
    }

    /// Derived bus that runs `side_effect` and forwards the event unchanged.
    pub fn peek(&self, side_effect: impl Fn(&Event<T>) + Send + Sync + 'static) -> Bus<T> {
        self.filter_named("peek", move |ev| {
            side_effect(ev);
            true
        })
    }

    /// Like [`peek`](Self::peek) but on the payload, when present.
    pub fn peek_data(&self, side_effect: impl Fn(&T) + Send + Sync + 'static) -> Bus<T> {
        self.filter_named("peek_data", move |ev| {
            if let Some(data) = ev.data() {
                side_effect(data);
            }
            true
        })
    }

    /// Derived bus carrying only payloads whose runtime type is `R`, narrowed
    /// to `R`.
    pub fn flat_map<R>(&self) -> Bus<R>
    where
        T: DynPayload,
        R: Any + Clone + Send + Sync,
    {
        self.derive(
            "flat_map",
            Arc::new(|ev: &Event<T>| ev.with_data(ev.data()?.downcast_ref::<R>()?.clone())),
        )
    }

    fn filter_named(
        &self,
        op: &str,
        predicate: impl Fn(&Event<T>) -> bool + Send + Sync + 'static,
    ) -> Bus<T> {
        self.derive(
            op,
            Arc::new(move |ev: &Event<T>| predicate(ev).then(|| ev.clone())),
        )
    }

    fn derive<R: Send + Sync + 'static>(&self, op: &str, transform: Transform<T, R>) -> Bus<R> {
        let child = Bus::from_parts(
            Some(format!("{}/{op}", self.inner.name)),
            Factory::new(),
            Arc::clone(&self.inner.executor),
            Arc::clone(&self.inner.reporter),
        );
        child.wire_upstream(self, transform);
        child
    }

    /// Re-parents this bus under `parent`.
    ///
    /// Any previous upstream registration is replaced and this bus is removed
    /// from the old parent's downstream set. The new parent owns this bus from
    /// now on.
    ///
    /// Re-parenting calls are serialized process-wide, so two concurrent calls
    /// in opposite directions cannot both pass the cycle check.
    ///
    /// # Errors
    /// - [`BusError::Closed`] if this bus is closed.
    /// - [`BusError::Cycle`] if `parent` is this bus or one of its descendants.
    pub fn set_upstream<I: Send + Sync + 'static>(
        &self,
        parent: &Bus<I>,
        transform: impl Fn(&Event<I>) -> Option<Event<T>> + Send + Sync + 'static,
    ) -> Result<&Self, BusError> {
        let _rewire = REWIRE.lock().unwrap_or_else(PoisonError::into_inner);
        if !self.is_active() {
            return Err(BusError::Closed);
        }
        if parent.id() == self.id() || parent.inner.upstream_reaches(self.id()) {
            return Err(BusError::Cycle {
                bus: self.name().to_string(),
                upstream: parent.name().to_string(),
            });
        }
        self.wire_upstream(parent, Arc::new(transform));
        Ok(self)
    }

    /// [`set_upstream`](Self::set_upstream) that also rewrites event keys with
    /// `key_fn` on the way down. Keyless events stay keyless.
    pub fn set_upstream_with_keys<I: Send + Sync + 'static>(
        &self,
        parent: &Bus<I>,
        transform: impl Fn(&Event<I>) -> Option<Event<T>> + Send + Sync + 'static,
        key_fn: impl Fn(&str) -> String + Send + Sync + 'static,
    ) -> Result<&Self, BusError>
    where
        T: Clone,
    {
        self.set_upstream(parent, move |ev: &Event<I>| {
            let out = transform(ev)?;
            let key = out.key().map(&key_fn);
            Some(out.with_key(key))
        })
    }

    fn wire_upstream<I: Send + Sync + 'static>(&self, parent: &Bus<I>, transform: Transform<I, T>) {
        let upstream: Arc<dyn Upstream> = Arc::new(UpstreamRef::new(parent));
        let previous = self.inner.lock_upstream().replace(upstream);
        if let Some(previous) = previous {
            previous.detach(self.id());
        }
        tracing::debug!(bus = %self.inner.name, upstream = %parent.inner.name, "upstream set");
        parent.attach(Arc::new(Link::new(self.clone(), transform)));
        // Closed while wiring: a closed bus never stays in a downstream set.
        if !self.is_active() {
            parent.inner.remove_downstream(self.id());
        }
    }

    fn attach(&self, link: Arc<dyn Downstream<T>>) {
        let attached = {
            let mut downstream = self.inner.lock_downstream();
            if self.is_active() {
                downstream.push(Arc::clone(&link));
                true
            } else {
                false
            }
        };
        if !attached {
            // A closed parent closes whatever is derived from it.
            link.close();
        }
    }

    // ---- lifecycle ----

    /// Closes this bus, its listeners and every bus derived from it, then
    /// detaches it from its upstream. Idempotent.
    pub fn close(&self) {
        self.close_self();
        let upstream = self.inner.lock_upstream().take();
        if let Some(upstream) = upstream {
            upstream.detach(self.id());
        }
    }

    /// Like [`close`](Self::close) but leaves the upstream link in place.
    pub fn close_self(&self) {
        if !self.inner.active.swap(false, Ordering::AcqRel) {
            return;
        }
        let listeners = std::mem::take(&mut *self.inner.write_listeners());
        for listener in &listeners {
            listener.close();
        }
        let children = std::mem::take(&mut *self.inner.lock_downstream());
        for child in &children {
            child.close();
        }
        tracing::debug!(
            bus = %self.inner.name,
            listeners = listeners.len(),
            downstream = children.len(),
            "bus closed"
        );
    }
}

impl<T: Send + Sync + 'static> Default for Bus<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Clone for Bus<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> fmt::Debug for Bus<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Bus")
            .field("name", &self.inner.name)
            .field("active", &self.is_active())
            .field("listeners", &self.listener_count())
            .field("downstream", &self.downstream_count())
            .field("executor", &self.inner.executor.name())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::events::FlagMode;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    fn direct<T: Send + Sync + 'static>(name: &str) -> Bus<T> {
        Bus::builder(name).with_config(Config::direct()).build()
    }

    fn counter() -> (Arc<AtomicUsize>, impl Fn(&Event<u32>) + Send + Sync + 'static) {
        let hits = Arc::new(AtomicUsize::new(0));
        let h = Arc::clone(&hits);
        (hits, move |_: &Event<u32>| {
            h.fetch_add(1, Ordering::SeqCst);
        })
    }

    fn recorder<V: Send + 'static>() -> (Arc<Mutex<Vec<V>>>, Arc<Mutex<Vec<V>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        (Arc::clone(&seen), seen)
    }

    #[derive(Default)]
    struct Collect(Mutex<Vec<(String, DispatchError)>>);

    impl Report for Collect {
        fn report(&self, context: &str, error: &DispatchError) {
            self.0.lock().unwrap().push((context.to_string(), error.clone()));
        }
    }

    #[test]
    fn sequences_strictly_increase() {
        let bus: Bus<u32> = Bus::builder("seq")
            .with_config(Config::direct())
            .starting_at(10)
            .build();
        let seqs: Vec<u64> = (0..3).map(|i| bus.publish(i).unwrap().sequence()).collect();
        assert_eq!(seqs, vec![10, 11, 12]);
        assert_eq!(bus.emit(None, None).unwrap().sequence(), 13);
        assert_eq!(bus.factory().peek(), 14);
    }

    #[test]
    fn publish_on_closed_bus_is_noop() {
        let bus: Bus<u32> = direct("closed");
        let (hits, count) = counter();
        let listener = bus.subscribe(count);

        bus.close();
        assert!(!bus.is_active());
        assert!(!listener.is_active());
        assert!(bus.publish(1).is_none());
        assert!(bus.emit(Some("k"), None).is_none());
        assert_eq!(hits.load(Ordering::SeqCst), 0);

        let late = bus.subscribe(|_| {});
        assert!(!late.is_active());
        assert_eq!(bus.listener_count(), 0);
    }

    #[test]
    fn listeners_run_by_priority_then_registration() {
        let bus: Bus<u32> = direct("prio");
        let (order, seen) = recorder::<usize>();
        for (i, p) in [1, 5, 5, -2].into_iter().enumerate() {
            let seen = Arc::clone(&seen);
            bus.listen()
                .priority(p)
                .subscribe(move |_| seen.lock().unwrap().push(i));
        }
        bus.publish(0);
        assert_eq!(*order.lock().unwrap(), vec![1, 2, 0, 3]);
    }

    #[test]
    fn cancellation_stops_local_delivery_only() {
        let bus: Bus<u32> = direct("cancel");
        let (early, count_early) = counter();
        let (late, count_late) = counter();
        bus.listen().priority(20).subscribe(count_early);
        bus.listen().priority(10).subscribe(|ev| {
            assert!(ev.cancel());
        });
        bus.subscribe(count_late);

        let (flags, seen) = recorder::<bool>();
        let child = bus.peek(move |ev| seen.lock().unwrap().push(ev.is_cancelled()));
        let (in_child, count_child) = counter();
        child.subscribe(count_child);

        let ev = bus.publish(1).unwrap();
        assert!(ev.is_cancelled());
        assert_eq!(early.load(Ordering::SeqCst), 1);
        assert_eq!(late.load(Ordering::SeqCst), 0);
        assert_eq!(*flags.lock().unwrap(), vec![true]);
        assert_eq!(in_child.load(Ordering::SeqCst), 0);
        assert!(child.is_active());
    }

    #[test]
    fn close_and_subscribe_during_dispatch() {
        let bus: Bus<u32> = direct("churn");
        let (seen, sink) = recorder::<&'static str>();

        let victim_sink = Arc::clone(&sink);
        let victim = bus
            .listen()
            .priority(1)
            .subscribe(move |_| victim_sink.lock().unwrap().push("victim"));

        let handle = bus.clone();
        let first = AtomicBool::new(true);
        bus.listen().priority(10).subscribe(move |_| {
            if first.swap(false, Ordering::SeqCst) {
                victim.close();
                let late_sink = Arc::clone(&sink);
                handle.subscribe(move |_| late_sink.lock().unwrap().push("late"));
            }
        });

        bus.publish(1);
        assert!(seen.lock().unwrap().is_empty());
        bus.publish(2);
        assert_eq!(*seen.lock().unwrap(), vec!["late"]);
        assert_eq!(bus.listener_count(), 2);
        bus.close();
    }

    #[test]
    fn flag_modes_route_events() {
        let bus: Bus<u32> = direct("flags");
        let (numeric, n) = counter();
        let (or, o) = counter();
        let (not, x) = counter();
        bus.listen().flag_with(0b0110, FlagMode::Numeric).subscribe(n);
        bus.listen().flag_with(0b0110, FlagMode::BitwiseOr).subscribe(o);
        bus.listen().flag_with(0b0110, FlagMode::BitwiseNot).subscribe(x);

        bus.publish_with(None, Some(0b0010), 1);
        assert_eq!(numeric.load(Ordering::SeqCst), 0);
        assert_eq!(or.load(Ordering::SeqCst), 1);
        assert_eq!(not.load(Ordering::SeqCst), 0);

        bus.publish_with(None, Some(0b1000), 1);
        assert_eq!(not.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn filter_data_forwards_matching_payloads() {
        let root: Bus<u32> = direct("root");
        let big = root.filter_data(|v| *v > 10);
        let (seen, sink) = recorder::<u32>();
        big.subscribe_data(move |v| sink.lock().unwrap().push(*v));

        root.publish(5);
        root.publish(20);
        root.emit(None, None);
        assert_eq!(*seen.lock().unwrap(), vec![20]);
        assert_eq!(big.name(), "root/filter_data");
        assert_eq!(big.upstream_name().as_deref(), Some("root"));
    }

    #[test]
    fn map_data_changes_payload_type_and_keeps_metadata() {
        let root: Bus<u32> = direct("root");
        let text = root.map_data(|v| (*v % 2 == 0).then(|| format!("even {v}")));
        let (seen, sink) = recorder::<(u64, Option<String>, String)>();
        text.subscribe(move |ev| {
            sink.lock().unwrap().push((
                ev.sequence(),
                ev.key().map(str::to_string),
                ev.data().cloned().unwrap_or_default(),
            ));
        });

        root.publish_with(Some("a"), None, 1);
        root.publish_with(Some("b"), None, 2);
        assert_eq!(
            *seen.lock().unwrap(),
            vec![(1, Some("b".to_string()), "even 2".to_string())]
        );
    }

    #[test]
    fn map_may_drop_events() {
        let root: Bus<u32> = direct("root");
        let keyed = root.map(|ev: &Event<u32>| ev.key().and_then(|_| ev.with_data(ev.sequence())));
        let (seen, sink) = recorder::<u64>();
        keyed.subscribe_data(move |s| sink.lock().unwrap().push(*s));

        root.publish(1);
        root.publish_with(Some("k"), None, 2);
        assert_eq!(*seen.lock().unwrap(), vec![1]);
    }

    #[test]
    fn peek_and_peek_data_forward_unchanged() {
        let root: Bus<u32> = direct("root");
        let (peeked, p) = counter();
        let (sum, s) = recorder::<u32>();
        let tail = root
            .peek(p)
            .peek_data(move |v| s.lock().unwrap().push(*v));
        let (reached, r) = counter();
        tail.subscribe(r);

        root.publish(3);
        root.emit(None, None);
        assert_eq!(peeked.load(Ordering::SeqCst), 2);
        assert_eq!(*sum.lock().unwrap(), vec![3]);
        assert_eq!(reached.load(Ordering::SeqCst), 2);
        assert_eq!(tail.name(), "root/peek/peek_data");
    }

    #[test]
    fn flat_map_narrows_by_runtime_type() {
        let root: Bus<Arc<dyn Any + Send + Sync>> = direct("dyn");
        let strings: Bus<String> = root.flat_map::<String>();
        let (seen, sink) = recorder::<String>();
        strings.subscribe_data(move |s| sink.lock().unwrap().push(s.clone()));

        root.publish(Arc::new(String::from("hi")));
        root.publish(Arc::new(7_u32));
        root.emit(None, None);
        assert_eq!(*seen.lock().unwrap(), vec!["hi".to_string()]);
    }

    #[test]
    fn close_cascades_to_descendants() {
        let root: Bus<u32> = direct("root");
        let a = root.map_data(|v| Some(*v + 1));
        let b = a.filter(|_| true);
        let la = a.subscribe(|_| {});
        let lb = b.subscribe(|_| {});
        assert_eq!(root.downstream_count(), 1);
        assert_eq!(a.downstream_count(), 1);

        root.close();
        for active in [root.is_active(), a.is_active(), b.is_active()] {
            assert!(!active);
        }
        assert!(!la.is_active());
        assert!(!lb.is_active());
        assert_eq!(root.downstream_count(), 0);
        assert_eq!(a.listener_count(), 0);
        assert!(b.publish(1).is_none());
    }

    #[test]
    fn close_cascades_to_sibling_children() {
        let root: Bus<u32> = direct("root");
        let evens = root.filter_data(|v| v % 2 == 0);
        let odds = root.filter_data(|v| v % 2 == 1);
        let le = evens.subscribe(|_| {});
        let lo = odds.subscribe(|_| {});
        let lr = root.subscribe(|_| {});
        assert_eq!(root.downstream_count(), 2);

        root.close();
        for bus in [&root, &evens, &odds] {
            assert!(!bus.is_active());
            assert_eq!(bus.listener_count(), 0);
        }
        for listener in [&le, &lo, &lr] {
            assert!(!listener.is_active());
        }
        assert_eq!(root.downstream_count(), 0);
    }

    #[test]
    fn closing_a_child_detaches_it() {
        let root: Bus<u32> = direct("root");
        let a = root.filter(|_| true);
        let b = root.filter(|_| true);

        a.close();
        assert!(root.is_active());
        assert_eq!(root.downstream_count(), 1);
        assert_eq!(a.upstream_name(), None);

        b.close_self();
        assert_eq!(root.downstream_count(), 1);
        assert_eq!(b.upstream_name().as_deref(), Some("root"));
    }

    #[test]
    fn deriving_from_closed_bus_yields_closed_bus() {
        let root: Bus<u32> = direct("root");
        root.close();
        let child = root.filter(|_| true);
        assert!(!child.is_active());
        assert_eq!(root.downstream_count(), 0);
    }

    #[test]
    fn panic_is_reported_and_aborts_the_task() {
        let reporter = Arc::new(Collect::default());
        let root: Bus<u32> = Bus::builder("faulty")
            .with_config(Config::direct())
            .with_reporter(reporter.clone())
            .build();
        let (before, b) = counter();
        let (after, a) = counter();
        root.listen().priority(10).subscribe(b);
        root.listen().priority(5).subscribe(|ev| {
            if ev.data() == Some(&13) {
                panic!("boom");
            }
        });
        root.subscribe(a);
        let (downstream, d) = counter();
        root.filter(|_| true).subscribe(d);

        assert!(root.publish(13).is_some());
        root.publish(1);

        assert_eq!(before.load(Ordering::SeqCst), 2);
        assert_eq!(after.load(Ordering::SeqCst), 1);
        assert_eq!(downstream.load(Ordering::SeqCst), 1);

        let reports = reporter.0.lock().unwrap();
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].0, "faulty");
        assert_eq!(
            reports[0].1,
            DispatchError::Panicked {
                bus: "faulty".into(),
                sequence: 0,
                message: "boom".into(),
            }
        );
    }

    #[test]
    fn transform_panic_is_reported_by_the_parent_task() {
        let reporter = Arc::new(Collect::default());
        let root: Bus<u32> = Bus::builder("parent")
            .with_config(Config::direct())
            .with_reporter(reporter.clone())
            .build();
        let _child = root.map_data(|v: &u32| -> Option<u32> {
            if *v == 0 {
                panic!("division by zero");
            }
            Some(100 / *v)
        });

        root.publish(0);
        root.publish(4);
        let reports = reporter.0.lock().unwrap();
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].0, "parent");
        assert_eq!(reports[0].1.as_label(), "dispatch_panicked");
    }

    #[test]
    fn set_upstream_reparents() {
        let a: Bus<u32> = direct("a");
        let b: Bus<u32> = direct("b");
        let c: Bus<u32> = direct("c");
        let (hits, count) = counter();
        c.subscribe(count);

        c.set_upstream(&a, |ev: &Event<u32>| Some(ev.clone())).unwrap();
        a.publish(1);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert_eq!(c.upstream_name().as_deref(), Some("a"));

        c.set_upstream(&b, |ev: &Event<u32>| Some(ev.clone())).unwrap();
        assert_eq!(a.downstream_count(), 0);
        assert_eq!(b.downstream_count(), 1);
        a.publish(2);
        b.publish(3);
        assert_eq!(hits.load(Ordering::SeqCst), 2);
        assert_eq!(c.upstream_name().as_deref(), Some("b"));
    }

    #[test]
    fn set_upstream_rejects_closed_bus() {
        let parent: Bus<u32> = direct("parent");
        let same = |ev: &Event<u32>| Some(ev.clone());
        for i in 0..4 {
            let child: Bus<u32> = direct(&format!("closed-{i}"));
            child.close();
            assert_eq!(
                child.set_upstream(&parent, same).map(|_| ()),
                Err(BusError::Closed)
            );
            assert!(!child.is_active());
        }

        let derived = parent.filter(|_| true);
        derived.close();
        assert_eq!(parent.downstream_count(), 0);
        assert!(derived.set_upstream(&parent, same).is_err());
        assert_eq!(parent.downstream_count(), 0);
        assert_eq!(derived.upstream_name(), None);
    }

    #[test]
    fn concurrent_opposite_reparenting_cannot_form_a_cycle() {
        let same = |ev: &Event<u32>| Some(ev.clone());
        for _ in 0..100 {
            let a: Bus<u32> = direct("a");
            let b: Bus<u32> = direct("b");
            let barrier = Arc::new(std::sync::Barrier::new(2));

            let (a2, b2, gate) = (a.clone(), b.clone(), Arc::clone(&barrier));
            let other = std::thread::spawn(move || {
                gate.wait();
                a2.set_upstream(&b2, same).is_ok()
            });
            barrier.wait();
            let here = b.set_upstream(&a, same).is_ok();
            let there = other.join().unwrap();

            assert!(here ^ there, "exactly one direction must win");
            a.close();
            b.close();
        }
    }

    #[test]
    fn set_upstream_rejects_cycles() {
        let root: Bus<u32> = direct("root");
        let child = root.filter(|_| true);
        let grandchild = child.filter(|_| true);
        let same = |ev: &Event<u32>| Some(ev.clone());

        assert!(matches!(
            root.set_upstream(&root, same),
            Err(BusError::Cycle { .. })
        ));
        assert!(matches!(
            root.set_upstream(&grandchild, same),
            Err(BusError::Cycle { .. })
        ));
        assert_eq!(root.upstream_name(), None);
        assert!(grandchild.set_upstream(&root, same).is_ok());
        assert_eq!(root.downstream_count(), 2);
        assert_eq!(child.downstream_count(), 0);
    }

    #[test]
    fn set_upstream_with_keys_rewrites_keys() {
        let parent: Bus<u32> = direct("parent");
        let child: Bus<u32> = direct("child");
        child
            .set_upstream_with_keys(
                &parent,
                |ev: &Event<u32>| Some(ev.clone()),
                |k| format!("child.{k}"),
            )
            .unwrap();
        let (keys, sink) = recorder::<Option<String>>();
        child.subscribe(move |ev| sink.lock().unwrap().push(ev.key().map(str::to_string)));

        parent.publish_with(Some("ready"), None, 1);
        parent.publish(2);
        assert_eq!(
            *keys.lock().unwrap(),
            vec![Some("child.ready".to_string()), None]
        );
    }

    #[test]
    fn register_folds_descriptors_into_one_listener() {
        let bus: Bus<u32> = direct("subs");
        let (log, sink) = recorder::<&'static str>();
        let on_login = Arc::clone(&sink);
        let on_flag = Arc::clone(&sink);
        let listener = bus
            .register(vec![
                Descriptor::new(move |_| on_login.lock().unwrap().push("login")).with_key("login"),
                Descriptor::new(move |_| on_flag.lock().unwrap().push("flagged"))
                    .with_key("login")
                    .with_flag(0b01, FlagMode::BitwiseOr),
                Descriptor::new(move |_| sink.lock().unwrap().push("keyless")),
            ])
            .unwrap();
        assert_eq!(bus.listener_count(), 1);

        bus.publish_with(Some("login"), Some(0b10), 1);
        bus.publish_with(Some("login"), Some(0b01), 1);
        bus.publish_with(Some("logout"), None, 1);
        bus.publish(1);
        assert_eq!(
            *log.lock().unwrap(),
            vec!["login", "login", "flagged", "keyless"]
        );

        listener.close();
        assert_eq!(bus.listener_count(), 0);
        assert!(bus.register(Vec::new()).is_none());
        assert_eq!(bus.listener_count(), 0);
    }

    #[tokio::test]
    async fn get_resolves_with_next_payload() {
        let bus: Bus<u32> = direct("get");
        let next = bus.get();
        bus.emit(Some("empty"), None);
        bus.publish(7);
        bus.publish(8);
        assert_eq!(next.await, Ok(7));
        assert_eq!(bus.listener_count(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn pooled_bus_delivers_every_event() {
        let bus: Bus<u32> = Bus::builder("pooled").with_config(Config::pooled(2)).build();
        assert_eq!(bus.executor().name(), "worker-pool");
        let (hits, count) = counter();
        bus.subscribe(count);
        let done = bus.listen().key("done").timeout(Duration::from_secs(5)).once();

        for i in 0..100 {
            bus.publish(i);
        }
        bus.publish_with(Some("done"), None, 100);

        let ev = done.await.expect("done event");
        assert_eq!(ev.sequence(), 100);
        tokio::time::timeout(Duration::from_secs(5), async {
            while hits.load(Ordering::SeqCst) < 101 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("all events delivered");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn listeners_churn_while_pooled_bus_publishes() {
        let bus: Bus<u32> = Bus::builder("churn").with_config(Config::pooled(2)).build();
        let (hits, count) = counter();
        bus.subscribe(count);

        let churn_bus = bus.clone();
        let churn = std::thread::spawn(move || {
            for _ in 0..200 {
                let listener = churn_bus.subscribe(|_| {});
                listener.close();
            }
        });
        for i in 0..500 {
            bus.publish(i);
        }
        churn.join().unwrap();

        let done = bus.listen().key("done").timeout(Duration::from_secs(5)).once();
        bus.publish_with(Some("done"), None, 0);
        done.await.expect("done event");

        tokio::time::timeout(Duration::from_secs(5), async {
            while hits.load(Ordering::SeqCst) < 501 || bus.listener_count() != 1 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("every event delivered and churned listeners gone");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn child_on_other_executor_gets_its_own_task() {
        let root: Bus<u32> = Bus::builder("pooled").with_config(Config::pooled(1)).build();
        let child: Bus<u32> = direct("inline");
        child
            .set_upstream(&root, |ev: &Event<u32>| ev.map_data(|v| v * 10))
            .unwrap();
        let got = child.listen().timeout(Duration::from_secs(5)).once();

        root.publish(4);
        assert_eq!(got.await.unwrap().data(), Some(&40));
    }
}
