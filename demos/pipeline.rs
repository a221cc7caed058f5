//! # Example: pipeline
//!
//! Derived buses forming a small order-processing graph.
//!
//! Demonstrates how to:
//! - Derive buses with `filter_data`, `map_data` and `peek_data`.
//! - Veto local delivery by cancelling an event from a high-priority listener.
//! - Fold a [`Subscriber`] into one composite listener with `register_subscriber`.
//! - Close a whole subtree with one `close()`.
//!
//! ## Graph
//! ```text
//! orders (root, pool of 2)
//!   ├─► orders/filter_data   (paid orders)
//!   │     └─► orders/filter_data/map_data   (totals) ─► running sum
//!   └─► orders/peek_data     (audit trail)
//! ```
//!
//! ## Run
//! ```bash
//! RUST_LOG=flowbus=debug cargo run --example pipeline
//! ```

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use flowbus::{Bus, Config, Descriptor, Event, FlagMode, Subscriber};
use tracing_subscriber::EnvFilter;

const PRIORITY: u64 = 0b01;

#[derive(Clone, Debug)]
struct Order {
    id: u32,
    total: u64,
    paid: bool,
}

/// Counts keyed order events; one descriptor per interesting key.
#[derive(Default)]
struct Audit {
    created: AtomicU64,
    priority: AtomicU64,
}

impl Subscriber<Order> for Audit {
    fn descriptors(self: &Arc<Self>) -> Vec<Descriptor<Order>> {
        let created = Arc::clone(self);
        let priority = Arc::clone(self);
        vec![
            Descriptor::new(move |_: &Event<Order>| {
                created.created.fetch_add(1, Ordering::Relaxed);
            })
            .with_key("created"),
            Descriptor::new(move |_: &Event<Order>| {
                priority.priority.fetch_add(1, Ordering::Relaxed);
            })
            .with_key("created")
            .with_flag(PRIORITY, FlagMode::BitwiseOr),
        ]
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let orders: Bus<Order> = Bus::builder("orders").with_config(Config::pooled(2)).build();

    // Test orders never reach the local listeners below.
    orders.listen().priority(100).subscribe(|ev| {
        if ev.data().is_some_and(|o| o.id == 0) {
            ev.cancel();
        }
    });

    let audit = Arc::new(Audit::default());
    orders.register_subscriber(&audit);

    let revenue = Arc::new(AtomicU64::new(0));
    let sum = Arc::clone(&revenue);
    let totals = orders.filter_data(|o| o.paid).map_data(|o| Some(o.total));
    totals.subscribe_data(move |total| {
        sum.fetch_add(*total, Ordering::Relaxed);
    });

    let trail = orders.peek_data(|o| println!("[audit] order #{} total={}", o.id, o.total));

    let last = totals.listen().data_predicate(|t| *t == 300).timeout(Duration::from_secs(2)).once();

    let batch = [
        (Order { id: 0, total: 1, paid: true }, None),
        (Order { id: 1, total: 120, paid: true }, None),
        (Order { id: 2, total: 80, paid: false }, Some(PRIORITY)),
        (Order { id: 3, total: 300, paid: true }, Some(PRIORITY)),
    ];
    for (order, flag) in batch {
        orders.publish_with(Some("created"), flag, order);
    }

    let ev = last.await?;
    println!("[main] last total seen as event #{}", ev.sequence());
    // Give the other worker a chance to finish before reading counters.
    tokio::time::sleep(Duration::from_millis(50)).await;

    println!(
        "[main] revenue={} created={} priority={}",
        revenue.load(Ordering::Relaxed),
        audit.created.load(Ordering::Relaxed),
        audit.priority.load(Ordering::Relaxed),
    );

    orders.close();
    println!(
        "[main] closed: totals active={} trail active={}",
        totals.is_active(),
        trail.is_active()
    );
    Ok(())
}
