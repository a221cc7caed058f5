//! # flowbus
//!
//! **Flowbus** is an in-process, hierarchical publish/subscribe event bus.
//!
//! Publishers emit sequence-stamped events on a [`Bus`]; listeners registered on
//! that bus receive the events that satisfy their requirement, in priority
//! order. Buses can be derived from one another (`map`, `filter`, `map_data`,
//! ...), forming a directed acyclic graph through which events propagate, each
//! edge applying a transform.
//!
//! ## Architecture
//! ### Overview
//! ```text
//!                      publish(key, flag, data)
//!                                 │
//!                                 ▼
//! ┌───────────────────────────────────────────────────────────────────┐
//! │  Bus "orders" (root)                                              │
//! │  - Factory   (sequence numbers, timestamps)                       │
//! │  - Listeners (priority desc, registration asc)                    │
//! │  - Executor  (DirectExecutor | WorkerPool)                        │
//! │  - Report    (fault sink, default TracingReporter)                │
//! └──────┬──────────────────────────┬─────────────────────────────────┘
//!        │ filter_data(|o| o.paid)  │ map_data(|o| o.total)
//!        ▼                          ▼
//! ┌──────────────────┐       ┌──────────────────┐
//! │ "orders/filter_  │       │ "orders/map_data"│
//! │  data"  Bus<T>   │       │   Bus<u64>       │
//! └──────┬───────────┘       └──────────────────┘
//!        │ peek(..)
//!        ▼
//!       ...
//! ```
//!
//! ### Dispatch task
//! ```text
//! Bus::accept(ev) ──► Executor::submit(job)
//!
//! job {
//!   for listener in sorted(listeners):
//!     ├─ ev.is_cancelled()   ─► stop local delivery
//!     └─ listener.test(ev)   ─► listener.accept(ev)
//!   for child in downstream:
//!     └─ transform(ev) = Some(ev') ─► child.dispatch(ev')   (same executor)
//!                                 └─► child.accept(ev')     (other executor)
//!   panic anywhere ─► Report::report(bus, DispatchError)   (task aborted)
//! }
//! ```
//!
//! ### Lifecycle
//! ```text
//! Bus:      Active ──close()──► Closed   (listeners + descendants closed, upstream detached)
//! Listener: Active ──close() / one-shot fired / bus closed──► Closed
//! Once:     Waiting ──► Ok(event) | Err(Timeout) | Err(Closed)
//! ```
//!
//! ## Features
//! | Area            | Description                                                    | Key types / traits                     |
//! |-----------------|----------------------------------------------------------------|----------------------------------------|
//! | **Events**      | Sequence-stamped events with key, flag and one-way cancel.     | [`Event`], [`Factory`]                 |
//! | **Routing**     | Key, flag (numeric / bitwise), payload and type filters.       | [`Filter`], [`FlagMode`]               |
//! | **Listeners**   | Prioritized, standing or one-shot registrations.               | [`Listener`], [`Once`]                 |
//! | **Subscribers** | Handler tables folded into one composite listener.             | [`Descriptor`], [`Subscriber`]         |
//! | **Derivation**  | Typed transforms between buses, re-parenting, close cascades.  | [`Bus`]                                |
//! | **Execution**   | Pluggable executors for dispatch tasks.                        | [`Executor`], [`WorkerPool`]           |
//! | **Faults**      | Dispatch panics caught per task and reported.                  | [`Report`], [`DispatchError`]          |
//! | **Configuration** | Executor provisioning for root buses.                        | [`Config`], [`BusBuilder`]             |
//!
//! ## Example
//! ```rust
//! use std::time::Duration;
//! use flowbus::{Bus, Config};
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let orders: Bus<u64> = Bus::builder("orders")
//!         .with_config(Config::direct())
//!         .build();
//!
//!     // Highest priority listener may veto local delivery.
//!     orders.listen().priority(10).subscribe(|ev| {
//!         if ev.data() == Some(&0) {
//!             ev.cancel();
//!         }
//!     });
//!
//!     let large = orders.filter_data(|total| *total >= 100);
//!     let first_large = large.listen().timeout(Duration::from_secs(1)).once();
//!
//!     orders.publish(0);
//!     orders.publish(40);
//!     orders.publish_with(Some("vip"), None, 250);
//!
//!     let ev = first_large.await?;
//!     assert_eq!(ev.data(), Some(&250));
//!     assert_eq!(ev.key(), Some("vip"));
//!
//!     orders.close();
//!     assert!(!large.is_active());
//!     Ok(())
//! }
//! ```

mod config;
mod core;
mod error;
mod events;
mod executor;
mod listeners;
mod report;

// ---- Public re-exports ----

pub use config::{Config, DEFAULT_WORKERS};
pub use core::{Bus, BusBuilder};
pub use error::{BusError, DispatchError};
pub use events::{
    clear_flag, combine, is_flag_set, set_flag, test_flag, DynPayload, Event, Factory, FlagMode,
    FLAG_ALL,
};
pub use executor::{DirectExecutor, Executor, Job, WorkerPool};
pub use listeners::{Action, Descriptor, Filter, Listener, Once, Requirement, Subscriber};
pub use report::{Report, TracingReporter};
