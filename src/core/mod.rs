//! Bus core: the derivation graph and its nodes.
//!
//! The only public types from this module are [`Bus`] and [`BusBuilder`].
//!
//! Internal modules:
//! - [`bus`]: publication, dispatch task, derivation, close cascade;
//! - [`builder`]: root bus construction (executor/reporter provisioning);
//! - [`link`]: type-erased parent/child edges.

mod builder;
mod bus;
mod link;

pub use builder::BusBuilder;
pub use bus::Bus;
pub(crate) use bus::BusInner;
