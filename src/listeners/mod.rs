//! Listeners: registrations on a bus and the ways to create them.
//!
//! ## Contents
//! - [`Listener`] `(requirement, action)` pair with priority and one-shot mode
//! - [`Filter`] declarative builder compiling to a listener or a [`Once`]
//! - [`Once`] future resolving with the first match, with optional timeout
//! - [`Descriptor`] / [`Subscriber`] explicit handler tables folded by `Bus::register`

mod descriptor;
mod filter;
mod listener;
mod once;

pub use descriptor::{Descriptor, Subscriber};
pub use filter::Filter;
pub(crate) use listener::CloseHook;
pub use listener::{Action, Listener, Requirement};
pub use once::Once;
