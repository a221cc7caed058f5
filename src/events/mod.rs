//! Events: data model, per-bus factory and flag matching.
//!
//! ## Contents
//! - [`Event`] sequence-stamped occurrence with one-way cancellation
//! - [`Factory`] per-bus sequence counter and event stamping
//! - [`FlagMode`], [`test_flag`] and bit helpers for flag routing
//! - [`DynPayload`] runtime payload typing for `flat_map` / `of_type`

mod event;
mod factory;
pub(crate) mod flag;
mod payload;

pub use event::{Event, FLAG_ALL};
pub use factory::Factory;
pub use flag::{clear_flag, combine, is_flag_set, set_flag, test_flag, FlagMode};
pub use payload::DynPayload;
