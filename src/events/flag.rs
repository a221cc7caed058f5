//! # Flag matching.
//!
//! Events may carry an application-defined bitmask used for coarse routing
//! next to the string key. Listeners match it in one of three [`FlagMode`]s.
//!
//! ```text
//! mode        match when
//! ─────────── ─────────────────────────────
//! Numeric     event == mask
//! BitwiseOr   event &  mask != 0
//! BitwiseNot  event & !mask != 0
//! ```
//!
//! An event without a flag is treated as [`FLAG_ALL`](super::event::FLAG_ALL).

use super::event::FLAG_ALL;

/// How a listener's flag mask is compared with an event's flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum FlagMode {
    /// Exact equality.
    Numeric,
    /// At least one bit of the mask is set on the event.
    #[default]
    BitwiseOr,
    /// The event has at least one bit set outside the mask.
    BitwiseNot,
}

/// Tests an event flag against a listener mask.
///
/// `None` as the event flag means "no flag" and matches as if every bit were set.
#[inline]
pub fn test_flag(event_flag: Option<u64>, mask: u64, mode: FlagMode) -> bool {
    let flag = event_flag.unwrap_or(FLAG_ALL);
    match mode {
        FlagMode::Numeric => flag == mask,
        FlagMode::BitwiseOr => flag & mask != 0,
        FlagMode::BitwiseNot => flag & !mask != 0,
    }
}

/// ORs all flags together.
#[inline]
pub fn combine(flags: &[u64]) -> u64 {
    flags.iter().fold(0, |acc, f| acc | f)
}

/// True if every bit of `flag` is set in `value`.
#[inline]
pub fn is_flag_set(value: u64, flag: u64) -> bool {
    value & flag == flag
}

#[inline]
pub fn set_flag(value: u64, flag: u64) -> u64 {
    value | flag
}

#[inline]
pub fn clear_flag(value: u64, flag: u64) -> u64 {
    value & !flag
}
