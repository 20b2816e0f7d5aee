//! Trailing Update Callbacks
//!
//! Scheduling of delayed callbacks, their signatures, and the inbound
//! webhook that completes a debounce cycle.

pub mod delivery;
pub mod dispatch;
pub mod handlers;
pub mod signing;
