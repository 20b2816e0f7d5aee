//! Pollcast Server
//!
//! Debounced broadcast updates for shared poll messages: many voters, one
//! message, at most one immediate and one trailing edit per window.

pub mod api;
pub mod config;
pub mod db;
pub mod debounce;
pub mod publish;
pub mod webhooks;
