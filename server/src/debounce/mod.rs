//! Debounced Broadcast Updates
//!
//! Rate-limits edits of a shared message: one immediate publish and one
//! trailing publish per window, coordinated through a shared state store.

pub mod coordinator;
pub mod error;
pub mod store;
pub mod types;

pub use coordinator::{ttl_for, DebounceCoordinator, DebounceSettings};
pub use error::{DebounceError, DebounceResult};
pub use store::{MemoryStateStore, RedisStateStore, SharedStateStore, StoreError};
pub use types::{
    CallbackOutcome, Content, DebounceKey, FormatMode, MessageHandle, Renderer, ReplyButton,
    ReplyControls, StoredUpdate, TrailingPayload, UpdateOutcome,
};
