//! History/live reconciliation for chat rooms.
//!
//! Joining a room starts two racing producers: a paginated history fetch
//! and a live push subscription. Both land in a per-session deduper while
//! the session catches up; when the fetch is exhausted the deduped set is
//! delivered in timestamp order, the session switches to live pass-through,
//! and the watermark below which history is already delivered is persisted.
//! Each session is a single-owner task, so every state transition and every
//! deduper access for one room is serialized; sessions for different rooms
//! run independently.

pub mod client;
pub mod dedup;
pub mod deliver;
mod fetch;
pub mod session;

pub use client::ChatClient;
pub use session::{Phase, SessionHandle};
