use serde::{Deserialize, Serialize};

/// Tunables for the catch-up engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CatchupConfig {
    /// Records requested per history page.
    pub page_size: u32,

    /// Capacity of each session's inbound fetch mailbox.
    pub mailbox_capacity: usize,

    /// Buffered events per live-feed topic before subscribers lag.
    pub feed_capacity: usize,

    /// Maximum concurrently joined rooms; `None` means unlimited.
    pub max_rooms: Option<usize>,

    /// Label used when a record names no sender.
    pub fallback_sender: String,
}

impl Default for CatchupConfig {
    fn default() -> Self {
        Self {
            page_size: 50,
            mailbox_capacity: 256,
            feed_capacity: 1024,
            max_rooms: None,
            fallback_sender: "someone".into(),
        }
    }
}
