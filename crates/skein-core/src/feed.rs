use dashmap::DashMap;
use serde_json::Value;
use tokio::sync::broadcast;

use crate::error::FeedError;

/// Push-notification transport: one topic per room channel, delivering raw
/// event payloads. Dropping the returned `LiveEvents` unsubscribes.
pub trait LiveFeed: Send + Sync + 'static {
    fn subscribe(&self, topic: &str) -> Result<LiveEvents, FeedError>;
}

/// A live subscription to one topic.
pub struct LiveEvents {
    receiver: broadcast::Receiver<Value>,
}

impl LiveEvents {
    pub fn new(receiver: broadcast::Receiver<Value>) -> Self {
        Self { receiver }
    }

    pub async fn recv(&mut self) -> Result<Value, FeedError> {
        match self.receiver.recv().await {
            Ok(event) => Ok(event),
            Err(broadcast::error::RecvError::Closed) => Err(FeedError::Closed),
            Err(broadcast::error::RecvError::Lagged(count)) => Err(FeedError::Lagged(count)),
        }
    }
}

/// In-process live feed over tokio broadcast channels, one per topic.
/// Events published to a topic with no subscriber are dropped.
#[derive(Debug)]
pub struct BroadcastLiveFeed {
    capacity: usize,
    topics: DashMap<String, broadcast::Sender<Value>>,
}

impl BroadcastLiveFeed {
    pub const DEFAULT_TOPIC_CAPACITY: usize = 1024;

    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            topics: DashMap::new(),
        }
    }

    /// Publish an event to every current subscriber of `topic`. Returns the
    /// number of subscribers the event reached.
    pub fn publish(&self, topic: &str, event: Value) -> usize {
        self.sender_for(topic).send(event).unwrap_or(0)
    }

    fn sender_for(&self, topic: &str) -> broadcast::Sender<Value> {
        self.topics
            .entry(topic.to_string())
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .clone()
    }
}

impl Default for BroadcastLiveFeed {
    fn default() -> Self {
        Self::new(Self::DEFAULT_TOPIC_CAPACITY)
    }
}

impl LiveFeed for BroadcastLiveFeed {
    fn subscribe(&self, topic: &str) -> Result<LiveEvents, FeedError> {
        Ok(LiveEvents::new(self.sender_for(topic).subscribe()))
    }
}
