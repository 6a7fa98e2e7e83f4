use thiserror::Error;

/// The umbrella error type for Skein.
#[derive(Error, Debug)]
pub enum SkeinError {
    #[error("history error: {0}")]
    History(#[from] HistoryError),

    #[error("live feed error: {0}")]
    Feed(#[from] FeedError),

    #[error("watermark store error: {0}")]
    Store(#[from] StoreError),

    #[error("join error: {0}")]
    Join(#[from] JoinError),

    #[error("record error: {0}")]
    Record(#[from] crate::record::RecordError),

    #[error("timestamp error: {0}")]
    Timestamp(#[from] crate::timestamp::TimestampError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// A specialized Result type for Skein operations.
pub type Result<T> = std::result::Result<T, SkeinError>;

#[derive(Error, Debug, Clone)]
pub enum FeedError {
    #[error("unknown topic: {0}")]
    UnknownTopic(String),

    #[error("feed closed")]
    Closed,

    #[error("subscriber lagged: {0} events missed")]
    Lagged(u64),
}

#[derive(Error, Debug)]
pub enum HistoryError {
    #[error("page request failed: {0}")]
    RequestFailed(String),

    #[error("malformed page: {0}")]
    MalformedPage(String),
}

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("watermark read failed: {0}")]
    ReadFailed(String),

    #[error("watermark write failed: {0}")]
    WriteFailed(String),
}

#[derive(Error, Debug)]
pub enum DeliveryError {
    #[error("delivery rejected: {0}")]
    Rejected(String),
}

#[derive(Error, Debug)]
pub enum JoinError {
    #[error("room limit reached ({0} active sessions)")]
    RoomLimit(usize),

    #[error("live feed subscription failed: {0}")]
    Feed(#[from] FeedError),
}
