use std::future::Future;

use crate::{error::StoreError, room::RoomId};

/// Persistent per-room watermark: the string-encoded timestamp of the last
/// message delivered by a completed catch-up. Read once at catch-up start,
/// written at most once per completed catch-up.
pub trait WatermarkStore: Send + Sync + 'static {
    fn get(&self, room: &RoomId) -> impl Future<Output = Result<Option<String>, StoreError>> + Send;

    fn set(
        &self,
        room: &RoomId,
        value: &str,
    ) -> impl Future<Output = Result<(), StoreError>> + Send;
}
