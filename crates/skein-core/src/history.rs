use std::future::Future;

use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::{error::HistoryError, room::RoomId};

/// One page of room history as served by the messaging API, most recent
/// records first. Individual records stay undecoded; malformed ones are the
/// consumer's problem, a malformed page is the transport's.
#[derive(Debug, Clone, Default)]
pub struct HistoryPage {
    pub records: Vec<Value>,
    pub next_token: Option<String>,
}

/// Paginated room-history retrieval. `after` bounds the first page to
/// records newer than the watermark and is omitted on continuation pages;
/// `token` is the opaque cursor from the previous page. Cancellation is the
/// caller dropping the returned future.
pub trait HistoryApi: Send + Sync + 'static {
    fn fetch_page(
        &self,
        room: &RoomId,
        after: Option<DateTime<Utc>>,
        token: Option<&str>,
        page_size: u32,
    ) -> impl Future<Output = Result<HistoryPage, HistoryError>> + Send;
}
