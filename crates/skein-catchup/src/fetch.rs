use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use uuid::Uuid;

use skein_core::{error::HistoryError, history::HistoryApi, room::RoomId, MessageRecord};

/// Messages from the fetch task to the owning session.
#[derive(Debug)]
pub(crate) enum FetchUpdate {
    Records(Vec<MessageRecord>),
    Complete { pages: u32, dropped: u64 },
    Failed(HistoryError),
}

/// Drives paginated history retrieval for one session, newest pages first,
/// following continuation tokens until the server runs out. The watermark
/// bound applies to the first page only. Once the cancellation token trips,
/// nothing further reaches the session mailbox.
pub(crate) struct HistoryFetcher<H> {
    history: Arc<H>,
    room: RoomId,
    after: Option<DateTime<Utc>>,
    page_size: u32,
    cancel: CancellationToken,
    updates: mpsc::Sender<FetchUpdate>,
}

impl<H: HistoryApi> HistoryFetcher<H> {
    pub(crate) fn new(
        history: Arc<H>,
        room: RoomId,
        after: Option<DateTime<Utc>>,
        page_size: u32,
        cancel: CancellationToken,
        updates: mpsc::Sender<FetchUpdate>,
    ) -> Self {
        Self {
            history,
            room,
            after,
            page_size,
            cancel,
            updates,
        }
    }

    pub(crate) fn spawn(self) -> tokio::task::JoinHandle<()> {
        tokio::spawn(self.run())
    }

    pub(crate) async fn run(self) {
        let fetch_id = Uuid::new_v4();
        let mut token: Option<String> = None;
        let mut pages: u32 = 0;
        let mut dropped: u64 = 0;

        debug!(%fetch_id, room = %self.room, after = ?self.after, "history fetch started");

        loop {
            let after = if pages == 0 { self.after } else { None };

            let page = tokio::select! {
                biased;
                () = self.cancel.cancelled() => {
                    debug!(%fetch_id, room = %self.room, "history fetch cancelled");
                    return;
                }
                result = self.history.fetch_page(
                    &self.room,
                    after,
                    token.as_deref(),
                    self.page_size,
                ) => match result {
                    Ok(page) => page,
                    Err(error) => {
                        warn!(%fetch_id, room = %self.room, %error, "history page request failed");
                        let _ = self.send(FetchUpdate::Failed(error)).await;
                        return;
                    }
                },
            };
            pages += 1;

            let mut records = Vec::with_capacity(page.records.len());
            for payload in &page.records {
                match MessageRecord::decode(payload) {
                    Ok(record) => records.push(record),
                    Err(error) => {
                        dropped += 1;
                        debug!(%fetch_id, room = %self.room, %error, "dropped malformed history record");
                    }
                }
            }

            if !records.is_empty() && !self.send(FetchUpdate::Records(records)).await {
                return;
            }

            match page.next_token {
                Some(next) => token = Some(next),
                None => {
                    if dropped > 0 {
                        warn!(%fetch_id, room = %self.room, dropped, "malformed records dropped during catch-up");
                    }
                    debug!(%fetch_id, room = %self.room, pages, "history fetch complete");
                    let _ = self.send(FetchUpdate::Complete { pages, dropped }).await;
                    return;
                }
            }
        }
    }

    /// Forward an update unless the session is gone or teardown started.
    async fn send(&self, update: FetchUpdate) -> bool {
        tokio::select! {
            biased;
            () = self.cancel.cancelled() => false,
            sent = self.updates.send(update) => sent.is_ok(),
        }
    }
}
