use std::collections::HashSet;
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use skein_core::{
    config::CatchupConfig,
    deliver::Delivery,
    error::FeedError,
    feed::LiveEvents,
    history::HistoryApi,
    record,
    room::Room,
    store::WatermarkStore,
    timestamp, MessageRecord,
};

use crate::{
    dedup::{MessageDeduper, RecordSource},
    deliver::DeliverySink,
    fetch::{FetchUpdate, HistoryFetcher},
};

/// Lifecycle of a room session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Joining,
    CatchingUp,
    Live,
    Left,
}

/// Handle returned by `ChatClient::join_room`. Cloneable and inert: it
/// observes the session but holds none of its state, so it cannot keep a
/// torn-down session alive.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    room: Room,
    phase: watch::Receiver<Phase>,
}

impl SessionHandle {
    pub(crate) fn new(room: Room, phase: watch::Receiver<Phase>) -> Self {
        Self { room, phase }
    }

    pub fn room(&self) -> &Room {
        &self.room
    }

    pub fn phase(&self) -> Phase {
        *self.phase.borrow()
    }

    /// Wait until the session reaches `target`. Returns early with
    /// `Phase::Left` if the session is torn down first.
    pub async fn wait_for(&mut self, target: Phase) -> Phase {
        loop {
            let phase = *self.phase.borrow_and_update();
            if phase == target || phase == Phase::Left {
                return phase;
            }
            if self.phase.changed().await.is_err() {
                return *self.phase.borrow();
            }
        }
    }

    /// Wait for catch-up to finish and live delivery to begin.
    pub async fn wait_live(&mut self) -> Phase {
        self.wait_for(Phase::Live).await
    }
}

/// How the catch-up phase ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CatchupOutcome {
    /// History exhausted; the watermark may advance.
    Finished,
    /// A page failed mid-flight; whatever was deduped is still delivered,
    /// but the watermark is left alone so the next session refetches.
    Partial,
    /// Torn down before the fetch completed.
    Cancelled,
}

/// Per-room reconciliation task. Owns the deduper, the fetch mailbox, and
/// the live subscription; every state transition is serialized on this task.
pub(crate) struct ChatSession<H, S, D> {
    pub(crate) room: Room,
    pub(crate) config: CatchupConfig,
    pub(crate) history: Arc<H>,
    pub(crate) watermarks: Arc<S>,
    pub(crate) sink: DeliverySink<D>,
    pub(crate) live: LiveEvents,
    pub(crate) cancel: CancellationToken,
    pub(crate) phase: watch::Sender<Phase>,
}

impl<H: HistoryApi, S: WatermarkStore, D: Delivery> ChatSession<H, S, D> {
    pub(crate) async fn run(self) {
        let ChatSession {
            room,
            config,
            history,
            watermarks,
            sink,
            live,
            cancel,
            phase,
        } = self;

        let mut live = Some(live);
        let mut deduper = MessageDeduper::new();

        // The watermark bounds the first history page so already-delivered
        // history is never re-fetched. An unreadable or unparsable value
        // degrades to a full refetch, never to a failed join.
        let after = match watermarks.get(&room.id).await {
            Ok(Some(text)) => match timestamp::parse(&text) {
                Ok(parsed) => Some(parsed),
                Err(_) => {
                    warn!(room = %room.id, watermark = %text, "unparsable watermark, refetching full history");
                    None
                }
            },
            Ok(None) => None,
            Err(error) => {
                warn!(room = %room.id, %error, "watermark read failed, refetching full history");
                None
            }
        };

        let (fetch_tx, mut fetch_rx) = mpsc::channel(config.mailbox_capacity);
        HistoryFetcher::new(
            history,
            room.id.clone(),
            after,
            config.page_size,
            cancel.child_token(),
            fetch_tx,
        )
        .spawn();

        phase.send_replace(Phase::CatchingUp);
        info!(room = %room.id, channel = %room.channel, "catch-up started");

        let outcome = loop {
            tokio::select! {
                biased;
                () = cancel.cancelled() => break CatchupOutcome::Cancelled,
                update = fetch_rx.recv() => match update {
                    Some(FetchUpdate::Records(records)) => {
                        for record in records {
                            deduper.insert(record, RecordSource::History);
                        }
                    }
                    Some(FetchUpdate::Complete { pages, dropped }) => {
                        debug!(room = %room.id, pages, dropped, deduped = deduper.len(), "history exhausted");
                        break CatchupOutcome::Finished;
                    }
                    Some(FetchUpdate::Failed(error)) => {
                        warn!(room = %room.id, %error, "catch-up incomplete, delivering partial backfill");
                        break CatchupOutcome::Partial;
                    }
                    None => {
                        warn!(room = %room.id, "history fetcher vanished, delivering partial backfill");
                        break CatchupOutcome::Partial;
                    }
                },
                event = Self::recv_live(live.as_mut()) => match event {
                    Ok(event) => {
                        if let Some(record) = Self::decode_live(&room, &event) {
                            deduper.insert(record, RecordSource::Live);
                        }
                    }
                    Err(FeedError::Lagged(count)) => {
                        warn!(room = %room.id, count, "live feed lagged during catch-up, events missed");
                    }
                    Err(_) => {
                        warn!(room = %room.id, "live feed closed during catch-up");
                        live = None;
                    }
                },
            }
        };
        drop(fetch_rx);

        if outcome != CatchupOutcome::Cancelled {
            // Drain once: the history backlog goes out sorted, then the
            // mode flips, then live arrivals buffered during catch-up go
            // out in receipt order. An event that raced the completion is
            // therefore classified exactly once, on whichever side of the
            // switch it was dequeued.
            let batch = deduper.drain_sorted();
            // A feed event still queued at the switch may duplicate an id
            // the drain settled; the live loop drops those against this
            // set. Frozen here, so it stays bounded by the batch size.
            let caught_up: HashSet<String> = batch
                .history
                .iter()
                .chain(batch.live.iter())
                .map(|record| record.id.clone())
                .collect();
            let report = sink.deliver_batch(&batch.history);
            phase.send_replace(Phase::Live);
            info!(
                room = %room.id,
                delivered = report.delivered,
                buffered_live = batch.live.len(),
                "catch-up complete, switching to live delivery"
            );

            if outcome == CatchupOutcome::Finished {
                // The watermark tracks the last record that actually went
                // out; a skipped tail must stay above it so the next
                // session refetches it.
                if let Some(text) = report
                    .last_delivered
                    .and_then(|index| batch.history[index].created_on_text.as_deref())
                {
                    if let Err(error) = watermarks.set(&room.id, text).await {
                        warn!(room = %room.id, %error, "watermark write failed");
                    }
                }
            }

            for record in &batch.live {
                sink.deliver_one(record);
            }

            loop {
                tokio::select! {
                    biased;
                    () = cancel.cancelled() => break,
                    event = Self::recv_live(live.as_mut()) => match event {
                        Ok(event) => {
                            if let Some(record) = Self::decode_live(&room, &event) {
                                if caught_up.contains(&record.id) {
                                    debug!(room = %room.id, id = %record.id, "dropped duplicate of caught-up record");
                                } else {
                                    sink.deliver_one(&record);
                                }
                            }
                        }
                        Err(FeedError::Lagged(count)) => {
                            warn!(room = %room.id, count, "live feed lagged, events missed");
                        }
                        Err(_) => {
                            warn!(room = %room.id, "live feed closed, awaiting teardown");
                            live = None;
                        }
                    },
                }
            }
        }

        drop(live);
        phase.send_replace(Phase::Left);
        debug!(room = %room.id, "session torn down");
    }

    async fn recv_live(live: Option<&mut LiveEvents>) -> Result<Value, FeedError> {
        match live {
            Some(events) => events.recv().await,
            None => std::future::pending().await,
        }
    }

    fn decode_live(room: &Room, event: &Value) -> Option<MessageRecord> {
        let payload = record::record_payload(event)?;
        match MessageRecord::decode(payload) {
            Ok(record) => Some(record),
            Err(error) => {
                debug!(room = %room.id, %error, "dropped malformed live event");
                None
            }
        }
    }
}
