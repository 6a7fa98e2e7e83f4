use std::sync::{Arc, Mutex, PoisonError};

use dashmap::{mapref::entry::Entry, DashMap};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use skein_core::{
    config::CatchupConfig,
    deliver::Delivery,
    error::JoinError,
    feed::LiveFeed,
    history::HistoryApi,
    room::{Room, RoomId},
    store::WatermarkStore,
};

use crate::{
    deliver::DeliverySink,
    session::{ChatSession, Phase, SessionHandle},
};

/// Entry point for joining and leaving rooms. One session task per joined
/// room; sessions for different rooms run independently.
pub struct ChatClient<H, S, D> {
    history: Arc<H>,
    watermarks: Arc<S>,
    delivery: Arc<D>,
    feed: Arc<dyn LiveFeed>,
    config: CatchupConfig,
    sessions: DashMap<RoomId, SessionEntry>,
    join_guard: Mutex<()>,
}

struct SessionEntry {
    handle: SessionHandle,
    cancel: CancellationToken,
}

impl<H: HistoryApi, S: WatermarkStore, D: Delivery> ChatClient<H, S, D> {
    pub fn new(
        history: Arc<H>,
        watermarks: Arc<S>,
        delivery: Arc<D>,
        feed: Arc<dyn LiveFeed>,
        config: CatchupConfig,
    ) -> Self {
        Self {
            history,
            watermarks,
            delivery,
            feed,
            config,
            sessions: DashMap::new(),
            join_guard: Mutex::new(()),
        }
    }

    /// Join a room and start catching up. Joining an already-joined room is
    /// a no-op returning the existing session's handle; the only failures
    /// are the configured room limit and a refused feed subscription.
    /// Must be called from within a tokio runtime.
    pub fn join_room(&self, room: Room) -> Result<SessionHandle, JoinError> {
        // Joins are serialized so the limit check cannot interleave with
        // another join's insertion. Leaves only shrink the map and need no
        // coordination.
        let _joins = self
            .join_guard
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        if let Some(limit) = self.config.max_rooms {
            if !self.sessions.contains_key(&room.id) && self.sessions.len() >= limit {
                return Err(JoinError::RoomLimit(limit));
            }
        }

        match self.sessions.entry(room.id.clone()) {
            Entry::Occupied(entry) => {
                debug!(room = %room.id, "already joined, reusing session");
                Ok(entry.get().handle.clone())
            }
            Entry::Vacant(slot) => {
                // Subscribe before the session task exists so no event can
                // fall between join returning and catch-up starting.
                let live = self.feed.subscribe(&room.channel)?;
                let cancel = CancellationToken::new();
                let (phase_tx, phase_rx) = watch::channel(Phase::Joining);
                let handle = SessionHandle::new(room.clone(), phase_rx);

                let session = ChatSession {
                    room: room.clone(),
                    config: self.config.clone(),
                    history: self.history.clone(),
                    watermarks: self.watermarks.clone(),
                    sink: DeliverySink::new(
                        self.delivery.clone(),
                        self.config.fallback_sender.clone(),
                    ),
                    live,
                    cancel: cancel.clone(),
                    phase: phase_tx,
                };
                tokio::spawn(session.run());

                info!(room = %room.id, name = %room.name, "joined room");
                slot.insert(SessionEntry {
                    handle: handle.clone(),
                    cancel,
                });
                Ok(handle)
            }
        }
    }

    /// Tear down a room's session: cancels any in-flight history fetch and
    /// unsubscribes the live feed. Safe mid-fetch and idempotent; returns
    /// whether the room was joined.
    pub fn leave_room(&self, id: &RoomId) -> bool {
        match self.sessions.remove(id) {
            Some((_, entry)) => {
                entry.cancel.cancel();
                info!(room = %id, "left room");
                true
            }
            None => false,
        }
    }

    pub fn is_joined(&self, id: &RoomId) -> bool {
        self.sessions.contains_key(id)
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }
}

impl<H, S, D> Drop for ChatClient<H, S, D> {
    fn drop(&mut self) {
        for entry in self.sessions.iter() {
            entry.value().cancel.cancel();
        }
    }
}
