use std::collections::HashMap;

use tracing::debug;

use skein_core::MessageRecord;

/// Which producer a record arrived from while catching up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordSource {
    History,
    Live,
}

/// Id-keyed store absorbing duplicates from the history fetch and the live
/// feed while a session catches up. First write wins for a given message
/// id, so a record re-sent by the other producer is dropped without churn.
#[derive(Debug, Default)]
pub struct MessageDeduper {
    entries: HashMap<String, Entry>,
    next_seq: u64,
}

#[derive(Debug)]
struct Entry {
    seq: u64,
    source: RecordSource,
    record: MessageRecord,
}

/// What a drained catch-up holds: the history backlog sorted by creation
/// time (insertion order breaks ties), and live arrivals in receipt order,
/// to be passed through after the mode switch.
#[derive(Debug, Default)]
pub struct CatchupBatch {
    pub history: Vec<MessageRecord>,
    pub live: Vec<MessageRecord>,
}

impl MessageDeduper {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a record under its id. Returns `false` when the id was already
    /// present and the duplicate was absorbed.
    pub fn insert(&mut self, record: MessageRecord, source: RecordSource) -> bool {
        use std::collections::hash_map::Entry as MapEntry;

        match self.entries.entry(record.id.clone()) {
            MapEntry::Occupied(_) => false,
            MapEntry::Vacant(slot) => {
                slot.insert(Entry {
                    seq: self.next_seq,
                    source,
                    record,
                });
                self.next_seq += 1;
                true
            }
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Take everything out as a `CatchupBatch` and clear the store. History
    /// records whose timestamp never parsed cannot be ordered and are
    /// dropped; live records keep their receipt order regardless.
    pub fn drain_sorted(&mut self) -> CatchupBatch {
        let mut history = Vec::new();
        let mut live = Vec::new();

        for (_, entry) in self.entries.drain() {
            match entry.source {
                RecordSource::History => history.push(entry),
                RecordSource::Live => live.push(entry),
            }
        }
        self.next_seq = 0;

        let unordered = history
            .iter()
            .filter(|entry| entry.record.created_on.is_none())
            .count();
        if unordered > 0 {
            debug!(
                count = unordered,
                "dropped history records without a parsable timestamp"
            );
        }
        history.retain(|entry| entry.record.created_on.is_some());
        history.sort_by_key(|entry| (entry.record.created_on, entry.seq));
        live.sort_by_key(|entry| entry.seq);

        CatchupBatch {
            history: history.into_iter().map(|entry| entry.record).collect(),
            live: live.into_iter().map(|entry| entry.record).collect(),
        }
    }
}
