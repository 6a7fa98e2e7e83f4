/// Builders producing payloads in the wire shape the messaging API uses.
pub mod wire {
    use serde_json::{json, Value};

    /// A history record as the paginated API serves it.
    pub fn record_json(id: &str, body: &str, created_on: &str) -> Value {
        json!({
            "MessageId": id,
            "Content": body,
            "CreatedOn": created_on,
        })
    }

    /// A history record with an explicit sender.
    pub fn record_json_from(id: &str, sender: &str, body: &str, created_on: &str) -> Value {
        json!({
            "MessageId": id,
            "Sender": sender,
            "Content": body,
            "CreatedOn": created_on,
        })
    }

    /// Wrap a record in the envelope the push feed delivers.
    pub fn live_event(record: Value) -> Value {
        json!({ "record": record })
    }
}

/// In-memory collaborator fakes.
pub mod fakes {
    use std::collections::{HashMap, HashSet, VecDeque};
    use std::sync::{Arc, Condvar, Mutex};

    use chrono::{DateTime, Utc};
    use tokio::sync::Notify;

    use skein_core::{
        deliver::Delivery,
        error::{DeliveryError, HistoryError, StoreError},
        history::{HistoryApi, HistoryPage},
        room::RoomId,
        store::WatermarkStore,
    };

    /// One observed call to `fetch_page`.
    #[derive(Debug, Clone)]
    pub struct PageRequest {
        pub room: RoomId,
        pub after: Option<DateTime<Utc>>,
        pub token: Option<String>,
        pub page_size: u32,
    }

    /// History API fake serving a scripted sequence of page results and
    /// recording every request. Once the script runs out it serves empty
    /// final pages. An optional gate holds each request until released,
    /// letting tests interleave live traffic with an in-flight fetch.
    #[derive(Debug, Default)]
    pub struct ScriptedHistory {
        pages: Mutex<VecDeque<Result<HistoryPage, HistoryError>>>,
        calls: Mutex<Vec<PageRequest>>,
        gate: Option<Arc<Notify>>,
    }

    impl ScriptedHistory {
        pub fn new(pages: Vec<Result<HistoryPage, HistoryError>>) -> Self {
            Self {
                pages: Mutex::new(pages.into()),
                calls: Mutex::new(Vec::new()),
                gate: None,
            }
        }

        /// Hold every page request until the returned gate is notified,
        /// once per request.
        pub fn gated(pages: Vec<Result<HistoryPage, HistoryError>>) -> (Self, Arc<Notify>) {
            let gate = Arc::new(Notify::new());
            let history = Self {
                pages: Mutex::new(pages.into()),
                calls: Mutex::new(Vec::new()),
                gate: Some(gate.clone()),
            };
            (history, gate)
        }

        pub fn calls(&self) -> Vec<PageRequest> {
            self.calls.lock().unwrap().clone()
        }
    }

    impl HistoryApi for ScriptedHistory {
        async fn fetch_page(
            &self,
            room: &RoomId,
            after: Option<DateTime<Utc>>,
            token: Option<&str>,
            page_size: u32,
        ) -> Result<HistoryPage, HistoryError> {
            self.calls.lock().unwrap().push(PageRequest {
                room: room.clone(),
                after,
                token: token.map(str::to_string),
                page_size,
            });

            if let Some(gate) = &self.gate {
                gate.notified().await;
            }

            self.pages
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok(HistoryPage::default()))
        }
    }

    /// History API fake whose requests never resolve. `started()` is
    /// notified when the first request arrives, so tests can cancel a
    /// fetch that is provably in flight.
    #[derive(Debug, Default)]
    pub struct HangingHistory {
        started: Arc<Notify>,
        requests: Mutex<usize>,
    }

    impl HangingHistory {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn started(&self) -> &Notify {
            &self.started
        }

        pub fn request_count(&self) -> usize {
            *self.requests.lock().unwrap()
        }
    }

    impl HistoryApi for HangingHistory {
        async fn fetch_page(
            &self,
            _room: &RoomId,
            _after: Option<DateTime<Utc>>,
            _token: Option<&str>,
            _page_size: u32,
        ) -> Result<HistoryPage, HistoryError> {
            *self.requests.lock().unwrap() += 1;
            self.started.notify_one();
            std::future::pending().await
        }
    }

    /// One message as the presentation sink saw it.
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub struct Delivered {
        pub member: String,
        pub body: String,
        pub timestamp: DateTime<Utc>,
    }

    /// Delivery fake recording everything, optionally rejecting configured
    /// bodies to exercise the skip-on-failure path.
    #[derive(Debug, Default)]
    pub struct RecordingDelivery {
        delivered: Mutex<Vec<Delivered>>,
        rejected_bodies: Mutex<HashSet<String>>,
    }

    impl RecordingDelivery {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn reject_body(&self, body: impl Into<String>) {
            self.rejected_bodies.lock().unwrap().insert(body.into());
        }

        pub fn delivered(&self) -> Vec<Delivered> {
            self.delivered.lock().unwrap().clone()
        }

        pub fn bodies(&self) -> Vec<String> {
            self.delivered
                .lock()
                .unwrap()
                .iter()
                .map(|d| d.body.clone())
                .collect()
        }
    }

    impl Delivery for RecordingDelivery {
        fn deliver(
            &self,
            member: &str,
            body: &str,
            timestamp: DateTime<Utc>,
        ) -> Result<(), DeliveryError> {
            if self.rejected_bodies.lock().unwrap().contains(body) {
                return Err(DeliveryError::Rejected(body.to_string()));
            }
            self.delivered.lock().unwrap().push(Delivered {
                member: member.to_string(),
                body: body.to_string(),
                timestamp,
            });
            Ok(())
        }
    }

    /// Delivery fake whose calls block until `open` is called, recording
    /// everything once released. `entered()` is notified on every call, so
    /// a test can act while a batch delivery is provably in progress.
    /// Requires a multi-threaded runtime; the blocked call parks its worker.
    #[derive(Debug, Default)]
    pub struct GatedDelivery {
        delivered: Mutex<Vec<Delivered>>,
        open: Mutex<bool>,
        opened: Condvar,
        entered: Notify,
    }

    impl GatedDelivery {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn entered(&self) -> &Notify {
            &self.entered
        }

        pub fn open(&self) {
            *self.open.lock().unwrap() = true;
            self.opened.notify_all();
        }

        pub fn delivered(&self) -> Vec<Delivered> {
            self.delivered.lock().unwrap().clone()
        }
    }

    impl Delivery for GatedDelivery {
        fn deliver(
            &self,
            member: &str,
            body: &str,
            timestamp: DateTime<Utc>,
        ) -> Result<(), DeliveryError> {
            self.entered.notify_one();
            let mut open = self.open.lock().unwrap();
            while !*open {
                open = self.opened.wait(open).unwrap();
            }
            drop(open);

            self.delivered.lock().unwrap().push(Delivered {
                member: member.to_string(),
                body: body.to_string(),
                timestamp,
            });
            Ok(())
        }
    }

    /// Watermark store fake over a plain map, counting writes.
    #[derive(Debug, Default)]
    pub struct MemoryWatermarks {
        values: Mutex<HashMap<String, String>>,
        writes: Mutex<usize>,
    }

    impl MemoryWatermarks {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn seed(&self, room: &RoomId, value: impl Into<String>) {
            self.values
                .lock()
                .unwrap()
                .insert(room.as_str().to_string(), value.into());
        }

        pub fn value(&self, room: &RoomId) -> Option<String> {
            self.values.lock().unwrap().get(room.as_str()).cloned()
        }

        pub fn write_count(&self) -> usize {
            *self.writes.lock().unwrap()
        }
    }

    impl WatermarkStore for MemoryWatermarks {
        async fn get(&self, room: &RoomId) -> Result<Option<String>, StoreError> {
            Ok(self.value(room))
        }

        async fn set(&self, room: &RoomId, value: &str) -> Result<(), StoreError> {
            *self.writes.lock().unwrap() += 1;
            self.values
                .lock()
                .unwrap()
                .insert(room.as_str().to_string(), value.to_string());
            Ok(())
        }
    }
}
