use std::sync::Arc;

use chrono::Utc;
use tracing::warn;

use skein_core::{deliver::Delivery, MessageRecord};

/// Emission helper: sorted batch delivery at the catch-up/live switch, then
/// one-at-a-time pass-through. Never re-enters the session state machine; a
/// failed delivery is logged and skipped.
pub struct DeliverySink<D> {
    delivery: Arc<D>,
    fallback_sender: String,
}

/// What a batch delivery amounted to: how many records went out, and the
/// input index of the last one that did. Skipped records leave no trace
/// here, so the watermark cannot advance past them.
#[derive(Debug, Clone, Copy, Default)]
pub struct BatchReport {
    pub delivered: usize,
    pub last_delivered: Option<usize>,
}

impl<D: Delivery> DeliverySink<D> {
    pub fn new(delivery: Arc<D>, fallback_sender: impl Into<String>) -> Self {
        Self {
            delivery,
            fallback_sender: fallback_sender.into(),
        }
    }

    /// Deliver records sequentially, preserving input order.
    pub fn deliver_batch(&self, records: &[MessageRecord]) -> BatchReport {
        let mut report = BatchReport::default();
        for (index, record) in records.iter().enumerate() {
            if self.deliver_record(record) {
                report.delivered += 1;
                report.last_delivered = Some(index);
            }
        }
        report
    }

    /// Live pass-through for a single record. A record carrying no parsable
    /// creation time is delivered with the current time.
    pub fn deliver_one(&self, record: &MessageRecord) -> bool {
        self.deliver_record(record)
    }

    fn deliver_record(&self, record: &MessageRecord) -> bool {
        let member = record.sender.as_deref().unwrap_or(&self.fallback_sender);
        let timestamp = record.created_on.unwrap_or_else(Utc::now);

        match self.delivery.deliver(member, &record.body, timestamp) {
            Ok(()) => true,
            Err(error) => {
                warn!(%error, id = %record.id, "delivery failed, skipping record");
                false
            }
        }
    }
}
