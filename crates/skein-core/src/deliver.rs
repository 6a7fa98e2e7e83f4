use chrono::{DateTime, Utc};

use crate::error::DeliveryError;

/// Presentation sink: renders one message into the conversation view.
/// Push-only from the core's perspective; a failure is logged and the
/// record skipped, never fatal to the session.
pub trait Delivery: Send + Sync + 'static {
    fn deliver(
        &self,
        member: &str,
        body: &str,
        timestamp: DateTime<Utc>,
    ) -> Result<(), DeliveryError>;
}
