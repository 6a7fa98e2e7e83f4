use chrono::{DateTime, NaiveDateTime, Utc};

/// The wire timestamp could not be parsed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unparsable timestamp: {0:?}")]
pub struct TimestampError(pub String);

/// Parse the wire timestamp format: RFC 3339, or a naive
/// `YYYY-MM-DDTHH:MM:SS[.frac]` form taken as UTC. Sub-second digits are
/// preserved. Callers treat a parse failure as "this record contributes
/// nothing to ordering", never as a fatal error.
pub fn parse(text: &str) -> Result<DateTime<Utc>, TimestampError> {
    if let Ok(parsed) = DateTime::parse_from_rfc3339(text) {
        return Ok(parsed.with_timezone(&Utc));
    }

    NaiveDateTime::parse_from_str(text, "%Y-%m-%dT%H:%M:%S%.f")
        .map(|naive| naive.and_utc())
        .map_err(|_| TimestampError(text.to_string()))
}
