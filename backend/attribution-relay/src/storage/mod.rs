//! Local state that survives between runs: the dedup cache and the watermark file.

pub mod cache;
pub mod watermark;

pub use cache::EventCache;
pub use watermark::{Watermark, WatermarkStore};

use crate::error::{RelayError, Result};
use chrono::{DateTime, SecondsFormat, Utc};

/// Fixed-width UTC text, so lexicographic order equals chronological order.
pub(crate) fn encode_timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

pub(crate) fn decode_timestamp(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|e| RelayError::InvalidTimestamp(format!("{raw:?}: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn encoded_timestamps_sort_chronologically() {
        let whole = Utc.with_ymd_and_hms(2024, 1, 15, 12, 0, 0).unwrap();
        let later = whole + chrono::Duration::milliseconds(500);

        let (a, b) = (encode_timestamp(whole), encode_timestamp(later));
        assert_eq!(a, "2024-01-15T12:00:00.000Z");
        assert!(a < b);
        assert_eq!(decode_timestamp(&b).unwrap(), later);
    }

    #[test]
    fn decode_rejects_garbage() {
        assert!(matches!(
            decode_timestamp("yesterday"),
            Err(RelayError::InvalidTimestamp(_))
        ));
    }
}
