//! Queue-age monitoring state.
//!
//! The queue-age alerting job keeps one record per queue in the
//! `queue_age_monitoring` hash: the correlation id of the head message when
//! it was first seen, when that was, and whether an alert was already raised.
//! Each hash value is a JSON document:
//!
//! ```text
//! {"correlation_id": "...", "first_occurance_time": "2024-01-31 12:00:00.000000", "alert_created": false}
//! ```

use std::collections::{BTreeMap, HashMap};

use chrono::{NaiveDateTime, Utc};
use serde::Deserialize;

use crate::error::StateError;
use crate::storage::QueueStore;

/// Hash holding one record per monitored queue.
pub const QUEUE_AGE_HASH_NAME: &str = "queue_age_monitoring";

/// Timestamp layout of `first_occurance_time`.
pub const DATE_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.f";

/// Unpacked state of one monitored queue.
#[derive(Debug, Clone, PartialEq)]
pub struct QueueAgeRecord {
    pub correlation_id: String,
    pub first_occurance_time: NaiveDateTime,
    pub alert_created: bool,
}

impl QueueAgeRecord {
    /// Seconds elapsed between the first sighting and `now`.
    pub fn age_secs(&self, now: NaiveDateTime) -> i64 {
        (now - self.first_occurance_time).num_seconds()
    }
}

#[derive(Debug, Deserialize)]
struct PackedRecord {
    correlation_id: String,
    first_occurance_time: String,
    alert_created: bool,
}

/// Parses a `first_occurance_time` value.
pub fn datetime_from_str(value: &str) -> Result<NaiveDateTime, chrono::ParseError> {
    NaiveDateTime::parse_from_str(value, DATE_FORMAT)
}

/// Unpacks every field of the monitoring hash.
pub fn unpack_state(
    packed: HashMap<String, String>,
) -> Result<BTreeMap<String, QueueAgeRecord>, StateError> {
    packed
        .into_iter()
        .map(|(queue, value)| {
            let invalid = |message: String| StateError::InvalidRecord {
                queue: queue.clone(),
                message,
            };
            let record: PackedRecord =
                serde_json::from_str(&value).map_err(|e| invalid(e.to_string()))?;
            let first_occurance_time = datetime_from_str(&record.first_occurance_time)
                .map_err(|e| invalid(e.to_string()))?;
            let unpacked = QueueAgeRecord {
                correlation_id: record.correlation_id,
                first_occurance_time,
                alert_created: record.alert_created,
            };
            Ok((queue, unpacked))
        })
        .collect()
}

/// Reads and unpacks the monitoring hash.
pub async fn load_state<S>(store: &S) -> Result<BTreeMap<String, QueueAgeRecord>, StateError>
where
    S: QueueStore + ?Sized,
{
    let packed = store.hgetall(QUEUE_AGE_HASH_NAME).await?;
    unpack_state(packed)
}

/// Renders the record of `queue` for the probe output.
pub fn render_record(queue: &str, record: Option<&QueueAgeRecord>) -> String {
    match record {
        Some(record) => format!(
            "queue_age[{queue}]: correlation_id = {}, first_occurance_time = {}, age = {}s, alert_created = {}",
            record.correlation_id,
            record.first_occurance_time.format("%Y-%m-%d %H:%M:%S%.6f"),
            record.age_secs(Utc::now().naive_utc()),
            record.alert_created,
        ),
        None => format!("queue_age[{queue}]: not monitored"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, Timelike};

    #[test]
    fn test_datetime_from_str() {
        let parsed = datetime_from_str("2024-01-31 12:30:45.123456").expect("should parse");
        let expected = NaiveDate::from_ymd_opt(2024, 1, 31)
            .and_then(|d| d.and_hms_micro_opt(12, 30, 45, 123_456))
            .expect("valid date");
        assert_eq!(parsed, expected);
        assert_eq!(parsed.nanosecond(), 123_456_000);
    }

    #[test]
    fn test_unpack_state() {
        let packed = HashMap::from([(
            "orders".to_string(),
            r#"{"correlation_id": "abc", "first_occurance_time": "2024-01-31 12:00:00.000001", "alert_created": true}"#
                .to_string(),
        )]);

        let state = unpack_state(packed).expect("state should unpack");
        let record = state.get("orders").expect("orders should be present");
        assert_eq!(record.correlation_id, "abc");
        assert!(record.alert_created);

        let later = datetime_from_str("2024-01-31 12:01:00.000001").expect("should parse");
        assert_eq!(record.age_secs(later), 60);
    }

    #[test]
    fn test_unpack_state_rejects_bad_timestamp() {
        let packed = HashMap::from([(
            "orders".to_string(),
            r#"{"correlation_id": "abc", "first_occurance_time": "yesterday", "alert_created": false}"#
                .to_string(),
        )]);

        let err = unpack_state(packed).expect_err("bad timestamp must fail");
        assert!(err.to_string().contains("orders"));
    }

    #[test]
    fn test_render_missing_record() {
        assert_eq!(render_record("orders", None), "queue_age[orders]: not monitored");
    }
}
