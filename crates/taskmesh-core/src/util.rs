//! Text and timestamp helpers

use chrono::{DateTime, Utc};

/// Normalize optional text by trimming whitespace and removing empties.
///
/// Returns `None` when the input is `None` or the trimmed value is empty.
pub fn normalize_text_option(value: Option<String>) -> Option<String> {
    let value = value?;
    let value = value.trim();
    if value.is_empty() {
        None
    } else {
        Some(value.to_string())
    }
}

/// Timestamp as stored in the database (unix nanoseconds).
pub fn to_nanos(value: DateTime<Utc>) -> i64 {
    value.timestamp_nanos_opt().unwrap_or(i64::MAX)
}

/// Convert a stored unix-nanosecond column back into a timestamp.
pub fn from_nanos(value: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_nanos(value)
}
