//! Row-level query functions.

pub mod messages;
pub mod pending;

use chrono::{DateTime, TimeZone, Utc};

/// Encode a timestamp as Unix-epoch nanoseconds.
pub(crate) fn to_ns(ts: DateTime<Utc>) -> i64 {
    ts.timestamp_nanos_opt().unwrap_or(i64::MAX)
}

/// Decode a Unix-epoch-nanosecond timestamp.
pub(crate) fn from_ns(ns: i64) -> DateTime<Utc> {
    Utc.timestamp_nanos(ns)
}
