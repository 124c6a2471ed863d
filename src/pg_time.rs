//! Conversion between wall-clock time and the wire's commit-time
//! representation: microseconds since the PostgreSQL epoch (2000-01-01),
//! rather than the Unix epoch. Grounded on a typical replication client's
//! `system_time_to_postgres_timestamp` helper.

use chrono::{DateTime, TimeZone, Utc};

const PG_EPOCH_OFFSET_SECS: i64 = 946_684_800;

/// Convert a UTC timestamp into the wire's PostgreSQL-epoch microseconds.
pub fn to_pg_timestamp(time: DateTime<Utc>) -> i64 {
    time.timestamp_micros() - PG_EPOCH_OFFSET_SECS * 1_000_000
}

/// Convert the wire's PostgreSQL-epoch microseconds back into a UTC
/// timestamp, for logging and diagnostics.
pub fn from_pg_timestamp(pg_micros: i64) -> DateTime<Utc> {
    let unix_micros = pg_micros + PG_EPOCH_OFFSET_SECS * 1_000_000;
    Utc.timestamp_micros(unix_micros).single().unwrap_or(Utc.timestamp_opt(0, 0).unwrap())
}
