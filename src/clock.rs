//! # Wall Clock
//!
//! Second-precision wall-clock source shared by the log window and the
//! telemetry writer, so both can be driven by a fake clock in tests.

use chrono::{Local, NaiveDateTime};

/// Timestamp layout used in telemetry rows and the durable log mirror
/// (`yyyy-MM-dd HH:mm:ss`, always 19 characters).
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Width of a formatted [`TIMESTAMP_FORMAT`] value.
pub const TIMESTAMP_LEN: usize = 19;

/// Source of the current local wall-clock time.
pub trait Clock: Send + Sync {
    fn now(&self) -> NaiveDateTime;
}

/// Clock backed by the host's local time.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> NaiveDateTime {
        Local::now().naive_local()
    }
}

/// Format a timestamp with [`TIMESTAMP_FORMAT`].
pub fn format_timestamp(at: NaiveDateTime) -> String {
    at.format(TIMESTAMP_FORMAT).to_string()
}

/// Parse a timestamp written by [`format_timestamp`].
pub fn parse_timestamp(text: &str) -> Option<NaiveDateTime> {
    NaiveDateTime::parse_from_str(text, TIMESTAMP_FORMAT).ok()
}
