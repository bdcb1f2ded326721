//! Timestamp rendering.
//!
//! Every timestamp stored in the sink uses the same textual format,
//! `YYYY-MM-DD HH:MM:SS,mmm`, with a comma before the milliseconds. The
//! millisecond resolution keeps diagnostics rows (whose timestamp is a
//! primary key) distinct at realistic logging rates; the one remaining
//! collision case is handled by the sink with a single bumped retry.

use chrono::{DateTime, Local, NaiveDateTime};

/// Renders a timestamp in the sink format.
pub fn format_timestamp(timestamp: DateTime<Local>) -> String {
    format_naive(timestamp.naive_local())
}

/// Renders a naive timestamp in the sink format.
pub fn format_naive(timestamp: NaiveDateTime) -> String {
    format!(
        "{},{:03}",
        timestamp.format("%Y-%m-%d %H:%M:%S"),
        timestamp.and_utc().timestamp_subsec_millis()
    )
}

/// The current time in the sink format.
pub fn now_string() -> String {
    format_timestamp(Local::now())
}

/// Today's date as `YYYY-MM-DD`, used to tag snapshot files.
pub fn today_string() -> String {
    Local::now().format("%Y-%m-%d").to_string()
}

/// Bumps a rendered timestamp by one millisecond, for the diagnostics
/// primary-key retry. Falls back to the input on a parse failure.
pub fn bump_millisecond(rendered: &str) -> String {
    let normalized = rendered.replacen(',', ".", 1);
    match NaiveDateTime::parse_from_str(&normalized, "%Y-%m-%d %H:%M:%S%.3f") {
        Ok(parsed) => format_naive(parsed + chrono::Duration::milliseconds(1)),
        Err(_) => rendered.to_string(),
    }
}
