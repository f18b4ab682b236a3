//! Small helpers for log formatting, text shaping and date handling.

use chrono::{NaiveDate, Utc};

/// Truncate a string for logging purposes.
///
/// Long strings are cut to `max` characters with an ellipsis and the count of
/// dropped bytes appended. Cuts always land on a character boundary.
///
/// # Examples
///
/// ```ignore
/// assert_eq!(truncate_for_log("short", 100), "short");
/// assert_eq!(truncate_for_log(&"a".repeat(500), 10), "aaaaaaaaaa…(+490 bytes)");
/// ```
pub fn truncate_for_log(s: &str, max: usize) -> String {
    match s.char_indices().nth(max) {
        None => s.to_string(),
        Some((cut, _)) => format!("{}…(+{} bytes)", &s[..cut], s.len() - cut),
    }
}

/// First `max` characters of `s`, with `...` appended when anything was cut.
pub fn preview(s: &str, max: usize) -> String {
    match s.char_indices().nth(max) {
        None => s.to_string(),
        Some((cut, _)) => format!("{}...", &s[..cut]),
    }
}

/// Keep at most the first `max` characters of `s`.
pub fn take_chars(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        None => s,
        Some((cut, _)) => &s[..cut],
    }
}

/// Detect if a serde_json error indicates truncated/incomplete JSON.
///
/// A reply cut off by the model's token limit fails with an EOF error rather
/// than a syntax error; the distinction is worth logging.
pub fn looks_truncated(e: &serde_json::Error) -> bool {
    use serde_json::error::Category;
    matches!(e.classify(), Category::Eof)
}

/// Today's date in UTC.
pub fn today_utc() -> NaiveDate {
    Utc::now().date_naive()
}
