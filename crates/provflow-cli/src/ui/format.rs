//! Formatting utilities for CLI output.

use chrono::{DateTime, Utc};

/// Truncate a string to at most `max_len` characters, ending in `...`.
///
/// # Examples
///
/// ```ignore
/// assert_eq!(truncate_str("hello", 10), "hello");
/// assert_eq!(truncate_str("hello world", 8), "hello...");
/// ```
pub fn truncate_str(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else if max_len <= 3 {
        ".".repeat(max_len)
    } else {
        let kept: String = s.chars().take(max_len - 3).collect();
        format!("{}...", kept)
    }
}

/// Format a timestamp as relative time ("5 mins ago", "3h ago", "2d ago").
///
/// Timestamps older than a week, or in the future, print as a date.
pub fn format_relative_time(timestamp: DateTime<Utc>) -> String {
    let duration = Utc::now().signed_duration_since(timestamp);

    if duration.num_seconds() < 0 {
        return timestamp.format("%Y-%m-%d").to_string();
    }

    if duration.num_minutes() < 1 {
        "just now".to_string()
    } else if duration.num_hours() < 1 {
        format!("{} mins ago", duration.num_minutes())
    } else if duration.num_hours() < 24 {
        format!("{}h ago", duration.num_hours())
    } else if duration.num_days() < 7 {
        format!("{}d ago", duration.num_days())
    } else {
        timestamp.format("%Y-%m-%d").to_string()
    }
}

/// `"1 step"`, `"3 steps"`.
pub fn count(n: usize, noun: &str) -> String {
    if n == 1 {
        format!("{} {}", n, noun)
    } else {
        format!("{} {}s", n, noun)
    }
}

/// Join paths for a table cell, eliding after `max` entries.
pub fn path_list(paths: &[String], max: usize) -> String {
    if paths.len() <= max {
        paths.join(", ")
    } else {
        format!("{}, +{} more", paths[..max].join(", "), paths.len() - max)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_str() {
        assert_eq!(truncate_str("hello", 10), "hello");
        assert_eq!(truncate_str("hello", 5), "hello");
        assert_eq!(truncate_str("hello world", 8), "hello...");
        assert_eq!(truncate_str("hello", 3), "...");
        assert_eq!(truncate_str("héllo wörld", 6), "hél...");
    }

    #[test]
    fn test_relative_time() {
        assert_eq!(format_relative_time(Utc::now()), "just now");
        let old = Utc::now() - chrono::Duration::hours(3);
        assert_eq!(format_relative_time(old), "3h ago");
    }

    #[test]
    fn test_count() {
        assert_eq!(count(1, "step"), "1 step");
        assert_eq!(count(0, "step"), "0 steps");
        assert_eq!(count(4, "workflow"), "4 workflows");
    }

    #[test]
    fn test_path_list() {
        let paths: Vec<String> = ["a", "b", "c"].iter().map(|s| s.to_string()).collect();
        assert_eq!(path_list(&paths, 3), "a, b, c");
        assert_eq!(path_list(&paths, 1), "a, +2 more");
    }
}
