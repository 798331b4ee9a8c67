//! Formatting helpers shared by commands

use chrono::{DateTime, Local, Utc};
use std::time::Duration;

/// Format an instant in local time ("2024-01-03 14:30:00")
pub fn format_local(at: DateTime<Utc>) -> String {
    at.with_timezone(&Local).format("%Y-%m-%d %H:%M:%S").to_string()
}

/// Format an instant relative to `now` ("2 hours ago", "in 5 minutes")
pub fn format_relative(at: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let delta = now - at;
    let secs = delta.num_seconds();
    if secs >= 0 {
        match format_duration(Duration::from_secs(secs as u64)) {
            s if s == "just now" => s,
            s => format!("{} ago", s),
        }
    } else {
        match format_duration(Duration::from_secs(secs.unsigned_abs())) {
            s if s == "just now" => "now".to_string(),
            s => format!("in {}", s),
        }
    }
}

/// Format file size in human-readable format
pub fn format_size(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if bytes >= GB {
        format!("{:.2} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.2} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.2} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}

/// Most significant unit only ("3 hours", "1 minute")
pub fn format_duration(duration: Duration) -> String {
    const MINUTE: u64 = 60;
    const HOUR: u64 = MINUTE * 60;
    const DAY: u64 = HOUR * 24;
    const WEEK: u64 = DAY * 7;

    let secs = duration.as_secs();
    let (count, unit) = if secs < 5 {
        return "just now".to_string();
    } else if secs < MINUTE {
        (secs, "second")
    } else if secs < HOUR {
        (secs / MINUTE, "minute")
    } else if secs < DAY {
        (secs / HOUR, "hour")
    } else if secs < WEEK {
        (secs / DAY, "day")
    } else {
        (secs / WEEK, "week")
    };

    if count == 1 {
        format!("1 {}", unit)
    } else {
        format!("{} {}s", count, unit)
    }
}

/// Interval as written in config ("every 90 minutes")
pub fn format_interval(interval: Duration) -> String {
    let minutes = interval.as_secs() / 60;
    if minutes == 1 {
        "every minute".to_string()
    } else {
        format!("every {} minutes", minutes)
    }
}
