//! Short human-readable labels for game timestamps.

use crate::types::Timestamp;

/// Day, month and time of day, e.g. `15 Jan 14:30`.
pub fn format_date_time(ts: &Timestamp) -> String {
    ts.format("%-d %b %H:%M").to_string()
}

/// Day, month and year, e.g. `15 Jan 2025`.
pub fn format_date(ts: &Timestamp) -> String {
    ts.format("%-d %b %Y").to_string()
}
