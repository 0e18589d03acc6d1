//! Duration strings
//!
//! TTLs and intervals may be written as `"150ms"`, `"30s"`, `"5m"`, `"1h"`,
//! `"1d"`, or as a bare number of milliseconds.

use std::time::Duration;

use crate::error::{CacheError, Result};

/// Parses a duration string.
///
/// A bare number is read as milliseconds. Fractions are allowed (`"1.5s"`).
pub fn parse_duration(input: &str) -> Result<Duration> {
    let s = input.trim();
    if s.is_empty() {
        return Err(invalid(input));
    }

    let num_end = s
        .chars()
        .position(|c| !c.is_ascii_digit() && c != '.')
        .unwrap_or(s.len());

    let (num_str, unit) = s.split_at(num_end);
    let num: f64 = num_str.parse().map_err(|_| invalid(input))?;

    let multiplier: f64 = match unit.trim() {
        "" | "ms" => 1.0,
        "s" => 1_000.0,
        "m" => 60_000.0,
        "h" => 3_600_000.0,
        "d" => 86_400_000.0,
        _ => return Err(invalid(input)),
    };

    Ok(Duration::from_millis((num * multiplier) as u64))
}

fn invalid(value: &str) -> CacheError {
    CacheError::InvalidDuration {
        value: value.to_string(),
    }
}
