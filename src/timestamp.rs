//! Server timestamp normalization and relative-time display.
//!
//! The backend emits naive ISO-8601 strings for some fields
//! (e.g. `2023-10-08T18:32:11.123`). Those are UTC, never viewer-local.

use anyhow::{anyhow, Result};
use chrono::{DateTime, NaiveDateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;

/// Matches a trailing `Z` or `+HH:MM` / `-HHMM` / `+HH` offset.
static OFFSET_SUFFIX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)([+-]\d\d(:?\d\d)?|z)$").expect("offset regex"));

/// Hour-only offset such as `+00`
static HOUR_OFFSET: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[+-]\d\d$").expect("hour offset regex"));

const NAIVE_FORMATS: &[&str] = &["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"];

/// Whether the string carries its own UTC offset.
pub fn has_offset(raw: &str) -> bool {
    OFFSET_SUFFIX.is_match(raw.trim())
}

/// Parse a server timestamp, treating offset-less values as UTC.
pub fn parse_server_timestamp(raw: &str) -> Result<DateTime<Utc>> {
    let raw = raw.trim();

    if has_offset(raw) {
        let padded;
        let raw = if HOUR_OFFSET.is_match(raw) {
            padded = format!("{}:00", raw);
            padded.as_str()
        } else {
            raw
        };
        if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
            return Ok(dt.with_timezone(&Utc));
        }
        // `+HHMM` is not RFC 3339 but chrono's %z accepts it
        return DateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f%z")
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|e| anyhow!("Invalid timestamp '{}': {}", raw, e));
    }

    for fmt in NAIVE_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, fmt) {
            return Ok(naive.and_utc());
        }
    }

    Err(anyhow!("Invalid timestamp '{}'", raw))
}

/// Human-readable distance from `ts` to `now`, e.g. "3 minutes ago".
///
/// Instants in the future are clamped to `now`, so clock skew between client
/// and server shows up as "now" rather than "in 3 minutes".
pub fn time_ago(ts: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let clamped = ts.min(now);
    let secs = (now - clamped).num_seconds();

    if secs <= 0 {
        return "now".to_string();
    }

    let (value, unit) = match secs {
        s if s < 60 => (s, "second"),
        s if s < 3_600 => (s / 60, "minute"),
        s if s < 86_400 => (s / 3_600, "hour"),
        s if s < 86_400 * 30 => (s / 86_400, "day"),
        s if s < 86_400 * 365 => (s / (86_400 * 30), "month"),
        s => (s / (86_400 * 365), "year"),
    };

    if value == 1 {
        format!("1 {} ago", unit)
    } else {
        format!("{} {}s ago", value, unit)
    }
}

/// Serde adapter for `DateTime<Utc>` fields fed by the backend.
pub mod serde_utc {
    use chrono::{DateTime, SecondsFormat, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(ts: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&ts.to_rfc3339_opts(SecondsFormat::Millis, true))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        super::parse_server_timestamp(&raw).map_err(serde::de::Error::custom)
    }
}
