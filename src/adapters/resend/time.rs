//! Timestamp parsing for provider payloads.
//!
//! The provider is inconsistent about timestamp layout: webhook envelopes use
//! RFC 3339 while some API responses use a Postgres-style
//! `YYYY-MM-DD HH:MM:SS.ffffff+00` form.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer};

const SQL_LAYOUT: &str = "%Y-%m-%d %H:%M:%S%.f%#z";

/// Parse any timestamp layout the provider is known to emit.
pub fn parse_provider_time(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    DateTime::parse_from_rfc3339(raw)
        .or_else(|_| DateTime::parse_from_str(raw, SQL_LAYOUT))
        .map(|t| t.with_timezone(&Utc))
        .ok()
}

/// `deserialize_with` helper for optional provider timestamps.
///
/// Unparseable values decode as `None` rather than failing the payload.
pub fn deserialize_optional<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<String> = Option::deserialize(deserializer)?;
    Ok(raw.as_deref().and_then(parse_provider_time))
}
