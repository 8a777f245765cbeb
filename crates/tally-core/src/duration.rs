//! Duration strings used in flags, env vars, and config files.

use std::time::Duration;

use serde::{Deserialize, Deserializer};

/// Parse a duration string like `"5s"`, `"500ms"`, `"1m"`.
///
/// A bare number is taken as seconds, so `STORE_INTERVAL=300` and
/// `STORE_INTERVAL=300s` mean the same thing.
pub fn parse_duration(s: &str) -> Option<Duration> {
    let s = s.trim();
    if let Some(secs) = s.strip_suffix('s') {
        if let Some(ms) = secs.strip_suffix('m') {
            ms.parse::<u64>().ok().map(Duration::from_millis)
        } else {
            secs.parse::<u64>().ok().map(Duration::from_secs)
        }
    } else if let Some(mins) = s.strip_suffix('m') {
        mins.parse::<u64>()
            .ok()
            .and_then(|m| m.checked_mul(60))
            .map(Duration::from_secs)
    } else {
        s.parse::<u64>().ok().map(Duration::from_secs)
    }
}

/// Adapter for clap's `value_parser`.
pub fn duration_arg(s: &str) -> Result<Duration, String> {
    parse_duration(s).ok_or_else(|| format!("invalid duration {s:?} (expected e.g. 10, 10s, 500ms, 2m)"))
}

/// Config-file form of a duration: `300` (seconds) or `"500ms"`.
#[derive(Deserialize)]
#[serde(untagged)]
enum RawDuration {
    Secs(u64),
    Text(String),
}

/// `deserialize_with` helper for optional duration fields in TOML files.
pub fn deserialize_opt<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<RawDuration>::deserialize(deserializer)? {
        None => Ok(None),
        Some(RawDuration::Secs(secs)) => Ok(Some(Duration::from_secs(secs))),
        Some(RawDuration::Text(text)) => duration_arg(&text)
            .map(Some)
            .map_err(serde::de::Error::custom),
    }
}
