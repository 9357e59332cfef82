//! Duration parsing and serde codecs shared across varsync crates.
//!
//! Durations in config files (poll intervals, reconcile intervals, backoff
//! bounds) are written as human-readable strings (`"10s"`, `"2m"`) but
//! serialized internally as milliseconds so they round-trip exactly.

use std::time::Duration;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Deserialize a [`Duration`] from either a human-readable string or a raw
/// millisecond count.
pub fn deserialize_duration<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum DurationHelper {
        String(String),
        Millis(u64),
    }

    match DurationHelper::deserialize(deserializer)? {
        DurationHelper::String(s) => humantime::parse_duration(&s)
            .map_err(|e| serde::de::Error::custom(format!("invalid duration: {e}"))),
        DurationHelper::Millis(ms) => Ok(Duration::from_millis(ms)),
    }
}

/// Serialize a [`Duration`] as a millisecond count.
pub fn serialize_duration<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    serializer.serialize_u64(duration.as_millis() as u64)
}

/// Helper struct for fields that want a plain `#[serde(with = "...")]` attribute
/// instead of separate serialize/deserialize function paths.
pub mod serde_millis {
    pub use super::deserialize_duration as deserialize;
    pub use super::serialize_duration as serialize;
}
