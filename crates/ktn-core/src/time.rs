//! ISO-8601 modification timestamps.
//!
//! The owning store stamps `updatedAt` on every mutation. Replicas keep the
//! exact text they received so an overwritten entity is byte-for-byte the
//! remote one, while ordering uses the parsed instant.

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, FixedOffset, SecondsFormat, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::CoreError;

/// An RFC 3339 / ISO-8601 timestamp.
#[derive(Clone)]
pub struct Timestamp {
    raw: String,
    instant: DateTime<FixedOffset>,
}

impl Timestamp {
    /// Parse an ISO-8601 string.
    pub fn parse(raw: &str) -> Result<Self, CoreError> {
        let instant = DateTime::parse_from_rfc3339(raw)
            .map_err(|e| CoreError::InvalidTimestamp(format!("{raw:?}: {e}")))?;
        Ok(Self {
            raw: raw.to_string(),
            instant,
        })
    }

    /// The current time, millisecond precision, `Z` suffix.
    pub fn now() -> Self {
        Self::from_datetime(Utc::now())
    }

    /// Build from a UTC instant.
    pub fn from_datetime(at: DateTime<Utc>) -> Self {
        Self {
            raw: at.to_rfc3339_opts(SecondsFormat::Millis, true),
            instant: at.fixed_offset(),
        }
    }

    /// The text exactly as received.
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// The instant in UTC.
    pub fn to_utc(&self) -> DateTime<Utc> {
        self.instant.with_timezone(&Utc)
    }

    /// Strictly later than `other`. Equal instants written differently are not later.
    pub fn is_after(&self, other: &Timestamp) -> bool {
        self.instant > other.instant
    }
}

impl PartialEq for Timestamp {
    fn eq(&self, other: &Self) -> bool {
        self.raw == other.raw
    }
}

impl Eq for Timestamp {}

impl PartialOrd for Timestamp {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Timestamp {
    fn cmp(&self, other: &Self) -> Ordering {
        self.instant
            .cmp(&other.instant)
            .then_with(|| self.raw.cmp(&other.raw))
    }
}

impl fmt::Debug for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Timestamp({})", self.raw)
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

impl FromStr for Timestamp {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl Serialize for Timestamp {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.raw)
    }
}

impl<'de> Deserialize<'de> for Timestamp {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Timestamp::parse(&raw).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_keeps_raw_text() {
        let ts = Timestamp::parse("2026-01-01T00:00:00.000Z").unwrap();
        assert_eq!(ts.as_str(), "2026-01-01T00:00:00.000Z");
        assert_eq!(ts.to_string(), "2026-01-01T00:00:00.000Z");
    }

    #[test]
    fn test_is_after_is_strict() {
        let a = Timestamp::parse("2026-01-01T00:00:00Z").unwrap();
        let b = Timestamp::parse("2026-01-01T00:00:00.000Z").unwrap();
        let later = Timestamp::parse("2026-01-01T00:00:00.001Z").unwrap();

        assert!(!a.is_after(&b));
        assert!(!b.is_after(&a));
        assert!(later.is_after(&a));
        assert!(!a.is_after(&later));
    }

    #[test]
    fn test_offsets_compare_by_instant() {
        let utc = Timestamp::parse("2026-01-01T10:00:00Z").unwrap();
        let plus_two = Timestamp::parse("2026-01-01T11:00:00+02:00").unwrap();
        assert!(utc.is_after(&plus_two));
    }

    #[test]
    fn test_rejects_garbage() {
        assert!(Timestamp::parse("yesterday").is_err());
        assert!(serde_json::from_str::<Timestamp>("\"2026-13-01T00:00:00Z\"").is_err());
    }

    #[test]
    fn test_serde_is_plain_string() {
        let ts = Timestamp::parse("2026-02-01T00:00:00Z").unwrap();
        let json = serde_json::to_string(&ts).unwrap();
        assert_eq!(json, "\"2026-02-01T00:00:00Z\"");
        let back: Timestamp = serde_json::from_str(&json).unwrap();
        assert_eq!(back, ts);
    }

    #[test]
    fn test_now_is_millis_utc() {
        let now = Timestamp::now();
        assert!(now.as_str().ends_with('Z'));
        assert_eq!(Timestamp::parse(now.as_str()).unwrap(), now);
    }
}
