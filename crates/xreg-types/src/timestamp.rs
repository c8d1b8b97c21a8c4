use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use crate::error::TypeError;

/// A point in time with a single canonical text form.
///
/// The canonical form is RFC 3339 in UTC with a `Z` suffix and the
/// fractional seconds trimmed of trailing zeros
/// (`2024-05-01T10:00:00.5Z`, `2024-05-01T10:00:00Z`).
///
/// Ordering follows the instant, not the text.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Timestamp(DateTime<Utc>);

impl Timestamp {
    /// The current wall-clock time.
    pub fn now() -> Self {
        Self(Utc::now())
    }

    /// Parse any RFC 3339 timestamp, converting it to UTC.
    pub fn parse(text: &str) -> Result<Self, TypeError> {
        DateTime::parse_from_rfc3339(text.trim())
            .map(|dt| Self(dt.with_timezone(&Utc)))
            .map_err(|e| TypeError::InvalidTimestamp {
                value: text.to_string(),
                reason: e.to_string(),
            })
    }

    /// Build from milliseconds since the UNIX epoch.
    pub fn from_millis(ms: i64) -> Option<Self> {
        DateTime::<Utc>::from_timestamp_millis(ms).map(Self)
    }

    pub fn as_datetime(&self) -> &DateTime<Utc> {
        &self.0
    }

    /// The canonical text form.
    pub fn canonical(&self) -> String {
        let full = self.0.to_rfc3339_opts(SecondsFormat::Nanos, true);
        // "YYYY-MM-DDTHH:MM:SS.nnnnnnnnnZ"
        match full.split_once('.') {
            Some((head, frac)) => {
                let digits = frac.trim_end_matches('Z').trim_end_matches('0');
                if digits.is_empty() {
                    format!("{head}Z")
                } else {
                    format!("{head}.{digits}Z")
                }
            }
            None => full,
        }
    }
}

/// Normalize a timestamp string to canonical form.
pub fn normalize(text: &str) -> Result<String, TypeError> {
    Timestamp::parse(text).map(|ts| ts.canonical())
}

impl FromStr for Timestamp {
    type Err = TypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Debug for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Timestamp({})", self.canonical())
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.canonical())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonical_trims_fraction() {
        assert_eq!(
            normalize("2024-05-01T10:00:00.500000Z").unwrap(),
            "2024-05-01T10:00:00.5Z"
        );
        assert_eq!(
            normalize("2024-05-01T10:00:00.000Z").unwrap(),
            "2024-05-01T10:00:00Z"
        );
    }

    #[test]
    fn offsets_convert_to_utc() {
        assert_eq!(
            normalize("2024-05-01T12:00:00+02:00").unwrap(),
            "2024-05-01T10:00:00Z"
        );
    }

    #[test]
    fn canonical_form_is_a_fixed_point() {
        let once = normalize("2024-05-01T10:00:00.123+00:00").unwrap();
        assert_eq!(normalize(&once).unwrap(), once);
    }

    #[test]
    fn invalid_text_is_rejected() {
        assert!(normalize("yesterday").is_err());
        assert!(normalize("2024-13-01T00:00:00Z").is_err());
    }

    #[test]
    fn ordering_follows_instant_not_text() {
        let a = Timestamp::parse("2024-05-01T10:00:05Z").unwrap();
        let b = Timestamp::parse("2024-05-01T10:00:05.1Z").unwrap();
        assert!(a < b);
        // Lexicographic comparison of the canonical text gets this wrong.
        assert!(a.canonical() > b.canonical());
    }

    #[test]
    fn now_is_reasonable() {
        // After 2020-01-01.
        assert!(Timestamp::now().as_datetime().timestamp_millis() > 1_577_836_800_000);
    }

    proptest::proptest! {
        #[test]
        fn canonical_is_idempotent(ms in 0i64..4_102_444_800_000) {
            let ts = Timestamp::from_millis(ms).unwrap();
            let once = ts.canonical();
            proptest::prop_assert_eq!(normalize(&once).unwrap(), once.clone());
            proptest::prop_assert_eq!(Timestamp::parse(&once).unwrap(), ts);
        }
    }
}
