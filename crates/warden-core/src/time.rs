use crate::error::{CoreError, Result};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use time::macros::format_description;
use time::{Date, OffsetDateTime};

/// A point in time as surfaced by providers and policy tags.
///
/// Accepts RFC 3339 timestamps plus the bare-date forms found in resource
/// payloads and marker tags (`2023-01-01`, `2023/01/01`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Timestamp(pub OffsetDateTime);

impl Timestamp {
    pub fn new(datetime: OffsetDateTime) -> Self {
        Self(datetime)
    }

    pub fn inner(&self) -> &OffsetDateTime {
        &self.0
    }

    pub fn unix(&self) -> i64 {
        self.0.unix_timestamp()
    }

    /// Whole days elapsed from `self` to `now` (negative when in the future).
    pub fn age_days(&self, now: OffsetDateTime) -> f64 {
        (now - self.0).as_seconds_f64() / 86_400.0
    }

    /// Format as `YYYY/MM/DD`, the form written into marker tags.
    pub fn to_tag_date(&self) -> String {
        format!(
            "{:04}/{:02}/{:02}",
            self.0.year(),
            u8::from(self.0.month()),
            self.0.day()
        )
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let formatted = self
            .0
            .format(&time::format_description::well_known::Rfc3339)
            .map_err(|_| fmt::Error)?;
        write!(f, "{formatted}")
    }
}

impl FromStr for Timestamp {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self> {
        if let Ok(dt) = OffsetDateTime::parse(s, &time::format_description::well_known::Rfc3339) {
            return Ok(Timestamp(dt));
        }

        let dashed = format_description!("[year]-[month]-[day]");
        let slashed = format_description!("[year]/[month]/[day]");
        let date = Date::parse(s, &dashed)
            .or_else(|_| Date::parse(s, &slashed))
            .map_err(|e| CoreError::invalid_timestamp(s, e.to_string()))?;
        Ok(Timestamp(date.midnight().assume_utc()))
    }
}

impl Serialize for Timestamp {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let formatted = self
            .0
            .format(&time::format_description::well_known::Rfc3339)
            .map_err(serde::ser::Error::custom)?;
        serializer.serialize_str(&formatted)
    }
}

impl<'de> Deserialize<'de> for Timestamp {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Timestamp::from_str(&s).map_err(serde::de::Error::custom)
    }
}

pub fn now_utc() -> Timestamp {
    Timestamp(OffsetDateTime::now_utc())
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    #[test]
    fn test_parse_rfc3339() {
        let ts = Timestamp::from_str("2023-05-15T14:30:00Z").unwrap();
        assert_eq!(ts.0, datetime!(2023-05-15 14:30:00 UTC));
    }

    #[test]
    fn test_parse_bare_date() {
        let ts = Timestamp::from_str("2023-05-15").unwrap();
        assert_eq!(ts.0, datetime!(2023-05-15 00:00:00 UTC));
    }

    #[test]
    fn test_parse_slash_date() {
        let ts = Timestamp::from_str("2023/05/15").unwrap();
        assert_eq!(ts.0, datetime!(2023-05-15 00:00:00 UTC));
    }

    #[test]
    fn test_parse_invalid() {
        assert!(Timestamp::from_str("not-a-date").is_err());
        assert!(Timestamp::from_str("2023-13-01").is_err());
        assert!(Timestamp::from_str("").is_err());
    }

    #[test]
    fn test_age_days() {
        let launch = Timestamp::from_str("2023-01-01T00:00:00Z").unwrap();
        let now = datetime!(2023-03-01 00:00:00 UTC);
        assert_eq!(launch.age_days(now), 59.0);
    }

    #[test]
    fn test_age_days_future_is_negative() {
        let ts = Timestamp::from_str("2023-03-01T00:00:00Z").unwrap();
        let now = datetime!(2023-01-01 00:00:00 UTC);
        assert!(ts.age_days(now) < 0.0);
    }

    #[test]
    fn test_to_tag_date() {
        let ts = Timestamp::from_str("2023-05-05T23:59:59Z").unwrap();
        assert_eq!(ts.to_tag_date(), "2023/05/05");
    }

    #[test]
    fn test_display_is_rfc3339() {
        let ts = Timestamp::new(datetime!(2023-05-15 14:30:00 UTC));
        assert_eq!(ts.to_string(), "2023-05-15T14:30:00Z");
    }

    #[test]
    fn test_serde_roundtrip() {
        let ts = Timestamp::new(datetime!(2023-05-15 14:30:00 UTC));
        let json = serde_json::to_string(&ts).unwrap();
        assert_eq!(json, "\"2023-05-15T14:30:00Z\"");
        let back: Timestamp = serde_json::from_str(&json).unwrap();
        assert_eq!(ts, back);
    }

    #[test]
    fn test_ordering() {
        let a = Timestamp::from_str("2023-01-01").unwrap();
        let b = Timestamp::from_str("2023-01-02").unwrap();
        assert!(a < b);
    }
}
