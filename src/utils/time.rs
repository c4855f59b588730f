//! RFC 3339 timestamps as stored in the conversation database.

use serde::{Deserialize, Deserializer, Serializer};
use time::format_description::well_known::Rfc3339;
use time::macros::format_description;
use time::{OffsetDateTime, PrimitiveDateTime};

use crate::error::{Error, Result};

/// The current UTC time as an RFC 3339 string.
pub fn now_rfc3339() -> Result<String> {
    format_rfc3339(OffsetDateTime::now_utc())
}

/// Formats a timestamp as RFC 3339.
pub fn format_rfc3339(datetime: OffsetDateTime) -> Result<String> {
    datetime
        .format(&Rfc3339)
        .map_err(|err| Error::serialization(format!("cannot format timestamp: {err}"), Some(Box::new(err))))
}

/// Parses a stored `created_at` value.
///
/// Besides RFC 3339 this accepts offset-less stamps such as SQLite's
/// `CURRENT_TIMESTAMP` (`2024-11-30 21:15:42`), which are taken as UTC.
pub fn parse_stored(text: &str) -> Result<OffsetDateTime> {
    let text = text.trim();
    if let Ok(parsed) = OffsetDateTime::parse(text, &Rfc3339) {
        return Ok(parsed);
    }
    let naive = format_description!(
        "[year]-[month]-[day]T[hour]:[minute]:[second][optional [.[subsecond]]]"
    );
    PrimitiveDateTime::parse(&text.replacen(' ', "T", 1), naive)
        .map(PrimitiveDateTime::assume_utc)
        .map_err(|err| {
            Error::serialization(
                format!("invalid timestamp {text:?}: {err}"),
                Some(Box::new(err)),
            )
        })
}

/// Deserialize an RFC 3339 formatted string into an OffsetDateTime
pub fn deserialize<'de, D>(deserializer: D) -> std::result::Result<OffsetDateTime, D::Error>
where
    D: Deserializer<'de>,
{
    let s = String::deserialize(deserializer)?;
    OffsetDateTime::parse(&s, &Rfc3339).map_err(serde::de::Error::custom)
}

/// Serialize an OffsetDateTime into an RFC 3339 formatted string
pub fn serialize<S>(datetime: &OffsetDateTime, serializer: S) -> std::result::Result<S::Ok, S::Error>
where
    S: Serializer,
{
    let s = datetime
        .format(&Rfc3339)
        .map_err(serde::ser::Error::custom)?;
    serializer.serialize_str(&s)
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    #[test]
    fn round_trips_through_text() {
        let stamp = datetime!(2025-02-03 04:05:06 UTC);
        let text = format_rfc3339(stamp).unwrap();
        assert_eq!(text, "2025-02-03T04:05:06Z");
        assert_eq!(parse_stored(&text).unwrap(), stamp);
    }

    #[test]
    fn python_isoformat_offsets_parse() {
        let parsed = parse_stored("2024-11-30T21:15:42.123456+00:00").unwrap();
        assert_eq!(parsed.year(), 2024);
        assert_eq!(parsed.offset().whole_hours(), 0);
    }

    #[test]
    fn garbage_is_rejected() {
        assert!(parse_stored("yesterday").is_err());
    }

    #[test]
    fn stored_stamps_without_offset_are_utc() {
        assert_eq!(
            parse_stored("2024-11-30 21:15:42").unwrap(),
            datetime!(2024-11-30 21:15:42 UTC)
        );
        assert_eq!(
            parse_stored("2024-11-30T21:15:42.5").unwrap(),
            datetime!(2024-11-30 21:15:42.5 UTC)
        );
        assert_eq!(
            parse_stored("2024-11-30T21:15:42+01:00").unwrap(),
            datetime!(2024-11-30 20:15:42 UTC)
        );
    }
}
