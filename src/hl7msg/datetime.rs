//! HL7 TS/DT parsing, localized to Europe::Paris. Grounded on
//! `fhir/mapper.rs::parse_date`/`parse_datetime`, reworked to accept the
//! variable-precision TS type spec.md §4.2 requires (8-digit date-only and
//! 12/14-digit date-time) instead of fixing one format.

use chrono::{NaiveDate, NaiveDateTime, TimeZone};
use chrono_tz::Europe::Paris;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DateFormatInvalid {
    #[error("empty date/time value")]
    Empty,
    #[error("unsupported HL7 date/time length {0}, expected 8, 12 or 14 digits")]
    UnsupportedLength(usize),
    #[error("could not parse {raw:?} as an HL7 date/time: {reason}")]
    Unparseable { raw: String, reason: String },
}

/// Parses an 8-digit HL7 `DT` value (`YYYYMMDD`).
pub fn parse_hl7_date(raw: &str) -> Result<NaiveDate, DateFormatInvalid> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err(DateFormatInvalid::Empty);
    }
    NaiveDate::parse_from_str(raw, "%Y%m%d").map_err(|e| DateFormatInvalid::Unparseable {
        raw: raw.to_string(),
        reason: e.to_string(),
    })
}

/// Parses an HL7 `TS` value. Accepts 8 digits (midnight implied), 12 digits
/// (`YYYYMMDDHHMM`), or 14 digits (`YYYYMMDDHHMMSS`); a trailing
/// `.ffff` fractional-second or `+zzzz`/`-zzzz` offset is ignored since the
/// domain treats every inbound timestamp as local Europe/Paris time
/// (spec.md §4.2).
pub fn parse_hl7_datetime(raw: &str) -> Result<NaiveDateTime, DateFormatInvalid> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err(DateFormatInvalid::Empty);
    }
    let digits: String = raw
        .chars()
        .take_while(|c| c.is_ascii_digit())
        .collect();
    let parsed = match digits.len() {
        8 => NaiveDate::parse_from_str(&digits, "%Y%m%d")
            .map(|d| d.and_hms_opt(0, 0, 0).expect("midnight is always valid")),
        12 => NaiveDateTime::parse_from_str(&digits, "%Y%m%d%H%M"),
        14 => NaiveDateTime::parse_from_str(&digits, "%Y%m%d%H%M%S"),
        n => return Err(DateFormatInvalid::UnsupportedLength(n)),
    };
    parsed.map_err(|e| DateFormatInvalid::Unparseable {
        raw: raw.to_string(),
        reason: e.to_string(),
    })
}

/// Renders a `NaiveDateTime` as an HL7 `TS` for outbound generation,
/// stamping it as Europe/Paris local time the way the source's
/// `hl7_generator.py::format_datetime` does.
pub fn format_hl7_datetime(dt: NaiveDateTime) -> String {
    let localized = Paris.from_local_datetime(&dt).earliest().unwrap_or_else(|| {
        Paris
            .from_local_datetime(&dt)
            .latest()
            .expect("chrono-tz always resolves a fallback offset")
    });
    localized.format("%Y%m%d%H%M%S").to_string()
}

pub fn format_hl7_date(date: NaiveDate) -> String {
    date.format("%Y%m%d").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_8_digit_date_only() {
        let dt = parse_hl7_datetime("20240315").unwrap();
        assert_eq!(dt.format("%Y%m%d%H%M%S").to_string(), "20240315000000");
    }

    #[test]
    fn parses_12_digit_datetime() {
        let dt = parse_hl7_datetime("202403151230").unwrap();
        assert_eq!(dt.format("%Y%m%d%H%M%S").to_string(), "20240315123000");
    }

    #[test]
    fn parses_14_digit_datetime() {
        let dt = parse_hl7_datetime("20240315123045").unwrap();
        assert_eq!(dt.format("%Y%m%d%H%M%S").to_string(), "20240315123045");
    }

    #[test]
    fn ignores_trailing_offset() {
        let dt = parse_hl7_datetime("20240315123045+0200").unwrap();
        assert_eq!(dt.format("%Y%m%d%H%M%S").to_string(), "20240315123045");
    }

    #[test]
    fn rejects_empty() {
        assert_eq!(parse_hl7_datetime(""), Err(DateFormatInvalid::Empty));
    }

    #[test]
    fn rejects_bad_length() {
        assert!(matches!(
            parse_hl7_datetime("2024031"),
            Err(DateFormatInvalid::UnsupportedLength(7))
        ));
    }

    #[test]
    fn round_trips_through_formatting() {
        let dt = parse_hl7_datetime("20240315123045").unwrap();
        let rendered = format_hl7_datetime(dt);
        assert_eq!(rendered.len(), 14);
    }
}
