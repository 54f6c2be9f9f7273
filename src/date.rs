//! Multi-format date parsing to UTC instants (spec §4.4). An unparseable
//! date becomes `None` and never fails the record.

use time::format_description::well_known::Rfc3339;
use time::macros::format_description;
use time::{OffsetDateTime, PrimitiveDateTime};

/// `YYYY-MM-DD HH:MM:SS` — the space-delimited form some upstream archives
/// emit instead of RFC 3339.
const SPACE_DELIMITED: &[time::format_description::FormatItem] =
    format_description!("[year]-[month]-[day] [hour]:[minute]:[second]");

/// `YYYY-MM-DD` with no time component, assumed midnight UTC.
const DATE_ONLY: &[time::format_description::FormatItem] = format_description!("[year]-[month]-[day]");

pub fn parse_utc(raw: &str) -> Option<OffsetDateTime> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    if let Ok(dt) = OffsetDateTime::parse(raw, &Rfc3339) {
        return Some(dt);
    }
    if let Ok(dt) = PrimitiveDateTime::parse(raw, SPACE_DELIMITED) {
        return Some(dt.assume_utc());
    }
    if let Ok(date) = time::Date::parse(raw, DATE_ONLY) {
        return Some(date.midnight().assume_utc());
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_rfc3339() {
        assert!(parse_utc("2020-05-01T12:00:00Z").is_some());
    }

    #[test]
    fn parses_space_delimited() {
        assert!(parse_utc("2020-05-01 12:00:00").is_some());
    }

    #[test]
    fn parses_date_only() {
        assert!(parse_utc("2020-05-01").is_some());
    }

    #[test]
    fn unparseable_returns_none() {
        assert!(parse_utc("not a date").is_none());
        assert!(parse_utc("").is_none());
    }
}
