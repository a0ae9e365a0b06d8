//! Timestamp normalization and participant identity helpers shared by the synchronizer,
//! the webhook router and the rule evaluator.

use chrono::{DateTime, Duration, NaiveDate, TimeZone, Utc};
use thiserror::Error;

use crate::models::event::Participant;

/// Epoch values above this are treated as milliseconds (10^11 s is the year 5138).
const MILLIS_THRESHOLD: i64 = 100_000_000_000;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TimeError {
    #[error("epoch timestamp {0} is out of range")]
    OutOfRange(i64),
    #[error("invalid ISO-8601 datetime '{0}'")]
    InvalidDateTime(String),
    #[error("invalid calendar date '{0}'")]
    InvalidDate(String),
    #[error("time span ends before it starts")]
    InvertedSpan,
}

/// Converts a provider epoch value to an instant, accepting seconds or milliseconds.
pub fn normalize_epoch(value: i64) -> Result<DateTime<Utc>, TimeError> {
    if value < 0 {
        return Err(TimeError::OutOfRange(value));
    }
    let parsed = if value >= MILLIS_THRESHOLD {
        Utc.timestamp_millis_opt(value).single()
    } else {
        Utc.timestamp_opt(value, 0).single()
    };
    parsed.ok_or(TimeError::OutOfRange(value))
}

/// Normalizes an epoch value to whole seconds, for use as a watermark.
pub fn epoch_seconds(value: i64) -> Result<i64, TimeError> {
    normalize_epoch(value).map(|instant| instant.timestamp())
}

/// Parses an RFC 3339 datetime carrying an explicit offset.
pub fn parse_iso_datetime(value: &str) -> Result<DateTime<Utc>, TimeError> {
    DateTime::parse_from_rfc3339(value.trim())
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|_| TimeError::InvalidDateTime(value.to_string()))
}

fn parse_date(value: &str) -> Result<NaiveDate, TimeError> {
    NaiveDate::parse_from_str(value.trim(), "%Y-%m-%d")
        .map_err(|_| TimeError::InvalidDate(value.to_string()))
}

fn start_of_day(date: NaiveDate) -> DateTime<Utc> {
    Utc.from_utc_datetime(&date.and_time(chrono::NaiveTime::MIN))
}

/// Expands an all-day date to `[00:00Z, next day 00:00Z)`.
pub fn all_day_span(date: &str) -> Result<(DateTime<Utc>, DateTime<Utc>), TimeError> {
    let start = start_of_day(parse_date(date)?);
    Ok((start, start + Duration::days(1)))
}

/// Expands an inclusive multi-day date range to a UTC span ending at the day after `end`.
pub fn date_range_span(start: &str, end: &str) -> Result<(DateTime<Utc>, DateTime<Utc>), TimeError> {
    let start_date = parse_date(start)?;
    let end_date = parse_date(end)?;
    if end_date < start_date {
        return Err(TimeError::InvertedSpan);
    }
    Ok((
        start_of_day(start_date),
        start_of_day(end_date) + Duration::days(1),
    ))
}

/// Lowercased domain of an email address, `None` when absent or malformed.
pub fn email_domain(email: &str) -> Option<String> {
    let (local, domain) = email.trim().rsplit_once('@')?;
    let domain = domain.trim().trim_end_matches('.');
    if local.is_empty() || domain.is_empty() {
        return None;
    }
    Some(domain.to_ascii_lowercase())
}

/// Classifies a meeting as internal when every participant shares the organizer's domain.
///
/// Returns `None` when the organizer has no usable domain; callers decide how to fail.
/// Participants without an email count as external.
pub fn is_internal_meeting(organizer: Option<&Participant>, participants: &[Participant]) -> Option<bool> {
    let organizer_domain = organizer
        .and_then(|p| p.email.as_deref())
        .and_then(email_domain)?;

    Some(participants.iter().all(|participant| {
        participant
            .email
            .as_deref()
            .and_then(email_domain)
            .is_some_and(|domain| domain == organizer_domain)
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn person(email: &str) -> Participant {
        Participant {
            name: None,
            email: Some(email.to_string()),
        }
    }

    #[test]
    fn normalizes_seconds_and_millis_to_the_same_instant() {
        let seconds = normalize_epoch(1_700_000_000).unwrap();
        let millis = normalize_epoch(1_700_000_000_000).unwrap();
        assert_eq!(seconds, millis);
        assert_eq!(epoch_seconds(1_700_000_000_123).unwrap(), 1_700_000_000);
    }

    #[test]
    fn rejects_negative_epochs() {
        assert_eq!(normalize_epoch(-5), Err(TimeError::OutOfRange(-5)));
    }

    #[test]
    fn validates_iso_datetimes() {
        assert!(parse_iso_datetime("2026-03-01T10:00:00Z").is_ok());
        assert!(parse_iso_datetime("2026-03-01T10:00:00+02:00").is_ok());
        assert_eq!(
            parse_iso_datetime("2026-03-01 10:00"),
            Err(TimeError::InvalidDateTime("2026-03-01 10:00".to_string()))
        );
        assert!(parse_iso_datetime("tomorrow").is_err());

        let parsed = parse_iso_datetime("2026-03-01T12:00:00+02:00").unwrap();
        assert_eq!(parsed.to_rfc3339(), "2026-03-01T10:00:00+00:00");
    }

    #[test]
    fn all_day_events_cover_a_full_utc_day() {
        let (start, end) = all_day_span("2026-02-28").unwrap();
        assert_eq!(start.to_rfc3339(), "2026-02-28T00:00:00+00:00");
        assert_eq!(end.to_rfc3339(), "2026-03-01T00:00:00+00:00");

        let (start, end) = date_range_span("2026-01-01", "2026-01-03").unwrap();
        assert_eq!(end - start, Duration::days(3));
        assert_eq!(
            date_range_span("2026-01-03", "2026-01-01"),
            Err(TimeError::InvertedSpan)
        );
    }

    #[test]
    fn extracts_email_domains() {
        assert_eq!(email_domain("A@Example.COM").as_deref(), Some("example.com"));
        assert_eq!(email_domain("no-domain"), None);
        assert_eq!(email_domain("@x.com"), None);
        assert_eq!(email_domain("a@"), None);
    }

    #[test]
    fn classifies_internal_and_external_meetings() {
        let organizer = person("a@x.com");
        assert_eq!(
            is_internal_meeting(Some(&organizer), &[person("b@x.com"), person("c@x.com")]),
            Some(true)
        );
        assert_eq!(
            is_internal_meeting(Some(&organizer), &[person("b@y.com")]),
            Some(false)
        );
        assert_eq!(
            is_internal_meeting(Some(&organizer), &[Participant::default()]),
            Some(false)
        );
        assert_eq!(is_internal_meeting(None, &[person("b@x.com")]), None);
        assert_eq!(
            is_internal_meeting(Some(&person("nobody")), &[person("b@x.com")]),
            None
        );
    }
}
