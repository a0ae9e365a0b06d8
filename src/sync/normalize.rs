//! Provider event → stored event normalization.

use chrono::{DateTime, Utc};

use crate::error::EngineError;
use crate::models::event::Participant;
use crate::providers::calendar::{EventWhen, ProviderEvent, ProviderParticipant};
use crate::repositories::NewEvent;
use crate::time_utils::{TimeError, all_day_span, date_range_span, epoch_seconds, normalize_epoch};

fn required<'a>(value: Option<&'a String>, field: &str) -> Result<&'a str, EngineError> {
    value
        .map(|v| v.trim())
        .filter(|v| !v.is_empty())
        .ok_or_else(|| EngineError::validation(format!("event is missing {field}")))
}

fn participant(p: &ProviderParticipant) -> Participant {
    Participant {
        name: p.name.clone().filter(|n| !n.is_empty()),
        email: p.email.clone().filter(|e| !e.is_empty()),
    }
}

fn time_span(when: Option<&EventWhen>) -> Result<(DateTime<Utc>, DateTime<Utc>), EngineError> {
    let invalid = |err: TimeError| EngineError::validation(format!("invalid event time: {err}"));
    let (start, end) = match when {
        Some(EventWhen::Timespan { start_time, end_time }) => (
            normalize_epoch(*start_time).map_err(invalid)?,
            normalize_epoch(*end_time).map_err(invalid)?,
        ),
        Some(EventWhen::Time { time }) => {
            let instant = normalize_epoch(*time).map_err(invalid)?;
            (instant, instant)
        }
        Some(EventWhen::Date { date }) => all_day_span(date).map_err(invalid)?,
        Some(EventWhen::Datespan { start_date, end_date }) => {
            date_range_span(start_date, end_date).map_err(invalid)?
        }
        Some(EventWhen::Unknown) | None => {
            return Err(EngineError::validation("event is missing a time span"));
        }
    };

    if end < start {
        return Err(EngineError::validation("event ends before it starts"));
    }
    Ok((start, end))
}

/// Validates a provider event and converts it to its stored shape.
///
/// Recurring instances get an occurrence-qualified UID so each one dedups on its own.
/// Without a provider `updated_at` the watermark is synthesized from `now`.
pub fn normalize_event(event: &ProviderEvent, now: DateTime<Utc>) -> Result<NewEvent, EngineError> {
    let provider_event_id = required(event.id.as_ref(), "an id")?;
    let uid = required(event.ical_uid.as_ref(), "a calendar uid")?;
    let title = required(event.title.as_ref(), "a title")?;
    let (start_time, end_time) = time_span(event.when.as_ref())?;

    let recurrence = event.recurrence.clone().filter(|rules| !rules.is_empty());
    let master_event_id = event.master_event_id.clone().filter(|id| !id.is_empty());
    if recurrence.is_some() && master_event_id.is_some() {
        return Err(EngineError::validation(
            "event cannot be both a series master and an instance",
        ));
    }

    let original_start_time = event
        .original_start_time
        .map(normalize_epoch)
        .transpose()
        .map_err(|err| EngineError::validation(format!("invalid original start time: {err}")))?;

    let calendar_uid = if master_event_id.is_some() {
        let occurrence = original_start_time.unwrap_or(start_time).timestamp();
        format!("{uid}#{occurrence}")
    } else {
        uid.to_string()
    };

    let last_updated = match event.updated_at {
        Some(value) => epoch_seconds(value)
            .map_err(|err| EngineError::validation(format!("invalid updated_at: {err}")))?,
        None => now.timestamp(),
    };

    Ok(NewEvent {
        provider_event_id: provider_event_id.to_string(),
        calendar_uid,
        title: title.to_string(),
        description: event.description.clone(),
        location: event.location.clone(),
        start_time,
        end_time,
        conference_url: event.conference_url().map(str::to_string),
        organizer: event.organizer.as_ref().map(participant),
        participants: event.participants.iter().map(participant).collect(),
        master_event_id,
        original_start_time,
        recurrence,
        last_updated,
    })
}
