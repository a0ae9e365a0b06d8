//! Recording rule evaluation: decides whether a meeting gets a notetaker.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::models::event::{self, Participant};
use crate::models::recording_rule;
use crate::time_utils::is_internal_meeting;

/// A user's recording preferences.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct RecordingPreferences {
    pub record_internal: bool,
    pub record_external: bool,
    /// Series master provider id -> explicit decision for the whole series
    #[serde(default)]
    pub series_overrides: BTreeMap<String, bool>,
}

impl Default for RecordingPreferences {
    fn default() -> Self {
        Self {
            record_internal: false,
            record_external: true,
            series_overrides: BTreeMap::new(),
        }
    }
}

impl From<recording_rule::Model> for RecordingPreferences {
    fn from(model: recording_rule::Model) -> Self {
        Self {
            record_internal: model.record_internal,
            record_external: model.record_external,
            series_overrides: model.series_overrides.0,
        }
    }
}

/// The fields of an event the evaluator looks at.
#[derive(Debug, Clone, Copy)]
pub struct RuleInput<'a> {
    pub conference_url: Option<&'a str>,
    pub organizer: Option<&'a Participant>,
    pub participants: &'a [Participant],
    pub master_event_id: Option<&'a str>,
}

impl<'a> From<&'a event::Model> for RuleInput<'a> {
    fn from(event: &'a event::Model) -> Self {
        Self {
            conference_url: event.conference_url.as_deref(),
            organizer: event.organizer.as_ref(),
            participants: &event.participants.0,
            master_event_id: event.master_event_id.as_deref(),
        }
    }
}

/// Returns true when a notetaker should be dispatched for the event.
///
/// Never true without a join link. A per-series override beats the domain classification, and
/// an organizer without a usable domain records rather than silently dropping the meeting.
pub fn should_record<'a>(event: impl Into<RuleInput<'a>>, prefs: &RecordingPreferences) -> bool {
    let input = event.into();

    if input.conference_url.is_none_or(|url| url.trim().is_empty()) {
        return false;
    }

    if let Some(decision) = input
        .master_event_id
        .and_then(|master| prefs.series_overrides.get(master))
    {
        return *decision;
    }

    match is_internal_meeting(input.organizer, input.participants) {
        Some(true) => prefs.record_internal,
        Some(false) => prefs.record_external,
        None => true,
    }
}
