//! Calendar provider client and wire types.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};

use super::{check_status, decode, join_url, transport_error};
use crate::error::{EngineError, RemoteService};

/// Guard against a provider that keeps handing back cursors.
const MAX_PAGES: usize = 200;

/// When an event happens, as the provider encodes it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "object", rename_all = "lowercase")]
pub enum EventWhen {
    Timespan { start_time: i64, end_time: i64 },
    Time { time: i64 },
    Date { date: String },
    Datespan { start_date: String, end_date: String },
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProviderParticipant {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConferencingDetails {
    #[serde(default)]
    pub url: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Conferencing {
    #[serde(default)]
    pub provider: Option<String>,
    #[serde(default)]
    pub details: Option<ConferencingDetails>,
}

/// A calendar event exactly as the provider sends it, over the API and in webhooks.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProviderEvent {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub grant_id: Option<String>,
    #[serde(default)]
    pub calendar_id: Option<String>,
    #[serde(default)]
    pub ical_uid: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub when: Option<EventWhen>,
    #[serde(default)]
    pub conferencing: Option<Conferencing>,
    #[serde(default)]
    pub organizer: Option<ProviderParticipant>,
    #[serde(default)]
    pub participants: Vec<ProviderParticipant>,
    #[serde(default)]
    pub master_event_id: Option<String>,
    /// Epoch seconds (milliseconds tolerated) of the occurrence's unmodified start
    #[serde(default)]
    pub original_start_time: Option<i64>,
    #[serde(default)]
    pub recurrence: Option<Vec<String>>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub updated_at: Option<i64>,
}

impl ProviderEvent {
    pub fn conference_url(&self) -> Option<&str> {
        self.conferencing
            .as_ref()
            .and_then(|c| c.details.as_ref())
            .and_then(|d| d.url.as_deref())
            .map(str::trim)
            .filter(|url| !url.is_empty())
    }
}

/// One page of the events listing.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct EventPage {
    #[serde(default)]
    pub data: Vec<ProviderEvent>,
    #[serde(default)]
    pub next_cursor: Option<String>,
}

#[async_trait]
pub trait CalendarApi: Send + Sync {
    /// All events overlapping `[start, end)`, recurring series expanded, every page followed.
    async fn list_events(
        &self,
        grant_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<ProviderEvent>, EngineError>;

    /// A single event by provider id; `None` once the provider no longer has it.
    async fn get_event(&self, grant_id: &str, event_id: &str) -> Result<Option<ProviderEvent>, EngineError>;
}

#[derive(Clone)]
pub struct CalendarClient {
    http: Client,
    base_url: String,
    api_key: String,
}

impl CalendarClient {
    pub fn new(http: Client, base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            http,
            base_url: base_url.into(),
            api_key: api_key.into(),
        }
    }

    async fn fetch_page(
        &self,
        grant_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        page_token: Option<&str>,
    ) -> Result<EventPage, EngineError> {
        let url = join_url(&self.base_url, &format!("grants/{grant_id}/events"));
        let mut query = vec![
            ("start", start.timestamp().to_string()),
            ("end", end.timestamp().to_string()),
            ("expand_recurring", "true".to_string()),
        ];
        if let Some(token) = page_token {
            query.push(("page_token", token.to_string()));
        }

        let response = self
            .http
            .get(&url)
            .bearer_auth(&self.api_key)
            .query(&query)
            .send()
            .await
            .map_err(|e| transport_error(RemoteService::Calendar, e))?;

        check_status(RemoteService::Calendar, response)
            .await?
            .json::<EventPage>()
            .await
            .map_err(|e| EngineError::Remote {
                service: RemoteService::Calendar,
                status: None,
                message: format!("malformed events page: {e}"),
                retryable: false,
            })
    }
}

#[async_trait]
impl CalendarApi for CalendarClient {
    async fn list_events(
        &self,
        grant_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<ProviderEvent>, EngineError> {
        let mut events = Vec::new();
        let mut cursor: Option<String> = None;

        for page_number in 1..=MAX_PAGES {
            let page = self.fetch_page(grant_id, start, end, cursor.as_deref()).await?;
            tracing::debug!(grant_id, page_number, count = page.data.len(), "Fetched events page");
            events.extend(page.data);

            match page.next_cursor.filter(|next| !next.is_empty()) {
                Some(next) if cursor.as_deref() != Some(next.as_str()) => cursor = Some(next),
                _ => return Ok(events),
            }
        }

        tracing::warn!(grant_id, max_pages = MAX_PAGES, "Stopped following event cursors");
        Ok(events)
    }

    async fn get_event(&self, grant_id: &str, event_id: &str) -> Result<Option<ProviderEvent>, EngineError> {
        let url = join_url(&self.base_url, &format!("grants/{grant_id}/events/{event_id}"));
        let response = self
            .http
            .get(&url)
            .bearer_auth(&self.api_key)
            .send()
            .await
            .map_err(|e| transport_error(RemoteService::Calendar, e))?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND || status == StatusCode::GONE {
            return Ok(None);
        }
        decode::<ProviderEvent>(RemoteService::Calendar, response).await.map(Some)
    }
}
