//! Recording agent ("notetaker") API client.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use super::{check_status, decode, join_url, transport_error};
use crate::error::{EngineError, RemoteService};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MeetingSettings {
    pub video_recording: bool,
    pub audio_recording: bool,
    pub transcription: bool,
}

impl Default for MeetingSettings {
    fn default() -> Self {
        Self {
            video_recording: true,
            audio_recording: true,
            transcription: true,
        }
    }
}

/// Full agent configuration. Updates resend every field.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NotetakerRequest {
    pub meeting_link: String,
    /// Unix seconds; omitted to join immediately
    #[serde(skip_serializing_if = "Option::is_none")]
    pub join_time: Option<i64>,
    pub name: String,
    pub meeting_settings: MeetingSettings,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct NotetakerSession {
    pub id: String,
    #[serde(default)]
    pub state: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct MediaFile {
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub size: Option<u64>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct NotetakerMedia {
    #[serde(default)]
    pub recording: Option<MediaFile>,
    #[serde(default)]
    pub transcript: Option<MediaFile>,
}

impl NotetakerMedia {
    pub fn recording_url(&self) -> Option<&str> {
        self.recording
            .as_ref()
            .and_then(|file| file.url.as_deref())
            .filter(|url| !url.is_empty())
    }
}

#[async_trait]
pub trait NotetakerApi: Send + Sync {
    async fn create(&self, grant_id: &str, request: &NotetakerRequest) -> Result<NotetakerSession, EngineError>;

    async fn update(
        &self,
        grant_id: &str,
        session_id: &str,
        request: &NotetakerRequest,
    ) -> Result<(), EngineError>;

    async fn cancel(&self, grant_id: &str, session_id: &str) -> Result<(), EngineError>;

    async fn media(&self, grant_id: &str, session_id: &str) -> Result<NotetakerMedia, EngineError>;
}

#[derive(Clone)]
pub struct NotetakerClient {
    http: Client,
    base_url: String,
    api_key: String,
}

impl NotetakerClient {
    pub fn new(http: Client, base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            http,
            base_url: base_url.into(),
            api_key: api_key.into(),
        }
    }

    fn url(&self, grant_id: &str, suffix: &str) -> String {
        join_url(&self.base_url, &format!("grants/{grant_id}/notetakers{suffix}"))
    }
}

#[async_trait]
impl NotetakerApi for NotetakerClient {
    async fn create(&self, grant_id: &str, request: &NotetakerRequest) -> Result<NotetakerSession, EngineError> {
        let response = self
            .http
            .post(self.url(grant_id, ""))
            .bearer_auth(&self.api_key)
            .json(request)
            .send()
            .await
            .map_err(|e| transport_error(RemoteService::Notetaker, e))?;
        decode(RemoteService::Notetaker, response).await
    }

    async fn update(
        &self,
        grant_id: &str,
        session_id: &str,
        request: &NotetakerRequest,
    ) -> Result<(), EngineError> {
        let response = self
            .http
            .patch(self.url(grant_id, &format!("/{session_id}")))
            .bearer_auth(&self.api_key)
            .json(request)
            .send()
            .await
            .map_err(|e| transport_error(RemoteService::Notetaker, e))?;
        check_status(RemoteService::Notetaker, response).await?;
        Ok(())
    }

    async fn cancel(&self, grant_id: &str, session_id: &str) -> Result<(), EngineError> {
        let response = self
            .http
            .delete(self.url(grant_id, &format!("/{session_id}/cancel")))
            .bearer_auth(&self.api_key)
            .send()
            .await
            .map_err(|e| transport_error(RemoteService::Notetaker, e))?;
        check_status(RemoteService::Notetaker, response).await?;
        Ok(())
    }

    async fn media(&self, grant_id: &str, session_id: &str) -> Result<NotetakerMedia, EngineError> {
        let response = self
            .http
            .get(self.url(grant_id, &format!("/{session_id}/media")))
            .bearer_auth(&self.api_key)
            .send()
            .await
            .map_err(|e| transport_error(RemoteService::Notetaker, e))?;
        decode(RemoteService::Notetaker, response).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn request() -> NotetakerRequest {
        NotetakerRequest {
            meeting_link: "https://meet.example.com/abc".to_string(),
            join_time: Some(1_790_000_000),
            name: "Notetaker".to_string(),
            meeting_settings: MeetingSettings::default(),
        }
    }

    #[tokio::test]
    async fn create_sends_full_configuration() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/grants/grant-1/notetakers"))
            .and(body_partial_json(json!({
                "meeting_link": "https://meet.example.com/abc",
                "join_time": 1_790_000_000,
                "meeting_settings": {"transcription": true}
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "request_id": "r1",
                "data": {"id": "nt-1", "state": "scheduled"}
            })))
            .expect(1)
            .mount(&server)
            .await;

        let client = NotetakerClient::new(Client::new(), server.uri(), "key");
        let session = client.create("grant-1", &request()).await.unwrap();
        assert_eq!(session.id, "nt-1");
    }

    #[tokio::test]
    async fn cancel_and_media_paths() {
        let server = MockServer::start().await;
        Mock::given(method("DELETE"))
            .and(path("/grants/grant-1/notetakers/nt-1/cancel"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"request_id": "r"})))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/grants/grant-1/notetakers/nt-1/media"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": {"recording": {"url": "https://media/rec.mp4", "size": 10}}
            })))
            .mount(&server)
            .await;

        let client = NotetakerClient::new(Client::new(), server.uri(), "key");
        client.cancel("grant-1", "nt-1").await.unwrap();
        let media = client.media("grant-1", "nt-1").await.unwrap();
        assert_eq!(media.recording_url(), Some("https://media/rec.mp4"));
    }

    #[tokio::test]
    async fn client_errors_are_not_retryable() {
        let server = MockServer::start().await;
        Mock::given(method("PATCH"))
            .respond_with(ResponseTemplate::new(400).set_body_string("bad join_time"))
            .mount(&server)
            .await;

        let client = NotetakerClient::new(Client::new(), server.uri(), "key");
        let err = client.update("grant-1", "nt-1", &request()).await.unwrap_err();
        assert!(!err.is_retryable());
        assert!(err.to_string().contains("bad join_time"));
    }
}
