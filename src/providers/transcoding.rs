//! Transcoding service client: turns recorded media into playable assets.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::json;

use super::{decode, join_url, transport_error};
use crate::error::{EngineError, RemoteService};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlaybackId {
    pub id: String,
    #[serde(default)]
    pub policy: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AssetErrors {
    #[serde(default, rename = "type")]
    pub kind: Option<String>,
    #[serde(default)]
    pub messages: Vec<String>,
}

/// Asset state as reported by the transcoding service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscodingAsset {
    pub id: String,
    /// `preparing`, `ready` or `errored`
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub playback_ids: Vec<PlaybackId>,
    /// Seconds, fractional
    #[serde(default)]
    pub duration: Option<f64>,
    #[serde(default)]
    pub errors: Option<AssetErrors>,
}

impl TranscodingAsset {
    pub fn is_ready(&self) -> bool {
        self.status == "ready"
    }

    pub fn is_errored(&self) -> bool {
        self.status == "errored"
    }

    pub fn playback_id(&self) -> Option<&str> {
        self.playback_ids.first().map(|p| p.id.as_str())
    }

    pub fn error_message(&self) -> String {
        match &self.errors {
            Some(errors) if !errors.messages.is_empty() => errors.messages.join("; "),
            Some(AssetErrors { kind: Some(kind), .. }) => kind.clone(),
            _ => "transcoding failed".to_string(),
        }
    }

    pub fn duration_seconds(&self) -> Option<i32> {
        self.duration.map(|d| d.round() as i32)
    }
}

#[async_trait]
pub trait TranscodingApi: Send + Sync {
    async fn create_asset(&self, media_url: &str) -> Result<TranscodingAsset, EngineError>;

    async fn get_asset(&self, asset_id: &str) -> Result<TranscodingAsset, EngineError>;
}

#[derive(Clone)]
pub struct TranscodingClient {
    http: Client,
    base_url: String,
    token_id: String,
    token_secret: String,
}

impl TranscodingClient {
    pub fn new(
        http: Client,
        base_url: impl Into<String>,
        token_id: impl Into<String>,
        token_secret: impl Into<String>,
    ) -> Self {
        Self {
            http,
            base_url: base_url.into(),
            token_id: token_id.into(),
            token_secret: token_secret.into(),
        }
    }
}

#[async_trait]
impl TranscodingApi for TranscodingClient {
    async fn create_asset(&self, media_url: &str) -> Result<TranscodingAsset, EngineError> {
        let body = json!({
            "input": [{"url": media_url}],
            "playback_policy": ["public"],
        });
        let response = self
            .http
            .post(join_url(&self.base_url, "assets"))
            .basic_auth(&self.token_id, Some(&self.token_secret))
            .json(&body)
            .send()
            .await
            .map_err(|e| transport_error(RemoteService::Transcoding, e))?;
        decode(RemoteService::Transcoding, response).await
    }

    async fn get_asset(&self, asset_id: &str) -> Result<TranscodingAsset, EngineError> {
        let response = self
            .http
            .get(join_url(&self.base_url, &format!("assets/{asset_id}")))
            .basic_auth(&self.token_id, Some(&self.token_secret))
            .send()
            .await
            .map_err(|e| transport_error(RemoteService::Transcoding, e))?;
        decode(RemoteService::Transcoding, response).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, header_exists, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn creates_public_assets_with_basic_auth() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/assets"))
            .and(header_exists("authorization"))
            .and(body_partial_json(json!({
                "input": [{"url": "https://media/rec.mp4"}],
                "playback_policy": ["public"]
            })))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({
                "data": {"id": "asset-1", "status": "preparing"}
            })))
            .expect(1)
            .mount(&server)
            .await;

        let client = TranscodingClient::new(Client::new(), server.uri(), "id", "secret");
        let asset = client.create_asset("https://media/rec.mp4").await.unwrap();
        assert_eq!(asset.id, "asset-1");
        assert!(!asset.is_ready());
    }

    #[tokio::test]
    async fn reads_ready_assets() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/assets/asset-1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": {
                    "id": "asset-1",
                    "status": "ready",
                    "playback_ids": [{"id": "play-1", "policy": "public"}],
                    "duration": 1834.6
                }
            })))
            .mount(&server)
            .await;

        let client = TranscodingClient::new(Client::new(), server.uri(), "id", "secret");
        let asset = client.get_asset("asset-1").await.unwrap();
        assert!(asset.is_ready());
        assert_eq!(asset.playback_id(), Some("play-1"));
        assert_eq!(asset.duration_seconds(), Some(1835));
    }
}
