//! Outbound API clients.
//!
//! Each external service sits behind a trait so the engine can be driven by in-memory fakes in
//! tests and by the reqwest implementations in production. Every client shares one
//! [`reqwest::Client`] carrying the configured request timeout.

use std::time::Duration;

use reqwest::{Client, Response, StatusCode};
use serde::Deserialize;

use crate::error::{EngineError, RemoteService};

pub mod calendar;
pub mod notetaker;
pub mod transcoding;

pub use calendar::{CalendarApi, CalendarClient, EventPage, ProviderEvent};
pub use notetaker::{NotetakerApi, NotetakerClient, NotetakerMedia, NotetakerRequest};
pub use transcoding::{TranscodingApi, TranscodingAsset, TranscodingClient};

/// Builds the HTTP client shared by every outbound API.
pub fn build_http_client(timeout: Duration) -> reqwest::Result<Client> {
    Client::builder()
        .timeout(timeout)
        .user_agent(concat!("notetaker/", env!("CARGO_PKG_VERSION")))
        .build()
}

/// Responses may or may not be wrapped in a `{ "data": ... }` envelope.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub(crate) enum Envelope<T> {
    Wrapped { data: T },
    Bare(T),
}

impl<T> Envelope<T> {
    pub(crate) fn into_inner(self) -> T {
        match self {
            Envelope::Wrapped { data } | Envelope::Bare(data) => data,
        }
    }
}

/// 408, 429 and 5xx are worth retrying; everything else is a caller problem.
pub(crate) fn is_retryable_status(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS
        || status == StatusCode::REQUEST_TIMEOUT
        || status.is_server_error()
}

pub(crate) fn transport_error(service: RemoteService, err: reqwest::Error) -> EngineError {
    let status = err.status();
    let retryable = err.is_timeout()
        || err.is_connect()
        || err.is_request()
        || status.is_some_and(is_retryable_status);
    let message = if err.is_timeout() {
        format!("{service} request timed out")
    } else {
        format!("{service} request failed: {err}")
    };
    EngineError::Remote {
        service,
        status: status.map(|s| s.as_u16()),
        message,
        retryable,
    }
}

/// Passes successful responses through and turns anything else into [`EngineError::Remote`].
pub(crate) async fn check_status(service: RemoteService, response: Response) -> Result<Response, EngineError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    let mut message = format!("{service} returned {status}");
    if !body.is_empty() {
        message.push_str(": ");
        message.extend(body.chars().take(512));
    }

    Err(EngineError::Remote {
        service,
        status: Some(status.as_u16()),
        message,
        retryable: is_retryable_status(status),
    })
}

pub(crate) async fn decode<T>(service: RemoteService, response: Response) -> Result<T, EngineError>
where
    T: for<'de> Deserialize<'de>,
{
    let response = check_status(service, response).await?;
    response
        .json::<Envelope<T>>()
        .await
        .map(Envelope::into_inner)
        .map_err(|err| EngineError::Remote {
            service,
            status: None,
            message: format!("malformed {service} response: {err}"),
            retryable: false,
        })
}

pub(crate) fn join_url(base: &str, path: &str) -> String {
    format!("{}/{}", base.trim_end_matches('/'), path.trim_start_matches('/'))
}
