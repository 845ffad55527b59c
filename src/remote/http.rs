//! HTTP client for the sync backend.
//!
//! Endpoints:
//! - `POST   {base}/v1/sermons` — upsert, returns `{remote_id, updated_at}`
//! - `DELETE {base}/v1/sermons/{remote_id}`
//! - `GET    {base}/v1/sermons?owner=..&updated_since=..`
//!
//! Auth: Bearer token.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::Deserialize;

use crate::domain::OwnerId;

use super::{RemoteBackend, RemoteError, RemoteSermon, RemoteWriteAck};

/// HTTP-backed remote store client.
pub struct HttpBackend {
    base_url: String,
    token: String,
    client: reqwest::Client,
}

/// Fetch response envelope.
#[derive(Debug, Deserialize)]
struct FetchResponse {
    sermons: Vec<RemoteSermon>,
}

impl HttpBackend {
    /// Create a client with the given call timeout.
    pub fn new(base_url: String, token: String, timeout: Duration) -> Result<Self, RemoteError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| RemoteError::Permanent(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            token,
            client,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn bearer(&self) -> String {
        format!("Bearer {}", self.token)
    }

    /// Map a response status to the retry taxonomy. 408/429 and 5xx are
    /// transient; other 4xx are permanent.
    async fn check(response: reqwest::Response) -> Result<reqwest::Response, RemoteError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        let message = format!("backend returned {}: {}", status, body);

        if status.is_server_error() || status.as_u16() == 408 || status.as_u16() == 429 {
            Err(RemoteError::Transient(message))
        } else {
            Err(RemoteError::Permanent(message))
        }
    }
}

/// Connection failures and timeouts are transient; anything the client
/// could not even serialize is permanent.
fn transport_error(e: reqwest::Error) -> RemoteError {
    if e.is_timeout() || e.is_connect() || e.is_request() {
        RemoteError::Transient(e.to_string())
    } else {
        RemoteError::Permanent(e.to_string())
    }
}

#[async_trait]
impl RemoteBackend for HttpBackend {
    async fn upsert(&self, sermon: &RemoteSermon) -> Result<RemoteWriteAck, RemoteError> {
        let response = self
            .client
            .post(self.url("/v1/sermons"))
            .header("Authorization", self.bearer())
            .json(sermon)
            .send()
            .await
            .map_err(transport_error)?;

        Self::check(response)
            .await?
            .json::<RemoteWriteAck>()
            .await
            .map_err(|e| RemoteError::Permanent(format!("malformed upsert response: {e}")))
    }

    async fn delete(&self, remote_id: &str) -> Result<(), RemoteError> {
        let response = self
            .client
            .delete(self.url(&format!("/v1/sermons/{remote_id}")))
            .header("Authorization", self.bearer())
            .send()
            .await
            .map_err(transport_error)?;

        // Already-deleted is success from the engine's point of view
        if response.status().as_u16() == 404 {
            return Ok(());
        }

        Self::check(response).await.map(|_| ())
    }

    async fn fetch_updated_since(
        &self,
        owner: &OwnerId,
        cursor: Option<DateTime<Utc>>,
    ) -> Result<Vec<RemoteSermon>, RemoteError> {
        let mut request = self
            .client
            .get(self.url("/v1/sermons"))
            .header("Authorization", self.bearer())
            .query(&[("owner", owner.as_str())]);

        if let Some(cursor) = cursor {
            request = request.query(&[(
                "updated_since",
                cursor.to_rfc3339_opts(SecondsFormat::Millis, true),
            )]);
        }

        let response = request.send().await.map_err(transport_error)?;

        Self::check(response)
            .await?
            .json::<FetchResponse>()
            .await
            .map(|r| r.sermons)
            .map_err(|e| RemoteError::Permanent(format!("malformed fetch response: {e}")))
    }
}
