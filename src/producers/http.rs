//! HTTP producer clients.
//!
//! Both services follow the same shape: endpoint + bearer token, the
//! submission idempotency key sent as an `Idempotency-Key` header, bounded
//! call timeout, non-2xx mapped into the retry taxonomy.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use serde::Deserialize;

use crate::domain::{Transcript, TranscriptSegment};

use super::{
    ProducerError, SummarizationProducer, SummaryRequest, TranscriptionProducer,
    TranscriptionRequest,
};

/// Transcription service response.
#[derive(Debug, Deserialize)]
struct TranscriptionResponse {
    text: String,
    #[serde(default)]
    language: String,
    #[serde(default)]
    segments: Vec<SegmentResponse>,
}

#[derive(Debug, Deserialize)]
struct SegmentResponse {
    start: f64,
    end: f64,
    text: String,
}

/// Summarization service response.
#[derive(Debug, Deserialize)]
struct SummaryResponse {
    summary: String,
}

fn transport_error(e: reqwest::Error) -> ProducerError {
    if e.is_timeout() || e.is_connect() || e.is_request() {
        ProducerError::Transient(e.to_string())
    } else {
        ProducerError::Permanent(e.to_string())
    }
}

async fn check(response: reqwest::Response) -> Result<reqwest::Response, ProducerError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    let message = format!("producer returned {}: {}", status, body);

    if status.is_server_error() || status.as_u16() == 408 || status.as_u16() == 429 {
        Err(ProducerError::Transient(message))
    } else {
        Err(ProducerError::Permanent(message))
    }
}

/// HTTP transcription client. Uploads the audio file as multipart.
pub struct HttpTranscriber {
    endpoint: String,
    token: String,
    model: String,
    client: reqwest::Client,
}

impl HttpTranscriber {
    pub fn new(
        endpoint: String,
        token: String,
        model: String,
        timeout: Duration,
    ) -> Result<Self, ProducerError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ProducerError::Permanent(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            endpoint,
            token,
            model,
            client,
        })
    }
}

#[async_trait]
impl TranscriptionProducer for HttpTranscriber {
    fn name(&self) -> &str {
        "http-transcriber"
    }

    async fn submit(&self, request: &TranscriptionRequest) -> Result<Transcript, ProducerError> {
        let file_name = request
            .audio_path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "audio.m4a".to_string());

        let file_bytes = tokio::fs::read(&request.audio_path).await.map_err(|e| {
            ProducerError::Permanent(format!(
                "failed to read audio file {}: {e}",
                request.audio_path.display()
            ))
        })?;

        let file_part = Part::bytes(file_bytes)
            .file_name(file_name)
            .mime_str("audio/mp4")
            .map_err(|e| ProducerError::Permanent(e.to_string()))?;

        let form = Form::new()
            .text("model", self.model.clone())
            .text("sermon_id", request.sermon_id.to_string())
            .part("audio", file_part);

        let response = self
            .client
            .post(&self.endpoint)
            .header("Authorization", format!("Bearer {}", self.token))
            .header("Idempotency-Key", &request.idempotency_key)
            .multipart(form)
            .send()
            .await
            .map_err(transport_error)?;

        let parsed: TranscriptionResponse = check(response)
            .await?
            .json()
            .await
            .map_err(|e| ProducerError::Permanent(format!("malformed transcript: {e}")))?;

        Ok(Transcript {
            text: parsed.text.trim().to_string(),
            language: if parsed.language.is_empty() {
                "en".to_string()
            } else {
                parsed.language
            },
            segments: parsed
                .segments
                .into_iter()
                .map(|s| TranscriptSegment {
                    start_seconds: s.start,
                    end_seconds: s.end,
                    text: s.text,
                })
                .collect(),
        })
    }
}

/// HTTP summarization client.
pub struct HttpSummarizer {
    endpoint: String,
    token: String,
    client: reqwest::Client,
}

impl HttpSummarizer {
    pub fn new(endpoint: String, token: String, timeout: Duration) -> Result<Self, ProducerError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ProducerError::Permanent(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            endpoint,
            token,
            client,
        })
    }
}

#[async_trait]
impl SummarizationProducer for HttpSummarizer {
    fn name(&self) -> &str {
        "http-summarizer"
    }

    async fn submit(&self, request: &SummaryRequest) -> Result<String, ProducerError> {
        let response = self
            .client
            .post(&self.endpoint)
            .header("Authorization", format!("Bearer {}", self.token))
            .header("Idempotency-Key", &request.idempotency_key)
            .json(&serde_json::json!({
                "sermon_id": request.sermon_id,
                "transcript": request.transcript_text,
            }))
            .send()
            .await
            .map_err(transport_error)?;

        let parsed: SummaryResponse = check(response)
            .await?
            .json()
            .await
            .map_err(|e| ProducerError::Permanent(format!("malformed summary: {e}")))?;

        Ok(parsed.summary)
    }
}
