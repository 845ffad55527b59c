//! Producer seams for transcription and summarization.
//!
//! Producers are opaque request/response services. The engine submits work
//! with an idempotency key derived from the record and input content, so a
//! resubmission after a crash cannot double-process on the provider side.
//! Completion is written back by the recovery manager; a duplicate
//! completion for an already-complete job is ignored there.

pub mod http;

use std::path::PathBuf;

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::domain::{JobKind, Transcript};

pub use http::{HttpSummarizer, HttpTranscriber};

/// Errors from a producer call.
#[derive(Debug, thiserror::Error)]
pub enum ProducerError {
    /// Timeout, connection failure, 5xx — the next scan retries
    #[error("transient producer error: {0}")]
    Transient(String),

    /// Rejected input, auth failure — needs user attention
    #[error("permanent producer error: {0}")]
    Permanent(String),
}

/// A transcription submission.
#[derive(Debug, Clone)]
pub struct TranscriptionRequest {
    pub sermon_id: Uuid,

    /// Captured audio on this device
    pub audio_path: PathBuf,

    /// `{sermon_id}:transcription:{input_hash}`
    pub idempotency_key: String,
}

/// A summarization submission.
#[derive(Debug, Clone)]
pub struct SummaryRequest {
    pub sermon_id: Uuid,

    /// Completed transcript text the summary is derived from
    pub transcript_text: String,

    /// `{sermon_id}:summary:{input_hash}`
    pub idempotency_key: String,
}

/// External transcription service.
#[async_trait]
pub trait TranscriptionProducer: Send + Sync {
    /// Human-readable producer name
    fn name(&self) -> &str;

    async fn submit(&self, request: &TranscriptionRequest) -> Result<Transcript, ProducerError>;
}

/// External summarization service.
#[async_trait]
pub trait SummarizationProducer: Send + Sync {
    fn name(&self) -> &str;

    async fn submit(&self, request: &SummaryRequest) -> Result<String, ProducerError>;
}

/// Generate a submission idempotency key for a job.
pub fn submission_key(sermon_id: Uuid, kind: JobKind, input: &[u8]) -> String {
    format!("{}:{}:{}", sermon_id, kind, hash_input(input))
}

/// Hash submission input (first 16 hex chars of SHA256).
pub fn hash_input(input: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(input);
    let result = hasher.finalize();
    hex::encode(&result[..8])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_submission_key_format() {
        let id = Uuid::parse_str("550e8400-e29b-41d4-a716-446655440000").unwrap();
        let key = submission_key(id, JobKind::Transcription, b"audio bytes");

        assert!(key.starts_with("550e8400-e29b-41d4-a716-446655440000:transcription:"));

        let parts: Vec<&str> = key.split(':').collect();
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[2].len(), 16);
    }

    #[test]
    fn test_hash_input_consistency() {
        let hash1 = hash_input(b"same input");
        let hash2 = hash_input(b"same input");
        let hash3 = hash_input(b"different input");

        assert_eq!(hash1, hash2);
        assert_ne!(hash1, hash3);
        assert_eq!(hash1.len(), 16);
    }
}
