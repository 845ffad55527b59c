//! Remote backend seam.
//!
//! The backend is consumed as three calls: upsert, delete, and an
//! updated-since fetch. Every successful write returns the server-assigned
//! `updated_at`, which becomes the local baseline after a push. Errors are
//! split into transient (retried on the next pass) and permanent (surfaced
//! as a sync error for explicit user retry).

pub mod http;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::{JobStatus, OwnerId, Sermon, SermonContent, Transcript};

pub use http::HttpBackend;

/// Errors from the remote backend.
#[derive(Debug, thiserror::Error)]
pub enum RemoteError {
    /// Network timeouts, connection failures, 5xx — safe to retry
    #[error("transient backend error: {0}")]
    Transient(String),

    /// Auth rejection, malformed record, 4xx — retry will not help
    #[error("permanent backend error: {0}")]
    Permanent(String),
}

impl RemoteError {
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }
}

/// Wire representation of a record.
///
/// Carries content fields and completed job results only — in-progress job
/// internals never leave the device.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteSermon {
    /// Client-assigned record id, stable across devices
    pub id: Uuid,

    /// Server-assigned id; absent on a first push
    pub remote_id: Option<String>,

    pub owner: OwnerId,

    #[serde(flatten)]
    pub content: SermonContent,

    /// Completed transcript, if any
    pub transcript: Option<Transcript>,

    /// Completed summary, if any
    pub summary: Option<String>,

    /// Content timestamp used for last-writer-wins comparison
    pub updated_at: DateTime<Utc>,

    /// Remote-side deletion marker
    #[serde(default)]
    pub deleted: bool,
}

impl RemoteSermon {
    /// Serialize a local record for push.
    pub fn from_sermon(sermon: &Sermon) -> Self {
        Self {
            id: sermon.id,
            remote_id: sermon.sync.remote_id.clone(),
            owner: sermon.owner.clone(),
            content: sermon.content(),
            transcript: match sermon.transcription.status {
                JobStatus::Complete => sermon.transcription.result.clone(),
                _ => None,
            },
            summary: match sermon.summary.status {
                JobStatus::Complete => sermon.summary.result.clone(),
                _ => None,
            },
            updated_at: sermon.sync.updated_at,
            deleted: false,
        }
    }
}

/// Acknowledgement of a successful write.
#[derive(Debug, Clone, Deserialize)]
pub struct RemoteWriteAck {
    pub remote_id: String,

    /// Server-assigned timestamp for the write
    pub updated_at: DateTime<Utc>,
}

/// The remote backend consumed by the sync coordinator.
#[async_trait]
pub trait RemoteBackend: Send + Sync {
    /// Create or update a record; returns the server id and timestamp.
    async fn upsert(&self, sermon: &RemoteSermon) -> Result<RemoteWriteAck, RemoteError>;

    /// Delete by server id.
    async fn delete(&self, remote_id: &str) -> Result<(), RemoteError>;

    /// Records changed after the cursor (all records when `None`).
    async fn fetch_updated_since(
        &self,
        owner: &OwnerId,
        cursor: Option<DateTime<Utc>>,
    ) -> Result<Vec<RemoteSermon>, RemoteError>;
}
