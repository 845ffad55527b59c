//! The sermon record: content fields plus embedded sync and job state.
//!
//! All local mutations flow through [`Sermon::edit`], the single gateway
//! that bumps `updated_at` and flags the record for sync. Sync-side fields
//! (`remote_id`, `last_synced_at`, `status`) are maintained by dedicated
//! methods that deliberately bypass the gateway so a push acknowledgement
//! never re-dirties a record.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use super::jobs::{JobStatus, SummaryJob, TranscriptionJob};

/// Opaque owner identity, as handed out by the credential provider.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OwnerId(pub String);

impl OwnerId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for OwnerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Where a record stands relative to the remote backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncStatus {
    /// Never pushed
    LocalOnly,

    /// A push for this record is in flight
    Syncing,

    /// Local and remote agree as of `last_synced_at`
    Synced,

    /// Last push attempt failed; will retry next pass
    Error,
}

/// Sync bookkeeping embedded in a record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncState {
    pub status: SyncStatus,

    /// Local changes not yet reflected remotely
    pub needs_sync: bool,

    /// Server-assigned id, set once the first push succeeds
    pub remote_id: Option<String>,

    /// Server timestamp of the last successful push or pull
    pub last_synced_at: Option<DateTime<Utc>>,

    /// Bumped on every local mutation
    pub updated_at: DateTime<Utc>,
}

impl SyncState {
    fn new(now: DateTime<Utc>) -> Self {
        Self {
            status: SyncStatus::LocalOnly,
            needs_sync: true,
            remote_id: None,
            last_synced_at: None,
            updated_at: now,
        }
    }
}

/// Content fields that travel over the wire. The audio path stays local:
/// it only means something on the device that recorded it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SermonContent {
    pub title: String,
    pub speaker: Option<String>,
    pub recorded_at: DateTime<Utc>,
    pub duration_seconds: Option<f64>,
    pub notes: Option<String>,
}

/// Violations of the record's embedded invariants, rejected at the store
/// boundary.
#[derive(Debug, Error)]
pub enum InvariantViolation {
    #[error("record {0}: transcription complete without a result")]
    TranscriptMissing(Uuid),

    #[error("record {0}: summary complete without a result")]
    SummaryMissing(Uuid),

    #[error("record {0}: summary complete but transcription is not")]
    SummaryBeforeTranscript(Uuid),

    #[error("record {0}: synced without a remote id")]
    SyncedWithoutRemoteId(Uuid),

    #[error("record {0}: local edits newer than last sync but needs_sync is false")]
    DirtyNotFlagged(Uuid),
}

/// A recorded sermon with its sync and job metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Sermon {
    /// Immutable identity
    pub id: Uuid,

    /// Owning user
    pub owner: OwnerId,

    pub title: String,

    pub speaker: Option<String>,

    /// When the recording was made
    pub recorded_at: DateTime<Utc>,

    /// Recording length, if known
    pub duration_seconds: Option<f64>,

    /// Local path to the captured audio, when present on this device
    pub audio_path: Option<PathBuf>,

    pub notes: Option<String>,

    pub sync: SyncState,

    pub transcription: TranscriptionJob,

    pub summary: SummaryJob,
}

impl Sermon {
    /// Create a local-only record with both jobs pending.
    pub fn new(owner: OwnerId, title: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            owner,
            title: title.into(),
            speaker: None,
            recorded_at: now,
            duration_seconds: None,
            audio_path: None,
            notes: None,
            sync: SyncState::new(now),
            transcription: TranscriptionJob::new(),
            summary: SummaryJob::new(),
        }
    }

    /// Apply a local mutation and flag the record for sync. This is the
    /// only place `updated_at` and `needs_sync` are bumped.
    pub fn edit<R, F>(&mut self, now: DateTime<Utc>, f: F) -> R
    where
        F: FnOnce(&mut Sermon) -> R,
    {
        let out = f(self);
        self.sync.updated_at = now;
        self.sync.needs_sync = true;
        out
    }

    /// Local changes not yet pushed.
    pub fn is_dirty(&self) -> bool {
        self.sync.needs_sync
    }

    /// A record that has never been pushed.
    pub fn is_local_only(&self) -> bool {
        self.sync.remote_id.is_none()
    }

    /// Mark a push attempt in flight.
    pub fn mark_syncing(&mut self) {
        self.sync.status = SyncStatus::Syncing;
    }

    /// Record a successful push. The server-assigned `updated_at` becomes
    /// the new local baseline, and `needs_sync` clears only if no edit
    /// landed after `pushed_as` — a concurrent edit keeps the record dirty
    /// for the next pass.
    pub fn mark_pushed(
        &mut self,
        remote_id: String,
        server_updated_at: DateTime<Utc>,
        pushed_as: DateTime<Utc>,
    ) {
        self.sync.remote_id = Some(remote_id);
        self.sync.last_synced_at = Some(server_updated_at);
        if self.sync.updated_at <= pushed_as {
            self.sync.updated_at = server_updated_at;
            self.sync.needs_sync = false;
            self.sync.status = SyncStatus::Synced;
        } else {
            self.sync.status = SyncStatus::Error;
        }
    }

    /// Record a failed push; the record stays dirty for the next pass.
    pub fn mark_sync_error(&mut self) {
        self.sync.status = SyncStatus::Error;
    }

    /// Overwrite content fields from a newer remote version. Job state and
    /// results are locally authoritative and are never touched by a pull.
    pub fn apply_remote_content(
        &mut self,
        content: SermonContent,
        server_updated_at: DateTime<Utc>,
    ) {
        self.title = content.title;
        self.speaker = content.speaker;
        self.recorded_at = content.recorded_at;
        self.duration_seconds = content.duration_seconds;
        self.notes = content.notes;
        self.sync.updated_at = server_updated_at;
        self.sync.last_synced_at = Some(server_updated_at);
        self.sync.needs_sync = false;
        self.sync.status = SyncStatus::Synced;
    }

    /// Wire-bound content fields.
    pub fn content(&self) -> SermonContent {
        SermonContent {
            title: self.title.clone(),
            speaker: self.speaker.clone(),
            recorded_at: self.recorded_at,
            duration_seconds: self.duration_seconds,
            notes: self.notes.clone(),
        }
    }

    /// Check the record's embedded invariants. Called by the store on
    /// every put and during replay.
    pub fn validate(&self) -> Result<(), InvariantViolation> {
        if self.transcription.status == JobStatus::Complete && self.transcription.result.is_none()
        {
            return Err(InvariantViolation::TranscriptMissing(self.id));
        }
        if self.summary.status == JobStatus::Complete {
            if self.summary.result.is_none() {
                return Err(InvariantViolation::SummaryMissing(self.id));
            }
            if self.transcription.status != JobStatus::Complete {
                return Err(InvariantViolation::SummaryBeforeTranscript(self.id));
            }
        }
        if self.sync.status == SyncStatus::Synced && self.sync.remote_id.is_none() {
            return Err(InvariantViolation::SyncedWithoutRemoteId(self.id));
        }
        let stale = match self.sync.last_synced_at {
            None => true,
            Some(last) => self.sync.updated_at > last,
        };
        if stale && !self.sync.needs_sync {
            return Err(InvariantViolation::DirtyNotFlagged(self.id));
        }
        Ok(())
    }
}

/// Marker left behind by a local delete until the deletion has been
/// propagated to the remote backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tombstone {
    pub id: Uuid,

    pub owner: OwnerId,

    /// Remote id to delete, if the record was ever pushed
    pub remote_id: Option<String>,

    pub deleted_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::jobs::Transcript;

    fn sermon() -> Sermon {
        Sermon::new(OwnerId::new("user-1"), "Sunday Service", Utc::now())
    }

    #[test]
    fn test_new_record_is_local_only_and_dirty() {
        let s = sermon();
        assert_eq!(s.sync.status, SyncStatus::LocalOnly);
        assert!(s.is_dirty());
        assert!(s.is_local_only());
        assert_eq!(s.transcription.status, JobStatus::Pending);
        assert_eq!(s.summary.status, JobStatus::Pending);
        s.validate().unwrap();
    }

    #[test]
    fn test_edit_bumps_updated_at() {
        let mut s = sermon();
        let before = s.sync.updated_at;
        let later = before + chrono::Duration::seconds(5);

        s.edit(later, |s| s.title = "Evening Service".to_string());

        assert_eq!(s.title, "Evening Service");
        assert_eq!(s.sync.updated_at, later);
        assert!(s.sync.needs_sync);
    }

    #[test]
    fn test_mark_pushed_clears_dirty() {
        let mut s = sermon();
        let pushed_as = s.sync.updated_at;
        let server_ts = pushed_as + chrono::Duration::seconds(1);

        s.mark_pushed("r1".to_string(), server_ts, pushed_as);

        assert_eq!(s.sync.status, SyncStatus::Synced);
        assert!(!s.sync.needs_sync);
        assert_eq!(s.sync.remote_id.as_deref(), Some("r1"));
        assert_eq!(s.sync.updated_at, server_ts);
        assert_eq!(s.sync.last_synced_at, Some(server_ts));
        s.validate().unwrap();
    }

    #[test]
    fn test_mark_pushed_keeps_concurrent_edit_dirty() {
        let mut s = sermon();
        let pushed_as = s.sync.updated_at;

        // An edit lands while the push is in flight
        let edit_ts = pushed_as + chrono::Duration::seconds(2);
        s.edit(edit_ts, |s| s.notes = Some("typo fix".to_string()));

        let server_ts = pushed_as + chrono::Duration::seconds(1);
        s.mark_pushed("r1".to_string(), server_ts, pushed_as);

        // remote_id sticks, but the record stays dirty
        assert_eq!(s.sync.remote_id.as_deref(), Some("r1"));
        assert!(s.sync.needs_sync);
        assert_ne!(s.sync.status, SyncStatus::Synced);
    }

    #[test]
    fn test_pull_overwrites_content_not_jobs() {
        let now = Utc::now();
        let mut s = sermon();
        s.transcription.begin(now).unwrap();
        s.transcription
            .complete(
                Transcript {
                    text: "Hello world".to_string(),
                    language: "en".to_string(),
                    segments: vec![],
                },
                now,
            )
            .unwrap();

        let remote_ts = now + chrono::Duration::seconds(30);
        s.apply_remote_content(
            SermonContent {
                title: "Renamed Remotely".to_string(),
                speaker: Some("Guest".to_string()),
                recorded_at: s.recorded_at,
                duration_seconds: Some(1800.0),
                notes: None,
            },
            remote_ts,
        );

        assert_eq!(s.title, "Renamed Remotely");
        assert!(!s.sync.needs_sync);
        // Job state untouched by the pull
        assert_eq!(s.transcription.status, JobStatus::Complete);
        assert_eq!(s.transcription.result.as_ref().unwrap().text, "Hello world");
    }

    #[test]
    fn test_validate_rejects_complete_without_result() {
        let mut s = sermon();
        s.transcription.status = JobStatus::Complete;
        assert!(matches!(
            s.validate(),
            Err(InvariantViolation::TranscriptMissing(_))
        ));
    }

    #[test]
    fn test_validate_rejects_summary_before_transcript() {
        let mut s = sermon();
        s.summary.status = JobStatus::Complete;
        s.summary.result = Some("summary".to_string());
        assert!(matches!(
            s.validate(),
            Err(InvariantViolation::SummaryBeforeTranscript(_))
        ));
    }

    #[test]
    fn test_validate_rejects_synced_without_remote_id() {
        let mut s = sermon();
        s.sync.status = SyncStatus::Synced;
        s.sync.needs_sync = false;
        s.sync.last_synced_at = Some(s.sync.updated_at);
        assert!(matches!(
            s.validate(),
            Err(InvariantViolation::SyncedWithoutRemoteId(_))
        ));
    }
}
