//! Job lifecycle for derived artifacts (transcript, summary).
//!
//! Every long-running producer job attached to a sermon moves through the
//! same closed state machine. Transitions are validated here; callers never
//! assign a status field directly.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Which derived artifact a job produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    Transcription,
    Summary,
}

impl std::fmt::Display for JobKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Transcription => write!(f, "transcription"),
            Self::Summary => write!(f, "summary"),
        }
    }
}

/// Lifecycle state of a producer job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Not yet submitted
    Pending,

    /// Submitted, waiting on the producer
    Processing,

    /// Producer returned a result
    Complete,

    /// Producer returned an error or the call timed out
    Failed,
}

impl Default for JobStatus {
    fn default() -> Self {
        Self::Pending
    }
}

impl JobStatus {
    /// Terminal states require an explicit retry (or refresh) to leave.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Complete | Self::Failed)
    }

    pub fn is_in_flight(&self) -> bool {
        matches!(self, Self::Processing)
    }
}

/// Errors from invalid lifecycle operations.
#[derive(Debug, Error)]
pub enum JobError {
    #[error("invalid {kind} transition: {from:?} → {to:?}")]
    InvalidTransition {
        kind: JobKind,
        from: JobStatus,
        to: JobStatus,
    },

    #[error("summary requires a completed transcript")]
    TranscriptNotReady,
}

/// A time-aligned piece of a transcript.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscriptSegment {
    pub start_seconds: f64,
    pub end_seconds: f64,
    pub text: String,
}

/// Transcription result payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transcript {
    /// Full transcript text
    pub text: String,

    /// Detected language code (e.g. "en")
    #[serde(default)]
    pub language: String,

    /// Time-aligned segments
    #[serde(default)]
    pub segments: Vec<TranscriptSegment>,
}

impl Transcript {
    /// Duration covered by the segments, if any.
    pub fn duration_seconds(&self) -> f64 {
        self.segments.last().map(|s| s.end_seconds).unwrap_or(0.0)
    }
}

/// Transcription job state embedded in a sermon record.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TranscriptionJob {
    pub status: JobStatus,

    /// Present exactly when `status == Complete`
    pub result: Option<Transcript>,

    /// Error message from the last failure
    pub error: Option<String>,

    /// When the current/last submission was made
    pub started_at: Option<DateTime<Utc>>,

    /// When the job reached a terminal state
    pub finished_at: Option<DateTime<Utc>>,

    /// Submission count, across retries
    pub attempts: u32,
}

impl TranscriptionJob {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark the job submitted. Valid from `Pending` only.
    pub fn begin(&mut self, now: DateTime<Utc>) -> Result<(), JobError> {
        if self.status != JobStatus::Pending {
            return Err(JobError::InvalidTransition {
                kind: JobKind::Transcription,
                from: self.status,
                to: JobStatus::Processing,
            });
        }
        self.status = JobStatus::Processing;
        self.started_at = Some(now);
        self.finished_at = None;
        self.attempts += 1;
        Ok(())
    }

    /// Store a producer result. Valid from `Processing` only.
    pub fn complete(&mut self, result: Transcript, now: DateTime<Utc>) -> Result<(), JobError> {
        if self.status != JobStatus::Processing {
            return Err(JobError::InvalidTransition {
                kind: JobKind::Transcription,
                from: self.status,
                to: JobStatus::Complete,
            });
        }
        self.status = JobStatus::Complete;
        self.result = Some(result);
        self.error = None;
        self.finished_at = Some(now);
        Ok(())
    }

    /// Record a producer failure. Valid from `Processing` only.
    pub fn fail(&mut self, error: String, now: DateTime<Utc>) -> Result<(), JobError> {
        if self.status != JobStatus::Processing {
            return Err(JobError::InvalidTransition {
                kind: JobKind::Transcription,
                from: self.status,
                to: JobStatus::Failed,
            });
        }
        self.status = JobStatus::Failed;
        self.error = Some(error);
        self.finished_at = Some(now);
        Ok(())
    }

    /// Explicit retry: back to `Pending`, clearing any previous result.
    pub fn reset(&mut self) {
        self.status = JobStatus::Pending;
        self.result = None;
        self.error = None;
        self.started_at = None;
        self.finished_at = None;
    }

    /// A `Processing` job whose submission is older than `threshold` is
    /// presumed abandoned (killed process, dropped callback).
    pub fn is_stuck(&self, now: DateTime<Utc>, threshold: Duration) -> bool {
        if self.status != JobStatus::Processing {
            return false;
        }
        match self.started_at {
            Some(started) => now.signed_duration_since(started) > threshold,
            // Processing without a submission timestamp is always stuck
            None => true,
        }
    }
}

/// Summary job state embedded in a sermon record.
///
/// Same lifecycle as [`TranscriptionJob`], plus the refresh path: a
/// completed summary may be regenerated, which is the only permitted
/// `Complete → Processing` transition. Refresh quota is owned by the
/// caller; this type only exposes the counters.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SummaryJob {
    pub status: JobStatus,

    /// Present exactly when `status == Complete`
    pub result: Option<String>,

    pub error: Option<String>,

    pub started_at: Option<DateTime<Utc>>,

    pub finished_at: Option<DateTime<Utc>>,

    pub attempts: u32,

    /// Number of successful refreshes of a completed summary
    pub refresh_count: u32,

    /// When the summary was last refreshed successfully
    pub last_refreshed_at: Option<DateTime<Utc>>,
}

impl SummaryJob {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn begin(&mut self, now: DateTime<Utc>) -> Result<(), JobError> {
        if self.status != JobStatus::Pending {
            return Err(JobError::InvalidTransition {
                kind: JobKind::Summary,
                from: self.status,
                to: JobStatus::Processing,
            });
        }
        self.status = JobStatus::Processing;
        self.started_at = Some(now);
        self.finished_at = None;
        self.attempts += 1;
        Ok(())
    }

    /// Regenerate a completed summary. The previous result stays in place
    /// until the new one lands.
    pub fn begin_refresh(&mut self, now: DateTime<Utc>) -> Result<(), JobError> {
        if self.status != JobStatus::Complete {
            return Err(JobError::InvalidTransition {
                kind: JobKind::Summary,
                from: self.status,
                to: JobStatus::Processing,
            });
        }
        self.status = JobStatus::Processing;
        self.started_at = Some(now);
        self.finished_at = None;
        self.attempts += 1;
        Ok(())
    }

    pub fn complete(&mut self, result: String, now: DateTime<Utc>) -> Result<(), JobError> {
        if self.status != JobStatus::Processing {
            return Err(JobError::InvalidTransition {
                kind: JobKind::Summary,
                from: self.status,
                to: JobStatus::Complete,
            });
        }
        let is_refresh = self.result.is_some();
        self.status = JobStatus::Complete;
        self.result = Some(result);
        self.error = None;
        self.finished_at = Some(now);
        if is_refresh {
            self.refresh_count += 1;
            self.last_refreshed_at = Some(now);
        }
        Ok(())
    }

    pub fn fail(&mut self, error: String, now: DateTime<Utc>) -> Result<(), JobError> {
        if self.status != JobStatus::Processing {
            return Err(JobError::InvalidTransition {
                kind: JobKind::Summary,
                from: self.status,
                to: JobStatus::Failed,
            });
        }
        // A failed refresh keeps the old summary; only the status records
        // the failure until the next scan retries it.
        self.status = JobStatus::Failed;
        self.error = Some(error);
        self.finished_at = Some(now);
        Ok(())
    }

    pub fn reset(&mut self) {
        self.status = JobStatus::Pending;
        self.result = None;
        self.error = None;
        self.started_at = None;
        self.finished_at = None;
    }

    pub fn is_stuck(&self, now: DateTime<Utc>, threshold: Duration) -> bool {
        if self.status != JobStatus::Processing {
            return false;
        }
        match self.started_at {
            Some(started) => now.signed_duration_since(started) > threshold,
            None => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn transcript(text: &str) -> Transcript {
        Transcript {
            text: text.to_string(),
            language: "en".to_string(),
            segments: vec![],
        }
    }

    #[test]
    fn test_transcription_happy_path() {
        let now = Utc::now();
        let mut job = TranscriptionJob::new();
        assert_eq!(job.status, JobStatus::Pending);

        job.begin(now).unwrap();
        assert_eq!(job.status, JobStatus::Processing);
        assert_eq!(job.attempts, 1);

        job.complete(transcript("Hello world"), now).unwrap();
        assert_eq!(job.status, JobStatus::Complete);
        assert_eq!(job.result.as_ref().unwrap().text, "Hello world");
        assert!(job.error.is_none());
    }

    #[test]
    fn test_begin_requires_pending() {
        let now = Utc::now();
        let mut job = TranscriptionJob::new();
        job.begin(now).unwrap();

        // Second begin while processing is rejected
        assert!(matches!(
            job.begin(now),
            Err(JobError::InvalidTransition { .. })
        ));
    }

    #[test]
    fn test_complete_from_pending_rejected() {
        let now = Utc::now();
        let mut job = TranscriptionJob::new();
        assert!(job.complete(transcript("x"), now).is_err());
    }

    #[test]
    fn test_reset_clears_result() {
        let now = Utc::now();
        let mut job = TranscriptionJob::new();
        job.begin(now).unwrap();
        job.fail("timeout".to_string(), now).unwrap();

        job.reset();
        assert_eq!(job.status, JobStatus::Pending);
        assert!(job.result.is_none());
        assert!(job.error.is_none());
        // Attempts survive resets
        assert_eq!(job.attempts, 1);
    }

    #[test]
    fn test_stuck_detection() {
        let now = Utc::now();
        let mut job = TranscriptionJob::new();
        job.begin(now - Duration::minutes(10)).unwrap();

        assert!(job.is_stuck(now, Duration::minutes(2)));
        assert!(!job.is_stuck(now, Duration::minutes(20)));

        // Non-processing jobs are never stuck
        job.complete(transcript("done"), now).unwrap();
        assert!(!job.is_stuck(now, Duration::minutes(2)));
    }

    #[test]
    fn test_summary_refresh_counts_on_success() {
        let now = Utc::now();
        let mut job = SummaryJob::new();
        job.begin(now).unwrap();
        job.complete("first".to_string(), now).unwrap();
        assert_eq!(job.refresh_count, 0);
        assert!(job.last_refreshed_at.is_none());

        // Refresh is the only Complete → Processing path
        job.begin_refresh(now).unwrap();
        assert_eq!(job.status, JobStatus::Processing);
        // Old result stays until the new one lands
        assert_eq!(job.result.as_deref(), Some("first"));

        job.complete("second".to_string(), now).unwrap();
        assert_eq!(job.refresh_count, 1);
        assert!(job.last_refreshed_at.is_some());
        assert_eq!(job.result.as_deref(), Some("second"));
    }

    #[test]
    fn test_refresh_requires_complete() {
        let now = Utc::now();
        let mut job = SummaryJob::new();
        assert!(job.begin_refresh(now).is_err());

        job.begin(now).unwrap();
        job.fail("provider error".to_string(), now).unwrap();
        assert!(job.begin_refresh(now).is_err());
    }

    #[test]
    fn test_failed_refresh_keeps_old_summary() {
        let now = Utc::now();
        let mut job = SummaryJob::new();
        job.begin(now).unwrap();
        job.complete("first".to_string(), now).unwrap();
        job.begin_refresh(now).unwrap();
        job.fail("quota".to_string(), now).unwrap();

        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.result.as_deref(), Some("first"));
        assert_eq!(job.refresh_count, 0);
    }

    #[test]
    fn test_status_serialization_snake_case() {
        let json = serde_json::to_string(&JobStatus::Processing).unwrap();
        assert_eq!(json, "\"processing\"");

        // Unknown strings are rejected at the serde boundary
        let bad: Result<JobStatus, _> = serde_json::from_str("\"in_progress\"");
        assert!(bad.is_err());
    }
}
