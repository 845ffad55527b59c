//! Recovery of stuck and failed producer jobs.
//!
//! The recovery manager makes sure no record is permanently stranded
//! because a process died mid-job or a completion callback was dropped.
//! Retries are pull-based: a scan finds due jobs and resubmits them, and
//! nothing in here schedules its own backoff timers, so behavior is
//! deterministic and restart-safe.
//!
//! Due rules per scan:
//! - `Failed` and `Pending` jobs are due immediately
//! - `Processing` jobs are due once their submission age exceeds the
//!   stuck threshold (grace for genuinely in-flight work)
//! - Summary jobs additionally wait for a completed transcript

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::Mutex as StdMutex;

use chrono::Utc;
use tokio::sync::broadcast;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::config::RecoverySettings;
use crate::domain::{JobError, JobEvent, JobKind, JobStatus, OwnerId, Sermon, Transcript};
use crate::producers::{
    submission_key, SummarizationProducer, SummaryRequest, TranscriptionProducer,
    TranscriptionRequest,
};
use crate::store::{LocalStore, StoreError};

/// Outcome counters for one `scan_and_recover` pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecoveryReport {
    /// Jobs submitted to a producer this scan
    pub resubmitted: usize,

    /// Submissions that came back successful
    pub completed: usize,

    /// Submissions that came back failed
    pub failed: usize,

    /// Jobs skipped because a fresh submission is already in flight
    pub in_flight: usize,

    /// Jobs not yet runnable (no local audio, or transcript not ready)
    pub waiting: usize,

    /// Due jobs pushed past the per-scan batch budget
    pub deferred: usize,
}

impl RecoveryReport {
    pub fn summary(&self) -> String {
        format!(
            "resubmitted {}, completed {}, failed {}, in-flight {}, waiting {}, deferred {}",
            self.resubmitted, self.completed, self.failed, self.in_flight, self.waiting,
            self.deferred
        )
    }
}

/// Whether a job should be resubmitted by this scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Due {
    Ready,
    InFlight,
    Waiting,
    Done,
}

/// Resubmits stuck/failed jobs and writes producer completions back to the
/// store. One instance per process, injected into consumers.
pub struct RecoveryManager<S, T, P> {
    store: Arc<S>,
    transcriber: Arc<T>,
    summarizer: Arc<P>,
    settings: RecoverySettings,
    events: broadcast::Sender<JobEvent>,

    /// Record/job pairs currently being driven by this process. Guards
    /// the at-most-one-in-flight invariant across overlapping scans.
    in_flight: StdMutex<HashSet<(Uuid, JobKind)>>,
}

/// Releases an in-flight claim when the submission finishes.
struct FlightClaim<'a> {
    set: &'a StdMutex<HashSet<(Uuid, JobKind)>>,
    key: (Uuid, JobKind),
}

impl Drop for FlightClaim<'_> {
    fn drop(&mut self) {
        if let Ok(mut set) = self.set.lock() {
            set.remove(&self.key);
        }
    }
}

impl<S, T, P> RecoveryManager<S, T, P>
where
    S: LocalStore,
    T: TranscriptionProducer,
    P: SummarizationProducer,
{
    pub fn new(
        store: Arc<S>,
        transcriber: Arc<T>,
        summarizer: Arc<P>,
        settings: RecoverySettings,
    ) -> Self {
        let (events, _) = broadcast::channel(256);
        Self {
            store,
            transcriber,
            summarizer,
            settings,
            events,
            in_flight: StdMutex::new(HashSet::new()),
        }
    }

    /// Subscribe to job completion events (record id, job kind, status).
    pub fn subscribe(&self) -> broadcast::Receiver<JobEvent> {
        self.events.subscribe()
    }

    fn emit(&self, id: Uuid, kind: JobKind, status: JobStatus) {
        // No subscribers is fine; events are advisory
        let _ = self.events.send(JobEvent::new(id, kind, status));
    }

    fn claim(&self, id: Uuid, kind: JobKind) -> Option<FlightClaim<'_>> {
        let mut set = self.in_flight.lock().ok()?;
        if !set.insert((id, kind)) {
            return None;
        }
        Some(FlightClaim {
            set: &self.in_flight,
            key: (id, kind),
        })
    }

    /// Find and resubmit every due job for the owner. Producer errors set
    /// `Failed` and wait for the next scan; only a store failure aborts.
    #[instrument(skip(self), fields(owner = %owner))]
    pub async fn scan_and_recover(&self, owner: &OwnerId) -> Result<RecoveryReport, StoreError> {
        let now = Utc::now();
        let threshold = self.settings.stuck_threshold();

        let mut candidates = self.store.recoverable(owner).await?;
        // Oldest recordings first, so one starved record cannot be
        // overtaken forever by newer arrivals
        candidates.sort_by_key(|s| s.recorded_at);

        let mut report = RecoveryReport::default();
        let mut transcription_budget = self.settings.batch_size;
        let mut summary_budget = self.settings.batch_size;

        for sermon in &candidates {
            match transcription_due(sermon, now, threshold) {
                Due::Ready if transcription_budget == 0 => report.deferred += 1,
                Due::Ready => {
                    transcription_budget -= 1;
                    self.run_transcription(sermon.id, &mut report).await?;
                }
                Due::InFlight => report.in_flight += 1,
                Due::Waiting => report.waiting += 1,
                Due::Done => {}
            }

            // Re-read: the transcription above may have just completed,
            // unblocking this record's summary in the same scan
            let Some(current) = self.store.get(sermon.id).await? else {
                continue;
            };

            match summary_due(&current, now, threshold) {
                Due::Ready if summary_budget == 0 => report.deferred += 1,
                Due::Ready => {
                    summary_budget -= 1;
                    self.run_summary(&current, &mut report).await?;
                }
                Due::InFlight => report.in_flight += 1,
                Due::Waiting => report.waiting += 1,
                Due::Done => {}
            }
        }

        info!(owner = %owner, "recovery scan: {}", report.summary());
        Ok(report)
    }

    async fn run_transcription(
        &self,
        id: Uuid,
        report: &mut RecoveryReport,
    ) -> Result<(), StoreError> {
        let Some(_claim) = self.claim(id, JobKind::Transcription) else {
            report.in_flight += 1;
            return Ok(());
        };

        let now = Utc::now();
        let sermon = match self
            .store
            .update(id, |s| {
                if s.transcription.status == JobStatus::Complete {
                    return Err(JobError::InvalidTransition {
                        kind: JobKind::Transcription,
                        from: JobStatus::Complete,
                        to: JobStatus::Processing,
                    }
                    .into());
                }
                if s.transcription.status != JobStatus::Pending {
                    s.transcription.reset();
                }
                s.transcription.begin(now)?;
                Ok(())
            })
            .await
        {
            Ok(sermon) => sermon,
            // Raced with a completion between scan and claim
            Err(StoreError::Job(_)) | Err(StoreError::NotFound(_)) => {
                report.in_flight += 1;
                return Ok(());
            }
            Err(e) => return Err(e),
        };
        self.emit(id, JobKind::Transcription, JobStatus::Processing);
        report.resubmitted += 1;

        let Some(audio_path) = sermon.audio_path.clone() else {
            // Due check requires audio, but the path can vanish in between
            self.fail_job(id, JobKind::Transcription, "audio file is not on this device")
                .await?;
            report.failed += 1;
            return Ok(());
        };

        let request = TranscriptionRequest {
            sermon_id: id,
            idempotency_key: submission_key(
                id,
                JobKind::Transcription,
                audio_path.display().to_string().as_bytes(),
            ),
            audio_path,
        };

        debug!(%id, attempt = sermon.transcription.attempts, producer = self.transcriber.name(), "submitting transcription");

        match self.transcriber.submit(&request).await {
            Ok(result) => {
                self.complete_transcription(id, result).await?;
                report.completed += 1;
            }
            Err(e) => {
                warn!(%id, error = %e, "transcription failed");
                self.fail_job(id, JobKind::Transcription, &e.to_string())
                    .await?;
                report.failed += 1;
            }
        }

        Ok(())
    }

    async fn run_summary(
        &self,
        sermon: &Sermon,
        report: &mut RecoveryReport,
    ) -> Result<(), StoreError> {
        let id = sermon.id;
        let Some(transcript) = sermon.transcription.result.clone() else {
            report.waiting += 1;
            return Ok(());
        };

        let Some(_claim) = self.claim(id, JobKind::Summary) else {
            report.in_flight += 1;
            return Ok(());
        };

        let now = Utc::now();
        match self
            .store
            .update(id, |s| {
                if s.summary.status == JobStatus::Complete {
                    return Err(JobError::InvalidTransition {
                        kind: JobKind::Summary,
                        from: JobStatus::Complete,
                        to: JobStatus::Processing,
                    }
                    .into());
                }
                if s.summary.status != JobStatus::Pending {
                    s.summary.reset();
                }
                s.summary.begin(now)?;
                Ok(())
            })
            .await
        {
            Ok(_) => {}
            Err(StoreError::Job(_)) | Err(StoreError::NotFound(_)) => {
                report.in_flight += 1;
                return Ok(());
            }
            Err(e) => return Err(e),
        }
        self.emit(id, JobKind::Summary, JobStatus::Processing);
        report.resubmitted += 1;

        let request = SummaryRequest {
            sermon_id: id,
            idempotency_key: submission_key(id, JobKind::Summary, transcript.text.as_bytes()),
            transcript_text: transcript.text,
        };

        debug!(%id, producer = self.summarizer.name(), "submitting summary");

        match self.summarizer.submit(&request).await {
            Ok(result) => {
                self.complete_summary(id, result).await?;
                report.completed += 1;
            }
            Err(e) => {
                warn!(%id, error = %e, "summarization failed");
                self.fail_job(id, JobKind::Summary, &e.to_string()).await?;
                report.failed += 1;
            }
        }

        Ok(())
    }

    /// Write a transcription result back. Duplicate completions for an
    /// already-complete job are ignored (producers are at-least-once).
    /// Returns whether the completion was applied.
    pub async fn complete_transcription(
        &self,
        id: Uuid,
        result: Transcript,
    ) -> Result<bool, StoreError> {
        let now = Utc::now();
        let mut applied = true;
        self.store
            .update(id, |s| {
                if s.transcription.status == JobStatus::Complete {
                    applied = false;
                    return Ok(());
                }
                let duration = result.duration_seconds();
                s.edit(now, |s| s.transcription.complete(result, now))?;
                if s.duration_seconds.is_none() && duration > 0.0 {
                    s.duration_seconds = Some(duration);
                }
                Ok(())
            })
            .await?;

        if applied {
            info!(%id, "transcription complete");
            self.emit(id, JobKind::Transcription, JobStatus::Complete);
        }
        Ok(applied)
    }

    /// Write a summary result back; duplicates are ignored. A completion
    /// that lands on a refreshing job bumps the refresh counters.
    pub async fn complete_summary(&self, id: Uuid, result: String) -> Result<bool, StoreError> {
        let now = Utc::now();
        let mut applied = true;
        self.store
            .update(id, |s| {
                if s.summary.status == JobStatus::Complete {
                    applied = false;
                    return Ok(());
                }
                s.edit(now, |s| s.summary.complete(result, now))?;
                Ok(())
            })
            .await?;

        if applied {
            info!(%id, "summary complete");
            self.emit(id, JobKind::Summary, JobStatus::Complete);
        }
        Ok(applied)
    }

    /// Record a producer failure. Late failures for jobs that already
    /// completed are ignored. Failures do not bump `updated_at`: there is
    /// no content change to sync.
    pub async fn fail_job(
        &self,
        id: Uuid,
        kind: JobKind,
        error: &str,
    ) -> Result<bool, StoreError> {
        let now = Utc::now();
        let mut applied = true;
        let error = error.to_string();
        self.store
            .update(id, |s| {
                let status = match kind {
                    JobKind::Transcription => s.transcription.status,
                    JobKind::Summary => s.summary.status,
                };
                if status != JobStatus::Processing {
                    applied = false;
                    return Ok(());
                }
                match kind {
                    JobKind::Transcription => s.transcription.fail(error, now)?,
                    JobKind::Summary => s.summary.fail(error, now)?,
                }
                Ok(())
            })
            .await?;

        if applied {
            self.emit(id, kind, JobStatus::Failed);
        }
        Ok(applied)
    }

    /// Explicit user retry: a terminal job goes back to `Pending` and the
    /// next scan picks it up.
    pub async fn retry(&self, id: Uuid, kind: JobKind) -> Result<(), StoreError> {
        self.store
            .update(id, |s| {
                let job_status = match kind {
                    JobKind::Transcription => s.transcription.status,
                    JobKind::Summary => s.summary.status,
                };
                if !job_status.is_terminal() {
                    return Err(JobError::InvalidTransition {
                        kind,
                        from: job_status,
                        to: JobStatus::Pending,
                    }
                    .into());
                }
                match kind {
                    JobKind::Transcription => s.transcription.reset(),
                    JobKind::Summary => s.summary.reset(),
                }
                Ok(())
            })
            .await?;

        self.emit(id, kind, JobStatus::Pending);
        Ok(())
    }

    /// Regenerate a completed summary. The refresh quota is owned by the
    /// caller; this only performs the regeneration and counts it.
    pub async fn refresh_summary(&self, id: Uuid) -> Result<(), StoreError> {
        let Some(_claim) = self.claim(id, JobKind::Summary) else {
            return Err(JobError::InvalidTransition {
                kind: JobKind::Summary,
                from: JobStatus::Processing,
                to: JobStatus::Processing,
            }
            .into());
        };

        let Some(sermon) = self.store.get(id).await? else {
            return Err(StoreError::NotFound(id));
        };
        let Some(transcript) = sermon.transcription.result else {
            return Err(JobError::TranscriptNotReady.into());
        };

        let now = Utc::now();
        self.store
            .update(id, |s| {
                s.summary.begin_refresh(now)?;
                Ok(())
            })
            .await?;
        self.emit(id, JobKind::Summary, JobStatus::Processing);

        let request = SummaryRequest {
            sermon_id: id,
            idempotency_key: submission_key(id, JobKind::Summary, transcript.text.as_bytes()),
            transcript_text: transcript.text,
        };

        match self.summarizer.submit(&request).await {
            Ok(result) => {
                self.complete_summary(id, result).await?;
            }
            Err(e) => {
                warn!(%id, error = %e, "summary refresh failed");
                self.fail_job(id, JobKind::Summary, &e.to_string()).await?;
            }
        }

        Ok(())
    }
}

fn transcription_due(s: &Sermon, now: chrono::DateTime<Utc>, threshold: chrono::Duration) -> Due {
    match s.transcription.status {
        JobStatus::Complete => Due::Done,
        JobStatus::Pending | JobStatus::Failed => {
            if s.audio_path.is_some() {
                Due::Ready
            } else {
                Due::Waiting
            }
        }
        JobStatus::Processing => {
            if s.transcription.is_stuck(now, threshold) {
                Due::Ready
            } else {
                Due::InFlight
            }
        }
    }
}

fn summary_due(s: &Sermon, now: chrono::DateTime<Utc>, threshold: chrono::Duration) -> Due {
    if s.transcription.status != JobStatus::Complete {
        // Nothing to summarize yet; not an error
        return match s.summary.status {
            JobStatus::Pending => Due::Waiting,
            _ => Due::Done,
        };
    }
    match s.summary.status {
        JobStatus::Complete => Due::Done,
        JobStatus::Pending | JobStatus::Failed => Due::Ready,
        JobStatus::Processing => {
            if s.summary.is_stuck(now, threshold) {
                Due::Ready
            } else {
                Due::InFlight
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::record::OwnerId;

    fn sermon_with_audio() -> Sermon {
        let mut s = Sermon::new(OwnerId::new("user-1"), "Sunday Service", Utc::now());
        s.audio_path = Some("/audio/sunday.m4a".into());
        s
    }

    #[test]
    fn test_pending_with_audio_is_due() {
        let s = sermon_with_audio();
        let now = Utc::now();
        assert_eq!(
            transcription_due(&s, now, chrono::Duration::minutes(2)),
            Due::Ready
        );
    }

    #[test]
    fn test_pending_without_audio_waits() {
        let s = Sermon::new(OwnerId::new("user-1"), "Sunday Service", Utc::now());
        let now = Utc::now();
        assert_eq!(
            transcription_due(&s, now, chrono::Duration::minutes(2)),
            Due::Waiting
        );
    }

    #[test]
    fn test_fresh_processing_is_in_flight() {
        let mut s = sermon_with_audio();
        let now = Utc::now();
        s.transcription.begin(now).unwrap();

        assert_eq!(
            transcription_due(&s, now, chrono::Duration::minutes(2)),
            Due::InFlight
        );
    }

    #[test]
    fn test_stale_processing_is_due() {
        let mut s = sermon_with_audio();
        let now = Utc::now();
        s.transcription
            .begin(now - chrono::Duration::minutes(10))
            .unwrap();

        assert_eq!(
            transcription_due(&s, now, chrono::Duration::minutes(2)),
            Due::Ready
        );
    }

    #[test]
    fn test_summary_waits_for_transcript() {
        let s = sermon_with_audio();
        let now = Utc::now();
        assert_eq!(
            summary_due(&s, now, chrono::Duration::minutes(2)),
            Due::Waiting
        );
    }

    #[test]
    fn test_summary_due_after_transcript() {
        let mut s = sermon_with_audio();
        let now = Utc::now();
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

        assert_eq!(
            summary_due(&s, now, chrono::Duration::minutes(2)),
            Due::Ready
        );
    }
}
