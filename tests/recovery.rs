//! Recovery Integration Tests
//!
//! Stuck-job detection, scan-driven retries, the at-most-one-in-flight
//! invariant, and completion event delivery.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration as StdDuration;

use async_trait::async_trait;
use chrono::{Duration, Utc};
use tempfile::TempDir;

use pulpit::config::RecoverySettings;
use pulpit::domain::{JobKind, JobStatus, OwnerId, Sermon, Transcript, TranscriptSegment};
use pulpit::producers::{
    ProducerError, SummarizationProducer, SummaryRequest, TranscriptionProducer,
    TranscriptionRequest,
};
use pulpit::recovery::RecoveryManager;
use pulpit::store::{JsonlStore, LocalStore};

/// Scriptable transcription producer with concurrency tracking.
struct MockTranscriber {
    calls: AtomicUsize,
    active: AtomicUsize,
    max_active: AtomicUsize,
    delay: StdDuration,
    fail: AtomicBool,
}

impl MockTranscriber {
    fn new() -> Self {
        Self::with_delay(StdDuration::ZERO)
    }

    fn with_delay(delay: StdDuration) -> Self {
        Self {
            calls: AtomicUsize::new(0),
            active: AtomicUsize::new(0),
            max_active: AtomicUsize::new(0),
            delay,
            fail: AtomicBool::new(false),
        }
    }
}

#[async_trait]
impl TranscriptionProducer for MockTranscriber {
    fn name(&self) -> &str {
        "mock-transcriber"
    }

    async fn submit(&self, _request: &TranscriptionRequest) -> Result<Transcript, ProducerError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let current = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(current, Ordering::SeqCst);

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.active.fetch_sub(1, Ordering::SeqCst);

        if self.fail.load(Ordering::SeqCst) {
            return Err(ProducerError::Transient("simulated 503".to_string()));
        }

        Ok(Transcript {
            text: "Hello world".to_string(),
            language: "en".to_string(),
            segments: vec![TranscriptSegment {
                start_seconds: 0.0,
                end_seconds: 30.0,
                text: "Hello world".to_string(),
            }],
        })
    }
}

struct MockSummarizer {
    calls: AtomicUsize,
    fail: AtomicBool,
}

impl MockSummarizer {
    fn new() -> Self {
        Self {
            calls: AtomicUsize::new(0),
            fail: AtomicBool::new(false),
        }
    }
}

#[async_trait]
impl SummarizationProducer for MockSummarizer {
    fn name(&self) -> &str {
        "mock-summarizer"
    }

    async fn submit(&self, _request: &SummaryRequest) -> Result<String, ProducerError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail.load(Ordering::SeqCst) {
            return Err(ProducerError::Transient("simulated 503".to_string()));
        }
        Ok("A brief summary.".to_string())
    }
}

type Manager = RecoveryManager<JsonlStore, MockTranscriber, MockSummarizer>;

fn owner() -> OwnerId {
    OwnerId::new("user-1")
}

fn sermon_with_audio() -> Sermon {
    let mut s = Sermon::new(owner(), "Sunday Service", Utc::now());
    s.audio_path = Some("/audio/sunday.m4a".into());
    s
}

async fn setup(
    settings: RecoverySettings,
) -> (
    Arc<JsonlStore>,
    Arc<MockTranscriber>,
    Arc<MockSummarizer>,
    Arc<Manager>,
    TempDir,
) {
    let temp = TempDir::new().unwrap();
    let store = Arc::new(JsonlStore::open(temp.path().join("store")).await.unwrap());
    let transcriber = Arc::new(MockTranscriber::new());
    let summarizer = Arc::new(MockSummarizer::new());
    let manager = Arc::new(RecoveryManager::new(
        Arc::clone(&store),
        Arc::clone(&transcriber),
        Arc::clone(&summarizer),
        settings,
    ));
    (store, transcriber, summarizer, manager, temp)
}

#[tokio::test]
async fn test_pending_jobs_recovered_and_chained() {
    let (store, transcriber, summarizer, manager, _temp) =
        setup(RecoverySettings::default()).await;

    let sermon = sermon_with_audio();
    let id = sermon.id;
    store.put(sermon).await.unwrap();

    let report = manager.scan_and_recover(&owner()).await.unwrap();

    // Transcription runs, and its completion unblocks the summary in the
    // same scan
    assert_eq!(report.resubmitted, 2);
    assert_eq!(report.completed, 2);
    assert_eq!(transcriber.calls.load(Ordering::SeqCst), 1);
    assert_eq!(summarizer.calls.load(Ordering::SeqCst), 1);

    let stored = store.get(id).await.unwrap().unwrap();
    assert_eq!(stored.transcription.status, JobStatus::Complete);
    assert_eq!(stored.transcription.result.as_ref().unwrap().text, "Hello world");
    assert_eq!(stored.summary.status, JobStatus::Complete);
    assert_eq!(stored.summary.result.as_deref(), Some("A brief summary."));
    // Duration backfilled from the transcript segments
    assert_eq!(stored.duration_seconds, Some(30.0));
    // Job completion is a local mutation: the record is dirty for sync
    assert!(stored.sync.needs_sync);
}

#[tokio::test]
async fn test_stuck_processing_resubmitted_exactly_once() {
    let (store, transcriber, _summarizer, manager, _temp) =
        setup(RecoverySettings::default()).await;

    // App restarted with a job stranded in processing for 10 minutes
    // (threshold is 2 minutes)
    let mut sermon = sermon_with_audio();
    sermon
        .transcription
        .begin(Utc::now() - Duration::minutes(10))
        .unwrap();
    let id = sermon.id;
    let stale_started_at = sermon.transcription.started_at;
    store.put(sermon).await.unwrap();

    let report = manager.scan_and_recover(&owner()).await.unwrap();

    // Exactly once: not zero, not twice
    assert_eq!(transcriber.calls.load(Ordering::SeqCst), 1);
    assert_eq!(report.resubmitted, 1);

    let stored = store.get(id).await.unwrap().unwrap();
    assert_eq!(stored.transcription.attempts, 2);
    assert_ne!(stored.transcription.started_at, stale_started_at);
}

#[tokio::test]
async fn test_fresh_processing_is_left_alone() {
    let (store, transcriber, _summarizer, manager, _temp) =
        setup(RecoverySettings::default()).await;

    let mut sermon = sermon_with_audio();
    sermon.transcription.begin(Utc::now()).unwrap();
    let id = sermon.id;
    store.put(sermon).await.unwrap();

    let report = manager.scan_and_recover(&owner()).await.unwrap();

    assert_eq!(transcriber.calls.load(Ordering::SeqCst), 0);
    assert_eq!(report.resubmitted, 0);
    assert!(report.in_flight >= 1);

    let stored = store.get(id).await.unwrap().unwrap();
    assert_eq!(stored.transcription.status, JobStatus::Processing);
    assert_eq!(stored.transcription.attempts, 1);
}

#[tokio::test]
async fn test_failure_waits_for_next_scan() {
    let (store, transcriber, _summarizer, manager, _temp) =
        setup(RecoverySettings::default()).await;

    transcriber.fail.store(true, Ordering::SeqCst);

    let sermon = sermon_with_audio();
    let id = sermon.id;
    store.put(sermon).await.unwrap();

    let report = manager.scan_and_recover(&owner()).await.unwrap();
    assert_eq!(report.failed, 1);
    // No push-based retry: one submission per scan
    assert_eq!(transcriber.calls.load(Ordering::SeqCst), 1);

    let stored = store.get(id).await.unwrap().unwrap();
    assert_eq!(stored.transcription.status, JobStatus::Failed);
    assert!(stored.transcription.error.is_some());

    // The next scan retries
    transcriber.fail.store(false, Ordering::SeqCst);
    let report = manager.scan_and_recover(&owner()).await.unwrap();
    assert!(report.completed >= 1);
    assert_eq!(transcriber.calls.load(Ordering::SeqCst), 2);

    let stored = store.get(id).await.unwrap().unwrap();
    assert_eq!(stored.transcription.status, JobStatus::Complete);
}

#[tokio::test]
async fn test_overlapping_scans_do_not_double_submit() {
    let temp = TempDir::new().unwrap();
    let store = Arc::new(JsonlStore::open(temp.path().join("store")).await.unwrap());
    let transcriber = Arc::new(MockTranscriber::with_delay(StdDuration::from_millis(200)));
    let summarizer = Arc::new(MockSummarizer::new());
    let manager: Arc<Manager> = Arc::new(RecoveryManager::new(
        Arc::clone(&store),
        Arc::clone(&transcriber),
        Arc::clone(&summarizer),
        RecoverySettings::default(),
    ));

    let sermon = sermon_with_audio();
    store.put(sermon).await.unwrap();

    // Two scans race against a slow producer
    let m1 = Arc::clone(&manager);
    let m2 = Arc::clone(&manager);
    let o1 = owner();
    let o2 = owner();
    let (r1, r2) = tokio::join!(
        tokio::spawn(async move { m1.scan_and_recover(&o1).await }),
        tokio::spawn(async move { m2.scan_and_recover(&o2).await }),
    );
    r1.unwrap().unwrap();
    r2.unwrap().unwrap();

    // One submission total, never two concurrent for the same record
    assert_eq!(transcriber.calls.load(Ordering::SeqCst), 1);
    assert_eq!(transcriber.max_active.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_batch_budget_defers_overflow() {
    let settings = RecoverySettings {
        batch_size: 1,
        ..Default::default()
    };
    let (store, transcriber, _summarizer, manager, _temp) = setup(settings).await;

    store.put(sermon_with_audio()).await.unwrap();
    store.put(sermon_with_audio()).await.unwrap();

    let report = manager.scan_and_recover(&owner()).await.unwrap();
    assert_eq!(transcriber.calls.load(Ordering::SeqCst), 1);
    assert_eq!(report.deferred, 1);

    // The deferred record is picked up by the next scan
    manager.scan_and_recover(&owner()).await.unwrap();
    assert_eq!(transcriber.calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_summary_waits_for_transcript() {
    let (store, transcriber, summarizer, manager, _temp) =
        setup(RecoverySettings::default()).await;

    transcriber.fail.store(true, Ordering::SeqCst);

    let sermon = sermon_with_audio();
    store.put(sermon).await.unwrap();

    let report = manager.scan_and_recover(&owner()).await.unwrap();

    // Transcription failed, so the summary was never submitted
    assert_eq!(summarizer.calls.load(Ordering::SeqCst), 0);
    assert!(report.waiting >= 1);
}

#[tokio::test]
async fn test_record_without_audio_waits() {
    let (store, transcriber, _summarizer, manager, _temp) =
        setup(RecoverySettings::default()).await;

    let sermon = Sermon::new(owner(), "No Audio Yet", Utc::now());
    let id = sermon.id;
    store.put(sermon).await.unwrap();

    let report = manager.scan_and_recover(&owner()).await.unwrap();
    assert_eq!(transcriber.calls.load(Ordering::SeqCst), 0);
    assert!(report.waiting >= 1);

    let stored = store.get(id).await.unwrap().unwrap();
    assert_eq!(stored.transcription.status, JobStatus::Pending);
}

#[tokio::test]
async fn test_completion_events_emitted() {
    let (store, _transcriber, _summarizer, manager, _temp) =
        setup(RecoverySettings::default()).await;

    let sermon = sermon_with_audio();
    let id = sermon.id;
    store.put(sermon).await.unwrap();

    let mut events = manager.subscribe();
    manager.scan_and_recover(&owner()).await.unwrap();

    let mut seen = Vec::new();
    while let Ok(event) = events.try_recv() {
        assert_eq!(event.sermon_id, id);
        seen.push((event.kind, event.status));
    }

    assert!(seen.contains(&(JobKind::Transcription, JobStatus::Processing)));
    assert!(seen.contains(&(JobKind::Transcription, JobStatus::Complete)));
    assert!(seen.contains(&(JobKind::Summary, JobStatus::Processing)));
    assert!(seen.contains(&(JobKind::Summary, JobStatus::Complete)));
}

#[tokio::test]
async fn test_explicit_retry_then_scan() {
    let (store, transcriber, _summarizer, manager, _temp) =
        setup(RecoverySettings::default()).await;

    transcriber.fail.store(true, Ordering::SeqCst);

    let sermon = sermon_with_audio();
    let id = sermon.id;
    store.put(sermon).await.unwrap();

    manager.scan_and_recover(&owner()).await.unwrap();
    assert_eq!(
        store.get(id).await.unwrap().unwrap().transcription.status,
        JobStatus::Failed
    );

    // User hits retry: back to pending, picked up by the next scan
    manager.retry(id, JobKind::Transcription).await.unwrap();
    assert_eq!(
        store.get(id).await.unwrap().unwrap().transcription.status,
        JobStatus::Pending
    );

    transcriber.fail.store(false, Ordering::SeqCst);
    manager.scan_and_recover(&owner()).await.unwrap();
    assert_eq!(
        store.get(id).await.unwrap().unwrap().transcription.status,
        JobStatus::Complete
    );
}

#[tokio::test]
async fn test_retry_requires_terminal_state() {
    let (store, _transcriber, _summarizer, manager, _temp) =
        setup(RecoverySettings::default()).await;

    let sermon = sermon_with_audio();
    let id = sermon.id;
    store.put(sermon).await.unwrap();

    // Pending is not retryable
    assert!(manager.retry(id, JobKind::Transcription).await.is_err());
}

#[tokio::test]
async fn test_refresh_summary_counts() {
    let (store, _transcriber, summarizer, manager, _temp) =
        setup(RecoverySettings::default()).await;

    let sermon = sermon_with_audio();
    let id = sermon.id;
    store.put(sermon).await.unwrap();

    // First scan completes transcript and summary
    manager.scan_and_recover(&owner()).await.unwrap();
    let stored = store.get(id).await.unwrap().unwrap();
    assert_eq!(stored.summary.refresh_count, 0);

    manager.refresh_summary(id).await.unwrap();

    let stored = store.get(id).await.unwrap().unwrap();
    assert_eq!(stored.summary.status, JobStatus::Complete);
    assert_eq!(stored.summary.refresh_count, 1);
    assert!(stored.summary.last_refreshed_at.is_some());
    assert_eq!(summarizer.calls.load(Ordering::SeqCst), 2);
}
