//! Reconciliation of the local record set against the remote backend.
//!
//! One pass is: propagate tombstones, push dirty records, pull remote
//! changes. Push runs before pull so a push that refreshes `updated_at`
//! and `remote_id` is visible to conflict resolution within the same pass.
//! Every record is its own transaction: one record's failure never aborts
//! the pass, and only a store breakdown does.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use chrono::Utc;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::config::SyncSettings;
use crate::domain::{OwnerId, Sermon, SyncState, SyncStatus, SummaryJob, TranscriptionJob};
use crate::remote::{RemoteBackend, RemoteError, RemoteSermon};
use crate::store::{LocalStore, StoreError};

use super::report::{SyncOutcome, SyncReport};

/// Errors that abort a whole pass.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error("local store unavailable: {0}")]
    Store(#[from] StoreError),
}

/// Split store errors into per-record conditions (reported, pass continues)
/// and fatal conditions (pass aborts). Records disappearing mid-pass and
/// validation rejects are per-record; IO breakdown is fatal.
fn isolate(e: StoreError) -> Result<String, SyncError> {
    match e {
        StoreError::NotFound(_) | StoreError::Invariant(_) | StoreError::Job(_) => {
            Ok(e.to_string())
        }
        e => Err(SyncError::Store(e)),
    }
}

/// Reconciles local and remote record sets. One instance per process,
/// injected where needed.
pub struct SyncCoordinator<S, R> {
    store: Arc<S>,
    remote: Arc<R>,
    settings: SyncSettings,
}

impl<S, R> SyncCoordinator<S, R>
where
    S: LocalStore,
    R: RemoteBackend,
{
    pub fn new(store: Arc<S>, remote: Arc<R>, settings: SyncSettings) -> Self {
        Self {
            store,
            remote,
            settings,
        }
    }

    /// Every network call gets the configured bound; expiry is a transient
    /// per-record failure, never a pass-level abort.
    async fn bounded<T>(
        &self,
        fut: impl Future<Output = Result<T, RemoteError>>,
    ) -> Result<T, RemoteError> {
        match tokio::time::timeout(self.settings.network_timeout(), fut).await {
            Ok(result) => result,
            Err(_) => Err(RemoteError::Transient("network call timed out".to_string())),
        }
    }

    /// Run one full reconciliation pass for an owner.
    #[instrument(skip(self), fields(owner = %owner))]
    pub async fn sync_all(&self, owner: &OwnerId) -> Result<SyncReport, SyncError> {
        let mut report = SyncReport::new(owner.clone());

        self.propagate_deletes(owner, &mut report).await?;
        self.push_phase(owner, &mut report).await?;
        self.pull_phase(owner, &mut report).await?;

        report.finish();
        info!(owner = %owner, "sync pass: {}", report.summary());
        Ok(report)
    }

    /// Local deletions go out before upserts so a delete-then-recreate
    /// sequence lands in order.
    async fn propagate_deletes(
        &self,
        owner: &OwnerId,
        report: &mut SyncReport,
    ) -> Result<(), SyncError> {
        for tombstone in self.store.tombstones(owner).await? {
            let Some(remote_id) = tombstone.remote_id.as_deref() else {
                // Never pushed; nothing to delete remotely
                self.store.purge_tombstone(tombstone.id).await?;
                continue;
            };

            match self.bounded(self.remote.delete(remote_id)).await {
                Ok(()) => {
                    self.store.purge_tombstone(tombstone.id).await?;
                    report.record(tombstone.id, SyncOutcome::DeletePropagated);
                }
                Err(e) => {
                    warn!(id = %tombstone.id, error = %e, "delete propagation failed");
                    report.record_error(tombstone.id, e.to_string());
                }
            }
        }
        Ok(())
    }

    async fn push_phase(&self, owner: &OwnerId, report: &mut SyncReport) -> Result<(), SyncError> {
        let mut dirty = self.store.dirty(owner).await?;
        // Oldest edits first
        dirty.sort_by_key(|s| s.sync.updated_at);

        for (i, sermon) in dirty.iter().enumerate() {
            if i >= self.settings.push_batch_size {
                report.record(sermon.id, SyncOutcome::Deferred);
                continue;
            }
            self.push_one(sermon, report).await?;
        }
        Ok(())
    }

    async fn push_one(&self, sermon: &Sermon, report: &mut SyncReport) -> Result<(), SyncError> {
        let id = sermon.id;
        // Snapshot: a local edit landing after this keeps the record dirty
        let pushed_as = sermon.sync.updated_at;
        let wire = RemoteSermon::from_sermon(sermon);

        match self
            .store
            .update(id, |s| {
                s.mark_syncing();
                Ok(())
            })
            .await
        {
            Ok(_) => {}
            // Deleted mid-pass; the tombstone goes out next pass
            Err(StoreError::NotFound(_)) => return Ok(()),
            Err(e) => return Err(SyncError::Store(e)),
        }

        match self.bounded(self.remote.upsert(&wire)).await {
            Ok(ack) => {
                let result = self
                    .store
                    .update(id, |s| {
                        s.mark_pushed(ack.remote_id.clone(), ack.updated_at, pushed_as);
                        Ok(())
                    })
                    .await;
                match result {
                    Ok(_) => report.record(id, SyncOutcome::Pushed),
                    Err(StoreError::NotFound(_)) => {}
                    Err(e) => return Err(SyncError::Store(e)),
                }
            }
            Err(e) => {
                warn!(%id, error = %e, transient = e.is_transient(), "push failed");
                match self
                    .store
                    .update(id, |s| {
                        s.mark_sync_error();
                        Ok(())
                    })
                    .await
                {
                    Ok(_) | Err(StoreError::NotFound(_)) => {}
                    Err(e) => return Err(SyncError::Store(e)),
                }
                report.record_error(id, e.to_string());
            }
        }
        Ok(())
    }

    async fn pull_phase(&self, owner: &OwnerId, report: &mut SyncReport) -> Result<(), SyncError> {
        let cursor = self.store.cursor(owner).await?;

        let fetched = match self
            .bounded(self.remote.fetch_updated_since(owner, cursor))
            .await
        {
            Ok(fetched) => fetched,
            Err(e) => {
                warn!(owner = %owner, error = %e, "pull fetch failed");
                report.record_error(Uuid::nil(), format!("pull fetch failed: {e}"));
                return Ok(());
            }
        };

        if fetched.is_empty() {
            return Ok(());
        }

        // Match remote records to local ones by server id first, then by
        // the client id carried on the wire
        let locals = self.store.list(owner).await?;
        let by_remote_id: HashMap<String, Uuid> = locals
            .iter()
            .filter_map(|s| s.sync.remote_id.clone().map(|rid| (rid, s.id)))
            .collect();
        let by_id: HashMap<Uuid, &Sermon> = locals.iter().map(|s| (s.id, s)).collect();

        let mut had_errors = false;
        let mut high_water = cursor;

        for remote in &fetched {
            let local = remote
                .remote_id
                .as_ref()
                .and_then(|rid| by_remote_id.get(rid))
                .and_then(|id| by_id.get(id))
                .or_else(|| by_id.get(&remote.id))
                .copied();

            match self.apply_remote(owner, remote, local).await? {
                Ok((id, outcome)) => {
                    report.record(id, outcome);
                    if high_water.map_or(true, |hw| remote.updated_at > hw) {
                        high_water = Some(remote.updated_at);
                    }
                }
                Err((id, detail)) => {
                    had_errors = true;
                    report.record_error(id, detail);
                }
            }
        }

        // Only advance the high-water mark over a clean pull; an errored
        // record is refetched next pass instead of being skipped forever
        if !had_errors {
            if let Some(hw) = high_water {
                if cursor.map_or(true, |c| hw > c) {
                    self.store.set_cursor(owner, hw).await?;
                }
            }
        }

        Ok(())
    }

    /// Apply one remote record. The outer error is fatal; the inner one is
    /// a per-record failure left in the report.
    #[allow(clippy::type_complexity)]
    async fn apply_remote(
        &self,
        owner: &OwnerId,
        remote: &RemoteSermon,
        local: Option<&Sermon>,
    ) -> Result<Result<(Uuid, SyncOutcome), (Uuid, String)>, SyncError> {
        let now = Utc::now();

        if remote.deleted {
            return match local {
                None => Ok(Ok((remote.id, SyncOutcome::UpToDate))),
                // Unsynced local edits survive a remote deletion; the next
                // push recreates the record
                Some(l) if l.is_dirty() => Ok(Ok((l.id, SyncOutcome::ConflictLocalWins))),
                Some(l) => {
                    match self.store.delete(l.id, now).await {
                        Ok(_) => {
                            // Already gone remotely, no propagation needed
                            self.store.purge_tombstone(l.id).await?;
                            Ok(Ok((l.id, SyncOutcome::Removed)))
                        }
                        Err(e) => Ok(Err((l.id, isolate(e)?))),
                    }
                }
            };
        }

        match local {
            None => {
                let sermon = sermon_from_remote(owner, remote);
                match self.store.put(sermon).await {
                    Ok(()) => Ok(Ok((remote.id, SyncOutcome::Pulled))),
                    Err(e) => Ok(Err((remote.id, isolate(e)?))),
                }
            }
            Some(l) => {
                if remote.updated_at > l.sync.updated_at {
                    let was_dirty = l.is_dirty();
                    let content = remote.content.clone();
                    let remote_id = remote.remote_id.clone();
                    let server_ts = remote.updated_at;
                    let result = self
                        .store
                        .update(l.id, |s| {
                            if s.sync.remote_id.is_none() {
                                s.sync.remote_id = remote_id;
                            }
                            s.apply_remote_content(content, server_ts);
                            Ok(())
                        })
                        .await;
                    match result {
                        Ok(_) => {
                            let outcome = if was_dirty {
                                SyncOutcome::ConflictRemoteWins
                            } else {
                                SyncOutcome::Pulled
                            };
                            Ok(Ok((l.id, outcome)))
                        }
                        Err(e) => Ok(Err((l.id, isolate(e)?))),
                    }
                } else if l.is_dirty() {
                    // Local is newer or equal; next push wins
                    Ok(Ok((l.id, SyncOutcome::ConflictLocalWins)))
                } else {
                    Ok(Ok((l.id, SyncOutcome::UpToDate)))
                }
            }
        }
    }
}

/// Hydrate a local replica from a remote record. Completed results travel
/// with the record; anything in progress elsewhere starts `Pending` here.
fn sermon_from_remote(owner: &OwnerId, remote: &RemoteSermon) -> Sermon {
    let ts = remote.updated_at;

    let mut transcription = TranscriptionJob::new();
    if let Some(t) = remote.transcript.clone() {
        // Hydration goes through the state machine like any completion
        let _ = transcription.begin(ts);
        let _ = transcription.complete(t, ts);
    }

    let mut summary = SummaryJob::new();
    if transcription.result.is_some() {
        if let Some(text) = remote.summary.clone() {
            let _ = summary.begin(ts);
            let _ = summary.complete(text, ts);
        }
    }

    Sermon {
        id: remote.id,
        owner: owner.clone(),
        title: remote.content.title.clone(),
        speaker: remote.content.speaker.clone(),
        recorded_at: remote.content.recorded_at,
        duration_seconds: remote.content.duration_seconds,
        audio_path: None,
        notes: remote.content.notes.clone(),
        sync: SyncState {
            status: SyncStatus::Synced,
            needs_sync: false,
            remote_id: remote.remote_id.clone(),
            last_synced_at: Some(ts),
            updated_at: ts,
        },
        transcription,
        summary,
    }
}
