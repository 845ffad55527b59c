//! Background trigger policy.
//!
//! Decides *when* to run a reconciliation pass, never *how*. Triggers:
//! cold start, owner identity change, a periodic tick, and explicit
//! requests. One mutex-guarded flag enforces at-most-one pass in flight;
//! requests arriving during a pass collapse into a single trailing pass.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, Mutex};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::auth::CredentialProvider;
use crate::producers::{SummarizationProducer, TranscriptionProducer};
use crate::recovery::RecoveryManager;
use crate::remote::RemoteBackend;
use crate::store::LocalStore;

use super::coordinator::SyncCoordinator;
use super::report::SyncReport;

/// Why a pass was requested. Recorded in logs and kept with the report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncReason {
    Startup,
    Interval,
    IdentityChanged,
    UserRequested,
}

impl std::fmt::Display for SyncReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Startup => write!(f, "startup"),
            Self::Interval => write!(f, "interval"),
            Self::IdentityChanged => write!(f, "identity_changed"),
            Self::UserRequested => write!(f, "user_requested"),
        }
    }
}

/// Single-slot coalescing state. Deliberately a flag and one pending slot,
/// not a counter: N requests during a pass become one trailing pass.
#[derive(Default)]
struct CoalesceState {
    running: bool,
    pending: Option<SyncReason>,
}

/// Installs sync triggers and serializes pass execution.
pub struct BackgroundSync<S, R, T, P> {
    coordinator: Arc<SyncCoordinator<S, R>>,
    recovery: Arc<RecoveryManager<S, T, P>>,
    credentials: Arc<dyn CredentialProvider>,
    interval: Duration,
    state: Mutex<CoalesceState>,
    last_report: Mutex<Option<SyncReport>>,
}

impl<S, R, T, P> BackgroundSync<S, R, T, P>
where
    S: LocalStore + 'static,
    R: RemoteBackend + 'static,
    T: TranscriptionProducer + 'static,
    P: SummarizationProducer + 'static,
{
    pub fn new(
        coordinator: Arc<SyncCoordinator<S, R>>,
        recovery: Arc<RecoveryManager<S, T, P>>,
        credentials: Arc<dyn CredentialProvider>,
        interval: Duration,
    ) -> Self {
        Self {
            coordinator,
            recovery,
            credentials,
            interval,
            state: Mutex::new(CoalesceState::default()),
            last_report: Mutex::new(None),
        }
    }

    /// Request a pass. Idempotent and coalescing: if a pass is in flight
    /// the request is queued into the single pending slot and runs right
    /// after the current pass; further requests in that window are
    /// deduplicated, not stacked.
    pub async fn request_sync(&self, reason: SyncReason) {
        {
            let mut state = self.state.lock().await;
            if state.running {
                if state.pending.is_none() {
                    state.pending = Some(reason);
                }
                debug!(%reason, "sync already in flight, coalesced");
                return;
            }
            state.running = true;
        }

        let mut reason = reason;
        loop {
            self.run_pass(reason).await;

            let mut state = self.state.lock().await;
            match state.pending.take() {
                Some(next) => reason = next,
                None => {
                    state.running = false;
                    break;
                }
            }
        }
    }

    async fn run_pass(&self, reason: SyncReason) {
        let Some(owner) = self.credentials.current_identity() else {
            debug!(%reason, "no signed-in identity, skipping sync");
            return;
        };

        info!(%reason, owner = %owner, "sync pass triggered");
        match self.coordinator.sync_all(&owner).await {
            Ok(report) => {
                *self.last_report.lock().await = Some(report);
            }
            // A fatal pass error resolves itself on the next trigger
            Err(e) => warn!(%reason, error = %e, "sync pass aborted"),
        }
    }

    /// Report of the most recently completed pass, for diagnostics.
    pub async fn last_report(&self) -> Option<SyncReport> {
        self.last_report.lock().await.clone()
    }

    /// Install the triggers: cold-start pass and recovery scan, the
    /// periodic tick, and identity-change handling. Runs until stopped.
    pub fn start(self: Arc<Self>) -> SyncHandle {
        let (stop_tx, mut stop_rx) = mpsc::channel::<()>(1);
        let this = self;

        let task = tokio::spawn(async move {
            let mut identity_rx = this.credentials.watch_identity();

            // Cold start: the store is ready once we are constructed
            this.request_sync(SyncReason::Startup).await;
            if let Some(owner) = this.credentials.current_identity() {
                if let Err(e) = this.recovery.scan_and_recover(&owner).await {
                    warn!(error = %e, "startup recovery scan failed");
                }
            }

            let mut ticker = tokio::time::interval(this.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // Consume the immediate first tick; startup already synced
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = stop_rx.recv() => {
                        info!("background sync stopping");
                        break;
                    }
                    _ = ticker.tick() => {
                        this.request_sync(SyncReason::Interval).await;
                    }
                    changed = identity_rx.changed() => {
                        if changed.is_err() {
                            // Credential provider went away
                            break;
                        }
                        if let Some(owner) = this.credentials.current_identity() {
                            if let Err(e) = this.recovery.scan_and_recover(&owner).await {
                                warn!(error = %e, "identity-change recovery scan failed");
                            }
                        }
                        this.request_sync(SyncReason::IdentityChanged).await;
                    }
                }
            }
        });

        SyncHandle { stop_tx, task }
    }
}

/// Handle to stop the background trigger loop. An in-flight pass is
/// best-effort: per-record writes are individually durable, so stopping
/// mid-pass leaves valid state behind.
pub struct SyncHandle {
    stop_tx: mpsc::Sender<()>,
    task: tokio::task::JoinHandle<()>,
}

impl SyncHandle {
    pub async fn stop(self) -> anyhow::Result<()> {
        let _ = self.stop_tx.send(()).await;
        self.task.await?;
        Ok(())
    }
}
