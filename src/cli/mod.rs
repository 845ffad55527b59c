//! Command-line interface.
//!
//! Provides commands for creating records, running sync and recovery
//! passes, inspecting record state, and retrying failed jobs.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand, ValueEnum};
use tracing::info;
use uuid::Uuid;

use crate::auth::{CredentialProvider, StaticCredentials};
use crate::config;
use crate::domain::{JobKind, OwnerId, Sermon};
use crate::producers::{HttpSummarizer, HttpTranscriber};
use crate::recovery::RecoveryManager;
use crate::remote::HttpBackend;
use crate::store::{JsonlStore, LocalStore};
use crate::sync::{BackgroundSync, SyncCoordinator};

/// pulpit - offline-first sync engine for sermon recordings
#[derive(Parser, Debug)]
#[command(name = "pulpit")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run one reconciliation pass now
    Sync,

    /// Run one recovery scan for stuck or failed jobs
    Recover,

    /// List local records with their sync and job status
    Records {
        /// Maximum number of records to show
        #[arg(short, long, default_value = "20")]
        limit: usize,
    },

    /// Show details for one record
    Status {
        /// Record ID (UUID)
        id: String,
    },

    /// Create a local record
    New {
        /// Record title
        title: String,

        /// Path to the captured audio file
        #[arg(short, long)]
        audio: Option<PathBuf>,

        /// Speaker name
        #[arg(short, long)]
        speaker: Option<String>,
    },

    /// Reset a failed job so the next recovery scan retries it
    Retry {
        /// Record ID
        id: String,

        /// Which job to retry
        #[arg(short, long, value_enum)]
        job: JobArg,
    },

    /// Regenerate a completed summary
    Refresh {
        /// Record ID
        id: String,
    },

    /// Delete a record locally and propagate on next sync
    Delete {
        /// Record ID
        id: String,
    },

    /// Run the background sync manager until interrupted
    Run {
        /// Override the sync interval in seconds
        #[arg(short, long)]
        interval: Option<u64>,
    },

    /// Show resolved configuration (debug)
    Config,
}

/// Job selector for the retry command.
#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum JobArg {
    Transcription,
    Summary,
}

impl From<JobArg> for JobKind {
    fn from(arg: JobArg) -> Self {
        match arg {
            JobArg::Transcription => JobKind::Transcription,
            JobArg::Summary => JobKind::Summary,
        }
    }
}

/// Fully wired engine for CLI commands.
struct Engine {
    store: Arc<JsonlStore>,
    coordinator: Arc<SyncCoordinator<JsonlStore, HttpBackend>>,
    recovery: Arc<RecoveryManager<JsonlStore, HttpTranscriber, HttpSummarizer>>,
    credentials: Arc<StaticCredentials>,
}

impl Engine {
    async fn build() -> Result<Self> {
        let cfg = config::config()?;
        let timeout = cfg.sync.network_timeout();

        let store = Arc::new(
            JsonlStore::open(config::store_dir()?)
                .await
                .context("failed to open local store")?,
        );

        let remote = Arc::new(HttpBackend::new(
            cfg.remote_url.clone(),
            cfg.remote_token.clone().unwrap_or_default(),
            timeout,
        )?);

        let transcriber = Arc::new(HttpTranscriber::new(
            cfg.transcription_url.clone(),
            cfg.producer_token.clone().unwrap_or_default(),
            cfg.model.clone(),
            timeout,
        )?);

        let summarizer = Arc::new(HttpSummarizer::new(
            cfg.summary_url.clone(),
            cfg.producer_token.clone().unwrap_or_default(),
            timeout,
        )?);

        let coordinator = Arc::new(SyncCoordinator::new(
            Arc::clone(&store),
            remote,
            cfg.sync.clone(),
        ));

        let recovery = Arc::new(RecoveryManager::new(
            Arc::clone(&store),
            transcriber,
            summarizer,
            cfg.recovery.clone(),
        ));

        Ok(Self {
            store,
            coordinator,
            recovery,
            credentials: Arc::new(StaticCredentials::from_env()),
        })
    }

    fn owner(&self) -> Result<OwnerId> {
        self.credentials
            .current_identity()
            .context("no identity: set PULPIT_OWNER")
    }
}

fn parse_id(id: &str) -> Result<Uuid> {
    Uuid::parse_str(id).with_context(|| format!("invalid record id: {id}"))
}

impl Cli {
    pub async fn execute(self) -> Result<()> {
        match self.command {
            Commands::Sync => {
                let engine = Engine::build().await?;
                let owner = engine.owner()?;
                let report = engine.coordinator.sync_all(&owner).await?;

                println!("Sync pass for {}: {}", owner, report.summary());
                for entry in &report.entries {
                    match &entry.detail {
                        Some(detail) => println!("  {}  {:?}  {}", entry.id, entry.outcome, detail),
                        None => println!("  {}  {:?}", entry.id, entry.outcome),
                    }
                }
                Ok(())
            }

            Commands::Recover => {
                let engine = Engine::build().await?;
                let owner = engine.owner()?;
                let report = engine.recovery.scan_and_recover(&owner).await?;

                println!("Recovery scan for {}: {}", owner, report.summary());
                Ok(())
            }

            Commands::Records { limit } => {
                let engine = Engine::build().await?;
                let owner = engine.owner()?;
                let records = engine.store.list(&owner).await?;

                if records.is_empty() {
                    println!("No records for {}", owner);
                    return Ok(());
                }

                for sermon in records.iter().take(limit) {
                    println!(
                        "{}  {:<30}  sync:{:?}  transcript:{:?}  summary:{:?}",
                        sermon.id,
                        truncate(&sermon.title, 30),
                        sermon.sync.status,
                        sermon.transcription.status,
                        sermon.summary.status,
                    );
                }
                Ok(())
            }

            Commands::Status { id } => {
                let engine = Engine::build().await?;
                let id = parse_id(&id)?;
                let sermon = engine
                    .store
                    .get(id)
                    .await?
                    .with_context(|| format!("record {id} not found"))?;

                print_status(&sermon);
                Ok(())
            }

            Commands::New {
                title,
                audio,
                speaker,
            } => {
                let engine = Engine::build().await?;
                let owner = engine.owner()?;

                let mut sermon = Sermon::new(owner, title, Utc::now());
                sermon.audio_path = audio;
                sermon.speaker = speaker;
                let id = sermon.id;

                engine.store.put(sermon).await?;
                println!("Created record {id}");
                Ok(())
            }

            Commands::Retry { id, job } => {
                let engine = Engine::build().await?;
                let id = parse_id(&id)?;
                let kind: JobKind = job.into();

                engine.recovery.retry(id, kind).await?;
                println!("Reset {kind} for {id}; the next recovery scan resubmits it");
                Ok(())
            }

            Commands::Refresh { id } => {
                let engine = Engine::build().await?;
                let id = parse_id(&id)?;

                engine.recovery.refresh_summary(id).await?;
                let sermon = engine
                    .store
                    .get(id)
                    .await?
                    .with_context(|| format!("record {id} not found"))?;
                println!(
                    "Summary refresh finished: {:?} (refreshed {} times)",
                    sermon.summary.status, sermon.summary.refresh_count
                );
                Ok(())
            }

            Commands::Delete { id } => {
                let engine = Engine::build().await?;
                let id = parse_id(&id)?;

                let tombstone = engine.store.delete(id, Utc::now()).await?;
                match tombstone.remote_id {
                    Some(_) => println!("Deleted {id}; remote delete goes out on next sync"),
                    None => println!("Deleted {id} (never synced)"),
                }
                Ok(())
            }

            Commands::Run { interval } => {
                let engine = Engine::build().await?;
                let cfg = config::config()?;
                let interval = interval
                    .map(std::time::Duration::from_secs)
                    .unwrap_or_else(|| cfg.sync.interval());

                // Surface completion events while the loop runs
                let mut events = engine.recovery.subscribe();
                tokio::spawn(async move {
                    while let Ok(event) = events.recv().await {
                        info!(
                            id = %event.sermon_id,
                            kind = %event.kind,
                            status = ?event.status,
                            "job update"
                        );
                    }
                });

                let background = Arc::new(BackgroundSync::new(
                    Arc::clone(&engine.coordinator),
                    Arc::clone(&engine.recovery),
                    engine.credentials.clone() as Arc<dyn CredentialProvider>,
                    interval,
                ));
                let handle = Arc::clone(&background).start();

                println!("Background sync running every {:?}; Ctrl-C to stop", interval);
                tokio::signal::ctrl_c().await?;
                handle.stop().await?;

                if let Some(report) = background.last_report().await {
                    println!("Last pass: {}", report.summary());
                }
                Ok(())
            }

            Commands::Config => {
                let cfg = config::config()?;
                println!("home:              {}", cfg.home.display());
                println!("remote_url:        {}", cfg.remote_url);
                println!("transcription_url: {}", cfg.transcription_url);
                println!("summary_url:       {}", cfg.summary_url);
                println!("model:             {}", cfg.model);
                println!("sync interval:     {}s", cfg.sync.interval_seconds);
                println!("push batch:        {}", cfg.sync.push_batch_size);
                println!("network timeout:   {}s", cfg.sync.network_timeout_seconds);
                println!("stuck after:       {}s", cfg.recovery.stuck_after_seconds);
                println!("recovery batch:    {}", cfg.recovery.batch_size);
                match &cfg.config_file {
                    Some(path) => println!("config file:       {}", path.display()),
                    None => println!("config file:       (none)"),
                }
                Ok(())
            }
        }
    }
}

fn print_status(sermon: &Sermon) {
    println!("Record:      {}", sermon.id);
    println!("Title:       {}", sermon.title);
    if let Some(speaker) = &sermon.speaker {
        println!("Speaker:     {}", speaker);
    }
    println!("Recorded:    {}", sermon.recorded_at);
    if let Some(duration) = sermon.duration_seconds {
        println!("Duration:    {:.0}s", duration);
    }
    println!(
        "Sync:        {:?} (dirty: {}, remote: {})",
        sermon.sync.status,
        sermon.sync.needs_sync,
        sermon.sync.remote_id.as_deref().unwrap_or("-")
    );
    println!(
        "Transcript:  {:?} ({} attempts)",
        sermon.transcription.status, sermon.transcription.attempts
    );
    if let Some(error) = &sermon.transcription.error {
        println!("             error: {}", error);
    }
    println!(
        "Summary:     {:?} ({} attempts, {} refreshes)",
        sermon.summary.status, sermon.summary.attempts, sermon.summary.refresh_count
    );
    if let Some(error) = &sermon.summary.error {
        println!("             error: {}", error);
    }
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let cut: String = s.chars().take(max.saturating_sub(1)).collect();
        format!("{cut}…")
    }
}
