//! JSONL-backed local store.
//!
//! Every mutation is appended as a JSON line and current state is rebuilt
//! by replaying the log on open. The in-memory map sits behind a single
//! mutex, which is the store's single-writer queue: a mutation and its log
//! append happen under one lock acquisition, so concurrent callers can
//! never interleave a lost update. An exclusive lock file keeps a second
//! process from opening the same store directory.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use tokio::fs::{self, File, OpenOptions};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::domain::{JobStatus, OwnerId, Sermon, Tombstone};

use super::{LocalStore, StoreError};

/// One line of the store log.
#[derive(Debug, Serialize, Deserialize)]
struct LogEntry {
    at: DateTime<Utc>,

    #[serde(flatten)]
    op: LogOp,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
enum LogOp {
    Put { sermon: Box<Sermon> },
    Delete { tombstone: Tombstone },
    PurgeTombstone { id: Uuid },
    Cursor { owner: OwnerId, cursor: DateTime<Utc> },
}

/// Replayed state of the log.
#[derive(Debug, Default)]
struct State {
    sermons: HashMap<Uuid, Sermon>,
    tombstones: HashMap<Uuid, Tombstone>,
    cursors: HashMap<OwnerId, DateTime<Utc>>,
}

impl State {
    fn apply(&mut self, op: LogOp) {
        match op {
            LogOp::Put { sermon } => {
                self.sermons.insert(sermon.id, *sermon);
            }
            LogOp::Delete { tombstone } => {
                self.sermons.remove(&tombstone.id);
                self.tombstones.insert(tombstone.id, tombstone);
            }
            LogOp::PurgeTombstone { id } => {
                self.tombstones.remove(&id);
            }
            LogOp::Cursor { owner, cursor } => {
                self.cursors.insert(owner, cursor);
            }
        }
    }
}

/// File-based store using the append-only JSONL format.
pub struct JsonlStore {
    log_path: PathBuf,
    state: Mutex<State>,

    /// Exclusive lock held for the lifetime of the store
    _lock: std::fs::File,
}

impl JsonlStore {
    /// Open (or create) a store in the given directory.
    pub async fn open(dir: impl AsRef<Path>) -> Result<Self, StoreError> {
        let dir = dir.as_ref();
        fs::create_dir_all(dir).await?;

        let lock_path = dir.join("store.lock");
        let lock = std::fs::OpenOptions::new()
            .create(true)
            .write(true)
            .open(&lock_path)?;
        if lock.try_lock_exclusive().is_err() {
            return Err(StoreError::Locked(dir.to_path_buf()));
        }

        let log_path = dir.join("store.jsonl");
        let state = Self::replay(&log_path).await?;

        Ok(Self {
            log_path,
            state: Mutex::new(state),
            _lock: lock,
        })
    }

    /// Rebuild state from the log.
    async fn replay(log_path: &Path) -> Result<State, StoreError> {
        let mut state = State::default();

        if !log_path.exists() {
            return Ok(state);
        }

        let file = File::open(log_path).await?;
        let reader = BufReader::new(file);
        let mut lines = reader.lines();

        while let Some(line) = lines.next_line().await? {
            if line.trim().is_empty() {
                continue;
            }
            let entry: LogEntry = serde_json::from_str(&line)?;
            if let LogOp::Put { ref sermon } = entry.op {
                sermon.validate()?;
            }
            state.apply(entry.op);
        }

        Ok(state)
    }

    /// Append one entry to the log. Callers hold the state mutex.
    async fn append(&self, op: LogOp) -> Result<LogOp, StoreError> {
        let entry = LogEntry {
            at: Utc::now(),
            op,
        };

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.log_path)
            .await?;

        let json = serde_json::to_string(&entry)?;
        file.write_all(format!("{}\n", json).as_bytes()).await?;
        file.flush().await?;

        Ok(entry.op)
    }
}

#[async_trait::async_trait]
impl LocalStore for JsonlStore {
    async fn get(&self, id: Uuid) -> Result<Option<Sermon>, StoreError> {
        let state = self.state.lock().await;
        Ok(state.sermons.get(&id).cloned())
    }

    async fn put(&self, sermon: Sermon) -> Result<(), StoreError> {
        sermon.validate()?;

        let mut state = self.state.lock().await;
        let op = self
            .append(LogOp::Put {
                sermon: Box::new(sermon),
            })
            .await?;
        state.apply(op);
        Ok(())
    }

    async fn update<F>(&self, id: Uuid, f: F) -> Result<Sermon, StoreError>
    where
        F: FnOnce(&mut Sermon) -> Result<(), StoreError> + Send,
    {
        let mut state = self.state.lock().await;

        let mut sermon = state
            .sermons
            .get(&id)
            .cloned()
            .ok_or(StoreError::NotFound(id))?;

        // A closure error leaves the stored record untouched
        f(&mut sermon)?;
        sermon.validate()?;

        let op = self
            .append(LogOp::Put {
                sermon: Box::new(sermon.clone()),
            })
            .await?;
        state.apply(op);

        Ok(sermon)
    }

    async fn list(&self, owner: &OwnerId) -> Result<Vec<Sermon>, StoreError> {
        let state = self.state.lock().await;
        let mut sermons: Vec<Sermon> = state
            .sermons
            .values()
            .filter(|s| &s.owner == owner)
            .cloned()
            .collect();
        sermons.sort_by(|a, b| b.recorded_at.cmp(&a.recorded_at));
        Ok(sermons)
    }

    async fn dirty(&self, owner: &OwnerId) -> Result<Vec<Sermon>, StoreError> {
        let state = self.state.lock().await;
        Ok(state
            .sermons
            .values()
            .filter(|s| &s.owner == owner && s.sync.needs_sync)
            .cloned()
            .collect())
    }

    async fn recoverable(&self, owner: &OwnerId) -> Result<Vec<Sermon>, StoreError> {
        let state = self.state.lock().await;
        Ok(state
            .sermons
            .values()
            .filter(|s| {
                &s.owner == owner
                    && (s.transcription.status != JobStatus::Complete
                        || s.summary.status != JobStatus::Complete)
            })
            .cloned()
            .collect())
    }

    async fn delete(&self, id: Uuid, now: DateTime<Utc>) -> Result<Tombstone, StoreError> {
        let mut state = self.state.lock().await;

        let sermon = state.sermons.get(&id).ok_or(StoreError::NotFound(id))?;
        let tombstone = Tombstone {
            id,
            owner: sermon.owner.clone(),
            remote_id: sermon.sync.remote_id.clone(),
            deleted_at: now,
        };

        let op = self
            .append(LogOp::Delete {
                tombstone: tombstone.clone(),
            })
            .await?;
        state.apply(op);

        Ok(tombstone)
    }

    async fn tombstones(&self, owner: &OwnerId) -> Result<Vec<Tombstone>, StoreError> {
        let state = self.state.lock().await;
        Ok(state
            .tombstones
            .values()
            .filter(|t| &t.owner == owner)
            .cloned()
            .collect())
    }

    async fn purge_tombstone(&self, id: Uuid) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        let op = self.append(LogOp::PurgeTombstone { id }).await?;
        state.apply(op);
        Ok(())
    }

    async fn cursor(&self, owner: &OwnerId) -> Result<Option<DateTime<Utc>>, StoreError> {
        let state = self.state.lock().await;
        Ok(state.cursors.get(owner).copied())
    }

    async fn set_cursor(&self, owner: &OwnerId, at: DateTime<Utc>) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        let op = self
            .append(LogOp::Cursor {
                owner: owner.clone(),
                cursor: at,
            })
            .await?;
        state.apply(op);
        Ok(())
    }
}
