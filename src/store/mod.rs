//! Local store seam.
//!
//! The engine treats durable storage as a capability: key-addressed records
//! with atomic per-record read-modify-write and the two queries the sync
//! and recovery passes need (dirty records, recoverable jobs). The shipped
//! implementation is [`JsonlStore`]; tests substitute their own.

pub mod jsonl;

use std::path::PathBuf;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::domain::{InvariantViolation, JobError, OwnerId, Sermon, Tombstone};

pub use jsonl::JsonlStore;

/// Errors from the local store.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("record not found: {0}")]
    NotFound(Uuid),

    #[error("store is locked by another process: {0}")]
    Locked(PathBuf),

    #[error(transparent)]
    Invariant(#[from] InvariantViolation),

    #[error(transparent)]
    Job(#[from] JobError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Durable key-addressed storage for sermon records.
///
/// Implementations must serialize concurrent writers: `update` is an atomic
/// read-modify-write, so the sync coordinator and the recovery manager can
/// run concurrently without losing each other's field updates.
#[async_trait]
pub trait LocalStore: Send + Sync {
    /// Fetch one record.
    async fn get(&self, id: Uuid) -> Result<Option<Sermon>, StoreError>;

    /// Insert or replace a record. Rejects records whose embedded
    /// invariants do not hold.
    async fn put(&self, sermon: Sermon) -> Result<(), StoreError>;

    /// Atomically mutate one record and persist the result. The closure
    /// runs under the store's write lock; a closure error leaves the
    /// record unchanged.
    async fn update<F>(&self, id: Uuid, f: F) -> Result<Sermon, StoreError>
    where
        F: FnOnce(&mut Sermon) -> Result<(), StoreError> + Send;

    /// All records belonging to an owner.
    async fn list(&self, owner: &OwnerId) -> Result<Vec<Sermon>, StoreError>;

    /// Records with local changes not yet pushed (`needs_sync == true`).
    async fn dirty(&self, owner: &OwnerId) -> Result<Vec<Sermon>, StoreError>;

    /// Records with at least one job outside the `Complete` state; the
    /// recovery manager applies its own due-time rules on top.
    async fn recoverable(&self, owner: &OwnerId) -> Result<Vec<Sermon>, StoreError>;

    /// Remove a record and leave a tombstone for propagation.
    async fn delete(&self, id: Uuid, now: DateTime<Utc>) -> Result<Tombstone, StoreError>;

    /// Tombstones awaiting propagation.
    async fn tombstones(&self, owner: &OwnerId) -> Result<Vec<Tombstone>, StoreError>;

    /// Drop a tombstone once the remote delete has been acknowledged.
    async fn purge_tombstone(&self, id: Uuid) -> Result<(), StoreError>;

    /// Pull high-water mark for an owner, if a pull has completed before.
    async fn cursor(&self, owner: &OwnerId) -> Result<Option<DateTime<Utc>>, StoreError>;

    /// Advance the pull high-water mark.
    async fn set_cursor(&self, owner: &OwnerId, at: DateTime<Utc>) -> Result<(), StoreError>;
}
