//! Credential provider seam.
//!
//! The engine consumes identity as an opaque owner id. Identity changes are
//! observable through a watch channel so the background sync manager can
//! trigger a pass scoped to the new owner's records.

use tokio::sync::watch;

use crate::domain::OwnerId;

/// Source of the current owner identity.
pub trait CredentialProvider: Send + Sync {
    /// The signed-in owner, if any.
    fn current_identity(&self) -> Option<OwnerId>;

    /// Subscribe to identity changes (sign-in, sign-out, account switch).
    fn watch_identity(&self) -> watch::Receiver<Option<OwnerId>>;
}

/// In-process credential provider backed by a watch channel.
///
/// The application layer calls [`set_identity`](Self::set_identity) when its
/// auth state changes; the engine only ever reads.
pub struct StaticCredentials {
    tx: watch::Sender<Option<OwnerId>>,
}

impl StaticCredentials {
    pub fn new(owner: Option<OwnerId>) -> Self {
        let (tx, _rx) = watch::channel(owner);
        Self { tx }
    }

    /// Signed-in from the start.
    pub fn signed_in(owner: impl Into<String>) -> Self {
        Self::new(Some(OwnerId::new(owner)))
    }

    /// Read the owner from `PULPIT_OWNER`, signed out when unset.
    pub fn from_env() -> Self {
        Self::new(std::env::var("PULPIT_OWNER").ok().map(OwnerId::new))
    }

    /// Switch identity. Watchers observe the change.
    pub fn set_identity(&self, owner: Option<OwnerId>) {
        // send only fails with no receivers, which is fine here
        let _ = self.tx.send(owner);
    }
}

impl CredentialProvider for StaticCredentials {
    fn current_identity(&self) -> Option<OwnerId> {
        self.tx.borrow().clone()
    }

    fn watch_identity(&self) -> watch::Receiver<Option<OwnerId>> {
        self.tx.subscribe()
    }
}
