//! Completion events emitted by the recovery manager.
//!
//! Collaborators (UI refresh, diagnostics) subscribe to an explicit
//! broadcast channel instead of a global notification bus. Events are
//! advisory: a lagging or absent subscriber never blocks the engine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::jobs::{JobKind, JobStatus};

/// A job status change for one record, keyed by record id and job kind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobEvent {
    /// Record the job belongs to
    pub sermon_id: Uuid,

    /// Which job changed
    pub kind: JobKind,

    /// The status it changed to
    pub status: JobStatus,

    /// When the change was written to the store
    pub at: DateTime<Utc>,
}

impl JobEvent {
    pub fn new(sermon_id: Uuid, kind: JobKind, status: JobStatus) -> Self {
        Self {
            sermon_id,
            kind,
            status,
            at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_roundtrip() {
        let event = JobEvent::new(Uuid::new_v4(), JobKind::Transcription, JobStatus::Complete);

        let json = serde_json::to_string(&event).unwrap();
        let parsed: JobEvent = serde_json::from_str(&json).unwrap();

        assert_eq!(parsed, event);
    }
}
