//! Per-pass reconciliation report.

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::domain::OwnerId;

/// What happened to one record during a pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncOutcome {
    /// Local changes upserted to the backend
    Pushed,

    /// Local tombstone propagated as a remote delete
    DeletePropagated,

    /// Remote version created or applied locally
    Pulled,

    /// Remote was newer; remote content overwrote dirty local content
    ConflictRemoteWins,

    /// Local was newer or equal; the pull was a no-op
    ConflictLocalWins,

    /// Remote deletion applied locally
    Removed,

    /// Nothing to do for this record
    UpToDate,

    /// Over the per-pass batch budget; next pass picks it up
    Deferred,

    /// Per-record failure; the pass continued
    Errored,
}

/// One record's entry in the report.
#[derive(Debug, Clone, Serialize)]
pub struct SyncEntry {
    pub id: Uuid,
    pub outcome: SyncOutcome,

    /// Error or conflict detail, when there is one
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

/// Result of one `sync_all` pass.
#[derive(Debug, Clone, Serialize)]
pub struct SyncReport {
    pub owner: OwnerId,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub entries: Vec<SyncEntry>,
}

impl SyncReport {
    pub fn new(owner: OwnerId) -> Self {
        Self {
            owner,
            started_at: Utc::now(),
            finished_at: None,
            entries: Vec::new(),
        }
    }

    pub fn record(&mut self, id: Uuid, outcome: SyncOutcome) {
        self.entries.push(SyncEntry {
            id,
            outcome,
            detail: None,
        });
    }

    pub fn record_error(&mut self, id: Uuid, detail: impl Into<String>) {
        self.entries.push(SyncEntry {
            id,
            outcome: SyncOutcome::Errored,
            detail: Some(detail.into()),
        });
    }

    pub fn finish(&mut self) {
        self.finished_at = Some(Utc::now());
    }

    fn count(&self, outcome: SyncOutcome) -> usize {
        self.entries.iter().filter(|e| e.outcome == outcome).count()
    }

    pub fn pushed(&self) -> usize {
        self.count(SyncOutcome::Pushed)
    }

    pub fn pulled(&self) -> usize {
        self.count(SyncOutcome::Pulled)
    }

    pub fn conflicts(&self) -> usize {
        self.count(SyncOutcome::ConflictRemoteWins) + self.count(SyncOutcome::ConflictLocalWins)
    }

    pub fn errors(&self) -> usize {
        self.count(SyncOutcome::Errored)
    }

    pub fn deletes(&self) -> usize {
        self.count(SyncOutcome::DeletePropagated) + self.count(SyncOutcome::Removed)
    }

    pub fn summary(&self) -> String {
        format!(
            "pushed {}, pulled {}, deletes {}, conflicts {}, errors {}",
            self.pushed(),
            self.pulled(),
            self.deletes(),
            self.conflicts(),
            self.errors()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_report_counters() {
        let mut report = SyncReport::new(OwnerId::new("user-1"));
        report.record(Uuid::new_v4(), SyncOutcome::Pushed);
        report.record(Uuid::new_v4(), SyncOutcome::Pushed);
        report.record(Uuid::new_v4(), SyncOutcome::Pulled);
        report.record(Uuid::new_v4(), SyncOutcome::ConflictRemoteWins);
        report.record_error(Uuid::new_v4(), "backend returned 503");
        report.finish();

        assert_eq!(report.pushed(), 2);
        assert_eq!(report.pulled(), 1);
        assert_eq!(report.conflicts(), 1);
        assert_eq!(report.errors(), 1);
        assert!(report.finished_at.is_some());
    }
}
