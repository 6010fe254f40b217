//! Per-record sync status model

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::Error;

/// Where a record stands relative to the remote service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncStatus {
    /// Local state matches the server
    Synced,
    /// Created locally, creation not yet confirmed by the server
    Pending,
    /// Changed locally after a successful sync
    PendingUpdate,
    /// Deleted locally, remote delete not yet confirmed
    PendingDelete,
    /// Retry budget exhausted; waits for a manual retry
    Failed,
}

impl SyncStatus {
    /// Statuses the orchestrator may pick up on its own
    pub const RETRYABLE: [Self; 3] = [Self::Pending, Self::PendingUpdate, Self::PendingDelete];

    /// Every status other than `Synced`
    pub const UNSYNCED: [Self; 4] = [
        Self::Pending,
        Self::PendingUpdate,
        Self::PendingDelete,
        Self::Failed,
    ];

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Synced => "synced",
            Self::Pending => "pending",
            Self::PendingUpdate => "pending_update",
            Self::PendingDelete => "pending_delete",
            Self::Failed => "failed",
        }
    }

    /// `Pending`, `PendingUpdate` or `PendingDelete`
    pub const fn is_pending(self) -> bool {
        matches!(
            self,
            Self::Pending | Self::PendingUpdate | Self::PendingDelete
        )
    }
}

impl fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SyncStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "synced" => Ok(Self::Synced),
            "pending" => Ok(Self::Pending),
            "pending_update" => Ok(Self::PendingUpdate),
            "pending_delete" => Ok(Self::PendingDelete),
            "failed" => Ok(Self::Failed),
            other => Err(Error::InvalidInput(format!("unknown sync status: {other}"))),
        }
    }
}

/// Sync metadata carried by every record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncState {
    pub status: SyncStatus,
    /// Failed reconciliation attempts since the last successful sync
    pub attempts: u32,
    pub last_attempt_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    /// Set only on transition into `Synced`
    pub last_synced_at: Option<DateTime<Utc>>,
    /// For `Failed` records, the pending variant the record stalled in
    pub failed_from: Option<SyncStatus>,
}

impl SyncState {
    /// State of a freshly created local record
    pub const fn pending() -> Self {
        Self::with_status(SyncStatus::Pending)
    }

    /// State of a record accepted straight from a server snapshot
    pub const fn synced(at: DateTime<Utc>) -> Self {
        Self {
            status: SyncStatus::Synced,
            attempts: 0,
            last_attempt_at: None,
            last_error: None,
            last_synced_at: Some(at),
            failed_from: None,
        }
    }

    const fn with_status(status: SyncStatus) -> Self {
        Self {
            status,
            attempts: 0,
            last_attempt_at: None,
            last_error: None,
            last_synced_at: None,
            failed_from: None,
        }
    }

    /// The pending variant that describes outstanding work, looking through
    /// `Failed` to the status it stalled in.
    pub fn intent(&self) -> SyncStatus {
        match self.status {
            SyncStatus::Failed => self.failed_from.unwrap_or(SyncStatus::Pending),
            status => status,
        }
    }

    /// Deleted locally; hidden from normal reads whatever the network says.
    pub fn is_deleted(&self) -> bool {
        self.intent() == SyncStatus::PendingDelete
    }

    /// Apply a local field edit.
    ///
    /// Synced records become `PendingUpdate`; records whose creation is still
    /// outstanding stay `Pending`. `Failed` records keep their status until
    /// a manual retry, so the edit rides along with that retry.
    pub fn mark_updated(&mut self) {
        if self.status == SyncStatus::Synced {
            self.status = SyncStatus::PendingUpdate;
        }
    }

    /// Apply a local delete of a record the server knows about.
    pub fn mark_deleted(&mut self) {
        if self.status == SyncStatus::Failed {
            self.failed_from = Some(SyncStatus::PendingDelete);
        } else {
            self.status = SyncStatus::PendingDelete;
        }
    }

    /// Successful reconciliation: clears retry bookkeeping.
    pub fn mark_synced(&mut self, now: DateTime<Utc>) {
        self.status = SyncStatus::Synced;
        self.attempts = 0;
        self.last_error = None;
        self.last_synced_at = Some(now);
        self.failed_from = None;
    }

    /// The remote call succeeded but the record changed locally meanwhile;
    /// the server copy is one edit behind.
    pub fn mark_superseded(&mut self) {
        self.status = SyncStatus::PendingUpdate;
        self.attempts = 0;
        self.last_error = None;
        self.failed_from = None;
    }

    /// Manual retry: `Failed` goes back to the pending variant it stalled in
    /// with a fresh attempt budget. Returns whether anything changed.
    pub fn retry_reset(&mut self) -> bool {
        if self.status != SyncStatus::Failed {
            return false;
        }
        self.status = self.failed_from.take().unwrap_or(SyncStatus::Pending);
        self.attempts = 0;
        self.last_attempt_at = None;
        self.last_error = None;
        true
    }
}

impl Default for SyncState {
    fn default() -> Self {
        Self::pending()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_string_codec_roundtrips() {
        for status in [
            SyncStatus::Synced,
            SyncStatus::Pending,
            SyncStatus::PendingUpdate,
            SyncStatus::PendingDelete,
            SyncStatus::Failed,
        ] {
            assert_eq!(status.as_str().parse::<SyncStatus>().unwrap(), status);
        }
        assert!("deleted".parse::<SyncStatus>().is_err());
    }

    #[test]
    fn update_of_synced_record_becomes_pending_update() {
        let mut state = SyncState::synced(Utc::now());
        state.mark_updated();
        assert_eq!(state.status, SyncStatus::PendingUpdate);
    }

    #[test]
    fn update_of_unsynced_creation_stays_pending() {
        let mut state = SyncState::pending();
        state.mark_updated();
        assert_eq!(state.status, SyncStatus::Pending);
    }

    #[test]
    fn delete_of_failed_record_keeps_failed_but_records_intent() {
        let mut state = SyncState::synced(Utc::now());
        state.mark_updated();
        state.status = SyncStatus::Failed;
        state.failed_from = Some(SyncStatus::PendingUpdate);

        state.mark_deleted();
        assert_eq!(state.status, SyncStatus::Failed);
        assert!(state.is_deleted());

        assert!(state.retry_reset());
        assert_eq!(state.status, SyncStatus::PendingDelete);
        assert_eq!(state.attempts, 0);
    }

    #[test]
    fn mark_synced_clears_retry_state() {
        let mut state = SyncState::pending();
        state.attempts = 4;
        state.last_error = Some("timeout".into());
        let now = Utc::now();
        state.mark_synced(now);

        assert_eq!(state.status, SyncStatus::Synced);
        assert_eq!(state.attempts, 0);
        assert_eq!(state.last_error, None);
        assert_eq!(state.last_synced_at, Some(now));
    }

    #[test]
    fn retry_reset_ignores_non_failed_records() {
        let mut state = SyncState::pending();
        state.attempts = 3;
        assert!(!state.retry_reset());
        assert_eq!(state.attempts, 3);
    }

    #[test]
    fn retry_reset_defaults_to_pending() {
        let mut state = SyncState::pending();
        state.status = SyncStatus::Failed;
        state.attempts = 10;
        state.last_error = Some("boom".into());

        assert!(state.retry_reset());
        assert_eq!(state.status, SyncStatus::Pending);
        assert_eq!(state.last_error, None);
        assert_eq!(state.last_attempt_at, None);
    }
}
