pub mod executor;
pub mod scheduler;
pub mod unit;

#[cfg(test)]
pub(crate) mod testing;

use chrono::{DateTime, Utc};
use serde::Serialize;

pub use unit::{CredentialRef, SourceDescriptor, SyncUnit, TargetDescriptor};

/// Terminal tag of one sync attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeStatus {
    Completed,
    Failed,
}

impl OutcomeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OutcomeStatus::Completed => "completed",
            OutcomeStatus::Failed => "failed",
        }
    }
}

/// Result of exactly one sync attempt. Never mutated after creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SyncOutcome {
    pub status: OutcomeStatus,
    pub finished_at: DateTime<Utc>,
    /// Rows written; only set for completed outcomes.
    pub rows_synced: Option<u64>,
    /// Human-readable failure; only set for failed outcomes.
    pub error: Option<String>,
}

impl SyncOutcome {
    pub fn completed(rows_synced: u64, finished_at: DateTime<Utc>) -> Self {
        Self {
            status: OutcomeStatus::Completed,
            finished_at,
            rows_synced: Some(rows_synced),
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>, finished_at: DateTime<Utc>) -> Self {
        Self {
            status: OutcomeStatus::Failed,
            finished_at,
            rows_synced: None,
            error: Some(error.into()),
        }
    }

    pub fn is_completed(&self) -> bool {
        self.status == OutcomeStatus::Completed
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Idle,
    Running,
    Completed,
    Failed,
}

impl From<OutcomeStatus> for RunState {
    fn from(status: OutcomeStatus) -> Self {
        match status {
            OutcomeStatus::Completed => RunState::Completed,
            OutcomeStatus::Failed => RunState::Failed,
        }
    }
}

/// Last known outcome plus current run state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SyncStatus {
    pub state: RunState,
    pub last_outcome: Option<SyncOutcome>,
    /// When the most recent execution started.
    pub last_run: Option<DateTime<Utc>>,
}

impl Default for SyncStatus {
    fn default() -> Self {
        Self {
            state: RunState::Idle,
            last_outcome: None,
            last_run: None,
        }
    }
}

/// Point-in-time view returned by [`scheduler::SyncScheduler::status`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusSnapshot {
    pub session_active: bool,
    pub status: SyncStatus,
    pub unit_key: Option<String>,
    pub interval_minutes: Option<u32>,
    pub session_started_at: Option<DateTime<Utc>>,
}

/// What caused an execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncTrigger {
    /// First run of a freshly started auto-sync session.
    Initial,
    Tick,
    Manual,
}

impl SyncTrigger {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncTrigger::Initial => "initial",
            SyncTrigger::Tick => "tick",
            SyncTrigger::Manual => "manual",
        }
    }
}

/// Callback trait for reporting sync progress.
/// The CLI implements this for stderr output; library users can provide
/// their own implementation or use [`NoopProgress`].
pub trait SyncProgress: Send + Sync {
    fn on_sync_start(&self, _unit_key: &str, _trigger: SyncTrigger) {}
    fn on_sync_complete(&self, _unit_key: &str, _trigger: SyncTrigger, _outcome: &SyncOutcome) {}
    fn on_tick_skipped(&self, _unit_key: &str) {}
}

/// No-op progress reporter.
pub struct NoopProgress;

impl SyncProgress for NoopProgress {}
