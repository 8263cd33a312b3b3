pub mod config;
pub mod error;
pub mod sink;
pub mod source;
pub mod storage;
pub mod sync;
pub mod url;

use std::sync::Arc;

pub use config::{Settings, DEFAULT_SHEET_NAME, DEFAULT_SYNC_INTERVAL, MAX_SYNC_INTERVAL};
pub use error::{Error, Result, SinkError, SourceError};
pub use sink::{DataSink, SqliteSink};
pub use source::google::GoogleSheetsReader;
pub use source::{Record, SheetReader};
pub use storage::Database;
pub use sync::executor::SyncExecutor;
pub use sync::scheduler::{StopOutcome, SyncScheduler};
pub use sync::{
    CredentialRef, NoopProgress, OutcomeStatus, RunState, SourceDescriptor, StatusSnapshot,
    SyncOutcome, SyncProgress, SyncStatus, SyncTrigger, SyncUnit, TargetDescriptor,
};
pub use url::{parse_sheet_url, resolve_spreadsheet_id, SheetUrlInfo};

pub use storage::repository::SyncRun;

use storage::repository;

/// Entry point tying the state database to process settings.
pub struct SheetSync {
    db: Database,
    settings: Settings,
}

impl SheetSync {
    pub fn new(db: Database, settings: Settings) -> Self {
        Self { db, settings }
    }

    pub fn db(&self) -> &Database {
        &self.db
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    // ── Units ──────────────────────────────────────────────────────

    /// Build a unit from user input. `spreadsheet` may be an id or a sheet URL;
    /// a missing sheet name falls back to the configured default.
    pub fn unit(
        &self,
        credentials: CredentialRef,
        spreadsheet: &str,
        sheet_name: Option<String>,
        target: TargetDescriptor,
    ) -> Result<SyncUnit> {
        let spreadsheet_id = resolve_spreadsheet_id(spreadsheet)?;
        let sheet_name = sheet_name.or_else(|| Some(self.settings.default_sheet_name.clone()));
        let unit = SyncUnit::new(
            SourceDescriptor::new(credentials, spreadsheet_id, sheet_name),
            target,
        )
        .with_interval(self.settings.default_sync_interval);
        unit.validate()?;
        Ok(unit)
    }

    /// Executor over the given collaborators, recording runs in the state database.
    pub fn executor(
        &self,
        reader: Arc<dyn SheetReader>,
        sink: Arc<dyn DataSink>,
        progress: Arc<dyn SyncProgress>,
    ) -> SyncExecutor {
        SyncExecutor::new(reader, sink)
            .with_progress(progress)
            .with_history(self.db.clone())
    }

    pub fn scheduler(&self, executor: SyncExecutor) -> SyncScheduler {
        SyncScheduler::new(executor).with_max_interval(self.settings.max_sync_interval)
    }

    // ── History ────────────────────────────────────────────────────

    pub async fn recent_runs(&self, limit: u32) -> Result<Vec<SyncRun>> {
        self.db
            .reader()
            .call(move |conn| repository::list_recent_sync_runs(conn, limit))
            .await
            .map_err(|e| Error::Database(e.to_string()))
    }

    pub async fn last_sync_at(&self) -> Result<Option<String>> {
        self.db
            .reader()
            .call(|conn| repository::last_completed_sync_at(conn))
            .await
            .map_err(|e| Error::Database(e.to_string()))
    }

    // ── Config ─────────────────────────────────────────────────────

    pub async fn config_get(&self, key: &str) -> Result<Option<String>> {
        self.db
            .reader()
            .call({
                let key = key.to_string();
                move |conn| repository::get_config(conn, &key)
            })
            .await
            .map_err(|e| Error::Database(e.to_string()))
    }

    pub async fn config_set(&self, key: &str, value: &str) -> Result<()> {
        self.db
            .writer()
            .call({
                let key = key.to_string();
                let value = value.to_string();
                move |conn| repository::set_config(conn, &key, &value)
            })
            .await
            .map_err(|e| Error::Database(e.to_string()))
    }

    pub async fn config_list(&self) -> Result<Vec<(String, String)>> {
        self.db
            .reader()
            .call(|conn| repository::list_config(conn))
            .await
            .map_err(|e| Error::Database(e.to_string()))
    }
}
