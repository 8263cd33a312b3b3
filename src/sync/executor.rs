use std::sync::Arc;

use chrono::Utc;

use crate::error::Error;
use crate::sink::DataSink;
use crate::source::SheetReader;
use crate::storage::repository;
use crate::storage::Database;
use crate::sync::{NoopProgress, SyncOutcome, SyncProgress, SyncTrigger, SyncUnit};

/// Runs exactly one sync attempt: read the sheet, write the rows.
///
/// `execute` is total. Collaborator errors, and panics inside a
/// collaborator, come back as a failed [`SyncOutcome`]; nothing propagates
/// to the caller, so a scheduler tick cannot take down its timer.
pub struct SyncExecutor {
    reader: Arc<dyn SheetReader>,
    sink: Arc<dyn DataSink>,
    progress: Arc<dyn SyncProgress>,
    history: Option<Database>,
}

impl SyncExecutor {
    pub fn new(reader: Arc<dyn SheetReader>, sink: Arc<dyn DataSink>) -> Self {
        Self {
            reader,
            sink,
            progress: Arc::new(NoopProgress),
            history: None,
        }
    }

    pub fn with_progress(mut self, progress: Arc<dyn SyncProgress>) -> Self {
        self.progress = progress;
        self
    }

    /// Record every run in the `sync_runs` table of `db`.
    pub fn with_history(mut self, db: Database) -> Self {
        self.history = Some(db);
        self
    }

    pub fn progress(&self) -> &dyn SyncProgress {
        self.progress.as_ref()
    }

    pub async fn execute(&self, unit: &SyncUnit, trigger: SyncTrigger) -> SyncOutcome {
        let unit_key = unit.key();
        self.progress.on_sync_start(&unit_key, trigger);
        let run_id = self.record_start(&unit_key, trigger).await;

        let outcome = self.attempt(unit).await;

        match outcome.error {
            None => log::info!(
                "Sync {unit_key} ({}) completed: {} rows",
                trigger.as_str(),
                outcome.rows_synced.unwrap_or(0)
            ),
            Some(ref err) => log::warn!("Sync {unit_key} ({}) failed: {err}", trigger.as_str()),
        }

        if let Some(run_id) = run_id {
            self.record_finish(run_id, &outcome).await;
        }
        self.progress.on_sync_complete(&unit_key, trigger, &outcome);
        outcome
    }

    async fn attempt(&self, unit: &SyncUnit) -> SyncOutcome {
        let reader = self.reader.clone();
        let sink = self.sink.clone();
        let source = unit.source.clone();
        let target = unit.target.clone();

        // Spawned so a panicking collaborator surfaces as a JoinError.
        let task = tokio::spawn(async move {
            let records = reader.fetch(&source).await?;
            let written = sink.write(&target, &records).await?;
            Ok::<u64, Error>(written)
        });

        match task.await {
            Ok(Ok(rows)) => SyncOutcome::completed(rows, Utc::now()),
            Ok(Err(e)) => SyncOutcome::failed(e.to_string(), Utc::now()),
            Err(e) => SyncOutcome::failed(format!("sync attempt aborted: {e}"), Utc::now()),
        }
    }

    async fn record_start(&self, unit_key: &str, trigger: SyncTrigger) -> Option<i64> {
        let db = self.history.as_ref()?;
        let started_at = Utc::now().to_rfc3339();
        let result = db
            .writer()
            .call({
                let unit_key = unit_key.to_string();
                move |conn| {
                    repository::insert_sync_run(conn, &unit_key, trigger.as_str(), &started_at)
                }
            })
            .await;
        match result {
            Ok(id) => Some(id),
            Err(e) => {
                log::warn!("Could not record sync run for {unit_key}: {e}");
                None
            }
        }
    }

    async fn record_finish(&self, run_id: i64, outcome: &SyncOutcome) {
        let Some(db) = self.history.as_ref() else {
            return;
        };
        let result = db
            .writer()
            .call({
                let outcome = outcome.clone();
                move |conn| {
                    repository::finish_sync_run(
                        conn,
                        run_id,
                        outcome.status.as_str(),
                        &outcome.finished_at.to_rfc3339(),
                        outcome.rows_synced,
                        outcome.error.as_deref(),
                    )
                }
            })
            .await;
        if let Err(e) = result {
            log::warn!("Could not finish sync run {run_id}: {e}");
        }
    }
}
