//! Auto-sync scheduler.
//!
//! One [`SyncScheduler`] owns at most one auto-sync session: the unit being
//! synced, a repeating timer task, and the shared [`SyncStatus`]. Every
//! execution, whether fired by the timer, by the first run of a session, or
//! by a manual [`SyncScheduler::run_once`], goes through a single-flight
//! guard. A caller that cannot take the guard immediately gets
//! [`Error::SyncInProgress`]; a timer tick that cannot take it is skipped.
//!
//! An execution runs in its own task that owns the guard, so dropping the
//! future of `start_auto_sync` or `run_once` does not release the guard
//! early; the attempt finishes, commits its outcome, and only then frees it.
//!
//! Stopping races with the timer: a tick that fires concurrently with
//! `stop_auto_sync` either runs to completion before `stop_auto_sync`
//! returns or is suppressed. The last tick to take the guard before the
//! timer is disarmed wins.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::OwnedMutexGuard;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::config::MAX_SYNC_INTERVAL;
use crate::error::{Error, Result};
use crate::sync::executor::SyncExecutor;
use crate::sync::unit::validate_interval;
use crate::sync::{RunState, StatusSnapshot, SyncOutcome, SyncStatus, SyncTrigger, SyncUnit};

/// Whether `stop_auto_sync` found a session to stop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    Stopped,
    NotRunning,
}

struct Session {
    unit: Arc<SyncUnit>,
    started_at: DateTime<Utc>,
}

struct SchedulerState {
    session: Option<Session>,
    status: SyncStatus,
}

struct Timer {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

struct Inner {
    executor: SyncExecutor,
    /// Held for the duration of every execution.
    flight: Arc<tokio::sync::Mutex<()>>,
    /// Session and status; never held across an await.
    state: Mutex<SchedulerState>,
}

/// Owns one auto-sync session and the single-flight guard shared by
/// scheduled and manual syncs.
///
/// Construct one per process (or per tenant) with the executor that does
/// the actual reading and writing. Dropping the scheduler disarms its timer.
pub struct SyncScheduler {
    inner: Arc<Inner>,
    max_interval: u32,
    /// Serializes start and stop, and owns the running timer.
    lifecycle: tokio::sync::Mutex<Option<Timer>>,
}

impl SyncScheduler {
    pub fn new(executor: SyncExecutor) -> Self {
        Self {
            inner: Arc::new(Inner {
                executor,
                flight: Arc::new(tokio::sync::Mutex::new(())),
                state: Mutex::new(SchedulerState {
                    session: None,
                    status: SyncStatus::default(),
                }),
            }),
            max_interval: MAX_SYNC_INTERVAL,
            lifecycle: tokio::sync::Mutex::new(None),
        }
    }

    /// Override the upper interval bound (clamped to at least one minute).
    pub fn with_max_interval(mut self, max_interval: u32) -> Self {
        self.max_interval = max_interval.max(1);
        self
    }

    pub fn max_interval(&self) -> u32 {
        self.max_interval
    }

    /// Start a session: run `unit` once right away, then every
    /// `interval_minutes` until stopped. Returns the first outcome.
    ///
    /// If the returned future is dropped before the first run finishes, no
    /// session is left behind; the first run still completes in the
    /// background and holds the guard until it does.
    pub async fn start_auto_sync(&self, unit: SyncUnit, interval_minutes: u32) -> Result<SyncOutcome> {
        validate_interval(interval_minutes, self.max_interval)?;
        unit.validate()?;
        let period = Duration::from_secs(u64::from(interval_minutes) * 60);
        self.start_session(unit.with_interval(interval_minutes), period)
            .await
    }

    async fn start_session(&self, unit: SyncUnit, period: Duration) -> Result<SyncOutcome> {
        let mut timer = self.lifecycle.lock().await;
        if self.inner.lock_state().session.is_some() {
            log::warn!("Auto-sync already running, refusing to start {}", unit.key());
            return Err(Error::AlreadyRunning);
        }
        let flight = self.inner.try_acquire()?;

        let unit = Arc::new(unit);
        log::info!(
            "Starting auto-sync of {} every {} minutes",
            unit.key(),
            unit.interval_minutes
        );
        {
            let mut state = self.inner.lock_state();
            state.session = Some(Session {
                unit: unit.clone(),
                started_at: Utc::now(),
            });
            state.begin_run();
        }
        let rollback = SessionRollback {
            inner: &self.inner,
            armed: true,
        };

        let outcome = self
            .inner
            .run_guarded(flight, unit.clone(), SyncTrigger::Initial)
            .await;

        let cancel = CancellationToken::new();
        let task = tokio::spawn(run_timer(
            self.inner.clone(),
            unit,
            period,
            cancel.clone(),
        ));
        *timer = Some(Timer { cancel, task });
        rollback.disarm();

        Ok(outcome)
    }

    /// Disarm the timer, wait for any in-flight execution, and discard the
    /// session. Safe to call when nothing is running.
    pub async fn stop_auto_sync(&self) -> StopOutcome {
        let mut timer = self.lifecycle.lock().await;
        let disarmed = timer.take();

        // Cancelling under the state lock orders this against the tick's
        // own check, so a tick either began before this point or never runs.
        let stopped = {
            let mut state = self.inner.lock_state();
            if let Some(ref t) = disarmed {
                t.cancel.cancel();
            }
            state.session.take()
        };

        if let Some(Timer { task, .. }) = disarmed {
            if let Err(e) = task.await {
                log::error!("Auto-sync timer task ended abnormally: {e}");
            }
        }

        match stopped {
            Some(session) => {
                log::info!("Auto-sync of {} stopped", session.unit.key());
                StopOutcome::Stopped
            }
            None => {
                log::debug!("Stop requested but auto-sync is not running");
                StopOutcome::NotRunning
            }
        }
    }

    /// Last committed status. Does not wait for an in-flight execution.
    pub fn status(&self) -> StatusSnapshot {
        let state = self.inner.lock_state();
        let session = state.session.as_ref();
        StatusSnapshot {
            session_active: session.is_some(),
            status: state.status.clone(),
            unit_key: session.map(|s| s.unit.key()),
            interval_minutes: session.map(|s| s.unit.interval_minutes),
            session_started_at: session.map(|s| s.started_at),
        }
    }

    pub fn is_running(&self) -> bool {
        self.inner.lock_state().session.is_some()
    }

    /// Manual one-shot sync, independent of any session. Fails fast with
    /// [`Error::SyncInProgress`] if another execution holds the guard.
    pub async fn run_once(&self, unit: SyncUnit) -> Result<SyncOutcome> {
        unit.validate()?;
        let flight = self.inner.try_acquire().inspect_err(|_| {
            log::warn!("Manual sync of {} rejected: sync in progress", unit.key());
        })?;

        self.inner.lock_state().begin_run();
        Ok(self
            .inner
            .run_guarded(flight, Arc::new(unit), SyncTrigger::Manual)
            .await)
    }
}

impl Drop for SyncScheduler {
    fn drop(&mut self) {
        if let Some(timer) = self.lifecycle.get_mut().take() {
            timer.cancel.cancel();
        }
    }
}

/// Clears the session if `start_session` is abandoned before its timer is armed.
struct SessionRollback<'a> {
    inner: &'a Arc<Inner>,
    armed: bool,
}

impl SessionRollback<'_> {
    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for SessionRollback<'_> {
    fn drop(&mut self) {
        if self.armed {
            log::warn!("Auto-sync start abandoned before the timer was armed");
            self.inner.lock_state().session = None;
        }
    }
}

impl Inner {
    fn lock_state(&self) -> MutexGuard<'_, SchedulerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn try_acquire(&self) -> Result<OwnedMutexGuard<()>> {
        self.flight
            .clone()
            .try_lock_owned()
            .map_err(|_| Error::SyncInProgress)
    }

    /// Execute `unit` in a task that owns `flight`, commit the outcome, and
    /// release the guard. The task outlives a dropped caller.
    async fn run_guarded(
        self: &Arc<Self>,
        flight: OwnedMutexGuard<()>,
        unit: Arc<SyncUnit>,
        trigger: SyncTrigger,
    ) -> SyncOutcome {
        let inner = self.clone();
        let task = tokio::spawn(async move {
            let outcome = inner.executor.execute(&unit, trigger).await;
            inner.lock_state().commit(&outcome);
            drop(flight);
            outcome
        });

        match task.await {
            Ok(outcome) => outcome,
            Err(e) => {
                let outcome = SyncOutcome::failed(format!("sync task aborted: {e}"), Utc::now());
                self.lock_state().commit(&outcome);
                outcome
            }
        }
    }

    async fn run_tick(self: &Arc<Self>, unit: &Arc<SyncUnit>, cancel: &CancellationToken) {
        let Ok(flight) = self.try_acquire() else {
            log::warn!("Skipping auto-sync tick for {}: sync in progress", unit.key());
            self.executor.progress().on_tick_skipped(&unit.key());
            return;
        };

        {
            let mut state = self.lock_state();
            if cancel.is_cancelled() {
                log::debug!("Auto-sync tick for {} suppressed by stop", unit.key());
                return;
            }
            state.begin_run();
        }

        self.run_guarded(flight, unit.clone(), SyncTrigger::Tick)
            .await;
    }
}

impl SchedulerState {
    fn begin_run(&mut self) {
        self.status.state = RunState::Running;
        self.status.last_run = Some(Utc::now());
    }

    fn commit(&mut self, outcome: &SyncOutcome) {
        self.status.state = outcome.status.into();
        self.status.last_outcome = Some(outcome.clone());
    }
}

async fn run_timer(
    inner: Arc<Inner>,
    unit: Arc<SyncUnit>,
    period: Duration,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }
        log::debug!("Auto-sync tick for {}", unit.key());
        inner.run_tick(&unit, &cancel).await;
    }
    log::debug!("Auto-sync timer for {} disarmed", unit.key());
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SinkError;
    use crate::sync::testing::{unit, FakeReader, FakeSink};
    use crate::sync::OutcomeStatus;
    use tokio::task::JoinSet;

    const MINUTE: Duration = Duration::from_secs(60);

    fn scheduler(reader: Arc<FakeReader>) -> SyncScheduler {
        SyncScheduler::new(SyncExecutor::new(reader, Arc::new(FakeSink::default())))
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_runs_immediately() {
        let (reader, _entered) = FakeReader::new(10);
        let scheduler = scheduler(reader.clone());

        let outcome = scheduler.start_auto_sync(unit(), 5).await.unwrap();
        assert_eq!(outcome.status, OutcomeStatus::Completed);
        assert_eq!(outcome.rows_synced, Some(10));
        assert_eq!(reader.calls(), 1);

        let snapshot = scheduler.status();
        assert!(snapshot.session_active);
        assert_eq!(snapshot.interval_minutes, Some(5));
        assert_eq!(snapshot.status.state, RunState::Completed);
        assert_eq!(snapshot.status.last_outcome, Some(outcome));
        assert!(snapshot.status.last_run.is_some());

        scheduler.stop_auto_sync().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_valid_intervals_are_stored() {
        for interval in [1, 2, 59, 720, MAX_SYNC_INTERVAL] {
            let (reader, _entered) = FakeReader::new(1);
            let scheduler = scheduler(reader);
            scheduler.start_auto_sync(unit(), interval).await.unwrap();
            assert_eq!(scheduler.status().interval_minutes, Some(interval));
            scheduler.stop_auto_sync().await;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalid_interval_creates_no_session() {
        for interval in [0, MAX_SYNC_INTERVAL + 1, u32::MAX] {
            let (reader, _entered) = FakeReader::new(1);
            let scheduler = scheduler(reader.clone());
            let err = scheduler.start_auto_sync(unit(), interval).await.unwrap_err();
            assert!(matches!(err, Error::InvalidInterval { .. }));

            let snapshot = scheduler.status();
            assert!(!snapshot.session_active);
            assert_eq!(snapshot.status, SyncStatus::default());
            assert_eq!(reader.calls(), 0);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_custom_max_interval() {
        let (reader, _entered) = FakeReader::new(1);
        let scheduler = scheduler(reader).with_max_interval(60);
        assert!(matches!(
            scheduler.start_auto_sync(unit(), 61).await,
            Err(Error::InvalidInterval { interval: 61, max: 60 })
        ));
        assert!(scheduler.start_auto_sync(unit(), 60).await.is_ok());
        scheduler.stop_auto_sync().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_malformed_unit_rejected() {
        let (reader, _entered) = FakeReader::new(1);
        let scheduler = scheduler(reader.clone());
        let mut bad = unit();
        bad.target.table = "orders; drop".into();

        assert!(matches!(
            scheduler.start_auto_sync(bad.clone(), 5).await,
            Err(Error::InvalidUnit(_))
        ));
        assert!(matches!(scheduler.run_once(bad).await, Err(Error::InvalidUnit(_))));
        assert!(!scheduler.is_running());
        assert_eq!(reader.calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_second_start_is_already_running() {
        let (reader, _entered) = FakeReader::new(10);
        let scheduler = scheduler(reader.clone());
        scheduler.start_auto_sync(unit(), 5).await.unwrap();
        let before = scheduler.status();

        reader.set_failing(true);
        let err = scheduler.start_auto_sync(unit(), 10).await.unwrap_err();
        assert!(matches!(err, Error::AlreadyRunning));
        assert_eq!(scheduler.status(), before);
        assert_eq!(reader.calls(), 1);

        scheduler.stop_auto_sync().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_is_idempotent() {
        let (reader, _entered) = FakeReader::new(1);
        let scheduler = scheduler(reader);
        assert_eq!(scheduler.stop_auto_sync().await, StopOutcome::NotRunning);

        scheduler.start_auto_sync(unit(), 5).await.unwrap();
        assert_eq!(scheduler.stop_auto_sync().await, StopOutcome::Stopped);
        assert_eq!(scheduler.stop_auto_sync().await, StopOutcome::NotRunning);
        assert!(!scheduler.status().session_active);
    }

    #[tokio::test(start_paused = true)]
    async fn test_ticks_fire_at_interval() {
        let (reader, _entered) = FakeReader::new(2);
        let scheduler = scheduler(reader.clone());
        scheduler.start_auto_sync(unit(), 5).await.unwrap();

        tokio::time::sleep(4 * MINUTE).await;
        assert_eq!(reader.calls(), 1);

        tokio::time::sleep(2 * MINUTE).await;
        assert_eq!(reader.calls(), 2);

        tokio::time::sleep(10 * MINUTE).await;
        assert_eq!(reader.calls(), 4);

        scheduler.stop_auto_sync().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_ticks_after_stop_and_restart_succeeds() {
        let (reader, _entered) = FakeReader::new(1);
        let scheduler = scheduler(reader.clone());

        scheduler.start_auto_sync(unit(), 1).await.unwrap();
        scheduler.stop_auto_sync().await;
        let after_stop = scheduler.status();

        tokio::time::sleep(30 * MINUTE).await;
        assert_eq!(reader.calls(), 1);
        assert_eq!(scheduler.status(), after_stop);

        scheduler.start_auto_sync(unit(), 1).await.unwrap();
        assert_eq!(reader.calls(), 2);
        assert!(scheduler.status().session_active);
        scheduler.stop_auto_sync().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_tick_keeps_session_alive() {
        let (reader, _entered) = FakeReader::new(7);
        reader.set_failing(true);
        let scheduler = scheduler(reader.clone());

        let first = scheduler.start_auto_sync(unit(), 1).await.unwrap();
        assert_eq!(first.status, OutcomeStatus::Failed);
        let snapshot = scheduler.status();
        assert!(snapshot.session_active);
        assert_eq!(snapshot.status.state, RunState::Failed);
        assert!(snapshot.status.last_outcome.unwrap().error.unwrap().contains("503"));

        reader.set_failing(false);
        tokio::time::sleep(MINUTE + Duration::from_secs(1)).await;

        let snapshot = scheduler.status();
        assert!(snapshot.session_active);
        assert_eq!(snapshot.status.state, RunState::Completed);
        assert_eq!(snapshot.status.last_outcome.unwrap().rows_synced, Some(7));
        scheduler.stop_auto_sync().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_once_rejected_while_tick_in_flight() {
        let (reader, mut entered) = FakeReader::new(10);
        let scheduler = scheduler(reader.clone());
        let first = scheduler.start_auto_sync(unit(), 1).await.unwrap();
        assert_eq!(entered.recv().await, Some(1));

        let gate = reader.block();
        // The clock auto-advances to the first tick, which parks in fetch.
        assert_eq!(entered.recv().await, Some(2));
        assert_eq!(scheduler.status().status.state, RunState::Running);

        let err = scheduler.run_once(unit()).await.unwrap_err();
        assert!(matches!(err, Error::SyncInProgress));
        assert_eq!(scheduler.status().status.last_outcome, Some(first));
        assert_eq!(reader.calls(), 2);

        gate.add_permits(1);
        scheduler.stop_auto_sync().await;

        // stop waited for the parked tick, which committed its outcome.
        let snapshot = scheduler.status();
        assert!(!snapshot.session_active);
        assert_eq!(snapshot.status.state, RunState::Completed);
        assert_eq!(reader.calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_tick_skipped_while_manual_sync_in_flight() {
        let (reader, mut entered) = FakeReader::new(1);
        let scheduler = Arc::new(scheduler(reader.clone()));
        scheduler.start_auto_sync(unit(), 1).await.unwrap();
        assert_eq!(entered.recv().await, Some(1));

        let gate = reader.block();
        let manual = tokio::spawn({
            let scheduler = scheduler.clone();
            async move { scheduler.run_once(unit()).await }
        });
        assert_eq!(entered.recv().await, Some(2));

        // Three tick periods pass while the manual sync holds the guard.
        tokio::time::sleep(3 * MINUTE + Duration::from_secs(1)).await;
        assert_eq!(reader.calls(), 2);

        gate.add_permits(1);
        let outcome = manual.await.unwrap().unwrap();
        assert_eq!(outcome.status, OutcomeStatus::Completed);
        assert_eq!(reader.peak_concurrency(), 1);

        scheduler.stop_auto_sync().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_status_does_not_block_on_in_flight_execution() {
        let (reader, mut entered) = FakeReader::new(1);
        let gate = reader.block();
        let scheduler = Arc::new(scheduler(reader.clone()));

        let start = tokio::spawn({
            let scheduler = scheduler.clone();
            async move { scheduler.start_auto_sync(unit(), 5).await }
        });
        assert_eq!(entered.recv().await, Some(1));

        let snapshot = scheduler.status();
        assert!(snapshot.session_active);
        assert_eq!(snapshot.status.state, RunState::Running);
        assert_eq!(snapshot.status.last_outcome, None);

        gate.add_permits(1);
        start.await.unwrap().unwrap();
        assert_eq!(scheduler.status().status.state, RunState::Completed);
        scheduler.stop_auto_sync().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_abandoned_start_leaves_no_session_and_keeps_guard() {
        let (reader, mut entered) = FakeReader::new(4);
        let gate = reader.block();
        let scheduler = Arc::new(scheduler(reader.clone()));

        let start = tokio::spawn({
            let scheduler = scheduler.clone();
            async move { scheduler.start_auto_sync(unit(), 5).await }
        });
        assert_eq!(entered.recv().await, Some(1));
        start.abort();
        assert!(start.await.unwrap_err().is_cancelled());

        let snapshot = scheduler.status();
        assert!(!snapshot.session_active);
        assert_eq!(snapshot.status.state, RunState::Running);

        // The first run is still parked in fetch and owns the guard.
        assert!(matches!(scheduler.run_once(unit()).await, Err(Error::SyncInProgress)));
        assert!(matches!(
            scheduler.start_auto_sync(unit(), 5).await,
            Err(Error::SyncInProgress)
        ));
        assert_eq!(reader.calls(), 1);

        gate.add_permits(2);
        while scheduler.status().status.state == RunState::Running {
            tokio::task::yield_now().await;
        }
        let committed = scheduler.status().status.last_outcome.unwrap();
        assert_eq!(committed.rows_synced, Some(4));

        let outcome = scheduler.start_auto_sync(unit(), 5).await.unwrap();
        assert!(outcome.is_completed());
        assert!(scheduler.is_running());
        assert_eq!(reader.calls(), 2);
        assert_eq!(reader.peak_concurrency(), 1);
        scheduler.stop_auto_sync().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_abandoned_run_once_keeps_guard_until_committed() {
        let (reader, mut entered) = FakeReader::new(3);
        let gate = reader.block();
        let scheduler = Arc::new(scheduler(reader.clone()));

        let manual = tokio::spawn({
            let scheduler = scheduler.clone();
            async move { scheduler.run_once(unit()).await }
        });
        assert_eq!(entered.recv().await, Some(1));
        manual.abort();
        assert!(manual.await.unwrap_err().is_cancelled());

        assert!(matches!(scheduler.run_once(unit()).await, Err(Error::SyncInProgress)));
        assert_eq!(reader.calls(), 1);

        gate.add_permits(2);
        while scheduler.status().status.state == RunState::Running {
            tokio::task::yield_now().await;
        }
        assert_eq!(scheduler.status().status.state, RunState::Completed);

        let outcome = scheduler.run_once(unit()).await.unwrap();
        assert_eq!(outcome.rows_synced, Some(3));
        assert_eq!(reader.peak_concurrency(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_abandoned_stop_still_discards_session() {
        let (reader, mut entered) = FakeReader::new(1);
        let scheduler = Arc::new(scheduler(reader.clone()));
        scheduler.start_auto_sync(unit(), 1).await.unwrap();
        assert_eq!(entered.recv().await, Some(1));

        let gate = reader.block();
        assert_eq!(entered.recv().await, Some(2));

        let stop = tokio::spawn({
            let scheduler = scheduler.clone();
            async move { scheduler.stop_auto_sync().await }
        });
        while scheduler.is_running() {
            tokio::task::yield_now().await;
        }
        stop.abort();
        assert!(stop.await.unwrap_err().is_cancelled());

        assert!(!scheduler.status().session_active);
        // The parked tick still holds the guard.
        assert!(matches!(
            scheduler.start_auto_sync(unit(), 1).await,
            Err(Error::SyncInProgress)
        ));

        gate.add_permits(2);
        while scheduler.status().status.state == RunState::Running {
            tokio::task::yield_now().await;
        }
        scheduler.start_auto_sync(unit(), 1).await.unwrap();
        assert_eq!(reader.calls(), 3);
        assert_eq!(reader.peak_concurrency(), 1);
        scheduler.stop_auto_sync().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_at_tick_instant_settles_status() {
        let (reader, _entered) = FakeReader::new(1);
        let scheduler = scheduler(reader.clone());
        scheduler.start_auto_sync(unit(), 1).await.unwrap();

        // Wakes at the same instant the first tick fires.
        tokio::time::sleep(MINUTE).await;
        assert_eq!(scheduler.stop_auto_sync().await, StopOutcome::Stopped);

        let settled = scheduler.status();
        assert!(!settled.session_active);
        assert_ne!(settled.status.state, RunState::Running);
        let calls = reader.calls();
        assert!(calls == 1 || calls == 2, "unexpected call count {calls}");

        tokio::time::sleep(10 * MINUTE).await;
        assert_eq!(scheduler.status(), settled);
        assert_eq!(reader.calls(), calls);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_stop_racing_ticks_settles_status() {
        for round in 0..50u64 {
            let (reader, _entered) = FakeReader::with_delay(1, Duration::from_micros(200));
            let scheduler = scheduler(reader.clone());
            scheduler
                .start_session(unit(), Duration::from_millis(1))
                .await
                .unwrap();

            tokio::time::sleep(Duration::from_micros(300 * (round % 7))).await;
            assert_eq!(scheduler.stop_auto_sync().await, StopOutcome::Stopped);

            let settled = scheduler.status();
            assert!(!settled.session_active);
            assert_ne!(settled.status.state, RunState::Running);
            let calls = reader.calls();

            tokio::time::sleep(Duration::from_millis(5)).await;
            assert_eq!(scheduler.status(), settled, "status changed after stop in round {round}");
            assert_eq!(reader.calls(), calls);
            assert_eq!(reader.peak_concurrency(), 1);
        }
    }

    #[tokio::test]
    async fn test_run_once_without_session() {
        let (reader, _entered) = FakeReader::new(3);
        let scheduler = scheduler(reader);

        let outcome = scheduler.run_once(unit()).await.unwrap();
        assert_eq!(outcome.rows_synced, Some(3));
        let snapshot = scheduler.status();
        assert!(!snapshot.session_active);
        assert_eq!(snapshot.status.state, RunState::Completed);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_single_flight_under_concurrent_run_once() {
        let (reader, _entered) = FakeReader::with_delay(1, Duration::from_millis(20));
        let scheduler = Arc::new(scheduler(reader.clone()));

        let mut set = JoinSet::new();
        for _ in 0..16 {
            let scheduler = scheduler.clone();
            set.spawn(async move { scheduler.run_once(unit()).await });
        }

        let mut completed = 0;
        let mut rejected = 0;
        while let Some(result) = set.join_next().await {
            match result.unwrap() {
                Ok(_) => completed += 1,
                Err(Error::SyncInProgress) => rejected += 1,
                Err(e) => panic!("unexpected error: {e}"),
            }
        }

        assert!(completed >= 1);
        assert_eq!(completed + rejected, 16);
        assert_eq!(reader.calls(), completed);
        assert_eq!(reader.peak_concurrency(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_collaborator_error_text_is_visible_in_status() {
        let (reader, _entered) = FakeReader::new(1);
        let sink = Arc::new(FakeSink::failing(SinkError::Auth(
            "password rejected".into(),
        )));
        let scheduler = SyncScheduler::new(SyncExecutor::new(reader, sink));

        scheduler.start_auto_sync(unit(), 5).await.unwrap();
        let error = scheduler.status().status.last_outcome.unwrap().error.unwrap();
        assert!(error.contains("password rejected"));
        assert!(scheduler.is_running());
        scheduler.stop_auto_sync().await;
    }
}
