//! Scripted collaborators for executor and scheduler tests.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::{mpsc, Semaphore};

use crate::error::{SinkError, SourceError};
use crate::sink::DataSink;
use crate::source::{Record, SheetReader};
use crate::sync::{CredentialRef, SourceDescriptor, SyncUnit, TargetDescriptor};

pub const SPREADSHEET_ID: &str = "1BxiMVs0XRA5nFMdKvBdBZjgmUUqptlbs74OgvE2upms";

pub fn unit() -> SyncUnit {
    SyncUnit::new(
        SourceDescriptor::new(CredentialRef::Token("test".into()), SPREADSHEET_ID, None),
        TargetDescriptor::new("memory", "orders"),
    )
}

pub fn records(n: usize) -> Vec<Record> {
    (0..n)
        .map(|i| {
            let mut r = Record::new();
            r.insert("id".into(), Value::String(i.to_string()));
            r
        })
        .collect()
}

/// Reader returning `rows` records, optionally failing, delaying, or
/// parking on a gate. Every call reports its 1-based index on `entered`.
pub struct FakeReader {
    rows: usize,
    fail: AtomicBool,
    panic: AtomicBool,
    delay: Option<Duration>,
    gate: Mutex<Option<Arc<Semaphore>>>,
    calls: AtomicUsize,
    active: AtomicUsize,
    peak: AtomicUsize,
    entered: mpsc::UnboundedSender<usize>,
}

impl FakeReader {
    pub fn new(rows: usize) -> (Arc<Self>, mpsc::UnboundedReceiver<usize>) {
        Self::build(rows, None)
    }

    pub fn with_delay(rows: usize, delay: Duration) -> (Arc<Self>, mpsc::UnboundedReceiver<usize>) {
        Self::build(rows, Some(delay))
    }

    fn build(
        rows: usize,
        delay: Option<Duration>,
    ) -> (Arc<Self>, mpsc::UnboundedReceiver<usize>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let reader = Self {
            rows,
            fail: AtomicBool::new(false),
            panic: AtomicBool::new(false),
            delay,
            gate: Mutex::new(None),
            calls: AtomicUsize::new(0),
            active: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
            entered: tx,
        };
        (Arc::new(reader), rx)
    }

    pub fn set_failing(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub fn set_panicking(&self, panic: bool) {
        self.panic.store(panic, Ordering::SeqCst);
    }

    /// Park subsequent fetches until permits are added to the returned gate.
    pub fn block(&self) -> Arc<Semaphore> {
        let gate = Arc::new(Semaphore::new(0));
        *self.gate.lock().unwrap() = Some(gate.clone());
        gate
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn peak_concurrency(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SheetReader for FakeReader {
    async fn fetch(&self, _source: &SourceDescriptor) -> Result<Vec<Record>, SourceError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        let _ = self.entered.send(n);

        let gate = self.gate.lock().unwrap().clone();
        if let Some(gate) = gate {
            gate.acquire().await.unwrap().forget();
        }
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.active.fetch_sub(1, Ordering::SeqCst);

        if self.panic.load(Ordering::SeqCst) {
            panic!("reader exploded");
        }
        if self.fail.load(Ordering::SeqCst) {
            return Err(SourceError::Unavailable("sheets API returned 503".into()));
        }
        Ok(records(self.rows))
    }
}

/// Sink that reports every record as written, or a scripted error.
#[derive(Default)]
pub struct FakeSink {
    fail: Mutex<Option<SinkError>>,
    writes: AtomicUsize,
}

impl FakeSink {
    pub fn failing(err: SinkError) -> Self {
        Self {
            fail: Mutex::new(Some(err)),
            writes: AtomicUsize::new(0),
        }
    }

    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DataSink for FakeSink {
    async fn write(&self, _target: &TargetDescriptor, records: &[Record]) -> Result<u64, SinkError> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        if let Some(err) = self.fail.lock().unwrap().clone() {
            return Err(err);
        }
        Ok(records.len() as u64)
    }
}
