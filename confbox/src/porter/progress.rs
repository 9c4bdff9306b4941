//! Per-step progress tracking.
//!
//! A [`StepTracker`] is the live state machine for one named unit of work:
//! written by the pipeline worker, snapshotted by the polling side. Counters
//! are atomics and the remaining fields sit behind short mutexes, so a
//! reader may observe a snapshot taken mid-update but never a torn field.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use std::fmt;
use std::io::{self, Write};
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc;

use crate::error::Error;

/// Lifecycle of a pipeline step. Also used as the derived aggregate status
/// of a whole pipeline run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Pending,
    Running,
    Completed,
    Failed,
    Aborting,
    Aborted,
    Skipped,
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Status::Pending => write!(f, "pending"),
            Status::Running => write!(f, "running"),
            Status::Completed => write!(f, "completed"),
            Status::Failed => write!(f, "failed"),
            Status::Aborting => write!(f, "aborting"),
            Status::Aborted => write!(f, "aborted"),
            Status::Skipped => write!(f, "skipped"),
        }
    }
}

/// Snapshot of one step, copied out for the polling observer.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Progress {
    pub name: String,
    pub status: Status,
    pub total: u64,
    pub current: u64,
    pub started_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
}

/// Tracks one step's byte-count state machine.
pub struct StepTracker {
    name: String,
    status: Mutex<Status>,
    total: AtomicU64,
    current: AtomicU64,
    started_at: Mutex<Option<DateTime<Utc>>>,
    error: Mutex<Option<String>>,
    messages: mpsc::Sender<String>,
}

impl StepTracker {
    pub fn new(name: impl Into<String>, messages: mpsc::Sender<String>) -> Self {
        Self {
            name: name.into(),
            status: Mutex::new(Status::Pending),
            total: AtomicU64::new(0),
            current: AtomicU64::new(0),
            started_at: Mutex::new(None),
            error: Mutex::new(None),
            messages,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn status(&self) -> Status {
        *self.status.lock()
    }

    /// Move `pending -> running` and record the step's expected size.
    pub fn start(&self, total: u64) {
        *self.started_at.lock() = Some(Utc::now());
        self.total.store(total, Ordering::Relaxed);
        self.current.store(0, Ordering::Relaxed);
        *self.status.lock() = Status::Running;
    }

    /// Add transferred units on top of the running count.
    pub fn accumulate(&self, n: u64) {
        self.current.fetch_add(n, Ordering::Relaxed);
    }

    /// Revise the expected size once it becomes known, e.g. when a
    /// Content-Length arrives after the step already started. Ignored after
    /// completion.
    pub fn set_total(&self, total: u64) {
        if *self.status.lock() != Status::Completed {
            self.total.store(total, Ordering::Relaxed);
        }
    }

    /// Mark the step done, forcing `current == total`. Idempotent.
    pub fn complete(&self) {
        // An indeterminate total (0) resolves to whatever was transferred.
        let total = self.total.load(Ordering::Relaxed);
        if total == 0 {
            self.total
                .store(self.current.load(Ordering::Relaxed), Ordering::Relaxed);
        }
        self.current
            .store(self.total.load(Ordering::Relaxed), Ordering::Relaxed);
        *self.status.lock() = Status::Completed;
    }

    /// Record the step's terminal error; cancellation maps to `aborted`,
    /// anything else to `failed`.
    pub fn fail(&self, err: &Error) {
        *self.error.lock() = Some(err.to_string());
        *self.status.lock() = if err.is_cancelled() {
            Status::Aborted
        } else {
            Status::Failed
        };
    }

    pub(crate) fn skip(&self) {
        let mut status = self.status.lock();
        if *status == Status::Pending {
            *status = Status::Skipped;
        }
    }

    /// Queue a log line for the polling observer. Blocks briefly when the
    /// queue is full; that backpressure is intentional. Only valid on a
    /// blocking worker thread.
    pub fn emit(&self, message: impl Into<String>) {
        let _ = self.messages.blocking_send(message.into());
    }

    /// Async flavor of [`StepTracker::emit`] for steps that run on the
    /// runtime itself.
    pub async fn emit_async(&self, message: impl Into<String>) {
        let _ = self.messages.send(message.into()).await;
    }

    /// Copy the current state for the polling side.
    pub fn snapshot(&self) -> Progress {
        Progress {
            name: self.name.clone(),
            status: *self.status.lock(),
            total: self.total.load(Ordering::Relaxed),
            current: self.current.load(Ordering::Relaxed),
            started_at: *self.started_at.lock(),
            error: self.error.lock().clone(),
        }
    }
}

/// `io::Write` decorator that forwards bytes to the wrapped sink and
/// accumulates the count into a tracker as a side effect, so any streaming
/// copy reports progress for free.
pub struct CountingWriter<'a, W> {
    inner: W,
    tracker: &'a StepTracker,
}

impl<'a, W: Write> CountingWriter<'a, W> {
    pub fn new(inner: W, tracker: &'a StepTracker) -> Self {
        Self { inner, tracker }
    }
}

impl<W: Write> Write for CountingWriter<'_, W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.tracker.accumulate(n as u64);
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}
