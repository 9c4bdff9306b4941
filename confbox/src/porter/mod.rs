//! Export/import pipelines with live progress and cooperative cancellation.
//!
//! A [`Porter`] composes the archive, transfer and backup engines into
//! named multi-step pipelines (export, import-from-file, import-from-url).
//! Each pipeline invocation builds an ordered list of step trackers, runs
//! the steps sequentially on blocking workers, and short-circuits on the
//! first failure, except that import pipelines always run their trailing
//! cleanup/restore step. A polling observer (the GUI shell) reads progress
//! through [`Porter::poll_progress`], which never blocks and drains the
//! queued log messages in one call.
//!
//! One pipeline may be in flight per `Porter` at a time; serializing
//! operation starts is the caller's responsibility.

pub mod archive;
pub mod backup;
pub mod progress;
pub mod transfer;

use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::config::Config;
use crate::error::{Error, Result};
use progress::{Progress, Status, StepTracker};

const STEP_INITIALISATION: &str = "initialisation";
const STEP_COMPRESSION: &str = "compression";
const STEP_BACKUP: &str = "backup";
const STEP_DOWNLOAD: &str = "download";
const STEP_DECOMPRESSION: &str = "decompression";
const STEP_CLEANUP: &str = "cleanup";

/// Aggregate reply handed to the polling observer: a snapshot of every
/// step, the drained message backlog, and the derived overall status.
#[derive(Debug, Clone, Serialize)]
pub struct ProgressReport {
    pub tasks: Vec<Progress>,
    pub messages: Vec<String>,
    pub status: Status,
}

/// One pipeline invocation: the ordered step trackers plus the shared
/// cancellation token. Replaced wholesale when the next operation starts.
struct PipelineRun {
    steps: Vec<Arc<StepTracker>>,
    cancel: CancellationToken,
}

impl PipelineRun {
    /// Derive the aggregate status from the step states. Never stored.
    fn status(&self) -> Status {
        if self.cancel.is_cancelled() {
            let active = self
                .steps
                .iter()
                .any(|s| matches!(s.status(), Status::Pending | Status::Running));
            return if active { Status::Aborting } else { Status::Aborted };
        }

        if self.steps.iter().all(|s| s.status() == Status::Pending) {
            return Status::Pending;
        }
        if self.steps.iter().all(|s| s.status() == Status::Completed) {
            return Status::Completed;
        }
        if self.steps.iter().all(|s| s.status() != Status::Failed) {
            return Status::Running;
        }
        Status::Failed
    }

    /// Mark every step the pipeline never reached as skipped, so the
    /// aggregate view stays self-explanatory after the fact.
    fn finish(&self) {
        for step in &self.steps {
            step.skip();
        }
    }
}

/// Orchestrates export/import pipelines over the configured targets.
pub struct Porter {
    root: PathBuf,
    targets: Vec<PathBuf>,
    client: reqwest::Client,
    messages_tx: mpsc::Sender<String>,
    messages_rx: Mutex<mpsc::Receiver<String>>,
    run: RwLock<Option<Arc<PipelineRun>>>,
}

impl Porter {
    pub fn new(config: &Config) -> Self {
        let (tx, rx) = mpsc::channel(config.message_capacity.max(1));
        Self {
            root: config.root_dir.clone(),
            targets: config.targets.clone(),
            client: reqwest::Client::new(),
            messages_tx: tx,
            messages_rx: Mutex::new(rx),
            run: RwLock::new(None),
        }
    }

    /// Pack the configured targets into an archive under `dest`.
    ///
    /// Steps: `initialisation` (make every target root-relative, one unit
    /// each), `compression` (stream the trees into the archive).
    pub async fn export(&self, dest: impl Into<PathBuf>) -> Result<PathBuf> {
        let dest = dest.into();
        info!(dest = %dest.display(), "starting export");

        let run = self.begin(&[STEP_INITIALISATION, STEP_COMPRESSION]);
        let result = self.run_export(&run, dest).await;
        run.finish();
        result
    }

    /// Restore the targets from a local archive.
    ///
    /// Steps: `backup`, `decompression`, `cleanup`. A backup failure
    /// returns immediately; nothing was changed yet, so there is nothing
    /// to restore. Otherwise cleanup always runs, restoring the backups
    /// when decompression failed.
    pub async fn import_from_file(&self, origin: impl Into<PathBuf>) -> Result<()> {
        let origin = origin.into();
        info!(origin = %origin.display(), "starting import from file");

        let run = self.begin(&[STEP_BACKUP, STEP_DECOMPRESSION, STEP_CLEANUP]);
        let result = self.run_import_file(&run, origin).await;
        run.finish();
        result
    }

    /// Download an archive and restore the targets from it.
    ///
    /// Steps: `backup`, `download`, `decompression`, `cleanup`. Once the
    /// backup has run, cleanup runs no matter which later step failed;
    /// a failed download restores the backups unconditionally.
    pub async fn import_from_url(&self, url: impl Into<String>) -> Result<()> {
        let url = url.into();
        info!(url, "starting import from URL");

        let run = self.begin(&[
            STEP_BACKUP,
            STEP_DOWNLOAD,
            STEP_DECOMPRESSION,
            STEP_CLEANUP,
        ]);
        let result = self.run_import_url(&run, url).await;
        run.finish();
        result
    }

    /// Request cancellation of the in-flight pipeline. Cooperative: the
    /// signal takes effect at the next checkpoint inside the active step.
    pub fn abort(&self) -> Result<()> {
        let run = self.run.read().clone().ok_or(Error::NoJob)?;
        match run.status() {
            Status::Aborting => Ok(()),
            Status::Aborted => Err(Error::AlreadyAborted),
            Status::Running => {
                // Must not block the caller; drop the notice if the queue
                // happens to be full.
                let _ = self.messages_tx.try_send("Cancelling...".to_string());
                run.cancel.cancel();
                Ok(())
            }
            _ => Err(Error::NotRunning),
        }
    }

    /// Aggregate status of the current pipeline, recomputed on every call.
    pub fn status(&self) -> Status {
        match &*self.run.read() {
            Some(run) => run.status(),
            None => Status::Pending,
        }
    }

    /// Drain the queued log messages and snapshot every step. Non-blocking;
    /// returns only what is already there.
    pub fn poll_progress(&self) -> Result<ProgressReport> {
        let run = self.run.read().clone().ok_or(Error::NoJob)?;

        let mut messages = Vec::new();
        {
            let mut rx = self.messages_rx.lock();
            while let Ok(message) = rx.try_recv() {
                messages.push(message);
            }
        }

        Ok(ProgressReport {
            tasks: run.steps.iter().map(|s| s.snapshot()).collect(),
            messages,
            status: run.status(),
        })
    }

    fn begin(&self, names: &[&str]) -> Arc<PipelineRun> {
        let run = Arc::new(PipelineRun {
            steps: names
                .iter()
                .map(|name| Arc::new(StepTracker::new(*name, self.messages_tx.clone())))
                .collect(),
            cancel: CancellationToken::new(),
        });
        *self.run.write() = Some(run.clone());
        run
    }

    async fn run_export(&self, run: &Arc<PipelineRun>, dest: PathBuf) -> Result<PathBuf> {
        let root = self.root.clone();
        let targets = self.targets.clone();
        let sources = self
            .run_step(run.steps[0].clone(), move |tracker| {
                tracker.start(targets.len() as u64);
                let mut relative = Vec::with_capacity(targets.len());
                for dir in &targets {
                    relative.push(relativize(&root, dir)?);
                    tracker.accumulate(1);
                }
                Ok(relative)
            })
            .await?;

        let root = self.root.clone();
        let cancel = run.cancel.clone();
        self.run_step(run.steps[1].clone(), move |tracker| {
            archive::pack(&root, &dest, &sources, tracker, &cancel)
        })
        .await
    }

    async fn run_import_file(&self, run: &Arc<PipelineRun>, origin: PathBuf) -> Result<()> {
        self.step_backup(run, 0).await?;

        let unpacked = self.step_unpack(run, 1, origin).await;
        let cleaned = self.step_cleanup(run, 2, unpacked.is_err()).await;
        Error::join(unpacked.err(), cleaned.err())
    }

    async fn run_import_url(&self, run: &Arc<PipelineRun>, url: String) -> Result<()> {
        self.step_backup(run, 0).await?;

        let step = run.steps[1].clone();
        let downloaded = transfer::download(&step, &run.cancel, &self.client, &url).await;
        let origin = match downloaded {
            Ok(path) => {
                step.complete();
                path
            }
            Err(err) => {
                step.emit_async(err.to_string()).await;
                step.fail(&err);
                // The backups already exist, so restore them even though
                // nothing has been unpacked yet.
                let cleaned = self.step_cleanup(run, 3, true).await;
                return Error::join(Some(err), cleaned.err());
            }
        };

        let unpacked = self.step_unpack(run, 2, origin).await;
        let cleaned = self.step_cleanup(run, 3, unpacked.is_err()).await;
        Error::join(unpacked.err(), cleaned.err())
    }

    async fn step_backup(&self, run: &Arc<PipelineRun>, index: usize) -> Result<()> {
        let targets = self.target_paths();
        self.run_step(run.steps[index].clone(), move |tracker| {
            backup::backup(tracker, &targets)
        })
        .await
    }

    async fn step_unpack(&self, run: &Arc<PipelineRun>, index: usize, origin: PathBuf) -> Result<()> {
        let root = self.root.clone();
        let cancel = run.cancel.clone();
        self.run_step(run.steps[index].clone(), move |tracker| {
            archive::unpack(&origin, &root, tracker, &cancel)
        })
        .await
    }

    async fn step_cleanup(&self, run: &Arc<PipelineRun>, index: usize, restore: bool) -> Result<()> {
        let targets = self.target_paths();
        self.run_step(run.steps[index].clone(), move |tracker| {
            backup::cleanup(tracker, &targets, restore)
        })
        .await
    }

    /// Run one step body on a blocking worker and settle its outcome into
    /// the tracker. Step errors are captured, never unwound.
    async fn run_step<T, F>(&self, tracker: Arc<StepTracker>, body: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&StepTracker) -> Result<T> + Send + 'static,
    {
        tokio::task::spawn_blocking(move || {
            let result = body(&tracker);
            match &result {
                Ok(_) => tracker.complete(),
                Err(err) => {
                    tracker.emit(err.to_string());
                    tracker.fail(err);
                }
            }
            result
        })
        .await
        .map_err(|e| Error::Task(e.to_string()))?
    }

    fn target_paths(&self) -> Vec<PathBuf> {
        self.targets
            .iter()
            .map(|target| {
                if target.is_absolute() {
                    target.clone()
                } else {
                    self.root.join(target)
                }
            })
            .collect()
    }
}

/// Express a target relative to the working root, as stored in archive
/// entry names. Absolute targets outside the root cannot be exported.
fn relativize(root: &Path, target: &Path) -> Result<PathBuf> {
    if target.is_relative() {
        return Ok(target.to_path_buf());
    }
    target
        .strip_prefix(root)
        .map(Path::to_path_buf)
        .map_err(|_| {
            Error::Export(format!(
                "target {} is outside the working root {}",
                target.display(),
                root.display()
            ))
        })
}
