pub mod export;
pub mod import;

pub use export::run_export;
pub use import::{run_import_file, run_import_url};

use anyhow::Result;
use confbox::porter::progress::Status;
use confbox::porter::ProgressReport;
use confbox::Porter;
use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;
use tokio::task::JoinHandle;

/// Drive one pipeline to completion at the request/response boundary:
/// poll progress four times a second, print the drained messages, keep the
/// bar on the active step, and translate Ctrl-C into a cooperative abort.
pub(crate) async fn drive<T>(
    porter: &Porter,
    mut worker: JoinHandle<confbox::Result<T>>,
) -> Result<T> {
    let bar = ProgressBar::new(0);
    bar.set_style(
        ProgressStyle::with_template(
            "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {bytes}/{total_bytes} {msg}",
        )
        .unwrap()
        .progress_chars("#>-"),
    );

    let mut poll = tokio::time::interval(Duration::from_millis(250));

    loop {
        tokio::select! {
            result = &mut worker => {
                if let Ok(report) = porter.poll_progress() {
                    render(&bar, &report);
                }
                bar.finish_and_clear();
                return Ok(result??);
            }
            _ = poll.tick() => {
                if let Ok(report) = porter.poll_progress() {
                    render(&bar, &report);
                }
            }
            _ = tokio::signal::ctrl_c() => {
                if let Err(err) = porter.abort() {
                    tracing::warn!(error = %err, "abort request rejected");
                }
            }
        }
    }
}

fn render(bar: &ProgressBar, report: &ProgressReport) {
    for message in &report.messages {
        bar.println(message);
    }

    if let Some(task) = report.tasks.iter().find(|t| t.status == Status::Running) {
        bar.set_length(task.total.max(task.current));
        bar.set_position(task.current);
        bar.set_message(task.name.clone());
    }
}
