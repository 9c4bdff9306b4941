//! Remote archive retrieval.

use std::io::Write;
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::progress::{CountingWriter, StepTracker};
use crate::error::{Error, Result};

/// Stream a remote archive into a scratch file, returning its path.
///
/// The tracker starts at an indeterminate size and is revised once the
/// response advertises a Content-Length; without one, completion is
/// signaled by stream EOF. Each received chunk advances progress through
/// the counting sink. Cancellation is observed between chunks.
pub async fn download(
    tracker: &StepTracker,
    cancel: &CancellationToken,
    client: &reqwest::Client,
    url: &str,
) -> Result<PathBuf> {
    tracker.start(0);

    let mut response = client.get(url).send().await?.error_for_status()?;
    if let Some(length) = response.content_length() {
        tracker.set_total(length);
    }

    let scratch = tempfile::Builder::new()
        .prefix("confbox-")
        .suffix(".tar.zst")
        .tempfile()?;
    let (file, path) = scratch
        .keep()
        .map_err(|e| Error::Import(format!("cannot persist scratch file: {e}")))?;

    debug!(url, scratch = %path.display(), "download started");
    tracker.emit_async("Downloading...").await;

    let mut sink = CountingWriter::new(file, tracker);
    loop {
        let chunk = tokio::select! {
            _ = cancel.cancelled() => return Err(Error::Cancelled),
            chunk = response.chunk() => chunk?,
        };
        let Some(bytes) = chunk else { break };
        sink.write_all(&bytes)?;
    }
    sink.flush()?;

    Ok(path)
}
