//! Rename-aside backups of the target directories.
//!
//! Before a destructive import, every target is renamed to a `_old`
//! sibling. Afterwards the backups are either renamed back (the import
//! failed) or deleted (it succeeded).

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::warn;

use super::progress::StepTracker;
use crate::error::{Error, Result};

/// Rename every target aside to its `_old` sibling, one tracker unit per
/// directory. Fails fast: a half-renamed set is unsafe to continue from.
pub fn backup(tracker: &StepTracker, targets: &[PathBuf]) -> Result<()> {
    tracker.start(targets.len() as u64);
    tracker.emit("Creating backups...");

    for dir in targets {
        let saved = backup_path(dir);
        fs::rename(dir, &saved)?;
        tracker.emit(format!("{} -> {}", dir.display(), saved.display()));
        tracker.accumulate(1);
    }

    Ok(())
}

/// Dispose of the `_old` backups after an import.
///
/// With `restore` set (the import failed), whatever sits at the original
/// location is deleted and the backup renamed back; any failure there is
/// fatal, since the previous configuration could not be brought back. With
/// `restore` unset, backups are deleted best-effort: a leftover backup is
/// a nuisance, not data loss, so failures only produce a warning.
pub fn cleanup(tracker: &StepTracker, targets: &[PathBuf], restore: bool) -> Result<()> {
    tracker.start(targets.len() as u64);

    if restore {
        tracker.emit("Restoring backups...");

        for dir in targets {
            let saved = backup_path(dir);
            restore_one(dir, &saved)
                .map_err(|e| Error::Restore(format!("{}: {e}", dir.display())))?;
            tracker.emit(format!("{} -> {}", saved.display(), dir.display()));
            tracker.accumulate(1);
        }
    } else {
        tracker.emit("Cleaning up backups...");

        for dir in targets {
            let saved = backup_path(dir);
            tracker.emit(format!("Removing: {}", saved.display()));
            match remove_tree(&saved) {
                Ok(()) => tracker.accumulate(1),
                Err(e) => {
                    warn!(path = %saved.display(), error = %e, "failed to remove backup");
                    tracker.emit(e.to_string());
                }
            }
        }
    }

    Ok(())
}

fn restore_one(dir: &Path, saved: &Path) -> io::Result<()> {
    remove_tree(dir)?;
    fs::rename(saved, dir)
}

fn remove_tree(path: &Path) -> io::Result<()> {
    match fs::remove_dir_all(path) {
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        other => other,
    }
}

/// `P` backs up to the sibling `P_old`.
fn backup_path(dir: &Path) -> PathBuf {
    let mut name = dir.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push("_old");
    dir.with_file_name(name)
}
