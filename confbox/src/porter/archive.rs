//! Streaming archive container (pack/unpack).
//!
//! Directory trees are packed into a single `tar` archive behind a `zstd`
//! stream. Entry names are POSIX-style paths relative to the working root,
//! directory entries are stored explicitly so empty directories survive the
//! round-trip, and extraction re-checks every entry name against the
//! destination root before it touches disk.

use std::fs::{self, File};
use std::io::{self, BufReader, Write};
use std::path::{Component, Path, PathBuf};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::progress::{CountingWriter, StepTracker};
use crate::error::{Error, Result};

/// File name of the archive produced by an export.
pub const ARCHIVE_NAME: &str = "confbox.tar.zst";

const ZSTD_LEVEL: i32 = 3;

/// Pack `sources` (paths relative to `root`) into a compressed archive
/// under `dest`, returning the archive path.
///
/// The walk is depth-first with directories before their children and
/// lexically ordered siblings, so output is reproducible. The cancellation
/// token is checked once per entry.
pub fn pack(
    root: &Path,
    dest: &Path,
    sources: &[PathBuf],
    tracker: &StepTracker,
    cancel: &CancellationToken,
) -> Result<PathBuf> {
    // Best-effort sizing; unreadable subtrees simply don't count.
    let mut total = 0u64;
    for source in sources {
        if let Ok(size) = tree_size(&root.join(source)) {
            total += size;
        }
    }
    tracker.start(total);

    let archive_path = dest.join(ARCHIVE_NAME);
    let file = File::create(&archive_path)?;
    let encoder = zstd::stream::Encoder::new(file, ZSTD_LEVEL)?;
    let mut builder = tar::Builder::new(encoder);

    for source in sources {
        append_tree(&mut builder, root, source, tracker, cancel)?;
    }

    let encoder = builder.into_inner()?;
    encoder.finish()?;

    tracker.emit(format!(
        "All files were packed into: {}",
        archive_path.display()
    ));
    Ok(archive_path)
}

/// Extract an archive into `dest`, creating it if needed.
///
/// Every entry name is re-joined against the destination root and rejected
/// unless the resolved path stays strictly inside it (zip-slip defense).
/// Cancellation mid-extraction leaves a partial tree behind; rolling that
/// back is the caller's job.
pub fn unpack(
    origin: &Path,
    dest: &Path,
    tracker: &StepTracker,
    cancel: &CancellationToken,
) -> Result<()> {
    // First pass sums the recorded entry sizes so the tracker has a total.
    let mut total = 0u64;
    let mut archive = open_archive(origin)?;
    for entry in archive.entries()? {
        total += entry?.header().size()?;
    }
    tracker.start(total);

    fs::create_dir_all(dest)?;
    let dest = dest.canonicalize()?;

    let mut archive = open_archive(origin)?;
    for entry in archive.entries()? {
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }

        let mut entry = entry?;
        let name = entry.path()?.to_path_buf();
        let target = contained_join(&dest, &name)?;

        tracker.emit(format!("Unpacking: {}", name.display()));

        let kind = entry.header().entry_type();
        if kind.is_dir() {
            fs::create_dir_all(&target)?;
            set_mode(&target, entry.header().mode().ok());
        } else if kind.is_file() {
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent)?;
            }
            let file = File::create(&target)?;
            let mut sink = CountingWriter::new(file, tracker);
            io::copy(&mut entry, &mut sink)?;
            sink.flush()?;
            set_mode(&target, entry.header().mode().ok());
        } else {
            debug!(entry = %name.display(), ?kind, "skipping unsupported archive entry");
        }
    }

    Ok(())
}

/// Append one tree node (and, for directories, its children) to the
/// archive under its root-relative name.
fn append_tree<W: Write>(
    builder: &mut tar::Builder<W>,
    root: &Path,
    relative: &Path,
    tracker: &StepTracker,
    cancel: &CancellationToken,
) -> Result<()> {
    if cancel.is_cancelled() {
        return Err(Error::Cancelled);
    }

    let absolute = root.join(relative);
    let metadata = fs::metadata(&absolute)?;

    tracker.emit(format!("Packing: {}", relative.display()));

    if metadata.is_dir() {
        builder.append_dir(relative, &absolute)?;
        tracker.accumulate(metadata.len());

        let mut entries = fs::read_dir(&absolute)?.collect::<io::Result<Vec<_>>>()?;
        entries.sort_by_key(|entry| entry.file_name());

        for entry in entries {
            append_tree(builder, root, &relative.join(entry.file_name()), tracker, cancel)?;
        }
    } else {
        let mut file = File::open(&absolute)?;
        builder.append_file(relative, &mut file)?;
        tracker.accumulate(metadata.len());
    }

    Ok(())
}

fn open_archive(path: &Path) -> Result<tar::Archive<zstd::stream::Decoder<'static, BufReader<File>>>> {
    let file = File::open(path)?;
    let decoder = zstd::stream::Decoder::new(file)?;
    Ok(tar::Archive::new(decoder))
}

/// Join an entry name onto the destination root, refusing any component
/// that could climb out of it.
fn contained_join(dest: &Path, name: &Path) -> Result<PathBuf> {
    let mut target = dest.to_path_buf();
    for component in name.components() {
        match component {
            Component::Normal(part) => target.push(part),
            Component::CurDir => {}
            _ => return Err(Error::IllegalPath(name.display().to_string())),
        }
    }
    Ok(target)
}

/// Total on-disk size of a tree, directories included. Unreadable children
/// are skipped rather than aborting the sum.
fn tree_size(path: &Path) -> io::Result<u64> {
    let metadata = fs::metadata(path)?;
    let mut total = metadata.len();

    if metadata.is_dir() {
        for entry in fs::read_dir(path)? {
            let Ok(entry) = entry else { continue };
            total += tree_size(&entry.path()).unwrap_or(0);
        }
    }

    Ok(total)
}

#[cfg(unix)]
fn set_mode(path: &Path, mode: Option<u32>) {
    use std::os::unix::fs::PermissionsExt;
    if let Some(mode) = mode {
        let _ = fs::set_permissions(path, fs::Permissions::from_mode(mode));
    }
}

#[cfg(not(unix))]
fn set_mode(_path: &Path, _mode: Option<u32>) {}
