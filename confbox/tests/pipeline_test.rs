//! Integration tests for the export/import pipelines.
//!
//! Verifies:
//! - export produces a complete archive and a completed aggregate status
//! - import round-trips the target directories byte-for-byte
//! - a corrupt archive leaves the original targets untouched (restored)
//! - entries escaping the destination root are rejected
//! - import-from-url restores backups on failure and works end to end

use confbox::porter::archive::ARCHIVE_NAME;
use confbox::porter::progress::Status;
use confbox::{Config, Error, Porter};
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn setup(message_capacity: usize) -> (TempDir, Config) {
    let temp = TempDir::new().unwrap();
    let root = temp.path().join("root");

    fs::create_dir_all(root.join("conf/nested")).unwrap();
    fs::create_dir_all(root.join("conf/empty")).unwrap();
    fs::create_dir_all(root.join("drivers")).unwrap();
    fs::write(root.join("conf/app.toml"), "theme = \"dark\"\n").unwrap();
    fs::write(root.join("conf/nested/keys.json"), "{\"a\":1}").unwrap();
    fs::write(root.join("drivers/display.inf"), "display driver payload").unwrap();

    let config = Config {
        root_dir: root,
        targets: vec![PathBuf::from("conf"), PathBuf::from("drivers")],
        message_capacity,
    };
    (temp, config)
}

/// Relative path -> file bytes (None for directories), for whole-tree
/// equality checks.
fn tree_map(root: &Path) -> BTreeMap<PathBuf, Option<Vec<u8>>> {
    fn walk(base: &Path, dir: &Path, out: &mut BTreeMap<PathBuf, Option<Vec<u8>>>) {
        for entry in fs::read_dir(dir).unwrap() {
            let entry = entry.unwrap();
            let path = entry.path();
            let relative = path.strip_prefix(base).unwrap().to_path_buf();
            if path.is_dir() {
                out.insert(relative, None);
                walk(base, &path, out);
            } else {
                out.insert(relative, Some(fs::read(&path).unwrap()));
            }
        }
    }

    let mut out = BTreeMap::new();
    walk(root, root, &mut out);
    out
}

fn targets_map(config: &Config) -> BTreeMap<PathBuf, Option<Vec<u8>>> {
    let mut out = BTreeMap::new();
    for target in &config.targets {
        let dir = config.resolve(target);
        out.insert(target.clone(), None);
        for (path, bytes) in tree_map(&dir) {
            out.insert(target.join(path), bytes);
        }
    }
    out
}

async fn export_archive(config: &Config, dest: &Path) -> PathBuf {
    fs::create_dir_all(dest).unwrap();
    let porter = Porter::new(config);
    porter.export(dest).await.unwrap()
}

/// Serve `payload` once over plain HTTP on an ephemeral port.
async fn serve_once(payload: Vec<u8>) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        let mut request = [0u8; 2048];
        let _ = socket.read(&mut request).await;

        let header = format!(
            "HTTP/1.1 200 OK\r\ncontent-length: {}\r\nconnection: close\r\n\r\n",
            payload.len()
        );
        socket.write_all(header.as_bytes()).await.unwrap();
        socket.write_all(&payload).await.unwrap();
        let _ = socket.shutdown().await;
    });

    format!("http://{addr}/{ARCHIVE_NAME}")
}

// =========================================================================
// Export
// =========================================================================

#[tokio::test]
async fn test_export_pipeline_completes() {
    let (temp, config) = setup(512);
    let dest = temp.path().join("out");
    fs::create_dir_all(&dest).unwrap();

    let porter = Porter::new(&config);
    let archive = porter.export(&dest).await.unwrap();

    assert_eq!(archive, dest.join(ARCHIVE_NAME));
    assert!(archive.is_file());
    assert_eq!(porter.status(), Status::Completed);

    let report = porter.poll_progress().unwrap();
    assert_eq!(report.status, Status::Completed);
    assert_eq!(report.tasks.len(), 2);
    assert_eq!(report.tasks[0].name, "initialisation");
    assert_eq!(report.tasks[1].name, "compression");
    for task in &report.tasks {
        assert_eq!(task.status, Status::Completed);
        assert_eq!(task.current, task.total);
    }
    assert!(
        report
            .messages
            .iter()
            .any(|m| m.contains("All files were packed into")),
        "messages: {:?}",
        report.messages
    );
}

#[tokio::test]
async fn test_poll_progress_drains_backlog_once() {
    let (temp, config) = setup(512);
    let dest = temp.path().join("out");
    fs::create_dir_all(&dest).unwrap();

    let porter = Porter::new(&config);
    porter.export(&dest).await.unwrap();

    let first = porter.poll_progress().unwrap();
    assert!(!first.messages.is_empty());

    let second = porter.poll_progress().unwrap();
    assert!(second.messages.is_empty(), "backlog must not repeat");
    assert_eq!(second.tasks, first.tasks, "snapshots unchanged with no activity");
}

#[tokio::test]
async fn test_export_fails_on_foreign_absolute_target() {
    let (temp, mut config) = setup(512);
    config.targets.push(PathBuf::from("/etc"));
    let dest = temp.path().join("out");
    fs::create_dir_all(&dest).unwrap();

    let porter = Porter::new(&config);
    let err = porter.export(&dest).await.unwrap_err();
    assert!(matches!(err, Error::Export(_)), "got: {err}");
    assert_eq!(porter.status(), Status::Failed);

    let report = porter.poll_progress().unwrap();
    assert_eq!(report.tasks[0].status, Status::Failed);
    assert_eq!(report.tasks[1].status, Status::Skipped);
}

// =========================================================================
// Import from file
// =========================================================================

#[tokio::test]
async fn test_import_round_trips_targets() {
    let (temp, config) = setup(512);
    let archive = export_archive(&config, &temp.path().join("out")).await;
    let exported = targets_map(&config);

    // Drift the live tree after the export.
    fs::write(config.root_dir.join("conf/app.toml"), "theme = \"light\"\n").unwrap();
    fs::write(config.root_dir.join("conf/extra.txt"), "junk").unwrap();

    let porter = Porter::new(&config);
    porter.import_from_file(&archive).await.unwrap();

    assert_eq!(porter.status(), Status::Completed);
    assert_eq!(targets_map(&config), exported, "import restores the exported state");
    assert!(
        !config.root_dir.join("conf_old").exists(),
        "backups are removed after a successful import"
    );
    assert!(!config.root_dir.join("drivers_old").exists());
}

#[tokio::test]
async fn test_import_corrupt_archive_restores_targets() {
    let (temp, config) = setup(512);
    let bad = temp.path().join("bad.tar.zst");
    fs::write(&bad, b"this is not a zstd stream").unwrap();

    let before = targets_map(&config);
    let porter = Porter::new(&config);
    let result = porter.import_from_file(&bad).await;

    assert!(result.is_err());
    assert_eq!(porter.status(), Status::Failed);
    assert_eq!(targets_map(&config), before, "targets must be exactly as before");

    let report = porter.poll_progress().unwrap();
    assert_eq!(report.tasks[0].status, Status::Completed); // backup
    assert_eq!(report.tasks[1].status, Status::Failed); // decompression
    assert_eq!(report.tasks[2].status, Status::Completed); // cleanup (restore)
}

#[tokio::test]
async fn test_import_rejects_entry_escaping_root() {
    let (temp, config) = setup(512);

    // Archive with an entry that climbs out of the destination root.
    let evil = temp.path().join("evil.tar.zst");
    {
        let file = File::create(&evil).unwrap();
        let encoder = zstd::stream::Encoder::new(file, 3).unwrap();
        let mut builder = tar::Builder::new(encoder);

        let payload = b"boom";
        let mut header = tar::Header::new_gnu();
        let name = b"../evil.txt";
        header.as_old_mut().name[..name.len()].copy_from_slice(name);
        header.set_size(payload.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        builder.append(&header, &payload[..]).unwrap();
        builder.into_inner().unwrap().finish().unwrap();
    }

    let before = targets_map(&config);
    let porter = Porter::new(&config);
    let err = porter.import_from_file(&evil).await.unwrap_err();

    assert!(matches!(err, Error::IllegalPath(_)), "got: {err}");
    assert!(
        !temp.path().join("evil.txt").exists(),
        "no file may land outside the destination root"
    );
    assert_eq!(targets_map(&config), before);
    assert_eq!(porter.status(), Status::Failed);
}

#[tokio::test]
async fn test_import_missing_backup_target_short_circuits() {
    let (temp, config) = setup(512);
    fs::remove_dir_all(config.root_dir.join("drivers")).unwrap();

    let archive = temp.path().join("whatever.tar.zst");
    fs::write(&archive, b"never read").unwrap();

    let porter = Porter::new(&config);
    let result = porter.import_from_file(&archive).await;
    assert!(result.is_err());

    let report = porter.poll_progress().unwrap();
    assert_eq!(report.tasks[0].status, Status::Failed); // backup
    assert_eq!(report.tasks[1].status, Status::Skipped); // decompression never ran
    assert_eq!(report.tasks[2].status, Status::Skipped); // nothing to clean up
}

// =========================================================================
// Import from URL
// =========================================================================

#[tokio::test]
async fn test_import_from_url_round_trips_targets() {
    let (temp, config) = setup(512);
    let archive = export_archive(&config, &temp.path().join("out")).await;
    let exported = targets_map(&config);

    fs::write(config.root_dir.join("conf/app.toml"), "drifted").unwrap();

    let url = serve_once(fs::read(&archive).unwrap()).await;
    let porter = Porter::new(&config);
    porter.import_from_url(url).await.unwrap();

    assert_eq!(porter.status(), Status::Completed);
    assert_eq!(targets_map(&config), exported);

    let report = porter.poll_progress().unwrap();
    let names: Vec<_> = report.tasks.iter().map(|t| t.name.as_str()).collect();
    assert_eq!(names, ["backup", "download", "decompression", "cleanup"]);
}

#[tokio::test]
async fn test_import_from_url_failure_restores_backups() {
    let (_temp, config) = setup(512);
    let before = targets_map(&config);

    // Nothing listens on the discard port; the GET fails outright.
    let porter = Porter::new(&config);
    let result = porter
        .import_from_url("http://127.0.0.1:9/confbox.tar.zst")
        .await;

    assert!(result.is_err());
    assert_eq!(porter.status(), Status::Failed);
    assert_eq!(targets_map(&config), before, "backups restored after failed download");

    let report = porter.poll_progress().unwrap();
    assert_eq!(report.tasks[0].status, Status::Completed); // backup
    assert_eq!(report.tasks[1].status, Status::Failed); // download
    assert_eq!(report.tasks[2].status, Status::Skipped); // decompression
    assert_eq!(report.tasks[3].status, Status::Completed); // cleanup (restore)
}
