//! Import command implementations.

use anyhow::Result;
use confbox::Porter;
use std::path::PathBuf;
use std::sync::Arc;

/// Restore the configured targets from a local archive.
pub async fn run_import_file(porter: Arc<Porter>, archive: PathBuf) -> Result<()> {
    println!("Importing {}", archive.display());

    let worker = {
        let porter = porter.clone();
        tokio::spawn(async move { porter.import_from_file(archive).await })
    };

    super::drive(&porter, worker).await?;

    println!();
    println!("Import complete.");
    Ok(())
}

/// Download an archive and restore the configured targets from it.
pub async fn run_import_url(porter: Arc<Porter>, url: String) -> Result<()> {
    println!("Importing from {url}");

    let worker = {
        let porter = porter.clone();
        tokio::spawn(async move { porter.import_from_url(url).await })
    };

    super::drive(&porter, worker).await?;

    println!();
    println!("Import complete.");
    Ok(())
}
