//! Export command implementation.

use anyhow::Result;
use confbox::Porter;
use std::path::PathBuf;
use std::sync::Arc;

/// Run the export pipeline and report the produced archive.
pub async fn run_export(porter: Arc<Porter>, output: PathBuf) -> Result<()> {
    println!("Exporting configured targets to {}", output.display());

    let worker = {
        let porter = porter.clone();
        tokio::spawn(async move { porter.export(output).await })
    };

    let archive = super::drive(&porter, worker).await?;

    println!();
    println!("Export complete: {}", archive.display());
    Ok(())
}
