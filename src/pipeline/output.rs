use std::path::Path;

use anyhow::{Context, Result};
use tokio::io::AsyncWriteExt;

use crate::pipeline::{batch::RunSummary, runner::PatientReport};

/// Writes one JSON line per (patient, event) record.
pub async fn write_records_ndjson(path: &Path, reports: &[PatientReport]) -> Result<usize> {
    ensure_parent_dir(path).await?;

    let mut buffer = Vec::new();
    let mut written = 0;
    for record in reports.iter().flat_map(|report| report.records.iter()) {
        serde_json::to_writer(&mut buffer, record).context("failed to encode output record")?;
        buffer.push(b'\n');
        written += 1;
    }

    let mut file = tokio::fs::File::create(path)
        .await
        .with_context(|| format!("failed to create {}", path.display()))?;
    file.write_all(&buffer)
        .await
        .with_context(|| format!("failed to write {}", path.display()))?;
    file.flush()
        .await
        .with_context(|| format!("failed to flush {}", path.display()))?;
    Ok(written)
}

pub async fn write_run_summary(path: &Path, summary: &RunSummary) -> Result<()> {
    ensure_parent_dir(path).await?;
    let body = serde_json::to_vec_pretty(summary).context("failed to encode run summary")?;
    tokio::fs::write(path, body)
        .await
        .with_context(|| format!("failed to write {}", path.display()))
}

async fn ensure_parent_dir(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent)
            .await
            .with_context(|| format!("failed to create directory {}", parent.display()))?;
    }
    Ok(())
}
