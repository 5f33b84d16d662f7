//! Fetching generated assets onto local disk.

use anyhow::{Context, Result};
use async_trait::async_trait;
use std::path::Path;
use tokio::fs;
use tokio::process::Command;

#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Copies the asset at `uri` to `dest`. Either the whole file lands or
    /// the call fails.
    async fn download(&self, uri: &str, dest: &Path) -> Result<()>;
}

/// `gs://` URIs through `gsutil cp`; plain paths and `file://` URIs are
/// copied directly.
pub struct GsutilStore;

#[async_trait]
impl ObjectStore for GsutilStore {
    async fn download(&self, uri: &str, dest: &Path) -> Result<()> {
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Failed to create dir {}", parent.display()))?;
        }

        if !uri.starts_with("gs://") {
            let local = uri.strip_prefix("file://").unwrap_or(uri);
            fs::copy(local, dest)
                .await
                .with_context(|| format!("copy {} -> {}", local, dest.display()))?;
            return Ok(());
        }

        let output = Command::new("gsutil")
            .arg("cp")
            .arg(uri)
            .arg(dest)
            .output()
            .await
            .context("gsutil execution failed")?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(anyhow::anyhow!("gsutil cp {} failed: {}", uri, stderr.trim()));
        }

        if fs::metadata(dest).await.is_err() {
            anyhow::bail!("gsutil reported success but {} is missing", dest.display());
        }
        Ok(())
    }
}
