use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};
use tracing::debug;

use super::{parse_points, PlayerPoints, Ranked};

/// On-disk copy of the last successful dataset, so a restart can serve
/// stale-but-valid data before the first refresh completes.
#[derive(Debug, Clone)]
pub struct SnapshotFile {
    path: PathBuf,
}

impl SnapshotFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        SnapshotFile { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the persisted dataset and the time it was written.
    ///
    /// Returns `Ok(None)` when no file exists yet.
    pub fn load(&self) -> Result<Option<(PlayerPoints, DateTime<Utc>)>> {
        if !self.path.exists() {
            return Ok(None);
        }
        let raw = std::fs::read(&self.path)
            .with_context(|| format!("Failed to read {}", self.path.display()))?;
        let points = parse_points(&raw)
            .with_context(|| format!("Invalid snapshot file {}", self.path.display()))?;

        let written_at = std::fs::metadata(&self.path)
            .and_then(|m| m.modified())
            .map(DateTime::<Utc>::from)
            .unwrap_or_else(|_| Utc::now());

        Ok(Some((points, written_at)))
    }

    /// Write the dataset atomically: temp file in the same directory, then rename.
    pub async fn save(&self, points: &PlayerPoints) -> Result<()> {
        let body =
            serde_json::to_vec_pretty(&Ranked(points)).context("Failed to serialize snapshot")?;

        let mut tmp = self.path.clone().into_os_string();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);

        tokio::fs::write(&tmp, &body)
            .await
            .with_context(|| format!("Failed to write {}", tmp.display()))?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .with_context(|| format!("Failed to move snapshot into {}", self.path.display()))?;

        debug!("Persisted {} players to {}", points.len(), self.path.display());
        Ok(())
    }
}
