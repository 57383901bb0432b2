use async_trait::async_trait;
use std::path::PathBuf;
use std::process::Stdio;
use tokio::process::Command;
use tracing::{debug, info};

use super::{FetchError, PointsFetcher};
use crate::snapshot::{parse_points, PlayerPoints};

/// Runs an external scraper command and reads the JSON dataset it writes.
///
/// The command runs through `sh -c` in `workdir`. The child is killed if the
/// fetch future is dropped, which is how the coordinator's timeout lands.
pub struct CommandFetcher {
    command: String,
    workdir: PathBuf,
    /// Dataset file the command writes, relative to `workdir` unless absolute
    output: PathBuf,
}

impl CommandFetcher {
    pub fn new(command: &str, workdir: impl Into<PathBuf>, output: impl Into<PathBuf>) -> Self {
        CommandFetcher {
            command: command.to_string(),
            workdir: workdir.into(),
            output: output.into(),
        }
    }

    fn output_path(&self) -> PathBuf {
        if self.output.is_absolute() {
            self.output.clone()
        } else {
            self.workdir.join(&self.output)
        }
    }
}

#[async_trait]
impl PointsFetcher for CommandFetcher {
    fn name(&self) -> &str {
        &self.command
    }

    async fn fetch_points(&self) -> Result<PlayerPoints, FetchError> {
        debug!("Running '{}' in {}", self.command, self.workdir.display());

        let output = Command::new("sh")
            .arg("-c")
            .arg(&self.command)
            .current_dir(&self.workdir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| FetchError::Failed(format!("failed to spawn '{}': {}", self.command, e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(FetchError::Failed(format!(
                "'{}' exited with {}: {}",
                self.command,
                output.status,
                stderr.trim()
            )));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        if !stdout.trim().is_empty() {
            info!("{}", stdout.trim());
        }

        let path = self.output_path();
        let raw = tokio::fs::read(&path).await.map_err(|e| {
            FetchError::OutputInvalid(format!("cannot read {}: {}", path.display(), e))
        })?;
        parse_points(&raw)
    }
}
