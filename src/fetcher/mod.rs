pub mod command;
pub mod feed;

pub use command::CommandFetcher;
pub use feed::FeedFetcher;

use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

use crate::snapshot::PlayerPoints;

/// Why a fetch produced no new dataset. None of these ever reach readers.
#[derive(Debug, Error)]
pub enum FetchError {
    /// External process/request error or non-zero exit status
    #[error("fetch failed: {0}")]
    Failed(String),

    #[error("fetch timed out after {0:?}")]
    TimedOut(Duration),

    /// The fetch finished but its result could not be parsed into a snapshot
    #[error("fetch output invalid: {0}")]
    OutputInvalid(String),
}

/// Trait that every player-points source must implement.
///
/// Implementations may take a long time and may fail; the refresh
/// coordinator applies the timeout and guarantees one call at a time.
#[async_trait]
pub trait PointsFetcher: Send + Sync {
    /// Produce a complete new dataset.
    async fn fetch_points(&self) -> Result<PlayerPoints, FetchError>;

    /// Human-readable name for logging.
    fn name(&self) -> &str;
}
