use clap::{Parser, ValueEnum};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use crate::refresh::RefreshPolicy;

/// Upper bound for every configured duration; larger values overflow `Instant`.
const MAX_DURATION_SECS: u64 = 365 * 24 * 60 * 60;

/// Where fresh player points come from
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum FetcherKind {
    /// Fetch the upstream players.json feed directly
    Feed,
    /// Run an external scraper command that writes a JSON file
    Command,
}

/// Fantasy points dashboard server
#[derive(Parser, Debug, Clone)]
#[command(name = "fantasy-points-server", version, about)]
pub struct Config {
    /// HTTP listen address
    #[arg(long, env = "LISTEN_ADDR", default_value = "0.0.0.0:3000")]
    pub listen_addr: String,

    /// Directory of static dashboard files served at /
    #[arg(long, env = "STATIC_DIR", default_value = "public")]
    pub static_dir: PathBuf,

    /// Where the last good dataset is persisted across restarts
    #[arg(long, env = "SNAPSHOT_PATH", default_value = "player-points.json")]
    pub snapshot_path: PathBuf,

    /// Player points source
    #[arg(long, env = "FETCHER", value_enum, default_value = "feed")]
    pub fetcher: FetcherKind,

    /// Upstream players feed (fetcher = feed)
    #[arg(
        long,
        env = "FEED_URL",
        default_value = "https://cricket-xi-data.s3.us-west-2.amazonaws.com/competitions/230/players.json"
    )]
    pub feed_url: String,

    /// Scraper command, run through `sh -c` (fetcher = command)
    #[arg(long, env = "FETCH_COMMAND", default_value = "python3 scraper.py")]
    pub fetch_command: String,

    /// Working directory for the scraper command
    #[arg(long, env = "FETCH_WORKDIR", default_value = ".")]
    pub fetch_workdir: PathBuf,

    /// JSON file the scraper command writes, relative to the working directory
    #[arg(long, env = "FETCH_OUTPUT", default_value = "player-points.json")]
    pub fetch_output: PathBuf,

    /// Give up on a fetch after this many seconds
    #[arg(long, env = "FETCH_TIMEOUT_SECS", default_value = "180")]
    pub fetch_timeout_secs: u64,

    /// Data older than this is stale for read-time refresh
    #[arg(long, env = "CACHE_TTL_SECS", default_value = "60")]
    pub cache_ttl_secs: u64,

    /// Background refresh period in seconds (default 6h)
    #[arg(long, env = "REFRESH_INTERVAL_SECS", default_value = "21600")]
    pub refresh_interval_secs: u64,

    /// Minimum seconds between a successful fetch and a manual refresh
    #[arg(long, env = "MANUAL_COOLDOWN_SECS", default_value = "1800")]
    pub manual_cooldown_secs: u64,

    /// Secret required by /api/refresh (manual refresh disabled when unset)
    #[arg(long, env = "REFRESH_SECRET", hide_env_values = true)]
    pub refresh_secret: Option<String>,

    /// Also refresh when a read finds stale data (default: timer only)
    #[arg(long, env = "REFRESH_ON_READ", default_value = "false")]
    pub refresh_on_read: bool,
}

impl Config {
    pub fn validate(&self) -> anyhow::Result<()> {
        self.listen_addr
            .parse::<SocketAddr>()
            .map_err(|e| anyhow::anyhow!("listen_addr '{}' is invalid: {}", self.listen_addr, e))?;

        if self.fetcher == FetcherKind::Feed {
            let url = url::Url::parse(&self.feed_url)
                .map_err(|e| anyhow::anyhow!("feed_url '{}' is invalid: {}", self.feed_url, e))?;
            if !matches!(url.scheme(), "http" | "https") {
                anyhow::bail!("feed_url must be http or https");
            }
        }
        if self.fetcher == FetcherKind::Command && self.fetch_command.trim().is_empty() {
            anyhow::bail!("fetch_command must not be empty");
        }
        for (name, secs) in [
            ("fetch_timeout_secs", self.fetch_timeout_secs),
            ("cache_ttl_secs", self.cache_ttl_secs),
            ("refresh_interval_secs", self.refresh_interval_secs),
        ] {
            if secs == 0 {
                anyhow::bail!("{} must be positive", name);
            }
        }
        for (name, secs) in [
            ("fetch_timeout_secs", self.fetch_timeout_secs),
            ("cache_ttl_secs", self.cache_ttl_secs),
            ("refresh_interval_secs", self.refresh_interval_secs),
            ("manual_cooldown_secs", self.manual_cooldown_secs),
        ] {
            if secs > MAX_DURATION_SECS {
                anyhow::bail!("{} must be at most {} (one year)", name, MAX_DURATION_SECS);
            }
        }
        if matches!(self.refresh_secret.as_deref(), Some(s) if s.is_empty()) {
            anyhow::bail!("refresh_secret must not be empty when set");
        }
        Ok(())
    }

    pub fn refresh_policy(&self) -> RefreshPolicy {
        RefreshPolicy {
            ttl: Duration::from_secs(self.cache_ttl_secs),
            manual_cooldown: Duration::from_secs(self.manual_cooldown_secs),
            fetch_timeout: Duration::from_secs(self.fetch_timeout_secs),
            refresh_on_read: self.refresh_on_read,
        }
    }

    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.refresh_interval_secs)
    }
}
