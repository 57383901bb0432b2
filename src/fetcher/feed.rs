use anyhow::Context;
use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;
use tracing::debug;

use super::{FetchError, PointsFetcher};
use crate::snapshot::PlayerPoints;

/// Player-points source backed by the competition's public `players.json` feed.
pub struct FeedFetcher {
    http: Client,
    url: String,
}

impl FeedFetcher {
    pub fn new(url: &str) -> anyhow::Result<Self> {
        let http = Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .context("Failed to build HTTP client")?;
        Ok(FeedFetcher {
            http,
            url: url.to_string(),
        })
    }
}

#[async_trait]
impl PointsFetcher for FeedFetcher {
    fn name(&self) -> &str {
        "players-feed"
    }

    async fn fetch_points(&self) -> Result<PlayerPoints, FetchError> {
        debug!("Fetching player feed from {}", self.url);

        let resp = self
            .http
            .get(&self.url)
            .send()
            .await
            .map_err(|e| FetchError::Failed(format!("feed request failed: {}", e)))?;

        if !resp.status().is_success() {
            return Err(FetchError::Failed(format!("feed error: {}", resp.status())));
        }

        let raw: Value = resp
            .json()
            .await
            .map_err(|e| FetchError::OutputInvalid(format!("feed is not JSON: {}", e)))?;

        parse_feed(&raw)
    }
}

/// Extract player → points from the feed's `players` array.
///
/// Field names vary between seasons, so each is looked up under several keys.
/// Players without a name are dropped. The first points key holding a non-zero,
/// non-empty value wins and missing points count as 0. A points value that is
/// not a finite number fails the whole feed so the previous dataset is kept.
pub fn parse_feed(raw: &Value) -> Result<PlayerPoints, FetchError> {
    let players: &[Value] = match raw.get("players") {
        Some(Value::Array(players)) => players.as_slice(),
        Some(_) => {
            return Err(FetchError::OutputInvalid(
                "'players' is not an array".to_string(),
            ))
        }
        None if raw.is_object() => &[],
        None => {
            return Err(FetchError::OutputInvalid(
                "feed root is not an object".to_string(),
            ))
        }
    };

    let mut points = PlayerPoints::new();
    for p in players {
        let name = ["fullname", "full_name", "name"]
            .iter()
            .filter_map(|k| p.get(*k).and_then(Value::as_str))
            .find(|s| !s.is_empty());
        let Some(name) = name else { continue };

        let mut value = 0.0;
        for key in ["points", "total_points", "fantasy_points"] {
            if let Some(v) = points_value(name, p.get(key))? {
                value = v;
                break;
            }
        }

        points.insert(name.to_string(), value);
    }
    Ok(points)
}

/// `Ok(None)` for absent, null, false, empty-string or numeric-zero values.
fn points_value(player: &str, v: Option<&Value>) -> Result<Option<f64>, FetchError> {
    let Some(v) = v else { return Ok(None) };
    let invalid =
        || FetchError::OutputInvalid(format!("points for '{}' is not a number: {}", player, v));

    let n = match v {
        Value::Null | Value::Bool(false) => return Ok(None),
        Value::String(s) if s.is_empty() => return Ok(None),
        Value::Number(n) => match n.as_f64() {
            Some(n) if n == 0.0 => return Ok(None),
            Some(n) => n,
            None => return Err(invalid()),
        },
        Value::String(s) => s.trim().parse::<f64>().map_err(|_| invalid())?,
        _ => return Err(invalid()),
    };
    if !n.is_finite() {
        return Err(invalid());
    }
    Ok(Some(n))
}
