//! Immutable player-points snapshots and the lock-free store that serves them.
//!
//! A `Snapshot` is built once from a successful fetch and never mutated.
//! The `SnapshotStore` swaps whole snapshots atomically, so a reader holding
//! an `Arc<Snapshot>` always sees one complete dataset even while a refresh
//! replaces it.

pub mod persist;

pub use persist::SnapshotFile;

use arc_swap::ArcSwapOption;
use chrono::{DateTime, Utc};
use serde::ser::{Serialize, SerializeMap, Serializer};
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::fetcher::FetchError;

/// player name → fantasy points
pub type PlayerPoints = BTreeMap<String, f64>;

/// One complete, versioned copy of the dataset.
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    pub points: PlayerPoints,
    pub fetched_at: DateTime<Utc>,
    /// Monotonic per process, diagnostics only
    pub version: u64,
}

impl Snapshot {
    pub fn new(points: PlayerPoints, fetched_at: DateTime<Utc>, version: u64) -> Self {
        Snapshot {
            points,
            fetched_at,
            version,
        }
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }
}

/// Serializes player points highest first, ties by name; the order the
/// scraper writes its file in and the order API consumers rank by.
pub struct Ranked<'a>(pub &'a PlayerPoints);

impl Serialize for Ranked<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut entries: Vec<(&String, &f64)> = self.0.iter().collect();
        entries.sort_by(|a, b| b.1.total_cmp(a.1).then_with(|| a.0.cmp(b.0)));

        let mut map = serializer.serialize_map(Some(entries.len()))?;
        for (player, points) in entries {
            map.serialize_entry(player, points)?;
        }
        map.end()
    }
}

/// `serialize_with` adapter for `Ranked`.
pub fn serialize_ranked<S: Serializer>(
    points: &PlayerPoints,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    Ranked(points).serialize(serializer)
}

/// Holds the current snapshot. Readers never lock.
#[derive(Default)]
pub struct SnapshotStore {
    current: ArcSwapOption<Snapshot>,
}

impl SnapshotStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_snapshot(snapshot: Snapshot) -> Self {
        SnapshotStore {
            current: ArcSwapOption::from_pointee(snapshot),
        }
    }

    /// Current snapshot, or `None` if no fetch has ever completed.
    pub fn read(&self) -> Option<Arc<Snapshot>> {
        self.current.load_full()
    }

    /// Atomically replace the current snapshot.
    pub fn write(&self, snapshot: Snapshot) {
        self.current.store(Some(Arc::new(snapshot)));
    }
}

/// Parse the serialized dataset: a JSON object of player name → number.
///
/// Numbers must be finite. Any other shape is `FetchError::OutputInvalid`.
pub fn parse_points(raw: &[u8]) -> Result<PlayerPoints, FetchError> {
    let value: serde_json::Value = serde_json::from_slice(raw)
        .map_err(|e| FetchError::OutputInvalid(format!("not valid JSON: {}", e)))?;

    let obj = value.as_object().ok_or_else(|| {
        FetchError::OutputInvalid("expected a JSON object of player -> points".to_string())
    })?;

    let mut points = PlayerPoints::new();
    for (player, v) in obj {
        let n = v
            .as_f64()
            .filter(|n| n.is_finite())
            .ok_or_else(|| {
                FetchError::OutputInvalid(format!("points for '{}' is not a number: {}", player, v))
            })?;
        points.insert(player.clone(), n);
    }
    Ok(points)
}
