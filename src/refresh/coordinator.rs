//! Single-flight refresh coordinator.
//!
//! Owns the snapshot store and the refresh bookkeeping. Every trigger source
//! (startup, the scheduled timer, read-time TTL checks and manual requests)
//! goes through `ensure_fresh`, which decides synchronously whether to start
//! a fetch and never waits for one. The fetch itself runs in a spawned task
//! under a timeout; whatever happens to it, the in-flight flag is cleared
//! when that task ends and the previous snapshot survives a failure.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::fetcher::{FetchError, PointsFetcher};
use crate::snapshot::{PlayerPoints, Snapshot, SnapshotFile, SnapshotStore};

/// Who is asking for fresh data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Trigger {
    Startup,
    Scheduled,
    /// Read-time staleness check
    PassiveTtl,
    /// On-demand refresh, must present the configured secret
    Manual { credential: Option<String> },
}

impl Trigger {
    pub fn label(&self) -> &'static str {
        match self {
            Trigger::Startup => "startup",
            Trigger::Scheduled => "scheduled",
            Trigger::PassiveTtl => "passive-ttl",
            Trigger::Manual { .. } => "manual",
        }
    }
}

impl fmt::Display for Trigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// Snapshot is younger than the TTL
    Fresh,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::Fresh => f.write_str("fresh"),
        }
    }
}

/// Result of asking the coordinator for fresh data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefreshOutcome {
    Started,
    AlreadyInFlight,
    Skipped(SkipReason),
    /// Manual request inside the cooldown window; whole minutes, rounded up
    RateLimited { retry_after: Duration },
    Unauthorized,
}

/// Timing knobs for the refresh policy.
#[derive(Debug, Clone, Copy)]
pub struct RefreshPolicy {
    /// Max snapshot age before a passive trigger refreshes
    pub ttl: Duration,
    /// Min spacing between a successful fetch and the next manual one
    pub manual_cooldown: Duration,
    pub fetch_timeout: Duration,
    /// Whether `current_data` also fires a passive TTL trigger
    pub refresh_on_read: bool,
}

impl Default for RefreshPolicy {
    fn default() -> Self {
        RefreshPolicy {
            ttl: Duration::from_secs(60),
            manual_cooldown: Duration::from_secs(30 * 60),
            fetch_timeout: Duration::from_secs(180),
            refresh_on_read: false,
        }
    }
}

#[derive(Debug, Default)]
struct CoordinatorState {
    fetch_in_flight: bool,
    last_attempt_started_at: Option<DateTime<Utc>>,
    /// Always the `fetched_at` of the snapshot in the store
    last_success_at: Option<DateTime<Utc>>,
    /// Monotonic twin of `last_success_at`; TTL and cooldown are measured on it
    last_success_mono: Option<Instant>,
    version: u64,
    last_error: Option<String>,
    last_error_at: Option<DateTime<Utc>>,
}

/// Point-in-time view of the coordinator for diagnostics.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshStatus {
    pub refreshing: bool,
    pub version: u64,
    pub last_attempt_started_at: Option<DateTime<Utc>>,
    pub last_success_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub last_error_at: Option<DateTime<Utc>>,
}

struct Inner {
    store: SnapshotStore,
    state: Mutex<CoordinatorState>,
    fetcher: Arc<dyn PointsFetcher>,
    policy: RefreshPolicy,
    secret: Option<String>,
    snapshot_file: Option<SnapshotFile>,
}

impl Inner {
    fn state(&self) -> MutexGuard<'_, CoordinatorState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Cheap to clone; all clones share one store and one in-flight flag.
#[derive(Clone)]
pub struct RefreshCoordinator {
    inner: Arc<Inner>,
}

impl RefreshCoordinator {
    /// Build the coordinator, preloading the persisted snapshot if there is one.
    ///
    /// A missing or unreadable snapshot file means a cold start.
    pub fn new(
        fetcher: Arc<dyn PointsFetcher>,
        policy: RefreshPolicy,
        secret: Option<String>,
        snapshot_file: Option<SnapshotFile>,
    ) -> Self {
        let loaded = match &snapshot_file {
            Some(file) => match file.load() {
                Ok(Some(found)) => {
                    info!("Loaded {} players from {}", found.0.len(), file.path().display());
                    Some(found)
                }
                Ok(None) => {
                    info!("No existing player data at {}", file.path().display());
                    None
                }
                Err(e) => {
                    warn!("Ignoring persisted player data: {:#}", e);
                    None
                }
            },
            None => None,
        };

        let mut state = CoordinatorState::default();
        let store = match loaded {
            Some((points, written_at)) => {
                let age = (Utc::now() - written_at).to_std().unwrap_or(Duration::ZERO);
                state.version = 1;
                state.last_success_at = Some(written_at);
                state.last_success_mono =
                    Some(Instant::now().checked_sub(age).unwrap_or_else(Instant::now));
                SnapshotStore::with_snapshot(Snapshot::new(points, written_at, 1))
            }
            None => SnapshotStore::new(),
        };

        RefreshCoordinator {
            inner: Arc::new(Inner {
                store,
                state: Mutex::new(state),
                fetcher,
                policy,
                secret,
                snapshot_file,
            }),
        }
    }

    /// Ask for fresh data. Returns immediately; a started fetch runs in the background.
    ///
    /// Must be called from within a tokio runtime.
    pub fn ensure_fresh(&self, trigger: Trigger) -> RefreshOutcome {
        self.ensure_fresh_at(trigger, Instant::now())
    }

    fn ensure_fresh_at(&self, trigger: Trigger, now: Instant) -> RefreshOutcome {
        let mut state = self.inner.state();

        if let Some(refusal) = self.refusal(&state, &trigger, now) {
            debug!("Refresh ({}) not started: {:?}", trigger, refusal);
            return refusal;
        }

        state.fetch_in_flight = true;
        state.last_attempt_started_at = Some(Utc::now());
        drop(state);

        info!("Starting refresh via {} ({})", self.inner.fetcher.name(), trigger);
        self.spawn_fetch();
        RefreshOutcome::Started
    }

    /// Decision policy. `None` means go ahead.
    fn refusal(
        &self,
        state: &CoordinatorState,
        trigger: &Trigger,
        now: Instant,
    ) -> Option<RefreshOutcome> {
        if state.fetch_in_flight {
            return Some(RefreshOutcome::AlreadyInFlight);
        }

        match trigger {
            Trigger::Manual { credential } => {
                if !self.authorized(credential.as_deref()) {
                    return Some(RefreshOutcome::Unauthorized);
                }
                // Never rate-limited before the first success
                let elapsed = now.saturating_duration_since(state.last_success_mono?);
                let cooldown = self.inner.policy.manual_cooldown;
                if elapsed < cooldown {
                    return Some(RefreshOutcome::RateLimited {
                        retry_after: round_up_to_minutes(cooldown - elapsed),
                    });
                }
                None
            }
            Trigger::PassiveTtl => {
                match state.last_success_mono {
                    Some(last) if now.saturating_duration_since(last) <= self.inner.policy.ttl => {
                        Some(RefreshOutcome::Skipped(SkipReason::Fresh))
                    }
                    _ => None,
                }
            }
            Trigger::Startup | Trigger::Scheduled => None,
        }
    }

    fn authorized(&self, credential: Option<&str>) -> bool {
        match (self.inner.secret.as_deref(), credential) {
            (Some(secret), Some(given)) => constant_time_eq(secret.as_bytes(), given.as_bytes()),
            _ => false,
        }
    }

    fn spawn_fetch(&self) {
        let this = self.clone();
        let guard = InFlightGuard {
            inner: Arc::clone(&self.inner),
        };

        tokio::spawn(async move {
            let _guard = guard;
            let started = Instant::now();
            let timeout = this.inner.policy.fetch_timeout;

            let result = match tokio::time::timeout(timeout, this.inner.fetcher.fetch_points()).await
            {
                Ok(result) => result,
                Err(_) => Err(FetchError::TimedOut(timeout)),
            };

            match result {
                Ok(points) => this.on_success(points, started).await,
                Err(e) => this.on_failure(e, started),
            }
        });
    }

    async fn on_success(&self, points: PlayerPoints, started: Instant) {
        let now = Utc::now();
        let snapshot = {
            let mut state = self.inner.state();
            state.version += 1;
            self.inner
                .store
                .write(Snapshot::new(points, now, state.version));
            state.last_success_at = Some(now);
            state.last_success_mono = Some(Instant::now());
            self.inner.store.read()
        };

        let Some(snapshot) = snapshot else { return };
        if snapshot.is_empty() {
            warn!("Refresh returned no players");
        }
        info!(
            "Refresh finished: {} players loaded (version {}, {:.1}s)",
            snapshot.len(),
            snapshot.version,
            started.elapsed().as_secs_f64()
        );

        if let Some(file) = &self.inner.snapshot_file {
            if let Err(e) = file.save(&snapshot.points).await {
                warn!("Failed to persist player data: {:#}", e);
            }
        }
    }

    fn on_failure(&self, err: FetchError, started: Instant) {
        warn!(
            "Refresh failed after {:.1}s, keeping previous data: {}",
            started.elapsed().as_secs_f64(),
            err
        );
        let mut state = self.inner.state();
        state.last_error = Some(err.to_string());
        state.last_error_at = Some(Utc::now());
    }

    /// Best available snapshot. Never waits on a fetch.
    ///
    /// With `refresh_on_read` a stale snapshot also fires a passive trigger.
    pub fn current_data(&self) -> Option<Arc<Snapshot>> {
        if self.inner.policy.refresh_on_read {
            self.ensure_fresh(Trigger::PassiveTtl);
        }
        self.inner.store.read()
    }

    pub fn is_refreshing(&self) -> bool {
        self.inner.state().fetch_in_flight
    }

    pub fn status(&self) -> RefreshStatus {
        let state = self.inner.state();
        RefreshStatus {
            refreshing: state.fetch_in_flight,
            version: state.version,
            last_attempt_started_at: state.last_attempt_started_at,
            last_success_at: state.last_success_at,
            last_error: state.last_error.clone(),
            last_error_at: state.last_error_at,
        }
    }
}

/// Clears the in-flight flag when the fetch task ends, however it ends.
struct InFlightGuard {
    inner: Arc<Inner>,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.inner.state().fetch_in_flight = false;
    }
}

fn round_up_to_minutes(d: Duration) -> Duration {
    let secs = d.as_secs() + u64::from(d.subsec_nanos() > 0);
    Duration::from_secs(secs.div_ceil(60).max(1) * 60)
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetcher::testing::{points, ScriptedFetcher, Step};
    use chrono::Duration as ChronoDuration;
    use tokio::sync::Semaphore;
    use tokio::task::JoinSet;

    const SECRET: &str = "let-me-in";

    fn coordinator(fetcher: Arc<ScriptedFetcher>) -> RefreshCoordinator {
        RefreshCoordinator::new(fetcher, RefreshPolicy::default(), Some(SECRET.to_string()), None)
    }

    fn manual(credential: &str) -> Trigger {
        Trigger::Manual {
            credential: Some(credential.to_string()),
        }
    }

    async fn settle(c: &RefreshCoordinator) {
        for _ in 0..2000 {
            if !c.is_refreshing() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("fetch never settled");
    }

    /// Run one successful startup fetch and return its completion time.
    async fn warm(c: &RefreshCoordinator) -> Instant {
        assert_eq!(c.ensure_fresh(Trigger::Startup), RefreshOutcome::Started);
        settle(c).await;
        c.inner
            .state()
            .last_success_mono
            .expect("warm-up fetch should succeed")
    }

    #[tokio::test]
    async fn test_cold_start_then_startup_fetch() {
        let fetcher = Arc::new(ScriptedFetcher::new(vec![Step::Ok(points(&[
            ("p1", 42.0),
            ("p2", 17.0),
        ]))]));
        let c = coordinator(fetcher.clone());

        assert!(c.current_data().is_none());
        assert_eq!(c.ensure_fresh(Trigger::Startup), RefreshOutcome::Started);
        settle(&c).await;

        let snap = c.current_data().unwrap();
        assert_eq!(snap.len(), 2);
        assert_eq!(snap.points.get("p1"), Some(&42.0));
        assert_eq!(snap.points.get("p2"), Some(&17.0));
        assert_eq!(snap.version, 1);
        assert_eq!(c.status().last_success_at, Some(snap.fetched_at));
        assert_eq!(fetcher.calls(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_single_flight_under_concurrent_triggers() {
        let gate = Arc::new(Semaphore::new(0));
        let fetcher = Arc::new(
            ScriptedFetcher::new(vec![Step::Ok(points(&[("p1", 1.0)]))]).gated(gate.clone()),
        );
        let c = coordinator(fetcher.clone());

        assert_eq!(c.ensure_fresh(Trigger::Startup), RefreshOutcome::Started);

        let mut set = JoinSet::new();
        for i in 0..32 {
            let c = c.clone();
            set.spawn(async move {
                let trigger = match i % 4 {
                    0 => Trigger::Startup,
                    1 => Trigger::Scheduled,
                    2 => Trigger::PassiveTtl,
                    _ => manual(SECRET),
                };
                c.ensure_fresh(trigger)
            });
        }
        while let Some(outcome) = set.join_next().await {
            assert_eq!(outcome.unwrap(), RefreshOutcome::AlreadyInFlight);
        }
        assert!(c.is_refreshing());

        gate.add_permits(1);
        settle(&c).await;

        assert_eq!(fetcher.calls(), 1);
        assert_eq!(fetcher.max_active(), 1);
        assert_eq!(c.current_data().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_failed_fetch_keeps_previous_snapshot() {
        let fetcher = Arc::new(ScriptedFetcher::new(vec![
            Step::Ok(points(&[("p1", 42.0)])),
            Step::Fail,
        ]));
        let c = coordinator(fetcher.clone());
        warm(&c).await;
        let before = c.current_data().unwrap();

        assert_eq!(c.ensure_fresh(Trigger::Scheduled), RefreshOutcome::Started);
        settle(&c).await;

        let after = c.current_data().unwrap();
        assert_eq!(*after, *before);
        let status = c.status();
        assert!(!status.refreshing);
        assert_eq!(status.version, 1);
        assert!(status.last_error.unwrap().contains("scripted failure"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_counts_as_failure_and_clears_flag() {
        let fetcher = Arc::new(ScriptedFetcher::new(vec![Step::Hang, Step::Ok(points(&[("p1", 3.0)]))]));
        let policy = RefreshPolicy {
            fetch_timeout: Duration::from_secs(2),
            ..RefreshPolicy::default()
        };
        let c = RefreshCoordinator::new(fetcher.clone(), policy, None, None);

        assert_eq!(c.ensure_fresh(Trigger::Startup), RefreshOutcome::Started);
        settle(&c).await;

        assert!(c.current_data().is_none());
        assert!(c.status().last_error.unwrap().contains("timed out"));

        // Re-triggerable after the timeout
        assert_eq!(c.ensure_fresh(Trigger::Scheduled), RefreshOutcome::Started);
        settle(&c).await;
        assert_eq!(c.current_data().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_passive_ttl_gating() {
        let fetcher = Arc::new(ScriptedFetcher::new(vec![
            Step::Ok(points(&[("p1", 1.0)])),
            Step::Ok(points(&[("p1", 2.0)])),
        ]));
        let c = coordinator(fetcher.clone());
        let t0 = warm(&c).await;

        assert_eq!(
            c.ensure_fresh_at(Trigger::PassiveTtl, t0 + Duration::from_secs(30)),
            RefreshOutcome::Skipped(SkipReason::Fresh)
        );
        assert_eq!(
            c.ensure_fresh_at(Trigger::PassiveTtl, t0 + Duration::from_secs(60)),
            RefreshOutcome::Skipped(SkipReason::Fresh)
        );
        assert_eq!(
            c.ensure_fresh_at(Trigger::PassiveTtl, t0 + Duration::from_secs(61)),
            RefreshOutcome::Started
        );
        settle(&c).await;
        assert_eq!(fetcher.calls(), 2);
    }

    #[tokio::test]
    async fn test_passive_ttl_starts_when_no_snapshot() {
        let fetcher = Arc::new(ScriptedFetcher::new(vec![Step::Ok(points(&[("p1", 1.0)]))]));
        let c = coordinator(fetcher);
        assert_eq!(c.ensure_fresh(Trigger::PassiveTtl), RefreshOutcome::Started);
        settle(&c).await;
    }

    #[tokio::test]
    async fn test_manual_rate_limit_measured_from_last_success() {
        let fetcher = Arc::new(ScriptedFetcher::new(vec![
            Step::Ok(points(&[("p1", 1.0)])),
            Step::Ok(points(&[("p1", 2.0)])),
        ]));
        let c = coordinator(fetcher.clone());
        let t0 = warm(&c).await;

        assert_eq!(
            c.ensure_fresh_at(manual(SECRET), t0 + Duration::from_secs(10 * 60)),
            RefreshOutcome::RateLimited {
                retry_after: Duration::from_secs(20 * 60)
            }
        );
        // 19m59s left rounds up to 20
        assert_eq!(
            c.ensure_fresh_at(manual(SECRET), t0 + Duration::from_secs(10 * 60 + 1)),
            RefreshOutcome::RateLimited {
                retry_after: Duration::from_secs(20 * 60)
            }
        );
        // Under a minute left still asks for one
        assert_eq!(
            c.ensure_fresh_at(manual(SECRET), t0 + Duration::from_secs(29 * 60 + 50)),
            RefreshOutcome::RateLimited {
                retry_after: Duration::from_secs(60)
            }
        );
        assert!(!c.is_refreshing());

        assert_eq!(
            c.ensure_fresh_at(manual(SECRET), t0 + Duration::from_secs(31 * 60)),
            RefreshOutcome::Started
        );
        settle(&c).await;
        assert_eq!(fetcher.calls(), 2);
    }

    /// A failed attempt must not restart the cooldown window.
    #[tokio::test]
    async fn test_failed_fetch_does_not_move_cooldown() {
        let fetcher = Arc::new(ScriptedFetcher::new(vec![
            Step::Ok(points(&[("p1", 1.0)])),
            Step::Fail,
        ]));
        let c = coordinator(fetcher);
        let t0 = warm(&c).await;

        assert_eq!(c.ensure_fresh(Trigger::Scheduled), RefreshOutcome::Started);
        settle(&c).await;

        assert_eq!(c.inner.state().last_success_mono, Some(t0));
        assert_eq!(
            c.ensure_fresh_at(manual(SECRET), t0 + Duration::from_secs(31 * 60)),
            RefreshOutcome::Started
        );
        settle(&c).await;
    }

    #[tokio::test]
    async fn test_manual_without_prior_success_is_not_rate_limited() {
        let fetcher = Arc::new(ScriptedFetcher::new(vec![Step::Ok(points(&[("p1", 1.0)]))]));
        let c = coordinator(fetcher);
        assert_eq!(c.ensure_fresh(manual(SECRET)), RefreshOutcome::Started);
        settle(&c).await;
    }

    #[tokio::test]
    async fn test_wrong_credential_never_fetches() {
        let fetcher = Arc::new(ScriptedFetcher::new(vec![Step::Ok(points(&[("p1", 1.0)]))]));
        let c = coordinator(fetcher.clone());

        assert_eq!(c.ensure_fresh(manual("nope")), RefreshOutcome::Unauthorized);
        assert_eq!(
            c.ensure_fresh(Trigger::Manual { credential: None }),
            RefreshOutcome::Unauthorized
        );
        assert!(!c.is_refreshing());
        assert!(c.status().last_attempt_started_at.is_none());

        tokio::task::yield_now().await;
        assert_eq!(fetcher.calls(), 0);
    }

    #[tokio::test]
    async fn test_manual_disabled_without_secret() {
        let fetcher = Arc::new(ScriptedFetcher::new(vec![]));
        let c = RefreshCoordinator::new(fetcher.clone(), RefreshPolicy::default(), None, None);
        assert_eq!(c.ensure_fresh(manual("")), RefreshOutcome::Unauthorized);
        assert_eq!(fetcher.calls(), 0);
    }

    #[tokio::test]
    async fn test_scheduled_ignores_ttl() {
        let fetcher = Arc::new(ScriptedFetcher::new(vec![
            Step::Ok(points(&[("p1", 1.0)])),
            Step::Ok(points(&[("p1", 2.0)])),
        ]));
        let c = coordinator(fetcher);
        warm(&c).await;

        assert_eq!(c.ensure_fresh(Trigger::Scheduled), RefreshOutcome::Started);
        settle(&c).await;
        let snap = c.current_data().unwrap();
        assert_eq!(snap.version, 2);
        assert_eq!(snap.points.get("p1"), Some(&2.0));
    }

    #[tokio::test]
    async fn test_refresh_on_read_fires_passive_trigger() {
        let fetcher = Arc::new(ScriptedFetcher::new(vec![Step::Ok(points(&[("p1", 1.0)]))]));
        let policy = RefreshPolicy {
            refresh_on_read: true,
            ..RefreshPolicy::default()
        };
        let c = RefreshCoordinator::new(fetcher.clone(), policy, None, None);

        assert!(c.current_data().is_none());
        settle(&c).await;
        assert_eq!(fetcher.calls(), 1);

        // Fresh now, so reading again does not fetch
        assert!(c.current_data().is_some());
        assert!(!c.is_refreshing());
        assert_eq!(fetcher.calls(), 1);
    }

    /// A stale snapshot is served as-is while the read kicks off a refresh.
    #[tokio::test]
    async fn test_refresh_on_read_serves_stale_snapshot_and_refreshes() {
        let gate = Arc::new(Semaphore::new(1));
        let fetcher = Arc::new(
            ScriptedFetcher::new(vec![
                Step::Ok(points(&[("p1", 1.0)])),
                Step::Ok(points(&[("p1", 2.0)])),
            ])
            .gated(gate.clone()),
        );
        let policy = RefreshPolicy {
            ttl: Duration::from_millis(5),
            refresh_on_read: true,
            ..RefreshPolicy::default()
        };
        let c = RefreshCoordinator::new(fetcher.clone(), policy, None, None);
        warm(&c).await;
        tokio::time::sleep(Duration::from_millis(20)).await;

        let snap = c.current_data().unwrap();
        assert_eq!(snap.version, 1);
        assert_eq!(snap.points.get("p1"), Some(&1.0));
        assert!(c.is_refreshing());

        gate.add_permits(1);
        settle(&c).await;
        assert_eq!(fetcher.calls(), 2);
        assert_eq!(c.inner.store.read().unwrap().version, 2);
    }

    /// TTL and cooldown follow the monotonic clock, so a wall clock stepping
    /// backwards does not stretch either window.
    #[tokio::test]
    async fn test_policy_ignores_wall_clock_steps() {
        let fetcher = Arc::new(ScriptedFetcher::new(vec![
            Step::Ok(points(&[("p1", 1.0)])),
            Step::Ok(points(&[("p1", 2.0)])),
        ]));
        let c = coordinator(fetcher.clone());
        let t0 = warm(&c).await;

        // Wall clock went back an hour: the recorded success now looks like it is in the future
        c.inner.state().last_success_at = Some(Utc::now() + ChronoDuration::hours(1));

        assert_eq!(
            c.ensure_fresh_at(manual(SECRET), t0 + Duration::from_secs(10 * 60)),
            RefreshOutcome::RateLimited {
                retry_after: Duration::from_secs(20 * 60)
            }
        );
        assert_eq!(
            c.ensure_fresh_at(Trigger::PassiveTtl, t0 + Duration::from_secs(61)),
            RefreshOutcome::Started
        );
        settle(&c).await;
        assert_eq!(fetcher.calls(), 2);
    }

    #[tokio::test]
    async fn test_timer_only_read_has_no_side_effect() {
        let fetcher = Arc::new(ScriptedFetcher::new(vec![]));
        let c = coordinator(fetcher.clone());

        assert!(c.current_data().is_none());
        assert!(!c.is_refreshing());
        assert_eq!(fetcher.calls(), 0);
    }

    #[tokio::test]
    async fn test_preloads_persisted_snapshot_and_saves_new_one() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("player-points.json");
        std::fs::write(&path, br#"{"p1": 42, "p2": 17}"#).unwrap();

        let fetcher = Arc::new(ScriptedFetcher::new(vec![Step::Ok(points(&[("p3", 9.0)]))]));
        let c = RefreshCoordinator::new(
            fetcher,
            RefreshPolicy::default(),
            None,
            Some(SnapshotFile::new(&path)),
        );

        let preloaded = c.current_data().unwrap();
        assert_eq!(preloaded.len(), 2);
        assert_eq!(preloaded.version, 1);
        assert!(!c.is_refreshing());
        assert_eq!(c.status().last_success_at, Some(preloaded.fetched_at));

        assert_eq!(c.ensure_fresh(Trigger::Startup), RefreshOutcome::Started);
        settle(&c).await;

        assert_eq!(c.current_data().unwrap().version, 2);
        let (on_disk, _) = SnapshotFile::new(&path).load().unwrap().unwrap();
        assert_eq!(on_disk, points(&[("p3", 9.0)]));
    }

    #[tokio::test]
    async fn test_corrupt_persisted_snapshot_is_cold_start() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("player-points.json");
        std::fs::write(&path, b"<html>").unwrap();

        let fetcher = Arc::new(ScriptedFetcher::new(vec![]));
        let c = RefreshCoordinator::new(
            fetcher,
            RefreshPolicy::default(),
            None,
            Some(SnapshotFile::new(&path)),
        );
        assert!(c.current_data().is_none());
        assert_eq!(c.status().version, 0);
    }

    #[test]
    fn test_round_up_to_minutes() {
        assert_eq!(round_up_to_minutes(Duration::from_secs(1)), Duration::from_secs(60));
        assert_eq!(round_up_to_minutes(Duration::from_secs(60)), Duration::from_secs(60));
        assert_eq!(round_up_to_minutes(Duration::from_millis(60_001)), Duration::from_secs(120));
    }

    #[test]
    fn test_constant_time_eq() {
        assert!(constant_time_eq(b"abc", b"abc"));
        assert!(!constant_time_eq(b"abc", b"abd"));
        assert!(!constant_time_eq(b"abc", b"abcd"));
    }
}
