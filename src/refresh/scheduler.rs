use anyhow::Result;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info};

use super::coordinator::{RefreshCoordinator, RefreshOutcome, Trigger};

/// Spawns a background task that asks the coordinator for a refresh every
/// `period`, keeping the data warm with no readers.
///
/// The first tick is one full period after the call; startup has its own
/// trigger. The loop never exits on fetch failure; fetch errors are absorbed
/// by the coordinator and the next tick fires on schedule. Fails up front if
/// `period` is too large to schedule.
pub fn spawn_scheduled_refresh(
    coordinator: RefreshCoordinator,
    period: Duration,
) -> Result<JoinHandle<()>> {
    let first = Instant::now()
        .checked_add(period)
        .ok_or_else(|| anyhow::anyhow!("refresh period {:?} is too large", period))?;

    Ok(tokio::spawn(async move {
        info!("Scheduled refresh every {:?}", period);

        let mut interval = interval_at(first, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            interval.tick().await;
            match coordinator.ensure_fresh(Trigger::Scheduled) {
                RefreshOutcome::Started => {}
                other => debug!("Scheduled refresh tick: {:?}", other),
            }
        }
    }))
}
