use crate::models::Activity;
use crate::planner::PlannerCore;
use chrono::NaiveDateTime;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio::time::{Duration, MissedTickBehavior};

/// Splits a collection into `(kept, expired)`.
///
/// An activity expires once its instant is strictly before `now`. Records
/// whose date or time cannot be read have no instant and count as expired.
pub fn partition_expired(activities: Vec<Activity>, now: NaiveDateTime) -> (Vec<Activity>, Vec<Activity>) {
    activities
        .into_iter()
        .partition(|activity| activity.instant().map(|at| at >= now).unwrap_or(false))
}

/// Runs [`PlannerCore::sweep_expired`] on a fixed cadence. The first sweep
/// happens one period after start.
pub fn spawn_sweeper(planner: Arc<PlannerCore>, period: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            interval.tick().await;
            match planner.sweep_expired() {
                Ok(report) if !report.removed.is_empty() => {
                    tracing::info!(
                        removed = report.removed.len(),
                        remaining = report.remaining,
                        persisted = report.persisted,
                        "expired activities swept"
                    );
                }
                Ok(_) => {}
                Err(error) => tracing::warn!(error = %error, "expiry sweep failed"),
            }
        }
    })
}
