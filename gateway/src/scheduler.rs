//! Wall-clock-triggered maintenance: the hourly activity rollup, stale-row
//! pruning and the daily cache sweep.
//!
//! Each task loops sleep→run; the next trigger is computed only after the
//! current run finishes, so a run that overlaps its next trigger suppresses
//! it instead of queueing a second run.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, DurationRound, TimeDelta, Timelike, Utc};
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::cache::ResponseCache;
use crate::config::GatewayConfig;
use crate::ingest::hour_floor;
use crate::repo::Repository;

pub fn spawn(
    repo: Arc<Repository>,
    cache: Arc<ResponseCache>,
    config: Arc<GatewayConfig>,
) -> Vec<JoinHandle<()>> {
    vec![
        tokio::spawn(rollup_loop(repo.clone())),
        tokio::spawn(position_prune_loop(repo.clone(), config.clone())),
        tokio::spawn(neighbor_prune_loop(repo, config)),
        tokio::spawn(cache_purge_loop(cache)),
    ]
}

/// First minute boundary strictly after `now` matching `minute` (and `hour`,
/// when given).
pub(crate) fn next_trigger(now: DateTime<Utc>, minute: u32, hour: Option<u32>) -> DateTime<Utc> {
    let mut candidate = now.duration_trunc(TimeDelta::minutes(1)).unwrap_or(now);
    loop {
        candidate += TimeDelta::minutes(1);
        if candidate.minute() == minute && hour.map_or(true, |h| candidate.hour() == h) {
            return candidate;
        }
    }
}

async fn wait_until(minute: u32, hour: Option<u32>) {
    let now = Utc::now();
    let next = next_trigger(now, minute, hour);
    let delay = (next - now).to_std().unwrap_or(Duration::ZERO);
    tokio::time::sleep(delay).await;
}

/// On the hour: roll the past hour into analysis_active_hourly.
async fn rollup_loop(repo: Arc<Repository>) {
    loop {
        wait_until(0, None).await;
        let hour_end = hour_floor(Utc::now());
        let hour_start = hour_end - TimeDelta::hours(1);
        match repo.rollup_active_hour(hour_start, hour_end).await {
            Ok(()) => info!("active-node rollup done for {hour_start}"),
            Err(err) => error!("active-node rollup failed: {err}"),
        }
    }
}

/// Minute 28: drop positions beyond the position query horizon.
async fn position_prune_loop(repo: Arc<Repository>, config: Arc<GatewayConfig>) {
    loop {
        wait_until(28, None).await;
        let cutoff = Utc::now() - TimeDelta::hours(config.meshtastic.position.max_query_period);
        match repo.prune_positions(cutoff).await {
            Ok(count) => info!("pruned {count} stale positions"),
            Err(err) => error!("position prune failed: {err}"),
        }
    }
}

/// Minute 32: drop stale neighbor reports together with their edges.
async fn neighbor_prune_loop(repo: Arc<Repository>, config: Arc<GatewayConfig>) {
    loop {
        wait_until(32, None).await;
        let cutoff = Utc::now() - TimeDelta::hours(config.meshtastic.neighborinfo.max_query_period);
        match repo.prune_neighbor_info(cutoff).await {
            Ok((infos, edges)) => info!("pruned {infos} neighbor reports, {edges} edges"),
            Err(err) => error!("neighbor prune failed: {err}"),
        }
    }
}

/// Daily at 00:30: sweep the map response cache.
async fn cache_purge_loop(cache: Arc<ResponseCache>) {
    loop {
        wait_until(30, Some(0)).await;
        cache.purge();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn hourly_trigger_lands_on_the_requested_minute() {
        let now = Utc.with_ymd_and_hms(2024, 7, 3, 14, 5, 12).unwrap();
        assert_eq!(
            next_trigger(now, 28, None),
            Utc.with_ymd_and_hms(2024, 7, 3, 14, 28, 0).unwrap()
        );
        // Past this hour's trigger: roll to the next hour.
        assert_eq!(
            next_trigger(now, 0, None),
            Utc.with_ymd_and_hms(2024, 7, 3, 15, 0, 0).unwrap()
        );
    }

    #[test]
    fn trigger_at_the_exact_minute_schedules_the_next_occurrence() {
        let now = Utc.with_ymd_and_hms(2024, 7, 3, 14, 28, 0).unwrap();
        assert_eq!(
            next_trigger(now, 28, None),
            Utc.with_ymd_and_hms(2024, 7, 3, 15, 28, 0).unwrap()
        );
    }

    #[test]
    fn daily_trigger_matches_hour_and_minute() {
        let now = Utc.with_ymd_and_hms(2024, 7, 3, 0, 31, 0).unwrap();
        assert_eq!(
            next_trigger(now, 30, Some(0)),
            Utc.with_ymd_and_hms(2024, 7, 4, 0, 30, 0).unwrap()
        );
        let before = Utc.with_ymd_and_hms(2024, 7, 3, 0, 10, 0).unwrap();
        assert_eq!(
            next_trigger(before, 30, Some(0)),
            Utc.with_ymd_and_hms(2024, 7, 3, 0, 30, 0).unwrap()
        );
    }
}
