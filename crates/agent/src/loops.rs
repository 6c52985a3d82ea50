//! The two periodic loops. Each run is spawned so a slow pass is observed
//! by the next timer fire and skipped instead of silently queueing.

use std::{sync::Arc, time::Duration};

use tokio::time::{interval, sleep, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::{runner::ActionRunner, stats::StatsCollector};

/// Drives the stats collector until the token fires. If a previous run is
/// still going when the timer fires, the new tick is skipped.
pub async fn run_stats_loop(
    collector: Arc<StatsCollector>,
    period: Duration,
    token: CancellationToken
) {
    let guard = Arc::new(tokio::sync::Mutex::new(()));
    let mut timer = interval(period);
    timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
    info!(period_secs = period.as_secs(), "stats loop running");

    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            _ = timer.tick() => {}
        }

        let Ok(permit) = guard.clone().try_lock_owned() else {
            warn!("previous stats run still in progress, skipping tick");
            continue
        };

        let collector = collector.clone();
        let token = token.clone();
        tokio::spawn(async move {
            let _permit = permit;
            let summary = collector.collect_once(&token).await;
            debug!(collected = summary.collected, failed = summary.failed, "stats run finished");
        });
    }

    info!("stats loop stopped");
}

/// Drives the action runner. Overlapping ticks are skipped with a warning
/// and every tick gets a hard deadline: on expiry the tick's child token
/// fires and the tick unwinds without corrupting task state.
pub async fn run_action_loop(
    runner: Arc<ActionRunner>,
    period: Duration,
    deadline: Duration,
    token: CancellationToken
) {
    let guard = Arc::new(tokio::sync::Mutex::new(()));
    let mut timer = interval(period);
    timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
    info!(period_secs = period.as_secs(), "action loop running");

    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            _ = timer.tick() => {}
        }

        let Ok(permit) = guard.clone().try_lock_owned() else {
            warn!("previous action tick still in progress, skipping tick");
            continue
        };

        let runner = runner.clone();
        let token = token.clone();
        tokio::spawn(async move {
            let _permit = permit;
            let child = token.child_token();
            let tick = runner.tick(&child);
            tokio::pin!(tick);

            let result = tokio::select! {
                result = &mut tick => result,
                _ = sleep(deadline) => {
                    warn!(deadline_secs = deadline.as_secs(), "action tick hit its deadline");
                    child.cancel();
                    tick.await
                }
            };

            match result {
                Ok(summary) if summary.cancelled => {
                    warn!(
                        updated = summary.updated,
                        started = summary.started,
                        "action tick cancelled before completing"
                    );
                }
                Ok(summary) => {
                    debug!(
                        updated = summary.updated,
                        started = summary.started,
                        errored = summary.errored,
                        "action tick finished"
                    );
                }
                Err(e) => error!(%e, "action tick aborted")
            }
        });
    }

    info!("action loop stopped");
}
