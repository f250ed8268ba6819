//! Metric poller: one spawned task per monitoring session.
//!
//! Ticks at a fixed interval, awaits each fetch before the next tick (polls
//! never overlap), and posts every sample to the engine. Missed ticks are
//! skipped rather than bursted. The task ends when the engine drops its
//! command receiver or aborts the handle.

use crate::engine::Command;
use crate::metric_source::MetricSource;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::debug;

pub fn spawn(
    source: Arc<dyn MetricSource>,
    tracked_id: String,
    every: Duration,
    commands: mpsc::Sender<Command>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(every);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        // The first tick fires immediately; the start metric was just fetched.
        interval.tick().await;

        loop {
            interval.tick().await;
            let value = source.fetch_metric(&tracked_id).await;
            let sample = Command::MetricSample {
                tracked_id: tracked_id.clone(),
                value,
            };
            if commands.send(sample).await.is_err() {
                debug!(%tracked_id, "engine gone, poller exiting");
                break;
            }
        }
    })
}
