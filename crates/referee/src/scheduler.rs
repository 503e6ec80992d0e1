//! Ticker tasks that drive ingestion, expiry scans, and periodic saves.

use duel_referee_core::ScheduleConfig;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::debug;

use crate::commands::Tick;
use crate::handle::{RefereeHandle, TickResult};

/// Spawns one ticker task per periodic job.
///
/// Each ticker fires immediately, then on its interval. A tick that finds
/// the previous one still queued is dropped; tickers stop once the actor
/// is gone.
#[must_use]
pub fn spawn_tickers(handle: &RefereeHandle, schedule: &ScheduleConfig) -> Vec<JoinHandle<()>> {
    [
        (Tick::Ingest, schedule.ingest_interval()),
        (Tick::ExpiryScan, schedule.expiry_scan_interval()),
        (Tick::Persist, schedule.persist_interval()),
    ]
    .into_iter()
    .map(|(tick, period)| tokio::spawn(run_ticker(handle.clone(), tick, period)))
    .collect()
}

async fn run_ticker(handle: RefereeHandle, tick: Tick, period: Duration) {
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        interval.tick().await;
        match handle.try_tick(tick) {
            TickResult::Sent => {}
            TickResult::Coalesced => debug!(?tick, "Previous tick still pending, skipping"),
            TickResult::Closed => {
                debug!(?tick, "Referee stopped, ticker exiting");
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::RefereeCommand;
    use crate::handle::channel;

    fn schedule() -> ScheduleConfig {
        ScheduleConfig {
            ingest_interval_secs: 5,
            expiry_scan_interval_secs: 10,
            persist_interval_secs: 30,
            call_timeout_secs: 30,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_each_ticker_fires_immediately() {
        let (handle, mut rx) = channel(8);
        let tickers = spawn_tickers(&handle, &schedule());

        let mut seen = Vec::new();
        for _ in 0..3 {
            if let Some(RefereeCommand::Tick(tick)) = rx.recv().await {
                seen.push(tick);
            }
        }
        seen.sort_by_key(|t| *t as u8);
        assert_eq!(seen, vec![Tick::Ingest, Tick::ExpiryScan, Tick::Persist]);

        for t in tickers {
            t.abort();
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_unconsumed_ticks_coalesce() {
        let (handle, mut rx) = channel(8);
        let tickers = spawn_tickers(&handle, &schedule());

        // Nobody drains the channel for a minute of ingest ticks.
        tokio::time::sleep(Duration::from_secs(61)).await;

        let mut ingest = 0;
        while let Ok(cmd) = tokio::time::timeout(Duration::from_millis(1), rx.recv()).await {
            if matches!(cmd, Some(RefereeCommand::Tick(Tick::Ingest))) {
                ingest += 1;
            }
        }
        assert_eq!(ingest, 1);

        for t in tickers {
            t.abort();
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_tickers_exit_when_actor_is_gone() {
        let (handle, rx) = channel(8);
        drop(rx);
        let tickers = spawn_tickers(&handle, &schedule());

        for t in tickers {
            t.await.unwrap();
        }
    }
}
