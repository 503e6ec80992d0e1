//! Long-running service wiring: lease, recovery, actor, tickers, shutdown.

use anyhow::{Context, Result};
use duel_referee_core::{Clock, DuelStore, LedgerGateway, ScheduleConfig, SystemClock};
use duel_referee_store::{InstanceLease, LeaseError};
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::time::MissedTickBehavior;
use tracing::{error, info, warn};

use crate::handle::{channel, RefereeHandle};
use crate::referee::Referee;
use crate::scheduler::spawn_tickers;

const COMMAND_CAPACITY: usize = 32;

/// Runs the referee until `shutdown` resolves or the lease is lost.
///
/// # Errors
/// Returns an error if the lease is held elsewhere, startup recovery fails,
/// or the actor task panics.
pub async fn run_service<G, S, C, F>(
    mut referee: Referee<G, S, C>,
    schedule: &ScheduleConfig,
    lease: Option<InstanceLease>,
    shutdown: F,
) -> Result<()>
where
    G: LedgerGateway + 'static,
    S: DuelStore + 'static,
    C: Clock + 'static,
    F: Future<Output = ()>,
{
    if let Some(lease) = &lease {
        acquire_lease(lease).await?;
    }

    let report = match referee.start().await {
        Ok(report) => report,
        Err(e) => {
            release_lease(lease.as_ref()).await;
            return Err(e).context("Startup recovery failed");
        }
    };
    info!(
        recovered = report.recovered,
        tracked = referee.book().len(),
        "Startup recovery finished, entering service loop"
    );

    let fence = referee.fence();
    let (handle, commands) = channel(COMMAND_CAPACITY);
    let mut actor = tokio::spawn(referee.run(commands));
    let tickers = spawn_tickers(&handle, schedule);
    let keeper = lease
        .clone()
        .map(|lease| tokio::spawn(keep_lease(lease, handle.clone(), fence)));

    tokio::pin!(shutdown);
    let finished = tokio::select! {
        () = &mut shutdown => {
            info!("Shutdown requested");
            None
        }
        result = &mut actor => Some(result),
    };

    for ticker in tickers {
        ticker.abort();
    }
    if let Some(keeper) = keeper {
        keeper.abort();
    }

    let result = match finished {
        Some(result) => result,
        None => {
            if handle.shutdown().await.is_err() {
                warn!("Referee exited before shutdown command");
            }
            actor.await
        }
    };
    let final_status = result.context("Referee actor panicked")?;

    info!(
        tracked = final_status.tracked,
        processed_events = final_status.processed_events,
        persistence_healthy = final_status.persistence_healthy,
        unsaved_changes = final_status.unsaved_changes,
        "Referee stopped"
    );

    if !final_status.fenced {
        release_lease(lease.as_ref()).await;
    }
    Ok(())
}

/// Renews the lease until it is lost, then fences the referee and stops it.
async fn keep_lease(lease: InstanceLease, handle: RefereeHandle, fence: Arc<AtomicBool>) {
    let mut interval = tokio::time::interval(lease.renew_interval());
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    interval.tick().await;

    loop {
        interval.tick().await;

        let renewing = lease.clone();
        let renewed =
            tokio::task::spawn_blocking(move || renewing.renew(SystemClock.now_ms())).await;

        match renewed {
            Ok(Ok(())) => {}
            Ok(Err(LeaseError::Lost { owner })) => {
                fence.store(true, Ordering::SeqCst);
                error!(
                    path = %lease.path().display(),
                    new_owner = %owner,
                    "Instance lease lost, stopping referee"
                );
                let _ = handle.shutdown().await;
                return;
            }
            Ok(Err(e)) => warn!(error = %e, "Lease renewal failed, retrying"),
            Err(e) => warn!(error = %e, "Lease renewal task failed"),
        }
    }
}

/// Acquires the lease on the blocking pool.
///
/// # Errors
/// Returns an error if another live instance holds the lease or the lease
/// file cannot be written.
pub async fn acquire_lease(lease: &InstanceLease) -> Result<()> {
    let acquiring = lease.clone();
    tokio::task::spawn_blocking(move || acquiring.acquire(SystemClock.now_ms()))
        .await
        .context("Lease acquisition task failed")?
        .with_context(|| format!("Failed to acquire lease {}", lease.path().display()))
}

/// Releases the lease on the blocking pool, logging any failure.
pub async fn release_lease(lease: Option<&InstanceLease>) {
    let Some(lease) = lease else {
        return;
    };
    let releasing = lease.clone();
    match tokio::task::spawn_blocking(move || releasing.release()).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => warn!(error = %e, "Failed to release lease"),
        Err(e) => warn!(error = %e, "Lease release task failed"),
    }
}
