//! Handle for sending commands to the referee actor.
//!
//! Ticks are coalesced: while a tick of one kind is queued, further ticks of
//! that kind are dropped instead of filling the channel.

use anyhow::Result;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tracing::debug;

use crate::commands::{RefereeCommand, Tick};
use crate::status::RefereeStatus;

/// One "queued" flag per tick kind, so a tick that is already waiting in the
/// channel is not queued a second time.
#[derive(Debug, Default)]
struct PendingTicks {
    ingest: AtomicBool,
    expiry_scan: AtomicBool,
    persist: AtomicBool,
}

impl PendingTicks {
    const fn flag(&self, tick: Tick) -> &AtomicBool {
        match tick {
            Tick::Ingest => &self.ingest,
            Tick::ExpiryScan => &self.expiry_scan,
            Tick::Persist => &self.persist,
        }
    }
}

/// Outcome of a non-blocking tick send.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickResult {
    /// Queued for the actor.
    Sent,
    /// Same tick already queued, or the channel is full; this one is dropped.
    Coalesced,
    /// The actor has exited.
    Closed,
}

/// Creates a command channel and the handle that feeds it.
#[must_use]
pub fn channel(capacity: usize) -> (RefereeHandle, CommandReceiver) {
    let (tx, rx) = mpsc::channel(capacity);
    let pending = Arc::new(PendingTicks::default());
    (
        RefereeHandle {
            tx,
            pending: Arc::clone(&pending),
        },
        CommandReceiver { rx, pending },
    )
}

/// Actor side of the command channel.
#[derive(Debug)]
pub struct CommandReceiver {
    rx: mpsc::Receiver<RefereeCommand>,
    pending: Arc<PendingTicks>,
}

impl CommandReceiver {
    /// Next command, or `None` once every handle is dropped.
    pub async fn recv(&mut self) -> Option<RefereeCommand> {
        let command = self.rx.recv().await?;
        if let RefereeCommand::Tick(tick) = &command {
            self.pending.flag(*tick).store(false, Ordering::SeqCst);
        }
        Some(command)
    }
}

#[derive(Debug, Clone)]
pub struct RefereeHandle {
    tx: mpsc::Sender<RefereeCommand>,
    pending: Arc<PendingTicks>,
}

impl RefereeHandle {
    /// Queues a tick, waiting for channel capacity.
    ///
    /// # Errors
    /// Returns an error if the actor has exited.
    pub async fn tick(&self, tick: Tick) -> Result<()> {
        self.pending.flag(tick).store(true, Ordering::SeqCst);
        self.tx.send(RefereeCommand::Tick(tick)).await?;
        Ok(())
    }

    /// Queues a tick unless the same tick is already waiting.
    pub fn try_tick(&self, tick: Tick) -> TickResult {
        let flag = self.pending.flag(tick);
        if flag.swap(true, Ordering::SeqCst) {
            return TickResult::Coalesced;
        }

        match self.tx.try_send(RefereeCommand::Tick(tick)) {
            Ok(()) => TickResult::Sent,
            Err(mpsc::error::TrySendError::Full(_)) => {
                flag.store(false, Ordering::SeqCst);
                debug!(?tick, "Command channel full, dropping tick");
                TickResult::Coalesced
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                flag.store(false, Ordering::SeqCst);
                TickResult::Closed
            }
        }
    }

    /// Gets the current status of the referee.
    ///
    /// # Errors
    /// Returns an error if the command cannot be sent or the response cannot be received.
    pub async fn status(&self) -> Result<RefereeStatus> {
        let (tx, rx) = oneshot::channel();
        self.tx.send(RefereeCommand::GetStatus(tx)).await?;
        let status = rx.await?;
        Ok(status)
    }

    /// Asks the actor to save and exit after the command in progress.
    ///
    /// # Errors
    /// Returns an error if the actor has already exited.
    pub async fn shutdown(&self) -> Result<()> {
        self.tx.send(RefereeCommand::Shutdown).await?;
        Ok(())
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_repeated_tick_is_coalesced_until_received() {
        let (handle, mut rx) = channel(8);

        assert_eq!(handle.try_tick(Tick::Ingest), TickResult::Sent);
        assert_eq!(handle.try_tick(Tick::Ingest), TickResult::Coalesced);
        assert_eq!(handle.try_tick(Tick::ExpiryScan), TickResult::Sent);

        assert!(matches!(rx.recv().await, Some(RefereeCommand::Tick(Tick::Ingest))));
        assert_eq!(handle.try_tick(Tick::Ingest), TickResult::Sent);
    }

    #[tokio::test]
    async fn test_full_channel_drops_tick() {
        let (handle, mut rx) = channel(1);

        assert_eq!(handle.try_tick(Tick::Ingest), TickResult::Sent);
        assert_eq!(handle.try_tick(Tick::Persist), TickResult::Coalesced);

        rx.recv().await;
        assert_eq!(handle.try_tick(Tick::Persist), TickResult::Sent);
    }

    #[tokio::test]
    async fn test_closed_channel_reported() {
        let (handle, rx) = channel(1);
        drop(rx);

        assert_eq!(handle.try_tick(Tick::Ingest), TickResult::Closed);
        assert!(handle.is_closed());
        assert!(handle.shutdown().await.is_err());
    }
}
