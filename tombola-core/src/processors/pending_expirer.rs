//! PendingExpirer processor.
//!
//! The PendingExpirer is responsible for:
//! - Receiving `ExpiryTick` events
//! - Scanning for events that have started and whose `pending_expired`
//!   latch is still unset
//! - Moving every unanswered invitee from pending to declined
//!
//! No response by event start means decline: invitees who never accepted
//! lose the invitation when the event begins.

use crate::clock::Clock;
use crate::events::ExpiryTickReceiver;
use crate::store::{CommitOutcome, EventStore, StoreError};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, error, info};

/// PendingExpirer declines unanswered invitations at event start.
pub struct PendingExpirer {
    store: Arc<dyn EventStore>,
    clock: Arc<dyn Clock>,
    tick_rx: ExpiryTickReceiver,
    shutdown_rx: watch::Receiver<bool>,
}

impl PendingExpirer {
    pub fn new(
        store: Arc<dyn EventStore>,
        clock: Arc<dyn Clock>,
        tick_rx: ExpiryTickReceiver,
        shutdown_rx: watch::Receiver<bool>,
    ) -> Self {
        Self {
            store,
            clock,
            tick_rx,
            shutdown_rx,
        }
    }

    /// Run the PendingExpirer until shutdown is signaled.
    pub async fn run(mut self) {
        info!("PendingExpirer started");

        loop {
            tokio::select! {
                biased;

                _ = self.shutdown_rx.changed() => {
                    if *self.shutdown_rx.borrow() {
                        info!("PendingExpirer received shutdown signal");
                        break;
                    }
                }

                Some(_) = self.tick_rx.recv() => {
                    if let Err(e) = self.run_once().await {
                        error!(error = %e, "Expiry scan failed, will retry on next tick");
                    }
                }

                else => {
                    info!("ExpiryTick channel closed");
                    break;
                }
            }
        }

        info!("PendingExpirer shutdown complete");
    }

    /// One batch pass: scan for started events and expire each one.
    pub async fn run_once(&self) -> Result<u32, StoreError> {
        let now = self.clock.now();
        let due = self.store.due_for_expiry(now).await?;

        if due.is_empty() {
            debug!("No events with pending invitations to expire");
            return Ok(0);
        }

        let mut expired = 0u32;
        for event in &due {
            match self.store.expire_pending(&event.id).await {
                Ok(CommitOutcome::Applied) => {
                    info!(
                        event_id = %event.id,
                        moved = event.pending_list.len(),
                        "Expired pending invitations"
                    );
                    expired += 1;
                }
                Ok(CommitOutcome::AlreadyProcessed) => {
                    debug!(event_id = %event.id, "Pending list already expired by a concurrent run");
                }
                Err(e) => {
                    error!(event_id = %event.id, error = %e, "Failed to expire pending invitations");
                }
            }
        }
        Ok(expired)
    }
}
