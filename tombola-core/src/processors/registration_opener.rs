//! RegistrationOpener processor.
//!
//! The RegistrationOpener is responsible for:
//! - Receiving `OpenTick` events
//! - Scanning for events whose registration window has started and whose
//!   `registration_opened` latch is still unset
//! - Latching the flag, with no other side effects

use crate::clock::Clock;
use crate::events::OpenTickReceiver;
use crate::store::{CommitOutcome, EventStore, StoreError};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, error, info};

/// RegistrationOpener flips `registration_opened` when the window starts.
pub struct RegistrationOpener {
    store: Arc<dyn EventStore>,
    clock: Arc<dyn Clock>,
    tick_rx: OpenTickReceiver,
    shutdown_rx: watch::Receiver<bool>,
}

impl RegistrationOpener {
    pub fn new(
        store: Arc<dyn EventStore>,
        clock: Arc<dyn Clock>,
        tick_rx: OpenTickReceiver,
        shutdown_rx: watch::Receiver<bool>,
    ) -> Self {
        Self {
            store,
            clock,
            tick_rx,
            shutdown_rx,
        }
    }

    /// Run the RegistrationOpener until shutdown is signaled.
    pub async fn run(mut self) {
        info!("RegistrationOpener started");

        loop {
            tokio::select! {
                biased;

                _ = self.shutdown_rx.changed() => {
                    if *self.shutdown_rx.borrow() {
                        info!("RegistrationOpener received shutdown signal");
                        break;
                    }
                }

                Some(_) = self.tick_rx.recv() => {
                    if let Err(e) = self.run_once().await {
                        error!(error = %e, "Registration scan failed, will retry on next tick");
                    }
                }

                else => {
                    info!("OpenTick channel closed");
                    break;
                }
            }
        }

        info!("RegistrationOpener shutdown complete");
    }

    /// One batch pass: scan for due events and latch each one.
    ///
    /// A commit failure aborts that event only; the rest of the batch still
    /// runs, and the unset latch brings the event back on the next tick.
    pub async fn run_once(&self) -> Result<u32, StoreError> {
        let now = self.clock.now();
        let due = self.store.due_for_registration_open(now).await?;

        if due.is_empty() {
            debug!("No events due for registration opening");
            return Ok(0);
        }

        let mut opened = 0u32;
        for event in &due {
            match self.store.open_registration(&event.id).await {
                Ok(CommitOutcome::Applied) => {
                    info!(event_id = %event.id, "Opened registration");
                    opened += 1;
                }
                Ok(CommitOutcome::AlreadyProcessed) => {
                    debug!(event_id = %event.id, "Registration already opened by a concurrent run");
                }
                Err(e) => {
                    error!(event_id = %event.id, error = %e, "Failed to open registration");
                }
            }
        }
        Ok(opened)
    }
}
