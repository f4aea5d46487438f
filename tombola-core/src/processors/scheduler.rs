//! Fixed-interval tick scheduler.
//!
//! Stands in for the platform's periodic trigger: one loop per job, each
//! emitting an empty tick on its own cadence. Ticks carry no payload; the
//! jobs re-derive "now" and re-query the store, so cadence is purely an
//! operational knob.

use crate::events::{ExpiryTick, ExpiryTickSender, LotteryTick, LotteryTickSender, OpenTick, OpenTickSender};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Per-job trigger cadences.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JobSchedule {
    pub open_interval: Duration,
    pub lottery_interval: Duration,
    pub expiry_interval: Duration,
}

impl Default for JobSchedule {
    fn default() -> Self {
        Self {
            open_interval: Duration::from_secs(60),
            lottery_interval: Duration::from_secs(60),
            expiry_interval: Duration::from_secs(60),
        }
    }
}

/// Scheduler spawns the three tick loops.
pub struct Scheduler {
    schedule: JobSchedule,
    shutdown_rx: watch::Receiver<bool>,
}

impl Scheduler {
    pub fn new(schedule: JobSchedule, shutdown_rx: watch::Receiver<bool>) -> Self {
        Self {
            schedule,
            shutdown_rx,
        }
    }

    /// Spawn one tick loop per job and return their handles.
    pub fn spawn(
        self,
        open_tx: OpenTickSender,
        lottery_tx: LotteryTickSender,
        expiry_tx: ExpiryTickSender,
    ) -> Vec<JoinHandle<()>> {
        info!(
            open_secs = self.schedule.open_interval.as_secs(),
            lottery_secs = self.schedule.lottery_interval.as_secs(),
            expiry_secs = self.schedule.expiry_interval.as_secs(),
            "Scheduler started"
        );

        vec![
            Self::spawn_tick_loop(
                "registration-open",
                self.schedule.open_interval,
                open_tx,
                OpenTick,
                self.shutdown_rx.clone(),
            ),
            Self::spawn_tick_loop(
                "lottery",
                self.schedule.lottery_interval,
                lottery_tx,
                LotteryTick,
                self.shutdown_rx.clone(),
            ),
            Self::spawn_tick_loop(
                "pending-expiry",
                self.schedule.expiry_interval,
                expiry_tx,
                ExpiryTick,
                self.shutdown_rx,
            ),
        ]
    }

    /// Spawn a fixed-cadence tick loop for a single job.
    fn spawn_tick_loop<T>(
        label: &'static str,
        period: Duration,
        tick_tx: mpsc::Sender<T>,
        tick: T,
        mut shutdown_rx: watch::Receiver<bool>,
    ) -> JoinHandle<()>
    where
        T: Copy + Send + 'static,
    {
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;

                    _ = shutdown_rx.changed() => {
                        if *shutdown_rx.borrow() {
                            debug!(job = label, "Tick loop shutting down");
                            break;
                        }
                    }

                    _ = tokio::time::sleep(period) => {
                        if let Err(e) = tick_tx.send(tick).await {
                            warn!(job = label, error = %e, "Failed to send tick, receiver dropped");
                            return;
                        }
                        debug!(job = label, "Emitted tick");
                    }
                }
            }
        })
    }
}
