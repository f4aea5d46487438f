//! Tick events driving the batch jobs.
//!
//! The external trigger delivers no meaningful payload: each job re-derives
//! "now" from its clock and re-queries the store. Ticks are therefore empty
//! marker types carried over bounded mpsc channels.
//!
//! # Flow
//!
//! 1. `Scheduler` emits `OpenTick` -> `RegistrationOpener`
//! 2. `Scheduler` emits `LotteryTick` -> `LotteryRunner`
//! 3. `Scheduler` emits `ExpiryTick` -> `PendingExpirer`

pub mod channels;
pub mod types;

pub use channels::{
    DEFAULT_CHANNEL_BUFFER, ExpiryTickReceiver, ExpiryTickSender, LotteryTickReceiver,
    LotteryTickSender, OpenTickReceiver, OpenTickSender, expiry_tick_channel,
    lottery_tick_channel, open_tick_channel,
};

pub use types::{ExpiryTick, LotteryTick, OpenTick};
