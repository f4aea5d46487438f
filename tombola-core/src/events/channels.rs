//! Tick channel factories and handles.

use super::types::{ExpiryTick, LotteryTick, OpenTick};
use tokio::sync::mpsc;

/// Default buffer size for tick channels.
///
/// Ticks are coalescing by nature (a job that is behind simply scans once
/// more), so a small bound is enough.
pub const DEFAULT_CHANNEL_BUFFER: usize = 16;

/// Sender handle for OpenTick events.
pub type OpenTickSender = mpsc::Sender<OpenTick>;
/// Receiver handle for OpenTick events.
pub type OpenTickReceiver = mpsc::Receiver<OpenTick>;

/// Sender handle for LotteryTick events.
pub type LotteryTickSender = mpsc::Sender<LotteryTick>;
/// Receiver handle for LotteryTick events.
pub type LotteryTickReceiver = mpsc::Receiver<LotteryTick>;

/// Sender handle for ExpiryTick events.
pub type ExpiryTickSender = mpsc::Sender<ExpiryTick>;
/// Receiver handle for ExpiryTick events.
pub type ExpiryTickReceiver = mpsc::Receiver<ExpiryTick>;

/// Create a new OpenTick channel.
pub fn open_tick_channel() -> (OpenTickSender, OpenTickReceiver) {
    mpsc::channel(DEFAULT_CHANNEL_BUFFER)
}

/// Create a new LotteryTick channel.
pub fn lottery_tick_channel() -> (LotteryTickSender, LotteryTickReceiver) {
    mpsc::channel(DEFAULT_CHANNEL_BUFFER)
}

/// Create a new ExpiryTick channel.
pub fn expiry_tick_channel() -> (ExpiryTickSender, ExpiryTickReceiver) {
    mpsc::channel(DEFAULT_CHANNEL_BUFFER)
}
