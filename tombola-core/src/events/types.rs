//! Tick type definitions.
//!
//! All ticks are idempotent and ephemeral. They carry no data; the receiving
//! job derives the current time from its clock and scans the store for due
//! events, so a lost or duplicated tick is harmless.

/// Trigger for the RegistrationOpener scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OpenTick;

/// Trigger for the LotteryRunner scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LotteryTick;

/// Trigger for the PendingExpirer scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExpiryTick;
