//! Batch job processors.
//!
//! This module contains the three scheduled jobs and the scheduler that
//! drives them:
//!
//! - `Scheduler`: emits `OpenTick` / `LotteryTick` / `ExpiryTick` on fixed cadences
//! - `RegistrationOpener`: receives `OpenTick`, latches `registration_opened`
//! - `LotteryRunner`: receives `LotteryTick`, draws winners, fans out notifications
//! - `PendingExpirer`: receives `ExpiryTick`, declines unanswered invitations
//!
//! Each job is idempotent: the latch flag on the event document guarantees a
//! transition happens at most once, so overlapping or repeated ticks are safe.

pub mod lottery_runner;
pub mod pending_expirer;
pub mod registration_opener;
pub mod scheduler;

pub use lottery_runner::{Draw, LotteryError, LotteryRunner, draw};
pub use pending_expirer::PendingExpirer;
pub use registration_opener::RegistrationOpener;
pub use scheduler::{JobSchedule, Scheduler};
