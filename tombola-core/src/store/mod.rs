//! Storage seams for the lottery engine.
//!
//! The engine treats the event store, the profile directory, and the
//! notification sink as external collaborators behind traits. Production
//! wires the Postgres adapter; tests and the standalone demo mode wire the
//! in-memory store, which implements all three.

pub mod memory;
pub mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

use crate::entities::{EntrantId, EventId, EventRecord, Notification, ProfileSnapshot};
use async_trait::async_trait;
use time::OffsetDateTime;

/// Errors surfaced by the storage collaborators.
///
/// `Unavailable` is the transient bucket: it aborts the current event only,
/// leaving its latch flag unset so the next scheduled run retries it.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Event document disappeared between scan and commit.
    #[error("event not found: {0}")]
    EventNotFound(EventId),

    /// Transient backend failure (query or update).
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// Stored document does not match the expected shape.
    #[error("malformed event document {id}: {reason}")]
    Malformed { id: EventId, reason: String },
}

impl From<sqlx::Error> for StoreError {
    fn from(e: sqlx::Error) -> Self {
        StoreError::Unavailable(e.to_string())
    }
}

/// Result of a guarded commit.
///
/// Each transition flag acts as a single-writer latch: the commit re-checks
/// it inside the store transaction, and a concurrent run that lost the race
/// observes `AlreadyProcessed` instead of applying twice.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitOutcome {
    Applied,
    AlreadyProcessed,
}

/// Filtered scans and guarded per-event commits over event documents.
#[async_trait]
pub trait EventStore: Send + Sync {
    /// Events with `registration_start <= now` and the opened latch unset.
    async fn due_for_registration_open(
        &self,
        now: OffsetDateTime,
    ) -> Result<Vec<EventRecord>, StoreError>;

    /// Events with `registration_end <= now` and the lottery latch unset.
    async fn due_for_lottery(&self, now: OffsetDateTime) -> Result<Vec<EventRecord>, StoreError>;

    /// Events with `event_start <= now` and the expiry latch unset.
    async fn due_for_expiry(&self, now: OffsetDateTime) -> Result<Vec<EventRecord>, StoreError>;

    /// Latch `registration_opened`. No other fields change.
    async fn open_registration(&self, id: &EventId) -> Result<CommitOutcome, StoreError>;

    /// Commit a lottery draw: replace the waitlist with `remaining`, union
    /// `winners` into the pending list, latch `lottery_processed`.
    async fn commit_lottery(
        &self,
        id: &EventId,
        remaining: &[EntrantId],
        winners: &[EntrantId],
    ) -> Result<CommitOutcome, StoreError>;

    /// Move the whole pending list into declined (union), clear pending,
    /// latch `pending_expired`.
    async fn expire_pending(&self, id: &EventId) -> Result<CommitOutcome, StoreError>;
}

/// Read-only exact-match lookup of entrant profiles.
#[async_trait]
pub trait ProfileDirectory: Send + Sync {
    /// Zero or one profile snapshot for the device id.
    async fn find_by_device_id(
        &self,
        id: &EntrantId,
    ) -> Result<Option<ProfileSnapshot>, StoreError>;
}

/// Bulk creation of notification records.
#[async_trait]
pub trait NotificationSink: Send + Sync {
    /// Create the batch as one all-or-nothing write, skipping records whose
    /// `dispatch_key` already exists. Returns the number actually created.
    async fn create_batch(&self, batch: &[Notification]) -> Result<u64, StoreError>;
}
